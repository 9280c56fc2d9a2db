use anyhow::{Context, Result, anyhow, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use crate::provider::ProviderId;

/// Configuration for a single provider (e.g., API key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Redis,
    Memory,
}

impl TryFrom<&str> for CacheBackend {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "redis" => Ok(CacheBackend::Redis),
            "memory" => Ok(CacheBackend::Memory),
            _ => Err(anyhow!("Unknown cache backend '{value}'. Supported: redis, memory.")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub log_level: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 15,
            log_level: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub redis_url: String,
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Redis,
            redis_url: "redis://localhost:6379".to_string(),
            ttl_secs: 30 * 60,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Token bucket quota: `requests` per `window_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub requests: u32,
    pub window_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self { requests: 60, window_ms: 60_000 }
    }
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Provider listed and spawned first in a fan-out, e.g. "openweather".
    /// Winning is still decided by whichever provider answers first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,

    /// Example TOML:
    /// [providers.openweather]
    /// api_key = "..."
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

impl Config {
    /// The configured default provider, if any.
    pub fn default_provider_id(&self) -> Result<Option<ProviderId>> {
        self.default_provider.as_deref().map(ProviderId::try_from).transpose()
    }

    pub fn set_default_provider(&mut self, id: ProviderId) {
        self.default_provider = Some(id.as_str().to_string());
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(path)
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-task", "weather-server")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Overlay values from an environment-like source on top of this config.
    ///
    /// `lookup` returns `None` for unset variables; empty values are treated
    /// as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = get("PORT") {
            self.server.port =
                port.trim().parse().with_context(|| format!("Invalid PORT value '{port}'"))?;
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.server.log_level = Some(level);
        }
        if let Some(key) = get("OPENWEATHER_API_KEY") {
            self.upsert_provider_api_key(ProviderId::OpenWeather, key);
        }
        if let Some(key) = get("WEATHERAPI_KEY") {
            self.upsert_provider_api_key(ProviderId::WeatherApi, key);
        }
        if let Some(url) = get("REDIS_URL") {
            self.cache.redis_url = url;
        }
        if let Some(backend) = get("CACHE_BACKEND") {
            self.cache.backend = CacheBackend::try_from(backend.as_str())?;
        }
        if let Some(ttl) = get("CACHE_DURATION") {
            self.cache.ttl_secs = parse_duration(&ttl)
                .with_context(|| format!("Invalid CACHE_DURATION value '{ttl}'"))?
                .as_secs();
        }
        if let Some(requests) = get("RATE_LIMIT_REQUESTS") {
            self.rate_limit.requests = requests
                .trim()
                .parse()
                .with_context(|| format!("Invalid RATE_LIMIT_REQUESTS value '{requests}'"))?;
        }
        if let Some(window) = get("RATE_LIMIT_DURATION") {
            let window = parse_duration(&window)
                .with_context(|| format!("Invalid RATE_LIMIT_DURATION value '{window}'"))?;
            self.rate_limit.window_ms = u64::try_from(window.as_millis())
                .context("RATE_LIMIT_DURATION is too large")?;
        }

        Ok(())
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.default_provider_id().context("Invalid default_provider")?;

        if self.rate_limit.requests == 0 {
            bail!("rate_limit.requests must be at least 1");
        }
        if self.rate_limit.window_ms == 0 {
            bail!("rate_limit.window_ms must be at least 1 millisecond");
        }
        if self.cache.ttl_secs == 0 {
            bail!("cache.ttl_secs must be at least 1 second");
        }
        if self.configured_providers().is_empty() {
            bail!(
                "No weather provider credentials configured.\n\
                 Hint: set OPENWEATHER_API_KEY / WEATHERAPI_KEY or run `weather-server configure <provider>`."
            );
        }
        Ok(())
    }

    /// Convenience helper: set/replace a provider API key.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers.insert(provider_id.as_str().to_string(), ProviderConfig { api_key });

        if self.default_provider.is_none() {
            self.default_provider = Some(provider_id.to_string());
        }
    }

    pub fn configured_providers(&self) -> Vec<ProviderId> {
        ProviderId::all().iter().copied().filter(|id| self.is_provider_configured(*id)).collect()
    }

    /// Returns API key for a provider, if present.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.providers
            .get(provider_id.as_str())
            .map(|cfg| cfg.api_key.as_str())
            .filter(|key| !key.is_empty())
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        self.provider_api_key(provider_id).is_some()
    }
}

/// Parse `90`, `500ms`, `45s`, `30m` or `2h`. Bare numbers are seconds.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    let split = value.find(|c: char| !c.is_ascii_digit()).unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);

    let amount: u64 = digits
        .parse()
        .map_err(|_| anyhow!("expected a number optionally followed by ms, s, m or h"))?;

    let scale = match unit {
        "ms" => return Ok(Duration::from_millis(amount)),
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        other => bail!("unsupported duration unit '{other}'"),
    };

    amount
        .checked_mul(scale)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow!("duration '{value}' is out of range"))
}
