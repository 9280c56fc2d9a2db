use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use inquire::{Confirm, Password, PasswordDisplayMode};
use tracing_subscriber::EnvFilter;
use weather_core::{CacheBackend, Config, ProviderId};

use crate::server;

const DEFAULT_LOG_FILTER: &str = "weather_server=info,weather_core=info,tower_http=info";

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather-server", version, about = "Multi-provider weather aggregation service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP service.
    Serve {
        /// Port to listen on; overrides config and PORT.
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind to.
        #[arg(long)]
        bind: Option<String>,

        /// Keep the cache in process memory instead of Redis.
        #[arg(long)]
        memory_cache: bool,
    },

    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name, e.g. "openweather" or "weatherapi".
        provider: String,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure { provider } => configure(&provider),
            Command::Serve { port, bind, memory_cache } => {
                let mut config = load_config()?;

                if let Some(port) = port {
                    config.server.port = port;
                }
                if let Some(bind) = bind {
                    config.server.bind_addr = bind;
                }
                if memory_cache {
                    config.cache.backend = CacheBackend::Memory;
                }

                init_tracing(config.server.log_level.as_deref());
                config.validate()?;

                server::serve(config).await
            }
        }
    }
}

/// Config file, then `.env`, then the process environment.
fn load_config() -> anyhow::Result<Config> {
    allow_missing_dotenv(dotenvy::dotenv())?;

    let mut config = Config::load()?;
    config
        .apply_env(|key| std::env::var(key).ok())
        .context("Failed to apply environment overrides")?;

    Ok(config)
}

/// A missing `.env` is fine; an unreadable or malformed one is not.
fn allow_missing_dotenv<T>(result: dotenvy::Result<T>) -> anyhow::Result<()> {
    match result {
        Err(err) if !err.not_found() => Err(err).context("Failed to load .env"),
        _ => Ok(()),
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or(DEFAULT_LOG_FILTER)));

    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn configure(provider: &str) -> anyhow::Result<()> {
    let id = ProviderId::try_from(provider)?;
    let mut config = Config::load()?;

    if config.is_provider_configured(id) {
        println!("Provider '{id}' already has an API key; entering a new one replaces it.");
    }

    let api_key = Password::new(&format!("API key for {id}:"))
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Masked)
        .prompt()
        .context("Failed to read API key")?;

    let api_key = api_key.trim();
    if api_key.is_empty() {
        bail!("API key for '{id}' must not be empty");
    }

    config.upsert_provider_api_key(id, api_key.to_string());

    if config.default_provider_id()? != Some(id) {
        let make_default = Confirm::new(&format!("Make {id} the default provider?"))
            .with_default(false)
            .with_help_message("The default provider is started first; the fastest answer still wins")
            .prompt()
            .context("Failed to read answer")?;

        if make_default {
            config.set_default_provider(id);
        }
    }

    let path = config.save()?;

    let configured: Vec<_> = config.configured_providers().iter().map(ProviderId::as_str).collect();
    println!("Saved credentials to {}", path.display());
    println!("Configured providers: {}", configured.join(", "));
    if let Some(default) = &config.default_provider {
        println!("Default provider: {default}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_serve_flags() {
        let cli = Cli::try_parse_from(["weather-server", "serve", "--port", "9000", "--memory-cache"])
            .unwrap();

        match cli.command {
            Command::Serve { port, bind, memory_cache } => {
                assert_eq!(port, Some(9000));
                assert_eq!(bind, None);
                assert!(memory_cache);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn missing_dotenv_is_ignored() {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "no .env");
        allow_missing_dotenv::<()>(Err(dotenvy::Error::Io(missing))).unwrap();
        allow_missing_dotenv(Ok(())).unwrap();
    }

    #[test]
    fn malformed_dotenv_is_reported() {
        let err = allow_missing_dotenv::<()>(Err(dotenvy::Error::LineParse("PORT 80".into(), 4)))
            .unwrap_err();
        assert!(err.to_string().contains("Failed to load .env"));
    }

    #[test]
    fn parses_configure_provider() {
        let cli = Cli::try_parse_from(["weather-server", "configure", "openweather"]).unwrap();
        assert!(matches!(cli.command, Command::Configure { ref provider } if provider == "openweather"));
    }
}
