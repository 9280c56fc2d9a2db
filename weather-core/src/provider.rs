use crate::{
    Config, WeatherRecord,
    provider::{openweather::OpenWeatherProvider, weatherapi::WeatherApiProvider},
};
use anyhow::Context;
use async_trait::async_trait;
use std::{convert::TryFrom, fmt::Debug, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

pub mod openweather;
pub mod weatherapi;

/// Per-request budget for a single upstream HTTP call.
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client shared by the adapters, bounded by [`HTTP_TIMEOUT`].
pub(crate) fn http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenWeather,
    WeatherApi,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "openweather",
            ProviderId::WeatherApi => "weatherapi",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenWeather, ProviderId::WeatherApi]
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openweather" => Ok(ProviderId::OpenWeather),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: openweather, weatherapi."
            )),
        }
    }
}

/// One upstream weather source behind a uniform fetch.
///
/// Implementations make a single attempt per call, stamp `source` with
/// [`WeatherProvider::name`] and must give up once `cancel` fires.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    fn name(&self) -> &str;

    async fn get_weather(
        &self,
        city: &str,
        cancel: &CancellationToken,
    ) -> anyhow::Result<WeatherRecord>;
}

/// Construct a provider from config and explicit ProviderId.
pub fn provider_from_config(
    id: ProviderId,
    config: &Config,
) -> anyhow::Result<Arc<dyn WeatherProvider>> {
    let api_key = config.provider_api_key(id).ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured for provider '{id}'.\n\
                 Hint: run `weather-server configure {id}` or set its API key environment variable."
        )
    })?;

    let provider: Arc<dyn WeatherProvider> = match id {
        ProviderId::OpenWeather => Arc::new(OpenWeatherProvider::new(api_key.to_owned())?),
        ProviderId::WeatherApi => Arc::new(WeatherApiProvider::new(api_key.to_owned())?),
    };

    Ok(provider)
}

/// Every provider that has credentials. The default provider comes first,
/// then WeatherAPI, then OpenWeather.
pub fn providers_from_config(config: &Config) -> anyhow::Result<Vec<Arc<dyn WeatherProvider>>> {
    let mut order = vec![ProviderId::WeatherApi, ProviderId::OpenWeather];
    if let Some(default) = config.default_provider_id()? {
        order.retain(|id| *id != default);
        order.insert(0, default);
    }

    let providers = order
        .into_iter()
        .filter(|id| config.is_provider_configured(*id))
        .map(|id| provider_from_config(id, config))
        .collect::<anyhow::Result<Vec<_>>>()?;

    if providers.is_empty() {
        anyhow::bail!(
            "No weather provider credentials configured.\n\
             Hint: set OPENWEATHER_API_KEY / WEATHERAPI_KEY or run `weather-server configure <provider>`."
        );
    }

    Ok(providers)
}

/// Run `fetch` unless `cancel` fires first.
pub(crate) async fn with_cancel<T>(
    provider: &str,
    cancel: &CancellationToken,
    fetch: impl std::future::Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(anyhow::anyhow!("{provider} request cancelled")),
        res = fetch => res,
    }
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
