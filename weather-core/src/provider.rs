use crate::{Config, Coordinate, Observation, provider::openweather::OpenWeatherProvider};
use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc};
use thiserror::Error;
use tokio::time::Instant;

pub mod openweather;

/// Failure kinds of a single upstream lookup.
///
/// Display strings lead with the kind so server logs stay greppable; the
/// underlying cause is kept as the error source.
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("request-build: {0}")]
    RequestBuild(#[source] reqwest::Error),

    #[error("transport: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("read: failed to read response body: {0}")]
    Read(#[source] reqwest::Error),

    #[error("upstream-malformed: {message}")]
    Malformed {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("upstream-status {code}: {message}")]
    UpstreamStatus { code: i64, message: String },

    #[error("deadline-exceeded: upstream call did not complete before the deadline")]
    DeadlineExceeded,
}

impl WeatherError {
    pub fn malformed(message: impl Into<String>) -> Self {
        WeatherError::Malformed { message: message.into(), source: None }
    }

    /// Short kind label, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            WeatherError::RequestBuild(_) => "request-build",
            WeatherError::Transport(_) => "transport",
            WeatherError::Read(_) => "read",
            WeatherError::Malformed { .. } => "upstream-malformed",
            WeatherError::UpstreamStatus { .. } => "upstream-status",
            WeatherError::DeadlineExceeded => "deadline-exceeded",
        }
    }
}

/// Capability the HTTP layer needs: one observation for one coordinate,
/// completed (or failed) before `deadline`.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    async fn get_weather(
        &self,
        deadline: Instant,
        coordinate: Coordinate,
    ) -> Result<Observation, WeatherError>;
}

/// Construct the OpenWeatherMap-backed provider shared by all requests.
pub fn provider_from_config(config: &Config) -> anyhow::Result<Arc<dyn WeatherProvider>> {
    let provider = OpenWeatherProvider::new(
        config.api_key.clone(),
        config.base_url.clone(),
        config.client_safety_timeout(),
        config.time_zone,
    )?;

    Ok(Arc::new(provider))
}
