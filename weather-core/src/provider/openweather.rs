use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::TimeZone;
use chrono_tz::Tz;
use reqwest::{Client, Request, StatusCode, Url, header};
use serde::{Deserialize, Deserializer};
use tokio::time::Instant;
use tracing::debug;

use crate::model::{Coordinate, Observation, TemperatureCategory};

use super::{WeatherError, WeatherProvider};

/// Sent on every upstream call; the provider's logs key on this exact value.
pub const USER_AGENT: &str = "Weather-API-Go/1.0";

const OBSERVATION_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

/// Current-weather client for the OpenWeatherMap `/weather` endpoint.
///
/// Holds no per-call state; clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    endpoint: Url,
    time_zone: Tz,
    http: Client,
}

impl OpenWeatherProvider {
    /// `safety_timeout` bounds the whole exchange even if the per-call
    /// deadline is somehow not observed.
    pub fn new(
        api_key: String,
        base_url: String,
        safety_timeout: Duration,
        time_zone: Tz,
    ) -> Result<Self> {
        let endpoint = Url::parse(&format!("{}/weather", base_url.trim_end_matches('/')))
            .with_context(|| format!("Invalid OpenWeatherMap base URL: {base_url}"))?;

        let http = Client::builder()
            .timeout(safety_timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client for OpenWeatherMap")?;

        Ok(Self { api_key, endpoint, time_zone, http })
    }

    fn build_request(
        &self,
        coordinate: Coordinate,
        remaining: Duration,
    ) -> Result<Request, WeatherError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("lat", &coordinate.lat().to_string())
            .append_pair("lon", &coordinate.lon().to_string())
            .append_pair("appid", &self.api_key);

        self.http
            .get(url)
            .header(header::ACCEPT, "application/json")
            .timeout(remaining)
            .build()
            .map_err(WeatherError::RequestBuild)
    }

    async fn fetch_current(
        &self,
        deadline: Instant,
        coordinate: Coordinate,
    ) -> Result<Observation, WeatherError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(WeatherError::DeadlineExceeded);
        }

        let request = self.build_request(coordinate, remaining)?;
        debug!(
            %coordinate,
            endpoint = %self.endpoint,
            "Requesting current weather from OpenWeatherMap"
        );

        let res = self.http.execute(request).await.map_err(|err| {
            if err.is_timeout() {
                WeatherError::DeadlineExceeded
            } else {
                WeatherError::Transport(err)
            }
        })?;

        let status = res.status();
        let body = res.bytes().await.map_err(|err| {
            if err.is_timeout() {
                WeatherError::DeadlineExceeded
            } else {
                WeatherError::Read(err)
            }
        })?;

        parse_current(status, &body, self.time_zone)
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    async fn get_weather(
        &self,
        deadline: Instant,
        coordinate: Coordinate,
    ) -> Result<Observation, WeatherError> {
        tokio::time::timeout_at(deadline, self.fetch_current(deadline, coordinate))
            .await
            .unwrap_or(Err(WeatherError::DeadlineExceeded))
    }
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    #[serde(default)]
    main: String,
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwSys {
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    #[serde(default)]
    weather: Vec<OwWeather>,
    main: Option<OwMain>,
    dt: Option<i64>,
    sys: Option<OwSys>,
    name: Option<String>,
    /// Status echoed in the body; authoritative over the HTTP status.
    #[serde(default, deserialize_with = "deserialize_cod")]
    cod: i64,
    message: Option<String>,
}

/// The provider sends `cod` as a number on success and sometimes as a numeric
/// string on errors.
fn deserialize_cod<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Cod {
        Number(i64),
        Text(String),
        Null(()),
    }

    Ok(match Cod::deserialize(deserializer)? {
        Cod::Number(code) => code,
        Cod::Text(text) => text.trim().parse().unwrap_or(0),
        Cod::Null(()) => 0,
    })
}

fn parse_current(
    status: StatusCode,
    body: &[u8],
    time_zone: Tz,
) -> Result<Observation, WeatherError> {
    let parsed: OwCurrentResponse =
        serde_json::from_slice(body).map_err(|err| WeatherError::Malformed {
            message: format!("failed to parse JSON response (HTTP {status})"),
            source: Some(err),
        })?;

    if parsed.cod != 200 {
        return Err(WeatherError::UpstreamStatus {
            code: parsed.cod,
            message: parsed.message.unwrap_or_default(),
        });
    }

    debug!(%status, city = ?parsed.name, "Decoded OpenWeatherMap response");

    let condition = parsed
        .weather
        .into_iter()
        .next()
        .map(|w| w.main)
        .ok_or_else(|| WeatherError::malformed("weather array empty"))?;

    let kelvin = parsed
        .main
        .and_then(|m| m.temp)
        .ok_or_else(|| WeatherError::malformed("missing main.temp"))?;

    let dt = parsed.dt.ok_or_else(|| WeatherError::malformed("missing dt"))?;

    Ok(Observation {
        observation_time: format_observation_time(dt, time_zone)?,
        country: parsed.sys.and_then(|s| s.country).unwrap_or_default(),
        city: parsed.name.unwrap_or_default(),
        condition,
        temperature_category: TemperatureCategory::from_kelvin(kelvin),
    })
}

fn format_observation_time(unix_seconds: i64, time_zone: Tz) -> Result<String, WeatherError> {
    time_zone
        .timestamp_opt(unix_seconds, 0)
        .single()
        .map(|at| at.format(OBSERVATION_TIME_FORMAT).to_string())
        .ok_or_else(|| WeatherError::malformed(format!("dt out of range: {unix_seconds}")))
}
