//! Request handlers for `/weather` and `/health`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::{HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info};
use weather_core::{
    Coordinate, CoordinateError, ErrorResponse, HealthResponse, WeatherError, WeatherProvider,
    config::MAX_TIMEOUT_SEC,
};

/// Shared by every request; cloning only bumps the provider refcount.
#[derive(Debug, Clone)]
pub struct AppState {
    provider: Arc<dyn WeatherProvider>,
    upstream_timeout: Duration,
}

impl AppState {
    pub fn new(provider: Arc<dyn WeatherProvider>, upstream_timeout: Duration) -> Self {
        Self { provider, upstream_timeout }
    }
}

/// Validation failures of the `/weather` query, in the order they are checked.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("lat and lon query parameters are required")]
    Missing,

    #[error("invalid latitude value: {0}")]
    InvalidLatitude(String),

    #[error("invalid longitude value: {0}")]
    InvalidLongitude(String),

    #[error(transparent)]
    OutOfRange(#[from] CoordinateError),
}

/// `GET /weather?lat=..&lon=..`
pub async fn get_weather(State(state): State<AppState>, request: Request) -> Response {
    let remote_address = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |ConnectInfo(addr)| addr.to_string());
    info!(
        method = %request.method(),
        path = request.uri().path(),
        remote_address = %remote_address,
        "GetWeather"
    );

    if request.method() != Method::GET {
        return error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    }

    let coordinate = match parse_coordinates(request.uri()) {
        Ok(coordinate) => coordinate,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    // Dropping the timeout future on any exit path also drops the upstream call.
    let deadline = deadline_after(state.upstream_timeout);
    let result = tokio::time::timeout_at(deadline, state.provider.get_weather(deadline, coordinate))
        .await
        .unwrap_or(Err(WeatherError::DeadlineExceeded));

    match result {
        Ok(observation) => {
            let response = json_response(StatusCode::OK, &observation);
            info!("Successfully served weather data for coordinates {coordinate}");
            response
        }
        Err(err) => {
            error!(kind = err.kind(), error = %err, "Error fetching weather data");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Unable to fetch weather data")
        }
    }
}

/// Saturates at [`MAX_TIMEOUT_SEC`] when `timeout` is too far out to represent.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(MAX_TIMEOUT_SEC))
}

/// `GET /health`
pub async fn health(method: Method) -> Response {
    if method != Method::GET {
        return (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed").into_response();
    }

    json_response(
        StatusCode::OK,
        &HealthResponse {
            status: "ok".to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        },
    )
}

pub fn parse_coordinates(uri: &Uri) -> Result<Coordinate, QueryError> {
    // An undecodable query string carries no usable parameters.
    let pairs = Query::<Vec<(String, String)>>::try_from_uri(uri)
        .map(|Query(pairs)| pairs)
        .unwrap_or_default();
    let first = |name: &str| {
        pairs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.is_empty())
    };

    let (Some(raw_lat), Some(raw_lon)) = (first("lat"), first("lon")) else {
        return Err(QueryError::Missing);
    };

    let lat: f64 = raw_lat.parse().map_err(|_| QueryError::InvalidLatitude(raw_lat.to_string()))?;
    let lon: f64 = raw_lon.parse().map_err(|_| QueryError::InvalidLongitude(raw_lon.to_string()))?;

    Ok(Coordinate::new(lat, lon)?)
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(mut bytes) => {
            bytes.push(b'\n');
            (
                status,
                [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
                bytes,
            )
                .into_response()
        }
        Err(err) => {
            error!(error = %err, "Error encoding JSON response");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    json_response(status, &ErrorResponse::new(message))
}
