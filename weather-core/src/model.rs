use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fahrenheit at or above which a reading stops being "cold".
pub const COLD_BELOW_F: f64 = 50.0;
/// Fahrenheit at or above which a reading is "hot".
pub const HOT_FROM_F: f64 = 68.0;

/// A validated latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinateError {
    #[error("latitude must be between -90 and 90, got: {0:.4}")]
    LatitudeOutOfRange(f64),

    #[error("longitude must be between -180 and 180, got: {0:.4}")]
    LongitudeOutOfRange(f64),
}

impl Coordinate {
    /// Checks the geographic bounds. NaN fails both range checks.
    pub fn new(lat: f64, lon: f64) -> Result<Self, CoordinateError> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(CoordinateError::LongitudeOutOfRange(lon));
        }
        Ok(Self { lat, lon })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4})", self.lat, self.lon)
    }
}

/// Coarse temperature bucket exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureCategory {
    Cold,
    Moderate,
    Hot,
}

impl TemperatureCategory {
    pub fn from_fahrenheit(fahrenheit: f64) -> Self {
        if fahrenheit < COLD_BELOW_F {
            TemperatureCategory::Cold
        } else if fahrenheit < HOT_FROM_F {
            TemperatureCategory::Moderate
        } else {
            TemperatureCategory::Hot
        }
    }

    pub fn from_kelvin(kelvin: f64) -> Self {
        Self::from_fahrenheit(kelvin_to_fahrenheit(kelvin))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TemperatureCategory::Cold => "cold",
            TemperatureCategory::Moderate => "moderate",
            TemperatureCategory::Hot => "hot",
        }
    }
}

impl fmt::Display for TemperatureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn kelvin_to_fahrenheit(kelvin: f64) -> f64 {
    (kelvin - 273.15) * 9.0 / 5.0 + 32.0
}

/// Normalized weather summary returned by `GET /weather`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Observation {
    /// `YYYY-MM-DD HH:MM:SS ZZZ` in the server's time zone.
    pub observation_time: String,
    /// ISO-3166 alpha-2 code, empty when the provider omits it.
    pub country: String,
    pub city: String,
    pub condition: String,
    pub temperature_category: TemperatureCategory,
}

/// Body of every JSON error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { error: message.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// RFC-3339, UTC.
    pub timestamp: String,
}
