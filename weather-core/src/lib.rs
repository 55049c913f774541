//! Core library for the `weather-server` HTTP service.
//!
//! This crate defines:
//! - Configuration read from the process environment
//! - The observation model and temperature categorization
//! - The `WeatherProvider` capability and its OpenWeatherMap implementation
//!
//! It is used by `weather-server`, but the provider can be reused by any async caller.

pub mod config;
pub mod model;
pub mod provider;

pub use config::Config;
pub use model::{
    Coordinate, CoordinateError, ErrorResponse, HealthResponse, Observation, TemperatureCategory,
};
pub use provider::{WeatherError, WeatherProvider, provider_from_config};
