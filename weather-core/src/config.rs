use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono_tz::Tz;
use serde::{Serialize, Serializer};

pub const API_KEY_VAR: &str = "OPENWEATHER_API_KEY";
pub const BASE_URL_VAR: &str = "OPENWEATHER_BASE_URL";
pub const PORT_VAR: &str = "APP_SERVER_PORT";
pub const READ_TIMEOUT_VAR: &str = "APP_SERVER_READ_TIMEOUT_SEC";
pub const WRITE_TIMEOUT_VAR: &str = "APP_SERVER_WRITE_TIMEOUT_SEC";
pub const IDLE_TIMEOUT_VAR: &str = "APP_SERVER_IDLE_TIMEOUT_SEC";
pub const CLIENT_TIMEOUT_VAR: &str = "APP_SERVER_CLIENT_TIMEOUT_SEC";
pub const SHUTDOWN_TIMEOUT_VAR: &str = "APP_SERVER_SHUTDOWN_TIMEOUT_SEC";
pub const TIME_ZONE_VAR: &str = "TZ";

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";
pub const DEFAULT_PORT: &str = "8080";

/// Largest accepted timeout, one day. Larger values fall back to the default.
pub const MAX_TIMEOUT_SEC: u64 = 24 * 60 * 60;

/// Server configuration, read once from the process environment at start-up.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub port: String,
    pub api_key: String,
    pub base_url: String,
    pub read_timeout_sec: u64,
    pub write_timeout_sec: u64,
    pub idle_timeout_sec: u64,
    /// Per-request deadline for the upstream call.
    pub client_timeout_sec: u64,
    pub shutdown_timeout_sec: u64,
    /// Zone used to render `ObservationTime`.
    #[serde(serialize_with = "serialize_tz")]
    pub time_zone: Tz,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    ///
    /// Only the API key is required. Empty values count as unset, and numeric
    /// values that do not parse as a positive number of seconds up to
    /// [`MAX_TIMEOUT_SEC`] fall back to their defaults. An empty `TZ` means UTC.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.is_empty());

        let api_key = get(API_KEY_VAR)
            .ok_or_else(|| anyhow!("{API_KEY_VAR} environment variable is required"))?;

        let secs = |name: &str, default: u64| {
            get(name)
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .filter(|secs| (1..=MAX_TIMEOUT_SEC).contains(secs))
                .unwrap_or(default)
        };

        Ok(Self {
            port: get(PORT_VAR).unwrap_or_else(|| DEFAULT_PORT.to_string()),
            api_key,
            base_url: get(BASE_URL_VAR).unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            read_timeout_sec: secs(READ_TIMEOUT_VAR, 15),
            write_timeout_sec: secs(WRITE_TIMEOUT_VAR, 15),
            idle_timeout_sec: secs(IDLE_TIMEOUT_VAR, 120),
            client_timeout_sec: secs(CLIENT_TIMEOUT_VAR, 10),
            shutdown_timeout_sec: secs(SHUTDOWN_TIMEOUT_VAR, 30),
            time_zone: match lookup(TIME_ZONE_VAR) {
                Some(name) if name.is_empty() => Tz::UTC,
                name => resolve_time_zone(name.as_deref()),
            },
        })
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_sec)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_sec)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_sec)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_sec)
    }

    /// Safety-net timeout for the whole HTTP exchange with the provider.
    pub fn client_safety_timeout(&self) -> Duration {
        self.client_timeout().saturating_mul(3)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_sec)
    }

    /// Renders the configuration as TOML with the API key masked.
    pub fn to_redacted_toml(&self) -> Result<String> {
        let mut redacted = self.clone();
        redacted.api_key = redact(&self.api_key);
        toml::to_string_pretty(&redacted).context("Failed to serialize configuration to TOML")
    }
}

fn redact(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        "********".to_string()
    } else {
        format!("{visible}********")
    }
}

/// `TZ` wins (with or without the POSIX leading `:`), then the host zone, then UTC.
fn resolve_time_zone(tz_var: Option<&str>) -> Tz {
    tz_var
        .and_then(|name| name.trim_start_matches(':').parse::<Tz>().ok())
        .or_else(|| {
            iana_time_zone::get_timezone()
                .ok()
                .and_then(|name| name.parse::<Tz>().ok())
        })
        .unwrap_or(Tz::UTC)
}

fn serialize_tz<S: Serializer>(tz: &Tz, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(tz.name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let err = config_from(&[]).unwrap_err();
        assert!(err.to_string().contains("OPENWEATHER_API_KEY environment variable is required"));
    }

    #[test]
    fn empty_api_key_counts_as_missing() {
        assert!(config_from(&[(API_KEY_VAR, "")]).is_err());
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let cfg = config_from(&[(API_KEY_VAR, "KEY"), (TIME_ZONE_VAR, "UTC")]).unwrap();

        assert_eq!(cfg.api_key, "KEY");
        assert_eq!(cfg.port, "8080");
        assert_eq!(cfg.base_url, "https://api.openweathermap.org/data/2.5");
        assert_eq!(cfg.read_timeout(), Duration::from_secs(15));
        assert_eq!(cfg.write_timeout(), Duration::from_secs(15));
        assert_eq!(cfg.idle_timeout(), Duration::from_secs(120));
        assert_eq!(cfg.client_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.client_safety_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.time_zone, Tz::UTC);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let cfg = config_from(&[
            (API_KEY_VAR, "KEY"),
            (PORT_VAR, "9090"),
            (BASE_URL_VAR, "http://localhost:1234/data"),
            (CLIENT_TIMEOUT_VAR, "3"),
            (SHUTDOWN_TIMEOUT_VAR, "5"),
        ])
        .unwrap();

        assert_eq!(cfg.port, "9090");
        assert_eq!(cfg.base_url, "http://localhost:1234/data");
        assert_eq!(cfg.client_timeout(), Duration::from_secs(3));
        assert_eq!(cfg.client_safety_timeout(), Duration::from_secs(9));
        assert_eq!(cfg.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let cfg = config_from(&[
            (API_KEY_VAR, "KEY"),
            (READ_TIMEOUT_VAR, "fast"),
            (WRITE_TIMEOUT_VAR, "-4"),
            (IDLE_TIMEOUT_VAR, "0"),
            (CLIENT_TIMEOUT_VAR, "2.5"),
        ])
        .unwrap();

        assert_eq!(cfg.read_timeout_sec, 15);
        assert_eq!(cfg.write_timeout_sec, 15);
        assert_eq!(cfg.idle_timeout_sec, 120);
        assert_eq!(cfg.client_timeout_sec, 10);
    }

    #[test]
    fn oversized_timeouts_fall_back_to_defaults() {
        let cfg = config_from(&[
            (API_KEY_VAR, "KEY"),
            (CLIENT_TIMEOUT_VAR, "18446744073709551615"),
            (SHUTDOWN_TIMEOUT_VAR, "86401"),
            (IDLE_TIMEOUT_VAR, "86400"),
        ])
        .unwrap();

        assert_eq!(cfg.client_timeout_sec, 10);
        assert_eq!(cfg.client_safety_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.shutdown_timeout_sec, 30);
        assert_eq!(cfg.idle_timeout(), Duration::from_secs(86_400));
        assert!(cfg.to_redacted_toml().is_ok());
    }

    #[test]
    fn safety_timeout_saturates() {
        let cfg = Config {
            client_timeout_sec: u64::MAX,
            ..config_from(&[(API_KEY_VAR, "KEY")]).unwrap()
        };
        assert_eq!(cfg.client_safety_timeout(), Duration::MAX);
    }

    #[test]
    fn time_zone_from_tz_variable() {
        let cfg =
            config_from(&[(API_KEY_VAR, "KEY"), (TIME_ZONE_VAR, ":America/New_York")]).unwrap();
        assert_eq!(cfg.time_zone, chrono_tz::America::New_York);
    }

    #[test]
    fn empty_tz_means_utc() {
        let cfg = config_from(&[(API_KEY_VAR, "KEY"), (TIME_ZONE_VAR, "")]).unwrap();
        assert_eq!(cfg.time_zone, Tz::UTC);
    }

    #[test]
    fn redacted_toml_hides_api_key() {
        let cfg =
            config_from(&[(API_KEY_VAR, "abcd1234efgh5678"), (TIME_ZONE_VAR, "UTC")]).unwrap();
        let rendered = cfg.to_redacted_toml().unwrap();

        assert!(!rendered.contains("abcd1234efgh5678"));
        assert!(rendered.contains("api_key = \"abcd********\""));
        assert!(rendered.contains("port = \"8080\""));
        assert!(rendered.contains("time_zone = \"UTC\""));
    }

    #[test]
    fn short_keys_are_fully_masked() {
        assert_eq!(redact("KEY"), "********");
    }
}
