use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::tz::is_valid_iana_time_zone;

/// Startup settings, read once from `SLOTKEEP_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    /// Display-only zone for booking views when nothing better resolves.
    pub fallback_time_zone: String,
    pub reaper_interval: Duration,
}

#[derive(Debug, PartialEq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    TlsPair,
    TimeZone(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "{var}: cannot parse {value:?}"),
            ConfigError::TlsPair => {
                write!(f, "both SLOTKEEP_TLS_CERT and SLOTKEEP_TLS_KEY must be set, or neither")
            }
            ConfigError::TimeZone(tz) => write!(f, "SLOTKEEP_FALLBACK_TIME_ZONE: not a valid IANA zone: {tz}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset and blank values take the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let tls_cert = get("SLOTKEEP_TLS_CERT");
        let tls_key = get("SLOTKEEP_TLS_KEY");
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError::TlsPair);
        }

        let fallback_time_zone = get("SLOTKEEP_FALLBACK_TIME_ZONE").unwrap_or_else(|| "America/New_York".into());
        if !is_valid_iana_time_zone(&fallback_time_zone) {
            return Err(ConfigError::TimeZone(fallback_time_zone));
        }

        let reaper_secs: u64 = parse_var(&get, "SLOTKEEP_REAPER_INTERVAL_SECS")?.unwrap_or(30);

        Ok(Self {
            bind: get("SLOTKEEP_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_var(&get, "SLOTKEEP_PORT")?.unwrap_or(5433),
            data_dir: PathBuf::from(get("SLOTKEEP_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: get("SLOTKEEP_PASSWORD").unwrap_or_else(|| "slotkeep".into()),
            max_connections: parse_var(&get, "SLOTKEEP_MAX_CONNECTIONS")?.unwrap_or(256),
            compact_threshold: parse_var(&get, "SLOTKEEP_COMPACT_THRESHOLD")?.unwrap_or(1000),
            metrics_port: parse_var(&get, "SLOTKEEP_METRICS_PORT")?,
            tls_cert,
            tls_key,
            fallback_time_zone,
            reaper_interval: Duration::from_secs(reaper_secs.max(1)),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_var<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match get(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.addr(), "0.0.0.0:5433");
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.fallback_time_zone, "America/New_York");
        assert_eq!(config.reaper_interval, Duration::from_secs(30));
    }

    #[test]
    fn overrides() {
        let config = Config::from_lookup(lookup(&[
            ("SLOTKEEP_PORT", "6000"),
            ("SLOTKEEP_METRICS_PORT", "9100"),
            ("SLOTKEEP_FALLBACK_TIME_ZONE", "Europe/Berlin"),
            ("SLOTKEEP_REAPER_INTERVAL_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.fallback_time_zone, "Europe/Berlin");
        assert_eq!(config.reaper_interval, Duration::from_secs(5));
    }

    #[test]
    fn malformed_number_is_an_error() {
        let err = Config::from_lookup(lookup(&[("SLOTKEEP_MAX_CONNECTIONS", "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "SLOTKEEP_MAX_CONNECTIONS",
                value: "lots".into()
            }
        );
    }

    #[test]
    fn tls_needs_both_files() {
        let err = Config::from_lookup(lookup(&[("SLOTKEEP_TLS_CERT", "cert.pem")])).unwrap_err();
        assert_eq!(err, ConfigError::TlsPair);
    }

    #[test]
    fn fallback_zone_is_validated() {
        let err = Config::from_lookup(lookup(&[("SLOTKEEP_FALLBACK_TIME_ZONE", "Mars/Olympus")])).unwrap_err();
        assert!(matches!(err, ConfigError::TimeZone(_)));
    }
}
