// src/config.rs
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::ndef::MAX_LANGUAGE_CODE_LEN;

pub const DEFAULT_ADDR: &str = "127.0.0.1:3500";
pub const DEFAULT_LANGUAGE_CODE: &str = "en";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub addr: SocketAddr,
    /// Language written into every text record.
    pub language_code: String,
    pub poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let addr_str = lookup("NFC_SERVICE_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr = addr_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                key: "NFC_SERVICE_ADDR",
                reason: format!("{}: {}", addr_str, e),
            })?;

        let language_code =
            lookup("NFC_LANGUAGE_CODE").unwrap_or_else(|| DEFAULT_LANGUAGE_CODE.to_string());
        if language_code.is_empty()
            || language_code.len() > MAX_LANGUAGE_CODE_LEN
            || !language_code.is_ascii()
        {
            return Err(ConfigError::Invalid {
                key: "NFC_LANGUAGE_CODE",
                reason: format!("expected 1 to 63 ASCII bytes, got {:?}", language_code),
            });
        }

        let poll_ms = match lookup("NFC_POLL_INTERVAL_MS") {
            Some(raw) => raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
                key: "NFC_POLL_INTERVAL_MS",
                reason: format!("{}: {}", raw, e),
            })?,
            None => DEFAULT_POLL_INTERVAL_MS,
        };

        Ok(Config {
            addr,
            language_code,
            poll_interval: Duration::from_millis(poll_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.addr, "127.0.0.1:3500".parse::<SocketAddr>().unwrap());
        assert_eq!(config.language_code, "en");
        assert_eq!(config.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn overrides() {
        let config = Config::from_lookup(lookup(&[
            ("NFC_SERVICE_ADDR", "0.0.0.0:9000"),
            ("NFC_LANGUAGE_CODE", "fr"),
            ("NFC_POLL_INTERVAL_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.addr.port(), 9000);
        assert_eq!(config.language_code, "fr");
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn rejects_bad_values() {
        let long = "x".repeat(64);
        assert!(Config::from_lookup(lookup(&[("NFC_LANGUAGE_CODE", long.as_str())])).is_err());
        assert!(Config::from_lookup(lookup(&[("NFC_SERVICE_ADDR", "nowhere")])).is_err());
        assert!(Config::from_lookup(lookup(&[("NFC_POLL_INTERVAL_MS", "soon")])).is_err());
    }
}
