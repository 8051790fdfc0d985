use crate::coordinator::RetryPolicy;
use crate::error::ConfigError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub ledger_api_url: String,
    pub ledger_api_token: Option<String>,
    pub ledger_timeout: Duration,
    pub sync_interval: Duration,
    pub retry: RetryPolicy,
}

impl Config {
    /// Reads configuration from the process environment (after `.env`, if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let seconds = |name: &'static str, default: u64| -> Result<Duration, ConfigError> {
            let value = match lookup(name) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| ConfigError::InvalidNumber { name, value: raw })?,
                None => default,
            };
            if value == 0 {
                return Err(ConfigError::Zero { name });
            }
            Ok(Duration::from_secs(value))
        };

        let max_attempts = match lookup("RETRY_MAX_ATTEMPTS") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidNumber { name: "RETRY_MAX_ATTEMPTS", value: raw })?,
            None => RetryPolicy::default().max_attempts,
        };
        if max_attempts == 0 {
            return Err(ConfigError::Zero { name: "RETRY_MAX_ATTEMPTS" });
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| "sqlite:ballot_relay.db".to_string()),
            ledger_api_url: lookup("LEDGER_API_URL").unwrap_or_else(|| "http://localhost:8000/api".to_string()),
            ledger_api_token: lookup("LEDGER_API_TOKEN").filter(|t| !t.trim().is_empty()),
            ledger_timeout: seconds("LEDGER_TIMEOUT_SECS", 30)?,
            sync_interval: seconds("SYNC_INTERVAL_SECS", 60)?,
            retry: RetryPolicy {
                max_attempts,
                base_delay: seconds("RETRY_BASE_DELAY_SECS", 5)?,
                max_delay: seconds("RETRY_MAX_DELAY_SECS", 900)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.database_url, "sqlite:ballot_relay.db");
        assert_eq!(config.ledger_timeout, Duration::from_secs(30));
        assert_eq!(config.sync_interval, Duration::from_secs(60));
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.ledger_api_token, None);
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("LEDGER_API_URL", "https://votes.example.org/api"),
            ("LEDGER_API_TOKEN", "abc"),
            ("RETRY_MAX_ATTEMPTS", "3"),
            ("SYNC_INTERVAL_SECS", "15"),
        ])
        .unwrap();
        assert_eq!(config.ledger_api_url, "https://votes.example.org/api");
        assert_eq!(config.ledger_api_token.as_deref(), Some("abc"));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.sync_interval, Duration::from_secs(15));
    }

    #[test]
    fn bad_numbers_are_errors() {
        assert!(matches!(
            config(&[("LEDGER_TIMEOUT_SECS", "soon")]),
            Err(ConfigError::InvalidNumber { name: "LEDGER_TIMEOUT_SECS", .. })
        ));
        assert!(matches!(
            config(&[("RETRY_MAX_ATTEMPTS", "0")]),
            Err(ConfigError::Zero { name: "RETRY_MAX_ATTEMPTS" })
        ));
    }
}
