use std::time::Duration;

use feed_block::RetryPolicy;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Aws,
    Memory,
}

#[derive(Debug, Clone)]
pub struct CognitoConfig {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryAccount {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: Backend,
    pub table_name: String,
    pub bucket_name: String,
    pub media_base_url: Option<String>,
    pub cognito: Option<CognitoConfig>,
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
    pub snapshot_timeout: Duration,
    pub cors_allow_origin: String,
    pub memory_accounts: Vec<MemoryAccount>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match get("FEED_BACKEND").as_deref() {
            None | Some("aws") => Backend::Aws,
            Some("memory") => Backend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "FEED_BACKEND",
                    value: other.to_string(),
                    reason: "expected aws or memory".to_string(),
                })
            }
        };

        let cognito = match backend {
            Backend::Aws => Some(CognitoConfig {
                client_id: get("COGNITO_CLIENT_ID").ok_or(ConfigError::Missing("COGNITO_CLIENT_ID"))?,
                client_secret: get("COGNITO_CLIENT_SECRET")
                    .ok_or(ConfigError::Missing("COGNITO_CLIENT_SECRET"))?,
            }),
            Backend::Memory => None,
        };

        let memory_accounts = match get("MEMORY_ACCOUNTS") {
            Some(raw) => parse_accounts(&raw)?,
            None => Vec::new(),
        };

        let retry = RetryPolicy {
            initial: millis(&get, "FEED_RETRY_INITIAL_MS", 500)?,
            max: millis(&get, "FEED_RETRY_MAX_MS", 30_000)?,
        };
        if retry.initial > retry.max {
            return Err(ConfigError::Invalid {
                key: "FEED_RETRY_INITIAL_MS",
                value: retry.initial.as_millis().to_string(),
                reason: format!("exceeds FEED_RETRY_MAX_MS ({})", retry.max.as_millis()),
            });
        }

        Ok(Self {
            backend,
            table_name: get("TABLE_NAME").unwrap_or_else(|| "feedline".to_string()),
            bucket_name: get("S3_BUCKET_NAME").unwrap_or_else(|| "feedline-media".to_string()),
            media_base_url: get("MEDIA_BASE_URL"),
            cognito,
            poll_interval: millis(&get, "FEED_POLL_INTERVAL_MS", 2000)?,
            retry,
            snapshot_timeout: millis(&get, "FEED_SNAPSHOT_TIMEOUT_MS", 5000)?,
            cors_allow_origin: get("CORS_ALLOW_ORIGIN").unwrap_or_else(|| "*".to_string()),
            memory_accounts,
        })
    }
}

// Intervals are at least 1ms.
fn millis(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let Some(raw) = get(key) else {
        return Ok(Duration::from_millis(default));
    };
    let invalid = |reason: String| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason,
    };

    match raw.trim().parse::<u64>() {
        Ok(0) => Err(invalid("must be greater than zero".to_string())),
        Ok(ms) => Ok(Duration::from_millis(ms)),
        Err(e) => Err(invalid(e.to_string())),
    }
}

// "alice:pw1,bob:pw2"
fn parse_accounts(raw: &str) -> Result<Vec<MemoryAccount>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((username, password)) if !username.is_empty() => Ok(MemoryAccount {
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => Err(ConfigError::Invalid {
                key: "MEMORY_ACCOUNTS",
                value: entry.to_string(),
                reason: "expected user:password".to_string(),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn aws_backend_requires_cognito_client() {
        let err = config(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("COGNITO_CLIENT_ID")));

        let err = config(&[("COGNITO_CLIENT_ID", "id")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("COGNITO_CLIENT_SECRET")));
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[("COGNITO_CLIENT_ID", "id"), ("COGNITO_CLIENT_SECRET", "secret")]).unwrap();
        assert_eq!(cfg.backend, Backend::Aws);
        assert_eq!(cfg.table_name, "feedline");
        assert_eq!(cfg.bucket_name, "feedline-media");
        assert_eq!(cfg.media_base_url, None);
        assert_eq!(cfg.poll_interval, Duration::from_millis(2000));
        assert_eq!(cfg.retry, RetryPolicy::default());
        assert_eq!(cfg.snapshot_timeout, Duration::from_secs(5));
        assert_eq!(cfg.cors_allow_origin, "*");
    }

    #[test]
    fn memory_backend_with_accounts() {
        let cfg = config(&[
            ("FEED_BACKEND", "memory"),
            ("MEMORY_ACCOUNTS", "alice:pw1, bob:pw2,"),
            ("FEED_RETRY_INITIAL_MS", "10"),
        ])
        .unwrap();
        assert_eq!(cfg.backend, Backend::Memory);
        assert!(cfg.cognito.is_none());
        assert_eq!(cfg.memory_accounts.len(), 2);
        assert_eq!(cfg.memory_accounts[1].username, "bob");
        assert_eq!(cfg.retry.initial, Duration::from_millis(10));
    }

    #[test]
    fn bad_values_are_rejected() {
        let err = config(&[("FEED_BACKEND", "firebase")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "FEED_BACKEND", .. }));

        let err = config(&[("FEED_BACKEND", "memory"), ("FEED_POLL_INTERVAL_MS", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "FEED_POLL_INTERVAL_MS", .. }));

        let err = config(&[("FEED_BACKEND", "memory"), ("MEMORY_ACCOUNTS", "nopassword")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MEMORY_ACCOUNTS", .. }));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        for key in [
            "FEED_POLL_INTERVAL_MS",
            "FEED_RETRY_INITIAL_MS",
            "FEED_RETRY_MAX_MS",
            "FEED_SNAPSHOT_TIMEOUT_MS",
        ] {
            let err = config(&[("FEED_BACKEND", "memory"), (key, "0")]).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { key: k, .. } if k == key),
                "{} accepted 0",
                key
            );
        }
    }

    #[test]
    fn retry_initial_may_not_exceed_max() {
        let err = config(&[
            ("FEED_BACKEND", "memory"),
            ("FEED_RETRY_INITIAL_MS", "60000"),
            ("FEED_RETRY_MAX_MS", "10"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "FEED_RETRY_INITIAL_MS", .. }));

        let cfg = config(&[
            ("FEED_BACKEND", "memory"),
            ("FEED_RETRY_INITIAL_MS", "10"),
            ("FEED_RETRY_MAX_MS", "10"),
        ])
        .unwrap();
        assert_eq!(cfg.retry.delay(3), Duration::from_millis(10));
    }
}
