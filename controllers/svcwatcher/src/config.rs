//! Controller configuration loaded from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `WATCH_NAMESPACE` | all namespaces |
//! | `SVCWATCHER_MAX_UPDATE_RETRY` | 400 |
//! | `SVCWATCHER_RETRY_INTERVAL_MS` | 25 |

use crate::error::ControllerError;
use crate::retry::{MAX_UPDATE_RETRY, RETRY_INTERVAL, RetryPolicy};
use std::env;
use std::time::Duration;

/// Runtime configuration of the service watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch; `None` watches the whole cluster
    pub namespace: Option<String>,
    /// Conflict retry discipline applied to every write
    pub retry: RetryPolicy,
}

impl ControllerConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of a
    /// variable or `None` when it is unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let namespace = lookup("WATCH_NAMESPACE")
            .map(|ns| ns.trim().to_string())
            .filter(|ns| !ns.is_empty());

        let max_attempts = match lookup("SVCWATCHER_MAX_UPDATE_RETRY") {
            Some(raw) => parse_number(&raw, "SVCWATCHER_MAX_UPDATE_RETRY")?,
            None => u64::from(MAX_UPDATE_RETRY),
        };
        let max_attempts = u32::try_from(max_attempts)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ControllerError::InvalidConfig(
                "SVCWATCHER_MAX_UPDATE_RETRY must be between 1 and 4294967295".to_string()
            ))?;

        let interval = match lookup("SVCWATCHER_RETRY_INTERVAL_MS") {
            Some(raw) => Duration::from_millis(parse_number(&raw, "SVCWATCHER_RETRY_INTERVAL_MS")?),
            None => RETRY_INTERVAL,
        };

        Ok(Self {
            namespace,
            retry: RetryPolicy::new(max_attempts, interval),
        })
    }
}

fn parse_number(raw: &str, key: &str) -> Result<u64, ControllerError> {
    raw.trim().parse::<u64>().map_err(|e| {
        ControllerError::InvalidConfig(format!("{} must be a non-negative integer, got {:?}: {}", key, raw, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.namespace, None);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_overrides() {
        let config = ControllerConfig::from_lookup(lookup_from(&[
            ("WATCH_NAMESPACE", "telco"),
            ("SVCWATCHER_MAX_UPDATE_RETRY", "10"),
            ("SVCWATCHER_RETRY_INTERVAL_MS", "100"),
        ]))
        .unwrap();
        assert_eq!(config.namespace.as_deref(), Some("telco"));
        assert_eq!(config.retry.max_attempts(), 10);
        assert_eq!(config.retry.interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_blank_namespace_means_all() {
        let config = ControllerConfig::from_lookup(lookup_from(&[("WATCH_NAMESPACE", "  ")])).unwrap();
        assert_eq!(config.namespace, None);
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let err = ControllerConfig::from_lookup(lookup_from(&[("SVCWATCHER_MAX_UPDATE_RETRY", "lots")]));
        assert!(matches!(err, Err(ControllerError::InvalidConfig(_))));

        let err = ControllerConfig::from_lookup(lookup_from(&[("SVCWATCHER_MAX_UPDATE_RETRY", "0")]));
        assert!(matches!(err, Err(ControllerError::InvalidConfig(_))));

        let err = ControllerConfig::from_lookup(lookup_from(&[("SVCWATCHER_RETRY_INTERVAL_MS", "-5")]));
        assert!(matches!(err, Err(ControllerError::InvalidConfig(_))));
    }
}
