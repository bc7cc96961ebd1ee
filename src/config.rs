//! Runtime configuration read from the environment

use crate::error::{Error, Result};

pub const METRICS_PORT_ENV: &str = "METRICS_PORT";
pub const WATCH_NAMESPACE_ENV: &str = "WATCH_NAMESPACE";
pub const FIELD_MANAGER_ENV: &str = "FIELD_MANAGER";

/// Default metrics port
pub const DEFAULT_METRICS_PORT: u16 = 8080;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub metrics_port: u16,
    /// Namespace to watch, all namespaces when unset
    pub watch_namespace: Option<String>,
    /// Field manager override, the controller name when unset
    pub field_manager: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            watch_namespace: None,
            field_manager: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let metrics_port = match get(METRICS_PORT_ENV) {
            Some(raw) => raw.parse::<u16>().map_err(|e| {
                Error::validation(format!("Invalid {} '{}': {}", METRICS_PORT_ENV, raw, e))
            })?,
            None => DEFAULT_METRICS_PORT,
        };

        Ok(Self {
            metrics_port,
            watch_namespace: get(WATCH_NAMESPACE_ENV),
            field_manager: get(FIELD_MANAGER_ENV),
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
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(Config::from_lookup(lookup(&[])).unwrap(), Config::default());
    }

    #[test]
    fn reads_values() {
        let config = Config::from_lookup(lookup(&[
            (METRICS_PORT_ENV, "9090"),
            (WATCH_NAMESPACE_ENV, "apps"),
            (FIELD_MANAGER_ENV, ""),
        ]))
        .unwrap();
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.watch_namespace.as_deref(), Some("apps"));
        assert_eq!(config.field_manager, None);
    }

    #[test]
    fn rejects_invalid_port() {
        let err = Config::from_lookup(lookup(&[(METRICS_PORT_ENV, "http")])).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
