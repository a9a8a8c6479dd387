//! Engine configuration.
//!
//! Defaults mirror the timings an inventory daemon needs on real hardware:
//! the directory lookup is retried slowly (it only fails when the mapper
//! itself is down), per-object reads are retried quickly.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Options for one resolver / service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Bus Snapshot fetch behavior.
    pub fetch: FetchOptions,

    /// Quiet period before a burst of bus changes triggers one resolution.
    pub debounce: Duration,

    /// Optional upper bound on scan rounds per loop. `None` runs to the fixed point.
    pub max_rounds: Option<usize>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { fetch: FetchOptions::default(), debounce: Duration::from_millis(500), max_rounds: None }
    }
}

impl EngineOptions {
    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|err| format!("failed to read {}: {err}", path.display()))?;
        serde_json::from_str(&text).map_err(|err| format!("failed to parse {}: {err}", path.display()))
    }
}

/// Retry/backoff and filtering for the Bus Snapshot Builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchOptions {
    /// Retries after the first failed directory lookup before giving up for good.
    pub lookup_retries: usize,

    /// Wait between directory lookup attempts.
    pub lookup_backoff: Duration,

    /// Total attempts for one (path, interface) property read.
    pub property_retries: usize,

    /// Wait between property read attempts.
    pub property_backoff: Duration,

    /// Interfaces with these prefixes are never read (they carry no properties).
    pub skip_interface_prefixes: Vec<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            lookup_retries: 5,
            lookup_backoff: Duration::from_secs(10),
            property_retries: 5,
            property_backoff: Duration::from_secs(2),
            skip_interface_prefixes: vec!["org.freedesktop".to_string()],
        }
    }
}

impl FetchOptions {
    pub fn skips(&self, interface: &str) -> bool {
        self.skip_interface_prefixes.iter().any(|prefix| interface.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_daemon_timings() {
        let options = EngineOptions::default();
        assert_eq!(options.debounce, Duration::from_millis(500));
        assert_eq!(options.fetch.lookup_retries, 5);
        assert_eq!(options.fetch.lookup_backoff, Duration::from_secs(10));
        assert_eq!(options.fetch.property_retries, 5);
        assert_eq!(options.fetch.property_backoff, Duration::from_secs(2));
        assert!(options.max_rounds.is_none());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let options: EngineOptions = serde_json::from_str(r#"{"fetch": {"property_retries": 2}}"#).unwrap();
        assert_eq!(options.fetch.property_retries, 2);
        assert_eq!(options.fetch.lookup_retries, 5);
        assert_eq!(options.debounce, Duration::from_millis(500));
    }

    #[test]
    fn freedesktop_interfaces_are_skipped() {
        let fetch = FetchOptions::default();
        assert!(fetch.skips("org.freedesktop.DBus.Properties"));
        assert!(!fetch.skips("xyz.openbmc_project.FruDevice"));
    }
}
