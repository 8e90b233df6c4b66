use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default data-file extension for paths given without one.
pub const DEFAULT_EXTENSION: &str = "pydb";

/// Options for opening a [`crate::Store`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long an operation waits for the cooperative lock.
    pub lock_timeout: Duration,
    /// Flush the data file to disk after every append.
    pub fsync: bool,
    /// Log per-operation events at `info` instead of `debug`.
    pub verbose: bool,
    /// Data-file extension used when the store path has none.
    pub extension: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(10),
            fsync: true,
            verbose: false,
            extension: DEFAULT_EXTENSION.to_owned(),
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{"verbose": true}"#).unwrap();

        assert!(config.verbose);
        assert!(config.fsync);
        assert_eq!(config.lock_timeout, Duration::from_secs(10));
        assert_eq!(config.extension, DEFAULT_EXTENSION);
    }

    #[test]
    fn builder_overrides() {
        let config = StoreConfig::new()
            .with_lock_timeout(Duration::from_millis(250))
            .with_fsync(false)
            .with_extension("chain");

        let json = serde_json::to_string(&config).unwrap();
        let back: StoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
        assert_eq!(back.extension, "chain");
    }
}
