//! Capture session configuration
//!
//! This module defines the minimal configuration a capture session needs.
//! Everything human-facing (mode aliases, default file names, working-directory
//! defaults) is resolved by the caller before a [`SessionConfig`] is built.

use crate::signals::SignalCatalog;
use crate::sink::SinkConfig;
use crate::types::Mode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a capture session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Stream (hand frames to the caller) or Logged (persist to a sink)
    pub mode: Mode,

    /// Output sink, required in Logged mode and ignored in Stream mode
    #[serde(default)]
    pub output: Option<SinkConfig>,

    /// Upper bound on a single poll of the frame source, in milliseconds (default: 1000ms)
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Optional: session start time on the frame source's time base.
    /// Defaults to the source clock at construction.
    #[serde(default)]
    pub start_time: Option<f64>,

    /// Signals decoded into every record; in Logged mode each one becomes an
    /// extra log column after `Data`. Empty means raw logging.
    #[serde(default)]
    pub signals: SignalCatalog,
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

impl SessionConfig {
    /// Create a stream-mode configuration
    pub fn stream() -> Self {
        Self::new(Mode::Stream)
    }

    /// Create a logged-mode configuration writing to `output`
    pub fn logged(output: SinkConfig) -> Self {
        Self::new(Mode::Logged).with_output(output)
    }

    /// Create a configuration with default settings for `mode`
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            output: None,
            poll_timeout_ms: default_poll_timeout_ms(),
            start_time: None,
            signals: SignalCatalog::new(),
        }
    }

    /// Builder method: set the output sink
    pub fn with_output(mut self, output: SinkConfig) -> Self {
        self.output = Some(output);
        self
    }

    /// Builder method: set the poll timeout
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Builder method: pin the session start time
    pub fn with_start_time(mut self, start_time: f64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Builder method: decode these signals into every record
    pub fn with_signals(mut self, signals: SignalCatalog) -> Self {
        self.signals = signals;
        self
    }

    /// Poll timeout as a `Duration`
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::OutputFormat;

    #[test]
    fn test_session_config_builder() {
        let config = SessionConfig::logged(SinkConfig::new("/tmp/out.csv", OutputFormat::Csv))
            .with_poll_timeout(Duration::from_millis(250))
            .with_start_time(12.5);

        assert_eq!(config.mode, Mode::Logged);
        assert_eq!(config.poll_timeout(), Duration::from_millis(250));
        assert_eq!(config.start_time, Some(12.5));
        assert!(config.output.is_some());
    }

    #[test]
    fn test_session_config_deserialization_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{"mode": "stream"}"#).unwrap();
        assert_eq!(config.mode, Mode::Stream);
        assert_eq!(config.poll_timeout_ms, 1000);
        assert!(config.output.is_none());
        assert!(config.signals.is_empty());

        let config: SessionConfig = serde_json::from_str(
            r#"{"mode": "stream", "signals": [{"name": "egt", "byte_offset": 2, "scale": 1.0, "bias": 40.0}]}"#,
        )
        .unwrap();
        assert_eq!(config.signals.names(), vec!["egt".to_string()]);

        let result = serde_json::from_str::<SessionConfig>(r#"{"mode": "logging"}"#);
        assert!(result.is_err());
    }
}
