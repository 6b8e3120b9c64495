//! Pipeline configuration
//!
//! Every field has a serde default so a partial JSON document (or none at all)
//! yields a working setup tuned for a 256 Hz EEG headset with a 64 Hz PPG
//! sensor.

use crate::signal_processing::filters::FilterConfig;
use crate::streaming::types::{SignalType, StreamError, StreamResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Where datapoint timestamps come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampPolicy {
    /// Use the timestamps supplied by the acquisition device
    #[default]
    Device,
    /// Stamp samples with local wall-clock arrival time
    LocalArrival,
}

/// Per-signal stream settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalStreamConfig {
    /// Length of the rolling history in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: f64,

    /// Causal filter to apply; `None` passes samples through untouched
    #[serde(default)]
    pub filter: Option<FilterConfig>,

    /// Target fan-out cadence; bounds how many samples a single pull drains
    #[serde(default = "default_chunk_seconds")]
    pub chunk_seconds: f64,

    #[serde(default = "default_discovery_poll_ms")]
    pub discovery_poll_ms: u64,

    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,

    #[serde(default = "default_pull_timeout_ms")]
    pub pull_timeout_ms: u64,

    #[serde(default)]
    pub timestamp_policy: TimestampPolicy,
}

fn default_window_seconds() -> f64 {
    10.0
}
fn default_chunk_seconds() -> f64 {
    0.1
}
fn default_discovery_poll_ms() -> u64 {
    1000
}
fn default_discovery_timeout_ms() -> u64 {
    2000
}
fn default_pull_timeout_ms() -> u64 {
    500
}
fn default_drain_interval_ms() -> u64 {
    100
}
fn default_dashboard_interval_ms() -> u64 {
    1000
}

impl Default for SignalStreamConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            filter: None,
            chunk_seconds: default_chunk_seconds(),
            discovery_poll_ms: default_discovery_poll_ms(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
            pull_timeout_ms: default_pull_timeout_ms(),
            timestamp_policy: TimestampPolicy::default(),
        }
    }
}

impl SignalStreamConfig {
    /// EEG defaults: 10 s window with mains bandstop
    pub fn eeg() -> Self {
        Self {
            filter: Some(FilterConfig::mains_bandstop()),
            ..Default::default()
        }
    }

    /// PPG defaults: 10 s window, unfiltered
    pub fn ppg() -> Self {
        Self::default()
    }

    pub fn discovery_poll(&self) -> Duration {
        Duration::from_millis(self.discovery_poll_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.pull_timeout_ms)
    }

    pub fn validate(&self) -> StreamResult<()> {
        if !(self.window_seconds.is_finite() && self.window_seconds > 0.0) {
            return Err(StreamError::InvalidConfig(format!(
                "window_seconds must be positive, got {}",
                self.window_seconds
            )));
        }
        if !(self.chunk_seconds.is_finite() && self.chunk_seconds > 0.0) {
            return Err(StreamError::InvalidConfig(format!(
                "chunk_seconds must be positive, got {}",
                self.chunk_seconds
            )));
        }
        if self.pull_timeout_ms == 0 || self.discovery_timeout_ms == 0 {
            return Err(StreamError::InvalidConfig(
                "timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "SignalStreamConfig::eeg")]
    pub eeg: SignalStreamConfig,

    #[serde(default = "SignalStreamConfig::ppg")]
    pub ppg: SignalStreamConfig,

    /// How often the synchronizer drains and broadcasts
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,

    /// How often band power and dashboard snapshots are produced
    #[serde(default = "default_dashboard_interval_ms")]
    pub dashboard_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            eeg: SignalStreamConfig::eeg(),
            ppg: SignalStreamConfig::ppg(),
            drain_interval_ms: default_drain_interval_ms(),
            dashboard_interval_ms: default_dashboard_interval_ms(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file; absent fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> StreamResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            StreamError::Parse(format!("{}: {}", path.as_ref().display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn stream(&self, signal_type: SignalType) -> &SignalStreamConfig {
        match signal_type {
            SignalType::Eeg => &self.eeg,
            SignalType::Ppg => &self.ppg,
        }
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn dashboard_interval(&self) -> Duration {
        Duration::from_millis(self.dashboard_interval_ms)
    }

    pub fn validate(&self) -> StreamResult<()> {
        self.eeg.validate()?;
        self.ppg.validate()?;
        if self.drain_interval_ms == 0 || self.dashboard_interval_ms == 0 {
            return Err(StreamError::InvalidConfig(
                "intervals must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
