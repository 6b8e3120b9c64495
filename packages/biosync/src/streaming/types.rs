// Common types for the streaming module

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for streaming operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur during streaming operations
#[derive(Debug, Error)]
pub enum StreamError {
    /// Transient: the acquisition side has nothing for us yet. Retried, never fatal.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,
}

impl StreamError {
    /// Errors the pipeline should ride out rather than stop on
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SourceUnavailable(_) | Self::Timeout(_))
    }
}

/// The two physiological signal kinds carried by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Eeg,
    Ppg,
}

impl SignalType {
    pub const ALL: [SignalType; 2] = [SignalType::Eeg, SignalType::Ppg];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eeg => "EEG",
            Self::Ppg => "PPG",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chunk as delivered by an acquisition source.
///
/// `values` is sample-major: `values[sample][channel]`, one timestamp per row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleChunk {
    pub values: Vec<Vec<f64>>,
    pub timestamps: Vec<f64>,
}

impl SampleChunk {
    pub fn new(values: Vec<Vec<f64>>, timestamps: Vec<f64>) -> Self {
        Self { values, timestamps }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Prepend rows held back from an earlier pull
    pub(crate) fn prepend(&mut self, mut earlier: SampleChunk) {
        earlier.values.append(&mut self.values);
        earlier.timestamps.append(&mut self.timestamps);
        *self = earlier;
    }
}

/// Newly arrived samples after causal filtering, same layout as [`SampleChunk`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteredChunk {
    pub samples: Vec<Vec<f64>>,
    pub timestamps: Vec<f64>,
}

impl FilteredChunk {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One EEG sample with its nearest PPG reading attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedDatapoint {
    /// Seconds since the first datapoint the pipeline emitted
    pub timestamp: f64,
    pub eeg_channels: Vec<f64>,
    pub ppg_channels: Vec<f64>,
}

/// Snapshot of pipeline counters
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PipelineStats {
    pub eeg_chunks_received: u64,
    pub eeg_samples_received: u64,
    pub ppg_chunks_received: u64,
    pub ppg_samples_received: u64,
    pub datapoints_emitted: u64,
    pub out_of_order_timestamps: u64,
    pub dashboards_published: u64,
    pub failed_deliveries: u64,
    /// Streams that stopped on a runtime error
    pub failed_streams: Vec<SignalType>,
    pub uptime_seconds: f64,
}

/// Lifecycle of a running pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", content = "data")]
pub enum PipelineState {
    #[default]
    Idle,

    /// Waiting for one or both acquisition streams to appear
    Discovering,

    Running { started_at: f64 },

    /// One stream stopped on a runtime error; the other keeps running
    Degraded { stream: SignalType, message: String },

    /// Setup failed and the pipeline was cancelled
    Error { message: String },

    Stopped,
}

/// Wall-clock seconds, used for local-arrival timestamps
pub(crate) fn wall_clock_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
