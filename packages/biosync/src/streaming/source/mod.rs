// Pluggable acquisition sources
//
// The pipeline only needs four things from the acquisition side: find a stream
// of a given signal type, read its declared rate and channel count, and pull
// whatever samples have arrived. Hardware backends implement
// `AcquisitionSource`; two software sources ship with the crate:
// - Synthetic: generated EEG and PPG waveforms paced by the wall clock
// - Replay: a recorded CSV played back in a loop

mod replay;
mod synthetic;

use crate::streaming::types::{SampleChunk, SignalType, StreamResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

pub use replay::{ReplayConfig, ReplaySource};
pub use synthetic::{SyntheticConfig, SyntheticSource};

/// Identifies a discovered stream on a source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamHandle {
    pub signal_type: SignalType,
    pub name: String,
}

impl StreamHandle {
    pub fn new(signal_type: SignalType, name: impl Into<String>) -> Self {
        Self {
            signal_type,
            name: name.into(),
        }
    }
}

/// Something that produces timestamped multi-channel samples
#[async_trait]
pub trait AcquisitionSource: Send + Sync {
    /// Look for a stream of the given type. `Ok(None)` means "not yet".
    async fn discover(&self, signal_type: SignalType) -> StreamResult<Option<StreamHandle>>;

    /// Declared sample rate in Hz
    fn nominal_sample_rate(&self, handle: &StreamHandle) -> f64;

    fn channel_count(&self, handle: &StreamHandle) -> usize;

    /// Return up to `max_samples` samples that have arrived since the last pull.
    /// An empty chunk is a normal answer.
    async fn pull_chunk(&self, handle: &StreamHandle, max_samples: usize)
        -> StreamResult<SampleChunk>;
}

/// Configuration for the bundled source types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SourceConfig {
    #[serde(rename = "synthetic")]
    Synthetic {
        #[serde(default)]
        seed: Option<u64>,
    },

    #[serde(rename = "replay")]
    Replay {
        path: PathBuf,
        #[serde(default)]
        eeg_sample_rate: Option<f64>,
        #[serde(default)]
        ppg_sample_rate: Option<f64>,
    },
}

/// Build one of the bundled sources
pub fn create_source(config: SourceConfig) -> StreamResult<Arc<dyn AcquisitionSource>> {
    match config {
        SourceConfig::Synthetic { seed } => {
            let source = match seed {
                Some(seed) => SyntheticSource::with_seed(SyntheticConfig::default(), seed),
                None => SyntheticSource::new(SyntheticConfig::default()),
            };
            Ok(Arc::new(source))
        }
        SourceConfig::Replay {
            path,
            eeg_sample_rate,
            ppg_sample_rate,
        } => {
            let defaults = ReplayConfig::default();
            let config = ReplayConfig {
                eeg_sample_rate: eeg_sample_rate.unwrap_or(defaults.eeg_sample_rate),
                ppg_sample_rate: ppg_sample_rate.unwrap_or(defaults.ppg_sample_rate),
                ..defaults
            };
            Ok(Arc::new(ReplaySource::open(path, config)?))
        }
    }
}
