//! Real-time EEG and PPG acquisition pipeline.
//!
//! Two acquisition streams are discovered on an [`AcquisitionSource`], kept in
//! rolling raw-sample windows and filtered causally chunk by chunk. Each EEG
//! sample is paired with the nearest PPG sample in time and broadcast to
//! subscribers, alongside a periodic dashboard snapshot with spectra and EEG
//! band power.
//!
//! ```no_run
//! use biosync::{create_source, Broadcaster, Pipeline, PipelineConfig, SourceConfig};
//!
//! # async fn run() -> biosync::StreamResult<()> {
//! let source = create_source(SourceConfig::Synthetic { seed: Some(7) })?;
//! let mut pipeline = Pipeline::spawn(PipelineConfig::default(), source, Broadcaster::new())?;
//! pipeline.join().await
//! # }
//! ```

pub mod config;
pub mod signal_processing;
pub mod streaming;

pub use config::{PipelineConfig, SignalStreamConfig, TimestampPolicy};
pub use streaming::{
    create_source, AcquisitionSource, Broadcaster, CombinedDatapoint, DashboardSnapshot,
    OutboundMessage, Pipeline, PipelineState, PipelineStats, SignalType, SourceConfig,
    StreamError, StreamResult, Topic,
};
