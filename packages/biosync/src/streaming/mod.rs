// Streaming pipeline: acquisition, buffering, alignment and fan-out

pub mod broadcaster;
pub mod buffer;
pub mod controller;
pub mod dashboard;
pub mod signal_stream;
pub mod source;
pub mod synchronizer;
pub mod types;

pub use broadcaster::{
    Broadcaster, ChannelSubscriber, OutboundMessage, PublishReport, Subscriber, SubscriberError,
    SubscriberId, Topic,
};
pub use buffer::{BufferMetrics, BufferSnapshot, ChannelBuffer};
pub use controller::Pipeline;
pub use dashboard::{DashboardSnapshot, StreamWindow};
pub use signal_stream::SignalStream;
pub use source::{create_source, AcquisitionSource, SourceConfig, StreamHandle};
pub use synchronizer::{StreamSynchronizer, SyncBatch, SyncQueues};
pub use types::*;
