// One acquisition stream: discovery, rolling history and causal filtering
//
// A `SignalStream` exists only once its source has been found, so the sample
// rate, channel count, buffer size and filter design are all fixed at
// construction and never revisited.

use crate::config::{SignalStreamConfig, TimestampPolicy};
use crate::signal_processing::causal_filter::{CausalFilter, FilterState};
use crate::signal_processing::filters::create_filter;
use crate::streaming::buffer::{BufferMetrics, BufferSnapshot, ChannelBuffer};
use crate::streaming::source::{AcquisitionSource, StreamHandle};
use crate::streaming::types::{
    wall_clock_seconds, FilteredChunk, SampleChunk, SignalType, StreamError, StreamResult,
};
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

pub struct SignalStream {
    signal_type: SignalType,
    source: Arc<dyn AcquisitionSource>,
    handle: StreamHandle,
    config: SignalStreamConfig,
    sample_rate: f64,
    channel_count: usize,
    max_samples: usize,
    buffer: ChannelBuffer,
    filter: CausalFilter,
    filter_state: Option<FilterState>,
    /// A lone sample held back until more arrive
    pending: Option<SampleChunk>,
}

impl SignalStream {
    /// Wait for the source to offer a stream of `signal_type`, then size the
    /// buffer and design the filter from its declared rate and channel count.
    ///
    /// Discovery is retried every `discovery_poll_ms` for as long as it takes;
    /// only cancellation or an unusable stream description ends the wait.
    pub async fn setup(
        source: Arc<dyn AcquisitionSource>,
        signal_type: SignalType,
        config: SignalStreamConfig,
        cancel: &CancellationToken,
    ) -> StreamResult<Self> {
        config.validate()?;

        let handle = Self::discover(source.as_ref(), signal_type, &config, cancel).await?;
        let sample_rate = source.nominal_sample_rate(&handle);
        let channel_count = source.channel_count(&handle);

        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(StreamError::InvalidConfig(format!(
                "{} stream '{}' reports sample rate {}",
                signal_type, handle.name, sample_rate
            )));
        }
        if channel_count == 0 {
            return Err(StreamError::InvalidConfig(format!(
                "{} stream '{}' has no channels",
                signal_type, handle.name
            )));
        }

        let filter = match &config.filter {
            Some(filter_config) => {
                CausalFilter::new(create_filter(filter_config, sample_rate)?, channel_count)
            }
            None => CausalFilter::passthrough(channel_count),
        };
        let buffer = ChannelBuffer::for_window(sample_rate, config.window_seconds, channel_count);
        let max_samples = ((sample_rate * config.chunk_seconds).ceil() as usize).max(2);

        log::info!(
            "{} stream '{}' ready: {} channels @ {} Hz, {} sample window",
            signal_type,
            handle.name,
            channel_count,
            sample_rate,
            buffer.capacity()
        );

        Ok(Self {
            signal_type,
            source,
            handle,
            config,
            sample_rate,
            channel_count,
            max_samples,
            buffer,
            filter,
            filter_state: None,
            pending: None,
        })
    }

    async fn discover(
        source: &dyn AcquisitionSource,
        signal_type: SignalType,
        config: &SignalStreamConfig,
        cancel: &CancellationToken,
    ) -> StreamResult<StreamHandle> {
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(StreamError::Cancelled),

                result = timeout(config.discovery_timeout(), source.discover(signal_type)) => {
                    result
                }
            };

            match result {
                Ok(Ok(Some(handle))) => return Ok(handle),
                Ok(Ok(None)) => {
                    log::info!("Waiting for {} stream (attempt {})", signal_type, attempt);
                }
                Ok(Err(e)) => {
                    log::warn!("{} discovery failed, retrying: {}", signal_type, e);
                }
                Err(_) => {
                    log::info!(
                        "{} discovery timed out after {:?} (attempt {})",
                        signal_type,
                        config.discovery_timeout(),
                        attempt
                    );
                }
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(StreamError::Cancelled),

                _ = sleep(config.discovery_poll()) => {}
            }
        }
    }

    /// Pull whatever has arrived and return it filtered.
    ///
    /// A timed-out or transiently failing pull is an empty result, not an error.
    pub async fn pull(&mut self) -> StreamResult<FilteredChunk> {
        let pull_timeout = self.config.pull_timeout();
        let pulled = timeout(
            pull_timeout,
            self.source.pull_chunk(&self.handle, self.max_samples),
        )
        .await
        .unwrap_or_else(|_| {
            Err(StreamError::Timeout(format!(
                "{} pull after {:?}",
                self.signal_type, pull_timeout
            )))
        });

        let chunk = match pulled {
            Ok(chunk) => chunk,
            Err(e) if e.is_transient() => {
                log::debug!("{} pull skipped: {}", self.signal_type, e);
                return Ok(FilteredChunk::empty());
            }
            Err(e) => return Err(e),
        };

        self.ingest(chunk)
    }

    /// Push a chunk into the history and filter it, carrying filter state.
    ///
    /// Fewer than two samples produce an empty result; a single sample is kept
    /// and delivered with the next chunk.
    pub fn ingest(&mut self, mut chunk: SampleChunk) -> StreamResult<FilteredChunk> {
        if chunk.timestamps.len() != chunk.values.len() {
            return Err(StreamError::ShapeMismatch {
                context: "chunk timestamps",
                expected: chunk.values.len(),
                actual: chunk.timestamps.len(),
            });
        }
        if let Some(row) = chunk.values.iter().find(|row| row.len() != self.channel_count) {
            return Err(StreamError::ShapeMismatch {
                context: "chunk row",
                expected: self.channel_count,
                actual: row.len(),
            });
        }

        if let Some(pending) = self.pending.take() {
            chunk.prepend(pending);
        }
        if chunk.len() <= 1 {
            if !chunk.is_empty() {
                self.pending = Some(chunk);
            }
            return Ok(FilteredChunk::empty());
        }

        if self.config.timestamp_policy == TimestampPolicy::LocalArrival {
            let now = wall_clock_seconds();
            let last = chunk.len() - 1;
            for (i, ts) in chunk.timestamps.iter_mut().enumerate() {
                *ts = now - (last - i) as f64 / self.sample_rate;
            }
        }

        self.buffer.push(&chunk.values, &chunk.timestamps);
        let (samples, state) = self.filter.ingest(&chunk.values, self.filter_state.take())?;
        self.filter_state = Some(state);

        Ok(FilteredChunk {
            samples,
            timestamps: chunk.timestamps,
        })
    }

    pub fn signal_type(&self) -> SignalType {
        self.signal_type
    }

    pub fn handle(&self) -> &StreamHandle {
        &self.handle
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// `(sample_rate, channel_count)` as learned at setup
    pub fn dimensions(&self) -> (f64, usize) {
        (self.sample_rate, self.channel_count)
    }

    pub fn max_samples_per_pull(&self) -> usize {
        self.max_samples
    }

    /// Full rolling window of raw samples
    pub fn snapshot(&self) -> BufferSnapshot {
        self.buffer.snapshot()
    }

    pub fn buffer_metrics(&self) -> BufferMetrics {
        self.buffer.get_metrics()
    }
}
