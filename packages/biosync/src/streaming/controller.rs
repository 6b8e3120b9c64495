// Pipeline controller - owns the task graph
//
// The controller runs:
// - one task per signal type: discovery, then pull -> filter -> queue
// - a drain task: align queued samples and broadcast datapoints
// - a dashboard task: spectra over the latest buffer snapshots
//
// Every task watches the same CancellationToken. A setup failure cancels the
// token so the whole pipeline winds down and `join` reports the error. A pull
// error after setup ends only the stream it came from.

use crate::config::{PipelineConfig, SignalStreamConfig};
use crate::signal_processing::spectral::SpectralAnalyzer;
use crate::streaming::{
    broadcaster::{Broadcaster, OutboundMessage},
    dashboard::{DashboardSnapshot, StreamWindow},
    signal_stream::SignalStream,
    source::AcquisitionSource,
    synchronizer::{StreamSynchronizer, SyncQueues},
    types::{
        wall_clock_seconds, PipelineState, PipelineStats, SignalType, StreamError, StreamResult,
    },
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

type WindowSender = watch::Sender<Option<Arc<StreamWindow>>>;
type WindowReceiver = watch::Receiver<Option<Arc<StreamWindow>>>;

#[derive(Default)]
struct Counters {
    eeg_chunks: AtomicU64,
    eeg_samples: AtomicU64,
    ppg_chunks: AtomicU64,
    ppg_samples: AtomicU64,
    datapoints: AtomicU64,
    out_of_order: AtomicU64,
    dashboards: AtomicU64,
    failed_deliveries: AtomicU64,
}

impl Counters {
    fn record_chunk(&self, signal_type: SignalType, samples: usize) {
        let (chunks, total) = match signal_type {
            SignalType::Eeg => (&self.eeg_chunks, &self.eeg_samples),
            SignalType::Ppg => (&self.ppg_chunks, &self.ppg_samples),
        };
        chunks.fetch_add(1, Ordering::Relaxed);
        total.fetch_add(samples as u64, Ordering::Relaxed);
    }
}

/// State shared by every task of one pipeline
#[derive(Clone)]
struct Shared {
    cancel: CancellationToken,
    state: Arc<RwLock<PipelineState>>,
    counters: Arc<Counters>,
    streams_ready: Arc<AtomicUsize>,
    failed_streams: Arc<RwLock<Vec<SignalType>>>,
    broadcaster: Broadcaster,
}

impl Shared {
    /// Setup failure: stop everything
    fn fail(&self, error: &StreamError) {
        *self.state.write() = PipelineState::Error {
            message: error.to_string(),
        };
        self.cancel.cancel();
    }

    /// Runtime failure of one stream; the rest of the pipeline carries on
    fn stream_failed(&self, signal_type: SignalType, error: &StreamError) {
        self.failed_streams.write().push(signal_type);
        let mut state = self.state.write();
        if !matches!(*state, PipelineState::Error { .. }) {
            *state = PipelineState::Degraded {
                stream: signal_type,
                message: error.to_string(),
            };
        }
    }
}

/// Running EEG+PPG pipeline
pub struct Pipeline {
    config: PipelineConfig,
    shared: Shared,
    tasks: Vec<JoinHandle<StreamResult<()>>>,
    started: Instant,
}

impl Pipeline {
    /// Start every task. Must be called from within a Tokio runtime.
    pub fn spawn(
        config: PipelineConfig,
        source: Arc<dyn AcquisitionSource>,
        broadcaster: Broadcaster,
    ) -> StreamResult<Self> {
        config.validate()?;

        let shared = Shared {
            cancel: CancellationToken::new(),
            state: Arc::new(RwLock::new(PipelineState::Discovering)),
            counters: Arc::new(Counters::default()),
            streams_ready: Arc::new(AtomicUsize::new(0)),
            failed_streams: Arc::new(RwLock::new(Vec::new())),
            broadcaster,
        };

        let synchronizer = StreamSynchronizer::new(SyncQueues::new());
        let (eeg_tx, eeg_rx) = watch::channel(None);
        let (ppg_tx, ppg_rx) = watch::channel(None);

        let mut tasks = Vec::with_capacity(4);
        for (signal_type, windows) in [(SignalType::Eeg, eeg_tx), (SignalType::Ppg, ppg_tx)] {
            let task = StreamTask {
                signal_type,
                source: Arc::clone(&source),
                config: config.stream(signal_type).clone(),
                queues: synchronizer.queues(),
                windows,
                window_interval: config.dashboard_interval(),
                shared: shared.clone(),
            };
            tasks.push(tokio::spawn(task.run()));
        }

        tasks.push(tokio::spawn(run_drain(
            synchronizer,
            config.drain_interval(),
            shared.clone(),
        )));
        tasks.push(tokio::spawn(run_dashboard(
            eeg_rx,
            ppg_rx,
            config.dashboard_interval(),
            shared.clone(),
        )));

        log::info!("Pipeline started, waiting for EEG and PPG streams");

        Ok(Self {
            config,
            shared,
            tasks,
            started: Instant::now(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.shared.broadcaster
    }

    /// Get the cancellation token for external cancellation support
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    pub fn get_state(&self) -> PipelineState {
        self.shared.state.read().clone()
    }

    pub fn get_stats(&self) -> PipelineStats {
        let c = &self.shared.counters;
        PipelineStats {
            eeg_chunks_received: c.eeg_chunks.load(Ordering::Relaxed),
            eeg_samples_received: c.eeg_samples.load(Ordering::Relaxed),
            ppg_chunks_received: c.ppg_chunks.load(Ordering::Relaxed),
            ppg_samples_received: c.ppg_samples.load(Ordering::Relaxed),
            datapoints_emitted: c.datapoints.load(Ordering::Relaxed),
            out_of_order_timestamps: c.out_of_order.load(Ordering::Relaxed),
            dashboards_published: c.dashboards.load(Ordering::Relaxed),
            failed_deliveries: c.failed_deliveries.load(Ordering::Relaxed),
            failed_streams: self.shared.failed_streams.read().clone(),
            uptime_seconds: self.started.elapsed().as_secs_f64(),
        }
    }

    /// Wait for every task to finish. Returns the first setup error, if any.
    pub async fn join(&mut self) -> StreamResult<()> {
        let mut first_error = None;

        for handle in self.tasks.drain(..) {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => log::error!("Pipeline task join error: {}", e),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                *self.shared.state.write() = PipelineState::Stopped;
                Ok(())
            }
        }
    }

    /// Cancel all tasks and wait for them
    pub async fn stop(&mut self) -> StreamResult<()> {
        log::info!("Stopping pipeline");
        self.shared.cancel.cancel();
        let result = self.join().await;
        log::info!("Pipeline stopped");
        result
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

struct StreamTask {
    signal_type: SignalType,
    source: Arc<dyn AcquisitionSource>,
    config: SignalStreamConfig,
    queues: SyncQueues,
    windows: WindowSender,
    window_interval: Duration,
    shared: Shared,
}

impl StreamTask {
    async fn run(self) -> StreamResult<()> {
        let cancel = &self.shared.cancel;

        let mut stream = match SignalStream::setup(
            Arc::clone(&self.source),
            self.signal_type,
            self.config.clone(),
            cancel,
        )
        .await
        {
            Ok(stream) => stream,
            Err(StreamError::Cancelled) => return Ok(()),
            Err(e) => {
                log::error!("{} stream setup failed: {}", self.signal_type, e);
                self.shared.fail(&e);
                return Err(e);
            }
        };

        if self.shared.streams_ready.fetch_add(1, Ordering::SeqCst) + 1 == SignalType::ALL.len() {
            let mut state = self.shared.state.write();
            if *state == PipelineState::Discovering {
                *state = PipelineState::Running {
                    started_at: wall_clock_seconds(),
                };
                log::info!("All streams ready, pipeline running");
            }
        }

        let mut tick = interval(Duration::from_secs_f64(self.config.chunk_seconds));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_window: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = tick.tick() => {
                    let pulled = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        pulled = stream.pull() => pulled,
                    };

                    match pulled {
                        Ok(chunk) if !chunk.is_empty() => {
                            self.shared.counters.record_chunk(self.signal_type, chunk.len());
                            self.queues.push(self.signal_type, &chunk);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            log::error!("{} stream stopped: {}", self.signal_type, e);
                            self.shared.stream_failed(self.signal_type, &e);
                            return Ok(());
                        }
                    }

                    if last_window.map_or(true, |at| at.elapsed() >= self.window_interval) {
                        self.windows.send_replace(Some(Arc::new(StreamWindow {
                            sample_rate: stream.sample_rate(),
                            snapshot: stream.snapshot(),
                        })));
                        last_window = Some(Instant::now());
                    }
                }
            }
        }

        log::info!("{} stream task stopped", self.signal_type);
        Ok(())
    }
}

async fn run_drain(
    mut synchronizer: StreamSynchronizer,
    period: Duration,
    shared: Shared,
) -> StreamResult<()> {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shared.cancel.cancelled() => break,

            _ = tick.tick() => {
                let batch = synchronizer.drain();
                if batch.datapoints.is_empty() {
                    continue;
                }

                let counters = &shared.counters;
                counters.out_of_order.fetch_add(batch.out_of_order as u64, Ordering::Relaxed);
                counters.datapoints.fetch_add(batch.datapoints.len() as u64, Ordering::Relaxed);

                let mut failed = 0;
                for datapoint in batch.datapoints {
                    let report = shared.broadcaster.publish(OutboundMessage::Datapoint(datapoint));
                    failed += report.failed;
                }
                counters.failed_deliveries.fetch_add(failed as u64, Ordering::Relaxed);
            }
        }
    }

    log::info!("Drain task stopped");
    Ok(())
}

async fn run_dashboard(
    eeg: WindowReceiver,
    ppg: WindowReceiver,
    period: Duration,
    shared: Shared,
) -> StreamResult<()> {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shared.cancel.cancelled() => break,

            _ = tick.tick() => {
                if shared.broadcaster.subscriber_count() == 0 {
                    continue;
                }
                let (Some(eeg), Some(ppg)) = (eeg.borrow().clone(), ppg.borrow().clone()) else {
                    continue;
                };

                // FFTs off the async executor
                let built = tokio::task::spawn_blocking(move || {
                    DashboardSnapshot::build(&SpectralAnalyzer::new(), &eeg, &ppg)
                })
                .await;

                match built {
                    Ok(snapshot) => {
                        let report = shared
                            .broadcaster
                            .publish(OutboundMessage::Dashboard(Box::new(snapshot)));
                        shared.counters.dashboards.fetch_add(1, Ordering::Relaxed);
                        shared
                            .counters
                            .failed_deliveries
                            .fetch_add(report.failed as u64, Ordering::Relaxed);
                    }
                    Err(e) => log::error!("Dashboard task join error: {}", e),
                }
            }
        }
    }

    log::info!("Dashboard task stopped");
    Ok(())
}
