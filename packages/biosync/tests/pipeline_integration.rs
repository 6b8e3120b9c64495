// End-to-end checks of stream setup, filtering, alignment and broadcasting

use async_trait::async_trait;
use biosync::config::PipelineConfig;
use biosync::streaming::broadcaster::{Broadcaster, ChannelSubscriber, OutboundMessage, Topic};
use biosync::streaming::controller::Pipeline;
use biosync::streaming::signal_stream::SignalStream;
use biosync::streaming::source::{AcquisitionSource, ReplayConfig, ReplaySource, StreamHandle};
use biosync::streaming::synchronizer::{StreamSynchronizer, SyncQueues};
use biosync::streaming::types::{CombinedDatapoint, SampleChunk, SignalType, StreamResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const EEG_RATE: f64 = 256.0;
const PPG_RATE: f64 = 64.0;

/// Hands out pre-cut chunks; every channel value is the sample's own timestamp
struct WindowedSource {
    eeg: Mutex<VecDeque<SampleChunk>>,
    ppg: Mutex<VecDeque<SampleChunk>>,
}

impl WindowedSource {
    /// `windows` chunks of `window_seconds` each, cut on sample boundaries
    fn new(windows: usize, window_seconds: f64) -> Self {
        Self {
            eeg: Mutex::new(cut(EEG_RATE, 4, windows, window_seconds)),
            ppg: Mutex::new(cut(PPG_RATE, 2, windows, window_seconds)),
        }
    }
}

fn cut(rate: f64, channels: usize, windows: usize, window_seconds: f64) -> VecDeque<SampleChunk> {
    (0..windows)
        .map(|w| {
            // A window holds every sample stamped before its end
            let boundary = |k: usize| (k as f64 * window_seconds * rate - 1e-9).ceil() as usize;
            let (start, end) = (boundary(w), boundary(w + 1));
            let timestamps: Vec<f64> = (start..end).map(|i| i as f64 / rate).collect();
            let values = timestamps.iter().map(|&t| vec![t; channels]).collect();
            SampleChunk::new(values, timestamps)
        })
        .collect()
}

#[async_trait]
impl AcquisitionSource for WindowedSource {
    async fn discover(&self, signal_type: SignalType) -> StreamResult<Option<StreamHandle>> {
        Ok(Some(StreamHandle::new(signal_type, "windowed")))
    }

    fn nominal_sample_rate(&self, handle: &StreamHandle) -> f64 {
        match handle.signal_type {
            SignalType::Eeg => EEG_RATE,
            SignalType::Ppg => PPG_RATE,
        }
    }

    fn channel_count(&self, handle: &StreamHandle) -> usize {
        match handle.signal_type {
            SignalType::Eeg => 4,
            SignalType::Ppg => 2,
        }
    }

    async fn pull_chunk(&self, handle: &StreamHandle, _max: usize) -> StreamResult<SampleChunk> {
        let queue = match handle.signal_type {
            SignalType::Eeg => &self.eeg,
            SignalType::Ppg => &self.ppg,
        };
        Ok(queue.lock().pop_front().unwrap_or_default())
    }
}

fn unfiltered() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.eeg.filter = None;
    config.ppg.filter = None;
    config
}

#[tokio::test]
async fn one_second_of_windows_yields_one_datapoint_per_eeg_sample() {
    let source: Arc<dyn AcquisitionSource> = Arc::new(WindowedSource::new(10, 0.1));
    let config = unfiltered();
    let cancel = CancellationToken::new();

    let mut eeg = SignalStream::setup(source.clone(), SignalType::Eeg, config.eeg.clone(), &cancel)
        .await
        .unwrap();
    let mut ppg = SignalStream::setup(source, SignalType::Ppg, config.ppg.clone(), &cancel)
        .await
        .unwrap();
    assert_eq!(eeg.dimensions(), (EEG_RATE, 4));
    assert_eq!(ppg.dimensions(), (PPG_RATE, 2));

    let queues = SyncQueues::new();
    let mut synchronizer = StreamSynchronizer::new(queues.clone());
    let mut datapoints: Vec<CombinedDatapoint> = Vec::new();

    for _ in 0..10 {
        queues.push(SignalType::Eeg, &eeg.pull().await.unwrap());
        queues.push(SignalType::Ppg, &ppg.pull().await.unwrap());
        datapoints.extend(synchronizer.drain().datapoints);
    }

    assert_eq!(datapoints.len(), 256);
    assert_eq!(synchronizer.monitor().out_of_order_total(), 0);

    for (i, datapoint) in datapoints.iter().enumerate() {
        let eeg_time = i as f64 / EEG_RATE;
        assert!((datapoint.timestamp - eeg_time).abs() < 1e-12);
        assert_eq!(datapoint.eeg_channels, vec![eeg_time; 4]);

        assert_eq!(datapoint.ppg_channels.len(), 2);
        let ppg_time = datapoint.ppg_channels[0];
        assert!(
            (ppg_time - eeg_time).abs() <= 1.0 / PPG_RATE + 1e-9,
            "EEG {} paired with PPG {}",
            eeg_time,
            ppg_time
        );
    }

    // Raw history holds every sample seen so far
    assert_eq!(eeg.buffer_metrics().total_pushed, 256);
    assert_eq!(ppg.buffer_metrics().total_pushed, 64);
}

#[tokio::test]
async fn filtered_output_matches_unsplit_filtering() {
    let window_source: Arc<dyn AcquisitionSource> = Arc::new(WindowedSource::new(10, 0.1));
    let whole_source: Arc<dyn AcquisitionSource> = Arc::new(WindowedSource::new(1, 1.0));
    let config = PipelineConfig::default();
    let cancel = CancellationToken::new();

    let mut windowed =
        SignalStream::setup(window_source, SignalType::Eeg, config.eeg.clone(), &cancel)
            .await
            .unwrap();
    let mut whole = SignalStream::setup(whole_source, SignalType::Eeg, config.eeg.clone(), &cancel)
        .await
        .unwrap();

    let mut pieces = Vec::new();
    for _ in 0..10 {
        pieces.extend(windowed.pull().await.unwrap().samples);
    }
    let reference = whole.pull().await.unwrap().samples;

    assert_eq!(pieces.len(), reference.len());
    for (a, b) in pieces.iter().flatten().zip(reference.iter().flatten()) {
        assert!((a - b).abs() < 1e-9);
    }
}

#[tokio::test(start_paused = true)]
async fn replayed_recording_reaches_subscribers() {
    let mut recording = tempfile::NamedTempFile::new().unwrap();
    writeln!(recording, "timestamp,eeg_1,eeg_2,ppg_1").unwrap();
    for i in 0..512 {
        let t = i as f64 / EEG_RATE;
        writeln!(recording, "{},{},{},{}", t, t, -t, t).unwrap();
    }
    recording.flush().unwrap();

    let source = ReplaySource::open(
        recording.path(),
        ReplayConfig {
            eeg_channels: 2,
            ppg_channels: 1,
            loop_playback: false,
            ..Default::default()
        },
    )
    .unwrap();

    let broadcaster = Broadcaster::new();
    let (subscriber, mut datapoints) = ChannelSubscriber::new(Topic::Datapoints, 4096);
    broadcaster.register(Arc::new(subscriber));

    let mut pipeline = Pipeline::spawn(unfiltered(), Arc::new(source), broadcaster).unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    pipeline.stop().await.unwrap();

    let mut received = Vec::new();
    while let Ok(message) = datapoints.try_recv() {
        match message.as_ref() {
            OutboundMessage::Datapoint(d) => received.push(d.clone()),
            OutboundMessage::Dashboard(_) => panic!("dashboard sent to a datapoint subscriber"),
        }
    }

    assert_eq!(received.len(), 512);
    for (i, datapoint) in received.iter().enumerate() {
        let t = i as f64 / EEG_RATE;
        assert_eq!(datapoint.eeg_channels, vec![t, -t]);
        assert!((datapoint.timestamp - t).abs() < 1e-6);
        // Stream tasks run independently, so PPG may trail by a pull or two
        if let Some(&ppg) = datapoint.ppg_channels.first() {
            assert!((ppg - t).abs() <= 0.25, "EEG {} paired with PPG {}", t, ppg);
        }
    }
    let with_ppg = received.iter().filter(|d| !d.ppg_channels.is_empty()).count();
    assert!(with_ppg > 400);
    assert_eq!(pipeline.get_stats().datapoints_emitted, 512);
}
