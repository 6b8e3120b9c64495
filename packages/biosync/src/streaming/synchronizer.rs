// EEG/PPG alignment
//
// Stream tasks append filtered samples to `SyncQueues`. On every drain cycle
// the synchronizer takes both queues in one short critical section, then
// pairs each EEG sample with the PPG sample closest in time. Output follows
// EEG arrival order. Several EEG samples may share one PPG sample since PPG
// runs at a lower rate.

use crate::streaming::types::{CombinedDatapoint, FilteredChunk, SignalType};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One filtered sample waiting to be aligned
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDatapoint {
    pub timestamp: f64,
    pub channels: Vec<f64>,
}

impl PendingDatapoint {
    pub fn new(timestamp: f64, channels: Vec<f64>) -> Self {
        Self {
            timestamp,
            channels,
        }
    }
}

#[derive(Debug, Default)]
struct Queues {
    eeg: Vec<PendingDatapoint>,
    ppg: Vec<PendingDatapoint>,
}

/// Producer side of the synchronizer, shared by the stream tasks
#[derive(Debug, Clone, Default)]
pub struct SyncQueues {
    inner: Arc<Mutex<Queues>>,
}

impl SyncQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue every sample of a filtered chunk
    pub fn push(&self, signal_type: SignalType, chunk: &FilteredChunk) {
        let entries = chunk
            .timestamps
            .iter()
            .zip(&chunk.samples)
            .map(|(&ts, row)| PendingDatapoint::new(ts, row.clone()))
            .collect();
        self.push_entries(signal_type, entries);
    }

    pub fn push_entries(&self, signal_type: SignalType, mut entries: Vec<PendingDatapoint>) {
        if entries.is_empty() {
            return;
        }
        let mut queues = self.inner.lock();
        match signal_type {
            SignalType::Eeg => queues.eeg.append(&mut entries),
            SignalType::Ppg => queues.ppg.append(&mut entries),
        }
    }

    /// Take and clear both queues atomically
    pub fn take(&self) -> (Vec<PendingDatapoint>, Vec<PendingDatapoint>) {
        let mut queues = self.inner.lock();
        (
            std::mem::take(&mut queues.eeg),
            std::mem::take(&mut queues.ppg),
        )
    }

    pub fn len(&self, signal_type: SignalType) -> usize {
        let queues = self.inner.lock();
        match signal_type {
            SignalType::Eeg => queues.eeg.len(),
            SignalType::Ppg => queues.ppg.len(),
        }
    }
}

/// Datapoints emitted during one whole second of stream time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowStats {
    /// Seconds since the first datapoint
    pub index: i64,
    pub datapoints: u64,
}

/// What the monitor noticed about one timestamp
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderingSignal {
    /// Seconds since the first observed timestamp
    pub relative: f64,
    /// Earlier than a timestamp already emitted
    pub out_of_order: bool,
    /// First datapoint of a new one-second window
    pub new_window: bool,
    /// The window that just closed, if any
    pub completed_window: Option<WindowStats>,
}

/// Tracks the time origin, ordering and one-second windows of emitted datapoints
#[derive(Debug, Clone, Default)]
pub struct OrderingMonitor {
    origin: Option<f64>,
    max_seen: Option<f64>,
    window: Option<i64>,
    window_count: u64,
    out_of_order_total: u64,
}

impl OrderingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, timestamp: f64) -> OrderingSignal {
        let origin = *self.origin.get_or_insert(timestamp);

        let out_of_order = self.max_seen.is_some_and(|max| timestamp < max);
        if out_of_order {
            self.out_of_order_total += 1;
        }
        self.max_seen = Some(self.max_seen.map_or(timestamp, |max| max.max(timestamp)));

        let relative = timestamp - origin;
        let window = relative.floor() as i64;
        let (new_window, completed_window) = match self.window {
            None => (true, None),
            Some(current) if window > current => (
                true,
                Some(WindowStats {
                    index: current,
                    datapoints: self.window_count,
                }),
            ),
            Some(_) => (false, None),
        };
        if new_window {
            self.window = Some(window);
            self.window_count = 0;
        }
        self.window_count += 1;

        OrderingSignal {
            relative,
            out_of_order,
            new_window,
            completed_window,
        }
    }

    /// Absolute timestamp of the first datapoint, once one has been seen
    pub fn origin(&self) -> Option<f64> {
        self.origin
    }

    pub fn out_of_order_total(&self) -> u64 {
        self.out_of_order_total
    }
}

/// Result of one drain cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncBatch {
    pub datapoints: Vec<CombinedDatapoint>,
    pub out_of_order: usize,
    pub completed_windows: Vec<WindowStats>,
}

/// Consumer side: aligns queued EEG with PPG
#[derive(Debug)]
pub struct StreamSynchronizer {
    queues: SyncQueues,
    monitor: OrderingMonitor,
    /// Most recent PPG sample from earlier cycles
    last_ppg: Option<PendingDatapoint>,
}

impl StreamSynchronizer {
    pub fn new(queues: SyncQueues) -> Self {
        Self {
            queues,
            monitor: OrderingMonitor::new(),
            last_ppg: None,
        }
    }

    /// Producer handle to give to stream tasks
    pub fn queues(&self) -> SyncQueues {
        self.queues.clone()
    }

    pub fn monitor(&self) -> &OrderingMonitor {
        &self.monitor
    }

    /// Align everything queued since the last drain
    pub fn drain(&mut self) -> SyncBatch {
        let (eeg, ppg) = self.queues.take();

        let mut candidates = Vec::with_capacity(ppg.len() + 1);
        candidates.extend(self.last_ppg.take());
        candidates.extend(ppg);

        let mut batch = SyncBatch {
            datapoints: Vec::with_capacity(eeg.len()),
            ..Default::default()
        };

        for entry in eeg {
            let ppg_channels = nearest(&candidates, entry.timestamp)
                .map(|p| p.channels.clone())
                .unwrap_or_default();

            let signal = self.monitor.observe(entry.timestamp);
            if signal.out_of_order {
                log::warn!(
                    "Out-of-order EEG timestamp {:.6} (relative {:.6})",
                    entry.timestamp,
                    signal.relative
                );
                batch.out_of_order += 1;
            }
            if let Some(window) = signal.completed_window {
                log::debug!(
                    "Window {} closed with {} datapoints",
                    window.index,
                    window.datapoints
                );
                batch.completed_windows.push(window);
            }

            batch.datapoints.push(CombinedDatapoint {
                timestamp: signal.relative,
                eeg_channels: entry.channels,
                ppg_channels,
            });
        }

        self.last_ppg = candidates.pop();
        batch
    }
}

/// PPG entry closest to `timestamp`; the first one wins a tie
fn nearest(candidates: &[PendingDatapoint], timestamp: f64) -> Option<&PendingDatapoint> {
    candidates.iter().min_by(|a, b| {
        (a.timestamp - timestamp)
            .abs()
            .total_cmp(&(b.timestamp - timestamp).abs())
    })
}
