// Fixed-capacity rolling window of multi-channel samples
//
// One flat arena of `capacity * channel_count` values plus a head index. The
// head always points at the oldest slot, which is also the next slot written.
// Pushes never allocate, and the window is zero-padded until it fills.

use serde::{Deserialize, Serialize};

/// Immutable copy of a buffer, oldest sample first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferSnapshot {
    /// `samples[sample][channel]`
    pub samples: Vec<Vec<f64>>,
    pub timestamps: Vec<f64>,
}

impl BufferSnapshot {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Metrics for buffer monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BufferMetrics {
    pub total_pushed: u64,
    pub total_evicted: u64,
    pub capacity: usize,
    pub channel_count: usize,
}

/// Rolling window holding the most recent `capacity` samples of one stream
#[derive(Debug, Clone)]
pub struct ChannelBuffer {
    values: Vec<f64>,
    timestamps: Vec<f64>,
    capacity: usize,
    channel_count: usize,
    head: usize,
    total_pushed: u64,
}

impl ChannelBuffer {
    /// Create a zero-filled buffer. A zero capacity is raised to one sample.
    pub fn new(capacity: usize, channel_count: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: vec![0.0; capacity * channel_count],
            timestamps: vec![0.0; capacity],
            capacity,
            channel_count,
            head: 0,
            total_pushed: 0,
        }
    }

    /// Size the window from a sample rate and a duration: `ceil(rate * seconds)`
    pub fn for_window(sample_rate: f64, window_seconds: f64, channel_count: usize) -> Self {
        let capacity = (sample_rate * window_seconds).ceil().max(1.0) as usize;
        Self::new(capacity, channel_count)
    }

    /// Append samples, evicting the oldest so the length stays at capacity.
    ///
    /// Rows shorter than the channel count are zero-filled, longer rows are
    /// truncated. A missing timestamp is stored as 0.0.
    pub fn push(&mut self, rows: &[Vec<f64>], timestamps: &[f64]) {
        // Only the last `capacity` rows can survive
        let skip = rows.len().saturating_sub(self.capacity);

        for (i, row) in rows.iter().enumerate().skip(skip) {
            let base = self.head * self.channel_count;
            let slot = &mut self.values[base..base + self.channel_count];
            for (ch, value) in slot.iter_mut().enumerate() {
                *value = row.get(ch).copied().unwrap_or(0.0);
            }
            self.timestamps[self.head] = timestamps.get(i).copied().unwrap_or(0.0);
            self.head = (self.head + 1) % self.capacity;
        }

        self.total_pushed += rows.len() as u64;
    }

    /// Copy the full window, oldest first
    pub fn snapshot(&self) -> BufferSnapshot {
        self.tail(self.capacity)
    }

    /// The newest `min(n, capacity)` samples, oldest first
    pub fn latest(&self, n: usize) -> BufferSnapshot {
        self.tail(n.min(self.capacity))
    }

    fn tail(&self, n: usize) -> BufferSnapshot {
        let start = (self.head + self.capacity - n) % self.capacity;
        let mut samples = Vec::with_capacity(n);
        let mut timestamps = Vec::with_capacity(n);

        for offset in 0..n {
            let idx = (start + offset) % self.capacity;
            let base = idx * self.channel_count;
            samples.push(self.values[base..base + self.channel_count].to_vec());
            timestamps.push(self.timestamps[idx]);
        }

        BufferSnapshot {
            samples,
            timestamps,
        }
    }

    pub fn len(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }

    pub fn get_metrics(&self) -> BufferMetrics {
        BufferMetrics {
            total_pushed: self.total_pushed,
            total_evicted: self.total_pushed.saturating_sub(self.capacity as u64),
            capacity: self.capacity,
            channel_count: self.channel_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(range: std::ops::Range<usize>) -> (Vec<Vec<f64>>, Vec<f64>) {
        let samples = range
            .clone()
            .map(|i| vec![i as f64, -(i as f64)])
            .collect();
        let timestamps = range.map(|i| i as f64 * 0.01).collect();
        (samples, timestamps)
    }

    #[test]
    fn test_zero_padded_before_full() {
        let mut buffer = ChannelBuffer::new(5, 2);
        let (samples, ts) = rows(1..3);
        buffer.push(&samples, &ts);

        let snap = buffer.snapshot();
        assert_eq!(snap.len(), 5);
        assert_eq!(
            snap.samples,
            vec![
                vec![0.0, 0.0],
                vec![0.0, 0.0],
                vec![0.0, 0.0],
                vec![1.0, -1.0],
                vec![2.0, -2.0],
            ]
        );
        assert_eq!(snap.timestamps[3..], [0.01, 0.02]);
    }

    #[test]
    fn test_holds_last_n_in_order() {
        let mut buffer = ChannelBuffer::new(4, 2);

        // Uneven chunk sizes, including one longer than the window
        for range in [0..3, 3..4, 4..10, 10..11] {
            let (samples, ts) = rows(range);
            buffer.push(&samples, &ts);
            assert_eq!(buffer.snapshot().len(), 4);
        }

        let snap = buffer.snapshot();
        let firsts: Vec<f64> = snap.samples.iter().map(|row| row[0]).collect();
        assert_eq!(firsts, vec![7.0, 8.0, 9.0, 10.0]);
        assert_eq!(buffer.total_pushed(), 11);
        assert_eq!(buffer.get_metrics().total_evicted, 7);
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        let mut buffer = ChannelBuffer::new(3, 2);
        let (samples, ts) = rows(0..2);
        buffer.push(&samples, &ts);

        assert_eq!(buffer.snapshot(), buffer.snapshot());
    }

    #[test]
    fn test_latest() {
        let mut buffer = ChannelBuffer::new(6, 2);
        let (samples, ts) = rows(0..8);
        buffer.push(&samples, &ts);

        let latest = buffer.latest(2);
        assert_eq!(latest.samples, vec![vec![6.0, -6.0], vec![7.0, -7.0]]);
        assert_eq!(buffer.latest(100).len(), 6);
    }

    #[test]
    fn test_window_sizing() {
        assert_eq!(ChannelBuffer::for_window(256.0, 10.0, 5).capacity(), 2560);
        assert_eq!(ChannelBuffer::for_window(64.0, 0.01, 3).capacity(), 1);
        assert_eq!(ChannelBuffer::for_window(10.0, 0.25, 1).capacity(), 3);
    }

    #[test]
    fn test_ragged_rows_are_padded() {
        let mut buffer = ChannelBuffer::new(2, 3);
        buffer.push(&[vec![1.0], vec![1.0, 2.0, 3.0, 4.0]], &[0.0, 0.1]);

        let snap = buffer.snapshot();
        assert_eq!(snap.samples, vec![vec![1.0, 0.0, 0.0], vec![1.0, 2.0, 3.0]]);
    }
}
