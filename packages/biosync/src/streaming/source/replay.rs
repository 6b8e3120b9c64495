// CSV replay source that simulates a live device
//
// Reads a recording with the layout
//   timestamp, eeg_1..eeg_N, ppg_1..ppg_M
// sampled at the EEG rate, and replays it in real time. PPG is taken from
// every k-th row where k = round(eeg_rate / ppg_rate). Playback loops at end
// of file with timestamps shifted by one recording length per pass, so they
// keep increasing.

use super::{AcquisitionSource, StreamHandle};
use crate::streaming::types::{
    wall_clock_seconds, SampleChunk, SignalType, StreamError, StreamResult,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokio::time::Instant;

/// Replay configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayConfig {
    pub eeg_sample_rate: f64,
    pub ppg_sample_rate: f64,
    pub eeg_channels: usize,
    pub ppg_channels: usize,
    pub loop_playback: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            eeg_sample_rate: 256.0,
            ppg_sample_rate: 64.0,
            eeg_channels: 5,
            ppg_channels: 3,
            loop_playback: true,
        }
    }
}

#[derive(Default)]
struct Cursors {
    eeg: u64,
    ppg: u64,
}

pub struct ReplaySource {
    path: PathBuf,
    config: ReplayConfig,
    timestamps: Vec<f64>,
    eeg_rows: Vec<Vec<f64>>,
    ppg_rows: Vec<Vec<f64>>,
    /// File row index behind each PPG row
    ppg_source_rows: Vec<usize>,
    /// Time covered by one pass through the file
    period: f64,
    started: Instant,
    start_timestamp: f64,
    cursors: Mutex<Cursors>,
}

impl ReplaySource {
    /// Load the whole recording into memory
    pub fn open(path: impl AsRef<Path>, config: ReplayConfig) -> StreamResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !(config.eeg_sample_rate > 0.0 && config.ppg_sample_rate > 0.0) {
            return Err(StreamError::InvalidConfig(
                "Replay sample rates must be positive".to_string(),
            ));
        }

        let mut reader = csv::Reader::from_path(&path)?;
        let width = 1 + config.eeg_channels + config.ppg_channels;

        let mut timestamps = Vec::new();
        let mut eeg_rows = Vec::new();
        let mut all_ppg = Vec::new();

        for (line, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() < width {
                return Err(StreamError::Parse(format!(
                    "{} row {}: expected {} columns, found {}",
                    path.display(),
                    line + 1,
                    width,
                    record.len()
                )));
            }

            let mut values = Vec::with_capacity(width);
            for field in record.iter().take(width) {
                let value = field.trim().parse::<f64>().map_err(|e| {
                    StreamError::Parse(format!(
                        "{} row {}: '{}': {}",
                        path.display(),
                        line + 1,
                        field,
                        e
                    ))
                })?;
                values.push(value);
            }

            timestamps.push(values[0]);
            eeg_rows.push(values[1..1 + config.eeg_channels].to_vec());
            all_ppg.push(values[1 + config.eeg_channels..].to_vec());
        }

        if timestamps.is_empty() {
            return Err(StreamError::Parse(format!(
                "{} contains no samples",
                path.display()
            )));
        }

        let step = (config.eeg_sample_rate / config.ppg_sample_rate)
            .round()
            .max(1.0) as usize;
        let ppg_source_rows: Vec<usize> = (0..timestamps.len()).step_by(step).collect();
        let ppg_rows = ppg_source_rows.iter().map(|&i| all_ppg[i].clone()).collect();

        let first = timestamps[0];
        let last = timestamps[timestamps.len() - 1];
        let period = (last - first) + 1.0 / config.eeg_sample_rate;

        log::info!(
            "Loaded replay file {}: {} rows ({:.1} s)",
            path.display(),
            timestamps.len(),
            period
        );

        Ok(Self {
            path,
            config,
            timestamps,
            eeg_rows,
            ppg_rows,
            ppg_source_rows,
            period,
            started: Instant::now(),
            start_timestamp: wall_clock_seconds(),
            cursors: Mutex::new(Cursors::default()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> usize {
        self.timestamps.len()
    }

    fn rate(&self, signal_type: SignalType) -> f64 {
        match signal_type {
            SignalType::Eeg => self.config.eeg_sample_rate,
            SignalType::Ppg => self.config.ppg_sample_rate,
        }
    }

    /// Row values and re-based timestamp for the `index`-th sample of a stream
    fn row(&self, signal_type: SignalType, index: u64) -> (&[f64], f64) {
        let (rows, len) = match signal_type {
            SignalType::Eeg => (&self.eeg_rows, self.eeg_rows.len()),
            SignalType::Ppg => (&self.ppg_rows, self.ppg_rows.len()),
        };
        let pass = index / len as u64;
        let offset = (index % len as u64) as usize;
        let file_row = match signal_type {
            SignalType::Eeg => offset,
            SignalType::Ppg => self.ppg_source_rows[offset],
        };

        let timestamp = self.start_timestamp
            + (self.timestamps[file_row] - self.timestamps[0])
            + pass as f64 * self.period;
        (&rows[offset], timestamp)
    }

    fn stream_len(&self, signal_type: SignalType) -> u64 {
        match signal_type {
            SignalType::Eeg => self.eeg_rows.len() as u64,
            SignalType::Ppg => self.ppg_rows.len() as u64,
        }
    }
}

#[async_trait]
impl AcquisitionSource for ReplaySource {
    async fn discover(&self, signal_type: SignalType) -> StreamResult<Option<StreamHandle>> {
        Ok(Some(StreamHandle::new(
            signal_type,
            format!("replay-{}", signal_type.as_str().to_lowercase()),
        )))
    }

    fn nominal_sample_rate(&self, handle: &StreamHandle) -> f64 {
        self.rate(handle.signal_type)
    }

    fn channel_count(&self, handle: &StreamHandle) -> usize {
        match handle.signal_type {
            SignalType::Eeg => self.config.eeg_channels,
            SignalType::Ppg => self.config.ppg_channels,
        }
    }

    async fn pull_chunk(
        &self,
        handle: &StreamHandle,
        max_samples: usize,
    ) -> StreamResult<SampleChunk> {
        let signal_type = handle.signal_type;
        let mut due =
            (self.started.elapsed().as_secs_f64() * self.rate(signal_type)).floor() as u64;
        if !self.config.loop_playback {
            due = due.min(self.stream_len(signal_type));
        }

        let mut cursors = self.cursors.lock();
        let cursor = match signal_type {
            SignalType::Eeg => &mut cursors.eeg,
            SignalType::Ppg => &mut cursors.ppg,
        };

        let count = due.saturating_sub(*cursor).min(max_samples as u64);
        let mut chunk = SampleChunk::default();
        for index in *cursor..*cursor + count {
            let (values, timestamp) = self.row(signal_type, index);
            chunk.values.push(values.to_vec());
            chunk.timestamps.push(timestamp);
        }
        *cursor += count;

        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn recording(rows: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "timestamp,e1,e2,p1").unwrap();
        for i in 0..rows {
            writeln!(file, "{},{},{},{}", i as f64 * 0.25, i, -(i as i64), 100 + i).unwrap();
        }
        file
    }

    fn config() -> ReplayConfig {
        ReplayConfig {
            eeg_sample_rate: 4.0,
            ppg_sample_rate: 2.0,
            eeg_channels: 2,
            ppg_channels: 1,
            loop_playback: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_loops_with_increasing_timestamps() {
        let file = recording(4);
        let source = ReplaySource::open(file.path(), config()).unwrap();
        let eeg = source.discover(SignalType::Eeg).await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        let chunk = source.pull_chunk(&eeg, 100).await.unwrap();

        assert_eq!(chunk.len(), 8);
        let firsts: Vec<f64> = chunk.values.iter().map(|row| row[0]).collect();
        assert_eq!(firsts, vec![0.0, 1.0, 2.0, 3.0, 0.0, 1.0, 2.0, 3.0]);
        for pair in chunk.timestamps.windows(2) {
            assert!((pair[1] - pair[0] - 0.25).abs() < 1e-6);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ppg_is_decimated() {
        let file = recording(4);
        let source = ReplaySource::open(file.path(), config()).unwrap();
        let ppg = source.discover(SignalType::Ppg).await.unwrap().unwrap();
        assert_eq!(source.channel_count(&ppg), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        let chunk = source.pull_chunk(&ppg, 100).await.unwrap();
        assert_eq!(chunk.values, vec![vec![100.0], vec![102.0]]);
        assert!((chunk.timestamps[1] - chunk.timestamps[0] - 0.5).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_loop_stops_at_end() {
        let file = recording(4);
        let source = ReplaySource::open(
            file.path(),
            ReplayConfig {
                loop_playback: false,
                ..config()
            },
        )
        .unwrap();
        let eeg = source.discover(SignalType::Eeg).await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(source.pull_chunk(&eeg, 100).await.unwrap().len(), 4);
        assert!(source.pull_chunk(&eeg, 100).await.unwrap().is_empty());
    }

    #[test]
    fn test_rejects_malformed_rows() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "timestamp,e1,e2,p1").unwrap();
        writeln!(file, "0.0,1.0,abc,3.0").unwrap();
        assert!(matches!(
            ReplaySource::open(file.path(), config()),
            Err(StreamError::Parse(_))
        ));

        let empty = recording(0);
        assert!(ReplaySource::open(empty.path(), config()).is_err());
    }
}
