// Synthetic EEG/PPG source paced by the wall clock
//
// EEG channels carry a 10 Hz alpha rhythm, 60 Hz mains pickup and uniform
// noise. PPG channels carry a pulse wave near 72 bpm. Samples become
// available at the nominal rate as real time passes, so pulls behave like a
// live device.

use super::{AcquisitionSource, StreamHandle};
use crate::streaming::types::{wall_clock_seconds, SampleChunk, SignalType, StreamResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use tokio::time::Instant;

/// Synthetic source configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub eeg_sample_rate: f64,
    pub eeg_channels: usize,
    pub ppg_sample_rate: f64,
    pub ppg_channels: usize,
    pub alpha_hz: f64,
    pub mains_hz: f64,
    pub heart_rate_hz: f64,
    /// Peak-to-peak amplitude of the uniform noise
    pub noise: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            eeg_sample_rate: 256.0,
            eeg_channels: 5,
            ppg_sample_rate: 64.0,
            ppg_channels: 3,
            alpha_hz: 10.0,
            mains_hz: 60.0,
            heart_rate_hz: 1.2,
            noise: 10.0,
        }
    }
}

struct GeneratorState {
    rng: StdRng,
    eeg_emitted: u64,
    ppg_emitted: u64,
}

/// Software stand-in for an EEG headset with a PPG sensor
pub struct SyntheticSource {
    config: SyntheticConfig,
    started: Instant,
    start_timestamp: f64,
    state: Mutex<GeneratorState>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Reproducible noise
    pub fn with_seed(config: SyntheticConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: SyntheticConfig, rng: StdRng) -> Self {
        Self {
            config,
            started: Instant::now(),
            start_timestamp: wall_clock_seconds(),
            state: Mutex::new(GeneratorState {
                rng,
                eeg_emitted: 0,
                ppg_emitted: 0,
            }),
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    fn rate(&self, signal_type: SignalType) -> f64 {
        match signal_type {
            SignalType::Eeg => self.config.eeg_sample_rate,
            SignalType::Ppg => self.config.ppg_sample_rate,
        }
    }

    fn channels(&self, signal_type: SignalType) -> usize {
        match signal_type {
            SignalType::Eeg => self.config.eeg_channels,
            SignalType::Ppg => self.config.ppg_channels,
        }
    }

    /// One row of channel values `t` seconds after start
    fn sample(&self, signal_type: SignalType, t: f64, rng: &mut StdRng) -> Vec<f64> {
        let half_noise = self.config.noise / 2.0;
        (0..self.channels(signal_type))
            .map(|ch| {
                let noise = if half_noise > 0.0 {
                    rng.random_range(-half_noise..half_noise)
                } else {
                    0.0
                };
                match signal_type {
                    SignalType::Eeg => {
                        20.0 * (2.0 * PI * self.config.alpha_hz * t + ch as f64 * 0.3).sin()
                            + 8.0 * (2.0 * PI * self.config.mains_hz * t).sin()
                            + noise
                    }
                    SignalType::Ppg => {
                        let phase = (2.0 * PI * self.config.heart_rate_hz * t).sin().max(0.0);
                        500.0 + 50.0 * ch as f64 + 200.0 * phase.powi(3) + noise
                    }
                }
            })
            .collect()
    }
}

#[async_trait]
impl AcquisitionSource for SyntheticSource {
    async fn discover(&self, signal_type: SignalType) -> StreamResult<Option<StreamHandle>> {
        Ok(Some(StreamHandle::new(
            signal_type,
            format!("synthetic-{}", signal_type.as_str().to_lowercase()),
        )))
    }

    fn nominal_sample_rate(&self, handle: &StreamHandle) -> f64 {
        self.rate(handle.signal_type)
    }

    fn channel_count(&self, handle: &StreamHandle) -> usize {
        self.channels(handle.signal_type)
    }

    async fn pull_chunk(
        &self,
        handle: &StreamHandle,
        max_samples: usize,
    ) -> StreamResult<SampleChunk> {
        let signal_type = handle.signal_type;
        let rate = self.rate(signal_type);
        let due_total = (self.started.elapsed().as_secs_f64() * rate).floor() as u64;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let emitted = match signal_type {
            SignalType::Eeg => &mut state.eeg_emitted,
            SignalType::Ppg => &mut state.ppg_emitted,
        };

        let count = due_total.saturating_sub(*emitted).min(max_samples as u64);
        let mut chunk = SampleChunk::default();
        for index in *emitted..*emitted + count {
            let t = index as f64 / rate;
            chunk.values.push(self.sample(signal_type, t, &mut state.rng));
            chunk.timestamps.push(self.start_timestamp + t);
        }
        *emitted += count;

        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_paced_by_clock() {
        let source = SyntheticSource::with_seed(SyntheticConfig::default(), 1);
        let eeg = source.discover(SignalType::Eeg).await.unwrap().unwrap();

        assert!(source.pull_chunk(&eeg, 1000).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_millis(500)).await;
        let chunk = source.pull_chunk(&eeg, 1000).await.unwrap();
        assert_eq!(chunk.len(), 128);
        assert!(chunk.values.iter().all(|row| row.len() == 5));

        // Capped by max_samples, remainder delivered next time
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(source.pull_chunk(&eeg, 100).await.unwrap().len(), 100);
        assert_eq!(source.pull_chunk(&eeg, 100).await.unwrap().len(), 28);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timestamps_are_evenly_spaced() {
        let source = SyntheticSource::with_seed(SyntheticConfig::default(), 2);
        let ppg = source.discover(SignalType::Ppg).await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        let chunk = source.pull_chunk(&ppg, 1000).await.unwrap();
        assert_eq!(chunk.len(), 64);
        for pair in chunk.timestamps.windows(2) {
            assert!((pair[1] - pair[0] - 1.0 / 64.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_noise_free_waveform() {
        let config = SyntheticConfig {
            noise: 0.0,
            ..Default::default()
        };
        let source = SyntheticSource::with_seed(config, 3);
        let mut rng = StdRng::seed_from_u64(0);

        let eeg = source.sample(SignalType::Eeg, 0.0, &mut rng);
        assert_eq!(eeg.len(), 5);
        assert_eq!(eeg[0], 0.0);

        let ppg = source.sample(SignalType::Ppg, 0.0, &mut rng);
        assert_eq!(ppg, vec![500.0, 550.0, 600.0]);
    }
}
