// Dashboard snapshot: raw rolling windows plus their spectra

use crate::signal_processing::spectral::{BandPowers, SpectralAnalyzer};
use crate::streaming::buffer::BufferSnapshot;
use serde::{Deserialize, Serialize};

/// Periodic overview of both streams, sent to dashboard subscribers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub eeg_sample_rate: f64,
    pub ppg_sample_rate: f64,
    /// `[sample][channel]`, oldest first
    pub eeg_buffer: Vec<Vec<f64>>,
    pub ppg_buffer: Vec<Vec<f64>>,
    /// `[bucket][channel]`
    pub eeg_fft: Vec<Vec<f64>>,
    pub eeg_frequency_buckets: Vec<f64>,
    pub eeg_bands: BandPowers,
    pub ppg_fft: Vec<Vec<f64>>,
    pub ppg_frequency_buckets: Vec<f64>,
}

/// Latest window of one stream together with its rate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamWindow {
    pub sample_rate: f64,
    pub snapshot: BufferSnapshot,
}

impl DashboardSnapshot {
    pub fn build(analyzer: &SpectralAnalyzer, eeg: &StreamWindow, ppg: &StreamWindow) -> Self {
        let eeg_spectrum = analyzer.analyze(&eeg.snapshot.samples, eeg.sample_rate);
        let ppg_spectrum = analyzer.analyze(&ppg.snapshot.samples, ppg.sample_rate);

        Self {
            eeg_sample_rate: eeg.sample_rate,
            ppg_sample_rate: ppg.sample_rate,
            eeg_buffer: eeg.snapshot.samples.clone(),
            ppg_buffer: ppg.snapshot.samples.clone(),
            eeg_fft: eeg_spectrum.psd,
            eeg_frequency_buckets: eeg_spectrum.frequency_buckets,
            eeg_bands: eeg_spectrum.band_powers,
            ppg_fft: ppg_spectrum.psd,
            ppg_frequency_buckets: ppg_spectrum.frequency_buckets,
        }
    }
}
