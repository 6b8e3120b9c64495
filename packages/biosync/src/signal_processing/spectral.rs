//! Spectral Analysis
//!
//! Windowed FFT magnitude spectrum and EEG band power over a rolling buffer.
//! Each channel is demeaned, Hamming-windowed and zero-padded to the next
//! power of two. The one-sided magnitude is scaled by `2 / window_length`.

use super::filters::hamming;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

// Thread-local FFT planner for efficient reuse across parallel computations
thread_local! {
    static FFT_PLANNER: RefCell<FftPlanner<f64>> = RefCell::new(FftPlanner::new());
}

/// Canonical EEG frequency bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyBand {
    Delta,
    Theta,
    Alpha,
    Beta,
    Gamma,
}

impl FrequencyBand {
    pub const ALL: [FrequencyBand; 5] = [
        FrequencyBand::Delta,
        FrequencyBand::Theta,
        FrequencyBand::Alpha,
        FrequencyBand::Beta,
        FrequencyBand::Gamma,
    ];

    /// Half-open range `[low, high)` in Hz
    pub fn range(&self) -> (f64, f64) {
        match self {
            Self::Delta => (1.0, 4.0),
            Self::Theta => (4.0, 8.0),
            Self::Alpha => (8.0, 12.0),
            Self::Beta => (12.0, 30.0),
            Self::Gamma => (30.0, 80.0),
        }
    }

    pub fn contains(&self, frequency: f64) -> bool {
        let (low, high) = self.range();
        frequency >= low && frequency < high
    }
}

/// Peak spectral magnitude per band, one value per channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandPowers {
    pub delta: Vec<f64>,
    pub theta: Vec<f64>,
    pub alpha: Vec<f64>,
    pub beta: Vec<f64>,
    pub gamma: Vec<f64>,
}

impl BandPowers {
    pub fn get(&self, band: FrequencyBand) -> &[f64] {
        match band {
            FrequencyBand::Delta => &self.delta,
            FrequencyBand::Theta => &self.theta,
            FrequencyBand::Alpha => &self.alpha,
            FrequencyBand::Beta => &self.beta,
            FrequencyBand::Gamma => &self.gamma,
        }
    }

    fn get_mut(&mut self, band: FrequencyBand) -> &mut Vec<f64> {
        match band {
            FrequencyBand::Delta => &mut self.delta,
            FrequencyBand::Theta => &mut self.theta,
            FrequencyBand::Alpha => &mut self.alpha,
            FrequencyBand::Beta => &mut self.beta,
            FrequencyBand::Gamma => &mut self.gamma,
        }
    }
}

/// Output of one analysis pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectralResult {
    /// `psd[bucket][channel]`
    pub psd: Vec<Vec<f64>>,
    /// Center frequency of each bucket, `linspace(0, fs/2, nfft/2)`
    pub frequency_buckets: Vec<f64>,
    pub band_powers: BandPowers,
}

/// Stateless FFT band-power analyzer
#[derive(Debug, Clone, Copy, Default)]
pub struct SpectralAnalyzer;

impl SpectralAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze a sample-major window (`samples[sample][channel]`)
    pub fn analyze(&self, samples: &[Vec<f64>], sample_rate: f64) -> SpectralResult {
        let Some(first) = samples.first() else {
            return SpectralResult::default();
        };
        let channel_count = first.len();
        let window_len = samples.len();
        let nfft = window_len.next_power_of_two();
        let half = nfft / 2;

        let spectra: Vec<Vec<f64>> = (0..channel_count)
            .into_par_iter()
            .map(|ch| {
                let column: Vec<f64> = samples
                    .iter()
                    .map(|row| row.get(ch).copied().unwrap_or(0.0))
                    .collect();
                Self::channel_spectrum(&column, nfft)
            })
            .collect();

        let frequency_buckets = linspace(0.0, sample_rate / 2.0, half);

        let psd = (0..half)
            .map(|bucket| spectra.iter().map(|spectrum| spectrum[bucket]).collect())
            .collect();

        let mut band_powers = BandPowers::default();
        for band in FrequencyBand::ALL {
            *band_powers.get_mut(band) = spectra
                .iter()
                .map(|spectrum| {
                    frequency_buckets
                        .iter()
                        .zip(spectrum)
                        .filter(|(freq, _)| band.contains(**freq))
                        .map(|(_, &power)| power)
                        .fold(0.0, f64::max)
                })
                .collect();
        }

        SpectralResult {
            psd,
            frequency_buckets,
            band_powers,
        }
    }

    /// One-sided scaled magnitude of a single channel, `nfft / 2` long
    fn channel_spectrum(column: &[f64], nfft: usize) -> Vec<f64> {
        let len = column.len();
        let mean = column.iter().sum::<f64>() / len as f64;

        let mut buffer: Vec<Complex<f64>> = column
            .iter()
            .enumerate()
            .map(|(i, &x)| Complex::new((x - mean) * hamming(i, len), 0.0))
            .collect();
        buffer.resize(nfft, Complex::new(0.0, 0.0));

        FFT_PLANNER.with(|planner| {
            let fft = planner.borrow_mut().plan_fft_forward(nfft);
            fft.process(&mut buffer);
        });

        buffer
            .iter()
            .take(nfft / 2)
            .map(|c| 2.0 * c.norm() / len as f64)
            .collect()
    }
}

/// `count` evenly spaced values from `start` to `end` inclusive
fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (count - 1) as f64;
            (0..count).map(|i| start + step * i as f64).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sines(freqs: &[f64], sample_rate: f64, len: usize) -> Vec<Vec<f64>> {
        (0..len)
            .map(|i| {
                let t = i as f64 / sample_rate;
                freqs.iter().map(|f| (2.0 * PI * f * t).sin()).collect()
            })
            .collect()
    }

    #[test]
    fn test_zero_buffer_has_zero_power() {
        let result = SpectralAnalyzer::new().analyze(&vec![vec![0.0; 4]; 2560], 256.0);

        for band in FrequencyBand::ALL {
            assert_eq!(result.band_powers.get(band), &[0.0; 4]);
        }
        assert!(result.psd.iter().flatten().all(|&p| p == 0.0));
    }

    #[test]
    fn test_alpha_sine_peaks_in_alpha() {
        let result = SpectralAnalyzer::new().analyze(&sines(&[10.0], 256.0, 512), 256.0);
        let bands = &result.band_powers;

        assert!(bands.alpha[0] > 10.0 * bands.theta[0]);
        assert!(bands.alpha[0] > 10.0 * bands.beta[0]);
        // Coherent gain of the Hamming window
        assert!((bands.alpha[0] - 0.54).abs() < 0.02, "{}", bands.alpha[0]);
    }

    #[test]
    fn test_bands_per_channel() {
        let result = SpectralAnalyzer::new().analyze(&sines(&[6.0, 20.0], 256.0, 512), 256.0);
        let bands = &result.band_powers;

        assert!(bands.theta[0] > bands.delta[0] && bands.theta[0] > bands.alpha[0]);
        assert!(bands.beta[1] > bands.alpha[1] && bands.beta[1] > bands.gamma[1]);
    }

    #[test]
    fn test_dc_offset_is_removed() {
        let samples = vec![vec![42.0]; 256];
        let result = SpectralAnalyzer::new().analyze(&samples, 256.0);
        assert!(result.psd.iter().all(|row| row[0].abs() < 1e-12));
    }

    #[test]
    fn test_buckets_and_layout() {
        let result = SpectralAnalyzer::new().analyze(&sines(&[5.0, 5.0, 5.0], 64.0, 300), 64.0);

        assert_eq!(result.frequency_buckets.len(), 256);
        assert_eq!(result.frequency_buckets[0], 0.0);
        assert!((result.frequency_buckets[255] - 32.0).abs() < 1e-9);
        assert_eq!(result.psd.len(), 256);
        assert!(result.psd.iter().all(|row| row.len() == 3));
        // Nothing above 32 Hz, so gamma only sees 30-32 Hz
        assert_eq!(result.band_powers.gamma.len(), 3);
    }

    #[test]
    fn test_empty_input() {
        let result = SpectralAnalyzer::new().analyze(&[], 256.0);
        assert!(result.psd.is_empty());
        assert!(result.frequency_buckets.is_empty());
        assert!(result.band_powers.alpha.is_empty());
    }

    #[test]
    fn test_band_edges_are_half_open() {
        assert!(FrequencyBand::Alpha.contains(8.0));
        assert!(!FrequencyBand::Alpha.contains(12.0));
        assert!(FrequencyBand::Beta.contains(12.0));
        assert!(!FrequencyBand::Delta.contains(0.5));
    }
}
