//! Digital Filter Designs
//!
//! IIR filters are built as cascades of second-order sections (biquads) for
//! numerical stability: Butterworth lowpass/highpass/bandpass/bandstop and a
//! single-section notch. A Hamming-windowed sinc covers the FIR case.
//!
//! Designs depend on the sample rate, so they are produced once the stream's
//! declared rate is known and never change afterwards.

use crate::streaming::types::{StreamError, StreamResult};
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Filter type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    Lowpass,
    Highpass,
    Bandpass,
    Bandstop,
    Notch,
    FirBandpass,
}

/// Configuration for a filter, independent of sample rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub filter_type: FilterType,
    /// Cutoff frequency in Hz (lowpass/highpass), low band edge, or notch center
    pub frequency: f64,
    /// High band edge, or bandwidth for notch (Q factor = center/bandwidth)
    #[serde(default)]
    pub frequency_high: Option<f64>,
    /// Butterworth order, or tap count for FIR designs
    #[serde(default = "default_order")]
    pub order: usize,
}

fn default_order() -> usize {
    4
}

impl FilterConfig {
    /// Mains rejection used for EEG: 4th-order Butterworth bandstop over 55-65 Hz
    pub fn mains_bandstop() -> Self {
        Self {
            filter_type: FilterType::Bandstop,
            frequency: 55.0,
            frequency_high: Some(65.0),
            order: 4,
        }
    }
}

/// Second-order section (biquad) coefficients
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (1 + a1*z^-1 + a2*z^-2)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    /// Gain at z = 1
    pub fn dc_gain(&self) -> f64 {
        let denom = 1.0 + self.a1 + self.a2;
        if denom.abs() < f64::EPSILON {
            0.0
        } else {
            (self.b0 + self.b1 + self.b2) / denom
        }
    }
}

/// State for a single biquad section (Direct Form II Transposed)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BiquadState {
    z1: f64,
    z2: f64,
}

impl BiquadState {
    /// State the section settles into under a constant input `x`
    pub fn steady(coeffs: &BiquadCoeffs, x: f64) -> Self {
        let y = coeffs.dc_gain() * x;
        let z2 = coeffs.b2 * x - coeffs.a2 * y;
        let z1 = coeffs.b1 * x - coeffs.a1 * y + z2;
        Self { z1, z2 }
    }
}

/// Single biquad filter section
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    coeffs: BiquadCoeffs,
    state: BiquadState,
}

impl BiquadFilter {
    /// Resume a section from previously captured state
    pub fn with_state(coeffs: BiquadCoeffs, state: BiquadState) -> Self {
        Self { coeffs, state }
    }

    /// Process a single sample using Direct Form II Transposed
    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let output = self.coeffs.b0 * input + self.state.z1;
        self.state.z1 = self.coeffs.b1 * input - self.coeffs.a1 * output + self.state.z2;
        self.state.z2 = self.coeffs.b2 * input - self.coeffs.a2 * output;
        output
    }

    pub fn state(&self) -> BiquadState {
        self.state
    }
}

/// Cascaded second-order sections filter
#[derive(Debug, Clone)]
pub struct SosFilter {
    sections: Vec<BiquadFilter>,
}

impl SosFilter {
    /// Rebuild a cascade from coefficients and the per-section state it was left in
    pub fn resume(sections: &[BiquadCoeffs], states: &[BiquadState]) -> Self {
        Self {
            sections: sections
                .iter()
                .zip(states)
                .map(|(coeffs, state)| BiquadFilter::with_state(*coeffs, *state))
                .collect(),
        }
    }

    /// Steady-state section states for a constant input `x`
    pub fn steady_state(sections: &[BiquadCoeffs], x: f64) -> Vec<BiquadState> {
        let mut input = x;
        sections
            .iter()
            .map(|coeffs| {
                let state = BiquadState::steady(coeffs, input);
                input *= coeffs.dc_gain();
                state
            })
            .collect()
    }

    /// Process a single sample through all sections
    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let mut output = input;
        for section in &mut self.sections {
            output = section.process(output);
        }
        output
    }

    /// Process a signal and return a new array (original unchanged)
    pub fn filter(&mut self, signal: &[f64]) -> Vec<f64> {
        signal.iter().map(|&s| self.process(s)).collect()
    }

    pub fn states(&self) -> Vec<BiquadState> {
        self.sections.iter().map(BiquadFilter::state).collect()
    }
}

/// Butterworth filter designer
pub struct ButterworthFilter;

impl ButterworthFilter {
    /// Design a Butterworth lowpass filter
    pub fn lowpass(cutoff: f64, sample_rate: f64, order: usize) -> Vec<BiquadCoeffs> {
        Self::design_lowpass(Self::prewarp(cutoff, sample_rate), order)
    }

    /// Design a Butterworth highpass filter
    pub fn highpass(cutoff: f64, sample_rate: f64, order: usize) -> Vec<BiquadCoeffs> {
        Self::design_highpass(Self::prewarp(cutoff, sample_rate), order)
    }

    /// Design a Butterworth bandpass filter
    pub fn bandpass(low: f64, high: f64, sample_rate: f64, order: usize) -> Vec<BiquadCoeffs> {
        // Bandpass = cascade of highpass and lowpass
        let mut sections = Self::design_highpass(Self::prewarp(low, sample_rate), order);
        sections.extend(Self::design_lowpass(Self::prewarp(high, sample_rate), order));
        sections
    }

    /// Design a Butterworth bandstop filter of prototype order `order`
    /// (the resulting filter has order `2 * order`).
    pub fn bandstop(low: f64, high: f64, sample_rate: f64, order: usize) -> Vec<BiquadCoeffs> {
        let w_low = Self::prewarp(low, sample_rate);
        let w_high = Self::prewarp(high, sample_rate);
        let bandwidth = w_high - w_low;
        let center_sq = w_low * w_high;

        let mut sections = Vec::with_capacity(order);

        // Upper-half-plane prototype poles; their conjugates are covered by
        // pairing each transformed root with its own conjugate.
        for k in 0..order / 2 {
            let theta = PI * (2 * k + order + 1) as f64 / (2 * order) as f64;
            let pole = Complex64::from_polar(1.0, theta);

            // s -> B*s / (s^2 + w0^2) turns (s - p) into s^2 - (B/p)s + w0^2
            let sum = Complex64::new(bandwidth, 0.0) / pole;
            let disc = (sum * sum - 4.0 * center_sq).sqrt();
            for root in [(sum + disc) * 0.5, (sum - disc) * 0.5] {
                sections.push(Self::bandstop_section(
                    -2.0 * root.re,
                    root.norm_sqr(),
                    center_sq,
                ));
            }
        }

        if order % 2 == 1 {
            // Real prototype pole at s = -1
            sections.push(Self::bandstop_section(bandwidth, center_sq, center_sq));
        }

        sections
    }

    /// Prewarp frequency for bilinear transform
    fn prewarp(freq: f64, sample_rate: f64) -> f64 {
        (PI * freq / sample_rate).tan()
    }

    /// Bilinear transform of (s^2 + w0^2) / (s^2 + c1*s + c0), scaled to unit DC gain
    fn bandstop_section(c1: f64, c0: f64, center_sq: f64) -> BiquadCoeffs {
        let a0 = 1.0 + c1 + c0;
        let scale = c0 / center_sq;

        let b0 = scale * (1.0 + center_sq) / a0;
        BiquadCoeffs {
            b0,
            b1: scale * 2.0 * (center_sq - 1.0) / a0,
            b2: b0,
            a1: 2.0 * (c0 - 1.0) / a0,
            a2: (1.0 - c1 + c0) / a0,
        }
    }

    /// Design lowpass second-order sections
    fn design_lowpass(wn: f64, order: usize) -> Vec<BiquadCoeffs> {
        let num_sections = order.div_ceil(2);
        let mut sections = Vec::with_capacity(num_sections);

        for k in 0..num_sections {
            // For odd order, last section is first-order
            if order % 2 == 1 && k == num_sections - 1 {
                // First-order section: H(s) = wn / (s + wn)
                let k_coeff = wn / (1.0 + wn);
                sections.push(BiquadCoeffs {
                    b0: k_coeff,
                    b1: k_coeff,
                    b2: 0.0,
                    a1: (wn - 1.0) / (wn + 1.0),
                    a2: 0.0,
                });
            } else {
                let damping = Self::damping(k, order);
                let wn2 = wn * wn;
                let denom = 1.0 + damping * wn + wn2;

                sections.push(BiquadCoeffs {
                    b0: wn2 / denom,
                    b1: 2.0 * wn2 / denom,
                    b2: wn2 / denom,
                    a1: 2.0 * (wn2 - 1.0) / denom,
                    a2: (1.0 - damping * wn + wn2) / denom,
                });
            }
        }

        sections
    }

    /// Design highpass second-order sections
    fn design_highpass(wn: f64, order: usize) -> Vec<BiquadCoeffs> {
        let num_sections = order.div_ceil(2);
        let mut sections = Vec::with_capacity(num_sections);

        for k in 0..num_sections {
            if order % 2 == 1 && k == num_sections - 1 {
                // First-order highpass
                let k_coeff = 1.0 / (1.0 + wn);
                sections.push(BiquadCoeffs {
                    b0: k_coeff,
                    b1: -k_coeff,
                    b2: 0.0,
                    a1: (wn - 1.0) / (wn + 1.0),
                    a2: 0.0,
                });
            } else {
                let damping = Self::damping(k, order);
                let wn2 = wn * wn;
                let denom = 1.0 + damping * wn + wn2;

                sections.push(BiquadCoeffs {
                    b0: 1.0 / denom,
                    b1: -2.0 / denom,
                    b2: 1.0 / denom,
                    a1: 2.0 * (wn2 - 1.0) / denom,
                    a2: (1.0 - damping * wn + wn2) / denom,
                });
            }
        }

        sections
    }

    /// 2*sin(theta_k) for the k-th conjugate pole pair of an order-N prototype
    fn damping(k: usize, order: usize) -> f64 {
        2.0 * (PI * (2 * k + 1) as f64 / (2 * order) as f64).sin()
    }
}

/// Notch (band-reject) filter for removing specific frequencies
pub struct NotchFilter;

impl NotchFilter {
    /// Design a notch filter to remove a specific frequency
    ///
    /// # Arguments
    /// * `center_freq` - Frequency to remove (Hz)
    /// * `sample_rate` - Sampling rate (Hz)
    /// * `q_factor` - Quality factor (higher = narrower notch, typical: 30-50)
    pub fn design(center_freq: f64, sample_rate: f64, q_factor: f64) -> BiquadCoeffs {
        let w0 = 2.0 * PI * center_freq / sample_rate;
        let bandwidth = w0 / q_factor;

        let cos_w0 = w0.cos();
        let alpha = w0.sin() * (bandwidth / 2.0).sinh();
        let a0 = 1.0 + alpha;

        BiquadCoeffs {
            b0: 1.0 / a0,
            b1: -2.0 * cos_w0 / a0,
            b2: 1.0 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

/// Windowed-sinc FIR designer
pub struct FirFilter;

impl FirFilter {
    /// Hamming-windowed sinc bandpass, normalized to unit gain at the band center.
    /// An even tap count is bumped to the next odd one to keep the design type I.
    pub fn bandpass(low: f64, high: f64, sample_rate: f64, taps: usize) -> Vec<f64> {
        let taps = if taps % 2 == 0 { taps + 1 } else { taps };
        let mid = (taps - 1) as f64 / 2.0;
        let fl = low / sample_rate;
        let fh = high / sample_rate;

        let mut kernel: Vec<f64> = (0..taps)
            .map(|n| {
                let x = n as f64 - mid;
                let ideal = 2.0 * fh * sinc(2.0 * fh * x) - 2.0 * fl * sinc(2.0 * fl * x);
                ideal * hamming(n, taps)
            })
            .collect();

        let center = (fl + fh) / 2.0;
        let response = kernel
            .iter()
            .enumerate()
            .map(|(n, &h)| Complex64::from_polar(h, -2.0 * PI * center * n as f64))
            .sum::<Complex64>()
            .norm();
        if response > f64::EPSILON {
            kernel.iter_mut().for_each(|h| *h /= response);
        }

        kernel
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Symmetric Hamming window value for sample `n` of `len`
pub fn hamming(n: usize, len: usize) -> f64 {
    if len <= 1 {
        return 1.0;
    }
    0.54 - 0.46 * (2.0 * PI * n as f64 / (len - 1) as f64).cos()
}

/// A filter design ready to be run causally
#[derive(Debug, Clone, PartialEq)]
pub enum FilterDesign {
    /// Cascade of biquads. No sections means passthrough.
    Iir(Vec<BiquadCoeffs>),
    /// FIR taps
    Fir(Vec<f64>),
}

impl FilterDesign {
    pub fn passthrough() -> Self {
        Self::Iir(Vec::new())
    }
}

/// Create a filter design from configuration for a given sample rate
pub fn create_filter(config: &FilterConfig, sample_rate: f64) -> StreamResult<FilterDesign> {
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        return Err(StreamError::InvalidConfig(format!(
            "Sample rate must be positive, got {}",
            sample_rate
        )));
    }
    let nyquist = sample_rate / 2.0;

    if !(config.frequency > 0.0 && config.frequency < nyquist) {
        return Err(StreamError::InvalidConfig(format!(
            "Frequency ({} Hz) must be between 0 and Nyquist ({} Hz)",
            config.frequency, nyquist
        )));
    }

    let band_edge = |name: &str| -> StreamResult<f64> {
        let high = config.frequency_high.ok_or_else(|| {
            StreamError::InvalidConfig(format!("{} filter requires frequency_high", name))
        })?;
        if config.frequency >= high {
            return Err(StreamError::InvalidConfig(
                "Low cutoff must be less than high cutoff".to_string(),
            ));
        }
        if high >= nyquist {
            return Err(StreamError::InvalidConfig(format!(
                "High cutoff ({} Hz) must be less than Nyquist ({} Hz)",
                high, nyquist
            )));
        }
        Ok(high)
    };

    let require_order = |minimum: usize| -> StreamResult<usize> {
        if config.order < minimum {
            return Err(StreamError::InvalidConfig(format!(
                "Filter order must be at least {}, got {}",
                minimum, config.order
            )));
        }
        Ok(config.order)
    };

    let design = match config.filter_type {
        FilterType::Lowpass => FilterDesign::Iir(ButterworthFilter::lowpass(
            config.frequency,
            sample_rate,
            require_order(1)?,
        )),
        FilterType::Highpass => FilterDesign::Iir(ButterworthFilter::highpass(
            config.frequency,
            sample_rate,
            require_order(1)?,
        )),
        FilterType::Bandpass => {
            let high = band_edge("Bandpass")?;
            FilterDesign::Iir(ButterworthFilter::bandpass(
                config.frequency,
                high,
                sample_rate,
                require_order(1)?,
            ))
        }
        FilterType::Bandstop => {
            let high = band_edge("Bandstop")?;
            FilterDesign::Iir(ButterworthFilter::bandstop(
                config.frequency,
                high,
                sample_rate,
                require_order(1)?,
            ))
        }
        FilterType::Notch => {
            // Q factor from bandwidth if provided, otherwise default to 30
            let q = config
                .frequency_high
                .map(|bw| config.frequency / bw)
                .unwrap_or(30.0);
            FilterDesign::Iir(vec![NotchFilter::design(config.frequency, sample_rate, q)])
        }
        FilterType::FirBandpass => {
            let high = band_edge("FIR bandpass")?;
            FilterDesign::Fir(FirFilter::bandpass(
                config.frequency,
                high,
                sample_rate,
                require_order(3)?,
            ))
        }
    };

    Ok(design)
}

#[cfg(test)]
impl BiquadCoeffs {
    /// Both poles strictly inside the unit circle (Jury conditions)
    fn is_stable(&self) -> bool {
        self.a2.abs() < 1.0 && self.a1.abs() < 1.0 + self.a2
    }
}

#[cfg(test)]
impl SosFilter {
    fn new(sections: Vec<BiquadCoeffs>) -> Self {
        Self::resume(&sections, &vec![BiquadState::default(); sections.len()])
    }

    fn reset(&mut self) {
        for section in &mut self.sections {
            section.state = BiquadState::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, sample_rate: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f64 / sample_rate).sin())
            .collect()
    }

    fn rms(signal: &[f64]) -> f64 {
        (signal.iter().map(|x| x * x).sum::<f64>() / signal.len() as f64).sqrt()
    }

    fn fir(signal: &[f64], taps: &[f64]) -> Vec<f64> {
        (0..signal.len())
            .map(|n| {
                taps.iter()
                    .enumerate()
                    .filter(|(k, _)| *k <= n)
                    .map(|(k, h)| h * signal[n - k])
                    .sum()
            })
            .collect()
    }

    #[test]
    fn test_lowpass_filter() {
        let mut filter = SosFilter::new(ButterworthFilter::lowpass(10.0, 100.0, 2));

        // DC should pass through
        let out = filter.filter(&[1.0; 500]);
        assert!((out[499] - 1.0).abs() < 1e-6);

        filter.reset();
        let high = filter.filter(&sine(40.0, 100.0, 1000));
        assert!(rms(&high[500..]) < 0.1);
    }

    #[test]
    fn test_highpass_blocks_dc() {
        let mut filter = SosFilter::new(ButterworthFilter::highpass(1.0, 256.0, 3));
        let out = filter.filter(&[1.0; 4000]);
        assert!(out[3999].abs() < 1e-3);
    }

    #[test]
    fn test_designs_are_stable() {
        let designs = [
            ButterworthFilter::lowpass(30.0, 256.0, 5),
            ButterworthFilter::highpass(0.5, 256.0, 4),
            ButterworthFilter::bandpass(1.0, 40.0, 256.0, 4),
            ButterworthFilter::bandstop(55.0, 65.0, 256.0, 4),
            ButterworthFilter::bandstop(45.0, 55.0, 500.0, 3),
        ];
        for sections in designs {
            assert!(sections.iter().all(BiquadCoeffs::is_stable));
        }
    }

    #[test]
    fn test_bandstop_rejects_mains() {
        let sections = ButterworthFilter::bandstop(55.0, 65.0, 256.0, 4);
        assert_eq!(sections.len(), 4);

        let mut filter = SosFilter::new(sections);
        let mains = filter.filter(&sine(60.0, 256.0, 2048));
        assert!(rms(&mains[1024..]) < rms(&sine(60.0, 256.0, 1024)) * 0.1);

        filter.reset();
        let alpha = filter.filter(&sine(10.0, 256.0, 2048));
        let ratio = rms(&alpha[1024..]) / rms(&sine(10.0, 256.0, 1024));
        assert!((ratio - 1.0).abs() < 0.05, "passband ratio {}", ratio);
    }

    #[test]
    fn test_notch_filter() {
        let sample_rate = 1000.0;
        let notch_freq = 50.0;
        let mut filter = SosFilter::new(vec![NotchFilter::design(notch_freq, sample_rate, 30.0)]);

        let signal = sine(notch_freq, sample_rate, 1000);
        let filtered = filter.filter(&signal);

        assert!(
            rms(&filtered) < rms(&signal) * 0.1,
            "Notch filter should attenuate 50Hz"
        );
    }

    #[test]
    fn test_steady_state_has_no_transient() {
        let sections = ButterworthFilter::bandstop(55.0, 65.0, 256.0, 4);
        let states = SosFilter::steady_state(&sections, 3.5);
        let mut filter = SosFilter::resume(&sections, &states);

        for y in filter.filter(&[3.5; 64]) {
            assert!((y - 3.5).abs() < 1e-9);
        }
    }

    #[test]
    fn test_fir_bandpass() {
        let taps = FirFilter::bandpass(8.0, 30.0, 256.0, 100);
        assert_eq!(taps.len(), 101);

        let passed = fir(&sine(19.0, 256.0, 1024), &taps);
        assert!((rms(&passed[200..]) / rms(&sine(19.0, 256.0, 824)) - 1.0).abs() < 0.05);

        let dc = fir(&[1.0; 512], &taps);
        assert!(dc[511].abs() < 0.05);
    }

    #[test]
    fn test_create_filter_validation() {
        let mut config = FilterConfig::mains_bandstop();
        assert!(matches!(
            create_filter(&config, 64.0),
            Err(StreamError::InvalidConfig(_))
        ));
        assert!(create_filter(&config, 256.0).is_ok());

        config.frequency_high = None;
        assert!(create_filter(&config, 256.0).is_err());

        config.frequency_high = Some(50.0);
        assert!(create_filter(&config, 256.0).is_err());

        let lowpass = FilterConfig {
            filter_type: FilterType::Lowpass,
            frequency: 40.0,
            frequency_high: None,
            order: 0,
        };
        assert!(create_filter(&lowpass, 256.0).is_err());
        assert!(create_filter(&lowpass, 0.0).is_err());
    }

    #[test]
    fn test_filter_config_defaults_from_json() {
        let config: FilterConfig =
            serde_json::from_str(r#"{"filter_type":"notch","frequency":50.0}"#).unwrap();
        assert_eq!(config.order, 4);
        assert_eq!(config.frequency_high, None);
        assert!(matches!(
            create_filter(&config, 250.0),
            Ok(FilterDesign::Iir(ref s)) if s.len() == 1
        ));
    }
}
