//! Filtering and spectral analysis for multi-channel sample streams.
//!
//! - [`filters`]: Butterworth, notch and FIR designs
//! - [`causal_filter`]: chunk-by-chunk filtering with carried state
//! - [`spectral`]: amplitude spectra and EEG band power

pub mod causal_filter;
pub mod filters;
pub mod spectral;

pub use causal_filter::{CausalFilter, FilterState};
pub use filters::{create_filter, FilterConfig, FilterDesign, FilterType};
pub use spectral::{BandPowers, FrequencyBand, SpectralAnalyzer, SpectralResult};
