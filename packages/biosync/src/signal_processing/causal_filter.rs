//! Causal multi-channel filtering with explicit carried state
//!
//! `CausalFilter` holds only the immutable design. Everything that changes
//! from one chunk to the next lives in the `FilterState` value that each call
//! consumes and returns, so a stream can be filtered chunk by chunk with the
//! same result as filtering it in one pass.

use super::filters::{BiquadState, FilterDesign, SosFilter};
use crate::streaming::types::{StreamError, StreamResult};
use rayon::prelude::*;
use std::collections::VecDeque;

/// Per-channel state of one filter
#[derive(Debug, Clone, PartialEq)]
enum ChannelState {
    Iir(Vec<BiquadState>),
    /// Most recent inputs, newest first, `taps - 1` long
    Fir(VecDeque<f64>),
}

/// Opaque filter state for every channel of a stream.
///
/// The default value is uninitialised; the next non-empty chunk seeds it from
/// the filter's steady-state response to that chunk's first sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterState {
    channels: Vec<ChannelState>,
}

impl FilterState {
    pub fn is_initialized(&self) -> bool {
        !self.channels.is_empty()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// Linear time-invariant filter applied independently to each channel
#[derive(Debug, Clone)]
pub struct CausalFilter {
    design: FilterDesign,
    channel_count: usize,
}

impl CausalFilter {
    pub fn new(design: FilterDesign, channel_count: usize) -> Self {
        Self {
            design,
            channel_count,
        }
    }

    /// Identity filter
    pub fn passthrough(channel_count: usize) -> Self {
        Self::new(FilterDesign::passthrough(), channel_count)
    }

    pub fn design(&self) -> &FilterDesign {
        &self.design
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Filter a sample-major chunk (`chunk[sample][channel]`), resuming from
    /// `state`. Returns the filtered chunk and the state to pass next time.
    pub fn ingest(
        &self,
        chunk: &[Vec<f64>],
        state: Option<FilterState>,
    ) -> StreamResult<(Vec<Vec<f64>>, FilterState)> {
        let state = state.unwrap_or_default();

        if state.is_initialized() && state.channel_count() != self.channel_count {
            return Err(StreamError::ShapeMismatch {
                context: "filter state",
                expected: self.channel_count,
                actual: state.channel_count(),
            });
        }
        if let Some(row) = chunk.iter().find(|row| row.len() != self.channel_count) {
            return Err(StreamError::ShapeMismatch {
                context: "chunk row",
                expected: self.channel_count,
                actual: row.len(),
            });
        }

        if chunk.is_empty() {
            return Ok((Vec::new(), state));
        }

        let channels = if state.is_initialized() {
            state.channels
        } else {
            chunk[0].iter().map(|&x| self.steady_state(x)).collect()
        };

        // Channels are independent, so filter column by column in parallel
        let (columns, channels): (Vec<Vec<f64>>, Vec<ChannelState>) = channels
            .into_par_iter()
            .enumerate()
            .map(|(ch, channel_state)| {
                let column: Vec<f64> = chunk.iter().map(|row| row[ch]).collect();
                self.run_channel(&column, channel_state)
            })
            .unzip();

        let filtered = (0..chunk.len())
            .map(|i| columns.iter().map(|column| column[i]).collect())
            .collect();

        Ok((filtered, FilterState { channels }))
    }

    fn steady_state(&self, x: f64) -> ChannelState {
        match &self.design {
            FilterDesign::Iir(sections) => ChannelState::Iir(SosFilter::steady_state(sections, x)),
            FilterDesign::Fir(taps) => {
                ChannelState::Fir(VecDeque::from(vec![x; taps.len().saturating_sub(1)]))
            }
        }
    }

    fn run_channel(&self, column: &[f64], state: ChannelState) -> (Vec<f64>, ChannelState) {
        match (&self.design, state) {
            (FilterDesign::Iir(sections), ChannelState::Iir(states)) => {
                let mut filter = SosFilter::resume(sections, &states);
                let out = filter.filter(column);
                (out, ChannelState::Iir(filter.states()))
            }
            (FilterDesign::Fir(taps), ChannelState::Fir(mut history)) => {
                let Some((&head, rest)) = taps.split_first() else {
                    return (vec![0.0; column.len()], ChannelState::Fir(history));
                };
                let mut out = Vec::with_capacity(column.len());
                for &x in column {
                    let past: f64 = rest.iter().zip(history.iter()).map(|(h, p)| h * p).sum();
                    out.push(head * x + past);
                    if !history.is_empty() {
                        history.pop_back();
                        history.push_front(x);
                    }
                }
                (out, ChannelState::Fir(history))
            }
            // States are only ever produced by this filter's own design
            (_, state) => (column.to_vec(), state),
        }
    }
}
