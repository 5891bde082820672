// SPDX-License-Identifier: AGPL-3.0-only

//! Gradient trace between backward and the optimizer step.
//!
//! Analog tiles never materialise a weight gradient. During training the
//! forward input and the backward error of each step are recorded instead, and
//! the optimizer turns every recorded pair into a pulsed update.

use crate::error::{check_batch, check_len, CrossbarError, Result};
use crate::tile::AnalogTile;

/// Recorded `(input, error)` pairs of one tile.
#[derive(Debug, Clone, Default)]
pub struct AnalogContext {
    pending: Option<Vec<f32>>,
    pairs: Vec<(Vec<f32>, Vec<f32>)>,
}

impl AnalogContext {
    /// Empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the forward input of the current step. Replaces an input
    /// that never received an error.
    pub fn save_input(&mut self, x: &[f32]) {
        self.pending = Some(x.to_vec());
    }

    /// Pair the backward error with the saved input.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::State`] if no input is pending.
    pub fn record_error(&mut self, d: &[f32]) -> Result<()> {
        let x = self.pending.take().ok_or_else(|| {
            CrossbarError::state("no saved input: save_input must precede record_error")
        })?;
        self.pairs.push((x, d.to_vec()));
        Ok(())
    }

    /// Whether at least one pair is recorded.
    pub fn has_gradient(&self) -> bool {
        !self.pairs.is_empty()
    }

    /// Number of recorded pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True when nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Drop every recorded pair and the pending input.
    pub fn reset(&mut self) {
        self.pending = None;
        self.pairs.clear();
    }

    /// Apply one pulsed update per recorded pair, then reset.
    ///
    /// Returns the number of updates applied. Every pair is checked against
    /// the tile first; on error no update is applied and the trace is kept.
    ///
    /// # Errors
    ///
    /// As [`AnalogTile::update`].
    pub fn apply_updates(&mut self, tile: &mut AnalogTile) -> Result<usize> {
        for (x, d) in &self.pairs {
            tile.check_update(x, d)?;
        }
        for (x, d) in &self.pairs {
            tile.update(x, d)?;
        }
        let applied = self.pairs.len();
        self.reset();
        Ok(applied)
    }

    /// Exact gradient `Σ d xᵀ` over the recorded pairs, `[out × in]`.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::DimensionMismatch`] if a pair does not fit
    /// the given shape.
    pub fn digital_gradient(&self, out_size: usize, in_size: usize) -> Result<Vec<f32>> {
        let mut grad = vec![0.0f32; out_size * in_size];
        for (x, d) in &self.pairs {
            let batch = check_batch("activations", in_size, x.len())?;
            check_len("error signal", batch * out_size, d.len())?;
            for (xs, ds) in x.chunks_exact(in_size).zip(d.chunks_exact(out_size)) {
                for (row, &di) in grad.chunks_exact_mut(in_size).zip(ds) {
                    for (g, &xj) in row.iter_mut().zip(xs) {
                        *g += di * xj;
                    }
                }
            }
        }
        Ok(grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RpuConfig, UpdateConfig};
    use crate::pulse::PulseType;

    #[test]
    fn error_needs_input() {
        let mut ctx = AnalogContext::new();
        assert!(matches!(
            ctx.record_error(&[1.0]),
            Err(CrossbarError::State { .. })
        ));
        ctx.save_input(&[1.0, 2.0]);
        ctx.record_error(&[0.5]).unwrap();
        assert!(ctx.has_gradient());
        assert!(ctx.record_error(&[0.5]).is_err());
    }

    #[test]
    fn digital_gradient_sums_outer_products() {
        let mut ctx = AnalogContext::new();
        ctx.save_input(&[1.0, 2.0]);
        ctx.record_error(&[1.0]).unwrap();
        ctx.save_input(&[3.0, -1.0]);
        ctx.record_error(&[2.0]).unwrap();
        assert_eq!(ctx.digital_gradient(1, 2).unwrap(), vec![7.0, 0.0]);
        assert!(ctx.digital_gradient(2, 2).is_err());
    }

    #[test]
    fn apply_updates_flushes_trace() {
        let cfg = RpuConfig::ideal().with_update(
            UpdateConfig::default()
                .with_pulse_type(PulseType::Deterministic)
                .with_learning_rate(0.5),
        );
        let mut tile = AnalogTile::new(1, 2, cfg, 0).unwrap();
        let mut ctx = AnalogContext::new();
        ctx.save_input(&[1.0, 0.0]);
        ctx.record_error(&[0.5]).unwrap();
        ctx.save_input(&[0.0, 1.0]);
        ctx.record_error(&[-0.5]).unwrap();

        assert_eq!(ctx.apply_updates(&mut tile).unwrap(), 2);
        assert!(ctx.is_empty());
        assert_eq!(tile.weights(), &[0.25, -0.25]);
    }

    #[test]
    fn bad_pair_blocks_whole_trace() {
        let cfg = RpuConfig::ideal().with_update(
            UpdateConfig::default()
                .with_pulse_type(PulseType::Deterministic)
                .with_learning_rate(0.5),
        );
        let mut tile = AnalogTile::new(1, 2, cfg, 0).unwrap();
        let mut ctx = AnalogContext::new();
        ctx.save_input(&[1.0, 0.0]);
        ctx.record_error(&[0.2]).unwrap();
        ctx.save_input(&[1.0, 0.0, 1.0]);
        ctx.record_error(&[0.2]).unwrap();

        for _ in 0..2 {
            assert!(ctx.apply_updates(&mut tile).unwrap_err().is_config());
            assert_eq!(tile.weights(), &[0.0, 0.0]);
            assert_eq!(ctx.len(), 2);
        }
    }
}
