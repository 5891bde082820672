// SPDX-License-Identifier: AGPL-3.0-only

//! Global drift compensation.
//!
//! Drift mostly shrinks every conductance by a similar factor, so a single
//! digital scale on the tile output recovers most of the lost magnitude. The
//! tile reads an all-ones probe through its freshly programmed conductances
//! (the reference) and again after each drift step (the current readout):
//!
//! ```text
//! scale = mean(|reference|) / mean(|current|)
//! ```
//!
//! Readouts use the exact product with the effective conductances, without
//! periphery or read noise, so the scale is deterministic.

use crate::linalg::matvec;
use crossbar_device::drift::{DRIFT_SCALE_MAX, DRIFT_SCALE_MIN, PROBE_VALUE};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Drift compensation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftCompensation {
    /// Outputs are left as read
    #[default]
    Disabled,
    /// One global scale per tile from the probe readout
    Global,
}

impl DriftCompensation {
    /// Whether outputs are rescaled.
    pub const fn is_enabled(&self) -> bool {
        matches!(self, Self::Global)
    }
}

/// Probe readout `W · 1` of an `out_size × in_size` conductance matrix.
pub fn probe_readout(conductance: &[f32], out_size: usize, in_size: usize) -> Vec<f32> {
    let probe = vec![PROBE_VALUE; in_size];
    matvec(conductance, out_size, in_size, &probe, 1)
}

fn mean_abs(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f32;
    values.iter().map(|v| v.abs()).sum::<f32>() / n
}

/// Scale that restores the mean magnitude of `current` to that of `reference`.
///
/// Returns 1.0 when the reference readout is zero and clamps the result to
/// `[DRIFT_SCALE_MIN, DRIFT_SCALE_MAX]`.
pub fn compute_scale(reference: &[f32], current: &[f32]) -> f32 {
    let target = mean_abs(reference);
    if target == 0.0 || !target.is_finite() {
        return 1.0;
    }
    let now = mean_abs(current);
    let raw = if now > 0.0 { target / now } else { f32::INFINITY };
    let scale = raw.clamp(DRIFT_SCALE_MIN, DRIFT_SCALE_MAX);
    if scale != raw {
        warn!("drift compensation scale {raw} clamped to {scale}");
    }
    scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_readouts_give_unit_scale() {
        let r = [0.5, -1.5, 2.0];
        assert!((compute_scale(&r, &r) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn halved_readout_doubles() {
        let r = [1.0, -2.0, 4.0];
        let c = [0.5, -1.0, 2.0];
        assert!((compute_scale(&r, &c) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_readouts_are_clamped() {
        assert_eq!(compute_scale(&[0.0, 0.0], &[1.0, 1.0]), 1.0);
        assert_eq!(compute_scale(&[1.0], &[0.0]), DRIFT_SCALE_MAX);
        assert_eq!(compute_scale(&[1e-9], &[1.0]), DRIFT_SCALE_MIN);
    }

    #[test]
    fn probe_sums_rows() {
        let w = [1.0, 2.0, 3.0, -4.0, 0.0, 1.0];
        assert_eq!(probe_readout(&w, 2, 3), vec![6.0, -3.0]);
    }
}
