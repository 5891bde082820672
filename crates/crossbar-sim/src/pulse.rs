// SPDX-License-Identifier: AGPL-3.0-only

//! Pulsed outer-product update.
//!
//! The update a tile should receive is `delta[i, j] = lr · x[j] · d[i]`. The
//! crossbar realises it by sending a train of `BL` pulse slots along the rows
//! (one bit per slot, probability `px_j`) and the columns (probability `pd_i`):
//! every slot where both carry a pulse moves the device by `dw_min`. With
//!
//! ```text
//! px_j = cx · |x_j|,   pd_i = cd · |d_i|,   cx · cd = lr / (BL · dw_min)
//! ```
//!
//! the expected coincidence count times `dw_min` equals the ideal update as
//! long as no probability saturates at 1.
//!
//! ## Bit streams
//!
//! `BL <= 31`, so each vector element's train is a single `u32` and the
//! coincidence count of a device is `(bx_j & bd_i).count_ones()`.

use crate::config::{validate_learning_rate, DeviceConfig, UpdateConfig};
use crate::error::{check_batch, check_len, Result};
use crate::quantizer::ensure_finite;
use crate::rng::TileRng;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Pulsing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseType {
    /// Bernoulli pulse trains, coincidences counted per device
    #[default]
    Stochastic,
    /// Expected coincidence count, rounded to whole pulses
    MeanCount,
    /// Exact outer product, no pulse discretisation
    Deterministic,
}

impl PulseType {
    /// Whether the policy draws from the tile RNG.
    pub const fn is_stochastic(self) -> bool {
        matches!(self, Self::Stochastic)
    }
}

/// Update path resolved from an [`UpdateConfig`] and [`DeviceConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseGenerator {
    pulse_type: PulseType,
    train_length: u8,
    update_management: bool,
    dw_min: f32,
}

/// Per-sample pulse scaling.
struct Scaling {
    cx: f32,
    cd: f32,
}

impl PulseGenerator {
    /// Resolve the update path.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CrossbarError::Config`] for a train length outside
    /// `1..=31` or an invalid device range.
    pub fn new(update: &UpdateConfig, device: &DeviceConfig) -> Result<Self> {
        update.validate()?;
        device.validate()?;
        Ok(Self {
            pulse_type: update.pulse_type,
            train_length: update.pulse_train_length,
            update_management: update.update_management,
            dw_min: device.dw_min,
        })
    }

    /// Configured policy.
    pub const fn pulse_type(&self) -> PulseType {
        self.pulse_type
    }

    /// Pulse slots per update.
    pub const fn train_length(&self) -> u8 {
        self.train_length
    }

    /// Conductance change per coincidence.
    pub const fn dw_min(&self) -> f32 {
        self.dw_min
    }

    /// Conductance change for a batch of `(x, d)` pairs.
    ///
    /// `x` is `[batch × in_size]`, `d` is `[batch × out_size]` and the result
    /// is `[out_size × in_size]`, summed over the batch. The sign convention is
    /// the caller's: the result approximates `+lr · d xᵀ`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CrossbarError::DimensionMismatch`] for inconsistent
    /// shapes, [`crate::CrossbarError::Config`] for an invalid learning rate
    /// and [`crate::CrossbarError::Numeric`] for non-finite operands.
    pub fn compute_update(
        &self,
        x: &[f32],
        d: &[f32],
        in_size: usize,
        out_size: usize,
        learning_rate: f32,
        rng: &mut TileRng,
    ) -> Result<Vec<f32>> {
        check_operands(x, d, in_size, out_size, learning_rate)?;

        let mut delta = vec![0.0f32; out_size * in_size];
        if learning_rate == 0.0 {
            return Ok(delta);
        }

        for (xs, ds) in x.chunks_exact(in_size).zip(d.chunks_exact(out_size)) {
            match self.pulse_type {
                PulseType::Deterministic => outer_product(&mut delta, xs, ds, learning_rate),
                PulseType::MeanCount => {
                    if let Some(s) = self.scaling(xs, ds, learning_rate) {
                        self.mean_count(&mut delta, xs, ds, &s);
                    }
                }
                PulseType::Stochastic => {
                    if let Some(s) = self.scaling(xs, ds, learning_rate) {
                        self.coincidences(&mut delta, xs, ds, &s, rng);
                    }
                }
            }
        }
        Ok(delta)
    }

    fn scaling(&self, xs: &[f32], ds: &[f32], learning_rate: f32) -> Option<Scaling> {
        let x_max = max_abs(xs);
        let d_max = max_abs(ds);
        if x_max == 0.0 || d_max == 0.0 {
            return None;
        }
        let k = learning_rate / (f32::from(self.train_length) * self.dw_min);
        let s = if self.update_management {
            Scaling {
                cx: (k * d_max / x_max).sqrt(),
                cd: (k * x_max / d_max).sqrt(),
            }
        } else {
            let c = k.sqrt();
            Scaling { cx: c, cd: c }
        };
        if s.cx * x_max > 1.0 || s.cd * d_max > 1.0 {
            debug!(
                px_max = s.cx * x_max,
                pd_max = s.cd * d_max,
                "pulse probability saturated"
            );
        }
        Some(s)
    }

    fn mean_count(&self, delta: &mut [f32], xs: &[f32], ds: &[f32], s: &Scaling) {
        let length = f32::from(self.train_length);
        let dw_min = self.dw_min;
        let in_size = xs.len();
        delta
            .par_chunks_mut(in_size)
            .zip(ds.par_iter())
            .for_each(|(row, &di)| {
                let pd = probability(s.cd, di);
                if pd == 0.0 {
                    return;
                }
                for (cell, &xj) in row.iter_mut().zip(xs) {
                    let n = (length * probability(s.cx, xj) * pd).round_ties_even();
                    *cell += (xj * di).signum() * n * dw_min;
                }
            });
    }

    fn coincidences(
        &self,
        delta: &mut [f32],
        xs: &[f32],
        ds: &[f32],
        s: &Scaling,
        rng: &mut TileRng,
    ) {
        let bx: Vec<u32> = xs
            .iter()
            .map(|&v| train(probability(s.cx, v), self.train_length, rng))
            .collect();
        let bd: Vec<u32> = ds
            .iter()
            .map(|&v| train(probability(s.cd, v), self.train_length, rng))
            .collect();

        let dw_min = self.dw_min;
        delta
            .par_chunks_mut(xs.len())
            .zip(bd.par_iter().zip(ds.par_iter()))
            .for_each(|(row, (&bits_d, &di))| {
                if bits_d == 0 {
                    return;
                }
                for ((cell, &bits_x), &xj) in row.iter_mut().zip(&bx).zip(xs) {
                    let n = (bits_x & bits_d).count_ones();
                    if n > 0 {
                        #[allow(clippy::cast_precision_loss)]
                        let count = n as f32;
                        *cell += (xj * di).signum() * count * dw_min;
                    }
                }
            });
    }
}

/// Conductance change for one policy with the default device range and
/// update management enabled.
///
/// # Errors
///
/// As [`PulseGenerator::new`] and [`PulseGenerator::compute_update`].
#[allow(clippy::too_many_arguments)]
pub fn compute_update(
    x: &[f32],
    d: &[f32],
    in_size: usize,
    out_size: usize,
    pulse_train_length: u8,
    pulse_type: PulseType,
    learning_rate: f32,
    rng: &mut TileRng,
) -> Result<Vec<f32>> {
    let update = UpdateConfig::default()
        .with_pulse_train_length(pulse_train_length)
        .with_pulse_type(pulse_type);
    PulseGenerator::new(&update, &DeviceConfig::default())?
        .compute_update(x, d, in_size, out_size, learning_rate, rng)
}

/// Every check [`PulseGenerator::compute_update`] makes before touching the
/// random stream. Returns the batch size.
pub(crate) fn check_operands(
    x: &[f32],
    d: &[f32],
    in_size: usize,
    out_size: usize,
    learning_rate: f32,
) -> Result<usize> {
    let batch = check_batch("activations", in_size, x.len())?;
    check_batch("error signal", out_size, d.len())?;
    check_len("error signal", batch * out_size, d.len())?;
    validate_learning_rate(learning_rate)?;
    ensure_finite(x, "activations")?;
    ensure_finite(d, "error signal")?;
    Ok(batch)
}

fn outer_product(delta: &mut [f32], xs: &[f32], ds: &[f32], learning_rate: f32) {
    delta
        .par_chunks_mut(xs.len())
        .zip(ds.par_iter())
        .for_each(|(row, &di)| {
            let scale = learning_rate * di;
            for (cell, &xj) in row.iter_mut().zip(xs) {
                *cell += scale * xj;
            }
        });
}

fn max_abs(values: &[f32]) -> f32 {
    values.iter().fold(0.0f32, |m, v| m.max(v.abs()))
}

fn probability(c: f32, v: f32) -> f32 {
    (c * v.abs()).min(1.0)
}

fn train(p: f32, length: u8, rng: &mut TileRng) -> u32 {
    if p <= 0.0 {
        return 0;
    }
    (0..length).fold(0u32, |bits, slot| {
        if rng.gen::<f32>() < p {
            bits | (1 << slot)
        } else {
            bits
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::seeded;

    fn generator(pulse_type: PulseType, length: u8) -> PulseGenerator {
        let update = UpdateConfig::default()
            .with_pulse_type(pulse_type)
            .with_pulse_train_length(length);
        PulseGenerator::new(&update, &DeviceConfig::default()).unwrap()
    }

    #[test]
    fn deterministic_is_exact_outer_product() {
        let g = generator(PulseType::Deterministic, 31);
        let x = [1.0, -2.0, 0.5];
        let d = [0.1, -0.3];
        let delta = g.compute_update(&x, &d, 3, 2, 0.5, &mut seeded(0)).unwrap();
        for i in 0..2 {
            for j in 0..3 {
                let ideal = 0.5 * x[j] * d[i];
                assert!((delta[i * 3 + j] - ideal).abs() < 1e-7);
            }
        }
    }

    #[test]
    fn batch_is_summed() {
        let g = generator(PulseType::Deterministic, 31);
        let x = [1.0, 0.0, 0.0, 1.0];
        let d = [1.0, 2.0];
        let delta = g.compute_update(&x, &d, 2, 1, 1.0, &mut seeded(0)).unwrap();
        assert_eq!(delta, vec![1.0, 2.0]);
    }

    #[test]
    fn train_length_out_of_range_is_config_error() {
        let update = UpdateConfig::default().with_pulse_train_length(0);
        assert!(PulseGenerator::new(&update, &DeviceConfig::default())
            .unwrap_err()
            .is_config());
        let err = compute_update(
            &[1.0],
            &[1.0],
            1,
            1,
            32,
            PulseType::Stochastic,
            0.01,
            &mut seeded(0),
        );
        assert!(err.unwrap_err().is_config());
    }

    #[test]
    fn mean_count_uses_whole_pulses_and_no_rng() {
        let g = generator(PulseType::MeanCount, 31);
        let mut rng = seeded(9);
        let mut reference = seeded(9);
        let x = [0.8, -0.4, 0.1];
        let d = [0.5, -0.25];
        let delta = g.compute_update(&x, &d, 3, 2, 0.01, &mut rng).unwrap();
        for v in &delta {
            let pulses = v / DeviceConfig::default().dw_min;
            assert!((pulses - pulses.round()).abs() < 1e-3, "{pulses}");
        }
        assert_eq!(rng.gen::<u64>(), reference.gen::<u64>());
    }

    #[test]
    fn stochastic_signs_follow_outer_product() {
        let g = generator(PulseType::Stochastic, 31);
        let x = [1.0, -1.0];
        let d = [1.0, -1.0];
        let delta = g.compute_update(&x, &d, 2, 2, 0.02, &mut seeded(4)).unwrap();
        assert!(delta[0] >= 0.0 && delta[3] >= 0.0);
        assert!(delta[1] <= 0.0 && delta[2] <= 0.0);
        assert!(delta.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn stochastic_matches_ideal_in_expectation() {
        let x = [0.9, -0.3, 0.6];
        let d = [0.4, -0.8];
        let lr = 0.01;
        let g = generator(PulseType::Stochastic, 31);
        let trials = 4000;
        let mut mean = vec![0.0f64; 6];
        for seed in 0..trials {
            let delta = g.compute_update(&x, &d, 3, 2, lr, &mut seeded(seed)).unwrap();
            for (m, v) in mean.iter_mut().zip(&delta) {
                *m += f64::from(*v) / trials as f64;
            }
        }
        for i in 0..2 {
            for j in 0..3 {
                let ideal = f64::from(lr * x[j] * d[i]);
                let got = mean[i * 3 + j];
                assert!(
                    (got - ideal).abs() < 0.1 * ideal.abs() + 2e-4,
                    "[{i},{j}] {got} vs {ideal}"
                );
            }
        }
    }

    #[test]
    fn zero_inputs_leave_devices_alone() {
        let g = generator(PulseType::Stochastic, 31);
        let delta = g
            .compute_update(&[0.0, 0.0], &[1.0], 2, 1, 0.1, &mut seeded(0))
            .unwrap();
        assert_eq!(delta, vec![0.0, 0.0]);
    }

    #[test]
    fn shapes_checked() {
        let g = generator(PulseType::Deterministic, 31);
        assert!(g.compute_update(&[1.0; 3], &[1.0], 2, 1, 0.1, &mut seeded(0)).is_err());
        assert!(g.compute_update(&[1.0; 2], &[1.0; 3], 2, 2, 0.1, &mut seeded(0)).is_err());
        assert!(g
            .compute_update(&[f32::NAN, 1.0], &[1.0], 2, 1, 0.1, &mut seeded(0))
            .is_err());
    }
}
