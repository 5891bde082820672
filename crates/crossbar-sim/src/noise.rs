// SPDX-License-Identifier: AGPL-3.0-only

//! Conductance noise models.
//!
//! A [`NoiseModel`] is stateless: every stochastic method takes the tile's
//! random stream. Three variants are supported:
//!
//! | Variant | Programming | Drift | Read |
//! |---------|-------------|-------|------|
//! | [`NoiseModel::PcmLike`] | `g · (1 + σ_p ξ)` | `g · (t/t0)^(-ν)`, `ν` log-normal per device | `g + |g| σ_r ξ` |
//! | [`NoiseModel::StateIndependent`] | exact | none | `g + σ ξ` |
//! | [`NoiseModel::None`] | exact | none | exact |

use crate::error::{CrossbarError, Result};
use crate::quantizer::ensure_finite;
use crate::rng::{map_chunks, map_chunks_pair, TileRng};
use crossbar_device::pcm::{
    lognormal_params, Technology, DRIFT_NU_MEAN, DRIFT_NU_STD, DRIFT_T0_S, PROGRAMMING_STD,
    READ_STD, STATE_INDEPENDENT_READ_STD,
};
use rand::Rng;
use rand_distr::{Distribution, LogNormal, StandardNormal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Arithmetic mean and standard deviation of the drift exponent `ν`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftExponent {
    /// Mean of `ν` (0 disables drift)
    pub mean: f32,
    /// Standard deviation of `ν` (0 gives every device the mean)
    pub std: f32,
}

impl Default for DriftExponent {
    fn default() -> Self {
        Self {
            mean: DRIFT_NU_MEAN,
            std: DRIFT_NU_STD,
        }
    }
}

impl DriftExponent {
    fn sampler(self) -> Result<Option<LogNormal<f32>>> {
        if self.mean == 0.0 || self.std == 0.0 {
            return Ok(None);
        }
        let (mu, sigma) = lognormal_params(self.mean, self.std);
        LogNormal::new(mu, sigma)
            .map(Some)
            .map_err(|e| CrossbarError::config(format!("drift exponent distribution: {e}")))
    }
}

/// Phase-change-memory-like noise parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcmLikeNoise {
    /// Relative std of the multiplicative programming noise
    pub programming_std: f32,
    /// Relative std of the per-read noise
    pub read_std: f32,
    /// Per-device drift exponent distribution
    pub drift: DriftExponent,
    /// Drift reference time in seconds
    pub t0: f64,
}

impl Default for PcmLikeNoise {
    fn default() -> Self {
        Self {
            programming_std: PROGRAMMING_STD,
            read_std: READ_STD,
            drift: DriftExponent::default(),
            t0: DRIFT_T0_S,
        }
    }
}

/// Fixed-magnitude read perturbation, independent of state and time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateIndependentNoise {
    /// Absolute std of the read noise
    pub read_std: f32,
}

impl Default for StateIndependentNoise {
    fn default() -> Self {
        Self {
            read_std: STATE_INDEPENDENT_READ_STD,
        }
    }
}

/// Noise model variant, selected once in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoiseModel {
    /// Programming noise, read noise and per-device power-law drift
    PcmLike(PcmLikeNoise),
    /// Gaussian perturbation on every read
    StateIndependent(StateIndependentNoise),
    /// Identity
    #[default]
    None,
}

impl NoiseModel {
    /// PCM-like model with the calibration defaults.
    pub fn pcm_like() -> Self {
        Self::PcmLike(PcmLikeNoise::default())
    }

    /// State-independent model with the given read noise.
    pub const fn state_independent(read_std: f32) -> Self {
        Self::StateIndependent(StateIndependentNoise { read_std })
    }

    /// Memory technology this model stands for.
    pub const fn technology(&self) -> Technology {
        match self {
            Self::PcmLike(_) => Technology::Pcm,
            Self::StateIndependent(_) => Technology::Generic,
            Self::None => Technology::Ideal,
        }
    }

    /// Drift reference time `t0`.
    pub fn t0(&self) -> f64 {
        match self {
            Self::PcmLike(p) => p.t0,
            _ => DRIFT_T0_S,
        }
    }

    /// Check every parameter.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::Config`] for negative or non-finite standard
    /// deviations, a negative drift mean, or a non-positive `t0`.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::PcmLike(p) => {
                check_std("programming_std", p.programming_std)?;
                check_std("read_std", p.read_std)?;
                check_std("drift.std", p.drift.std)?;
                check_std("drift.mean", p.drift.mean)?;
                if !p.t0.is_finite() || p.t0 <= 0.0 {
                    return Err(CrossbarError::config(format!(
                        "drift reference time t0 = {} must be finite and positive",
                        p.t0
                    )));
                }
                p.drift.sampler().map(|_| ())
            }
            Self::StateIndependent(s) => check_std("read_std", s.read_std),
            Self::None => Ok(()),
        }
    }

    /// Write `weights` into the devices.
    ///
    /// Returns the programmed conductances and one drift exponent per device.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::Config`] for invalid parameters and
    /// [`CrossbarError::Numeric`] if a programmed value is not finite.
    pub fn programming_noise(
        &self,
        weights: &[f32],
        rng: &mut TileRng,
    ) -> Result<(Vec<f32>, Vec<f32>)> {
        let mut programmed = weights.to_vec();
        let mut coeffs = vec![0.0f32; weights.len()];
        if let Self::PcmLike(p) = self {
            let std = p.programming_std;
            let mean = p.drift.mean;
            let sampler = p.drift.sampler()?;
            map_chunks_pair(rng, &mut programmed, &mut coeffs, |r, g, nu| {
                if std > 0.0 {
                    *g *= std.mul_add(r.sample::<f32, _>(StandardNormal), 1.0);
                }
                *nu = sampler.map_or(mean, |s| s.sample(r));
            });
        }
        ensure_finite(&programmed, "programmed conductance")?;
        Ok((programmed, coeffs))
    }

    /// Perturb a read of `effective` conductances.
    pub fn read_noise(&self, effective: &[f32], rng: &mut TileRng) -> Vec<f32> {
        let mut read = effective.to_vec();
        match *self {
            Self::PcmLike(p) if p.read_std > 0.0 => {
                let std = p.read_std;
                map_chunks(rng, &mut read, |r, g| {
                    *g += g.abs() * std * r.sample::<f32, _>(StandardNormal);
                });
            }
            Self::StateIndependent(s) if s.read_std > 0.0 => {
                let std = s.read_std;
                map_chunks(rng, &mut read, |r, g| {
                    *g += std * r.sample::<f32, _>(StandardNormal);
                });
            }
            _ => {}
        }
        read
    }

    /// Multiplicative decay of a device with exponent `nu` at time `t`.
    ///
    /// `t` is floored at `t0`, so the factor is 1 for `t <= t0`.
    pub fn drift_factor(&self, nu: f32, t: f64) -> f32 {
        let t0 = self.t0();
        #[allow(clippy::cast_possible_truncation)]
        let factor = (t.max(t0) / t0).powf(-f64::from(nu)) as f32;
        factor
    }

    /// Compute `out[k] = conductance[k] · drift_factor(coeffs[k], t)`.
    pub fn apply_drift(&self, conductance: &[f32], coeffs: &[f32], t: f64, out: &mut [f32]) {
        debug_assert_eq!(conductance.len(), coeffs.len());
        debug_assert_eq!(conductance.len(), out.len());
        out.par_iter_mut()
            .zip(conductance.par_iter().zip(coeffs.par_iter()))
            .for_each(|(e, (&g, &nu))| {
                *e = if nu == 0.0 { g } else { g * self.drift_factor(nu, t) };
            });
    }
}

fn check_std(name: &str, value: f32) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(CrossbarError::config(format!(
            "{name} = {value} must be finite and non-negative"
        )))
    }
}
