// SPDX-License-Identifier: AGPL-3.0-only

//! Phase-change memory calibration constants.
//!
//! Conductance of a PCM cell decays after programming following a power law
//! `g(t) = g(t0) · (t / t0)^(-ν)`. The exponent `ν` differs from device to
//! device; the constants below parameterise the log-normal distribution it is
//! drawn from. Values are simulator defaults in the range reported for
//! mushroom-type GST devices, not a calibration of a specific process.

/// Reference time `t0` in seconds. Elapsed times below `t0` are floored.
pub const DRIFT_T0_S: f64 = 1.0;

/// Arithmetic mean of the per-device drift exponent `ν`.
pub const DRIFT_NU_MEAN: f32 = 0.06;

/// Arithmetic standard deviation of the per-device drift exponent `ν`.
pub const DRIFT_NU_STD: f32 = 0.02;

/// Relative standard deviation of the multiplicative programming noise.
///
/// A programmed conductance is `g · (1 + PROGRAMMING_STD · ξ)`, `ξ ~ N(0, 1)`.
pub const PROGRAMMING_STD: f32 = 0.03;

/// Relative standard deviation of the per-read noise (`|g| · READ_STD · ξ`).
pub const READ_STD: f32 = 0.01;

/// Absolute read noise of the state-independent baseline model.
pub const STATE_INDEPENDENT_READ_STD: f32 = 0.02;

/// Convert an arithmetic mean/std pair into the `(μ, σ)` of the underlying
/// normal distribution of a log-normal variable.
///
/// `σ² = ln(1 + std²/mean²)`, `μ = ln(mean) − σ²/2`.
#[must_use]
pub fn lognormal_params(mean: f32, std: f32) -> (f32, f32) {
    let ratio = std / mean;
    let sigma_sq = (1.0 + ratio * ratio).ln();
    (mean.ln() - 0.5 * sigma_sq, sigma_sq.sqrt())
}

/// Memory technology a tile is assumed to be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Technology {
    /// Phase-change memory: programming noise, read noise and power-law drift.
    Pcm,
    /// Generic resistive memory modelled by a fixed read perturbation only.
    Generic,
    /// Ideal conductances (digital reference).
    Ideal,
}

impl Technology {
    /// Whether conductances of this technology drift after programming.
    #[must_use]
    pub const fn drifts(&self) -> bool {
        matches!(self, Self::Pcm)
    }
}
