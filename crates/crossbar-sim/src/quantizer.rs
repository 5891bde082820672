// SPDX-License-Identifier: AGPL-3.0-only

//! DAC/ADC quantization.
//!
//! A [`Quantizer`] maps values to `R` equally spaced levels on
//! `[-bound, bound]`, optionally rounding stochastically, then adds zero-mean
//! Gaussian noise. With [`Resolution::Disabled`] the level mapping (and the
//! clipping) is skipped but the noise is still applied.
//!
//! ## Rounding
//!
//! Nearest rounding breaks ties towards the **even level index**
//! (`f32::round_ties_even` on the level position). For `R = 3` the levels are
//! `{-1, 0, 1}`; `0.5` sits exactly between indices 1 and 2 and rounds to
//! index 2 (`1.0`), `-0.5` sits between 0 and 1 and rounds to index 0 (`-1.0`).

use crate::config::IoConfig;
use crate::error::{CrossbarError, Result};
use crate::rng::{map_chunks, TileRng};
use crossbar_device::periphery::{level_step, LEVEL_SNAP_EPS, MIN_LEVELS, RESOLUTION_DISABLED};
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Largest level count whose level indices are exact in `f32`.
const MAX_LEVELS: u32 = 1 << 24;

/// Converter resolution.
///
/// Serialized as the raw integer: `0` is the disabled sentinel, `R >= 2` is
/// the number of levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Resolution {
    /// Infinite resolution: no clipping, no rounding.
    Disabled,
    /// `R` equally spaced levels on `[-1, 1]`.
    Levels(u32),
}

impl Resolution {
    /// Parse a raw resolution value.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::Config`] for negative values, for `1` (a single
    /// level has no spacing) and for counts above `2^24`.
    pub fn from_raw(raw: i64) -> Result<Self> {
        if raw == RESOLUTION_DISABLED {
            return Ok(Self::Disabled);
        }
        if raw < 0 {
            return Err(CrossbarError::config(format!(
                "resolution {raw} is negative (use {RESOLUTION_DISABLED} to disable)"
            )));
        }
        if raw < i64::from(MIN_LEVELS) {
            return Err(CrossbarError::config(format!(
                "resolution {raw} must provide at least {MIN_LEVELS} levels"
            )));
        }
        if raw > i64::from(MAX_LEVELS) {
            return Err(CrossbarError::config(format!(
                "resolution {raw} exceeds {MAX_LEVELS} levels"
            )));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let levels = raw as u32;
        Ok(Self::Levels(levels))
    }

    /// Resolution of an `bits`-bit converter (`2^bits` levels).
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::Config`] unless `1 <= bits <= 24`.
    pub fn from_bits(bits: u8) -> Result<Self> {
        if bits == 0 || bits > 24 {
            return Err(CrossbarError::config(format!(
                "converter width {bits} bits outside 1..=24"
            )));
        }
        Ok(Self::Levels(1 << bits))
    }

    /// Number of levels, `None` when disabled.
    pub const fn levels(self) -> Option<u32> {
        match self {
            Self::Disabled => None,
            Self::Levels(n) => Some(n),
        }
    }

    /// True for the infinite-resolution sentinel.
    pub const fn is_disabled(self) -> bool {
        matches!(self, Self::Disabled)
    }
}

impl TryFrom<i64> for Resolution {
    type Error = CrossbarError;

    fn try_from(raw: i64) -> Result<Self> {
        Self::from_raw(raw)
    }
}

impl From<Resolution> for i64 {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Disabled => RESOLUTION_DISABLED,
            Resolution::Levels(n) => Self::from(n),
        }
    }
}

/// One conversion stage (DAC or ADC).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantizer {
    resolution: Resolution,
    stochastic_rounding: bool,
    noise_std: f32,
    bound: f32,
}

impl Quantizer {
    /// Create a validated quantizer.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::Config`] if `noise_std` is negative or not
    /// finite, or if `bound` is not a positive finite number.
    pub fn new(
        resolution: Resolution,
        stochastic_rounding: bool,
        noise_std: f32,
        bound: f32,
    ) -> Result<Self> {
        if !noise_std.is_finite() || noise_std < 0.0 {
            return Err(CrossbarError::config(format!(
                "noise std {noise_std} must be finite and non-negative"
            )));
        }
        if !bound.is_finite() || bound <= 0.0 {
            return Err(CrossbarError::config(format!(
                "bound {bound} must be finite and positive"
            )));
        }
        Ok(Self {
            resolution,
            stochastic_rounding,
            noise_std,
            bound,
        })
    }

    /// Configured resolution.
    pub const fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Configured additive noise.
    pub const fn noise_std(&self) -> f32 {
        self.noise_std
    }

    /// Configured clipping bound.
    pub const fn bound(&self) -> f32 {
        self.bound
    }

    /// Whether this stage changes its input at all.
    pub fn is_identity(&self) -> bool {
        self.resolution.is_disabled() && self.noise_std == 0.0
    }

    /// Quantize a copy of `values`.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::Numeric`] if any output is NaN or infinite.
    pub fn quantize(&self, values: &[f32], rng: &mut TileRng) -> Result<Vec<f32>> {
        let mut out = values.to_vec();
        self.quantize_in_place(&mut out, rng)?;
        Ok(out)
    }

    /// Quantize `values` in place.
    ///
    /// Consumes one draw from `rng` for stochastic rounding and one for the
    /// additive noise, independent of `values.len()`. Inputs that clipping
    /// cannot bring back (NaN, or infinities with no level grid) are
    /// rejected before any draw.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::Numeric`] if any output is NaN or infinite.
    pub fn quantize_in_place(&self, values: &mut [f32], rng: &mut TileRng) -> Result<()> {
        self.check_input(values)?;
        if let Resolution::Levels(levels) = self.resolution {
            let step = level_step(levels);
            let bound = self.bound;
            if self.stochastic_rounding {
                map_chunks(rng, values, |r, v| {
                    let pos = snap(level_position(*v / bound, step));
                    let lower = pos.floor();
                    let up = r.gen::<f32>() < pos - lower;
                    *v = level_value(if up { lower + 1.0 } else { lower }, step) * bound;
                });
            } else {
                values.par_iter_mut().for_each(|v| {
                    let index = level_position(*v / bound, step).round_ties_even();
                    *v = level_value(index, step) * bound;
                });
            }
        }

        if self.noise_std > 0.0 {
            let std = self.noise_std;
            map_chunks(rng, values, |r, v| {
                *v += std * r.sample::<f32, _>(StandardNormal);
            });
        }

        ensure_finite(values, "quantizer output")
    }

    fn check_input(&self, values: &[f32]) -> Result<()> {
        if self.resolution.is_disabled() {
            return ensure_finite(values, "quantizer input");
        }
        match values.par_iter().position_first(|v| v.is_nan()) {
            None => Ok(()),
            Some(index) => Err(CrossbarError::numeric(format!(
                "quantizer input is NaN at element {index}"
            ))),
        }
    }
}

/// Quantize with a unit bound.
///
/// # Errors
///
/// Returns [`CrossbarError::Config`] for an invalid `noise_std` and
/// [`CrossbarError::Numeric`] for non-finite outputs.
pub fn quantize(
    values: &[f32],
    resolution: Resolution,
    stochastic_rounding: bool,
    noise_std: f32,
    rng: &mut TileRng,
) -> Result<Vec<f32>> {
    Quantizer::new(resolution, stochastic_rounding, noise_std, 1.0)?.quantize(values, rng)
}

/// Clipped position of a normalised value on the level grid, in level units.
fn level_position(v: f32, step: f32) -> f32 {
    (v.clamp(-1.0, 1.0) + 1.0) / step
}

fn snap(pos: f32) -> f32 {
    let nearest = pos.round();
    if (pos - nearest).abs() < LEVEL_SNAP_EPS {
        nearest
    } else {
        pos
    }
}

fn level_value(index: f32, step: f32) -> f32 {
    index.mul_add(step, -1.0).clamp(-1.0, 1.0)
}

pub(crate) fn ensure_finite(values: &[f32], what: &str) -> Result<()> {
    match values.par_iter().position_first(|v| !v.is_finite()) {
        None => Ok(()),
        Some(index) => Err(CrossbarError::numeric(format!(
            "{what} is {} at element {index}",
            values[index]
        ))),
    }
}

/// DAC → MVM → ADC periphery of one pass direction, resolved from an
/// [`IoConfig`] once at tile construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IoPath {
    perfect: bool,
    dac: Quantizer,
    adc: Quantizer,
}

impl IoPath {
    /// Resolve a path configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::Config`] if any noise or bound is invalid.
    pub fn from_config(config: &IoConfig) -> Result<Self> {
        Ok(Self {
            perfect: config.is_perfect,
            dac: Quantizer::new(
                config.resolution,
                config.stochastic_rounding,
                config.input_noise_std,
                config.input_bound,
            )?,
            adc: Quantizer::new(
                config.resolution,
                config.stochastic_rounding,
                config.output_noise_std,
                config.output_bound,
            )?,
        })
    }

    /// True when the path bypasses every non-ideality.
    pub const fn is_perfect(&self) -> bool {
        self.perfect
    }

    /// Input-side converter.
    pub const fn dac(&self) -> &Quantizer {
        &self.dac
    }

    /// Output-side converter.
    pub const fn adc(&self) -> &Quantizer {
        &self.adc
    }
}
