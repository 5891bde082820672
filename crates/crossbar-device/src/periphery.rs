// SPDX-License-Identifier: AGPL-3.0-only

//! DAC/ADC periphery defaults.

/// Raw resolution value meaning "infinite resolution" (quantizer disabled).
pub const RESOLUTION_DISABLED: i64 = 0;

/// Smallest usable number of quantization levels (1-bit converter).
pub const MIN_LEVELS: u32 = 2;

/// Default number of DAC levels on the input side (8-bit, symmetric).
pub const DEFAULT_DAC_LEVELS: u32 = 255;

/// Default input bound: inputs are normalised by this before the DAC.
pub const DEFAULT_INPUT_BOUND: f32 = 1.0;

/// Default output bound: ADC saturates at `±DEFAULT_OUTPUT_BOUND`.
pub const DEFAULT_OUTPUT_BOUND: f32 = 12.0;

/// Default additive output noise (ADC side), in output units.
pub const DEFAULT_OUTPUT_NOISE_STD: f32 = 0.04;

/// Distance (in level units) under which a value snaps onto a level.
pub const LEVEL_SNAP_EPS: f32 = 1e-4;

/// Spacing between adjacent levels of an `levels`-level converter on `[-1, 1]`.
#[must_use]
pub fn level_step(levels: u32) -> f32 {
    #[allow(clippy::cast_precision_loss)]
    let gaps = (levels - 1) as f32;
    2.0 / gaps
}
