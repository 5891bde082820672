// SPDX-License-Identifier: AGPL-3.0-only

//! Global drift compensation constants.

/// Smallest scale the compensation may apply.
pub const DRIFT_SCALE_MIN: f32 = 1e-3;

/// Largest scale the compensation may apply.
pub const DRIFT_SCALE_MAX: f32 = 1e3;

/// Value of every element of the compensation probe input.
pub const PROBE_VALUE: f32 = 1.0;
