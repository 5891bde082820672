// SPDX-License-Identifier: AGPL-3.0-only

//! Pulse-train limits for the stochastic outer-product update.
//!
//! Each bit-stream is held in a `u32` word, one bit per trial, so coincidences
//! are a single `AND` + `popcount`. The longest train therefore fits in 31
//! bits (the top bit stays clear).

/// Shortest permitted pulse train.
pub const MIN_PULSE_TRAIN_LENGTH: u8 = 1;

/// Longest permitted pulse train.
pub const MAX_PULSE_TRAIN_LENGTH: u8 = 31;

/// Default pulse train length.
pub const DEFAULT_PULSE_TRAIN_LENGTH: u8 = 31;

/// Default conductance change caused by one coincident pulse.
pub const DEFAULT_DW_MIN: f32 = 0.001;

/// Default largest representable conductance magnitude.
pub const DEFAULT_W_MAX: f32 = 1.0;

/// Whether `length` is inside the supported pulse-train range.
#[must_use]
pub const fn is_valid_train_length(length: u8) -> bool {
    length >= MIN_PULSE_TRAIN_LENGTH && length <= MAX_PULSE_TRAIN_LENGTH
}
