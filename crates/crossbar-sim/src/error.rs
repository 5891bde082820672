// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for crossbar tile operations

use thiserror::Error;

/// Result type alias for crossbar operations
pub type Result<T> = std::result::Result<T, CrossbarError>;

/// Errors that can occur while configuring or driving a tile.
///
/// None of these are transient: they indicate a misconfiguration or a call
/// in the wrong lifecycle state and are raised before any numeric work.
#[derive(Debug, Error)]
pub enum CrossbarError {
    /// Invalid resolution, pulse-train length, probability or noise parameter
    #[error("Invalid configuration: {reason}")]
    Config {
        /// Reason for failure
        reason: String,
    },

    /// Operand length does not match the tile geometry
    #[error("Dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Which operand was checked
        what: &'static str,
        /// Expected element count
        expected: usize,
        /// Actual element count
        got: usize,
    },

    /// Operation requires a different tile state (e.g. drift before programming)
    #[error("Tile in invalid state: {state}")]
    State {
        /// Current state description
        state: String,
    },

    /// A quantization or noise computation produced NaN or infinity
    #[error("Non-finite value: {reason}")]
    Numeric {
        /// Reason for failure
        reason: String,
    },

    /// Persisted tile state could not be decoded
    #[error("Invalid snapshot: {reason}")]
    Snapshot {
        /// Reason for failure
        reason: String,
    },
}

impl CrossbarError {
    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a dimension mismatch error
    pub const fn dimension(what: &'static str, expected: usize, got: usize) -> Self {
        Self::DimensionMismatch {
            what,
            expected,
            got,
        }
    }

    /// Create an invalid state error
    pub fn state(state: impl Into<String>) -> Self {
        Self::State {
            state: state.into(),
        }
    }

    /// Create a numeric error
    pub fn numeric(reason: impl Into<String>) -> Self {
        Self::Numeric {
            reason: reason.into(),
        }
    }

    /// Create a snapshot decoding error
    pub fn snapshot(reason: impl Into<String>) -> Self {
        Self::Snapshot {
            reason: reason.into(),
        }
    }

    /// Whether this error stems from configuration or operand shapes.
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::DimensionMismatch { .. })
    }
}

/// Fail with [`CrossbarError::DimensionMismatch`] unless `got == expected`.
pub(crate) fn check_len(what: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(CrossbarError::dimension(what, expected, got))
    }
}

/// Fail with [`CrossbarError::DimensionMismatch`] unless `got` is a non-zero
/// multiple of `row`; returns the number of rows (the batch size).
pub(crate) fn check_batch(what: &'static str, row: usize, got: usize) -> Result<usize> {
    if row == 0 || got == 0 || got % row != 0 {
        return Err(CrossbarError::dimension(what, row, got));
    }
    Ok(got / row)
}
