// SPDX-License-Identifier: AGPL-3.0-only

//! Numerical simulator for analog in-memory compute tiles.
//!
//! An [`AnalogTile`] stands in for an exact digital matrix multiply and
//! reproduces what a resistive crossbar does to it:
//!
//! ```text
//! x ─▶ DAC (quantize + noise) ─▶ conductances (programming noise, drift,
//!      read noise) ─▶ ADC (quantize + noise) ─▶ drift compensation ─▶ y
//! ```
//!
//! Training updates go through a pulse generator that realises the outer
//! product `lr · d xᵀ` as coincident pulse trains.
//!
//! # Quick start
//!
//! ```
//! use crossbar_sim::{AnalogTile, RpuConfig};
//!
//! # fn main() -> crossbar_sim::Result<()> {
//! let weights = [0.5, -0.25, 0.0, 1.0];
//! let mut tile = AnalogTile::from_weights(2, 2, &weights, RpuConfig::inference(), 42)?;
//! tile.program_weights()?;
//! tile.apply_drift(3600.0)?;
//! let y = tile.forward(&[1.0, 0.5])?;
//! assert_eq!(y.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | `RpuConfig` and its sections, presets |
//! | [`quantizer`] | DAC/ADC level mapping and noise |
//! | [`noise`] | Programming, read and drift noise models |
//! | [`drift`] | Global drift compensation |
//! | [`pulse`] | Pulsed outer-product update |
//! | [`tile`] | `AnalogTile` lifecycle and passes |
//! | [`array`] | Grid of tiles for large matrices |
//! | [`context`] | Input/error trace for deferred updates |
//! | [`snapshot`] | Serde and binary tile state |
//!
//! # Reproducibility
//!
//! Each tile owns a ChaCha stream seeded at construction. The same seed and
//! the same call sequence give bit-identical results on any thread count.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod array;
pub mod config;
pub mod context;
pub mod drift;
mod error;
mod linalg;
pub mod noise;
pub mod pulse;
pub mod quantizer;
pub mod rng;
pub mod snapshot;
pub mod tile;

pub use array::TileArray;
pub use config::{DeviceConfig, IoConfig, RpuConfig, UpdateConfig};
pub use context::AnalogContext;
pub use drift::DriftCompensation;
pub use error::{CrossbarError, Result};
pub use noise::{DriftExponent, NoiseModel, PcmLikeNoise, StateIndependentNoise};
pub use pulse::{PulseGenerator, PulseType};
pub use quantizer::{IoPath, Quantizer, Resolution};
pub use rng::TileRng;
pub use snapshot::{ProgrammingState, TileSnapshot};
pub use tile::{AnalogTile, TileState};

pub use crossbar_device::pcm::Technology;

/// Calibration constants (re-exported from crossbar-device).
pub mod constants {
    pub use crossbar_device::drift::{DRIFT_SCALE_MAX, DRIFT_SCALE_MIN};
    pub use crossbar_device::pcm::{DRIFT_NU_MEAN, DRIFT_NU_STD, DRIFT_T0_S};
    pub use crossbar_device::pulse::{MAX_PULSE_TRAIN_LENGTH, MIN_PULSE_TRAIN_LENGTH};
}

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        AnalogContext, AnalogTile, CrossbarError, DriftCompensation, IoConfig, NoiseModel,
        PulseType, Resolution, Result, RpuConfig, TileArray, TileSnapshot, TileState,
        UpdateConfig,
    };
}
