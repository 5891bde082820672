// SPDX-License-Identifier: AGPL-3.0-only

//! Device model for resistive-crossbar analog tiles.
//!
//! This crate has **no dependencies** and **no simulation logic**. It is a
//! pure model of the device: calibration constants for phase-change memory
//! drift, periphery (DAC/ADC) defaults, pulse-train limits and the drift
//! compensation clamps. `crossbar-sim` exposes every value here as an
//! overridable configuration default.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`pcm`] | PCM programming noise, read noise, drift exponent distribution, `t0` |
//! | [`periphery`] | Resolution sentinel, default DAC/ADC levels and bounds |
//! | [`pulse`] | Pulse-train length limits, `dw_min`, `w_max` |
//! | [`drift`] | Global drift compensation scale clamps and probe value |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod drift;
pub mod pcm;
pub mod periphery;
pub mod pulse;
