// SPDX-License-Identifier: AGPL-3.0-only

//! Analog crossbar tile.
//!
//! An [`AnalogTile`] owns an `out_size × in_size` conductance matrix and the
//! periphery around it. Conductances are kept in three copies:
//!
//! - the **target** conductance, written by `set_weights` and pulsed updates
//!   and returned by `weights()`. Programming never changes it;
//! - the **programmed** conductance, one programming-noise draw from the
//!   target taken by the last `program_weights`. Absent before the first;
//! - the **effective** conductance, the programmed (or, before programming,
//!   the target) values after drift. Every read (forward, backward, probe)
//!   goes through this copy.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized ──program_weights──▶ Programmed ──apply_drift(t)──▶ Drifted { t }
//!        ▲                               ▲                              │
//!        └── (new tile)                  └──────── program_weights ─────┘
//! ```
//!
//! Pulsed updates change the target and the programmed conductance in any
//! state. A programmed tile keeps its drift coefficients across updates; the
//! update is drifted with the old coefficients until the next
//! `program_weights`, which draws fresh noise from the target.
//!
//! ## Forward pass
//!
//! ```text
//! x ─▶ DAC ─▶ W_eff + read noise ─▶ ADC ─▶ × drift scale ─▶ y
//! ```
//!
//! A perfect path replaces everything up to the ADC with the exact product
//! `W_eff · x`. The drift scale is applied in both cases.

use crate::config::{validate_learning_rate, RpuConfig};
use crate::drift::{compute_scale, probe_readout};
use crate::error::{check_batch, check_len, CrossbarError, Result};
use crate::linalg::{matvec, matvec_transposed};
use crate::pulse::{check_operands, PulseGenerator};
use crate::quantizer::{ensure_finite, IoPath};
use crate::rng::{seeded, TileRng};
use crate::snapshot::{ProgrammingState, TileSnapshot};
use rayon::prelude::*;
use tracing::{debug, info};

/// Lifecycle state of a tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TileState {
    /// Weights set or updated, never programmed
    Uninitialized,
    /// Programmed, no drift applied yet
    Programmed,
    /// Drifted to `elapsed` seconds after programming
    Drifted {
        /// Seconds since programming
        elapsed: f64,
    },
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

/// One analog crossbar tile.
#[derive(Debug, Clone)]
pub struct AnalogTile {
    out_size: usize,
    in_size: usize,
    config: RpuConfig,
    forward_io: IoPath,
    backward_io: IoPath,
    pulses: PulseGenerator,
    conductance: Vec<f32>,
    effective: Vec<f32>,
    programming: Option<ProgrammingState>,
    drift_scale: f32,
    learning_rate: f32,
    rng: TileRng,
}

impl AnalogTile {
    /// Create a tile with all conductances at zero.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::Config`] for zero dimensions or an invalid
    /// configuration.
    pub fn new(out_size: usize, in_size: usize, config: RpuConfig, seed: u64) -> Result<Self> {
        if out_size == 0 || in_size == 0 {
            return Err(CrossbarError::config(format!(
                "tile dimensions must be non-zero, got {out_size}×{in_size}"
            )));
        }
        config.validate()?;
        let forward_io = IoPath::from_config(&config.forward)?;
        let backward_io = IoPath::from_config(&config.backward)?;
        let pulses = PulseGenerator::new(&config.update, &config.device)?;
        let cells = out_size * in_size;

        info!(
            "AnalogTile: {out_size}×{in_size} noise={:?} pulses={:?} compensation={:?}",
            config.noise_model.technology(),
            config.update.pulse_type,
            config.drift_compensation
        );

        Ok(Self {
            out_size,
            in_size,
            learning_rate: config.update.learning_rate,
            forward_io,
            backward_io,
            pulses,
            conductance: vec![0.0; cells],
            effective: vec![0.0; cells],
            programming: None,
            drift_scale: 1.0,
            rng: seeded(seed),
            config,
        })
    }

    /// Create a tile and store `weights` (`[out × in]`, row-major).
    ///
    /// # Errors
    ///
    /// As [`AnalogTile::new`] and [`AnalogTile::set_weights`].
    pub fn from_weights(
        out_size: usize,
        in_size: usize,
        weights: &[f32],
        config: RpuConfig,
        seed: u64,
    ) -> Result<Self> {
        let mut tile = Self::new(out_size, in_size, config, seed)?;
        tile.set_weights(weights)?;
        Ok(tile)
    }

    /// Output rows.
    pub const fn out_size(&self) -> usize {
        self.out_size
    }

    /// Input columns.
    pub const fn in_size(&self) -> usize {
        self.in_size
    }

    /// Configuration the tile was built with.
    pub const fn config(&self) -> &RpuConfig {
        &self.config
    }

    /// Current learning rate.
    pub const fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Current drift compensation scale (1.0 unless compensation is enabled
    /// and drift has been applied).
    pub const fn drift_scale(&self) -> f32 {
        self.drift_scale
    }

    /// Lifecycle state.
    pub fn state(&self) -> TileState {
        match &self.programming {
            None => TileState::Uninitialized,
            Some(ProgrammingState { elapsed: None, .. }) => TileState::Programmed,
            Some(ProgrammingState {
                elapsed: Some(t), ..
            }) => TileState::Drifted { elapsed: *t },
        }
    }

    /// Seconds since programming, `None` before the first drift.
    pub fn elapsed_time(&self) -> Option<f64> {
        self.programming.as_ref().and_then(|p| p.elapsed)
    }

    /// Target conductance `[out × in]`.
    pub fn weights(&self) -> &[f32] {
        &self.conductance
    }

    /// Conductance written by the last programming, before drift. `None`
    /// before the first `program_weights`.
    pub fn programmed_weights(&self) -> Option<&[f32]> {
        self.programming.as_ref().map(|p| p.programmed.as_slice())
    }

    /// Conductance after drift `[out × in]`.
    pub fn effective_weights(&self) -> &[f32] {
        &self.effective
    }

    /// Drift exponents of the last programming, `None` before.
    pub fn drift_coefficients(&self) -> Option<&[f32]> {
        self.programming.as_ref().map(|p| p.drift_coeffs.as_slice())
    }

    /// Set the learning rate used by [`AnalogTile::update`].
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::Config`] for a negative or non-finite rate.
    pub fn set_learning_rate(&mut self, learning_rate: f32) -> Result<()> {
        validate_learning_rate(learning_rate)?;
        self.learning_rate = learning_rate;
        Ok(())
    }

    /// Overwrite the target conductance, clamped to `±w_max`.
    ///
    /// Does not program the devices: a programmed tile keeps its drift
    /// coefficients and elapsed time, and its devices take the new values
    /// without programming noise.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::DimensionMismatch`] for a wrong length and
    /// [`CrossbarError::Numeric`] for non-finite values.
    pub fn set_weights(&mut self, weights: &[f32]) -> Result<()> {
        check_len("weights", self.conductance.len(), weights.len())?;
        ensure_finite(weights, "weights")?;
        let w_max = self.config.device.w_max;
        self.conductance
            .par_iter_mut()
            .zip(weights.par_iter())
            .for_each(|(g, &w)| *g = w.clamp(-w_max, w_max));
        if let Some(p) = self.programming.as_mut() {
            p.programmed.clone_from(&self.conductance);
        }
        self.refresh_effective();
        Ok(())
    }

    /// Write the target weights into the devices.
    ///
    /// Applies one fresh programming-noise draw to the target (earlier
    /// programming is discarded), samples one drift exponent per device,
    /// resets the elapsed time to `t0` and captures the drift reference.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::Numeric`] if programming produces non-finite
    /// conductances.
    pub fn program_weights(&mut self) -> Result<()> {
        let (mut programmed, drift_coeffs) = self
            .config
            .noise_model
            .programming_noise(&self.conductance, &mut self.rng)?;
        let w_max = self.config.device.w_max;
        programmed
            .par_iter_mut()
            .for_each(|g| *g = g.clamp(-w_max, w_max));

        self.effective.clone_from(&programmed);
        let reference = probe_readout(&self.effective, self.out_size, self.in_size);
        self.programming = Some(ProgrammingState {
            programmed,
            drift_coeffs,
            elapsed: None,
            reference,
        });
        self.drift_scale = 1.0;

        info!(
            "AnalogTile: programmed {}×{} ({:?})",
            self.out_size,
            self.in_size,
            self.config.noise_model.technology()
        );
        Ok(())
    }

    /// Recompute the effective conductance at `t` seconds after programming.
    ///
    /// Always starts from the programmed conductance, so repeated calls with the
    /// same `t` are idempotent and a smaller `t` rewinds. Recomputes the drift
    /// compensation scale when enabled.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::State`] if the tile was never programmed and
    /// [`CrossbarError::Config`] if `t` is not a positive finite number.
    pub fn apply_drift(&mut self, t: f64) -> Result<()> {
        let Some(programming) = self.programming.as_mut() else {
            return Err(CrossbarError::state(
                "uninitialized: program_weights must run before apply_drift",
            ));
        };
        if !t.is_finite() || t <= 0.0 {
            return Err(CrossbarError::config(format!(
                "drift time {t} must be finite and positive"
            )));
        }

        programming.elapsed = Some(t);
        self.config.noise_model.apply_drift(
            &programming.programmed,
            &programming.drift_coeffs,
            t,
            &mut self.effective,
        );

        if self.config.drift_compensation.is_enabled() {
            let current = probe_readout(&self.effective, self.out_size, self.in_size);
            self.drift_scale = compute_scale(&programming.reference, &current);
            debug!("AnalogTile: drift scale {} at t={t}s", self.drift_scale);
        }

        info!("AnalogTile: drifted to t={t}s");
        Ok(())
    }

    /// Forward pass `y = W x` through the forward periphery.
    ///
    /// `x` is `[batch × in_size]`, the result `[batch × out_size]`.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::DimensionMismatch`] if `x.len()` is not a
    /// non-zero multiple of `in_size`, and [`CrossbarError::Numeric`] for
    /// non-finite outputs.
    pub fn forward(&mut self, x: &[f32]) -> Result<Vec<f32>> {
        let batch = check_batch("input", self.in_size, x.len())?;
        let mut y = self.read_through(Direction::Forward, x, batch)?;
        if self.drift_scale != 1.0 {
            let scale = self.drift_scale;
            y.par_iter_mut().for_each(|v| *v *= scale);
        }
        Ok(y)
    }

    /// Backward pass `z = Wᵀ d` through the backward periphery.
    ///
    /// `d` is `[batch × out_size]`, the result `[batch × in_size]`. The drift
    /// scale is not applied.
    ///
    /// # Errors
    ///
    /// As [`AnalogTile::forward`].
    pub fn backward(&mut self, d: &[f32]) -> Result<Vec<f32>> {
        let batch = check_batch("error signal", self.out_size, d.len())?;
        self.read_through(Direction::Backward, d, batch)
    }

    /// Pulsed update with activations `x` (`[batch × in]`) and errors `d`
    /// (`[batch × out]`): `W += lr · d xᵀ`, clamped to `±w_max`.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::DimensionMismatch`] for inconsistent shapes
    /// and [`CrossbarError::Numeric`] for non-finite operands.
    pub fn update(&mut self, x: &[f32], d: &[f32]) -> Result<()> {
        let delta = self.pulses.compute_update(
            x,
            d,
            self.in_size,
            self.out_size,
            self.learning_rate,
            &mut self.rng,
        )?;
        let w_max = self.config.device.w_max;
        add_clamped(&mut self.conductance, &delta, w_max);
        if let Some(p) = self.programming.as_mut() {
            add_clamped(&mut p.programmed, &delta, w_max);
        }
        self.refresh_effective();
        Ok(())
    }

    /// Run every check [`AnalogTile::update`] makes, without updating.
    ///
    /// # Errors
    ///
    /// As [`AnalogTile::update`].
    pub fn check_update(&self, x: &[f32], d: &[f32]) -> Result<()> {
        check_operands(x, d, self.in_size, self.out_size, self.learning_rate).map(|_| ())
    }

    /// Estimate the weights as seen through the forward periphery.
    ///
    /// Probes every column with a one-hot input at the input bound, so the
    /// estimate includes DAC/ADC quantization, read noise and drift
    /// compensation. Returns `[out × in]`.
    ///
    /// # Errors
    ///
    /// As [`AnalogTile::forward`].
    pub fn read_weights(&mut self) -> Result<Vec<f32>> {
        let n = self.in_size;
        let bound = if self.forward_io.is_perfect() {
            1.0
        } else {
            self.forward_io.dac().bound()
        };
        let mut probes = vec![0.0f32; n * n];
        for j in 0..n {
            probes[j * n + j] = bound;
        }
        let y = self.forward(&probes)?;

        let out = self.out_size;
        let mut weights = vec![0.0f32; out * n];
        for (j, column) in y.chunks_exact(out).enumerate() {
            for (i, &v) in column.iter().enumerate() {
                weights[i * n + j] = v / bound;
            }
        }
        Ok(weights)
    }

    /// Capture the numeric state.
    pub fn snapshot(&self) -> TileSnapshot {
        TileSnapshot {
            out_size: self.out_size,
            in_size: self.in_size,
            config: self.config.clone(),
            conductance: self.conductance.clone(),
            programming: self.programming.clone(),
            drift_scale: self.drift_scale,
            learning_rate: self.learning_rate,
        }
    }

    /// Rebuild a tile from a snapshot with a fresh random stream.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::Snapshot`] if the stored arrays do not match
    /// the dimensions or hold invalid values, and [`CrossbarError::Config`]
    /// for an invalid configuration.
    pub fn restore(snapshot: TileSnapshot, seed: u64) -> Result<Self> {
        let mut tile = Self::new(snapshot.out_size, snapshot.in_size, snapshot.config, seed)?;
        let cells = tile.conductance.len();

        check_snapshot_len("conductance", cells, snapshot.conductance.len())?;
        if let Some(p) = &snapshot.programming {
            check_snapshot_len("programmed conductance", cells, p.programmed.len())?;
            if p.programmed.iter().any(|g| !g.is_finite()) {
                return Err(CrossbarError::snapshot("programmed conductance is not finite"));
            }
            check_snapshot_len("drift coefficients", cells, p.drift_coeffs.len())?;
            check_snapshot_len("reference readout", tile.out_size, p.reference.len())?;
            if let Some(t) = p.elapsed {
                if !t.is_finite() || t <= 0.0 {
                    return Err(CrossbarError::snapshot(format!("elapsed time {t}")));
                }
            }
        }
        if !snapshot.drift_scale.is_finite() || snapshot.drift_scale <= 0.0 {
            return Err(CrossbarError::snapshot(format!(
                "drift scale {}",
                snapshot.drift_scale
            )));
        }
        tile.set_learning_rate(snapshot.learning_rate)?;
        tile.set_weights(&snapshot.conductance)?;
        tile.programming = snapshot.programming;
        tile.drift_scale = snapshot.drift_scale;
        tile.refresh_effective();
        Ok(tile)
    }

    fn refresh_effective(&mut self) {
        match self.programming.as_ref() {
            Some(ProgrammingState {
                programmed,
                drift_coeffs,
                elapsed: Some(t),
                ..
            }) => self.config.noise_model.apply_drift(
                programmed,
                drift_coeffs,
                *t,
                &mut self.effective,
            ),
            Some(p) => self.effective.clone_from(&p.programmed),
            None => self.effective.clone_from(&self.conductance),
        }
    }

    fn read_through(
        &mut self,
        direction: Direction,
        input: &[f32],
        batch: usize,
    ) -> Result<Vec<f32>> {
        let io = match direction {
            Direction::Forward => self.forward_io,
            Direction::Backward => self.backward_io,
        };
        let (out_size, in_size) = (self.out_size, self.in_size);
        let product = |w: &[f32], v: &[f32]| match direction {
            Direction::Forward => matvec(w, out_size, in_size, v, batch),
            Direction::Backward => matvec_transposed(w, out_size, in_size, v, batch),
        };

        if io.is_perfect() {
            let y = product(&self.effective, input);
            ensure_finite(&y, "output")?;
            return Ok(y);
        }

        let converted = io.dac().quantize(input, &mut self.rng)?;
        let read = self
            .config
            .noise_model
            .read_noise(&self.effective, &mut self.rng);
        let mut y = product(&read, &converted);
        io.adc().quantize_in_place(&mut y, &mut self.rng)?;
        Ok(y)
    }
}

fn add_clamped(values: &mut [f32], delta: &[f32], w_max: f32) {
    values
        .par_iter_mut()
        .zip(delta.par_iter())
        .for_each(|(g, &dw)| *g = (*g + dw).clamp(-w_max, w_max));
}

fn check_snapshot_len(what: &str, expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(CrossbarError::snapshot(format!(
            "{what} holds {got} values, expected {expected}"
        )))
    }
}
