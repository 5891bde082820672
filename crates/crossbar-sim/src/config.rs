// SPDX-License-Identifier: AGPL-3.0-only

//! Resistive processing unit (RPU) configuration.
//!
//! An [`RpuConfig`] is a plain value: the tile copies it at construction and
//! resolves it once into its runtime components (quantizers, pulse generator,
//! noise model). Changing the configuration means building a new tile.
//!
//! Every field has a serde default, so a JSON file only needs to name the
//! values it overrides:
//!
//! ```json
//! { "forward": { "resolution": 2 }, "noise_model": { "kind": "none" } }
//! ```

use crate::drift::DriftCompensation;
use crate::error::{CrossbarError, Result};
use crate::noise::NoiseModel;
use crate::pulse::PulseType;
use crate::quantizer::{IoPath, Resolution};
use crossbar_device::periphery::{
    DEFAULT_DAC_LEVELS, DEFAULT_INPUT_BOUND, DEFAULT_OUTPUT_BOUND, DEFAULT_OUTPUT_NOISE_STD,
};
use crossbar_device::pulse::{
    is_valid_train_length, DEFAULT_DW_MIN, DEFAULT_PULSE_TRAIN_LENGTH, DEFAULT_W_MAX,
    MAX_PULSE_TRAIN_LENGTH, MIN_PULSE_TRAIN_LENGTH,
};
use serde::{Deserialize, Serialize};

/// Periphery of one pass direction (forward or backward).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Bypass every non-ideality: exact matrix product, no read noise.
    pub is_perfect: bool,

    /// DAC and ADC resolution
    pub resolution: Resolution,

    /// Stochastic instead of nearest rounding
    pub stochastic_rounding: bool,

    /// Additive noise after the DAC (input units)
    pub input_noise_std: f32,

    /// Additive noise after the ADC (output units)
    pub output_noise_std: f32,

    /// Inputs are clipped to `±input_bound` before conversion
    pub input_bound: f32,

    /// Outputs saturate at `±output_bound`
    pub output_bound: f32,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            is_perfect: false,
            resolution: Resolution::Levels(DEFAULT_DAC_LEVELS),
            stochastic_rounding: false,
            input_noise_std: 0.0,
            output_noise_std: DEFAULT_OUTPUT_NOISE_STD,
            input_bound: DEFAULT_INPUT_BOUND,
            output_bound: DEFAULT_OUTPUT_BOUND,
        }
    }
}

impl IoConfig {
    /// Path with no non-idealities at all.
    pub fn perfect() -> Self {
        Self {
            is_perfect: true,
            ..Self::ideal()
        }
    }

    /// Non-perfect path with infinite resolution and no noise.
    ///
    /// Numerically identical to [`IoConfig::perfect`] except that the device
    /// read noise is still applied.
    pub fn ideal() -> Self {
        Self {
            is_perfect: false,
            resolution: Resolution::Disabled,
            stochastic_rounding: false,
            input_noise_std: 0.0,
            output_noise_std: 0.0,
            input_bound: DEFAULT_INPUT_BOUND,
            output_bound: DEFAULT_OUTPUT_BOUND,
        }
    }

    /// Set both converter resolutions.
    #[must_use]
    pub const fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Enable or disable stochastic rounding.
    #[must_use]
    pub const fn with_stochastic_rounding(mut self, enabled: bool) -> Self {
        self.stochastic_rounding = enabled;
        self
    }

    /// Set the DAC and ADC additive noise.
    #[must_use]
    pub const fn with_noise(mut self, input_noise_std: f32, output_noise_std: f32) -> Self {
        self.input_noise_std = input_noise_std;
        self.output_noise_std = output_noise_std;
        self
    }

    /// Set the DAC and ADC clipping bounds.
    #[must_use]
    pub const fn with_bounds(mut self, input_bound: f32, output_bound: f32) -> Self {
        self.input_bound = input_bound;
        self.output_bound = output_bound;
        self
    }

    /// Check noise levels and bounds.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::Config`] for negative/non-finite noise or
    /// non-positive bounds.
    pub fn validate(&self) -> Result<()> {
        IoPath::from_config(self).map(|_| ())
    }
}

/// Update-path (training) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Number of pulse trials per update (`1..=31`)
    pub pulse_train_length: u8,

    /// Pulsing policy
    pub pulse_type: PulseType,

    /// Initial learning rate of the tile
    pub learning_rate: f32,

    /// Balance the activation and error pulse probabilities
    pub update_management: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            pulse_train_length: DEFAULT_PULSE_TRAIN_LENGTH,
            pulse_type: PulseType::Stochastic,
            learning_rate: 0.01,
            update_management: true,
        }
    }
}

impl UpdateConfig {
    /// Set the pulse train length.
    #[must_use]
    pub const fn with_pulse_train_length(mut self, length: u8) -> Self {
        self.pulse_train_length = length;
        self
    }

    /// Set the pulsing policy.
    #[must_use]
    pub const fn with_pulse_type(mut self, pulse_type: PulseType) -> Self {
        self.pulse_type = pulse_type;
        self
    }

    /// Set the learning rate.
    #[must_use]
    pub const fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Check the train length and learning rate.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::Config`] if the train length is outside
    /// `1..=31` or the learning rate is negative or not finite.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_train_length(self.pulse_train_length) {
            return Err(CrossbarError::config(format!(
                "pulse train length {} outside {MIN_PULSE_TRAIN_LENGTH}..={MAX_PULSE_TRAIN_LENGTH}",
                self.pulse_train_length
            )));
        }
        validate_learning_rate(self.learning_rate)
    }
}

pub(crate) fn validate_learning_rate(learning_rate: f32) -> Result<()> {
    if learning_rate.is_finite() && learning_rate >= 0.0 {
        Ok(())
    } else {
        Err(CrossbarError::config(format!(
            "learning rate {learning_rate} must be finite and non-negative"
        )))
    }
}

/// Conductance range and update granularity of the memory cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Conductances are clamped to `[-w_max, w_max]`
    pub w_max: f32,

    /// Conductance change per coincident pulse
    pub dw_min: f32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            w_max: DEFAULT_W_MAX,
            dw_min: DEFAULT_DW_MIN,
        }
    }
}

impl DeviceConfig {
    /// Check the range and step.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::Config`] unless `0 < dw_min <= w_max` and both
    /// are finite.
    pub fn validate(&self) -> Result<()> {
        if !self.w_max.is_finite() || self.w_max <= 0.0 {
            return Err(CrossbarError::config(format!(
                "w_max {} must be finite and positive",
                self.w_max
            )));
        }
        if !self.dw_min.is_finite() || self.dw_min <= 0.0 || self.dw_min > self.w_max {
            return Err(CrossbarError::config(format!(
                "dw_min {} must lie in (0, w_max = {}]",
                self.dw_min, self.w_max
            )));
        }
        Ok(())
    }
}

/// Complete tile configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpuConfig {
    /// Forward pass periphery
    pub forward: IoConfig,

    /// Backward pass periphery
    pub backward: IoConfig,

    /// Pulsed update
    pub update: UpdateConfig,

    /// Programming / read / drift noise
    pub noise_model: NoiseModel,

    /// Output correction for average drift
    pub drift_compensation: DriftCompensation,

    /// Memory cell range
    pub device: DeviceConfig,
}

impl Default for RpuConfig {
    fn default() -> Self {
        Self::training()
    }
}

impl RpuConfig {
    /// Digital reference: every stage ideal, exact updates.
    pub fn ideal() -> Self {
        Self {
            forward: IoConfig::perfect(),
            backward: IoConfig::perfect(),
            update: UpdateConfig::default().with_pulse_type(PulseType::Deterministic),
            noise_model: NoiseModel::None,
            drift_compensation: DriftCompensation::Disabled,
            device: DeviceConfig::default(),
        }
    }

    /// Inference evaluation: noisy forward path on PCM with global drift
    /// compensation. Backward and update bypass the non-idealities.
    pub fn inference() -> Self {
        Self {
            forward: IoConfig::default(),
            backward: IoConfig::perfect(),
            update: UpdateConfig::default().with_pulse_type(PulseType::Deterministic),
            noise_model: NoiseModel::pcm_like(),
            drift_compensation: DriftCompensation::Global,
            device: DeviceConfig::default(),
        }
    }

    /// On-device training: full pipeline on every path, stochastic pulses.
    pub fn training() -> Self {
        Self {
            forward: IoConfig::default(),
            backward: IoConfig::default(),
            update: UpdateConfig::default(),
            noise_model: NoiseModel::None,
            drift_compensation: DriftCompensation::Disabled,
            device: DeviceConfig::default(),
        }
    }

    /// Replace the forward periphery.
    #[must_use]
    pub fn with_forward(mut self, forward: IoConfig) -> Self {
        self.forward = forward;
        self
    }

    /// Replace the backward periphery.
    #[must_use]
    pub fn with_backward(mut self, backward: IoConfig) -> Self {
        self.backward = backward;
        self
    }

    /// Replace the update configuration.
    #[must_use]
    pub fn with_update(mut self, update: UpdateConfig) -> Self {
        self.update = update;
        self
    }

    /// Replace the noise model.
    #[must_use]
    pub fn with_noise_model(mut self, noise_model: NoiseModel) -> Self {
        self.noise_model = noise_model;
        self
    }

    /// Replace the drift compensation policy.
    #[must_use]
    pub const fn with_drift_compensation(mut self, policy: DriftCompensation) -> Self {
        self.drift_compensation = policy;
        self
    }

    /// Replace the device range.
    #[must_use]
    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.device = device;
        self
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`CrossbarError::Config`] found.
    pub fn validate(&self) -> Result<()> {
        self.forward.validate()?;
        self.backward.validate()?;
        self.update.validate()?;
        self.noise_model.validate()?;
        self.device.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        RpuConfig::ideal().validate().unwrap();
        RpuConfig::inference().validate().unwrap();
        RpuConfig::training().validate().unwrap();
    }

    #[test]
    fn inference_preset_keeps_backward_ideal() {
        let cfg = RpuConfig::inference();
        assert!(cfg.backward.is_perfect);
        assert!(!cfg.forward.is_perfect);
        assert_eq!(cfg.update.pulse_type, PulseType::Deterministic);
        assert!(cfg.drift_compensation.is_enabled());
    }

    #[test]
    fn train_length_bounds_are_errors() {
        for length in [0u8, 32, 255] {
            let cfg = RpuConfig::training()
                .with_update(UpdateConfig::default().with_pulse_train_length(length));
            assert!(cfg.validate().unwrap_err().is_config(), "length {length}");
        }
        for length in [1u8, 16, 31] {
            UpdateConfig::default()
                .with_pulse_train_length(length)
                .validate()
                .unwrap();
        }
    }

    #[test]
    fn device_range_checked() {
        let bad = DeviceConfig {
            w_max: 0.5,
            dw_min: 0.6,
        };
        assert!(bad.validate().is_err());
        assert!(UpdateConfig::default().with_learning_rate(-1.0).validate().is_err());
    }

    #[test]
    fn json_overrides_only_named_fields() {
        let cfg: RpuConfig = serde_json::from_str(
            r#"{ "forward": { "resolution": 2 }, "noise_model": { "kind": "none" } }"#,
        )
        .unwrap();
        assert_eq!(cfg.forward.resolution, Resolution::Levels(2));
        assert_eq!(cfg.forward.output_bound, DEFAULT_OUTPUT_BOUND);
        assert_eq!(cfg.noise_model, NoiseModel::None);
        assert_eq!(cfg.update, UpdateConfig::default());
    }

    #[test]
    fn json_rejects_bad_resolution() {
        let err = serde_json::from_str::<RpuConfig>(r#"{ "forward": { "resolution": -4 } }"#);
        assert!(err.is_err());
    }

    #[test]
    fn json_round_trip() {
        let cfg = RpuConfig::inference();
        let text = serde_json::to_string(&cfg).unwrap();
        let back: RpuConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(cfg, back);
    }
}
