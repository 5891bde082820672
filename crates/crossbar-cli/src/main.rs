// SPDX-License-Identifier: AGPL-3.0-only

//! `crossbar`: command-line driver for the analog tile simulator.
//!
//! ```text
//! USAGE:
//!   crossbar preset <ideal|inference|training>   Print a preset as JSON
//!   crossbar drift [--config FILE] ...            Output error vs. drift time
//!   crossbar train [--pulse-type TYPE] ...        Fit a random linear map
//! ```
//!
//! Logging goes to stderr; set `RUST_LOG=crossbar_sim=info` for tile events.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossbar_sim::rng::seeded;
use crossbar_sim::{
    AnalogContext, AnalogTile, DriftCompensation, PulseType, RpuConfig, UpdateConfig,
};
use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "crossbar", about = "Analog crossbar tile simulator", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Clone, Copy, ValueEnum)]
enum Preset {
    Ideal,
    Inference,
    Training,
}

impl Preset {
    fn config(self) -> RpuConfig {
        match self {
            Self::Ideal => RpuConfig::ideal(),
            Self::Inference => RpuConfig::inference(),
            Self::Training => RpuConfig::training(),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PulseArg {
    Stochastic,
    MeanCount,
    Deterministic,
}

impl From<PulseArg> for PulseType {
    fn from(arg: PulseArg) -> Self {
        match arg {
            PulseArg::Stochastic => Self::Stochastic,
            PulseArg::MeanCount => Self::MeanCount,
            PulseArg::Deterministic => Self::Deterministic,
        }
    }
}

#[derive(Subcommand)]
enum Cmd {
    /// Print a configuration preset as JSON.
    Preset {
        /// Preset name.
        #[arg(value_enum)]
        name: Preset,
    },
    /// Program a random tile and report the output error at each drift time.
    Drift {
        /// JSON configuration (defaults to the inference preset).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output rows.
        #[arg(long, default_value_t = 64)]
        rows: usize,
        /// Input columns.
        #[arg(long, default_value_t = 64)]
        cols: usize,
        /// Tile and data seed.
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Drift times in seconds.
        #[arg(long, value_delimiter = ',', default_value = "1,60,3600,86400,2592000")]
        times: Vec<f64>,
    },
    /// Fit a random linear target with pulsed updates.
    Train {
        /// JSON configuration (defaults to the training preset).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Pulsing policy (overrides the configuration).
        #[arg(long, value_enum)]
        pulse_type: Option<PulseArg>,
        /// Pulse slots per update, 1..=31 (overrides the configuration).
        #[arg(long)]
        pulse_train_length: Option<u8>,
        /// Learning rate.
        #[arg(long, default_value_t = 0.01)]
        learning_rate: f32,
        /// Output rows.
        #[arg(long, default_value_t = 8)]
        rows: usize,
        /// Input columns.
        #[arg(long, default_value_t = 8)]
        cols: usize,
        /// Training steps.
        #[arg(long, default_value_t = 1000)]
        steps: usize,
        /// Tile and data seed.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Preset { name } => cmd_preset(name)?,
        Cmd::Drift {
            config,
            rows,
            cols,
            seed,
            times,
        } => {
            let config = load_config(config.as_deref(), RpuConfig::inference())?;
            cmd_drift(config, rows, cols, seed, &times)?;
        }
        Cmd::Train {
            config,
            pulse_type,
            pulse_train_length,
            learning_rate,
            rows,
            cols,
            steps,
            seed,
        } => {
            let mut config = load_config(config.as_deref(), RpuConfig::training())?;
            if let Some(p) = pulse_type {
                config.update.pulse_type = p.into();
            }
            if let Some(n) = pulse_train_length {
                config.update.pulse_train_length = n;
            }
            config.update.learning_rate = learning_rate;
            cmd_train(config, rows, cols, steps, seed)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>, fallback: RpuConfig) -> Result<RpuConfig> {
    let Some(path) = path else {
        return Ok(fallback);
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: RpuConfig = serde_json::from_str(&text)
        .with_context(|| format!("parsing config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn uniform(n: usize, scale: f32, rng: &mut impl Rng) -> Vec<f32> {
    (0..n).map(|_| rng.gen_range(-scale..scale)).collect()
}

fn mean_abs(values: impl Iterator<Item = f32>) -> f32 {
    let (sum, n) = values.fold((0.0f32, 0usize), |(s, n), v| (s + v.abs(), n + 1));
    #[allow(clippy::cast_precision_loss)]
    let mean = if n == 0 { 0.0 } else { sum / n as f32 };
    mean
}

fn cmd_preset(name: Preset) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&name.config())?);
    Ok(())
}

fn cmd_drift(config: RpuConfig, rows: usize, cols: usize, seed: u64, times: &[f64]) -> Result<()> {
    const BATCH: usize = 16;

    if !config.noise_model.technology().drifts() {
        warn!("noise model {:?} does not drift", config.noise_model.technology());
    }
    let mut data = seeded(seed);
    let weights = uniform(rows * cols, 0.5, &mut data);
    let x = uniform(BATCH * cols, 1.0, &mut data);

    let mut ideal = AnalogTile::from_weights(rows, cols, &weights, RpuConfig::ideal(), seed)?;
    let reference = ideal.forward(&x)?;
    let scale = mean_abs(reference.iter().copied());

    let build = |policy| -> Result<AnalogTile> {
        let config = config.clone().with_drift_compensation(policy);
        let mut tile = AnalogTile::from_weights(rows, cols, &weights, config, seed)?;
        tile.program_weights()?;
        Ok(tile)
    };
    let mut raw = build(DriftCompensation::Disabled)?;
    let mut compensated = build(DriftCompensation::Global)?;

    println!("Tile {rows}×{cols}, {BATCH} samples, noise {:?}", config.noise_model.technology());
    println!();
    println!("{:>12}  {:>10}  {:>12}  {:>8}", "t [s]", "raw err", "comp. err", "scale");
    for &t in times {
        raw.apply_drift(t)?;
        compensated.apply_drift(t)?;
        let err = |y: &[f32]| mean_abs(y.iter().zip(&reference).map(|(a, b)| a - b)) / scale;
        let e_raw = err(&raw.forward(&x)?);
        let e_comp = err(&compensated.forward(&x)?);
        println!(
            "{t:>12.0}  {e_raw:>10.4}  {e_comp:>12.4}  {:>8.4}",
            compensated.drift_scale()
        );
    }
    Ok(())
}

fn cmd_train(config: RpuConfig, rows: usize, cols: usize, steps: usize, seed: u64) -> Result<()> {
    const EVAL: usize = 32;

    let mut data = seeded(seed.wrapping_add(1));
    let target = uniform(rows * cols, 0.5, &mut data);
    let mut exact = AnalogTile::from_weights(rows, cols, &target, RpuConfig::ideal(), seed)?;
    let eval_x = uniform(EVAL * cols, 1.0, &mut data);
    let eval_y = exact.forward(&eval_x)?;

    let UpdateConfig {
        pulse_type,
        pulse_train_length,
        ..
    } = config.update;
    let mut tile = AnalogTile::new(rows, cols, config, seed)?;
    let mut ctx = AnalogContext::new();

    let loss = |tile: &mut AnalogTile| -> Result<f32> {
        let y = tile.forward(&eval_x)?;
        let sq: f32 = y.iter().zip(&eval_y).map(|(a, b)| (a - b) * (a - b)).sum();
        #[allow(clippy::cast_precision_loss)]
        let mse = sq / y.len() as f32;
        Ok(mse)
    };

    println!("Training {rows}×{cols} with {pulse_type:?} pulses (BL={pulse_train_length})");
    println!("{:>8}  {:>10}", "step", "loss");
    println!("{:>8}  {:>10.6}", 0, loss(&mut tile)?);

    let report = (steps / 10).max(1);
    for step in 1..=steps {
        let x = uniform(cols, 1.0, &mut data);
        let y = tile.forward(&x)?;
        let wanted = exact.forward(&x)?;
        let d: Vec<f32> = wanted.iter().zip(&y).map(|(t, y)| t - y).collect();

        ctx.save_input(&x);
        ctx.record_error(&d)?;
        ctx.apply_updates(&mut tile)?;

        if step % report == 0 || step == steps {
            let l = loss(&mut tile)?;
            info!("step {step}: loss {l}");
            println!("{step:>8}  {l:>10.6}");
        }
    }
    Ok(())
}
