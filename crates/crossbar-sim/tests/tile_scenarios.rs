//! End-to-end tile scenarios
//!
//! Exercises the tile through its public API the way a training or
//! inference loop would.

use crossbar_sim::prelude::*;
use crossbar_sim::rng::seeded;
use crossbar_sim::snapshot::TileSnapshot;
use rand::Rng;

fn identity(n: usize) -> Vec<f32> {
    let mut w = vec![0.0; n * n];
    for i in 0..n {
        w[i * n + i] = 1.0;
    }
    w
}

fn random(n: usize, scale: f32, seed: u64) -> Vec<f32> {
    let mut rng = seeded(seed);
    (0..n).map(|_| rng.gen_range(-scale..scale)).collect()
}

fn mean_abs_error(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum::<f32>() / a.len() as f32
}

#[test]
fn test_identity_ideal_forward() {
    let mut tile = AnalogTile::from_weights(4, 4, &identity(4), RpuConfig::ideal(), 0)
        .expect("ideal tile");
    let y = tile.forward(&[1.0, 2.0, 3.0, 4.0]).expect("forward");
    assert_eq!(y, vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_binary_resolution_is_deterministic() {
    let forward = IoConfig::default()
        .with_resolution(Resolution::Levels(2))
        .with_noise(0.0, 0.0);
    let cfg = RpuConfig::training().with_forward(forward);
    let bound = cfg.forward.output_bound;
    let mut tile = AnalogTile::from_weights(4, 4, &identity(4), cfg, 7).expect("tile");

    let first = tile.forward(&[0.1; 4]).expect("forward");
    for _ in 0..10 {
        assert_eq!(tile.forward(&[0.1; 4]).expect("forward"), first);
    }
    assert!(first.iter().all(|&v| v.abs() == bound));
}

#[test]
fn test_disabled_resolution_is_linear() {
    let cfg = RpuConfig::training()
        .with_forward(IoConfig::ideal())
        .with_backward(IoConfig::ideal());
    let w = random(6 * 5, 0.9, 1);
    let mut tile = AnalogTile::from_weights(6, 5, &w, cfg, 2).expect("tile");

    let x1 = random(5, 1.0, 3);
    let x2 = random(5, 1.0, 4);
    let (a, b) = (0.75f32, -1.5f32);
    let combined: Vec<f32> = x1.iter().zip(&x2).map(|(p, q)| a * p + b * q).collect();

    let y1 = tile.forward(&x1).expect("forward");
    let y2 = tile.forward(&x2).expect("forward");
    let y = tile.forward(&combined).expect("forward");
    for i in 0..6 {
        assert!((y[i] - (a * y1[i] + b * y2[i])).abs() < 1e-5);
    }
}

#[test]
fn test_drift_before_programming_is_state_error() {
    let mut tile = AnalogTile::new(3, 3, RpuConfig::inference(), 0).expect("tile");
    let err = tile.apply_drift(60.0).expect_err("drift must fail");
    assert!(matches!(err, CrossbarError::State { .. }));
    assert_eq!(tile.state(), TileState::Uninitialized);
}

#[test]
fn test_compensation_reduces_drift_error() {
    let (out, inp) = (32, 32);
    let w = random(out * inp, 0.5, 10);
    let x = random(4 * inp, 1.0, 11);

    let mut ideal = AnalogTile::from_weights(out, inp, &w, RpuConfig::ideal(), 0).expect("ideal");
    let reference = ideal.forward(&x).expect("ideal forward");

    let run = |policy: DriftCompensation| {
        let cfg = RpuConfig::inference().with_drift_compensation(policy);
        let mut tile = AnalogTile::from_weights(out, inp, &w, cfg, 12).expect("tile");
        tile.program_weights().expect("program");
        assert_eq!(tile.drift_scale(), 1.0);
        tile.apply_drift(1e7).expect("drift");
        mean_abs_error(&tile.forward(&x).expect("forward"), &reference)
    };

    let raw = run(DriftCompensation::Disabled);
    let compensated = run(DriftCompensation::Global);
    assert!(
        compensated < raw,
        "compensated error {compensated} should be below raw error {raw}"
    );
}

#[test]
fn test_deterministic_pulses_match_stochastic_expectation() {
    let x = [0.7, -0.2, 0.5];
    let d = [0.3, -0.9];
    let lr = 0.01;
    let config = |pulse_type| {
        RpuConfig::training().with_update(
            UpdateConfig::default()
                .with_pulse_type(pulse_type)
                .with_learning_rate(lr),
        )
    };

    let mut exact = AnalogTile::new(2, 3, config(PulseType::Deterministic), 0).expect("tile");
    exact.update(&x, &d).expect("update");

    let trials = 3000u64;
    let mut mean = [0.0f64; 6];
    for seed in 0..trials {
        let mut tile = AnalogTile::new(2, 3, config(PulseType::Stochastic), seed).expect("tile");
        tile.update(&x, &d).expect("update");
        for (m, w) in mean.iter_mut().zip(tile.weights()) {
            *m += f64::from(*w) / trials as f64;
        }
    }

    for (m, e) in mean.iter().zip(exact.weights()) {
        let e = f64::from(*e);
        assert!((m - e).abs() < 0.1 * e.abs() + 2e-4, "{m} vs {e}");
    }
}

#[test]
fn test_tile_array_matches_single_tile() {
    let (out, inp) = (10, 9);
    let w = random(out * inp, 0.8, 20);
    let x = random(3 * inp, 1.0, 21);
    let d = random(3 * out, 1.0, 22);

    let mut tile = AnalogTile::from_weights(out, inp, &w, RpuConfig::ideal(), 0).expect("tile");
    let mut array = TileArray::new(out, inp, &RpuConfig::ideal(), 4, 4, 0).expect("array");
    array.set_weights(&w).expect("weights");
    assert_eq!(array.grid(), (3, 3));

    let close = |a: &[f32], b: &[f32]| a.iter().zip(b).all(|(p, q)| (p - q).abs() < 1e-5);
    assert!(close(
        &tile.forward(&x).expect("tile forward"),
        &array.forward(&x).expect("array forward")
    ));
    assert!(close(
        &tile.backward(&d).expect("tile backward"),
        &array.backward(&d).expect("array backward")
    ));

    tile.update(&x, &d).expect("tile update");
    array.update(&x, &d).expect("array update");
    assert!(close(tile.weights(), &array.weights()));
}

#[test]
fn test_context_drives_training_step() {
    let cfg = RpuConfig::ideal()
        .with_update(UpdateConfig::default().with_pulse_type(PulseType::Deterministic));
    let mut tile = AnalogTile::new(2, 2, cfg, 0).expect("tile");
    let mut ctx = AnalogContext::new();

    let x = [1.0, 0.5];
    tile.forward(&x).expect("forward");
    ctx.save_input(&x);
    let d = [0.2, -0.4];
    tile.backward(&d).expect("backward");
    ctx.record_error(&d).expect("record");

    let grad = ctx.digital_gradient(2, 2).expect("gradient");
    let lr = tile.learning_rate();
    assert_eq!(ctx.apply_updates(&mut tile).expect("apply"), 1);
    assert!(!ctx.has_gradient());
    for (w, g) in tile.weights().iter().zip(&grad) {
        assert!((w - lr * g).abs() < 1e-7);
    }
}

#[test]
fn test_snapshot_restores_drifted_tile() {
    let w = random(8 * 6, 0.6, 30);
    let mut tile = AnalogTile::from_weights(8, 6, &w, RpuConfig::inference(), 31).expect("tile");
    tile.program_weights().expect("program");
    tile.apply_drift(86_400.0).expect("drift");
    let snap = tile.snapshot();

    let text = serde_json::to_string(&snap).expect("serialize");
    let parsed: TileSnapshot = serde_json::from_str(&text).expect("deserialize");
    let restored = AnalogTile::restore(parsed, 99).expect("restore");
    assert_eq!(restored.state(), TileState::Drifted { elapsed: 86_400.0 });
    assert_eq!(restored.effective_weights(), tile.effective_weights());
    assert_eq!(restored.programmed_weights(), tile.programmed_weights());
    assert_eq!(restored.weights(), tile.weights());
    assert_eq!(restored.drift_scale(), tile.drift_scale());

    let blob = snap.pack_state();
    let unpacked =
        TileSnapshot::unpack_state(RpuConfig::inference(), &blob).expect("unpack blob");
    let from_blob = AnalogTile::restore(unpacked, 99).expect("restore blob");
    assert_eq!(from_blob.weights(), tile.weights());
    assert_eq!(from_blob.drift_coefficients(), tile.drift_coefficients());
}

#[test]
fn test_invalid_config_rejected_at_construction() {
    let parsed = serde_json::from_str::<RpuConfig>(r#"{ "forward": { "resolution": 1 } }"#);
    assert!(parsed.is_err());

    let cfg = RpuConfig::training()
        .with_update(UpdateConfig::default().with_pulse_train_length(40));
    let err = AnalogTile::new(2, 2, cfg, 0).expect_err("train length 40");
    assert!(err.is_config());
}
