//! End-to-end runs of the analysis on synthetic Brownian stacks.

use approx::assert_relative_eq;
use ddm_analysis::app::pipeline::run_on_stack;
use ddm_analysis::domain::{
    AnalysisConfig, Calibration, ExecutionConfig, InMemoryStack, Isf, LagTimes, ModelKind, StackMetadata,
    StrategyKind,
};
use ddm_analysis::error::DdmError;
use ddm_analysis::fit::fit_isf;
use ddm_analysis::io::read_artifact;
use ddm_analysis::processing::{DdmMatrixBuilder, NoProgress, Strategy, extract_isf, synthesize_ddm_matrix};
use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Gaussian spots diffusing on a periodic field, plus camera noise.
fn brownian_stack(frames: usize, size: usize, particles: usize, seed: u64) -> InMemoryStack {
    let mut rng = StdRng::seed_from_u64(seed);
    let step = Normal::new(0.0, 1.5).unwrap();
    let noise = Normal::new(0.0, 0.05).unwrap();
    let extent = size as f64;
    let sigma = 2.0;
    let radius = 6i64;

    let mut positions: Vec<(f64, f64)> = (0..particles)
        .map(|_| (rng.gen_range(0.0..extent), rng.gen_range(0.0..extent)))
        .collect();
    let mut data = Array3::<f32>::zeros((frames, size, size));

    for t in 0..frames {
        for &(px, py) in &positions {
            let (cx, cy) = (px.floor() as i64, py.floor() as i64);
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let (x, y) = (cx + dx, cy + dy);
                    let r2 = (x as f64 - px).powi(2) + (y as f64 - py).powi(2);
                    let xi = x.rem_euclid(size as i64) as usize;
                    let yi = y.rem_euclid(size as i64) as usize;
                    data[(t, yi, xi)] += (-r2 / (2.0 * sigma * sigma)).exp() as f32;
                }
            }
        }
        for v in data.index_axis_mut(ndarray::Axis(0), t).iter_mut() {
            *v += noise.sample(&mut rng) as f32;
        }
        for p in positions.iter_mut() {
            p.0 = (p.0 + step.sample(&mut rng)).rem_euclid(extent);
            p.1 = (p.1 + step.sample(&mut rng)).rem_euclid(extent);
        }
    }

    InMemoryStack::new(data).unwrap()
}

fn config(max_tau: Option<usize>) -> AnalysisConfig {
    AnalysisConfig {
        file: "synthetic.tif".into(),
        um_per_px: None,
        ms_per_frame: None,
        max_tau,
        model: ModelKind::SingleExponential,
        q_min: 1,
        q_max: Some(60),
        out_dir: None,
        execution: ExecutionConfig::default(),
        progress: false,
    }
}

#[test]
fn small_frames_fail_calibration_before_processing() {
    let stack = brownian_stack(10, 64, 10, 1);
    let err = run_on_stack(&stack, &config(None), &NoProgress).unwrap_err();
    assert!(matches!(err, DdmError::CalibrationUndersized { bins: 46, required: 100 }));
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn synthetic_diffusion_runs_end_to_end() {
    let stack = brownian_stack(40, 160, 60, 2)
        .with_metadata(StackMetadata {
            um_per_px: Some(0.5),
            ms_per_frame: Some(10.0),
        })
        .with_source("/data/synthetic_beads.tif");
    let out = tempfile::tempdir().unwrap();
    let mut cfg = config(Some(20));
    cfg.out_dir = Some(out.path().to_path_buf());

    let run = run_on_stack(&stack, &cfg, &NoProgress).unwrap();

    assert_eq!(run.matrix.taus(), (1..=20).collect::<Vec<_>>().as_slice());
    assert_eq!(run.matrix.n_q(), 114);
    assert_eq!(run.calibration.a.len(), 114);
    assert!(run.calibration.b.is_finite() && run.calibration.b > 0.0);
    assert_eq!(run.summary.strategy, Strategy::InMemory);
    assert_eq!(run.fits.attempted(), 60);
    assert_eq!(run.summary.fitted + run.summary.skipped, 60);
    for (q, fit) in &run.fits.fits {
        assert!((1..=60).contains(q));
        assert!(fit.params.iter().all(|p| p.is_finite()));
    }
    assert_eq!(run.wavevectors.as_ref().map(Vec::len), Some(114));

    let paths = run.exported.unwrap();
    assert!(paths.csv.ends_with("synthetic_beads_matrix.csv"));
    let artifact = read_artifact(&paths.json).unwrap();
    assert_eq!(artifact.taus.len(), 20);
    assert_eq!(artifact.source, "/data/synthetic_beads.tif");
}

#[test]
fn rerun_with_more_lags_extends_the_exported_matrix() {
    let stack = brownian_stack(24, 160, 30, 3).with_source("/data/rerun.tif");
    let out = tempfile::tempdir().unwrap();

    let mut cfg = config(Some(5));
    cfg.out_dir = Some(out.path().to_path_buf());
    run_on_stack(&stack, &cfg, &NoProgress).unwrap();

    cfg.max_tau = Some(8);
    cfg.execution.strategy = StrategyKind::Streaming;
    let run = run_on_stack(&stack, &cfg, &NoProgress).unwrap();

    let artifact = read_artifact(&run.exported.unwrap().json).unwrap();
    assert_eq!(artifact.taus, (1..=8).collect::<Vec<_>>());
}

#[test]
fn execution_strategies_agree() {
    let stack = brownian_stack(16, 48, 12, 4);
    let lags = LagTimes::new(vec![1, 2, 5, 9, 15], 16).unwrap();
    let build = |strategy, threads| {
        let execution = ExecutionConfig {
            strategy,
            chunk_frames: 3,
            threads,
            ..ExecutionConfig::default()
        };
        DdmMatrixBuilder::new().build(&stack, Some(&lags), &execution).unwrap()
    };

    let reference = build(StrategyKind::Streaming, None);
    for (strategy, threads) in [
        (StrategyKind::InMemory, None),
        (StrategyKind::Chunked, None),
        (StrategyKind::Chunked, Some(2)),
        (StrategyKind::Auto, Some(1)),
    ] {
        let other = build(strategy, threads);
        assert_eq!(other.taus(), reference.taus());
        for (a, b) in other.values().iter().zip(reference.values().iter()) {
            if a.is_nan() {
                assert!(b.is_nan());
            } else {
                assert_relative_eq!(*a, *b, max_relative = 1e-3);
            }
        }
    }
}

#[test]
fn synthesized_matrix_recovers_decay_time() {
    let taus: Vec<usize> = (1..=60).collect();
    let tau_c = 12.0;
    let values = Array2::from_shape_fn((taus.len(), 3), |(i, q)| {
        (-(taus[i] as f64 / (tau_c * (q + 1) as f64))).exp()
    });
    let isf = Isf::new(taus.clone(), values).unwrap();
    let calibration = Calibration {
        a: vec![1e4, 5e3, 2e3],
        b: 40.0,
    };

    let matrix = synthesize_ddm_matrix(&isf, &calibration, (128, 128)).unwrap();
    let recovered = extract_isf(&matrix, &calibration).unwrap();
    let lag_axis: Vec<f64> = taus.iter().map(|&t| t as f64).collect();

    let fit = fit_isf(&recovered.curve(1).unwrap(), &lag_axis, ModelKind::SingleExponential).unwrap();
    assert_relative_eq!(fit.param("tau").unwrap(), 24.0, max_relative = 1e-4);
    assert_relative_eq!(fit.param("S").unwrap(), 1.0, max_relative = 1e-4);
}

#[test]
fn white_noise_shows_no_decorrelation() {
    let mut rng = StdRng::seed_from_u64(5);
    let normal = Normal::new(0.0f32, 1.0).unwrap();
    let data = Array3::from_shape_simple_fn((30, 160, 160), || normal.sample(&mut rng));
    let stack = InMemoryStack::new(data).unwrap();

    let run = run_on_stack(&stack, &config(Some(10)), &NoProgress).unwrap();
    let b = run.calibration.b;

    // Difference power matches the static power spectrum: no signal above the floor.
    for q in 20..100 {
        assert!(run.calibration.a[q].abs() < 0.15 * b, "A[{q}] = {}", run.calibration.a[q]);
        let column = run.matrix.values().column(q);
        let mean = column.mean().unwrap();
        for &v in column.iter() {
            assert!((v - mean).abs() < 0.15 * mean, "q={q}: {v} vs {mean}");
        }
    }
    assert_eq!(run.fits.attempted(), 60);

    // Nothing decorrelates, so no bin may report a confident decay time.
    for (q, reason) in &run.fits.skipped {
        assert!(reason.contains("cannot be fitted"), "q={q}: {reason}");
    }
    for (q, fit) in &run.fits.fits {
        let tau = fit.param("tau").unwrap();
        let err = fit.error("tau").unwrap();
        assert!(tau > 100.0 && err > tau, "q={q}: tau = {tau} ± {err}");
    }
}

#[test]
fn out_of_range_q_fails_before_processing() {
    let stack = brownian_stack(12, 160, 10, 6);
    let out = tempfile::tempdir().unwrap();
    let mut cfg = config(Some(4));
    cfg.q_max = Some(500);
    cfg.out_dir = Some(out.path().to_path_buf());

    let err = run_on_stack(&stack, &cfg, &NoProgress).unwrap_err();
    assert!(matches!(err, DdmError::InvalidInput(ref msg) if msg.contains("0..=113")), "{err}");
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}
