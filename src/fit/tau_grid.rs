//! Tau grid generation for initial conditions.
//!
//! Nonlinear fits need a starting `τ` that is already in the right decade.
//! Seeds are drawn from a deterministic log-spaced grid spanning the observed
//! lag range, so the same curve always starts from the same point.

use crate::error::{DdmError, Result};

/// Upper end of the seed grid, as a multiple of the largest lag.
pub const SEED_SPAN_FACTOR: f64 = 10.0;

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0 && max > min) {
        return Err(DdmError::InvalidInput(format!(
            "Invalid tau range: min={min}, max={max} (must be finite, >0, and max>min)."
        )));
    }
    if steps < 2 {
        return Err(DdmError::InvalidInput("Tau steps must be >= 2.".into()));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push((ln_min + step * i as f64).exp());
    }
    Ok(out)
}

/// Seed grid over `[min positive lag, 10 · max lag]`.
pub fn seed_taus(lag_times: &[f64], steps: usize) -> Result<Vec<f64>> {
    let min = lag_times
        .iter()
        .copied()
        .filter(|&t| t > 0.0)
        .fold(f64::INFINITY, f64::min);
    let max = lag_times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() {
        return Err(DdmError::InvalidInput("Lag times contain no positive value.".into()));
    }
    log_space(min, max * SEED_SPAN_FACTOR, steps)
}

/// Ordered pairs `[τ1, τ2]` with `τ1 < τ2`.
pub fn seed_tau_pairs(lag_times: &[f64], steps: usize) -> Result<Vec<[f64; 2]>> {
    let values = seed_taus(lag_times, steps)?;
    let mut out = Vec::new();
    for i in 0..values.len() {
        for j in (i + 1)..values.len() {
            out.push([values[i], values[j]]);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_space_includes_endpoints() {
        let v = log_space(0.1, 10.0, 5).unwrap();
        assert!((v[0] - 0.1).abs() < 1e-12);
        assert!((v[v.len() - 1] - 10.0).abs() < 1e-12);
    }

    #[test]
    fn seeds_skip_zero_lag_and_extend_past_the_data() {
        let v = seed_taus(&[0.0, 2.0, 4.0, 8.0], 4).unwrap();
        assert!((v[0] - 2.0).abs() < 1e-12);
        assert!((v[3] - 80.0).abs() < 1e-9);
    }

    #[test]
    fn pairs_are_ordered() {
        let grid = seed_tau_pairs(&[1.0, 10.0], 6).unwrap();
        assert_eq!(grid.len(), 15);
        assert!(grid.iter().all(|[a, b]| a < b));
    }

    #[test]
    fn all_zero_lags_are_rejected() {
        assert!(matches!(seed_taus(&[0.0, 0.0], 4), Err(DdmError::InvalidInput(_))));
    }
}
