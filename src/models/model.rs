//! ISF model evaluation.
//!
//! The fitter relies on one primitive operation: predict `f(t)` for a model
//! kind and a parameter vector ordered as `ModelKind::param_names`.

use crate::domain::ModelKind;

/// Stretched exponential `exp(−(t/τ)^S)`.
///
/// `t = 0` is fully correlated. A collapsed `τ` (≤ 0) is fully decorrelated
/// for every positive lag.
pub fn stretched_exp(t: f64, tau: f64, stretch: f64) -> f64 {
    if t <= 0.0 {
        return 1.0;
    }
    if tau <= 0.0 {
        return 0.0;
    }
    (-(t / tau).powf(stretch)).exp()
}

/// Schultz-distributed ballistic velocity term.
///
/// `θ = (t/τ2)/(Z+1)`, `V = (Z+1)/(Z t/τ2) · sin(Z atan θ) / (1+θ²)^(Z/2)`,
/// with the limit `V(0) = 1`.
pub fn schultz_velocity(t: f64, tau2: f64, z: f64) -> f64 {
    if t <= 0.0 {
        return 1.0;
    }
    let x = t / tau2;
    let theta = x / (z + 1.0);
    let prefactor = (z + 1.0) / (z * x);
    prefactor * (z * theta.atan()).sin() / (1.0 + theta * theta).powf(z / 2.0)
}

/// Predict `f(t)` for the given model kind.
///
/// # Panics
/// Panics if `params` is shorter than `model.param_count()`.
pub fn predict(model: ModelKind, t: f64, params: &[f64]) -> f64 {
    match model {
        ModelKind::SingleExponential => stretched_exp(t, params[0], params[1]),
        ModelKind::DoubleExponential => {
            let (tau1, tau2, n, s1, s2) = (params[0], params[1], params[2], params[3], params[4]);
            n * stretched_exp(t, tau1, s1) + (1.0 - n) * stretched_exp(t, tau2, s2)
        }
        ModelKind::Schultz => {
            let (tau1, tau2, n, s, z) = (params[0], params[1], params[2], params[3], params[4]);
            stretched_exp(t, tau1, s) * ((1.0 - n) + n * schultz_velocity(t, tau2, z))
        }
    }
}

/// Predict the whole curve at lag times `t`.
pub fn predict_curve(model: ModelKind, t: &[f64], params: &[f64]) -> Vec<f64> {
    t.iter().map(|&t| predict(model, t, params)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn single_exponential_at_tau_is_one_over_e() {
        let y = predict(ModelKind::SingleExponential, 100.0, &[100.0, 1.5]);
        assert_relative_eq!(y, (-1.0f64).exp(), epsilon = 1e-12);
        assert_eq!(predict(ModelKind::SingleExponential, 0.0, &[100.0, 1.5]), 1.0);
    }

    #[test]
    fn double_exponential_mixes_components() {
        let p = [10.0, 1000.0, 0.3, 1.0, 1.0];
        let y = predict(ModelKind::DoubleExponential, 10.0, &p);
        let expected = 0.3 * (-1.0f64).exp() + 0.7 * (-0.01f64).exp();
        assert_relative_eq!(y, expected, epsilon = 1e-12);
    }

    #[test]
    fn schultz_velocity_is_continuous_at_zero() {
        assert_eq!(schultz_velocity(0.0, 5.0, 10.0), 1.0);
        assert_relative_eq!(schultz_velocity(1e-6, 5.0, 10.0), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn schultz_without_ballistic_fraction_is_stretched_exp() {
        let p = [50.0, 20.0, 0.0, 1.2, 10.0];
        for t in [0.0, 5.0, 50.0, 200.0] {
            assert_relative_eq!(
                predict(ModelKind::Schultz, t, &p),
                stretched_exp(t, 50.0, 1.2),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn collapsed_tau_is_decorrelated() {
        assert_eq!(stretched_exp(3.0, 0.0, 1.0), 0.0);
        assert_eq!(stretched_exp(0.0, 0.0, 1.0), 1.0);
    }
}
