//! Amplitude `A(q)` and noise floor `B` from the time-averaged power spectrum.
//!
//! `B` is the mean of the radial profile over bins `[n − 100, n − 50)`: the
//! high-q band, assumed to be dominated by camera and shot noise. `A(q)` is the
//! profile minus `B`. The window is fixed in bins, independent of resolution.

use ndarray::ArrayView2;
use tracing::info;

use crate::domain::{Calibration, ImageStack};
use crate::error::{DdmError, Result};
use crate::math::RadialAverager;
use crate::processing::engine::DifferenceFftEngine;

/// Bins excluded at the very end of the profile.
pub const NOISE_TAIL_SKIP: usize = 50;
/// Width of the noise-floor window.
pub const NOISE_WINDOW: usize = 50;
/// Minimum profile length for the noise-floor estimate.
pub const MIN_PROFILE_BINS: usize = NOISE_TAIL_SKIP + NOISE_WINDOW;

/// Fail early when frames of this shape cannot support the noise window.
pub fn check_calibration_shape(height: usize, width: usize) -> Result<RadialAverager> {
    let averager = RadialAverager::centered(height, width);
    if averager.n_bins() < MIN_PROFILE_BINS {
        return Err(DdmError::CalibrationUndersized {
            bins: averager.n_bins(),
            required: MIN_PROFILE_BINS,
        });
    }
    Ok(averager)
}

/// Estimate `(A, B)` for the engine's stack.
pub fn estimate_calibration<S: ImageStack + ?Sized>(engine: &DifferenceFftEngine<'_, S>) -> Result<Calibration> {
    let (height, width) = engine.frame_shape();
    let averager = check_calibration_shape(height, width)?;
    let power = engine.mean_power_spectrum()?;
    let profile = averager.average(power.view())?;
    let calibration = calibration_from_profile(&profile)?;
    info!(b = calibration.b, q_bins = calibration.a.len(), "calibration estimated");
    Ok(calibration)
}

/// `(A, B)` from an already averaged, FFT-shifted power spectrum.
pub fn calibration_from_power_spectrum(power: ArrayView2<'_, f64>) -> Result<Calibration> {
    let (height, width) = power.dim();
    let averager = check_calibration_shape(height, width)?;
    let profile = averager.average(power)?;
    calibration_from_profile(&profile)
}

/// `(A, B)` from a radial profile of the power spectrum.
///
/// Empty (NaN) bins inside the noise window are skipped.
pub fn calibration_from_profile(profile: &[f64]) -> Result<Calibration> {
    let n = profile.len();
    if n < MIN_PROFILE_BINS {
        return Err(DdmError::CalibrationUndersized {
            bins: n,
            required: MIN_PROFILE_BINS,
        });
    }

    let window = &profile[n - MIN_PROFILE_BINS..n - NOISE_TAIL_SKIP];
    let (sum, count) = window
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), &v| (s + v, c + 1));
    if count == 0 {
        return Err(DdmError::InvalidInput(
            "Noise-floor window of the radial profile has no samples.".into(),
        ));
    }
    let b = sum / count as f64;
    let a = profile.iter().map(|&v| v - b).collect();

    Ok(Calibration { a, b })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecutionConfig, InMemoryStack};
    use ndarray::{Array2, Array3};

    #[test]
    fn noise_floor_uses_fixed_window() {
        // Profile: 0..150 so the window [50, 100) has mean 74.5.
        let profile: Vec<f64> = (0..150).map(|i| i as f64).collect();
        let cal = calibration_from_profile(&profile).unwrap();
        assert_eq!(cal.b, 74.5);
        assert_eq!(cal.a.len(), 150);
        assert_eq!(cal.a[0], -74.5);
        assert_eq!(cal.a[149], 149.0 - 74.5);
    }

    #[test]
    fn nan_tail_bins_are_tolerated() {
        let mut profile = vec![2.0; 120];
        profile[30] = f64::NAN;
        profile[110] = f64::NAN;
        let cal = calibration_from_profile(&profile).unwrap();
        assert_eq!(cal.b, 2.0);
        assert!(cal.a[110].is_nan());
    }

    #[test]
    fn short_profiles_fail_explicitly() {
        let err = calibration_from_profile(&[1.0; 99]).unwrap_err();
        assert!(matches!(err, DdmError::CalibrationUndersized { bins: 99, required: 100 }));
    }

    #[test]
    fn small_frames_fail_before_any_fft() {
        let stack = InMemoryStack::new(Array3::zeros((4, 64, 64))).unwrap();
        let engine = DifferenceFftEngine::new(&stack, &ExecutionConfig::default()).unwrap();
        let err = estimate_calibration(&engine).unwrap_err();
        assert!(matches!(err, DdmError::CalibrationUndersized { bins: 46, .. }));
    }

    #[test]
    fn flat_power_spectrum_has_zero_amplitude() {
        let power = Array2::from_elem((160, 160), 7.0);
        let cal = calibration_from_power_spectrum(power.view()).unwrap();
        assert_eq!(cal.b, 7.0);
        assert!(cal.a.iter().filter(|v| !v.is_nan()).all(|&v| v == 0.0));
    }
}
