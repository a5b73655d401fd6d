//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during processing and fitting
//! - exported to JSON/CSV
//! - reloaded later for refits or comparisons

use std::f64::consts::PI;
use std::str::FromStr;

use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{DdmError, Result};

/// ISF decay model used by the fitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    SingleExponential,
    DoubleExponential,
    Schultz,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [
        ModelKind::SingleExponential,
        ModelKind::DoubleExponential,
        ModelKind::Schultz,
    ];

    /// Canonical name, as accepted on the command line.
    pub fn name(self) -> &'static str {
        match self {
            ModelKind::SingleExponential => "single-exponential",
            ModelKind::DoubleExponential => "double-exponential",
            ModelKind::Schultz => "schultz",
        }
    }

    pub fn supported_names() -> Vec<&'static str> {
        Self::ALL.iter().map(|m| m.name()).collect()
    }

    /// Parameter labels in the order the fitter reports them.
    pub fn param_names(self) -> &'static [&'static str] {
        match self {
            ModelKind::SingleExponential => &["tau", "S"],
            ModelKind::DoubleExponential => &["tau1", "tau2", "n", "S1", "S2"],
            ModelKind::Schultz => &["tau1", "tau2", "n", "S", "Z"],
        }
    }

    pub fn param_count(self) -> usize {
        self.param_names().len()
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = DdmError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_lowercase();
        match key.as_str() {
            "single-exponential" | "singleexp" | "single" => Ok(ModelKind::SingleExponential),
            "double-exponential" | "doubleexp" | "double" => Ok(ModelKind::DoubleExponential),
            "schultz" => Ok(ModelKind::Schultz),
            _ => Err(DdmError::UnsupportedModel {
                name: s.to_string(),
                supported: ModelKind::supported_names(),
            }),
        }
    }
}

/// Validated, ascending, de-duplicated set of lag times (in frames).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LagTimes(Vec<usize>);

impl LagTimes {
    /// Validate explicit lag times against a stack of `frames` frames.
    pub fn new(mut taus: Vec<usize>, frames: usize) -> Result<Self> {
        if taus.is_empty() {
            return Err(DdmError::InvalidInput("Lag time set is empty.".into()));
        }
        if let Some(&bad) = taus.iter().find(|&&tau| tau == 0 || tau >= frames) {
            return Err(DdmError::InvalidLagTime { tau: bad, frames });
        }
        taus.sort_unstable();
        taus.dedup();
        Ok(Self(taus))
    }

    /// All lags `1..=frames/2`.
    pub fn default_for(frames: usize) -> Result<Self> {
        if frames < 2 {
            return Err(DdmError::InvalidInput(format!(
                "Image stack needs at least 2 frames, got {frames}."
            )));
        }
        Ok(Self((1..=frames / 2).collect()))
    }

    /// Explicit lags when given, otherwise the default range.
    pub fn resolve(taus: Option<Vec<usize>>, frames: usize) -> Result<Self> {
        match taus {
            Some(taus) => Self::new(taus, frames),
            None => Self::default_for(frames),
        }
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Radially averaged image structure function, rows = lag time, columns = q bin.
///
/// Immutable once built; merging produces a new matrix (see `io::artifact`).
#[derive(Debug, Clone, PartialEq)]
pub struct DdmMatrix {
    taus: Vec<usize>,
    values: Array2<f64>,
    frame_shape: (usize, usize),
}

impl DdmMatrix {
    pub fn new(taus: Vec<usize>, values: Array2<f64>, frame_shape: (usize, usize)) -> Result<Self> {
        if taus.len() != values.nrows() {
            return Err(DdmError::InvalidInput(format!(
                "DDM matrix has {} rows but {} lag times.",
                values.nrows(),
                taus.len()
            )));
        }
        if taus.windows(2).any(|w| w[0] >= w[1]) {
            return Err(DdmError::InvalidInput(
                "DDM matrix lag times must be strictly ascending.".into(),
            ));
        }
        Ok(Self {
            taus,
            values,
            frame_shape,
        })
    }

    pub fn taus(&self) -> &[usize] {
        &self.taus
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Frame shape `(height, width)` of the stack the matrix was computed from.
    pub fn frame_shape(&self) -> (usize, usize) {
        self.frame_shape
    }

    pub fn n_q(&self) -> usize {
        self.values.ncols()
    }

    /// Radial profile at the lag time `tau`, if present.
    pub fn row_for(&self, tau: usize) -> Option<ArrayView1<'_, f64>> {
        let idx = self.taus.binary_search(&tau).ok()?;
        Some(self.values.index_axis(Axis(0), idx))
    }

    /// Lag times converted to milliseconds.
    pub fn lag_times_ms(&self, ms_per_frame: f64) -> Vec<f64> {
        self.taus.iter().map(|&t| t as f64 * ms_per_frame).collect()
    }

    /// Wavevector magnitude (rad/µm) of every q bin, `q_r = 2π r / (N Δx)` with
    /// `N = min(height, width)`.
    pub fn wavevectors(&self, um_per_px: f64) -> Vec<f64> {
        let n = self.frame_shape.0.min(self.frame_shape.1) as f64;
        (0..self.n_q())
            .map(|r| 2.0 * PI * r as f64 / (n * um_per_px))
            .collect()
    }
}

/// Amplitude `A(q)` and noise floor `B` of a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub a: Vec<f64>,
    pub b: f64,
}

/// Intermediate scattering function, stored τ-major like `DdmMatrix`.
#[derive(Debug, Clone, PartialEq)]
pub struct Isf {
    taus: Vec<usize>,
    values: Array2<f64>,
}

impl Isf {
    /// Wrap `(τ, q)` values, one row per lag time.
    pub fn new(taus: Vec<usize>, values: Array2<f64>) -> Result<Self> {
        if taus.len() != values.nrows() {
            return Err(DdmError::InvalidInput(format!(
                "ISF has {} rows but {} lag times.",
                values.nrows(),
                taus.len()
            )));
        }
        Ok(Self { taus, values })
    }

    pub(crate) fn from_parts(taus: Vec<usize>, values: Array2<f64>) -> Self {
        Self { taus, values }
    }

    pub fn taus(&self) -> &[usize] {
        &self.taus
    }

    /// Raw `(τ, q)` values.
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_q(&self) -> usize {
        self.values.ncols()
    }

    /// The decay curve of a single q bin across all lag times.
    pub fn curve(&self, q: usize) -> Option<Vec<f64>> {
        if q >= self.n_q() {
            return None;
        }
        Some(self.values.column(q).to_vec())
    }

    /// One curve per q bin, in q order.
    pub fn curves(&self) -> impl Iterator<Item = ArrayView1<'_, f64>> + '_ {
        self.values.axis_iter(Axis(1))
    }

    /// `(q, τ)` copy of the values.
    pub fn transposed(&self) -> Array2<f64> {
        self.values.t().to_owned()
    }
}

/// Fit output for one ISF curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub model: ModelKind,
    /// Point estimates, ordered as `ModelKind::param_names`.
    pub params: Vec<f64>,
    /// Standard errors (sqrt of the covariance diagonal), same order.
    pub errors: Vec<f64>,
    pub sse: f64,
    pub rmse: f64,
    pub iterations: usize,
    pub n: usize,
}

impl FitResult {
    pub fn param(&self, name: &str) -> Option<f64> {
        let idx = self.model.param_names().iter().position(|&p| p == name)?;
        self.params.get(idx).copied()
    }

    pub fn error(&self, name: &str) -> Option<f64> {
        let idx = self.model.param_names().iter().position(|&p| p == name)?;
        self.errors.get(idx).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_names_round_trip() {
        for kind in ModelKind::ALL {
            assert_eq!(kind.name().parse::<ModelKind>().unwrap(), kind);
        }
        assert_eq!(
            "singleExp".parse::<ModelKind>().unwrap(),
            ModelKind::SingleExponential
        );
    }

    #[test]
    fn unknown_model_is_rejected() {
        let err = "foo".parse::<ModelKind>().unwrap_err();
        assert!(matches!(err, DdmError::UnsupportedModel { .. }));
    }

    #[test]
    fn lag_times_reject_zero_and_out_of_range() {
        assert!(matches!(
            LagTimes::new(vec![0, 1], 10),
            Err(DdmError::InvalidLagTime { tau: 0, .. })
        ));
        assert!(matches!(
            LagTimes::new(vec![3, 10], 10),
            Err(DdmError::InvalidLagTime { tau: 10, .. })
        ));
    }

    #[test]
    fn lag_times_are_sorted_and_deduplicated() {
        let taus = LagTimes::new(vec![5, 1, 3, 3], 10).unwrap();
        assert_eq!(taus.as_slice(), &[1, 3, 5]);
    }

    #[test]
    fn default_lag_times_cover_half_the_stack() {
        let taus = LagTimes::default_for(10).unwrap();
        assert_eq!(taus.as_slice(), &[1, 2, 3, 4, 5]);
        assert_eq!(LagTimes::default_for(2).unwrap().as_slice(), &[1]);
    }

    #[test]
    fn matrix_rejects_row_count_mismatch() {
        let err = DdmMatrix::new(vec![1, 2], Array2::zeros((3, 4)), (8, 8)).unwrap_err();
        assert!(matches!(err, DdmError::InvalidInput(_)));
    }

    #[test]
    fn wavevectors_scale_with_pixel_size() {
        let m = DdmMatrix::new(vec![1], Array2::zeros((1, 3)), (64, 128)).unwrap();
        let q = m.wavevectors(0.5);
        assert_eq!(q[0], 0.0);
        assert!((q[1] - 2.0 * PI / 32.0).abs() < 1e-12);
        assert_eq!(m.lag_times_ms(20.0), vec![20.0]);
    }
}
