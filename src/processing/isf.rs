//! Conversion between the DDM matrix and the intermediate scattering function.
//!
//! `D(q, τ) = A(q) (1 − f(q, τ)) + B`, so `f = 1 − (D − B) / A`.

use ndarray::{Array2, ArrayView1, Axis, Zip};

use crate::domain::{Calibration, DdmMatrix, Isf};
use crate::error::{DdmError, Result};

/// Invert the DDM model for every `(τ, q)` cell.
///
/// Bins where `A(q)` is zero or NaN produce non-finite ISF values; fitting
/// skips those curves.
pub fn extract_isf(matrix: &DdmMatrix, calibration: &Calibration) -> Result<Isf> {
    check_q_len(matrix.n_q(), calibration)?;

    let mut values = matrix.values().clone();
    for mut row in values.axis_iter_mut(Axis(0)) {
        Zip::from(&mut row)
            .and(ArrayView1::from(&calibration.a[..]))
            .for_each(|d, &a| *d = 1.0 - (*d - calibration.b) / a);
    }

    Ok(Isf::from_parts(matrix.taus().to_vec(), values))
}

/// Forward model: the DDM matrix implied by an ISF and a calibration.
pub fn synthesize_ddm_matrix(
    isf: &Isf,
    calibration: &Calibration,
    frame_shape: (usize, usize),
) -> Result<DdmMatrix> {
    check_q_len(isf.n_q(), calibration)?;

    let mut values: Array2<f64> = isf.values().clone();
    for mut row in values.axis_iter_mut(Axis(0)) {
        Zip::from(&mut row)
            .and(ArrayView1::from(&calibration.a[..]))
            .for_each(|f, &a| *f = a * (1.0 - *f) + calibration.b);
    }

    DdmMatrix::new(isf.taus().to_vec(), values, frame_shape)
}

fn check_q_len(n_q: usize, calibration: &Calibration) -> Result<()> {
    if calibration.a.len() != n_q {
        return Err(DdmError::InvalidInput(format!(
            "Calibration has {} q bins but the matrix has {n_q}.",
            calibration.a.len()
        )));
    }
    Ok(())
}
