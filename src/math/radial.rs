//! Azimuthal (radial) averaging of 2D spectra.
//!
//! Every pixel is assigned to the bin `round(|p - c|)` where `c` is the centre.
//! The bin assignment depends only on the frame shape and centre, so it is
//! computed once and reused for every lag time.

use ndarray::ArrayView2;

use crate::error::{DdmError, Result};

/// Precomputed pixel-to-bin assignment for one shape and centre.
#[derive(Debug, Clone)]
pub struct RadialAverager {
    shape: (usize, usize),
    bins: Vec<usize>,
    counts: Vec<usize>,
}

impl RadialAverager {
    /// Bin assignment for `shape = (height, width)` around `center = (cx, cy)`,
    /// with `cx` along columns and `cy` along rows.
    pub fn new(shape: (usize, usize), center: (f64, f64)) -> Self {
        let (height, width) = shape;
        let (cx, cy) = center;
        let mut bins = Vec::with_capacity(height * width);
        for y in 0..height {
            let dy = y as f64 - cy;
            for x in 0..width {
                let dx = x as f64 - cx;
                bins.push((dx * dx + dy * dy).sqrt().round() as usize);
            }
        }

        let n_bins = bins.iter().copied().max().map_or(0, |m| m + 1);
        let mut counts = vec![0usize; n_bins];
        for &b in &bins {
            counts[b] += 1;
        }

        Self {
            shape,
            bins,
            counts,
        }
    }

    /// Averager centred on the pixel `(width / 2, height / 2)` (integer division),
    /// where `fftshift` puts zero frequency for odd and even sizes alike.
    pub fn centered(height: usize, width: usize) -> Self {
        Self::new((height, width), ((width / 2) as f64, (height / 2) as f64))
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    /// Profile length: largest bin index present plus one.
    pub fn n_bins(&self) -> usize {
        self.counts.len()
    }

    /// Mean of `data` per radial bin. Empty bins are `NaN`.
    pub fn average(&self, data: ArrayView2<'_, f64>) -> Result<Vec<f64>> {
        if data.dim() != self.shape {
            return Err(DdmError::InvalidInput(format!(
                "Radial averager built for {:?} but got data of shape {:?}.",
                self.shape,
                data.dim()
            )));
        }

        Ok(self.reduce(data))
    }

    fn reduce(&self, data: ArrayView2<'_, f64>) -> Vec<f64> {
        let mut sums = vec![0.0f64; self.n_bins()];
        // `iter()` walks in logical row-major order, matching `bins`.
        for (&b, &v) in self.bins.iter().zip(data.iter()) {
            sums[b] += v;
        }

        sums.into_iter()
            .zip(&self.counts)
            .map(|(s, &c)| if c == 0 { f64::NAN } else { s / c as f64 })
            .collect()
    }
}

/// One-shot radial profile of `data` about `center = (cx, cy)`.
pub fn radial_profile(data: ArrayView2<'_, f64>, center: (f64, f64)) -> Vec<f64> {
    RadialAverager::new(data.dim(), center).reduce(data)
}
