//! Separable 2D FFT and quadrant shift.
//!
//! A 2D transform is one pass of 1D transforms over rows followed by one pass
//! over columns. Plans are built once per frame shape and shared read-only
//! between workers.

use std::sync::Arc;

use ndarray::{Array2, ArrayView2};
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

/// Cached forward plans for a `(height, width)` frame.
#[derive(Clone)]
pub struct Fft2 {
    height: usize,
    width: usize,
    row_fft: Arc<dyn Fft<f32>>,
    col_fft: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for Fft2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fft2")
            .field("height", &self.height)
            .field("width", &self.width)
            .finish()
    }
}

impl Fft2 {
    pub fn new(height: usize, width: usize) -> Self {
        let mut planner = FftPlanner::new();
        let row_fft = planner.plan_fft_forward(width);
        let col_fft = planner.plan_fft_forward(height);
        Self {
            height,
            width,
            row_fft,
            col_fft,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Number of complex samples in one frame.
    pub fn len(&self) -> usize {
        self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unnormalized forward transform of a real frame.
    pub fn forward_real(&self, frame: ArrayView2<'_, f32>) -> Vec<Complex32> {
        let mut buffer: Vec<Complex32> = frame.iter().map(|&v| Complex32::new(v, 0.0)).collect();
        self.forward_in_place(&mut buffer);
        buffer
    }

    /// Forward transform of the real difference `b - a` (same shape frames).
    pub fn forward_difference(&self, a: ArrayView2<'_, f32>, b: ArrayView2<'_, f32>) -> Vec<Complex32> {
        let mut buffer: Vec<Complex32> = a
            .iter()
            .zip(b.iter())
            .map(|(&x0, &x1)| Complex32::new(x1 - x0, 0.0))
            .collect();
        self.forward_in_place(&mut buffer);
        buffer
    }

    /// In-place forward transform of a row-major `height x width` buffer.
    ///
    /// # Panics
    /// Panics if `buffer.len() != height * width`.
    pub fn forward_in_place(&self, buffer: &mut [Complex32]) {
        assert_eq!(buffer.len(), self.len(), "FFT buffer does not match the planned shape");

        // Rows are contiguous; rustfft processes the buffer in `width`-sized chunks.
        self.row_fft.process(buffer);

        let mut columns = vec![Complex32::new(0.0, 0.0); buffer.len()];
        transpose(buffer, &mut columns, self.height, self.width);
        self.col_fft.process(&mut columns);
        transpose(&columns, buffer, self.width, self.height);
    }
}

/// Transpose a row-major `rows x cols` buffer into `dst` (`cols x rows`).
fn transpose(src: &[Complex32], dst: &mut [Complex32], rows: usize, cols: usize) {
    for r in 0..rows {
        for c in 0..cols {
            dst[c * rows + r] = src[r * cols + c];
        }
    }
}

/// Accumulate `scale * |z|^2` elementwise into `acc`.
pub fn accumulate_power(acc: &mut [f64], spectrum: &[Complex32], scale: f64) {
    for (a, z) in acc.iter_mut().zip(spectrum) {
        *a += scale * z.norm_sqr() as f64;
    }
}

/// Move the zero-frequency sample to the array centre.
///
/// Matches numpy's `fftshift`: element `(i, j)` lands at
/// `((i + h/2) % h, (j + w/2) % w)`.
pub fn fftshift(data: &[f64], height: usize, width: usize) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((height, width));
    for i in 0..height {
        let di = (i + height / 2) % height;
        for j in 0..width {
            let dj = (j + width / 2) % width;
            out[[di, dj]] = data[i * width + j];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn naive_dft(frame: &Array2<f32>) -> Vec<(f64, f64)> {
        let (h, w) = frame.dim();
        let mut out = Vec::with_capacity(h * w);
        for ky in 0..h {
            for kx in 0..w {
                let mut re = 0.0;
                let mut im = 0.0;
                for y in 0..h {
                    for x in 0..w {
                        let phase = -2.0
                            * std::f64::consts::PI
                            * ((ky * y) as f64 / h as f64 + (kx * x) as f64 / w as f64);
                        let v = frame[[y, x]] as f64;
                        re += v * phase.cos();
                        im += v * phase.sin();
                    }
                }
                out.push((re, im));
            }
        }
        out
    }

    #[test]
    fn matches_naive_dft_on_non_square_frame() {
        let frame = Array2::from_shape_fn((4, 6), |(y, x)| ((y * 7 + x * 3) % 5) as f32 - 1.5);
        let fft = Fft2::new(4, 6);
        let fast = fft.forward_real(frame.view());
        let slow = naive_dft(&frame);
        for (z, (re, im)) in fast.iter().zip(slow) {
            assert_relative_eq!(z.re as f64, re, epsilon = 1e-4);
            assert_relative_eq!(z.im as f64, im, epsilon = 1e-4);
        }
    }

    #[test]
    fn difference_transform_is_linear() {
        let a = Array2::from_shape_fn((4, 4), |(y, x)| (y + x) as f32);
        let b = Array2::from_shape_fn((4, 4), |(y, x)| (y * x) as f32);
        let fft = Fft2::new(4, 4);
        let direct = fft.forward_difference(a.view(), b.view());
        let fa = fft.forward_real(a.view());
        let fb = fft.forward_real(b.view());
        for ((d, x), y) in direct.iter().zip(&fa).zip(&fb) {
            let expected = y - x;
            assert_relative_eq!(d.re, expected.re, epsilon = 1e-4);
            assert_relative_eq!(d.im, expected.im, epsilon = 1e-4);
        }
    }

    #[test]
    fn fftshift_centres_zero_frequency() {
        let mut data = vec![0.0; 4 * 6];
        data[0] = 1.0;
        let shifted = fftshift(&data, 4, 6);
        assert_eq!(shifted[[2, 3]], 1.0);
        assert_eq!(shifted.sum(), 1.0);
    }

    #[test]
    fn fftshift_odd_sizes_match_numpy() {
        // numpy.fft.fftshift([0, 1, 2, 3, 4]) == [3, 4, 0, 1, 2]
        let data = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let shifted = fftshift(&data, 1, 5);
        assert_eq!(shifted.row(0).to_vec(), vec![3.0, 4.0, 0.0, 1.0, 2.0]);
    }
}
