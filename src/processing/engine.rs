//! Difference-FFT engine.
//!
//! For a lag `τ` the engine computes
//!
//! ```text
//! g(q, τ) = fftshift( Σ_j |FFT(frame[j+τ] − frame[j])|² ) / (T − τ)
//! ```
//!
//! over all `j ∈ [0, T − τ)`, plus the lag-independent power spectrum used for
//! calibration. Three backends produce the same numbers:
//!
//! - **in-memory**: transform every frame once (FFT is linear, so the spectrum
//!   of a difference is the difference of spectra) and difference the cube
//! - **streaming**: one frame pair and one spectrum buffer at a time
//! - **chunked**: split the `j` range into chunks and fold them in parallel;
//!   every rayon job owns one accumulator until the final pairwise merge
//!
//! Spectra are single precision; accumulators are double precision.

use ndarray::{Array2, ArrayView3, Axis};
use rayon::prelude::*;
use rustfft::num_complex::Complex32;
use tracing::{debug, info, warn};

use crate::domain::{ExecutionConfig, ImageStack, validate_stack};
use crate::error::{DdmError, Result};
use crate::math::{Fft2, accumulate_power, fftshift};
use crate::processing::strategy::{ExecutionPlan, SPECTRUM_SAMPLE_BYTES, Strategy};

/// Spectra of every frame, frame-major (`T × H × W` complex samples).
struct SpectrumCube {
    data: Vec<Complex32>,
    frame_len: usize,
}

impl SpectrumCube {
    fn frame(&self, index: usize) -> &[Complex32] {
        &self.data[index * self.frame_len..(index + 1) * self.frame_len]
    }
}

enum Backend {
    InMemory(SpectrumCube),
    Streaming,
    Chunked { chunk_frames: usize },
}

pub struct DifferenceFftEngine<'s, S: ImageStack + ?Sized> {
    stack: &'s S,
    fft: Fft2,
    plan: ExecutionPlan,
    backend: Backend,
}

impl<'s, S: ImageStack + ?Sized> DifferenceFftEngine<'s, S> {
    /// Resolve the execution strategy for `stack` and prepare the backend.
    pub fn new(stack: &'s S, config: &ExecutionConfig) -> Result<Self> {
        validate_stack(stack)?;
        let plan = ExecutionPlan::resolve(config, stack)?;
        Self::with_plan(stack, plan, config.chunk_frames)
    }

    /// Prepare the backend for an already resolved plan.
    ///
    /// `fallback_chunk_frames` is used if the in-memory cube cannot be allocated.
    pub fn with_plan(stack: &'s S, mut plan: ExecutionPlan, fallback_chunk_frames: usize) -> Result<Self> {
        validate_stack(stack)?;
        let (height, width) = stack.shape();
        let fft = Fft2::new(height, width);

        let backend = match plan.strategy {
            Strategy::InMemory => {
                let Some(view) = stack.as_array() else {
                    return Err(DdmError::TypeMismatch(
                        "in-memory strategy requires a materialized stack".into(),
                    ));
                };
                let budget = plan.memory_budget_bytes;
                match plan.install(|| transform_cube(&fft, view, budget)) {
                    Ok(cube) => Backend::InMemory(cube),
                    Err(DdmError::ResourceExhausted(reason)) => {
                        warn!(%reason, "spectrum cube does not fit in memory, falling back to chunked CPU path");
                        let chunk_frames = fallback_chunk_frames.max(1);
                        plan.strategy = Strategy::Chunked { chunk_frames };
                        Backend::Chunked { chunk_frames }
                    }
                    Err(e) => return Err(e),
                }
            }
            Strategy::Streaming => Backend::Streaming,
            Strategy::Chunked { chunk_frames } => {
                if chunk_frames == 0 {
                    return Err(DdmError::InvalidInput("Chunk size must be >= 1 frame.".into()));
                }
                Backend::Chunked { chunk_frames }
            }
        };

        info!(
            strategy = %plan.strategy,
            frames = stack.len(),
            height,
            width,
            "difference-FFT engine ready"
        );

        Ok(Self {
            stack,
            fft,
            plan,
            backend,
        })
    }

    pub fn strategy(&self) -> Strategy {
        self.plan.strategy
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn stack(&self) -> &'s S {
        self.stack
    }

    pub fn frame_shape(&self) -> (usize, usize) {
        self.fft.shape()
    }

    pub fn frames(&self) -> usize {
        self.stack.len()
    }

    /// Reject lags outside `1 <= τ < T` before any work starts.
    pub fn check_lag(&self, tau: usize) -> Result<()> {
        let frames = self.frames();
        if tau == 0 || tau >= frames {
            return Err(DdmError::InvalidLagTime { tau, frames });
        }
        Ok(())
    }

    /// FFT-shifted `Σ_j |FFT(frame[j+τ] − frame[j])|²` (not yet divided by `T − τ`).
    pub fn difference_power_sum(&self, tau: usize) -> Result<Array2<f64>> {
        self.check_lag(tau)?;
        let (height, width) = self.frame_shape();
        let pairs = self.frames() - tau;

        let acc = match &self.backend {
            Backend::InMemory(cube) => self.plan.install(|| in_memory_difference(cube, tau, pairs, width)),
            Backend::Streaming => {
                let mut acc = vec![0.0f64; self.fft.len()];
                self.accumulate_pairs(&mut acc, tau, 0..pairs)?;
                acc
            }
            Backend::Chunked { chunk_frames } => {
                let chunk_frames = *chunk_frames;
                self.plan.install(|| {
                    self.chunked(pairs, chunk_frames, |acc, range| self.accumulate_pairs(acc, tau, range))
                })?
            }
        };

        Ok(fftshift(&acc, height, width))
    }

    /// Unreduced structure function `g(q, τ)` (FFT-shifted, normalized by `T − τ`).
    pub fn structure_function(&self, tau: usize) -> Result<Array2<f64>> {
        let mut sum = self.difference_power_sum(tau)?;
        let pairs = (self.frames() - tau) as f64;
        sum.mapv_inplace(|v| v / pairs);
        Ok(sum)
    }

    /// FFT-shifted time average of `2·|FFT(frame)|²` over every frame.
    pub fn mean_power_spectrum(&self) -> Result<Array2<f64>> {
        let (height, width) = self.frame_shape();
        let frames = self.frames();
        let scale = 2.0 / frames as f64;

        let acc = match &self.backend {
            Backend::InMemory(cube) => {
                let mut acc = vec![0.0f64; cube.frame_len];
                for t in 0..frames {
                    accumulate_power(&mut acc, cube.frame(t), scale);
                }
                acc
            }
            Backend::Streaming => {
                let mut acc = vec![0.0f64; self.fft.len()];
                self.accumulate_frames(&mut acc, 0..frames, scale)?;
                acc
            }
            Backend::Chunked { chunk_frames } => {
                let chunk_frames = *chunk_frames;
                self.plan.install(|| {
                    self.chunked(frames, chunk_frames, |acc, range| self.accumulate_frames(acc, range, scale))
                })?
            }
        };

        Ok(fftshift(&acc, height, width))
    }

    /// Sequential accumulation of difference spectra for `j` in `range`.
    fn accumulate_pairs(&self, acc: &mut [f64], tau: usize, range: std::ops::Range<usize>) -> Result<()> {
        for j in range {
            let a = self.stack.frame(j)?;
            let b = self.stack.frame(j + tau)?;
            let spectrum = self.fft.forward_difference(a.view(), b.view());
            accumulate_power(acc, &spectrum, 1.0);
        }
        Ok(())
    }

    fn accumulate_frames(&self, acc: &mut [f64], range: std::ops::Range<usize>, scale: f64) -> Result<()> {
        for t in range {
            let frame = self.stack.frame(t)?;
            let spectrum = self.fft.forward_real(frame.view());
            accumulate_power(acc, &spectrum, scale);
        }
        Ok(())
    }

    /// Split `0..total` into chunks and fold them in parallel.
    ///
    /// Live accumulators are bounded by the number of rayon jobs, not by the
    /// number of chunks.
    fn chunked<F>(&self, total: usize, chunk_frames: usize, accumulate: F) -> Result<Vec<f64>>
    where
        F: Fn(&mut [f64], std::ops::Range<usize>) -> Result<()> + Sync,
    {
        let len = self.fft.len();
        let ranges: Vec<std::ops::Range<usize>> = (0..total)
            .step_by(chunk_frames)
            .map(|start| start..(start + chunk_frames).min(total))
            .collect();
        debug!(chunks = ranges.len(), chunk_frames, "chunked accumulation");

        let acc = ranges
            .into_par_iter()
            .try_fold(
                || vec![0.0f64; len],
                |mut acc, range| {
                    accumulate(&mut acc, range)?;
                    Ok::<_, DdmError>(acc)
                },
            )
            .try_reduce_with(|mut a, b| {
                for (x, y) in a.iter_mut().zip(&b) {
                    *x += y;
                }
                Ok(a)
            })
            .transpose()?;

        Ok(acc.unwrap_or_else(|| vec![0.0f64; len]))
    }
}

/// Transform every frame of a materialized stack, in parallel.
///
/// Fails with `ResourceExhausted` when the cube would exceed `budget_bytes` or
/// the allocator refuses it.
fn transform_cube(fft: &Fft2, view: ArrayView3<'_, f32>, budget_bytes: usize) -> Result<SpectrumCube> {
    let frame_len = fft.len();
    let total = view.len_of(Axis(0)).saturating_mul(frame_len);
    let bytes = total.saturating_mul(SPECTRUM_SAMPLE_BYTES);
    if bytes > budget_bytes {
        return Err(DdmError::ResourceExhausted(format!(
            "spectrum cube needs {bytes} bytes, budget is {budget_bytes}"
        )));
    }

    let mut data: Vec<Complex32> = Vec::new();
    data.try_reserve_exact(total).map_err(|e| {
        DdmError::ResourceExhausted(format!("cannot allocate {total} spectrum samples: {e}"))
    })?;
    data.resize(total, Complex32::new(0.0, 0.0));

    data.par_chunks_mut(frame_len)
        .enumerate()
        .for_each(|(t, out)| {
            let frame = view.index_axis(Axis(0), t);
            for (dst, &src) in out.iter_mut().zip(frame.iter()) {
                *dst = Complex32::new(src, 0.0);
            }
            fft.forward_in_place(out);
        });

    Ok(SpectrumCube { data, frame_len })
}

/// Per-pixel sum over `j` of `|S[j+τ] − S[j]|²`; pixels are independent, rows run in parallel.
fn in_memory_difference(cube: &SpectrumCube, tau: usize, pairs: usize, width: usize) -> Vec<f64> {
    let mut acc = vec![0.0f64; cube.frame_len];
    acc.par_chunks_mut(width)
        .enumerate()
        .for_each(|(row, out)| {
            let offset = row * width;
            for j in 0..pairs {
                let a = &cube.frame(j)[offset..offset + width];
                let b = &cube.frame(j + tau)[offset..offset + width];
                for ((o, x), y) in out.iter_mut().zip(a).zip(b) {
                    *o += (y - x).norm_sqr() as f64;
                }
            }
        });
    acc
}
