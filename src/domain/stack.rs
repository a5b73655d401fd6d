//! Image stack abstraction consumed by the DDM core.
//!
//! The core only ever sees `ImageStack`: a length, a per-frame shape, random
//! access to frames, and scale metadata. File readers live in `crate::io` and
//! produce implementations of this trait; the processing code never depends on
//! a file format.

use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{DdmError, Result};

/// Physical calibration of a stack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StackMetadata {
    /// Pixel size in microns.
    pub um_per_px: Option<f64>,
    /// Time between frames in milliseconds.
    pub ms_per_frame: Option<f64>,
}

impl StackMetadata {
    /// Apply explicit overrides (e.g. from the command line) on top of reader values.
    pub fn with_overrides(self, um_per_px: Option<f64>, ms_per_frame: Option<f64>) -> Self {
        Self {
            um_per_px: um_per_px.or(self.um_per_px),
            ms_per_frame: ms_per_frame.or(self.ms_per_frame),
        }
    }
}

/// Ordered sequence of equally-shaped real-valued frames.
///
/// Implementations must be safe to share between worker threads: the engine
/// reads frames concurrently when running chunked.
pub trait ImageStack: Sync {
    /// Number of frames `T`.
    fn len(&self) -> usize;

    /// Frame shape as `(height, width)`.
    fn shape(&self) -> (usize, usize);

    /// Fetch frame `index` as an owned `(height, width)` array.
    fn frame(&self, index: usize) -> Result<Array2<f32>>;

    fn metadata(&self) -> StackMetadata {
        StackMetadata::default()
    }

    /// Path of the file the frames came from, if any.
    fn source(&self) -> Option<&Path> {
        None
    }

    /// Whole-stack view `(T, H, W)` for materialized stacks.
    ///
    /// Lazy stacks return `None`; the in-memory strategy needs `Some`.
    fn as_array(&self) -> Option<ArrayView3<'_, f32>> {
        None
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Check the invariants every stack must satisfy before processing.
pub fn validate_stack<S: ImageStack + ?Sized>(stack: &S) -> Result<()> {
    let frames = stack.len();
    if frames < 2 {
        return Err(DdmError::InvalidInput(format!(
            "Image stack needs at least 2 frames, got {frames}."
        )));
    }
    let (height, width) = stack.shape();
    if height == 0 || width == 0 {
        return Err(DdmError::InvalidInput(format!(
            "Image stack has an empty frame shape ({height}x{width})."
        )));
    }
    Ok(())
}

/// A fully materialized `(T, H, W)` stack.
#[derive(Debug, Clone)]
pub struct InMemoryStack {
    data: Array3<f32>,
    metadata: StackMetadata,
    source: Option<PathBuf>,
}

impl InMemoryStack {
    pub fn new(data: Array3<f32>) -> Result<Self> {
        let (frames, height, width) = data.dim();
        if frames < 2 {
            return Err(DdmError::InvalidInput(format!(
                "Image stack needs at least 2 frames, got {frames}."
            )));
        }
        if height == 0 || width == 0 {
            return Err(DdmError::InvalidInput(format!(
                "Image stack has an empty frame shape ({height}x{width})."
            )));
        }
        Ok(Self {
            data,
            metadata: StackMetadata::default(),
            source: None,
        })
    }

    /// Build a stack from individual frames, rejecting mismatched shapes.
    pub fn from_frames(frames: Vec<Array2<f32>>) -> Result<Self> {
        let Some(first) = frames.first() else {
            return Err(DdmError::InvalidInput("Image stack has no frames.".into()));
        };
        let (height, width) = first.dim();
        let mut data = Array3::<f32>::zeros((frames.len(), height, width));
        for (i, frame) in frames.iter().enumerate() {
            if frame.dim() != (height, width) {
                return Err(DdmError::InvalidInput(format!(
                    "Frame {i} has shape {:?}, expected ({height}, {width}).",
                    frame.dim()
                )));
            }
            data.index_axis_mut(Axis(0), i).assign(frame);
        }
        Self::new(data)
    }

    pub fn with_metadata(mut self, metadata: StackMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }
}

impl ImageStack for InMemoryStack {
    fn len(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    fn shape(&self) -> (usize, usize) {
        let (_, height, width) = self.data.dim();
        (height, width)
    }

    fn frame(&self, index: usize) -> Result<Array2<f32>> {
        if index >= self.len() {
            return Err(DdmError::InvalidInput(format!(
                "Frame index {index} out of range for stack of {} frames.",
                self.len()
            )));
        }
        Ok(self.data.index_axis(Axis(0), index).to_owned())
    }

    fn metadata(&self) -> StackMetadata {
        self.metadata
    }

    fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    fn as_array(&self) -> Option<ArrayView3<'_, f32>> {
        Some(self.data.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_single_frame_stack() {
        let err = InMemoryStack::new(Array3::zeros((1, 4, 4))).unwrap_err();
        assert!(matches!(err, DdmError::InvalidInput(_)));
    }

    #[test]
    fn from_frames_rejects_mismatched_shapes() {
        let frames = vec![Array2::zeros((4, 4)), Array2::zeros((4, 5))];
        assert!(InMemoryStack::from_frames(frames).is_err());
    }

    #[test]
    fn frame_access_matches_backing_array() {
        let data = Array3::from_shape_fn((3, 2, 2), |(t, y, x)| (t * 100 + y * 10 + x) as f32);
        let stack = InMemoryStack::new(data).unwrap();
        assert_eq!(stack.len(), 3);
        assert_eq!(stack.shape(), (2, 2));
        let frame = stack.frame(2).unwrap();
        assert_eq!(frame[[1, 0]], 210.0);
        assert!(stack.frame(3).is_err());
        assert!(stack.as_array().is_some());
    }

    #[test]
    fn overrides_replace_reader_values() {
        let meta = StackMetadata {
            um_per_px: Some(0.5),
            ms_per_frame: None,
        };
        let merged = meta.with_overrides(None, Some(10.0));
        assert_eq!(merged.um_per_px, Some(0.5));
        assert_eq!(merged.ms_per_frame, Some(10.0));
    }
}
