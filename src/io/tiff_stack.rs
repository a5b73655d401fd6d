//! Lazy multi-page TIFF reader.
//!
//! Pages are validated once when the file is opened (same shape, grayscale)
//! and decoded one at a time on demand. Any integer or float sample type is
//! converted to `f32`.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ndarray::Array2;
use tiff::ColorType;
use tiff::decoder::{Decoder, DecodingResult};
use tracing::info;

use crate::domain::{ImageStack, StackMetadata};
use crate::error::{DdmError, Result};

type TiffDecoder = Decoder<BufReader<File>>;

pub struct TiffStack {
    path: PathBuf,
    decoder: Mutex<TiffDecoder>,
    frames: usize,
    height: usize,
    width: usize,
    metadata: StackMetadata,
}

impl std::fmt::Debug for TiffStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiffStack")
            .field("path", &self.path)
            .field("frames", &self.frames)
            .field("height", &self.height)
            .field("width", &self.width)
            .finish()
    }
}

impl TiffStack {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| DdmError::io("Failed to open image stack", &path, e))?;
        let mut decoder = Decoder::new(BufReader::new(file)).map_err(|e| tiff_error(&path, e))?;

        let (width, height) = decoder.dimensions().map_err(|e| tiff_error(&path, e))?;
        let mut frames = 0usize;
        loop {
            check_page(&mut decoder, &path, frames, (width, height))?;
            frames += 1;
            if !decoder.more_images() {
                break;
            }
            decoder.next_image().map_err(|e| tiff_error(&path, e))?;
        }

        info!(path = %path.display(), frames, height, width, "opened TIFF stack");

        Ok(Self {
            path,
            decoder: Mutex::new(decoder),
            frames,
            height: height as usize,
            width: width as usize,
            metadata: StackMetadata::default(),
        })
    }

    pub fn with_metadata(mut self, metadata: StackMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ImageStack for TiffStack {
    fn len(&self) -> usize {
        self.frames
    }

    fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    fn frame(&self, index: usize) -> Result<Array2<f32>> {
        if index >= self.frames {
            return Err(DdmError::InvalidInput(format!(
                "Frame {index} is out of range for a stack of {} frames.",
                self.frames
            )));
        }
        let image = {
            let mut decoder = self
                .decoder
                .lock()
                .map_err(|_| DdmError::Format("TIFF decoder lock poisoned".into()))?;
            decoder.seek_to_image(index).map_err(|e| tiff_error(&self.path, e))?;
            decoder.read_image().map_err(|e| tiff_error(&self.path, e))?
        };

        let samples = to_f32(image);
        Array2::from_shape_vec((self.height, self.width), samples).map_err(|e| {
            DdmError::Format(format!(
                "Frame {index} of '{}' does not match {}x{}: {e}",
                self.path.display(),
                self.height,
                self.width
            ))
        })
    }

    fn metadata(&self) -> StackMetadata {
        self.metadata
    }

    fn source(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

fn check_page(decoder: &mut TiffDecoder, path: &Path, page: usize, expected: (u32, u32)) -> Result<()> {
    match decoder.colortype().map_err(|e| tiff_error(path, e))? {
        ColorType::Gray(_) => {}
        other => {
            return Err(DdmError::TypeMismatch(format!(
                "page {page} of '{}' is {other:?}; only grayscale stacks are supported",
                path.display()
            )));
        }
    }
    let dims = decoder.dimensions().map_err(|e| tiff_error(path, e))?;
    if dims != expected {
        return Err(DdmError::InvalidInput(format!(
            "Page {page} of '{}' is {}x{}, expected {}x{}.",
            path.display(),
            dims.0,
            dims.1,
            expected.0,
            expected.1
        )));
    }
    Ok(())
}

fn to_f32(image: DecodingResult) -> Vec<f32> {
    match image {
        DecodingResult::U8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::I8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::F32(buf) => buf,
        DecodingResult::F64(buf) => buf.into_iter().map(|v| v as f32).collect(),
    }
}

fn tiff_error(path: &Path, err: tiff::TiffError) -> DdmError {
    DdmError::Format(format!("TIFF '{}': {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiff::encoder::{TiffEncoder, colortype};

    fn write_stack(path: &Path, frames: usize, height: u32, width: u32) {
        let file = File::create(path).unwrap();
        let mut encoder = TiffEncoder::new(file).unwrap();
        for t in 0..frames {
            let data: Vec<u16> = (0..height * width).map(|i| (i as usize * 3 + t * 100) as u16).collect();
            encoder
                .write_image::<colortype::Gray16>(width, height, &data)
                .unwrap();
        }
    }

    #[test]
    fn reads_pages_lazily_as_f32() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        write_stack(&path, 3, 4, 5);

        let stack = TiffStack::open(&path).unwrap();
        assert_eq!(stack.len(), 3);
        assert_eq!(stack.shape(), (4, 5));
        assert!(stack.as_array().is_none());
        assert_eq!(stack.source(), Some(path.as_path()));

        let last = stack.frame(2).unwrap();
        assert_eq!(last[(0, 0)], 200.0);
        assert_eq!(last[(1, 0)], 215.0);
        // Random access backwards.
        assert_eq!(stack.frame(0).unwrap()[(0, 1)], 3.0);
        assert!(stack.frame(3).is_err());
    }

    #[test]
    fn color_pages_are_a_type_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rgb.tif");
        let file = File::create(&path).unwrap();
        let mut encoder = TiffEncoder::new(file).unwrap();
        encoder
            .write_image::<colortype::RGB8>(2, 2, &[0u8; 12])
            .unwrap();

        let err = TiffStack::open(&path).unwrap_err();
        assert!(matches!(err, DdmError::TypeMismatch(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = TiffStack::open("/nonexistent/stack.tif").unwrap_err();
        assert!(matches!(err, DdmError::Io { .. }));
    }
}
