//! Science, error and data-quality planes.
//!
//! Input planes are borrowed ndarray views (row-major, indexed `[y, x]`) so
//! callers keep whatever storage they read the image into. Output planes are
//! owned and handed back to the caller for writing.

use ndarray::{Array2, ArrayView2};

use crate::error::RectifyError;
use crate::frame::LinearTransform;

/// Data-quality bit values.
pub mod dq {
    /// No flags set.
    pub const GOOD: u16 = 0;
    /// Detector problem; also used for samples taken from outside the input.
    pub const DETECTOR_PROBLEM: u16 = 4;
    /// Pixel is outside the slit or behind an occulting bar.
    pub const DATA_MASKED: u16 = 8;
}

/// One pixel's science value, error and quality flags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSample {
    /// Science value.
    pub sci: f32,
    /// One-sigma error.
    pub err: f32,
    /// Quality bitmask.
    pub dq: u16,
}

impl PixelSample {
    /// Sample for a location with no source data.
    pub const OFF_IMAGE: PixelSample = PixelSample {
        sci: 0.0,
        err: 0.0,
        dq: dq::DETECTOR_PROBLEM,
    };
}

/// Read-only input exposure: three planes plus their pixel transform.
#[derive(Debug, Clone, Copy)]
pub struct InputImage<'a> {
    sci: ArrayView2<'a, f32>,
    err: ArrayView2<'a, f32>,
    dq: ArrayView2<'a, u16>,
    transform: LinearTransform,
}

impl<'a> InputImage<'a> {
    /// Wraps the three planes, which must share one shape.
    pub fn new(
        sci: ArrayView2<'a, f32>,
        err: ArrayView2<'a, f32>,
        dq: ArrayView2<'a, u16>,
        transform: LinearTransform,
    ) -> Result<Self, RectifyError> {
        if sci.dim() != err.dim() || sci.dim() != dq.dim() {
            return Err(RectifyError::PlaneShape {
                science: sci.dim(),
                error: err.dim(),
                quality: dq.dim(),
            });
        }
        transform.check()?;
        Ok(Self {
            sci,
            err,
            dq,
            transform,
        })
    }

    /// Width (x extent).
    pub fn nx(&self) -> usize {
        self.sci.ncols()
    }

    /// Height (y extent).
    pub fn ny(&self) -> usize {
        self.sci.nrows()
    }

    /// Reference-to-image pixel transform.
    pub fn transform(&self) -> &LinearTransform {
        &self.transform
    }

    /// Sample at integer pixel `(x, y)`. Caller guarantees bounds.
    pub fn at(&self, x: usize, y: usize) -> PixelSample {
        PixelSample {
            sci: self.sci[[y, x]],
            err: self.err[[y, x]],
            dq: self.dq[[y, x]],
        }
    }
}

/// Owned output planes.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputImage {
    /// Science plane.
    pub sci: Array2<f32>,
    /// Error plane.
    pub err: Array2<f32>,
    /// Quality plane.
    pub dq: Array2<u16>,
}

impl OutputImage {
    /// Zero-filled planes of `nx` by `ny` pixels.
    pub fn zeros(nx: usize, ny: usize) -> Self {
        Self {
            sci: Array2::zeros((ny, nx)),
            err: Array2::zeros((ny, nx)),
            dq: Array2::zeros((ny, nx)),
        }
    }

    /// Width.
    pub fn nx(&self) -> usize {
        self.sci.ncols()
    }

    /// Height.
    pub fn ny(&self) -> usize {
        self.sci.nrows()
    }

    /// Stores a sample at `(x, y)`.
    pub fn set(&mut self, x: usize, y: usize, sample: PixelSample) {
        self.sci[[y, x]] = sample.sci;
        self.err[[y, x]] = sample.err;
        self.dq[[y, x]] = sample.dq;
    }

    /// Reads back the sample at `(x, y)`.
    pub fn get(&self, x: usize, y: usize) -> PixelSample {
        PixelSample {
            sci: self.sci[[y, x]],
            err: self.err[[y, x]],
            dq: self.dq[[y, x]],
        }
    }

    /// Borrows the planes as a resampling source.
    pub fn as_input(&self, transform: LinearTransform) -> Result<InputImage<'_>, RectifyError> {
        InputImage::new(self.sci.view(), self.err.view(), self.dq.view(), transform)
    }
}
