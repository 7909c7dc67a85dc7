//! Imaging-mode geometric distortion.
//!
//! The distortion polynomial maps an undistorted (output) position to the
//! distorted (input) position it was recorded at. Both positions are
//! reference pixels. Positions are taken relative to `input_ref` and scaled to
//! arcseconds before the polynomial is evaluated; the result is added to
//! `output_ref`:
//!
//! ```text
//! x = (ox - input_ref.x) * scale        y = (oy - input_ref.y) * scale
//! ix = output_ref.x + sum_{i<=order} sum_{j<=i} xcoeff[i, j] * x^j * y^(i-j)
//! ```
//!
//! The reverse direction has no closed form. [`invert_fixed`] runs three
//! fixed-point rounds starting from the target itself. This is accurate when
//! the map is close to the identity (as real distortion solutions are); there
//! is deliberately no convergence test, so strongly non-linear maps come back
//! only approximately inverted.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::RectifyError;
use crate::frame::LinearTransform;

/// Highest supported polynomial order.
pub const MAX_DISTORTION_ORDER: usize = 5;

/// Fixed-point rounds used by [`invert_fixed`].
pub const INVERSE_ROUNDS: usize = 3;

/// Bivariate distortion polynomial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistortionMap {
    order: usize,
    /// `xcoeff[[i, j]]` multiplies `x^j * y^(i - j)`.
    xcoeff: Array2<f64>,
    /// Same layout as `xcoeff`, for the y output.
    ycoeff: Array2<f64>,
    /// Arcseconds per reference pixel.
    scale: f64,
    /// Zero point subtracted from the position before scaling.
    input_ref: [f64; 2],
    /// Zero point added to the polynomial value.
    output_ref: [f64; 2],
}

impl DistortionMap {
    /// Creates a distortion map.
    ///
    /// # Arguments
    /// * `order` - Polynomial order, at most [`MAX_DISTORTION_ORDER`]
    /// * `xcoeff`, `ycoeff` - Coefficient matrices, at least `(order+1, order+1)`;
    ///   entries with `j > i` are ignored
    /// * `scale` - Arcseconds per reference pixel
    /// * `input_ref` - Position subtracted before scaling
    /// * `output_ref` - Position added to the result
    pub fn new(
        order: usize,
        xcoeff: Array2<f64>,
        ycoeff: Array2<f64>,
        scale: f64,
        input_ref: [f64; 2],
        output_ref: [f64; 2],
    ) -> Result<Self, RectifyError> {
        let map = Self {
            order,
            xcoeff,
            ycoeff,
            scale,
            input_ref,
            output_ref,
        };
        map.check()?;
        Ok(map)
    }

    /// Identity map: first-order terms of `1 / scale`, reference points equal.
    pub fn identity(scale: f64, reference: [f64; 2]) -> Self {
        let mut xcoeff = Array2::zeros((2, 2));
        let mut ycoeff = Array2::zeros((2, 2));
        xcoeff[[1, 1]] = 1.0 / scale;
        ycoeff[[1, 0]] = 1.0 / scale;
        Self {
            order: 1,
            xcoeff,
            ycoeff,
            scale,
            input_ref: reference,
            output_ref: reference,
        }
    }

    /// Validates order and coefficient shapes (needed after deserialising).
    pub fn check(&self) -> Result<(), RectifyError> {
        if self.order > MAX_DISTORTION_ORDER {
            return Err(RectifyError::DistortionOrder {
                order: self.order,
                max: MAX_DISTORTION_ORDER,
            });
        }
        let needed = self.order + 1;
        for c in [&self.xcoeff, &self.ycoeff] {
            let (rows, cols) = c.dim();
            if rows < needed || cols < needed {
                return Err(RectifyError::CoefficientCount {
                    table: "distortion",
                    expected: needed * needed,
                    found: rows * cols,
                });
            }
        }
        Ok(())
    }

    /// Polynomial order.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Arcseconds per reference pixel.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Distorted position of undistorted reference pixel `(ox, oy)`.
    pub fn forward(&self, ox: f64, oy: f64) -> [f64; 2] {
        let x = (ox - self.input_ref[0]) * self.scale;
        let y = (oy - self.input_ref[1]) * self.scale;

        let mut xpow = [1.0; MAX_DISTORTION_ORDER + 1];
        let mut ypow = [1.0; MAX_DISTORTION_ORDER + 1];
        for i in 1..=self.order {
            xpow[i] = xpow[i - 1] * x;
            ypow[i] = ypow[i - 1] * y;
        }

        let mut ix = self.output_ref[0];
        let mut iy = self.output_ref[1];
        for i in 0..=self.order {
            for j in 0..=i {
                let term = xpow[j] * ypow[i - j];
                ix += self.xcoeff[[i, j]] * term;
                iy += self.ycoeff[[i, j]] * term;
            }
        }
        [ix, iy]
    }

    /// Undistorted position whose [`forward`](Self::forward) image is `(tx, ty)`.
    pub fn inverse(&self, tx: f64, ty: f64) -> [f64; 2] {
        invert_fixed(|p| self.forward(p[0], p[1]), [tx, ty])
    }
}

/// Approximate inverse of a near-identity map by [`INVERSE_ROUNDS`] fixed-point rounds.
///
/// Starting from `p = target`, each round sets `p = p + (target - f(p))`.
pub fn invert_fixed<F>(f: F, target: [f64; 2]) -> [f64; 2]
where
    F: Fn([f64; 2]) -> [f64; 2],
{
    let mut p = target;
    for _ in 0..INVERSE_ROUNDS {
        let mapped = f(p);
        p = [
            target[0] + (p[0] - mapped[0]),
            target[1] + (p[1] - mapped[1]),
        ];
    }
    p
}

/// Residual distortion sampled on the reference pixel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct SmallScaleOverlay {
    dx: Array2<f32>,
    dy: Array2<f32>,
}

impl SmallScaleOverlay {
    /// Wraps the two offset grids (indexed `[y, x]`).
    pub fn new(dx: Array2<f32>, dy: Array2<f32>) -> Result<Self, RectifyError> {
        if dx.is_empty() || dx.dim() != dy.dim() {
            return Err(RectifyError::OverlayShape);
        }
        Ok(Self { dx, dy })
    }

    /// Offsets at the grid point nearest `(x, y)`, clamped to the grid.
    pub fn offset_at(&self, x: f64, y: f64) -> [f64; 2] {
        let (ny, nx) = self.dx.dim();
        let col = clamp_index(x, nx);
        let row = clamp_index(y, ny);
        [self.dx[[row, col]] as f64, self.dy[[row, col]] as f64]
    }
}

fn clamp_index(v: f64, n: usize) -> usize {
    let r = v.round();
    if r.is_nan() || r <= 0.0 {
        0
    } else {
        (r as usize).min(n - 1)
    }
}

/// Complete imaging map between output image pixels and input image pixels.
///
/// Output pixels are taken to reference pixels through the inverse of the
/// detector transform, distorted by the polynomial, nudged by the optional
/// small-scale overlay and brought back to image pixels.
#[derive(Debug, Clone)]
pub struct GeometricMapping<'a> {
    distortion: &'a DistortionMap,
    overlay: Option<&'a SmallScaleOverlay>,
    transform: LinearTransform,
}

impl<'a> GeometricMapping<'a> {
    /// Builds the mapping for one input image.
    pub fn new(
        distortion: &'a DistortionMap,
        overlay: Option<&'a SmallScaleOverlay>,
        transform: LinearTransform,
    ) -> Self {
        Self {
            distortion,
            overlay,
            transform,
        }
    }

    /// Input image pixel that output pixel `(ox, oy)` samples.
    pub fn output_to_input(&self, ox: f64, oy: f64) -> [f64; 2] {
        let reference = self.transform.to_reference([ox, oy]);
        let mut distorted = self.distortion.forward(reference[0], reference[1]);
        if let Some(overlay) = self.overlay {
            let d = overlay.offset_at(distorted[0], distorted[1]);
            distorted[0] += d[0];
            distorted[1] += d[1];
        }
        self.transform.to_image(distorted)
    }

    /// Output pixel that lands on input pixel `(ix, iy)` (approximate).
    pub fn input_to_output(&self, ix: f64, iy: f64) -> [f64; 2] {
        invert_fixed(|p| self.output_to_input(p[0], p[1]), [ix, iy])
    }
}
