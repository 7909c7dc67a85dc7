//! Bilinear resampling of science, error and quality planes.
//!
//! The resampler maps one output pixel at a time: the driver computes where
//! the output pixel centre falls in the input image and asks for a
//! [`PixelSample`] there.
//!
//! # Weights
//!
//! The four input pixels surrounding `(ix, iy)` get the usual bilinear weights.
//! Pixels whose quality flags intersect `sdqflags` get weight zero and the
//! remaining weights are renormalised. If nothing usable remains, the nearest
//! pixel is copied.
//!
//! # Errors
//!
//! Two propagation strategies are available (see [`ErrorAlgorithm`]); both
//! scale the combined variance by the Jacobian.

use serde::{Deserialize, Serialize};

use crate::planes::{InputImage, PixelSample};

/// How neighbour errors combine into the interpolated error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAlgorithm {
    /// `sqrt(sum(w * e^2))`: weight the variances.
    #[default]
    WeightVariance,
    /// `sqrt(sum((w * e)^2))`: weight the errors.
    WeightError,
}

impl ErrorAlgorithm {
    /// The propagation strategy for this mode.
    pub fn strategy(self) -> &'static dyn ErrorPropagation {
        match self {
            ErrorAlgorithm::WeightVariance => &VarianceWeighted,
            ErrorAlgorithm::WeightError => &ErrorWeighted,
        }
    }
}

/// Combination of neighbour errors under normalised bilinear weights.
pub trait ErrorPropagation {
    /// Combined variance before Jacobian scaling.
    fn variance(&self, weights: &[f64; 4], errors: &[f64; 4]) -> f64;

    /// Interpolated one-sigma error, `sqrt(jacobian * variance)`, or zero.
    fn combine(&self, weights: &[f64; 4], errors: &[f64; 4], jacobian: f64) -> f64 {
        let v = jacobian * self.variance(weights, errors);
        if v > 0.0 {
            v.sqrt()
        } else {
            0.0
        }
    }
}

/// Weights the neighbour variances linearly.
#[derive(Debug, Clone, Copy, Default)]
pub struct VarianceWeighted;

impl ErrorPropagation for VarianceWeighted {
    fn variance(&self, weights: &[f64; 4], errors: &[f64; 4]) -> f64 {
        weights
            .iter()
            .zip(errors)
            .map(|(w, e)| w * e * e)
            .sum()
    }
}

/// Weights the neighbour errors, i.e. variances by the squared weight.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorWeighted;

impl ErrorPropagation for ErrorWeighted {
    fn variance(&self, weights: &[f64; 4], errors: &[f64; 4]) -> f64 {
        weights
            .iter()
            .zip(errors)
            .map(|(w, e)| (w * e) * (w * e))
            .sum()
    }
}

/// Bilinear sampler over one input image.
pub struct Resampler<'a> {
    input: InputImage<'a>,
    sdqflags: u16,
    errors: &'static dyn ErrorPropagation,
}

impl<'a> Resampler<'a> {
    /// Creates a sampler.
    ///
    /// # Arguments
    /// * `input` - Source planes
    /// * `sdqflags` - Quality bits that exclude a pixel from interpolation
    /// * `algorithm` - Error propagation mode
    pub fn new(input: InputImage<'a>, sdqflags: u16, algorithm: ErrorAlgorithm) -> Self {
        Self {
            input,
            sdqflags,
            errors: algorithm.strategy(),
        }
    }

    /// The source image.
    pub fn input(&self) -> &InputImage<'a> {
        &self.input
    }

    /// Samples the input at image pixel `(ix, iy)`.
    ///
    /// `jacobian` multiplies the science value (and the variance); pass 1.0
    /// when flux is not being conserved. Locations whose nearest pixel lies
    /// outside the image return [`PixelSample::OFF_IMAGE`].
    pub fn sample(&self, ix: f64, iy: f64, jacobian: f64) -> PixelSample {
        let nx = self.input.nx();
        let ny = self.input.ny();
        let iix = ix.round();
        let iiy = iy.round();
        if !(iix >= 0.0 && iix <= (nx as f64 - 1.0) && iiy >= 0.0 && iiy <= (ny as f64 - 1.0)) {
            return PixelSample::OFF_IMAGE;
        }

        let (x0, x1, q) = bracket(ix, nx);
        let (y0, y1, s) = bracket(iy, ny);
        let p = 1.0 - q;
        let r = 1.0 - s;

        let corners = [(x0, y0), (x1, y0), (x0, y1), (x1, y1)];
        let geometric = [p * r, q * r, p * s, q * s];
        let pixels = corners.map(|(x, y)| self.input.at(x, y));

        let mut weights = [0.0; 4];
        let mut ngood = 0;
        let mut dq = 0u16;
        for k in 0..4 {
            if geometric[k] != 0.0 {
                dq |= pixels[k].dq;
            }
            if pixels[k].dq & self.sdqflags == 0 {
                weights[k] = geometric[k];
                ngood += 1;
            }
        }

        let sumw: f64 = weights.iter().sum();
        if ngood == 0 || sumw <= 0.0 {
            let nearest = self.input.at(iix as usize, iiy as usize);
            return PixelSample {
                sci: (nearest.sci as f64 * jacobian) as f32,
                err: (nearest.err as f64 * jacobian.sqrt()) as f32,
                dq,
            };
        }
        if ngood < 4 {
            for w in weights.iter_mut() {
                *w /= sumw;
            }
        }

        let sci: f64 = weights
            .iter()
            .zip(&pixels)
            .map(|(w, px)| w * px.sci as f64)
            .sum();
        let errors = pixels.map(|px| px.err as f64);
        PixelSample {
            sci: (jacobian * sci) as f32,
            err: self.errors.combine(&weights, &errors, jacobian) as f32,
            dq,
        }
    }
}

/// Lower neighbour, upper neighbour and fractional offset along one axis.
fn bracket(v: f64, n: usize) -> (usize, usize, f64) {
    if n < 2 {
        return (0, 0, 0.0);
    }
    let lo = (v.floor().max(0.0) as usize).min(n - 2);
    (lo, lo + 1, v - lo as f64)
}
