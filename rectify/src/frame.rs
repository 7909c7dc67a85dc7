//! Output coordinate frames and the detector's linear pixel transform.

use serde::{Deserialize, Serialize};

use crate::error::RectifyError;
use crate::series::SeriesPayload;

/// Diagonal linear transform between reference pixels and image pixels.
///
/// `image = reference * ltm + ltv` on each axis. Binned or subarray readouts
/// have `ltm != 1` or `ltv != 0`; the reference frame is always the
/// unbinned full detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearTransform {
    /// Scale per axis (x, y).
    pub ltm: [f64; 2],
    /// Offset per axis (x, y), in image pixels.
    pub ltv: [f64; 2],
}

impl Default for LinearTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl LinearTransform {
    /// Unbinned full-frame readout.
    pub const IDENTITY: LinearTransform = LinearTransform {
        ltm: [1.0, 1.0],
        ltv: [0.0, 0.0],
    };

    /// Creates a transform, rejecting zero or non-finite scales.
    pub fn new(ltm: [f64; 2], ltv: [f64; 2]) -> Result<Self, RectifyError> {
        let t = Self { ltm, ltv };
        t.check()?;
        Ok(t)
    }

    /// Verifies that the transform can be inverted.
    pub fn check(&self) -> Result<(), RectifyError> {
        if self.ltm.iter().any(|m| *m == 0.0 || !m.is_finite()) {
            return Err(RectifyError::DegenerateTransform(self.ltm[0], self.ltm[1]));
        }
        Ok(())
    }

    /// Reference pixel to image pixel.
    pub fn to_image(&self, reference: [f64; 2]) -> [f64; 2] {
        [
            reference[0] * self.ltm[0] + self.ltv[0],
            reference[1] * self.ltm[1] + self.ltv[1],
        ]
    }

    /// Image pixel to reference pixel.
    pub fn to_reference(&self, image: [f64; 2]) -> [f64; 2] {
        [
            (image[0] - self.ltv[0]) / self.ltm[0],
            (image[1] - self.ltv[1]) / self.ltm[1],
        ]
    }
}

/// Image axis along which light is dispersed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispersionAxis {
    /// Dispersion along x (image columns).
    #[default]
    Primary,
    /// Dispersion along y, as with a cross disperser.
    Secondary,
}

impl DispersionAxis {
    /// Index (0 for x, 1 for y) of the dispersion axis.
    pub fn index(self) -> usize {
        match self {
            DispersionAxis::Primary => 0,
            DispersionAxis::Secondary => 1,
        }
    }
}

/// Output image geometry for one spectral order (or for an imaging exposure).
///
/// Axis 0 is the dispersion direction (wavelength, Angstroms) and axis 1 the
/// slit direction (arcsec). All pixel positions are zero-indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateFrame {
    /// Output image size (x, y).
    pub npix: [usize; 2],
    /// Reference pixel (x, y).
    pub crpix: [f64; 2],
    /// Physical value at the reference pixel.
    pub crval: [f64; 2],
    /// Physical increment per output pixel.
    pub cdelt: [f64; 2],
    /// Nominal cross-dispersion position of the order in reference pixels.
    #[serde(default)]
    pub a2center: f64,
}

impl SeriesPayload for CoordinateFrame {
    const KIND: &'static str = "coordinate";
}

impl CoordinateFrame {
    /// Physical coordinates (wavelength, slit position) of an output pixel.
    ///
    /// The wavelength is divided by `heliocentric_factor` so that it refers to
    /// the observatory frame the dispersion relation was measured in.
    pub fn pixel_to_physical(&self, ox: f64, oy: f64, heliocentric_factor: f64) -> (f64, f64) {
        let wl = ((ox - self.crpix[0]) * self.cdelt[0] + self.crval[0]) / heliocentric_factor;
        let s = (oy - self.crpix[1]) * self.cdelt[1] + self.crval[1];
        (wl, s)
    }

    /// Wavelength spacing between adjacent output columns, observatory frame.
    pub fn dispersion_step(&self, heliocentric_factor: f64) -> f64 {
        self.cdelt[0] / heliocentric_factor
    }

    /// Reference-frame line of output row `row`.
    ///
    /// `ltm_y` converts output rows (binned like the input) back to reference
    /// pixels; `offset_y` is the total MSM plus aperture offset.
    pub fn reference_line(&self, row: f64, ltm_y: f64, offset_y: f64) -> f64 {
        (row - self.crpix[1]) / ltm_y + self.a2center + offset_y
    }

    /// Puts the target on the middle row of the output image.
    pub fn center_target(&mut self) {
        self.crpix[1] = (self.npix[1] as f64 + 1.0) / 2.0 - 1.0;
    }

    /// Converts a frame given in reference pixels to binned output pixels.
    pub fn scale_to_binning(&self, ltm: [f64; 2]) -> Self {
        let mut scaled = self.clone();
        for axis in 0..2 {
            scaled.npix[axis] = (self.npix[axis] as f64 * ltm[axis]).round().max(0.0) as usize;
            scaled.crpix[axis] = (self.crpix[axis] + 0.5) * ltm[axis] - 0.5;
            scaled.cdelt[axis] = self.cdelt[axis] / ltm[axis];
        }
        scaled
    }
}
