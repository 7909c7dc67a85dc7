//! Run configuration and exposure metadata.
//!
//! [`RectifyConfig`] holds the processing switches and can be stored as JSON.
//! [`Observation`] describes the exposure being rectified.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::dispersion::Disperser;
use crate::error::RectifyError;
use crate::frame::DispersionAxis;
use crate::resample::ErrorAlgorithm;
use crate::slit::SlitGeometry;

/// Processing options for one rectification run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RectifyConfig {
    /// Error propagation mode of the resampler
    pub err_algorithm: ErrorAlgorithm,
    /// Quality bits that exclude an input pixel from interpolation (0 uses every pixel)
    pub sdqflags: u16,
    /// Scale spectroscopic output by the Jacobian of the mapping
    pub conserve_flux: bool,
    /// First-order data: move the reference row to the middle of the output
    pub center_target: bool,
    /// Treat the exposure as first-order data whatever its orders.
    ///
    /// The off-image boundary check and the echelle offset correction are
    /// skipped, `center_target` applies, and every order gets a reference
    /// wavelength.
    pub first_order_override: bool,
    /// Heliocentric correction factor applied to output wavelengths (1 = none)
    pub heliocentric_factor: f64,
    /// Exposure start (MJD), used to rotate spectrum traces
    pub exposure_start: f64,
    /// Mode-select-mechanism offset (x, y) in image pixels
    pub msm_offset: [f64; 2],
    /// Axis along which the exposure is dispersed
    pub dispersion_axis: DispersionAxis,
}

impl Default for RectifyConfig {
    fn default() -> Self {
        Self {
            err_algorithm: ErrorAlgorithm::WeightVariance,
            sdqflags: 0,
            conserve_flux: false,
            center_target: false,
            first_order_override: false,
            heliocentric_factor: 1.0,
            exposure_start: 0.0,
            msm_offset: [0.0, 0.0],
            dispersion_axis: DispersionAxis::Primary,
        }
    }
}

impl RectifyConfig {
    /// Checks values that would make the mapping meaningless.
    pub fn validate(&self) -> Result<(), RectifyError> {
        if !(self.heliocentric_factor.is_finite() && self.heliocentric_factor > 0.0) {
            return Err(RectifyError::InvalidConfig(format!(
                "heliocentric_factor must be positive, got {}",
                self.heliocentric_factor
            )));
        }
        if !self.exposure_start.is_finite() {
            return Err(RectifyError::InvalidConfig(
                "exposure_start must be finite".to_string(),
            ));
        }
        if self.msm_offset.iter().any(|v| !v.is_finite()) {
            return Err(RectifyError::InvalidConfig(
                "msm_offset must be finite".to_string(),
            ));
        }
        Ok(())
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<(), RectifyError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from JSON file
    pub fn load_from_file(path: &Path) -> Result<Self, RectifyError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

/// Kind of exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationMode {
    /// Slit spectroscopy, one or more spectral orders.
    #[default]
    Spectroscopic,
    /// Direct imaging.
    Imaging,
}

/// Exposure description taken from the image headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Optical element (grating, prism or filter) name
    pub opt_elem: String,
    /// Central wavelength setting (Angstroms)
    pub cenwave: i32,
    /// Aperture name
    pub aperture: String,
    /// Spectroscopic or imaging
    #[serde(default)]
    pub mode: ObservationMode,
    /// Grating or prism
    #[serde(default)]
    pub disperser: Disperser,
    /// Slit in use
    #[serde(default)]
    pub slit: SlitGeometry,
    /// Arcsec per reference pixel (x, y)
    pub plate_scale: [f64; 2],
    /// Declared reference pixel of the input image (zero-indexed), imaging only
    #[serde(default)]
    pub crpix: [f64; 2],
}

impl Observation {
    /// Checks the slit description and plate scale.
    pub fn validate(&self) -> Result<(), RectifyError> {
        self.slit.check()?;
        if self.mode == ObservationMode::Spectroscopic
            && self.plate_scale.iter().any(|s| !(s.is_finite() && *s > 0.0))
        {
            return Err(RectifyError::InvalidConfig(format!(
                "plate_scale must be positive, got {:?}",
                self.plate_scale
            )));
        }
        Ok(())
    }

    /// Aperture offset in reference pixels; zero for imaging.
    pub fn aperture_offset_pixels(&self) -> [f64; 2] {
        match self.mode {
            ObservationMode::Spectroscopic => [
                self.slit.ap_offset[0] / self.plate_scale[0],
                self.slit.ap_offset[1] / self.plate_scale[1],
            ],
            ObservationMode::Imaging => [0.0, 0.0],
        }
    }
}
