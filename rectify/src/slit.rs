//! Slit geometry and masking of the rectified image.
//!
//! After rectification the output rows beyond the ends of a short slit, and
//! the rows behind any occulting bar, hold no sky signal. They are flagged
//! with [`dq::DATA_MASKED`].

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::RectifyError;
use crate::frame::{CoordinateFrame, DispersionAxis};
use crate::planes::dq;

/// Most occulting bars a slit can carry.
pub const MAX_BARS: usize = 3;

/// Slit ends are only masked when the slit covers less than this fraction of the image.
pub const SIGNIFICANT_FRACTION: f64 = 0.5;

/// An occulting bar across the slit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OccultingBar {
    /// Centre of the bar relative to the slit centre (arcsec).
    pub location: f64,
    /// Width along the slit (arcsec).
    pub width: f64,
}

/// Aperture description for the slit in use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlitGeometry {
    /// Measured slit angle (degrees).
    pub angle: f64,
    /// Size along (dispersion, cross-dispersion) in arcsec.
    pub width: [f64; 2],
    /// Offset of the aperture from the nominal position (arcsec).
    #[serde(default)]
    pub ap_offset: [f64; 2],
    /// Occulting bars.
    #[serde(default)]
    pub bars: Vec<OccultingBar>,
}

impl SlitGeometry {
    /// Rejects more than [`MAX_BARS`] bars.
    pub fn check(&self) -> Result<(), RectifyError> {
        if self.bars.len() > MAX_BARS {
            return Err(RectifyError::TooManyBars {
                count: self.bars.len(),
                max: MAX_BARS,
            });
        }
        Ok(())
    }
}

/// Flags rows outside the slit and behind occulting bars.
///
/// Nothing is done unless dispersion is along the primary axis. Slit ends are
/// only masked when the slit is shorter than half the image; rows whose
/// centre lies strictly outside `crpix2 -/+ (length / 2 + 0.5)` are flagged.
pub fn mask_slit(
    dq_plane: &mut Array2<u16>,
    frame: &CoordinateFrame,
    slit: &SlitGeometry,
    axis: DispersionAxis,
) {
    let ny = dq_plane.nrows();
    if axis != DispersionAxis::Primary || ny == 0 {
        return;
    }
    let scale = frame.cdelt[1];
    let center = frame.crpix[1];
    let length = slit.width[1] / scale;

    if length < SIGNIFICANT_FRACTION * ny as f64 {
        let bottom = center - length / 2.0 - 0.5;
        let top = center + length / 2.0 + 0.5;
        for (j, mut row) in dq_plane.axis_iter_mut(Axis(0)).enumerate() {
            let y = j as f64;
            if y < bottom || y > top {
                row.mapv_inplace(|v| v | dq::DATA_MASKED);
            }
        }
    }

    for bar in slit.bars.iter().take(MAX_BARS) {
        let lo = (center + (bar.location - bar.width / 2.0) / scale).round();
        let hi = (center + (bar.location + bar.width / 2.0) / scale).round();
        if hi < 0.0 || lo >= ny as f64 {
            continue;
        }
        let first = lo.max(0.0) as usize;
        let last = (hi as usize).min(ny - 1);
        for j in first..=last {
            dq_plane
                .row_mut(j)
                .mapv_inplace(|v| v | dq::DATA_MASKED);
        }
    }
}
