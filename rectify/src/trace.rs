//! Spectrum traces: cross-dispersion displacement along the dispersion axis.
//!
//! A trace row gives, for each reference pixel along the dispersion axis, how
//! far the spectrum sits above or below its nominal line `a2center` (the row
//! key). Rows are interpolated across `a2center` by the calibration series;
//! along the dispersion axis the nearest array element is used.

use serde::{Deserialize, Serialize};

use crate::report::{RectifyEvent, Reporter};
use crate::series::{blend_padded, Blend, CalibrationRecord, SeriesError, SeriesPayload};

/// Largest displacement array in a trace row.
pub const MAX_SP_TRACE: usize = 1024;

const DAYS_PER_YEAR: f64 = 365.25;

/// Secular rotation of a trace row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceRotation {
    /// Epoch (MJD) at which the row was measured.
    pub reference_mjd: f64,
    /// Rotation rate in degrees per year.
    pub degrees_per_year: f64,
}

impl TraceRotation {
    /// Rotation angle (degrees) accumulated by `exposure_start` (MJD).
    pub fn angle_at(&self, exposure_start: f64) -> f64 {
        self.degrees_per_year * (exposure_start - self.reference_mjd) / DAYS_PER_YEAR
    }
}

/// Displacements for one trace row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumTrace {
    /// Dispersion-axis reference pixel the trace is centred on.
    pub a1center: f64,
    /// Displacement (reference pixels) at each dispersion-axis pixel.
    pub displacements: Vec<f64>,
    /// Time dependence of the row.
    #[serde(default)]
    pub rotation: TraceRotation,
}

impl SeriesPayload for SpectrumTrace {
    const KIND: &'static str = "trace";

    fn validate(&self) -> Result<(), SeriesError> {
        if self.displacements.len() > MAX_SP_TRACE {
            return Err(SeriesError::PayloadTooLarge {
                kind: Self::KIND,
                len: self.displacements.len(),
                max: MAX_SP_TRACE,
            });
        }
        Ok(())
    }

    fn check_consistent(&self, other: &Self) -> Result<(), SeriesError> {
        if self.a1center != other.a1center {
            return Err(SeriesError::Inconsistent {
                kind: Self::KIND,
                field: "a1center",
                first: self.a1center.to_string(),
                other: other.a1center.to_string(),
            });
        }
        Ok(())
    }
}

impl Blend for SpectrumTrace {
    fn blend(&self, upper: &Self, p: f64) -> Self {
        Self {
            a1center: self.a1center,
            displacements: blend_padded(&self.displacements, &upper.displacements, p),
            rotation: self.rotation,
        }
    }
}

impl SpectrumTrace {
    /// Trace with no time dependence.
    pub fn new(a1center: f64, displacements: Vec<f64>) -> Self {
        Self {
            a1center,
            displacements,
            rotation: TraceRotation::default(),
        }
    }

    /// Displacement at the array element nearest `ix_r`; zero off the ends.
    pub fn displacement_at(&self, ix_r: f64) -> f64 {
        let i = ix_r.round();
        if i < 0.0 || i >= self.displacements.len() as f64 {
            return 0.0;
        }
        self.displacements[i as usize]
    }

    /// Rotates the trace to `exposure_start` (MJD); returns the angle in degrees.
    pub fn rotate_to(&mut self, exposure_start: f64) -> f64 {
        let angle = self.rotation.angle_at(exposure_start);
        if angle == 0.0 {
            return 0.0;
        }
        let slope = angle.to_radians().tan();
        let half = (self.displacements.len() / 2) as f64;
        for (i, d) in self.displacements.iter_mut().enumerate() {
            *d -= (i as f64 - half) * slope;
        }
        angle
    }

    /// Clears the displacements, for data whose trace was already removed.
    pub fn zero(&mut self) {
        self.displacements.iter_mut().for_each(|d| *d = 0.0);
    }
}

/// Cross-dispersion reference line of the spectrum at dispersion pixel `ix_r`.
///
/// `trace` is the row interpolated at the line of interest; its key is that line.
pub fn line_at(trace: &CalibrationRecord<SpectrumTrace>, ix_r: f64) -> f64 {
    trace.key + trace.payload.displacement_at(ix_r)
}

/// Prepares loaded trace rows for use.
///
/// Rows are zeroed when the input was already trace-corrected, otherwise
/// rotated to the exposure epoch. The first non-zero rotation is reported.
pub fn prepare_rows(
    rows: &mut [CalibrationRecord<SpectrumTrace>],
    exposure_start: f64,
    already_corrected: bool,
    reporter: &mut dyn Reporter,
) {
    let mut reported = false;
    for row in rows.iter_mut() {
        if already_corrected {
            row.payload.zero();
            continue;
        }
        let degrees = row.payload.rotate_to(exposure_start);
        if degrees != 0.0 && !reported {
            reported = true;
            reporter.report(RectifyEvent::TraceRotated { degrees });
        }
    }
}
