//! Two-dimensional rectification of spectrograph and imager exposures.
//!
//! Spectroscopic exposures are resampled order by order onto a grid that is
//! linear in wavelength along one axis and in slit position along the other,
//! using dispersion relations, spectrum traces and incidence-angle
//! corrections from calibration tables. Imaging exposures are resampled onto
//! an undistorted grid using a bivariate distortion polynomial.
//!
//! Entry point is [`RectificationDriver`]; calibration comes from any
//! [`CalibrationTables`] implementation, diagnostics go to a [`Reporter`].

pub mod config;
pub mod dispersion;
pub mod distortion;
pub mod driver;
pub mod error;
pub mod frame;
pub mod planes;
pub mod report;
pub mod resample;
pub mod series;
pub mod slit;
pub mod tables;
pub mod trace;

// Re-export commonly used types for external use
pub use crate::config::{Observation, ObservationMode, RectifyConfig};
pub use crate::driver::{OrderProduct, RectificationDriver, ReferenceDispersion};
pub use crate::error::{Outcome, RectifyError, SkipReason};
pub use crate::frame::{CoordinateFrame, DispersionAxis, LinearTransform};
pub use crate::planes::{InputImage, OutputImage, PixelSample};
pub use crate::report::{EventLog, LogReporter, RectifyEvent, Reporter, StepStatus};
pub use crate::series::{CalibrationRecord, CalibrationSeries, Provenance, SeriesError};
pub use crate::tables::{CalibrationSet, CalibrationTables, TableQuery, TableRow};
