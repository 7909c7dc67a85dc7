//! Rectification driver.
//!
//! Runs the per-pixel pipeline over one exposure. Spectroscopic exposures are
//! processed order by order (see [`spectroscopic`]); imaging exposures get a
//! single geometric-distortion pass (see [`imaging`]). Both share the
//! [`Resampler`](crate::resample::Resampler).

use crate::config::{Observation, ObservationMode, RectifyConfig};
use crate::distortion::SmallScaleOverlay;
use crate::error::{Outcome, RectifyError, SkipReason};
use crate::frame::CoordinateFrame;
use crate::planes::{InputImage, OutputImage};
use crate::report::{RectifyEvent, Reporter, StepStatus};
use crate::series::{CalibrationRecord, CalibrationSeries, SeriesPayload};
use crate::tables::{collect_series, skip_status, CalibrationTables};

pub mod imaging;
pub mod spectroscopic;

/// Step switch reported by the driver.
pub const X2DCORR: &str = "X2DCORR";

/// Wavelength and dispersion at the middle of the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceDispersion {
    /// Wavelength (Angstroms) at input pixel 512.
    pub wavelength: f64,
    /// Angstroms per pixel there.
    pub dispersion: f64,
}

/// One rectified output image.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderProduct {
    /// Spectral order (1 for imaging).
    pub sporder: i32,
    /// Rectified planes.
    pub image: OutputImage,
    /// Coordinate values for the output header (zero-indexed reference pixel).
    pub frame: CoordinateFrame,
    /// Reference wavelength, for the first order or the echelle reference order.
    pub reference: Option<ReferenceDispersion>,
}

/// Rectifies exposures against one set of calibration tables.
pub struct RectificationDriver<'a> {
    config: &'a RectifyConfig,
    observation: &'a Observation,
    tables: &'a dyn CalibrationTables,
}

impl<'a> RectificationDriver<'a> {
    /// Creates a driver after validating the configuration and observation.
    pub fn new(
        config: &'a RectifyConfig,
        observation: &'a Observation,
        tables: &'a dyn CalibrationTables,
    ) -> Result<Self, RectifyError> {
        config.validate()?;
        observation.validate()?;
        Ok(Self {
            config,
            observation,
            tables,
        })
    }

    /// Processing options.
    pub fn config(&self) -> &RectifyConfig {
        self.config
    }

    /// The exposure being rectified.
    pub fn observation(&self) -> &Observation {
        self.observation
    }

    /// Calibration source.
    pub fn tables(&self) -> &dyn CalibrationTables {
        self.tables
    }

    /// Rectifies one exposure.
    ///
    /// Returns the rectified orders, `Outcome::Skipped` when an exposure-wide
    /// table is a placeholder or has no matching row, or an error that aborts
    /// the exposure. `overlay` is only used for imaging.
    pub fn rectify(
        &self,
        input: &InputImage<'_>,
        overlay: Option<&SmallScaleOverlay>,
        reporter: &mut dyn Reporter,
    ) -> Result<Outcome<Vec<OrderProduct>>, RectifyError> {
        reporter.report(RectifyEvent::StepSwitch {
            step: X2DCORR,
            status: StepStatus::Perform,
        });
        let result = match self.observation.mode {
            ObservationMode::Spectroscopic => spectroscopic::rectify_exposure(self, input, reporter)?,
            ObservationMode::Imaging => imaging::correct_exposure(self, input, overlay, reporter)?
                .map(|product| vec![product]),
        };
        if let Outcome::Done(products) = &result {
            log::info!("rectified {} image(s)", products.len());
            reporter.report(RectifyEvent::StepSwitch {
                step: X2DCORR,
                status: StepStatus::Complete,
            });
        }
        Ok(result)
    }
}

/// Loads an exposure-wide series, reporting its provenance when usable.
fn load_series<P: SeriesPayload>(
    rows: Vec<CalibrationRecord<P>>,
    table: &'static str,
    reporter: &mut dyn Reporter,
) -> Result<Outcome<CalibrationSeries<P>>, RectifyError> {
    let outcome = collect_series(rows)?.into_outcome(table);
    if let Outcome::Done(series) = &outcome {
        if let Some(first) = series.records().first() {
            reporter.report(RectifyEvent::TableUsed {
                table,
                provenance: first.provenance.clone(),
            });
        }
    }
    Ok(outcome)
}

/// Reports an exposure-wide skip and passes it on.
fn skip_exposure<T>(reason: SkipReason, reporter: &mut dyn Reporter) -> Outcome<T> {
    log::warn!("{X2DCORR} not performed: {reason}");
    reporter.report(RectifyEvent::StepSwitch {
        step: X2DCORR,
        status: skip_status(&reason),
    });
    Outcome::Skipped(reason)
}
