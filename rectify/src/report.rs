//! Status and diagnostic reporting.
//!
//! The pipeline never logs through global state. Every entry point takes a
//! `&mut dyn Reporter` and sends it typed [`RectifyEvent`]s; the caller decides
//! whether they go to the `log` facade ([`LogReporter`]), into a buffer
//! ([`EventLog`]) or to a closure.

use log::{debug, info, warn};

use crate::error::SkipReason;
use crate::series::Provenance;

/// Switch value of a processing step, as written to the caller's header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// The step will run.
    Perform,
    /// The step is turned off or has no calibration.
    Omit,
    /// The calibration table is a placeholder.
    Dummy,
    /// The step was skipped for this order.
    Skipped,
    /// The step ran to completion.
    Complete,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Perform => "PERFORM",
            StepStatus::Omit => "OMIT",
            StepStatus::Dummy => "DUMMY",
            StepStatus::Skipped => "SKIPPED",
            StepStatus::Complete => "COMPLETE",
        };
        f.write_str(s)
    }
}

/// Conditions worth a warning that do not stop processing.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// Dispersion and incidence-angle tables carry different coefficient counts.
    CoefficientCountMismatch {
        /// Coefficients in the dispersion relation.
        dispersion: usize,
        /// Coefficients in the incidence-angle table.
        incidence: usize,
    },
    /// Only the first two second-set incidence-angle terms are applied.
    ExtraIncidenceTerms {
        /// Terms present.
        count: usize,
    },
    /// A calibration table was omitted from processing.
    TableOmitted {
        /// Table name.
        table: &'static str,
        /// Why.
        reason: SkipReason,
    },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::CoefficientCountMismatch {
                dispersion,
                incidence,
            } => write!(
                f,
                "dispersion relation has {dispersion} coefficients, incidence-angle table has {incidence}; using {}",
                dispersion.min(incidence)
            ),
            Warning::ExtraIncidenceTerms { count } => write!(
                f,
                "incidence-angle table has {count} second-set coefficients, only 2 are used"
            ),
            Warning::TableOmitted { table, reason } => write!(f, "{table} omitted: {reason}"),
        }
    }
}

/// Everything the pipeline tells its caller while running.
#[derive(Debug, Clone, PartialEq)]
pub enum RectifyEvent {
    /// A step switch changed value.
    StepSwitch {
        /// Step keyword.
        step: &'static str,
        /// New value.
        status: StepStatus,
    },
    /// A calibration table contributed to the result.
    TableUsed {
        /// Table name.
        table: &'static str,
        /// Its provenance.
        provenance: Provenance,
    },
    /// Non-fatal warning.
    Warning(Warning),
    /// Secular trace rotation was applied.
    TraceRotated {
        /// Rotation angle in degrees.
        degrees: f64,
    },
    /// A spectral order was passed over.
    OrderSkipped {
        /// Spectral order number.
        sporder: i32,
        /// Why.
        reason: SkipReason,
    },
    /// A spectral order was rectified.
    OrderRectified {
        /// Spectral order number.
        sporder: i32,
    },
    /// The output reference pixel was recomputed (zero-indexed).
    ReferencePixel {
        /// New reference pixel (x, y).
        crpix: [f64; 2],
    },
}

/// Receiver of pipeline events.
pub trait Reporter {
    /// Handles one event.
    fn report(&mut self, event: RectifyEvent);
}

impl<F> Reporter for F
where
    F: FnMut(&RectifyEvent),
{
    fn report(&mut self, event: RectifyEvent) {
        self(&event)
    }
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&mut self, event: RectifyEvent) {
        match event {
            RectifyEvent::StepSwitch { step, status } => info!("{step} {status}"),
            RectifyEvent::TableUsed { table, provenance } => {
                debug!("{table} PEDIGREE={} DESCRIP={}", provenance.pedigree, provenance.descrip)
            }
            RectifyEvent::Warning(w) => warn!("{w}"),
            RectifyEvent::TraceRotated { degrees } => {
                info!("spectrum trace rotated by {degrees:.6} degrees")
            }
            RectifyEvent::OrderSkipped { sporder, reason } => {
                info!("order {sporder} skipped: {reason}")
            }
            RectifyEvent::OrderRectified { sporder } => debug!("order {sporder} rectified"),
            RectifyEvent::ReferencePixel { crpix } => {
                info!("reference pixel now ({:.3}, {:.3})", crpix[0], crpix[1])
            }
        }
    }
}

/// Buffers events in memory.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    /// Events in arrival order.
    pub events: Vec<RectifyEvent>,
}

impl EventLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Warnings received so far.
    pub fn warnings(&self) -> impl Iterator<Item = &Warning> {
        self.events.iter().filter_map(|e| match e {
            RectifyEvent::Warning(w) => Some(w),
            _ => None,
        })
    }

    /// Orders reported as skipped.
    pub fn skipped_orders(&self) -> Vec<i32> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RectifyEvent::OrderSkipped { sporder, .. } => Some(*sporder),
                _ => None,
            })
            .collect()
    }
}

impl Reporter for EventLog {
    fn report(&mut self, event: RectifyEvent) {
        self.events.push(event);
    }
}
