//! Error and skip types for the rectification pipeline.
//!
//! Two kinds of outcome leave a processing step early:
//!
//! - [`RectifyError`] is a hard failure. The current image (or order) is
//!   abandoned and the caller reports it. Every variant maps to a positive
//!   status code.
//! - [`SkipReason`] is benign. The step or order is passed over and
//!   processing continues. Every skip maps to a negative status code.
//!
//! Callers that need a single integer branch on the sign of
//! [`RectifyError::status_code`] / [`SkipReason::status_code`].

use thiserror::Error;

use crate::series::SeriesError;

/// Status code for malformed calibration tables.
pub const TABLE_ERROR: i32 = 141;
/// Status code when no output could be produced at all.
pub const NOTHING_TO_DO: i32 = 116;
/// Status code for failures without a more specific code.
pub const GENERIC_ERROR_CODE: i32 = 1001;
/// Status code for benign skips.
pub const SKIPPED: i32 = -1;

/// Hard failures of the rectification pipeline.
#[derive(Error, Debug)]
pub enum RectifyError {
    /// Calibration series could not be built or queried.
    #[error("calibration series error: {0}")]
    Series(#[from] SeriesError),

    /// Distortion polynomial order outside the supported range.
    #[error("distortion polynomial order {order} exceeds the maximum of {max}")]
    DistortionOrder {
        /// Requested order.
        order: usize,
        /// Largest supported order.
        max: usize,
    },

    /// Coefficient table has the wrong number of entries for its order.
    #[error("{table}: expected {expected} coefficients, found {found}")]
    CoefficientCount {
        /// Table the coefficients came from.
        table: &'static str,
        /// Number required.
        expected: usize,
        /// Number supplied.
        found: usize,
    },

    /// More occulting bars than the slit model supports.
    #[error("slit has {count} occulting bars, at most {max} are supported")]
    TooManyBars {
        /// Bars supplied.
        count: usize,
        /// Limit.
        max: usize,
    },

    /// Science, error and quality planes disagree in shape.
    #[error("plane shape mismatch: science {science:?}, error {error:?}, quality {quality:?}")]
    PlaneShape {
        /// Science plane (rows, cols).
        science: (usize, usize),
        /// Error plane (rows, cols).
        error: (usize, usize),
        /// Quality plane (rows, cols).
        quality: (usize, usize),
    },

    /// Small-scale offset grids differ in shape or are empty.
    #[error("small-scale distortion grids must be non-empty and equal in shape")]
    OverlayShape,

    /// A linear pixel transform with a zero scale cannot be inverted.
    #[error("degenerate linear transform: scale ({0}, {1})")]
    DegenerateTransform(f64, f64),

    /// No spectral order produced any output.
    #[error("no spectral order could be rectified")]
    NothingToDo,

    /// Configuration validation failure.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// File access while loading or saving configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON configuration or calibration set.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RectifyError {
    /// Positive status code for this failure.
    pub fn status_code(&self) -> i32 {
        match self {
            RectifyError::Series(e) => e.status_code().max(TABLE_ERROR),
            RectifyError::DistortionOrder { .. }
            | RectifyError::CoefficientCount { .. }
            | RectifyError::TooManyBars { .. }
            | RectifyError::OverlayShape => TABLE_ERROR,
            RectifyError::NothingToDo => NOTHING_TO_DO,
            RectifyError::PlaneShape { .. }
            | RectifyError::DegenerateTransform(..)
            | RectifyError::InvalidConfig(_)
            | RectifyError::Io(_)
            | RectifyError::Json(_) => GENERIC_ERROR_CODE,
        }
    }
}

/// Why a step or order was passed over without failing.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The calibration table is a placeholder (pedigree `DUMMY`).
    DummyPedigree {
        /// Table name.
        table: &'static str,
    },
    /// The calibration table has no row matching the observation.
    MissingRow {
        /// Table name.
        table: &'static str,
    },
    /// The spectral order maps outside the input image.
    OrderOffImage {
        /// Spectral order number.
        sporder: i32,
        /// Cross-dispersion input coordinate of the order centre.
        line: f64,
    },
}

impl SkipReason {
    /// Negative status code for this skip.
    pub fn status_code(&self) -> i32 {
        SKIPPED
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::DummyPedigree { table } => write!(f, "{table} has DUMMY pedigree"),
            SkipReason::MissingRow { table } => write!(f, "no matching row in {table}"),
            SkipReason::OrderOffImage { sporder, line } => {
                write!(f, "spectral order {sporder} is outside the image (line {line:.1})")
            }
        }
    }
}

/// Result of a step that may legitimately be skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The step ran and produced a value.
    Done(T),
    /// The step was passed over.
    Skipped(SkipReason),
}

impl<T> Outcome<T> {
    /// Status code: 0 when done, negative when skipped.
    pub fn status_code(&self) -> i32 {
        match self {
            Outcome::Done(_) => 0,
            Outcome::Skipped(reason) => reason.status_code(),
        }
    }

    /// The produced value, if any.
    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(v) => Some(v),
            Outcome::Skipped(_) => None,
        }
    }

    /// Whether the step was skipped.
    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }

    /// Transforms the produced value, keeping a skip as is.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Done(v) => Outcome::Done(f(v)),
            Outcome::Skipped(reason) => Outcome::Skipped(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_convention() {
        let hard = RectifyError::Series(SeriesError::DuplicateKey {
            kind: "dispersion",
            key: 512.0,
        });
        assert!(hard.status_code() > 0);
        assert_eq!(hard.status_code(), TABLE_ERROR);
        assert!(RectifyError::NothingToDo.status_code() > 0);

        let skip = SkipReason::OrderOffImage {
            sporder: 3,
            line: -20.0,
        };
        assert!(skip.status_code() < 0);

        let outcome: Outcome<()> = Outcome::Skipped(skip);
        assert!(outcome.is_skipped());
        assert!(outcome.status_code() < 0);
        assert_eq!(Outcome::Done(5).status_code(), 0);
    }

    #[test]
    fn test_skip_display() {
        let skip = SkipReason::DummyPedigree { table: crate::tables::TRACE_TABLE };
        assert_eq!(skip.to_string(), "SPTRCTAB has DUMMY pedigree");
    }
}
