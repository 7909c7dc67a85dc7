//! Calibration table access.
//!
//! The pipeline asks a [`CalibrationTables`] implementation for the rows
//! matching an observation and turns them into series with
//! [`collect_series`]. Row selection is by optical element and central
//! wavelength, optionally narrowed by aperture and spectral order.
//! [`CalibrationSet`] is an in-memory implementation that can be stored as JSON.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::dispersion::{DispersionRelation, IncidenceAngle};
use crate::distortion::DistortionMap;
use crate::error::{Outcome, RectifyError, SkipReason};
use crate::frame::CoordinateFrame;
use crate::report::StepStatus;
use crate::series::{CalibrationRecord, CalibrationSeries, SeriesError, SeriesPayload};
use crate::trace::SpectrumTrace;

/// Output coordinate descriptor table.
pub const COORDINATE_TABLE: &str = "SDCTAB";
/// Dispersion coefficient table.
pub const DISPERSION_TABLE: &str = "DISPTAB";
/// Spectrum trace table.
pub const TRACE_TABLE: &str = "SPTRCTAB";
/// Incidence-angle correction table.
pub const INCIDENCE_TABLE: &str = "INANGTAB";
/// Aperture description table.
pub const APERTURE_TABLE: &str = "APDESTAB";
/// Imaging distortion coefficient table.
pub const DISTORTION_TABLE: &str = "IDCTAB";
/// Echelle reference order table.
pub const ECHELLE_TABLE: &str = "PHOTTAB";

/// Result of looking up calibration rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// Usable rows were found.
    Found(T),
    /// A matching row has a DUMMY pedigree.
    Dummy,
    /// No row matches.
    Missing,
}

impl<T> Lookup<T> {
    /// Converts to an [`Outcome`], naming `table` in the skip reason.
    pub fn into_outcome(self, table: &'static str) -> Outcome<T> {
        match self {
            Lookup::Found(v) => Outcome::Done(v),
            Lookup::Dummy => Outcome::Skipped(SkipReason::DummyPedigree { table }),
            Lookup::Missing => Outcome::Skipped(SkipReason::MissingRow { table }),
        }
    }

    /// Step switch value implied by this lookup.
    pub fn step_status(&self) -> StepStatus {
        match self {
            Lookup::Found(_) => StepStatus::Perform,
            Lookup::Dummy => StepStatus::Dummy,
            Lookup::Missing => StepStatus::Omit,
        }
    }

    /// True for [`Lookup::Found`].
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

/// Step switch value for a skip caused by a table lookup.
pub fn skip_status(reason: &SkipReason) -> StepStatus {
    match reason {
        SkipReason::DummyPedigree { .. } => StepStatus::Dummy,
        SkipReason::MissingRow { .. } => StepStatus::Omit,
        SkipReason::OrderOffImage { .. } => StepStatus::Skipped,
    }
}

/// Builds a series from matching rows.
///
/// Any DUMMY row makes the whole table a placeholder. No rows means the
/// table has nothing for this observation.
pub fn collect_series<P: SeriesPayload>(
    rows: Vec<CalibrationRecord<P>>,
) -> Result<Lookup<CalibrationSeries<P>>, SeriesError> {
    if rows.is_empty() {
        return Ok(Lookup::Missing);
    }
    if rows.iter().any(|r| r.provenance.is_dummy()) {
        return Ok(Lookup::Dummy);
    }
    Ok(Lookup::Found(CalibrationSeries::from_records(rows)?))
}

/// Classifies a single-row lookup.
pub fn single_row<P>(row: Option<CalibrationRecord<P>>) -> Lookup<CalibrationRecord<P>> {
    match row {
        None => Lookup::Missing,
        Some(r) if r.provenance.is_dummy() => Lookup::Dummy,
        Some(r) => Lookup::Found(r),
    }
}

/// Row selection criteria.
#[derive(Debug, Clone, PartialEq)]
pub struct TableQuery {
    /// Optical element name.
    pub opt_elem: String,
    /// Central wavelength setting.
    pub cenwave: i32,
    /// Aperture, or `None` for rows of every aperture.
    pub aperture: Option<String>,
    /// Spectral order, or `None` for every order.
    pub sporder: Option<i32>,
}

impl TableQuery {
    /// Query for every order of an optical element setting.
    pub fn new(opt_elem: &str, cenwave: i32) -> Self {
        Self {
            opt_elem: opt_elem.to_string(),
            cenwave,
            aperture: None,
            sporder: None,
        }
    }

    /// Narrows the query to an aperture.
    pub fn with_aperture(mut self, aperture: &str) -> Self {
        self.aperture = Some(aperture.to_string());
        self
    }

    /// Narrows the query to one spectral order.
    pub fn with_order(mut self, sporder: i32) -> Self {
        self.sporder = Some(sporder);
        self
    }
}

/// Reference position of an aperture on the detector (arcsec).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ApertureOffset {
    /// Offset (x, y) from the nominal aperture position, arcsec.
    pub offset: [f64; 2],
}

/// Echelle reference order used for the mode-select-mechanism correction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EchelleOffset {
    /// Reference spectral order.
    pub mref: i32,
    /// Expected cross-dispersion position of the reference order (reference pixels).
    pub yref: f64,
    /// Dispersion correction per pixel of offset.
    pub a4corr: f64,
}

/// Source of calibration rows.
///
/// Methods return every row matching the query; pedigree and emptiness are
/// judged by the caller through [`collect_series`] and [`single_row`].
pub trait CalibrationTables {
    /// Output coordinate descriptors, keyed by spectral order.
    fn coordinate_rows(&self, query: &TableQuery) -> Vec<CalibrationRecord<CoordinateFrame>>;

    /// Dispersion relations, keyed by cross-dispersion line.
    fn dispersion_rows(&self, query: &TableQuery) -> Vec<CalibrationRecord<DispersionRelation>>;

    /// Spectrum traces for one order, keyed by cross-dispersion line.
    fn trace_rows(&self, query: &TableQuery) -> Vec<CalibrationRecord<SpectrumTrace>>;

    /// True when the input has already had its trace removed.
    fn trace_already_rectified(&self) -> bool {
        false
    }

    /// Incidence-angle correction for one order.
    fn incidence_angle(&self, query: &TableQuery) -> Option<CalibrationRecord<IncidenceAngle>>;

    /// Position of a named aperture.
    fn aperture(&self, name: &str) -> Option<CalibrationRecord<ApertureOffset>>;

    /// Echelle reference order, if the setting has one.
    fn echelle_offset(&self, query: &TableQuery) -> Option<CalibrationRecord<EchelleOffset>>;

    /// Imaging distortion polynomial.
    fn distortion(&self, query: &TableQuery) -> Option<CalibrationRecord<DistortionMap>>;
}

/// A table row together with its selection columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow<P> {
    /// Optical element the row applies to.
    #[serde(default)]
    pub opt_elem: String,
    /// Central wavelength setting the row applies to.
    #[serde(default)]
    pub cenwave: i32,
    /// Restricts the row to one aperture.
    #[serde(default)]
    pub aperture: Option<String>,
    /// Restricts the row to one spectral order.
    #[serde(default)]
    pub sporder: Option<i32>,
    /// Key, payload and provenance.
    #[serde(flatten)]
    pub record: CalibrationRecord<P>,
}

impl<P> TableRow<P> {
    /// Row for an optical element setting, applying to every aperture and order.
    pub fn new(opt_elem: &str, cenwave: i32, record: CalibrationRecord<P>) -> Self {
        Self {
            opt_elem: opt_elem.to_string(),
            cenwave,
            aperture: None,
            sporder: None,
            record,
        }
    }

    /// Restricts the row to spectral order `sporder`.
    pub fn for_order(mut self, sporder: i32) -> Self {
        self.sporder = Some(sporder);
        self
    }

    /// Restricts the row to the named aperture.
    pub fn for_aperture(mut self, aperture: &str) -> Self {
        self.aperture = Some(aperture.to_string());
        self
    }

    /// Whether this row applies to `query`.
    ///
    /// Selection columns left empty on either side match anything.
    pub fn matches(&self, query: &TableQuery) -> bool {
        fn optional<T: PartialEq>(row: &Option<T>, query: &Option<T>) -> bool {
            match (row, query) {
                (Some(r), Some(q)) => r == q,
                _ => true,
            }
        }
        self.opt_elem == query.opt_elem
            && self.cenwave == query.cenwave
            && optional(&self.aperture, &query.aperture)
            && optional(&self.sporder, &query.sporder)
    }
}

fn select<P: Clone>(rows: &[TableRow<P>], query: &TableQuery) -> Vec<CalibrationRecord<P>> {
    rows.iter()
        .filter(|r| r.matches(query))
        .map(|r| r.record.clone())
        .collect()
}

fn first<P: Clone>(rows: &[TableRow<P>], query: &TableQuery) -> Option<CalibrationRecord<P>> {
    rows.iter()
        .find(|r| r.matches(query))
        .map(|r| r.record.clone())
}

/// In-memory calibration tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSet {
    /// Output frames, keyed by spectral order
    pub coordinates: Vec<TableRow<CoordinateFrame>>,
    /// Dispersion relations, keyed by cross-dispersion line
    pub dispersion: Vec<TableRow<DispersionRelation>>,
    /// Spectrum traces, keyed by cross-dispersion line
    pub traces: Vec<TableRow<SpectrumTrace>>,
    /// Input data already had the trace removed
    pub trace_rectified: bool,
    /// Incidence-angle coefficients, one row per order
    pub incidence_angles: Vec<TableRow<IncidenceAngle>>,
    /// Rows keyed by the `aperture` selection column only
    pub apertures: Vec<TableRow<ApertureOffset>>,
    /// Echelle reference orders
    pub echelle_offsets: Vec<TableRow<EchelleOffset>>,
    /// Imaging distortion maps
    pub distortion: Vec<TableRow<DistortionMap>>,
}

impl CalibrationSet {
    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<(), RectifyError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from JSON file, validating every distortion map.
    pub fn load_from_file(path: &Path) -> Result<Self, RectifyError> {
        let json = std::fs::read_to_string(path)?;
        let set: Self = serde_json::from_str(&json)?;
        for row in &set.distortion {
            row.record.payload.check()?;
        }
        Ok(set)
    }
}

impl CalibrationTables for CalibrationSet {
    fn coordinate_rows(&self, query: &TableQuery) -> Vec<CalibrationRecord<CoordinateFrame>> {
        select(&self.coordinates, query)
    }

    fn dispersion_rows(&self, query: &TableQuery) -> Vec<CalibrationRecord<DispersionRelation>> {
        select(&self.dispersion, query)
    }

    fn trace_rows(&self, query: &TableQuery) -> Vec<CalibrationRecord<SpectrumTrace>> {
        select(&self.traces, query)
    }

    fn trace_already_rectified(&self) -> bool {
        self.trace_rectified
    }

    fn incidence_angle(&self, query: &TableQuery) -> Option<CalibrationRecord<IncidenceAngle>> {
        first(&self.incidence_angles, query)
    }

    fn aperture(&self, name: &str) -> Option<CalibrationRecord<ApertureOffset>> {
        self.apertures
            .iter()
            .find(|r| r.aperture.as_deref() == Some(name))
            .map(|r| r.record.clone())
    }

    fn echelle_offset(&self, query: &TableQuery) -> Option<CalibrationRecord<EchelleOffset>> {
        first(&self.echelle_offsets, query)
    }

    fn distortion(&self, query: &TableQuery) -> Option<CalibrationRecord<DistortionMap>> {
        first(&self.distortion, query)
    }
}
