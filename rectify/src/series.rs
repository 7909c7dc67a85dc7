//! Sorted calibration series with linear interpolation on the key.
//!
//! Coordinate descriptors, dispersion relations and spectrum traces are all
//! tables of rows keyed by a single number (a spectral order or a
//! cross-dispersion line). They share one container, [`CalibrationSeries`],
//! which is built once from the loaded rows and never modified afterwards.
//!
//! # Interpolation contract
//!
//! [`CalibrationSeries::interpolate_at`] never extrapolates:
//!
//! - a key equal to a stored key returns that record unchanged
//! - a key between two stored keys returns `(1 - p) * lo + p * hi` elementwise,
//!   with `p = (key - key_lo) / (key_hi - key_lo)`; entries missing from the
//!   shorter payload count as zero
//! - a key outside the stored range returns the nearest boundary payload with
//!   the key replaced by the query key

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{SKIPPED, TABLE_ERROR};

/// Errors raised while building or querying a calibration series.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SeriesError {
    /// The series holds no records.
    #[error("{kind} series is empty")]
    Empty {
        /// Payload kind.
        kind: &'static str,
    },

    /// No record has exactly the requested key.
    #[error("no {kind} record with key {key}")]
    NotFound {
        /// Payload kind.
        kind: &'static str,
        /// Requested key.
        key: f64,
    },

    /// Two rows carry the same key.
    #[error("duplicate key {key} in {kind} series")]
    DuplicateKey {
        /// Payload kind.
        kind: &'static str,
        /// Offending key.
        key: f64,
    },

    /// Key is NaN or infinite.
    #[error("invalid key {key} in {kind} series")]
    InvalidKey {
        /// Payload kind.
        kind: &'static str,
        /// Offending key.
        key: f64,
    },

    /// Rows that must agree on a value do not.
    #[error("{kind} rows disagree on {field}: {first} vs {other}")]
    Inconsistent {
        /// Payload kind.
        kind: &'static str,
        /// Field that differs.
        field: &'static str,
        /// Value in the first row.
        first: String,
        /// Conflicting value.
        other: String,
    },

    /// Payload array longer than the table format allows.
    #[error("{kind} payload has {len} elements, limit is {max}")]
    PayloadTooLarge {
        /// Payload kind.
        kind: &'static str,
        /// Elements supplied.
        len: usize,
        /// Limit.
        max: usize,
    },
}

impl SeriesError {
    /// Negative for "not found" conditions, positive for malformed tables.
    pub fn status_code(&self) -> i32 {
        match self {
            SeriesError::Empty { .. } | SeriesError::NotFound { .. } => SKIPPED,
            _ => TABLE_ERROR,
        }
    }

    /// True for the benign "nothing there" conditions.
    pub fn is_not_found(&self) -> bool {
        self.status_code() < 0
    }
}

/// Payload stored in a [`CalibrationSeries`].
pub trait SeriesPayload: Clone + std::fmt::Debug {
    /// Name used in diagnostics.
    const KIND: &'static str;

    /// Rejects payloads that violate the table format (e.g. oversized arrays).
    fn validate(&self) -> Result<(), SeriesError> {
        Ok(())
    }

    /// Checks that two rows may live in the same series.
    fn check_consistent(&self, _other: &Self) -> Result<(), SeriesError> {
        Ok(())
    }
}

/// Payloads that can be linearly blended between two rows.
pub trait Blend: SeriesPayload {
    /// Returns `(1 - p) * self + p * upper`.
    fn blend(&self, upper: &Self, p: f64) -> Self;
}

/// Elementwise `(1 - p) * lo + p * hi`, treating entries past either end as zero.
pub fn blend_padded(lo: &[f64], hi: &[f64], p: f64) -> Vec<f64> {
    let n = lo.len().max(hi.len());
    (0..n)
        .map(|i| {
            let a = lo.get(i).copied().unwrap_or(0.0);
            let b = hi.get(i).copied().unwrap_or(0.0);
            (1.0 - p) * a + p * b
        })
        .collect()
}

impl SeriesPayload for Vec<f64> {
    const KIND: &'static str = "coefficient";
}

impl Blend for Vec<f64> {
    fn blend(&self, upper: &Self, p: f64) -> Self {
        blend_padded(self, upper, p)
    }
}

/// Where a calibration row came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Pedigree keyword of the source table.
    #[serde(default)]
    pub pedigree: String,
    /// Free-form description of the source table.
    #[serde(default)]
    pub descrip: String,
}

impl Provenance {
    /// Provenance with the given pedigree and an empty description.
    pub fn with_pedigree(pedigree: &str) -> Self {
        Self {
            pedigree: pedigree.to_string(),
            descrip: String::new(),
        }
    }

    /// Placeholder tables have a pedigree starting with `DUMMY`.
    pub fn is_dummy(&self) -> bool {
        self.pedigree.trim_start().starts_with("DUMMY")
    }
}

/// One row of a calibration table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord<P> {
    /// Sort key: a cross-dispersion line or a spectral order number.
    #[serde(default)]
    pub key: f64,
    /// Row content.
    pub payload: P,
    /// Source table provenance.
    #[serde(default)]
    pub provenance: Provenance,
}

impl<P> CalibrationRecord<P> {
    /// Record with empty provenance.
    pub fn new(key: f64, payload: P) -> Self {
        Self {
            key,
            payload,
            provenance: Provenance::default(),
        }
    }
}

/// Immutable, strictly increasing sequence of calibration records.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSeries<P> {
    records: Vec<CalibrationRecord<P>>,
}

impl<P> Default for CalibrationSeries<P> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<P: SeriesPayload> CalibrationSeries<P> {
    /// Builds a series from rows in any order.
    pub fn from_records<I>(records: I) -> Result<Self, SeriesError>
    where
        I: IntoIterator<Item = CalibrationRecord<P>>,
    {
        let mut builder = SeriesBuilder::new();
        for record in records {
            builder.insert(record)?;
        }
        Ok(builder.finish())
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no rows were loaded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in ascending key order.
    pub fn records(&self) -> &[CalibrationRecord<P>] {
        &self.records
    }

    /// Smallest and largest key.
    pub fn range(&self) -> Result<(f64, f64), SeriesError> {
        match (self.records.first(), self.records.last()) {
            (Some(first), Some(last)) => Ok((first.key, last.key)),
            _ => Err(SeriesError::Empty { kind: P::KIND }),
        }
    }

    /// Record whose key equals `key` exactly.
    pub fn get(&self, key: f64) -> Result<&CalibrationRecord<P>, SeriesError> {
        if self.records.is_empty() {
            return Err(SeriesError::Empty { kind: P::KIND });
        }
        let idx = self.records.partition_point(|r| r.key < key);
        match self.records.get(idx) {
            Some(record) if record.key == key => Ok(record),
            _ => Err(SeriesError::NotFound { kind: P::KIND, key }),
        }
    }

    /// Applies `f` to every payload; keys and provenance are kept.
    pub fn map_payloads<F: FnMut(&mut P)>(mut self, mut f: F) -> Self {
        for record in self.records.iter_mut() {
            f(&mut record.payload);
        }
        self
    }
}

impl<P: Blend> CalibrationSeries<P> {
    /// Record at `key`, interpolated between neighbours or clamped to the ends.
    pub fn interpolate_at(&self, key: f64) -> Result<CalibrationRecord<P>, SeriesError> {
        let n = self.records.len();
        if n == 0 {
            return Err(SeriesError::Empty { kind: P::KIND });
        }

        let idx = self.records.partition_point(|r| r.key < key);
        if idx == 0 || idx == n {
            let boundary = &self.records[if idx == 0 { 0 } else { n - 1 }];
            let mut record = boundary.clone();
            record.key = key;
            return Ok(record);
        }

        let hi = &self.records[idx];
        if hi.key == key {
            return Ok(hi.clone());
        }
        let lo = &self.records[idx - 1];
        let p = (key - lo.key) / (hi.key - lo.key);
        Ok(CalibrationRecord {
            key,
            payload: lo.payload.blend(&hi.payload, p),
            provenance: lo.provenance.clone(),
        })
    }
}

/// Collects rows one at a time, keeping them sorted.
#[derive(Debug, Clone)]
pub struct SeriesBuilder<P> {
    records: Vec<CalibrationRecord<P>>,
}

impl<P: SeriesPayload> Default for SeriesBuilder<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: SeriesPayload> SeriesBuilder<P> {
    /// Empty builder.
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Inserts a row at its sorted position.
    ///
    /// Fails on a non-finite or duplicate key, an invalid payload, or a row
    /// inconsistent with those already inserted.
    pub fn insert(&mut self, record: CalibrationRecord<P>) -> Result<(), SeriesError> {
        if !record.key.is_finite() {
            return Err(SeriesError::InvalidKey {
                kind: P::KIND,
                key: record.key,
            });
        }
        record.payload.validate()?;
        if let Some(first) = self.records.first() {
            first.payload.check_consistent(&record.payload)?;
        }

        let idx = self.records.partition_point(|r| r.key < record.key);
        if self.records.get(idx).is_some_and(|r| r.key == record.key) {
            return Err(SeriesError::DuplicateKey {
                kind: P::KIND,
                key: record.key,
            });
        }
        self.records.insert(idx, record);
        Ok(())
    }

    /// Freezes the collected rows.
    pub fn finish(self) -> CalibrationSeries<P> {
        CalibrationSeries {
            records: self.records,
        }
    }
}
