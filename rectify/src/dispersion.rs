//! Dispersion relations: wavelength to pixel and back.
//!
//! Gratings use a polynomial in spectral order `m` and wavelength `wl` giving
//! the (zero-indexed) pixel along the dispersion axis directly. The prism
//! relation runs the other way (wavelength as a function of pixel), so its
//! pixel for a given wavelength is found by bisection.
//!
//! The relation interpolated to a given row is further adjusted for the
//! incidence angle (aperture offset along the dispersion axis), the slit
//! tilt, and for echelle modes the mode-select-mechanism offset.

use serde::{Deserialize, Serialize};

use crate::report::{RectifyEvent, Reporter, Warning};
use crate::series::{blend_padded, Blend, SeriesError, SeriesPayload};

/// Largest number of dispersion coefficients in a table row.
pub const MAX_DISP_COEFF: usize = 10;

/// Longest wavelength the prism relation is trusted for (Angstroms).
pub const MAX_PRISM_WAVELENGTH: f64 = 6000.0;

/// Pixel interval searched when solving the prism relation.
pub const PRISM_PIXEL_RANGE: (f64, f64) = (0.0, 1023.0);

/// Distance outside [`PRISM_PIXEL_RANGE`] returned for out-of-range wavelengths.
pub const PRISM_SENTINEL_MARGIN: f64 = 100.0;

/// Slit angle (degrees) at which the dispersion tables were measured.
pub const REFERENCE_SLIT_ANGLE: f64 = 0.315;

const PRISM_PIXEL_TOLERANCE: f64 = 0.01;
const WAVELENGTH_TOLERANCE: f64 = 1e-5;
const MAX_BISECTIONS: usize = 100;

/// (power of m, power of wl) for each grating coefficient.
const GRATING_TERMS: [(i32, i32); 9] = [
    (0, 0),
    (1, 1),
    (2, 2),
    (1, 0),
    (0, 1),
    (2, 1),
    (1, 2),
    (3, 3),
    (2, 0),
];

/// Kind of dispersing element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disperser {
    /// Polynomial pixel(m, wl) relation.
    #[default]
    Grating,
    /// Rational wl(pixel) relation.
    Prism,
}

/// Dispersion coefficients for one cross-dispersion line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispersionRelation {
    /// Polynomial coefficients.
    pub coeffs: Vec<f64>,
    /// Aperture the relation was measured with.
    #[serde(default)]
    pub ref_aperture: String,
}

impl SeriesPayload for DispersionRelation {
    const KIND: &'static str = "dispersion";

    fn validate(&self) -> Result<(), SeriesError> {
        if self.coeffs.len() > MAX_DISP_COEFF {
            return Err(SeriesError::PayloadTooLarge {
                kind: Self::KIND,
                len: self.coeffs.len(),
                max: MAX_DISP_COEFF,
            });
        }
        Ok(())
    }

    fn check_consistent(&self, other: &Self) -> Result<(), SeriesError> {
        if self.ref_aperture != other.ref_aperture {
            return Err(SeriesError::Inconsistent {
                kind: Self::KIND,
                field: "ref_aperture",
                first: self.ref_aperture.clone(),
                other: other.ref_aperture.clone(),
            });
        }
        Ok(())
    }
}

impl Blend for DispersionRelation {
    fn blend(&self, upper: &Self, p: f64) -> Self {
        Self {
            coeffs: blend_padded(&self.coeffs, &upper.coeffs, p),
            ref_aperture: self.ref_aperture.clone(),
        }
    }
}

/// Incidence-angle correction coefficients for one order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidenceAngle {
    /// Per-coefficient linear terms.
    pub coeff1: Vec<f64>,
    /// Constant-term polynomial in the offset (only two terms are used).
    pub coeff2: Vec<f64>,
}

/// Tracks which adjustment warnings were already issued for an order.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdjustWarnings {
    count_mismatch: bool,
    extra_terms: bool,
}

impl DispersionRelation {
    /// Relation with no reference aperture.
    pub fn new(coeffs: Vec<f64>) -> Self {
        Self {
            coeffs,
            ref_aperture: String::new(),
        }
    }

    fn coeff(&self, i: usize) -> f64 {
        self.coeffs.get(i).copied().unwrap_or(0.0)
    }

    /// Grating: zero-indexed pixel of wavelength `wl` in order `m`.
    pub fn grating_pixel(&self, m: f64, wl: f64) -> f64 {
        let one_indexed: f64 = self
            .coeffs
            .iter()
            .zip(GRATING_TERMS.iter())
            .map(|(c, &(mp, wp))| c * m.powi(mp) * wl.powi(wp))
            .sum();
        one_indexed - 1.0
    }

    /// Grating: derivative of [`Self::grating_pixel`] with respect to wavelength.
    pub fn grating_derivative(&self, m: f64, wl: f64) -> f64 {
        self.coeffs
            .iter()
            .zip(GRATING_TERMS.iter())
            .filter(|(_, term)| term.1 > 0)
            .map(|(c, &(mp, wp))| c * wp as f64 * m.powi(mp) * wl.powi(wp - 1))
            .sum()
    }

    /// Prism: wavelength at zero-indexed pixel `pixel`.
    pub fn prism_wavelength(&self, pixel: f64) -> f64 {
        let x = pixel - self.coeff(0) + 1.0;
        let mut wl = self.coeff(5) / x;
        wl = (self.coeff(4) + wl) / x;
        wl = (self.coeff(3) + wl) / x;
        wl = (self.coeff(2) + wl) / x;
        wl + self.coeff(1)
    }

    /// Prism: pixel of wavelength `wl`, by bisection over [`PRISM_PIXEL_RANGE`].
    ///
    /// Wavelengths shorter than anything on the detector, or longer than
    /// [`MAX_PRISM_WAVELENGTH`], return a pixel [`PRISM_SENTINEL_MARGIN`]
    /// beyond the matching end of the range, so the resampler treats the
    /// result as off the image.
    pub fn solve_prism(&self, wl: f64) -> f64 {
        let (lo, hi) = PRISM_PIXEL_RANGE;
        let wl_lo = self.prism_wavelength(lo);
        let wl_hi = self.prism_wavelength(hi);
        let increasing = wl_hi >= wl_lo;
        let (blue_end, red_end) = if increasing {
            (lo - PRISM_SENTINEL_MARGIN, hi + PRISM_SENTINEL_MARGIN)
        } else {
            (hi + PRISM_SENTINEL_MARGIN, lo - PRISM_SENTINEL_MARGIN)
        };

        if wl < wl_lo.min(wl_hi) {
            return blue_end;
        }
        if wl > MAX_PRISM_WAVELENGTH {
            return red_end;
        }
        bisect(|px| self.prism_wavelength(px), wl, lo, hi, PRISM_PIXEL_TOLERANCE)
    }

    /// Zero-indexed dispersion-axis pixel of wavelength `wl` in order `m`.
    pub fn pixel_at(&self, disperser: Disperser, m: f64, wl: f64) -> f64 {
        match disperser {
            Disperser::Grating => self.grating_pixel(m, wl),
            Disperser::Prism => self.solve_prism(wl),
        }
    }

    /// Pixels per Angstrom at `wl`.
    ///
    /// The prism derivative is a central difference over `step` Angstroms.
    pub fn pixels_per_wavelength(&self, disperser: Disperser, m: f64, wl: f64, step: f64) -> f64 {
        match disperser {
            Disperser::Grating => self.grating_derivative(m, wl),
            Disperser::Prism => {
                let h = 0.5 * step.abs().max(f64::EPSILON);
                (self.solve_prism(wl + h) - self.solve_prism(wl - h)) / (2.0 * h)
            }
        }
    }

    /// Wavelength at zero-indexed pixel `pixel`.
    ///
    /// Gratings are inverted by bisection within `bounds` (Angstroms) to a
    /// tolerance of 1e-5; the prism relation is evaluated directly.
    pub fn wavelength_at(&self, disperser: Disperser, m: f64, pixel: f64, bounds: (f64, f64)) -> f64 {
        match disperser {
            Disperser::Prism => self.prism_wavelength(pixel),
            Disperser::Grating => bisect(
                |wl| self.grating_pixel(m, wl),
                pixel,
                bounds.0,
                bounds.1,
                WAVELENGTH_TOLERANCE,
            ),
        }
    }

    /// Applies the incidence-angle correction for an aperture offset.
    ///
    /// `offset` is the aperture offset along the dispersion axis in arcsec,
    /// relative to the aperture the relation was measured with.
    pub fn adjust_incidence(
        &mut self,
        iac: &IncidenceAngle,
        offset: f64,
        warnings: &mut AdjustWarnings,
        reporter: &mut dyn Reporter,
    ) {
        let n = self.coeffs.len().min(iac.coeff1.len());
        if self.coeffs.len() != iac.coeff1.len() && !warnings.count_mismatch {
            warnings.count_mismatch = true;
            reporter.report(RectifyEvent::Warning(Warning::CoefficientCountMismatch {
                dispersion: self.coeffs.len(),
                incidence: iac.coeff1.len(),
            }));
        }
        for i in 0..n {
            self.coeffs[i] += iac.coeff1[i] * offset;
        }

        if iac.coeff2.len() > 2 && !warnings.extra_terms {
            warnings.extra_terms = true;
            reporter.report(RectifyEvent::Warning(Warning::ExtraIncidenceTerms {
                count: iac.coeff2.len(),
            }));
        }
        let c0 = iac.coeff2.first().copied().unwrap_or(0.0);
        let c1 = iac.coeff2.get(1).copied().unwrap_or(0.0);
        if self.coeffs.is_empty() {
            self.coeffs.push(0.0);
        }
        self.coeffs[0] += c0 * offset + c1 * offset * offset;
    }

    /// Applies the slit-tilt correction.
    ///
    /// `row_offset` is the distance (reference pixels) of the current line from
    /// the output reference row; `slit_angle` is the measured slit angle in degrees.
    pub fn adjust_slit_tilt(&mut self, row_offset: f64, slit_angle: f64) {
        let del_tan = slit_angle.to_radians().tan() - REFERENCE_SLIT_ANGLE.to_radians().tan();
        if del_tan == 0.0 {
            return;
        }
        if self.coeffs.is_empty() {
            self.coeffs.push(0.0);
        }
        self.coeffs[0] += row_offset * del_tan;
    }

    /// Echelle correction for the mode-select-mechanism offset `ydiff` (pixels).
    pub fn apply_echelle_offset(&mut self, ydiff: f64, cenwave: f64, a4corr: f64) {
        if a4corr == 0.0 {
            return;
        }
        if self.coeffs.len() < 5 {
            self.coeffs.resize(5, 0.0);
        }
        self.coeffs[0] -= ydiff * cenwave * a4corr;
        self.coeffs[4] += ydiff * a4corr;
    }
}

/// Finds `x` in `[lo, hi]` with `f(x) == target` for monotonic `f`.
fn bisect<F: Fn(f64) -> f64>(f: F, target: f64, lo: f64, hi: f64, tolerance: f64) -> f64 {
    let increasing = f(hi) >= f(lo);
    let (mut lo, mut hi) = (lo, hi);
    for _ in 0..MAX_BISECTIONS {
        if (hi - lo).abs() <= tolerance {
            break;
        }
        let mid = 0.5 * (lo + hi);
        if (f(mid) < target) == increasing {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}
