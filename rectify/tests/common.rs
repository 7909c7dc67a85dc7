//! Common fixtures for rectify integration tests

#![allow(dead_code)]

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rectify::dispersion::{DispersionRelation, IncidenceAngle};
use rectify::slit::SlitGeometry;
use rectify::tables::ApertureOffset;
use rectify::trace::SpectrumTrace;
use rectify::{
    CalibrationRecord, CalibrationSet, CoordinateFrame, InputImage, LinearTransform, Observation,
    ObservationMode, TableRow,
};

pub const OPT_ELEM: &str = "G430L";
pub const CENWAVE: i32 = 4800;
pub const REF_APERTURE: &str = "52X2";

/// Wavelength of output column 0.
pub const START_WAVELENGTH: f64 = 4300.0;

/// Owned science, error and quality planes.
#[derive(Debug, Clone)]
pub struct Planes {
    pub sci: Array2<f32>,
    pub err: Array2<f32>,
    pub dq: Array2<u16>,
}

impl Planes {
    /// Random positive science values with a few flagged pixels.
    pub fn random(nx: usize, ny: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let sci = Array2::from_shape_fn((ny, nx), |_| rng.gen_range(10.0..1000.0) as f32);
        let err = Array2::from_shape_fn((ny, nx), |_| rng.gen_range(1.0..5.0) as f32);
        let mut dq = Array2::zeros((ny, nx));
        for _ in 0..5 {
            let x = rng.gen_range(0..nx);
            let y = rng.gen_range(0..ny);
            dq[[y, x]] = 16;
        }
        Self { sci, err, dq }
    }

    pub fn input(&self) -> InputImage<'_> {
        self.input_with(LinearTransform::IDENTITY)
    }

    pub fn input_with(&self, transform: LinearTransform) -> InputImage<'_> {
        InputImage::new(self.sci.view(), self.err.view(), self.dq.view(), transform).unwrap()
    }
}

/// Output frame whose column `i` is wavelength `START_WAVELENGTH + i * cdelt`
/// and whose row `j` is reference line `j`.
pub fn frame(nx: usize, ny: usize, cdelt: f64) -> CoordinateFrame {
    CoordinateFrame {
        npix: [nx, ny],
        crpix: [0.0, 5.0],
        crval: [START_WAVELENGTH, 0.0],
        cdelt: [cdelt, 1.0],
        a2center: 5.0,
    }
}

/// Calibration for which first-order rectification is the identity.
///
/// The grating relation puts wavelength `START_WAVELENGTH + i` on pixel `i`
/// in order 1, the trace is flat and every correction vanishes.
pub fn identity_tables(nx: usize, ny: usize) -> CalibrationSet {
    let mut dispersion = DispersionRelation::new(vec![1.0 - START_WAVELENGTH, 1.0]);
    dispersion.ref_aperture = REF_APERTURE.to_string();

    CalibrationSet {
        coordinates: vec![TableRow::new(
            OPT_ELEM,
            CENWAVE,
            CalibrationRecord::new(1.0, frame(nx, ny, 1.0)),
        )],
        dispersion: vec![TableRow::new(
            OPT_ELEM,
            CENWAVE,
            CalibrationRecord::new(5.0, dispersion),
        )],
        traces: vec![TableRow::new(
            OPT_ELEM,
            CENWAVE,
            CalibrationRecord::new(5.0, SpectrumTrace::new(512.0, vec![0.0; nx])),
        )],
        incidence_angles: vec![TableRow::new(
            OPT_ELEM,
            CENWAVE,
            CalibrationRecord::new(
                0.0,
                IncidenceAngle {
                    coeff1: vec![0.0, 0.0],
                    coeff2: vec![0.0, 0.0],
                },
            ),
        )],
        apertures: vec![TableRow::new(
            "",
            0,
            CalibrationRecord::new(0.0, ApertureOffset::default()),
        )
        .for_aperture(REF_APERTURE)],
        ..Default::default()
    }
}

/// Long-slit grating observation matching [`identity_tables`].
pub fn long_slit_observation() -> Observation {
    Observation {
        opt_elem: OPT_ELEM.to_string(),
        cenwave: CENWAVE,
        aperture: REF_APERTURE.to_string(),
        mode: ObservationMode::Spectroscopic,
        slit: SlitGeometry {
            angle: rectify::dispersion::REFERENCE_SLIT_ANGLE,
            width: [2.0, 52.0],
            ..Default::default()
        },
        plate_scale: [0.05, 0.05],
        ..Default::default()
    }
}

/// Imaging observation with the reference pixel at `crpix`.
pub fn imaging_observation(crpix: [f64; 2]) -> Observation {
    Observation {
        opt_elem: "CLEAR".to_string(),
        cenwave: 5852,
        aperture: "50CCD".to_string(),
        mode: ObservationMode::Imaging,
        plate_scale: [0.05, 0.05],
        crpix,
        ..Default::default()
    }
}
