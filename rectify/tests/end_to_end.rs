mod common;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use common::{frame, identity_tables, long_slit_observation, Planes, CENWAVE, OPT_ELEM};
use ndarray::Array2;
use rectify::driver::X2DCORR;
use rectify::error::NOTHING_TO_DO;
use rectify::planes::dq;
use rectify::slit::OccultingBar;
use rectify::tables::{EchelleOffset, DISPERSION_TABLE, TRACE_TABLE};
use rectify::trace::{SpectrumTrace, TraceRotation};
use rectify::{
    CalibrationRecord, CalibrationSet, CoordinateFrame, EventLog, Outcome, Provenance,
    RectificationDriver, RectifyConfig, RectifyError, RectifyEvent, SkipReason, StepStatus,
    TableRow,
};

const NX: usize = 40;
const NY: usize = 20;

#[test]
fn test_identity_pipeline_is_noop() {
    let _ = env_logger::builder().is_test(true).try_init();

    let planes = Planes::random(NX, NY, 42);
    let tables = identity_tables(NX, NY);
    let config = RectifyConfig::default();
    let observation = long_slit_observation();
    let driver = RectificationDriver::new(&config, &observation, &tables).unwrap();

    let mut log = EventLog::new();
    let products = driver
        .rectify(&planes.input(), None, &mut log)
        .unwrap()
        .done()
        .expect("order should be rectified");

    assert_eq!(products.len(), 1);
    let product = &products[0];
    assert_eq!(product.sporder, 1);
    assert_eq!(product.image.sci, planes.sci);
    assert_eq!(product.image.err, planes.err);
    assert_eq!(product.image.dq, planes.dq);

    assert!(log.events.contains(&RectifyEvent::OrderRectified { sporder: 1 }));
    assert!(log.events.contains(&RectifyEvent::StepSwitch {
        step: X2DCORR,
        status: StepStatus::Complete,
    }));
    assert!(log.skipped_orders().is_empty());
    assert_eq!(log.warnings().count(), 0);
}

#[test]
fn test_reference_wavelength_at_detector_centre() {
    let planes = Planes::random(NX, NY, 7);
    let tables = identity_tables(NX, NY);
    let config = RectifyConfig::default();
    let observation = long_slit_observation();
    let driver = RectificationDriver::new(&config, &observation, &tables).unwrap();

    let products = driver
        .rectify(&planes.input(), None, &mut EventLog::new())
        .unwrap()
        .done()
        .unwrap();
    let reference = products[0].reference.expect("first order carries a reference");
    assert_relative_eq!(reference.wavelength, 4812.0, epsilon = 1e-4);
    assert_relative_eq!(reference.dispersion, 1.0, epsilon = 1e-4);
}

#[test]
fn test_dummy_dispersion_table_is_not_an_error() {
    let planes = Planes::random(NX, NY, 42);
    let mut tables = identity_tables(NX, NY);
    tables.dispersion[0].record.provenance = Provenance::with_pedigree("DUMMY");
    let config = RectifyConfig::default();
    let observation = long_slit_observation();
    let driver = RectificationDriver::new(&config, &observation, &tables).unwrap();

    let mut log = EventLog::new();
    let outcome = driver.rectify(&planes.input(), None, &mut log).unwrap();
    assert_eq!(
        outcome,
        Outcome::Skipped(SkipReason::DummyPedigree {
            table: DISPERSION_TABLE
        })
    );
    assert!(outcome.status_code() < 0);
    assert!(log.events.contains(&RectifyEvent::StepSwitch {
        step: X2DCORR,
        status: StepStatus::Dummy,
    }));
}

#[test]
fn test_missing_trace_leaves_nothing_to_do() {
    let planes = Planes::random(NX, NY, 42);
    let mut tables = identity_tables(NX, NY);
    tables.traces.clear();
    let config = RectifyConfig::default();
    let observation = long_slit_observation();
    let driver = RectificationDriver::new(&config, &observation, &tables).unwrap();

    let mut log = EventLog::new();
    let err = driver.rectify(&planes.input(), None, &mut log).unwrap_err();
    assert!(matches!(err, RectifyError::NothingToDo));
    assert_eq!(err.status_code(), NOTHING_TO_DO);
    assert_eq!(log.skipped_orders(), vec![1]);
    assert!(log.events.contains(&RectifyEvent::OrderSkipped {
        sporder: 1,
        reason: SkipReason::MissingRow { table: TRACE_TABLE },
    }));
}

#[test]
fn test_order_off_image_is_skipped() {
    let planes = Planes::random(NX, NY, 42);
    let mut tables = identity_tables(NX, NY);
    let mut far = frame(NX, NY, 1.0);
    far.a2center = 500.0;
    tables.coordinates.push(TableRow::new(
        OPT_ELEM,
        CENWAVE,
        CalibrationRecord::new(2.0, far),
    ));
    let config = RectifyConfig::default();
    let observation = long_slit_observation();
    let driver = RectificationDriver::new(&config, &observation, &tables).unwrap();

    let mut log = EventLog::new();
    let products = driver
        .rectify(&planes.input(), None, &mut log)
        .unwrap()
        .done()
        .unwrap();

    assert_eq!(products.len(), 1);
    assert_eq!(products[0].sporder, 1);
    assert_eq!(products[0].image.sci, planes.sci);
    assert_eq!(log.skipped_orders(), vec![2]);
}

#[test]
fn test_first_order_override_disables_boundary_check() {
    let planes = Planes::random(NX, NY, 42);
    let mut tables = identity_tables(NX, NY);
    let mut far = frame(NX, NY, 1.0);
    far.a2center = 500.0;
    tables.coordinates.push(TableRow::new(
        OPT_ELEM,
        CENWAVE,
        CalibrationRecord::new(2.0, far),
    ));
    let config = RectifyConfig {
        first_order_override: true,
        ..Default::default()
    };
    let observation = long_slit_observation();
    let driver = RectificationDriver::new(&config, &observation, &tables).unwrap();

    let products = driver
        .rectify(&planes.input(), None, &mut EventLog::new())
        .unwrap()
        .done()
        .unwrap();
    assert_eq!(products.len(), 2);
    // Order 2 samples far above the image.
    let off = &products[1];
    assert!(off
        .image
        .dq
        .iter()
        .all(|&v| v & rectify::planes::dq::DETECTOR_PROBLEM != 0));
}

#[test]
fn test_flux_conservation_scales_by_output_dispersion() {
    let planes = Planes::random(NX, NY, 3);
    let mut tables = identity_tables(NX, NY);
    tables.coordinates[0].record.payload = frame(NX, NY, 0.5);
    let observation = long_slit_observation();

    let plain_config = RectifyConfig::default();
    let plain = RectificationDriver::new(&plain_config, &observation, &tables)
        .unwrap()
        .rectify(&planes.input(), None, &mut EventLog::new())
        .unwrap()
        .done()
        .unwrap();

    let flux_config = RectifyConfig {
        conserve_flux: true,
        ..Default::default()
    };
    let conserved = RectificationDriver::new(&flux_config, &observation, &tables)
        .unwrap()
        .rectify(&planes.input(), None, &mut EventLog::new())
        .unwrap()
        .done()
        .unwrap();

    let a = &plain[0].image.sci;
    let b = &conserved[0].image.sci;
    for (x, y) in a.iter().zip(b.iter()) {
        assert_relative_eq!(*y, 0.5 * *x, max_relative = 1e-6);
    }
}

#[test]
fn test_short_slit_masks_rows() {
    let planes = Planes::random(NX, NY, 42);
    let tables = identity_tables(NX, NY);
    let config = RectifyConfig::default();
    let mut observation = long_slit_observation();
    observation.slit.width = [2.0, 4.0];
    let driver = RectificationDriver::new(&config, &observation, &tables).unwrap();

    let products = driver
        .rectify(&planes.input(), None, &mut EventLog::new())
        .unwrap()
        .done()
        .unwrap();
    let dq = &products[0].image.dq;
    let masked = rectify::planes::dq::DATA_MASKED;
    // slit covers [5 - 2.5, 5 + 2.5]
    for j in 0..NY {
        let row_masked = dq.row(j).iter().all(|&v| v & masked != 0);
        assert_eq!(row_masked, !(3..=7).contains(&j), "row {j}");
    }
}

#[test]
fn test_status_event_sequence() {
    let planes = Planes::random(NX, NY, 42);
    let tables = identity_tables(NX, NY);
    let config = RectifyConfig::default();
    let observation = long_slit_observation();
    let driver = RectificationDriver::new(&config, &observation, &tables).unwrap();

    let mut switches = Vec::new();
    let mut reporter = |event: &RectifyEvent| {
        if let RectifyEvent::StepSwitch { status, .. } = event {
            switches.push(*status);
        }
    };
    driver.rectify(&planes.input(), None, &mut reporter).unwrap();
    assert_eq!(switches, vec![StepStatus::Perform, StepStatus::Complete]);
}

/// Bilinear value of `plane` at fractional column `x` on row `y`.
fn sample_row(plane: &Array2<f32>, x: f64, y: usize) -> f64 {
    let x0 = (x.floor() as usize).min(plane.ncols() - 2);
    let q = x - x0 as f64;
    (1.0 - q) * plane[[y, x0]] as f64 + q * plane[[y, x0 + 1]] as f64
}

fn rectify_all(
    config: &RectifyConfig,
    observation: &rectify::Observation,
    tables: &CalibrationSet,
    planes: &Planes,
    log: &mut EventLog,
) -> Vec<rectify::OrderProduct> {
    RectificationDriver::new(config, observation, tables)
        .unwrap()
        .rectify(&planes.input(), None, log)
        .unwrap()
        .done()
        .unwrap()
}

const ECHELLE_A4CORR: f64 = 0.01;
const ORDER2_START: f64 = 4544.0;

/// Orders 1 and 2; order 2 puts the central wavelength on reference pixel 512.
///
/// Order 1 keeps `pixel = wl - 4300`; order 2 has `pixel = 2 (wl - 4800) + 512`
/// and sits on reference line 10, two lines above the echelle reference position.
fn echelle_tables() -> CalibrationSet {
    let mut tables = identity_tables(NX, NY);
    tables.dispersion[0].record.payload.coeffs = vec![489.0, 1.0, 0.0, -4788.0];
    tables.coordinates.push(TableRow::new(
        OPT_ELEM,
        CENWAVE,
        CalibrationRecord::new(
            2.0,
            CoordinateFrame {
                npix: [NX, NY],
                crpix: [0.0, 5.0],
                crval: [ORDER2_START, 0.0],
                cdelt: [0.5, 1.0],
                a2center: 10.0,
            },
        ),
    ));
    tables.traces[0] = tables.traces[0].clone().for_order(1);
    tables.traces.push(
        TableRow::new(
            OPT_ELEM,
            CENWAVE,
            CalibrationRecord::new(10.0, SpectrumTrace::new(512.0, vec![0.0; NX])),
        )
        .for_order(2),
    );
    tables.echelle_offsets.push(TableRow::new(
        OPT_ELEM,
        CENWAVE,
        CalibrationRecord::new(
            0.0,
            EchelleOffset {
                mref: 2,
                yref: 8.0,
                a4corr: ECHELLE_A4CORR,
            },
        ),
    ));
    tables
}

#[test]
fn test_echelle_offset_corrects_every_order() {
    let planes = Planes::random(NX, NY, 21);
    let tables = echelle_tables();
    let config = RectifyConfig {
        msm_offset: [0.0, 1.0],
        ..Default::default()
    };
    let observation = long_slit_observation();

    let products = rectify_all(&config, &observation, &tables, &planes, &mut EventLog::new());
    assert_eq!(products.len(), 2);
    assert!(products[0].reference.is_none());

    // ydiff = msm 1 + trace line 10 - yref 8
    let k = 3.0 * ECHELLE_A4CORR;
    let order2 = &products[1];
    assert_eq!(order2.sporder, 2);
    let reference = order2.reference.expect("reference order carries a reference");
    assert_abs_diff_eq!(reference.wavelength, 4800.0, epsilon = 1e-3);
    assert_abs_diff_eq!(reference.dispersion, 1.0 / (2.0 + k), epsilon = 1e-4);

    // Output row j of order 2 lies on input row j + 6 (a2center 10, msm 1).
    let mut checked = 0;
    for j in 0..NY - 7 {
        for i in 0..NX {
            let wl = ORDER2_START + 0.5 * i as f64;
            let x = (2.0 + k) * (wl - 4800.0) + 512.0;
            if x < 0.0 || x >= (NX - 1) as f64 {
                continue;
            }
            let expected = sample_row(&planes.sci, x, j + 6);
            assert_relative_eq!(order2.image.sci[[j, i]] as f64, expected, max_relative = 1e-4);
            checked += 1;
        }
    }
    assert!(checked > 200);
}

#[test]
fn test_first_order_override_skips_echelle_correction() {
    let planes = Planes::random(NX, NY, 21);
    let tables = echelle_tables();
    let config = RectifyConfig {
        first_order_override: true,
        msm_offset: [0.0, 1.0],
        ..Default::default()
    };
    let observation = long_slit_observation();

    let products = rectify_all(&config, &observation, &tables, &planes, &mut EventLog::new());
    let first = products[0].reference.expect("first-order data carries a reference");
    assert_relative_eq!(first.wavelength, 4812.0, epsilon = 1e-4);
    let second = products[1].reference.expect("first-order data carries a reference");
    assert_abs_diff_eq!(second.wavelength, 4800.0, epsilon = 1e-3);
    assert_abs_diff_eq!(second.dispersion, 0.5, epsilon = 1e-4);
}

#[test]
fn test_center_target_moves_reference_row() {
    let planes = Planes::random(NX, NY, 8);
    let tables = identity_tables(NX, NY);
    let config = RectifyConfig {
        center_target: true,
        ..Default::default()
    };
    let observation = long_slit_observation();

    let products = rectify_all(&config, &observation, &tables, &planes, &mut EventLog::new());
    let product = &products[0];
    assert_eq!(product.frame.crpix[1], 9.5);

    // Output row j now samples input line j - 4.5.
    for j in 5..NY {
        for i in 0..NX {
            let expected = 0.5 * (planes.sci[[j - 5, i]] as f64 + planes.sci[[j - 4, i]] as f64);
            assert_relative_eq!(product.image.sci[[j, i]] as f64, expected, max_relative = 1e-5);
        }
    }
    assert!(product
        .image
        .dq
        .row(0)
        .iter()
        .all(|&v| v & dq::DETECTOR_PROBLEM != 0));
}

#[test]
fn test_heliocentric_factor_divides_output_wavelengths() {
    let planes = Planes::random(NX, NY, 13);
    let mut tables = identity_tables(NX, NY);
    let mut shifted = frame(NX, NY, 2.0);
    shifted.crval[0] = 8600.0;
    tables.coordinates[0].record.payload = shifted;
    let observation = long_slit_observation();

    // 8600 + 2i Angstroms heliocentric is 4300 + i at the observatory.
    let config = RectifyConfig {
        heliocentric_factor: 2.0,
        conserve_flux: true,
        ..Default::default()
    };
    let products = rectify_all(&config, &observation, &tables, &planes, &mut EventLog::new());
    assert_eq!(products[0].image.sci, planes.sci);
    assert_eq!(products[0].image.dq, planes.dq);

    let unshifted = rectify_all(
        &RectifyConfig::default(),
        &observation,
        &tables,
        &planes,
        &mut EventLog::new(),
    );
    assert!(unshifted[0]
        .image
        .dq
        .iter()
        .all(|&v| v & dq::DETECTOR_PROBLEM != 0));
}

#[test]
fn test_trace_rotation_tilts_extraction() {
    let planes = Planes::random(NX, NY, 17);
    let mut tables = identity_tables(NX, NY);
    let degrees_per_year = 0.1f64.atan().to_degrees();
    tables.traces[0].record.payload.rotation = TraceRotation {
        reference_mjd: 50000.0,
        degrees_per_year,
    };
    let config = RectifyConfig {
        exposure_start: 50365.25,
        ..Default::default()
    };
    let observation = long_slit_observation();

    let mut log = EventLog::new();
    let products = rectify_all(&config, &observation, &tables, &planes, &mut log);
    let rotated = log
        .events
        .iter()
        .find_map(|e| match e {
            RectifyEvent::TraceRotated { degrees } => Some(*degrees),
            _ => None,
        })
        .expect("rotation reported");
    assert_relative_eq!(rotated, degrees_per_year, epsilon = 1e-9);

    // One year at atan(0.1) per year: displacement -(i - 20) / 10.
    let sci = &products[0].image.sci;
    for j in 0..NY - 1 {
        assert_eq!(sci[[j, 20]], planes.sci[[j, 20]]);
        assert_abs_diff_eq!(sci[[j, 10]], planes.sci[[j + 1, 10]], epsilon = 1e-3);
        assert_abs_diff_eq!(sci[[j + 1, 30]], planes.sci[[j, 30]], epsilon = 1e-3);
    }
}

#[test]
fn test_already_removed_trace_is_ignored() {
    let planes = Planes::random(NX, NY, 17);
    let mut tables = identity_tables(NX, NY);
    tables.traces[0].record.payload = SpectrumTrace {
        a1center: 512.0,
        displacements: vec![3.0; NX],
        rotation: TraceRotation {
            reference_mjd: 50000.0,
            degrees_per_year: 1.0,
        },
    };
    tables.trace_rectified = true;
    let config = RectifyConfig {
        exposure_start: 51000.0,
        ..Default::default()
    };
    let observation = long_slit_observation();

    let mut log = EventLog::new();
    let products = rectify_all(&config, &observation, &tables, &planes, &mut log);
    assert_eq!(products[0].image.sci, planes.sci);
    assert!(!log
        .events
        .iter()
        .any(|e| matches!(e, RectifyEvent::TraceRotated { .. })));
}

#[test]
fn test_aperture_offset_moves_extraction_line() {
    let planes = Planes::random(NX, NY, 29);
    let tables = identity_tables(NX, NY);
    let config = RectifyConfig::default();
    let mut observation = long_slit_observation();
    // 0.1 arcsec at 0.05 arcsec per pixel
    observation.slit.ap_offset = [0.0, 0.1];

    let products = rectify_all(&config, &observation, &tables, &planes, &mut EventLog::new());
    let image = &products[0].image;
    for j in 0..NY - 2 {
        assert_eq!(image.sci.row(j), planes.sci.row(j + 2));
        assert_eq!(image.dq.row(j), planes.dq.row(j + 2));
    }
    for j in NY - 2..NY {
        assert!(image.dq.row(j).iter().all(|&v| v & dq::DETECTOR_PROBLEM != 0));
    }
}

#[test]
fn test_empty_output_frame_with_bar() {
    let planes = Planes::random(NX, NY, 42);
    let mut tables = identity_tables(NX, NY);
    let payload = &mut tables.coordinates[0].record.payload;
    payload.npix = [NX, 0];
    payload.crpix = [0.0, 0.0];
    let config = RectifyConfig::default();
    let mut observation = long_slit_observation();
    observation.slit.bars = vec![OccultingBar {
        location: 0.0,
        width: 1.0,
    }];

    let products = rectify_all(&config, &observation, &tables, &planes, &mut EventLog::new());
    assert_eq!(products[0].image.dq.dim(), (0, NX));
}
