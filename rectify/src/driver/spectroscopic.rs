//! Spectroscopic rectification.
//!
//! For every output row the dispersion relation and spectrum trace are
//! interpolated at the row's reference-frame line and corrected for slit tilt
//! and incidence angle. Every output pixel is then converted to a wavelength,
//! solved back to an input position and resampled.

use crate::dispersion::{AdjustWarnings, DispersionRelation, IncidenceAngle};
use crate::driver::{load_series, skip_exposure, OrderProduct, RectificationDriver, ReferenceDispersion};
use crate::error::{Outcome, RectifyError, SkipReason};
use crate::frame::{CoordinateFrame, LinearTransform};
use crate::planes::{InputImage, OutputImage};
use crate::report::{RectifyEvent, Reporter, Warning};
use crate::resample::Resampler;
use crate::series::CalibrationSeries;
use crate::slit::mask_slit;
use crate::tables::{
    collect_series, single_row, EchelleOffset, TableQuery, APERTURE_TABLE,
    COORDINATE_TABLE, DISPERSION_TABLE, ECHELLE_TABLE, INCIDENCE_TABLE, TRACE_TABLE,
};
use crate::trace::{line_at, prepare_rows, SpectrumTrace};

/// Input pixel at which the reference wavelength is evaluated.
pub const REFERENCE_PIXEL: f64 = 512.0;

/// Half-width (Angstroms) of the wavelength search around the central wavelength.
const WAVELENGTH_WINDOW: f64 = 100.0;

/// Calibration shared by every order of one exposure.
struct ExposureCalibration {
    dispersion: CalibrationSeries<DispersionRelation>,
    total_offset: [f64; 2],
    first_order: bool,
    reference_order: Option<i32>,
}

/// Rectifies every order listed in the coordinate table.
///
/// Orders that cannot be processed are reported and passed over. If none
/// is left the exposure fails with [`RectifyError::NothingToDo`].
pub fn rectify_exposure(
    driver: &RectificationDriver<'_>,
    input: &InputImage<'_>,
    reporter: &mut dyn Reporter,
) -> Result<Outcome<Vec<OrderProduct>>, RectifyError> {
    let obs = driver.observation();
    let config = driver.config();
    let query = TableQuery::new(&obs.opt_elem, obs.cenwave);

    let coords = match load_series(driver.tables().coordinate_rows(&query), COORDINATE_TABLE, reporter)? {
        Outcome::Done(series) => series,
        Outcome::Skipped(reason) => return Ok(skip_exposure(reason, reporter)),
    };
    let dispersion = match load_series(driver.tables().dispersion_rows(&query), DISPERSION_TABLE, reporter)? {
        Outcome::Done(series) => series,
        Outcome::Skipped(reason) => return Ok(skip_exposure(reason, reporter)),
    };

    let (_, max_order) = coords.range()?;
    let first_order = config.first_order_override || max_order <= 1.0;
    let ltm = input.transform().ltm;
    let aperture_offset = obs.aperture_offset_pixels();
    let total_offset = [
        config.msm_offset[0] + aperture_offset[0],
        config.msm_offset[1] + aperture_offset[1],
    ];

    let mut reference_order = None;
    let mut dispersion = dispersion;
    if !first_order {
        if let Some(echelle) = echelle_reference(driver, &query, reporter) {
            reference_order = Some(echelle.mref);
            if echelle.a4corr != 0.0 {
                if let Some(ydiff) = echelle_ydiff(driver, &query, &echelle, ltm[1], reporter)? {
                    let cenwave = obs.cenwave as f64;
                    log::debug!("echelle offset correction, ydiff = {ydiff:.3}");
                    dispersion = dispersion
                        .map_payloads(|d| d.apply_echelle_offset(ydiff, cenwave, echelle.a4corr));
                }
            }
        }
    }

    let calibration = ExposureCalibration {
        dispersion,
        total_offset,
        first_order,
        reference_order,
    };

    let mut products = Vec::new();
    for record in coords.records() {
        let sporder = record.key.round() as i32;
        let mut frame = record.payload.scale_to_binning(ltm);
        if first_order && config.center_target {
            frame.center_target();
        }

        match rectify_order(driver, input, &calibration, sporder, frame, reporter)? {
            Outcome::Done(product) => {
                log::debug!("order {sporder} rectified");
                reporter.report(RectifyEvent::OrderRectified { sporder });
                products.push(product);
            }
            Outcome::Skipped(reason) => {
                log::info!("skipping order {sporder}: {reason}");
                reporter.report(RectifyEvent::OrderSkipped { sporder, reason });
            }
        }
    }

    if products.is_empty() {
        return Err(RectifyError::NothingToDo);
    }
    Ok(Outcome::Done(products))
}

fn echelle_reference(
    driver: &RectificationDriver<'_>,
    query: &TableQuery,
    reporter: &mut dyn Reporter,
) -> Option<EchelleOffset> {
    match single_row(driver.tables().echelle_offset(query)).into_outcome(ECHELLE_TABLE) {
        Outcome::Done(record) => Some(record.payload),
        Outcome::Skipped(reason) => {
            reporter.report(RectifyEvent::Warning(Warning::TableOmitted {
                table: ECHELLE_TABLE,
                reason,
            }));
            None
        }
    }
}

/// Offset of the reference order from its expected position (reference pixels).
fn echelle_ydiff(
    driver: &RectificationDriver<'_>,
    query: &TableQuery,
    echelle: &EchelleOffset,
    ltm_y: f64,
    reporter: &mut dyn Reporter,
) -> Result<Option<f64>, RectifyError> {
    let rows = driver
        .tables()
        .trace_rows(&query.clone().with_order(echelle.mref));
    match collect_series(rows)?.into_outcome(TRACE_TABLE) {
        Outcome::Done(traces) => Ok(traces.records().first().map(|first| {
            driver.config().msm_offset[1] / ltm_y + first.key - echelle.yref
        })),
        Outcome::Skipped(reason) => {
            reporter.report(RectifyEvent::Warning(Warning::TableOmitted {
                table: TRACE_TABLE,
                reason,
            }));
            Ok(None)
        }
    }
}

/// Per-order calibration: aperture offset, traces and incidence angle.
struct OrderCalibration {
    /// Aperture offset along the dispersion axis, arcsec.
    delta: f64,
    traces: CalibrationSeries<SpectrumTrace>,
    incidence: IncidenceAngle,
}

fn load_order_calibration(
    driver: &RectificationDriver<'_>,
    dispersion: &CalibrationSeries<DispersionRelation>,
    sporder: i32,
    reporter: &mut dyn Reporter,
) -> Result<Outcome<OrderCalibration>, RectifyError> {
    let obs = driver.observation();
    let config = driver.config();
    let tables = driver.tables();
    let query = TableQuery::new(&obs.opt_elem, obs.cenwave).with_order(sporder);

    let ref_aperture = dispersion
        .records()
        .first()
        .map(|r| r.payload.ref_aperture.as_str())
        .unwrap_or_default();
    let axis = config.dispersion_axis.index();
    let delta = match single_row(tables.aperture(ref_aperture)).into_outcome(APERTURE_TABLE) {
        Outcome::Done(aperture) => obs.slit.ap_offset[axis] - aperture.payload.offset[axis],
        Outcome::Skipped(reason) => return Ok(Outcome::Skipped(reason)),
    };

    let mut rows = tables.trace_rows(&query);
    prepare_rows(
        &mut rows,
        config.exposure_start,
        tables.trace_already_rectified(),
        reporter,
    );
    let traces = match collect_series(rows)?.into_outcome(TRACE_TABLE) {
        Outcome::Done(series) => series,
        Outcome::Skipped(reason) => return Ok(Outcome::Skipped(reason)),
    };

    let incidence = match single_row(tables.incidence_angle(&query)).into_outcome(INCIDENCE_TABLE) {
        Outcome::Done(record) => record.payload,
        Outcome::Skipped(reason) => return Ok(Outcome::Skipped(reason)),
    };

    Ok(Outcome::Done(OrderCalibration {
        delta,
        traces,
        incidence,
    }))
}

/// Rectifies one spectral order.
fn rectify_order(
    driver: &RectificationDriver<'_>,
    input: &InputImage<'_>,
    calibration: &ExposureCalibration,
    sporder: i32,
    frame: CoordinateFrame,
    reporter: &mut dyn Reporter,
) -> Result<Outcome<OrderProduct>, RectifyError> {
    let obs = driver.observation();
    let config = driver.config();

    let order = match load_order_calibration(driver, &calibration.dispersion, sporder, reporter)? {
        Outcome::Done(order) => order,
        Outcome::Skipped(reason) => return Ok(Outcome::Skipped(reason)),
    };

    let transform = *input.transform();
    let center_line = frame.a2center + calibration.total_offset[1];
    if !calibration.first_order {
        if let Some(line) = order_off_image(input, &order.traces, center_line, &transform)? {
            return Ok(Outcome::Skipped(SkipReason::OrderOffImage { sporder, line }));
        }
    }

    let m = sporder as f64;
    let hfactor = config.heliocentric_factor;
    let step = frame.dispersion_step(hfactor);
    let resampler = Resampler::new(*input, config.sdqflags, config.err_algorithm);
    let [nx, ny] = frame.npix;
    let mut output = OutputImage::zeros(nx, ny);
    let mut warnings = AdjustWarnings::default();

    for j in 0..ny {
        let oy = j as f64;
        let line = frame.reference_line(oy, transform.ltm[1], calibration.total_offset[1]);

        let mut disp = calibration.dispersion.interpolate_at(line)?.payload;
        disp.adjust_slit_tilt((oy - frame.crpix[1]) / transform.ltm[1], obs.slit.angle);
        disp.adjust_incidence(&order.incidence, order.delta, &mut warnings, reporter);
        let trace = order.traces.interpolate_at(line)?;

        for i in 0..nx {
            let (wl, _) = frame.pixel_to_physical(i as f64, oy, hfactor);
            let ix_r = disp.pixel_at(obs.disperser, m, wl);
            let iy_r = line_at(&trace, ix_r);
            let [ix, iy] = transform.to_image([ix_r, iy_r]);
            let jacobian = if config.conserve_flux {
                (disp.pixels_per_wavelength(obs.disperser, m, wl, step) * step * transform.ltm[0])
                    .abs()
            } else {
                1.0
            };
            output.set(i, j, resampler.sample(ix, iy, jacobian));
        }
    }

    mask_slit(&mut output.dq, &frame, &obs.slit, config.dispersion_axis);

    let reference = if calibration.first_order || calibration.reference_order == Some(sporder) {
        let mut disp = calibration.dispersion.interpolate_at(center_line)?.payload;
        disp.adjust_incidence(&order.incidence, order.delta, &mut warnings, reporter);
        Some(reference_dispersion(&disp, driver, m))
    } else {
        None
    };

    Ok(Outcome::Done(OrderProduct {
        sporder,
        image: output,
        frame,
        reference,
    }))
}

/// Input line of the order centre at the middle column, when it is off the image.
fn order_off_image(
    input: &InputImage<'_>,
    traces: &CalibrationSeries<SpectrumTrace>,
    center_line: f64,
    transform: &LinearTransform,
) -> Result<Option<f64>, RectifyError> {
    let trace = traces.interpolate_at(center_line)?;
    let ix = input.nx() as f64 / 2.0;
    let ix_r = (ix - transform.ltv[0]) / transform.ltm[0];
    let iy = line_at(&trace, ix_r) * transform.ltm[1] + transform.ltv[1];
    if iy < 0.0 || iy >= input.ny() as f64 {
        Ok(Some(iy))
    } else {
        Ok(None)
    }
}

fn reference_dispersion(
    disp: &DispersionRelation,
    driver: &RectificationDriver<'_>,
    m: f64,
) -> ReferenceDispersion {
    let obs = driver.observation();
    let cenwave = obs.cenwave as f64;
    let bounds = (cenwave - WAVELENGTH_WINDOW, cenwave + WAVELENGTH_WINDOW);
    let wavelength = disp.wavelength_at(obs.disperser, m, REFERENCE_PIXEL, bounds);
    let previous = disp.wavelength_at(obs.disperser, m, REFERENCE_PIXEL - 1.0, bounds);
    ReferenceDispersion {
        wavelength,
        dispersion: wavelength - previous,
    }
}
