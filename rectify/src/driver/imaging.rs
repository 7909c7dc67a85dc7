//! Geometric distortion correction of imaging exposures.

use crate::distortion::{GeometricMapping, SmallScaleOverlay};
use crate::driver::{skip_exposure, OrderProduct, RectificationDriver};
use crate::error::{Outcome, RectifyError};
use crate::frame::CoordinateFrame;
use crate::planes::{InputImage, OutputImage};
use crate::report::{RectifyEvent, Reporter};
use crate::resample::Resampler;
use crate::tables::{single_row, TableQuery, DISTORTION_TABLE};

/// Resamples the exposure onto an undistorted grid of the same size.
///
/// Every output pixel is mapped through the distortion polynomial (plus the
/// small-scale overlay, when given) into the input. Quality flags never
/// exclude pixels here. The declared reference pixel is pushed through the
/// approximate inverse of the same map and returned in the product frame.
pub fn correct_exposure(
    driver: &RectificationDriver<'_>,
    input: &InputImage<'_>,
    overlay: Option<&SmallScaleOverlay>,
    reporter: &mut dyn Reporter,
) -> Result<Outcome<OrderProduct>, RectifyError> {
    let obs = driver.observation();
    let config = driver.config();
    let query = TableQuery::new(&obs.opt_elem, obs.cenwave);

    let distortion = match single_row(driver.tables().distortion(&query)).into_outcome(DISTORTION_TABLE) {
        Outcome::Done(record) => {
            reporter.report(RectifyEvent::TableUsed {
                table: DISTORTION_TABLE,
                provenance: record.provenance.clone(),
            });
            record.payload
        }
        Outcome::Skipped(reason) => return Ok(skip_exposure(reason, reporter)),
    };
    distortion.check()?;

    let mapping = GeometricMapping::new(&distortion, overlay, *input.transform());
    let resampler = Resampler::new(*input, 0, config.err_algorithm);
    let (nx, ny) = (input.nx(), input.ny());
    let mut output = OutputImage::zeros(nx, ny);

    for j in 0..ny {
        for i in 0..nx {
            let [ix, iy] = mapping.output_to_input(i as f64, j as f64);
            output.set(i, j, resampler.sample(ix, iy, 1.0));
        }
    }

    let total_offset = obs.aperture_offset_pixels();
    let crpix = mapping.input_to_output(
        obs.crpix[0] + total_offset[0],
        obs.crpix[1] + total_offset[1],
    );
    log::debug!("reference pixel moved to ({:.3}, {:.3})", crpix[0], crpix[1]);
    reporter.report(RectifyEvent::ReferencePixel { crpix });

    let frame = CoordinateFrame {
        npix: [nx, ny],
        crpix,
        crval: [0.0, 0.0],
        cdelt: [distortion.scale(), distortion.scale()],
        a2center: 0.0,
    };
    Ok(Outcome::Done(OrderProduct {
        sporder: 1,
        image: output,
        frame,
        reference: None,
    }))
}
