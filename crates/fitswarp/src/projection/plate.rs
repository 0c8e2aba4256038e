//! Digitized Sky Survey plate model.
//!
//! Pixels are converted to millimetres on the plate, the AMD polynomials give
//! standard coordinates (xi, eta) in arcseconds, and a tangent-plane
//! deprojection about the plate center gives RA/Dec. The inverse runs
//! Newton's method on the polynomials.

use crate::coords::{angular_distance, CoordSys, WorldPt};
use crate::error::{Error, Result};
use crate::header::PlateSolution;

const ARCSEC_PER_RADIAN: f64 = 206_264.806_247_096_4;
const MAX_ITERATIONS: usize = 50;
const TOLERANCE: f64 = 5e-7;

// Value and partial derivatives of one AMD polynomial, magnitude and colour
// terms dropped. `c` is AMDX or AMDY; for AMDY the caller swaps x and y.
fn amd_model(c: &[f64; 20], x: f64, y: f64) -> (f64, f64, f64) {
    let (x2, y2) = (x * x, y * y);
    let r2 = x2 + y2;
    let f = c[0] * x
        + c[1] * y
        + c[2]
        + c[3] * x2
        + c[4] * x * y
        + c[5] * y2
        + c[6] * r2
        + c[7] * x2 * x
        + c[8] * x2 * y
        + c[9] * x * y2
        + c[10] * y2 * y
        + c[11] * x * r2
        + c[12] * x * r2 * r2;
    let fx = c[0]
        + c[3] * 2.0 * x
        + c[4] * y
        + c[6] * 2.0 * x
        + c[7] * 3.0 * x2
        + c[8] * 2.0 * x * y
        + c[9] * y2
        + c[11] * (3.0 * x2 + y2)
        + c[12] * (5.0 * x2 * x2 + 6.0 * x2 * y2 + y2 * y2);
    let fy = c[1]
        + c[4] * x
        + c[5] * 2.0 * y
        + c[6] * 2.0 * y
        + c[8] * x2
        + c[9] * x * 2.0 * y
        + c[10] * 3.0 * y2
        + c[11] * 2.0 * x * y
        + c[12] * 4.0 * x * y * r2;
    (f, fx, fy)
}

/// FITS pixel → (RA, Dec) in degrees.
pub(super) fn pixel_to_sky(
    plate: &PlateSolution,
    crpix: [f64; 2],
    x: f64,
    y: f64,
) -> Result<(f64, f64)> {
    let fsamp = x - crpix[0];
    let fline = y - crpix[1];
    let xmm = (plate.ppo[2] - fsamp * plate.pixel_size[0]) / 1000.0;
    let ymm = (fline * plate.pixel_size[1] - plate.ppo[5]) / 1000.0;

    let (xi, _, _) = amd_model(&plate.amdx, xmm, ymm);
    let (eta, _, _) = amd_model(&plate.amdy, ymm, xmm);
    let (xir, etar) = (xi / ARCSEC_PER_RADIAN, eta / ARCSEC_PER_RADIAN);

    let (ra0, dec0) = (plate.plate_ra(), plate.plate_dec());
    let ctan = dec0.tan();
    let ccos = dec0.cos();
    let denom = 1.0 - etar * ctan;
    let raoff = (xir / ccos).atan2(denom);
    let dec = (raoff.cos() * ((etar + ctan) / denom)).atan();
    if !dec.is_finite() {
        return Err(Error::projection("outside plate solution", x, y));
    }
    let ra = (raoff + ra0).rem_euclid(2.0 * std::f64::consts::PI);
    Ok((ra.to_degrees(), dec.to_degrees()))
}

/// (RA, Dec) in degrees → FITS pixel.
pub(super) fn sky_to_pixel(
    plate: &PlateSolution,
    crpix: [f64; 2],
    ra: f64,
    dec: f64,
) -> Result<(f64, f64)> {
    let (ra0, dec0) = (plate.plate_ra(), plate.plate_dec());
    let center = WorldPt::new(
        ra0.to_degrees(),
        dec0.to_degrees(),
        CoordSys::EquatorialJ2000,
    );
    if angular_distance(WorldPt::new(ra, dec, CoordSys::EquatorialJ2000), center) > 90.0 {
        return Err(Error::projection("coordinates not on plate", ra, dec));
    }

    let (ra, dec) = (ra.to_radians(), dec.to_radians());
    let (xi, eta) = standard_coords(ra0, dec0, ra, dec);

    let mut ox = xi / plate.plate_scale;
    let mut oy = eta / plate.plate_scale;
    for _ in 0..MAX_ITERATIONS {
        let (f, fx, fy) = amd_model(&plate.amdx, ox, oy);
        let (g, gy, gx) = amd_model(&plate.amdy, oy, ox);
        let (f, g) = (f - xi, g - eta);
        let det = fx * gy - fy * gx;
        if det == 0.0 {
            return Err(Error::projection("plate model not invertible", ra, dec));
        }
        let dx = (-f * gy + g * fy) / det;
        let dy = (-g * fx + f * gx) / det;
        ox += dx;
        oy += dy;
        if dx.abs() < TOLERANCE && dy.abs() < TOLERANCE {
            break;
        }
    }

    let xout = (plate.ppo[2] - ox * 1000.0) / plate.pixel_size[0];
    let yout = (plate.ppo[5] + oy * 1000.0) / plate.pixel_size[1];
    Ok((xout + crpix[0], yout + crpix[1]))
}

/// Standard coordinates of (ra, dec) about the plate center, in arcseconds.
fn standard_coords(ra0: f64, dec0: f64, ra: f64, dec: f64) -> (f64, f64) {
    let div = dec.sin() * dec0.sin() + dec.cos() * dec0.cos() * (ra - ra0).cos();
    let xi = dec.cos() * (ra - ra0).sin() * ARCSEC_PER_RADIAN / div;
    let eta = (dec.sin() * dec0.cos() - dec.cos() * dec0.sin() * (ra - ra0).cos())
        * ARCSEC_PER_RADIAN
        / div;
    (xi, eta)
}
