//! SIP distortion on pixel offsets from CRPIX.

use crate::header::SipCoefficients;

const MAX_ITERATIONS: usize = 20;
const TOLERANCE: f64 = 1e-10;

/// Undistorted offset → distorted offset (the A/B forward polynomials).
pub(super) fn distort(sip: &SipCoefficients, u: f64, v: f64) -> (f64, f64) {
    (u + sip.a.eval(u, v), v + sip.b.eval(u, v))
}

/// Inverse of [`distort`].
///
/// AP/BP, when present, give the starting point. A fixed-point iteration on
/// the forward polynomials then refines it so that the inverse agrees with
/// the forward transform to well below a pixel.
pub(super) fn undistort(sip: &SipCoefficients, up: f64, vp: f64) -> (f64, f64) {
    let (mut u, mut v) = match (&sip.ap, &sip.bp) {
        (Some(ap), Some(bp)) => (up + ap.eval(up, vp), vp + bp.eval(up, vp)),
        _ => (up, vp),
    };
    for _ in 0..MAX_ITERATIONS {
        let nu = up - sip.a.eval(u, v);
        let nv = vp - sip.b.eval(u, v);
        let done = (nu - u).abs() < TOLERANCE && (nv - v).abs() < TOLERANCE;
        u = nu;
        v = nv;
        if done {
            break;
        }
    }
    (u, v)
}
