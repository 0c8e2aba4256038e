//! Pixel ↔ sky mapping built from an [`ImageHeader`].
//!
//! Pixels go through three steps: the optional SIP correction on the offset
//! from CRPIX, the linear CD (or CDELT/CROTA2) matrix to intermediate world
//! coordinates in degrees, and the spherical projection proper. Zenithal
//! projections put the native pole at CRVAL; cylindrical ones put the native
//! origin there and use the default LONPOLE.

mod plate;
mod sip;

use crate::coords::{self, CoordSys, ImagePt, Point, ScreenPt, ScreenTransform, WorldPt};
use crate::error::{Error, Result};
use crate::header::{CdMatrix, ImageHeader, PlateSolution, ProjectionKind, SipCoefficients};

/// Degrees per radian.
const R0: f64 = 180.0 / std::f64::consts::PI;

/// Rotation between native spherical coordinates and celestial ones.
#[derive(Debug, Clone, Copy)]
struct SkyRotation {
    alpha_p: f64,
    delta_p: f64,
    phi_p: f64,
}

impl SkyRotation {
    /// Rotation for a projection whose native reference point is at
    /// latitude `theta0` (90° for zenithal, 0° for cylindrical).
    fn new(crval1: f64, crval2: f64, zenithal: bool) -> Self {
        let (alpha0, delta0) = (crval1.to_radians(), crval2.to_radians());
        let pi = std::f64::consts::PI;
        if zenithal {
            SkyRotation {
                alpha_p: alpha0,
                delta_p: delta0,
                phi_p: pi,
            }
        } else if delta0 >= 0.0 {
            SkyRotation {
                alpha_p: alpha0 - pi,
                delta_p: pi / 2.0 - delta0,
                phi_p: 0.0,
            }
        } else {
            SkyRotation {
                alpha_p: alpha0,
                delta_p: pi / 2.0 + delta0,
                phi_p: pi,
            }
        }
    }

    /// Native (phi, theta) → celestial (lon, lat), all in degrees.
    fn to_celestial(&self, phi: f64, theta: f64) -> (f64, f64) {
        let (phi, theta) = (phi.to_radians(), theta.to_radians());
        let (sin_t, cos_t) = theta.sin_cos();
        let (sin_dp, cos_dp) = self.delta_p.sin_cos();
        let dphi = phi - self.phi_p;
        let y = -cos_t * dphi.sin();
        let x = sin_t * cos_dp - cos_t * sin_dp * dphi.cos();
        let lon = self.alpha_p + y.atan2(x);
        let lat = (sin_t * sin_dp + cos_t * cos_dp * dphi.cos())
            .clamp(-1.0, 1.0)
            .asin();
        (lon.to_degrees().rem_euclid(360.0), lat.to_degrees())
    }

    /// Celestial (lon, lat) → native (phi, theta), all in degrees.
    fn to_native(&self, lon: f64, lat: f64) -> (f64, f64) {
        let (lon, lat) = (lon.to_radians(), lat.to_radians());
        let (sin_d, cos_d) = lat.sin_cos();
        let (sin_dp, cos_dp) = self.delta_p.sin_cos();
        let dlon = lon - self.alpha_p;
        let y = -cos_d * dlon.sin();
        let x = sin_d * cos_dp - cos_d * sin_dp * dlon.cos();
        let phi = (self.phi_p + y.atan2(x)).to_degrees();
        let theta = (sin_d * sin_dp + cos_d * cos_dp * dlon.cos())
            .clamp(-1.0, 1.0)
            .asin();
        (wrap_180(phi), theta.to_degrees())
    }
}

fn wrap_180(deg: f64) -> f64 {
    let w = (deg + 180.0).rem_euclid(360.0) - 180.0;
    if w == -180.0 {
        180.0
    } else {
        w
    }
}

/// Forward and inverse sky projection of one image.
///
/// Built fresh from a header and stateless afterwards.
#[derive(Debug, Clone)]
pub struct Projection {
    kind: ProjectionKind,
    sys: CoordSys,
    crpix: [f64; 2],
    crval: [f64; 2],
    matrix: CdMatrix,
    inverse: [[f64; 2]; 2],
    rotation: Option<SkyRotation>,
    sip: Option<SipCoefficients>,
    plate: Option<PlateSolution>,
}

impl Projection {
    pub fn new(header: &ImageHeader) -> Result<Self> {
        let kind = header.kind;
        if matches!(
            kind,
            ProjectionKind::Unrecognized | ProjectionKind::Unspecified
        ) {
            return Err(Error::UnsupportedProjection(header.ctype1.trim().to_string()));
        }
        let sys = header.coord_sys();
        let crpix = [header.crpix1, header.crpix2];

        if kind == ProjectionKind::Plate {
            let plate = header
                .plate
                .clone()
                .ok_or(Error::MissingKeyword("PLTRAH"))?;
            if plate.plate_scale == 0.0 {
                return Err(Error::InvalidValue("PLTSCALE"));
            }
            if plate.pixel_size[0] == 0.0 || plate.pixel_size[1] == 0.0 {
                return Err(Error::InvalidValue("XPIXELSZ"));
            }
            return Ok(Projection {
                kind,
                sys,
                crpix,
                crval: [plate.plate_ra().to_degrees(), plate.plate_dec().to_degrees()],
                matrix: CdMatrix::new(1.0, 0.0, 0.0, 1.0),
                inverse: [[1.0, 0.0], [0.0, 1.0]],
                rotation: None,
                sip: None,
                plate: Some(plate),
            });
        }

        for (value, key) in [
            (header.crpix1, "CRPIX1"),
            (header.crpix2, "CRPIX2"),
            (header.crval1, "CRVAL1"),
            (header.crval2, "CRVAL2"),
        ] {
            if value.is_nan() {
                return Err(Error::MissingKeyword(key));
            }
        }

        let matrix = header
            .cd
            .unwrap_or_else(|| CdMatrix::from_cdelt(header.cdelt1, header.cdelt2, header.crota2));
        let det = matrix.determinant();
        if det == 0.0 || !det.is_finite() {
            return Err(Error::invalid_header(
                "neither a usable CDELT pair nor a CD matrix is present",
            ));
        }
        let inverse = [
            [matrix.cd2_2 / det, -matrix.cd1_2 / det],
            [-matrix.cd2_1 / det, matrix.cd1_1 / det],
        ];

        let rotation = match kind {
            ProjectionKind::Gnomonic
            | ProjectionKind::Orthographic
            | ProjectionKind::ZenithalEquidistant => {
                Some(SkyRotation::new(header.crval1, header.crval2, true))
            }
            ProjectionKind::Aitoff
            | ProjectionKind::Cartesian
            | ProjectionKind::CylindricalEqualArea
            | ProjectionKind::SansonFlamsteed => {
                Some(SkyRotation::new(header.crval1, header.crval2, false))
            }
            _ => None,
        };

        Ok(Projection {
            kind,
            sys,
            crpix,
            crval: [header.crval1, header.crval2],
            matrix,
            inverse,
            rotation,
            sip: header.sip.clone(),
            plate: None,
        })
    }

    pub fn kind(&self) -> ProjectionKind {
        self.kind
    }

    /// Coordinate system of the world points this projection produces.
    pub fn coord_sys(&self) -> CoordSys {
        self.sys
    }

    /// Sky position of a FITS pixel, in this projection's native system.
    pub fn image_to_world(&self, pt: ImagePt) -> Result<WorldPt> {
        if let Some(plate) = &self.plate {
            let (lon, lat) = plate::pixel_to_sky(plate, self.crpix, pt.x, pt.y)?;
            return Ok(WorldPt::new(lon, lat, self.sys));
        }

        let mut u = pt.x - self.crpix[0];
        let mut v = pt.y - self.crpix[1];
        if let Some(sip) = &self.sip {
            (u, v) = sip::distort(sip, u, v);
        }
        let m = &self.matrix;
        let xi = m.cd1_1 * u + m.cd1_2 * v;
        let eta = m.cd2_1 * u + m.cd2_2 * v;

        let (lon, lat) = match self.kind {
            ProjectionKind::Linear => (self.crval[0] + xi, self.crval[1] + eta),
            ProjectionKind::Ncp => self.ncp_to_sky(xi, eta).ok_or_else(|| {
                Error::projection("outside NCP projection domain", pt.x, pt.y)
            })?,
            kind => {
                let (phi, theta) = deproject(kind, xi, eta)
                    .ok_or_else(|| Error::projection("outside projection domain", pt.x, pt.y))?;
                match &self.rotation {
                    Some(r) => r.to_celestial(phi, theta),
                    None => return Err(Error::UnsupportedProjection(format!("{kind:?}"))),
                }
            }
        };
        Ok(WorldPt::new(lon, lat, self.sys))
    }

    /// FITS pixel of a sky position. A point in another system is converted
    /// first.
    pub fn world_to_image(&self, pt: WorldPt) -> Result<ImagePt> {
        let pt = coords::convert(pt, self.sys);
        if let Some(plate) = &self.plate {
            let (x, y) = plate::sky_to_pixel(plate, self.crpix, pt.lon, pt.lat)?;
            return Ok(ImagePt::new(x, y));
        }

        let (xi, eta) = match self.kind {
            ProjectionKind::Linear => (pt.lon - self.crval[0], pt.lat - self.crval[1]),
            ProjectionKind::Ncp => self.sky_to_ncp(pt.lon, pt.lat).ok_or_else(|| {
                Error::projection("outside NCP projection domain", pt.lon, pt.lat)
            })?,
            kind => {
                let rotation = self
                    .rotation
                    .as_ref()
                    .ok_or_else(|| Error::UnsupportedProjection(format!("{kind:?}")))?;
                let (phi, theta) = rotation.to_native(pt.lon, pt.lat);
                project(kind, phi, theta).ok_or_else(|| {
                    Error::projection("point has no solution in projection", pt.lon, pt.lat)
                })?
            }
        };

        let inv = &self.inverse;
        let mut u = inv[0][0] * xi + inv[0][1] * eta;
        let mut v = inv[1][0] * xi + inv[1][1] * eta;
        if let Some(sip) = &self.sip {
            (u, v) = sip::undistort(sip, u, v);
        }
        Ok(ImagePt::new(u + self.crpix[0], v + self.crpix[1]))
    }

    // North celestial pole projection, AIPS convention.
    fn ncp_to_sky(&self, xi: f64, eta: f64) -> Option<(f64, f64)> {
        let (l, m) = (xi.to_radians(), eta.to_radians());
        let (ra0, dec0) = (self.crval[0].to_radians(), self.crval[1].to_radians());
        let (sin0, cos0) = dec0.sin_cos();
        let dect = cos0 - m * sin0;
        if dect == 0.0 {
            return None;
        }
        let ra = ra0 + l.atan2(dect);
        let dt = (ra - ra0).cos();
        if dt == 0.0 {
            return None;
        }
        let mut dec = (dect / dt).clamp(-1.0, 1.0).acos();
        if dec0 < 0.0 {
            dec = -dec;
        }
        Some((ra.to_degrees().rem_euclid(360.0), dec.to_degrees()))
    }

    fn sky_to_ncp(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        let (ra0, dec0) = (self.crval[0].to_radians(), self.crval[1].to_radians());
        let (sin0, cos0) = dec0.sin_cos();
        if sin0 == 0.0 {
            return None;
        }
        let (sin_d, cos_d) = lat.to_radians().sin_cos();
        let dra = lon.to_radians() - ra0;
        if sin_d * sin0 + cos_d * cos0 * dra.cos() < 0.0 {
            return None;
        }
        let l = cos_d * dra.sin();
        let m = (cos0 - cos_d * dra.cos()) / sin0;
        Some((l.to_degrees(), m.to_degrees()))
    }
}

/// Intermediate world coordinates (degrees) → native spherical (degrees).
fn deproject(kind: ProjectionKind, x: f64, y: f64) -> Option<(f64, f64)> {
    let r = x.hypot(y);
    let zenithal_phi = || if r == 0.0 { 0.0 } else { x.atan2(-y).to_degrees() };
    match kind {
        ProjectionKind::Gnomonic => Some((zenithal_phi(), R0.atan2(r).to_degrees())),
        ProjectionKind::Orthographic => {
            let c = r / R0;
            if c > 1.0 {
                return None;
            }
            Some((zenithal_phi(), c.acos().to_degrees()))
        }
        ProjectionKind::ZenithalEquidistant => {
            if r > 180.0 {
                return None;
            }
            Some((zenithal_phi(), 90.0 - r))
        }
        ProjectionKind::Aitoff => {
            let (xr, yr) = (x.to_radians(), y.to_radians());
            let z2 = 1.0 - (xr / 4.0).powi(2) - (yr / 2.0).powi(2);
            if z2 < 0.5 {
                return None;
            }
            let z = z2.sqrt();
            let phi = 2.0 * (z * xr / 2.0).atan2(2.0 * z2 - 1.0);
            let theta = (yr * z).clamp(-1.0, 1.0).asin();
            Some((phi.to_degrees(), theta.to_degrees()))
        }
        ProjectionKind::Cartesian => {
            if y.abs() > 90.0 {
                return None;
            }
            Some((x, y))
        }
        ProjectionKind::CylindricalEqualArea => {
            let s = y.to_radians();
            if s.abs() > 1.0 {
                return None;
            }
            Some((x, s.asin().to_degrees()))
        }
        ProjectionKind::SansonFlamsteed => {
            if y.abs() > 90.0 {
                return None;
            }
            let c = y.to_radians().cos();
            let phi = if c == 0.0 { 0.0 } else { x / c };
            if phi.abs() > 180.0 {
                return None;
            }
            Some((phi, y))
        }
        _ => None,
    }
}

/// Native spherical (degrees) → intermediate world coordinates (degrees).
fn project(kind: ProjectionKind, phi: f64, theta: f64) -> Option<(f64, f64)> {
    let (sin_p, cos_p) = phi.to_radians().sin_cos();
    let (sin_t, cos_t) = theta.to_radians().sin_cos();
    match kind {
        ProjectionKind::Gnomonic => {
            if sin_t <= 1e-12 {
                return None;
            }
            let r = R0 * cos_t / sin_t;
            Some((r * sin_p, -r * cos_p))
        }
        ProjectionKind::Orthographic => {
            if theta < 0.0 {
                return None;
            }
            let r = R0 * cos_t;
            Some((r * sin_p, -r * cos_p))
        }
        ProjectionKind::ZenithalEquidistant => {
            let r = 90.0 - theta;
            Some((r * sin_p, -r * cos_p))
        }
        ProjectionKind::Aitoff => {
            let half = (phi / 2.0).to_radians();
            let gamma = R0 * (2.0 / (1.0 + cos_t * half.cos())).sqrt();
            Some((2.0 * gamma * cos_t * half.sin(), gamma * sin_t))
        }
        ProjectionKind::Cartesian => Some((phi, theta)),
        ProjectionKind::CylindricalEqualArea => Some((phi, R0 * sin_t)),
        ProjectionKind::SansonFlamsteed => Some((phi * cos_t, theta)),
        _ => None,
    }
}

// ---- Point conversions ----

/// Image position of any point. Screen points need `screen`.
pub fn to_image(point: Point, proj: &Projection, screen: &ScreenTransform) -> Result<ImagePt> {
    match point {
        Point::Image(pt) => Ok(pt),
        Point::Screen(pt) => Ok(screen.to_image(pt)),
        Point::World(pt) => proj.world_to_image(pt),
    }
}

/// Sky position of any point in the `sys` frame.
pub fn to_world(
    point: Point,
    proj: &Projection,
    screen: &ScreenTransform,
    sys: CoordSys,
) -> Result<WorldPt> {
    let world = match point {
        Point::World(pt) => pt,
        other => proj.image_to_world(to_image(other, proj, screen)?)?,
    };
    Ok(coords::convert(world, sys))
}

/// Screen position of any point.
pub fn to_screen(point: Point, proj: &Projection, screen: &ScreenTransform) -> Result<ScreenPt> {
    match point {
        Point::Screen(pt) => Ok(pt),
        other => Ok(screen.to_screen(to_image(other, proj, screen)?)),
    }
}
