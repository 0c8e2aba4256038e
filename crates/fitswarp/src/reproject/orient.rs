//! Common reprojections: north up, arbitrary rotation, matching another
//! image's grid, and left-right mirroring.

use crate::coords::{self, convert, CoordSys, ImagePt};
use crate::error::{Error, Result};
use crate::header::{ImageHeader, SipPolynomial};
use crate::projection::Projection;
use crate::raster::AnyRaster;

use super::{bounding_box, reproject, ReprojectOptions, ReprojectTarget, Reprojected, ScaleAnchor};

/// North up, east left, in equatorial J2000.
pub fn north_up(
    raster: &AnyRaster,
    header: &ImageHeader,
    opts: &ReprojectOptions,
) -> Result<Reprojected> {
    position_angle(raster, header, 0.0, CoordSys::EquatorialJ2000, opts)
}

/// Galactic north up.
pub fn north_up_galactic(
    raster: &AnyRaster,
    header: &ImageHeader,
    opts: &ReprojectOptions,
) -> Result<Reprojected> {
    position_angle(raster, header, 0.0, CoordSys::Galactic, opts)
}

/// Turn the grid `angle` degrees further from its current orientation,
/// measured in equatorial J2000 at the image center.
pub fn rotate(
    raster: &AnyRaster,
    header: &ImageHeader,
    angle: f64,
    opts: &ReprojectOptions,
) -> Result<Reprojected> {
    let proj = Projection::new(header)?;
    let c = header.center();
    let here = convert(proj.image_to_world(c)?, CoordSys::EquatorialJ2000);
    let above = proj.image_to_world(ImagePt::new(c.x, c.y + 1.0))?;
    let current = coords::position_angle(here, above);
    tracing::debug!(current, angle, "rotating image");
    position_angle(raster, header, -current + angle, CoordSys::EquatorialJ2000, opts)
}

/// Tangent-plane grid with CROTA2 = `pa` in `sys`, tangent at pixel
/// (NAXIS1/2, NAXIS2/2) of the input and sized to hold the whole input.
pub fn position_angle(
    raster: &AnyRaster,
    header: &ImageHeader,
    pa: f64,
    sys: CoordSys,
    opts: &ReprojectOptions,
) -> Result<Reprojected> {
    let in_proj = Projection::new(header)?;
    let anchor = ImagePt::new((header.naxis1 / 2) as f64, (header.naxis2 / 2) as f64);
    let center = convert(in_proj.image_to_world(anchor)?, sys);
    let (ctype1, ctype2) = sys.tan_ctypes();
    let target = header
        .with_ctype(ctype1, ctype2)
        .with_crval(center.lon, center.lat)
        .with_cdelt(-header.cdelt1.abs(), header.cdelt2.abs())
        .with_rotation(pa)
        .with_crpix(anchor.x, anchor.y)
        .with_equinox(sys.equinox(), None);
    let sized = bounding_box(header, &in_proj, target, opts.max_size_factor)?;
    reproject(raster, header, &ReprojectTarget::Reference(sized), opts)
}

/// Reproject onto the grid of `reference`.
///
/// With `scale` set, an input much coarser than the reference (more than
/// twice the pixel size) keeps a pixel size that is a whole multiple of the
/// reference's, with its CRPIX snapped so both grids stay aligned. The
/// multiple is returned in [`Reprojected::scale_factor`].
pub fn match_reference(
    raster: &AnyRaster,
    header: &ImageHeader,
    reference: &ImageHeader,
    scale: bool,
    opts: &ReprojectOptions,
) -> Result<Reprojected> {
    let (in_scale, ref_scale) = (header.cdelt1.abs(), reference.cdelt1.abs());
    if !scale || ref_scale == 0.0 || 2.0 * ref_scale >= in_scale {
        return reproject(
            raster,
            header,
            &ReprojectTarget::Reference(reference.clone()),
            opts,
        );
    }

    let factor = (in_scale / ref_scale).floor() as usize;
    let sf = factor as f64;
    let target = match reference.cd {
        Some(cd) => reference.with_cd(cd.scaled(sf)),
        None => reference.with_cdelt(reference.cdelt1 * sf, reference.cdelt2 * sf),
    };
    tracing::debug!(factor, "matching reference at a coarser scale");
    let in_proj = Projection::new(header)?;
    let sized = bounding_box(header, &in_proj, target, opts.max_size_factor)?;
    let opts = ReprojectOptions {
        scale_anchor: Some(ScaleAnchor {
            crpix1: reference.crpix1,
            crpix2: reference.crpix2,
            factor,
        }),
        ..opts.clone()
    };
    let mut out = reproject(raster, header, &ReprojectTarget::Reference(sized), &opts)?;
    out.scale_factor = Some(factor);
    Ok(out)
}

// A'(u, v) = -A(-u, v), B'(u, v) = B(-u, v).
fn mirror_sip(poly: &SipPolynomial, negate: bool) -> SipPolynomial {
    let mut out = poly.clone();
    for i in 0..=poly.order {
        for j in 0..=(poly.order - i) {
            let odd = i % 2 == 1;
            if odd != negate {
                out.coeffs[i][j] = -out.coeffs[i][j];
            }
        }
    }
    out
}

/// Mirror the columns. Sky positions of the pixels are kept: CRPIX1 and
/// the sign of the first axis scale follow the flip.
pub fn flip_lr(raster: &AnyRaster, header: &ImageHeader) -> Result<(AnyRaster, ImageHeader)> {
    if header.plate.is_some() {
        return Err(Error::UnsupportedProjection(
            "plate solution cannot be mirrored".into(),
        ));
    }
    let crpix1 = header.naxis1 as f64 - header.crpix1 + 1.0;
    let mut flipped = match header.cd {
        Some(cd) => {
            let mut m = cd;
            m.cd1_1 = -m.cd1_1;
            m.cd2_1 = -m.cd2_1;
            header.with_cd(m)
        }
        None => header.with_cdelt(-header.cdelt1, header.cdelt2),
    }
    .with_crpix(crpix1, header.crpix2);
    if let Some(sip) = flipped.sip.as_mut() {
        sip.a = mirror_sip(&sip.a, true);
        sip.b = mirror_sip(&sip.b, false);
        sip.ap = sip.ap.as_ref().map(|p| mirror_sip(p, true));
        sip.bp = sip.bp.as_ref().map(|p| mirror_sip(p, false));
    }
    Ok((raster.flipped_lr(), flipped))
}
