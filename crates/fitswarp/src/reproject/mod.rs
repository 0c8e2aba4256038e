//! Resample an image onto another sky grid.
//!
//! The output geometry comes either from a reference header, used as is, or
//! from overrides applied to the input header. Overrides that change the
//! projection size the output to the bounding box of the mapped input;
//! width/height overrides alone only recenter it. Every output pixel is
//! then traced back to the input through the sky, with exact round trips on
//! a grid of tie points and linear interpolation in between.

pub mod orient;
mod resample;

use crate::coords::ImagePt;
use crate::dispatch;
use crate::error::{Error, Result};
use crate::header::{CdMatrix, ImageHeader};
use crate::projection::Projection;
use crate::raster::{AnyRaster, Raster};

/// How output samples are taken from the input.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Resampling {
    /// The input pixel containing the mapped position.
    #[default]
    Nearest,
    /// Weighted average of the four surrounding pixels. Output is blank
    /// when less than `min_weight` of the weight lands on good pixels.
    Bilinear { min_weight: f64 },
}

impl Resampling {
    pub fn bilinear() -> Self {
        Resampling::Bilinear { min_weight: 0.5 }
    }
}

/// Keeps an overlay grid aligned with a base grid `factor` times finer:
/// the output CRPIX is snapped so that it differs from
/// `(base crpix − 0.5) / factor + 0.5` by a whole number of pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleAnchor {
    pub crpix1: f64,
    pub crpix2: f64,
    pub factor: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReprojectOptions {
    pub resampling: Resampling,
    /// Distance in output pixels between exactly mapped tie points.
    pub tie_stride: usize,
    /// Largest allowed output size, as a multiple of the reference size.
    pub max_size_factor: f64,
    pub scale_anchor: Option<ScaleAnchor>,
}

impl Default for ReprojectOptions {
    fn default() -> Self {
        ReprojectOptions {
            resampling: Resampling::default(),
            tie_stride: 10,
            max_size_factor: 30.0,
            scale_anchor: None,
        }
    }
}

/// Changes to apply to the input geometry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub naxis1: Option<usize>,
    pub naxis2: Option<usize>,
    pub crval: Option<(f64, f64)>,
    pub cdelt: Option<(f64, f64)>,
    pub cd: Option<CdMatrix>,
    pub crota2: Option<f64>,
    /// CTYPE2 follows from this.
    pub ctype1: Option<String>,
}

impl Overrides {
    fn changes_projection(&self) -> bool {
        self.crval.is_some()
            || self.cdelt.is_some()
            || self.cd.is_some()
            || self.crota2.is_some()
            || self.ctype1.is_some()
    }
}

/// The grid to reproject onto.
#[derive(Debug, Clone, PartialEq)]
pub enum ReprojectTarget {
    /// Match this header exactly, size included.
    Reference(ImageHeader),
    /// Modify the input header.
    Overrides(Overrides),
}

/// A reprojected plane.
#[derive(Debug, Clone, PartialEq)]
pub struct Reprojected {
    pub raster: Raster<f32>,
    pub header: ImageHeader,
    /// Grid scale factor applied by [`orient::match_reference`].
    pub scale_factor: Option<usize>,
}

/// CTYPE2 to pair with an overridden CTYPE1.
pub fn derived_ctype2(ctype1: &str) -> String {
    let c = ctype1.trim();
    let tail = c.get(4..).unwrap_or("");
    if c.starts_with("RA") {
        format!("DEC{tail}")
    } else if c.starts_with("GLON") {
        format!("GLAT{tail}")
    } else if c.starts_with("ELON") {
        format!("ELAT{tail}")
    } else {
        format!("DEC-{tail}")
    }
}

// ---- Geometry ----

enum Sizing {
    Fixed,
    Recenter,
    BoundingBox,
}

fn apply_overrides(input: &ImageHeader, o: &Overrides) -> Result<(ImageHeader, Sizing)> {
    let mut h = input.clone();
    if let Some(ctype1) = &o.ctype1 {
        let from_plate = h.plate.is_some();
        h = h.with_ctype(ctype1, &derived_ctype2(ctype1));
        if from_plate && o.crval.is_none() {
            let center = Projection::new(input)?
                .image_to_world(ImagePt::new(input.crpix1, input.crpix2))?;
            h = h.with_crval(center.lon, center.lat);
        }
    }
    if let Some((c1, c2)) = o.crval {
        h = h.with_crval(c1, c2);
    }
    if let Some((d1, d2)) = o.cdelt {
        h = h.with_cdelt(d1, d2);
    }
    if let Some(rot) = o.crota2 {
        h = h.with_rotation(rot);
    }
    if let Some(cd) = o.cd {
        h = h.with_cd(cd);
    }

    let sizing = match (o.naxis1, o.naxis2) {
        (None, None) if o.changes_projection() => Sizing::BoundingBox,
        (None, None) => Sizing::Fixed,
        (Some(0), _) => Sizing::BoundingBox,
        (Some(n1), Some(n2)) => {
            h = h.with_dimensions(n1, n2);
            if o.changes_projection() {
                Sizing::BoundingBox
            } else {
                Sizing::Recenter
            }
        }
        _ => return Err(Error::invalid_header("Must alter both NAXIS's")),
    };
    Ok((h, sizing))
}

/// Map an input pixel into the output frame, `None` when either projection
/// has no solution there.
fn map_point(from: &Projection, to: &Projection, pt: ImagePt) -> Option<ImagePt> {
    let world = from.image_to_world(pt).ok()?;
    to.world_to_image(world).ok()
}

/// Size `out` to the mapped 9-point outline of `input`.
///
/// The size guard is relative to the dimensions `out` arrives with, the
/// reference grid. CRPIX moves by the rounded lower corner so the output
/// grid stays on whole pixels of the reference and every mapped point lands
/// in `[0.5, n + 0.5]`.
fn bounding_box(
    input: &ImageHeader,
    in_proj: &Projection,
    out: ImageHeader,
    max_size_factor: f64,
) -> Result<ImageHeader> {
    let out_proj = Projection::new(&out)?;
    let (w, h) = (input.naxis1 as f64, input.naxis2 as f64);
    let xs = [1.0, (w + 1.0) / 2.0, w];
    let ys = [1.0, (h + 1.0) / 2.0, h];

    let mut min = (f64::INFINITY, f64::INFINITY);
    let mut max = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    let mut mapped = 0;
    for &y in &ys {
        for &x in &xs {
            if let Some(p) = map_point(in_proj, &out_proj, ImagePt::new(x, y)) {
                min = (min.0.min(p.x), min.1.min(p.y));
                max = (max.0.max(p.x), max.1.max(p.y));
                mapped += 1;
            }
        }
    }
    let grid = |reference: usize, fallback: usize| {
        (if reference > 0 { reference } else { fallback }) as f64 * max_size_factor
    };
    let limit = (
        grid(out.naxis1, input.naxis1) as i64,
        grid(out.naxis2, input.naxis2) as i64,
    );
    if mapped == 0 {
        return Err(Error::Reprojection {
            reason: "no sample point maps into the output projection",
            width: 0,
            height: 0,
            limit_width: limit.0,
            limit_height: limit.1,
        });
    }
    if mapped < 9 {
        tracing::warn!(mapped, "bounding box computed from a partial set of points");
    }

    let lo = ((min.0 + 0.5).floor(), (min.1 + 0.5).floor());
    let hi = ((max.0 - 0.5).ceil(), (max.1 - 0.5).ceil());
    let width = (hi.0 - lo.0 + 1.0) as i64;
    let height = (hi.1 - lo.1 + 1.0) as i64;
    if width <= 0 || height <= 0 {
        return Err(Error::Reprojection {
            reason: "degenerate output size",
            width,
            height,
            limit_width: limit.0,
            limit_height: limit.1,
        });
    }
    if width > limit.0 || height > limit.1 {
        return Err(Error::Reprojection {
            reason: "output size out of proportion to the input",
            width,
            height,
            limit_width: limit.0,
            limit_height: limit.1,
        });
    }

    let out = out
        .with_dimensions(width as usize, height as usize)
        .with_crpix(out.crpix1 - (lo.0 - 1.0), out.crpix2 - (lo.1 - 1.0));
    tracing::debug!(
        width,
        height,
        crpix1 = out.crpix1,
        crpix2 = out.crpix2,
        "output sized to mapped bounding box"
    );
    Ok(out)
}

fn recenter(input: &ImageHeader, in_proj: &Projection, out: ImageHeader) -> Result<ImageHeader> {
    let out_proj = Projection::new(&out)?;
    let center = input.center();
    let mapped = in_proj
        .image_to_world(center)
        .and_then(|w| out_proj.world_to_image(w))?;
    let target = out.center();
    let crpix1 = out.crpix1 + target.x - mapped.x;
    let crpix2 = out.crpix2 + target.y - mapped.y;
    tracing::debug!(crpix1, crpix2, "output recentered on input center");
    Ok(out.with_crpix(crpix1, crpix2))
}

/// Snapped CRPIX for one axis of an overlay `factor` times coarser than the
/// base grid.
pub fn adjust_crpix(base: f64, overlay: f64, factor: usize) -> f64 {
    let sf = factor.max(1) as f64;
    let anchor = (base - 0.5) / sf;
    let whole = (anchor - (overlay - 0.5)).round();
    anchor - whole + 0.5
}

/// Header of the reprojected image, before any pixel is resampled.
pub fn output_geometry(
    input: &ImageHeader,
    target: &ReprojectTarget,
    opts: &ReprojectOptions,
) -> Result<ImageHeader> {
    let in_proj = Projection::new(input)?;
    let out = match target {
        ReprojectTarget::Reference(reference) => reference.clone(),
        ReprojectTarget::Overrides(o) => {
            let (h, sizing) = apply_overrides(input, o)?;
            match sizing {
                Sizing::Fixed => h,
                Sizing::Recenter => recenter(input, &in_proj, h)?,
                Sizing::BoundingBox => bounding_box(input, &in_proj, h, opts.max_size_factor)?,
            }
        }
    };
    let out = match opts.scale_anchor {
        Some(anchor) => {
            let crpix1 = adjust_crpix(anchor.crpix1, out.crpix1, anchor.factor);
            let crpix2 = adjust_crpix(anchor.crpix2, out.crpix2, anchor.factor);
            tracing::debug!(crpix1, crpix2, factor = anchor.factor, "crpix snapped to base grid");
            out.with_crpix(crpix1, crpix2)
        }
        None => out,
    };

    let equinox = out.equinox;
    let mut out = out.with_float_samples().with_equinox(equinox, None);
    out.naxis = input.naxis.clamp(2, 3);
    out.naxis3 = 1;
    out.plane_number = input.plane_number;
    out.data_offset = 0;
    out.bunit = input.bunit.clone();
    Ok(out)
}

/// Reproject one plane onto `target`.
///
/// The output holds physical values (BSCALE/BZERO applied) as 32-bit floats
/// with NaN for blank. Cubes go through [`reproject_cube`].
pub fn reproject(
    raster: &AnyRaster,
    header: &ImageHeader,
    target: &ReprojectTarget,
    opts: &ReprojectOptions,
) -> Result<Reprojected> {
    if raster.depth() > 1 {
        return Err(Error::UnsupportedNaxis(3));
    }
    if header.naxis < 2 {
        return Err(Error::UnsupportedNaxis(header.naxis));
    }
    if (raster.width(), raster.height()) != (header.naxis1, header.naxis2) {
        return Err(Error::invalid_header(format!(
            "raster is {}x{} but header declares {}x{}",
            raster.width(),
            raster.height(),
            header.naxis1,
            header.naxis2
        )));
    }
    let out = output_geometry(header, target, opts)?;
    let in_proj = Projection::new(header)?;
    let out_proj = Projection::new(&out)?;
    let (width, height) = (out.naxis1, out.naxis2);
    tracing::debug!(
        in_width = header.naxis1,
        in_height = header.naxis2,
        width,
        height,
        resampling = ?opts.resampling,
        "reprojecting plane"
    );

    let map = |x: f64, y: f64| {
        map_point(&out_proj, &in_proj, ImagePt::new(x, y)).map(|p| (p.x, p.y))
    };
    let data = dispatch!(raster, r => resample::resample(
        r,
        header.bscale,
        header.bzero,
        width,
        height,
        opts.tie_stride,
        opts.resampling,
        map,
    ));
    Ok(Reprojected {
        raster: Raster::from_plane(width, height, data, None)?,
        header: out,
        scale_factor: None,
    })
}

/// Reproject every plane of a cube onto the same target.
pub fn reproject_cube(
    raster: &AnyRaster,
    header: &ImageHeader,
    target: &ReprojectTarget,
    opts: &ReprojectOptions,
) -> Result<Vec<Reprojected>> {
    raster
        .planes()
        .iter()
        .enumerate()
        .map(|(z, plane)| reproject(plane, &header.with_plane(z), target, opts))
        .collect()
}
