//! Cut rectangular regions out of images and FITS files.
//!
//! Boxes are zero-based and inclusive on both corners. They are clamped to
//! the image, so only a box lying entirely outside it is an error. The
//! header's reference pixel moves with the box and sky positions stay put.

use crate::card::Card;
use crate::coords::WorldPt;
use crate::error::{Error, Result};
use crate::fits::{self, parse_fits};
use crate::header::ImageHeader;
use crate::projection::Projection;
use crate::raster::AnyRaster;
use crate::tile::TileSource;

/// Zero-based, inclusive pixel box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub min_x: i64,
    pub min_y: i64,
    pub max_x: i64,
    pub max_y: i64,
}

impl PixelBox {
    pub fn new(min_x: i64, min_y: i64, max_x: i64, max_y: i64) -> Self {
        PixelBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Box with ordered corners, clamped to a `width`×`height` image.
    pub fn clamp_to(&self, width: usize, height: usize) -> Result<PixelBox> {
        let (x0, x1) = (self.min_x.min(self.max_x), self.min_x.max(self.max_x));
        let (y0, y1) = (self.min_y.min(self.max_y), self.min_y.max(self.max_y));
        let (w, h) = (width as i64, height as i64);
        if x1 < 0 || y1 < 0 || x0 >= w || y0 >= h {
            return Err(Error::CropOutOfBounds {
                min_x: x0,
                min_y: y0,
                max_x: x1,
                max_y: y1,
                width,
                height,
            });
        }
        let clamped = PixelBox::new(x0.max(0), y0.max(0), x1.min(w - 1), y1.min(h - 1));
        if clamped != PixelBox::new(x0, y0, x1, y1) {
            tracing::warn!(
                requested = ?(x0, y0, x1, y1),
                clamped = ?(clamped.min_x, clamped.min_y, clamped.max_x, clamped.max_y),
                "crop box clamped to image bounds"
            );
        }
        Ok(clamped)
    }

    pub fn width(&self) -> usize {
        (self.max_x - self.min_x + 1) as usize
    }

    pub fn height(&self) -> usize {
        (self.max_y - self.min_y + 1) as usize
    }
}

/// Pixel box around a sky circle. The radius in pixels is
/// `radius / |CDELT1|`.
pub fn sky_circle_box(header: &ImageHeader, center: WorldPt, radius: f64) -> Result<PixelBox> {
    if header.cdelt1 == 0.0 {
        return Err(Error::MissingKeyword("CDELT1"));
    }
    let pt = Projection::new(header)?.world_to_image(center)?;
    let r = radius / header.cdelt1.abs();
    // FITS pixel → zero-based index
    let (cx, cy) = (pt.x - 1.0, pt.y - 1.0);
    Ok(PixelBox::new(
        (cx - r).round() as i64,
        (cy - r).round() as i64,
        (cx + r).round() as i64,
        (cy + r).round() as i64,
    ))
}

/// Crop an in-memory image. Every plane of a cube is cut with the same box.
pub fn crop(raster: &AnyRaster, header: &ImageHeader, bx: PixelBox) -> Result<(AnyRaster, ImageHeader)> {
    let b = bx.clamp_to(raster.width(), raster.height())?;
    let tile = raster.get_tile(
        [b.min_x as usize, b.min_y as usize, 0],
        [b.width(), b.height(), raster.depth()],
    )?;
    Ok((tile, cropped_header(header, b)))
}

/// Crop around a sky circle.
pub fn crop_sky_circle(
    raster: &AnyRaster,
    header: &ImageHeader,
    center: WorldPt,
    radius: f64,
) -> Result<(AnyRaster, ImageHeader)> {
    let bx = sky_circle_box(header, center, radius)?;
    crop(raster, header, bx)
}

/// Crop straight from a tile source, reading only the clamped box.
pub fn crop_source(
    source: &mut dyn TileSource,
    header: &ImageHeader,
    bx: PixelBox,
) -> Result<(AnyRaster, ImageHeader)> {
    let [width, height, depth] = source.dims();
    let b = bx.clamp_to(width, height)?;
    let tile = source.read_tile(
        [b.min_x as usize, b.min_y as usize, 0],
        [b.width(), b.height(), depth],
    )?;
    tracing::debug!(
        width = b.width(),
        height = b.height(),
        depth,
        "cropped image"
    );
    Ok((tile, cropped_header(header, b)))
}

fn cropped_header(header: &ImageHeader, b: PixelBox) -> ImageHeader {
    header
        .shifted_by(b.min_x as f64, b.min_y as f64)
        .with_dimensions(b.width(), b.height())
}

// Output cards of a cropped HDU: the header's astrometry over the original
// cards.
fn cropped_cards(cards: &[Card], header: &ImageHeader) -> Vec<Card> {
    header.apply_to_cards(cards)
}

/// Crop image HDUs of a FITS file.
///
/// `Some(i)` crops HDU `i` only; `None` crops every image HDU, each clamped
/// to its own bounds. In that mode an image the box misses is copied
/// unchanged, and the call fails only when the box misses every image.
/// Other HDUs are copied byte for byte. Returns the new FITS file.
pub fn crop_fits(bytes: &[u8], extension: Option<usize>, bx: PixelBox) -> Result<Vec<u8>> {
    let file = parse_fits(bytes)?;
    if let Some(i) = extension {
        let hdu = file
            .get(i)
            .ok_or_else(|| Error::invalid_header(format!("no HDU {i}")))?;
        if !hdu.has_image() {
            return Err(Error::invalid_header(format!("HDU {i} holds no image")));
        }
    }

    let mut out = Vec::with_capacity(file.len());
    let mut cropped_any = false;
    let mut first_miss = None;
    for (i, hdu) in file.hdus.iter().enumerate() {
        let selected = extension.map_or(true, |e| e == i);
        if !selected || !hdu.has_image() {
            out.push(hdu.raw_bytes(bytes));
            continue;
        }
        let header = hdu.image_header()?;
        let mut source = fits::hdu_source(bytes, hdu)?;
        match crop_source(&mut source, &header, bx) {
            Ok((tile, cropped)) => {
                let cards = cropped_cards(&hdu.cards, &cropped);
                out.push(fits::write_image_hdu(&cards, &tile, hdu.is_primary()));
                cropped_any = true;
            }
            Err(e @ Error::CropOutOfBounds { .. }) if extension.is_none() => {
                tracing::warn!(hdu = i, "crop box misses this image, copied unchanged");
                out.push(hdu.raw_bytes(bytes));
                first_miss.get_or_insert(e);
            }
            Err(e) => return Err(e),
        }
    }
    if let (false, Some(e)) = (cropped_any, first_miss) {
        return Err(e);
    }
    Ok(fits::write_fits(&out))
}
