//! Cropping FITS files held in memory and on disk.

use std::fs::File;
use std::io::Write;

use approx::assert_abs_diff_eq;
use fitswarp::card::{self, Card, Value};
use fitswarp::crop::sky_circle_box;
use fitswarp::fits::{hdu_reader, write_fits, write_image_hdu};
use fitswarp::tile::TileSource;
use fitswarp::{
    crop, crop_fits, crop_source, parse_fits, read_raster, AnyRaster, CoordSys, ErrorKind,
    ImageHeader, ImagePt, PixelBox, Projection, Raster, WorldPt,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn tan_cards(crpix: (f64, f64)) -> Vec<Card> {
    vec![
        Card::new("OBJECT", Value::String("M 42".into())),
        Card::new("CTYPE1", Value::String("RA---TAN".into())),
        Card::new("CTYPE2", Value::String("DEC--TAN".into())),
        Card::new("CRPIX1", Value::Float(crpix.0)),
        Card::new("CRPIX2", Value::Float(crpix.1)),
        Card::new("CRVAL1", Value::Float(83.82)),
        Card::new("CRVAL2", Value::Float(-5.39)),
        Card::new("CDELT1", Value::Float(-0.002)),
        Card::new("CDELT2", Value::Float(0.002)),
    ]
}

fn raster_4x4() -> AnyRaster {
    let data: Vec<i16> = (1..=16).collect();
    Raster::from_plane(4, 4, data, None).unwrap().into()
}

fn pattern(w: usize, h: usize) -> AnyRaster {
    let data: Vec<i32> = (0..w * h).map(|i| (i * 7 % 1000) as i32 - 300).collect();
    Raster::from_plane(w, h, data, Some(-300)).unwrap().into()
}

fn cube(w: usize, h: usize, d: usize) -> AnyRaster {
    let data: Vec<f32> = (0..w * h * d).map(|i| i as f32 * 0.5).collect();
    Raster::new(w, h, d, data, None).unwrap().into()
}

fn header_of(bytes: &[u8], index: usize) -> ImageHeader {
    parse_fits(bytes).unwrap().hdus[index].image_header().unwrap()
}

// ---------------------------------------------------------------------------
// Scenario and invariant
// ---------------------------------------------------------------------------

#[test]
fn crop_4x4_to_center_2x2() {
    let bytes = write_image_hdu(&tan_cards((2.0, 3.0)), &raster_4x4(), true);
    let out = crop_fits(&bytes, Some(0), PixelBox::new(1, 1, 2, 2)).unwrap();

    let file = parse_fits(&out).unwrap();
    let hdu = &file.hdus[0];
    let r = read_raster(&out, hdu).unwrap();
    assert_eq!((r.width(), r.height()), (2, 2));
    let values: Vec<f64> = (0..4).map(|i| r.value(i % 2, i / 2, 0).unwrap()).collect();
    assert_eq!(values, [6.0, 7.0, 10.0, 11.0]);

    assert_abs_diff_eq!(card::find_float(&hdu.cards, "CRPIX1").unwrap(), 1.0);
    assert_abs_diff_eq!(card::find_float(&hdu.cards, "CRPIX2").unwrap(), 2.0);
    assert_eq!(card::find_string(&hdu.cards, "OBJECT"), Some("M 42"));
}

#[test]
fn cropped_pixels_match_the_original() {
    let src = pattern(23, 17);
    let bytes = write_image_hdu(&tan_cards((12.0, 9.0)), &src, true);
    let header = header_of(&bytes, 0);
    let bx = PixelBox::new(4, 3, 15, 11);
    let (tile, th) = crop(&src, &header, bx).unwrap();

    for y in 0..tile.height() {
        for x in 0..tile.width() {
            assert_eq!(tile.value(x, y, 0), src.value(x + 4, y + 3, 0));
        }
    }

    // same sky under shifted pixels
    let a = Projection::new(&header).unwrap();
    let b = Projection::new(&th).unwrap();
    let w1 = a.image_to_world(ImagePt::new(9.0, 7.0)).unwrap();
    let w2 = b.image_to_world(ImagePt::new(5.0, 4.0)).unwrap();
    assert_abs_diff_eq!(w1.lon, w2.lon, epsilon = 1e-12);
    assert_abs_diff_eq!(w1.lat, w2.lat, epsilon = 1e-12);
}

// ---------------------------------------------------------------------------
// Multi-extension
// ---------------------------------------------------------------------------

#[test]
fn every_image_extension_is_cropped_to_its_own_bounds() {
    let primary = write_image_hdu(&tan_cards((10.0, 10.0)), &pattern(20, 20), true);
    let small = write_image_hdu(
        &[Card::new("EXTNAME", Value::String("SMALL".into()))],
        &raster_4x4(),
        false,
    );
    let stack = write_image_hdu(&tan_cards((5.0, 5.0)), &cube(10, 8, 3), false);
    let bytes = write_fits(&[primary, small, stack]);

    let out = crop_fits(&bytes, None, PixelBox::new(2, 2, 7, 6)).unwrap();
    let file = parse_fits(&out).unwrap();
    assert_eq!(file.len(), 3);
    assert_eq!(file.hdus[0].image_dims().unwrap(), [6, 5, 1]);
    assert_eq!(file.hdus[1].image_dims().unwrap(), [2, 2, 1]);
    assert_eq!(file.hdus[2].image_dims().unwrap(), [6, 5, 3]);
    assert_eq!(card::find_string(&file.hdus[1].cards, "EXTNAME"), Some("SMALL"));

    let r = read_raster(&out, &file.hdus[2]).unwrap();
    let src = cube(10, 8, 3);
    assert_eq!(r.value(0, 0, 2), src.value(2, 2, 2));
    assert_abs_diff_eq!(card::find_float(&file.hdus[2].cards, "CRPIX1").unwrap(), 3.0);
}

#[test]
fn one_extension_cropped_others_untouched() {
    let primary = write_image_hdu(&tan_cards((10.0, 10.0)), &pattern(20, 20), true);
    let ext = write_image_hdu(&tan_cards((2.0, 2.0)), &raster_4x4(), false);
    let bytes = write_fits(&[primary.clone(), ext]);

    let out = crop_fits(&bytes, Some(1), PixelBox::new(0, 0, 1, 1)).unwrap();
    let file = parse_fits(&out).unwrap();
    assert_eq!(file.hdus[0].raw_bytes(&out), primary);
    assert_eq!(file.hdus[1].image_dims().unwrap(), [2, 2, 1]);
    assert!(!file.hdus[1].is_primary());
}

#[test]
fn box_outside_the_image_is_rejected() {
    let bytes = write_image_hdu(&tan_cards((2.0, 2.0)), &raster_4x4(), true);
    let err = crop_fits(&bytes, Some(0), PixelBox::new(10, 10, 12, 12)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Header);
}

// ---------------------------------------------------------------------------
// On disk
// ---------------------------------------------------------------------------

#[test]
fn crop_reads_only_the_box_from_a_file() {
    let src = pattern(64, 48);
    let primary = write_image_hdu(&tan_cards((32.0, 24.0)), &raster_4x4(), true);
    let mut cards = tan_cards((32.0, 24.0));
    cards.push(Card::new("BLANK", Value::Integer(-300)));
    let ext = write_image_hdu(&cards, &src, false);
    let bytes = write_fits(&[primary, ext]);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&bytes).unwrap();
    file.flush().unwrap();

    let fits = parse_fits(&bytes).unwrap();
    let hdu = &fits.hdus[1];
    let header = hdu.image_header().unwrap();
    let mut reader = hdu_reader(File::open(file.path()).unwrap(), hdu).unwrap();

    let bx = PixelBox::new(10, 5, 29, 20);
    let (from_disk, disk_header) = crop_source(&mut reader, &header, bx).unwrap();
    let (in_memory, memory_header) = crop(&src, &header, bx).unwrap();
    assert_eq!(from_disk, in_memory);
    assert_eq!(from_disk.value(0, 0, 0), src.value(10, 5, 0));
    assert_eq!((disk_header.naxis1, disk_header.naxis2), (20, 16));
    assert_eq!(disk_header.crpix1, memory_header.crpix1);
    assert_eq!(disk_header.crpix2, memory_header.crpix2);
    // pattern value at (0, 0) is the BLANK sentinel
    assert_eq!(reader.read_tile([0, 0, 0], [1, 1, 1]).unwrap().value(0, 0, 0), None);
}

#[test]
fn sky_circle_crop_from_file_header() {
    let src = pattern(40, 40);
    let bytes = write_image_hdu(&tan_cards((20.0, 20.0)), &src, true);
    let header = header_of(&bytes, 0);

    // 0.01° at 0.002°/px is a 5 px radius
    let center = WorldPt::new(83.82, -5.39, CoordSys::EquatorialJ2000);
    let bx = sky_circle_box(&header, center, 0.01).unwrap();
    assert_eq!(bx, PixelBox::new(14, 14, 24, 24));

    let out = crop_fits(&bytes, None, bx).unwrap();
    let cropped = header_of(&out, 0);
    assert_eq!((cropped.naxis1, cropped.naxis2), (11, 11));
    let proj = Projection::new(&cropped).unwrap();
    let c = proj.world_to_image(center).unwrap();
    assert_abs_diff_eq!(c.x, 6.0, epsilon = 1e-9);
    assert_abs_diff_eq!(c.y, 6.0, epsilon = 1e-9);
}
