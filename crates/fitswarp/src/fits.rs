//! FITS container: HDU splitting, image decode and image HDU writing.

use std::io::{Read, Seek};

use crate::block::{pad_data, padded_byte_len, BLOCK_SIZE};
use crate::card::{self, parse_header_blocks, serialize_header, Card, Value};
use crate::error::{Error, Result};
use crate::header::ImageHeader;
use crate::raster::{image_byte_len, sample_count, AnyRaster};
use crate::tile::{BytesSource, ReaderSource};

/// What an HDU holds, as far as this crate is concerned.
#[derive(Debug, Clone, PartialEq)]
pub enum HduKind {
    /// Primary array or `XTENSION = 'IMAGE'`.
    Image { bitpix: i64, naxes: Vec<usize> },
    /// Tables and anything else; carried through as raw bytes.
    Other,
}

/// One header-data unit located inside a FITS byte stream.
#[derive(Debug, Clone)]
pub struct Hdu {
    pub cards: Vec<Card>,
    pub kind: HduKind,
    /// Byte offset of the first header block.
    pub header_start: usize,
    /// Byte offset of the data segment.
    pub data_start: usize,
    /// Unpadded data length in bytes.
    pub data_len: usize,
}

impl Hdu {
    pub fn is_primary(&self) -> bool {
        self.header_start == 0
    }

    /// (width, height, depth) of an image HDU with two or three significant
    /// axes. Trailing axes of length 1 are ignored.
    pub fn image_dims(&self) -> Result<[usize; 3]> {
        let HduKind::Image { naxes, .. } = &self.kind else {
            return Err(Error::invalid_header("not an image HDU"));
        };
        let mut naxes = naxes.as_slice();
        while naxes.len() > 2 && naxes[naxes.len() - 1] == 1 {
            naxes = &naxes[..naxes.len() - 1];
        }
        match naxes {
            [w, h] => Ok([*w, *h, 1]),
            [w, h, d] => Ok([*w, *h, *d]),
            other => Err(Error::UnsupportedNaxis(other.len())),
        }
    }

    /// Whether this is an image HDU that can be decoded into a raster.
    pub fn has_image(&self) -> bool {
        matches!(&self.kind, HduKind::Image { naxes, .. } if naxes.len() >= 2)
            && self.image_dims().is_ok()
    }

    /// Parsed astrometry header, with the data offset recorded.
    pub fn image_header(&self) -> Result<ImageHeader> {
        let mut header = ImageHeader::from_cards(&self.cards)?;
        header.data_offset = self.data_start;
        Ok(header)
    }

    /// The complete padded bytes of this HDU inside `fits`, for pass-through
    /// copies. Missing trailing padding is restored.
    pub fn raw_bytes(&self, fits: &[u8]) -> Vec<u8> {
        let end = (self.data_start + padded_byte_len(self.data_len)).min(fits.len());
        let mut out = fits[self.header_start..end].to_vec();
        pad_data(&mut out);
        out
    }
}

/// All HDUs of a FITS file.
#[derive(Debug, Clone)]
pub struct FitsFile {
    pub hdus: Vec<Hdu>,
}

impl FitsFile {
    pub fn primary(&self) -> Option<&Hdu> {
        self.hdus.first()
    }

    pub fn get(&self, index: usize) -> Option<&Hdu> {
        self.hdus.get(index)
    }

    pub fn len(&self) -> usize {
        self.hdus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hdus.is_empty()
    }

    /// First HDU with decodable image data.
    pub fn first_image(&self) -> Option<(usize, &Hdu)> {
        self.hdus.iter().enumerate().find(|(_, h)| h.has_image())
    }
}

fn naxes(cards: &[Card]) -> Result<Vec<usize>> {
    let naxis = card::find_int(cards, "NAXIS").ok_or(Error::MissingKeyword("NAXIS"))?;
    (1..=naxis.max(0))
        .map(|i| {
            card::find_int(cards, &format!("NAXIS{i}"))
                .map(|n| n.max(0) as usize)
                .ok_or(Error::MissingKeyword("NAXISn"))
        })
        .collect()
}

fn data_byte_len(cards: &[Card], is_primary: bool) -> Result<usize> {
    let bitpix = card::find_int(cards, "BITPIX").ok_or(Error::MissingKeyword("BITPIX"))?;
    let dims = naxes(cards)?;
    if dims.is_empty() {
        return Ok(0);
    }
    let bytes_per_value = (bitpix.unsigned_abs() as usize) / 8;
    let random_groups =
        is_primary && dims[0] == 0 && card::find_bool(cards, "GROUPS") == Some(true);
    let pixels = if random_groups {
        sample_count(&dims[1..])?
    } else {
        sample_count(&dims)?
    };
    let (pcount, gcount) = if is_primary && !random_groups {
        (0, 1)
    } else {
        let pcount = card::find_int(cards, "PCOUNT").unwrap_or(0).max(0) as usize;
        let gcount = card::find_int(cards, "GCOUNT").unwrap_or(1).max(1) as usize;
        (pcount, gcount)
    };
    pixels
        .checked_add(pcount)
        .and_then(|n| n.checked_mul(gcount))
        .and_then(|n| n.checked_mul(bytes_per_value))
        .ok_or_else(|| Error::invalid_header("data size overflow"))
}

fn hdu_kind(cards: &[Card], is_primary: bool) -> Result<HduKind> {
    let image = if is_primary {
        card::find_bool(cards, "GROUPS") != Some(true)
    } else {
        card::find_string(cards, "XTENSION") == Some("IMAGE")
    };
    if !image {
        return Ok(HduKind::Other);
    }
    let bitpix = card::find_int(cards, "BITPIX").ok_or(Error::MissingKeyword("BITPIX"))?;
    Ok(HduKind::Image {
        bitpix,
        naxes: naxes(cards)?,
    })
}

/// Locate every HDU of a FITS byte stream.
pub fn parse_fits(data: &[u8]) -> Result<FitsFile> {
    if data.len() < BLOCK_SIZE {
        return Err(Error::UnexpectedEof);
    }
    let mut hdus = Vec::new();
    let mut offset = 0usize;

    while offset + BLOCK_SIZE <= data.len() {
        let (cards, header_len) = match parse_header_blocks(&data[offset..]) {
            Ok(parsed) => parsed,
            Err(_) if !hdus.is_empty() => break,
            Err(e) => return Err(e),
        };
        let is_primary = hdus.is_empty();
        if is_primary && cards.first().map(Card::keyword_str) != Some("SIMPLE") {
            return Err(Error::invalid_header("first HDU must be primary"));
        }
        let kind = hdu_kind(&cards, is_primary)?;
        let data_len = data_byte_len(&cards, is_primary)?;
        let data_start = offset + header_len;
        let data_end = data_start
            .checked_add(data_len)
            .ok_or_else(|| Error::invalid_header("data size overflow"))?;
        if data_end > data.len() {
            return Err(Error::UnexpectedEof);
        }
        hdus.push(Hdu {
            cards,
            kind,
            header_start: offset,
            data_start,
            data_len,
        });
        offset = data_start + padded_byte_len(data_len);
    }

    tracing::debug!(hdus = hdus.len(), "parsed FITS stream");
    Ok(FitsFile { hdus })
}

/// Decode the image of `hdu`. Cubes keep all their planes.
pub fn read_raster(fits: &[u8], hdu: &Hdu) -> Result<AnyRaster> {
    let dims = hdu.image_dims()?;
    let HduKind::Image { bitpix, .. } = hdu.kind else {
        return Err(Error::invalid_header("not an image HDU"));
    };
    let len = image_byte_len(bitpix, &dims)?;
    let raw = hdu
        .data_start
        .checked_add(len)
        .and_then(|end| fits.get(hdu.data_start..end))
        .ok_or(Error::UnexpectedEof)?;
    AnyRaster::decode(bitpix, dims, raw, card::find_int(&hdu.cards, "BLANK"))
}

/// Region reader over an image HDU of a FITS file held in memory.
pub fn hdu_source<'a>(fits: &'a [u8], hdu: &Hdu) -> Result<BytesSource<'a>> {
    let dims = hdu.image_dims()?;
    let HduKind::Image { bitpix, .. } = hdu.kind else {
        return Err(Error::invalid_header("not an image HDU"));
    };
    image_byte_len(bitpix, &dims)?;
    let data = fits.get(hdu.data_start..).ok_or(Error::UnexpectedEof)?;
    Ok(BytesSource::new(
        data,
        bitpix,
        dims,
        card::find_int(&hdu.cards, "BLANK"),
    ))
}

/// Region reader over an image HDU of an open file. Only the requested rows
/// are ever read.
pub fn hdu_reader<R: Read + Seek>(reader: R, hdu: &Hdu) -> Result<ReaderSource<R>> {
    let dims = hdu.image_dims()?;
    let HduKind::Image { bitpix, .. } = hdu.kind else {
        return Err(Error::invalid_header("not an image HDU"));
    };
    image_byte_len(bitpix, &dims)?;
    Ok(ReaderSource::new(
        reader,
        hdu.data_start as u64,
        bitpix,
        dims,
        card::find_int(&hdu.cards, "BLANK"),
    ))
}

const STRUCTURAL_KEYS: [&str; 9] = [
    "SIMPLE", "XTENSION", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "NAXIS3", "PCOUNT", "GCOUNT",
];

/// Serialize an image HDU: the structural keywords are rebuilt from the
/// raster, every other card of `cards` follows in its original order.
pub fn write_image_hdu(cards: &[Card], raster: &AnyRaster, primary: bool) -> Vec<u8> {
    let mut out_cards = Vec::with_capacity(cards.len() + 8);
    if primary {
        out_cards.push(Card::new("SIMPLE", Value::Logical(true)));
    } else {
        out_cards.push(Card::new("XTENSION", Value::String("IMAGE".into())));
    }
    let depth = raster.depth();
    out_cards.push(Card::new("BITPIX", Value::Integer(raster.bitpix())));
    out_cards.push(Card::new(
        "NAXIS",
        Value::Integer(if depth > 1 { 3 } else { 2 }),
    ));
    out_cards.push(Card::new("NAXIS1", Value::Integer(raster.width() as i64)));
    out_cards.push(Card::new("NAXIS2", Value::Integer(raster.height() as i64)));
    if depth > 1 {
        out_cards.push(Card::new("NAXIS3", Value::Integer(depth as i64)));
    }
    if !primary {
        out_cards.push(Card::new("PCOUNT", Value::Integer(0)));
        out_cards.push(Card::new("GCOUNT", Value::Integer(1)));
    }
    out_cards.extend(
        cards
            .iter()
            .filter(|c| !STRUCTURAL_KEYS.contains(&c.keyword_str()))
            .filter(|c| primary || c.keyword_str() != "EXTEND")
            .cloned(),
    );

    let mut bytes = serialize_header(&out_cards);
    let mut data = raster.to_be_bytes();
    pad_data(&mut data);
    bytes.extend_from_slice(&data);
    bytes
}

/// Concatenate serialized HDUs into one FITS stream.
pub fn write_fits(hdus: &[Vec<u8>]) -> Vec<u8> {
    hdus.concat()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::Raster;

    fn i16_image(w: usize, h: usize) -> AnyRaster {
        let data: Vec<i16> = (0..(w * h) as i16).collect();
        Raster::from_plane(w, h, data, None).unwrap().into()
    }

    fn bintable_hdu() -> Vec<u8> {
        let cards = vec![
            Card::new("XTENSION", Value::String("BINTABLE".into())),
            Card::new("BITPIX", Value::Integer(8)),
            Card::new("NAXIS", Value::Integer(2)),
            Card::new("NAXIS1", Value::Integer(4)),
            Card::new("NAXIS2", Value::Integer(3)),
            Card::new("PCOUNT", Value::Integer(0)),
            Card::new("GCOUNT", Value::Integer(1)),
            Card::new("TFIELDS", Value::Integer(1)),
            Card::new("TFORM1", Value::String("1J".into())),
        ];
        let mut bytes = serialize_header(&cards);
        let mut data = vec![7u8; 12];
        pad_data(&mut data);
        bytes.extend(data);
        bytes
    }

    #[test]
    fn write_then_parse_primary() {
        let img = i16_image(4, 3);
        let extra = [Card::new("OBJECT", Value::String("M31".into()))];
        let bytes = write_image_hdu(&extra, &img, true);
        assert_eq!(bytes.len() % BLOCK_SIZE, 0);

        let fits = parse_fits(&bytes).unwrap();
        assert_eq!(fits.len(), 1);
        let hdu = fits.primary().unwrap();
        assert!(hdu.is_primary());
        assert_eq!(hdu.image_dims().unwrap(), [4, 3, 1]);
        assert_eq!(card::find_string(&hdu.cards, "OBJECT"), Some("M31"));
        assert_eq!(read_raster(&bytes, hdu).unwrap(), img);
    }

    #[test]
    fn extensions_and_tables() {
        let primary = write_image_hdu(&[], &i16_image(2, 2), true);
        let ext = write_image_hdu(
            &[Card::new("EXTNAME", Value::String("SCI".into()))],
            &i16_image(3, 5),
            false,
        );
        let bytes = write_fits(&[primary, bintable_hdu(), ext]);
        let fits = parse_fits(&bytes).unwrap();
        assert_eq!(fits.len(), 3);
        assert_eq!(fits.hdus[1].kind, HduKind::Other);
        assert!(!fits.hdus[1].has_image());
        assert_eq!(fits.hdus[1].data_len, 12);
        assert_eq!(fits.hdus[2].image_dims().unwrap(), [3, 5, 1]);
        assert_eq!(card::find_int(&fits.hdus[2].cards, "PCOUNT"), Some(0));

        let raw = fits.hdus[1].raw_bytes(&bytes);
        assert_eq!(raw, bintable_hdu());
    }

    #[test]
    fn trailing_unit_axes_are_dropped() {
        let hdu = Hdu {
            cards: Vec::new(),
            kind: HduKind::Image {
                bitpix: 8,
                naxes: vec![10, 20, 1, 1],
            },
            header_start: 0,
            data_start: 2880,
            data_len: 200,
        };
        assert_eq!(hdu.image_dims().unwrap(), [10, 20, 1]);

        let cube4 = Hdu {
            kind: HduKind::Image {
                bitpix: 8,
                naxes: vec![2, 2, 2, 2],
            },
            ..hdu.clone()
        };
        assert!(matches!(cube4.image_dims(), Err(Error::UnsupportedNaxis(4))));

        let line = Hdu {
            kind: HduKind::Image {
                bitpix: 8,
                naxes: vec![5],
            },
            ..hdu
        };
        assert!(matches!(line.image_dims(), Err(Error::UnsupportedNaxis(1))));
    }

    #[test]
    fn empty_primary_is_not_an_image() {
        let cards = vec![
            Card::new("SIMPLE", Value::Logical(true)),
            Card::new("BITPIX", Value::Integer(8)),
            Card::new("NAXIS", Value::Integer(0)),
        ];
        let bytes = serialize_header(&cards);
        let fits = parse_fits(&bytes).unwrap();
        assert!(!fits.hdus[0].has_image());
        assert!(fits.first_image().is_none());
    }

    #[test]
    fn non_primary_first_hdu_rejected() {
        let bytes = bintable_hdu();
        assert!(parse_fits(&bytes).is_err());
    }

    #[test]
    fn truncated_data_is_eof() {
        let mut bytes = write_image_hdu(&[], &i16_image(40, 40), true);
        bytes.truncate(BLOCK_SIZE + 100);
        assert!(matches!(parse_fits(&bytes), Err(Error::UnexpectedEof)));
    }

    #[test]
    fn oversized_axes_are_header_error() {
        let cards = vec![
            Card::new("SIMPLE", Value::Logical(true)),
            Card::new("BITPIX", Value::Integer(16)),
            Card::new("NAXIS", Value::Integer(3)),
            Card::new("NAXIS1", Value::Integer(1 << 32)),
            Card::new("NAXIS2", Value::Integer(1 << 32)),
            Card::new("NAXIS3", Value::Integer(1)),
        ];
        let bytes = serialize_header(&cards);
        let err = parse_fits(&bytes).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Header);

        // a located HDU with the same axes never reaches the decoder
        let hdu = Hdu {
            cards,
            kind: HduKind::Image {
                bitpix: 16,
                naxes: vec![1 << 32, 1 << 32],
            },
            header_start: 0,
            data_start: BLOCK_SIZE,
            data_len: 0,
        };
        assert!(read_raster(&bytes, &hdu).is_err());
        assert!(hdu_source(&bytes, &hdu).is_err());
    }

    #[test]
    fn cube_round_trip_and_source() {
        let data: Vec<f32> = (0..24).map(|v| v as f32 * 0.5).collect();
        let cube: AnyRaster = Raster::new(2, 3, 4, data, None).unwrap().into();
        let bytes = write_image_hdu(&[], &cube, true);
        let fits = parse_fits(&bytes).unwrap();
        let hdu = fits.primary().unwrap();
        assert_eq!(card::find_int(&hdu.cards, "NAXIS"), Some(3));
        assert_eq!(read_raster(&bytes, hdu).unwrap(), cube);

        use crate::tile::TileSource;
        let mut src = hdu_source(&bytes, hdu).unwrap();
        let tile = src.read_tile([1, 1, 2], [1, 2, 1]).unwrap();
        assert_eq!(tile.value(0, 0, 0), Some(15.0 * 0.5));
        assert_eq!(tile.value(0, 1, 0), Some(17.0 * 0.5));
    }
}
