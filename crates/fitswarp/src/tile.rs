//! Rectangular region reads from in-memory rasters, big-endian byte slices
//! and seekable readers.
//!
//! Byte-backed sources read one row span per (row, plane) of the region, so
//! a small crop of a large image touches only the bytes it needs.

use std::io::{Read, Seek, SeekFrom};

use crate::dispatch;
use crate::error::Result;
use crate::raster::{bytes_per_sample, check_region, image_byte_len, AnyRaster, Raster, Sample};

/// Anything a tile can be read from.
pub trait TileSource {
    /// (width, height, depth).
    fn dims(&self) -> [usize; 3];

    fn bitpix(&self) -> i64;

    /// Read the box at `offset` with `size` samples per axis. The sample
    /// kind is preserved.
    fn read_tile(&mut self, offset: [usize; 3], size: [usize; 3]) -> Result<AnyRaster>;
}

impl<T: Sample> TileSource for Raster<T> {
    fn dims(&self) -> [usize; 3] {
        [self.width(), self.height(), self.depth()]
    }

    fn bitpix(&self) -> i64 {
        T::BITPIX
    }

    fn read_tile(&mut self, offset: [usize; 3], size: [usize; 3]) -> Result<AnyRaster> {
        self.get_tile(offset, size).map(T::into_any)
    }
}

impl TileSource for AnyRaster {
    fn dims(&self) -> [usize; 3] {
        [self.width(), self.height(), self.depth()]
    }

    fn bitpix(&self) -> i64 {
        AnyRaster::bitpix(self)
    }

    fn read_tile(&mut self, offset: [usize; 3], size: [usize; 3]) -> Result<AnyRaster> {
        dispatch!(self, r => r.read_tile(offset, size))
    }
}

/// Byte offset (relative to the data start) and length of every row span
/// of a region, in storage order.
fn row_spans(
    dims: [usize; 3],
    offset: [usize; 3],
    size: [usize; 3],
    bpp: usize,
) -> impl Iterator<Item = (usize, usize)> {
    let [w, h, _] = dims;
    let [x0, y0, z0] = offset;
    let [sw, sh, sd] = size;
    (z0..z0 + sd).flat_map(move |z| {
        (y0..y0 + sh).map(move |y| (((z * h + y) * w + x0) * bpp, sw * bpp))
    })
}

/// Image samples held as big-endian bytes, for example the data segment of
/// an HDU inside a FITS file already in memory.
#[derive(Debug, Clone)]
pub struct BytesSource<'a> {
    data: &'a [u8],
    bitpix: i64,
    dims: [usize; 3],
    blank: Option<i64>,
}

impl<'a> BytesSource<'a> {
    /// `data` starts at the first sample.
    pub fn new(data: &'a [u8], bitpix: i64, dims: [usize; 3], blank: Option<i64>) -> Self {
        BytesSource {
            data,
            bitpix,
            dims,
            blank,
        }
    }
}

impl TileSource for BytesSource<'_> {
    fn dims(&self) -> [usize; 3] {
        self.dims
    }

    fn bitpix(&self) -> i64 {
        self.bitpix
    }

    fn read_tile(&mut self, offset: [usize; 3], size: [usize; 3]) -> Result<AnyRaster> {
        check_region(self.dims, offset, size)?;
        image_byte_len(self.bitpix, &self.dims)?;
        let bpp = bytes_per_sample(self.bitpix)?;
        let mut raw = Vec::with_capacity(image_byte_len(self.bitpix, &size)?);
        for (start, len) in row_spans(self.dims, offset, size, bpp) {
            let span = self
                .data
                .get(start..start + len)
                .ok_or(crate::error::Error::UnexpectedEof)?;
            raw.extend_from_slice(span);
        }
        AnyRaster::decode(self.bitpix, size, &raw, self.blank)
    }
}

/// Image samples in a seekable stream, read on demand.
#[derive(Debug)]
pub struct ReaderSource<R> {
    reader: R,
    data_start: u64,
    bitpix: i64,
    dims: [usize; 3],
    blank: Option<i64>,
}

impl<R: Read + Seek> ReaderSource<R> {
    /// `data_start` is the byte position of the first sample in `reader`.
    pub fn new(
        reader: R,
        data_start: u64,
        bitpix: i64,
        dims: [usize; 3],
        blank: Option<i64>,
    ) -> Self {
        ReaderSource {
            reader,
            data_start,
            bitpix,
            dims,
            blank,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read + Seek> TileSource for ReaderSource<R> {
    fn dims(&self) -> [usize; 3] {
        self.dims
    }

    fn bitpix(&self) -> i64 {
        self.bitpix
    }

    fn read_tile(&mut self, offset: [usize; 3], size: [usize; 3]) -> Result<AnyRaster> {
        check_region(self.dims, offset, size)?;
        image_byte_len(self.bitpix, &self.dims)?;
        let bpp = bytes_per_sample(self.bitpix)?;
        let total = image_byte_len(self.bitpix, &size)?;
        let mut raw = vec![0u8; total];
        let mut filled = 0;
        for (start, len) in row_spans(self.dims, offset, size, bpp) {
            self.reader
                .seek(SeekFrom::Start(self.data_start + start as u64))?;
            self.reader.read_exact(&mut raw[filled..filled + len])?;
            filled += len;
        }
        tracing::trace!(?offset, ?size, bytes = total, "read tile from stream");
        AnyRaster::decode(self.bitpix, size, &raw, self.blank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn be_i16(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    #[test]
    fn bytes_source_reads_region() {
        let values: Vec<i16> = (0..20).collect();
        let bytes = be_i16(&values);
        let mut src = BytesSource::new(&bytes, 16, [5, 4, 1], None);
        let tile = src.read_tile([1, 2, 0], [3, 2, 1]).unwrap();
        let AnyRaster::I16(r) = tile else {
            panic!("expected i16");
        };
        assert_eq!(r.flatten(), &[11, 12, 13, 16, 17, 18]);
    }

    #[test]
    fn reader_source_matches_bytes_source() {
        let values: Vec<i16> = (0..60).collect();
        let mut bytes = vec![0xAAu8; 7];
        bytes.extend(be_i16(&values));
        let mut reader = ReaderSource::new(Cursor::new(bytes.clone()), 7, 16, [5, 4, 3], Some(13));
        let mut slice = BytesSource::new(&bytes[7..], 16, [5, 4, 3], Some(13));
        let a = reader.read_tile([2, 1, 1], [2, 3, 2]).unwrap();
        let b = slice.read_tile([2, 1, 1], [2, 3, 2]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.depth(), 2);
    }

    #[test]
    fn region_outside_is_rejected() {
        let bytes = be_i16(&[0; 4]);
        let mut src = BytesSource::new(&bytes, 16, [2, 2, 1], None);
        assert!(src.read_tile([1, 0, 0], [2, 1, 1]).is_err());
    }

    #[test]
    fn truncated_stream_is_io_error() {
        let bytes = be_i16(&[1, 2, 3]);
        let mut reader = ReaderSource::new(Cursor::new(bytes), 0, 16, [2, 2, 1], None);
        let err = reader.read_tile([0, 1, 0], [2, 1, 1]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }

    #[test]
    fn in_memory_raster_is_a_source() {
        let mut r = Raster::from_plane(3, 2, vec![1u8, 2, 3, 4, 5, 6], None).unwrap();
        assert_eq!(TileSource::bitpix(&r), 8);
        let t = r.read_tile([1, 0, 0], [2, 2, 1]).unwrap();
        assert_eq!(t.value(0, 1, 0), Some(5.0));
    }
}
