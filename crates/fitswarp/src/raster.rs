//! Typed pixel buffers.
//!
//! [`Raster<T>`] holds one of the five FITS sample kinds behind the sealed
//! [`Sample`] trait, so every algorithm is written once and monomorphised.
//! [`AnyRaster`] is the runtime sum over the kinds, for data whose BITPIX is
//! only known after reading a header.

use core::fmt::Debug;

use bytemuck::{pod_collect_to_vec, Pod};

use crate::error::{Error, Result};

mod sealed {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for i16 {}
    impl Sealed for i32 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// A FITS sample type.
pub trait Sample: sealed::Sealed + Pod + PartialEq + Debug + Send + Sync + 'static {
    /// BITPIX of this kind.
    const BITPIX: i64;
    /// Floating-point kinds use NaN instead of a BLANK value.
    const IS_FLOAT: bool;

    fn to_f64(self) -> f64;

    /// Convert a big-endian value read from disk to native order.
    fn from_be(self) -> Self;

    fn write_be(self, out: &mut Vec<u8>);

    /// The BLANK keyword value as this kind, when representable.
    fn blank_from_header(blank: Option<i64>) -> Option<Self>;

    fn into_any(raster: Raster<Self>) -> AnyRaster;
}

impl Sample for u8 {
    const BITPIX: i64 = 8;
    const IS_FLOAT: bool = false;

    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_be(self) -> Self {
        self
    }
    fn write_be(self, out: &mut Vec<u8>) {
        out.push(self);
    }
    fn blank_from_header(blank: Option<i64>) -> Option<Self> {
        blank.and_then(|b| u8::try_from(b).ok())
    }
    fn into_any(raster: Raster<Self>) -> AnyRaster {
        AnyRaster::U8(raster)
    }
}

impl Sample for i16 {
    const BITPIX: i64 = 16;
    const IS_FLOAT: bool = false;

    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_be(self) -> Self {
        i16::from_be(self)
    }
    fn write_be(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }
    fn blank_from_header(blank: Option<i64>) -> Option<Self> {
        blank.and_then(|b| i16::try_from(b).ok())
    }
    fn into_any(raster: Raster<Self>) -> AnyRaster {
        AnyRaster::I16(raster)
    }
}

impl Sample for i32 {
    const BITPIX: i64 = 32;
    const IS_FLOAT: bool = false;

    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_be(self) -> Self {
        i32::from_be(self)
    }
    fn write_be(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }
    fn blank_from_header(blank: Option<i64>) -> Option<Self> {
        blank.and_then(|b| i32::try_from(b).ok())
    }
    fn into_any(raster: Raster<Self>) -> AnyRaster {
        AnyRaster::I32(raster)
    }
}

impl Sample for f32 {
    const BITPIX: i64 = -32;
    const IS_FLOAT: bool = true;

    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_be(self) -> Self {
        f32::from_bits(u32::from_be(self.to_bits()))
    }
    fn write_be(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }
    fn blank_from_header(_: Option<i64>) -> Option<Self> {
        None
    }
    fn into_any(raster: Raster<Self>) -> AnyRaster {
        AnyRaster::F32(raster)
    }
}

impl Sample for f64 {
    const BITPIX: i64 = -64;
    const IS_FLOAT: bool = true;

    fn to_f64(self) -> f64 {
        self
    }
    fn from_be(self) -> Self {
        f64::from_bits(u64::from_be(self.to_bits()))
    }
    fn write_be(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }
    fn blank_from_header(_: Option<i64>) -> Option<Self> {
        None
    }
    fn into_any(raster: Raster<Self>) -> AnyRaster {
        AnyRaster::F64(raster)
    }
}

/// Bytes per sample for a BITPIX value.
pub fn bytes_per_sample(bitpix: i64) -> Result<usize> {
    match bitpix {
        8 => Ok(1),
        16 => Ok(2),
        32 | -32 => Ok(4),
        -64 => Ok(8),
        other => Err(Error::UnsupportedBitpix(other)),
    }
}

/// Number of samples in an image of `dims`, or an error when it does not fit
/// in `usize`.
pub fn sample_count(dims: &[usize]) -> Result<usize> {
    dims.iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .ok_or_else(|| Error::invalid_header("data size overflow"))
}

/// Byte length of an image of `dims` samples of the given BITPIX.
pub fn image_byte_len(bitpix: i64, dims: &[usize]) -> Result<usize> {
    let bpp = bytes_per_sample(bitpix)?;
    sample_count(dims)?
        .checked_mul(bpp)
        .ok_or_else(|| Error::invalid_header("data size overflow"))
}

/// Decode big-endian bytes into native samples.
pub fn decode_be<T: Sample>(raw: &[u8]) -> Vec<T> {
    let mut values: Vec<T> = pod_collect_to_vec(raw);
    for v in &mut values {
        *v = v.from_be();
    }
    values
}

// ── Raster ──

/// An owned image or cube of one sample kind.
///
/// Samples are stored row-major within a plane (x fastest), planes one after
/// another. `data.len() == width * height * depth` always holds.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster<T: Sample> {
    width: usize,
    height: usize,
    depth: usize,
    data: Vec<T>,
    blank: Option<T>,
}

impl<T: Sample> Raster<T> {
    pub fn new(
        width: usize,
        height: usize,
        depth: usize,
        data: Vec<T>,
        blank: Option<T>,
    ) -> Result<Self> {
        let expected = sample_count(&[width, height, depth])?;
        if data.len() != expected {
            return Err(Error::invalid_header(format!(
                "raster of {width}x{height}x{depth} needs {expected} samples, got {}",
                data.len()
            )));
        }
        Ok(Raster {
            width,
            height,
            depth,
            data,
            blank,
        })
    }

    /// A single-plane raster.
    pub fn from_plane(width: usize, height: usize, data: Vec<T>, blank: Option<T>) -> Result<Self> {
        Raster::new(width, height, 1, data, blank)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn blank(&self) -> Option<T> {
        self.blank
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Samples in storage order: row-major, plane-major for cubes.
    pub fn flatten(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Sample at zero-based (x, y) of the first plane.
    pub fn get(&self, x: usize, y: usize) -> Option<T> {
        self.get3(x, y, 0)
    }

    pub fn get3(&self, x: usize, y: usize, z: usize) -> Option<T> {
        if x >= self.width || y >= self.height || z >= self.depth {
            return None;
        }
        Some(self.data[(z * self.height + y) * self.width + x])
    }

    /// NaN for float kinds, the BLANK value for integer kinds.
    pub fn is_blank(&self, v: T) -> bool {
        if T::IS_FLOAT {
            v.to_f64().is_nan()
        } else {
            self.blank == Some(v)
        }
    }

    /// Copy of the box starting at `offset` (x, y, z) with `size` samples
    /// per axis.
    pub fn get_tile(&self, offset: [usize; 3], size: [usize; 3]) -> Result<Raster<T>> {
        check_region([self.width, self.height, self.depth], offset, size)?;
        let [x0, y0, z0] = offset;
        let [w, h, d] = size;
        let mut data = Vec::with_capacity(w * h * d);
        for z in z0..z0 + d {
            for y in y0..y0 + h {
                let start = (z * self.height + y) * self.width + x0;
                data.extend_from_slice(&self.data[start..start + w]);
            }
        }
        Raster::new(w, h, d, data, self.blank)
    }

    /// One plane of a cube.
    pub fn plane(&self, z: usize) -> Result<Raster<T>> {
        self.get_tile([0, 0, z], [self.width, self.height, 1])
    }

    /// Split a cube into its planes.
    pub fn planes(&self) -> Vec<Raster<T>> {
        let n = self.width * self.height;
        if n == 0 {
            return (0..self.depth)
                .map(|_| Raster {
                    width: self.width,
                    height: self.height,
                    depth: 1,
                    data: Vec::new(),
                    blank: self.blank,
                })
                .collect();
        }
        self.data
            .chunks_exact(n)
            .map(|chunk| Raster {
                width: self.width,
                height: self.height,
                depth: 1,
                data: chunk.to_vec(),
                blank: self.blank,
            })
            .collect()
    }

    /// Physical value of one sample, `None` when blank.
    pub fn physical(&self, v: T, bscale: f64, bzero: f64) -> Option<f64> {
        if self.is_blank(v) {
            None
        } else {
            Some(v.to_f64() * bscale + bzero)
        }
    }

    /// Physical values as 32-bit floats; blank samples become NaN.
    pub fn to_physical_f32(&self, bscale: f64, bzero: f64) -> Raster<f32> {
        let data = self
            .data
            .iter()
            .map(|&v| match self.physical(v, bscale, bzero) {
                Some(p) => p as f32,
                None => f32::NAN,
            })
            .collect();
        Raster {
            width: self.width,
            height: self.height,
            depth: self.depth,
            data,
            blank: None,
        }
    }

    /// Big-endian bytes of every sample, unpadded.
    pub fn to_be_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() * core::mem::size_of::<T>());
        for &v in &self.data {
            v.write_be(&mut out);
        }
        out
    }

    /// Same geometry, columns in reverse order.
    pub fn flipped_lr(&self) -> Raster<T> {
        let mut data = self.data.clone();
        if self.width > 0 {
            for row in data.chunks_exact_mut(self.width) {
                row.reverse();
            }
        }
        Raster { data, ..*self }
    }
}

/// Validate a tile request against image dimensions.
pub(crate) fn check_region(dims: [usize; 3], offset: [usize; 3], size: [usize; 3]) -> Result<()> {
    for axis in 0..3 {
        let end = offset[axis]
            .checked_add(size[axis])
            .ok_or(Error::InvalidValue("tile region"))?;
        if end > dims[axis] {
            return Err(Error::InvalidValue("tile region"));
        }
    }
    Ok(())
}

// ── AnyRaster ──

/// A raster whose sample kind is known only at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyRaster {
    U8(Raster<u8>),
    I16(Raster<i16>),
    I32(Raster<i32>),
    F32(Raster<f32>),
    F64(Raster<f64>),
}

/// Run `$body` with `$r` bound to the typed raster inside an [`AnyRaster`].
#[macro_export]
macro_rules! dispatch {
    ($any:expr, $r:ident => $body:expr) => {
        match $any {
            $crate::raster::AnyRaster::U8($r) => $body,
            $crate::raster::AnyRaster::I16($r) => $body,
            $crate::raster::AnyRaster::I32($r) => $body,
            $crate::raster::AnyRaster::F32($r) => $body,
            $crate::raster::AnyRaster::F64($r) => $body,
        }
    };
}

impl AnyRaster {
    /// Decode big-endian data of the given BITPIX and dimensions.
    pub fn decode(
        bitpix: i64,
        dims: [usize; 3],
        raw: &[u8],
        blank: Option<i64>,
    ) -> Result<AnyRaster> {
        let len = image_byte_len(bitpix, &dims)?;
        let raw = raw.get(..len).ok_or(Error::UnexpectedEof)?;
        fn build<T: Sample>(dims: [usize; 3], raw: &[u8], blank: Option<i64>) -> Result<AnyRaster> {
            let data = decode_be::<T>(raw);
            Ok(T::into_any(Raster::new(
                dims[0],
                dims[1],
                dims[2],
                data,
                T::blank_from_header(blank),
            )?))
        }
        match bitpix {
            8 => build::<u8>(dims, raw, blank),
            16 => build::<i16>(dims, raw, blank),
            32 => build::<i32>(dims, raw, blank),
            -32 => build::<f32>(dims, raw, blank),
            -64 => build::<f64>(dims, raw, blank),
            other => Err(Error::UnsupportedBitpix(other)),
        }
    }

    pub fn bitpix(&self) -> i64 {
        match self {
            AnyRaster::U8(_) => u8::BITPIX,
            AnyRaster::I16(_) => i16::BITPIX,
            AnyRaster::I32(_) => i32::BITPIX,
            AnyRaster::F32(_) => f32::BITPIX,
            AnyRaster::F64(_) => f64::BITPIX,
        }
    }

    pub fn width(&self) -> usize {
        dispatch!(self, r => r.width())
    }

    pub fn height(&self) -> usize {
        dispatch!(self, r => r.height())
    }

    pub fn depth(&self) -> usize {
        dispatch!(self, r => r.depth())
    }

    pub fn len(&self) -> usize {
        dispatch!(self, r => r.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw sample value as f64, `None` when blank or out of bounds.
    pub fn value(&self, x: usize, y: usize, z: usize) -> Option<f64> {
        dispatch!(self, r => r.get3(x, y, z).filter(|&v| !r.is_blank(v)).map(|v| v.to_f64()))
    }

    pub fn get_tile(&self, offset: [usize; 3], size: [usize; 3]) -> Result<AnyRaster> {
        dispatch!(self, r => r.get_tile(offset, size).map(Sample::into_any))
    }

    pub fn planes(&self) -> Vec<AnyRaster> {
        dispatch!(self, r => r.planes().into_iter().map(Sample::into_any).collect())
    }

    pub fn to_physical_f32(&self, bscale: f64, bzero: f64) -> Raster<f32> {
        dispatch!(self, r => r.to_physical_f32(bscale, bzero))
    }

    pub fn to_be_bytes(&self) -> Vec<u8> {
        dispatch!(self, r => r.to_be_bytes())
    }

    pub fn flipped_lr(&self) -> AnyRaster {
        dispatch!(self, r => Sample::into_any(r.flipped_lr()))
    }
}

impl<T: Sample> From<Raster<T>> for AnyRaster {
    fn from(raster: Raster<T>) -> Self {
        T::into_any(raster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raster_4x4() -> Raster<i16> {
        let data: Vec<i16> = (1..=16).collect();
        Raster::from_plane(4, 4, data, Some(-32768)).unwrap()
    }

    #[test]
    fn length_invariant_enforced() {
        assert!(Raster::<u8>::new(2, 2, 1, vec![0; 3], None).is_err());
        assert!(Raster::<u8>::new(2, 2, 2, vec![0; 8], None).is_ok());
        assert!(Raster::<u8>::new(usize::MAX, 2, 1, Vec::new(), None).is_err());
    }

    #[test]
    fn sizes_that_overflow_are_errors() {
        assert_eq!(image_byte_len(-64, &[100, 50, 2]).unwrap(), 80_000);
        assert!(sample_count(&[1 << 32, 1 << 32, 1]).is_err());
        assert!(image_byte_len(16, &[usize::MAX / 2 + 1, 1]).is_err());
        assert!(AnyRaster::decode(16, [1 << 32, 1 << 32, 1], &[0; 16], None).is_err());
    }

    #[test]
    fn get_is_row_major() {
        let r = raster_4x4();
        assert_eq!(r.get(0, 0), Some(1));
        assert_eq!(r.get(3, 0), Some(4));
        assert_eq!(r.get(0, 1), Some(5));
        assert_eq!(r.get(4, 0), None);
    }

    #[test]
    fn tile_copies_region() {
        let r = raster_4x4();
        let t = r.get_tile([1, 1, 0], [2, 2, 1]).unwrap();
        assert_eq!(t.flatten(), &[6, 7, 10, 11]);
        assert_eq!(t.blank(), Some(-32768));
        assert!(r.get_tile([3, 3, 0], [2, 1, 1]).is_err());
    }

    #[test]
    fn cube_planes_and_tiles() {
        let data: Vec<f32> = (0..24).map(|v| v as f32).collect();
        let cube = Raster::new(3, 4, 2, data, None).unwrap();
        let planes = cube.planes();
        assert_eq!(planes.len(), 2);
        assert_eq!(planes[1].get(0, 0), Some(12.0));
        assert_eq!(cube.get3(2, 3, 1), Some(23.0));
        let t = cube.get_tile([1, 2, 0], [2, 1, 2]).unwrap();
        assert_eq!(t.flatten(), &[7.0, 8.0, 19.0, 20.0]);
    }

    #[test]
    fn blank_detection() {
        let r = Raster::from_plane(2, 1, vec![5i16, -1], Some(-1)).unwrap();
        assert!(r.is_blank(-1));
        assert!(!r.is_blank(5));
        let f = Raster::from_plane(2, 1, vec![1.0f32, f32::NAN], None).unwrap();
        assert!(f.is_blank(f32::NAN));
        assert!(!f.is_blank(1.0));
    }

    #[test]
    fn physical_conversion_maps_blank_to_nan() {
        let r = Raster::from_plane(3, 1, vec![10i16, 0, 20], Some(0)).unwrap();
        let p = r.to_physical_f32(2.0, 100.0);
        assert_eq!(p.get(0, 0), Some(120.0));
        assert!(p.get(1, 0).unwrap().is_nan());
        assert_eq!(p.get(2, 0), Some(140.0));
    }

    #[test]
    fn decode_big_endian() {
        let raw = [0x00, 0x01, 0xFF, 0xFE, 0x7F, 0xFF, 0x80, 0x00];
        let any = AnyRaster::decode(16, [2, 2, 1], &raw, Some(-32768)).unwrap();
        let AnyRaster::I16(r) = &any else {
            panic!("expected i16 raster");
        };
        assert_eq!(r.flatten(), &[1, -2, 32767, -32768]);
        assert_eq!(any.value(1, 1, 0), None);
        assert_eq!(any.value(0, 1, 0), Some(32767.0));
        assert_eq!(any.to_be_bytes(), raw.to_vec());
    }

    #[test]
    fn decode_float_and_errors() {
        let raw = 1.5f32.to_be_bytes();
        let any = AnyRaster::decode(-32, [1, 1, 1], &raw, Some(7)).unwrap();
        assert_eq!(any.bitpix(), -32);
        assert_eq!(any.value(0, 0, 0), Some(1.5));
        assert!(matches!(
            AnyRaster::decode(64, [1, 1, 1], &[0; 8], None),
            Err(Error::UnsupportedBitpix(64))
        ));
        assert!(matches!(
            AnyRaster::decode(16, [2, 2, 1], &[0; 6], None),
            Err(Error::UnexpectedEof)
        ));
    }

    #[test]
    fn flip_reverses_rows() {
        let r = Raster::from_plane(3, 2, vec![1u8, 2, 3, 4, 5, 6], None).unwrap();
        assert_eq!(r.flipped_lr().flatten(), &[3, 2, 1, 6, 5, 4]);
    }
}
