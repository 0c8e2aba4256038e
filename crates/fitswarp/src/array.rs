//! `ndarray` views of rasters.
//!
//! Arrays use C order with the slowest axis first: `(height, width)` for a
//! plane and `(depth, height, width)` for a cube, so `arr[[y, x]]` is the
//! sample at zero-based pixel (x, y).

use ndarray::{Array, Array2, Array3};

use crate::dispatch;
use crate::error::{Error, Result};
use crate::raster::{AnyRaster, Raster, Sample};

fn shape_error(_: ndarray::ShapeError) -> Error {
    Error::InvalidValue("array shape")
}

impl<T: Sample> Raster<T> {
    /// First plane as a `(height, width)` array.
    pub fn to_array2(&self) -> Result<Array2<T>> {
        let n = self.width() * self.height();
        Array::from_shape_vec((self.height(), self.width()), self.flatten()[..n].to_vec())
            .map_err(shape_error)
    }

    /// All planes as a `(depth, height, width)` array.
    pub fn to_array3(&self) -> Result<Array3<T>> {
        Array::from_shape_vec(
            (self.depth(), self.height(), self.width()),
            self.flatten().to_vec(),
        )
        .map_err(shape_error)
    }

    pub fn from_array2(arr: &Array2<T>, blank: Option<T>) -> Result<Raster<T>> {
        let (h, w) = arr.dim();
        Raster::from_plane(w, h, arr.iter().copied().collect(), blank)
    }

    pub fn from_array3(arr: &Array3<T>, blank: Option<T>) -> Result<Raster<T>> {
        let (d, h, w) = arr.dim();
        Raster::new(w, h, d, arr.iter().copied().collect(), blank)
    }
}

impl AnyRaster {
    /// Physical values as a `(depth, height, width)` array; blank samples
    /// are NaN.
    pub fn to_physical_array3(&self, bscale: f64, bzero: f64) -> Result<Array3<f64>> {
        dispatch!(self, r => {
            let data = r
                .flatten()
                .iter()
                .map(|&v| r.physical(v, bscale, bzero).unwrap_or(f64::NAN))
                .collect();
            Array::from_shape_vec((r.depth(), r.height(), r.width()), data).map_err(shape_error)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn plane_layout_is_row_major() {
        let r = Raster::from_plane(3, 2, vec![1i16, 2, 3, 4, 5, 6], None).unwrap();
        let a = r.to_array2().unwrap();
        assert_eq!(a, array![[1, 2, 3], [4, 5, 6]]);
        assert_eq!(a[[1, 0]], r.get(0, 1).unwrap());
        assert_eq!(Raster::from_array2(&a, None).unwrap(), r);
    }

    #[test]
    fn cube_planes_come_first() {
        let r = Raster::new(2, 1, 2, vec![1u8, 2, 3, 4], Some(0)).unwrap();
        let a = r.to_array3().unwrap();
        assert_eq!(a.dim(), (2, 1, 2));
        assert_eq!(a[[1, 0, 1]], 4);
        assert_eq!(r.to_array2().unwrap(), array![[1, 2]]);
        assert_eq!(Raster::from_array3(&a, Some(0)).unwrap(), r);
    }

    #[test]
    fn physical_array_blanks_are_nan() {
        let any: AnyRaster = Raster::from_plane(2, 1, vec![5i32, -1], Some(-1)).unwrap().into();
        let a = any.to_physical_array3(2.0, 1.0).unwrap();
        assert_eq!(a[[0, 0, 0]], 11.0);
        assert!(a[[0, 0, 1]].is_nan());
    }
}
