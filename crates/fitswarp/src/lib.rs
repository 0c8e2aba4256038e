//! FITS image reprojection, cropping and display stretch.
//!
//! The engine takes a decoded raster plus its astrometry header and
//! produces either a new (raster, header) pair, reprojected onto another
//! sky grid or cropped, or an 8-bit display buffer from a histogram-driven
//! stretch. Reading and writing FITS bytes is provided by [`fits`] so the
//! engine can be driven end to end.

pub mod block;
pub mod card;
pub mod coords;
pub mod crop;
pub mod error;
pub mod fits;
pub mod header;
pub mod histogram;
pub mod projection;
pub mod range;
pub mod raster;
pub mod reproject;
pub mod stretch;
pub mod tile;
pub mod zscale;

#[cfg(feature = "array")]
pub mod array;

pub use block::BLOCK_SIZE;
pub use coords::{CoordSys, ImagePt, Point, ScreenPt, WorldPt};
pub use crop::{crop, crop_fits, crop_sky_circle, crop_source, PixelBox};
pub use error::{Error, ErrorKind, Result};
pub use fits::{parse_fits, read_raster, FitsFile, Hdu};
pub use header::ImageHeader;
pub use histogram::Histogram;
pub use projection::Projection;
pub use range::{CutMode, RangeValues, StretchAlgorithm};
pub use raster::{AnyRaster, Raster, Sample};
pub use reproject::{reproject, ReprojectOptions, ReprojectTarget, Reprojected, Resampling};
pub use stretch::{stretch, stretch_any, StretchOptions, Stretched};
pub use tile::TileSource;
pub use zscale::ZscaleParams;
