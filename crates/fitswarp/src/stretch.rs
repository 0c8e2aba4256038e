//! Raw pixel values to 8-bit display values.
//!
//! A stretch runs in three steps:
//!
//! 1. Find the low and high cut levels (raw values) from the
//!    [`RangeValues`] modes, using the [`Histogram`] or zscale.
//! 2. Map each non-blank value through the curve to a byte in `0..=254`.
//! 3. Apply bias and contrast.
//!
//! Blank samples (BLANK for integer kinds, NaN for float kinds) always map
//! to [`BLANK_BYTE`], or to 0 with [`StretchOptions::map_blank_to_zero`].
//!
//! Integer kinds go through a 256-entry table of curve breakpoints that is
//! searched by successive halving. Float kinds evaluate the curve directly.

use crate::dispatch;
use crate::header::ImageHeader;
use crate::histogram::{Histogram, HIST_BINS};
use crate::range::{CutMode, RangeValues, StretchAlgorithm};
use crate::raster::{AnyRaster, Raster, Sample};
use crate::zscale::zscale;

/// Display byte of a blank sample.
pub const BLANK_BYTE: u8 = 255;
/// Largest byte a non-blank sample can map to.
pub const MAX_BYTE: u8 = 254;

/// Output tweaks that do not change the curve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StretchOptions {
    /// Blank samples become 0 instead of [`BLANK_BYTE`].
    pub map_blank_to_zero: bool,
}

/// Result of a stretch.
#[derive(Debug, Clone, PartialEq)]
pub struct Stretched {
    /// One byte per sample, same order as the raster.
    pub pixels: Vec<u8>,
    /// Count of each output byte over non-blank samples; entry 255 is
    /// always 0.
    pub screen_histogram: [u32; 256],
    /// Low cut level, raw.
    pub low: f64,
    /// High cut level, raw.
    pub high: f64,
}

// ── Cut levels ──

fn raw_from_physical(v: f64, header: &ImageHeader) -> f64 {
    (v - header.bzero) / header.bscale
}

/// Histogram with DATAMIN/DATAMAX of `header` as range hints.
pub fn histogram_for<T: Sample>(raster: &Raster<T>, header: &ImageHeader) -> Histogram {
    Histogram::new(
        raster,
        raw_from_physical(header.datamin, header),
        raw_from_physical(header.datamax, header),
    )
}

/// Low and high cut levels as raw values.
///
/// `hist` is computed from `raster` when a mode needs it and none is
/// given. An image without usable samples gives (0, 0) for every mode but
/// [`CutMode::Absolute`].
pub fn cut_levels<T: Sample>(
    raster: &Raster<T>,
    header: &ImageHeader,
    hist: Option<&Histogram>,
    range: &RangeValues,
) -> (f64, f64) {
    let owned;
    let hist = match hist {
        Some(h) => Some(h),
        None if range.uses_histogram() => {
            owned = histogram_for(raster, header);
            Some(&owned)
        }
        None => None,
    };
    let z = if range.uses_zscale() {
        zscale(raster, &range.zscale)
    } else {
        None
    };

    let level = |mode: CutMode, value: f64, upper: bool| -> f64 {
        match (mode, hist) {
            (CutMode::Absolute, _) => raw_from_physical(value, header),
            (CutMode::Zscale, _) => z.map_or(0.0, |(z1, z2)| if upper { z2 } else { z1 }),
            (CutMode::Percentage, Some(h)) => h.pct(value, upper),
            (CutMode::Sigma, Some(h)) => h.sigma(value, upper),
            (CutMode::MaxMin, Some(h)) => h.pct(if upper { 100.0 } else { 0.0 }, upper),
            (_, None) => 0.0,
        }
    };
    let low = level(range.lower_mode, range.lower_value, false);
    let high = level(range.upper_mode, range.upper_value, true);
    tracing::debug!(low, high, algorithm = ?range.algorithm, "cut levels");
    (low, high)
}

// ── Curves ──

// Normalised position t in [0, 1] to byte position s in [0, 1].
fn forward(alg: StretchAlgorithm, t: f64) -> f64 {
    match alg {
        StretchAlgorithm::Log => (1.0 + 9.0 * t).log10(),
        StretchAlgorithm::LogLog => (1.0 + 9.0 * (1.0 + 9.0 * t).log10()).log10(),
        StretchAlgorithm::Squared => t * t,
        StretchAlgorithm::Sqrt => t.sqrt(),
        _ => t,
    }
}

// Inverse of `forward`: byte position to normalised position.
fn inverse(alg: StretchAlgorithm, s: f64) -> f64 {
    match alg {
        StretchAlgorithm::Log => (10f64.powf(s) - 1.0) / 9.0,
        StretchAlgorithm::LogLog => (10f64.powf((10f64.powf(s) - 1.0) / 9.0) - 1.0) / 9.0,
        StretchAlgorithm::Squared => s.sqrt(),
        StretchAlgorithm::Sqrt => s * s,
        _ => s,
    }
}

/// Breakpoints of a curve: entry `j` is the raw value where byte `j`
/// starts. Entry 254 is the high cut and entry 255 lies past every value.
fn curve_table(alg: StretchAlgorithm, low: f64, sdiff: f64) -> [f64; 256] {
    let mut tbl = [0.0; 256];
    for (j, entry) in tbl.iter_mut().enumerate().take(255) {
        *entry = low + sdiff * inverse(alg, j as f64 / 254.0);
    }
    tbl[254] = low + sdiff;
    tbl[255] = if sdiff < 0.0 { f64::MIN } else { f64::MAX };
    tbl
}

/// Largest byte whose breakpoint `v` has reached, found by halving.
fn lookup(tbl: &[f64; 256], v: f64, descending: bool) -> u8 {
    let reached = |t: f64| if descending { t >= v } else { t <= v };
    let mut j = 0usize;
    let mut step = 128;
    while step > 0 {
        if j + step < 255 && reached(tbl[j + step]) {
            j += step;
        }
        step >>= 1;
    }
    j as u8
}

fn asinh_q(q: f64) -> f64 {
    if q < 1e-10 {
        0.1
    } else if q > 1e10 {
        1e10
    } else {
        q
    }
}

enum Curve {
    Table { tbl: [f64; 256], descending: bool },
    Direct(StretchAlgorithm),
    Asinh { min: f64, max: f64, beta: f64 },
    Gamma { gamma: f64 },
}

/// Cut levels plus curve, ready to map raw values.
struct Mapper {
    low: f64,
    high: f64,
    sdiff: f64,
    bscale: f64,
    bzero: f64,
    curve: Curve,
    range: RangeValues,
}

impl Mapper {
    fn new(
        low: f64,
        high: f64,
        range: &RangeValues,
        hist: Option<&Histogram>,
        tabulate: bool,
        header: &ImageHeader,
    ) -> Mapper {
        let sdiff = if high == low { 1.0 } else { high - low };
        let alg = range.algorithm;
        let curve = match alg {
            StretchAlgorithm::Asinh => Curve::Asinh {
                min: low * header.bscale + header.bzero,
                max: high * header.bscale + header.bzero,
                beta: asinh_q(range.asinh_q),
            },
            StretchAlgorithm::PowerLawGamma => Curve::Gamma { gamma: range.gamma },
            StretchAlgorithm::Equal => match hist {
                Some(h) => Curve::Table {
                    tbl: h.equalization_table(),
                    descending: false,
                },
                None => Curve::Direct(StretchAlgorithm::Linear),
            },
            _ if tabulate => Curve::Table {
                tbl: curve_table(alg, low, sdiff),
                descending: sdiff < 0.0,
            },
            _ => Curve::Direct(alg),
        };
        Mapper {
            low,
            high,
            sdiff,
            bscale: header.bscale,
            bzero: header.bzero,
            curve,
            range: *range,
        }
    }

    /// Byte for a non-blank raw value, bias and contrast included.
    fn map(&self, v: f64) -> u8 {
        let b = match &self.curve {
            Curve::Table { tbl, descending } => lookup(tbl, v, *descending),
            Curve::Direct(alg) => {
                let t = (v - self.low) / self.sdiff;
                if t <= 0.0 {
                    0
                } else if t >= 1.0 {
                    MAX_BYTE
                } else {
                    (forward(*alg, t) * 254.0).clamp(0.0, 254.0) as u8
                }
            }
            Curve::Asinh { min, max, beta } => {
                let flux = v * self.bscale + self.bzero;
                if flux <= *min {
                    0
                } else if flux >= *max {
                    MAX_BYTE
                } else {
                    let s = ((flux - min) / beta).asinh() / ((max - min) / beta).asinh();
                    (255.0 * s).clamp(0.0, 254.0) as u8
                }
            }
            Curve::Gamma { gamma } => {
                if v <= self.low {
                    0
                } else if v >= self.high {
                    MAX_BYTE
                } else {
                    let s = ((v - self.low) / (self.high - self.low)).powf(1.0 / gamma);
                    (255.0 * s).clamp(0.0, 254.0) as u8
                }
            }
        };
        self.range.bias_and_contrast(b)
    }
}

// ── Stretch ──

/// Stretch every sample of `raster`.
pub fn stretch<T: Sample>(
    raster: &Raster<T>,
    header: &ImageHeader,
    range: &RangeValues,
    opts: &StretchOptions,
) -> Stretched {
    let hist = range.uses_histogram().then(|| histogram_for(raster, header));
    stretch_inner(raster, header, hist.as_ref(), range, opts)
}

/// Stretch with a histogram computed earlier for the same raster.
pub fn stretch_with_histogram<T: Sample>(
    raster: &Raster<T>,
    header: &ImageHeader,
    hist: &Histogram,
    range: &RangeValues,
    opts: &StretchOptions,
) -> Stretched {
    stretch_inner(raster, header, Some(hist), range, opts)
}

pub fn stretch_any(
    raster: &AnyRaster,
    header: &ImageHeader,
    range: &RangeValues,
    opts: &StretchOptions,
) -> Stretched {
    dispatch!(raster, r => stretch(r, header, range, opts))
}

fn stretch_inner<T: Sample>(
    raster: &Raster<T>,
    header: &ImageHeader,
    hist: Option<&Histogram>,
    range: &RangeValues,
    opts: &StretchOptions,
) -> Stretched {
    let (low, high) = cut_levels(raster, header, hist, range);
    let mapper = Mapper::new(low, high, range, hist, !T::IS_FLOAT, header);
    let blank = if opts.map_blank_to_zero { 0 } else { BLANK_BYTE };

    let mut screen_histogram = [0u32; 256];
    let pixels = raster
        .flatten()
        .iter()
        .map(|&v| {
            if raster.is_blank(v) {
                return blank;
            }
            let x = v.to_f64();
            if x.is_nan() {
                return blank;
            }
            let b = mapper.map(x);
            screen_histogram[b as usize] += 1;
            b
        })
        .collect();

    Stretched {
        pixels,
        screen_histogram,
        low,
        high,
    }
}

/// Display byte of the lower edge of every histogram bin, for colouring a
/// histogram plot. `low` and `high` are the cut levels of the stretch.
pub fn hist_colors(
    hist: &Histogram,
    range: &RangeValues,
    low: f64,
    high: f64,
    header: &ImageHeader,
) -> Vec<u8> {
    let mapper = Mapper::new(low, high, range, Some(hist), false, header);
    (0..HIST_BINS)
        .map(|bin| {
            let v = hist.dn_from_bin(bin);
            if v.is_nan() {
                0
            } else {
                mapper.map(v)
            }
        })
        .collect()
}

/// Population standard deviation of the finite, non-zero physical values
/// of `raster`; 1.0 when there are fewer than six.
pub fn compute_sigma<T: Sample>(raster: &Raster<T>, bscale: f64, bzero: f64) -> f64 {
    let values: Vec<f64> = raster
        .flatten()
        .iter()
        .filter_map(|&v| raster.physical(v, bscale, bzero))
        .filter(|v| v.is_finite() && *v != 0.0)
        .collect();
    if values.len() < 6 {
        return 1.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    var.sqrt()
}
