//! Zscale display range.
//!
//! A grid subsample of the image is sorted and a straight line is fitted
//! to it with iterative k-sigma rejection. The fitted slope, divided by the
//! contrast, gives a range around the median that favours the background
//! over bright sources.

use crate::raster::{Raster, Sample};

const MIN_NPIXELS: usize = 5;
const MAX_REJECT: f64 = 0.5;
const KREJ: f64 = 2.5;
const MAX_ITERATIONS: usize = 5;

/// Tuning of the zscale algorithm.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ZscaleParams {
    /// Contrast in percent; the fitted slope is divided by `contrast / 100`.
    pub contrast: f64,
    /// Desired number of samples.
    pub samples: usize,
    /// Desired number of samples per image line.
    pub samples_per_line: usize,
}

impl Default for ZscaleParams {
    fn default() -> Self {
        ZscaleParams {
            contrast: 25.0,
            samples: 600,
            samples_per_line: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
    Good,
    Bad,
    // flagged by a neighbour, still thresholded on its own
    Reject,
}

#[derive(Debug, Clone, Copy)]
struct Fit {
    good: usize,
    slope: f64,
}

/// Raw-value range (z1, z2) of the first plane of `raster`.
///
/// Returns `None` when the plane holds no usable sample.
pub fn zscale<T: Sample>(raster: &Raster<T>, params: &ZscaleParams) -> Option<(f64, f64)> {
    let mut sample = sample_image(raster, params.samples, params.samples_per_line);
    sample.retain(|v| v.is_finite());
    if sample.is_empty() {
        // too small to grid-sample
        sample = plane_values(raster).collect();
        if sample.is_empty() {
            return None;
        }
    }
    sample.sort_by(f64::total_cmp);

    let npix = sample.len();
    let (zmin, zmax) = (sample[0], sample[npix - 1]);
    let center = ((npix + 1) / 2).max(1);
    let left = center - 1;
    let median = if npix % 2 == 1 || center >= npix {
        sample[left]
    } else {
        (sample[left] + sample[left + 1]) / 2.0
    };

    let minpix = MIN_NPIXELS.max((npix as f64 * MAX_REJECT) as usize);
    let grow = ((npix as f64 * 0.01).round() as usize).max(1);
    let fit = fit_line(&sample, KREJ, grow, MAX_ITERATIONS);

    let range = if fit.good < minpix {
        (zmin, zmax)
    } else {
        let contrast = params.contrast / 100.0;
        let slope = if contrast > 0.0 { fit.slope / contrast } else { fit.slope };
        (
            zmin.max(median - (center - 1) as f64 * slope),
            zmax.min(median + (npix - center) as f64 * slope),
        )
    };
    tracing::debug!(
        npix,
        good = fit.good,
        median,
        z1 = range.0,
        z2 = range.1,
        "zscale"
    );
    Some(range)
}

fn plane_values<T: Sample>(raster: &Raster<T>) -> impl Iterator<Item = f64> + '_ {
    let n = raster.width() * raster.height();
    raster.flatten()[..n]
        .iter()
        .map(move |&v| if raster.is_blank(v) { f64::NAN } else { v.to_f64() })
        .filter(|v| v.is_finite())
}

/// Evenly gridded subsample of the first plane; blank samples are NaN.
fn sample_image<T: Sample>(raster: &Raster<T>, optimal: usize, per_line: usize) -> Vec<f64> {
    let (nx, ny) = (raster.width(), raster.height());
    if nx == 0 || ny == 0 {
        return Vec::new();
    }
    let per_line = per_line.max(1);

    let opt_per_line = nx.min(per_line).max(1);
    let col_step = nx.div_ceil(opt_per_line).max(2);
    let npix_per_line = nx.div_ceil(col_step).max(1);

    let min_lines = (optimal / per_line).max(1);
    let opt_lines = min_lines.max(ny.min(optimal.div_ceil(npix_per_line)));
    let line_step = (ny / opt_lines).max(2);

    let mut sample = Vec::with_capacity(npix_per_line * ny.div_ceil(line_step));
    // 1-based line numbers
    for line in ((line_step + 1) / 2..ny).step_by(line_step) {
        let start = (line - 1) * nx;
        let row = &raster.flatten()[start..start + nx];
        sample.extend(row.iter().step_by(col_step).take(npix_per_line).map(|&v| {
            if raster.is_blank(v) {
                f64::NAN
            } else {
                v.to_f64()
            }
        }));
    }
    sample
}

// Fit a line to sorted `data` over x normalised to [-1, 1], rejecting
// points further than `krej` sigma and `grow` neighbours of each rejected
// point. The slope is returned per sample index.
fn fit_line(data: &[f64], krej: f64, grow: usize, max_iter: usize) -> Fit {
    let npix = data.len();
    if npix <= 1 {
        return Fit {
            good: npix,
            slope: 0.0,
        };
    }
    let xscale = 2.0 / (npix - 1) as f64;
    let normx: Vec<f64> = (0..npix).map(|i| i as f64 * xscale - 1.0).collect();
    let mut flags = vec![Flag::Good; npix];

    let mut sumxsqr: f64 = normx.iter().map(|x| x * x).sum();
    let mut sumxz: f64 = normx.iter().zip(data).map(|(x, z)| x * z).sum();
    let mut sumx = 0.0;
    let mut sumz: f64 = data.iter().sum();

    let mut z0 = sumz / npix as f64;
    let mut dz = sumxz / sumxsqr;
    let first_dz = dz;

    let mut good = npix;
    let minpix = MIN_NPIXELS.max((npix as f64 * MAX_REJECT) as usize);
    for _ in 0..max_iter {
        let last_good = good;
        let flat: Vec<f64> = data
            .iter()
            .zip(&normx)
            .map(|(z, x)| z - (x * dz + z0))
            .collect();

        let Some(sigma) = flat_sigma(&flat, &flags) else {
            break;
        };
        let threshold = sigma * krej;

        good = npix;
        for i in 0..npix {
            if flags[i] == Flag::Bad {
                good -= 1;
                continue;
            }
            if flat[i].abs() <= threshold {
                continue;
            }
            for j in i.saturating_sub(grow)..(i + grow).min(npix) {
                if flags[j] == Flag::Bad {
                    continue;
                }
                if j <= i {
                    let (x, z) = (normx[j], data[j]);
                    sumxsqr -= x * x;
                    sumxz -= z * x;
                    sumx -= x;
                    sumz -= z;
                    flags[j] = Flag::Bad;
                    good -= 1;
                } else {
                    flags[j] = Flag::Reject;
                }
            }
        }

        if good > 0 {
            let rowrat = sumx / sumxsqr;
            z0 = (sumz - rowrat * sumxz) / (good as f64 - rowrat * sumx);
            dz = (sumxz - z0 * sumx) / sumxsqr;
        }
        if good >= last_good || good < minpix {
            break;
        }
    }

    let mut slope = dz * xscale;
    if slope.abs() < 0.001 {
        slope = first_dz * xscale;
    }
    Fit { good, slope }
}

// Standard deviation of the residuals of good points; `None` below two.
fn flat_sigma(flat: &[f64], flags: &[Flag]) -> Option<f64> {
    let (n, sum, sumsq) = flat
        .iter()
        .zip(flags)
        .filter(|(_, f)| **f == Flag::Good)
        .fold((0usize, 0.0, 0.0), |(n, s, ss), (v, _)| (n + 1, s + v, ss + v * v));
    if n < 2 {
        return None;
    }
    let n = n as f64;
    let var = sumsq / (n - 1.0) - sum * sum / (n * (n - 1.0));
    Some(if var < 0.0 { 0.0 } else { var.sqrt() })
}
