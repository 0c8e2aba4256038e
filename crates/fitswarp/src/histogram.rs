//! Value histogram of a raster and the queries the stretch needs.
//!
//! The histogram works on raw sample values (before BSCALE/BZERO). Blank
//! samples and NaN are skipped. The bin range starts at the data range and
//! is narrowed once when the populated part of the histogram is too thin,
//! or widened once when too many samples fall outside it.

use crate::dispatch;
use crate::raster::{AnyRaster, Raster, Sample};

/// Number of regular bins.
pub const HIST_BINS: usize = 4096;
const HALF_BINS: usize = HIST_BINS / 2;
/// Fraction clipped from each end when judging the spread.
const CLIP_FRACTION: f64 = 0.0005;

/// 4096-bin histogram of raw sample values.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    // HIST_BINS + 1 slots; the last one holds values equal to the upper edge.
    counts: Vec<u64>,
    hist_min: f64,
    bin_size: f64,
    data_min: f64,
    data_max: f64,
    total: u64,
    large_bin_percent: f64,
}

struct Pass {
    counts: Vec<u64>,
    underflow: u64,
    overflow: u64,
    data_min: f64,
    data_max: f64,
}

fn bin_size(lo: f64, hi: f64) -> f64 {
    let size = (hi - lo) / HIST_BINS as f64;
    if size == 0.0 || !size.is_finite() {
        1.0
    } else {
        size
    }
}

fn fill<I: Iterator<Item = f64>>(samples: I, lo: f64, size: f64) -> Pass {
    let mut pass = Pass {
        counts: vec![0; HIST_BINS + 1],
        underflow: 0,
        overflow: 0,
        data_min: f64::INFINITY,
        data_max: f64::NEG_INFINITY,
    };
    for v in samples {
        let pos = (v - lo) / size;
        if pos < 0.0 {
            pass.underflow += 1;
        } else if pos >= (HIST_BINS + 1) as f64 {
            pass.overflow += 1;
        } else {
            pass.counts[pos as usize] += 1;
        }
        pass.data_min = pass.data_min.min(v);
        pass.data_max = pass.data_max.max(v);
    }
    pass
}

impl Histogram {
    /// Histogram of every finite, non-blank sample of `raster`, all planes
    /// included.
    ///
    /// `data_min` and `data_max` are raw-value hints for the initial bin
    /// range (from DATAMIN/DATAMAX); pass NaN to scan the data instead.
    pub fn new<T: Sample>(raster: &Raster<T>, data_min: f64, data_max: f64) -> Histogram {
        let samples = || {
            raster
                .flatten()
                .iter()
                .filter(|&&v| !raster.is_blank(v))
                .map(|&v| v.to_f64())
                .filter(|v| v.is_finite())
        };
        Self::build(samples, data_min, data_max)
    }

    pub fn from_any(raster: &AnyRaster, data_min: f64, data_max: f64) -> Histogram {
        dispatch!(raster, r => Histogram::new(r, data_min, data_max))
    }

    /// Histogram with hints taken from physical DATAMIN/DATAMAX keywords.
    pub fn with_physical_range(
        raster: &AnyRaster,
        datamin: f64,
        datamax: f64,
        bscale: f64,
        bzero: f64,
    ) -> Histogram {
        let raw = |d: f64| (d - bzero) / bscale;
        Self::from_any(raster, raw(datamin), raw(datamax))
    }

    fn build<I, F>(samples: F, hint_min: f64, hint_max: f64) -> Histogram
    where
        I: Iterator<Item = f64>,
        F: Fn() -> I,
    {
        let (mut lo, mut hi) = (hint_min, hint_max);
        if lo.is_nan() || hi.is_nan() {
            let (mn, mx) = samples().fold((f64::INFINITY, f64::NEG_INFINITY), |(a, b), v| {
                (a.min(v), b.max(v))
            });
            lo = mn;
            hi = mx;
        }
        if !lo.is_finite() || !hi.is_finite() {
            // nothing to count
            lo = 0.0;
            hi = 0.0;
        }

        let mut redone = false;
        let (pass, size) = loop {
            let size = bin_size(lo, hi);
            let pass = fill(samples(), lo, size);
            if redone {
                break (pass, size);
            }
            let n = pass.counts.iter().sum::<u64>() + pass.underflow + pass.overflow;
            let limit = n as f64 * 0.01;
            if pass.underflow as f64 > limit || pass.overflow as f64 > limit {
                tracing::debug!(
                    underflow = pass.underflow,
                    overflow = pass.overflow,
                    "histogram range missed samples, rebinning over data range"
                );
                lo = pass.data_min;
                hi = pass.data_max;
                redone = true;
                continue;
            }
            match spread(&pass.counts) {
                Some((min_idx, max_idx)) if max_idx - min_idx < HALF_BINS as i64 => {
                    hi = max_idx as f64 * size + lo;
                    lo += min_idx as f64 * size;
                    tracing::debug!(lo, hi, "histogram narrow, rebinning clipped range");
                    redone = true;
                }
                _ => break (pass, size),
            }
        };

        let total = pass.counts.iter().sum();
        let (data_min, data_max) = if total == 0 && pass.underflow + pass.overflow == 0 {
            (0.0, 0.0)
        } else {
            (pass.data_min, pass.data_max)
        };
        let large_bin_percent = large_bin_percent(&pass.counts);
        Histogram {
            counts: pass.counts,
            hist_min: lo,
            bin_size: size,
            data_min,
            data_max,
            total,
            large_bin_percent,
        }
    }

    /// Bin counts, `HIST_BINS + 1` entries.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Smallest counted raw value.
    pub fn min(&self) -> f64 {
        self.data_min
    }

    /// Largest counted raw value.
    pub fn max(&self) -> f64 {
        self.data_max
    }

    /// Number of samples inside the bins.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn bin_size(&self) -> f64 {
        self.bin_size
    }

    /// Fraction of bins holding more than 40% of the fullest bin's count.
    pub fn large_bin_percent(&self) -> f64 {
        self.large_bin_percent
    }

    /// Raw value at percentile `pct` (99.0 is 99%). `round_up` takes the
    /// upper edge of the bin instead of the lower one.
    pub fn pct(&self, pct: f64, round_up: bool) -> f64 {
        if pct == 0.0 {
            return self.data_min;
        }
        if pct == 100.0 {
            return self.data_max;
        }
        if self.total == 0 {
            return 0.0;
        }
        let goal = (self.total as f64 * pct / 100.0) as u64;
        let mut sum = 0;
        let mut i = 0;
        for (idx, &c) in self.counts.iter().enumerate() {
            i = idx;
            sum += c;
            if sum >= goal {
                break;
            }
        }
        let edge = if round_up { i + 1 } else { i };
        edge as f64 * self.bin_size + self.hist_min
    }

    /// Raw value `sigma` standard deviations from the median, where the
    /// deviation is estimated from the 16th and 84th percentiles.
    pub fn sigma(&self, sigma: f64, round_up: bool) -> f64 {
        let lev16 = self.pct(16.0, round_up);
        let lev50 = self.pct(50.0, round_up);
        let lev84 = self.pct(84.0, round_up);
        lev50 + sigma * (lev84 - lev16) / 2.0
    }

    /// Lower edge of bin `bin`.
    pub fn dn_from_bin(&self, bin: usize) -> f64 {
        bin as f64 * self.bin_size + self.hist_min
    }

    /// Bin of raw value `dn`, clamped to `0..HIST_BINS`.
    pub fn bin_from_dn(&self, dn: f64) -> usize {
        let bin = ((dn - self.hist_min) / self.bin_size).floor();
        if bin.is_nan() || bin < 0.0 {
            0
        } else {
            (bin as usize).min(HIST_BINS - 1)
        }
    }

    pub fn bin_from_pct(&self, pct: f64, round_up: bool) -> usize {
        self.bin_from_dn(self.pct(pct, round_up))
    }

    pub fn bin_from_sigma(&self, sigma: f64, round_up: bool) -> usize {
        self.bin_from_dn(self.sigma(sigma, round_up))
    }

    /// Physical value of the lower edge of every bin.
    pub fn mean_bin_values(&self, bscale: f64, bzero: f64) -> Vec<f64> {
        (0..self.counts.len())
            .map(|i| self.dn_from_bin(i) * bscale + bzero)
            .collect()
    }

    /// Raw values splitting the samples into 255 equally populated parts.
    /// Entry 255 is `f64::MAX`.
    pub fn equalization_table(&self) -> [f64; 256] {
        let mut tbl = [0.0; 256];
        let step = self.total as f64 / 255.0;
        tbl[0] = self.hist_min;
        let mut next = 1;
        let mut goal = step;
        let mut bin = 0;
        let mut accum = 0u64;
        while bin < HIST_BINS && next < 255 {
            if accum as f64 >= goal {
                tbl[next] = self.dn_from_bin(bin);
                next += 1;
                goal += step;
            } else {
                accum += self.counts[bin];
                bin += 1;
            }
        }
        let last = self.dn_from_bin(bin);
        for entry in &mut tbl[next..255] {
            *entry = last;
        }
        tbl[255] = f64::MAX;
        tbl
    }
}

// Bin indices left after clipping CLIP_FRACTION of the samples off each
// end: (first kept, one past the last kept).
fn spread(counts: &[u64]) -> Option<(i64, i64)> {
    let good: u64 = counts[..HIST_BINS].iter().sum();
    let limit = (good as f64 * CLIP_FRACTION) as u64;

    let mut high = 0;
    let max_idx = counts.iter().enumerate().rev().find_map(|(i, &c)| {
        high += c;
        (high > limit).then_some(i as i64 + 1)
    })?;
    let mut low = 0;
    let min_idx = counts[..HIST_BINS].iter().enumerate().find_map(|(i, &c)| {
        low += c;
        (low > limit).then_some(i as i64)
    })?;
    Some((min_idx, max_idx))
}

fn large_bin_percent(counts: &[u64]) -> f64 {
    let fullest = counts.iter().copied().max().unwrap_or(0);
    let marker = (fullest as f64 * 0.4) as u64;
    let large = counts.iter().filter(|&&c| c > marker).count();
    large as f64 / counts.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp(n: usize) -> Raster<f32> {
        let data = (0..n * n).map(|i| i as f32).collect();
        Raster::from_plane(n, n, data, None).unwrap()
    }

    #[test]
    fn counts_every_sample_once() {
        let h = Histogram::new(&ramp(64), f64::NAN, f64::NAN);
        assert_eq!(h.total(), 64 * 64);
        assert_eq!(h.counts().len(), HIST_BINS + 1);
        assert_eq!(h.min(), 0.0);
        assert_eq!(h.max(), 4095.0);
    }

    #[test]
    fn skips_blank_and_nan() {
        let r = Raster::from_plane(3, 1, vec![1i16, -5, 9], Some(-5)).unwrap();
        let h = Histogram::new(&r, f64::NAN, f64::NAN);
        assert_eq!(h.total(), 2);
        assert_eq!((h.min(), h.max()), (1.0, 9.0));

        let r = Raster::from_plane(3, 1, vec![f32::NAN, 2.0, 4.0], None).unwrap();
        let h = Histogram::new(&r, f64::NAN, f64::NAN);
        assert_eq!(h.total(), 2);
    }

    #[test]
    fn infinities_do_not_empty_the_bins() {
        // 5% of the samples are infinite, well over the rebin threshold
        let mut data: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        for v in data.iter_mut().step_by(20) {
            *v = f32::INFINITY;
        }
        data[1] = f32::NEG_INFINITY;
        let r = Raster::from_plane(100, 10, data, None).unwrap();
        let h = Histogram::new(&r, f64::NAN, f64::NAN);
        assert_eq!(h.total(), 1000 - 50 - 1);
        assert!(h.max().is_finite() && h.min().is_finite());
        let median = h.pct(50.0, false);
        assert!((400.0..600.0).contains(&median), "median = {median}");
        assert!(h.pct(99.0, true) > h.pct(1.0, false));
    }

    #[test]
    fn all_blank_is_empty() {
        let r = Raster::from_plane(2, 2, vec![7i16; 4], Some(7)).unwrap();
        let h = Histogram::new(&r, f64::NAN, f64::NAN);
        assert_eq!(h.total(), 0);
        assert_eq!(h.pct(1.0, false), 0.0);
        assert_eq!(h.pct(99.0, true), 0.0);
        assert_eq!(h.pct(100.0, true), 0.0);
    }

    #[test]
    fn percentiles_of_uniform_ramp() {
        let h = Histogram::new(&ramp(64), f64::NAN, f64::NAN);
        assert_abs_diff_eq!(h.pct(50.0, false), 2047.0, epsilon = 2.0);
        assert_abs_diff_eq!(h.pct(1.0, false), 40.0, epsilon = 2.0);
        assert_abs_diff_eq!(h.pct(99.0, true), 4055.0, epsilon = 2.0);
        assert_eq!(h.pct(0.0, false), 0.0);
        assert_eq!(h.pct(100.0, true), 4095.0);
        assert!(h.pct(10.0, true) > h.pct(10.0, false));
    }

    #[test]
    fn sigma_is_centered_on_median() {
        let h = Histogram::new(&ramp(64), f64::NAN, f64::NAN);
        assert_abs_diff_eq!(h.sigma(0.0, false), h.pct(50.0, false), epsilon = 1e-9);
        assert!(h.sigma(2.0, true) > h.sigma(-2.0, false));
    }

    #[test]
    fn narrow_data_is_rebinned() {
        // One far outlier squeezes everything else into a few bins.
        let mut data = vec![0.0f32; 10_000];
        for (i, v) in data.iter_mut().enumerate() {
            *v = (i % 100) as f32;
        }
        data[0] = 1.0e6;
        let r = Raster::from_plane(100, 100, data, None).unwrap();
        let h = Histogram::new(&r, f64::NAN, f64::NAN);
        assert!(h.bin_size() < 1.0e6 / HIST_BINS as f64);
        assert_eq!(h.max(), 1.0e6);
        assert_abs_diff_eq!(h.pct(50.0, false), 49.0, epsilon = 1.0);
    }

    #[test]
    fn bad_hints_fall_back_to_data_range() {
        let h = Histogram::new(&ramp(16), 1000.0, 2000.0);
        assert_eq!(h.total(), 256);
        assert_eq!((h.min(), h.max()), (0.0, 255.0));
    }

    #[test]
    fn physical_hints_are_converted() {
        let r: AnyRaster = Raster::from_plane(16, 16, (0..256).map(|v| v as i16).collect(), None)
            .unwrap()
            .into();
        let h = Histogram::with_physical_range(&r, 10.0, 520.0, 2.0, 10.0);
        assert_eq!(h.total(), 256);
        assert_abs_diff_eq!(h.dn_from_bin(0), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn bin_lookups_clamp() {
        let h = Histogram::new(&ramp(64), f64::NAN, f64::NAN);
        assert_eq!(h.bin_from_dn(-100.0), 0);
        assert_eq!(h.bin_from_dn(1.0e9), HIST_BINS - 1);
        let b = h.bin_from_dn(1000.0);
        assert!(h.dn_from_bin(b) <= 1000.0 && h.dn_from_bin(b + 1) > 1000.0);
        assert!(h.bin_from_pct(90.0, false) > h.bin_from_pct(10.0, false));
        assert!(h.bin_from_sigma(1.0, false) > h.bin_from_sigma(-1.0, false));
    }

    #[test]
    fn mean_bin_values_are_physical() {
        let h = Histogram::new(&ramp(64), f64::NAN, f64::NAN);
        let means = h.mean_bin_values(2.0, 100.0);
        assert_eq!(means.len(), HIST_BINS + 1);
        assert_abs_diff_eq!(means[10], h.dn_from_bin(10) * 2.0 + 100.0, epsilon = 1e-9);
    }

    #[test]
    fn equalization_table_is_monotone() {
        let h = Histogram::new(&ramp(64), f64::NAN, f64::NAN);
        let tbl = h.equalization_table();
        assert_eq!(tbl[0], h.dn_from_bin(0));
        assert_eq!(tbl[255], f64::MAX);
        assert!(tbl.windows(2).all(|w| w[0] <= w[1]));
        // uniform data: table is close to linear
        assert_abs_diff_eq!(tbl[128], 128.0 * 4096.0 / 255.0, epsilon = 20.0);
    }

    #[test]
    fn large_bins_of_flat_histogram() {
        let h = Histogram::new(&ramp(64), f64::NAN, f64::NAN);
        assert!(h.large_bin_percent() > 0.9);
    }
}
