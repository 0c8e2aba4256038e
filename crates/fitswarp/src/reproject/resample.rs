//! Tie-point coordinate grids and pixel resampling.

use crate::raster::{Raster, Sample};

use super::Resampling;

/// Input pixel position of every column of one output row. NaN marks an
/// unmapped position.
type Line = Vec<(f64, f64)>;

/// Positions 0, stride, 2·stride, … with the last index always included.
fn tie_indices(n: usize, stride: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..n).step_by(stride.max(1)).collect();
    if n > 0 && idx.last() != Some(&(n - 1)) {
        idx.push(n - 1);
    }
    idx
}

fn lerp(a: (f64, f64), b: (f64, f64), t: f64) -> (f64, f64) {
    if a.0.is_nan() || b.0.is_nan() {
        return (f64::NAN, f64::NAN);
    }
    (a.0 + (b.0 - a.0) * t, a.1 + (b.1 - a.1) * t)
}

/// Exact positions at the tie columns of zero-based output row `y`,
/// linear in between. Returns the line and the number of tie points that
/// failed to map.
fn tie_line<F>(map: &F, y: usize, width: usize, stride: usize) -> (Line, usize)
where
    F: Fn(f64, f64) -> Option<(f64, f64)>,
{
    let mut line = vec![(f64::NAN, f64::NAN); width];
    let mut failed = 0;
    let ties = tie_indices(width, stride);
    let exact: Vec<(f64, f64)> = ties
        .iter()
        .map(|&x| {
            map(x as f64 + 1.0, y as f64 + 1.0).unwrap_or_else(|| {
                failed += 1;
                (f64::NAN, f64::NAN)
            })
        })
        .collect();
    for (k, &x0) in ties.iter().enumerate() {
        line[x0] = exact[k];
        if let Some(&x1) = ties.get(k + 1) {
            for x in x0 + 1..x1 {
                let t = (x - x0) as f64 / (x1 - x0) as f64;
                line[x] = lerp(exact[k], exact[k + 1], t);
            }
        }
    }
    (line, failed)
}

/// Input position for every output pixel, computed exactly on tie rows and
/// tie columns and interpolated elsewhere. `map` takes and returns 1-based
/// FITS pixels. `visit` receives each zero-based output row in order.
pub(super) fn for_each_row<F, V>(width: usize, height: usize, stride: usize, map: F, mut visit: V)
where
    F: Fn(f64, f64) -> Option<(f64, f64)>,
    V: FnMut(usize, &[(f64, f64)]),
{
    let rows = tie_indices(height, stride);
    let mut unmapped = 0;
    let mut upper: Option<(usize, Line)> = None;
    let mut scratch = vec![(f64::NAN, f64::NAN); width];

    for &y1 in &rows {
        let (line1, failed) = tie_line(&map, y1, width, stride);
        unmapped += failed;
        if let Some((y0, line0)) = &upper {
            for y in *y0 + 1..y1 {
                let t = (y - y0) as f64 / (y1 - y0) as f64;
                for (out, (a, b)) in scratch.iter_mut().zip(line0.iter().zip(&line1)) {
                    *out = lerp(*a, *b, t);
                }
                visit(y, &scratch);
            }
        }
        visit(y1, &line1);
        tracing::trace!(row = y1, "tie row mapped");
        upper = Some((y1, line1));
    }

    if unmapped > 0 {
        tracing::warn!(unmapped, "tie points outside the projection domain left blank");
    }
}

/// Nearest-neighbour physical value at 1-based input position (x, y).
pub(super) fn nearest<T: Sample>(src: &Raster<T>, x: f64, y: f64, bscale: f64, bzero: f64) -> f64 {
    if !x.is_finite() || !y.is_finite() {
        return f64::NAN;
    }
    let ix = (x - 0.5).floor();
    let iy = (y - 0.5).floor();
    if ix < 0.0 || iy < 0.0 {
        return f64::NAN;
    }
    src.get(ix as usize, iy as usize)
        .and_then(|v| src.physical(v, bscale, bzero))
        .unwrap_or(f64::NAN)
}

/// Bilinear physical value at 1-based input position (x, y).
///
/// Blank or out-of-range neighbours drop their weight and the rest is
/// renormalised. Below `min_weight` of surviving weight the result is NaN.
pub(super) fn bilinear<T: Sample>(
    src: &Raster<T>,
    x: f64,
    y: f64,
    min_weight: f64,
    bscale: f64,
    bzero: f64,
) -> f64 {
    let (w, h) = (src.width() as f64, src.height() as f64);
    if !(x >= min_weight && x <= w + 1.0 - min_weight && y >= min_weight && y <= h + 1.0 - min_weight)
    {
        return f64::NAN;
    }
    let (fx, fy) = (x - 1.0, y - 1.0);
    let (x0, y0) = (fx.floor(), fy.floor());
    let (xf, yf) = (fx - x0, fy - y0);

    let w11 = xf * yf;
    let w01 = yf - w11;
    let w10 = xf - w11;
    let w00 = 1.0 - yf - w10;

    let mut sum = 0.0;
    let mut weight = 0.0;
    for (dx, dy, wt) in [(0.0, 0.0, w00), (1.0, 0.0, w10), (0.0, 1.0, w01), (1.0, 1.0, w11)] {
        let (nx, ny) = (x0 + dx, y0 + dy);
        if nx < 0.0 || ny < 0.0 || wt == 0.0 {
            continue;
        }
        if let Some(v) = src
            .get(nx as usize, ny as usize)
            .and_then(|v| src.physical(v, bscale, bzero))
            .filter(|v| !v.is_nan())
        {
            sum += v * wt;
            weight += wt;
        }
    }
    if weight >= min_weight && weight > 0.0 {
        sum / weight
    } else {
        f64::NAN
    }
}

/// Fill a `width`×`height` float raster by sampling `src` at the positions
/// `map` gives.
#[allow(clippy::too_many_arguments)]
pub(super) fn resample<T, F>(
    src: &Raster<T>,
    bscale: f64,
    bzero: f64,
    width: usize,
    height: usize,
    stride: usize,
    resampling: Resampling,
    map: F,
) -> Vec<f32>
where
    T: Sample,
    F: Fn(f64, f64) -> Option<(f64, f64)>,
{
    let mut data = vec![f32::NAN; width * height];
    for_each_row(width, height, stride, map, |y, line| {
        let row = &mut data[y * width..(y + 1) * width];
        for (out, &(x, yy)) in row.iter_mut().zip(line) {
            let v = match resampling {
                Resampling::Nearest => nearest(src, x, yy, bscale, bzero),
                Resampling::Bilinear { min_weight } => {
                    bilinear(src, x, yy, min_weight, bscale, bzero)
                }
            };
            *out = v as f32;
        }
    });
    data
}
