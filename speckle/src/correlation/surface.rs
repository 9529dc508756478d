//! Masked normalized cross-correlation.

use super::window::{ReferenceRegion, Window};
use crate::interpolation::interpolate_bicubic;

/// Relative variance below which a patch is considered flat.
const FLAT_VARIANCE: f64 = 1e-12;

/// Correlation values for every integer placement of a window inside a
/// reference region, row-major. `NaN` marks placements with too few
/// overlapping valid pixels.
#[derive(Debug, Clone)]
pub(crate) struct Surface {
    pub width: usize,
    pub height: usize,
    pub values: Vec<f64>,
}

impl Surface {
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.values[y * self.width + x]
    }

    /// Value at signed coordinates, `None` outside or undefined.
    #[inline]
    pub fn try_get(&self, x: isize, y: isize) -> Option<f64> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        let v = self.get(x as usize, y as usize);
        v.is_finite().then_some(v)
    }

    /// First maximum in row-major order.
    pub fn argmax(&self) -> Option<(usize, usize, f64)> {
        let mut best: Option<(usize, usize, f64)> = None;
        for y in 0..self.height {
            for x in 0..self.width {
                let v = self.get(x, y);
                if v.is_finite() && best.is_none_or(|(_, _, b)| v > b) {
                    best = Some((x, y, v));
                }
            }
        }
        best
    }

    /// Highest interior local maximum (8-neighborhood) further than
    /// `exclusion` pixels (Chebyshev) from `(px, py)`.
    pub fn secondary_peak(&self, px: usize, py: usize, exclusion: usize) -> Option<f64> {
        let mut best: Option<f64> = None;
        for y in 0..self.height {
            for x in 0..self.width {
                if x.abs_diff(px).max(y.abs_diff(py)) <= exclusion {
                    continue;
                }
                let v = self.get(x, y);
                if !v.is_finite() || best.is_some_and(|b| v <= b) {
                    continue;
                }
                if self.is_local_max(x, y, v) {
                    best = Some(v);
                }
            }
        }
        best
    }

    fn is_local_max(&self, x: usize, y: usize, v: f64) -> bool {
        for dy in -1..=1isize {
            for dx in -1..=1isize {
                if dx == 0 && dy == 0 {
                    continue;
                }
                match self.try_get(x as isize + dx, y as isize + dy) {
                    Some(n) if n <= v => {}
                    _ => return false,
                }
            }
        }
        true
    }
}

/// Running sums for one window/reference overlap.
///
/// Samples are accumulated relative to the first pair added, so a large
/// common pedestal does not cancel out the variance.
#[derive(Default)]
struct Moments {
    n: usize,
    w0: f64,
    r0: f64,
    sw: f64,
    sr: f64,
    sww: f64,
    srr: f64,
    swr: f64,
}

impl Moments {
    #[inline]
    fn add(&mut self, w: f64, r: f64) {
        if self.n == 0 {
            self.w0 = w;
            self.r0 = r;
        }
        let (w, r) = (w - self.w0, r - self.r0);
        self.n += 1;
        self.sw += w;
        self.sr += r;
        self.sww += w * w;
        self.srr += r * r;
        self.swr += w * r;
    }

    /// Centred sum of squares and the raw energy it is judged against.
    fn spread(&self, sum: f64, sum_sq: f64, origin: f64) -> (f64, f64) {
        let n = self.n as f64;
        let var = (sum_sq - sum * sum / n).max(0.0);
        let mean = origin + sum / n;
        (var, var + n * mean * mean)
    }

    fn window_spread(&self) -> (f64, f64) {
        self.spread(self.sw, self.sww, self.w0)
    }

    fn reference_spread(&self) -> (f64, f64) {
        self.spread(self.sr, self.srr, self.r0)
    }

    fn ncc(&self, min_valid: usize) -> Option<f64> {
        if self.n < min_valid || self.n == 0 {
            return None;
        }
        let (var_w, energy_w) = self.window_spread();
        let (var_r, energy_r) = self.reference_spread();
        if is_flat(var_w, energy_w) {
            return None;
        }
        if is_flat(var_r, energy_r) {
            return Some(0.0);
        }
        let cov = self.swr - self.sw * self.sr / self.n as f64;
        Some((cov / (var_w * var_r).sqrt()).clamp(-1.0, 1.0))
    }
}

#[inline]
fn is_flat(var: f64, energy: f64) -> bool {
    var <= FLAT_VARIANCE * energy.max(f64::MIN_POSITIVE)
}

/// Whether the window's valid pixels carry any contrast.
pub(crate) fn has_contrast(window: &Window) -> bool {
    let mut m = Moments::default();
    for j in 0..window.height {
        for i in 0..window.width {
            if window.is_valid(i, j) {
                let v = window.value(i, j);
                m.add(v, v);
            }
        }
    }
    m.n > 0 && {
        let (var, energy) = m.window_spread();
        !is_flat(var, energy)
    }
}

/// Correlation with the window's top-left pixel at integer reference
/// position `(px, py)`. The placement must lie inside the reference.
fn ncc_integer(window: &Window, region: &ReferenceRegion, px: usize, py: usize, min_valid: usize) -> Option<f64> {
    let image = region.image();
    let mut m = Moments::default();
    for j in 0..window.height {
        for i in 0..window.width {
            if window.is_valid(i, j) && region.is_valid_at(px + i, py + j) {
                m.add(window.value(i, j), image[(px + i, py + j)] as f64);
            }
        }
    }
    m.ncc(min_valid)
}

/// Full integer correlation surface over the region.
///
/// The caller checks `region.fits(window dims)` first.
pub(crate) fn correlation_surface(window: &Window, region: &ReferenceRegion, min_valid: usize) -> Surface {
    let width = region.width + 1 - window.width;
    let height = region.height + 1 - window.height;
    let mut values = Vec::with_capacity(width * height);
    for sy in 0..height {
        for sx in 0..width {
            let v = ncc_integer(window, region, region.x + sx, region.y + sy, min_valid);
            values.push(v.unwrap_or(f64::NAN));
        }
    }
    Surface {
        width,
        height,
        values,
    }
}

/// Correlation at a fractional placement, sampling the reference with
/// bicubic interpolation. Validity follows the nearest reference pixel;
/// samples outside the reference are excluded.
pub(crate) fn ncc_fractional(
    window: &Window,
    region: &ReferenceRegion,
    px: f64,
    py: f64,
    min_valid: usize,
) -> Option<f64> {
    let image = region.image();
    let (ref_w, ref_h) = (image.width() as isize, image.height() as isize);
    let (nx, ny) = (px.round() as isize, py.round() as isize);

    let mut m = Moments::default();
    for j in 0..window.height {
        let ry = ny + j as isize;
        if ry < 0 || ry >= ref_h {
            continue;
        }
        for i in 0..window.width {
            let rx = nx + i as isize;
            if rx < 0 || rx >= ref_w || !window.is_valid(i, j) || !region.is_valid_at(rx as usize, ry as usize) {
                continue;
            }
            let r = interpolate_bicubic(image, px + i as f64, py + j as f64);
            m.add(window.value(i, j), r);
        }
    }
    m.ncc(min_valid)
}
