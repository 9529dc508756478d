//! Sub-pixel peak localization.

use glam::DVec2;

use crate::config::SubpixelMethod;

/// Offset of the vertex of the parabola through `(-1, l)`, `(0, c)`,
/// `(1, r)`, clamped to half a sample.
#[inline]
pub(crate) fn parabolic_offset(l: f64, c: f64, r: f64) -> f64 {
    let denom = 2.0 * (l - 2.0 * c + r);
    if denom >= 0.0 || !denom.is_finite() {
        return 0.0;
    }
    ((l - r) / denom).clamp(-0.5, 0.5)
}

/// Parabolic fit through the logarithm of the samples, exact for a
/// Gaussian peak. Falls back to [`parabolic_offset`] for non-positive
/// samples.
#[inline]
pub(crate) fn gaussian_offset(l: f64, c: f64, r: f64) -> f64 {
    if l <= 0.0 || c <= 0.0 || r <= 0.0 {
        return parabolic_offset(l, c, r);
    }
    parabolic_offset(l.ln(), c.ln(), r.ln())
}

/// Three-point estimate along one axis.
#[inline]
pub(crate) fn three_point(method: SubpixelMethod, l: f64, c: f64, r: f64) -> f64 {
    match method {
        SubpixelMethod::Parabolic => parabolic_offset(l, c, r),
        SubpixelMethod::Gaussian => gaussian_offset(l, c, r),
    }
}

/// Iteratively re-centre a peak estimate.
///
/// `score` evaluates the correlation at an offset from the integer peak.
/// Each iteration samples `offset ± step` along both axes, moves to the
/// parabola vertex (limited to half a step), then halves the step down to a
/// quarter pixel. The offset never leaves the ±1 pixel neighborhood of the
/// integer peak.
pub(crate) fn refine_peak(
    initial: DVec2,
    iterations: usize,
    tolerance: f64,
    score: impl Fn(DVec2) -> Option<f64>,
) -> DVec2 {
    const MIN_STEP: f64 = 0.25;

    let mut offset = initial;
    let mut step = 1.0;
    for _ in 0..iterations {
        let Some(c) = score(offset) else {
            break;
        };
        let axis_correction = |axis: DVec2| -> Option<f64> {
            let l = score(offset - axis * step)?;
            let r = score(offset + axis * step)?;
            let half = 0.5 * step;
            let denom = 2.0 * (l + r - 2.0 * c);
            if denom >= 0.0 {
                return Some(0.0);
            }
            Some((step * (l - r) / denom).clamp(-half, half))
        };
        let (Some(dx), Some(dy)) = (axis_correction(DVec2::X), axis_correction(DVec2::Y)) else {
            break;
        };

        offset = (offset + DVec2::new(dx, dy)).clamp(DVec2::splat(-1.0), DVec2::splat(1.0));
        if dx.abs().max(dy.abs()) < tolerance {
            break;
        }
        step = (step * 0.5).max(MIN_STEP);
    }
    offset
}
