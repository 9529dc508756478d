//! Outlier-resistant estimators.
//!
//! All estimators share one reweighting scheme: start from a robust initial
//! guess, compute residuals, derive a scale as `MAD_TO_SIGMA × median(|r|)`,
//! reject samples beyond `rejection_scale` scales, and refit on the
//! survivors. Iteration stops when the parameters move less than
//! `tolerance × scale`, when the inlier set stops changing, or after
//! `max_iterations`.

#[cfg(test)]
mod tests;

use glam::{DMat3, DVec2, DVec3};

use super::mad_to_sigma;
use super::statistics::{mean, median_mut, median_with_scratch, weighted_mean_masked, weighted_median};
use crate::config::RobustConfig;

/// Robust central estimate of a set of scalar samples.
#[derive(Debug, Clone, PartialEq)]
pub struct RobustEstimate {
    pub estimate: f64,
    /// `true` for samples that survived rejection. Empty when every sample
    /// was rejected and the estimate fell back to the unweighted mean.
    pub inliers: Vec<bool>,
    pub iterations: usize,
}

/// Robust straight-line fit `y = slope · x + intercept`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub inliers: Vec<bool>,
    pub iterations: usize,
}

impl LinearFit {
    pub fn evaluate(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Robust plane fit `v = intercept + slope.x · p.x + slope.y · p.y`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneFit {
    pub intercept: f64,
    pub slope: DVec2,
    pub inliers: Vec<bool>,
    pub iterations: usize,
}

/// Outcome of the shared rejection loop.
struct Rejection<P> {
    params: P,
    inliers: Vec<bool>,
    iterations: usize,
}

/// Iterate residual → scale → rejection → refit until stable.
///
/// `refit` returns `None` when the selected subset cannot determine the
/// model; the caller decides the fallback.
fn reject_and_refit<P: Copy>(
    n: usize,
    config: &RobustConfig,
    initial: P,
    residual: impl Fn(&P, usize) -> f64,
    refit: impl Fn(&[bool]) -> Option<P>,
    distance: impl Fn(&P, &P) -> f64,
) -> Option<Rejection<P>> {
    let mut params = initial;
    let mut inliers = vec![true; n];
    let mut abs_residuals = Vec::with_capacity(n);
    let mut scratch = Vec::with_capacity(n);

    for iteration in 1..=config.max_iterations {
        abs_residuals.clear();
        abs_residuals.extend((0..n).map(|i| residual(&params, i).abs()));

        scratch.clear();
        scratch.extend_from_slice(&abs_residuals);
        let sigma = mad_to_sigma(median_mut(&mut scratch)).max(config.min_scale);
        let threshold = config.rejection_scale * sigma;

        let next_inliers: Vec<bool> = abs_residuals.iter().map(|&r| r <= threshold).collect();
        if !next_inliers.contains(&true) {
            return None;
        }

        let next = refit(&next_inliers)?;
        let moved = distance(&next, &params);
        let stable = next_inliers == inliers;
        params = next;
        inliers = next_inliers;

        if moved <= config.tolerance * sigma || (stable && iteration > 1) {
            return Some(Rejection {
                params,
                inliers,
                iterations: iteration,
            });
        }
    }

    Some(Rejection {
        params,
        inliers,
        iterations: config.max_iterations,
    })
}

/// Outlier-resistant (optionally weighted) mean.
///
/// Starts at the weighted median; each iteration rejects samples further
/// than `rejection_scale` MAD-derived sigmas from the current estimate and
/// recomputes the weighted mean of the rest. Never fails: if every sample
/// is rejected the unweighted mean is returned with an empty inlier mask.
///
/// Zero samples yield `0.0`; one sample yields itself. Both report every
/// sample as an inlier.
pub fn robust_mean(samples: &[f64], weights: Option<&[f64]>, config: &RobustConfig) -> RobustEstimate {
    if let Some(w) = weights {
        assert_eq!(w.len(), samples.len(), "weights length must match samples");
    }

    match samples {
        [] => {
            return RobustEstimate {
                estimate: 0.0,
                inliers: Vec::new(),
                iterations: 0,
            };
        }
        [single] => {
            return RobustEstimate {
                estimate: *single,
                inliers: vec![true],
                iterations: 0,
            };
        }
        _ => {}
    }

    let initial = match weights {
        Some(w) => weighted_median(samples, w),
        None => median_with_scratch(samples, &mut Vec::with_capacity(samples.len())),
    };

    let outcome = reject_and_refit(
        samples.len(),
        config,
        initial,
        |estimate, i| samples[i] - estimate,
        |mask| {
            weighted_mean_masked(samples, weights, mask)
                .or_else(|| weighted_mean_masked(samples, None, mask))
        },
        |a, b| (a - b).abs(),
    );

    match outcome {
        Some(r) => RobustEstimate {
            estimate: r.params,
            inliers: r.inliers,
            iterations: r.iterations,
        },
        None => RobustEstimate {
            estimate: mean(samples),
            inliers: Vec::new(),
            iterations: config.max_iterations,
        },
    }
}

/// Outlier-resistant straight-line fit.
///
/// Initialized with the Theil–Sen estimator (median of pairwise slopes),
/// then refined by least squares on the inlier set. Zero samples yield a
/// zero line; one sample a horizontal line through it.
pub fn robust_linear_fit(x: &[f64], y: &[f64], config: &RobustConfig) -> LinearFit {
    assert_eq!(x.len(), y.len(), "x and y must have the same length");

    match x.len() {
        0 => {
            return LinearFit {
                slope: 0.0,
                intercept: 0.0,
                inliers: Vec::new(),
                iterations: 0,
            };
        }
        1 => {
            return LinearFit {
                slope: 0.0,
                intercept: y[0],
                inliers: vec![true],
                iterations: 0,
            };
        }
        _ => {}
    }

    let initial = theil_sen(x, y);
    let outcome = reject_and_refit(
        x.len(),
        config,
        initial,
        |&(slope, intercept), i| y[i] - (slope * x[i] + intercept),
        |mask| Some(least_squares_line(x, y, mask)),
        |a, b| {
            let span = x.iter().fold(0.0f64, |m, v| m.max(v.abs()));
            (a.0 - b.0).abs() * span + (a.1 - b.1).abs()
        },
    );

    match outcome {
        Some(r) => LinearFit {
            slope: r.params.0,
            intercept: r.params.1,
            inliers: r.inliers,
            iterations: r.iterations,
        },
        None => {
            let (slope, intercept) = least_squares_line(x, y, &vec![true; x.len()]);
            LinearFit {
                slope,
                intercept,
                inliers: Vec::new(),
                iterations: config.max_iterations,
            }
        }
    }
}

/// Median of pairwise slopes, intercept = median(y - slope·x).
fn theil_sen(x: &[f64], y: &[f64]) -> (f64, f64) {
    let n = x.len();
    let mut slopes = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = x[j] - x[i];
            if dx != 0.0 {
                slopes.push((y[j] - y[i]) / dx);
            }
        }
    }
    let slope = median_mut(&mut slopes);
    let mut offsets: Vec<f64> = x.iter().zip(y).map(|(&xi, &yi)| yi - slope * xi).collect();
    (slope, median_mut(&mut offsets))
}

/// Ordinary least-squares line over the masked samples. Degenerates to a
/// horizontal line through the mean when x has no spread.
fn least_squares_line(x: &[f64], y: &[f64], mask: &[bool]) -> (f64, f64) {
    let mut n = 0.0;
    let (mut sx, mut sy) = (0.0, 0.0);
    for i in 0..x.len() {
        if mask[i] {
            n += 1.0;
            sx += x[i];
            sy += y[i];
        }
    }
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let (mx, my) = (sx / n, sy / n);

    let (mut sxx, mut sxy) = (0.0, 0.0);
    for i in 0..x.len() {
        if mask[i] {
            let dx = x[i] - mx;
            sxx += dx * dx;
            sxy += dx * (y[i] - my);
        }
    }
    if sxx <= f64::EPSILON * n * (mx * mx + 1.0) {
        return (0.0, my);
    }
    let slope = sxy / sxx;
    (slope, my - slope * mx)
}

/// Outlier-resistant weighted plane fit.
///
/// Points should be expressed relative to the location of interest so that
/// `intercept` is the fitted value there. Seeded from the median plane
/// over point triples (a flat plane at the weighted median when every
/// triple is collinear). When the inlier positions cannot determine a plane
/// (fewer than three, or collinear) the fit degrades to a weighted mean.
pub fn robust_plane_fit(
    points: &[DVec2],
    values: &[f64],
    weights: &[f64],
    config: &RobustConfig,
) -> PlaneFit {
    assert_eq!(points.len(), values.len(), "points and values must have the same length");
    assert_eq!(weights.len(), values.len(), "weights length must match values");

    if values.len() < 2 {
        let estimate = robust_mean(values, Some(weights), config);
        return PlaneFit {
            intercept: estimate.estimate,
            slope: DVec2::ZERO,
            inliers: estimate.inliers,
            iterations: 0,
        };
    }

    let initial = triple_median_plane(points, values, weights)
        .unwrap_or((weighted_median(values, weights), DVec2::ZERO));
    let outcome = reject_and_refit(
        values.len(),
        config,
        initial,
        |&(c, s), i| values[i] - (c + s.dot(points[i])),
        |mask| weighted_plane(points, values, weights, mask),
        |a, b| {
            let span = points.iter().fold(0.0f64, |m, p| m.max(p.abs().max_element()));
            (a.0 - b.0).abs() + (a.1 - b.1).abs().max_element() * span
        },
    );

    match outcome {
        Some(r) => PlaneFit {
            intercept: r.params.0,
            slope: r.params.1,
            inliers: r.inliers,
            iterations: r.iterations,
        },
        None => PlaneFit {
            intercept: mean(values),
            slope: DVec2::ZERO,
            inliers: Vec::new(),
            iterations: config.max_iterations,
        },
    }
}

/// Points considered when seeding a plane fit.
const MAX_SEED_POINTS: usize = 12;

/// Plane analogue of Theil–Sen: medians of the intercept and both slopes
/// over the exact planes through every non-collinear triple of the heaviest
/// points. `None` when all triples are collinear.
fn triple_median_plane(points: &[DVec2], values: &[f64], weights: &[f64]) -> Option<(f64, DVec2)> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| weights[b].total_cmp(&weights[a]));
    order.truncate(MAX_SEED_POINTS);

    let mut intercepts = Vec::new();
    let mut sx = Vec::new();
    let mut sy = Vec::new();
    for (n, &i) in order.iter().enumerate() {
        for (m, &j) in order.iter().enumerate().skip(n + 1) {
            for &k in &order[m + 1..] {
                let a = points[j] - points[i];
                let b = points[k] - points[i];
                let det = a.perp_dot(b);
                if det.abs() <= 1e-9 * a.length() * b.length() {
                    continue;
                }
                let (d1, d2) = (values[j] - values[i], values[k] - values[i]);
                let slope = DVec2::new(d1 * b.y - d2 * a.y, a.x * d2 - b.x * d1) / det;
                intercepts.push(values[i] - slope.dot(points[i]));
                sx.push(slope.x);
                sy.push(slope.y);
            }
        }
    }
    if intercepts.is_empty() {
        return None;
    }

    Some((
        median_mut(&mut intercepts),
        DVec2::new(median_mut(&mut sx), median_mut(&mut sy)),
    ))
}

/// Weighted least-squares plane over the masked samples via the 3×3 normal
/// equations. Falls back to the weighted mean for a singular system.
fn weighted_plane(
    points: &[DVec2],
    values: &[f64],
    weights: &[f64],
    mask: &[bool],
) -> Option<(f64, DVec2)> {
    let mut ata = [[0.0f64; 3]; 3];
    let mut atb = DVec3::ZERO;
    for i in 0..values.len() {
        if !mask[i] || weights[i] <= 0.0 {
            continue;
        }
        let row = DVec3::new(1.0, points[i].x, points[i].y);
        let w = weights[i];
        for (r, ata_row) in ata.iter_mut().enumerate() {
            for (c, entry) in ata_row.iter_mut().enumerate() {
                *entry += w * row[r] * row[c];
            }
        }
        atb += w * values[i] * row;
    }

    let normal = DMat3::from_cols_array_2d(&ata);
    let det = normal.determinant();
    let scale = ata[0][0] * ata[1][1] * ata[2][2];
    if scale > 0.0 && det.abs() > 1e-10 * scale {
        let solution = normal.inverse() * atb;
        return Some((solution.x, DVec2::new(solution.y, solution.z)));
    }

    weighted_mean_masked(values, Some(weights), mask)
        .or_else(|| weighted_mean_masked(values, None, mask))
        .map(|c| (c, DVec2::ZERO))
}
