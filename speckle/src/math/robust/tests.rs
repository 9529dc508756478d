use glam::DVec2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::*;

fn config() -> RobustConfig {
    RobustConfig::default()
}

// ---------------------------------------------------------------------------
// robust_mean
// ---------------------------------------------------------------------------

#[test]
fn test_robust_mean_empty() {
    let result = robust_mean(&[], None, &config());
    assert_eq!(result.estimate, 0.0);
    assert!(result.inliers.is_empty());
}

#[test]
fn test_robust_mean_single_sample() {
    let result = robust_mean(&[4.25], None, &config());
    assert_eq!(result.estimate, 4.25);
    assert_eq!(result.inliers, vec![true]);
}

#[test]
fn test_robust_mean_clean_data_equals_mean() {
    let samples = [1.0, 2.0, 3.0, 4.0, 5.0];
    let result = robust_mean(&samples, None, &config());
    assert!((result.estimate - 3.0).abs() < 1e-12);
    assert!(result.inliers.iter().all(|&b| b));
}

#[test]
fn test_robust_mean_rejects_gross_outlier() {
    let samples = [1.0, 1.1, 0.9, 1.05, 0.95, 50.0];
    let result = robust_mean(&samples, None, &config());
    assert!((result.estimate - 1.0).abs() < 1e-12);
    assert_eq!(result.inliers, vec![true, true, true, true, true, false]);
}

#[test]
fn test_robust_mean_identical_samples() {
    let samples = [2.5; 8];
    let result = robust_mean(&samples, None, &config());
    assert_eq!(result.estimate, 2.5);
    assert!(result.inliers.iter().all(|&b| b));
}

#[test]
fn test_robust_mean_weights_shift_estimate() {
    let samples = [1.0, 2.0];
    let weights = [3.0, 1.0];
    let result = robust_mean(&samples, Some(&weights), &config());
    assert!((result.estimate - 1.25).abs() < 1e-12);
}

#[test]
fn test_robust_mean_beats_clean_mean_up_to_breakdown() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let true_value = 0.0;

    for &fraction in &[0.0, 0.1, 0.2, 0.3] {
        let n = 200;
        let corrupted = (n as f64 * fraction).round() as usize;
        let mut samples = Vec::with_capacity(n);
        let mut clean = Vec::with_capacity(n);
        for i in 0..n {
            // Interleave so outliers are not contiguous.
            if i % 10 < 3 && samples.len() - clean.len() < corrupted {
                samples.push(rng.random_range(20.0..80.0));
            } else {
                let v = rng.random_range(-1.0..1.0);
                samples.push(v);
                clean.push(v);
            }
        }
        assert_eq!(samples.len() - clean.len(), corrupted);

        let clean_mean = clean.iter().sum::<f64>() / clean.len() as f64;
        let result = robust_mean(&samples, None, &config());
        let clean_err = (clean_mean - true_value).abs();
        let robust_err = (result.estimate - true_value).abs();
        assert!(
            robust_err <= clean_err + 1e-12,
            "fraction {fraction}: robust error {robust_err} vs clean error {clean_err}"
        );
    }
}

#[test]
fn test_robust_mean_nan_rejects_everything_and_falls_back() {
    let samples = [f64::NAN, f64::NAN, f64::NAN];
    let result = robust_mean(&samples, None, &config());
    assert!(result.inliers.is_empty());
    assert!(result.estimate.is_nan());
}

#[test]
#[should_panic(expected = "weights length must match samples")]
fn test_robust_mean_weight_length_mismatch_panics() {
    robust_mean(&[1.0, 2.0], Some(&[1.0]), &config());
}

// ---------------------------------------------------------------------------
// robust_linear_fit
// ---------------------------------------------------------------------------

#[test]
fn test_linear_fit_degenerate_sizes() {
    let empty = robust_linear_fit(&[], &[], &config());
    assert_eq!((empty.slope, empty.intercept), (0.0, 0.0));
    assert!(empty.inliers.is_empty());

    let single = robust_linear_fit(&[3.0], &[7.0], &config());
    assert_eq!((single.slope, single.intercept), (0.0, 7.0));
    assert_eq!(single.inliers, vec![true]);
}

#[test]
fn test_linear_fit_two_points_exact() {
    let fit = robust_linear_fit(&[0.0, 2.0], &[1.0, 5.0], &config());
    assert!((fit.slope - 2.0).abs() < 1e-12);
    assert!((fit.intercept - 1.0).abs() < 1e-12);
}

#[test]
fn test_linear_fit_rejects_outliers() {
    let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
    let mut y: Vec<f64> = x.iter().map(|&v| 0.5 * v - 3.0).collect();
    y[4] += 40.0;
    y[13] -= 25.0;

    let fit = robust_linear_fit(&x, &y, &config());
    assert!((fit.slope - 0.5).abs() < 1e-9, "slope {}", fit.slope);
    assert!((fit.intercept + 3.0).abs() < 1e-9, "intercept {}", fit.intercept);
    assert!(!fit.inliers[4]);
    assert!(!fit.inliers[13]);
    assert_eq!(fit.inliers.iter().filter(|&&b| b).count(), 18);
    assert!((fit.evaluate(10.0) - 2.0).abs() < 1e-9);
}

#[test]
fn test_linear_fit_constant_x() {
    let fit = robust_linear_fit(&[1.0, 1.0, 1.0], &[2.0, 4.0, 3.0], &config());
    assert_eq!(fit.slope, 0.0);
    assert!((fit.intercept - 3.0).abs() < 1e-12);
}

// ---------------------------------------------------------------------------
// robust_plane_fit
// ---------------------------------------------------------------------------

#[test]
fn test_plane_fit_recovers_plane_with_outlier() {
    let mut points = Vec::new();
    let mut values = Vec::new();
    for y in -2..=2 {
        for x in -2..=2 {
            let p = DVec2::new(x as f64, y as f64);
            points.push(p);
            values.push(1.5 + 0.25 * p.x - 0.75 * p.y);
        }
    }
    values[3] = 100.0;
    let weights = vec![1.0; values.len()];

    let fit = robust_plane_fit(&points, &values, &weights, &config());
    assert!((fit.intercept - 1.5).abs() < 1e-9);
    assert!((fit.slope - DVec2::new(0.25, -0.75)).length() < 1e-9);
    assert!(!fit.inliers[3]);
}

#[test]
fn test_plane_fit_collinear_points_degrades_to_mean() {
    let points = [DVec2::new(0.0, 0.0), DVec2::new(1.0, 0.0), DVec2::new(2.0, 0.0)];
    let values = [1.0, 1.0, 1.0];
    let fit = robust_plane_fit(&points, &values, &[1.0; 3], &config());
    assert!((fit.intercept - 1.0).abs() < 1e-12);
    assert_eq!(fit.slope, DVec2::ZERO);
}

#[test]
fn test_plane_fit_single_point() {
    let fit = robust_plane_fit(&[DVec2::new(3.0, 1.0)], &[2.0], &[0.5], &config());
    assert_eq!(fit.intercept, 2.0);
    assert_eq!(fit.inliers, vec![true]);
}

#[test]
fn test_plane_fit_interpolates_when_values_repeat_along_rows() {
    // Values depend on x only, so most residuals from a flat seed would be
    // exactly zero. The fit must still recover the slope.
    let mut points = Vec::new();
    let mut values = Vec::new();
    for y in -1..=1 {
        for x in -1..=1 {
            let p = DVec2::new(x as f64 * 8.0 + 2.5, y as f64 * 8.0 - 1.5);
            points.push(p);
            values.push(0.03 * p.x);
        }
    }
    let weights: Vec<f64> = points.iter().map(|p| (-p.length_squared() / 72.0).exp()).collect();

    let fit = robust_plane_fit(&points, &values, &weights, &config());
    assert!(fit.intercept.abs() < 1e-9, "intercept {}", fit.intercept);
    assert!((fit.slope - DVec2::new(0.03, 0.0)).length() < 1e-9);
    assert!(fit.inliers.iter().all(|&i| i));
}
