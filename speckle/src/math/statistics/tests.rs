//! Tests for statistical functions.

use super::*;

// ---------------------------------------------------------------------------
// Median tests
// ---------------------------------------------------------------------------

#[test]
fn test_median_odd() {
    let mut values = [1.0, 3.0, 2.0, 5.0, 4.0];
    assert_eq!(median_mut(&mut values), 3.0);
}

#[test]
fn test_median_even() {
    let mut values = [4.0, 1.0, 3.0, 2.0];
    assert_eq!(median_mut(&mut values), 2.5);
}

#[test]
fn test_median_empty_is_zero() {
    let mut values: [f64; 0] = [];
    assert_eq!(median_mut(&mut values), 0.0);
}

#[test]
fn test_median_with_scratch_preserves_input() {
    let values = [9.0, -1.0, 4.0];
    let mut scratch = Vec::new();
    assert_eq!(median_with_scratch(&values, &mut scratch), 4.0);
    assert_eq!(values, [9.0, -1.0, 4.0]);
}

// ---------------------------------------------------------------------------
// MAD tests
// ---------------------------------------------------------------------------

#[test]
fn test_mad_symmetric() {
    let values = [1.0, 2.0, 3.0, 4.0, 5.0];
    let mut scratch = Vec::new();
    // Deviations from 3: [2, 1, 0, 1, 2] -> median 1
    assert_eq!(mad_with_scratch(&values, 3.0, &mut scratch), 1.0);
}

#[test]
fn test_mad_ignores_single_outlier() {
    let values = [1.0, 1.0, 1.0, 1.0, 1000.0];
    let mut scratch = Vec::new();
    assert_eq!(mad_with_scratch(&values, 1.0, &mut scratch), 0.0);
}

// ---------------------------------------------------------------------------
// Weighted median tests
// ---------------------------------------------------------------------------

#[test]
fn test_weighted_median_uniform_weights_matches_median() {
    let values = [5.0, 1.0, 3.0];
    assert_eq!(weighted_median(&values, &[1.0, 1.0, 1.0]), 3.0);
}

#[test]
fn test_weighted_median_heavy_weight_dominates() {
    let values = [1.0, 2.0, 10.0];
    assert_eq!(weighted_median(&values, &[1.0, 1.0, 5.0]), 10.0);
}

#[test]
fn test_weighted_median_balanced_averages() {
    let values = [1.0, 3.0];
    assert_eq!(weighted_median(&values, &[1.0, 1.0]), 2.0);
}

#[test]
fn test_weighted_median_zero_weights_falls_back() {
    let values = [7.0, 1.0, 4.0];
    assert_eq!(weighted_median(&values, &[0.0, 0.0, 0.0]), 4.0);
}

#[test]
fn test_weighted_median_skips_zero_weight_outlier() {
    let values = [1.0, 2.0, 3.0, 1000.0];
    assert_eq!(weighted_median(&values, &[1.0, 1.0, 1.0, 0.0]), 2.0);
}

// ---------------------------------------------------------------------------
// Mean tests
// ---------------------------------------------------------------------------

#[test]
fn test_weighted_mean_masked() {
    let values = [1.0, 2.0, 100.0];
    let mask = [true, true, false];
    assert_eq!(weighted_mean_masked(&values, None, &mask), Some(1.5));
    let weights = [3.0, 1.0, 1.0];
    assert_eq!(
        weighted_mean_masked(&values, Some(&weights), &mask),
        Some(1.25)
    );
}

#[test]
fn test_weighted_mean_masked_empty_selection() {
    assert_eq!(weighted_mean_masked(&[1.0, 2.0], None, &[false, false]), None);
}

#[test]
fn test_mean() {
    assert_eq!(mean(&[]), 0.0);
    assert_eq!(mean(&[1.0, 2.0, 6.0]), 3.0);
}
