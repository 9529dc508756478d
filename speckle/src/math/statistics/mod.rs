//! Statistical functions: median, weighted median, MAD, weighted mean.

#[cfg(test)]
mod tests;

/// Calculate the median of f64 values in-place.
///
/// Mutates the input buffer (partial sort via quickselect). Returns 0.0 for
/// an empty slice.
pub fn median_mut(data: &mut [f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let len = data.len();
    let mid = len / 2;

    let (left_part, median, _) = data.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *median;
    if len & 1 == 1 {
        upper
    } else {
        let lower = left_part.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (lower + upper) * 0.5
    }
}

/// Median of a slice, using `scratch` as working storage.
pub fn median_with_scratch(values: &[f64], scratch: &mut Vec<f64>) -> f64 {
    scratch.clear();
    scratch.extend_from_slice(values);
    median_mut(scratch)
}

/// Compute MAD (Median Absolute Deviation) using a scratch buffer.
///
/// MAD = median(|x_i - center|)
pub fn mad_with_scratch(values: &[f64], center: f64, scratch: &mut Vec<f64>) -> f64 {
    scratch.clear();
    scratch.extend(values.iter().map(|&v| (v - center).abs()));
    median_mut(scratch)
}

/// Weighted median: the smallest value at which the cumulative weight
/// reaches half the total.
///
/// Non-positive weights are ignored. Falls back to the plain median when no
/// weight is positive.
pub fn weighted_median(values: &[f64], weights: &[f64]) -> f64 {
    assert_eq!(
        values.len(),
        weights.len(),
        "weights length must match values"
    );

    let mut pairs: Vec<(f64, f64)> = values
        .iter()
        .zip(weights)
        .filter(|(_, &w)| w > 0.0)
        .map(|(&v, &w)| (v, w))
        .collect();
    if pairs.is_empty() {
        let mut scratch = Vec::with_capacity(values.len());
        return median_with_scratch(values, &mut scratch);
    }

    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    let half = pairs.iter().map(|p| p.1).sum::<f64>() * 0.5;

    let mut cumulative = 0.0;
    for (i, &(value, weight)) in pairs.iter().enumerate() {
        cumulative += weight;
        if cumulative > half {
            return value;
        }
        if cumulative == half {
            // Exactly balanced: average with the next value, like the even
            // case of the plain median.
            return match pairs.get(i + 1) {
                Some(&(next, _)) => (value + next) * 0.5,
                None => value,
            };
        }
    }
    pairs[pairs.len() - 1].0
}

/// Weighted mean over the samples selected by `mask`.
///
/// Returns `None` when no selected sample carries positive weight.
pub fn weighted_mean_masked(values: &[f64], weights: Option<&[f64]>, mask: &[bool]) -> Option<f64> {
    let mut sum = 0.0;
    let mut weight_sum = 0.0;
    for (i, (&v, &keep)) in values.iter().zip(mask).enumerate() {
        if !keep {
            continue;
        }
        let w = weights.map_or(1.0, |w| w[i]);
        sum += w * v;
        weight_sum += w;
    }
    (weight_sum > 0.0).then(|| sum / weight_sum)
}

/// Plain arithmetic mean. Returns 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
