//! One pass of the track → assemble → update loop.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::{PixelMapping, SparseField, WindowTracker, update_reference};
use crate::config::Config;
use crate::correlation::Correlator;
use crate::error::{Error, Result, Stage};
use crate::executor::Executor;
use crate::frame::{Calibration, Frame, ReferencePattern};
use crate::gradient::{GradientField, assemble};

/// Mutable state carried between refinement passes.
///
/// Owned by the loop driver; each pass consumes it and returns the next
/// one, so a pass only ever reads a frozen snapshot.
#[derive(Debug, Clone)]
pub struct RefinementState {
    pub reference: ReferencePattern,
    pub mapping: PixelMapping,
    pub search_margin: usize,
    /// Completed passes.
    pub iteration: usize,
    /// Estimates from the latest pass.
    pub estimates: SparseField,
}

impl RefinementState {
    /// Initial state: identity mapping on a frame grid of `dims`.
    pub fn new(reference: ReferencePattern, dims: (usize, usize), search_margin: usize) -> Self {
        Self {
            reference,
            mapping: PixelMapping::identity(dims.0, dims.1),
            search_margin,
            iteration: 0,
            estimates: SparseField::new(),
        }
    }
}

/// Diagnostics of one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    /// 1-based pass number.
    pub iteration: usize,
    pub search_margin: usize,
    pub windows: usize,
    pub valid_windows: usize,
    /// Confidence-weighted mean displacement change of windows valid in
    /// both this and the previous pass (pixels). Infinite on the first pass.
    pub displacement_change: f64,
    /// Mean mapping change over valid gradient pixels (pixels).
    pub mapping_change: f64,
    /// Largest deviation of a valid estimate from the new mapping (pixels).
    pub max_residual: f64,
    pub elapsed: Duration,
}

impl PassReport {
    pub fn is_converged(&self, tolerance: f64) -> bool {
        self.iteration >= 2 && self.displacement_change < tolerance
    }
}

/// Run one tracking pass and derive the next state.
///
/// Returns the gradient field assembled in this pass alongside the new
/// state. Fails with [`Error::InsufficientData`] when assembly finds too
/// few valid windows.
pub fn refine_step<E: Executor>(
    state: RefinementState,
    frames: &[Frame],
    calibration: &Calibration,
    config: &Config,
    executor: &E,
) -> Result<(RefinementState, GradientField, PassReport)> {
    let start = Instant::now();
    let iteration = state.iteration + 1;

    let tracker = WindowTracker::new(config.tracking.clone(), Correlator::new(config.correlation.clone()))
        .with_search_margin(state.search_margin);
    let estimates = tracker.track_all(frames, &state.reference, &state.mapping, executor);
    let valid_windows = estimates.valid_count();

    let dims = state.mapping.dims();
    let gradient = assemble(&estimates, dims, calibration, config, executor);
    if gradient.is_empty() {
        return Err(Error::InsufficientData {
            stage: Stage::Assembly,
            found: gradient.samples,
            required: config.assembly.min_valid_samples,
        });
    }

    let mapping = PixelMapping::from_gradient(&gradient, calibration.gradient_scale(), &state.mapping);
    let mapping_change = mapping.mean_difference(&state.mapping, Some(&gradient.mask));
    let displacement_change = displacement_change(&estimates, &state.estimates);

    let max_residual = estimates
        .valid()
        .map(|(_, e)| (e.displacement - mapping.sample(e.center)).abs().max_element())
        .fold(0.0f64, f64::max);
    let search_margin = ((max_residual.ceil() as usize) + 2)
        .clamp(config.tracking.min_search_margin, state.search_margin.max(config.tracking.min_search_margin));

    let reference = if config.refinement.update_reference {
        update_reference(frames, &mapping, &state.reference)
    } else {
        state.reference
    };

    let report = PassReport {
        iteration,
        search_margin: state.search_margin,
        windows: estimates.len(),
        valid_windows,
        displacement_change,
        mapping_change,
        max_residual,
        elapsed: start.elapsed(),
    };
    tracing::info!(
        "Pass {}: {}/{} valid windows, margin {} -> {}, change {:.4} px, mapping change {:.4} px",
        iteration,
        valid_windows,
        report.windows,
        state.search_margin,
        search_margin,
        displacement_change,
        mapping_change
    );

    let next = RefinementState {
        reference,
        mapping,
        search_margin,
        iteration,
        estimates,
    };
    Ok((next, gradient, report))
}

/// Confidence-weighted mean displacement change between passes over windows
/// valid in both.
fn displacement_change(current: &SparseField, previous: &SparseField) -> f64 {
    let mut sum = 0.0;
    let mut weight = 0.0;
    for (key, estimate) in current.valid() {
        let Some(prev) = previous.get(key).filter(|p| p.is_valid()) else {
            continue;
        };
        let w = estimate.confidence.min(prev.confidence);
        sum += w * (estimate.displacement - prev.displacement).length();
        weight += w;
    }
    if weight > 0.0 { sum / weight } else { f64::INFINITY }
}
