//! Reconstruction result types.

use std::time::Duration;

use crate::gradient::GradientField;
use crate::integration::Wavefront;
use crate::tracker::{PassReport, RefinementState, SparseField};

/// Output of a full reconstruction.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    /// Integrated wavefront from the last pass's gradient field.
    pub wavefront: Wavefront,

    /// Gradient field assembled in the last pass.
    pub gradient: GradientField,

    /// Reference pattern, pixel mapping and estimates after the last pass.
    pub state: RefinementState,

    /// One report per completed pass, in order.
    pub reports: Vec<PassReport>,

    /// Whether the displacement change fell below the tolerance before the
    /// iteration or time limit was reached.
    pub converged: bool,

    /// Wall-clock time of the whole reconstruction.
    pub elapsed: Duration,
}

impl Reconstruction {
    /// Completed refinement passes.
    pub fn iterations(&self) -> usize {
        self.reports.len()
    }

    /// Window estimates of the last pass.
    pub fn estimates(&self) -> &SparseField {
        &self.state.estimates
    }

    /// Fraction of windows that produced a valid estimate in the last pass.
    pub fn valid_ratio(&self) -> f64 {
        match self.reports.last() {
            Some(report) if report.windows > 0 => report.valid_windows as f64 / report.windows as f64,
            _ => 0.0,
        }
    }
}
