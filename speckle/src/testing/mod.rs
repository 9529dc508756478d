//! Testing utilities for speckle.

#![allow(dead_code)]

pub mod synthetic;

pub use synthetic::{SpeckleField, defocus, render_frame, render_reference};

/// Initialize tracing for tests. Safe to call from every test.
pub fn init_tracing() {
    common::log_setup::setup_test_logging();
}

/// Root-mean-square of `values`.
pub fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}
