//! Full reconstruction pipeline.
//!
//! # Stages
//!
//! 1. **Validation** - configuration, calibration and frame shapes are
//!    checked before any computation
//! 2. **Refinement** - repeated tracking passes, each guided by the pixel
//!    mapping of the previous one, until the displacement change drops below
//!    the tolerance or the iteration/time budget runs out
//! 3. **Integration** - the last gradient field is integrated into the
//!    wavefront

mod result;


pub use result::Reconstruction;

use std::time::Instant;

use crate::config::Config;
use crate::error::{ConfigError, Result};
use crate::executor::{Executor, ThreadPoolExecutor};
use crate::frame::{Calibration, Frame, ReferencePattern};
use crate::integration::integrate;
use crate::tracker::{RefinementState, refine_step};

/// Reconstructs a wavefront from speckle frames and a reference pattern.
#[derive(Debug)]
pub struct Reconstructor<E: Executor = ThreadPoolExecutor> {
    config: Config,
    executor: E,
}

impl Reconstructor<ThreadPoolExecutor> {
    /// Validate `config` and build a worker pool of `config.worker_count`
    /// threads.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let executor = ThreadPoolExecutor::new(config.worker_count)?;
        Ok(Self { config, executor })
    }
}

impl<E: Executor> Reconstructor<E> {
    /// Use a caller-supplied executor instead of an owned pool.
    pub fn with_executor(config: Config, executor: E) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, executor })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run refinement passes and integrate the resulting gradient field.
    ///
    /// Running out of passes or time is not an error: the last pass is kept
    /// and `converged` is false. Fails when a stage has too little data or
    /// the inputs are inconsistent.
    pub fn reconstruct(
        &self,
        frames: &[Frame],
        reference: ReferencePattern,
        calibration: &Calibration,
    ) -> Result<Reconstruction> {
        let start = Instant::now();
        let dims = self.validate_inputs(frames, &reference, calibration)?;
        let refinement = &self.config.refinement;

        tracing::info!(
            "Reconstructing from {} frames of {}x{}, reference {}x{}, {} workers",
            frames.len(),
            dims.0,
            dims.1,
            reference.dims().0,
            reference.dims().1,
            self.executor.worker_count()
        );

        let mut state = RefinementState::new(reference, dims, self.config.tracking.search_margin);
        let mut reports = Vec::with_capacity(refinement.max_iterations);
        let mut gradient = None;
        let mut converged = false;

        while reports.len() < refinement.max_iterations {
            let (next, field, report) = refine_step(state, frames, calibration, &self.config, &self.executor)?;
            state = next;
            gradient = Some(field);
            converged = report.is_converged(refinement.convergence_tolerance);
            reports.push(report);

            if converged {
                break;
            }
            if refinement.time_limit.is_some_and(|limit| start.elapsed() >= limit) {
                tracing::warn!("Time limit reached after {} passes", reports.len());
                break;
            }
        }

        // max_iterations >= 1 is validated, so at least one pass ran.
        let Some(gradient) = gradient else {
            return Err(ConfigError::ZeroCount {
                name: "refinement.max_iterations",
            }
            .into());
        };

        if !converged {
            tracing::warn!(
                "Refinement did not converge in {} passes (last change {:.4} px)",
                reports.len(),
                reports.last().map_or(f64::INFINITY, |r| r.displacement_change)
            );
        }

        let wavefront = integrate(&gradient, &self.config.integration)?;
        let elapsed = start.elapsed();

        tracing::info!(
            "Reconstruction finished: {} passes, converged {}, rms residual {:.3e}, {:.1} ms",
            reports.len(),
            converged,
            wavefront.rms_residual,
            elapsed.as_secs_f64() * 1000.0
        );

        Ok(Reconstruction {
            wavefront,
            gradient,
            state,
            reports,
            converged,
            elapsed,
        })
    }

    /// Check frames, reference and calibration. Returns the common frame
    /// dimensions.
    fn validate_inputs(
        &self,
        frames: &[Frame],
        reference: &ReferencePattern,
        calibration: &Calibration,
    ) -> Result<(usize, usize)> {
        calibration.validate()?;

        let first = frames.first().ok_or(ConfigError::NoFrames)?;
        let dims = first.dims();
        for (index, frame) in frames.iter().enumerate() {
            if frame.dims() != dims {
                return Err(ConfigError::FrameDimensionMismatch {
                    index,
                    expected: dims,
                    actual: frame.dims(),
                }
                .into());
            }
            frame.validate_mask()?;
        }
        reference.validate_mask()?;

        self.config.tracking.validate_image(dims, "frame")?;
        self.config.tracking.validate_image(reference.dims(), "reference")?;
        Ok(dims)
    }
}
