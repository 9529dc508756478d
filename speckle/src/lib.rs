//! Speckle - wavefront reconstruction by speckle tracking.
//!
//! A sample placed in a beam distorts a speckle pattern. Comparing frames of
//! the distorted pattern against an undistorted reference gives local
//! displacements, which scale to wavefront slopes and integrate into the
//! wavefront itself:
//! - Window tracking by masked normalized cross-correlation
//! - Robust statistics for merging estimates and rejecting outliers
//! - Dense gradient assembly from sparse window estimates
//! - Least-squares integration of the gradient field
//! - Polynomial fits of lens aberration profiles
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use speckle::{Calibration, Config, Frame, ReferencePattern, Reconstructor};
//!
//! let reconstructor = Reconstructor::new(Config::default())?;
//! let result = reconstructor.reconstruct(&frames, reference, &Calibration::new(55e-6, 2.0))?;
//!
//! println!("{} passes, rms residual {}", result.iterations(), result.wavefront.rms_residual);
//! ```

pub mod aberrations;
pub mod config;
pub mod correlation;
pub mod error;
pub mod executor;
mod frame;
pub mod gradient;
pub mod integration;
pub(crate) mod interpolation;
pub mod math;
pub mod pipeline;
pub mod tracker;

#[cfg(test)]
pub mod testing;

// ============================================================================
// Inputs and configuration
// ============================================================================

pub use config::{
    AberrationFitConfig, AssemblyConfig, Config, CorrelationConfig, IntegrationConfig, RefinementConfig,
    RobustConfig, RobustLoss, SubpixelMethod, TrackingConfig,
};
pub use error::{ConfigError, Error, Result, Stage};
pub use frame::{Calibration, Frame, ReferencePattern};

// ============================================================================
// Stages
// ============================================================================

pub use correlation::{Correlator, DisplacementEstimate, MatchStatus, ReferenceRegion, Window};
pub use executor::{Executor, SequentialExecutor, ThreadPoolExecutor};
pub use gradient::{GradientField, assemble};
pub use integration::{Wavefront, integrate};
pub use tracker::{PassReport, PixelMapping, RefinementState, SparseField, WindowKey, WindowTracker, refine_step};

// ============================================================================
// Pipeline and post-processing
// ============================================================================

pub use aberrations::{AberrationFit, Axis, PolynomialFit};
pub use pipeline::{Reconstruction, Reconstructor};
