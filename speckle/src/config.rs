//! Configuration types for the reconstruction pipeline.
//!
//! All configuration structs are consolidated here. Every struct has a
//! `Default` and deserializes with `#[serde(default)]`, so partial
//! configuration files are accepted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Smallest window that still leaves a 3x3 neighborhood around every
/// correlation peak.
pub const MIN_WINDOW_SIZE: usize = 4;

// =============================================================================
// Tracking configuration
// =============================================================================

/// Window grid and search region layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Side length of the square tracking window in pixels.
    pub window_size: usize,
    /// Distance between neighboring window origins. Smaller than
    /// `window_size` produces overlapping windows.
    pub window_stride: usize,
    /// Maximum expected displacement (pixels) searched on the first pass.
    pub search_margin: usize,
    /// Lower bound for the search margin as refinement tightens it.
    pub min_search_margin: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            window_size: 16,
            window_stride: 8,
            search_margin: 8,
            min_search_margin: 2,
        }
    }
}

impl TrackingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size < MIN_WINDOW_SIZE {
            return Err(ConfigError::WindowTooSmall {
                min: MIN_WINDOW_SIZE,
                actual: self.window_size,
            });
        }
        if self.window_stride == 0 {
            return Err(ConfigError::ZeroStride);
        }
        if self.search_margin == 0 {
            return Err(ConfigError::ZeroSearchMargin);
        }
        if self.min_search_margin == 0 || self.min_search_margin > self.search_margin {
            return Err(ConfigError::MarginRange {
                min: self.min_search_margin,
                max: self.search_margin,
            });
        }
        Ok(())
    }

    /// Check that a window fits inside an image of the given size.
    pub fn validate_image(
        &self,
        (width, height): (usize, usize),
        what: &'static str,
    ) -> Result<(), ConfigError> {
        if self.window_size > width || self.window_size > height {
            return Err(ConfigError::WindowLargerThanImage {
                window: self.window_size,
                width,
                height,
                what,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Correlation configuration
// =============================================================================

/// Initial sub-pixel peak interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SubpixelMethod {
    /// Three-point parabola along each axis.
    #[default]
    Parabolic,
    /// Three-point parabola through the log of the surface. Falls back to
    /// parabolic when a neighbor is not positive.
    Gaussian,
}

/// Per-window normalized cross-correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Interpolation used on the integer correlation surface.
    pub subpixel_method: SubpixelMethod,
    /// Iterations of symmetric re-sampling around the sub-pixel estimate.
    /// Each iteration re-evaluates the correlation at fractional shifts
    /// using bicubic interpolation of the reference. 0 keeps the
    /// three-point estimate.
    pub refine_iterations: usize,
    /// Stop refining once both axis corrections fall below this (pixels).
    pub refine_tolerance: f64,
    /// Minimum number of pixels valid in both window and reference for a
    /// correlation to be attempted.
    pub min_valid_pixels: usize,
    /// Correlation peaks below this are rejected as low confidence.
    pub min_peak: f64,
    /// Estimates with confidence below this are marked invalid.
    pub confidence_threshold: f64,
    /// Ratio of the second-highest local maximum to the primary peak above
    /// which the match is ambiguous.
    pub max_ambiguity: f64,
    /// Curvature (correlation units per pixel²) at which the sharpness
    /// factor of the confidence saturates at 1.
    pub min_sharpness: f64,
    /// Local maxima within this Chebyshev distance of the primary peak are
    /// treated as part of it.
    pub peak_exclusion_radius: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            subpixel_method: SubpixelMethod::Parabolic,
            refine_iterations: 8,
            refine_tolerance: 1e-3,
            min_valid_pixels: 16,
            min_peak: 0.5,
            confidence_threshold: 0.2,
            max_ambiguity: 0.9,
            min_sharpness: 0.01,
            peak_exclusion_radius: 2,
        }
    }
}

impl CorrelationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "confidence_threshold",
            "[0, 1]",
            self.confidence_threshold,
            |v| (0.0..=1.0).contains(&v),
        )?;
        check_range("min_peak", "[-1, 1]", self.min_peak, |v| {
            (-1.0..=1.0).contains(&v)
        })?;
        check_range("max_ambiguity", "(0, 1]", self.max_ambiguity, |v| {
            v > 0.0 && v <= 1.0
        })?;
        check_range("min_sharpness", "(0, inf)", self.min_sharpness, |v| {
            v > 0.0 && v.is_finite()
        })?;
        check_range("refine_tolerance", "(0, 0.5]", self.refine_tolerance, |v| {
            v > 0.0 && v <= 0.5
        })?;
        if self.min_valid_pixels == 0 {
            return Err(ConfigError::ZeroCount {
                name: "min_valid_pixels",
            });
        }
        Ok(())
    }
}

// =============================================================================
// Robust statistics configuration
// =============================================================================

/// Iterative outlier rejection shared by all robust estimators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobustConfig {
    /// Samples further than this many MAD-derived sigmas from the current
    /// estimate are rejected.
    pub rejection_scale: f64,
    /// Maximum reweighting iterations.
    pub max_iterations: usize,
    /// Stop once the estimate moves less than `tolerance * sigma`.
    pub tolerance: f64,
    /// Floor for the MAD-derived sigma so exact data does not reject
    /// samples that differ only by rounding.
    pub min_scale: f64,
}

impl Default for RobustConfig {
    fn default() -> Self {
        Self {
            rejection_scale: 3.0,
            max_iterations: 20,
            tolerance: 1e-9,
            min_scale: 1e-12,
        }
    }
}

impl RobustConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("rejection_scale", "(0, inf)", self.rejection_scale, |v| {
            v > 0.0 && v.is_finite()
        })?;
        check_range("tolerance", "(0, inf)", self.tolerance, |v| {
            v > 0.0 && v.is_finite()
        })?;
        check_range("min_scale", "[0, inf)", self.min_scale, |v| {
            v >= 0.0 && v.is_finite()
        })?;
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroCount {
                name: "robust.max_iterations",
            });
        }
        Ok(())
    }
}

// =============================================================================
// Gradient assembly configuration
// =============================================================================

/// Sparse-to-dense interpolation of window displacements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    /// Radius (pixels) of the neighborhood fitted around each output pixel,
    /// at least 1. `None` uses 1.5 window strides.
    pub neighborhood_radius: Option<f64>,
    /// Output pixels with fewer valid sites in range are masked out.
    pub min_neighbors: usize,
    /// Fewer valid sites than this over the whole frame fails assembly.
    pub min_valid_samples: usize,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            neighborhood_radius: None,
            min_neighbors: 3,
            min_valid_samples: 4,
        }
    }
}

impl AssemblyConfig {
    /// Effective neighborhood radius for a given window stride.
    pub fn radius(&self, window_stride: usize) -> f64 {
        self.neighborhood_radius
            .unwrap_or(1.5 * window_stride as f64)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(radius) = self.neighborhood_radius {
            check_range("neighborhood_radius", "[1, inf)", radius, |v| {
                v >= 1.0 && v.is_finite()
            })?;
        }
        if self.min_neighbors == 0 {
            return Err(ConfigError::ZeroCount {
                name: "min_neighbors",
            });
        }
        if self.min_valid_samples == 0 {
            return Err(ConfigError::ZeroCount {
                name: "min_valid_samples",
            });
        }
        Ok(())
    }
}

// =============================================================================
// Integration configuration
// =============================================================================

/// Least-squares integration of the gradient field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    /// Maximum conjugate-gradient iterations.
    pub max_iterations: usize,
    /// Relative residual norm at which the solver stops.
    pub tolerance: f64,
    /// Fewer valid pixels than this fails integration.
    pub min_valid_pixels: usize,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            tolerance: 1e-10,
            min_valid_pixels: 4,
        }
    }
}

impl IntegrationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("integration.tolerance", "(0, 1)", self.tolerance, |v| {
            v > 0.0 && v < 1.0
        })?;
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroCount {
                name: "integration.max_iterations",
            });
        }
        if self.min_valid_pixels == 0 {
            return Err(ConfigError::ZeroCount {
                name: "integration.min_valid_pixels",
            });
        }
        Ok(())
    }
}

// =============================================================================
// Refinement configuration
// =============================================================================

/// Outer tracking/reconstruction loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    /// Maximum number of tracking passes.
    pub max_iterations: usize,
    /// Converged once the confidence-weighted mean displacement change
    /// between passes falls below this (pixels).
    pub convergence_tolerance: f64,
    /// Wall-clock budget. The loop stops after the pass that exceeds it.
    pub time_limit: Option<Duration>,
    /// Rebuild the reference pattern from the frames after every pass.
    pub update_reference: bool,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: 4,
            convergence_tolerance: 0.01,
            time_limit: None,
            update_reference: false,
        }
    }
}

impl RefinementConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroCount {
                name: "refinement.max_iterations",
            });
        }
        check_range(
            "convergence_tolerance",
            "(0, inf)",
            self.convergence_tolerance,
            |v| v > 0.0 && v.is_finite(),
        )
    }
}

// =============================================================================
// Aberration fit configuration
// =============================================================================

/// Loss applied to squared residuals `z = (r / loss_scale)²` in the
/// polynomial aberration fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RobustLoss {
    /// `ρ(z) = z`: ordinary least squares.
    Linear,
    /// `ρ(z) = 2(√(1 + z) - 1)`: smooth approximation of the absolute value.
    SoftL1,
    /// `ρ(z) = z` for `z ≤ 1`, `2√z - 1` beyond.
    Huber,
    /// `ρ(z) = ln(1 + z)`: strongly suppresses outliers.
    #[default]
    Cauchy,
    /// `ρ(z) = arctan(z)`: bounded loss per residual.
    Arctan,
}

impl RobustLoss {
    /// `ρ'(z)`, the weight of a residual in iteratively reweighted least
    /// squares.
    pub fn weight(self, z: f64) -> f64 {
        match self {
            RobustLoss::Linear => 1.0,
            RobustLoss::SoftL1 => 1.0 / (1.0 + z).sqrt(),
            RobustLoss::Huber => {
                if z <= 1.0 {
                    1.0
                } else {
                    1.0 / z.sqrt()
                }
            }
            RobustLoss::Cauchy => 1.0 / (1.0 + z),
            RobustLoss::Arctan => 1.0 / (1.0 + z * z),
        }
    }
}

/// Polynomial fit of a one-dimensional aberration profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AberrationFitConfig {
    /// Highest polynomial power.
    pub order: usize,
    pub loss: RobustLoss,
    /// Residual scale at which the loss starts to down-weight.
    pub loss_scale: f64,
    /// Maximum reweighting iterations.
    pub max_iterations: usize,
    /// Stop once no coefficient moves more than `tolerance` relative to its
    /// magnitude.
    pub tolerance: f64,
}

impl Default for AberrationFitConfig {
    fn default() -> Self {
        Self {
            order: 2,
            loss: RobustLoss::Cauchy,
            loss_scale: 1.0,
            max_iterations: 100,
            tolerance: 1e-12,
        }
    }
}

impl AberrationFitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("loss_scale", "(0, inf)", self.loss_scale, |v| {
            v > 0.0 && v.is_finite()
        })?;
        check_range("tolerance", "(0, inf)", self.tolerance, |v| {
            v > 0.0 && v.is_finite()
        })?;
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroCount {
                name: "aberration.max_iterations",
            });
        }
        Ok(())
    }
}

// =============================================================================
// Top-level configuration
// =============================================================================

/// Complete reconstruction configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tracking: TrackingConfig,
    pub correlation: CorrelationConfig,
    pub robust: RobustConfig,
    pub assembly: AssemblyConfig,
    pub integration: IntegrationConfig,
    pub refinement: RefinementConfig,
    /// Worker threads for per-window correlation. 0 uses every available core.
    pub worker_count: usize,
}

impl Config {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tracking.validate()?;
        self.correlation.validate()?;
        self.robust.validate()?;
        self.assembly.validate()?;
        self.integration.validate()?;
        self.refinement.validate()?;

        let window_pixels = self.tracking.window_size * self.tracking.window_size;
        if self.correlation.min_valid_pixels > window_pixels {
            return Err(ConfigError::OutOfRange {
                name: "min_valid_pixels",
                range: "[1, window_size²]",
                value: self.correlation.min_valid_pixels as f64,
            });
        }
        Ok(())
    }
}

fn check_range(
    name: &'static str,
    range: &'static str,
    value: f64,
    ok: impl Fn(f64) -> bool,
) -> Result<(), ConfigError> {
    if ok(value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { name, range, value })
    }
}
