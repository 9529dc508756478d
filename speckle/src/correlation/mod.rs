//! Window-to-reference normalized cross-correlation.
//!
//! For a window and a larger reference search region:
//! 1. Evaluate masked NCC at every integer placement of the window
//! 2. Take the highest placement as the integer peak
//! 3. Interpolate sub-pixel with a three-point fit on the surface
//! 4. Optionally re-centre by re-sampling the reference bicubically around
//!    the estimate
//! 5. Score the match from peak height, ambiguity and curvature
//!
//! Correlation is pure: every call depends only on its arguments, so
//! windows can be evaluated concurrently.

mod subpixel;
mod surface;
mod window;


use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::config::CorrelationConfig;

pub use window::{ReferenceRegion, Window};

/// Why an estimate is (in)valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    Valid,
    /// Window or region has too few unmasked pixels. Displacement is zero.
    InsufficientPixels,
    /// The window has no contrast.
    Flat,
    /// Search region does not fit the window (clipped at the reference edge).
    OutOfBounds,
    /// Maximum on the edge of the search surface; the true peak may lie
    /// outside the search margin.
    PeakOnBoundary,
    /// A secondary maximum is comparable to the primary one, or the peak
    /// has no curvature.
    Ambiguous,
    /// Confidence below the configured threshold.
    LowConfidence,
}

impl MatchStatus {
    /// Whether a correlation peak was located, so the displacement is
    /// meaningful even if the estimate is rejected.
    pub fn has_peak(self) -> bool {
        !matches!(
            self,
            MatchStatus::InsufficientPixels | MatchStatus::Flat | MatchStatus::OutOfBounds
        )
    }
}

/// Result of correlating one window against the reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplacementEstimate {
    /// Window center in frame coordinates.
    pub center: DVec2,
    /// Sub-pixel offset (pixels).
    pub displacement: DVec2,
    /// Correlation at the integer peak.
    pub peak: f64,
    /// Second local maximum relative to the peak, in [0, 1].
    pub ambiguity: f64,
    /// Smaller of the two axis curvatures at the peak.
    pub sharpness: f64,
    /// Combined match quality in [0, 1].
    pub confidence: f64,
    pub status: MatchStatus,
}

impl DisplacementEstimate {
    /// Estimate that carries no information.
    pub fn invalid(center: DVec2, status: MatchStatus) -> Self {
        debug_assert!(status != MatchStatus::Valid);
        Self {
            center,
            displacement: DVec2::ZERO,
            peak: 0.0,
            ambiguity: 1.0,
            sharpness: 0.0,
            confidence: 0.0,
            status,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.status == MatchStatus::Valid
    }
}

/// Normalized cross-correlation with sub-pixel peak localization.
#[derive(Debug, Clone, Default)]
pub struct Correlator {
    config: CorrelationConfig,
}

impl Correlator {
    pub fn new(config: CorrelationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Correlate `window` against `region`.
    ///
    /// The displacement is the placement of the correlation peak relative
    /// to `region.anchor`.
    pub fn correlate(&self, window: &Window, region: &ReferenceRegion) -> DisplacementEstimate {
        let config = &self.config;
        let center = window.center();
        let dims = (window.width, window.height);

        if window.valid_count() < config.min_valid_pixels {
            return DisplacementEstimate::invalid(center, MatchStatus::InsufficientPixels);
        }
        if !region.fits(dims) {
            return DisplacementEstimate::invalid(center, MatchStatus::OutOfBounds);
        }
        if region.valid_count() < config.min_valid_pixels {
            return DisplacementEstimate::invalid(center, MatchStatus::InsufficientPixels);
        }
        if !surface::has_contrast(window) {
            return DisplacementEstimate::invalid(center, MatchStatus::Flat);
        }

        let surface = surface::correlation_surface(window, region, config.min_valid_pixels);
        let Some((px, py, peak)) = surface.argmax() else {
            return DisplacementEstimate::invalid(center, MatchStatus::InsufficientPixels);
        };

        let integer_shift = DVec2::new(
            (region.x + px) as f64 - region.anchor.0 as f64,
            (region.y + py) as f64 - region.anchor.1 as f64,
        );

        let (ix, iy) = (px as isize, py as isize);
        let neighbors = (
            surface.try_get(ix - 1, iy),
            surface.try_get(ix + 1, iy),
            surface.try_get(ix, iy - 1),
            surface.try_get(ix, iy + 1),
        );
        let (Some(left), Some(right), Some(up), Some(down)) = neighbors else {
            let mut estimate = DisplacementEstimate::invalid(center, MatchStatus::PeakOnBoundary);
            estimate.displacement = integer_shift;
            estimate.peak = peak;
            return estimate;
        };

        let sharpness = (2.0 * peak - left - right).min(2.0 * peak - up - down);
        let ambiguity = if peak > 0.0 {
            surface
                .secondary_peak(px, py, config.peak_exclusion_radius)
                .map_or(0.0, |second| (second.max(0.0) / peak).min(1.0))
        } else {
            1.0
        };

        let initial = DVec2::new(
            subpixel::three_point(config.subpixel_method, left, peak, right),
            subpixel::three_point(config.subpixel_method, up, peak, down),
        );
        let base = DVec2::new((region.x + px) as f64, (region.y + py) as f64);
        let offset = subpixel::refine_peak(
            initial,
            config.refine_iterations,
            config.refine_tolerance,
            |o| {
                let p = base + o;
                surface::ncc_fractional(window, region, p.x, p.y, config.min_valid_pixels)
            },
        );

        let sharpness_factor = (sharpness / config.min_sharpness).clamp(0.0, 1.0);
        let confidence = (peak.max(0.0) * (1.0 - ambiguity) * sharpness_factor).clamp(0.0, 1.0);

        let status = if sharpness <= 0.0 || ambiguity > config.max_ambiguity {
            MatchStatus::Ambiguous
        } else if peak < config.min_peak || confidence < config.confidence_threshold {
            MatchStatus::LowConfidence
        } else {
            MatchStatus::Valid
        };

        DisplacementEstimate {
            center,
            displacement: integer_shift + offset,
            peak,
            ambiguity,
            sharpness,
            confidence,
            status,
        }
    }
}
