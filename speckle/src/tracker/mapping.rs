use common::{BitBuffer2, Buffer2};
use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::gradient::GradientField;
use crate::interpolation::interpolate_bilinear;

/// Per-pixel displacement from detector to reference coordinates.
///
/// Detector pixel `p` of a frame acquired at `position` maps to reference
/// coordinate `p + d(p) + position`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelMapping {
    pub dx: Buffer2<f64>,
    pub dy: Buffer2<f64>,
}

impl PixelMapping {
    /// Zero displacement everywhere (first pass).
    pub fn identity(width: usize, height: usize) -> Self {
        Self {
            dx: Buffer2::new_default(width, height),
            dy: Buffer2::new_default(width, height),
        }
    }

    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> DVec2) -> Self {
        Self {
            dx: Buffer2::from_fn(width, height, |x, y| f(x, y).x),
            dy: Buffer2::from_fn(width, height, |x, y| f(x, y).y),
        }
    }

    pub fn dims(&self) -> (usize, usize) {
        self.dx.dims()
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize) -> DVec2 {
        DVec2::new(self.dx[(x, y)], self.dy[(x, y)])
    }

    /// Bilinearly interpolated displacement at a continuous position.
    pub fn sample(&self, p: DVec2) -> DVec2 {
        DVec2::new(
            interpolate_bilinear(&self.dx, p.x, p.y),
            interpolate_bilinear(&self.dy, p.x, p.y),
        )
    }

    /// Displacements implied by a gradient field: `g / gradient_scale`.
    /// Pixels the field marks invalid keep their `previous` value.
    pub fn from_gradient(gradient: &GradientField, gradient_scale: f64, previous: &PixelMapping) -> Self {
        assert_eq!(gradient.dims(), previous.dims(), "mapping shape mismatch");
        let (width, height) = gradient.dims();
        Self::from_fn(width, height, |x, y| {
            if gradient.is_valid(x, y) {
                gradient.at(x, y) / gradient_scale
            } else {
                previous.at(x, y)
            }
        })
    }

    /// Mean displacement magnitude difference over the pixels selected by
    /// `mask` (every pixel when `None`).
    pub fn mean_difference(&self, other: &PixelMapping, mask: Option<&BitBuffer2>) -> f64 {
        assert_eq!(self.dims(), other.dims(), "mapping shape mismatch");
        let (width, height) = self.dims();
        let mut sum = 0.0;
        let mut count = 0usize;
        for y in 0..height {
            for x in 0..width {
                if mask.is_some_and(|m| !m.get_xy(x, y)) {
                    continue;
                }
                sum += (self.at(x, y) - other.at(x, y)).length();
                count += 1;
            }
        }
        if count == 0 { 0.0 } else { sum / count as f64 }
    }
}
