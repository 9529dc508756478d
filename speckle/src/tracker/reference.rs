//! Reference pattern reconstruction from tracked frames.

use common::{BitBuffer2, Buffer2};

use super::PixelMapping;
use crate::frame::{Frame, ReferencePattern};
use crate::interpolation::bilinear_footprint;

/// Accumulated splat weight below which a reference pixel counts as
/// unobserved.
const MIN_WEIGHT: f64 = 1e-6;

/// Splat every valid frame pixel onto its reference coordinate.
///
/// Returns the weighted sums and weights on a `dims` grid.
fn splat(frames: &[Frame], mapping: &PixelMapping, dims: (usize, usize)) -> (Buffer2<f64>, Buffer2<f64>) {
    let (width, height) = dims;
    let mut sums = Buffer2::new_default(width, height);
    let mut weights = Buffer2::<f64>::new_default(width, height);

    for frame in frames {
        let (fw, fh) = frame.dims();
        for y in 0..fh {
            for x in 0..fw {
                if !frame.is_valid(x, y) {
                    continue;
                }
                let target = glam::DVec2::new(x as f64, y as f64) + mapping.at(x, y) + frame.position;
                let value = frame.image[(x, y)] as f64;
                for (rx, ry, w) in bilinear_footprint(target.x, target.y) {
                    if w <= 0.0 || rx < 0 || ry < 0 || rx as usize >= width || ry as usize >= height {
                        continue;
                    }
                    let (rx, ry) = (rx as usize, ry as usize);
                    sums[(rx, ry)] += w * value;
                    weights[(rx, ry)] += w;
                }
            }
        }
    }
    (sums, weights)
}

/// Rebuild the reference pattern from frames and the current mapping.
///
/// Reference pixels that no frame pixel reaches keep their previous value
/// and validity. The returned pattern's version is one past `previous`.
pub fn update_reference(frames: &[Frame], mapping: &PixelMapping, previous: &ReferencePattern) -> ReferencePattern {
    let dims = previous.dims();
    let (sums, weights) = splat(frames, mapping, dims);

    let mut image = previous.image.clone();
    let mut reached = 0usize;
    let observed = sums.pixels().iter().zip(weights.pixels());
    for (pixel, (&sum, &weight)) in image.pixels_mut().iter_mut().zip(observed) {
        if weight > MIN_WEIGHT {
            *pixel = (sum / weight) as f32;
            reached += 1;
        }
    }

    let mask = previous.mask.as_ref().map(|prev| {
        BitBuffer2::from_fn(dims.0, dims.1, |x, y| prev.get_xy(x, y) || weights[(x, y)] > MIN_WEIGHT)
    });

    tracing::debug!(
        "Reference pattern v{}: {}/{} pixels observed",
        previous.version + 1,
        reached,
        dims.0 * dims.1
    );

    ReferencePattern {
        image,
        mask,
        version: previous.version + 1,
    }
}

impl ReferencePattern {
    /// Estimate a reference of `dims` from frames under the given mapping.
    ///
    /// Pixels no frame reaches are masked out.
    pub fn from_frames(frames: &[Frame], mapping: &PixelMapping, dims: (usize, usize)) -> Self {
        let (sums, weights) = splat(frames, mapping, dims);
        let image = Buffer2::from_fn(dims.0, dims.1, |x, y| {
            let w = weights[(x, y)];
            if w > MIN_WEIGHT { (sums[(x, y)] / w) as f32 } else { 0.0 }
        });
        let mask = BitBuffer2::from_fn(dims.0, dims.1, |x, y| weights[(x, y)] > MIN_WEIGHT);
        let mask = (mask.count_ones() < mask.len()).then_some(mask);
        Self {
            image,
            mask,
            version: 0,
        }
    }
}
