//! Borrowed views correlated against each other.

use common::{BitBuffer2, Buffer2};
use glam::DVec2;

use crate::frame::{Frame, ReferencePattern};

/// Rectangular read-only view into a frame.
///
/// Always lies fully within its source image. The grid stride that
/// produced it lives in `TrackingConfig`.
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
    image: &'a Buffer2<f32>,
    mask: Option<&'a BitBuffer2>,
}

impl<'a> Window<'a> {
    pub fn new(
        image: &'a Buffer2<f32>,
        mask: Option<&'a BitBuffer2>,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    ) -> Self {
        assert!(
            x + width <= image.width() && y + height <= image.height(),
            "window {width}x{height} at ({x}, {y}) exceeds {}x{} image",
            image.width(),
            image.height()
        );
        Self {
            x,
            y,
            width,
            height,
            image,
            mask,
        }
    }

    /// Square window of `size` pixels at `(x, y)` of `frame`.
    pub fn in_frame(frame: &'a Frame, x: usize, y: usize, size: usize) -> Self {
        Self::new(&frame.image, frame.mask.as_ref(), x, y, size, size)
    }

    /// Geometric center in frame coordinates.
    pub fn center(&self) -> DVec2 {
        DVec2::new(
            self.x as f64 + (self.width as f64 - 1.0) * 0.5,
            self.y as f64 + (self.height as f64 - 1.0) * 0.5,
        )
    }

    #[inline]
    pub fn value(&self, i: usize, j: usize) -> f64 {
        self.image[(self.x + i, self.y + j)] as f64
    }

    #[inline]
    pub fn is_valid(&self, i: usize, j: usize) -> bool {
        self.mask
            .is_none_or(|m| m.get_xy(self.x + i, self.y + j))
    }

    pub fn valid_count(&self) -> usize {
        match self.mask {
            Some(m) => m.count_ones_in(self.x, self.y, self.width, self.height),
            None => self.width * self.height,
        }
    }
}

/// Search region of the reference pattern.
///
/// `anchor` is the reference position of the window's top-left pixel at
/// zero shift. The region is clipped to the reference, so it may be empty
/// or smaller than the window near the edges.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceRegion<'a> {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
    pub anchor: (isize, isize),
    image: &'a Buffer2<f32>,
    mask: Option<&'a BitBuffer2>,
}

impl<'a> ReferenceRegion<'a> {
    /// Region spanning `margin` pixels around a window of `window_dims`
    /// placed at `anchor`.
    pub fn around(
        reference: &'a ReferencePattern,
        anchor: (isize, isize),
        window_dims: (usize, usize),
        margin: usize,
    ) -> Self {
        let (ref_w, ref_h) = reference.dims();
        let margin = margin as isize;
        let clip = |start: isize, len: usize, limit: usize| -> (usize, usize) {
            let lo = (start - margin).clamp(0, limit as isize);
            let hi = (start + len as isize + margin).clamp(0, limit as isize);
            (lo as usize, (hi - lo).max(0) as usize)
        };
        let (x, width) = clip(anchor.0, window_dims.0, ref_w);
        let (y, height) = clip(anchor.1, window_dims.1, ref_h);

        Self {
            x,
            y,
            width,
            height,
            anchor,
            image: &reference.image,
            mask: reference.mask.as_ref(),
        }
    }

    pub(crate) fn image(&self) -> &'a Buffer2<f32> {
        self.image
    }

    /// Reference validity at absolute reference coordinates.
    #[inline]
    pub(crate) fn is_valid_at(&self, x: usize, y: usize) -> bool {
        self.mask.is_none_or(|m| m.get_xy(x, y))
    }

    pub fn valid_count(&self) -> usize {
        match self.mask {
            Some(m) => m.count_ones_in(self.x, self.y, self.width, self.height),
            None => self.width * self.height,
        }
    }

    /// Whether a window of `dims` fits at least once.
    pub fn fits(&self, dims: (usize, usize)) -> bool {
        self.width >= dims.0 && self.height >= dims.1 && dims.0 > 0 && dims.1 > 0
    }
}
