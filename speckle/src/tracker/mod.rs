//! Window grid tracking and the iterative refinement loop.

mod mapping;
mod reference;
mod refinement;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use glam::DVec2;

use crate::config::TrackingConfig;
use crate::correlation::{Correlator, DisplacementEstimate, ReferenceRegion, Window};
use crate::executor::Executor;
use crate::frame::{Frame, ReferencePattern};

pub use mapping::PixelMapping;
pub use reference::update_reference;
pub use refinement::{PassReport, RefinementState, refine_step};

/// Identifies one window: frame index and window origin.
///
/// Ordered by frame, then row, then column, so iteration over a
/// [`SparseField`] is deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowKey {
    pub frame: usize,
    pub y: usize,
    pub x: usize,
}

/// Per-window estimates keyed by window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseField {
    entries: BTreeMap<WindowKey, DisplacementEstimate>,
}

impl SparseField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: WindowKey, estimate: DisplacementEstimate) {
        self.entries.insert(key, estimate);
    }

    pub fn get(&self, key: &WindowKey) -> Option<&DisplacementEstimate> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&WindowKey, &DisplacementEstimate)> {
        self.entries.iter()
    }

    /// Estimates that passed every check.
    pub fn valid(&self) -> impl Iterator<Item = (&WindowKey, &DisplacementEstimate)> {
        self.entries.iter().filter(|(_, e)| e.is_valid())
    }

    pub fn valid_count(&self) -> usize {
        self.valid().count()
    }

    /// Merge another field. Entries of `other` win on key collisions.
    pub fn extend(&mut self, other: SparseField) {
        self.entries.extend(other.entries);
    }
}

impl FromIterator<(WindowKey, DisplacementEstimate)> for SparseField {
    fn from_iter<I: IntoIterator<Item = (WindowKey, DisplacementEstimate)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Window origins covering an image of `dims`.
pub fn window_origins(dims: (usize, usize), size: usize, stride: usize) -> Vec<(usize, usize)> {
    let (width, height) = dims;
    if size > width || size > height || stride == 0 {
        return Vec::new();
    }
    (0..=height - size)
        .step_by(stride)
        .flat_map(|y| (0..=width - size).step_by(stride).map(move |x| (x, y)))
        .collect()
}

/// Correlates a grid of frame windows against the reference.
#[derive(Debug, Clone)]
pub struct WindowTracker {
    config: TrackingConfig,
    correlator: Correlator,
    search_margin: usize,
}

impl WindowTracker {
    pub fn new(config: TrackingConfig, correlator: Correlator) -> Self {
        let search_margin = config.search_margin;
        Self {
            config,
            correlator,
            search_margin,
        }
    }

    /// Override the search margin (refinement tightens it between passes).
    pub fn with_search_margin(mut self, margin: usize) -> Self {
        self.search_margin = margin;
        self
    }

    pub fn search_margin(&self) -> usize {
        self.search_margin
    }

    /// Track a single frame, keyed as frame 0.
    pub fn track<E: Executor>(
        &self,
        frame: &Frame,
        reference: &ReferencePattern,
        mapping: &PixelMapping,
        executor: &E,
    ) -> SparseField {
        self.track_frame(0, frame, reference, mapping, executor)
    }

    /// Track every frame. Keys carry the frame index.
    pub fn track_all<E: Executor>(
        &self,
        frames: &[Frame],
        reference: &ReferencePattern,
        mapping: &PixelMapping,
        executor: &E,
    ) -> SparseField {
        let mut field = SparseField::new();
        for (index, frame) in frames.iter().enumerate() {
            field.extend(self.track_frame(index, frame, reference, mapping, executor));
        }
        field
    }

    fn track_frame<E: Executor>(
        &self,
        index: usize,
        frame: &Frame,
        reference: &ReferencePattern,
        mapping: &PixelMapping,
        executor: &E,
    ) -> SparseField {
        let size = self.config.window_size;
        let origins = window_origins(frame.dims(), size, self.config.window_stride);

        let estimates = executor.map(&origins, |&(x, y)| {
            let window = Window::in_frame(frame, x, y, size);
            let predicted = mapping.sample(window.center()) + frame.position;
            let anchor = (
                x as isize + predicted.x.round() as isize,
                y as isize + predicted.y.round() as isize,
            );
            let region = ReferenceRegion::around(reference, anchor, (size, size), self.search_margin);

            let mut estimate = self.correlator.correlate(&window, &region);
            if estimate.status.has_peak() {
                // Shift relative to the anchor -> displacement in frame coordinates.
                let base = DVec2::new((anchor.0 - x as isize) as f64, (anchor.1 - y as isize) as f64);
                estimate.displacement += base - frame.position;
            }
            estimate
        });

        let field: SparseField = origins
            .iter()
            .zip(estimates)
            .map(|(&(x, y), estimate)| (WindowKey { frame: index, y, x }, estimate))
            .collect();

        tracing::debug!(
            "Tracked frame {}: {}/{} valid windows, margin {}",
            index,
            field.valid_count(),
            field.len(),
            self.search_margin
        );
        field
    }
}
