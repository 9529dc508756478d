//! Analytic speckle patterns.
//!
//! A speckle field is a sum of random Gaussian blobs. It can be evaluated
//! at any continuous coordinate, so displaced frames are rendered exactly
//! rather than by resampling a reference image.

use common::Buffer2;
use glam::DVec2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const CELL: f64 = 8.0;

#[derive(Debug, Clone, Copy)]
struct Blob {
    center: DVec2,
    amplitude: f64,
}

/// Continuous random speckle pattern covering `[-pad, width + pad) x
/// [-pad, height + pad)`.
#[derive(Debug, Clone)]
pub struct SpeckleField {
    blobs: Vec<Blob>,
    sigma: f64,
    background: f64,
    min: DVec2,
    cols: usize,
    rows: usize,
    buckets: Vec<Vec<usize>>,
}

impl SpeckleField {
    pub fn new(width: usize, height: usize, pad: f64, sigma: f64, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let min = DVec2::splat(-pad);
        let max = DVec2::new(width as f64 + pad, height as f64 + pad);
        let extent = max - min;

        let count = ((extent.x * extent.y) / (6.0 * sigma * sigma)).ceil() as usize;
        let blobs: Vec<Blob> = (0..count)
            .map(|_| Blob {
                center: DVec2::new(
                    rng.random_range(min.x..max.x),
                    rng.random_range(min.y..max.y),
                ),
                amplitude: rng.random_range(0.5..1.0),
            })
            .collect();

        let cols = (extent.x / CELL).ceil() as usize + 1;
        let rows = (extent.y / CELL).ceil() as usize + 1;
        let mut buckets = vec![Vec::new(); cols * rows];
        for (i, blob) in blobs.iter().enumerate() {
            let cell = ((blob.center - min) / CELL).floor();
            let (cx, cy) = (cell.x as usize, cell.y as usize);
            buckets[cy.min(rows - 1) * cols + cx.min(cols - 1)].push(i);
        }

        Self {
            blobs,
            sigma,
            background: 0.2,
            min,
            cols,
            rows,
            buckets,
        }
    }

    /// Intensity at a continuous position.
    pub fn value(&self, p: DVec2) -> f64 {
        let cutoff = 6.0 * self.sigma;
        let cutoff_sq = cutoff * cutoff;
        let inv_two_sigma_sq = 1.0 / (2.0 * self.sigma * self.sigma);

        let lo = ((p - cutoff - self.min) / CELL).floor();
        let hi = ((p + cutoff - self.min) / CELL).floor();
        let clamp = |v: f64, n: usize| v.clamp(0.0, (n - 1) as f64) as usize;

        let mut sum = self.background;
        for cy in clamp(lo.y, self.rows)..=clamp(hi.y, self.rows) {
            for cx in clamp(lo.x, self.cols)..=clamp(hi.x, self.cols) {
                for &i in &self.buckets[cy * self.cols + cx] {
                    let blob = &self.blobs[i];
                    let r2 = (p - blob.center).length_squared();
                    if r2 < cutoff_sq {
                        sum += blob.amplitude * (-r2 * inv_two_sigma_sq).exp();
                    }
                }
            }
        }
        sum
    }
}

/// Render the undisturbed pattern on a `width x height` grid.
pub fn render_reference(field: &SpeckleField, width: usize, height: usize) -> Buffer2<f32> {
    Buffer2::from_fn(width, height, |x, y| {
        field.value(DVec2::new(x as f64, y as f64)) as f32
    })
}

/// Render a frame whose pixel `p` sees the pattern at
/// `p + displacement(p) + position`.
pub fn render_frame(
    field: &SpeckleField,
    width: usize,
    height: usize,
    position: DVec2,
    displacement: impl Fn(DVec2) -> DVec2,
) -> Buffer2<f32> {
    Buffer2::from_fn(width, height, |x, y| {
        let p = DVec2::new(x as f64, y as f64);
        field.value(p + displacement(p) + position) as f32
    })
}

/// Displacement field of a defocus wavefront `W = a/2 · |p - center|²`
/// observed with unit pixel size and propagation distance.
pub fn defocus(a: f64, center: DVec2) -> impl Fn(DVec2) -> DVec2 + Copy {
    move |p| a * (p - center)
}

/// The defocus wavefront itself.
pub fn defocus_wavefront(a: f64, center: DVec2, p: DVec2) -> f64 {
    0.5 * a * (p - center).length_squared()
}
