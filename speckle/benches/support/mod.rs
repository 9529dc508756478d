//! Synthetic speckle frames for benchmarks.

use common::Buffer2;
use glam::DVec2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const SIGMA: f64 = 1.5;

/// Random Gaussian blob centres over a padded `width x height` field.
pub fn blobs(width: usize, height: usize, seed: u64) -> Vec<(DVec2, f64)> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let pad = 16.0;
    let count = ((width as f64 + 2.0 * pad) * (height as f64 + 2.0 * pad) / (6.0 * SIGMA * SIGMA)) as usize;
    (0..count)
        .map(|_| {
            let center = DVec2::new(
                rng.random_range(-pad..width as f64 + pad),
                rng.random_range(-pad..height as f64 + pad),
            );
            (center, rng.random_range(0.5..1.0))
        })
        .collect()
}

/// Splat the blobs into an image after moving each centre by `shift`.
///
/// A frame pixel `p` sees the reference at `p + d(p)`, so blobs move by
/// `-d`.
pub fn render(
    width: usize,
    height: usize,
    blobs: &[(DVec2, f64)],
    shift: impl Fn(DVec2) -> DVec2,
) -> Buffer2<f32> {
    let mut image = Buffer2::new_filled(width, height, 0.1f32);
    let reach = (4.0 * SIGMA).ceil() as isize;
    for &(center, amplitude) in blobs {
        let c = center - shift(center);
        let (cx, cy) = (c.x.round() as isize, c.y.round() as isize);
        for y in (cy - reach).max(0)..(cy + reach + 1).min(height as isize) {
            for x in (cx - reach).max(0)..(cx + reach + 1).min(width as isize) {
                let d = DVec2::new(x as f64, y as f64) - c;
                let value = amplitude * (-d.length_squared() / (2.0 * SIGMA * SIGMA)).exp();
                image[(x as usize, y as usize)] += value as f32;
            }
        }
    }
    image
}
