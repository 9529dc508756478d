//! Sparse window displacements to a dense gradient field.
//!
//! 1. Estimates of the same window origin from different frames are merged
//!    with a confidence-weighted robust mean into one site
//! 2. Every detector pixel fits a robust weighted plane to the sites within
//!    the neighborhood radius (Gaussian distance weight × confidence) and
//!    takes its value at the pixel. Pixels whose sites are too few or all
//!    collinear stay invalid
//! 3. Displacements are scaled to wavefront slope by the calibration


use std::collections::BTreeMap;

use common::{BitBuffer2, Buffer2};
use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::config::{Config, RobustConfig};
use crate::executor::Executor;
use crate::frame::Calibration;
use crate::math::robust::{robust_mean, robust_plane_fit};
use crate::tracker::SparseField;

/// Dense wavefront slope on the detector grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientField {
    /// Slope along x (dimensionless).
    pub gx: Buffer2<f64>,
    /// Slope along y (dimensionless).
    pub gy: Buffer2<f64>,
    /// `true` where both components are defined.
    pub mask: BitBuffer2,
    /// Detector pixel pitch (metres), the integration step.
    pub pixel_size: f64,
    /// Valid window sites the field was assembled from.
    pub samples: usize,
}

impl GradientField {
    pub fn new(gx: Buffer2<f64>, gy: Buffer2<f64>, mask: BitBuffer2, pixel_size: f64) -> Self {
        assert_eq!(gx.dims(), gy.dims(), "gradient components must share a grid");
        assert_eq!(gx.dims(), mask.dims(), "mask shape mismatch");
        Self {
            gx,
            gy,
            mask,
            pixel_size,
            samples: 0,
        }
    }

    /// Field with every pixel masked out.
    pub fn invalid(width: usize, height: usize, pixel_size: f64, samples: usize) -> Self {
        Self {
            gx: Buffer2::new_default(width, height),
            gy: Buffer2::new_default(width, height),
            mask: BitBuffer2::new_filled(width, height, false),
            pixel_size,
            samples,
        }
    }

    pub fn dims(&self) -> (usize, usize) {
        self.gx.dims()
    }

    #[inline]
    pub fn is_valid(&self, x: usize, y: usize) -> bool {
        self.mask.get_xy(x, y)
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize) -> DVec2 {
        DVec2::new(self.gx[(x, y)], self.gy[(x, y)])
    }

    pub fn valid_count(&self) -> usize {
        self.mask.count_ones()
    }

    /// No pixel is valid: reconstruction cannot proceed.
    pub fn is_empty(&self) -> bool {
        self.valid_count() == 0
    }
}

/// One window location with its merged displacement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Site {
    pub center: DVec2,
    pub displacement: DVec2,
    pub confidence: f64,
}

/// Merge valid estimates sharing a window origin across frames.
pub(crate) fn merge_sites(sparse: &SparseField, robust: &RobustConfig) -> Vec<Site> {
    let mut groups: BTreeMap<(usize, usize), Vec<_>> = BTreeMap::new();
    for (key, estimate) in sparse.valid() {
        groups.entry((key.y, key.x)).or_default().push(*estimate);
    }

    groups
        .into_values()
        .map(|estimates| {
            let dx: Vec<f64> = estimates.iter().map(|e| e.displacement.x).collect();
            let dy: Vec<f64> = estimates.iter().map(|e| e.displacement.y).collect();
            let confidence: Vec<f64> = estimates.iter().map(|e| e.confidence).collect();

            let mx = robust_mean(&dx, Some(&confidence), robust);
            let my = robust_mean(&dy, Some(&confidence), robust);

            let (mut sum, mut count) = (0.0, 0usize);
            for (i, c) in confidence.iter().enumerate() {
                let inlier = |mask: &[bool]| mask.get(i).copied().unwrap_or(false);
                if inlier(&mx.inliers) && inlier(&my.inliers) {
                    sum += c;
                    count += 1;
                }
            }
            let mean_confidence = if count > 0 {
                sum / count as f64
            } else {
                confidence.iter().sum::<f64>() / confidence.len() as f64
            };

            Site {
                center: estimates[0].center,
                displacement: DVec2::new(mx.estimate, my.estimate),
                confidence: mean_confidence,
            }
        })
        .collect()
}

/// Uniform bucket grid over site centers for radius queries.
struct SiteGrid {
    cell: f64,
    cols: usize,
    rows: usize,
    buckets: Vec<Vec<usize>>,
}

impl SiteGrid {
    /// Cells are at least one pixel wide, so the grid never outgrows the
    /// detector.
    fn new(sites: &[Site], dims: (usize, usize), radius: f64) -> Self {
        let cell = radius.max(1.0);
        let cols = (dims.0 as f64 / cell).ceil() as usize + 1;
        let rows = (dims.1 as f64 / cell).ceil() as usize + 1;
        let mut buckets = vec![Vec::new(); cols * rows];
        for (i, site) in sites.iter().enumerate() {
            let (cx, cy) = Self::cell_of(site.center, cell, cols, rows);
            buckets[cy * cols + cx].push(i);
        }
        Self {
            cell,
            cols,
            rows,
            buckets,
        }
    }

    fn cell_of(p: DVec2, cell: f64, cols: usize, rows: usize) -> (usize, usize) {
        let c = (p / cell).floor();
        (
            c.x.clamp(0.0, (cols - 1) as f64) as usize,
            c.y.clamp(0.0, (rows - 1) as f64) as usize,
        )
    }

    /// Indices of sites in the 3×3 cells around `p`, in ascending order.
    fn candidates(&self, p: DVec2, out: &mut Vec<usize>) {
        out.clear();
        let (cx, cy) = Self::cell_of(p, self.cell, self.cols, self.rows);
        for y in cy.saturating_sub(1)..=(cy + 1).min(self.rows - 1) {
            for x in cx.saturating_sub(1)..=(cx + 1).min(self.cols - 1) {
                out.extend_from_slice(&self.buckets[y * self.cols + x]);
            }
        }
        out.sort_unstable();
    }
}

/// Whether `offsets` determine a plane, i.e. do not all lie on one line.
fn spans_plane(offsets: &[DVec2]) -> bool {
    let mean = offsets.iter().sum::<DVec2>() / offsets.len() as f64;
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for o in offsets {
        let d = *o - mean;
        sxx += d.x * d.x;
        sxy += d.x * d.y;
        syy += d.y * d.y;
    }
    sxx * syy - sxy * sxy > 1e-9 * (sxx + syy) * (sxx + syy)
}

/// Assemble a dense gradient field on a `dims` grid.
///
/// Returns an all-invalid field when fewer than
/// `assembly.min_valid_samples` sites are valid; callers must treat that
/// as a failed reconstruction.
pub fn assemble<E: Executor>(
    sparse: &SparseField,
    dims: (usize, usize),
    calibration: &Calibration,
    config: &Config,
    executor: &E,
) -> GradientField {
    let sites = merge_sites(sparse, &config.robust);
    let (width, height) = dims;

    if sites.len() < config.assembly.min_valid_samples {
        tracing::warn!(
            "Gradient assembly: only {} valid sites, need {}",
            sites.len(),
            config.assembly.min_valid_samples
        );
        return GradientField::invalid(width, height, calibration.pixel_size, sites.len());
    }

    let radius = config.assembly.radius(config.tracking.window_stride);
    let grid = SiteGrid::new(&sites, dims, radius);
    let inv_two_sigma_sq = 2.0 / (radius * radius);
    let min_neighbors = config.assembly.min_neighbors;
    let scale = calibration.gradient_scale();

    let rows: Vec<Vec<Option<DVec2>>> = executor.map_indices(height, |y| {
        let mut candidates = Vec::new();
        let mut offsets = Vec::new();
        let mut dx = Vec::new();
        let mut dy = Vec::new();
        let mut weights = Vec::new();

        (0..width)
            .map(|x| {
                let p = DVec2::new(x as f64, y as f64);
                grid.candidates(p, &mut candidates);

                offsets.clear();
                dx.clear();
                dy.clear();
                weights.clear();
                for &i in &candidates {
                    let site = &sites[i];
                    let offset = site.center - p;
                    let r2 = offset.length_squared();
                    if r2 > radius * radius {
                        continue;
                    }
                    offsets.push(offset);
                    dx.push(site.displacement.x);
                    dy.push(site.displacement.y);
                    weights.push((-r2 * inv_two_sigma_sq).exp() * site.confidence);
                }
                if offsets.len() < min_neighbors || !spans_plane(&offsets) {
                    return None;
                }

                let fx = robust_plane_fit(&offsets, &dx, &weights, &config.robust);
                let fy = robust_plane_fit(&offsets, &dy, &weights, &config.robust);
                Some(DVec2::new(fx.intercept, fy.intercept) * scale)
            })
            .collect()
    });

    let mut gx = Buffer2::new_default(width, height);
    let mut gy = Buffer2::new_default(width, height);
    let mut mask = BitBuffer2::new_filled(width, height, false);
    for (y, row) in rows.iter().enumerate() {
        for (x, value) in row.iter().enumerate() {
            if let Some(g) = value {
                gx[(x, y)] = g.x;
                gy[(x, y)] = g.y;
                mask.set_xy(x, y, true);
            }
        }
    }

    let field = GradientField {
        gx,
        gy,
        mask,
        pixel_size: calibration.pixel_size,
        samples: sites.len(),
    };
    tracing::debug!(
        "Gradient assembly: {} sites, {}/{} pixels valid, radius {:.1}",
        sites.len(),
        field.valid_count(),
        width * height,
        radius
    );
    field
}
