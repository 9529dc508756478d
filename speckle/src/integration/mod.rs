//! Least-squares integration of a masked gradient field.
//!
//! Every pair of horizontally or vertically adjacent valid pixels gives one
//! equation `φ[j] - φ[i] = h · (g[i] + g[j]) / 2`. The normal equations are
//! the graph Laplacian of the valid-pixel grid (a discrete Poisson problem
//! with natural boundary conditions at mask edges), solved with
//! Jacobi-preconditioned conjugate gradients. The surface is defined up to
//! one constant per connected region; each region is shifted to zero mean.


use common::{BitBuffer2, Buffer2};
use serde::{Deserialize, Serialize};

use crate::config::IntegrationConfig;
use crate::error::{Error, Result, Stage};
use crate::gradient::GradientField;

/// Reconstructed surface with diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wavefront {
    /// Optical path (metres when the gradient is a slope and `pixel_size`
    /// is in metres). 0.0 where invalid.
    pub surface: Buffer2<f64>,
    /// Identical to the mask of the integrated gradient field.
    pub mask: BitBuffer2,
    /// Root-mean-square mismatch, in slope units, between the surface's
    /// finite differences and the input gradient over each pixel's
    /// incident equations. 0.0 where invalid or isolated.
    pub residual: Buffer2<f64>,
    /// Root-mean-square mismatch over all equations.
    pub rms_residual: f64,
    /// Conjugate-gradient iterations used.
    pub iterations: usize,
    pub pixel_size: f64,
}

impl Wavefront {
    pub fn dims(&self) -> (usize, usize) {
        self.surface.dims()
    }

    #[inline]
    pub fn is_valid(&self, x: usize, y: usize) -> bool {
        self.mask.get_xy(x, y)
    }

    /// Phase in radians for the given wavelength (metres).
    pub fn to_phase(&self, wavelength: f64) -> Buffer2<f64> {
        let k = std::f64::consts::TAU / wavelength;
        self.surface.map(|&v| v * k)
    }
}

/// One finite-difference equation between pixel indices `a` and `b`
/// (`b` to the right of or below `a`).
#[derive(Debug, Clone, Copy)]
struct Edge {
    a: usize,
    b: usize,
    /// Expected `φ[b] - φ[a]`.
    delta: f64,
}

/// Valid pixels and their adjacency.
struct Graph {
    /// `(x, y)` of each unknown.
    pixels: Vec<(usize, usize)>,
    edges: Vec<Edge>,
    /// Neighbor unknowns of each unknown.
    neighbors: Vec<Vec<usize>>,
}

impl Graph {
    fn build(gradient: &GradientField) -> Self {
        let (width, height) = gradient.dims();
        let h = gradient.pixel_size;

        let mut index = vec![usize::MAX; width * height];
        let mut pixels = Vec::new();
        for y in 0..height {
            for x in 0..width {
                if gradient.is_valid(x, y) {
                    index[y * width + x] = pixels.len();
                    pixels.push((x, y));
                }
            }
        }

        let mut edges = Vec::new();
        let mut neighbors = vec![Vec::new(); pixels.len()];
        for (a, &(x, y)) in pixels.iter().enumerate() {
            if x + 1 < width && gradient.is_valid(x + 1, y) {
                let b = index[y * width + x + 1];
                let delta = h * 0.5 * (gradient.gx[(x, y)] + gradient.gx[(x + 1, y)]);
                edges.push(Edge { a, b, delta });
                neighbors[a].push(b);
                neighbors[b].push(a);
            }
            if y + 1 < height && gradient.is_valid(x, y + 1) {
                let b = index[(y + 1) * width + x];
                let delta = h * 0.5 * (gradient.gy[(x, y)] + gradient.gy[(x, y + 1)]);
                edges.push(Edge { a, b, delta });
                neighbors[a].push(b);
                neighbors[b].push(a);
            }
        }

        Self {
            pixels,
            edges,
            neighbors,
        }
    }

    /// `L · v` for the graph Laplacian `L`.
    fn apply(&self, v: &[f64], out: &mut [f64]) {
        for (i, nbrs) in self.neighbors.iter().enumerate() {
            let mut acc = nbrs.len() as f64 * v[i];
            for &j in nbrs {
                acc -= v[j];
            }
            out[i] = acc;
        }
    }

    /// Right-hand side `Aᵀ · delta` of the normal equations.
    fn rhs(&self) -> Vec<f64> {
        let mut rhs = vec![0.0; self.pixels.len()];
        for e in &self.edges {
            rhs[e.a] -= e.delta;
            rhs[e.b] += e.delta;
        }
        rhs
    }

    /// Connected-component label of every unknown.
    fn components(&self) -> (Vec<usize>, usize) {
        let mut label = vec![usize::MAX; self.pixels.len()];
        let mut count = 0;
        let mut stack = Vec::new();
        for start in 0..self.pixels.len() {
            if label[start] != usize::MAX {
                continue;
            }
            label[start] = count;
            stack.push(start);
            while let Some(i) = stack.pop() {
                for &j in &self.neighbors[i] {
                    if label[j] == usize::MAX {
                        label[j] = count;
                        stack.push(j);
                    }
                }
            }
            count += 1;
        }
        (label, count)
    }
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Jacobi-preconditioned conjugate gradients for `L φ = rhs` from zero.
///
/// Returns the solution and the iteration count.
fn solve(graph: &Graph, rhs: &[f64], config: &IntegrationConfig) -> (Vec<f64>, usize) {
    let n = rhs.len();
    let mut phi = vec![0.0; n];
    let rhs_norm = dot(rhs, rhs).sqrt();
    if rhs_norm == 0.0 {
        return (phi, 0);
    }

    let inv_diag: Vec<f64> = graph
        .neighbors
        .iter()
        .map(|nbrs| if nbrs.is_empty() { 0.0 } else { 1.0 / nbrs.len() as f64 })
        .collect();
    let precondition = |r: &[f64], z: &mut [f64]| {
        for ((zi, ri), di) in z.iter_mut().zip(r).zip(&inv_diag) {
            *zi = ri * di;
        }
    };

    let mut r = rhs.to_vec();
    let mut z = vec![0.0; n];
    precondition(&r, &mut z);
    let mut p = z.clone();
    let mut lp = vec![0.0; n];
    let mut rz = dot(&r, &z);
    let threshold = config.tolerance * rhs_norm;

    for iteration in 1..=config.max_iterations {
        graph.apply(&p, &mut lp);
        let plp = dot(&p, &lp);
        if plp <= 0.0 {
            return (phi, iteration - 1);
        }
        let alpha = rz / plp;
        for i in 0..n {
            phi[i] += alpha * p[i];
            r[i] -= alpha * lp[i];
        }
        if dot(&r, &r).sqrt() <= threshold {
            return (phi, iteration);
        }
        precondition(&r, &mut z);
        let rz_next = dot(&r, &z);
        let beta = rz_next / rz;
        rz = rz_next;
        for i in 0..n {
            p[i] = z[i] + beta * p[i];
        }
    }

    tracing::warn!(
        "Wavefront integration stopped after {} iterations without reaching tolerance {:e}",
        config.max_iterations,
        config.tolerance
    );
    (phi, config.max_iterations)
}

/// Integrate `gradient` into a surface over its valid mask.
///
/// Fails with [`Error::InsufficientData`] when fewer than
/// `config.min_valid_pixels` pixels are valid.
pub fn integrate(gradient: &GradientField, config: &IntegrationConfig) -> Result<Wavefront> {
    let valid = gradient.valid_count();
    if valid < config.min_valid_pixels {
        return Err(Error::InsufficientData {
            stage: Stage::Integration,
            found: valid,
            required: config.min_valid_pixels,
        });
    }

    let graph = Graph::build(gradient);
    let rhs = graph.rhs();
    let (mut phi, iterations) = solve(&graph, &rhs, config);

    let (labels, components) = graph.components();
    let mut sums = vec![0.0; components];
    let mut counts = vec![0usize; components];
    for (value, &label) in phi.iter().zip(&labels) {
        sums[label] += value;
        counts[label] += 1;
    }
    for (value, &label) in phi.iter_mut().zip(&labels) {
        *value -= sums[label] / counts[label] as f64;
    }

    let (width, height) = gradient.dims();
    let h = gradient.pixel_size;
    let mut surface = Buffer2::new_default(width, height);
    for (&(x, y), &value) in graph.pixels.iter().zip(&phi) {
        surface[(x, y)] = value;
    }

    let mut squared = vec![0.0; phi.len()];
    let mut incident = vec![0usize; phi.len()];
    let mut total = 0.0;
    for e in &graph.edges {
        let mismatch = (phi[e.b] - phi[e.a] - e.delta) / h;
        let sq = mismatch * mismatch;
        squared[e.a] += sq;
        squared[e.b] += sq;
        incident[e.a] += 1;
        incident[e.b] += 1;
        total += sq;
    }
    let mut residual = Buffer2::new_default(width, height);
    for (i, &(x, y)) in graph.pixels.iter().enumerate() {
        if incident[i] > 0 {
            residual[(x, y)] = (squared[i] / incident[i] as f64).sqrt();
        }
    }
    let rms_residual = if graph.edges.is_empty() {
        0.0
    } else {
        (total / graph.edges.len() as f64).sqrt()
    };

    tracing::info!(
        "Integrated {} pixels in {} regions: {} iterations, rms residual {:.3e}",
        valid,
        components,
        iterations,
        rms_residual
    );

    Ok(Wavefront {
        surface,
        mask: gradient.mask.clone(),
        residual,
        rms_residual,
        iterations,
        pixel_size: h,
    })
}
