//! Polynomial fit of lens aberration profiles.
//!
//! A one-dimensional profile of pixel aberrations `u(x)` (pixels) along one
//! detector axis is fitted with a polynomial by iteratively reweighted least
//! squares under a [`RobustLoss`]. Integrating the pixel fit gives the phase
//! polynomial through
//!
//! `φ'(x) = 2π · u(x) · (pixel_size / distance)² · defocus / λ`
//!
//! with the constant chosen so the phase has zero mean over the fitted
//! region. All coefficients are stored in ascending powers of the pixel
//! coordinate.


use std::ops::Range;

use nalgebra::{DMatrix, DVector, SVD};
use serde::{Deserialize, Serialize};

use crate::config::{AberrationFitConfig, RobustLoss};
use crate::error::{ConfigError, Error, Result, Stage};
use crate::frame::Calibration;
use crate::pipeline::Reconstruction;

/// Singular values below this fraction of the largest make the fit
/// rank-deficient.
const RANK_TOLERANCE: f64 = 1e-12;

/// Detector axis a profile runs along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
}

/// Result of a polynomial aberration fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolynomialFit {
    /// Pixel aberration polynomial (pixels).
    pub fit: Vec<f64>,
    /// Phase polynomial (radians), one order higher than `fit`.
    pub ph_fit: Vec<f64>,
    /// Relative standard errors of the fitted coefficients. Infinite or NaN
    /// for a coefficient that is exactly zero.
    pub rel_err: Vec<f64>,
    /// Coefficient of determination over the fitted samples.
    pub r_sq: f64,
    /// Third-order phase coefficient in rad/mrad³, when the phase
    /// polynomial has one.
    pub alpha: Option<f64>,
    /// Reweighting iterations used.
    pub iterations: usize,
}

/// Evaluate an ascending-power polynomial at `x`.
pub fn polyval(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

/// One-dimensional aberration profile with the geometry needed to convert
/// between pixel aberrations and phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AberrationFit {
    /// Pixel aberrations along the profile (pixels).
    pub pixel_aberrations: Vec<f64>,
    /// Phase along the profile (radians).
    pub phase: Vec<f64>,
    /// Samples that carry data. Others are skipped by every fit.
    pub valid: Vec<bool>,
    /// Sample `i` sits at pixel coordinate `i - center`.
    pub center: f64,
    /// Sample range to fit. `None` fits the whole profile.
    pub roi: Option<Range<usize>>,
    pub pixel_size: f64,
    pub distance: f64,
    /// Focus-to-sample distance (metres).
    pub defocus: f64,
    pub wavelength: f64,
}

impl AberrationFit {
    /// Profile from explicit samples. Non-finite samples are marked invalid.
    pub fn new(
        pixel_aberrations: Vec<f64>,
        phase: Vec<f64>,
        calibration: &Calibration,
        defocus: f64,
    ) -> Result<Self> {
        calibration.validate()?;
        let wavelength = calibration.wavelength.ok_or(ConfigError::MissingWavelength)?;
        if !(defocus.is_finite() && defocus != 0.0) {
            return Err(ConfigError::OutOfRange {
                name: "defocus",
                range: "finite, non-zero",
                value: defocus,
            }
            .into());
        }
        if pixel_aberrations.len() != phase.len() {
            return Err(ConfigError::ProfileLengthMismatch {
                pixel: pixel_aberrations.len(),
                phase: phase.len(),
            }
            .into());
        }

        let valid = pixel_aberrations
            .iter()
            .zip(&phase)
            .map(|(u, p)| u.is_finite() && p.is_finite())
            .collect();
        Ok(Self {
            pixel_aberrations,
            phase,
            valid,
            center: 0.0,
            roi: None,
            pixel_size: calibration.pixel_size,
            distance: calibration.distance,
            defocus,
            wavelength,
        })
    }

    /// Profile along `axis` of a reconstruction: the mapping displacement
    /// and the phase averaged across the other axis over valid pixels.
    pub fn from_reconstruction(
        reconstruction: &Reconstruction,
        calibration: &Calibration,
        defocus: f64,
        axis: Axis,
    ) -> Result<Self> {
        let wavelength = calibration.wavelength.ok_or(ConfigError::MissingWavelength)?;
        let mapping = &reconstruction.state.mapping;
        let wavefront = &reconstruction.wavefront;
        let mask = &reconstruction.gradient.mask;
        let k = std::f64::consts::TAU / wavelength;

        let (width, height) = mask.dims();
        let (len, across) = match axis {
            Axis::X => (width, height),
            Axis::Y => (height, width),
        };

        let mut pixel = vec![f64::NAN; len];
        let mut phase = vec![f64::NAN; len];
        for i in 0..len {
            let (mut du, mut dp, mut count) = (0.0, 0.0, 0usize);
            for j in 0..across {
                let (x, y) = match axis {
                    Axis::X => (i, j),
                    Axis::Y => (j, i),
                };
                if !mask.get_xy(x, y) {
                    continue;
                }
                let d = mapping.at(x, y);
                du += match axis {
                    Axis::X => d.x,
                    Axis::Y => d.y,
                };
                dp += wavefront.surface[(x, y)] * k;
                count += 1;
            }
            if count > 0 {
                pixel[i] = du / count as f64;
                phase[i] = dp / count as f64;
            }
        }

        let profile = Self::new(pixel, phase, calibration, defocus)?;
        tracing::debug!(
            "Aberration profile along {:?}: {}/{} samples valid",
            axis,
            profile.valid.iter().filter(|&&v| v).count(),
            len
        );
        Ok(profile)
    }

    pub fn with_roi(mut self, roi: Range<usize>) -> Self {
        self.roi = Some(roi);
        self
    }

    pub fn with_center(mut self, center: f64) -> Self {
        self.center = center;
        self
    }

    /// Angular size of one pixel seen from the sample.
    pub fn pixel_aperture(&self) -> f64 {
        self.pixel_size / self.distance
    }

    /// Phase slope per pixel of aberration.
    fn phase_factor(&self) -> f64 {
        let ap = self.pixel_aperture();
        std::f64::consts::TAU * ap * ap * self.defocus / self.wavelength
    }

    fn roi_range(&self) -> Result<Range<usize>> {
        let len = self.pixel_aberrations.len();
        let roi = self.roi.clone().unwrap_or(0..len);
        if roi.start >= roi.end || roi.end > len {
            return Err(ConfigError::InvalidRoi {
                start: roi.start,
                end: roi.end,
                len,
            }
            .into());
        }
        Ok(roi)
    }

    /// Coordinates of the valid samples inside the ROI, with their values.
    fn samples(&self, values: &[f64]) -> Result<(Vec<f64>, Vec<f64>)> {
        let roi = self.roi_range()?;
        Ok(roi
            .filter(|&i| self.valid[i])
            .map(|i| (i as f64 - self.center, values[i]))
            .unzip())
    }

    /// Polynomial values at every ROI sample.
    pub fn model(&self, coefficients: &[f64]) -> Result<Vec<f64>> {
        Ok(self
            .roi_range()?
            .map(|i| polyval(coefficients, i as f64 - self.center))
            .collect())
    }

    /// Integrate a pixel aberration polynomial into a phase polynomial.
    ///
    /// The constant term makes the phase zero-mean over the valid ROI
    /// samples.
    pub fn pix_to_phase(&self, fit: &[f64]) -> Result<Vec<f64>> {
        let factor = self.phase_factor();
        let mut ph_fit = Vec::with_capacity(fit.len() + 1);
        ph_fit.push(0.0);
        ph_fit.extend(fit.iter().enumerate().map(|(j, c)| factor * c / (j + 1) as f64));

        let (x, _) = self.samples(&self.phase)?;
        if !x.is_empty() {
            let mean = x.iter().map(|&x| polyval(&ph_fit, x)).sum::<f64>() / x.len() as f64;
            ph_fit[0] = -mean;
        }
        Ok(ph_fit)
    }

    /// Differentiate a phase polynomial back into pixel aberrations.
    pub fn phase_to_pix(&self, ph_fit: &[f64]) -> Vec<f64> {
        let factor = self.phase_factor();
        ph_fit
            .iter()
            .enumerate()
            .skip(1)
            .map(|(j, c)| c * j as f64 / factor)
            .collect()
    }

    fn alpha(&self, ph_fit: &[f64]) -> Option<f64> {
        ph_fit
            .get(3)
            .map(|c3| c3 / self.pixel_aperture().powi(3) * 1e-9)
    }

    /// Fit the pixel aberration profile with a polynomial of
    /// `config.order`.
    pub fn fit(&self, config: &AberrationFitConfig) -> Result<PolynomialFit> {
        config.validate()?;
        let (x, y) = self.samples(&self.pixel_aberrations)?;
        let solution = robust_polyfit(&x, &y, config)?;

        let ph_fit = self.pix_to_phase(&solution.coefficients)?;
        let rel_err = solution
            .errors
            .iter()
            .zip(&solution.coefficients)
            .map(|(e, c)| (e / c).abs())
            .collect();
        tracing::debug!(
            "Pixel aberration fit: order {}, {} samples, r² {:.6}, {} iterations",
            config.order,
            x.len(),
            solution.r_sq,
            solution.iterations
        );

        Ok(PolynomialFit {
            alpha: self.alpha(&ph_fit),
            fit: solution.coefficients,
            ph_fit,
            rel_err,
            r_sq: solution.r_sq,
            iterations: solution.iterations,
        })
    }

    /// Fit the phase profile directly with a polynomial of `config.order`
    /// and convert it to pixel aberrations.
    pub fn fit_phase(&self, config: &AberrationFitConfig) -> Result<PolynomialFit> {
        config.validate()?;
        let (x, y) = self.samples(&self.phase)?;
        let solution = robust_polyfit(&x, &y, config)?;

        let fit = self.phase_to_pix(&solution.coefficients);
        let rel_err = solution
            .errors
            .iter()
            .zip(&solution.coefficients)
            .skip(1)
            .map(|(e, c)| (e / c).abs())
            .collect();
        tracing::debug!(
            "Phase fit: order {}, {} samples, r² {:.6}, {} iterations",
            config.order,
            x.len(),
            solution.r_sq,
            solution.iterations
        );

        Ok(PolynomialFit {
            alpha: self.alpha(&solution.coefficients),
            fit,
            ph_fit: solution.coefficients,
            rel_err,
            r_sq: solution.r_sq,
            iterations: solution.iterations,
        })
    }
}

// ============================================================================
// Robust polynomial least squares
// ============================================================================

struct PolySolution {
    coefficients: Vec<f64>,
    /// Standard errors of `coefficients`.
    errors: Vec<f64>,
    r_sq: f64,
    iterations: usize,
}

/// Weighted least-squares solution in scaled coordinates.
struct WeightedSolve {
    coefficients: Vec<f64>,
    /// Diagonal of `(JᵀJ)⁻¹` for the weighted design matrix `J`.
    covariance: Vec<f64>,
}

/// Iteratively reweighted polynomial fit of `y(x)` under `config.loss`.
fn robust_polyfit(x: &[f64], y: &[f64], config: &AberrationFitConfig) -> Result<PolySolution> {
    let terms = config.order + 1;
    let n = x.len();
    let rank_deficient = || {
        let mut distinct = x.to_vec();
        distinct.sort_by(f64::total_cmp);
        distinct.dedup();
        Error::InsufficientData {
            stage: Stage::AberrationFit,
            found: distinct.len(),
            required: terms,
        }
    };
    if n < terms {
        return Err(rank_deficient());
    }

    // Powers of raw pixel coordinates span many decades; solve in [-1, 1].
    let scale = x.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let scale = if scale > 0.0 { scale } else { 1.0 };
    let xs: Vec<f64> = x.iter().map(|v| v / scale).collect();

    let mut weights = vec![1.0; n];
    let mut solution = solve_weighted(&xs, y, &weights, terms).ok_or_else(rank_deficient)?;
    let mut iterations = 0;

    if config.loss != RobustLoss::Linear {
        for iteration in 1..=config.max_iterations {
            iterations = iteration;
            for (w, (&xi, &yi)) in weights.iter_mut().zip(xs.iter().zip(y)) {
                let r = (polyval(&solution.coefficients, xi) - yi) / config.loss_scale;
                *w = config.loss.weight(r * r);
            }
            let next = solve_weighted(&xs, y, &weights, terms).ok_or_else(rank_deficient)?;
            let settled = next
                .coefficients
                .iter()
                .zip(&solution.coefficients)
                .all(|(a, b)| (a - b).abs() <= config.tolerance * a.abs().max(b.abs()));
            solution = next;
            if settled {
                break;
            }
        }
    }

    let residuals: Vec<f64> = xs
        .iter()
        .zip(y)
        .map(|(&xi, &yi)| polyval(&solution.coefficients, xi) - yi)
        .collect();
    let ss_res: f64 = residuals.iter().map(|r| r * r).sum();
    let mean = y.iter().sum::<f64>() / n as f64;
    let ss_tot: f64 = y.iter().map(|v| (v - mean) * (v - mean)).sum();
    let r_sq = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };

    let dof = n - terms;
    let variance = if dof > 0 { ss_res / dof as f64 } else { 0.0 };
    let mut power = 1.0;
    let mut coefficients = Vec::with_capacity(terms);
    let mut errors = Vec::with_capacity(terms);
    for (c, cov) in solution.coefficients.iter().zip(&solution.covariance) {
        coefficients.push(c / power);
        errors.push((variance * cov.abs()).sqrt() / power);
        power *= scale;
    }

    Ok(PolySolution {
        coefficients,
        errors,
        r_sq,
        iterations,
    })
}

/// Weighted polynomial least squares via SVD of the design matrix.
///
/// Returns `None` when the design matrix is rank-deficient.
fn solve_weighted(x: &[f64], y: &[f64], weights: &[f64], terms: usize) -> Option<WeightedSolve> {
    let n = x.len();
    let design = DMatrix::from_fn(n, terms, |i, k| weights[i].sqrt() * x[i].powi(k as i32));
    let rhs = DVector::from_fn(n, |i, _| weights[i].sqrt() * y[i]);

    let svd = SVD::new(design, true, true);
    let u = svd.u.as_ref()?;
    let v_t = svd.v_t.as_ref()?;
    let sigma = &svd.singular_values;

    let largest = sigma.iter().fold(0.0f64, |m, &s| m.max(s));
    if largest <= 0.0 || sigma.iter().any(|&s| s <= largest * RANK_TOLERANCE) {
        return None;
    }

    let projected = u.transpose() * rhs;
    let mut coefficients = vec![0.0; terms];
    let mut covariance = vec![0.0; terms];
    for (j, &s) in sigma.iter().enumerate() {
        for k in 0..terms {
            let v = v_t[(j, k)];
            coefficients[k] += v * projected[j] / s;
            covariance[k] += v * v / (s * s);
        }
    }

    Some(WeightedSolve {
        coefficients,
        covariance,
    })
}
