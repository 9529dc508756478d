//! Input data: detector frames, the reference speckle pattern, calibration.

use common::{BitBuffer2, Buffer2};
use glam::DVec2;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One detector exposure.
///
/// `position` is the acquisition offset (sample translation) expressed in
/// detector pixels: frame pixel `p` views reference coordinate
/// `p + d(p) + position`, where `d` is the pixel mapping displacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub image: Buffer2<f32>,
    /// `true` marks usable pixels. `None` means every pixel is usable.
    pub mask: Option<BitBuffer2>,
    pub position: DVec2,
}

impl Frame {
    pub fn new(image: Buffer2<f32>) -> Self {
        Self {
            image,
            mask: None,
            position: DVec2::ZERO,
        }
    }

    /// Build a frame from raw detector samples of any numeric type.
    ///
    /// Samples that do not convert to a finite `f32` (NaN, infinities, or
    /// values beyond the `f32` range) are stored as 0.0 and masked out.
    pub fn from_raw<T: ToPrimitive>(width: usize, height: usize, samples: &[T]) -> Self {
        assert_eq!(
            samples.len(),
            width * height,
            "pixels length must equal width * height"
        );
        let converted: Vec<Option<f32>> = samples
            .iter()
            .map(|s| s.to_f32().filter(|v| v.is_finite()))
            .collect();
        let mask = converted
            .iter()
            .any(Option::is_none)
            .then(|| BitBuffer2::from_fn(width, height, |x, y| converted[y * width + x].is_some()));
        let pixels = converted.into_iter().map(|v| v.unwrap_or(0.0)).collect();
        Self {
            image: Buffer2::new(width, height, pixels),
            mask,
            position: DVec2::ZERO,
        }
    }

    pub fn with_mask(mut self, mask: BitBuffer2) -> Self {
        assert_eq!(mask.dims(), self.image.dims(), "mask shape mismatch");
        self.mask = Some(mask);
        self
    }

    pub fn with_position(mut self, position: DVec2) -> Self {
        self.position = position;
        self
    }

    pub fn dims(&self) -> (usize, usize) {
        self.image.dims()
    }

    #[inline]
    pub fn is_valid(&self, x: usize, y: usize) -> bool {
        self.mask.as_ref().is_none_or(|m| m.get_xy(x, y))
    }

    pub(crate) fn validate_mask(&self) -> Result<(), ConfigError> {
        validate_mask(self.image.dims(), self.mask.as_ref())
    }
}

/// The speckle pattern frames are tracked against.
///
/// Defined on the detector grid. `version` increases by one every time the
/// refinement loop rebuilds the pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePattern {
    pub image: Buffer2<f32>,
    pub mask: Option<BitBuffer2>,
    pub version: u64,
}

impl ReferencePattern {
    pub fn new(image: Buffer2<f32>) -> Self {
        Self {
            image,
            mask: None,
            version: 0,
        }
    }

    pub fn with_mask(mut self, mask: BitBuffer2) -> Self {
        assert_eq!(mask.dims(), self.image.dims(), "mask shape mismatch");
        self.mask = Some(mask);
        self
    }

    pub fn dims(&self) -> (usize, usize) {
        self.image.dims()
    }

    #[inline]
    pub fn is_valid(&self, x: usize, y: usize) -> bool {
        self.mask.as_ref().is_none_or(|m| m.get_xy(x, y))
    }

    pub(crate) fn validate_mask(&self) -> Result<(), ConfigError> {
        validate_mask(self.image.dims(), self.mask.as_ref())
    }
}

fn validate_mask(dims: (usize, usize), mask: Option<&BitBuffer2>) -> Result<(), ConfigError> {
    match mask {
        Some(m) if m.dims() != dims => Err(ConfigError::MaskDimensionMismatch {
            expected: dims,
            actual: m.dims(),
        }),
        _ => Ok(()),
    }
}

/// Experiment geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Detector pixel pitch (metres).
    pub pixel_size: f64,
    /// Propagation distance between sample and detector (metres).
    pub distance: f64,
    /// Radiation wavelength (metres). Needed only for phase units.
    pub wavelength: Option<f64>,
}

impl Calibration {
    pub fn new(pixel_size: f64, distance: f64) -> Self {
        Self {
            pixel_size,
            distance,
            wavelength: None,
        }
    }

    pub fn with_wavelength(mut self, wavelength: f64) -> Self {
        self.wavelength = Some(wavelength);
        self
    }

    /// Wavefront slope per pixel of displacement.
    pub fn gradient_scale(&self) -> f64 {
        self.pixel_size / self.distance
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |name: &'static str, value: f64| {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(ConfigError::Calibration { name, value })
            }
        };
        positive("pixel_size", self.pixel_size)?;
        positive("distance", self.distance)?;
        if let Some(wavelength) = self.wavelength {
            positive("wavelength", wavelength)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_integer_pixels() {
        let frame = Frame::from_raw(3, 2, &[0u16, 1, 2, 3, 4, 65535]);
        assert_eq!(frame.dims(), (3, 2));
        assert_eq!(frame.image[(2, 1)], 65535.0);
        assert!(frame.mask.is_none());
        assert!(frame.is_valid(1, 1));
    }

    #[test]
    fn test_from_raw_masks_non_finite_samples() {
        let frame = Frame::from_raw(4, 1, &[1.5f64, f64::NAN, f64::INFINITY, 1e300]);
        assert!(frame.mask.is_some());
        assert!(frame.is_valid(0, 0));
        assert!((1..4).all(|x| !frame.is_valid(x, 0)));
        assert_eq!(frame.image[(0, 0)], 1.5);
        assert!((1..4).all(|x| frame.image[(x, 0)] == 0.0));

        let finite = Frame::from_raw(2, 1, &[0.25f64, -3.0]);
        assert!(finite.mask.is_none());
    }

    #[test]
    #[should_panic(expected = "pixels length must equal width * height")]
    fn test_from_raw_wrong_length_panics() {
        Frame::from_raw(2, 2, &[1u8, 2, 3]);
    }

    #[test]
    fn test_frame_mask_marks_invalid() {
        let mask = BitBuffer2::from_fn(4, 4, |x, _| x != 2);
        let frame = Frame::new(Buffer2::new_filled(4, 4, 1.0)).with_mask(mask);
        assert!(!frame.is_valid(2, 3));
        assert!(frame.is_valid(1, 3));
    }

    #[test]
    fn test_frame_serde_roundtrip_preserves_mask_and_position() {
        let mask = BitBuffer2::from_fn(5, 3, |x, y| (x + y) % 3 != 0);
        let image = Buffer2::from_fn(5, 3, |x, y| x as f32 * 0.5 - y as f32);
        let frame = Frame::new(image)
            .with_mask(mask)
            .with_position(DVec2::new(1.25, -3.0));

        let json = serde_json::to_string(&frame).unwrap();
        let restored: Frame = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, frame);
    }

    #[test]
    fn test_calibration_scale_and_validation() {
        let calibration = Calibration::new(50e-6, 0.5);
        assert!((calibration.gradient_scale() - 1e-4).abs() < 1e-18);
        assert_eq!(calibration.validate(), Ok(()));

        let bad = Calibration::new(50e-6, 0.0);
        assert_eq!(
            bad.validate(),
            Err(ConfigError::Calibration {
                name: "distance",
                value: 0.0
            })
        );
        assert!(calibration.with_wavelength(-1.0).validate().is_err());
    }

    #[test]
    fn test_reference_mask_dimension_check() {
        let mut reference = ReferencePattern::new(Buffer2::new_filled(4, 4, 0.0));
        reference.mask = Some(BitBuffer2::new_filled(3, 4, true));
        assert_eq!(
            reference.validate_mask(),
            Err(ConfigError::MaskDimensionMismatch {
                expected: (4, 4),
                actual: (3, 4)
            })
        );
    }
}
