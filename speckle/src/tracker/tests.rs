use common::{BitBuffer2, Buffer2};
use glam::DVec2;

use super::*;
use crate::config::{Config, TrackingConfig};
use crate::correlation::MatchStatus;
use crate::executor::{SequentialExecutor, ThreadPoolExecutor};
use crate::frame::Calibration;
use crate::gradient::GradientField;
use crate::testing::{SpeckleField, init_tracing, render_frame, render_reference};

const SIZE: usize = 64;

fn tracking_config(margin: usize) -> TrackingConfig {
    TrackingConfig {
        window_size: 16,
        window_stride: 8,
        search_margin: margin,
        min_search_margin: 2,
    }
}

fn tracker(margin: usize) -> WindowTracker {
    WindowTracker::new(tracking_config(margin), Correlator::default())
}

fn shifted_scene(shift: DVec2, seed: u64) -> (Frame, ReferencePattern) {
    let field = SpeckleField::new(SIZE, SIZE, 16.0, 1.5, seed);
    let reference = ReferencePattern::new(render_reference(&field, SIZE, SIZE));
    let frame = Frame::new(render_frame(&field, SIZE, SIZE, DVec2::ZERO, |_| shift));
    (frame, reference)
}

fn assert_valid_near(field: &SparseField, expected: DVec2, min_valid: usize) {
    let mut valid = 0;
    for (key, estimate) in field.valid() {
        valid += 1;
        assert!(
            (estimate.displacement - expected).abs().max_element() < 0.05,
            "{key:?}: expected {expected}, got {}",
            estimate.displacement
        );
    }
    assert!(valid >= min_valid, "only {valid} valid windows");
}

// ============================================================================
// Window grid
// ============================================================================

#[test]
fn test_window_origins_row_major() {
    let origins = window_origins((40, 24), 16, 8);
    assert_eq!(
        origins,
        vec![
            (0, 0),
            (8, 0),
            (16, 0),
            (24, 0),
            (0, 8),
            (8, 8),
            (16, 8),
            (24, 8)
        ]
    );
}

#[test]
fn test_window_origins_window_larger_than_image() {
    assert!(window_origins((10, 40), 16, 4).is_empty());
}

#[test]
fn test_window_origins_stay_inside_image() {
    for (x, y) in window_origins((50, 37), 12, 5) {
        assert!(x + 12 <= 50 && y + 12 <= 37);
    }
}

#[test]
fn test_window_key_ordering() {
    let a = WindowKey { frame: 0, y: 8, x: 0 };
    let b = WindowKey { frame: 0, y: 0, x: 16 };
    let c = WindowKey { frame: 1, y: 0, x: 0 };
    assert!(b < a);
    assert!(a < c);
}

// ============================================================================
// Tracking
// ============================================================================

#[test]
fn test_track_uniform_shift() {
    init_tracing();
    let shift = DVec2::new(0.6, -1.3);
    let (frame, reference) = shifted_scene(shift, 21);
    let mapping = PixelMapping::identity(SIZE, SIZE);

    let field = tracker(4).track(&frame, &reference, &mapping, &SequentialExecutor);

    assert_eq!(field.len(), 49);
    assert!(field.iter().all(|(k, _)| k.frame == 0));
    assert_valid_near(&field, shift, 30);
}

#[test]
fn test_track_follows_mapping_prediction() {
    let shift = DVec2::new(5.2, 0.0);
    let (frame, reference) = shifted_scene(shift, 4);
    let predicted = PixelMapping::from_fn(SIZE, SIZE, |_, _| DVec2::new(5.0, 0.0));

    let guided = tracker(2).track(&frame, &reference, &predicted, &SequentialExecutor);
    assert_valid_near(&guided, shift, 20);

    // Without the prediction the shift lies outside the search margin.
    let unguided = tracker(2).track(&frame, &reference, &PixelMapping::identity(SIZE, SIZE), &SequentialExecutor);
    assert!(unguided.valid().all(|(_, e)| (e.displacement - shift).length() > 1.0));
}

#[test]
fn test_track_all_with_acquisition_offsets() {
    let shift = DVec2::new(-0.35, 0.8);
    let field = SpeckleField::new(SIZE, SIZE, 16.0, 1.5, 9);
    let reference = ReferencePattern::new(render_reference(&field, SIZE, SIZE));
    let frames: Vec<Frame> = [DVec2::ZERO, DVec2::new(3.0, 0.0)]
        .into_iter()
        .map(|position| {
            Frame::new(render_frame(&field, SIZE, SIZE, position, |_| shift)).with_position(position)
        })
        .collect();

    let sparse = tracker(4).track_all(&frames, &reference, &PixelMapping::identity(SIZE, SIZE), &SequentialExecutor);

    assert_eq!(sparse.len(), 2 * 49);
    let second: SparseField = sparse
        .iter()
        .filter(|(k, _)| k.frame == 1)
        .map(|(k, e)| (*k, *e))
        .collect();
    assert_valid_near(&sparse, shift, 45);
    assert_valid_near(&second, shift, 20);
}

#[test]
fn test_masked_region_windows_are_invalid_not_fatal() {
    let (frame, reference) = shifted_scene(DVec2::new(0.5, 0.5), 2);
    let frame = frame.with_mask(BitBuffer2::from_fn(SIZE, SIZE, |x, _| x >= 32));

    let field = tracker(3).track(&frame, &reference, &PixelMapping::identity(SIZE, SIZE), &SequentialExecutor);

    let left = field.get(&WindowKey { frame: 0, y: 16, x: 8 }).unwrap();
    assert_eq!(left.status, MatchStatus::InsufficientPixels);
    assert_eq!(left.displacement, DVec2::ZERO);
    assert!(field.valid_count() > 0);
}

#[test]
fn test_track_is_independent_of_executor() {
    let (frame, reference) = shifted_scene(DVec2::new(1.1, 0.4), 33);
    let mapping = PixelMapping::identity(SIZE, SIZE);
    let tracker = tracker(4);

    let sequential = tracker.track(&frame, &reference, &mapping, &SequentialExecutor);
    let parallel = tracker.track(&frame, &reference, &mapping, &ThreadPoolExecutor::new(4).unwrap());

    assert_eq!(sequential, parallel);
}

// ============================================================================
// Mapping
// ============================================================================

#[test]
fn test_mapping_from_gradient_keeps_previous_where_invalid() {
    let gx = Buffer2::new_filled(4, 4, 0.02);
    let gy = Buffer2::new_filled(4, 4, -0.01);
    let mask = BitBuffer2::from_fn(4, 4, |x, _| x < 2);
    let gradient = GradientField::new(gx, gy, mask, 1.0);
    let previous = PixelMapping::from_fn(4, 4, |_, _| DVec2::new(9.0, 9.0));

    let mapping = PixelMapping::from_gradient(&gradient, 0.01, &previous);

    assert!((mapping.at(0, 0) - DVec2::new(2.0, -1.0)).length() < 1e-12);
    assert_eq!(mapping.at(3, 2), DVec2::new(9.0, 9.0));
}

#[test]
fn test_mapping_sample_interpolates() {
    let mapping = PixelMapping::from_fn(8, 8, |x, y| DVec2::new(x as f64, 2.0 * y as f64));
    let sampled = mapping.sample(DVec2::new(2.5, 3.25));
    assert!((sampled - DVec2::new(2.5, 6.5)).length() < 1e-12);
}

#[test]
fn test_mapping_mean_difference_respects_mask() {
    let a = PixelMapping::identity(4, 4);
    let b = PixelMapping::from_fn(4, 4, |x, _| if x == 0 { DVec2::new(3.0, 4.0) } else { DVec2::ZERO });
    assert!((a.mean_difference(&b, None) - 5.0 * 4.0 / 16.0).abs() < 1e-12);
    let mask = BitBuffer2::from_fn(4, 4, |x, _| x > 0);
    assert_eq!(a.mean_difference(&b, Some(&mask)), 0.0);
}

// ============================================================================
// Reference update
// ============================================================================

#[test]
fn test_update_reference_identity_reproduces_frame() {
    let (frame, reference) = shifted_scene(DVec2::ZERO, 6);
    let blank = ReferencePattern::new(Buffer2::new_filled(SIZE, SIZE, 0.0));

    let updated = update_reference(
        std::slice::from_ref(&frame),
        &PixelMapping::identity(SIZE, SIZE),
        &blank,
    );

    assert_eq!(updated.version, 1);
    for (a, b) in updated.image.iter().zip(reference.image.iter()) {
        assert!((a - b).abs() < 1e-5);
    }
}

#[test]
fn test_update_reference_keeps_unreached_pixels() {
    let frame = Frame::new(Buffer2::new_filled(8, 8, 5.0)).with_position(DVec2::new(4.0, 0.0));
    let previous = ReferencePattern::new(Buffer2::new_filled(8, 8, -1.0));

    let updated = update_reference(&[frame], &PixelMapping::identity(8, 8), &previous);

    assert_eq!(updated.image[(1, 3)], -1.0);
    assert_eq!(updated.image[(6, 3)], 5.0);
}

#[test]
fn test_reference_from_frames_masks_unreached() {
    let frame = Frame::new(Buffer2::new_filled(8, 8, 2.0)).with_position(DVec2::new(0.0, 3.0));

    let reference = ReferencePattern::from_frames(&[frame], &PixelMapping::identity(8, 8), (8, 8));

    let mask = reference.mask.as_ref().unwrap();
    assert!(!mask.get_xy(4, 1));
    assert!(mask.get_xy(4, 5));
    assert_eq!(reference.image[(4, 5)], 2.0);
    assert_eq!(reference.version, 0);
}

// ============================================================================
// Refinement
// ============================================================================

fn refinement_config() -> Config {
    Config {
        tracking: tracking_config(4),
        ..Default::default()
    }
}

#[test]
fn test_refine_step_converges_on_uniform_shift() {
    init_tracing();
    let shift = DVec2::new(0.6, -1.3);
    let (frame, reference) = shifted_scene(shift, 21);
    let frames = [frame];
    let calibration = Calibration::new(1.0, 1.0);
    let config = refinement_config();

    let state = RefinementState::new(reference, (SIZE, SIZE), 4);
    let (state, gradient, first) = refine_step(state, &frames, &calibration, &config, &SequentialExecutor).unwrap();

    assert_eq!(first.iteration, 1);
    assert_eq!(first.search_margin, 4);
    assert!(first.displacement_change.is_infinite());
    assert!(!first.is_converged(0.01));
    assert!(state.search_margin < 4);
    assert!(gradient.valid_count() > 0);
    assert!((state.mapping.at(32, 32) - shift).abs().max_element() < 0.05);

    let (state, _, second) = refine_step(state, &frames, &calibration, &config, &SequentialExecutor).unwrap();

    assert_eq!(second.iteration, 2);
    assert_eq!(state.iteration, 2);
    assert!(second.is_converged(0.01), "change {}", second.displacement_change);
    assert_eq!(state.reference.version, 0);
}

#[test]
fn test_refine_step_updates_reference_when_enabled() {
    let (frame, reference) = shifted_scene(DVec2::new(0.25, 0.5), 8);
    let mut config = refinement_config();
    config.refinement.update_reference = true;

    let state = RefinementState::new(reference, (SIZE, SIZE), 4);
    let (state, _, _) = refine_step(
        state,
        &[frame],
        &Calibration::new(1.0, 1.0),
        &config,
        &SequentialExecutor,
    )
    .unwrap();

    assert_eq!(state.reference.version, 1);
}

#[test]
fn test_refine_step_without_valid_windows_fails() {
    let frame = Frame::new(Buffer2::new_filled(SIZE, SIZE, 1.0));
    let (_, reference) = shifted_scene(DVec2::ZERO, 1);
    let state = RefinementState::new(reference, (SIZE, SIZE), 4);

    let result = refine_step(
        state,
        &[frame],
        &Calibration::new(1.0, 1.0),
        &refinement_config(),
        &SequentialExecutor,
    );

    assert!(matches!(
        result,
        Err(crate::error::Error::InsufficientData {
            stage: crate::error::Stage::Assembly,
            found: 0,
            ..
        })
    ));
}
