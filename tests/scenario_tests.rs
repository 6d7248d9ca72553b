// SPDX-License-Identifier: MPL-2.0

//! End-to-end behavior that needs no GPU

use facefilter::constants::{eyes, face};
use facefilter::content::{
    ColorParameters, ContentBundle, ContentSlot, FaceMaskContent, LookupTable, LutType, OverlayContent,
    OverlayScene,
};
use facefilter::errors::{ContentError, ExtractionError};
use facefilter::eyes::{
    EyeBounds, EyeState, EyeStates, classify_eyes, classify_openness, plan_crop, resolve_eye_update,
};
use facefilter::filters::{KalmanConfig, KalmanFilter};
use facefilter::output::BufferPool;
use facefilter::pipeline::{InFlightLimiter, SmoothingPassTable, plan_passes};
use facefilter::renderer::AnchorUpdater;
use facefilter::tracking::FaceGeometry;
use facefilter::tracking::synthetic::SyntheticFaceSource;
use glam::{Vec2, Vec3};
use image::RgbaImage;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

fn geometry_with_opening(opening: f32) -> FaceGeometry {
    let mut vertices = vec![Vec3::ZERO; face::VERTEX_COUNT];
    for [first, second] in eyes::OPEN_REFERENCE_VERTICES {
        vertices[first] = Vec3::new(0.0, 0.0, 0.0);
        vertices[second] = Vec3::new(0.0, opening, 0.0);
    }
    FaceGeometry {
        vertices,
        ..FaceGeometry::default()
    }
}

#[test]
fn test_zero_width_eye_box_aborts_extraction() {
    let bounds = EyeBounds::new(Vec2::new(300.0, 500.0), Vec2::new(0.0, 30.0));
    let result = plan_crop(
        &bounds,
        Vec2::new(0.0, 10.0),
        64,
        (720, 1280),
        4,
        eyes::SCRATCH_BYTES,
    );
    assert_eq!(result, Err(ExtractionError::ZeroArea));

    // An off-screen eye makes both states unknown
    let geometry = geometry_with_opening(0.01);
    let visible = EyeBounds::new(Vec2::new(300.0, 500.0), Vec2::new(40.0, 20.0));
    let states = classify_eyes(
        &geometry,
        &visible,
        &EyeBounds::SENTINEL,
        eyes::OPEN_REFERENCE_VERTICES,
        eyes::OPENNESS_THRESHOLD,
    );
    assert_eq!(states, EyeStates::UNKNOWN);
}

#[test]
fn test_aborted_extraction_publishes_unknown_and_keeps_gaze() {
    let now = Instant::now();
    let mut bundle = ContentBundle::face_mask(FaceMaskContent::new(KalmanConfig::default()));
    let open = EyeStates {
        left: EyeState::Open,
        right: EyeState::Open,
    };

    let bounds = EyeBounds::new(Vec2::new(300.0, 500.0), Vec2::new(0.0, 30.0));
    let planned = plan_crop(&bounds, Vec2::new(0.0, 10.0), 64, (720, 1280), 4, eyes::SCRATCH_BYTES);
    assert!(planned.is_err());
    // No reading reaches the detector when planning fails
    let update = resolve_eye_update(None, open, Vec2::new(720.0, 1280.0), 1.7);
    bundle.apply_eye_update(&update, now);

    let ContentBundle::FaceMask(mask) = &bundle else {
        panic!("expected face mask content");
    };
    assert_eq!(mask.eye_states(), EyeStates::UNKNOWN);
    assert!(!mask.gaze().is_initialized());
}

#[test]
fn test_eye_openness_threshold() {
    let lids = eyes::OPEN_REFERENCE_VERTICES[0];
    assert_eq!(
        classify_openness(&geometry_with_opening(0.003), lids, eyes::OPENNESS_THRESHOLD),
        EyeState::Closed
    );
    assert_eq!(
        classify_openness(&geometry_with_opening(0.01), lids, eyes::OPENNESS_THRESHOLD),
        EyeState::Open
    );
}

#[test]
fn test_swap_blocks_anchor_updates_until_idle() {
    let mut slot = ContentSlot::new();
    let mut updater = AnchorUpdater::new();
    let mut source = SyntheticFaceSource::new(720, 1280);

    slot.replace(Some(ContentBundle::face_mask(FaceMaskContent::new(KalmanConfig::default()))))
        .unwrap();
    let next = FaceMaskContent::new(KalmanConfig::default());
    slot.begin_swap(Some(ContentBundle::face_mask(next))).unwrap();

    let update = updater.update(&mut slot, &source.next_frame(), Instant::now());
    assert!(update.suppressed);
    assert!(!update.face_updated);

    slot.complete_swap().unwrap();
    updater.invalidate();
    let update = updater.update(&mut slot, &source.next_frame(), Instant::now());
    assert!(!update.suppressed);
    assert!(update.face_updated);
    match slot.active() {
        Some(ContentBundle::FaceMask(mask)) => assert!(mask.is_tracking()),
        other => panic!("unexpected content {:?}", other),
    }
}

#[test]
fn test_swap_publishes_parameters_atomically() {
    let mut slot = ContentSlot::new();
    let old = OverlayContent::new(OverlayScene::new(RgbaImage::new(4, 4))).with_color_parameters(
        ColorParameters {
            contrast: 0.2,
            ..ColorParameters::default()
        },
    );
    slot.replace(Some(ContentBundle::overlay(old))).unwrap();
    let before = slot.published_parameters();

    let new = FaceMaskContent::new(KalmanConfig::default())
        .with_lookup_table(LutType::World, LookupTable::identity(4))
        .with_color_parameters(ColorParameters {
            saturation: 0.5,
            ..ColorParameters::default()
        });
    slot.begin_swap(Some(ContentBundle::face_mask(new))).unwrap();
    assert_eq!(slot.published_parameters(), before);
    assert!(matches!(
        slot.begin_swap(None),
        Err(ContentError::SwapInProgress)
    ));

    slot.complete_swap().unwrap();
    let after = slot.published_parameters();
    assert_eq!(after.color.saturation, 0.5);
    assert_eq!(after.color.contrast, 0.0);
    assert!(after.has_world_lut);
    assert!(!after.has_overlay);
    assert!(after.needs_eye_update);
}

#[test]
fn test_pool_warm_up_reaches_threshold() {
    let allocations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&allocations);
    let pool = BufferPool::new(3, 4, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0u8; 16])
    });

    assert_eq!(pool.preallocate(), 4);
    assert_eq!(allocations.load(Ordering::SeqCst), 4);

    let held: Vec<_> = (0..4).filter_map(|_| pool.acquire()).collect();
    assert_eq!(held.len(), 4);
    assert!(pool.acquire().is_none());
    // Reuse only, no new allocations
    assert_eq!(allocations.load(Ordering::SeqCst), 4);
    drop(held);
    assert_eq!(pool.available(), 4);
}

#[test]
fn test_in_flight_never_exceeds_capacity() {
    let limiter = Arc::new(InFlightLimiter::new(3));
    let peak = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..8u64)
        .map(|index| {
            let limiter = Arc::clone(&limiter);
            let peak = Arc::clone(&peak);
            std::thread::spawn(move || {
                for frame in 0..20 {
                    let permit = limiter.acquire(index * 100 + frame);
                    peak.fetch_max(limiter.in_flight(), Ordering::SeqCst);
                    std::thread::yield_now();
                    permit.complete();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(limiter.in_flight(), 0);
}

#[test]
fn test_kalman_reset_returns_location() {
    let config = KalmanConfig::default();
    let mut filter = KalmanFilter::new(Vec2::ZERO, &config);
    for step in 0..10 {
        filter.process_state(Vec2::splat(step as f32));
    }
    let location = Vec2::new(0.25, -0.4);
    filter.reset(location);
    let filtered = filter.process_state(location);
    assert!((filtered - location).length() < 1e-6);
}

#[test]
fn test_pass_planning_is_deterministic() {
    let table = SmoothingPassTable::default();
    let first = plan_passes(&table, &[1.0, 0.25, 0.2, 0.2, 0.2], (720, 1280));
    let second = plan_passes(&table, &[1.0, 0.25, 0.2, 0.2, 0.2], (720, 1280));
    assert_eq!(first, second);
    assert_eq!(first.len(), 7);
    assert_eq!(first.last().map(|pass| pass.target), Some(0));
}
