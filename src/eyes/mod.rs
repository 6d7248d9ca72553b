// SPDX-License-Identifier: GPL-3.0-only

//! Eye state, eye regions and landmark detection

pub mod bounds;
pub mod detector;
pub mod extractor;

pub use bounds::{EyeBounds, project_eye_bounds};
pub use detector::{CentroidDetector, EyeCrop, LandmarkDetector};
pub use extractor::{CropPlan, EyeRegionExtractor, flip_gaze, map_eye_center, plan_crop};

use crate::tracking::FaceGeometry;
use glam::{Vec2, Vec3};

/// Which eye, from the tracked face's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    /// Index into per-eye arrays (left = 0)
    pub fn index(self) -> usize {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EyeState {
    Open,
    Closed,
    #[default]
    Unknown,
}

/// State of both eyes for one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EyeStates {
    pub left: EyeState,
    pub right: EyeState,
}

impl EyeStates {
    pub const UNKNOWN: Self = Self {
        left: EyeState::Unknown,
        right: EyeState::Unknown,
    };

    pub fn get(&self, eye: Eye) -> EyeState {
        match eye {
            Eye::Left => self.left,
            Eye::Right => self.right,
        }
    }
}

/// Classify one eye from the distance between its two lid vertices
///
/// A distance below `threshold` is `Closed`. Missing vertices give `Unknown`.
pub fn classify_openness(geometry: &FaceGeometry, lids: [usize; 2], threshold: f32) -> EyeState {
    match (geometry.vertex(lids[0]), geometry.vertex(lids[1])) {
        (Some(a), Some(b)) if a.distance(b) < threshold => EyeState::Closed,
        (Some(_), Some(_)) => EyeState::Open,
        _ => EyeState::Unknown,
    }
}

/// Classify both eyes; an off-screen eye box makes both `Unknown`
pub fn classify_eyes(
    geometry: &FaceGeometry,
    left: &EyeBounds,
    right: &EyeBounds,
    lids: [[usize; 2]; 2],
    threshold: f32,
) -> EyeStates {
    if !left.is_visible() || !right.is_visible() {
        return EyeStates::UNKNOWN;
    }
    EyeStates {
        left: classify_openness(geometry, lids[0], threshold),
        right: classify_openness(geometry, lids[1], threshold),
    }
}

/// Detector output for one frame, centers in viewport pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeReading {
    pub left_center: Vec2,
    pub left_gaze: Vec3,
    pub right_center: Vec2,
    pub right_gaze: Vec3,
}

impl EyeReading {
    pub fn from_detector(detector: &dyn LandmarkDetector) -> Self {
        Self {
            left_center: detector.left_eye_center(),
            left_gaze: detector.left_eye_gaze(),
            right_center: detector.right_eye_center(),
            right_gaze: detector.right_eye_gaze(),
        }
    }
}

/// Eye centers and gaze in scene space, as content consumes them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeGeometry {
    pub left_center: Vec3,
    pub left_gaze: Vec3,
    pub right_center: Vec3,
    pub right_gaze: Vec3,
    pub x_scale: f32,
}

/// What one frame's eye extraction publishes to content
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeUpdate {
    pub states: EyeStates,
    /// `None` leaves gaze smoothing untouched
    pub geometry: Option<EyeGeometry>,
}

impl EyeUpdate {
    /// Extraction did not produce a reading this frame
    pub const FAILED: Self = Self {
        states: EyeStates::UNKNOWN,
        geometry: None,
    };
}

/// Turn an extraction result into the states and geometry to publish
///
/// `reading` is `None` when crop planning, readback or detection failed;
/// both eyes then become unknown and no gaze is reported.
pub fn resolve_eye_update(
    reading: Option<EyeReading>,
    states: EyeStates,
    viewport: Vec2,
    x_scale: f32,
) -> EyeUpdate {
    let Some(reading) = reading else {
        return EyeUpdate::FAILED;
    };
    EyeUpdate {
        states,
        geometry: Some(EyeGeometry {
            left_center: map_eye_center(reading.left_center, viewport),
            left_gaze: flip_gaze(reading.left_gaze),
            right_center: map_eye_center(reading.right_center, viewport),
            right_gaze: flip_gaze(reading.right_gaze),
            x_scale,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::eyes::{OPEN_REFERENCE_VERTICES, OPENNESS_THRESHOLD};

    fn geometry_with_opening(opening: f32) -> FaceGeometry {
        let mut vertices = vec![Vec3::ZERO; 1220];
        for [bottom, top] in OPEN_REFERENCE_VERTICES {
            vertices[bottom] = Vec3::new(0.0, 0.0, 0.0);
            vertices[top] = Vec3::new(0.0, opening, 0.0);
        }
        FaceGeometry {
            vertices,
            ..Default::default()
        }
    }

    fn visible() -> EyeBounds {
        EyeBounds::new(Vec2::new(10.0, 10.0), Vec2::new(20.0, 10.0))
    }

    #[test]
    fn test_openness_threshold() {
        let nearly_shut = geometry_with_opening(0.003);
        let open = geometry_with_opening(0.01);
        let states = classify_eyes(
            &nearly_shut,
            &visible(),
            &visible(),
            OPEN_REFERENCE_VERTICES,
            OPENNESS_THRESHOLD,
        );
        assert_eq!(states.left, EyeState::Closed);
        assert_eq!(states.right, EyeState::Closed);

        let states = classify_eyes(
            &open,
            &visible(),
            &visible(),
            OPEN_REFERENCE_VERTICES,
            OPENNESS_THRESHOLD,
        );
        assert_eq!(states.get(Eye::Left), EyeState::Open);
        assert_eq!(states.get(Eye::Right), EyeState::Open);
    }

    #[test]
    fn test_hidden_eye_makes_both_unknown() {
        let open = geometry_with_opening(0.01);
        let states = classify_eyes(
            &open,
            &visible(),
            &EyeBounds::SENTINEL,
            OPEN_REFERENCE_VERTICES,
            OPENNESS_THRESHOLD,
        );
        assert_eq!(states, EyeStates::UNKNOWN);
    }

    #[test]
    fn test_missing_vertices_are_unknown() {
        let empty = FaceGeometry::default();
        assert_eq!(
            classify_openness(&empty, [1076, 1062], OPENNESS_THRESHOLD),
            EyeState::Unknown
        );
    }

    fn reading() -> EyeReading {
        EyeReading {
            left_center: Vec2::new(180.0, 640.0),
            left_gaze: Vec3::new(0.1, 0.2, -1.0),
            right_center: Vec2::new(540.0, 640.0),
            right_gaze: Vec3::new(-0.1, 0.2, -1.0),
        }
    }

    #[test]
    fn test_failed_extraction_reports_unknown_without_gaze() {
        let open = EyeStates {
            left: EyeState::Open,
            right: EyeState::Open,
        };
        let update = resolve_eye_update(None, open, Vec2::new(720.0, 1280.0), 1.7);
        assert_eq!(update, EyeUpdate::FAILED);
        assert_eq!(update.states, EyeStates::UNKNOWN);
        assert!(update.geometry.is_none());
    }

    #[test]
    fn test_detected_eyes_map_into_scene_space() {
        let viewport = Vec2::new(720.0, 1280.0);
        let open = EyeStates {
            left: EyeState::Open,
            right: EyeState::Open,
        };
        let update = resolve_eye_update(Some(reading()), open, viewport, 1.7);
        assert_eq!(update.states, open);

        let geometry = update.geometry.unwrap();
        assert!((geometry.left_center.x + 0.5).abs() < 1e-6);
        assert!(geometry.left_center.y.abs() < 1e-6);
        assert!((geometry.right_center.x - 0.5).abs() < 1e-6);
        assert_eq!(geometry.left_gaze, Vec3::new(0.1, -0.2, -1.0));
        assert_eq!(geometry.x_scale, 1.7);
    }

    #[test]
    fn test_closed_eyes_still_report_gaze() {
        let closed = EyeStates {
            left: EyeState::Closed,
            right: EyeState::Open,
        };
        let update = resolve_eye_update(Some(reading()), closed, Vec2::new(720.0, 1280.0), 1.7);
        assert_eq!(update.states.left, EyeState::Closed);
        assert_eq!(update.states.right, EyeState::Open);
        assert!(update.geometry.is_some());
    }
}
