// SPDX-License-Identifier: GPL-3.0-only

//! Filter content bundles
//!
//! A bundle is either a face mask (tracked face mesh plus irises) or an
//! overlay-only image. The renderer talks to both through the capability
//! methods on [`ContentBundle`]; overlay content answers the eye and face
//! hooks with no-ops.

pub mod face_mask;
pub mod fade;
pub mod lut;
pub mod overlay;
pub mod scene;
pub mod slot;

pub use face_mask::FaceMaskContent;
pub use fade::Fade;
pub use lut::LookupTable;
pub use overlay::{OverlayContent, OverlayScene, ScaleMode};
pub use scene::{NodeId, NodeKind, SceneArena, SceneDraw};
pub use slot::{ContentSlot, SwapState};

use crate::constants::color;
use crate::eyes::{EyeStates, EyeUpdate};
use crate::gpu::wgpu;
use crate::tracking::{BlendShapeLocation, FaceAnchor};
use glam::{Mat4, Vec3};
use image::RgbaImage;
use std::collections::HashMap;
use std::time::Instant;

/// Which stage a lookup table applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LutType {
    Face,
    Camera,
    Overlay,
    World,
}

/// Grading controls supplied by content
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorParameters {
    pub contrast: f32,
    pub saturation: f32,
    pub lut_intensity: f32,
}

impl Default for ColorParameters {
    fn default() -> Self {
        Self {
            contrast: color::NEUTRAL_CONTRAST,
            saturation: color::NEUTRAL_SATURATION,
            lut_intensity: 1.0,
        }
    }
}

impl ColorParameters {
    /// Contrast and saturation leave the image unchanged
    pub fn is_neutral(&self) -> bool {
        self.contrast == color::NEUTRAL_CONTRAST && self.saturation == color::NEUTRAL_SATURATION
    }
}

/// Textures the renderer uploads when content is published
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecialMaterials {
    pub face_texture: Option<RgbaImage>,
    pub iris_texture: Option<RgbaImage>,
}

/// A content node that follows a world anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldAnchorBinding {
    pub anchor_id: u64,
    pub node: NodeId,
}

pub enum ContentBundle {
    FaceMask(Box<FaceMaskContent>),
    Overlay(OverlayContent),
}

impl ContentBundle {
    pub fn face_mask(content: FaceMaskContent) -> Self {
        ContentBundle::FaceMask(Box::new(content))
    }

    pub fn overlay(content: OverlayContent) -> Self {
        ContentBundle::Overlay(content)
    }

    pub fn scene(&self) -> &SceneArena {
        match self {
            ContentBundle::FaceMask(mask) => mask.scene(),
            ContentBundle::Overlay(overlay) => overlay.scene(),
        }
    }

    pub fn overlay_scene(&self) -> Option<&OverlayScene> {
        match self {
            ContentBundle::FaceMask(_) => None,
            ContentBundle::Overlay(overlay) => overlay.overlay_scene(),
        }
    }

    pub fn world_node(&self) -> Option<WorldAnchorBinding> {
        match self {
            ContentBundle::FaceMask(mask) => mask.world_node(),
            ContentBundle::Overlay(overlay) => overlay.world_node(),
        }
    }

    pub fn needs_eye_update(&self) -> bool {
        match self {
            ContentBundle::FaceMask(mask) => mask.needs_eye_update(),
            ContentBundle::Overlay(_) => false,
        }
    }

    pub fn needs_camera_texture(&self) -> bool {
        match self {
            ContentBundle::FaceMask(mask) => mask.needs_camera_texture(),
            ContentBundle::Overlay(_) => false,
        }
    }

    pub fn lookup_table(&self, kind: LutType) -> Option<&LookupTable> {
        match self {
            ContentBundle::FaceMask(mask) => mask.lookup_table(kind),
            ContentBundle::Overlay(overlay) => overlay.lookup_table(kind),
        }
    }

    pub fn color_parameters(&self) -> ColorParameters {
        match self {
            ContentBundle::FaceMask(mask) => mask.color_parameters(),
            ContentBundle::Overlay(overlay) => overlay.color_parameters(),
        }
    }

    pub fn load_special_materials(&self) -> SpecialMaterials {
        match self {
            ContentBundle::FaceMask(mask) => mask.load_special_materials(),
            ContentBundle::Overlay(_) => SpecialMaterials::default(),
        }
    }

    pub fn set_tracking(&mut self, tracking: bool, now: Instant) {
        if let ContentBundle::FaceMask(mask) = self {
            mask.set_tracking(tracking, now);
        }
    }

    pub fn set_eye_states(&mut self, states: EyeStates, now: Instant) {
        if let ContentBundle::FaceMask(mask) = self {
            mask.set_eye_states(states, now);
        }
    }

    pub fn update_face_anchor(&mut self, anchor: &FaceAnchor) {
        if let ContentBundle::FaceMask(mask) = self {
            mask.update_face_anchor(anchor);
        }
    }

    pub fn update_camera_texture(&mut self, texture: &wgpu::Texture) {
        if let ContentBundle::FaceMask(mask) = self {
            mask.update_camera_texture(texture);
        }
    }

    pub fn update_eye_geometry(
        &mut self,
        scale: f32,
        left_center: Vec3,
        left_gaze: Vec3,
        right_center: Vec3,
        right_gaze: Vec3,
        x_scale: f32,
    ) {
        if let ContentBundle::FaceMask(mask) = self {
            mask.update_eye_geometry(scale, left_center, left_gaze, right_center, right_gaze, x_scale);
        }
    }

    /// Publish one frame's eye extraction: gaze first, then states
    pub fn apply_eye_update(&mut self, update: &EyeUpdate, now: Instant) {
        if let Some(g) = update.geometry {
            self.update_eye_geometry(
                1.0,
                g.left_center,
                g.left_gaze,
                g.right_center,
                g.right_gaze,
                g.x_scale,
            );
        }
        self.set_eye_states(update.states, now);
    }

    pub fn process_blend_shapes(&mut self, shapes: &HashMap<BlendShapeLocation, f32>) {
        if let ContentBundle::FaceMask(mask) = self {
            mask.process_blend_shapes(shapes);
        }
    }

    /// Jaw opening, or -1 when the content does not track it
    pub fn mouth_openness(&self) -> f32 {
        match self {
            ContentBundle::FaceMask(mask) => mask.mouth_openness(),
            ContentBundle::Overlay(_) => -1.0,
        }
    }

    pub fn set_transform(&mut self, node: NodeId, transform: Mat4) {
        match self {
            ContentBundle::FaceMask(mask) => mask.set_transform(node, transform),
            ContentBundle::Overlay(overlay) => overlay.set_transform(node, transform),
        }
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        match self {
            ContentBundle::FaceMask(mask) => mask.set_hidden(hidden),
            ContentBundle::Overlay(overlay) => overlay.set_hidden(hidden),
        }
    }

    /// Whether grading must run for this content
    pub fn needs_color_grading(&self) -> bool {
        self.lookup_table(LutType::World).is_some() || !self.color_parameters().is_neutral()
    }
}

impl std::fmt::Debug for ContentBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentBundle::FaceMask(_) => f.write_str("ContentBundle::FaceMask"),
            ContentBundle::Overlay(_) => f.write_str("ContentBundle::Overlay"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::KalmanConfig;

    #[test]
    fn test_color_parameters_neutral() {
        assert!(ColorParameters::default().is_neutral());
        let graded = ColorParameters {
            saturation: 1.2,
            ..Default::default()
        };
        assert!(!graded.is_neutral());
    }

    #[test]
    fn test_overlay_uses_default_hooks() {
        let mut bundle = ContentBundle::overlay(OverlayContent::default());
        assert!(!bundle.needs_eye_update());
        assert!(!bundle.needs_camera_texture());
        assert_eq!(bundle.mouth_openness(), -1.0);
        bundle.set_eye_states(EyeStates::UNKNOWN, Instant::now());
        assert!(!bundle.needs_color_grading());
    }

    #[test]
    fn test_grading_follows_lut_or_parameters() {
        let with_lut = ContentBundle::face_mask(
            FaceMaskContent::new(KalmanConfig::default())
                .with_lookup_table(LutType::World, LookupTable::identity(4)),
        );
        assert!(with_lut.needs_color_grading());
        assert!(with_lut.needs_eye_update());

        let with_contrast = ContentBundle::overlay(OverlayContent::default().with_color_parameters(
            ColorParameters {
                contrast: 0.2,
                ..Default::default()
            },
        ));
        assert!(with_contrast.needs_color_grading());
    }

    #[test]
    fn test_failed_eye_update_leaves_gaze_untouched() {
        let mut bundle = ContentBundle::face_mask(FaceMaskContent::new(KalmanConfig::default()));
        bundle.apply_eye_update(&EyeUpdate::FAILED, Instant::now());

        let ContentBundle::FaceMask(mask) = &bundle else {
            panic!("expected face mask content");
        };
        assert!(!mask.gaze().is_initialized());
        assert_eq!(mask.eye_states(), EyeStates::UNKNOWN);
    }

    #[test]
    fn test_detected_eye_update_seeds_gaze() {
        use crate::eyes::{EyeGeometry, EyeState};

        let mut bundle = ContentBundle::face_mask(FaceMaskContent::new(KalmanConfig::default()));
        let open = EyeStates {
            left: EyeState::Open,
            right: EyeState::Open,
        };
        let update = EyeUpdate {
            states: open,
            geometry: Some(EyeGeometry {
                left_center: Vec3::new(-0.5, 0.0, -2.0),
                left_gaze: Vec3::Z,
                right_center: Vec3::new(0.5, 0.0, -2.0),
                right_gaze: Vec3::Z,
                x_scale: 1.7,
            }),
        };
        bundle.apply_eye_update(&update, Instant::now());

        let ContentBundle::FaceMask(mask) = &bundle else {
            panic!("expected face mask content");
        };
        assert!(mask.gaze().is_initialized());
        assert_eq!(mask.eye_states(), open);
    }
}
