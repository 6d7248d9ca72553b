// SPDX-License-Identifier: GPL-3.0-only

//! Face mask content: a textured face mesh with tracked irises

use super::fade::Fade;
use super::lut::LookupTable;
use super::scene::{NodeId, NodeKind, SceneArena};
use super::{ColorParameters, LutType, SpecialMaterials, WorldAnchorBinding};
use crate::constants::eyes;
use crate::eyes::{Eye, EyeState, EyeStates};
use crate::filters::{GazeSmoother, KalmanConfig};
use crate::gpu::wgpu;
use crate::tracking::{BlendShapeLocation, FaceAnchor};
use glam::{Mat4, Quat, Vec3};
use image::RgbaImage;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Blend shapes this content reacts to; all start at -1 (never seen)
const TRACKED_BLEND_SHAPES: [BlendShapeLocation; 3] = [
    BlendShapeLocation::EyeBlinkLeft,
    BlendShapeLocation::EyeBlinkRight,
    BlendShapeLocation::JawOpen,
];

pub struct FaceMaskContent {
    scene: SceneArena,
    root: NodeId,
    face: NodeId,
    iris: [NodeId; 2],
    world: Option<WorldAnchorBinding>,
    face_texture: Option<RgbaImage>,
    iris_texture: Option<RgbaImage>,
    lookup_tables: HashMap<LutType, LookupTable>,
    color: ColorParameters,
    eye_tracking: bool,
    camera_texture_feedback: bool,
    camera_texture: Option<wgpu::Texture>,
    gaze: GazeSmoother,
    eye_states: EyeStates,
    blend_shapes: HashMap<BlendShapeLocation, f32>,
    tracking: bool,
    fade_duration: Duration,
}

impl FaceMaskContent {
    pub fn new(kalman: KalmanConfig) -> Self {
        let mut scene = SceneArena::new();
        let root = scene.add(NodeKind::Group, None);
        let face = scene.add(NodeKind::FaceMesh, Some(root));
        let iris = Eye::BOTH.map(|eye| {
            let id = scene.add_camera_space(NodeKind::Iris(eye));
            if let Some(node) = scene.get_mut(id) {
                node.opacity = Fade::settled(0.0);
            }
            id
        });
        // Nothing is shown until tracking starts
        if let Some(node) = scene.get_mut(root) {
            node.opacity = Fade::settled(0.0);
        }

        Self {
            scene,
            root,
            face,
            iris,
            world: None,
            face_texture: None,
            iris_texture: None,
            lookup_tables: HashMap::new(),
            color: ColorParameters::default(),
            eye_tracking: true,
            camera_texture_feedback: true,
            camera_texture: None,
            gaze: GazeSmoother::new(kalman),
            eye_states: EyeStates::UNKNOWN,
            blend_shapes: TRACKED_BLEND_SHAPES.iter().map(|&shape| (shape, -1.0)).collect(),
            tracking: false,
            fade_duration: crate::constants::TRACKING_FADE,
        }
    }

    pub fn with_face_texture(mut self, texture: RgbaImage) -> Self {
        self.face_texture = Some(texture);
        self
    }

    pub fn with_iris_texture(mut self, texture: RgbaImage) -> Self {
        self.iris_texture = Some(texture);
        self
    }

    pub fn with_lookup_table(mut self, kind: LutType, table: LookupTable) -> Self {
        self.lookup_tables.insert(kind, table);
        self
    }

    pub fn with_color_parameters(mut self, color: ColorParameters) -> Self {
        self.color = color;
        self
    }

    pub fn with_fade_duration(mut self, duration: Duration) -> Self {
        self.fade_duration = duration;
        self
    }

    /// Attach a world node that follows the anchor with `anchor_id`
    pub fn with_world_anchor(mut self, anchor_id: u64) -> Self {
        let node = self.scene.add(NodeKind::Group, Some(self.root));
        // Anchor updates store view * anchor, which already is the model-view
        if let Some(world) = self.scene.get_mut(node) {
            world.camera_space = true;
        }
        self.world = Some(WorldAnchorBinding { anchor_id, node });
        self
    }

    pub fn with_eye_tracking(mut self, enabled: bool) -> Self {
        self.eye_tracking = enabled;
        self
    }

    pub fn with_camera_texture_feedback(mut self, enabled: bool) -> Self {
        self.camera_texture_feedback = enabled;
        self
    }

    pub fn scene(&self) -> &SceneArena {
        &self.scene
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn face_node(&self) -> NodeId {
        self.face
    }

    pub fn iris_node(&self, eye: Eye) -> NodeId {
        self.iris[eye.index()]
    }

    pub fn world_node(&self) -> Option<WorldAnchorBinding> {
        self.world
    }

    pub fn needs_eye_update(&self) -> bool {
        self.eye_tracking
    }

    pub fn needs_camera_texture(&self) -> bool {
        self.camera_texture_feedback
    }

    pub fn lookup_table(&self, kind: LutType) -> Option<&LookupTable> {
        self.lookup_tables.get(&kind)
    }

    pub fn color_parameters(&self) -> ColorParameters {
        self.color
    }

    pub fn load_special_materials(&self) -> SpecialMaterials {
        SpecialMaterials {
            face_texture: self.face_texture.clone(),
            iris_texture: self.iris_texture.clone(),
        }
    }

    pub fn gaze(&self) -> &GazeSmoother {
        &self.gaze
    }

    pub fn eye_states(&self) -> EyeStates {
        self.eye_states
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    pub fn camera_texture(&self) -> Option<&wgpu::Texture> {
        self.camera_texture.as_ref()
    }

    pub fn blend_shape(&self, location: BlendShapeLocation) -> Option<f32> {
        self.blend_shapes.get(&location).copied()
    }

    pub fn mouth_openness(&self) -> f32 {
        self.blend_shape(BlendShapeLocation::JawOpen).unwrap_or(-1.0)
    }

    /// Fade the mask in or out, along with any iris that is showing
    pub fn set_tracking(&mut self, tracking: bool, now: Instant) {
        if tracking == self.tracking {
            return;
        }
        self.tracking = tracking;
        let target = if tracking { 1.0 } else { 0.0 };
        debug!(tracking, "Face mask tracking changed");
        self.scene.fade_to(self.root, target, self.fade_duration, now);
        for eye in Eye::BOTH {
            if self.eye_states.get(eye) == EyeState::Open {
                self.scene.fade_to(self.iris[eye.index()], target, self.fade_duration, now);
            }
        }
    }

    /// Show irises of open eyes and hide the rest
    ///
    /// An iris coming back into view restarts gaze smoothing from the next
    /// observation.
    pub fn set_eye_states(&mut self, states: EyeStates, now: Instant) {
        for eye in Eye::BOTH {
            let id = self.iris[eye.index()];
            let visible = self
                .scene
                .get(id)
                .is_some_and(|node| node.opacity.target() > 0.0);
            match states.get(eye) {
                EyeState::Open => {
                    if !visible {
                        self.gaze.request_reset();
                        self.scene
                            .fade_to(id, 1.0, eyes::VISIBILITY_FADE, now);
                    }
                }
                EyeState::Closed | EyeState::Unknown => {
                    if visible {
                        self.scene.fade_to(id, 0.0, eyes::VISIBILITY_FADE, now);
                    }
                }
            }
        }
        self.eye_states = states;
    }

    pub fn update_face_anchor(&mut self, anchor: &FaceAnchor) {
        self.scene.set_transform(self.face, anchor.transform);
        self.process_blend_shapes(&anchor.blend_shapes);
    }

    pub fn update_camera_texture(&mut self, texture: &wgpu::Texture) {
        self.camera_texture = Some(texture.clone());
    }

    pub fn process_blend_shapes(&mut self, shapes: &HashMap<BlendShapeLocation, f32>) {
        for (location, value) in shapes {
            if let Some(tracked) = self.blend_shapes.get_mut(location) {
                *tracked = *value;
            }
        }
    }

    /// Place both irises from detector output
    ///
    /// Centers are on the gaze plane (see `eyes::map_eye_center`) and are
    /// smoothed before use. Each iris sits at `(x, y, -x_scale)` in camera
    /// space, turned to look along its gaze and scaled with face depth.
    pub fn update_eye_geometry(
        &mut self,
        scale: f32,
        left_center: Vec3,
        left_gaze: Vec3,
        right_center: Vec3,
        right_gaze: Vec3,
        x_scale: f32,
    ) {
        let (left, right) = self
            .gaze
            .smooth(left_center.truncate() * scale, right_center.truncate() * scale);

        let face_depth = self.scene.world_transform(self.face).w_axis.z;
        let iris_scale = (eyes::IRIS_SCALE_SLOPE * face_depth + eyes::IRIS_SCALE_OFFSET).max(0.0);

        for (eye, center, gaze) in [(Eye::Left, left, left_gaze), (Eye::Right, right, right_gaze)] {
            let position = center.extend(-x_scale);
            let target = position - gaze * (x_scale * eyes::GAZE_LOOK_DISTANCE);
            let forward = (target - position).normalize_or(Vec3::NEG_Z);
            let rotation = Quat::from_rotation_arc(Vec3::NEG_Z, forward);
            let transform =
                Mat4::from_scale_rotation_translation(Vec3::splat(iris_scale), rotation, position);
            self.scene.set_transform(self.iris[eye.index()], transform);
        }
        trace!(?left, ?right, iris_scale, "Iris nodes placed");
    }

    pub fn set_transform(&mut self, node: NodeId, transform: Mat4) {
        self.scene.set_transform(node, transform);
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        for id in [self.root, self.iris[0], self.iris[1]] {
            if let Some(node) = self.scene.get_mut(id) {
                node.hidden = hidden;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> EyeStates {
        EyeStates {
            left: EyeState::Open,
            right: EyeState::Open,
        }
    }

    #[test]
    fn test_blend_shapes_start_unset() {
        let mut mask = FaceMaskContent::new(KalmanConfig::default());
        assert_eq!(mask.mouth_openness(), -1.0);
        assert_eq!(mask.blend_shape(BlendShapeLocation::EyeBlinkLeft), Some(-1.0));
        assert_eq!(mask.blend_shape(BlendShapeLocation::BrowInnerUp), None);

        let shapes = HashMap::from([
            (BlendShapeLocation::JawOpen, 0.4),
            (BlendShapeLocation::BrowInnerUp, 0.9),
        ]);
        mask.process_blend_shapes(&shapes);
        assert_eq!(mask.mouth_openness(), 0.4);
        assert_eq!(mask.blend_shape(BlendShapeLocation::BrowInnerUp), None);
    }

    #[test]
    fn test_reappearing_eye_requests_reset() {
        let now = Instant::now();
        let mut mask = FaceMaskContent::new(KalmanConfig::default());
        mask.set_eye_states(open(), now);
        assert!(mask.gaze().reset_pending());

        mask.update_eye_geometry(1.0, Vec3::ZERO, Vec3::Z, Vec3::ZERO, Vec3::Z, 1.7);
        assert!(!mask.gaze().reset_pending());

        // Still open: no new reset
        mask.set_eye_states(open(), now);
        assert!(!mask.gaze().reset_pending());

        mask.set_eye_states(EyeStates::UNKNOWN, now);
        mask.set_eye_states(open(), now);
        assert!(mask.gaze().reset_pending());
    }

    #[test]
    fn test_iris_placement() {
        let now = Instant::now();
        let mut mask = FaceMaskContent::new(KalmanConfig::default());
        let anchor_transform = Mat4::from_translation(Vec3::new(0.0, 0.0, -0.5));
        mask.set_transform(mask.face_node(), anchor_transform);
        mask.set_eye_states(open(), now);

        let center = Vec3::new(0.2, 0.3, -2.0);
        mask.update_eye_geometry(1.0, center, Vec3::Z, center, Vec3::Z, 1.5);

        let node = mask.scene().get(mask.iris_node(Eye::Left)).unwrap();
        let (scale, _, translation) = node.transform.to_scale_rotation_translation();
        assert!((translation - Vec3::new(0.2, 0.3, -1.5)).length() < 1e-5);
        let expected = 0.4608 * -0.5 + 0.303;
        assert!((scale.x - expected).abs() < 1e-5);
        // Gaze straight at the camera keeps the quad facing it
        let facing = node.transform.transform_vector3(Vec3::Z).normalize();
        assert!((facing - Vec3::Z).length() < 1e-4);
    }

    #[test]
    fn test_tracking_fades_root() {
        let now = Instant::now();
        let mut mask = FaceMaskContent::new(KalmanConfig::default());
        assert_eq!(mask.scene().effective_opacity(mask.face_node(), now), 0.0);
        mask.set_tracking(true, now);
        let later = now + Duration::from_millis(400);
        assert_eq!(mask.scene().effective_opacity(mask.face_node(), later), 1.0);
        assert!(mask.is_tracking());
    }
}
