// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic face tracking stream
//!
//! Produces tracking frames for a procedurally generated face so the
//! renderer can run headless: a curved grid mesh with the tracker's
//! topology, eye reference vertices placed where the eye code expects them,
//! a camera image with a skin ellipse and dark pupils, and periodic blinks.

use super::{
    Anchor, BlendShapeLocation, CameraIntrinsics, CameraPose, CapturedImage, FaceAnchor,
    FaceGeometry, ImagePlane, LightEstimate, TrackingFrame,
};
use crate::constants::{Z_FAR, Z_NEAR, eyes, face};
use crate::eyes::bounds::project_to_viewport;
use glam::{Affine2, Mat4, Vec2, Vec3};
use std::collections::HashMap;

const GRID_COLUMNS: usize = 61;
const GRID_ROWS: usize = 20;
const FACE_HALF_WIDTH: f32 = 0.08;
const FACE_HALF_HEIGHT: f32 = 0.1;
const FACE_DEPTH: f32 = -0.5;
const EYE_OFFSET: Vec2 = Vec2::new(0.032, 0.025);
const EYE_HALF_WIDTH: f32 = 0.015;
const OPEN_EYE: f32 = 0.014;
const BLINKING_EYE: f32 = 0.002;
const BLINK_FRAMES: u64 = 4;
const FIELD_OF_VIEW_DEG: f32 = 60.0;
const FRAME_INTERVAL: f64 = 1.0 / 60.0;
const PUPIL_RADIUS: f32 = 9.0;

/// Anchor id reported for the synthetic world anchor
pub const WORLD_ANCHOR_ID: u64 = 1;
/// Anchor id reported for the synthetic face
pub const FACE_ANCHOR_ID: u64 = 2;

/// Generates a deterministic tracking stream
#[derive(Debug, Clone)]
pub struct SyntheticFaceSource {
    width: u32,
    height: u32,
    frame: u64,
    blink_period: u64,
    tracked: bool,
    projection: Mat4,
    base: FaceGeometry,
}

impl SyntheticFaceSource {
    /// Source for a portrait viewport of `width` x `height` pixels
    pub fn new(width: u32, height: u32) -> Self {
        let width = width.max(2);
        let height = height.max(2);
        let aspect = width as f32 / height as f32;
        Self {
            width,
            height,
            frame: 0,
            blink_period: 90,
            tracked: true,
            projection: Mat4::perspective_rh(
                FIELD_OF_VIEW_DEG.to_radians(),
                aspect,
                Z_NEAR,
                Z_FAR,
            ),
            base: face_grid(),
        }
    }

    /// Blink once every `period` frames (0 disables blinking)
    pub fn with_blink_period(mut self, period: u64) -> Self {
        self.blink_period = period;
        self
    }

    /// Report the face as tracked or lost from the next frame on
    pub fn set_tracked(&mut self, tracked: bool) {
        self.tracked = tracked;
    }

    pub fn frame_index(&self) -> u64 {
        self.frame
    }

    pub fn viewport(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Whether frame `index` falls inside a blink
    pub fn is_blinking(&self, index: u64) -> bool {
        self.blink_period > 0 && index % self.blink_period >= self.blink_period - BLINK_FRAMES
    }

    /// Produce the next frame
    pub fn next_frame(&mut self) -> TrackingFrame {
        let index = self.frame;
        self.frame += 1;

        let t = index as f32 * FRAME_INTERVAL as f32;
        let openness = if self.is_blinking(index) {
            BLINKING_EYE
        } else {
            OPEN_EYE
        };

        let transform = Mat4::from_translation(Vec3::new(0.0, 0.0, FACE_DEPTH))
            * Mat4::from_rotation_y((t * 0.8).sin() * 0.15);
        let mut geometry = self.base.clone();
        place_eyes(&mut geometry, openness);

        let camera = CameraPose {
            view: Mat4::IDENTITY,
            projection: self.projection,
        };
        let image = self.render_image(&geometry, transform, &camera);

        let mut blend_shapes = HashMap::new();
        let blink = if openness < OPEN_EYE { 1.0 } else { 0.0 };
        blend_shapes.insert(BlendShapeLocation::EyeBlinkLeft, blink);
        blend_shapes.insert(BlendShapeLocation::EyeBlinkRight, blink);
        blend_shapes.insert(BlendShapeLocation::JawOpen, 0.5 + 0.5 * (t * 1.3).sin());

        let focal = self.projection.y_axis.y * self.height as f32 * 0.5;
        let intrinsics = CameraIntrinsics {
            fx: focal,
            fy: focal,
            cx: self.width as f32 * 0.5,
            cy: self.height as f32 * 0.5,
        };

        TrackingFrame {
            timestamp: index as f64 * FRAME_INTERVAL,
            image,
            camera,
            intrinsics,
            light: Some(LightEstimate {
                ambient_intensity: 900.0 + 100.0 * t.cos(),
                ..Default::default()
            }),
            display_transform: Affine2::IDENTITY,
            anchors: vec![
                Anchor::World {
                    id: WORLD_ANCHOR_ID,
                    transform: Mat4::from_translation(Vec3::new(0.0, 0.0, -1.0)),
                },
                Anchor::Face(FaceAnchor {
                    id: FACE_ANCHOR_ID,
                    transform,
                    geometry,
                    blend_shapes,
                    is_tracked: self.tracked,
                }),
            ],
        }
    }

    /// Luma plane with a skin ellipse and two pupils, plus a half-size
    /// interleaved chroma plane
    fn render_image(&self, geometry: &FaceGeometry, model: Mat4, camera: &CameraPose) -> CapturedImage {
        let (width, height) = (self.width, self.height);
        let viewport = Vec2::new(width as f32, height as f32);
        let mvp = camera.projection * camera.view * model;

        let pupils: Vec<Vec2> = [eyes::LEFT_BOUNDS_VERTICES, eyes::RIGHT_BOUNDS_VERTICES]
            .iter()
            .filter_map(|ids| {
                let outer = geometry.vertex(ids[0])?;
                let inner = geometry.vertex(ids[2])?;
                project_to_viewport((outer + inner) * 0.5, mvp, viewport)
            })
            .collect();
        let center = project_to_viewport(Vec3::ZERO, mvp, viewport).unwrap_or(viewport * 0.5);
        let radii = Vec2::new(viewport.x * 0.3, viewport.y * 0.22);
        let open = !self.is_blinking(self.frame.saturating_sub(1));

        let mut luma = vec![0u8; (width * height) as usize];
        for y in 0..height {
            for x in 0..width {
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let skin = ((p - center) / radii).length_squared() <= 1.0;
                let pupil = open
                    && pupils
                        .iter()
                        .any(|eye| eye.distance_squared(p) <= PUPIL_RADIUS * PUPIL_RADIUS);
                luma[(y * width + x) as usize] = match (skin, pupil) {
                    (_, true) => 24,
                    (true, false) => 168,
                    (false, false) => 72,
                };
            }
        }

        let (chroma_width, chroma_height) = (width.div_ceil(2), height.div_ceil(2));
        let mut chroma = vec![128u8; (chroma_width * chroma_height * 2) as usize];
        for y in 0..chroma_height {
            for x in 0..chroma_width {
                let p = Vec2::new(x as f32 * 2.0 + 1.0, y as f32 * 2.0 + 1.0);
                if ((p - center) / radii).length_squared() <= 1.0 {
                    let offset = ((y * chroma_width + x) * 2) as usize;
                    chroma[offset] = 112;
                    chroma[offset + 1] = 152;
                }
            }
        }

        CapturedImage {
            width,
            height,
            planes: vec![
                ImagePlane::packed(width, height, 1, luma),
                ImagePlane::packed(chroma_width, chroma_height, 2, chroma),
            ],
        }
    }
}

/// Curved grid with the tracker's vertex and triangle counts
fn face_grid() -> FaceGeometry {
    let mut vertices = Vec::with_capacity(face::VERTEX_COUNT);
    let mut texture_coordinates = Vec::with_capacity(face::VERTEX_COUNT);
    for row in 0..GRID_ROWS {
        let v = row as f32 / (GRID_ROWS - 1) as f32;
        for column in 0..GRID_COLUMNS {
            let u = column as f32 / (GRID_COLUMNS - 1) as f32;
            let x = (u - 0.5) * 2.0 * FACE_HALF_WIDTH;
            let y = (0.5 - v) * 2.0 * FACE_HALF_HEIGHT;
            let z = 0.03 * (1.0 - (x / FACE_HALF_WIDTH).powi(2)) * (1.0 - 0.5 * (y / FACE_HALF_HEIGHT).powi(2));
            vertices.push(Vec3::new(x, y, z));
            texture_coordinates.push(Vec2::new(u, v));
        }
    }

    let mut triangle_indices = Vec::with_capacity(face::INDEX_COUNT);
    for row in 0..GRID_ROWS - 1 {
        for column in 0..GRID_COLUMNS - 1 {
            let a = (row * GRID_COLUMNS + column) as u16;
            let b = a + 1;
            let c = a + GRID_COLUMNS as u16;
            let d = c + 1;
            triangle_indices.extend_from_slice(&[a, c, b, b, c, d]);
        }
    }
    // Pad with degenerate triangles up to the fixed index count
    triangle_indices.resize(face::INDEX_COUNT, 0);

    FaceGeometry {
        vertices,
        texture_coordinates,
        triangle_indices,
    }
}

/// Move the eye reference vertices to their eye positions with the given
/// lid separation
fn place_eyes(geometry: &mut FaceGeometry, openness: f32) {
    let sides = [
        (eyes::LEFT_BOUNDS_VERTICES, EYE_OFFSET.x),
        (eyes::RIGHT_BOUNDS_VERTICES, -EYE_OFFSET.x),
    ];
    for (ids, center_x) in sides {
        let [outer, top, inner, bottom] = ids;
        let direction = center_x.signum();
        let z = 0.02;
        let positions = [
            (outer, Vec3::new(center_x + direction * EYE_HALF_WIDTH, EYE_OFFSET.y, z)),
            (top, Vec3::new(center_x, EYE_OFFSET.y + openness * 0.5, z)),
            (inner, Vec3::new(center_x - direction * EYE_HALF_WIDTH, EYE_OFFSET.y, z)),
            (bottom, Vec3::new(center_x, EYE_OFFSET.y - openness * 0.5, z)),
        ];
        for (index, position) in positions {
            if let Some(vertex) = geometry.vertices.get_mut(index) {
                *vertex = position;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eyes::{EyeState, classify_openness};

    #[test]
    fn test_mesh_has_tracker_topology() {
        let mut source = SyntheticFaceSource::new(360, 640);
        let frame = source.next_frame();
        let face = frame.face_anchor().unwrap();
        assert!(face.geometry.has_tracker_topology());
        assert!(
            face.geometry
                .triangle_indices
                .iter()
                .all(|&i| (i as usize) < face::VERTEX_COUNT)
        );
    }

    #[test]
    fn test_blink_closes_both_eyes() {
        let mut source = SyntheticFaceSource::new(90, 160).with_blink_period(10);
        let states: Vec<EyeState> = (0..10)
            .map(|_| {
                let frame = source.next_frame();
                let face = frame.face_anchor().unwrap();
                classify_openness(&face.geometry, eyes::OPEN_REFERENCE_VERTICES[0], eyes::OPENNESS_THRESHOLD)
            })
            .collect();
        assert_eq!(states[0], EyeState::Open);
        assert_eq!(states[9], EyeState::Closed);
        assert_eq!(states.iter().filter(|s| **s == EyeState::Closed).count(), 4);
    }

    #[test]
    fn test_image_planes_are_complete() {
        let mut source = SyntheticFaceSource::new(72, 128);
        let frame = source.next_frame();
        assert_eq!(frame.image.plane_count(), 2);
        assert!(frame.image.planes.iter().all(ImagePlane::is_complete));
        assert_eq!(frame.image.planes[1].width, 36);
    }

    #[test]
    fn test_timestamps_advance() {
        let mut source = SyntheticFaceSource::new(72, 128);
        let first = source.next_frame().timestamp;
        let second = source.next_frame().timestamp;
        assert!(second > first);
        assert_eq!(source.frame_index(), 2);
    }
}
