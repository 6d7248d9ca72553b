// SPDX-License-Identifier: GPL-3.0-only

//! Face tracking input
//!
//! One [`TrackingFrame`] arrives per camera frame: the captured image,
//! the camera pose for the current viewport, an optional light estimate
//! and the tracked anchors.

pub mod synthetic;

use crate::constants::face;
use glam::{Affine2, Mat3, Mat4, Vec2, Vec3};
use std::collections::HashMap;

/// One plane of a planar camera buffer
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePlane {
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
    pub data: Vec<u8>,
}

impl ImagePlane {
    /// Tightly packed plane with `bytes_per_pixel` channels
    pub fn packed(width: u32, height: u32, bytes_per_pixel: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            bytes_per_row: width * bytes_per_pixel,
            data,
        }
    }

    /// Whether `data` covers every row
    pub fn is_complete(&self) -> bool {
        self.data.len() as u64 >= self.bytes_per_row as u64 * self.height as u64
    }
}

/// Bi-planar YCbCr camera image (luma plane, interleaved chroma plane)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedImage {
    pub width: u32,
    pub height: u32,
    pub planes: Vec<ImagePlane>,
}

impl CapturedImage {
    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }
}

/// Pinhole intrinsics in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl CameraIntrinsics {
    /// Read from a column-major intrinsics matrix
    /// `[fx 0 cx; 0 fy cy; 0 0 1]`
    pub fn from_matrix(matrix: Mat3) -> Self {
        Self {
            fx: matrix.x_axis.x,
            fy: matrix.y_axis.y,
            cx: matrix.z_axis.x,
            cy: matrix.z_axis.y,
        }
    }
}

/// Scene light estimate from the tracker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightEstimate {
    /// Ambient intensity in lumens (1000 is neutral)
    pub ambient_intensity: f32,
    /// Ambient color temperature in Kelvin
    pub ambient_color_temperature: f32,
    /// Dominant light direction, when a directional estimate is available
    pub primary_direction: Option<Vec3>,
    /// Dominant light intensity in lumens
    pub primary_intensity: Option<f32>,
}

impl Default for LightEstimate {
    fn default() -> Self {
        Self {
            ambient_intensity: 1000.0,
            ambient_color_temperature: 6500.0,
            primary_direction: None,
            primary_intensity: None,
        }
    }
}

/// Blend shape coefficients the content layer tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendShapeLocation {
    EyeBlinkLeft,
    EyeBlinkRight,
    JawOpen,
    MouthSmileLeft,
    MouthSmileRight,
    BrowInnerUp,
}

/// Tracked face mesh in face-local coordinates (meters)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceGeometry {
    pub vertices: Vec<Vec3>,
    pub texture_coordinates: Vec<Vec2>,
    pub triangle_indices: Vec<u16>,
}

impl FaceGeometry {
    /// Whether the mesh has the fixed tracker topology
    pub fn has_tracker_topology(&self) -> bool {
        self.vertices.len() == face::VERTEX_COUNT
            && self.texture_coordinates.len() == face::VERTEX_COUNT
            && self.triangle_indices.len() == face::INDEX_COUNT
    }

    pub fn vertex(&self, index: usize) -> Option<Vec3> {
        self.vertices.get(index).copied()
    }
}

/// A tracked face
#[derive(Debug, Clone, PartialEq)]
pub struct FaceAnchor {
    pub id: u64,
    /// Face to world transform
    pub transform: Mat4,
    pub geometry: FaceGeometry,
    pub blend_shapes: HashMap<BlendShapeLocation, f32>,
    pub is_tracked: bool,
}

/// Anchors reported for a frame
#[derive(Debug, Clone, PartialEq)]
pub enum Anchor {
    Face(FaceAnchor),
    /// Plain world anchor, matched against the content's world node
    World { id: u64, transform: Mat4 },
}

/// Camera pose for the current viewport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    /// World to camera
    pub view: Mat4,
    /// Camera to clip, depth 0..1
    pub projection: Mat4,
}

impl Default for CameraPose {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

/// Everything the tracker delivers for one camera frame
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingFrame {
    /// Capture time in seconds
    pub timestamp: f64,
    pub image: CapturedImage,
    pub camera: CameraPose,
    pub intrinsics: CameraIntrinsics,
    pub light: Option<LightEstimate>,
    /// Viewport UV to camera image UV
    pub display_transform: Affine2,
    pub anchors: Vec<Anchor>,
}

impl TrackingFrame {
    /// First face anchor, if any
    pub fn face_anchor(&self) -> Option<&FaceAnchor> {
        self.anchors.iter().find_map(|anchor| match anchor {
            Anchor::Face(face) => Some(face),
            Anchor::World { .. } => None,
        })
    }
}
