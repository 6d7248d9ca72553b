// SPDX-License-Identifier: GPL-3.0-only

//! Landmark detection on eye crops
//!
//! The detector is an external collaborator; [`LandmarkDetector`] is its
//! contract. [`CentroidDetector`] is a simple built-in implementation that
//! locates the pupil as the centroid of dark pixels.

use super::bounds::EyeBounds;
use super::extractor::CropPlan;
use crate::content::ContentBundle;
use crate::tracking::CameraIntrinsics;
use glam::{Vec2, Vec3};

/// Pixels of one padded eye region (RGBA8, rows padded to the copy pitch)
#[derive(Debug, Clone, PartialEq)]
pub struct EyeCrop {
    pub pixels: Vec<u8>,
    pub bytes_per_row: u32,
    /// Copied size in pixels
    pub size: (u32, u32),
    /// Origin of the unpadded eye box in viewport pixels
    pub offset: Vec2,
    /// Origin of the padded box in the source texture
    pub origin: (u32, u32),
    /// Crop-local bounds, always `(0, 0, w, h)`
    pub bounds: EyeBounds,
}

impl EyeCrop {
    pub fn from_plan(plan: &CropPlan, pixels: Vec<u8>) -> Self {
        Self {
            pixels,
            bytes_per_row: plan.bytes_per_row,
            size: plan.copy_size,
            offset: plan.offset,
            origin: plan.source_origin,
            bounds: EyeBounds::new(
                Vec2::ZERO,
                Vec2::new(plan.copy_size.0 as f32, plan.copy_size.1 as f32),
            ),
        }
    }

    /// RGBA of pixel (x, y), if it lies in the crop
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.size.0 || y >= self.size.1 {
            return None;
        }
        let start = y as usize * self.bytes_per_row as usize + x as usize * 4;
        let texel = self.pixels.get(start..start + 4)?;
        Some([texel[0], texel[1], texel[2], texel[3]])
    }

    /// Center of the crop in viewport pixels
    pub fn viewport_center(&self) -> Vec2 {
        Vec2::new(self.origin.0 as f32, self.origin.1 as f32) + self.bounds.size * 0.5
    }
}

/// Locates eye centers and gaze directions in a pair of eye crops
///
/// Centers are reported in viewport pixels. "Left" is whichever crop was
/// passed as `left` to the last [`detect`](Self::detect) call.
pub trait LandmarkDetector: Send {
    /// Forwarded once, from the first tracking frame
    fn set_intrinsics(&mut self, intrinsics: CameraIntrinsics);

    fn detect(&mut self, content: &ContentBundle, left: &EyeCrop, right: &EyeCrop);

    fn left_eye_center(&self) -> Vec2;

    fn right_eye_center(&self) -> Vec2;

    fn left_eye_gaze(&self) -> Vec3;

    fn right_eye_gaze(&self) -> Vec3;
}

/// Luma below which a pixel counts as pupil
const DARK_THRESHOLD: f32 = 60.0;

#[derive(Debug, Clone, Copy, Default)]
struct EyeEstimate {
    center: Vec2,
    gaze: Vec3,
}

/// Dark-pixel centroid detector
#[derive(Debug, Clone, Default)]
pub struct CentroidDetector {
    intrinsics: Option<CameraIntrinsics>,
    left: EyeEstimate,
    right: EyeEstimate,
}

impl CentroidDetector {
    pub fn new() -> Self {
        Self::default()
    }

    fn estimate(&self, crop: &EyeCrop) -> EyeEstimate {
        let mut sum = Vec2::ZERO;
        let mut count = 0u32;
        for y in 0..crop.size.1 {
            for x in 0..crop.size.0 {
                let Some([r, g, b, _]) = crop.pixel(x, y) else {
                    continue;
                };
                let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
                if luma < DARK_THRESHOLD {
                    sum += Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                    count += 1;
                }
            }
        }

        let box_center = crop.viewport_center();
        if count == 0 {
            return EyeEstimate {
                center: box_center,
                gaze: Vec3::Z,
            };
        }

        let origin = Vec2::new(crop.origin.0 as f32, crop.origin.1 as f32);
        let center = origin + sum / count as f32;
        let delta = center - box_center;
        let scale = match self.intrinsics {
            Some(k) if k.fx > 0.0 && k.fy > 0.0 => Vec2::new(k.fx, k.fy),
            _ => (crop.bounds.size * 0.5).max(Vec2::ONE),
        };
        let offset = delta / scale;
        EyeEstimate {
            center,
            gaze: Vec3::new(offset.x, offset.y, 1.0).normalize(),
        }
    }
}

impl LandmarkDetector for CentroidDetector {
    fn set_intrinsics(&mut self, intrinsics: CameraIntrinsics) {
        self.intrinsics = Some(intrinsics);
    }

    fn detect(&mut self, _content: &ContentBundle, left: &EyeCrop, right: &EyeCrop) {
        self.left = self.estimate(left);
        self.right = self.estimate(right);
    }

    fn left_eye_center(&self) -> Vec2 {
        self.left.center
    }

    fn right_eye_center(&self) -> Vec2 {
        self.right.center
    }

    fn left_eye_gaze(&self) -> Vec3 {
        self.left.gaze
    }

    fn right_eye_gaze(&self) -> Vec3 {
        self.right.gaze
    }
}
