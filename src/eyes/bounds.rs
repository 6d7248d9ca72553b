// SPDX-License-Identifier: GPL-3.0-only

//! Projected eye bounding boxes

use glam::{Mat4, Vec2, Vec3};

/// Axis-aligned eye box in viewport pixels
///
/// A zero size is the "not visible this frame" sentinel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EyeBounds {
    pub origin: Vec2,
    pub size: Vec2,
}

impl EyeBounds {
    pub const SENTINEL: Self = Self {
        origin: Vec2::ZERO,
        size: Vec2::ZERO,
    };

    pub fn new(origin: Vec2, size: Vec2) -> Self {
        Self { origin, size }
    }

    pub fn is_visible(&self) -> bool {
        self.size.x > 0.0 && self.size.y > 0.0
    }

    pub fn center(&self) -> Vec2 {
        self.origin + self.size * 0.5
    }

    /// Grow by `padding` on each side; the sentinel stays the sentinel
    pub fn padded(&self, padding: Vec2) -> Self {
        if !self.is_visible() {
            return Self::SENTINEL;
        }
        Self {
            origin: self.origin - padding,
            size: self.size + padding * 2.0,
        }
    }
}

/// Project a point to viewport pixels (origin top-left, y down)
///
/// Returns `None` for points at or behind the camera.
pub fn project_to_viewport(point: Vec3, model_view_projection: Mat4, viewport: Vec2) -> Option<Vec2> {
    let clip = model_view_projection * point.extend(1.0);
    if clip.w <= f32::EPSILON {
        return None;
    }
    let ndc = clip.truncate() / clip.w;
    Some(Vec2::new(
        (ndc.x + 1.0) * 0.5 * viewport.x,
        (1.0 - ndc.y) * 0.5 * viewport.y,
    ))
}

/// Project an eye's reference vertices and box them
///
/// Vertices behind the camera or missing from the mesh are skipped. The box
/// is clamped to the viewport; if none of the projected points is on screen
/// the sentinel is returned, otherwise each side is at least one pixel.
pub fn project_eye_bounds(
    vertices: &[Vec3],
    ids: &[usize],
    model_view: Mat4,
    projection: Mat4,
    viewport: (u32, u32),
) -> EyeBounds {
    let size = Vec2::new(viewport.0 as f32, viewport.1 as f32);
    if size.x < 1.0 || size.y < 1.0 {
        return EyeBounds::SENTINEL;
    }
    let mvp = projection * model_view;

    let projected: Vec<Vec2> = ids
        .iter()
        .filter_map(|&id| vertices.get(id))
        .filter_map(|&vertex| project_to_viewport(vertex, mvp, size))
        .collect();

    let on_screen = projected
        .iter()
        .any(|p| p.x >= 0.0 && p.y >= 0.0 && p.x <= size.x && p.y <= size.y);
    if !on_screen {
        return EyeBounds::SENTINEL;
    }

    let min = projected.iter().fold(Vec2::splat(f32::MAX), |acc, p| acc.min(*p));
    let max = projected.iter().fold(Vec2::splat(f32::MIN), |acc, p| acc.max(*p));

    let origin = min.clamp(Vec2::ZERO, size - Vec2::ONE);
    let extent = max.clamp(Vec2::ZERO, size);
    EyeBounds {
        origin,
        size: (extent - origin).max(Vec2::ONE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{Z_FAR, Z_NEAR};

    fn projection() -> Mat4 {
        Mat4::perspective_rh(60f32.to_radians(), 720.0 / 1280.0, Z_NEAR, Z_FAR)
    }

    fn eye_quad(center: Vec3) -> Vec<Vec3> {
        vec![
            center + Vec3::new(-0.015, 0.0, 0.0),
            center + Vec3::new(0.0, 0.007, 0.0),
            center + Vec3::new(0.015, 0.0, 0.0),
            center + Vec3::new(0.0, -0.007, 0.0),
        ]
    }

    #[test]
    fn test_visible_eye_has_positive_box() {
        let vertices = eye_quad(Vec3::new(0.03, 0.02, 0.0));
        let model_view = Mat4::from_translation(Vec3::new(0.0, 0.0, -0.5));
        let bounds = project_eye_bounds(&vertices, &[0, 1, 2, 3], model_view, projection(), (720, 1280));
        assert!(bounds.is_visible());
        assert!(bounds.origin.x >= 0.0 && bounds.origin.y >= 0.0);
        assert!(bounds.origin.x + bounds.size.x <= 720.0);
        // Eye sits right of and above center
        assert!(bounds.center().x > 360.0);
        assert!(bounds.center().y < 640.0);
    }

    #[test]
    fn test_behind_camera_is_sentinel() {
        let vertices = eye_quad(Vec3::ZERO);
        let model_view = Mat4::from_translation(Vec3::new(0.0, 0.0, 0.5));
        let bounds = project_eye_bounds(&vertices, &[0, 1, 2, 3], model_view, projection(), (720, 1280));
        assert_eq!(bounds, EyeBounds::SENTINEL);
    }

    #[test]
    fn test_off_screen_is_sentinel() {
        let vertices = eye_quad(Vec3::new(5.0, 0.0, 0.0));
        let model_view = Mat4::from_translation(Vec3::new(0.0, 0.0, -0.5));
        let bounds = project_eye_bounds(&vertices, &[0, 1, 2, 3], model_view, projection(), (720, 1280));
        assert!(!bounds.is_visible());
    }

    #[test]
    fn test_single_point_on_edge_is_clamped_to_one_pixel() {
        // Degenerate eye: all vertices coincide at the viewport center
        let vertices = vec![Vec3::ZERO; 4];
        let model_view = Mat4::from_translation(Vec3::new(0.0, 0.0, -1.0));
        let bounds = project_eye_bounds(&vertices, &[0, 1, 2, 3], model_view, projection(), (720, 1280));
        assert_eq!(bounds.size, Vec2::ONE);
        assert_eq!(bounds.origin, Vec2::new(360.0, 640.0));
    }

    #[test]
    fn test_missing_ids_are_skipped() {
        let vertices = eye_quad(Vec3::ZERO);
        let model_view = Mat4::from_translation(Vec3::new(0.0, 0.0, -0.5));
        let bounds = project_eye_bounds(&vertices, &[0, 2, 4000], model_view, projection(), (720, 1280));
        assert!(bounds.is_visible());
    }

    #[test]
    fn test_padding_keeps_sentinel() {
        assert_eq!(
            EyeBounds::SENTINEL.padded(Vec2::new(5.0, 10.0)),
            EyeBounds::SENTINEL
        );
        let padded = EyeBounds::new(Vec2::new(20.0, 30.0), Vec2::new(10.0, 4.0))
            .padded(Vec2::new(5.0, 10.0));
        assert_eq!(padded.origin, Vec2::new(15.0, 20.0));
        assert_eq!(padded.size, Vec2::new(20.0, 24.0));
    }
}
