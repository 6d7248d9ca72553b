// SPDX-License-Identifier: GPL-3.0-only

//! GPU uniform layouts
//!
//! Field order and padding mirror the WGSL structs in `src/shaders/*.wgsl`.
//! Matrices are column-major `[[f32; 4]; 4]`; `vec3` values travel as
//! `[f32; 4]` so every member stays on a 16-byte boundary.

use crate::constants::lighting;
use crate::tracking::LightEstimate;
use glam::{Mat4, Vec2, Vec3};

/// Per-frame camera and lighting constants (ring buffered)
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameConstants {
    pub projection: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub ambient_color: [f32; 4],
    pub directional_direction: [f32; 4],
    pub directional_color: [f32; 4],
    pub material_shininess: f32,
    pub _pad: [f32; 3],
}

impl FrameConstants {
    /// Build constants for one frame
    ///
    /// Light intensity scales with the estimated ambient intensity
    /// (1000 lm = 1.0); without an estimate it stays at 1.0.
    pub fn new(view: Mat4, projection: Mat4, light: Option<&LightEstimate>) -> Self {
        let intensity = light
            .map(|estimate| estimate.ambient_intensity / lighting::LUMENS_PER_UNIT)
            .unwrap_or(1.0);
        let ambient = Vec3::from_array(lighting::AMBIENT_COLOR) * intensity;
        let directional = Vec3::from_array(lighting::DIRECTIONAL_COLOR) * intensity;
        let direction = Vec3::from_array(lighting::DIRECTIONAL_DIRECTION).normalize_or_zero();

        Self {
            projection: projection.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            ambient_color: ambient.extend(0.0).to_array(),
            directional_direction: direction.extend(0.0).to_array(),
            directional_color: directional.extend(0.0).to_array(),
            material_shininess: lighting::MATERIAL_SHININESS,
            _pad: [0.0; 3],
        }
    }
}

/// Parameters for one skin smoothing pass
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SmoothingPassParams {
    pub pass_index: u32,
    pub smoothing_factor: f32,
    pub render_size: [f32; 2],
    pub image_size: [f32; 2],
    pub inverse_resolution: [f32; 2],
    pub projection: [[f32; 4]; 4],
    pub model_view_projection: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub model: [[f32; 4]; 4],
}

impl SmoothingPassParams {
    /// Parameters for a pass rendering into a `size` target
    pub fn new(
        pass_index: u32,
        smoothing_factor: f32,
        size: (u32, u32),
        projection: Mat4,
        view: Mat4,
        model: Mat4,
    ) -> Self {
        let render_size = Vec2::new(size.0.max(1) as f32, size.1.max(1) as f32);
        Self {
            pass_index,
            smoothing_factor,
            render_size: render_size.to_array(),
            image_size: render_size.to_array(),
            inverse_resolution: render_size.recip().to_array(),
            projection: projection.to_cols_array_2d(),
            model_view_projection: (projection * view * model).to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            model: model.to_cols_array_2d(),
        }
    }
}

/// Color grading controls
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ColorGradingParams {
    pub contrast: f32,
    pub saturation: f32,
    pub lut_intensity: f32,
    pub lut_enabled: u32,
}

/// Per-draw constants for the scene pass
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SceneDrawParams {
    /// Object to camera space
    pub model_view: [[f32; 4]; 4],
    pub opacity: f32,
    /// One of the `DRAW_MODE_*` values
    pub mode: u32,
    pub _pad: [u32; 2],
}

/// Flat textured quad in camera space
pub const DRAW_MODE_UNLIT: u32 = 0;
/// Lit mesh in camera space
pub const DRAW_MODE_LIT: u32 = 1;
/// Quad given directly in clip space
pub const DRAW_MODE_SCREEN: u32 = 2;

impl SceneDrawParams {
    pub fn new(model_view: Mat4, opacity: f32, mode: u32) -> Self {
        Self {
            model_view: model_view.to_cols_array_2d(),
            opacity,
            mode,
            _pad: [0; 2],
        }
    }
}

impl ColorGradingParams {
    pub fn new(contrast: f32, saturation: f32, lut_intensity: f32, lut_enabled: bool) -> Self {
        Self {
            contrast,
            saturation,
            lut_intensity,
            lut_enabled: lut_enabled as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes_match_wgsl() {
        assert_eq!(std::mem::size_of::<FrameConstants>(), 192);
        assert_eq!(std::mem::size_of::<SmoothingPassParams>(), 288);
        assert_eq!(std::mem::size_of::<ColorGradingParams>(), 16);
        assert_eq!(std::mem::size_of::<SceneDrawParams>(), 80);
    }

    #[test]
    fn test_light_estimate_scales_colors() {
        let estimate = LightEstimate {
            ambient_intensity: 500.0,
            ..Default::default()
        };
        let constants = FrameConstants::new(Mat4::IDENTITY, Mat4::IDENTITY, Some(&estimate));
        assert_eq!(constants.ambient_color, [0.25, 0.25, 0.25, 0.0]);
        assert!((constants.directional_color[0] - 0.3).abs() < 1e-6);
        assert_eq!(constants.directional_direction, [0.0, 0.0, -1.0, 0.0]);
        assert_eq!(constants.material_shininess, 30.0);

        let unlit = FrameConstants::new(Mat4::IDENTITY, Mat4::IDENTITY, None);
        assert_eq!(unlit.ambient_color, [0.5, 0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_smoothing_params_inverse_resolution() {
        let params = SmoothingPassParams::new(
            3,
            0.6,
            (180, 320),
            Mat4::IDENTITY,
            Mat4::IDENTITY,
            Mat4::IDENTITY,
        );
        assert_eq!(params.render_size, [180.0, 320.0]);
        assert!((params.inverse_resolution[0] - 1.0 / 180.0).abs() < 1e-9);
        assert_eq!(params.pass_index, 3);
    }
}
