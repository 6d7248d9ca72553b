// SPDX-License-Identifier: GPL-3.0-only
//! Render stages and their WGSL shaders
//!
//! Each stage owns its pipeline and the GPU resources sized for the current
//! viewport. Stages record into an encoder the renderer supplies; none of
//! them submits work on its own.
//!
//! Image-space stages share the full-screen triangle in
//! `fullscreen.wgsl`, which is prepended to their fragment source.

pub mod blit;
pub mod captured_image;
pub mod color_grading;
pub mod composite;
mod gpu_processor;
pub mod scene;
pub mod skin_smoothing;

pub use blit::Blitter;
pub use captured_image::CapturedImageUploader;
pub use color_grading::ColorGrader;
pub use composite::Compositor;
pub use gpu_processor::{
    CachedDimensions, create_image_texture, create_linear_sampler, create_render_texture,
    padded_bytes_per_row, read_buffer_async, read_buffer_range_async,
};
pub use scene::SceneCompositor;
pub use skin_smoothing::SkinSmoother;

/// Full-screen triangle vertex stage (`vs_fullscreen`)
pub const FULLSCREEN_VERTEX: &str = include_str!("fullscreen.wgsl");

pub const CAPTURED_IMAGE_SHADER: &str = include_str!("captured_image.wgsl");
pub const SKIN_SMOOTHING_SHADER: &str = include_str!("skin_smoothing.wgsl");
pub const SCENE_SHADER: &str = include_str!("scene.wgsl");

const COMPOSITE_FRAGMENT: &str = include_str!("composite.wgsl");
const BLIT_FRAGMENT: &str = include_str!("blit.wgsl");
const COLOR_GRADING_FRAGMENT: &str = include_str!("color_grading.wgsl");

fn with_fullscreen_vertex(fragment: &str) -> String {
    format!("{}\n{}", FULLSCREEN_VERTEX, fragment)
}

pub fn composite_shader() -> String {
    with_fullscreen_vertex(COMPOSITE_FRAGMENT)
}

pub fn blit_shader() -> String {
    with_fullscreen_vertex(BLIT_FRAGMENT)
}

pub fn color_grading_shader() -> String {
    with_fullscreen_vertex(COLOR_GRADING_FRAGMENT)
}

/// Every complete shader module the renderer compiles, by name
pub fn shader_sources() -> Vec<(&'static str, String)> {
    vec![
        ("captured_image", CAPTURED_IMAGE_SHADER.to_string()),
        ("skin_smoothing", SKIN_SMOOTHING_SHADER.to_string()),
        ("scene", SCENE_SHADER.to_string()),
        ("composite", composite_shader()),
        ("blit", blit_shader()),
        ("color_grading", color_grading_shader()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_space_shaders_carry_vertex_stage() {
        for source in [composite_shader(), blit_shader(), color_grading_shader()] {
            assert!(source.contains("fn vs_fullscreen"));
            assert!(source.contains("fn fs_main"));
        }
    }

    #[test]
    fn test_every_stage_is_listed() {
        let names: Vec<&str> = shader_sources().iter().map(|(name, _)| *name).collect();
        assert_eq!(names.len(), 6);
        assert!(names.contains(&"skin_smoothing"));
        assert!(names.contains(&"color_grading"));
    }
}
