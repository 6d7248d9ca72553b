// SPDX-License-Identifier: GPL-3.0-only

//! Renderer-wide constants
//!
//! Values that define the shape of the pipeline (ring depth, mesh sizes,
//! eye reference vertices). Tunable numbers that users may want to change
//! have a default here and an override in [`crate::config::RendererConfig`].

use std::time::Duration;

/// Maximum number of frames with outstanding GPU work
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Uniform slots must start on a 256-byte boundary for dynamic offsets
pub const UNIFORM_ALIGNMENT: u64 = 256;

/// Round a uniform struct size up to the next 256-byte slot.
///
/// Matches the ring layout `(size & !0xFF) + 0x100`, which always adds a
/// full slot of headroom even for sizes that are already aligned.
pub const fn aligned_uniform_size(size: u64) -> u64 {
    (size & !0xFF) + 0x100
}

/// Face mesh topology delivered by the tracker
pub mod face {
    /// Vertices in the tracked face mesh
    pub const VERTEX_COUNT: usize = 1220;
    /// Triangles in the tracked face mesh
    pub const TRIANGLE_COUNT: usize = 2304;
    /// Indices in the tracked face mesh (u16, three per triangle)
    pub const INDEX_COUNT: usize = TRIANGLE_COUNT * 3;
}

/// Skin smoothing chain defaults
pub mod smoothing {
    /// Blend strength of the smoothed skin over the camera image
    pub const DEFAULT_FACTOR: f32 = 0.6;

    /// Target scales relative to the viewport. Index 0 is the full-size result.
    pub const DEFAULT_PASS_SIZES: [f32; 5] = [1.0, 0.25, 0.2, 0.2, 0.2];

    /// Number of smoothing render targets
    pub const TARGET_COUNT: usize = DEFAULT_PASS_SIZES.len();

    /// Default pass table as `(target index, clear before drawing)`
    pub const DEFAULT_PASSES: [(usize, bool); 7] = [
        (1, true),
        (2, true),
        (3, true),
        (4, true),
        (2, false),
        (3, false),
        (0, true),
    ];

    /// Textures bound to every pass: camera, mask, targets 1..=4
    pub const SOURCE_TEXTURE_COUNT: usize = 6;
}

/// Eye tracking constants
pub mod eyes {
    use std::time::Duration;

    /// Eye-opening distance (mesh units) below which an eye is closed
    pub const OPENNESS_THRESHOLD: f32 = 0.0052;

    /// Vertex pairs measuring lid separation: left, right
    pub const OPEN_REFERENCE_VERTICES: [[usize; 2]; 2] = [[1076, 1062], [1094, 1108]];

    /// Vertices spanning the left eye's projected bounding box
    pub const LEFT_BOUNDS_VERTICES: [usize; 4] = [1081, 1062, 1069, 1076];

    /// Vertices spanning the right eye's projected bounding box
    pub const RIGHT_BOUNDS_VERTICES: [usize; 4] = [1101, 1108, 1089, 1094];

    /// Padding added on each side of an eye box before cropping (x, y)
    pub const DEFAULT_PADDING: (f32, f32) = (5.0, 10.0);

    /// Per-eye scratch buffer dimensions
    pub const SCRATCH_WIDTH: u32 = 1280;
    pub const SCRATCH_HEIGHT: u32 = 720;
    pub const SCRATCH_BYTES: u64 = SCRATCH_WIDTH as u64 * SCRATCH_HEIGHT as u64 * 4;

    /// Depth of the plane eye centers are mapped onto
    pub const CENTER_DEPTH: f32 = -2.0;

    /// Iris scale as a linear function of the face node depth
    pub const IRIS_SCALE_SLOPE: f32 = 0.4608;
    pub const IRIS_SCALE_OFFSET: f32 = 0.303;

    /// Gaze look-at distance multiplier applied to the projection x scale
    pub const GAZE_LOOK_DISTANCE: f32 = 10.0;

    /// Visibility transition for iris nodes
    pub const VISIBILITY_FADE: Duration = Duration::from_millis(300);
}

/// Color grading defaults
pub mod color {
    /// Strength of the world lookup table when blending
    pub const DEFAULT_LUT_INTENSITY: f32 = 0.9;
    /// Neutral contrast
    pub const NEUTRAL_CONTRAST: f32 = 0.0;
    /// Neutral saturation
    pub const NEUTRAL_SATURATION: f32 = 1.0;
}

/// Output pool defaults
pub mod output {
    /// Minimum number of pixel buffers the pool keeps around
    pub const POOL_MINIMUM: usize = 3;
    /// Live buffer count at which the pool refuses to allocate
    pub const DEFAULT_ALLOCATION_THRESHOLD: usize = 3;
    /// Presentation timestamps use microsecond resolution
    pub const TIMESCALE: u32 = 1_000_000;
}

/// Lighting defaults used for frame constants
pub mod lighting {
    /// Ambient light color before intensity scaling
    pub const AMBIENT_COLOR: [f32; 3] = [0.5, 0.5, 0.5];
    /// Directional light color before intensity scaling
    pub const DIRECTIONAL_COLOR: [f32; 3] = [0.6, 0.6, 0.6];
    /// Directional light points away from the viewer
    pub const DIRECTIONAL_DIRECTION: [f32; 3] = [0.0, 0.0, -1.0];
    /// Specular exponent for the face material
    pub const MATERIAL_SHININESS: f32 = 30.0;
    /// Light estimates report lumens; 1000 lm is unit intensity
    pub const LUMENS_PER_UNIT: f32 = 1000.0;
}

/// Opacity transition length when tracking starts or stops
pub const TRACKING_FADE: Duration = Duration::from_millis(300);

/// Near/far planes for the portrait camera projection
pub const Z_NEAR: f32 = 0.001;
pub const Z_FAR: f32 = 1000.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_uniform_size() {
        assert_eq!(aligned_uniform_size(1), 256);
        assert_eq!(aligned_uniform_size(176), 256);
        assert_eq!(aligned_uniform_size(256), 512);
        assert_eq!(aligned_uniform_size(300), 512);
        assert_eq!(aligned_uniform_size(176) % UNIFORM_ALIGNMENT, 0);
    }

    #[test]
    fn test_default_pass_table_ends_on_result_target() {
        let last = smoothing::DEFAULT_PASSES[smoothing::DEFAULT_PASSES.len() - 1];
        assert_eq!(last, (0, true));
        assert!(
            smoothing::DEFAULT_PASSES
                .iter()
                .all(|(target, _)| *target < smoothing::TARGET_COUNT)
        );
    }

    #[test]
    fn test_scratch_fits_full_hd_crop() {
        assert_eq!(eyes::SCRATCH_BYTES, 3_686_400);
    }
}
