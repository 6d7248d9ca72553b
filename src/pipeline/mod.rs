// SPDX-License-Identifier: GPL-3.0-only

//! Frame scheduling: in-flight limiting, uniform layouts and stage planning
//!
//! Everything in this module is CPU-only. The renderer asks
//! [`FramePlan::decide`] which stages run for a frame and
//! [`plan_passes`] how the smoothing chain is laid out, then records GPU
//! work accordingly.

pub mod ring;
pub mod uniforms;

pub use ring::{FramePermit, InFlightLimiter, RingSlot, UniformRing};

use crate::constants::smoothing;
use serde::{Deserialize, Serialize};

/// One entry of the smoothing pass table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmoothingPass {
    /// Render target written by this pass
    pub target: usize,
    /// Clear the target first; otherwise blend over its contents
    pub clear: bool,
}

/// Validated smoothing pass table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmoothingPassTable {
    passes: Vec<SmoothingPass>,
}

impl SmoothingPassTable {
    /// Validate a pass list
    ///
    /// Targets must exist and the final pass must write target 0, where the
    /// compositor picks up the result.
    pub fn new(passes: Vec<SmoothingPass>) -> Result<Self, String> {
        let Some(last) = passes.last() else {
            return Err("smoothing pass table is empty".into());
        };
        if last.target != 0 {
            return Err(format!(
                "last smoothing pass must target 0, got {}",
                last.target
            ));
        }
        if let Some(pass) = passes
            .iter()
            .find(|pass| pass.target >= smoothing::TARGET_COUNT)
        {
            return Err(format!(
                "smoothing target {} out of range (0..{})",
                pass.target,
                smoothing::TARGET_COUNT
            ));
        }
        Ok(Self { passes })
    }

    pub fn passes(&self) -> &[SmoothingPass] {
        &self.passes
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

impl Default for SmoothingPassTable {
    fn default() -> Self {
        Self {
            passes: smoothing::DEFAULT_PASSES
                .iter()
                .map(|&(target, clear)| SmoothingPass { target, clear })
                .collect(),
        }
    }
}

/// Size of a smoothing target, rounded up and never empty
pub fn target_size(viewport: (u32, u32), scale: f32) -> (u32, u32) {
    let width = (viewport.0 as f32 * scale).ceil().max(1.0) as u32;
    let height = (viewport.1 as f32 * scale).ceil().max(1.0) as u32;
    (width, height)
}

/// A smoothing pass resolved against the current viewport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedPass {
    pub pass_index: u32,
    pub target: usize,
    pub clear: bool,
    pub size: (u32, u32),
    /// Source slot that must be bound to the dummy texture because it
    /// aliases the render target (`None` for target 0, which is never sampled)
    pub masked_slot: Option<usize>,
}

/// Source slot holding smoothing target `target` (slots 0/1 are camera/mask)
pub fn source_slot_for_target(target: usize) -> Option<usize> {
    (target >= 1).then_some(target + 1)
}

/// Resolve a pass table against target scales and a viewport
pub fn plan_passes(
    table: &SmoothingPassTable,
    sizes: &[f32; smoothing::TARGET_COUNT],
    viewport: (u32, u32),
) -> Vec<PlannedPass> {
    table
        .passes()
        .iter()
        .enumerate()
        .map(|(index, pass)| PlannedPass {
            pass_index: index as u32,
            target: pass.target,
            clear: pass.clear,
            size: target_size(viewport, sizes[pass.target]),
            masked_slot: source_slot_for_target(pass.target),
        })
        .collect()
}

/// Facts about the current frame that gate optional stages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameConditions {
    pub swapping: bool,
    pub tracking: bool,
    pub has_content: bool,
    pub needs_eye_update: bool,
    pub needs_camera_texture: bool,
    pub eyes_visible: bool,
    pub has_camera_pose: bool,
    pub has_face_geometry: bool,
    pub has_world_lut: bool,
    pub color_non_neutral: bool,
    pub output_buffer_available: bool,
}

/// Stages to run for one frame, in pipeline order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramePlan {
    pub extract_eyes: bool,
    pub smooth_skin: bool,
    pub feed_camera_texture: bool,
    pub render_scene: bool,
    pub color_grade: bool,
    pub copy_output: bool,
}

impl FramePlan {
    pub fn decide(c: &FrameConditions) -> Self {
        let active = !c.swapping && c.has_content;
        let smooth_skin = active && c.tracking && c.has_camera_pose && c.has_face_geometry;
        Self {
            extract_eyes: active && c.tracking && c.needs_eye_update && c.eyes_visible,
            smooth_skin,
            feed_camera_texture: smooth_skin && c.needs_camera_texture,
            render_scene: !c.swapping,
            color_grade: !c.swapping && (c.has_world_lut || c.color_non_neutral),
            copy_output: c.output_buffer_available,
        }
    }
}
