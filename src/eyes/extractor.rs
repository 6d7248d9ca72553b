// SPDX-License-Identifier: GPL-3.0-only

//! Eye-region crop planning, GPU copy and readback
//!
//! Each eye box is padded, aligned to the copy row pitch and copied from the
//! viewport-sized camera composite into a per-eye scratch buffer. Both eyes
//! are planned before any copy is recorded so a bad box never produces a
//! partial extraction.

use super::bounds::EyeBounds;
use super::detector::EyeCrop;
use crate::constants::eyes;
use crate::errors::ExtractionError;
use crate::gpu::wgpu;
use crate::shaders::read_buffer_range_async;
use glam::{Vec2, Vec3};
use std::sync::Arc;
use tracing::debug;

/// Copy layout for one eye
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropPlan {
    /// Top-left texel of the padded box in the source texture
    pub source_origin: (u32, u32),
    /// Texels copied: the padded size truncated to whole pixels
    pub copy_size: (u32, u32),
    /// Copy size rounded up to the row alignment
    pub aligned_size: (u32, u32),
    /// Row pitch of the scratch buffer
    pub bytes_per_row: u32,
    /// Origin of the unpadded eye box
    pub offset: Vec2,
    /// Padded box size before truncation
    pub padded_size: Vec2,
}

impl CropPlan {
    /// Bytes of scratch memory the copy touches
    pub fn required_bytes(&self) -> u64 {
        self.bytes_per_row as u64 * self.aligned_size.1 as u64
    }
}

/// Plan the copy of one padded eye box
///
/// `alignment` is in pixels: the row alignment in bytes divided by
/// `bytes_per_pixel`. Checks run in order: zero area, negative origin,
/// aligned region past the source edge, scratch capacity.
pub fn plan_crop(
    bounds: &EyeBounds,
    padding: Vec2,
    alignment: u32,
    source_size: (u32, u32),
    bytes_per_pixel: u32,
    scratch_bytes: u64,
) -> Result<CropPlan, ExtractionError> {
    let padded = bounds.padded(padding);
    let copy_size = (padded.size.x.max(0.0) as u32, padded.size.y.max(0.0) as u32);
    if copy_size.0 == 0 || copy_size.1 == 0 {
        return Err(ExtractionError::ZeroArea);
    }

    let alignment = alignment.max(1);
    let aligned_size = (
        copy_size.0.div_ceil(alignment) * alignment,
        copy_size.1.div_ceil(alignment) * alignment,
    );

    if padded.origin.x < 0.0 || padded.origin.y < 0.0 {
        return Err(ExtractionError::OutOfBounds {
            x: padded.origin.x.floor() as i64,
            y: padded.origin.y.floor() as i64,
            width: aligned_size.0,
            height: aligned_size.1,
        });
    }
    let source_origin = (padded.origin.x as u32, padded.origin.y as u32);

    if source_origin.0 as u64 + aligned_size.0 as u64 > source_size.0 as u64
        || source_origin.1 as u64 + aligned_size.1 as u64 > source_size.1 as u64
    {
        return Err(ExtractionError::OutOfBounds {
            x: source_origin.0 as i64,
            y: source_origin.1 as i64,
            width: aligned_size.0,
            height: aligned_size.1,
        });
    }

    let plan = CropPlan {
        source_origin,
        copy_size,
        aligned_size,
        bytes_per_row: aligned_size.0 * bytes_per_pixel,
        offset: bounds.origin,
        padded_size: padded.size,
    };
    let required = plan.required_bytes();
    if required > scratch_bytes {
        return Err(ExtractionError::ScratchTooSmall {
            required,
            available: scratch_bytes,
        });
    }
    Ok(plan)
}

/// Map an eye center from viewport pixels onto the gaze plane
///
/// x spans -1..1 across the width; y is flipped and scaled by the aspect
/// ratio so both axes share units; z is the fixed plane depth.
pub fn map_eye_center(center: Vec2, viewport: Vec2) -> Vec3 {
    let x = (center.x / viewport.x - 0.5) * 2.0;
    let y = ((1.0 - center.y / viewport.y) - 0.5) * 2.0 * (viewport.y / viewport.x);
    Vec3::new(x, y, eyes::CENTER_DEPTH)
}

/// Image-space gaze to scene space (y up)
pub fn flip_gaze(gaze: Vec3) -> Vec3 {
    Vec3::new(gaze.x, -gaze.y, gaze.z)
}

/// Owns the per-eye scratch buffers
pub struct EyeRegionExtractor {
    device: Arc<wgpu::Device>,
    scratch: [wgpu::Buffer; 2],
    padding: Vec2,
    bytes_per_pixel: u32,
}

impl EyeRegionExtractor {
    /// Allocate both scratch buffers for crops of an RGBA8 source
    pub fn new(device: Arc<wgpu::Device>, padding: (f32, f32)) -> Self {
        let scratch = ["eye_scratch_left", "eye_scratch_right"].map(|label| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: eyes::SCRATCH_BYTES,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            })
        });
        Self {
            device,
            scratch,
            padding: Vec2::new(padding.0, padding.1),
            bytes_per_pixel: 4,
        }
    }

    fn alignment(&self) -> u32 {
        wgpu::COPY_BYTES_PER_ROW_ALIGNMENT / self.bytes_per_pixel
    }

    /// Plan both crops; the first failure aborts the extraction
    pub fn plan(
        &self,
        first: &EyeBounds,
        second: &EyeBounds,
        source_size: (u32, u32),
    ) -> Result<[CropPlan; 2], ExtractionError> {
        let first = plan_crop(
            first,
            self.padding,
            self.alignment(),
            source_size,
            self.bytes_per_pixel,
            eyes::SCRATCH_BYTES,
        )?;
        let second = plan_crop(
            second,
            self.padding,
            self.alignment(),
            source_size,
            self.bytes_per_pixel,
            eyes::SCRATCH_BYTES,
        )?;
        debug!(
            first_origin = ?first.source_origin,
            first_size = ?first.copy_size,
            second_origin = ?second.source_origin,
            second_size = ?second.copy_size,
            "Eye crops planned"
        );
        Ok([first, second])
    }

    /// Record both texture-to-buffer copies
    pub fn encode_copies(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::Texture,
        plans: &[CropPlan; 2],
    ) {
        for (plan, scratch) in plans.iter().zip(&self.scratch) {
            encoder.copy_texture_to_buffer(
                wgpu::TexelCopyTextureInfo {
                    texture: source,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: plan.source_origin.0,
                        y: plan.source_origin.1,
                        z: 0,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyBufferInfo {
                    buffer: scratch,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(plan.bytes_per_row),
                        rows_per_image: Some(plan.copy_size.1),
                    },
                },
                wgpu::Extent3d {
                    width: plan.copy_size.0,
                    height: plan.copy_size.1,
                    depth_or_array_layers: 1,
                },
            );
        }
    }

    /// Map both scratch buffers and build the crops
    ///
    /// The copies must have been submitted.
    pub async fn read_crops(&self, plans: &[CropPlan; 2]) -> Result<[EyeCrop; 2], ExtractionError> {
        let mut crops = Vec::with_capacity(2);
        for (plan, scratch) in plans.iter().zip(&self.scratch) {
            let len = plan.bytes_per_row as u64 * plan.copy_size.1 as u64;
            let pixels = read_buffer_range_async(&self.device, scratch, len)
                .await
                .map_err(ExtractionError::Readback)?;
            crops.push(EyeCrop::from_plan(plan, pixels));
        }
        let second = crops.pop().ok_or_else(|| ExtractionError::Readback("missing crop".into()))?;
        let first = crops.pop().ok_or_else(|| ExtractionError::Readback("missing crop".into()))?;
        Ok([first, second])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: (u32, u32) = (720, 1280);
    const PADDING: Vec2 = Vec2::new(5.0, 10.0);

    fn plan(bounds: EyeBounds) -> Result<CropPlan, ExtractionError> {
        plan_crop(&bounds, PADDING, 64, SOURCE, 4, eyes::SCRATCH_BYTES)
    }

    #[test]
    fn test_plan_pads_and_aligns() {
        let bounds = EyeBounds::new(Vec2::new(400.5, 560.0), Vec2::new(70.0, 30.0));
        let plan = plan(bounds).unwrap();
        assert_eq!(plan.source_origin, (395, 550));
        assert_eq!(plan.copy_size, (80, 50));
        assert_eq!(plan.aligned_size, (128, 64));
        assert_eq!(plan.bytes_per_row, 512);
        assert_eq!(plan.bytes_per_row % wgpu::COPY_BYTES_PER_ROW_ALIGNMENT, 0);
        assert_eq!(plan.offset, Vec2::new(400.5, 560.0));
    }

    #[test]
    fn test_zero_width_box_fails() {
        let bounds = EyeBounds::new(Vec2::new(100.0, 100.0), Vec2::new(0.0, 20.0));
        assert_eq!(plan(bounds), Err(ExtractionError::ZeroArea));
        assert_eq!(plan(EyeBounds::SENTINEL), Err(ExtractionError::ZeroArea));
    }

    #[test]
    fn test_negative_origin_fails() {
        let bounds = EyeBounds::new(Vec2::new(2.0, 100.0), Vec2::new(20.0, 20.0));
        assert!(matches!(
            plan(bounds),
            Err(ExtractionError::OutOfBounds { x: -3, .. })
        ));
    }

    #[test]
    fn test_aligned_region_past_edge_fails() {
        // 20 px box near the right edge grows to 64 px after alignment
        let bounds = EyeBounds::new(Vec2::new(690.0, 100.0), Vec2::new(10.0, 10.0));
        assert!(matches!(
            plan(bounds),
            Err(ExtractionError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_scratch_capacity() {
        let bounds = EyeBounds::new(Vec2::new(100.0, 100.0), Vec2::new(200.0, 200.0));
        let result = plan_crop(&bounds, PADDING, 64, SOURCE, 4, 1024);
        assert!(matches!(
            result,
            Err(ExtractionError::ScratchTooSmall {
                available: 1024,
                ..
            })
        ));
    }

    #[test]
    fn test_map_eye_center() {
        let viewport = Vec2::new(720.0, 1280.0);
        let center = map_eye_center(Vec2::new(360.0, 640.0), viewport);
        assert_eq!(center, Vec3::new(0.0, 0.0, -2.0));

        let corner = map_eye_center(Vec2::new(720.0, 0.0), viewport);
        assert!((corner.x - 1.0).abs() < 1e-6);
        assert!((corner.y - 1280.0 / 720.0).abs() < 1e-5);
    }

    #[test]
    fn test_flip_gaze() {
        assert_eq!(
            flip_gaze(Vec3::new(0.1, 0.2, -1.0)),
            Vec3::new(0.1, -0.2, -1.0)
        );
    }
}
