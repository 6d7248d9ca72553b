// SPDX-License-Identifier: GPL-3.0-only

//! Captured-image upload and the camera pass
//!
//! The tracker delivers bi-planar YCbCr frames: a full-size luma plane and
//! a half-size interleaved chroma plane. Both are copied into sampled
//! textures every frame and converted to RGB while the image plane is
//! drawn into the camera composite.

use super::gpu_processor::{CachedDimensions, create_linear_sampler, sampler_entry, texture_entry};
use crate::gpu::wgpu;
use crate::tracking::{CapturedImage, ImagePlane};
use glam::{Affine2, Vec2};
use std::sync::Arc;
use tracing::{debug, info};

/// Floats per image-plane vertex: position xy, uv
const FLOATS_PER_VERTEX: usize = 4;
const VERTEX_COUNT: usize = 4;

/// Image-plane triangle strip with texture coordinates mapped through
/// the display transform
///
/// Corners run bottom-left, bottom-right, top-left, top-right in clip
/// space; their viewport uv has its origin at the top-left.
pub fn image_plane_vertices(display_transform: Affine2) -> [f32; FLOATS_PER_VERTEX * VERTEX_COUNT] {
    const CORNERS: [([f32; 2], [f32; 2]); VERTEX_COUNT] = [
        ([-1.0, -1.0], [0.0, 1.0]),
        ([1.0, -1.0], [1.0, 1.0]),
        ([-1.0, 1.0], [0.0, 0.0]),
        ([1.0, 1.0], [1.0, 0.0]),
    ];
    let mut vertices = [0.0; FLOATS_PER_VERTEX * VERTEX_COUNT];
    for (chunk, (position, uv)) in vertices.chunks_exact_mut(FLOATS_PER_VERTEX).zip(CORNERS) {
        let uv = display_transform.transform_point2(Vec2::from_array(uv));
        chunk.copy_from_slice(&[position[0], position[1], uv.x, uv.y]);
    }
    vertices
}

/// Whether a frame carries both planes with all of their bytes
pub fn has_uploadable_planes(image: &CapturedImage) -> bool {
    image.plane_count() >= 2 && image.planes[..2].iter().all(ImagePlane::is_complete)
}

struct PlaneTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    dims: CachedDimensions,
}

impl PlaneTexture {
    fn new(device: &wgpu::Device, label: &str, format: wgpu::TextureFormat, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            dims: CachedDimensions::new(width, height),
        }
    }

    fn write(&self, queue: &wgpu::Queue, plane: &ImagePlane) {
        queue.write_texture(
            self.texture.as_image_copy(),
            &plane.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(plane.bytes_per_row),
                rows_per_image: Some(plane.height),
            },
            wgpu::Extent3d {
                width: plane.width,
                height: plane.height,
                depth_or_array_layers: 1,
            },
        );
    }
}

/// Uploads camera planes and draws them as the first layer of a frame
pub struct CapturedImageUploader {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    vertex_buffer: wgpu::Buffer,
    luma: Option<PlaneTexture>,
    chroma: Option<PlaneTexture>,
    bind_group: Option<wgpu::BindGroup>,
    display_transform: Option<Affine2>,
}

impl CapturedImageUploader {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        target_format: wgpu::TextureFormat,
    ) -> Self {
        info!(?target_format, "Initializing camera image pass");

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("captured_image_shader"),
            source: wgpu::ShaderSource::Wgsl(super::CAPTURED_IMAGE_SHADER.into()),
        });

        // Bindings: luma, chroma, sampler
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("captured_image_bind_group_layout"),
            entries: &[texture_entry(0), texture_entry(1), sampler_entry(2)],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("captured_image_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("captured_image_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: (FLOATS_PER_VERTEX * std::mem::size_of::<f32>()) as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2],
                }],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
            cache: None,
        });

        let vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("captured_image_vertices"),
            size: (FLOATS_PER_VERTEX * VERTEX_COUNT * std::mem::size_of::<f32>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = create_linear_sampler(&device, "captured_image_sampler");

        let mut uploader = Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            sampler,
            vertex_buffer,
            luma: None,
            chroma: None,
            bind_group: None,
            display_transform: None,
        };
        uploader.set_display_transform(Affine2::IDENTITY);
        uploader
    }

    /// Recompute image-plane texture coordinates if the transform changed
    pub fn set_display_transform(&mut self, transform: Affine2) {
        if self.display_transform == Some(transform) {
            return;
        }
        let vertices = image_plane_vertices(transform);
        self.queue
            .write_buffer(&self.vertex_buffer, 0, bytemuck::cast_slice(&vertices));
        self.display_transform = Some(transform);
        debug!(?transform, "Image plane texture coordinates updated");
    }

    /// Copy the luma and chroma planes of `image` to the GPU
    ///
    /// Returns `Ok(false)` without touching the textures when the frame is
    /// missing a plane; the previous frame's textures stay bound.
    pub fn upload(&mut self, image: &CapturedImage) -> Result<bool, String> {
        if !has_uploadable_planes(image) {
            debug!(
                planes = image.plane_count(),
                "Captured image incomplete, keeping previous textures"
            );
            return Ok(false);
        }
        let (luma, chroma) = (&image.planes[0], &image.planes[1]);
        if luma.width == 0 || luma.height == 0 || chroma.width == 0 || chroma.height == 0 {
            return Err(format!(
                "Captured image has an empty plane: luma {}x{}, chroma {}x{}",
                luma.width, luma.height, chroma.width, chroma.height
            ));
        }

        let mut rebind = false;
        if self
            .luma
            .as_ref()
            .is_none_or(|plane| plane.dims.needs_update(luma.width, luma.height))
        {
            debug!(width = luma.width, height = luma.height, "Allocating luma texture");
            self.luma = Some(PlaneTexture::new(
                &self.device,
                "captured_image_luma",
                wgpu::TextureFormat::R8Unorm,
                luma.width,
                luma.height,
            ));
            rebind = true;
        }
        if self
            .chroma
            .as_ref()
            .is_none_or(|plane| plane.dims.needs_update(chroma.width, chroma.height))
        {
            debug!(width = chroma.width, height = chroma.height, "Allocating chroma texture");
            self.chroma = Some(PlaneTexture::new(
                &self.device,
                "captured_image_chroma",
                wgpu::TextureFormat::Rg8Unorm,
                chroma.width,
                chroma.height,
            ));
            rebind = true;
        }

        let (Some(luma_texture), Some(chroma_texture)) = (&self.luma, &self.chroma) else {
            return Err("Plane textures missing after allocation".into());
        };
        luma_texture.write(&self.queue, luma);
        chroma_texture.write(&self.queue, chroma);

        if rebind || self.bind_group.is_none() {
            self.bind_group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("captured_image_bind_group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&luma_texture.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&chroma_texture.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            }));
        }
        Ok(true)
    }

    /// Whether any frame has been uploaded yet
    pub fn has_image(&self) -> bool {
        self.bind_group.is_some()
    }

    /// Camera pass: clear `target` and draw the image plane into it
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("camera_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        if let Some(bind_group) = &self.bind_group {
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            pass.draw(0..VERTEX_COUNT as u32, 0..1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uv(vertices: &[f32; 16], corner: usize) -> (f32, f32) {
        (vertices[corner * 4 + 2], vertices[corner * 4 + 3])
    }

    #[test]
    fn test_identity_transform_maps_corners() {
        let vertices = image_plane_vertices(Affine2::IDENTITY);
        // Bottom-left of clip space samples the bottom-left of the image
        assert_eq!(&vertices[0..4], &[-1.0, -1.0, 0.0, 1.0]);
        assert_eq!(uv(&vertices, 3), (1.0, 0.0));
    }

    #[test]
    fn test_display_transform_rotates_uvs() {
        // Portrait viewport over a landscape sensor: quarter turn
        let transform = Affine2::from_cols_array(&[0.0, 1.0, -1.0, 0.0, 1.0, 0.0]);
        let vertices = image_plane_vertices(transform);
        assert_eq!(uv(&vertices, 2), (1.0, 0.0));
        assert_eq!(uv(&vertices, 1), (0.0, 1.0));
        // Positions never move
        assert_eq!(vertices[4], 1.0);
        assert_eq!(vertices[5], -1.0);
    }

    #[test]
    fn test_single_plane_is_not_uploadable() {
        // Scenario: one-plane camera buffer
        let image = CapturedImage {
            width: 4,
            height: 4,
            planes: vec![ImagePlane::packed(4, 4, 1, vec![0; 16])],
        };
        assert!(!has_uploadable_planes(&image));

        let complete = CapturedImage {
            width: 4,
            height: 4,
            planes: vec![
                ImagePlane::packed(4, 4, 1, vec![0; 16]),
                ImagePlane::packed(2, 2, 2, vec![128; 8]),
            ],
        };
        assert!(has_uploadable_planes(&complete));
    }

    #[test]
    fn test_truncated_plane_is_not_uploadable() {
        let image = CapturedImage {
            width: 4,
            height: 4,
            planes: vec![
                ImagePlane::packed(4, 4, 1, vec![0; 16]),
                ImagePlane::packed(2, 2, 2, vec![128; 3]),
            ],
        };
        assert!(!has_uploadable_planes(&image));
    }

    #[tokio::test]
    async fn test_single_plane_keeps_previous_textures() {
        let (device, queue, _) = match crate::gpu::create_render_device("captured_image_test").await {
            Ok(created) => created,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };
        let mut uploader =
            CapturedImageUploader::new(device, queue, wgpu::TextureFormat::Rgba8Unorm);

        let complete = CapturedImage {
            width: 4,
            height: 4,
            planes: vec![
                ImagePlane::packed(4, 4, 1, vec![200; 16]),
                ImagePlane::packed(2, 2, 2, vec![128; 8]),
            ],
        };
        assert_eq!(uploader.upload(&complete), Ok(true));
        assert!(uploader.has_image());

        let single = CapturedImage {
            width: 4,
            height: 4,
            planes: vec![ImagePlane::packed(4, 4, 1, vec![0; 16])],
        };
        assert_eq!(uploader.upload(&single), Ok(false));
        assert!(uploader.has_image());
    }
}
