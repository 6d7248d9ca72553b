// SPDX-License-Identifier: GPL-3.0-only

//! Multi-pass skin smoothing over the tracked face mesh
//!
//! A validated pass table drives a chain of draws of the face mesh into
//! five smoothing targets. Each pass samples the camera composite, the
//! face mask and targets 1 to 4; the slot of the pass's own target is
//! bound to a 1x1 dummy because a texture cannot be sampled while it is
//! attached. The finished face layer is left in target 0.

use super::gpu_processor::{
    CachedDimensions, create_image_texture, create_linear_sampler, create_render_texture,
    sampler_entry, texture_entry, uniform_entry,
};
use crate::config::RendererConfig;
use crate::constants::{aligned_uniform_size, face, smoothing};
use crate::gpu::wgpu;
use crate::pipeline::uniforms::SmoothingPassParams;
use crate::pipeline::{PlannedPass, SmoothingPassTable, plan_passes};
use crate::tracking::{CameraPose, FaceGeometry};
use glam::Mat4;
use image::RgbaImage;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Format of every smoothing target
pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Blend used when a pass draws into its target
///
/// Target 0 is cleared to transparent before the last pass, so the result
/// it holds is premultiplied by the mask.
pub(crate) const TARGET_BLEND: wgpu::BlendState = wgpu::BlendState::ALPHA_BLENDING;

/// Edge length of the generated face mask
const MASK_SIZE: u32 = 256;

/// Radial mask in face texture space: opaque in the middle, fading to
/// transparent towards the mesh border
pub fn procedural_face_mask(size: u32) -> RgbaImage {
    let size = size.max(1);
    RgbaImage::from_fn(size, size, |x, y| {
        let u = (x as f32 + 0.5) / size as f32 - 0.5;
        let v = (y as f32 + 0.5) / size as f32 - 0.5;
        let radius = (u * u + v * v).sqrt();
        // Full strength inside 0.3, gone at 0.5
        let weight = ((0.5 - radius) / 0.2).clamp(0.0, 1.0);
        let value = (weight * 255.0).round() as u8;
        image::Rgba([value, value, value, 255])
    })
}

fn load_face_mask(config: &RendererConfig) -> RgbaImage {
    if let Some(path) = &config.face_mask_path {
        match image::open(path) {
            Ok(mask) => {
                info!(path = %path.display(), "Loaded face mask");
                return mask.to_rgba8();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load face mask, using generated mask");
            }
        }
    }
    procedural_face_mask(MASK_SIZE)
}

struct SmoothingTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct MeshBuffers {
    positions: wgpu::Buffer,
    uvs: wgpu::Buffer,
    indices: wgpu::Buffer,
}

pub struct SkinSmoother {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    params_buffer: wgpu::Buffer,
    params_stride: u64,
    mesh: MeshBuffers,
    _mask_texture: wgpu::Texture,
    mask_view: wgpu::TextureView,
    dummy_view: wgpu::TextureView,
    table: SmoothingPassTable,
    sizes: [f32; smoothing::TARGET_COUNT],
    smoothing_factor: f32,
    targets: Vec<SmoothingTarget>,
    /// One bind group per target, with that target's own slot masked
    bind_groups: Vec<wgpu::BindGroup>,
    planned: Vec<PlannedPass>,
    dims: CachedDimensions,
}

impl SkinSmoother {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        config: &RendererConfig,
    ) -> Result<Self, String> {
        let table = config.pass_table().map_err(|e| e.to_string())?;
        info!(
            passes = table.len(),
            factor = config.smoothing_factor,
            "Initializing skin smoothing"
        );

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("skin_smoothing_shader"),
            source: wgpu::ShaderSource::Wgsl(super::SKIN_SMOOTHING_SHADER.into()),
        });

        // Bindings: params, sampler, camera, mask, targets 1..=4
        let mut entries = vec![uniform_entry(0, true), sampler_entry(1)];
        entries.extend((0..smoothing::SOURCE_TEXTURE_COUNT as u32).map(|slot| texture_entry(slot + 2)));
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("skin_smoothing_bind_group_layout"),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("skin_smoothing_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("skin_smoothing_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[
                    wgpu::VertexBufferLayout {
                        array_stride: 12,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![0 => Float32x3],
                    },
                    wgpu::VertexBufferLayout {
                        array_stride: 8,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![1 => Float32x2],
                    },
                ],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: Some(TARGET_BLEND),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
            cache: None,
        });

        let params_stride = aligned_uniform_size(std::mem::size_of::<SmoothingPassParams>() as u64);
        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("skin_smoothing_params"),
            size: params_stride * table.len() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mesh = MeshBuffers {
            positions: mesh_buffer(&device, "face_positions", face::VERTEX_COUNT * 12, wgpu::BufferUsages::VERTEX),
            uvs: mesh_buffer(&device, "face_uvs", face::VERTEX_COUNT * 8, wgpu::BufferUsages::VERTEX),
            indices: mesh_buffer(&device, "face_indices", face::INDEX_COUNT * 2, wgpu::BufferUsages::INDEX),
        };

        let mask = load_face_mask(config);
        let mask_texture = create_image_texture(&device, &queue, "face_mask", &mask);
        let mask_view = mask_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let dummy = create_render_texture(&device, "smoothing_dummy", 1, 1, TARGET_FORMAT);
        let dummy_view = dummy.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = create_linear_sampler(&device, "skin_smoothing_sampler");

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            sampler,
            params_buffer,
            params_stride,
            mesh,
            _mask_texture: mask_texture,
            mask_view,
            dummy_view,
            table,
            sizes: config.smoothing_pass_sizes,
            smoothing_factor: config.smoothing_factor,
            targets: Vec::new(),
            bind_groups: Vec::new(),
            planned: Vec::new(),
            dims: CachedDimensions::default(),
        })
    }

    /// Allocate targets for `viewport` and bind them with `camera`
    ///
    /// `camera` is the viewport-sized camera composite; it is only replaced
    /// together with the viewport, so bind groups are rebuilt on resize.
    pub fn ensure_resources(&mut self, viewport: (u32, u32), camera: &wgpu::TextureView) {
        if !self.targets.is_empty() && !self.dims.needs_update(viewport.0, viewport.1) {
            return;
        }
        self.planned = plan_passes(&self.table, &self.sizes, viewport);
        self.targets = self
            .sizes
            .iter()
            .enumerate()
            .map(|(index, &scale)| {
                let (width, height) = crate::pipeline::target_size(viewport, scale);
                let texture = create_render_texture(
                    &self.device,
                    &format!("smoothing_target_{}", index),
                    width,
                    height,
                    TARGET_FORMAT,
                );
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                SmoothingTarget { texture, view }
            })
            .collect();
        self.bind_groups = (0..smoothing::TARGET_COUNT)
            .map(|target| self.create_bind_group(target, camera))
            .collect();
        self.dims.update(viewport.0, viewport.1);
        debug!(
            width = viewport.0,
            height = viewport.1,
            passes = self.planned.len(),
            "Smoothing targets allocated"
        );
    }

    fn create_bind_group(&self, target: usize, camera: &wgpu::TextureView) -> wgpu::BindGroup {
        let masked = crate::pipeline::source_slot_for_target(target);
        let mut sources: Vec<&wgpu::TextureView> = vec![camera, &self.mask_view];
        sources.extend(self.targets[1..].iter().map(|t| &t.view));
        let sources: Vec<&wgpu::TextureView> = sources
            .into_iter()
            .enumerate()
            .map(|(slot, view)| if Some(slot) == masked { &self.dummy_view } else { view })
            .collect();

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &self.params_buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<SmoothingPassParams>() as u64),
                }),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            },
        ];
        entries.extend(sources.into_iter().enumerate().map(|(slot, view)| wgpu::BindGroupEntry {
            binding: slot as u32 + 2,
            resource: wgpu::BindingResource::TextureView(view),
        }));

        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("skin_smoothing_bind_group"),
            layout: &self.bind_group_layout,
            entries: &entries,
        })
    }

    /// Re-upload this frame's face mesh
    ///
    /// Returns false when the geometry does not have the tracker's topology.
    pub fn upload_mesh(&self, geometry: &FaceGeometry) -> bool {
        if !geometry.has_tracker_topology() {
            debug!(
                vertices = geometry.vertices.len(),
                indices = geometry.triangle_indices.len(),
                "Face geometry has unexpected topology, skipping smoothing"
            );
            return false;
        }
        let positions: Vec<[f32; 3]> = geometry.vertices.iter().map(|v| v.to_array()).collect();
        let uvs: Vec<[f32; 2]> = geometry.texture_coordinates.iter().map(|t| t.to_array()).collect();
        self.queue
            .write_buffer(&self.mesh.positions, 0, bytemuck::cast_slice(&positions));
        self.queue
            .write_buffer(&self.mesh.uvs, 0, bytemuck::cast_slice(&uvs));
        self.queue.write_buffer(
            &self.mesh.indices,
            0,
            bytemuck::cast_slice(&geometry.triangle_indices),
        );
        true
    }

    /// Record every pass of the chain
    ///
    /// `model` places the face mesh in world space. The mesh must have been
    /// uploaded for this frame.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, camera: &CameraPose, model: Mat4) {
        if self.targets.is_empty() {
            warn!("Skin smoothing encoded before targets were allocated");
            return;
        }

        for pass in &self.planned {
            let params = SmoothingPassParams::new(
                pass.pass_index,
                self.smoothing_factor,
                pass.size,
                camera.projection,
                camera.view,
                model,
            );
            self.queue.write_buffer(
                &self.params_buffer,
                pass.pass_index as u64 * self.params_stride,
                bytemuck::bytes_of(&params),
            );
        }

        for pass in &self.planned {
            let load = if pass.clear {
                wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT)
            } else {
                wgpu::LoadOp::Load
            };
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("skin_smoothing_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.targets[pass.target].view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            let offset = (pass.pass_index as u64 * self.params_stride) as u32;
            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &self.bind_groups[pass.target], &[offset]);
            render_pass.set_vertex_buffer(0, self.mesh.positions.slice(..));
            render_pass.set_vertex_buffer(1, self.mesh.uvs.slice(..));
            render_pass.set_index_buffer(self.mesh.indices.slice(..), wgpu::IndexFormat::Uint16);
            render_pass.draw_indexed(0..face::INDEX_COUNT as u32, 0, 0..1);
        }
    }

    /// Finished face layer (target 0)
    pub fn result_view(&self) -> Option<&wgpu::TextureView> {
        self.targets.first().map(|target| &target.view)
    }

    /// Size of a smoothing target, once allocated
    pub fn target_size(&self, index: usize) -> Option<(u32, u32)> {
        self.targets
            .get(index)
            .map(|target| (target.texture.width(), target.texture.height()))
    }

    pub fn pass_count(&self) -> usize {
        self.table.len()
    }
}

fn mesh_buffer(device: &wgpu::Device, label: &str, size: usize, usage: wgpu::BufferUsages) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size as u64,
        usage: usage | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::synthetic::SyntheticFaceSource;

    #[test]
    fn test_procedural_mask_fades_out() {
        let mask = procedural_face_mask(64);
        assert_eq!(mask.get_pixel(32, 32).0[0], 255);
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
        // Opaque alpha everywhere; strength lives in the red channel
        assert!(mask.pixels().all(|p| p.0[3] == 255));
    }

    #[tokio::test]
    async fn test_smoothing_allocates_scaled_targets() {
        let (device, queue, _) = match crate::gpu::create_render_device("skin_smoothing_test").await {
            Ok(created) => created,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };
        let config = RendererConfig::default();
        let mut smoother = SkinSmoother::new(Arc::clone(&device), Arc::clone(&queue), &config).unwrap();
        let camera = create_render_texture(&device, "camera", 360, 640, TARGET_FORMAT);
        let camera_view = camera.create_view(&wgpu::TextureViewDescriptor::default());
        smoother.ensure_resources((360, 640), &camera_view);

        assert_eq!(smoother.target_size(0), Some((360, 640)));
        assert_eq!(smoother.target_size(1), Some((90, 160)));
        assert_eq!(smoother.target_size(4), Some((72, 128)));
        assert_eq!(smoother.pass_count(), 7);

        let mut source = SyntheticFaceSource::new(360, 640);
        let frame = source.next_frame();
        let anchor = frame.face_anchor().unwrap();
        assert!(smoother.upload_mesh(&anchor.geometry));

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("skin_smoothing_test"),
        });
        smoother.encode(&mut encoder, &frame.camera, anchor.transform);
        queue.submit(Some(encoder.finish()));
        let _ = device.poll(wgpu::PollType::wait_indefinitely());
    }
}
