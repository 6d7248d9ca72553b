// SPDX-License-Identifier: GPL-3.0-only

//! Color grading of the composited frame
//!
//! The frame is copied into a scratch texture and drawn back over itself
//! through a 3-D lookup table, then saturation and contrast. Without a
//! table a 2³ identity volume stays bound and the LUT step is disabled.

use super::gpu_processor::{
    CachedDimensions, create_linear_sampler, create_render_texture, sampler_entry, texture_entry,
    uniform_entry,
};
use crate::content::{ColorParameters, LookupTable};
use crate::gpu::wgpu;
use crate::pipeline::uniforms::ColorGradingParams;
use std::sync::Arc;
use tracing::{debug, info};

/// Uniform values for a frame
///
/// The table strength is the configured intensity scaled by the content's.
pub fn grading_params(
    color: &ColorParameters,
    configured_lut_intensity: f32,
    has_table: bool,
) -> ColorGradingParams {
    ColorGradingParams::new(
        color.contrast,
        color.saturation,
        (configured_lut_intensity * color.lut_intensity).clamp(0.0, 1.0),
        has_table,
    )
}

pub struct ColorGrader {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    params_buffer: wgpu::Buffer,
    format: wgpu::TextureFormat,
    lut_view: wgpu::TextureView,
    has_table: bool,
    scratch: Option<(wgpu::Texture, wgpu::TextureView)>,
    dims: CachedDimensions,
    bind_group: Option<wgpu::BindGroup>,
}

impl ColorGrader {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        format: wgpu::TextureFormat,
    ) -> Self {
        info!(?format, "Initializing color grading stage");

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("color_grading_shader"),
            source: wgpu::ShaderSource::Wgsl(super::color_grading_shader().into()),
        });

        // Bindings: frame copy, sampler, LUT volume, params
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("color_grading_bind_group_layout"),
            entries: &[
                texture_entry(0),
                sampler_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D3,
                        multisampled: false,
                    },
                    count: None,
                },
                uniform_entry(3, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("color_grading_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("color_grading_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_fullscreen"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
            cache: None,
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("color_grading_params"),
            size: std::mem::size_of::<ColorGradingParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = create_linear_sampler(&device, "color_grading_sampler");
        let lut_view = upload_lut(&device, &queue, &LookupTable::identity(2));

        Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            sampler,
            params_buffer,
            format,
            lut_view,
            has_table: false,
            scratch: None,
            dims: CachedDimensions::default(),
            bind_group: None,
        }
    }

    /// Bind the world table of the published content, or none
    pub fn set_lookup_table(&mut self, table: Option<&LookupTable>) {
        self.lut_view = upload_lut(
            &self.device,
            &self.queue,
            table.unwrap_or(&LookupTable::identity(2)),
        );
        self.has_table = table.is_some();
        self.bind_group = None;
        debug!(
            dimension = table.map(LookupTable::dimension),
            "Color grading table changed"
        );
    }

    pub fn has_lookup_table(&self) -> bool {
        self.has_table
    }

    /// Write this frame's grading uniforms
    pub fn set_parameters(&self, color: &ColorParameters, configured_lut_intensity: f32) {
        let params = grading_params(color, configured_lut_intensity, self.has_table);
        self.queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));
    }

    fn ensure_resources(&mut self, width: u32, height: u32) {
        if self.scratch.is_some() && !self.dims.needs_update(width, height) {
            return;
        }
        debug!(width, height, "Allocating color grading scratch texture");
        let texture = create_render_texture(&self.device, "color_grading_scratch", width, height, self.format);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.scratch = Some((texture, view));
        self.dims.update(width, height);
        self.bind_group = None;
    }

    /// Grade `frame` in place
    pub fn encode(&mut self, encoder: &mut wgpu::CommandEncoder, frame: &wgpu::Texture, frame_view: &wgpu::TextureView) {
        let (width, height) = (frame.width(), frame.height());
        self.ensure_resources(width, height);
        let Some((scratch, scratch_view)) = &self.scratch else {
            return;
        };

        encoder.copy_texture_to_texture(
            frame.as_image_copy(),
            scratch.as_image_copy(),
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        let bind_group = self.bind_group.get_or_insert_with(|| {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("color_grading_bind_group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(scratch_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(&self.lut_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: self.params_buffer.as_entire_binding(),
                    },
                ],
            })
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("color_grading_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: frame_view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &*bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

fn upload_lut(device: &wgpu::Device, queue: &wgpu::Queue, table: &LookupTable) -> wgpu::TextureView {
    let n = table.dimension();
    let size = wgpu::Extent3d {
        width: n,
        height: n,
        depth_or_array_layers: n,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("color_grading_lut"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D3,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        texture.as_image_copy(),
        table.data(),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(n * 4),
            rows_per_image: Some(n),
        },
        size,
    );
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}
