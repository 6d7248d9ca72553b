// SPDX-License-Identifier: GPL-3.0-only

//! Alpha "over" of one texture onto a render target
//!
//! Used to lay the smoothed face layer over the camera composite. The
//! target is loaded, not cleared, so pixels where the source is
//! transparent keep the camera image. Sources are premultiplied.

use super::gpu_processor::{create_linear_sampler, sampler_entry, texture_entry};
use crate::gpu::wgpu;
use std::sync::Arc;

/// Premultiplied "over": the source color already carries its alpha
pub(crate) const OVER_BLEND: wgpu::BlendState = wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING;

pub struct Compositor {
    device: Arc<wgpu::Device>,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl Compositor {
    pub fn new(device: Arc<wgpu::Device>, target_format: wgpu::TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("composite_shader"),
            source: wgpu::ShaderSource::Wgsl(super::composite_shader().into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("composite_bind_group_layout"),
            entries: &[texture_entry(0), sampler_entry(1)],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("composite_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("composite_pipeline"),
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
                    format: target_format,
                    blend: Some(OVER_BLEND),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
            cache: None,
        });

        let sampler = create_linear_sampler(&device, "composite_sampler");

        Self {
            device,
            pipeline,
            bind_group_layout,
            sampler,
        }
    }

    /// Blend `source` over the current contents of `target`
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::TextureView,
        target: &wgpu::TextureView,
    ) {
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("composite_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(source),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("face_layer_composite"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
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
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::skin_smoothing::TARGET_BLEND;

    fn factor(f: wgpu::BlendFactor, src_alpha: f32) -> f32 {
        match f {
            wgpu::BlendFactor::Zero => 0.0,
            wgpu::BlendFactor::One => 1.0,
            wgpu::BlendFactor::SrcAlpha => src_alpha,
            wgpu::BlendFactor::OneMinusSrcAlpha => 1.0 - src_alpha,
            other => panic!("unexpected blend factor {:?}", other),
        }
    }

    /// One channel plus alpha through a blend state, additive operation only
    fn blend(state: wgpu::BlendState, src: (f32, f32), dst: (f32, f32)) -> (f32, f32) {
        assert_eq!(state.color.operation, wgpu::BlendOperation::Add);
        assert_eq!(state.alpha.operation, wgpu::BlendOperation::Add);
        let color = src.0 * factor(state.color.src_factor, src.1)
            + dst.0 * factor(state.color.dst_factor, src.1);
        let alpha = src.1 * factor(state.alpha.src_factor, src.1)
            + dst.1 * factor(state.alpha.dst_factor, src.1);
        (color, alpha)
    }

    #[test]
    fn test_face_layer_weighs_camera_by_mask() {
        let camera = 0.8;
        for (smoothed, mask) in [(0.8, 0.5), (0.2, 0.25), (1.0, 1.0), (0.6, 0.0)] {
            // Last smoothing pass into the cleared target 0
            let layer = blend(TARGET_BLEND, (smoothed, mask), (0.0, 0.0));
            let (out, _) = blend(OVER_BLEND, layer, (camera, 1.0));
            let expected = smoothed * mask + camera * (1.0 - mask);
            assert!((out - expected).abs() < 1e-6, "mask {}: {} != {}", mask, out, expected);
        }
    }
}
