// SPDX-License-Identifier: GPL-3.0-only

//! Scene compositor: draws the published content over the camera composite
//!
//! Three kinds of draws share one pipeline layout:
//! - the tracked face mesh, lit by the frame constants, depth tested
//! - iris quads placed in camera space
//! - the overlay image as a clip-space quad, always on top
//!
//! Frame constants come from the renderer's uniform ring through a dynamic
//! offset; per-draw constants use their own 256-byte slots.

use super::gpu_processor::{
    CachedDimensions, create_image_texture, create_linear_sampler, sampler_entry, texture_entry,
    uniform_entry,
};
use crate::constants::{UNIFORM_ALIGNMENT, face};
use crate::content::overlay::quad_extent;
use crate::content::{ContentBundle, NodeKind, ScaleMode, SceneDraw};
use crate::gpu::wgpu;
use crate::pipeline::uniforms::{
    DRAW_MODE_LIT, DRAW_MODE_SCREEN, DRAW_MODE_UNLIT, FrameConstants, SceneDrawParams,
};
use crate::tracking::FaceGeometry;
use glam::{Mat4, Vec3};
use image::RgbaImage;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Draws per frame; the rest are dropped with a warning
pub const MAX_SCENE_DRAWS: usize = 8;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const IRIS_TEXTURE_SIZE: u32 = 64;

/// Interleaved vertex of every scene mesh
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SceneVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
}

/// Unit quad in the xy plane facing +z, uv origin top-left
const QUAD_VERTICES: [SceneVertex; 4] = [
    SceneVertex {
        position: [-0.5, -0.5, 0.0],
        uv: [0.0, 1.0],
        normal: [0.0, 0.0, 1.0],
    },
    SceneVertex {
        position: [0.5, -0.5, 0.0],
        uv: [1.0, 1.0],
        normal: [0.0, 0.0, 1.0],
    },
    SceneVertex {
        position: [-0.5, 0.5, 0.0],
        uv: [0.0, 0.0],
        normal: [0.0, 0.0, 1.0],
    },
    SceneVertex {
        position: [0.5, 0.5, 0.0],
        uv: [1.0, 0.0],
        normal: [0.0, 0.0, 1.0],
    },
];
const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 1, 3];

/// Area-weighted vertex normals of an indexed triangle mesh
///
/// Degenerate triangles contribute nothing; unreferenced vertices get a
/// zero normal.
pub fn compute_vertex_normals(vertices: &[Vec3], indices: &[u16]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; vertices.len()];
    for triangle in indices.chunks_exact(3) {
        let [a, b, c] = [triangle[0], triangle[1], triangle[2]].map(usize::from);
        let (Some(&pa), Some(&pb), Some(&pc)) = (vertices.get(a), vertices.get(b), vertices.get(c)) else {
            continue;
        };
        // Cross product length is twice the area
        let weighted = (pb - pa).cross(pc - pa);
        normals[a] += weighted;
        normals[b] += weighted;
        normals[c] += weighted;
    }
    normals.iter().map(|n| n.normalize_or_zero()).collect()
}

/// Face mesh in the interleaved scene layout
pub fn face_vertices(geometry: &FaceGeometry) -> Vec<SceneVertex> {
    let normals = compute_vertex_normals(&geometry.vertices, &geometry.triangle_indices);
    geometry
        .vertices
        .iter()
        .zip(&geometry.texture_coordinates)
        .zip(&normals)
        .map(|((position, uv), normal)| SceneVertex {
            position: position.to_array(),
            uv: uv.to_array(),
            normal: normal.to_array(),
        })
        .collect()
}

/// Default iris: dark ring, colored iris, black pupil, clear outside
pub fn procedural_iris_texture(size: u32) -> RgbaImage {
    let size = size.max(1);
    RgbaImage::from_fn(size, size, |x, y| {
        let u = (x as f32 + 0.5) / size as f32 * 2.0 - 1.0;
        let v = (y as f32 + 0.5) / size as f32 * 2.0 - 1.0;
        let radius = (u * u + v * v).sqrt();
        match radius {
            r if r < 0.35 => image::Rgba([8, 8, 10, 255]),
            r if r < 0.85 => image::Rgba([74, 110, 140, 255]),
            r if r < 1.0 => image::Rgba([30, 40, 50, 255]),
            _ => image::Rgba([0, 0, 0, 0]),
        }
    })
}

struct MaterialTexture {
    _texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
}

struct OverlayMaterial {
    material: MaterialTexture,
    image_size: (u32, u32),
    scale_mode: ScaleMode,
}

pub struct SceneCompositor {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    depth_pipeline: wgpu::RenderPipeline,
    overlay_pipeline: wgpu::RenderPipeline,
    texture_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    frame_bind_group: wgpu::BindGroup,
    draw_bind_group: wgpu::BindGroup,
    draw_buffer: wgpu::Buffer,
    face_vertex_buffer: wgpu::Buffer,
    face_index_buffer: wgpu::Buffer,
    quad_vertex_buffer: wgpu::Buffer,
    quad_index_buffer: wgpu::Buffer,
    face_mesh_ready: bool,
    face: Option<MaterialTexture>,
    iris: MaterialTexture,
    overlay: Option<OverlayMaterial>,
    depth: Option<(wgpu::Texture, wgpu::TextureView)>,
    dims: CachedDimensions,
}

impl SceneCompositor {
    /// `frame_constants` is the uniform ring the renderer writes each frame
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        target_format: wgpu::TextureFormat,
        frame_constants: &wgpu::Buffer,
    ) -> Self {
        info!(?target_format, "Initializing scene compositor");

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("scene_shader"),
            source: wgpu::ShaderSource::Wgsl(super::SCENE_SHADER.into()),
        });

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scene_frame_layout"),
            entries: &[uniform_entry(0, true)],
        });
        let draw_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scene_draw_layout"),
            entries: &[uniform_entry(0, true)],
        });
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scene_texture_layout"),
            entries: &[texture_entry(0), sampler_entry(1)],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("scene_pipeline_layout"),
            bind_group_layouts: &[&frame_layout, &draw_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let create_pipeline = |label: &str, depth_compare: wgpu::CompareFunction, depth_write_enabled: bool| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<SceneVertex>() as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![
                            0 => Float32x3,
                            1 => Float32x2,
                            2 => Float32x3
                        ],
                    }],
                    compilation_options: Default::default(),
                },
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled,
                    depth_compare,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: target_format,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                multiview: None,
                cache: None,
            })
        };
        let depth_pipeline = create_pipeline("scene_mesh_pipeline", wgpu::CompareFunction::LessEqual, true);
        let overlay_pipeline = create_pipeline("scene_overlay_pipeline", wgpu::CompareFunction::Always, false);

        let draw_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("scene_draw_params"),
            size: UNIFORM_ALIGNMENT * MAX_SCENE_DRAWS as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("scene_frame_bind_group"),
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: frame_constants,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<FrameConstants>() as u64),
                }),
            }],
        });
        let draw_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("scene_draw_bind_group"),
            layout: &draw_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &draw_buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<SceneDrawParams>() as u64),
                }),
            }],
        });

        let vertex_buffer = |label: &str, size: u64, usage: wgpu::BufferUsages| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: usage | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let face_vertex_buffer = vertex_buffer(
            "scene_face_vertices",
            (face::VERTEX_COUNT * std::mem::size_of::<SceneVertex>()) as u64,
            wgpu::BufferUsages::VERTEX,
        );
        let face_index_buffer = vertex_buffer(
            "scene_face_indices",
            (face::INDEX_COUNT * 2) as u64,
            wgpu::BufferUsages::INDEX,
        );
        let quad_vertex_buffer = vertex_buffer(
            "scene_quad_vertices",
            std::mem::size_of_val(&QUAD_VERTICES) as u64,
            wgpu::BufferUsages::VERTEX,
        );
        // Index data is padded to the 4-byte copy alignment
        let quad_index_buffer = vertex_buffer("scene_quad_indices", 16, wgpu::BufferUsages::INDEX);
        queue.write_buffer(&quad_vertex_buffer, 0, bytemuck::cast_slice(&QUAD_VERTICES));
        let mut quad_indices = [0u16; 8];
        quad_indices[..QUAD_INDICES.len()].copy_from_slice(&QUAD_INDICES);
        queue.write_buffer(&quad_index_buffer, 0, bytemuck::cast_slice(&quad_indices));

        let sampler = create_linear_sampler(&device, "scene_sampler");

        let iris = material(
            &device,
            &queue,
            &texture_layout,
            &sampler,
            "iris_texture",
            &procedural_iris_texture(IRIS_TEXTURE_SIZE),
        );

        Self {
            device,
            queue,
            depth_pipeline,
            overlay_pipeline,
            texture_layout,
            sampler,
            frame_bind_group,
            draw_bind_group,
            draw_buffer,
            face_vertex_buffer,
            face_index_buffer,
            quad_vertex_buffer,
            quad_index_buffer,
            face_mesh_ready: false,
            face: None,
            iris,
            overlay: None,
            depth: None,
            dims: CachedDimensions::default(),
        }
    }

    /// Upload textures of newly published content
    ///
    /// Called once per swap; replaces every material of the previous bundle.
    pub fn load_content(&mut self, content: Option<&ContentBundle>) {
        let materials = content.map(ContentBundle::load_special_materials).unwrap_or_default();
        self.face = materials.face_texture.as_ref().map(|image| {
            material(&self.device, &self.queue, &self.texture_layout, &self.sampler, "face_texture", image)
        });
        let iris_image = materials
            .iris_texture
            .unwrap_or_else(|| procedural_iris_texture(IRIS_TEXTURE_SIZE));
        self.iris = material(
            &self.device,
            &self.queue,
            &self.texture_layout,
            &self.sampler,
            "iris_texture",
            &iris_image,
        );
        self.overlay = content.and_then(ContentBundle::overlay_scene).map(|scene| OverlayMaterial {
            material: material(
                &self.device,
                &self.queue,
                &self.texture_layout,
                &self.sampler,
                "overlay_texture",
                &scene.image,
            ),
            image_size: scene.image.dimensions(),
            scale_mode: scene.scale_mode,
        });
        debug!(
            face = self.face.is_some(),
            overlay = self.overlay.is_some(),
            "Scene materials loaded"
        );
    }

    /// Re-upload the face mesh for this frame
    pub fn upload_face_mesh(&mut self, geometry: &FaceGeometry) {
        if !geometry.has_tracker_topology() {
            self.face_mesh_ready = false;
            return;
        }
        let vertices = face_vertices(geometry);
        self.queue
            .write_buffer(&self.face_vertex_buffer, 0, bytemuck::cast_slice(&vertices));
        self.queue.write_buffer(
            &self.face_index_buffer,
            0,
            bytemuck::cast_slice(&geometry.triangle_indices),
        );
        self.face_mesh_ready = true;
    }

    /// Drop the face mesh until the next tracked frame
    pub fn clear_face_mesh(&mut self) {
        self.face_mesh_ready = false;
    }

    fn ensure_depth(&mut self, width: u32, height: u32) {
        if self.depth.is_some() && !self.dims.needs_update(width, height) {
            return;
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("scene_depth"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.depth = Some((texture, view));
        self.dims.update(width, height);
    }

    /// Draw `draws` and the overlay over `target` without clearing it
    ///
    /// `frame_offset` is the ring slot holding this frame's constants.
    pub fn encode(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        viewport: (u32, u32),
        frame_offset: u32,
        draws: &[SceneDraw],
    ) {
        self.ensure_depth(viewport.0, viewport.1);

        let mut planned: Vec<(DrawSource, SceneDrawParams)> = Vec::with_capacity(draws.len() + 1);
        // Opaque geometry first, then the quads that blend over it
        for draw in draws.iter().filter(|d| d.kind == NodeKind::FaceMesh) {
            if self.face.is_some() && self.face_mesh_ready {
                planned.push((
                    DrawSource::Face,
                    SceneDrawParams::new(draw.model_view, draw.opacity, DRAW_MODE_LIT),
                ));
            }
        }
        for draw in draws.iter().filter(|d| matches!(d.kind, NodeKind::Iris(_))) {
            planned.push((
                DrawSource::Iris,
                SceneDrawParams::new(draw.model_view, draw.opacity, DRAW_MODE_UNLIT),
            ));
        }
        if let Some(overlay) = &self.overlay {
            let extent = quad_extent(overlay.image_size, viewport, overlay.scale_mode);
            // The unit quad spans 1, NDC spans 2
            let model = Mat4::from_scale((extent * 2.0).extend(1.0));
            planned.push((DrawSource::Overlay, SceneDrawParams::new(model, 1.0, DRAW_MODE_SCREEN)));
        }
        if planned.len() > MAX_SCENE_DRAWS {
            warn!(
                draws = planned.len(),
                max = MAX_SCENE_DRAWS,
                "Too many scene draws, dropping the rest"
            );
            planned.truncate(MAX_SCENE_DRAWS);
        }

        for (slot, (_, params)) in planned.iter().enumerate() {
            self.queue.write_buffer(
                &self.draw_buffer,
                slot as u64 * UNIFORM_ALIGNMENT,
                bytemuck::bytes_of(params),
            );
        }

        let Some((_, depth_view)) = &self.depth else {
            return;
        };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("scene_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Discard,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_bind_group(0, &self.frame_bind_group, &[frame_offset]);

        for (slot, (source, _)) in planned.iter().enumerate() {
            let draw_offset = (slot as u64 * UNIFORM_ALIGNMENT) as u32;
            pass.set_bind_group(1, &self.draw_bind_group, &[draw_offset]);
            match source {
                DrawSource::Face => {
                    let Some(face) = &self.face else { continue };
                    pass.set_pipeline(&self.depth_pipeline);
                    pass.set_bind_group(2, &face.bind_group, &[]);
                    pass.set_vertex_buffer(0, self.face_vertex_buffer.slice(..));
                    pass.set_index_buffer(self.face_index_buffer.slice(..), wgpu::IndexFormat::Uint16);
                    pass.draw_indexed(0..face::INDEX_COUNT as u32, 0, 0..1);
                }
                DrawSource::Iris | DrawSource::Overlay => {
                    let bind_group = match (source, &self.overlay) {
                        (DrawSource::Overlay, Some(overlay)) => &overlay.material.bind_group,
                        _ => &self.iris.bind_group,
                    };
                    pass.set_pipeline(&self.overlay_pipeline);
                    pass.set_bind_group(2, bind_group, &[]);
                    pass.set_vertex_buffer(0, self.quad_vertex_buffer.slice(..));
                    pass.set_index_buffer(self.quad_index_buffer.slice(..), wgpu::IndexFormat::Uint16);
                    pass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..1);
                }
            }
        }
    }

    pub fn has_face_texture(&self) -> bool {
        self.face.is_some()
    }

    pub fn has_overlay(&self) -> bool {
        self.overlay.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrawSource {
    Face,
    Iris,
    Overlay,
}

fn material(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
    label: &str,
    image: &RgbaImage,
) -> MaterialTexture {
    let texture = create_image_texture(device, queue, label, image);
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    });
    MaterialTexture {
        _texture: texture,
        bind_group,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout_matches_shader() {
        assert_eq!(std::mem::size_of::<SceneVertex>(), 32);
    }

    #[test]
    fn test_normals_of_flat_quad_face_viewer() {
        let vertices = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
        ];
        let normals = compute_vertex_normals(&vertices, &[0, 1, 2, 2, 1, 3]);
        for normal in normals {
            assert!((normal - Vec3::Z).length() < 1e-6);
        }
    }

    #[test]
    fn test_degenerate_and_unused_vertices_get_zero_normal() {
        let vertices = [Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::new(5.0, 5.0, 5.0)];
        // Second triangle is degenerate
        let normals = compute_vertex_normals(&vertices, &[0, 1, 2, 0, 0, 0]);
        assert_eq!(normals[3], Vec3::ZERO);
        assert!((normals[1] - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn test_out_of_range_indices_are_skipped() {
        let vertices = [Vec3::ZERO, Vec3::X, Vec3::Y];
        let normals = compute_vertex_normals(&vertices, &[0, 1, 9]);
        assert!(normals.iter().all(|n| *n == Vec3::ZERO));
    }

    #[test]
    fn test_face_vertices_cover_synthetic_mesh() {
        let mut source = crate::tracking::synthetic::SyntheticFaceSource::new(360, 640);
        let frame = source.next_frame();
        let geometry = &frame.face_anchor().unwrap().geometry;
        let vertices = face_vertices(geometry);
        assert_eq!(vertices.len(), face::VERTEX_COUNT);
        assert_eq!(vertices[10].position, geometry.vertices[10].to_array());
    }

    #[test]
    fn test_procedural_iris_is_clear_outside() {
        let iris = procedural_iris_texture(32);
        assert_eq!(iris.get_pixel(0, 0).0[3], 0);
        assert_eq!(iris.get_pixel(16, 16).0, [8, 8, 10, 255]);
    }
}
