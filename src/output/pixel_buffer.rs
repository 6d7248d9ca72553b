// SPDX-License-Identifier: GPL-3.0-only

//! Output pixel buffers: a BGRA render target plus its readback staging

use crate::gpu::wgpu;
use crate::shaders::{padded_bytes_per_row, read_buffer_async};
use image::RgbaImage;
use std::sync::Arc;
use tracing::debug;

/// Format of every output buffer
pub const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8Unorm;

pub struct PixelBuffer {
    device: Arc<wgpu::Device>,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    staging: wgpu::Buffer,
    width: u32,
    height: u32,
    bytes_per_row: u32,
}

impl PixelBuffer {
    pub fn new(device: Arc<wgpu::Device>, width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let bytes_per_row = padded_bytes_per_row(width, 4);

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("output_pixel_buffer"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OUTPUT_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("output_pixel_staging"),
            size: bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        debug!(width, height, bytes_per_row, "Allocated output pixel buffer");

        Self {
            device,
            texture,
            view,
            staging,
            width,
            height,
            bytes_per_row,
        }
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Record the copy of the rendered texture into the staging buffer
    pub fn encode_readback(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.copy_texture_to_buffer(
            self.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &self.staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Tightly packed BGRA bytes of the last readback
    pub async fn read_pixels(&self) -> Result<Vec<u8>, String> {
        let padded = read_buffer_async(&self.device, &self.staging).await?;
        Ok(strip_row_padding(
            &padded,
            self.width as usize * 4,
            self.bytes_per_row as usize,
            self.height as usize,
        ))
    }

    /// Last readback as an RGBA image
    pub async fn to_rgba_image(&self) -> Result<RgbaImage, String> {
        let mut pixels = self.read_pixels().await?;
        for texel in pixels.chunks_exact_mut(4) {
            texel.swap(0, 2);
        }
        RgbaImage::from_raw(self.width, self.height, pixels)
            .ok_or_else(|| "Pixel data does not match buffer size".to_string())
    }
}

/// Drop the alignment padding at the end of each row
pub fn strip_row_padding(data: &[u8], row_bytes: usize, padded_row_bytes: usize, rows: usize) -> Vec<u8> {
    let mut packed = Vec::with_capacity(row_bytes * rows);
    for row in data.chunks(padded_row_bytes.max(1)).take(rows) {
        packed.extend_from_slice(&row[..row_bytes.min(row.len())]);
    }
    packed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_row_padding() {
        // Two rows of 3 bytes padded to 4
        let data = [1, 2, 3, 0, 4, 5, 6, 0];
        assert_eq!(strip_row_padding(&data, 3, 4, 2), vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_pixel_buffer_readback() {
        let (device, queue, _) = match crate::gpu::create_render_device("pixel_buffer_test").await {
            Ok(created) => created,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };
        let buffer = PixelBuffer::new(Arc::clone(&device), 10, 3);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("pixel_buffer_test"),
        });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear_red"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: buffer.view(),
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::RED),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        buffer.encode_readback(&mut encoder);
        queue.submit(Some(encoder.finish()));

        let image = buffer.to_rgba_image().await.unwrap();
        assert_eq!(image.dimensions(), (10, 3));
        assert_eq!(image.get_pixel(9, 2).0, [255, 0, 0, 255]);
    }
}
