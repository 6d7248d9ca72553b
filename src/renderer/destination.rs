// SPDX-License-Identifier: GPL-3.0-only

//! Where finished frames are presented

use crate::gpu::wgpu;
use crate::output::pixel_buffer::strip_row_padding;
use crate::shaders::{create_render_texture, padded_bytes_per_row, read_buffer_async};
use image::RgbaImage;
use std::sync::Arc;
use tracing::debug;

/// Supplies the texture each frame is presented into
///
/// A window surface, an offscreen texture or a video encoder input all fit
/// behind this trait. `current_target` is called once per frame; returning
/// `None` skips presentation for that frame.
pub trait RenderDestination: Send {
    fn color_format(&self) -> wgpu::TextureFormat;

    fn current_target(&mut self) -> Option<wgpu::TextureView>;

    /// Called once the frame that drew into the current target is submitted
    fn present(&mut self);
}

/// Renders into an owned texture that can be read back
pub struct OffscreenDestination {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    texture: wgpu::Texture,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    presented: u64,
}

impl OffscreenDestination {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let texture = create_render_texture(&device, "offscreen_destination", width, height, format);
        Self {
            device,
            queue,
            texture,
            format,
            width,
            height,
            presented: 0,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Reallocate the target; the previous contents are lost
    pub fn resize(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        if (width, height) == (self.width, self.height) {
            return;
        }
        debug!(width, height, "Resizing offscreen destination");
        self.texture = create_render_texture(&self.device, "offscreen_destination", width, height, self.format);
        self.width = width;
        self.height = height;
    }

    pub fn frames_presented(&self) -> u64 {
        self.presented
    }

    /// Copy the last presented frame back to the CPU
    pub async fn read_image(&self) -> Result<RgbaImage, String> {
        let bytes_per_row = padded_bytes_per_row(self.width, 4);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("offscreen_readback"),
            size: bytes_per_row as u64 * self.height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("offscreen_readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            self.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let padded = read_buffer_async(&self.device, &staging).await?;
        let mut pixels = strip_row_padding(
            &padded,
            self.width as usize * 4,
            bytes_per_row as usize,
            self.height as usize,
        );
        if matches!(
            self.format,
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb
        ) {
            for texel in pixels.chunks_exact_mut(4) {
                texel.swap(0, 2);
            }
        }
        RgbaImage::from_raw(self.width, self.height, pixels)
            .ok_or_else(|| "Readback does not match destination size".to_string())
    }
}

impl RenderDestination for OffscreenDestination {
    fn color_format(&self) -> wgpu::TextureFormat {
        self.format
    }

    fn current_target(&mut self) -> Option<wgpu::TextureView> {
        Some(self.texture.create_view(&wgpu::TextureViewDescriptor::default()))
    }

    fn present(&mut self) {
        self.presented += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::create_render_device;

    #[tokio::test]
    async fn test_offscreen_resize_and_readback() {
        let (device, queue, _) = match create_render_device("destination_test").await {
            Ok(created) => created,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };
        let mut destination =
            OffscreenDestination::new(device, queue, 8, 4, wgpu::TextureFormat::Rgba8Unorm);
        assert_eq!(destination.size(), (8, 4));
        destination.resize(16, 8);
        assert_eq!(destination.size(), (16, 8));

        assert!(destination.current_target().is_some());
        destination.present();
        assert_eq!(destination.frames_presented(), 1);

        let image = destination.read_image().await.unwrap();
        assert_eq!(image.dimensions(), (16, 8));
    }
}
