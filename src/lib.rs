// SPDX-License-Identifier: MPL-2.0

//! facefilter - a real-time AR face-filter renderer
//!
//! This library turns face-tracking frames into composited camera frames:
//! the camera image, a smoothed skin layer, a textured face mask with
//! gaze-tracked irises or an overlay image, and a final color grade.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`renderer`]: Per-frame orchestration and render destinations
//! - [`pipeline`]: In-flight limiting, uniform ring and stage planning
//! - [`shaders`]: GPU render stages and their WGSL sources
//! - [`eyes`]: Eye boxes, crop extraction and landmark detection
//! - [`filters`]: Kalman gaze smoothing
//! - [`content`]: Content bundles, scene arena and the swap state machine
//! - [`output`]: Pooled output buffers and the consumer interface
//! - [`tracking`]: Tracking input types and a synthetic source
//! - [`config`]: User configuration handling
//!
//! # Example
//!
//! ```ignore
//! let (device, queue, _) = facefilter::gpu::create_render_device("app").await?;
//! let destination = OffscreenDestination::new(device.clone(), queue.clone(), 720, 1280, format);
//! let mut renderer = Renderer::new(device, queue, Box::new(destination), RendererConfig::default())?;
//! renderer.on_tracking_frame(&frame);
//! ```

pub mod config;
pub mod constants;
pub mod content;
pub mod errors;
pub mod eyes;
pub mod filters;
pub mod gpu;
pub mod output;
pub mod pipeline;
pub mod renderer;
pub mod shaders;
pub mod tracking;

// Re-export commonly used types
pub use config::RendererConfig;
pub use content::{ContentBundle, ContentSlot};
pub use errors::{AppError, AppResult};
pub use renderer::{OffscreenDestination, RenderDestination, Renderer};
pub use tracking::TrackingFrame;
