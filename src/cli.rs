// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Reporting the GPU the renderer would use
//! - Rendering a synthetic tracking stream headless
//! - Printing the effective configuration

use chrono::Local;
use facefilter::config::RendererConfig;
use facefilter::content::{
    ColorParameters, ContentBundle, FaceMaskContent, LookupTable, LutType, OverlayContent,
    OverlayScene,
};
use facefilter::gpu::{create_render_device, wgpu};
use facefilter::output::{OutputConsumer, PixelBuffer, Pooled};
use facefilter::renderer::{OffscreenDestination, Renderer};
use facefilter::shaders::scene::procedural_iris_texture;
use facefilter::tracking::synthetic::{SyntheticFaceSource, WORLD_ANCHOR_ID};
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Content rendered by `run`
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ContentChoice {
    /// Face mask with irises and gaze tracking
    Mask,
    /// Full-screen overlay image with color grading
    Overlay,
    /// Camera image only
    None,
}

/// Options for the `run` command
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    /// Where PNG frames go; `None` renders without saving
    pub output: Option<PathBuf>,
    pub content: ContentChoice,
    /// World color lookup table strip
    pub lut: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

/// Default folder name for saved frames
const DEFAULT_SAVE_FOLDER: &str = "facefilter";

/// How long to wait for pending PNG writes after the last frame
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Get default frame directory
pub fn default_output_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(DEFAULT_SAVE_FOLDER)
}

fn load_config(path: Option<&Path>) -> Result<RendererConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => RendererConfig::load_from(path)?,
        None => RendererConfig::load()?,
    };
    Ok(config)
}

/// Print the selected GPU adapter
pub fn show_info() -> Result<(), Box<dyn std::error::Error>> {
    let (_device, _queue, info) = pollster::block_on(create_render_device("facefilter_info"))?;
    println!("facefilter {}", env!("GIT_VERSION"));
    println!();
    println!("  Adapter: {}", info.adapter_name);
    println!("  Backend: {:?}", info.backend);
    if !info.driver.is_empty() {
        println!("  Driver:  {}", info.driver);
    }
    Ok(())
}

/// Print the effective configuration as JSON
pub fn print_config(path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(path.as_deref())?;
    if let Some(source) = path.or_else(RendererConfig::default_path) {
        eprintln!("# {}", source.display());
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Writes every delivered frame as a PNG
struct PngWriter {
    handle: tokio::runtime::Handle,
    dir: PathBuf,
    stamp: String,
    written: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

impl OutputConsumer for PngWriter {
    fn callback_handle(&self) -> tokio::runtime::Handle {
        self.handle.clone()
    }

    fn rendered_output(&self, buffer: Pooled<PixelBuffer>, timestamp: Duration) {
        let path = self
            .dir
            .join(format!("frame_{}_{:010}.png", self.stamp, timestamp.as_micros()));
        let written = Arc::clone(&self.written);
        let finished = Arc::clone(&self.finished);
        // Readback polls the device and encoding is CPU bound
        self.handle.spawn_blocking(move || {
            match pollster::block_on(buffer.to_rgba_image()) {
                Ok(image) => match image.save(&path) {
                    Ok(()) => {
                        debug!(path = %path.display(), "Frame saved");
                        written.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => warn!(error = %e, path = %path.display(), "Failed to save frame"),
                },
                Err(e) => warn!(error = %e, "Failed to read back output frame"),
            }
            finished.fetch_add(1, Ordering::SeqCst);
        });
    }
}

/// Warm skin-toned face texture with darker brows and lips
fn demo_face_texture(size: u32) -> RgbaImage {
    RgbaImage::from_fn(size, size, |x, y| {
        let v = y as f32 / size as f32;
        let u = x as f32 / size as f32;
        let brow = (0.28..0.32).contains(&v) && ((0.2..0.42).contains(&u) || (0.58..0.8).contains(&u));
        let lips = (0.74..0.8).contains(&v) && (0.35..0.65).contains(&u);
        if brow {
            Rgba([70, 45, 30, 255])
        } else if lips {
            Rgba([170, 60, 70, 255])
        } else {
            Rgba([230, 180, 150, 160])
        }
    })
}

/// Diagonal color wash with a transparent center
fn demo_overlay_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let u = x as f32 / width.max(1) as f32;
        let v = y as f32 / height.max(1) as f32;
        let edge = (u - 0.5).abs().max((v - 0.5).abs()) * 2.0;
        let alpha = ((edge - 0.6) / 0.4).clamp(0.0, 1.0);
        Rgba([
            (255.0 * u) as u8,
            (255.0 * (1.0 - v)) as u8,
            200,
            (alpha * 220.0) as u8,
        ])
    })
}

fn build_content(
    choice: ContentChoice,
    config: &RendererConfig,
    lut: Option<LookupTable>,
) -> Option<ContentBundle> {
    match choice {
        ContentChoice::Mask => {
            let mut mask = FaceMaskContent::new(config.kalman)
                .with_face_texture(demo_face_texture(256))
                .with_iris_texture(procedural_iris_texture(64))
                .with_fade_duration(config.fade_duration())
                .with_world_anchor(WORLD_ANCHOR_ID);
            if let Some(table) = lut {
                mask = mask.with_lookup_table(LutType::World, table);
            }
            Some(ContentBundle::face_mask(mask))
        }
        ContentChoice::Overlay => {
            let mut overlay = OverlayContent::new(OverlayScene::new(demo_overlay_image(360, 640)))
                .with_color_parameters(ColorParameters {
                    contrast: 0.15,
                    saturation: 1.2,
                    ..ColorParameters::default()
                })
                .with_world_anchor(WORLD_ANCHOR_ID);
            if let Some(table) = lut {
                overlay = overlay.with_lookup_table(LutType::World, table);
            }
            Some(ContentBundle::overlay(overlay))
        }
        ContentChoice::None => {
            if lut.is_some() {
                warn!("Lookup table ignored without content");
            }
            None
        }
    }
}

/// Render a synthetic tracking stream into an offscreen destination
pub fn run_synthetic(options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(options.config_path.as_deref())?;
    config.viewport_width = options.width;
    config.viewport_height = options.height;

    let runtime = tokio::runtime::Runtime::new()?;
    let (device, queue, info) = runtime.block_on(create_render_device("facefilter_run"))?;
    println!("Using GPU: {} ({:?})", info.adapter_name, info.backend);

    let destination = OffscreenDestination::new(
        Arc::clone(&device),
        Arc::clone(&queue),
        options.width,
        options.height,
        wgpu::TextureFormat::Bgra8Unorm,
    );
    let lut = match &options.lut {
        Some(path) => {
            let table = LookupTable::load(path)?;
            debug!(path = %path.display(), dimension = table.dimension(), "Loaded lookup table");
            Some(table)
        }
        None => None,
    };
    let content = build_content(options.content, &config, lut);
    let mut renderer = Renderer::new(device, queue, Box::new(destination), config)?;
    renderer.set_active_content(content)?;

    let written = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    if let Some(dir) = &options.output {
        std::fs::create_dir_all(dir)?;
        println!("Saving frames to {}", dir.display());
        renderer.attach_output_consumer(Arc::new(PngWriter {
            handle: runtime.handle().clone(),
            dir: dir.clone(),
            stamp: Local::now().format("%Y%m%d_%H%M%S").to_string(),
            written: Arc::clone(&written),
            finished: Arc::clone(&finished),
        }));
    }

    // Set up Ctrl+C handler
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    println!("Rendering {} frames at {}x{}... (press Ctrl+C to stop early)", options.frames, options.width, options.height);
    let mut source = SyntheticFaceSource::new(options.width, options.height);
    let start = Instant::now();
    let mut rendered = 0u64;
    let mut delivered = 0usize;
    let mut dropped = 0u64;

    for _ in 0..options.frames {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }
        let report = renderer.on_tracking_frame(&source.next_frame());
        if report.dropped {
            dropped += 1;
            continue;
        }
        rendered += 1;
        if report.plan.copy_output {
            delivered += 1;
        }
        print!("\rFrame {:>5}  eyes {:?}", rendered, renderer.eye_states());
        std::io::Write::flush(&mut std::io::stdout())?;
    }
    println!();

    renderer.wait_idle();
    let elapsed = start.elapsed();

    if options.output.is_some() {
        let deadline = Instant::now() + WRITE_TIMEOUT;
        while finished.load(Ordering::SeqCst) < delivered && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        println!("Frames saved: {}", written.load(Ordering::SeqCst));
    }

    println!(
        "Rendered {} frames in {:.2}s ({:.1} fps), {} dropped",
        rendered,
        elapsed.as_secs_f64(),
        rendered as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        dropped
    );
    Ok(())
}
