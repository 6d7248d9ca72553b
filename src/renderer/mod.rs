// SPDX-License-Identifier: GPL-3.0-only

//! Frame orchestration
//!
//! [`Renderer`] turns one [`TrackingFrame`] into one presented frame. Stages
//! run in a fixed order: camera pass, eye extraction, skin smoothing, face
//! layer composite, camera-texture feedback, scene, color grading, output
//! copy and presentation. Every stage after the camera pass is optional and
//! chosen per frame by [`FramePlan::decide`].
//!
//! At most [`MAX_FRAMES_IN_FLIGHT`] frames have GPU work outstanding. Each
//! frame holds a [`FramePermit`] that is completed from the queue's
//! submitted-work callback.

pub mod anchors;
pub mod destination;

pub use anchors::{AnchorUpdate, AnchorUpdater};
pub use destination::{OffscreenDestination, RenderDestination};

use crate::config::RendererConfig;
use crate::constants::MAX_FRAMES_IN_FLIGHT;
use crate::constants::eyes::{LEFT_BOUNDS_VERTICES, OPEN_REFERENCE_VERTICES, RIGHT_BOUNDS_VERTICES};
use crate::constants::output::POOL_MINIMUM;
use crate::content::{ContentBundle, ContentSlot, LutType};
use crate::errors::{AppResult, ContentError, GpuError};
use crate::eyes::{
    CentroidDetector, EyeBounds, EyeReading, EyeRegionExtractor, EyeStates, LandmarkDetector,
    classify_eyes, project_eye_bounds, resolve_eye_update,
};
use crate::gpu::{watch_device_loss, wgpu};
use crate::output::{BufferPool, OUTPUT_FORMAT, OutputConsumer, PixelBuffer, Pooled, presentation_time};
use crate::pipeline::uniforms::FrameConstants;
use crate::pipeline::{FrameConditions, FramePermit, FramePlan, InFlightLimiter, RingSlot, UniformRing};
use crate::shaders::{
    Blitter, CapturedImageUploader, ColorGrader, Compositor, SceneCompositor, SkinSmoother,
    create_render_texture,
};
use crate::tracking::{FaceAnchor, TrackingFrame};
use glam::Vec2;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Format of the viewport-sized camera composite every stage draws into
pub const COMPOSITE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// What happened to one tracking frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub frame_index: u64,
    /// Nothing was recorded (device lost)
    pub dropped: bool,
    pub image_uploaded: bool,
    pub plan: FramePlan,
    pub presented: bool,
}

struct CameraComposite {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl CameraComposite {
    fn new(device: &wgpu::Device, viewport: (u32, u32)) -> Self {
        let texture = create_render_texture(device, "camera_composite", viewport.0, viewport.1, COMPOSITE_FORMAT);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

pub struct Renderer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: RendererConfig,
    destination: Box<dyn RenderDestination>,
    viewport: (u32, u32),
    device_lost: Arc<AtomicBool>,

    limiter: InFlightLimiter,
    ring: UniformRing,
    frame_constants: wgpu::Buffer,
    composite: CameraComposite,

    uploader: CapturedImageUploader,
    smoother: SkinSmoother,
    compositor: Compositor,
    scene: SceneCompositor,
    grader: ColorGrader,
    blitter: Blitter,
    extractor: EyeRegionExtractor,
    detector: Box<dyn LandmarkDetector>,
    intrinsics_sent: bool,

    content: ContentSlot,
    anchors: AnchorUpdater,
    eye_states: EyeStates,

    output: Option<Arc<dyn OutputConsumer>>,
    output_pool: Option<BufferPool<PixelBuffer>>,
}

impl Renderer {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        destination: Box<dyn RenderDestination>,
        config: RendererConfig,
    ) -> AppResult<Self> {
        config.validate()?;
        let viewport = (config.viewport_width, config.viewport_height);
        info!(
            width = viewport.0,
            height = viewport.1,
            destination_format = ?destination.color_format(),
            "Initializing renderer"
        );

        let device_lost = watch_device_loss(&device);

        let ring = UniformRing::new(
            std::mem::size_of::<FrameConstants>() as u64,
            MAX_FRAMES_IN_FLIGHT,
        );
        let frame_constants = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame_constants_ring"),
            size: ring.total_size(),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let composite = CameraComposite::new(&device, viewport);

        let uploader = CapturedImageUploader::new(Arc::clone(&device), Arc::clone(&queue), COMPOSITE_FORMAT);
        let mut smoother = SkinSmoother::new(Arc::clone(&device), Arc::clone(&queue), &config)
            .map_err(GpuError::ResourceAllocation)?;
        smoother.ensure_resources(viewport, &composite.view);
        let compositor = Compositor::new(Arc::clone(&device), COMPOSITE_FORMAT);
        let scene = SceneCompositor::new(
            Arc::clone(&device),
            Arc::clone(&queue),
            COMPOSITE_FORMAT,
            &frame_constants,
        );
        let grader = ColorGrader::new(Arc::clone(&device), Arc::clone(&queue), COMPOSITE_FORMAT);
        let blitter = Blitter::new(Arc::clone(&device));
        let extractor = EyeRegionExtractor::new(Arc::clone(&device), config.eye_padding());

        Ok(Self {
            device,
            queue,
            config,
            destination,
            viewport,
            device_lost,
            limiter: InFlightLimiter::new(MAX_FRAMES_IN_FLIGHT),
            ring,
            frame_constants,
            composite,
            uploader,
            smoother,
            compositor,
            scene,
            grader,
            blitter,
            extractor,
            detector: Box::new(CentroidDetector::new()),
            intrinsics_sent: false,
            content: ContentSlot::new(),
            anchors: AnchorUpdater::new(),
            eye_states: EyeStates::UNKNOWN,
            output: None,
            output_pool: None,
        })
    }

    /// Replace the built-in landmark detector
    pub fn with_detector(mut self, detector: Box<dyn LandmarkDetector>) -> Self {
        self.detector = detector;
        self.intrinsics_sent = false;
        self
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    /// Reallocate viewport-sized resources
    pub fn resize(&mut self, size: (u32, u32)) {
        let size = (size.0.max(1), size.1.max(1));
        if size == self.viewport {
            return;
        }
        info!(width = size.0, height = size.1, "Resizing renderer viewport");
        self.viewport = size;
        self.composite = CameraComposite::new(&self.device, size);
        self.smoother.ensure_resources(size, &self.composite.view);
        // Content holding the old composite gets the new one on the next feedback
        if let Some(content) = self.content.active_mut() {
            if content.needs_camera_texture() {
                content.update_camera_texture(&self.composite.texture);
            }
        }
    }

    pub fn attach_output_consumer(&mut self, consumer: Arc<dyn OutputConsumer>) {
        debug!("Output consumer attached");
        self.output = Some(consumer);
    }

    /// Frames already in flight still deliver to the previous consumer
    pub fn detach_output_consumer(&mut self) {
        debug!("Output consumer detached");
        self.output = None;
    }

    /// Swap to `bundle` in one step
    pub fn set_active_content(&mut self, bundle: Option<ContentBundle>) -> Result<(), ContentError> {
        self.begin_content_swap(bundle)?;
        self.complete_content_swap()
    }

    /// Hide the current content and hold `bundle` until the swap completes
    pub fn begin_content_swap(&mut self, bundle: Option<ContentBundle>) -> Result<(), ContentError> {
        self.content.begin_swap(bundle)
    }

    /// Publish the pending content and load its resources
    pub fn complete_content_swap(&mut self) -> Result<(), ContentError> {
        let active = self.content.complete_swap()?;

        self.scene.load_content(active);
        self.grader
            .set_lookup_table(active.and_then(|content| content.lookup_table(LutType::World)));
        let color = active.map(|content| content.color_parameters()).unwrap_or_default();
        self.grader.set_parameters(&color, self.config.lut_intensity);

        self.anchors.invalidate();
        self.eye_states = EyeStates::UNKNOWN;
        info!(
            content = ?active,
            contrast = color.contrast,
            saturation = color.saturation,
            "Content published"
        );
        Ok(())
    }

    pub fn content(&self) -> &ContentSlot {
        &self.content
    }

    pub fn in_flight_frames(&self) -> usize {
        self.limiter.in_flight()
    }

    pub fn eye_states(&self) -> EyeStates {
        self.eye_states
    }

    pub fn is_tracking(&self) -> bool {
        self.anchors.is_tracking()
    }

    /// Block until all submitted frames have completed
    pub fn wait_idle(&self) {
        if let Err(e) = self.device.poll(wgpu::PollType::wait_indefinitely()) {
            warn!(error = ?e, "Device poll failed while waiting for idle");
        }
    }

    /// Wait for a free in-flight slot and advance the uniform ring
    ///
    /// Returns `None` when the device is lost; the frame is dropped.
    fn begin_frame(&mut self) -> Option<(FramePermit, RingSlot)> {
        let frame_index = self.ring.frame_count() + 1;
        let permit = loop {
            if self.device_lost.load(Ordering::SeqCst) {
                warn!(frame = frame_index, "GPU device lost, dropping frame");
                return None;
            }
            if let Some(permit) = self.limiter.try_acquire(frame_index) {
                break permit;
            }
            trace!(frame = frame_index, "All frames in flight, waiting for the GPU");
            if let Err(e) = self.device.poll(wgpu::PollType::wait_indefinitely()) {
                warn!(error = ?e, frame = frame_index, "Device poll failed, dropping frame");
                return None;
            }
        };
        let slot = self.ring.advance();
        Some((permit, slot))
    }

    /// Output buffers follow the camera resolution of the first frame
    fn ensure_output_pool(&mut self, frame: &TrackingFrame) {
        if self.output_pool.is_some() {
            return;
        }
        let (width, height) = frame
            .image
            .planes
            .first()
            .map(|plane| (plane.width, plane.height))
            .filter(|&(w, h)| w > 0 && h > 0)
            .unwrap_or(self.viewport);

        let device = Arc::clone(&self.device);
        let pool = BufferPool::new(POOL_MINIMUM, self.config.output_pool_threshold, move || {
            Ok(PixelBuffer::new(Arc::clone(&device), width, height))
        });
        let warmed = pool.preallocate();
        info!(width, height, buffers = warmed, "Output pool created");
        self.output_pool = Some(pool);
    }

    fn acquire_output_buffer(&self) -> Option<Pooled<PixelBuffer>> {
        self.output.as_ref()?;
        let buffer = self.output_pool.as_ref()?.acquire();
        if buffer.is_none() {
            debug!("Output pool exhausted, skipping output copy");
        }
        buffer
    }

    fn create_encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn eye_bounds(&self, frame: &TrackingFrame, face: &FaceAnchor) -> [EyeBounds; 2] {
        let model_view = frame.camera.view * face.transform;
        [LEFT_BOUNDS_VERTICES, RIGHT_BOUNDS_VERTICES].map(|ids| {
            project_eye_bounds(
                &face.geometry.vertices,
                &ids,
                model_view,
                frame.camera.projection,
                self.viewport,
            )
        })
    }

    fn publish_eye_states(&mut self, states: EyeStates, now: Instant) {
        if let Some(content) = self.content.active_mut() {
            content.set_eye_states(states, now);
        }
        self.eye_states = states;
    }

    /// Crop both eyes from the camera composite and run the detector
    ///
    /// The camera pass recorded so far is submitted so the crops can be
    /// read back; recording continues in the returned encoder.
    fn extract_eyes(
        &mut self,
        encoder: wgpu::CommandEncoder,
        frame: &TrackingFrame,
        face: &FaceAnchor,
        bounds: [EyeBounds; 2],
        now: Instant,
    ) -> wgpu::CommandEncoder {
        let states = classify_eyes(
            &face.geometry,
            &bounds[0],
            &bounds[1],
            OPEN_REFERENCE_VERTICES,
            self.config.eye_openness_threshold,
        );

        let (next, reading) = self.read_eyes(encoder, &bounds);
        let viewport = Vec2::new(self.viewport.0 as f32, self.viewport.1 as f32);
        let update = resolve_eye_update(reading, states, viewport, frame.camera.projection.x_axis.x);
        if let Some(content) = self.content.active_mut() {
            content.apply_eye_update(&update, now);
        }
        self.eye_states = update.states;
        trace!(states = ?update.states, gaze = update.geometry.is_some(), "Eye update published");
        next
    }

    /// Plan, copy and read back both eye crops, then run the detector
    ///
    /// Any failure aborts the whole extraction and yields no reading.
    fn read_eyes(
        &mut self,
        mut encoder: wgpu::CommandEncoder,
        bounds: &[EyeBounds; 2],
    ) -> (wgpu::CommandEncoder, Option<EyeReading>) {
        // The detector's left eye is the viewer's left, the face's right
        let plans = match self.extractor.plan(&bounds[1], &bounds[0], self.viewport) {
            Ok(plans) => plans,
            Err(e) => {
                debug!(error = %e, "Eye extraction aborted");
                return (encoder, None);
            }
        };

        self.extractor
            .encode_copies(&mut encoder, &self.composite.texture, &plans);
        self.queue.submit(std::iter::once(encoder.finish()));
        let crops = pollster::block_on(self.extractor.read_crops(&plans));
        let next = self.create_encoder("frame_encoder");

        let [left, right] = match crops {
            Ok(crops) => crops,
            Err(e) => {
                warn!(error = %e, "Eye crop readback failed");
                return (next, None);
            }
        };

        let Some(content) = self.content.active() else {
            return (next, None);
        };
        self.detector.detect(content, &left, &right);
        (next, Some(EyeReading::from_detector(&*self.detector)))
    }

    /// Render one tracking frame
    ///
    /// Failures inside a frame are logged and only skip the affected
    /// stage; nothing is returned to the caller but the report.
    pub fn on_tracking_frame(&mut self, frame: &TrackingFrame) -> FrameReport {
        let now = Instant::now();
        let anchor_update = self.anchors.update(&mut self.content, frame, now);

        let Some((permit, slot)) = self.begin_frame() else {
            return FrameReport {
                frame_index: self.ring.frame_count(),
                dropped: true,
                ..FrameReport::default()
            };
        };
        let mut report = FrameReport {
            frame_index: slot.frame_index,
            ..FrameReport::default()
        };

        let constants = FrameConstants::new(frame.camera.view, frame.camera.projection, frame.light.as_ref());
        self.queue
            .write_buffer(&self.frame_constants, slot.offset, bytemuck::bytes_of(&constants));

        if !self.intrinsics_sent {
            self.detector.set_intrinsics(frame.intrinsics);
            self.intrinsics_sent = true;
        }

        self.uploader.set_display_transform(frame.display_transform);
        report.image_uploaded = match self.uploader.upload(&frame.image) {
            Ok(uploaded) => uploaded,
            Err(e) => {
                warn!(error = %e, "Camera image upload failed");
                false
            }
        };

        self.ensure_output_pool(frame);
        let output_buffer = self.acquire_output_buffer();

        let face = frame.face_anchor().filter(|face| face.is_tracked);
        let bounds = face.map(|face| self.eye_bounds(frame, face));
        let published = self.content.published_parameters();
        let conditions = FrameConditions {
            swapping: self.content.is_swapping(),
            tracking: anchor_update.tracking,
            has_content: self.content.active().is_some(),
            needs_eye_update: published.needs_eye_update,
            needs_camera_texture: published.needs_camera_texture,
            eyes_visible: bounds.is_some_and(|[left, right]| left.is_visible() && right.is_visible()),
            has_camera_pose: true,
            has_face_geometry: face.is_some_and(|face| face.geometry.has_tracker_topology()),
            has_world_lut: published.has_world_lut,
            color_non_neutral: !published.color.is_neutral(),
            output_buffer_available: output_buffer.is_some(),
        };
        let plan = FramePlan::decide(&conditions);
        report.plan = plan;
        trace!(frame = slot.frame_index, ?plan, "Frame planned");

        let mut encoder = self.create_encoder("frame_encoder");
        self.uploader.encode(&mut encoder, &self.composite.view);

        match (plan.extract_eyes, face, bounds) {
            (true, Some(face), Some(bounds)) => {
                encoder = self.extract_eyes(encoder, frame, face, bounds, now);
            }
            _ => {
                let eye_content = !conditions.swapping && conditions.has_content && conditions.needs_eye_update;
                if eye_content && self.eye_states != EyeStates::UNKNOWN {
                    self.publish_eye_states(EyeStates::UNKNOWN, now);
                }
            }
        }

        if plan.smooth_skin {
            if let Some(face) = face {
                if self.smoother.upload_mesh(&face.geometry) {
                    self.smoother.encode(&mut encoder, &frame.camera, face.transform);
                    if let Some(face_layer) = self.smoother.result_view() {
                        self.compositor
                            .encode(&mut encoder, face_layer, &self.composite.view);
                    }
                }
            }
        }

        if plan.feed_camera_texture {
            if let Some(content) = self.content.active_mut() {
                content.update_camera_texture(&self.composite.texture);
            }
        }

        if plan.render_scene {
            if let Some(content) = self.content.active() {
                match face {
                    Some(face) => self.scene.upload_face_mesh(&face.geometry),
                    None => self.scene.clear_face_mesh(),
                }
                let draws = content.scene().draw_list(frame.camera.view, now);
                self.scene.encode(
                    &mut encoder,
                    &self.composite.view,
                    self.viewport,
                    slot.offset as u32,
                    &draws,
                );
            }
        }

        if plan.color_grade {
            self.grader
                .encode(&mut encoder, &self.composite.texture, &self.composite.view);
        }

        let delivered = if plan.copy_output {
            output_buffer.inspect(|buffer| {
                self.blitter.encode(
                    &mut encoder,
                    &self.composite.view,
                    buffer.view(),
                    OUTPUT_FORMAT,
                    "output_copy",
                );
                buffer.encode_readback(&mut encoder);
            })
        } else {
            None
        };

        let target = self.destination.current_target();
        if let Some(target) = &target {
            let format = self.destination.color_format();
            self.blitter
                .encode(&mut encoder, &self.composite.view, target, format, "present");
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        if target.is_some() {
            self.destination.present();
            report.presented = true;
        }

        let consumer = self.output.clone();
        let timestamp = presentation_time(frame.timestamp);
        let frame_index = slot.frame_index;
        self.queue.on_submitted_work_done(move || {
            permit.complete();
            if let (Some(consumer), Some(buffer)) = (consumer, delivered) {
                let handle = consumer.callback_handle();
                handle.spawn(async move {
                    consumer.rendered_output(buffer, timestamp);
                });
            }
            trace!(frame = frame_index, "Frame completed");
        });

        report
    }
}
