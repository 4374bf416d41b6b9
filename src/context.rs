//! Frame coordinator.
//!
//! [`Context::on_update`] runs once per application tick and drives one frame
//! through the backend:
//!
//! 1. wait for the in-flight fence of the current [`FrameSlot`]
//! 2. write the camera block into that slot's uniform memory
//! 3. acquire a swapchain image, or recreate and skip the frame when the
//!    swapchain is out of date
//! 4. reset the fence and record every registered pass in execution order
//! 5. submit all recorded command buffers as one batch
//! 6. present, recreating the swapchain on suboptimal, out-of-date or an
//!    external resize hint
//!
//! Scene content comes from a [`FrameListener`]; the coordinator never issues
//! draws itself.

use ash::vk;
use glam::Vec2;

use crate::backend::{AcquireOutcome, FrameBackend};
use crate::error::{RendererError, RendererResult};
use crate::frame::{FrameCounter, FrameSlot, ImageIndex};
use crate::picking::{
    cursor_texel, decode_id, full_scissor, picking_scissor, ViewportBounds, NO_OBJECT,
};
use crate::registry::PassKind;
use crate::uniforms::CameraUniform;

/// What a scene draw callback is being asked to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderStage {
    /// Regular shaded scene.
    Default,
    /// Object identifiers into the picking target.
    Picking,
    /// Scene edges only.
    Wireframe,
}

/// Everything a callback needs to record draws into the current pass.
pub struct PassContext<'a, B: FrameBackend + ?Sized> {
    pub backend: &'a B,
    pub commands: B::Commands,
    pub pass: PassKind,
    pub slot: FrameSlot,
    pub image: ImageIndex,
    pub extent: vk::Extent2D,
    pub scissor: vk::Rect2D,
}

/// Receiver of per-pass draw callbacks.
///
/// Callbacks only record commands into `pass.commands`. They must not acquire,
/// submit or present. An error aborts the frame: the open pass is ended and
/// nothing is submitted.
pub trait FrameListener<B: FrameBackend> {
    /// Draw scene objects for `stage`.
    fn on_render(&mut self, stage: RenderStage, pass: &PassContext<'_, B>) -> RendererResult<()>;

    /// Draw in-scene overlays (grid, gizmos) after the scene.
    fn on_overlay(&mut self, _pass: &PassContext<'_, B>) -> RendererResult<()> {
        Ok(())
    }

    /// Draw the UI draw data.
    fn on_draw_ui(&mut self, _pass: &PassContext<'_, B>) -> RendererResult<()> {
        Ok(())
    }
}

/// Per-tick input from the window and camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInput {
    /// Framebuffer size in physical pixels.
    pub framebuffer_size: (u32, u32),
    /// Cursor position in window pixels.
    pub cursor: Vec2,
    /// The window was resized since the last tick.
    pub resize_hint: bool,
    pub camera: CameraUniform,
}

impl FrameInput {
    pub fn new(framebuffer_size: (u32, u32)) -> Self {
        Self {
            framebuffer_size,
            cursor: Vec2::ZERO,
            resize_hint: false,
            camera: CameraUniform::default(),
        }
    }
}

/// Why a tick did not render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The framebuffer has a zero dimension.
    Minimized,
    /// Acquire reported an out-of-date swapchain, which was recreated.
    OutOfDate,
}

/// Result of one [`Context::on_update`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented {
        slot: FrameSlot,
        image: ImageIndex,
        /// The swapchain was recreated after presenting.
        recreated: bool,
    },
    Skipped(SkipReason),
}

/// Notifications for the application, drained with [`Context::drain_events`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RendererEvent {
    Resized {
        width: u32,
        height: u32,
        aspect_ratio: f32,
        image_count: usize,
    },
}

/// Frame coordinator owning a [`FrameBackend`].
pub struct Context<B: FrameBackend> {
    backend: B,
    frames: FrameCounter,
    bounds: ViewportBounds,
    aspect_ratio: f32,
    wireframe: bool,
    last_frame: Option<(FrameSlot, ImageIndex)>,
    events: Vec<RendererEvent>,
}

impl<B: FrameBackend> Context<B> {
    pub fn new(backend: B) -> Self {
        let extent = backend.extent();
        log::info!(
            "Frame coordinator ready on {} backend: {}x{}, {} images, {} frames in flight",
            backend.name(),
            extent.width,
            extent.height,
            backend.image_count(),
            backend.frames_in_flight()
        );
        Self {
            backend,
            frames: FrameCounter::new(),
            bounds: ViewportBounds::full(extent.width, extent.height),
            aspect_ratio: aspect_ratio(extent),
            wireframe: false,
            last_frame: None,
            events: Vec::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable backend access, for registry changes between frames.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Slot the next frame will use.
    pub fn current_slot(&self) -> FrameSlot {
        self.frames.slot()
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames.submitted()
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.aspect_ratio
    }

    pub fn viewport_bounds(&self) -> &ViewportBounds {
        &self.bounds
    }

    /// Place the scene viewport inside the window.
    pub fn set_viewport_bounds(&mut self, bounds: ViewportBounds) {
        self.bounds = bounds;
    }

    /// Render the scene with [`RenderStage::Wireframe`] instead of
    /// [`RenderStage::Default`].
    pub fn set_wireframe(&mut self, enabled: bool) {
        self.wireframe = enabled;
    }

    /// Take the notifications emitted since the last call.
    pub fn drain_events(&mut self) -> Vec<RendererEvent> {
        std::mem::take(&mut self.events)
    }

    /// Render one frame.
    ///
    /// Errors are fatal for the frame loop. A frame that fails after its fence
    /// was reset is never submitted, so the only way forward is
    /// [`Self::shutdown`].
    pub fn on_update<L>(&mut self, listener: &mut L, input: &FrameInput) -> RendererResult<FrameOutcome>
    where
        L: FrameListener<B> + ?Sized,
    {
        let (width, height) = input.framebuffer_size;
        if width == 0 || height == 0 {
            log::trace!("Framebuffer is {width}x{height}, skipping frame");
            return Ok(FrameOutcome::Skipped(SkipReason::Minimized));
        }

        let slot = self.frames.slot();
        self.backend.wait_for_frame(slot)?;

        let cursor = self.bounds.relative_cursor(input.cursor);
        self.backend
            .write_camera(slot, &input.camera.with_cursor(cursor))?;

        let image = match self.backend.acquire_image(slot)? {
            AcquireOutcome::Ready { image, suboptimal } => {
                if suboptimal {
                    log::trace!("Acquired suboptimal {image}");
                }
                image
            }
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on acquire, recreating");
                self.recreate(input.framebuffer_size)?;
                return Ok(FrameOutcome::Skipped(SkipReason::OutOfDate));
            }
        };

        self.backend.reset_frame_fence(slot)?;

        let passes = self.record_passes(listener, input, slot, image)?;
        self.backend.submit(slot, &passes)?;

        let presented = self.backend.present(slot, image)?;
        self.last_frame = Some((slot, image));
        self.frames.advance();

        let recreated = presented.needs_recreate() || input.resize_hint;
        if recreated {
            log::debug!(
                "Recreating swapchain after present ({presented:?}, resize hint: {})",
                input.resize_hint
            );
            self.recreate(input.framebuffer_size)?;
        }

        Ok(FrameOutcome::Presented {
            slot,
            image,
            recreated,
        })
    }

    fn record_passes<L>(
        &mut self,
        listener: &mut L,
        input: &FrameInput,
        slot: FrameSlot,
        image: ImageIndex,
    ) -> RendererResult<Vec<PassKind>>
    where
        L: FrameListener<B> + ?Sized,
    {
        let extent = self.backend.extent();
        let passes: Vec<PassKind> = PassKind::ALL
            .into_iter()
            .filter(|&pass| self.backend.has_pass(pass))
            .collect();
        let has_viewport = passes.contains(&PassKind::Viewport);
        let scene_stage = if self.wireframe {
            RenderStage::Wireframe
        } else {
            RenderStage::Default
        };

        for &pass in &passes {
            let scissor = match pass {
                PassKind::Picking => picking_scissor(input.cursor, &self.bounds, extent),
                _ => full_scissor(extent),
            };
            let commands = self.backend.begin_pass(pass, slot, image, scissor)?;
            let context = PassContext {
                backend: &self.backend,
                commands,
                pass,
                slot,
                image,
                extent,
                scissor,
            };

            let drawn = match pass {
                // The scene goes to the viewport when there is one, never both.
                PassKind::Swapchain if !has_viewport => listener
                    .on_render(scene_stage, &context)
                    .and_then(|()| listener.on_overlay(&context)),
                PassKind::Swapchain => Ok(()),
                PassKind::Picking => listener.on_render(RenderStage::Picking, &context),
                PassKind::Viewport => listener
                    .on_render(scene_stage, &context)
                    .and_then(|()| listener.on_overlay(&context)),
                PassKind::Ui => listener.on_draw_ui(&context),
            };

            let ended = self.backend.end_pass(pass, slot);
            if let Err(e) = drawn {
                if let Err(end_error) = ended {
                    log::warn!("Failed to end the aborted {pass} pass: {end_error}");
                }
                log::error!("Recording the {pass} pass for {slot} failed: {e}");
                return Err(e);
            }
            ended?;
        }

        log::trace!("Recorded {passes:?} for {slot} into {image}");
        Ok(passes)
    }

    /// Recreate the swapchain and everything sized by it, then queue a
    /// [`RendererEvent::Resized`].
    ///
    /// The picking target is rebuilt too, so picks read [`NO_OBJECT`] until
    /// the next frame is presented.
    pub fn recreate(&mut self, framebuffer_size: (u32, u32)) -> RendererResult<vk::Extent2D> {
        let extent = self.backend.recreate_swapchain(framebuffer_size)?;
        self.last_frame = None;
        self.aspect_ratio = aspect_ratio(extent);
        self.bounds.resize(extent.width, extent.height);

        let image_count = self.backend.image_count();
        self.events.push(RendererEvent::Resized {
            width: extent.width,
            height: extent.height,
            aspect_ratio: self.aspect_ratio,
            image_count,
        });
        log::info!(
            "Swapchain recreated: {}x{}, {} images",
            extent.width,
            extent.height,
            image_count
        );
        Ok(extent)
    }

    /// Read the object identifier at a viewport-relative texel of the picking
    /// target rendered by the last frame.
    ///
    /// This is a blocking round-trip: it waits for the GPU to finish that
    /// frame, copies one texel through a staging buffer and waits again for
    /// the copy. Call it on deliberate user actions such as a click, never once
    /// per frame.
    ///
    /// Between a swapchain recreation and the next presented frame nothing
    /// has been rendered into the picking target, and this reads
    /// [`NO_OBJECT`].
    pub fn read_image_pixels(&mut self, x: u32, y: u32) -> RendererResult<u64> {
        let extent = self.backend.extent();
        if x >= extent.width || y >= extent.height {
            return Err(RendererError::InvalidParameter(format!(
                "pick position ({x}, {y}) outside {}x{}",
                extent.width, extent.height
            )));
        }
        if self.last_frame.is_none() && self.frames.submitted() > 0 {
            log::debug!("Picking target was rebuilt since the last frame, nothing to read");
            return Ok(NO_OBJECT);
        }
        let texel = self.backend.read_picking_texel(x, y)?;
        Ok(decode_id(texel))
    }

    /// Pick under a window-space cursor. Blocking, see [`Self::read_image_pixels`].
    pub fn pick(&mut self, cursor: Vec2) -> RendererResult<u64> {
        let (x, y) = cursor_texel(cursor, &self.bounds, self.backend.extent());
        self.read_image_pixels(x, y)
    }

    /// Slot and image of the most recently presented frame, cleared when the
    /// swapchain is recreated.
    pub fn last_frame(&self) -> Option<(FrameSlot, ImageIndex)> {
        self.last_frame
    }

    /// Wait for the GPU and hand the backend back for teardown.
    pub fn shutdown(mut self) -> RendererResult<B> {
        self.backend.wait_idle()?;
        log::info!(
            "Frame coordinator shut down after {} frames",
            self.frames.submitted()
        );
        Ok(self.backend)
    }
}

fn aspect_ratio(extent: vk::Extent2D) -> f32 {
    extent.width as f32 / extent.height.max(1) as f32
}
