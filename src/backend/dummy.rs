//! Software backend that models fences, image acquisition and the picking
//! target without touching a GPU.
//!
//! Every call is appended to an event log so tests can check the order in
//! which the coordinator touched frame resources.

use ash::vk;
use parking_lot::Mutex;

use super::{AcquireOutcome, FrameBackend, PresentOutcome};
use crate::error::{RendererError, RendererResult};
use crate::frame::{FrameSlot, ImageIndex, PerFrame, PerImage, CONCURRENTLY_RENDERED_FRAMES};
use crate::picking::{encode_id, rect_contains};
use crate::registry::{PassKind, Registry};
use crate::retire::RetirementQueue;
use crate::uniforms::CameraUniform;

/// Something the dummy backend was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum DummyEvent {
    FenceWaited { slot: FrameSlot, was_pending: bool },
    Released { slot: FrameSlot, count: usize },
    CameraWritten { slot: FrameSlot, fence_signaled: bool },
    Acquired { slot: FrameSlot, image: ImageIndex },
    AcquireOutOfDate { slot: FrameSlot },
    FenceReset { slot: FrameSlot },
    PassBegun { pass: PassKind, slot: FrameSlot, image: ImageIndex, scissor: vk::Rect2D },
    PassEnded { pass: PassKind, slot: FrameSlot },
    Submitted { slot: FrameSlot, passes: Vec<PassKind> },
    Presented { slot: FrameSlot, image: ImageIndex, outcome: PresentOutcome },
    Recreated { extent: vk::Extent2D },
    PickingRead { image: ImageIndex, x: u32, y: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Signaled,
    Reset,
    Pending,
}

/// Command buffer handle handed to callbacks by the dummy backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DummyCommands {
    pub pass: PassKind,
    pub slot: FrameSlot,
    pub image: ImageIndex,
}

#[derive(Debug, Default)]
struct DummyPass {
    recording: Option<FrameSlot>,
}

/// Integer texels per swapchain image plus the scissor of the pass being recorded.
#[derive(Debug)]
struct PickingStore {
    texels: PerImage<Vec<[u32; 2]>>,
    scissor: vk::Rect2D,
}

/// Software stand-in for the Vulkan backend.
pub struct DummyBackend {
    extent: vk::Extent2D,
    surface_size: (u32, u32),
    image_count: u32,
    next_image: u32,
    fences: PerFrame<FenceState>,
    passes: Registry<PassKind, DummyPass>,
    cameras: PerFrame<Option<CameraUniform>>,
    picking: Mutex<PickingStore>,
    retired: RetirementQueue<PassKind>,
    last_submitted: Option<(FrameSlot, ImageIndex)>,
    scripted_present: Option<PresentOutcome>,
    events: Vec<DummyEvent>,
}

impl DummyBackend {
    /// Create a backend with a swapchain of `image_count` images.
    pub fn new(width: u32, height: u32, image_count: u32) -> Self {
        let extent = vk::Extent2D { width, height };
        let mut passes = Registry::new();
        let _ = passes.insert(PassKind::Swapchain, DummyPass::default());
        Self {
            extent,
            surface_size: (width, height),
            image_count: image_count.max(1),
            next_image: 0,
            fences: PerFrame::from_fn(|_| FenceState::Signaled),
            passes,
            cameras: PerFrame::from_fn(|_| None),
            picking: Mutex::new(PickingStore {
                texels: Self::picking_texels(extent, image_count.max(1)),
                scissor: vk::Rect2D::default(),
            }),
            retired: RetirementQueue::new(),
            last_submitted: None,
            scripted_present: None,
            events: Vec::new(),
        }
    }

    fn picking_texels(extent: vk::Extent2D, image_count: u32) -> PerImage<Vec<[u32; 2]>> {
        (0..image_count)
            .map(|_| vec![[0, 0]; (extent.width * extent.height) as usize])
            .collect()
    }

    /// Register an optional pass. Returns `false` if it already existed.
    pub fn enable_pass(&mut self, pass: PassKind) -> bool {
        self.passes.insert(pass, DummyPass::default()).is_ok()
    }

    /// Unregister a pass; it is retired on the last submitted slot.
    pub fn disable_pass(&mut self, pass: PassKind) -> bool {
        if pass == PassKind::Swapchain || self.passes.remove(pass).is_none() {
            return false;
        }
        let slot = self
            .last_submitted
            .map(|(slot, _)| slot)
            .unwrap_or(FrameSlot::FIRST);
        self.retired.retire(slot, pass);
        true
    }

    /// Simulate the window being resized. The next acquire reports out-of-date.
    pub fn resize_surface(&mut self, width: u32, height: u32) {
        self.surface_size = (width, height);
    }

    /// Make the next present return `outcome`.
    pub fn script_present(&mut self, outcome: PresentOutcome) {
        self.scripted_present = Some(outcome);
    }

    /// Rasterize `id` over `rect`, limited by the scissor of the picking pass.
    ///
    /// Only has an effect when recorded into the picking pass.
    pub fn draw_id(&self, commands: DummyCommands, rect: vk::Rect2D, id: u64) {
        if commands.pass != PassKind::Picking {
            return;
        }
        let mut store = self.picking.lock();
        let scissor = store.scissor;
        let width = self.extent.width;
        let texels = &mut store.texels[commands.image];
        for y in 0..self.extent.height {
            for x in 0..width {
                if rect_contains(&rect, x, y) && rect_contains(&scissor, x, y) {
                    texels[(y * width + x) as usize] = encode_id(id);
                }
            }
        }
    }

    pub fn events(&self) -> &[DummyEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<DummyEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn camera(&self, slot: FrameSlot) -> Option<&CameraUniform> {
        self.cameras[slot].as_ref()
    }

    pub fn retired_count(&self) -> usize {
        self.retired.pending_count()
    }
}

impl FrameBackend for DummyBackend {
    type Commands = DummyCommands;

    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn image_count(&self) -> usize {
        self.image_count as usize
    }

    fn frames_in_flight(&self) -> usize {
        self.fences.len()
    }

    fn has_pass(&self, pass: PassKind) -> bool {
        self.passes.contains(pass)
    }

    fn wait_for_frame(&mut self, slot: FrameSlot) -> RendererResult<()> {
        let was_pending = self.fences[slot] == FenceState::Pending;
        if self.fences[slot] == FenceState::Reset {
            return Err(RendererError::Timeout(format!(
                "fence of {slot} was reset but never submitted"
            )));
        }
        // The simulated GPU finishes the moment someone waits for it.
        self.fences[slot] = FenceState::Signaled;
        self.events.push(DummyEvent::FenceWaited { slot, was_pending });

        let released = self.retired.release(slot);
        if !released.is_empty() {
            self.events.push(DummyEvent::Released {
                slot,
                count: released.len(),
            });
        }
        Ok(())
    }

    fn write_camera(&mut self, slot: FrameSlot, camera: &CameraUniform) -> RendererResult<()> {
        let fence_signaled = self.fences[slot] == FenceState::Signaled;
        self.cameras[slot] = Some(*camera);
        self.events.push(DummyEvent::CameraWritten {
            slot,
            fence_signaled,
        });
        Ok(())
    }

    fn acquire_image(&mut self, slot: FrameSlot) -> RendererResult<AcquireOutcome> {
        if self.surface_size != (self.extent.width, self.extent.height) {
            self.events.push(DummyEvent::AcquireOutOfDate { slot });
            return Ok(AcquireOutcome::OutOfDate);
        }
        let image = ImageIndex::new(self.next_image);
        self.next_image = (self.next_image + 1) % self.image_count;
        self.events.push(DummyEvent::Acquired { slot, image });
        Ok(AcquireOutcome::Ready {
            image,
            suboptimal: false,
        })
    }

    fn reset_frame_fence(&mut self, slot: FrameSlot) -> RendererResult<()> {
        if self.fences[slot] != FenceState::Signaled {
            return Err(RendererError::CommandFailed(format!(
                "reset of unsignaled fence for {slot}"
            )));
        }
        self.fences[slot] = FenceState::Reset;
        self.events.push(DummyEvent::FenceReset { slot });
        Ok(())
    }

    fn begin_pass(
        &mut self,
        pass: PassKind,
        slot: FrameSlot,
        image: ImageIndex,
        scissor: vk::Rect2D,
    ) -> RendererResult<DummyCommands> {
        if image.index() >= self.image_count() {
            return Err(RendererError::InvalidParameter(format!("{image} out of range")));
        }
        let state = self.passes.require_mut(pass)?;
        if state.recording.is_some() {
            return Err(RendererError::CommandFailed(format!(
                "{pass} pass is already recording"
            )));
        }
        state.recording = Some(slot);

        if pass == PassKind::Picking {
            let mut store = self.picking.lock();
            store.scissor = scissor;
            store.texels[image].fill([0, 0]);
        }

        self.events.push(DummyEvent::PassBegun {
            pass,
            slot,
            image,
            scissor,
        });
        Ok(DummyCommands { pass, slot, image })
    }

    fn end_pass(&mut self, pass: PassKind, slot: FrameSlot) -> RendererResult<()> {
        let state = self.passes.require_mut(pass)?;
        if state.recording != Some(slot) {
            return Err(RendererError::CommandFailed(format!(
                "{pass} pass was not recording for {slot}"
            )));
        }
        state.recording = None;
        self.events.push(DummyEvent::PassEnded { pass, slot });
        Ok(())
    }

    fn submit(&mut self, slot: FrameSlot, passes: &[PassKind]) -> RendererResult<()> {
        if self.fences[slot] != FenceState::Reset {
            return Err(RendererError::CommandFailed(format!(
                "submit with a fence that was not reset for {slot}"
            )));
        }
        self.fences[slot] = FenceState::Pending;
        self.events.push(DummyEvent::Submitted {
            slot,
            passes: passes.to_vec(),
        });
        Ok(())
    }

    fn present(&mut self, slot: FrameSlot, image: ImageIndex) -> RendererResult<PresentOutcome> {
        let outcome = self
            .scripted_present
            .take()
            .unwrap_or(PresentOutcome::Presented);
        self.last_submitted = Some((slot, image));
        self.events.push(DummyEvent::Presented {
            slot,
            image,
            outcome,
        });
        Ok(outcome)
    }

    fn recreate_swapchain(&mut self, framebuffer_size: (u32, u32)) -> RendererResult<vk::Extent2D> {
        self.wait_idle()?;
        self.surface_size = framebuffer_size;
        self.extent = vk::Extent2D {
            width: framebuffer_size.0,
            height: framebuffer_size.1,
        };
        self.next_image = 0;
        self.last_submitted = None;
        self.picking.lock().texels = Self::picking_texels(self.extent, self.image_count);
        self.events.push(DummyEvent::Recreated {
            extent: self.extent,
        });
        Ok(self.extent)
    }

    fn read_picking_texel(&mut self, x: u32, y: u32) -> RendererResult<[u32; 2]> {
        if !self.passes.contains(PassKind::Picking) {
            return Err(RendererError::MissingResource("Picking".to_string()));
        }
        let (slot, image) = self.last_submitted.ok_or_else(|| {
            RendererError::InvalidParameter("no frame has been rendered yet".to_string())
        })?;
        if x >= self.extent.width || y >= self.extent.height {
            return Err(RendererError::InvalidParameter(format!(
                "texel ({x}, {y}) outside {}x{}",
                self.extent.width, self.extent.height
            )));
        }
        self.wait_for_frame(slot)?;
        self.events.push(DummyEvent::PickingRead { image, x, y });

        let store = self.picking.lock();
        Ok(store.texels[image][(y * self.extent.width + x) as usize])
    }

    fn wait_idle(&mut self) -> RendererResult<()> {
        for slot in FrameSlot::all() {
            if self.fences[slot] == FenceState::Pending {
                self.fences[slot] = FenceState::Signaled;
            }
        }
        let released = self.retired.drain();
        if !released.is_empty() {
            log::debug!("Released {} retired dummy passes", released.len());
        }
        Ok(())
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new(800, 600, CONCURRENTLY_RENDERED_FRAMES as u32 + 1)
    }
}
