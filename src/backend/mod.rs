//! The GPU side of a frame.
//!
//! [`FrameBackend`] is the seam between the frame coordinator
//! ([`crate::context::Context`]) and the objects that own fences, swapchain
//! images and command buffers. The Vulkan implementation lives in
//! [`crate::vulkan`]; [`DummyBackend`] models the same state machine in
//! software so the coordination rules can be exercised without a GPU.

mod dummy;

pub use dummy::{DummyBackend, DummyCommands, DummyEvent};

use ash::vk;

use crate::error::RendererResult;
use crate::frame::{FrameSlot, ImageIndex};
use crate::registry::PassKind;
use crate::uniforms::CameraUniform;

/// Result of asking the swapchain for the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready to render into. `suboptimal` images are still used.
    Ready { image: ImageIndex, suboptimal: bool },
    /// The surface changed and the swapchain must be recreated first.
    OutOfDate,
}

/// Result of presenting a rendered image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Presented, but the swapchain no longer matches the surface exactly.
    Suboptimal,
    /// Not presented, the swapchain no longer matches the surface.
    OutOfDate,
}

impl PresentOutcome {
    /// Whether the swapchain should be recreated after this present.
    pub fn needs_recreate(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

/// Operations the frame coordinator performs on the GPU, in the order it
/// performs them.
pub trait FrameBackend {
    /// Handle that pass callbacks record their draws into.
    type Commands: Copy + std::fmt::Debug;

    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Current swapchain extent.
    fn extent(&self) -> vk::Extent2D;

    /// Number of presentable images.
    fn image_count(&self) -> usize;

    /// Number of per-frame synchronization primitive sets.
    fn frames_in_flight(&self) -> usize;

    /// Whether `pass` is currently registered.
    fn has_pass(&self, pass: PassKind) -> bool;

    /// Block until the GPU finished the last frame recorded into `slot`, then
    /// release resources that were retired on it.
    fn wait_for_frame(&mut self, slot: FrameSlot) -> RendererResult<()>;

    /// Write the camera block into the uniform memory of `slot`.
    fn write_camera(&mut self, slot: FrameSlot, camera: &CameraUniform) -> RendererResult<()>;

    /// Acquire the next presentable image, signaling the image-available
    /// semaphore of `slot`.
    fn acquire_image(&mut self, slot: FrameSlot) -> RendererResult<AcquireOutcome>;

    /// Reset the in-flight fence of `slot` before it is handed to a submit.
    fn reset_frame_fence(&mut self, slot: FrameSlot) -> RendererResult<()>;

    /// Reset and begin the command buffer of `pass` for `slot` and begin the
    /// render pass on the framebuffer of `image`.
    fn begin_pass(
        &mut self,
        pass: PassKind,
        slot: FrameSlot,
        image: ImageIndex,
        scissor: vk::Rect2D,
    ) -> RendererResult<Self::Commands>;

    /// End the render pass and the command buffer of `pass` for `slot`.
    fn end_pass(&mut self, pass: PassKind, slot: FrameSlot) -> RendererResult<()>;

    /// Submit the command buffers of `passes` for `slot` as a single batch.
    fn submit(&mut self, slot: FrameSlot, passes: &[PassKind]) -> RendererResult<()>;

    /// Present `image` once the batch of `slot` finished rendering.
    fn present(&mut self, slot: FrameSlot, image: ImageIndex) -> RendererResult<PresentOutcome>;

    /// Rebuild the swapchain and every swapchain-sized resource.
    fn recreate_swapchain(&mut self, framebuffer_size: (u32, u32))
        -> RendererResult<vk::Extent2D>;

    /// Read one texel of the picking target rendered by the last submitted
    /// frame. Blocks until the GPU is done with that frame.
    fn read_picking_texel(&mut self, x: u32, y: u32) -> RendererResult<[u32; 2]>;

    /// Block until the device is idle.
    fn wait_idle(&mut self) -> RendererResult<()>;
}
