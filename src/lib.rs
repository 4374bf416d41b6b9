//! Multipass Renderer - a frame-synchronized multi-pass Vulkan renderer
//!
//! The renderer composites up to four passes per frame, always in this order:
//! - **Swapchain**: main scene straight into the presentable image
//! - **Picking**: object identifiers into an integer target, one texel under the cursor
//! - **Viewport**: the scene rendered off-screen for display inside a UI panel
//! - **UI**: egui overlay, presented last
//!
//! # Overview
//! - [`Context`] coordinates one frame: fence wait, uniform upload, acquire,
//!   ordered pass recording, one batched submit, present and resize handling
//! - [`backend::FrameBackend`] is the GPU seam, implemented by
//!   [`vulkan::VulkanBackend`] and by [`backend::DummyBackend`] for tests
//! - [`FrameSlot`] and [`ImageIndex`] keep in-flight frames and swapchain
//!   images apart
//! - [`registry::Registry`] stores passes, pipelines and buffers under typed keys
//! - [`retire::RetirementQueue`] defers destruction until the GPU is done

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod frame;
pub mod picking;
pub mod registry;
pub mod retire;
pub mod uniforms;
pub mod vulkan;
pub mod window;

pub use config::RendererConfig;
pub use context::{
    Context, FrameInput, FrameListener, FrameOutcome, PassContext, RenderStage, RendererEvent,
    SkipReason,
};
pub use error::{RendererError, RendererResult};
pub use frame::{FrameSlot, ImageIndex, CONCURRENTLY_RENDERED_FRAMES};
pub use picking::ViewportBounds;
pub use registry::{BufferKind, PassKind, PipelineKind};
pub use uniforms::{CameraUniform, ObjectPushConstants, Vertex};
pub use vulkan::VulkanBackend;
pub use window::Window;

/// Renderer library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging and report the library version.
///
/// Uses `RUST_LOG` when set, `info` otherwise. Safe to call more than once.
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
    log::info!("Multipass Renderer v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_init_twice() {
        init();
        init();
    }
}
