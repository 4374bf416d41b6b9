//! Shared helpers for the frame coordinator integration tests.
//!
//! Everything runs against [`DummyBackend`], which models fences, image
//! acquisition and the picking target in software.

#![allow(dead_code)]

use ash::vk;
use glam::Vec2;
use multipass_renderer::backend::{DummyBackend, DummyEvent, FrameBackend};
use multipass_renderer::{
    CameraUniform, Context, FrameInput, FrameListener, FrameSlot, ImageIndex, PassContext,
    PassKind, RenderStage, RendererError, RendererResult,
};

/// One callback the coordinator made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Render {
        stage: RenderStage,
        pass: PassKind,
        slot: FrameSlot,
        image: ImageIndex,
    },
    Overlay {
        pass: PassKind,
    },
    Ui {
        pass: PassKind,
    },
}

/// Listener that records every callback and rasterizes pickable rectangles
/// in the picking stage.
#[derive(Debug, Default)]
pub struct RecordingListener {
    pub calls: Vec<Call>,
    pub pickables: Vec<(vk::Rect2D, u64)>,
    /// Callbacks recorded into this pass fail.
    pub failing_pass: Option<PassKind>,
}

impl RecordingListener {
    pub fn failing_in(mut self, pass: PassKind) -> Self {
        self.failing_pass = Some(pass);
        self
    }

    fn check(&self, pass: PassKind) -> RendererResult<()> {
        if self.failing_pass == Some(pass) {
            return Err(RendererError::CommandFailed(format!(
                "recording into {pass} failed"
            )));
        }
        Ok(())
    }

    pub fn with_pickable(mut self, rect: vk::Rect2D, id: u64) -> Self {
        self.pickables.push((rect, id));
        self
    }

    pub fn renders(&self) -> Vec<(RenderStage, PassKind)> {
        self.calls
            .iter()
            .filter_map(|call| match *call {
                Call::Render { stage, pass, .. } => Some((stage, pass)),
                _ => None,
            })
            .collect()
    }
}

impl FrameListener<DummyBackend> for RecordingListener {
    fn on_render(
        &mut self,
        stage: RenderStage,
        pass: &PassContext<'_, DummyBackend>,
    ) -> RendererResult<()> {
        self.calls.push(Call::Render {
            stage,
            pass: pass.pass,
            slot: pass.slot,
            image: pass.image,
        });
        if stage == RenderStage::Picking {
            for &(rect, id) in &self.pickables {
                pass.backend.draw_id(pass.commands, rect, id);
            }
        }
        self.check(pass.pass)
    }

    fn on_overlay(&mut self, pass: &PassContext<'_, DummyBackend>) -> RendererResult<()> {
        self.calls.push(Call::Overlay { pass: pass.pass });
        self.check(pass.pass)
    }

    fn on_draw_ui(&mut self, pass: &PassContext<'_, DummyBackend>) -> RendererResult<()> {
        self.calls.push(Call::Ui { pass: pass.pass });
        self.check(pass.pass)
    }
}

/// Coordinator over a dummy swapchain with the given optional passes.
pub fn context_with(width: u32, height: u32, image_count: u32, passes: &[PassKind]) -> Context<DummyBackend> {
    let mut backend = DummyBackend::new(width, height, image_count);
    for &pass in passes {
        backend.enable_pass(pass);
    }
    Context::new(backend)
}

/// Frame input for a `width` x `height` framebuffer with the cursor at `cursor`.
pub fn input_at(width: u32, height: u32, cursor: Vec2) -> FrameInput {
    FrameInput {
        framebuffer_size: (width, height),
        cursor,
        resize_hint: false,
        camera: CameraUniform::default(),
    }
}

pub fn input(width: u32, height: u32) -> FrameInput {
    input_at(width, height, Vec2::ZERO)
}

pub fn rect(x: i32, y: i32, width: u32, height: u32) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x, y },
        extent: vk::Extent2D { width, height },
    }
}

/// Take the events the dummy backend logged so far.
pub fn take_events(context: &mut Context<DummyBackend>) -> Vec<DummyEvent> {
    context.backend_mut().take_events()
}

/// Pass lists of every submit in `events`.
pub fn submitted_passes(events: &[DummyEvent]) -> Vec<Vec<PassKind>> {
    events
        .iter()
        .filter_map(|event| match event {
            DummyEvent::Submitted { passes, .. } => Some(passes.clone()),
            _ => None,
        })
        .collect()
}

pub fn extent(context: &Context<DummyBackend>) -> vk::Extent2D {
    context.backend().extent()
}
