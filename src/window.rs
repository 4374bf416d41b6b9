//! Window management using winit

use std::sync::Arc;

use glam::Vec2;
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, MouseButton, WindowEvent},
    event_loop::EventLoop,
    window::{Window as WinitWindow, WindowBuilder},
};

use crate::context::FrameInput;
use crate::error::{RendererError, RendererResult};
use crate::uniforms::CameraUniform;

/// Wrapper around winit window tracking what the frame coordinator consumes
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    resized: bool,
    close_requested: bool,
    cursor: Vec2,
    click: Option<Vec2>,
}

impl Window {
    /// Create a new window with the given title and dimensions
    pub fn new(event_loop: &EventLoop<()>, title: &str, width: u32, height: u32) -> RendererResult<Self> {
        let window = WindowBuilder::new()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .build(event_loop)
            .map_err(|e| RendererError::InitializationFailed(format!("failed to create window: {e}")))?;
        let size = window.inner_size();

        Ok(Self {
            window: Arc::new(window),
            width: size.width,
            height: size.height,
            resized: false,
            close_requested: false,
            cursor: Vec2::ZERO,
            click: None,
        })
    }

    /// Get the raw window for backend initialization
    pub fn window(&self) -> &WinitWindow {
        &self.window
    }

    /// Get arc reference to window
    pub fn window_arc(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    /// Current framebuffer size in physical pixels
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Check if window was resized since the resize flag was last cleared
    pub fn was_resized(&self) -> bool {
        self.resized
    }

    /// Clear the resize flag
    pub fn clear_resize_flag(&mut self) {
        self.resized = false;
    }

    /// Check if close was requested
    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    /// Cursor position in window pixels
    pub fn cursor(&self) -> Vec2 {
        self.cursor
    }

    /// Take the position of the last left click, if any
    pub fn take_click(&mut self) -> Option<Vec2> {
        self.click.take()
    }

    /// Handle window events
    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                self.resized = true;
            }
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = Vec2::new(position.x as f32, position.y as f32);
            }
            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button: MouseButton::Left,
                ..
            } => {
                self.click = Some(self.cursor);
            }
            _ => {}
        }
    }

    /// Snapshot of window state for one frame
    pub fn frame_input(&self, camera: CameraUniform) -> FrameInput {
        FrameInput {
            framebuffer_size: (self.width, self.height),
            cursor: self.cursor,
            resize_hint: self.resized,
            camera,
        }
    }

    /// Request a redraw
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}
