//! egui overlay drawn by the UI pass, using egui-ash-renderer.

use std::sync::Arc;

use ash::vk;
use egui_ash_renderer::{Options, Renderer};
use winit::event::WindowEvent;
use winit::window::Window;

use super::device::Device;
use super::VulkanBackend;
use crate::context::PassContext;
use crate::error::{RendererError, RendererResult};
use crate::frame::{ImageIndex, PerImage};
use crate::retire::RetirementQueue;

fn ui_error(e: egui_ash_renderer::RendererError) -> RendererError {
    RendererError::CommandFailed(format!("egui: {e}"))
}

/// egui context, input state and renderer for the UI pass.
///
/// Keeps the device alive through its own `Arc`, so it may outlive the
/// backend that created it.
pub struct EguiOverlay {
    ctx: egui::Context,
    winit_state: egui_winit::State,
    /// Renders into the UI pass. Owns the allocator it was created with.
    renderer: Renderer,
    paint_jobs: Vec<egui::ClippedPrimitive>,
    textures_delta: egui::TexturesDelta,
    pixels_per_point: f32,
    /// egui textures freed while an earlier frame may still sample them.
    retired_textures: RetirementQueue<egui::TextureId>,
    /// User texture of the viewport image for each swapchain image. egui
    /// only ever sees the first one.
    viewport_textures: PerImage<egui::TextureId>,
    device: Arc<Device>,
}

impl EguiOverlay {
    pub fn new(backend: &VulkanBackend, window: &Window) -> RendererResult<Self> {
        let ctx = egui::Context::default();
        let winit_state = egui_winit::State::new(
            ctx.clone(),
            egui::ViewportId::ROOT,
            window,
            Some(window.scale_factor() as f32),
            None,
        );

        let device = backend.device().clone();
        let renderer = Renderer::with_gpu_allocator(
            device.create_egui_allocator()?,
            device.raw().clone(),
            backend.ui_render_pass()?,
            Options {
                srgb_framebuffer: true,
                ..Default::default()
            },
        )
        .map_err(|e| RendererError::InitializationFailed(format!("egui renderer: {e}")))?;

        let mut overlay = Self {
            ctx,
            winit_state,
            renderer,
            paint_jobs: Vec::new(),
            textures_delta: egui::TexturesDelta::default(),
            pixels_per_point: window.scale_factor() as f32,
            retired_textures: RetirementQueue::new(),
            viewport_textures: PerImage::empty(),
            device,
        };
        overlay.set_image_count(backend);
        Ok(overlay)
    }

    /// Feed a window event to egui. Returns whether egui consumed it.
    pub fn on_window_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        self.winit_state.on_window_event(window, event).consumed
    }

    pub fn begin_frame(&mut self, window: &Window) {
        let raw_input = self.winit_state.take_egui_input(window);
        self.ctx.begin_frame(raw_input);
    }

    /// Tessellate the frame. Texture updates accumulate until the next draw.
    pub fn end_frame(&mut self, window: &Window) {
        let full_output = self.ctx.end_frame();
        self.winit_state
            .handle_platform_output(window, full_output.platform_output);

        self.pixels_per_point = full_output.pixels_per_point;
        self.paint_jobs = self
            .ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);
        self.textures_delta.append(full_output.textures_delta);
    }

    /// Record the last tessellated frame into the UI pass.
    pub fn draw(&mut self, pass: &PassContext<'_, VulkanBackend>) -> RendererResult<()> {
        // The fence of this slot was waited on before recording started.
        let released = self.retired_textures.release(pass.slot);
        if !released.is_empty() {
            self.renderer.free_textures(&released).map_err(ui_error)?;
        }

        let set = std::mem::take(&mut self.textures_delta.set);
        if !set.is_empty() {
            let pool = self.device.transfer_pool();
            self.renderer
                .set_textures(self.device.graphics_queue(), *pool, &set)
                .map_err(ui_error)?;
        }
        for id in std::mem::take(&mut self.textures_delta.free) {
            self.retired_textures.retire(pass.slot, id);
        }

        let remap = self.viewport_remap(pass.image);
        if let Some((canonical, target)) = remap {
            self.swap_texture_ids(canonical, target);
        }
        let drawn = self.renderer.cmd_draw(
            pass.commands,
            pass.extent,
            self.pixels_per_point,
            &self.paint_jobs,
        );
        if let Some((canonical, target)) = remap {
            self.swap_texture_ids(target, canonical);
        }
        drawn.map_err(ui_error)
    }

    fn viewport_remap(&self, image: ImageIndex) -> Option<(egui::TextureId, egui::TextureId)> {
        let canonical = *self.viewport_textures.get(ImageIndex::new(0))?;
        let target = *self.viewport_textures.get(image)?;
        (canonical != target).then_some((canonical, target))
    }

    fn swap_texture_ids(&mut self, from: egui::TextureId, to: egui::TextureId) {
        for job in &mut self.paint_jobs {
            if let egui::epaint::Primitive::Mesh(mesh) = &mut job.primitive {
                if mesh.texture_id == from {
                    mesh.texture_id = to;
                }
            }
        }
    }

    /// Register an image in SHADER_READ_ONLY as an egui user texture.
    pub fn add_texture(
        &mut self,
        backend: &VulkanBackend,
        sampler: vk::Sampler,
        view: vk::ImageView,
    ) -> RendererResult<egui::TextureId> {
        let set = backend.ui()?.add_texture(&self.device, sampler, view)?;
        Ok(self.renderer.add_user_texture(set))
    }

    /// Re-register the viewport images after the swapchain image count or
    /// size changed.
    pub fn set_image_count(&mut self, backend: &VulkanBackend) {
        for id in self.viewport_textures.drain() {
            self.renderer.remove_user_texture(id);
        }
        let textures: Vec<egui::TextureId> = backend
            .viewport_ui_sets()
            .iter()
            .map(|&set| self.renderer.add_user_texture(set))
            .collect();
        log::debug!("egui viewport textures: {}", textures.len());
        self.viewport_textures = PerImage::new(textures);
    }

    /// Texture to hand to `egui::Image` for the viewport panel.
    pub fn viewport_texture(&self) -> Option<egui::TextureId> {
        self.viewport_textures.get(ImageIndex::new(0)).copied()
    }

    pub fn context(&self) -> &egui::Context {
        &self.ctx
    }

    pub fn wants_pointer_input(&self) -> bool {
        self.ctx.wants_pointer_input()
    }

    pub fn wants_keyboard_input(&self) -> bool {
        self.ctx.wants_keyboard_input()
    }
}

impl Drop for EguiOverlay {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for the device before dropping egui: {e}");
        }
    }
}
