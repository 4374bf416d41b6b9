//! Vulkan implementation of [`FrameBackend`].
//!
//! [`VulkanBackend`] owns the device, the swapchain and every registry the
//! frame coordinator records against:
//!
//! ```text
//! Instance -> Device -> Swapchain
//!                    -> passes    Registry<PassKind, RenderPass>
//!                    -> pipelines Registry<PipelineKind, Pipeline>
//!                    -> uniforms  Registry<BufferKind, FrameUniforms<_>>
//!                    -> textures  TextureRegistry
//! ```
//!
//! Objects that are replaced between frames go through a
//! [`RetirementQueue`] and are destroyed once the fence of the frame that last
//! used them has been waited on.

mod buffer;
mod debug;
mod device;
mod garbage;
mod instance;
mod memory;
mod mesh;
mod overlay;
mod picking;
mod pipeline;
mod render_pass;
mod shader;
mod swapchain;
mod target;
mod texture;
mod ui;
mod viewport;

pub use buffer::FrameUniforms;
pub use device::{Device, ImageBarrier, QueueFamilyIndices, SamplerDesc, SingleTimeCommands};
pub use garbage::GpuGarbage;
pub use instance::Instance;
pub use memory::{Attachment, GpuBuffer, GpuImage, ImageDesc};
pub use mesh::{cube, validate_mesh, GpuMesh};
pub use overlay::EguiOverlay;
pub use picking::PickingTarget;
pub use pipeline::{default_pipeline_descs, DescriptorLayouts, Pipeline, PipelineDesc};
pub use render_pass::{RenderPass, PICKING_FORMAT, VIEWPORT_FORMAT};
pub use shader::compile_wgsl;
pub use swapchain::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format, Swapchain,
    SwapchainState, PREFERRED_SURFACE_FORMAT,
};
pub use texture::{Texture, TextureHandle, TextureRegistry};
pub use ui::UiPass;
pub use viewport::ViewportTarget;

use std::sync::Arc;

use ash::vk;

use crate::backend::{AcquireOutcome, FrameBackend, PresentOutcome};
use crate::config::RendererConfig;
use crate::error::{vk_error, RendererError, RendererResult};
use crate::frame::{FrameSlot, ImageIndex, PerFrame, PerImage, CONCURRENTLY_RENDERED_FRAMES};
use crate::registry::{BufferKind, PassKind, PipelineKind, Registry};
use crate::retire::RetirementQueue;
use crate::uniforms::{CameraUniform, ObjectPushConstants};

use pipeline::{
    allocate_descriptor_sets, create_descriptor_pool, picking_pipeline_desc, write_uniform_set,
};
use render_pass::{
    create_framebuffers, create_render_pass, scene_attachments, scene_clear_values,
    swapchain_final_layout, ui_attachment,
};

/// Clear color of the scene passes.
pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.1, 0.1, 0.15, 1.0];

/// Camera and texture sets that can be allocated at once.
const MAX_DESCRIPTOR_SETS: u32 = 256;

/// Depth and, with MSAA, the multisampled color target of the swapchain pass.
struct SceneAttachments {
    depth: Attachment,
    color: Option<Attachment>,
}

impl SceneAttachments {
    fn new(
        device: &Device,
        extent: vk::Extent2D,
        color_format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> RendererResult<Self> {
        let depth = device.create_attachment(
            "scene depth",
            &ImageDesc::new(
                extent,
                device.depth_format(),
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            )
            .samples(samples),
            vk::ImageAspectFlags::DEPTH,
        )?;
        if samples == vk::SampleCountFlags::TYPE_1 {
            return Ok(Self { depth, color: None });
        }

        let color = device.create_attachment(
            "scene msaa color",
            &ImageDesc::new(
                extent,
                color_format,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
            )
            .samples(samples),
            vk::ImageAspectFlags::COLOR,
        );
        match color {
            Ok(color) => Ok(Self {
                depth,
                color: Some(color),
            }),
            Err(e) => {
                device.destroy_attachment(depth);
                Err(e)
            }
        }
    }

    /// Attachment lists matching [`scene_attachments`] for each swapchain view.
    fn framebuffer_views(
        &self,
        swapchain_views: &PerImage<vk::ImageView>,
    ) -> PerImage<Vec<vk::ImageView>> {
        swapchain_views
            .iter()
            .map(|&view| match &self.color {
                Some(msaa) => vec![msaa.view, self.depth.view, view],
                None => vec![view, self.depth.view],
            })
            .collect()
    }

    fn into_garbage(self) -> Vec<GpuGarbage> {
        let mut garbage = vec![GpuGarbage::Attachment(self.depth)];
        garbage.extend(self.color.map(GpuGarbage::Attachment));
        garbage
    }
}

/// The Vulkan renderer backend.
pub struct VulkanBackend {
    device: Arc<Device>,
    swapchain: Swapchain,
    scene: Option<SceneAttachments>,
    passes: Registry<PassKind, RenderPass>,
    pipelines: Registry<PipelineKind, Pipeline>,
    uniforms: Registry<BufferKind, FrameUniforms<CameraUniform>>,
    layouts: DescriptorLayouts,
    descriptor_pool: vk::DescriptorPool,
    camera_sets: PerFrame<vk::DescriptorSet>,
    textures: TextureRegistry,
    /// Removed textures whose `Arc` is still held elsewhere.
    shared_textures: Vec<Arc<Texture>>,
    default_texture: Option<TextureHandle>,
    picking: Option<PickingTarget>,
    viewport: Option<ViewportTarget>,
    ui: Option<UiPass>,
    viewport_ui_sets: PerImage<vk::DescriptorSet>,
    garbage: RetirementQueue<GpuGarbage>,
    frame_image: Option<ImageIndex>,
    last_submitted: Option<(FrameSlot, ImageIndex)>,
    clear_color: vk::ClearColorValue,
}

impl VulkanBackend {
    /// Create the instance, device, swapchain and the passes enabled in
    /// `config`.
    pub fn new(window: &winit::window::Window, config: &RendererConfig) -> RendererResult<Self> {
        config.validate()?;

        let instance = Arc::new(Instance::new(window, config)?);
        let device = Arc::new(Device::new(instance, config.msaa_samples)?);
        let size = window.inner_size();
        let swapchain = Swapchain::new(device.clone(), (size.width, size.height), config.vsync)?;

        let layouts = DescriptorLayouts::new(&device)?;
        let descriptor_pool = match create_descriptor_pool(&device, MAX_DESCRIPTOR_SETS) {
            Ok(pool) => pool,
            Err(e) => {
                layouts.destroy(&device);
                return Err(e);
            }
        };

        // From here on Drop releases whatever was created if a step fails.
        let mut backend = Self {
            device,
            swapchain,
            scene: None,
            passes: Registry::new(),
            pipelines: Registry::new(),
            uniforms: Registry::new(),
            layouts,
            descriptor_pool,
            camera_sets: PerFrame::from_fn(|_| vk::DescriptorSet::null()),
            textures: TextureRegistry::new(),
            shared_textures: Vec::new(),
            default_texture: None,
            picking: None,
            viewport: None,
            ui: None,
            viewport_ui_sets: PerImage::empty(),
            garbage: RetirementQueue::new(),
            frame_image: None,
            last_submitted: None,
            clear_color: vk::ClearColorValue {
                float32: DEFAULT_CLEAR_COLOR,
            },
        };

        backend.create_swapchain_pass()?;
        backend.create_camera_uniforms()?;
        let white = backend.register_texture("white", 1, 1, &[255; 4])?;
        backend.default_texture = Some(white);
        for desc in default_pipeline_descs(PassKind::Swapchain, false) {
            backend.register_pipeline(&desc)?;
        }

        if config.picking {
            backend.enable_picking()?;
        }
        if config.ui {
            backend.enable_ui()?;
        }
        if config.viewport {
            backend.enable_viewport()?;
        }

        log::info!(
            "Vulkan backend ready: passes {:?}, pipelines {:?}",
            backend.passes,
            backend.pipelines
        );
        Ok(backend)
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Pass the scene pipelines draw into: the viewport once enabled, else
    /// the swapchain.
    pub fn main_pass(&self) -> PassKind {
        if self.passes.contains(PassKind::Viewport) {
            PassKind::Viewport
        } else {
            PassKind::Swapchain
        }
    }

    pub fn pipeline(&self, kind: PipelineKind) -> RendererResult<&Pipeline> {
        self.pipelines.require(kind)
    }

    pub fn camera_descriptor(&self, slot: FrameSlot) -> vk::DescriptorSet {
        self.camera_sets[slot]
    }

    pub fn ui(&self) -> RendererResult<&UiPass> {
        self.ui
            .as_ref()
            .ok_or_else(|| RendererError::MissingResource(PassKind::Ui.to_string()))
    }

    /// Native render pass egui draws into.
    pub fn ui_render_pass(&self) -> RendererResult<vk::RenderPass> {
        self.passes.require(PassKind::Ui).map(RenderPass::raw)
    }

    /// UI descriptor sets sampling the viewport image of each swapchain image.
    pub fn viewport_ui_sets(&self) -> &PerImage<vk::DescriptorSet> {
        &self.viewport_ui_sets
    }

    pub fn viewport(&self) -> Option<&ViewportTarget> {
        self.viewport.as_ref()
    }

    /// Hand GPU objects over for destruction once the last submitted frame
    /// completed. Before the first submit, and right after a recreation, nothing
    /// can be in flight.
    pub fn retire(&mut self, garbage: impl IntoIterator<Item = GpuGarbage>) {
        match self.last_submitted {
            Some((slot, _)) => {
                for item in garbage {
                    self.garbage.retire(slot, item);
                }
            }
            None => self.destroy_now(garbage),
        }
    }

    fn destroy_now(&self, garbage: impl IntoIterator<Item = GpuGarbage>) {
        for item in garbage {
            item.destroy(&self.device);
        }
    }

    fn create_swapchain_pass(&mut self) -> RendererResult<()> {
        let samples = self.device.samples();
        let scene = SceneAttachments::new(
            &self.device,
            self.swapchain.extent(),
            self.swapchain.format(),
            samples,
        )?;
        let views = scene.framebuffer_views(self.swapchain.views());
        self.scene = Some(scene);

        let attachments = scene_attachments(
            self.swapchain.format(),
            self.device.depth_format(),
            samples,
            swapchain_final_layout(self.ui.is_some()),
        );
        let clear_values = scene_clear_values(self.clear_color, samples != vk::SampleCountFlags::TYPE_1);
        self.add_pass(PassKind::Swapchain, &attachments, false, samples, clear_values, &views)
    }

    /// Build a render pass with framebuffers over `views` and register it.
    fn add_pass(
        &mut self,
        kind: PassKind,
        attachments: &[vk::AttachmentDescription],
        sampled_after: bool,
        samples: vk::SampleCountFlags,
        clear_values: Vec<vk::ClearValue>,
        views: &PerImage<Vec<vk::ImageView>>,
    ) -> RendererResult<()> {
        let render_pass = create_render_pass(&self.device, attachments, sampled_after)?;
        let mut pass = match RenderPass::new(&self.device, kind, render_pass, samples, clear_values)
        {
            Ok(pass) => pass,
            Err(e) => {
                unsafe { self.device.raw().destroy_render_pass(render_pass, None) };
                return Err(e);
            }
        };
        match create_framebuffers(&self.device, render_pass, self.swapchain.extent(), views) {
            Ok(framebuffers) => {
                pass.set_framebuffers(framebuffers);
            }
            Err(e) => {
                self.destroy_now(pass.into_garbage());
                return Err(e);
            }
        }

        if let Err(pass) = self.passes.insert(kind, pass) {
            self.destroy_now(pass.into_garbage());
        }
        Ok(())
    }

    fn create_camera_uniforms(&mut self) -> RendererResult<()> {
        let uniforms = FrameUniforms::<CameraUniform>::new(&self.device, "camera")?;
        let sets = match allocate_descriptor_sets(
            &self.device,
            self.descriptor_pool,
            self.layouts.camera,
            CONCURRENTLY_RENDERED_FRAMES,
        ) {
            Ok(sets) => sets,
            Err(e) => {
                self.destroy_now(uniforms.into_garbage());
                return Err(e);
            }
        };
        for slot in FrameSlot::all() {
            write_uniform_set(
                &self.device,
                sets[slot.index()],
                uniforms.buffer(slot),
                uniforms.size(),
            );
        }
        self.camera_sets = PerFrame::from_fn(|slot| sets[slot.index()]);

        if let Err(uniforms) = self.uniforms.insert(BufferKind::Camera, uniforms) {
            self.destroy_now(uniforms.into_garbage());
        }
        Ok(())
    }

    fn build_pipeline(&self, desc: &PipelineDesc) -> RendererResult<Pipeline> {
        let pass = self.passes.require(desc.pass)?;
        Pipeline::new(&self.device, desc, pass.raw(), pass.samples(), &self.layouts)
    }

    /// Build and insert a pipeline. An existing pipeline of the same kind is
    /// kept and the new one discarded.
    pub fn register_pipeline(&mut self, desc: &PipelineDesc) -> RendererResult<()> {
        let pipeline = self.build_pipeline(desc)?;
        if let Err(pipeline) = self.pipelines.insert(desc.kind, pipeline) {
            self.destroy_now([pipeline.into_garbage()]);
        }
        Ok(())
    }

    /// Build a pipeline and swap it in, retiring the previous one.
    pub fn rebuild_pipeline(&mut self, desc: &PipelineDesc) -> RendererResult<()> {
        let pipeline = self.build_pipeline(desc)?;
        if let Some(old) = self.pipelines.replace(desc.kind, pipeline) {
            self.retire([old.into_garbage()]);
        }
        Ok(())
    }

    pub fn remove_pipeline(&mut self, kind: PipelineKind) -> bool {
        match self.pipelines.remove(kind) {
            Some(pipeline) => {
                self.retire([pipeline.into_garbage()]);
                true
            }
            None => false,
        }
    }

    /// Create the picking target, pass and pipeline.
    pub fn enable_picking(&mut self) -> RendererResult<()> {
        if self.picking.is_some() {
            log::warn!("Picking is already enabled");
            return Ok(());
        }
        let target = PickingTarget::new(
            &self.device,
            self.swapchain.extent(),
            self.swapchain.image_count(),
        )?;
        let views = target.framebuffer_views();
        self.picking = Some(target);

        let attachments = scene_attachments(
            PICKING_FORMAT,
            self.device.depth_format(),
            vk::SampleCountFlags::TYPE_1,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        self.add_pass(
            PassKind::Picking,
            &attachments,
            true,
            vk::SampleCountFlags::TYPE_1,
            scene_clear_values(picking::picking_clear_color(), false),
            &views,
        )?;
        self.register_pipeline(&picking_pipeline_desc())?;
        log::info!("Picking enabled");
        Ok(())
    }

    /// Render the scene off-screen for display in the UI. The scene
    /// pipelines are rebuilt against the viewport pass.
    pub fn enable_viewport(&mut self) -> RendererResult<()> {
        if self.viewport.is_some() {
            log::warn!("Viewport is already enabled");
            return Ok(());
        }
        let target = ViewportTarget::new(
            &self.device,
            self.swapchain.extent(),
            self.swapchain.image_count(),
        )?;
        let views = target.framebuffer_views();
        self.viewport = Some(target);

        let attachments = scene_attachments(
            VIEWPORT_FORMAT,
            self.device.depth_format(),
            vk::SampleCountFlags::TYPE_1,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        self.add_pass(
            PassKind::Viewport,
            &attachments,
            true,
            vk::SampleCountFlags::TYPE_1,
            scene_clear_values(self.clear_color, false),
            &views,
        )?;

        for desc in default_pipeline_descs(PassKind::Viewport, false) {
            self.rebuild_pipeline(&desc)?;
        }
        self.rebuild_viewport_ui_sets()?;
        log::info!("Viewport enabled");
        Ok(())
    }

    /// Create the UI pass. The swapchain pass stops presenting and leaves its
    /// image to the UI pass.
    pub fn enable_ui(&mut self) -> RendererResult<()> {
        if self.ui.is_some() {
            log::warn!("UI is already enabled");
            return Ok(());
        }
        self.ui = Some(UiPass::new(&self.device)?);

        let format = self.swapchain.format();
        let views: PerImage<Vec<vk::ImageView>> =
            self.swapchain.views().iter().map(|&view| vec![view]).collect();
        self.add_pass(
            PassKind::Ui,
            &[ui_attachment(format)],
            false,
            vk::SampleCountFlags::TYPE_1,
            Vec::new(),
            &views,
        )?;

        // Differs only in the final layout, so framebuffers and pipelines
        // built for the old pass stay compatible.
        let attachments = scene_attachments(
            format,
            self.device.depth_format(),
            self.device.samples(),
            swapchain_final_layout(true),
        );
        let render_pass = create_render_pass(&self.device, &attachments, false)?;
        let old = self
            .passes
            .require_mut(PassKind::Swapchain)?
            .replace_render_pass(render_pass);
        self.retire([old]);

        self.rebuild_viewport_ui_sets()?;
        log::info!("UI enabled");
        Ok(())
    }

    fn rebuild_viewport_ui_sets(&mut self) -> RendererResult<()> {
        let mut old = std::mem::take(&mut self.viewport_ui_sets);
        let garbage = match (&self.ui, &self.viewport) {
            (Some(ui), Some(viewport)) => {
                let sampler = viewport.sampler();
                let sets = viewport
                    .views()
                    .iter()
                    .map(|&view| ui.add_texture(&self.device, sampler, view))
                    .collect::<RendererResult<Vec<_>>>()?;
                self.viewport_ui_sets = PerImage::new(sets);
                (!old.is_empty()).then(|| ui.free_textures(old.drain().collect()))
            }
            _ => None,
        };
        self.retire(garbage);
        Ok(())
    }

    /// Upload an RGBA8 texture and register it.
    pub fn register_texture(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> RendererResult<TextureHandle> {
        let texture = Texture::from_rgba8(
            &self.device,
            name,
            width,
            height,
            pixels,
            self.descriptor_pool,
            self.layouts.texture,
        )?;
        Ok(self.textures.insert(texture))
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<Arc<Texture>> {
        self.textures.get(handle).cloned()
    }

    /// Unregister a texture. It is destroyed after the frames using it and
    /// after every outside `Arc` is dropped.
    pub fn remove_texture(&mut self, handle: TextureHandle) -> bool {
        if Some(handle) == self.default_texture {
            log::warn!("The default texture cannot be removed");
            return false;
        }
        match self.textures.remove(handle) {
            Some(texture) => {
                self.retire_texture(texture);
                true
            }
            None => false,
        }
    }

    fn retire_texture(&mut self, texture: Arc<Texture>) {
        match Arc::try_unwrap(texture) {
            Ok(texture) => self.retire(texture.into_garbage()),
            Err(shared) => self.shared_textures.push(shared),
        }
    }

    /// Upload a mesh to device-local memory. Blocks until the copy finished.
    pub fn upload_mesh(
        &self,
        vertices: &[crate::uniforms::Vertex],
        indices: &[u32],
    ) -> RendererResult<GpuMesh> {
        GpuMesh::upload(&self.device, vertices, indices)
    }

    /// Release a mesh once no submitted frame uses it.
    pub fn destroy_mesh(&mut self, mesh: GpuMesh) {
        self.retire(mesh.into_garbage());
    }

    /// Bind a pipeline with the camera set of `slot` and, for textured
    /// pipelines, the default texture.
    pub fn bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        kind: PipelineKind,
        slot: FrameSlot,
    ) -> RendererResult<&Pipeline> {
        let pipeline = self.pipelines.require(kind)?;
        unsafe {
            self.device
                .raw()
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.raw());
            self.device.raw().cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout(),
                0,
                &[self.camera_sets[slot]],
                &[],
            );
        }
        if pipeline.is_textured() {
            self.bind_texture(cmd, pipeline, None)?;
        }
        Ok(pipeline)
    }

    /// Bind `texture`, or the default texture, at set 1.
    pub fn bind_texture(
        &self,
        cmd: vk::CommandBuffer,
        pipeline: &Pipeline,
        texture: Option<TextureHandle>,
    ) -> RendererResult<()> {
        if !pipeline.is_textured() {
            return Err(RendererError::InvalidParameter(format!(
                "{} pipeline has no texture set",
                pipeline.kind()
            )));
        }
        let handle = texture.or(self.default_texture).ok_or_else(|| {
            RendererError::MissingResource("default texture".to_string())
        })?;
        let texture = self.textures.require(handle)?;
        unsafe {
            self.device.raw().cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout(),
                1,
                &[texture.descriptor_set()],
                &[],
            );
        }
        Ok(())
    }

    /// Draw `mesh` with the bound `pipeline`.
    pub fn draw_mesh(
        &self,
        cmd: vk::CommandBuffer,
        pipeline: &Pipeline,
        mesh: &GpuMesh,
        constants: &ObjectPushConstants,
    ) {
        mesh.draw(&self.device, cmd, pipeline.layout(), constants);
    }

    /// Draw the skybox around the camera using a cube mesh.
    pub fn draw_skybox(
        &self,
        cmd: vk::CommandBuffer,
        slot: FrameSlot,
        cube: &GpuMesh,
    ) -> RendererResult<()> {
        let pipeline = self.bind_pipeline(cmd, PipelineKind::Skybox, slot)?;
        cube.draw(
            &self.device,
            cmd,
            pipeline.layout(),
            &ObjectPushConstants::new(glam::Mat4::IDENTITY, 0),
        );
        Ok(())
    }

    /// Draw the ground grid. It has no vertex buffer.
    pub fn draw_grid(&self, cmd: vk::CommandBuffer, slot: FrameSlot) -> RendererResult<()> {
        self.bind_pipeline(cmd, PipelineKind::Grid, slot)?;
        unsafe { self.device.raw().cmd_draw(cmd, 6, 1, 0, 0) };
        Ok(())
    }

    fn release_shared_textures(&mut self) {
        let (unique, shared): (Vec<_>, Vec<_>) = std::mem::take(&mut self.shared_textures)
            .into_iter()
            .partition(|texture| Arc::strong_count(texture) == 1);
        self.shared_textures = shared;
        for texture in unique {
            self.retire_texture(texture);
        }
    }

    /// Rebuild every attachment and framebuffer sized by the swapchain. The
    /// device is idle, so replaced objects go straight into `garbage`.
    fn rebuild_swapchain_resources(&mut self, garbage: &mut Vec<GpuGarbage>) -> RendererResult<()> {
        let extent = self.swapchain.extent();
        let image_count = self.swapchain.image_count();

        garbage.extend(self.scene.take().into_iter().flat_map(SceneAttachments::into_garbage));
        let scene = SceneAttachments::new(
            &self.device,
            extent,
            self.swapchain.format(),
            self.device.samples(),
        )?;
        let views = scene.framebuffer_views(self.swapchain.views());
        self.scene = Some(scene);
        self.rebuild_framebuffers(PassKind::Swapchain, &views, garbage)?;

        if self.passes.contains(PassKind::Ui) {
            let views: PerImage<Vec<vk::ImageView>> =
                self.swapchain.views().iter().map(|&view| vec![view]).collect();
            self.rebuild_framebuffers(PassKind::Ui, &views, garbage)?;
        }

        if let Some(picking) = self.picking.take() {
            garbage.extend(picking.into_garbage());
            let picking = PickingTarget::new(&self.device, extent, image_count)?;
            let views = picking.framebuffer_views();
            self.picking = Some(picking);
            self.rebuild_framebuffers(PassKind::Picking, &views, garbage)?;
        }

        if let Some(viewport) = self.viewport.as_mut() {
            garbage.extend(viewport.rebuild(&self.device, extent, image_count)?);
            let views = viewport.framebuffer_views();
            self.rebuild_framebuffers(PassKind::Viewport, &views, garbage)?;
        }

        self.rebuild_viewport_ui_sets()
    }

    fn rebuild_framebuffers(
        &mut self,
        kind: PassKind,
        views: &PerImage<Vec<vk::ImageView>>,
        garbage: &mut Vec<GpuGarbage>,
    ) -> RendererResult<()> {
        let extent = self.swapchain.extent();
        let pass = self.passes.require_mut(kind)?;
        let framebuffers = create_framebuffers(&self.device, pass.raw(), extent, views)?;
        garbage.extend(pass.set_framebuffers(framebuffers));
        Ok(())
    }
}

impl FrameBackend for VulkanBackend {
    type Commands = vk::CommandBuffer;

    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    fn frames_in_flight(&self) -> usize {
        self.swapchain.sync_count()
    }

    fn has_pass(&self, pass: PassKind) -> bool {
        self.passes.contains(pass)
    }

    fn wait_for_frame(&mut self, slot: FrameSlot) -> RendererResult<()> {
        self.swapchain.wait_for_fence(slot)?;
        let released = self.garbage.release(slot);
        if !released.is_empty() {
            log::trace!("Destroying {} retired objects of {slot}", released.len());
        }
        self.destroy_now(released);
        self.release_shared_textures();
        Ok(())
    }

    fn write_camera(&mut self, slot: FrameSlot, camera: &CameraUniform) -> RendererResult<()> {
        self.uniforms
            .require_mut(BufferKind::Camera)?
            .write(slot, camera)
    }

    fn acquire_image(&mut self, slot: FrameSlot) -> RendererResult<AcquireOutcome> {
        self.swapchain.acquire(slot)
    }

    fn reset_frame_fence(&mut self, slot: FrameSlot) -> RendererResult<()> {
        self.swapchain.reset_fence(slot)
    }

    fn begin_pass(
        &mut self,
        pass: PassKind,
        slot: FrameSlot,
        image: ImageIndex,
        scissor: vk::Rect2D,
    ) -> RendererResult<vk::CommandBuffer> {
        let extent = self.swapchain.extent();
        let cmd = self
            .passes
            .require_mut(pass)?
            .begin(&self.device, slot, image, extent, scissor)?;
        self.frame_image = Some(image);
        Ok(cmd)
    }

    fn end_pass(&mut self, pass: PassKind, slot: FrameSlot) -> RendererResult<()> {
        self.passes.require_mut(pass)?.end(&self.device, slot)
    }

    fn submit(&mut self, slot: FrameSlot, passes: &[PassKind]) -> RendererResult<()> {
        let image = self.frame_image.take().ok_or_else(|| {
            RendererError::InvalidParameter(format!("nothing was recorded for {slot}"))
        })?;
        let command_buffers = passes
            .iter()
            .map(|&kind| self.passes.require(kind).map(|pass| pass.command_buffer(slot)))
            .collect::<RendererResult<Vec<_>>>()?;

        let sync = self.swapchain.sync(slot);
        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.raw().queue_submit(
                self.device.graphics_queue(),
                &[submit_info],
                sync.in_flight,
            )
        }
        .map_err(vk_error("submit frame"))?;

        self.last_submitted = Some((slot, image));
        Ok(())
    }

    fn present(&mut self, slot: FrameSlot, image: ImageIndex) -> RendererResult<PresentOutcome> {
        self.swapchain.present(slot, image)
    }

    fn recreate_swapchain(
        &mut self,
        framebuffer_size: (u32, u32),
    ) -> RendererResult<vk::Extent2D> {
        let extent = self.swapchain.recreate(framebuffer_size)?;
        // The new picking images hold nothing rendered yet.
        self.last_submitted = None;
        let mut garbage = Vec::new();
        let result = self.rebuild_swapchain_resources(&mut garbage);
        self.destroy_now(garbage);
        result.map(|()| extent)
    }

    fn read_picking_texel(&mut self, x: u32, y: u32) -> RendererResult<[u32; 2]> {
        let picking = self
            .picking
            .as_ref()
            .ok_or_else(|| RendererError::MissingResource(PassKind::Picking.to_string()))?;
        let (slot, image) = self.last_submitted.ok_or_else(|| {
            RendererError::MissingResource("no frame has been rendered yet".to_string())
        })?;
        self.swapchain.wait_for_fence(slot)?;
        picking.read_texel(&self.device, image, x, y)
    }

    fn wait_idle(&mut self) -> RendererResult<()> {
        self.device.wait_idle()?;
        let pending = self.garbage.drain();
        self.destroy_now(pending);
        Ok(())
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for the device before teardown: {e}");
        }

        let mut garbage = self.garbage.drain();
        garbage.extend(self.passes.drain().flat_map(|(_, pass)| pass.into_garbage()));
        garbage.extend(
            self.pipelines
                .drain()
                .map(|(_, pipeline)| pipeline.into_garbage()),
        );
        garbage.extend(
            self.uniforms
                .drain()
                .flat_map(|(_, uniforms)| uniforms.into_garbage()),
        );
        garbage.extend(self.picking.take().into_iter().flat_map(PickingTarget::into_garbage));
        garbage.extend(self.viewport.take().into_iter().flat_map(ViewportTarget::into_garbage));
        garbage.extend(self.scene.take().into_iter().flat_map(SceneAttachments::into_garbage));

        let textures: Vec<Arc<Texture>> = self
            .textures
            .drain()
            .map(|(_, texture)| texture)
            .chain(self.shared_textures.drain(..))
            .collect();
        for texture in textures {
            match Arc::try_unwrap(texture) {
                Ok(texture) => garbage.extend(texture.into_garbage()),
                Err(_) => log::warn!("Texture still shared at teardown, leaking it"),
            }
        }

        // Descriptor sets go away with their pools below.
        for item in garbage {
            if !matches!(item, GpuGarbage::DescriptorSets { .. }) {
                item.destroy(&self.device);
            }
        }

        if let Some(ui) = self.ui.take() {
            ui.destroy(&self.device);
        }
        unsafe {
            self.device
                .raw()
                .destroy_descriptor_pool(self.descriptor_pool, None);
        }
        self.layouts.destroy(&self.device);
        log::info!("Vulkan backend destroyed");
    }
}
