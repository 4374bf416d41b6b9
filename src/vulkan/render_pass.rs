//! Render passes with their command buffers and framebuffers.
//!
//! Each registered pass owns one command pool, one command buffer per frame
//! slot and one framebuffer per swapchain image. Recording always follows the
//! same template: reset, begin, begin the render pass with the pass clear
//! values, set viewport and scissor, hand over to callbacks, then end both.

use ash::vk;

use super::device::Device;
use super::garbage::GpuGarbage;
use crate::error::{creation_error, vk_error, RendererError, RendererResult};
use crate::frame::{FrameSlot, ImageIndex, PerFrame, PerImage};
use crate::registry::PassKind;

/// Color format of the picking target, one 32-bit half of the id per channel.
pub const PICKING_FORMAT: vk::Format = vk::Format::R32G32_UINT;

/// Color format of the off-screen viewport target.
pub const VIEWPORT_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Attachments of a scene pass: color, depth and, when multisampled, a
/// single-sampled resolve target. The last color target ends in `final_layout`.
pub fn scene_attachments(
    color_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
    final_layout: vk::ImageLayout,
) -> Vec<vk::AttachmentDescription> {
    let multisampled = samples != vk::SampleCountFlags::TYPE_1;

    let color = vk::AttachmentDescription::default()
        .format(color_format)
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(if multisampled {
            vk::AttachmentStoreOp::DONT_CARE
        } else {
            vk::AttachmentStoreOp::STORE
        })
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(if multisampled {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            final_layout
        });

    let depth = vk::AttachmentDescription::default()
        .format(depth_format)
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let mut attachments = vec![color, depth];
    if multisampled {
        attachments.push(
            vk::AttachmentDescription::default()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::DONT_CARE)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(final_layout),
        );
    }
    attachments
}

/// Attachment of the UI pass: loads what earlier passes drew and presents.
pub fn ui_attachment(color_format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::LOAD)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
}

/// Final layout of the swapchain pass: the UI pass presents when it exists.
pub fn swapchain_final_layout(has_ui: bool) -> vk::ImageLayout {
    if has_ui {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    } else {
        vk::ImageLayout::PRESENT_SRC_KHR
    }
}

/// Clear values matching [`scene_attachments`].
pub fn scene_clear_values(color: vk::ClearColorValue, multisampled: bool) -> Vec<vk::ClearValue> {
    let mut values = vec![
        vk::ClearValue { color },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ];
    if multisampled {
        values.push(vk::ClearValue { color });
    }
    values
}

/// Build a single-subpass render pass over `attachments`. Attachment 0 is
/// color, 1 is depth (if present), 2 is the resolve target (if present).
///
/// `sampled_after` adds a dependency making the color output visible to
/// fragment shaders and transfers of later command buffers.
pub fn create_render_pass(
    device: &Device,
    attachments: &[vk::AttachmentDescription],
    sampled_after: bool,
) -> RendererResult<vk::RenderPass> {
    let color_ref = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let resolve_ref = [vk::AttachmentReference {
        attachment: 2,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_ref);
    if attachments.len() > 1 {
        subpass = subpass.depth_stencil_attachment(&depth_ref);
    }
    if attachments.len() > 2 {
        subpass = subpass.resolve_attachments(&resolve_ref);
    }

    let mut dependencies = vec![
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            )
            .dst_stage_mask(
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            )
            .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .dst_access_mask(
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            ),
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::COLOR_ATTACHMENT_READ,
            ),
    ];
    if sampled_after {
        dependencies.push(
            vk::SubpassDependency::default()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(
                    vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::TRANSFER,
                )
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::TRANSFER_READ),
        );
    }

    let subpasses = [subpass];
    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.raw().create_render_pass(&create_info, None) }
        .map_err(creation_error("render pass"))
}

/// Create one framebuffer per image from the per-image attachment lists.
pub fn create_framebuffers(
    device: &Device,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    attachments: &PerImage<Vec<vk::ImageView>>,
) -> RendererResult<PerImage<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(attachments.len());
    for views in attachments.iter() {
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        match unsafe { device.raw().create_framebuffer(&create_info, None) } {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(e) => {
                for framebuffer in framebuffers {
                    unsafe { device.raw().destroy_framebuffer(framebuffer, None) };
                }
                return Err(creation_error("framebuffer")(e));
            }
        }
    }
    Ok(PerImage::new(framebuffers))
}

/// A registered render pass and the objects recorded against it.
pub struct RenderPass {
    kind: PassKind,
    render_pass: vk::RenderPass,
    command_pool: vk::CommandPool,
    command_buffers: PerFrame<vk::CommandBuffer>,
    framebuffers: PerImage<vk::Framebuffer>,
    samples: vk::SampleCountFlags,
    clear_values: Vec<vk::ClearValue>,
    recording: Option<FrameSlot>,
}

impl RenderPass {
    /// Wrap `render_pass` and allocate its command pool and per-slot command
    /// buffers. Framebuffers are attached with [`Self::set_framebuffers`].
    pub fn new(
        device: &Device,
        kind: PassKind,
        render_pass: vk::RenderPass,
        samples: vk::SampleCountFlags,
        clear_values: Vec<vk::ClearValue>,
    ) -> RendererResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_families().graphics)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.raw().create_command_pool(&pool_info, None) }
            .map_err(creation_error("command pool"))?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(crate::frame::CONCURRENTLY_RENDERED_FRAMES as u32);
        let buffers = match unsafe { device.raw().allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { device.raw().destroy_command_pool(command_pool, None) };
                return Err(creation_error("command buffers")(e));
            }
        };
        let command_buffers = PerFrame::from_fn(|slot| buffers[slot.index()]);

        log::info!("Created {kind} render pass ({samples:?})");
        Ok(Self {
            kind,
            render_pass,
            command_pool,
            command_buffers,
            framebuffers: PerImage::empty(),
            samples,
            clear_values,
            recording: None,
        })
    }

    pub fn kind(&self) -> PassKind {
        self.kind
    }

    pub fn raw(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    pub fn command_buffer(&self, slot: FrameSlot) -> vk::CommandBuffer {
        self.command_buffers[slot]
    }

    pub fn framebuffers(&self) -> &PerImage<vk::Framebuffer> {
        &self.framebuffers
    }

    /// Install new framebuffers, returning the previous ones as garbage.
    pub fn set_framebuffers(&mut self, framebuffers: PerImage<vk::Framebuffer>) -> Vec<GpuGarbage> {
        std::mem::replace(&mut self.framebuffers, framebuffers)
            .drain()
            .map(GpuGarbage::Framebuffer)
            .collect()
    }

    /// Swap the native render pass, keeping command buffers. The new pass
    /// must be compatible with the framebuffers and pipelines built for the
    /// old one.
    pub fn replace_render_pass(&mut self, render_pass: vk::RenderPass) -> GpuGarbage {
        GpuGarbage::RenderPass(std::mem::replace(&mut self.render_pass, render_pass))
    }

    /// Reset and begin the command buffer of `slot`, then begin the render pass
    /// on the framebuffer of `image` with a full-extent viewport and `scissor`.
    pub fn begin(
        &mut self,
        device: &Device,
        slot: FrameSlot,
        image: ImageIndex,
        extent: vk::Extent2D,
        scissor: vk::Rect2D,
    ) -> RendererResult<vk::CommandBuffer> {
        if let Some(recording) = self.recording {
            return Err(RendererError::InvalidParameter(format!(
                "{} pass is already recording {recording}",
                self.kind
            )));
        }
        let framebuffer = *self.framebuffers.get(image).ok_or_else(|| {
            RendererError::MissingResource(format!("{} framebuffer for {image}", self.kind))
        })?;
        let cmd = self.command_buffers[slot];
        let raw = device.raw();

        unsafe {
            raw.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(vk_error("reset command buffer"))?;
            raw.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())
                .map_err(vk_error("begin command buffer"))?;

            let begin_info = vk::RenderPassBeginInfo::default()
                .render_pass(self.render_pass)
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&self.clear_values);
            raw.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            raw.cmd_set_viewport(cmd, 0, &[viewport]);
            raw.cmd_set_scissor(cmd, 0, &[scissor]);
        }

        self.recording = Some(slot);
        Ok(cmd)
    }

    /// End the render pass and the command buffer of `slot`.
    pub fn end(&mut self, device: &Device, slot: FrameSlot) -> RendererResult<()> {
        if self.recording != Some(slot) {
            return Err(RendererError::InvalidParameter(format!(
                "{} pass is not recording {slot}",
                self.kind
            )));
        }
        self.recording = None;
        let cmd = self.command_buffers[slot];
        unsafe {
            device.raw().cmd_end_render_pass(cmd);
            device
                .raw()
                .end_command_buffer(cmd)
                .map_err(vk_error("end command buffer"))
        }
    }

    /// Break the pass down for deferred destruction.
    pub fn into_garbage(mut self) -> Vec<GpuGarbage> {
        let mut garbage = self.set_framebuffers(PerImage::empty());
        garbage.push(GpuGarbage::RenderPass(self.render_pass));
        garbage.push(GpuGarbage::CommandPool(self.command_pool));
        garbage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_sampled_scene_pass() {
        let attachments = scene_attachments(
            vk::Format::B8G8R8A8_SRGB,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::SampleCountFlags::TYPE_1,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(attachments[0].store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(
            attachments[1].final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn test_multisampled_scene_pass_resolves() {
        let attachments = scene_attachments(
            vk::Format::B8G8R8A8_SRGB,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::SampleCountFlags::TYPE_4,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        assert_eq!(attachments.len(), 3);
        assert_eq!(attachments[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(attachments[1].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(attachments[2].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(
            attachments[2].final_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(attachments[2].store_op, vk::AttachmentStoreOp::STORE);
    }

    #[test]
    fn test_swapchain_hands_over_to_ui() {
        assert_eq!(
            swapchain_final_layout(true),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(swapchain_final_layout(false), vk::ImageLayout::PRESENT_SRC_KHR);

        let ui = ui_attachment(vk::Format::B8G8R8A8_SRGB);
        assert_eq!(ui.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(ui.initial_layout, swapchain_final_layout(true));
        assert_eq!(ui.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn test_clear_values_match_attachments() {
        let color = vk::ClearColorValue {
            float32: [0.0, 0.0, 0.0, 1.0],
        };
        assert_eq!(scene_clear_values(color, false).len(), 2);
        assert_eq!(scene_clear_values(color, true).len(), 3);
    }
}
