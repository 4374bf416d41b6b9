//! Graphics pipelines, descriptor set layouts and the descriptor pool.
//!
//! Every built-in pipeline shares the same binding model:
//!
//! - set 0, binding 0: per-frame [`CameraUniform`](crate::uniforms::CameraUniform)
//! - set 1, binding 0/1: sampled texture and sampler (textured pipelines only)
//! - push constants: [`ObjectPushConstants`] for vertex and fragment stages

use std::ffi::CString;
use std::mem::{offset_of, size_of};

use ash::vk;

use super::device::Device;
use super::garbage::GpuGarbage;
use super::shader::{
    ShaderPair, FRAGMENT_ENTRY, GRID_WGSL, MESH_WGSL, PICKING_WGSL, SKYBOX_WGSL, VERTEX_ENTRY,
};
use crate::error::{creation_error, RendererError, RendererResult};
use crate::registry::{PassKind, PipelineKind};
use crate::uniforms::{ObjectPushConstants, Vertex};

/// Stage flags of the shared push constant range.
pub const PUSH_CONSTANT_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);

/// Fixed-function and shader choices of one pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDesc {
    pub kind: PipelineKind,
    /// Pass whose render pass the pipeline is built against.
    pub pass: PassKind,
    pub source: &'static str,
    /// Consumes [`Vertex`] buffers. Without it vertices come from the index.
    pub vertex_input: bool,
    /// Binds a texture at set 1.
    pub textured: bool,
    pub cull_mode: vk::CullModeFlags,
    pub depth_write: bool,
    pub blend: bool,
}

impl PipelineDesc {
    fn new(kind: PipelineKind, pass: PassKind, source: &'static str) -> Self {
        Self {
            kind,
            pass,
            source,
            vertex_input: true,
            textured: false,
            cull_mode: vk::CullModeFlags::BACK,
            depth_write: true,
            blend: false,
        }
    }
}

/// The built-in pipelines. Mesh, skybox and grid draw into `main_pass`, the
/// picking pipeline is added when the picking pass exists.
pub fn default_pipeline_descs(main_pass: PassKind, picking: bool) -> Vec<PipelineDesc> {
    let mut descs = vec![
        PipelineDesc {
            textured: true,
            ..PipelineDesc::new(PipelineKind::Mesh, main_pass, MESH_WGSL)
        },
        PipelineDesc {
            cull_mode: vk::CullModeFlags::FRONT,
            depth_write: false,
            ..PipelineDesc::new(PipelineKind::Skybox, main_pass, SKYBOX_WGSL)
        },
        PipelineDesc {
            vertex_input: false,
            cull_mode: vk::CullModeFlags::NONE,
            depth_write: false,
            blend: true,
            ..PipelineDesc::new(PipelineKind::Grid, main_pass, GRID_WGSL)
        },
    ];
    if picking {
        descs.push(picking_pipeline_desc());
    }
    descs
}

/// Writes object identifiers on the picking pass.
pub fn picking_pipeline_desc() -> PipelineDesc {
    PipelineDesc::new(PipelineKind::Picking, PassKind::Picking, PICKING_WGSL)
}

/// Binding and attributes for interleaved [`Vertex`] data at binding 0.
pub fn vertex_input_description() -> (
    vk::VertexInputBindingDescription,
    [vk::VertexInputAttributeDescription; 4],
) {
    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let attribute = |location: u32, format: vk::Format, offset: usize| {
        vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset: offset as u32,
        }
    };
    let attributes = [
        attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
        attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
        attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, uv)),
        attribute(3, vk::Format::R32G32B32A32_SFLOAT, offset_of!(Vertex, color)),
    ];
    (binding, attributes)
}

/// Descriptor set layouts shared by every pipeline.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorLayouts {
    pub camera: vk::DescriptorSetLayout,
    pub texture: vk::DescriptorSetLayout,
}

impl DescriptorLayouts {
    pub fn new(device: &Device) -> RendererResult<Self> {
        let camera_bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)];
        let camera = create_set_layout(device, &camera_bindings)?;

        // naga emits the texture and its sampler as separate bindings.
        let texture_bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT),
            vk::DescriptorSetLayoutBinding::default()
                .binding(1)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT),
        ];
        let texture = match create_set_layout(device, &texture_bindings) {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { device.raw().destroy_descriptor_set_layout(camera, None) };
                return Err(e);
            }
        };

        Ok(Self { camera, texture })
    }

    pub fn destroy(&self, device: &Device) {
        unsafe {
            device.raw().destroy_descriptor_set_layout(self.camera, None);
            device.raw().destroy_descriptor_set_layout(self.texture, None);
        }
    }
}

pub(crate) fn create_set_layout(
    device: &Device,
    bindings: &[vk::DescriptorSetLayoutBinding],
) -> RendererResult<vk::DescriptorSetLayout> {
    let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
    unsafe { device.raw().create_descriptor_set_layout(&create_info, None) }
        .map_err(creation_error("descriptor set layout"))
}

/// Pool for camera and texture descriptor sets. Sets can be freed one by one.
pub fn create_descriptor_pool(device: &Device, max_sets: u32) -> RendererResult<vk::DescriptorPool> {
    let pool_sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: max_sets,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLED_IMAGE,
            descriptor_count: max_sets,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLER,
            descriptor_count: max_sets,
        },
    ];
    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        .max_sets(max_sets)
        .pool_sizes(&pool_sizes);

    unsafe { device.raw().create_descriptor_pool(&pool_info, None) }
        .map_err(creation_error("descriptor pool"))
}

/// Allocate `count` sets of `layout` from `pool`.
pub fn allocate_descriptor_sets(
    device: &Device,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
    count: usize,
) -> RendererResult<Vec<vk::DescriptorSet>> {
    let layouts = vec![layout; count];
    let alloc_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(&layouts);
    unsafe { device.raw().allocate_descriptor_sets(&alloc_info) }
        .map_err(creation_error("descriptor sets"))
}

/// Point binding 0 of a camera set at `buffer`.
pub fn write_uniform_set(
    device: &Device,
    set: vk::DescriptorSet,
    buffer: vk::Buffer,
    range: vk::DeviceSize,
) {
    let buffer_info = [vk::DescriptorBufferInfo {
        buffer,
        offset: 0,
        range,
    }];
    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(&buffer_info);
    unsafe { device.raw().update_descriptor_sets(&[write], &[]) };
}

/// Point a texture set at `view` and `sampler`.
pub fn write_texture_set(
    device: &Device,
    set: vk::DescriptorSet,
    view: vk::ImageView,
    sampler: vk::Sampler,
) {
    let image_info = [vk::DescriptorImageInfo {
        sampler: vk::Sampler::null(),
        image_view: view,
        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    }];
    let sampler_info = [vk::DescriptorImageInfo {
        sampler,
        image_view: vk::ImageView::null(),
        image_layout: vk::ImageLayout::UNDEFINED,
    }];
    let writes = [
        vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .image_info(&image_info),
        vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(1)
            .descriptor_type(vk::DescriptorType::SAMPLER)
            .image_info(&sampler_info),
    ];
    unsafe { device.raw().update_descriptor_sets(&writes, &[]) };
}

/// A built graphics pipeline and its layout.
#[derive(Debug)]
pub struct Pipeline {
    kind: PipelineKind,
    pass: PassKind,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    textured: bool,
}

impl Pipeline {
    /// Compile the shaders of `desc` and build the pipeline against
    /// `render_pass` with `samples` rasterization samples.
    pub fn new(
        device: &Device,
        desc: &PipelineDesc,
        render_pass: vk::RenderPass,
        samples: vk::SampleCountFlags,
        layouts: &DescriptorLayouts,
    ) -> RendererResult<Self> {
        let set_layouts: Vec<vk::DescriptorSetLayout> = if desc.textured {
            vec![layouts.camera, layouts.texture]
        } else {
            vec![layouts.camera]
        };
        let push_constant_ranges = [vk::PushConstantRange {
            stage_flags: PUSH_CONSTANT_STAGES,
            offset: 0,
            size: size_of::<ObjectPushConstants>() as u32,
        }];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let layout = unsafe { device.raw().create_pipeline_layout(&layout_info, None) }
            .map_err(creation_error("pipeline layout"))?;

        let shaders = match ShaderPair::new(device, desc.kind.name(), desc.source) {
            Ok(shaders) => shaders,
            Err(e) => {
                unsafe { device.raw().destroy_pipeline_layout(layout, None) };
                return Err(e);
            }
        };
        let pipeline = build_pipeline(device, desc, &shaders, layout, render_pass, samples);
        shaders.destroy(device);

        match pipeline {
            Ok(pipeline) => {
                log::info!("Created {} pipeline on the {} pass", desc.kind, desc.pass);
                Ok(Self {
                    kind: desc.kind,
                    pass: desc.pass,
                    pipeline,
                    layout,
                    textured: desc.textured,
                })
            }
            Err(e) => {
                unsafe { device.raw().destroy_pipeline_layout(layout, None) };
                Err(e)
            }
        }
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    /// Pass the pipeline was built against.
    pub fn pass(&self) -> PassKind {
        self.pass
    }

    pub fn raw(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn is_textured(&self) -> bool {
        self.textured
    }

    pub fn into_garbage(self) -> GpuGarbage {
        GpuGarbage::Pipeline {
            pipeline: self.pipeline,
            layout: self.layout,
        }
    }
}

fn build_pipeline(
    device: &Device,
    desc: &PipelineDesc,
    shaders: &ShaderPair,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    samples: vk::SampleCountFlags,
) -> RendererResult<vk::Pipeline> {
    let vertex_entry = CString::new(VERTEX_ENTRY)
        .map_err(|e| RendererError::InvalidParameter(format!("vertex entry point: {e}")))?;
    let fragment_entry = CString::new(FRAGMENT_ENTRY)
        .map_err(|e| RendererError::InvalidParameter(format!("fragment entry point: {e}")))?;

    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(shaders.vertex)
            .name(&vertex_entry),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(shaders.fragment)
            .name(&fragment_entry),
    ];

    let (binding, attributes) = vertex_input_description();
    let bindings = [binding];
    let vertex_input_state = if desc.vertex_input {
        vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes)
    } else {
        vk::PipelineVertexInputStateCreateInfo::default()
    };

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(desc.cull_mode)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(samples);

    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(true)
        .depth_write_enable(desc.depth_write)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let blend_attachment = if desc.blend {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    } else {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    };
    let blend_attachments = [blend_attachment];
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    let pipelines = unsafe {
        device
            .raw()
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, e)| creation_error(desc.kind.name())(e))?;

    Ok(pipelines[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pipelines_target_main_pass() {
        let descs = default_pipeline_descs(PassKind::Swapchain, false);
        let kinds: Vec<PipelineKind> = descs.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![PipelineKind::Mesh, PipelineKind::Skybox, PipelineKind::Grid]
        );
        assert!(descs.iter().all(|d| d.pass == PassKind::Swapchain));

        let descs = default_pipeline_descs(PassKind::Viewport, true);
        let picking = descs
            .iter()
            .find(|d| d.kind == PipelineKind::Picking)
            .unwrap();
        assert_eq!(picking.pass, PassKind::Picking);
        assert!(descs
            .iter()
            .filter(|d| d.kind != PipelineKind::Picking)
            .all(|d| d.pass == PassKind::Viewport));
    }

    #[test]
    fn test_fixed_function_choices() {
        let descs = default_pipeline_descs(PassKind::Swapchain, true);
        let get = |kind| descs.iter().find(|d| d.kind == kind).unwrap();

        let mesh = get(PipelineKind::Mesh);
        assert_eq!(mesh.cull_mode, vk::CullModeFlags::BACK);
        assert!(mesh.textured && mesh.depth_write);

        let skybox = get(PipelineKind::Skybox);
        assert_eq!(skybox.cull_mode, vk::CullModeFlags::FRONT);
        assert!(!skybox.depth_write);

        let grid = get(PipelineKind::Grid);
        assert!(!grid.vertex_input);
        assert!(grid.blend);

        // Integer targets cannot blend.
        assert!(!get(PipelineKind::Picking).blend);
    }

    #[test]
    fn test_vertex_layout() {
        let (binding, attributes) = vertex_input_description();
        assert_eq!(binding.stride, 48);
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24, 32]);
        let locations: Vec<u32> = attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2, 3]);
        assert_eq!(attributes[3].format, vk::Format::R32G32B32A32_SFLOAT);
    }

    #[test]
    fn test_push_constant_stages() {
        assert!(PUSH_CONSTANT_STAGES.contains(vk::ShaderStageFlags::VERTEX));
        assert!(PUSH_CONSTANT_STAGES.contains(vk::ShaderStageFlags::FRAGMENT));
    }
}
