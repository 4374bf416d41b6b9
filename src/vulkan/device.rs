//! Physical device selection, logical device, queues and the general allocator.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::{Mutex, MutexGuard};

use super::instance::Instance;
use crate::error::{vk_error, RendererError, RendererResult};

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
];

/// Timeout for one-shot command buffers, in nanoseconds.
const SINGLE_TIME_TIMEOUT_NS: u64 = 100_000_000_000;

/// Queue families the renderer submits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
    pub compute: Option<u32>,
}

impl QueueFamilyIndices {
    /// Pick graphics, present and compute families. The last family that
    /// satisfies each role wins until all three are found.
    ///
    /// Returns `None` without a graphics or present family.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        supports_present: impl Fn(u32) -> bool,
    ) -> Option<Self> {
        let mut graphics = None;
        let mut present = None;
        let mut compute = None;

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics = Some(index);
            }
            if family.queue_flags.contains(vk::QueueFlags::COMPUTE) {
                compute = Some(index);
            }
            if supports_present(index) {
                present = Some(index);
            }
            if graphics.is_some() && present.is_some() && compute.is_some() {
                break;
            }
        }

        Some(Self {
            graphics: graphics?,
            present: present?,
            compute,
        })
    }

    /// Distinct families, for one queue create info each.
    pub fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics, self.present];
        families.extend(self.compute);
        families.sort_unstable();
        families.dedup();
        families
    }

    /// Graphics and present live in different families.
    pub fn is_split(&self) -> bool {
        self.graphics != self.present
    }
}

/// Choose among physical devices of the given types.
///
/// A single candidate is taken as is. With several, the first discrete GPU
/// wins, otherwise the first candidate.
pub fn pick_physical_device(types: &[vk::PhysicalDeviceType]) -> Option<usize> {
    match types.len() {
        0 => None,
        1 => Some(0),
        _ => types
            .iter()
            .position(|&ty| ty == vk::PhysicalDeviceType::DISCRETE_GPU)
            .or(Some(0)),
    }
}

/// Sample count flag for a power-of-two sample count in `1..=64`.
pub fn sample_count_flags(samples: u32) -> Option<vk::SampleCountFlags> {
    match samples {
        1 => Some(vk::SampleCountFlags::TYPE_1),
        2 => Some(vk::SampleCountFlags::TYPE_2),
        4 => Some(vk::SampleCountFlags::TYPE_4),
        8 => Some(vk::SampleCountFlags::TYPE_8),
        16 => Some(vk::SampleCountFlags::TYPE_16),
        32 => Some(vk::SampleCountFlags::TYPE_32),
        64 => Some(vk::SampleCountFlags::TYPE_64),
        _ => None,
    }
}

/// Highest count in `supported` that does not exceed `requested`.
pub fn clamp_sample_count(
    requested: vk::SampleCountFlags,
    supported: vk::SampleCountFlags,
) -> vk::SampleCountFlags {
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&count| count.as_raw() <= requested.as_raw() && supported.contains(count))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// First depth candidate accepted by `supports`.
pub fn pick_depth_format(supports: impl Fn(vk::Format) -> bool) -> Option<vk::Format> {
    DEPTH_FORMAT_CANDIDATES
        .into_iter()
        .find(|&format| supports(format))
}

/// Access mask and pipeline stage an image is used with in `layout`.
pub fn layout_access(layout: vk::ImageLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => {
            (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE)
        }
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
            (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER)
        }
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER)
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER)
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => {
            (vk::AccessFlags::empty(), vk::PipelineStageFlags::BOTTOM_OF_PIPE)
        }
        _ => (
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

/// One image memory barrier.
#[derive(Debug, Clone, Copy)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub range: vk::ImageSubresourceRange,
}

impl ImageBarrier {
    /// Layout transition of every mip and layer of `image`, with access masks
    /// and stages derived from both layouts.
    pub fn transition(
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        aspect: vk::ImageAspectFlags,
    ) -> Self {
        let (src_access, src_stage) = layout_access(old_layout);
        let (dst_access, dst_stage) = layout_access(new_layout);
        Self {
            image,
            old_layout,
            new_layout,
            src_access,
            dst_access,
            src_stage,
            dst_stage,
            range: vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            },
        }
    }
}

/// Sampler parameters.
#[derive(Debug, Clone, Copy)]
pub struct SamplerDesc {
    pub filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_lod: 1.0,
        }
    }
}

/// The logical device every other GPU object is created from.
pub struct Device {
    instance: Arc<Instance>,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    anisotropy: bool,
    device: ash::Device,
    queue_families: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    compute_queue: Option<vk::Queue>,
    allocator: Option<Mutex<Allocator>>,
    transfer_pool: Mutex<vk::CommandPool>,
    samples: vk::SampleCountFlags,
    depth_format: vk::Format,
}

impl Device {
    /// Select a GPU that can present to the instance surface and create the
    /// logical device, its queues and allocator.
    pub fn new(instance: Arc<Instance>, desired_samples: u32) -> RendererResult<Self> {
        let raw = instance.raw();
        let devices = unsafe { raw.enumerate_physical_devices() }.map_err(|e| {
            RendererError::DeviceCreationFailed(format!("failed to enumerate GPUs: {e:?}"))
        })?;

        let mut candidates = Vec::new();
        for physical_device in devices {
            let properties = unsafe { raw.get_physical_device_properties(physical_device) };
            let families =
                unsafe { raw.get_physical_device_queue_family_properties(physical_device) };
            let indices = QueueFamilyIndices::find(&families, |index| unsafe {
                instance
                    .surface_loader()
                    .get_physical_device_surface_support(physical_device, index, instance.surface())
                    .unwrap_or(false)
            });

            let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
            log::info!(
                "Found GPU: {:?} (type: {:?}, presentable: {})",
                name,
                properties.device_type,
                indices.is_some()
            );

            if let Some(indices) = indices {
                candidates.push((physical_device, properties, indices));
            }
        }

        let types: Vec<_> = candidates.iter().map(|(_, p, _)| p.device_type).collect();
        if types.len() > 1 && !types.contains(&vk::PhysicalDeviceType::DISCRETE_GPU) {
            log::warn!("Several GPUs but none discrete, using the first one");
        }
        let chosen = pick_physical_device(&types).ok_or_else(|| {
            RendererError::DeviceCreationFailed("no GPU can render and present".to_string())
        })?;
        let (physical_device, properties, queue_families) = candidates[chosen];

        if queue_families.compute.is_none() {
            log::warn!("A compute queue was not found");
        }

        let supported = unsafe { raw.get_physical_device_features(physical_device) };
        let anisotropy = supported.sampler_anisotropy == vk::TRUE;

        let priorities = [1.0f32];
        let queue_infos: Vec<_> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        #[allow(unused_mut)]
        let mut extensions = vec![ash::khr::swapchain::NAME.as_ptr()];
        #[cfg(target_os = "macos")]
        extensions.push(ash::khr::portability_subset::NAME.as_ptr());

        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(anisotropy);
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { raw.create_device(physical_device, &create_info, None) }
            .map_err(|e| {
                RendererError::DeviceCreationFailed(format!("failed to create logical device: {e:?}"))
            })?;

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };
        let compute_queue = queue_families
            .compute
            .map(|family| unsafe { device.get_device_queue(family, 0) });

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: raw.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .map_err(|e| {
            unsafe { device.destroy_device(None) };
            RendererError::DeviceCreationFailed(format!("failed to create allocator: {e}"))
        })?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_families.graphics)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let transfer_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                drop(allocator);
                unsafe { device.destroy_device(None) };
                return Err(RendererError::DeviceCreationFailed(format!(
                    "failed to create transfer command pool: {e:?}"
                )));
            }
        };

        let depth_format = pick_depth_format(|format| {
            let props =
                unsafe { raw.get_physical_device_format_properties(physical_device, format) };
            props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        });

        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        log::info!(
            "Using GPU {:?}, queues: graphics {}, present {}, compute {:?}",
            name,
            queue_families.graphics,
            queue_families.present,
            queue_families.compute
        );

        let mut this = Self {
            instance,
            physical_device,
            properties,
            anisotropy,
            device,
            queue_families,
            graphics_queue,
            present_queue,
            compute_queue,
            allocator: Some(Mutex::new(allocator)),
            transfer_pool: Mutex::new(transfer_pool),
            samples: vk::SampleCountFlags::TYPE_1,
            depth_format: depth_format.unwrap_or(vk::Format::UNDEFINED),
        };

        if depth_format.is_none() {
            return Err(RendererError::DeviceCreationFailed(
                "no supported depth-stencil format".to_string(),
            ));
        }
        this.samples = this.sample_count(desired_samples);
        Ok(this)
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    /// The ash device.
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn compute_queue(&self) -> Option<vk::Queue> {
        self.compute_queue
    }

    /// Sample count chosen at creation for multisampled passes.
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    /// Depth-stencil format chosen at creation.
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Lock the general allocator.
    pub fn allocator(&self) -> RendererResult<MutexGuard<'_, Allocator>> {
        self.allocator
            .as_ref()
            .map(|allocator| allocator.lock())
            .ok_or_else(|| RendererError::MissingResource("allocator".to_string()))
    }

    /// Lock the one-shot command pool. Held while a one-shot buffer records.
    pub fn transfer_pool(&self) -> MutexGuard<'_, vk::CommandPool> {
        self.transfer_pool.lock()
    }

    /// Create a separate allocator for egui-ash-renderer, which needs a
    /// `std::sync::Mutex`. It must be dropped before this device.
    pub fn create_egui_allocator(&self) -> RendererResult<Arc<std::sync::Mutex<Allocator>>> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: self.instance.raw().clone(),
            device: self.device.clone(),
            physical_device: self.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;
        Ok(Arc::new(std::sync::Mutex::new(allocator)))
    }

    /// Resolve a requested MSAA sample count against what color and depth
    /// framebuffers support.
    pub fn sample_count(&self, requested: u32) -> vk::SampleCountFlags {
        let flags = sample_count_flags(requested).unwrap_or_else(|| {
            log::error!("Invalid MSAA sample count {requested}, falling back to 1");
            vk::SampleCountFlags::TYPE_1
        });
        let limits = &self.properties.limits;
        let supported =
            limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
        let samples = clamp_sample_count(flags, supported);
        if samples != flags {
            log::warn!("MSAA {flags:?} not supported, using {samples:?}");
        }
        samples
    }

    /// Depth-stencil format for the device, see [`DEPTH_FORMAT_CANDIDATES`].
    pub fn find_suitable_depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Create a 2D image view over every mip level.
    pub fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        mip_levels: u32,
    ) -> RendererResult<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe { self.device.create_image_view(&view_info, None) }
            .map_err(crate::error::creation_error("image view"))
    }

    /// Create a sampler with the device's maximum anisotropy.
    pub fn create_sampler(&self, desc: &SamplerDesc) -> RendererResult<vk::Sampler> {
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.filter)
            .min_filter(desc.filter)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .anisotropy_enable(self.anisotropy)
            .max_anisotropy(self.properties.limits.max_sampler_anisotropy)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(desc.max_lod)
            .mip_lod_bias(0.0);

        unsafe { self.device.create_sampler(&sampler_info, None) }
            .map_err(crate::error::creation_error("sampler"))
    }

    /// Record one image memory barrier into `cmd`.
    pub fn insert_image_memory_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier) {
        let image_barrier = vk::ImageMemoryBarrier::default()
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .src_access_mask(barrier.src_access)
            .dst_access_mask(barrier.dst_access)
            .old_layout(barrier.old_layout)
            .new_layout(barrier.new_layout)
            .image(barrier.image)
            .subresource_range(barrier.range);

        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                barrier.src_stage,
                barrier.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[image_barrier],
            );
        }
    }

    /// Transition `image` between layouts with a blocking one-shot submit.
    pub fn transition_image_layout(
        &self,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        aspect: vk::ImageAspectFlags,
    ) -> RendererResult<()> {
        let commands = self.begin_single_time_commands()?;
        self.insert_image_memory_barrier(
            commands.buffer(),
            &ImageBarrier::transition(image, old_layout, new_layout, aspect),
        );
        commands.end()
    }

    /// Allocate and begin a one-shot command buffer.
    ///
    /// [`SingleTimeCommands::end`] submits it and blocks until the GPU is done.
    pub fn begin_single_time_commands(&self) -> RendererResult<SingleTimeCommands<'_>> {
        let pool = self.transfer_pool.lock();
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffer = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(vk_error("allocate one-shot command buffer"))?[0];

        let commands = SingleTimeCommands {
            device: self,
            pool,
            buffer,
        };

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(buffer, &begin_info) }
            .map_err(vk_error("begin one-shot command buffer"))?;

        Ok(commands)
    }

    /// Block until the device is idle.
    pub fn wait_idle(&self) -> RendererResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(vk_error("wait idle"))
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device
                .destroy_command_pool(*self.transfer_pool.get_mut(), None);
        }
        // The allocator frees its memory blocks through the device.
        self.allocator = None;
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

/// A one-shot command buffer holding the transfer pool lock.
pub struct SingleTimeCommands<'a> {
    device: &'a Device,
    pool: MutexGuard<'a, vk::CommandPool>,
    buffer: vk::CommandBuffer,
}

impl SingleTimeCommands<'_> {
    pub fn buffer(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// End, submit on the graphics queue and wait on a fence.
    pub fn end(self) -> RendererResult<()> {
        let device = self.device.raw();
        unsafe { device.end_command_buffer(self.buffer) }
            .map_err(vk_error("end one-shot command buffer"))?;

        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
            .map_err(vk_error("create one-shot fence"))?;

        let buffers = [self.buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&buffers);
        let result = unsafe {
            device
                .queue_submit(self.device.graphics_queue(), &[submit_info], fence)
                .and_then(|()| device.wait_for_fences(&[fence], true, SINGLE_TIME_TIMEOUT_NS))
        };

        unsafe { device.destroy_fence(fence, None) };
        result.map_err(vk_error("one-shot submit"))
    }
}

impl Drop for SingleTimeCommands<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device
                .raw()
                .free_command_buffers(*self.pool, &[self.buffer]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_general_family() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let indices = QueueFamilyIndices::find(&families, |_| true).unwrap();
        assert_eq!(indices.graphics, 0);
        assert_eq!(indices.present, 0);
        assert_eq!(indices.compute, Some(0));
        assert_eq!(indices.unique(), vec![0]);
        assert!(!indices.is_split());
    }

    #[test]
    fn test_split_present_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::find(&families, |index| index == 1).unwrap();
        assert_eq!(indices.graphics, 0);
        assert_eq!(indices.present, 1);
        assert_eq!(indices.compute, Some(2));
        assert_eq!(indices.unique(), vec![0, 1, 2]);
        assert!(indices.is_split());
    }

    #[test]
    fn test_missing_compute_is_allowed() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| true).unwrap();
        assert_eq!(indices.compute, None);
        assert_eq!(indices.unique(), vec![0]);
    }

    #[test]
    fn test_no_present_family() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(QueueFamilyIndices::find(&families, |_| false).is_none());
    }

    #[test]
    fn test_pick_physical_device() {
        use vk::PhysicalDeviceType as T;
        assert_eq!(pick_physical_device(&[]), None);
        assert_eq!(pick_physical_device(&[T::CPU]), Some(0));
        assert_eq!(
            pick_physical_device(&[T::INTEGRATED_GPU, T::DISCRETE_GPU]),
            Some(1)
        );
        assert_eq!(
            pick_physical_device(&[T::INTEGRATED_GPU, T::VIRTUAL_GPU]),
            Some(0)
        );
    }

    #[test]
    fn test_sample_count_flags() {
        assert_eq!(sample_count_flags(1), Some(vk::SampleCountFlags::TYPE_1));
        assert_eq!(sample_count_flags(4), Some(vk::SampleCountFlags::TYPE_4));
        assert_eq!(sample_count_flags(64), Some(vk::SampleCountFlags::TYPE_64));
        assert_eq!(sample_count_flags(3), None);
        assert_eq!(sample_count_flags(0), None);
        assert_eq!(sample_count_flags(128), None);
    }

    #[test]
    fn test_clamp_sample_count() {
        let supported = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_2
            | vk::SampleCountFlags::TYPE_4;
        assert_eq!(
            clamp_sample_count(vk::SampleCountFlags::TYPE_8, supported),
            vk::SampleCountFlags::TYPE_4
        );
        assert_eq!(
            clamp_sample_count(vk::SampleCountFlags::TYPE_2, supported),
            vk::SampleCountFlags::TYPE_2
        );
        assert_eq!(
            clamp_sample_count(vk::SampleCountFlags::TYPE_1, supported),
            vk::SampleCountFlags::TYPE_1
        );
        assert_eq!(
            clamp_sample_count(vk::SampleCountFlags::TYPE_4, vk::SampleCountFlags::TYPE_1),
            vk::SampleCountFlags::TYPE_1
        );
    }

    #[test]
    fn test_pick_depth_format_prefers_first() {
        assert_eq!(
            pick_depth_format(|_| true),
            Some(vk::Format::D32_SFLOAT_S8_UINT)
        );
        assert_eq!(
            pick_depth_format(|f| f == vk::Format::D24_UNORM_S8_UINT),
            Some(vk::Format::D24_UNORM_S8_UINT)
        );
        assert_eq!(pick_depth_format(|_| false), None);
    }

    #[test]
    fn test_picking_readback_barriers() {
        let to_src = ImageBarrier::transition(
            vk::Image::null(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageAspectFlags::COLOR,
        );
        assert_eq!(to_src.src_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(to_src.dst_access, vk::AccessFlags::TRANSFER_READ);
        assert_eq!(to_src.src_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(to_src.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let upload = ImageBarrier::transition(
            vk::Image::null(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageAspectFlags::COLOR,
        );
        assert_eq!(upload.src_access, vk::AccessFlags::empty());
        assert_eq!(upload.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(upload.dst_access, vk::AccessFlags::TRANSFER_WRITE);
    }
}
