//! Swapchain, its image views and the per-slot synchronization primitives.

use std::sync::Arc;

use ash::vk;

use super::device::Device;
use crate::backend::{AcquireOutcome, PresentOutcome};
use crate::error::{vk_error, RendererError, RendererResult};
use crate::frame::{FrameSlot, ImageIndex, PerFrame, PerImage};

/// Surface format used when the surface offers it.
pub const PREFERRED_SURFACE_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;

/// Lifecycle of a [`Swapchain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    Uninitialized,
    Created,
    Recreating,
    Destroyed,
}

/// `preferred` with the sRGB nonlinear color space if listed, else the first
/// entry. `None` only when the surface reports no formats.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::Format,
) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| f.format == preferred && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
}

/// Mailbox when available, otherwise FIFO with vsync and immediate without.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else if vsync {
        vk::PresentModeKHR::FIFO
    } else {
        vk::PresentModeKHR::IMMEDIATE
    }
}

/// The surface's current extent, or the framebuffer size clamped into the
/// supported range when the surface leaves the choice to the swapchain.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer_size: (u32, u32),
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    let (width, height) = framebuffer_size;
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, clamped to the maximum when there is one.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Create one object per input. On the first failure the objects created so
/// far are released and the error is returned.
fn create_all_or_release<T: Copy, V>(
    inputs: &[T],
    mut create: impl FnMut(T) -> RendererResult<V>,
    mut release: impl FnMut(V),
) -> RendererResult<Vec<V>> {
    let mut created = Vec::with_capacity(inputs.len());
    for &input in inputs {
        match create(input) {
            Ok(object) => created.push(object),
            Err(e) => {
                created.into_iter().for_each(&mut release);
                return Err(e);
            }
        }
    }
    Ok(created)
}

/// Synchronization primitives of one frame slot.
#[derive(Debug, Clone, Copy)]
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    /// Created signaled so the first wait on each slot returns at once.
    pub in_flight: vk::Fence,
}

impl FrameSync {
    fn new(device: &ash::Device) -> RendererResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        unsafe {
            let image_available = device
                .create_semaphore(&semaphore_info, None)
                .map_err(vk_error("create image available semaphore"))?;
            let render_finished = match device.create_semaphore(&semaphore_info, None) {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    return Err(vk_error("create render finished semaphore")(e));
                }
            };
            let in_flight = match device.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    device.destroy_semaphore(render_finished, None);
                    return Err(vk_error("create in-flight fence")(e));
                }
            };
            Ok(Self {
                image_available,
                render_finished,
                in_flight,
            })
        }
    }

    fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight, None);
        }
    }
}

/// The presentable images and what is needed to cycle through them.
pub struct Swapchain {
    device: Arc<Device>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: PerImage<vk::Image>,
    views: PerImage<vk::ImageView>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    vsync: bool,
    sync: PerFrame<FrameSync>,
    state: SwapchainState,
}

impl Swapchain {
    pub fn new(
        device: Arc<Device>,
        framebuffer_size: (u32, u32),
        vsync: bool,
    ) -> RendererResult<Self> {
        let loader = ash::khr::swapchain::Device::new(device.instance().raw(), device.raw());
        let sync = PerFrame::try_from_fn(|_| FrameSync::new(device.raw()))?;

        let mut swapchain = Self {
            device,
            loader,
            swapchain: vk::SwapchainKHR::null(),
            images: PerImage::empty(),
            views: PerImage::empty(),
            surface_format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            vsync,
            sync,
            state: SwapchainState::Uninitialized,
        };
        swapchain.create(framebuffer_size)?;
        Ok(swapchain)
    }

    /// Query the surface and build the swapchain and its views, retiring the
    /// previous swapchain if there is one.
    fn create(&mut self, framebuffer_size: (u32, u32)) -> RendererResult<()> {
        let instance = self.device.instance();
        let physical_device = self.device.physical_device();
        let capabilities = instance.surface_capabilities(physical_device)?;
        let formats = instance.surface_formats(physical_device)?;
        let present_modes = instance.surface_present_modes(physical_device)?;

        let surface_format = choose_surface_format(&formats, PREFERRED_SURFACE_FORMAT)
            .ok_or_else(|| {
                RendererError::SwapchainCreationFailed("surface reports no formats".to_string())
            })?;
        let present_mode = choose_present_mode(&present_modes, self.vsync);
        let extent = choose_extent(&capabilities, framebuffer_size);
        let image_count = choose_image_count(&capabilities);

        let families = self.device.queue_families();
        let family_indices = [families.graphics, families.present];

        let old_swapchain = self.swapchain;
        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(instance.surface())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        create_info = if families.is_split() {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None) }
            .map_err(|e| RendererError::SwapchainCreationFailed(format!("{e:?}")))?;

        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;

        let images = unsafe { self.loader.get_swapchain_images(swapchain) }.map_err(|e| {
            RendererError::SwapchainCreationFailed(format!("failed to get images: {e:?}"))
        })?;

        let device = &self.device;
        let views = create_all_or_release(
            &images,
            |image| {
                device.create_image_view(image, surface_format.format, vk::ImageAspectFlags::COLOR, 1)
            },
            |view| unsafe { device.raw().destroy_image_view(view, None) },
        )?;

        self.images = PerImage::new(images);
        self.views = PerImage::new(views);
        self.surface_format = surface_format;
        self.present_mode = present_mode;
        self.extent = extent;
        self.state = SwapchainState::Created;

        log::info!(
            "Created swapchain: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            self.images.len(),
            surface_format.format,
            present_mode
        );
        Ok(())
    }

    /// Rebuild the swapchain images and views for `framebuffer_size`.
    ///
    /// Synchronization primitives are kept. Owners of swapchain-sized
    /// attachments rebuild them afterwards.
    pub fn recreate(&mut self, framebuffer_size: (u32, u32)) -> RendererResult<vk::Extent2D> {
        self.device.wait_idle()?;
        self.state = SwapchainState::Recreating;
        self.destroy_views();
        self.create(framebuffer_size)?;
        Ok(self.extent)
    }

    fn destroy_views(&mut self) {
        for view in self.views.drain() {
            unsafe { self.device.raw().destroy_image_view(view, None) };
        }
        self.images = PerImage::empty();
    }

    /// Block on the in-flight fence of `slot`.
    pub fn wait_for_fence(&self, slot: FrameSlot) -> RendererResult<()> {
        unsafe {
            self.device
                .raw()
                .wait_for_fences(&[self.sync[slot].in_flight], true, u64::MAX)
        }
        .map_err(vk_error("wait for in-flight fence"))
    }

    pub fn reset_fence(&self, slot: FrameSlot) -> RendererResult<()> {
        unsafe { self.device.raw().reset_fences(&[self.sync[slot].in_flight]) }
            .map_err(vk_error("reset in-flight fence"))
    }

    /// Acquire the next image, signaling the image-available semaphore of `slot`.
    pub fn acquire(&self, slot: FrameSlot) -> RendererResult<AcquireOutcome> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                self.sync[slot].image_available,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Ready {
                image: ImageIndex::new(index),
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(vk_error("acquire swapchain image")(e)),
        }
    }

    /// Present `image` once the render-finished semaphore of `slot` signals.
    pub fn present(&self, slot: FrameSlot, image: ImageIndex) -> RendererResult<PresentOutcome> {
        let wait_semaphores = [self.sync[slot].render_finished];
        let swapchains = [self.swapchain];
        let image_indices = [image.raw()];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.loader
                .queue_present(self.device.present_queue(), &present_info)
        };
        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(vk_error("present")(e)),
        }
    }

    pub fn sync(&self, slot: FrameSlot) -> &FrameSync {
        &self.sync[slot]
    }

    /// Number of synchronization primitive sets, one per frame slot.
    pub fn sync_count(&self) -> usize {
        self.sync.len()
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn images(&self) -> &PerImage<vk::Image> {
        &self.images
    }

    pub fn views(&self) -> &PerImage<vk::ImageView> {
        &self.views
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        self.destroy_views();
        for sync in self.sync.iter() {
            sync.destroy(self.device.raw());
        }
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
            self.swapchain = vk::SwapchainKHR::null();
        }
        self.state = SwapchainState::Destroyed;
        log::debug!("Swapchain destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_all_or_release_on_failure() {
        let mut released = Vec::new();
        let result = create_all_or_release(
            &[1, 2, 3, 4],
            |n| {
                if n == 3 {
                    Err(RendererError::OutOfMemory)
                } else {
                    Ok(n * 10)
                }
            },
            |object| released.push(object),
        );

        assert!(matches!(result, Err(RendererError::OutOfMemory)));
        assert_eq!(released, vec![10, 20]);
    }

    #[test]
    fn test_create_all_or_release_success() {
        let mut released = Vec::new();
        let created = create_all_or_release(&[1, 2], |n| Ok(n + 1), |object: i32| {
            released.push(object)
        })
        .unwrap();

        assert_eq!(created, vec![2, 3]);
        assert!(released.is_empty());
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_surface_format_prefers_srgb() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(PREFERRED_SURFACE_FORMAT, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats, PREFERRED_SURFACE_FORMAT),
            Some(formats[1])
        );
    }

    #[test]
    fn test_surface_format_needs_matching_color_space() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(PREFERRED_SURFACE_FORMAT, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(
            choose_surface_format(&formats, PREFERRED_SURFACE_FORMAT),
            Some(formats[0])
        );
        assert_eq!(choose_surface_format(&[], PREFERRED_SURFACE_FORMAT), None);
    }

    #[test]
    fn test_present_mode() {
        use vk::PresentModeKHR as M;
        assert_eq!(choose_present_mode(&[M::FIFO, M::MAILBOX], true), M::MAILBOX);
        assert_eq!(choose_present_mode(&[M::FIFO, M::MAILBOX], false), M::MAILBOX);
        assert_eq!(choose_present_mode(&[M::FIFO, M::IMMEDIATE], true), M::FIFO);
        assert_eq!(choose_present_mode(&[M::FIFO], false), M::IMMEDIATE);
    }

    #[test]
    fn test_extent_uses_current_extent() {
        let mut caps = capabilities(2, 3);
        caps.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(choose_extent(&caps, (1920, 1080)), caps.current_extent);
    }

    #[test]
    fn test_extent_clamps_framebuffer() {
        let caps = capabilities(2, 3);
        assert_eq!(
            choose_extent(&caps, (1920, 1080)),
            vk::Extent2D {
                width: 1920,
                height: 1080
            }
        );
        assert_eq!(
            choose_extent(&caps, (8000, 0)),
            vk::Extent2D {
                width: 4096,
                height: 1
            }
        );
    }

    #[test]
    fn test_image_count() {
        assert_eq!(choose_image_count(&capabilities(2, 0)), 3);
        assert_eq!(choose_image_count(&capabilities(2, 8)), 3);
        assert_eq!(choose_image_count(&capabilities(3, 3)), 3);
    }
}
