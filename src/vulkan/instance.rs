//! Vulkan instance and window surface.

use std::ffi::{c_char, CStr, CString};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use super::debug;
use crate::config::RendererConfig;
use crate::error::{RendererError, RendererResult};

/// Validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan entry points, instance, optional debug messenger and the surface of
/// the render window. Destroyed after every device object that uses it.
pub struct Instance {
    entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
}

impl Instance {
    /// Create an instance able to present to `window`.
    ///
    /// Validation is enabled when requested and the Khronos layer is
    /// installed; a missing layer only logs a warning.
    pub fn new<W>(window: &W, config: &RendererConfig) -> RendererResult<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| RendererError::InitializationFailed(format!("failed to load Vulkan: {e}")))?;

        let validation = config.validation && check_validation_layer_support(&entry);
        if config.validation && !validation {
            log::warn!("Validation layers requested but not available");
        }

        let display_handle = window
            .display_handle()
            .map_err(|e| RendererError::InitializationFailed(e.to_string()))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| RendererError::InitializationFailed(e.to_string()))?;

        let app_name = CString::new(config.application_name.as_str())
            .map_err(|e| RendererError::InitializationFailed(format!("invalid application name: {e}")))?;
        let engine_name = c"multipass-renderer";

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extensions: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(display_handle.as_raw())
                .map_err(|e| RendererError::InitializationFailed(e.to_string()))?
                .to_vec();
        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        #[allow(unused_mut)]
        let mut create_flags = vk::InstanceCreateFlags::empty();

        #[cfg(target_os = "macos")]
        {
            extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
            create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        }

        let layer_names: Vec<*const c_char> = if validation {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .flags(create_flags)
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
            RendererError::InitializationFailed(format!("failed to create Vulkan instance: {e:?}"))
        })?;

        let debug = if validation {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = debug::create_debug_messenger(&debug_utils)?;
            Some((debug_utils, messenger))
        } else {
            None
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| RendererError::SurfaceCreationFailed(format!("{e:?}")))?;

        log::info!(
            "Created Vulkan instance (validation: {})",
            if validation { "on" } else { "off" }
        );

        Ok(Self {
            entry,
            instance,
            debug,
            surface_loader,
            surface,
        })
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    /// Surface capabilities of `physical_device`.
    pub fn surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> RendererResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
        }
        .map_err(|e| RendererError::SwapchainCreationFailed(format!("surface capabilities: {e:?}")))
    }

    /// Formats the surface supports on `physical_device`.
    pub fn surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> RendererResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(physical_device, self.surface)
        }
        .map_err(|e| RendererError::SwapchainCreationFailed(format!("surface formats: {e:?}")))
    }

    /// Present modes the surface supports on `physical_device`.
    pub fn surface_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> RendererResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
        }
        .map_err(|e| RendererError::SwapchainCreationFailed(format!("present modes: {e:?}")))
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Check if the validation layer is available.
fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let available_layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(_) => return false,
    };

    available_layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER_NAME
    })
}
