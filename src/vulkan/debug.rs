//! Validation layer messages routed into `log`.

use std::ffi::CStr;

use ash::vk;

use crate::error::{RendererError, RendererResult};

/// Register [`debug_callback`] for warnings and errors from every message type.
///
/// Info and verbose output from the layers is very chatty, so it is only
/// requested when `log` is at debug level.
pub fn create_debug_messenger(
    debug_utils: &ash::ext::debug_utils::Instance,
) -> RendererResult<vk::DebugUtilsMessengerEXT> {
    let mut severity =
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING;
    if log::log_enabled!(log::Level::Debug) {
        severity |= vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE;
    }

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(severity)
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }.map_err(|e| {
        RendererError::InitializationFailed(format!("failed to create debug messenger: {e:?}"))
    })
}

/// Log level for a validation message severity.
fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Debug
    } else {
        log::Level::Trace
    }
}

fn type_label(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    // SAFETY: the driver passes either null or a valid callback data pointer
    let message = match unsafe { callback_data.as_ref() } {
        Some(data) if !data.p_message.is_null() => {
            // SAFETY: p_message is a null-terminated string owned by the driver
            unsafe { CStr::from_ptr(data.p_message) }.to_string_lossy()
        }
        _ => "(no message)".into(),
    };

    log::log!(
        target: "vulkan",
        severity_level(message_severity),
        "[{}] {}",
        type_label(message_type),
        message
    );

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_mapping() {
        assert_eq!(
            severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR),
            log::Level::Error
        );
        assert_eq!(
            severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING),
            log::Level::Warn
        );
        assert_eq!(
            severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::INFO),
            log::Level::Debug
        );
        assert_eq!(
            severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE),
            log::Level::Trace
        );
    }

    #[test]
    fn test_type_label() {
        assert_eq!(
            type_label(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION),
            "validation"
        );
        assert_eq!(
            type_label(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL),
            "general"
        );
    }
}
