//! Renderer error types.

use ash::vk;
use thiserror::Error;

/// Errors produced by the renderer.
///
/// None of these are recoverable inside a frame. The two tolerated swapchain
/// conditions (out-of-date and suboptimal) never reach this type; they are
/// handled by recreating the swapchain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RendererError {
    #[error("initialization failed: {0}")]
    InitializationFailed(String),
    #[error("failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("failed to create swapchain: {0}")]
    SwapchainCreationFailed(String),
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),
    #[error("shader compilation failed: {0}")]
    ShaderCompilationFailed(String),
    #[error("command failed: {0}")]
    CommandFailed(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("GPU device lost")]
    DeviceLost,
    #[error("missing resource: {0}")]
    MissingResource(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type RendererResult<T> = Result<T, RendererError>;

/// Map a failed Vulkan call into a [`RendererError`].
///
/// Memory exhaustion and device loss get their own variants, everything else
/// becomes [`RendererError::CommandFailed`] carrying `context`.
pub fn vk_error(context: &str) -> impl Fn(vk::Result) -> RendererError + '_ {
    move |result| match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            RendererError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => RendererError::DeviceLost,
        vk::Result::TIMEOUT => RendererError::Timeout(context.to_string()),
        other => RendererError::CommandFailed(format!("{context}: {other:?}")),
    }
}

/// Map a failed resource creation call into a [`RendererError`].
pub fn creation_error(what: &str) -> impl Fn(vk::Result) -> RendererError + '_ {
    move |result| match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            RendererError::OutOfMemory
        }
        other => RendererError::ResourceCreationFailed(format!("{what}: {other:?}")),
    }
}

impl From<gpu_allocator::AllocationError> for RendererError {
    fn from(e: gpu_allocator::AllocationError) -> Self {
        match e {
            gpu_allocator::AllocationError::OutOfMemory => RendererError::OutOfMemory,
            other => RendererError::ResourceCreationFailed(format!("allocation failed: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RendererError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = RendererError::InitializationFailed("no GPU found".to_string());
        assert_eq!(err.to_string(), "initialization failed: no GPU found");
    }

    #[test]
    fn test_vk_error_mapping() {
        assert_eq!(
            vk_error("submit")(vk::Result::ERROR_DEVICE_LOST),
            RendererError::DeviceLost
        );
        assert_eq!(
            vk_error("submit")(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            RendererError::OutOfMemory
        );
        assert_eq!(
            vk_error("submit")(vk::Result::ERROR_UNKNOWN),
            RendererError::CommandFailed("submit: ERROR_UNKNOWN".to_string())
        );
    }

    #[test]
    fn test_creation_error_mapping() {
        let err = creation_error("image")(vk::Result::ERROR_FORMAT_NOT_SUPPORTED);
        assert_eq!(
            err,
            RendererError::ResourceCreationFailed("image: ERROR_FORMAT_NOT_SUPPORTED".to_string())
        );
    }
}
