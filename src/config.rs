//! Renderer configuration.
//!
//! Loaded from a TOML file or built in code. Every field has a default so a
//! config file only needs the values it changes:
//!
//! ```toml
//! title = "Viewer"
//! width = 1600
//! height = 900
//! vsync = false
//! msaa_samples = 4
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{RendererError, RendererResult};

/// Configuration for initializing the renderer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Window title
    pub title: String,
    /// Application name reported to the Vulkan driver
    pub application_name: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Prefer FIFO presentation when mailbox is unavailable
    pub vsync: bool,
    /// Enable the Khronos validation layer when it is installed
    pub validation: bool,
    /// Requested MSAA sample count for the swapchain pass
    pub msaa_samples: u32,
    /// Create the object picking pass
    pub picking: bool,
    /// Render the scene into an off-screen viewport instead of the swapchain
    pub viewport: bool,
    /// Create the UI overlay pass
    pub ui: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            title: "Multipass Renderer".to_string(),
            application_name: "multipass-renderer".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            validation: cfg!(debug_assertions),
            msaa_samples: 4,
            picking: true,
            viewport: false,
            ui: true,
        }
    }
}

impl RendererConfig {
    /// Load a config from a TOML file.
    pub fn load(path: &Path) -> RendererResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RendererError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| RendererError::Config(format!("{}: {e}", path.display())))
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(content: &str) -> RendererResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RendererError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the renderer cannot work with.
    pub fn validate(&self) -> RendererResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RendererError::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.viewport && !self.ui {
            return Err(RendererError::Config(
                "the viewport pass is displayed through the UI, enable `ui` as well".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = RendererConfig::from_toml_str("width = 1920\nvsync = false\n").unwrap();
        assert_eq!(config.width, 1920);
        assert!(!config.vsync);
        assert_eq!(config.height, RendererConfig::default().height);
        assert_eq!(config.msaa_samples, 4);
    }

    #[test]
    fn test_zero_size_rejected() {
        let err = RendererConfig::from_toml_str("height = 0").unwrap_err();
        assert!(matches!(err, RendererError::Config(_)));
    }

    #[test]
    fn test_viewport_requires_ui() {
        let err = RendererConfig::from_toml_str("viewport = true\nui = false").unwrap_err();
        assert!(err.to_string().contains("enable `ui`"));
    }

    #[test]
    fn test_unknown_type_is_config_error() {
        let err = RendererConfig::from_toml_str("width = \"wide\"").unwrap_err();
        assert!(matches!(err, RendererError::Config(_)));
    }
}
