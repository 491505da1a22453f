//! GPU platform settings.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::GpuError;

/// Which wgpu backends to enumerate adapters from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendSelection {
    /// Every backend wgpu was built with.
    All,
    /// Vulkan, Metal, DX12 and WebGPU.
    #[default]
    Primary,
    /// Vulkan only.
    Vulkan,
    /// Metal only.
    Metal,
    /// DirectX 12 only.
    Dx12,
    /// OpenGL / GLES only.
    Gl,
}

impl From<BackendSelection> for wgpu::Backends {
    fn from(selection: BackendSelection) -> Self {
        match selection {
            BackendSelection::All => wgpu::Backends::all(),
            BackendSelection::Primary => wgpu::Backends::PRIMARY,
            BackendSelection::Vulkan => wgpu::Backends::VULKAN,
            BackendSelection::Metal => wgpu::Backends::METAL,
            BackendSelection::Dx12 => wgpu::Backends::DX12,
            BackendSelection::Gl => wgpu::Backends::GL,
        }
    }
}

/// Device limits requested when a device context is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LimitsPreset {
    /// `wgpu::Limits::default()`.
    #[default]
    Default,
    /// `wgpu::Limits::downlevel_defaults()` raised to eight storage buffers
    /// per shader stage, for older hardware.
    Downlevel,
}

impl From<LimitsPreset> for wgpu::Limits {
    fn from(preset: LimitsPreset) -> Self {
        match preset {
            LimitsPreset::Default => wgpu::Limits::default(),
            // Ray formation writes seven storage buffers.
            LimitsPreset::Downlevel => wgpu::Limits {
                max_storage_buffers_per_shader_stage: 8,
                ..wgpu::Limits::downlevel_defaults()
            },
        }
    }
}

/// Settings for [`WgpuPlatform`](crate::WgpuPlatform).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    /// Backends to enumerate.
    pub backends: BackendSelection,
    /// Limits requested from each device.
    pub limits: LimitsPreset,
}

impl GpuConfig {
    /// Parse settings from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, GpuError> {
        Ok(toml::from_str(text)?)
    }

    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GpuError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
