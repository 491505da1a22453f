//! Ray formation settings.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RaycastError, Result};
use crate::params::DEFAULT_GRADIENT_DARKNESS;

/// Smallest supported tile edge.
pub const MIN_TILE_SIZE: u32 = 4;

/// Largest supported tile edge.
pub const MAX_TILE_SIZE: u32 = 16;

/// Ray formation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaycastConfig {
    /// Edge length of the square pixel tiles rays are formed in.
    pub tile_size: u32,
    /// Darkness of gradient shading, 0.0 to 1.0.
    pub gradient_darkness: f32,
}

impl Default for RaycastConfig {
    fn default() -> Self {
        Self {
            tile_size: MAX_TILE_SIZE,
            gradient_darkness: DEFAULT_GRADIENT_DARKNESS,
        }
    }
}

impl RaycastConfig {
    /// Validate settings.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_TILE_SIZE..=MAX_TILE_SIZE).contains(&self.tile_size) {
            return Err(RaycastError::InvalidTileSize(self.tile_size));
        }
        if !(0.0..=1.0).contains(&self.gradient_darkness) {
            return Err(RaycastError::InvalidShading(self.gradient_darkness));
        }
        Ok(())
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
