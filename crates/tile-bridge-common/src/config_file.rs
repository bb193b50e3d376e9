//! Configuration file structures for tile-bridge.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`SurfaceConfig`]: Initial size of the console rendering surface

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::RuntimeConfig;

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// module_path = "./web/index.wasm"
///
/// [runtime.module]
/// word_size = 4
///
/// [runtime.module.capabilities]
/// tile_fetch = true
/// file_loading = true
///
/// [runtime.frame]
/// fps = 60
///
/// [runtime.fetch]
/// allowed_hosts = ["*.tile.openstreetmap.org"]
///
/// [runtime.files]
/// accepted_extension = ".gpx"
///
/// [surface]
/// width = 1280
/// height = 720
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Path to the compiled module, if not given on the command line.
    #[serde(default)]
    pub module_path: Option<String>,

    /// Runtime configuration.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Rendering surface configuration.
    #[serde(default)]
    pub surface: SurfaceConfig,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// Initial size of the rendering surface in pixels.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct SurfaceConfig {
    /// Width in pixels.
    #[serde(default = "defaults::width")]
    pub width: u32,

    /// Height in pixels.
    #[serde(default = "defaults::height")]
    pub height: u32,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width: defaults::width(),
            height: defaults::height(),
        }
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

/// Default value functions for serde.
mod defaults {
    pub const fn width() -> u32 {
        1280
    }

    pub const fn height() -> u32 {
        720
    }
}
