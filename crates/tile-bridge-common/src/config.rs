//! Configuration structures for tile-bridge.
//!
//! This module defines configuration options for the bridge components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (fuel, memory cap)
//! - [`ModuleConfig`]: Module contract (word size, export names, capabilities)
//! - [`FrameConfig`]: Frame loop pacing and per-call budget
//! - [`FetchConfig`]: Tile fetch transport and policy
//! - [`FileConfig`]: Track file acceptance

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for the bridge.
/// It can be loaded from TOML or JSON; every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Module contract configuration.
    #[serde(default)]
    pub module: ModuleConfig,

    /// Frame loop configuration.
    #[serde(default)]
    pub frame: FrameConfig,

    /// Tile fetch configuration.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Track file configuration.
    #[serde(default)]
    pub files: FileConfig,
}

/// Wasmtime engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable fuel metering.
    ///
    /// When enabled, every export call gets a fresh budget of
    /// [`FrameConfig::frame_fuel`].
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,

    /// Maximum linear memory in megabytes.
    #[serde(default = "defaults::max_memory_mb")]
    pub max_memory_mb: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fuel_metering: defaults::fuel_metering(),
            max_memory_mb: defaults::max_memory_mb(),
        }
    }
}

impl EngineConfig {
    /// Get the memory cap in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb as usize) * 1024 * 1024
    }
}

/// Module contract configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModuleConfig {
    /// Width in bytes of pointer and length values (4 for wasm32, 8 for wasm64).
    #[serde(default = "defaults::word_size")]
    pub word_size: usize,

    /// Names of the exports the bridge calls.
    #[serde(default)]
    pub exports: ExportNames,

    /// Optional bridge imports offered to the module.
    #[serde(default)]
    pub capabilities: ImportCapabilities,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            word_size: defaults::word_size(),
            exports: ExportNames::default(),
            capabilities: ImportCapabilities::default(),
        }
    }
}

/// Names of the module exports making up the bridge contract.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExportNames {
    /// Linear memory export.
    pub memory: String,
    /// Runtime initialisation hook, called once before startup.
    pub init: String,
    /// Application startup.
    pub startup: String,
    /// Per-frame update; returns non-zero to keep running.
    pub update: String,
    /// Application shutdown.
    pub shutdown: String,
    /// Runtime finalisation hook, called once after shutdown.
    pub finalize: String,
    /// Surface size notifier `(width, height)`.
    pub resize: String,
    /// Tile payload callback `(ptr, len, x, y, z)`.
    pub fetch_callback: String,
    /// Track file payload callback `(ptr, len)`.
    pub track_load_callback: String,
    /// Module allocator `(size) -> ptr`.
    pub allocate: String,
    /// Module deallocator `(ptr)`.
    pub free: String,
}

impl Default for ExportNames {
    fn default() -> Self {
        Self {
            memory: "memory".into(),
            init: "_start".into(),
            startup: "main_start".into(),
            update: "main_update".into(),
            shutdown: "main_end".into(),
            finalize: "_end".into(),
            resize: "web_window_size_changed".into(),
            fetch_callback: "fetch_callback".into(),
            track_load_callback: "track_load_callback".into(),
            allocate: "malloc".into(),
            free: "free".into(),
        }
    }
}

/// Optional bridge imports.
///
/// A module built without tile or file support does not import the
/// corresponding host functions, and does not need to export the matching
/// callback.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ImportCapabilities {
    /// Offer `env::fetchTile` and require `fetch_callback`.
    pub tile_fetch: bool,
    /// Offer `env::openFileDialog`, accept file events and require `track_load_callback`.
    pub file_loading: bool,
}

impl Default for ImportCapabilities {
    fn default() -> Self {
        Self {
            tile_fetch: true,
            file_loading: true,
        }
    }
}

impl ImportCapabilities {
    /// Capabilities with every optional import disabled.
    pub const fn none() -> Self {
        Self {
            tile_fetch: false,
            file_loading: false,
        }
    }
}

/// Frame loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FrameConfig {
    /// Target frames per second for the default scheduler.
    #[serde(default = "defaults::fps")]
    pub fps: u32,

    /// Fuel granted to each export call when metering is enabled.
    #[serde(default = "defaults::frame_fuel")]
    pub frame_fuel: u64,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            fps: defaults::fps(),
            frame_fuel: defaults::frame_fuel(),
        }
    }
}

impl FrameConfig {
    /// Get the frame period as a `Duration`.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }
}

/// Tile fetch configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    /// Request timeout in milliseconds, enforced by the HTTP client.
    #[serde(default = "defaults::request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Connect timeout in milliseconds.
    #[serde(default = "defaults::connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Allowed tile host patterns (`host`, `*.domain`, `*`). Empty allows all.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,

    /// Reject loopback and private network addresses.
    #[serde(default)]
    pub block_private_addresses: bool,

    /// Maximum accepted response body size in bytes.
    #[serde(default = "defaults::max_body_bytes")]
    pub max_body_bytes: usize,

    /// Treat non-2xx responses as failures instead of forwarding the body.
    #[serde(default)]
    pub require_success_status: bool,

    /// User agent sent with tile requests.
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: defaults::request_timeout_ms(),
            connect_timeout_ms: defaults::connect_timeout_ms(),
            allowed_hosts: Vec::new(),
            block_private_addresses: false,
            max_body_bytes: defaults::max_body_bytes(),
            require_success_status: false,
            user_agent: defaults::user_agent(),
        }
    }
}

impl FetchConfig {
    /// Get the request timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Get the connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Track file configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileConfig {
    /// Accepted file name suffix, matched case-insensitively.
    #[serde(default = "defaults::accepted_extension")]
    pub accepted_extension: String,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            accepted_extension: defaults::accepted_extension(),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn fuel_metering() -> bool {
        false
    }

    pub const fn max_memory_mb() -> u32 {
        512
    }

    pub const fn word_size() -> usize {
        4
    }

    pub const fn fps() -> u32 {
        60
    }

    pub const fn frame_fuel() -> u64 {
        50_000_000
    }

    pub const fn request_timeout_ms() -> u64 {
        30_000
    }

    pub const fn connect_timeout_ms() -> u64 {
        10_000
    }

    pub const fn max_body_bytes() -> usize {
        10 * 1024 * 1024
    }

    pub fn user_agent() -> String {
        concat!("tile-bridge/", env!("CARGO_PKG_VERSION")).to_string()
    }

    pub fn accepted_extension() -> String {
        ".gpx".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();

        assert!(!config.engine.fuel_metering);
        assert_eq!(config.engine.max_memory_mb, 512);

        assert_eq!(config.module.word_size, 4);
        assert_eq!(config.module.exports.update, "main_update");
        assert_eq!(config.module.exports.allocate, "malloc");
        assert!(config.module.capabilities.tile_fetch);
        assert!(config.module.capabilities.file_loading);

        assert_eq!(config.frame.fps, 60);
        assert_eq!(config.fetch.max_body_bytes, 10 * 1024 * 1024);
        assert!(config.fetch.allowed_hosts.is_empty());
        assert!(!config.fetch.require_success_status);
        assert_eq!(config.files.accepted_extension, ".gpx");
    }

    #[test]
    fn test_config_serialization() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RuntimeConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.module.exports, deserialized.module.exports);
        assert_eq!(config.frame.frame_fuel, deserialized.frame.frame_fuel);
    }

    #[test]
    fn test_frame_interval() {
        let config = FrameConfig {
            fps: 50,
            ..Default::default()
        };
        assert_eq!(config.frame_interval(), Duration::from_millis(20));

        // Zero fps is clamped rather than dividing by zero
        let config = FrameConfig {
            fps: 0,
            ..Default::default()
        };
        assert_eq!(config.frame_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"module": {"word_size": 8, "exports": {"update": "tick"}}}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.module.word_size, 8);
        assert_eq!(config.module.exports.update, "tick");
        // Other export names keep their defaults
        assert_eq!(config.module.exports.startup, "main_start");
        assert!(config.module.capabilities.tile_fetch);
    }

    #[test]
    fn test_capabilities_none() {
        let caps = ImportCapabilities::none();
        assert!(!caps.tile_fetch);
        assert!(!caps.file_loading);
    }
}
