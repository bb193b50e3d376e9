//! Common types, errors, and configuration for tile-bridge.
//!
//! This crate provides shared functionality used across the tile-bridge workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for the engine, module contract, frame loop,
//!   tile fetching and file loading
//! - The TOML configuration file format

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{
    EngineConfig, ExportNames, FetchConfig, FileConfig, FrameConfig, ImportCapabilities,
    ModuleConfig, RuntimeConfig,
};
pub use config_file::{ConfigFile, ConfigFileError, SurfaceConfig};
pub use error::{HostFunctionError, RuntimeError};
