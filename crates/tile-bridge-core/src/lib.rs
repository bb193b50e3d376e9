//! Core Wasmtime runtime for tile-bridge.
//!
//! This crate provides the module side of the bridge:
//! - [`WasmEngine`]: Configured Wasmtime engine with async support
//! - [`CompiledModule`]: Compiled WebAssembly module wrapper
//! - [`BridgeContext`]: Store data reachable from host imports
//! - [`MemoryInterface`]: Marshaling of strings and buffers through linear memory
//! - [`ModuleExports`]: The export contract the bridge calls into
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  - Async support, optional fuel metering                │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   CompiledModule                        │
//! │  - Read asynchronously, compiled on a blocking worker   │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │            Store<BridgeContext> + Instance              │
//! │  - MemoryInterface (bound once)                         │
//! │  - Queued host requests, console output, metrics        │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod exports;
pub mod instance;
pub mod memory;
pub mod module;
pub mod store;

pub use engine::WasmEngine;
pub use exports::ModuleExports;
pub use instance::{instantiate, map_call_error};
pub use memory::{MemoryInterface, WordSize};
pub use module::CompiledModule;
pub use store::{
    BridgeContext, BridgeMetrics, ConsoleLine, ConsoleStream, HostRequest, TileCoords,
    TileRequest,
};
