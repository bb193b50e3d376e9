//! Host side of tile-bridge.
//!
//! This crate provides everything the module imports and every asynchronous
//! service the bridge performs on its behalf.
//!
//! # Components
//!
//! - [`linker`]: Import table construction with capability-gated bridge imports
//! - [`runtime`]: Default runtime imports (console, clocks, math, random)
//! - [`callback`]: Pending host operations and delivery into module memory
//! - [`fetch`]: Tile fetching over HTTP
//! - [`policy`]: Checks applied to outbound tile requests
//! - [`files`]: Track file reading and extension filtering
//! - [`surface`]: The host surface and its input events
//! - [`logging`]: Module console output
//!
//! # Failure Model
//!
//! Host failures are never reported to the module. A failed fetch or read is
//! logged and counted, and the corresponding callback is simply not invoked.

pub mod callback;
pub mod fetch;
pub mod files;
pub mod linker;
pub mod logging;
pub mod policy;
pub mod runtime;
pub mod surface;

pub use callback::{CallbackAdapter, Completion, Delivery};
pub use fetch::{HttpTileFetcher, TileFetcher};
pub use files::{FileSource, FsFileSource, TrackFilter};
pub use linker::build_import_table;
pub use logging::ConsoleHost;
pub use policy::FetchPolicy;
pub use surface::{
    HostEvent, HostEventReceiver, HostEventSender, HostSurface, SelectedFile, host_event_channel,
};
