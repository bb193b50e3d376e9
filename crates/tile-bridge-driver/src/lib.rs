//! Lifecycle and frame loop driver for tile-bridge.
//!
//! - [`BridgeDriver`]: Starts a module, runs its frame loop and shuts it down
//! - [`FrameScheduler`]: Frame pacing, with a tokio interval implementation
//! - [`Lifecycle`]: The `Uninstantiated → Instantiating → Running → Terminated` state machine
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tile_bridge_common::RuntimeConfig;
//! use tile_bridge_driver::{BridgeDriver, HostServices, IntervalScheduler};
//! use tile_bridge_host::{FsFileSource, HttpTileFetcher, host_event_channel};
//!
//! let config = RuntimeConfig::default();
//! let (events_tx, events_rx) = host_event_channel();
//! let services = HostServices {
//!     surface: Arc::new(my_surface),
//!     fetcher: Arc::new(HttpTileFetcher::new(&config.fetch)?),
//!     files: Arc::new(FsFileSource),
//!     scheduler: Box::new(IntervalScheduler::from_config(&config.frame)),
//! };
//!
//! let mut driver = BridgeDriver::new(config, services, events_rx)?;
//! driver.start_file("viewer.wasm").await?;
//! let summary = driver.run().await?;
//! ```

pub mod driver;
pub mod lifecycle;
pub mod scheduler;

pub use driver::{BridgeDriver, HostServices, RunSummary};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use scheduler::{FrameScheduler, IntervalScheduler};
