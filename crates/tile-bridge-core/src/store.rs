//! Bridge execution context and store management.
//!
//! This module provides:
//! - [`BridgeContext`]: State reachable from host imports through [`wasmtime::Caller`]
//! - [`HostRequest`]: Work queued by imports for the driver to dispatch
//! - [`ConsoleBuffer`]: Line buffering for the module's console output
//! - [`BridgeMetrics`]: Counters reported when the run ends

use std::time::{Duration, Instant};

use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};

use crate::WasmEngine;
use crate::memory::MemoryInterface;
use tile_bridge_common::{RuntimeConfig, RuntimeError};

/// State owned by the bridge store.
///
/// Imports run synchronously inside an export call, so they never start host
/// work themselves: they record a [`HostRequest`] and the driver dispatches it
/// once the export has returned.
pub struct BridgeContext {
    /// Marshaling interface, bound after instantiation.
    pub memory: MemoryInterface,

    /// Console output written by the module.
    pub console: ConsoleBuffer,

    /// Run counters.
    pub metrics: BridgeMetrics,

    /// Requests queued by imports during the current export call.
    requests: Vec<HostRequest>,

    /// Linear memory growth limits.
    limits: StoreLimits,

    /// Fuel granted to every export call, if metering is enabled.
    fuel_budget: Option<u64>,

    /// Bridge start time, the origin of `tick_now`.
    start_time: Instant,
}

/// Work an import asks the host to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRequest {
    /// Fetch a tile and deliver it through the fetch callback.
    FetchTile(TileRequest),
    /// Trigger the host's file selection affordance.
    OpenFileDialog,
}

/// A tile fetch issued by the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    /// URL decoded from module memory.
    pub url: String,
    /// Coordinates handed back unchanged with the payload.
    pub coords: TileCoords,
}

/// Opaque tile coordinate triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoords {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl std::fmt::Display for TileCoords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Output stream the module wrote to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleStream {
    /// File descriptor 1.
    Stdout,
    /// File descriptor 2.
    Stderr,
}

impl ConsoleStream {
    /// Map a file descriptor to a stream. Only 1 and 2 are valid.
    pub fn from_fd(fd: i32) -> Option<Self> {
        match fd {
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            _ => None,
        }
    }
}

/// A complete line of console output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    /// Stream the line was written to.
    pub stream: ConsoleStream,
    /// Line text without the trailing newline.
    pub text: String,
}

/// Per-stream line buffer for module console writes.
///
/// Writes may split lines arbitrarily; only complete lines are handed to the
/// host, partial lines are kept until the next newline or [`Self::flush`].
#[derive(Debug, Default)]
pub struct ConsoleBuffer {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    lines: Vec<ConsoleLine>,
}

impl ConsoleBuffer {
    /// Append raw bytes to a stream.
    pub fn write(&mut self, stream: ConsoleStream, bytes: &[u8]) {
        let buffer = match stream {
            ConsoleStream::Stdout => &mut self.stdout,
            ConsoleStream::Stderr => &mut self.stderr,
        };
        buffer.extend_from_slice(bytes);

        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..pos])
                .trim_end_matches('\r')
                .to_string();
            self.lines.push(ConsoleLine { stream, text });
        }
    }

    /// Take every complete line written so far.
    pub fn take_lines(&mut self) -> Vec<ConsoleLine> {
        std::mem::take(&mut self.lines)
    }

    /// Terminate any partial lines and take everything.
    pub fn flush(&mut self) -> Vec<ConsoleLine> {
        for (stream, buffer) in [
            (ConsoleStream::Stdout, &mut self.stdout),
            (ConsoleStream::Stderr, &mut self.stderr),
        ] {
            if !buffer.is_empty() {
                let text = String::from_utf8_lossy(buffer).to_string();
                buffer.clear();
                self.lines.push(ConsoleLine { stream, text });
            }
        }
        self.take_lines()
    }
}

/// Counters collected over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeMetrics {
    /// Completed calls to the per-frame update export.
    pub frames: u64,
    /// Tile payloads delivered to the fetch callback.
    pub tiles_delivered: u64,
    /// Tile fetches abandoned because of a host failure.
    pub tile_failures: u64,
    /// Track payloads delivered to the file-load callback.
    pub tracks_delivered: u64,
    /// Track reads abandoned because of a host failure.
    pub track_failures: u64,
    /// Files rejected by the extension filter.
    pub files_rejected: u64,
    /// Deliveries abandoned because a module call failed.
    pub callback_failures: u64,
    /// Transfer buffers allocated in module memory.
    pub buffers_allocated: u64,
    /// Transfer buffers released back to the module allocator.
    pub buffers_freed: u64,
    /// Fuel consumed across all export calls.
    pub fuel_consumed: u64,
}

impl BridgeContext {
    /// Create a new context around an unbound memory interface.
    pub fn new(memory: MemoryInterface) -> Self {
        Self {
            memory,
            console: ConsoleBuffer::default(),
            metrics: BridgeMetrics::default(),
            requests: Vec::new(),
            limits: StoreLimits::default(),
            fuel_budget: None,
            start_time: Instant::now(),
        }
    }

    /// Queue a request for the driver.
    pub fn request(&mut self, request: HostRequest) {
        self.requests.push(request);
    }

    /// Take every queued request, in issue order.
    pub fn take_requests(&mut self) -> Vec<HostRequest> {
        std::mem::take(&mut self.requests)
    }

    /// Get elapsed time since the context was created.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Fuel granted to each export call, if metering is enabled.
    pub fn fuel_budget(&self) -> Option<u64> {
        self.fuel_budget
    }
}

/// Create the bridge store.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_store(
    engine: &WasmEngine,
    config: &RuntimeConfig,
    memory: MemoryInterface,
) -> Result<Store<BridgeContext>, RuntimeError> {
    let mut context = BridgeContext::new(memory);
    context.limits = StoreLimitsBuilder::new()
        .memory_size(engine.config().max_memory_bytes())
        .instances(1)
        .build();

    if engine.is_fuel_metered() {
        context.fuel_budget = Some(config.frame.frame_fuel);
    }

    let mut store = Store::new(engine.inner(), context);
    store.limiter(|ctx| &mut ctx.limits);

    arm_fuel(&mut store)?;

    Ok(store)
}

/// Refill the store's fuel to the per-call budget.
///
/// Does nothing when metering is disabled.
pub fn arm_fuel(store: &mut Store<BridgeContext>) -> Result<(), RuntimeError> {
    if let Some(budget) = store.data().fuel_budget {
        store
            .set_fuel(budget)
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))?;
    }
    Ok(())
}

/// Get remaining fuel from a store.
pub fn get_remaining_fuel(store: &Store<BridgeContext>) -> Option<u64> {
    store.get_fuel().ok()
}

/// Record the fuel burnt since the store was last armed.
pub fn record_fuel(store: &mut Store<BridgeContext>) {
    if let Some(budget) = store.data().fuel_budget {
        let remaining = get_remaining_fuel(store).unwrap_or(0);
        store.data_mut().metrics.fuel_consumed += budget.saturating_sub(remaining);
    }
}
