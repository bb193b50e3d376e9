//! Asynchronous host operations and delivery of their results.
//!
//! The [`CallbackAdapter`] starts tile fetches and track reads as tasks in a
//! [`JoinSet`] and hands each finished [`Completion`] back to the driver.
//! The driver then calls [`CallbackAdapter::complete`] with exclusive access
//! to the store, which stages the payload in module memory and invokes the
//! matching callback export:
//!
//! ```text
//! allocate(len) -> write bytes -> callback(ptr, len, ..) -> free(ptr)
//! ```
//!
//! Tile buffers are freed once the callback returns, even if it trapped.
//! Track buffers are left to the module. Host failures never reach the
//! module: they are logged, counted, and the callback is not invoked.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use wasmtime::Store;

use crate::{FileSource, SelectedFile, TileFetcher, TrackFilter};
use tile_bridge_common::{HostFunctionError, RuntimeError};
use tile_bridge_core::store::{arm_fuel, record_fuel};
use tile_bridge_core::{BridgeContext, BridgeMetrics, TileRequest};

/// A finished host operation awaiting delivery.
#[derive(Debug)]
pub enum Completion {
    /// A tile fetch finished.
    Tile {
        /// The request as issued by the module.
        request: TileRequest,
        /// Response body or the reason the fetch failed.
        result: Result<Vec<u8>, HostFunctionError>,
    },
    /// A track file read finished.
    Track {
        /// The file that was read.
        file: SelectedFile,
        /// File contents or the reason the read failed.
        result: Result<Vec<u8>, HostFunctionError>,
    },
}

/// What happened to a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The callback ran to completion.
    Delivered,
    /// The host operation had failed; nothing was handed to the module.
    HostFailed,
    /// A module call along the way failed; the delivery was abandoned.
    CallbackFailed,
}

/// Runs host operations and delivers their results to the module.
pub struct CallbackAdapter {
    fetcher: Arc<dyn TileFetcher>,
    files: Arc<dyn FileSource>,
    filter: TrackFilter,
    pending: JoinSet<Completion>,
}

impl CallbackAdapter {
    /// Create an adapter with no pending operations.
    pub fn new(
        fetcher: Arc<dyn TileFetcher>,
        files: Arc<dyn FileSource>,
        filter: TrackFilter,
    ) -> Self {
        Self {
            fetcher,
            files,
            filter,
            pending: JoinSet::new(),
        }
    }

    /// Start fetching a tile.
    pub fn fetch_tile(&mut self, request: TileRequest) {
        debug!(url = %request.url, coords = %request.coords, "Starting tile fetch");
        let fetcher = Arc::clone(&self.fetcher);
        self.pending.spawn(async move {
            let result = fetcher.fetch(&request.url).await;
            Completion::Tile { request, result }
        });
    }

    /// Start reading a track file if it passes the extension filter.
    ///
    /// Returns `false` when the file is rejected.
    pub fn load_track(&mut self, file: SelectedFile) -> bool {
        if let Err(e) = self.filter.check(&file) {
            error!(error = %e, "Rejected track file");
            return false;
        }

        debug!(name = %file.name, "Reading track file");
        let files = Arc::clone(&self.files);
        self.pending.spawn(async move {
            let result = files.read(&file).await;
            Completion::Track { file, result }
        });
        true
    }

    /// Number of operations still running or awaiting delivery.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Wait for the next finished operation.
    ///
    /// Returns `None` immediately when nothing is pending.
    pub async fn next_completion(&mut self) -> Option<Completion> {
        while let Some(joined) = self.pending.join_next().await {
            match joined {
                Ok(completion) => return Some(completion),
                Err(e) => warn!(error = %e, "Host operation did not finish"),
            }
        }
        None
    }

    /// Drop every pending operation. Returns how many were abandoned.
    pub fn abandon_all(&mut self) -> usize {
        let abandoned = self.pending.len();
        self.pending.abort_all();
        self.pending.detach_all();
        abandoned
    }

    /// Deliver a completion to the module.
    ///
    /// # Errors
    ///
    /// Only precondition failures (an unbound interface, a word size
    /// mismatch, a missing callback) are returned. Traps and out-of-bounds
    /// writes abandon the delivery and are reported as
    /// [`Delivery::CallbackFailed`].
    pub async fn complete(
        &self,
        store: &mut Store<BridgeContext>,
        completion: Completion,
    ) -> Result<Delivery, RuntimeError> {
        match completion {
            Completion::Tile {
                request,
                result: Ok(bytes),
            } => {
                let outcome = deliver_tile(store, &request, &bytes).await;
                settle(store, outcome, |metrics| metrics.tiles_delivered += 1)
            }
            Completion::Tile {
                request,
                result: Err(e),
            } => {
                warn!(url = %request.url, coords = %request.coords, error = %e, "Tile fetch failed");
                store.data_mut().metrics.tile_failures += 1;
                Ok(Delivery::HostFailed)
            }
            Completion::Track {
                file,
                result: Ok(bytes),
            } => {
                let outcome = deliver_track(store, &bytes).await;
                if outcome.is_ok() {
                    info!(name = %file.name, size = bytes.len(), "Track delivered");
                }
                settle(store, outcome, |metrics| metrics.tracks_delivered += 1)
            }
            Completion::Track {
                file,
                result: Err(e),
            } => {
                error!(name = %file.name, error = %e, "Error reading file");
                store.data_mut().metrics.track_failures += 1;
                Ok(Delivery::HostFailed)
            }
        }
    }
}

impl std::fmt::Debug for CallbackAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackAdapter")
            .field("filter", &self.filter)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// Stage a tile and call the fetch callback, freeing the buffer afterwards.
async fn deliver_tile(
    store: &mut Store<BridgeContext>,
    request: &TileRequest,
    bytes: &[u8],
) -> Result<(), RuntimeError> {
    let memory = store.data().memory.clone();
    let exports = memory.exports()?.clone();
    let len = bytes.len() as u64;

    let ptr = memory.allocate(store, len).await?;
    let called = match memory.write_bytes(&mut *store, ptr, bytes) {
        Ok(()) => {
            exports
                .fetch_callback(store, memory.word_size(), ptr, len, request.coords)
                .await
        }
        Err(e) => Err(e),
    };

    // Fresh budget for the free; the callback may have exhausted fuel.
    record_fuel(store);
    arm_fuel(store)?;
    let freed = memory.free(store, ptr).await;

    called?;
    freed
}

/// Stage a track and call the file-load callback. The module owns the buffer
/// once the callback has been invoked.
async fn deliver_track(store: &mut Store<BridgeContext>, bytes: &[u8]) -> Result<(), RuntimeError> {
    let memory = store.data().memory.clone();
    let exports = memory.exports()?.clone();
    let len = bytes.len() as u64;

    let ptr = memory.allocate(store, len).await?;
    if let Err(e) = memory.write_bytes(&mut *store, ptr, bytes) {
        memory.free(store, ptr).await?;
        return Err(e);
    }

    exports
        .track_load_callback(store, memory.word_size(), ptr, len)
        .await
}

fn settle(
    store: &mut Store<BridgeContext>,
    outcome: Result<(), RuntimeError>,
    on_success: impl FnOnce(&mut BridgeMetrics),
) -> Result<Delivery, RuntimeError> {
    match outcome {
        Ok(()) => {
            on_success(&mut store.data_mut().metrics);
            Ok(Delivery::Delivered)
        }
        Err(e) if e.is_precondition() => Err(e),
        Err(e) => {
            warn!(error = %e, "Callback delivery abandoned");
            store.data_mut().metrics.callback_failures += 1;
            Ok(Delivery::CallbackFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tile_bridge_common::{ExportNames, ImportCapabilities, RuntimeConfig};
    use tile_bridge_core::store::create_store;
    use tile_bridge_core::{
        CompiledModule, MemoryInterface, TileCoords, WasmEngine, WordSize,
        instantiate,
    };
    use wasmtime::Linker;

    /// Records what each callback saw in module memory:
    /// 0 len, 4 first byte, 8/12/16 x/y/z, 20 frees, 24 track deliveries.
    const CALLBACK_WAT: &str = r#"
        (module
            (memory (export "memory") 1)
            (global $next (mut i32) (i32.const 4096))

            (func (export "malloc") (param $size i32) (result i32)
                (local $ptr i32)
                (local.set $ptr (global.get $next))
                (global.set $next (i32.add (global.get $next) (local.get $size)))
                (local.get $ptr))
            (func (export "free") (param $ptr i32)
                (i32.store (i32.const 20) (i32.add (i32.load (i32.const 20)) (i32.const 1))))

            (func (export "fetch_callback") (param $ptr i32) (param $len i32) (param $x i32) (param $y i32) (param $z i32)
                (i32.store (i32.const 0) (local.get $len))
                (i32.store (i32.const 4) (i32.load8_u (local.get $ptr)))
                (i32.store (i32.const 8) (local.get $x))
                (i32.store (i32.const 12) (local.get $y))
                (i32.store (i32.const 16) (local.get $z)))
            (func (export "track_load_callback") (param $ptr i32) (param $len i32)
                (i32.store (i32.const 24) (i32.add (i32.load (i32.const 24)) (i32.const 1)))
                (i32.store (i32.const 0) (local.get $len))
                (i32.store (i32.const 4) (i32.load8_u (local.get $ptr))))

            (func (export "main_start"))
            (func (export "main_update") (result i32) (i32.const 1))
            (func (export "main_end"))
            (func (export "web_window_size_changed") (param i32 i32))
        )
    "#;

    struct StaticFetcher(Result<Vec<u8>, ()>);

    #[async_trait]
    impl TileFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, HostFunctionError> {
            self.0.clone().map_err(|()| HostFunctionError::FetchFailed {
                url: url.to_string(),
                reason: "connection refused".into(),
            })
        }
    }

    struct StaticFiles(Vec<u8>);

    #[async_trait]
    impl FileSource for StaticFiles {
        async fn read(&self, _file: &SelectedFile) -> Result<Vec<u8>, HostFunctionError> {
            Ok(self.0.clone())
        }
    }

    fn adapter(fetch: Result<Vec<u8>, ()>) -> CallbackAdapter {
        adapter_with_track(fetch, b"<gpx/>".to_vec())
    }

    fn adapter_with_track(fetch: Result<Vec<u8>, ()>, track: Vec<u8>) -> CallbackAdapter {
        CallbackAdapter::new(
            Arc::new(StaticFetcher(fetch)),
            Arc::new(StaticFiles(track)),
            TrackFilter::default(),
        )
    }

    async fn setup(wat: &str, word_size: WordSize) -> Store<BridgeContext> {
        setup_with(wat, word_size, RuntimeConfig::default()).await
    }

    async fn setup_with(
        wat: &str,
        word_size: WordSize,
        config: RuntimeConfig,
    ) -> Store<BridgeContext> {
        let engine = WasmEngine::new(&config.engine).unwrap();
        let module = CompiledModule::from_wat(engine.inner(), wat).unwrap();
        let linker = Linker::new(engine.inner());
        let mut store = create_store(&engine, &config, MemoryInterface::new(word_size)).unwrap();
        instantiate(
            &linker,
            &mut store,
            &module,
            &ExportNames::default(),
            ImportCapabilities::default(),
        )
        .await
        .unwrap();
        store
    }

    fn slot(store: &Store<BridgeContext>, offset: u64) -> i32 {
        let memory = store.data().memory.clone();
        let bytes = memory.read_bytes(store, offset, 4).unwrap();
        i32::from_le_bytes(bytes.try_into().unwrap())
    }

    fn tile_request() -> TileRequest {
        TileRequest {
            url: "https://tile.openstreetmap.org/7/66/43.png".into(),
            coords: TileCoords { x: 66, y: 43, z: 7 },
        }
    }

    #[tokio::test]
    async fn test_next_completion_empty() {
        let mut adapter = adapter(Ok(vec![]));
        assert_eq!(adapter.pending(), 0);
        assert!(adapter.next_completion().await.is_none());
    }

    #[tokio::test]
    async fn test_rejected_track_is_not_read() {
        let mut adapter = adapter(Ok(vec![]));

        assert!(!adapter.load_track(SelectedFile::from_path("/tmp/track.txt")));
        assert_eq!(adapter.pending(), 0);

        assert!(adapter.load_track(SelectedFile::from_path("/tmp/TRACK.GPX")));
        assert_eq!(adapter.pending(), 1);
    }

    #[tokio::test]
    async fn test_tile_failure_makes_no_module_call() {
        let mut store = setup(CALLBACK_WAT, WordSize::Four).await;
        let mut adapter = adapter(Err(()));

        adapter.fetch_tile(tile_request());
        let completion = adapter.next_completion().await.unwrap();
        let delivery = adapter.complete(&mut store, completion).await.unwrap();

        assert_eq!(delivery, Delivery::HostFailed);
        assert_eq!(
            store.data().metrics,
            BridgeMetrics {
                tile_failures: 1,
                ..BridgeMetrics::default()
            }
        );
    }

    #[tokio::test]
    async fn test_abandon_all() {
        let mut adapter = adapter(Ok(vec![1]));
        adapter.fetch_tile(tile_request());
        adapter.fetch_tile(tile_request());

        assert_eq!(adapter.abandon_all(), 2);
        assert_eq!(adapter.pending(), 0);
        assert!(adapter.next_completion().await.is_none());
    }

    #[tokio::test]
    async fn test_tile_delivered_and_freed() {
        let mut store = setup(CALLBACK_WAT, WordSize::Four).await;
        let mut adapter = adapter(Ok(b"\x89PNG tile".to_vec()));

        adapter.fetch_tile(tile_request());
        let completion = adapter.next_completion().await.unwrap();
        let delivery = adapter.complete(&mut store, completion).await.unwrap();

        assert_eq!(delivery, Delivery::Delivered);
        assert_eq!(slot(&store, 0), 9);
        assert_eq!(slot(&store, 4), 0x89);
        assert_eq!((slot(&store, 8), slot(&store, 12), slot(&store, 16)), (66, 43, 7));
        assert_eq!(slot(&store, 20), 1);

        let metrics = &store.data().metrics;
        assert_eq!(metrics.tiles_delivered, 1);
        assert_eq!(metrics.buffers_allocated, 1);
        assert_eq!(metrics.buffers_freed, 1);
    }

    #[tokio::test]
    async fn test_tile_buffer_freed_after_callback_trap() {
        let wat = CALLBACK_WAT.replace(
            "(i32.store (i32.const 16) (local.get $z)))",
            "(i32.store (i32.const 16) (local.get $z)) unreachable)",
        );
        let mut store = setup(&wat, WordSize::Four).await;
        let mut adapter = adapter(Ok(vec![1, 2, 3]));

        adapter.fetch_tile(tile_request());
        let completion = adapter.next_completion().await.unwrap();
        let delivery = adapter.complete(&mut store, completion).await.unwrap();

        assert_eq!(delivery, Delivery::CallbackFailed);
        assert_eq!(slot(&store, 20), 1);
        let metrics = &store.data().metrics;
        assert_eq!(metrics.callback_failures, 1);
        assert_eq!(metrics.tiles_delivered, 0);
        assert_eq!(metrics.buffers_freed, 1);
    }

    #[tokio::test]
    async fn test_tile_buffer_freed_after_fuel_exhaustion() {
        let wat = CALLBACK_WAT.replace(
            "(i32.store (i32.const 16) (local.get $z)))",
            "(i32.store (i32.const 16) (local.get $z)) (loop $spin (br $spin)))",
        );
        let mut config = RuntimeConfig::default();
        config.engine.fuel_metering = true;
        config.frame.frame_fuel = 10_000;
        let mut store = setup_with(&wat, WordSize::Four, config).await;
        let mut adapter = adapter(Ok(vec![1, 2, 3]));

        adapter.fetch_tile(tile_request());
        let completion = adapter.next_completion().await.unwrap();
        let delivery = adapter.complete(&mut store, completion).await.unwrap();

        assert_eq!(delivery, Delivery::CallbackFailed);
        assert_eq!(slot(&store, 20), 1);
        let metrics = &store.data().metrics;
        assert_eq!(metrics.callback_failures, 1);
        assert_eq!(metrics.buffers_allocated, 1);
        assert_eq!(metrics.buffers_freed, 1);
        assert!(metrics.fuel_consumed >= 10_000);
    }

    #[tokio::test]
    async fn test_empty_tile_forwarded_and_freed() {
        let mut store = setup(CALLBACK_WAT, WordSize::Four).await;
        // Seed the length slot so a zero write is observable.
        let memory = store.data().memory.clone();
        memory.write_bytes(&mut store, 0, &99i32.to_le_bytes()).unwrap();
        let mut adapter = adapter(Ok(Vec::new()));

        adapter.fetch_tile(tile_request());
        let completion = adapter.next_completion().await.unwrap();
        let delivery = adapter.complete(&mut store, completion).await.unwrap();

        assert_eq!(delivery, Delivery::Delivered);
        assert_eq!(slot(&store, 0), 0);
        assert_eq!((slot(&store, 8), slot(&store, 12), slot(&store, 16)), (66, 43, 7));
        assert_eq!(slot(&store, 20), 1);
        let metrics = &store.data().metrics;
        assert_eq!(metrics.tiles_delivered, 1);
        assert_eq!(metrics.buffers_allocated, 1);
        assert_eq!(metrics.buffers_freed, 1);
    }

    #[tokio::test]
    async fn test_empty_track_forwarded() {
        let mut store = setup(CALLBACK_WAT, WordSize::Four).await;
        let memory = store.data().memory.clone();
        memory.write_bytes(&mut store, 0, &99i32.to_le_bytes()).unwrap();
        let mut adapter = adapter_with_track(Ok(vec![]), Vec::new());

        assert!(adapter.load_track(SelectedFile::from_path("/tmp/empty.GPX")));
        let completion = adapter.next_completion().await.unwrap();
        let delivery = adapter.complete(&mut store, completion).await.unwrap();

        assert_eq!(delivery, Delivery::Delivered);
        assert_eq!(slot(&store, 24), 1);
        assert_eq!(slot(&store, 0), 0);
        assert_eq!(slot(&store, 20), 0);
        assert_eq!(store.data().metrics.tracks_delivered, 1);
    }

    #[tokio::test]
    async fn test_track_delivered_without_free() {
        let mut store = setup(CALLBACK_WAT, WordSize::Four).await;
        let mut adapter = adapter(Ok(vec![]));

        assert!(adapter.load_track(SelectedFile::from_path("/tmp/ride.gpx")));
        let completion = adapter.next_completion().await.unwrap();
        let delivery = adapter.complete(&mut store, completion).await.unwrap();

        assert_eq!(delivery, Delivery::Delivered);
        assert_eq!(slot(&store, 24), 1);
        assert_eq!(slot(&store, 0), 6);
        assert_eq!(slot(&store, 4), i32::from(b'<'));
        assert_eq!(slot(&store, 20), 0);
        assert_eq!(store.data().metrics.tracks_delivered, 1);
    }

    #[tokio::test]
    async fn test_word_size_mismatch_is_fatal() {
        let mut store = setup(CALLBACK_WAT, WordSize::Eight).await;
        let mut adapter = adapter(Ok(vec![1]));

        adapter.fetch_tile(tile_request());
        let completion = adapter.next_completion().await.unwrap();
        let result = adapter.complete(&mut store, completion).await;

        assert!(matches!(result, Err(RuntimeError::WordSizeMismatch { .. })));
    }
}
