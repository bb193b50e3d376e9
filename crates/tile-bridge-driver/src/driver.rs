//! The bridge driver.
//!
//! [`BridgeDriver`] owns the store and is the only code that calls into the
//! module. It starts the module, then multiplexes three sources until the
//! module asks to stop:
//!
//! ```text
//!   host events ──┐
//!   completions ──┼──► one step at a time ──► module exports
//!   frame ticks ──┘
//! ```
//!
//! Imports never run host work inline. Whatever they queue is dispatched
//! after the export that issued it has returned.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, instrument};
use wasmtime::Store;

use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::scheduler::FrameScheduler;
use tile_bridge_common::{RuntimeConfig, RuntimeError};
use tile_bridge_core::store::{arm_fuel, create_store, record_fuel};
use tile_bridge_core::{
    BridgeContext, BridgeMetrics, CompiledModule, HostRequest, MemoryInterface, ModuleExports,
    WasmEngine, WordSize, instantiate,
};
use tile_bridge_host::{
    CallbackAdapter, Completion, ConsoleHost, FileSource, HostEvent, HostEventReceiver,
    HostSurface, SelectedFile, TileFetcher, TrackFilter, build_import_table,
};

/// Host services the driver works with.
pub struct HostServices {
    /// Presentation surface.
    pub surface: Arc<dyn HostSurface>,
    /// Tile transport.
    pub fetcher: Arc<dyn TileFetcher>,
    /// Track file reader.
    pub files: Arc<dyn FileSource>,
    /// Frame pacing.
    pub scheduler: Box<dyn FrameScheduler>,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Counters collected over the run.
    pub metrics: BridgeMetrics,
    /// Host operations still pending at termination.
    pub abandoned: usize,
}

/// A lifecycle export call.
#[derive(Debug, Clone, Copy)]
enum ExportCall {
    Init,
    Startup,
    Update,
    Resize(u32, u32),
    Shutdown,
    Finalize,
}

/// The instantiated module and its store.
struct Session {
    store: Store<BridgeContext>,
    exports: ModuleExports,
}

impl Session {
    /// Call a lifecycle export under a fresh fuel budget.
    ///
    /// Returns the update export's continue flag, `true` for every other call.
    async fn call(&mut self, call: ExportCall) -> Result<bool, RuntimeError> {
        arm_fuel(&mut self.store)?;
        let store = &mut self.store;
        let exports = &self.exports;

        let result = match call {
            ExportCall::Init => exports.init(store).await.map(|()| true),
            ExportCall::Startup => exports.startup(store).await.map(|()| true),
            ExportCall::Update => exports.update(store).await,
            ExportCall::Resize(width, height) => {
                exports.resize(store, width, height).await.map(|()| true)
            }
            ExportCall::Shutdown => exports.shutdown(store).await.map(|()| true),
            ExportCall::Finalize => exports.finalize(store).await.map(|()| true),
        };

        record_fuel(&mut self.store);
        result
    }
}

/// Why the run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    /// The update export asked to stop.
    Module,
    /// The host asked to stop.
    Host,
}

/// One unit of work picked by the run loop.
enum Step {
    Shutdown,
    Event(HostEvent),
    Completion(Completion),
    Frame,
}

/// Drives one module from instantiation to termination.
pub struct BridgeDriver {
    config: RuntimeConfig,
    engine: WasmEngine,
    word_size: WordSize,
    surface: Arc<dyn HostSurface>,
    adapter: CallbackAdapter,
    scheduler: Box<dyn FrameScheduler>,
    events: HostEventReceiver,
    lifecycle: Lifecycle,
    session: Option<Session>,
    abandoned: usize,
}

impl BridgeDriver {
    /// Create a driver. Nothing is loaded until [`Self::start`].
    ///
    /// # Errors
    ///
    /// Returns an error for an unsupported word size or if the engine cannot
    /// be created.
    pub fn new(
        config: RuntimeConfig,
        services: HostServices,
        events: HostEventReceiver,
    ) -> Result<Self, RuntimeError> {
        let word_size = WordSize::from_bytes(config.module.word_size)?;
        let engine = WasmEngine::new(&config.engine)?;
        let adapter = CallbackAdapter::new(
            services.fetcher,
            services.files,
            TrackFilter::from_config(&config.files),
        );

        Ok(Self {
            config,
            engine,
            word_size,
            surface: services.surface,
            adapter,
            scheduler: services.scheduler,
            events,
            lifecycle: Lifecycle::default(),
            session: None,
            abandoned: 0,
        })
    }

    /// The engine modules must be compiled with.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Counters so far, once a module has been instantiated.
    pub fn metrics(&self) -> Option<&BridgeMetrics> {
        self.session.as_ref().map(|s| &s.store.data().metrics)
    }

    /// Read, compile and start the module at `path`.
    ///
    /// # Errors
    ///
    /// See [`Self::start`]; additionally fails if the file cannot be read or
    /// compiled.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn start_file(&mut self, path: impl AsRef<Path>) -> Result<(), RuntimeError> {
        self.lifecycle.advance(LifecycleState::Instantiating)?;
        let module = CompiledModule::from_file(self.engine.inner(), path).await?;
        self.boot(&module).await
    }

    /// Instantiate and start a compiled module.
    ///
    /// Runs the init hook and the startup export, then sends the initial
    /// size notification.
    ///
    /// # Errors
    ///
    /// Fails if the driver was already started, on a missing export, or if
    /// any startup export traps.
    pub async fn start(&mut self, module: &CompiledModule) -> Result<(), RuntimeError> {
        self.lifecycle.advance(LifecycleState::Instantiating)?;
        self.boot(module).await
    }

    async fn boot(&mut self, module: &CompiledModule) -> Result<(), RuntimeError> {
        let capabilities = self.config.module.capabilities;
        let linker = build_import_table(self.engine.inner(), self.word_size, capabilities)?;
        let mut store = create_store(
            &self.engine,
            &self.config,
            MemoryInterface::new(self.word_size),
        )?;
        let exports = instantiate(
            &linker,
            &mut store,
            module,
            &self.config.module.exports,
            capabilities,
        )
        .await?;
        self.session = Some(Session { store, exports });

        active(&mut self.session)?.call(ExportCall::Init).await?;
        self.settle();
        active(&mut self.session)?.call(ExportCall::Startup).await?;
        self.settle();
        self.notify_resize().await?;

        self.lifecycle.advance(LifecycleState::Running)?;
        info!(
            word_size = self.word_size.bytes(),
            tile_fetch = capabilities.tile_fetch,
            file_loading = capabilities.file_loading,
            "Module running"
        );
        Ok(())
    }

    /// Run until the module stops requesting frames.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error: a trap in a lifecycle export or a
    /// precondition failure while delivering a callback.
    pub async fn run(&mut self) -> Result<RunSummary, RuntimeError> {
        self.run_until(std::future::pending()).await
    }

    /// Run until the module stops requesting frames or `shutdown` resolves.
    ///
    /// The shutdown exports only run when the module itself stopped. A host
    /// shutdown terminates without calling into the module again.
    ///
    /// # Errors
    ///
    /// See [`Self::run`].
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<RunSummary, RuntimeError>
    where
        F: Future<Output = ()>,
    {
        self.lifecycle.expect(LifecycleState::Running, "run")?;

        let result = match self.drive(shutdown).await {
            Ok(Stop::Module) => self.terminate().await,
            Ok(Stop::Host) => self.halt(),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                let summary = self.summary();
                info!(
                    frames = summary.metrics.frames,
                    tiles = summary.metrics.tiles_delivered,
                    tracks = summary.metrics.tracks_delivered,
                    abandoned = summary.abandoned,
                    "Run finished"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(error = %e, "Run failed");
                self.abort();
                Err(e)
            }
        }
    }

    async fn drive<F>(&mut self, shutdown: F) -> Result<Stop, RuntimeError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let step = tokio::select! {
                biased;
                () = &mut shutdown => Step::Shutdown,
                Some(event) = self.events.recv() => Step::Event(event),
                Some(completion) = self.adapter.next_completion() => Step::Completion(completion),
                () = self.scheduler.next_frame() => Step::Frame,
            };

            match step {
                Step::Shutdown => {
                    info!("Shutdown requested by host");
                    return Ok(Stop::Host);
                }
                Step::Event(event) => self.handle_event(event).await?,
                Step::Completion(completion) => self.deliver(completion).await?,
                Step::Frame => {
                    if !self.frame().await? {
                        info!("Module requested shutdown");
                        return Ok(Stop::Module);
                    }
                }
            }
        }
    }

    /// Apply one host event.
    ///
    /// # Errors
    ///
    /// Fails if the module is not running or the size notification traps.
    pub async fn handle_event(&mut self, event: HostEvent) -> Result<(), RuntimeError> {
        self.lifecycle
            .expect(LifecycleState::Running, "handle_event")?;
        debug!(?event, "Host event");

        match event {
            HostEvent::Resize => self.notify_resize().await?,
            HostEvent::DragEnter => self.surface.set_drag_highlight(true),
            HostEvent::DragOver => {}
            HostEvent::DragLeave => self.surface.set_drag_highlight(false),
            HostEvent::Drop(files) => {
                self.surface.set_drag_highlight(false);
                self.route_files(files);
            }
            HostEvent::FileInputChanged(files) => {
                self.route_files(files);
                self.surface.reset_file_input();
            }
        }
        Ok(())
    }

    async fn frame(&mut self) -> Result<bool, RuntimeError> {
        let session = active(&mut self.session)?;
        let keep_running = session.call(ExportCall::Update).await?;
        session.store.data_mut().metrics.frames += 1;
        self.settle();
        Ok(keep_running)
    }

    async fn notify_resize(&mut self) -> Result<(), RuntimeError> {
        let (width, height) = self.surface.surface_size();
        debug!(width, height, "Notifying surface size");
        active(&mut self.session)?
            .call(ExportCall::Resize(width, height))
            .await?;
        self.settle();
        Ok(())
    }

    async fn deliver(&mut self, completion: Completion) -> Result<(), RuntimeError> {
        let session = active(&mut self.session)?;
        arm_fuel(&mut session.store)?;
        let delivery = self.adapter.complete(&mut session.store, completion).await;
        record_fuel(&mut session.store);

        let delivery = delivery?;
        debug!(?delivery, "Completion handled");
        self.settle();
        Ok(())
    }

    fn route_files(&mut self, files: Vec<SelectedFile>) {
        if !self.config.module.capabilities.file_loading {
            debug!("File loading disabled, ignoring selection");
            return;
        }
        let Some(file) = files.into_iter().next() else {
            debug!("Empty file selection");
            return;
        };

        if !self.adapter.load_track(file) {
            if let Some(session) = self.session.as_mut() {
                session.store.data_mut().metrics.files_rejected += 1;
            }
        }
    }

    /// Dispatch queued requests and show console output.
    fn settle(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let context = session.store.data_mut();
        let requests = context.take_requests();
        let lines = context.console.take_lines();

        ConsoleHost::emit_all(self.surface.as_ref(), &lines);
        for request in requests {
            match request {
                HostRequest::FetchTile(tile) => self.adapter.fetch_tile(tile),
                HostRequest::OpenFileDialog => self.surface.open_file_dialog(),
            }
        }
    }

    async fn terminate(&mut self) -> Result<(), RuntimeError> {
        let session = active(&mut self.session)?;
        session.call(ExportCall::Shutdown).await?;
        session.call(ExportCall::Finalize).await?;

        self.lifecycle.advance(LifecycleState::Terminated)?;
        self.close();
        info!("Module terminated");
        Ok(())
    }

    /// Move to the terminal state without calling the shutdown exports.
    fn halt(&mut self) -> Result<(), RuntimeError> {
        self.lifecycle.advance(LifecycleState::Terminated)?;
        self.close();
        info!("Module stopped by host");
        Ok(())
    }

    /// Move to the terminal state after a fatal error.
    fn abort(&mut self) {
        if self.lifecycle.state() != LifecycleState::Terminated {
            if let Err(e) = self.lifecycle.advance(LifecycleState::Terminated) {
                debug!(error = %e, "Lifecycle left as is");
            }
        }
        self.close();
    }

    /// Drop pending work and flush console output.
    fn close(&mut self) {
        self.abandoned += self.adapter.abandon_all();
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let context = session.store.data_mut();
        let dropped = context.take_requests().len();
        if dropped > 0 {
            debug!(dropped, "Dropping requests issued during shutdown");
        }
        let lines = context.console.flush();
        ConsoleHost::emit_all(self.surface.as_ref(), &lines);
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            metrics: self.metrics().cloned().unwrap_or_default(),
            abandoned: self.abandoned,
        }
    }
}

impl std::fmt::Debug for BridgeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeDriver")
            .field("state", &self.lifecycle.state())
            .field("word_size", &self.word_size)
            .field("adapter", &self.adapter)
            .finish_non_exhaustive()
    }
}

fn active(session: &mut Option<Session>) -> Result<&mut Session, RuntimeError> {
    session.as_mut().ok_or(RuntimeError::NotBound {
        what: "module instance",
    })
}
