//! The module's export contract.
//!
//! [`ModuleExports`] is the capability set the bridge calls into. Lifecycle
//! exports with fixed signatures are held as typed functions; exports that
//! take pointers or lengths are kept untyped because their parameter width
//! depends on the configured [`WordSize`].

use tracing::debug;
use wasmtime::{Func, Instance, Store, TypedFunc, Val, WasmParams, WasmResults};

use crate::instance::map_call_error;
use crate::memory::WordSize;
use crate::store::{BridgeContext, TileCoords};
use tile_bridge_common::{ExportNames, ImportCapabilities, RuntimeError};

/// Resolved exports of an instantiated module.
#[derive(Clone)]
pub struct ModuleExports {
    names: ExportNames,
    init: Option<TypedFunc<(), ()>>,
    startup: TypedFunc<(), ()>,
    update: TypedFunc<(), i32>,
    shutdown: TypedFunc<(), ()>,
    finalize: Option<TypedFunc<(), ()>>,
    resize: TypedFunc<(i32, i32), ()>,
    fetch_callback: Option<Func>,
    track_load_callback: Option<Func>,
    allocate: Func,
    free: Func,
}

impl ModuleExports {
    /// Look up every export the bridge needs.
    ///
    /// The init and finalize hooks are optional. The fetch and file-load
    /// callbacks are required only when the matching capability is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::MissingExport`] for an absent required export
    /// and [`RuntimeError::InvalidConfig`] for a lifecycle export with the
    /// wrong signature.
    pub fn resolve(
        instance: &Instance,
        store: &mut Store<BridgeContext>,
        names: &ExportNames,
        capabilities: ImportCapabilities,
    ) -> Result<Self, RuntimeError> {
        let init = optional_typed(instance, store, &names.init)?;
        let finalize = optional_typed(instance, store, &names.finalize)?;
        if init.is_none() {
            debug!(export = %names.init, "Init hook not exported, skipping");
        }
        if finalize.is_none() {
            debug!(export = %names.finalize, "Finalize hook not exported, skipping");
        }

        let fetch_callback = if capabilities.tile_fetch {
            Some(required_func(instance, store, &names.fetch_callback)?)
        } else {
            None
        };
        let track_load_callback = if capabilities.file_loading {
            Some(required_func(instance, store, &names.track_load_callback)?)
        } else {
            None
        };

        Ok(Self {
            init,
            startup: required_typed(instance, store, &names.startup)?,
            update: required_typed(instance, store, &names.update)?,
            shutdown: required_typed(instance, store, &names.shutdown)?,
            finalize,
            resize: required_typed(instance, store, &names.resize)?,
            fetch_callback,
            track_load_callback,
            allocate: required_func(instance, store, &names.allocate)?,
            free: required_func(instance, store, &names.free)?,
            names: names.clone(),
        })
    }

    /// Export names in use.
    pub fn names(&self) -> &ExportNames {
        &self.names
    }

    /// Call the init hook, if exported.
    pub async fn init(&self, store: &mut Store<BridgeContext>) -> Result<(), RuntimeError> {
        match &self.init {
            Some(func) => call_unit(store, func, &self.names.init).await,
            None => Ok(()),
        }
    }

    /// Call the startup export.
    pub async fn startup(&self, store: &mut Store<BridgeContext>) -> Result<(), RuntimeError> {
        call_unit(store, &self.startup, &self.names.startup).await
    }

    /// Call the per-frame update export. Returns `true` to keep running.
    pub async fn update(&self, store: &mut Store<BridgeContext>) -> Result<bool, RuntimeError> {
        let keep_running = self
            .update
            .call_async(&mut *store, ())
            .await
            .map_err(|e| map_call_error(&self.names.update, &e))?;
        Ok(keep_running != 0)
    }

    /// Call the shutdown export.
    pub async fn shutdown(&self, store: &mut Store<BridgeContext>) -> Result<(), RuntimeError> {
        call_unit(store, &self.shutdown, &self.names.shutdown).await
    }

    /// Call the finalize hook, if exported.
    pub async fn finalize(&self, store: &mut Store<BridgeContext>) -> Result<(), RuntimeError> {
        match &self.finalize {
            Some(func) => call_unit(store, func, &self.names.finalize).await,
            None => Ok(()),
        }
    }

    /// Notify the module of the rendering surface size.
    pub async fn resize(
        &self,
        store: &mut Store<BridgeContext>,
        width: u32,
        height: u32,
    ) -> Result<(), RuntimeError> {
        let width = i32::try_from(width).unwrap_or(i32::MAX);
        let height = i32::try_from(height).unwrap_or(i32::MAX);
        self.resize
            .call_async(&mut *store, (width, height))
            .await
            .map_err(|e| map_call_error(&self.names.resize, &e))
    }

    /// Hand a staged tile payload to the module.
    ///
    /// # Errors
    ///
    /// Fails if the tile capability is disabled, on a word size mismatch, or
    /// if the callback traps.
    pub async fn fetch_callback(
        &self,
        store: &mut Store<BridgeContext>,
        word_size: WordSize,
        ptr: u64,
        len: u64,
        coords: TileCoords,
    ) -> Result<(), RuntimeError> {
        let name = &self.names.fetch_callback;
        let func = self
            .fetch_callback
            .as_ref()
            .ok_or_else(|| RuntimeError::missing_export(name))?;
        word_size.check_params(&*store, func, name, 2)?;

        let params = [
            word_size.to_val(ptr)?,
            word_size.to_val(len)?,
            Val::I32(coords.x),
            Val::I32(coords.y),
            Val::I32(coords.z),
        ];
        func.call_async(&mut *store, &params, &mut [])
            .await
            .map_err(|e| map_call_error(name, &e))
    }

    /// Hand a staged track file to the module.
    ///
    /// # Errors
    ///
    /// Fails if file loading is disabled, on a word size mismatch, or if the
    /// callback traps.
    pub async fn track_load_callback(
        &self,
        store: &mut Store<BridgeContext>,
        word_size: WordSize,
        ptr: u64,
        len: u64,
    ) -> Result<(), RuntimeError> {
        let name = &self.names.track_load_callback;
        let func = self
            .track_load_callback
            .as_ref()
            .ok_or_else(|| RuntimeError::missing_export(name))?;
        word_size.check_params(&*store, func, name, 2)?;

        let params = [word_size.to_val(ptr)?, word_size.to_val(len)?];
        func.call_async(&mut *store, &params, &mut [])
            .await
            .map_err(|e| map_call_error(name, &e))
    }

    /// Allocator export and its name.
    pub fn allocate(&self) -> (&Func, &str) {
        (&self.allocate, &self.names.allocate)
    }

    /// Deallocator export and its name.
    pub fn free(&self) -> (&Func, &str) {
        (&self.free, &self.names.free)
    }
}

impl std::fmt::Debug for ModuleExports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleExports")
            .field("names", &self.names)
            .field("has_init", &self.init.is_some())
            .field("has_finalize", &self.finalize.is_some())
            .field("has_fetch_callback", &self.fetch_callback.is_some())
            .field("has_track_load_callback", &self.track_load_callback.is_some())
            .finish_non_exhaustive()
    }
}

async fn call_unit(
    store: &mut Store<BridgeContext>,
    func: &TypedFunc<(), ()>,
    name: &str,
) -> Result<(), RuntimeError> {
    func.call_async(&mut *store, ())
        .await
        .map_err(|e| map_call_error(name, &e))
}

fn required_func(
    instance: &Instance,
    store: &mut Store<BridgeContext>,
    name: &str,
) -> Result<Func, RuntimeError> {
    instance
        .get_func(&mut *store, name)
        .ok_or_else(|| RuntimeError::missing_export(name))
}

fn required_typed<P, R>(
    instance: &Instance,
    store: &mut Store<BridgeContext>,
    name: &str,
) -> Result<TypedFunc<P, R>, RuntimeError>
where
    P: WasmParams,
    R: WasmResults,
{
    optional_typed(instance, store, name)?.ok_or_else(|| RuntimeError::missing_export(name))
}

fn optional_typed<P, R>(
    instance: &Instance,
    store: &mut Store<BridgeContext>,
    name: &str,
) -> Result<Option<TypedFunc<P, R>>, RuntimeError>
where
    P: WasmParams,
    R: WasmResults,
{
    let Some(func) = instance.get_func(&mut *store, name) else {
        return Ok(None);
    };
    func.typed::<P, R>(&*store).map(Some).map_err(|e| {
        RuntimeError::invalid_config(format!("Export '{name}' has an unexpected signature: {e}"))
    })
}
