//! Import table construction.
//!
//! [`build_import_table`] assembles everything a module may import: the
//! runtime defaults first, then the bridge imports selected by
//! [`ImportCapabilities`]. The linker allows shadowing, so a later
//! definition of the same `(module, name)` pair replaces an earlier one.
//!
//! Bridge imports never perform host work themselves. They decode their
//! arguments and queue a [`HostRequest`] that the driver dispatches after
//! the current export returns.

use tracing::debug;
use wasmtime::{Caller, Engine, FuncType, Linker, Val, ValType};

use crate::runtime::{i32_arg, register_error, register_runtime_imports, word_arg};
use tile_bridge_common::{ImportCapabilities, RuntimeError};
use tile_bridge_core::{BridgeContext, HostRequest, TileCoords, TileRequest, WordSize};

/// Import namespace of the bridge imports.
pub const BRIDGE_MODULE: &str = "env";

/// Bridge import that starts a tile fetch.
pub const FETCH_TILE_IMPORT: &str = "fetchTile";

/// Bridge import that opens the host file picker.
pub const OPEN_FILE_DIALOG_IMPORT: &str = "openFileDialog";

/// Build the complete import table for one module.
///
/// Runtime imports (`odin_env`) are defined before bridge imports (`env`)
/// with shadowing enabled. The two namespaces share no names, so shadowing
/// only matters for definitions added to the returned linker afterwards.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn build_import_table(
    engine: &Engine,
    word_size: WordSize,
    capabilities: ImportCapabilities,
) -> Result<Linker<BridgeContext>, RuntimeError> {
    let mut linker = Linker::new(engine);
    linker.allow_shadowing(true);

    register_runtime_imports(&mut linker, word_size)?;
    register_bridge_imports(&mut linker, word_size, capabilities)?;

    Ok(linker)
}

/// Register the bridge imports enabled by `capabilities`.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register_bridge_imports(
    linker: &mut Linker<BridgeContext>,
    word_size: WordSize,
    capabilities: ImportCapabilities,
) -> Result<(), RuntimeError> {
    if capabilities.tile_fetch {
        register_fetch_tile(linker, word_size)?;
    }
    if capabilities.file_loading {
        register_open_file_dialog(linker)?;
    }
    Ok(())
}

/// Register `env::fetchTile(url_ptr: word, url_len: word, x: i32, y: i32, z: i32)`.
///
/// The URL is decoded immediately; the coordinates travel with the request
/// and come back unchanged in the fetch callback.
pub fn register_fetch_tile(
    linker: &mut Linker<BridgeContext>,
    word_size: WordSize,
) -> Result<(), RuntimeError> {
    let word = word_size.val_type();
    let ty = FuncType::new(
        linker.engine(),
        [word.clone(), word, ValType::I32, ValType::I32, ValType::I32],
        [],
    );

    linker
        .func_new(
            BRIDGE_MODULE,
            FETCH_TILE_IMPORT,
            ty,
            move |mut caller: Caller<'_, BridgeContext>, params: &[Val], _: &mut [Val]| {
                let ptr = word_arg(word_size, &params[0])?;
                let len = word_arg(word_size, &params[1])?;
                let coords = TileCoords {
                    x: i32_arg(&params[2])?,
                    y: i32_arg(&params[3])?,
                    z: i32_arg(&params[4])?,
                };

                let memory = caller.data().memory.clone();
                let url = memory.read_string(&caller, ptr, len)?;

                debug!(url = %url, coords = %coords, "Tile requested");
                caller
                    .data_mut()
                    .request(HostRequest::FetchTile(TileRequest { url, coords }));
                Ok(())
            },
        )
        .map_err(register_error(FETCH_TILE_IMPORT))?;

    Ok(())
}

/// Register `env::openFileDialog()`.
pub fn register_open_file_dialog(linker: &mut Linker<BridgeContext>) -> Result<(), RuntimeError> {
    linker
        .func_wrap(
            BRIDGE_MODULE,
            OPEN_FILE_DIALOG_IMPORT,
            |mut caller: Caller<'_, BridgeContext>| {
                debug!("File dialog requested");
                caller.data_mut().request(HostRequest::OpenFileDialog);
            },
        )
        .map_err(register_error(OPEN_FILE_DIALOG_IMPORT))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tile_bridge_common::EngineConfig;
    use tile_bridge_core::{CompiledModule, MemoryInterface, WasmEngine};
    use wasmtime::{Instance, Store};

    const BRIDGE_WAT: &str = r#"
        (module
            (import "env" "fetchTile" (func $fetch_tile (param i32 i32 i32 i32 i32)))
            (import "env" "openFileDialog" (func $open_file_dialog))
            (memory (export "memory") 1)
            (data (i32.const 64) "https://tile.openstreetmap.org/3/4/5.png")

            (func (export "request_tile")
                (call $fetch_tile (i32.const 64) (i32.const 40) (i32.const 4) (i32.const 5) (i32.const 3)))
            (func (export "request_negative")
                (call $fetch_tile (i32.const 64) (i32.const 40) (i32.const -1) (i32.const 0) (i32.const 0)))
            (func (export "pick_file") (call $open_file_dialog))
        )
    "#;

    fn engine() -> WasmEngine {
        WasmEngine::new(&EngineConfig::default()).unwrap()
    }

    async fn instantiate_with(
        linker: &Linker<BridgeContext>,
        engine: &WasmEngine,
        wat: &str,
    ) -> (Store<BridgeContext>, Instance) {
        let module = CompiledModule::from_wat(engine.inner(), wat).unwrap();
        let mut store = Store::new(
            engine.inner(),
            BridgeContext::new(MemoryInterface::new(WordSize::Four)),
        );
        let instance = linker
            .instantiate_async(&mut store, module.as_module())
            .await
            .unwrap();
        let memory = instance.get_memory(&mut store, "memory").unwrap();
        store.data_mut().memory.bind_memory(memory).unwrap();
        (store, instance)
    }

    async fn call(store: &mut Store<BridgeContext>, instance: &Instance, name: &str) {
        let func = instance
            .get_typed_func::<(), ()>(&mut *store, name)
            .unwrap();
        func.call_async(&mut *store, ()).await.unwrap();
    }

    #[test]
    fn test_build_import_table() {
        let engine = engine();

        assert!(
            build_import_table(engine.inner(), WordSize::Four, ImportCapabilities::default())
                .is_ok()
        );
        assert!(
            build_import_table(engine.inner(), WordSize::Eight, ImportCapabilities::none())
                .is_ok()
        );
    }

    #[test]
    fn test_import_table_accepts_overrides() {
        let engine = engine();
        let mut linker =
            build_import_table(engine.inner(), WordSize::Four, ImportCapabilities::default())
                .unwrap();

        assert!(
            linker
                .func_wrap(crate::runtime::RUNTIME_MODULE, "sqrt", |x: f64| x)
                .is_ok()
        );
        assert!(
            linker
                .func_wrap(BRIDGE_MODULE, OPEN_FILE_DIALOG_IMPORT, || {})
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_fetch_tile_queues_request() {
        let engine = engine();
        let linker =
            build_import_table(engine.inner(), WordSize::Four, ImportCapabilities::default())
                .unwrap();
        let (mut store, instance) = instantiate_with(&linker, &engine, BRIDGE_WAT).await;

        call(&mut store, &instance, "request_tile").await;
        call(&mut store, &instance, "request_negative").await;

        let requests = store.data_mut().take_requests();
        assert_eq!(
            requests,
            vec![
                HostRequest::FetchTile(TileRequest {
                    url: "https://tile.openstreetmap.org/3/4/5.png".into(),
                    coords: TileCoords { x: 4, y: 5, z: 3 },
                }),
                HostRequest::FetchTile(TileRequest {
                    url: "https://tile.openstreetmap.org/3/4/5.png".into(),
                    coords: TileCoords { x: -1, y: 0, z: 0 },
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_open_file_dialog_queues_request() {
        let engine = engine();
        let linker =
            build_import_table(engine.inner(), WordSize::Four, ImportCapabilities::default())
                .unwrap();
        let (mut store, instance) = instantiate_with(&linker, &engine, BRIDGE_WAT).await;

        call(&mut store, &instance, "pick_file").await;

        assert_eq!(
            store.data_mut().take_requests(),
            vec![HostRequest::OpenFileDialog]
        );
    }

    #[tokio::test]
    async fn test_disabled_capability_leaves_import_unresolved() {
        let engine = engine();
        let linker = build_import_table(
            engine.inner(),
            WordSize::Four,
            ImportCapabilities {
                tile_fetch: true,
                file_loading: false,
            },
        )
        .unwrap();
        let module = CompiledModule::from_wat(engine.inner(), BRIDGE_WAT).unwrap();
        let mut store = Store::new(
            engine.inner(),
            BridgeContext::new(MemoryInterface::new(WordSize::Four)),
        );

        let result = linker.instantiate_async(&mut store, module.as_module()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_bridge_import_shadows_earlier_definition() {
        let engine = engine();
        let mut linker = Linker::new(engine.inner());
        linker.allow_shadowing(true);
        linker
            .func_wrap(
                BRIDGE_MODULE,
                FETCH_TILE_IMPORT,
                |_: i32, _: i32, _: i32, _: i32, _: i32| {},
            )
            .unwrap();
        linker
            .func_wrap(BRIDGE_MODULE, OPEN_FILE_DIALOG_IMPORT, || {})
            .unwrap();
        register_bridge_imports(&mut linker, WordSize::Four, ImportCapabilities::default())
            .unwrap();

        let (mut store, instance) = instantiate_with(&linker, &engine, BRIDGE_WAT).await;
        call(&mut store, &instance, "pick_file").await;

        assert_eq!(store.data_mut().take_requests().len(), 1);
    }
}
