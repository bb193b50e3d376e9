//! Integration tests for tile-bridge-core.
//!
//! These tests verify the memory interface against real instances:
//! - Binding preconditions
//! - Allocation, write and read back through module memory
//! - Bounds checking
//! - Word size enforcement at the first marshaling call

use tile_bridge_common::{ExportNames, ImportCapabilities, RuntimeConfig, RuntimeError};
use tile_bridge_core::store::create_store;
use tile_bridge_core::{
    BridgeContext, CompiledModule, MemoryInterface, ModuleExports, WasmEngine, WordSize,
    instantiate,
};
use wasmtime::{Linker, Store};

/// Bump allocator module with the lifecycle exports stubbed out.
const BUMP_ALLOCATOR_WAT: &str = r#"
    (module
        (memory (export "memory") 1)
        (data (i32.const 16) "Hello from Wasm")
        (global $next (mut i32) (i32.const 1024))
        (global $freed (export "freed") (mut i32) (i32.const 0))

        (func (export "malloc") (param $size i32) (result i32)
            (local $ptr i32)
            (local.set $ptr (global.get $next))
            (global.set $next (i32.add (global.get $next) (local.get $size)))
            (local.get $ptr))
        (func (export "free") (param $ptr i32)
            (global.set $freed (i32.add (global.get $freed) (i32.const 1))))

        (func (export "main_start"))
        (func (export "main_update") (result i32) (i32.const 0))
        (func (export "main_end"))
        (func (export "web_window_size_changed") (param i32 i32))
    )
"#;

async fn setup(wat: &str, word_size: WordSize) -> (Store<BridgeContext>, ModuleExports) {
    let config = RuntimeConfig::default();
    let engine = WasmEngine::new(&config.engine).unwrap();
    let module = CompiledModule::from_wat(engine.inner(), wat).unwrap();
    let linker = Linker::new(engine.inner());

    let mut store = create_store(&engine, &config, MemoryInterface::new(word_size)).unwrap();
    let exports = instantiate(
        &linker,
        &mut store,
        &module,
        &ExportNames::default(),
        ImportCapabilities::none(),
    )
    .await
    .unwrap();

    (store, exports)
}

// ============================================================================
// Test: Binding
// ============================================================================

#[tokio::test]
async fn test_instantiate_binds_interface() {
    let (store, exports) = setup(BUMP_ALLOCATOR_WAT, WordSize::Four).await;

    assert!(store.data().memory.is_bound());
    assert_eq!(exports.names().update, "main_update");
}

#[tokio::test]
async fn test_second_bind_is_rejected() {
    let (mut store, exports) = setup(BUMP_ALLOCATOR_WAT, WordSize::Four).await;

    let result = store.data_mut().memory.bind_exports(exports);
    assert!(matches!(
        result,
        Err(RuntimeError::AlreadyBound { what: "exports" })
    ));
}

#[tokio::test]
async fn test_missing_required_export() {
    let config = RuntimeConfig::default();
    let engine = WasmEngine::new(&config.engine).unwrap();
    let module = CompiledModule::from_wat(
        engine.inner(),
        r#"(module (memory (export "memory") 1) (func (export "main_start")))"#,
    )
    .unwrap();
    let linker = Linker::new(engine.inner());
    let mut store =
        create_store(&engine, &config, MemoryInterface::new(WordSize::Four)).unwrap();

    let result = instantiate(
        &linker,
        &mut store,
        &module,
        &ExportNames::default(),
        ImportCapabilities::none(),
    )
    .await;

    assert!(matches!(result, Err(RuntimeError::MissingExport { .. })));
    assert!(!store.data().memory.is_bound());
}

#[tokio::test]
async fn test_callback_required_by_capability() {
    let config = RuntimeConfig::default();
    let engine = WasmEngine::new(&config.engine).unwrap();
    let module = CompiledModule::from_wat(engine.inner(), BUMP_ALLOCATOR_WAT).unwrap();
    let linker = Linker::new(engine.inner());
    let mut store =
        create_store(&engine, &config, MemoryInterface::new(WordSize::Four)).unwrap();

    let result = instantiate(
        &linker,
        &mut store,
        &module,
        &ExportNames::default(),
        ImportCapabilities {
            tile_fetch: true,
            file_loading: false,
        },
    )
    .await;

    assert!(
        matches!(result, Err(RuntimeError::MissingExport { ref name }) if name == "fetch_callback")
    );
}

// ============================================================================
// Test: Marshaling
// ============================================================================

#[tokio::test]
async fn test_read_string_from_data_segment() {
    let (store, _) = setup(BUMP_ALLOCATOR_WAT, WordSize::Four).await;
    let memory = store.data().memory.clone();

    let text = memory.read_string(&store, 16, 15).unwrap();
    assert_eq!(text, "Hello from Wasm");
}

#[tokio::test]
async fn test_allocate_write_read_round_trip() {
    let (mut store, _) = setup(BUMP_ALLOCATOR_WAT, WordSize::Four).await;
    let memory = store.data().memory.clone();
    let payload = b"\x89PNG\r\n\x1a\n tile bytes";

    let ptr = memory
        .allocate(&mut store, payload.len() as u64)
        .await
        .unwrap();
    assert_eq!(ptr, 1024);

    memory.write_bytes(&mut store, ptr, payload).unwrap();
    let read_back = memory
        .read_bytes(&store, ptr, payload.len() as u64)
        .unwrap();
    assert_eq!(read_back, payload);

    memory.free(&mut store, ptr).await.unwrap();
    assert_eq!(store.data().metrics.buffers_allocated, 1);
    assert_eq!(store.data().metrics.buffers_freed, 1);
}

#[tokio::test]
async fn test_zero_length_allocation() {
    let (mut store, _) = setup(BUMP_ALLOCATOR_WAT, WordSize::Four).await;
    let memory = store.data().memory.clone();

    let ptr = memory.allocate(&mut store, 0).await.unwrap();
    memory.write_bytes(&mut store, ptr, &[]).unwrap();
    assert!(memory.read_bytes(&store, ptr, 0).unwrap().is_empty());
}

#[tokio::test]
async fn test_out_of_bounds_access() {
    let (mut store, _) = setup(BUMP_ALLOCATOR_WAT, WordSize::Four).await;
    let memory = store.data().memory.clone();
    let size = memory.size(&store).unwrap() as u64;
    assert_eq!(size, 65536);

    assert!(matches!(
        memory.read_string(&store, size - 2, 4),
        Err(RuntimeError::OutOfBounds { .. })
    ));
    assert!(matches!(
        memory.write_bytes(&mut store, size, b"x"),
        Err(RuntimeError::OutOfBounds { .. })
    ));
    // Reading right up to the end is fine
    assert_eq!(memory.read_bytes(&store, size - 2, 2).unwrap().len(), 2);
}

#[tokio::test]
async fn test_word_size_mismatch_on_first_allocation() {
    let (mut store, _) = setup(BUMP_ALLOCATOR_WAT, WordSize::Eight).await;
    let memory = store.data().memory.clone();

    let result = memory.allocate(&mut store, 8).await;
    assert!(matches!(
        result,
        Err(RuntimeError::WordSizeMismatch {
            expected_bytes: 8,
            ..
        })
    ));
}

#[tokio::test]
async fn test_lifecycle_exports_callable() {
    let (mut store, exports) = setup(BUMP_ALLOCATOR_WAT, WordSize::Four).await;

    exports.init(&mut store).await.unwrap();
    exports.startup(&mut store).await.unwrap();
    exports.resize(&mut store, 800, 600).await.unwrap();
    assert!(!exports.update(&mut store).await.unwrap());
    exports.shutdown(&mut store).await.unwrap();
    exports.finalize(&mut store).await.unwrap();
}

#[tokio::test]
async fn test_update_trap_is_reported() {
    let wat = BUMP_ALLOCATOR_WAT.replace(
        r#"(func (export "main_update") (result i32) (i32.const 0))"#,
        r#"(func (export "main_update") (result i32) unreachable)"#,
    );
    let (mut store, exports) = setup(&wat, WordSize::Four).await;

    let result = exports.update(&mut store).await;
    assert!(matches!(result, Err(RuntimeError::Trap { ref export, .. }) if export == "main_update"));
}
