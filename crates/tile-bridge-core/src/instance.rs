//! Module instantiation and call error classification.
//!
//! [`instantiate`] covers the part of startup that touches Wasmtime directly:
//!
//! 1. Instantiate the module against the prepared import table
//! 2. Resolve the export contract
//! 3. Bind the memory interface to the exports and the linear memory

use std::time::Instant;

use tracing::{debug, info, instrument};
use wasmtime::{Linker, Store, Trap};

use crate::CompiledModule;
use crate::exports::ModuleExports;
use crate::store::BridgeContext;
use tile_bridge_common::{ExportNames, ImportCapabilities, RuntimeError};

/// Instantiate `module` and bind the store's memory interface.
///
/// # Errors
///
/// Returns an error if:
/// - An import cannot be satisfied or the start function traps
/// - A required export or the memory export is missing
/// - The memory interface was already bound
#[instrument(skip_all, fields(content_hash = %module.content_hash()))]
pub async fn instantiate(
    linker: &Linker<BridgeContext>,
    store: &mut Store<BridgeContext>,
    module: &CompiledModule,
    names: &ExportNames,
    capabilities: ImportCapabilities,
) -> Result<ModuleExports, RuntimeError> {
    let start = Instant::now();

    let instance = linker
        .instantiate_async(&mut *store, module.as_module())
        .await
        .map_err(|e| RuntimeError::instantiation_failed(format!("{e:#}")))?;

    debug!("Module instantiated, resolving exports");

    let memory = instance
        .get_memory(&mut *store, &names.memory)
        .ok_or_else(|| RuntimeError::missing_export(&names.memory))?;
    let exports = ModuleExports::resolve(&instance, store, names, capabilities)?;

    let context = store.data_mut();
    context.memory.bind_exports(exports.clone())?;
    context.memory.bind_memory(memory)?;

    info!(
        duration_ms = start.elapsed().as_millis(),
        memory_bytes = memory.data_size(&*store),
        "Module instance ready"
    );

    Ok(exports)
}

/// Convert an error returned by an export call into a [`RuntimeError`].
///
/// Fuel exhaustion gets its own variant; everything else is reported as a
/// trap in `export`.
pub fn map_call_error(export: &str, error: &wasmtime::Error) -> RuntimeError {
    if is_out_of_fuel(error) {
        return RuntimeError::FuelExhausted;
    }
    let (message, code) = extract_trap_info(error);
    match code {
        Some(code) => RuntimeError::trap(export, format!("{code}: {message}")),
        None => RuntimeError::trap(export, message),
    }
}

/// Extract human-readable trap information.
fn extract_trap_info(error: &wasmtime::Error) -> (String, Option<String>) {
    let message = error.to_string();
    let code = error.downcast_ref::<Trap>().map(|trap| format!("{trap:?}"));
    (message, code)
}

/// Check if an error is due to fuel exhaustion.
fn is_out_of_fuel(error: &wasmtime::Error) -> bool {
    error
        .downcast_ref::<Trap>()
        .is_some_and(|trap| *trap == Trap::OutOfFuel)
}
