//! WebAssembly module compilation.
//!
//! This module provides [`CompiledModule`], a wrapper around Wasmtime's [`Module`]
//! that validates and compiles the bridge's binary, either from bytes already in
//! memory or from a file read asynchronously.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, instrument};
use wasmtime::{Engine, Module};

use tile_bridge_common::RuntimeError;

const WASM_MAGIC: &[u8] = b"\0asm";

/// A compiled WebAssembly module.
///
/// Cheap to clone; the underlying Wasmtime module is reference counted.
#[derive(Clone)]
pub struct CompiledModule {
    /// The compiled Wasmtime module.
    inner: Module,

    /// Hash of the original Wasm bytes, used for log correlation.
    content_hash: String,
}

impl CompiledModule {
    /// Compile a module from WebAssembly bytes.
    ///
    /// Bytes without the binary magic number are parsed as WAT.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails (e.g., invalid Wasm).
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        if !bytes.starts_with(WASM_MAGIC) {
            let text = std::str::from_utf8(bytes).map_err(|_| {
                RuntimeError::compilation_failed("Invalid Wasm: bad magic number")
            })?;
            return Self::from_wat(engine, text);
        }
        Self::validate_wasm_header(bytes)?;

        let module = Module::new(engine, bytes).map_err(|e| {
            RuntimeError::compilation_failed(format!("Module compilation failed: {e}"))
        })?;

        let content_hash = compute_hash(bytes);

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
        })
    }

    /// Read a module file without blocking the event loop and compile it on a
    /// blocking worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not compile.
    #[instrument(skip(engine, path), fields(path = %path.as_ref().display()))]
    pub async fn from_file(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        debug!(bytes_len = bytes.len(), "Module file read");

        let engine = engine.clone();
        tokio::task::spawn_blocking(move || Self::from_bytes(&engine, &bytes))
            .await
            .map_err(|e| RuntimeError::compilation_failed(format!("Compile task failed: {e}")))?
    }

    /// Compile a module from WAT (WebAssembly Text Format).
    ///
    /// This is primarily for testing purposes.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails.
    #[instrument(skip(engine, wat))]
    pub fn from_wat(engine: &Engine, wat: &str) -> Result<Self, RuntimeError> {
        let module = Module::new(engine, wat).map_err(|e| {
            RuntimeError::compilation_failed(format!("WAT compilation failed: {e}"))
        })?;

        let content_hash = compute_hash(wat.as_bytes());
        debug!(content_hash = %content_hash, "WAT module compiled");

        Ok(Self {
            inner: module,
            content_hash,
        })
    }

    /// Get the content hash of the original bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get the inner Wasmtime module.
    pub fn as_module(&self) -> &Module {
        &self.inner
    }

    /// Validate WebAssembly header (magic number).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), RuntimeError> {
        if bytes.len() < 8 {
            return Err(RuntimeError::compilation_failed(
                "Invalid Wasm: file too small",
            ));
        }

        if !bytes.starts_with(WASM_MAGIC) {
            return Err(RuntimeError::compilation_failed(
                "Invalid Wasm: bad magic number",
            ));
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
