//! Error types for tile-bridge.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`RuntimeError`]: Top-level errors for the bridge and its lifecycle
//! - [`HostFunctionError`]: Errors from host services (tile fetch, file load)

use std::io;

use thiserror::Error;

/// Top-level runtime errors.
///
/// Configuration and precondition errors are fatal at this layer. Transient
/// host failures are carried as [`HostFunctionError`] and are normally logged
/// and dropped by the callback adapter rather than propagated.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A required export is missing from the module.
    #[error("Missing export: {name}")]
    MissingExport {
        /// Name of the export that was looked up.
        name: String,
    },

    /// WebAssembly compilation failed.
    #[error("Compilation failed: {reason}")]
    CompilationFailed {
        /// Description of the compilation failure.
        reason: String,
    },

    /// Instantiation (import resolution, start function) failed.
    #[error("Instantiation failed: {reason}")]
    InstantiationFailed {
        /// Description of the instantiation failure.
        reason: String,
    },

    /// Execution exhausted the configured per-call fuel budget.
    #[error("Fuel exhausted: CPU limit exceeded")]
    FuelExhausted,

    /// A host service returned an error.
    #[error("Host function error: {0}")]
    HostFunction(#[from] HostFunctionError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A WebAssembly trap occurred inside an export.
    #[error("Wasm trap in '{export}': {message}")]
    Trap {
        /// Export that was executing.
        export: String,
        /// Description of the trap.
        message: String,
    },

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// An export's pointer or length parameters do not use the configured word size.
    #[error("Word size mismatch: '{export}' does not take {expected_bytes}-byte pointer/length values")]
    WordSizeMismatch {
        /// The configured word size in bytes.
        expected_bytes: usize,
        /// Export whose signature disagrees.
        export: String,
    },

    /// Marshaling was attempted before the memory interface was bound.
    #[error("Memory interface not bound: {what}")]
    NotBound {
        /// What was missing (memory or exports).
        what: &'static str,
    },

    /// The memory interface was bound twice.
    #[error("Memory interface already bound: {what}")]
    AlreadyBound {
        /// What was bound a second time (memory or exports).
        what: &'static str,
    },

    /// A pointer/length pair falls outside linear memory.
    #[error("Out of bounds access: ptr={ptr} len={len} memory_size={memory_size}")]
    OutOfBounds {
        /// Start offset.
        ptr: u64,
        /// Length in bytes.
        len: u64,
        /// Current memory size in bytes.
        memory_size: usize,
    },

    /// The lifecycle state machine was asked to make an illegal transition.
    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },
}

/// Errors from host services.
///
/// None of these reach the module: the module only ever observes the absence
/// of the corresponding callback.
#[derive(Error, Debug)]
pub enum HostFunctionError {
    /// A tile fetch failed at the transport level.
    #[error("Fetch failed: {url} ({reason})")]
    FetchFailed {
        /// The URL that was requested.
        url: String,
        /// Transport error description.
        reason: String,
    },

    /// A tile fetch returned a non-success status and the policy rejects it.
    #[error("Fetch returned status {status}: {url}")]
    HttpStatus {
        /// The URL that was requested.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The requested operation was denied by the fetch policy.
    #[error("Permission denied: {resource}")]
    PermissionDenied {
        /// Description of the resource that access was denied to.
        resource: String,
    },

    /// A response body exceeded the configured limit.
    #[error("Body too large: {url} ({size} > {limit} bytes)")]
    BodyTooLarge {
        /// The URL that was requested.
        url: String,
        /// Observed body size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Reading a selected file failed.
    #[error("Error reading file '{name}': {reason}")]
    FileReadFailed {
        /// File name as reported by the host.
        name: String,
        /// Read error description.
        reason: String,
    },

    /// The selected file does not carry the accepted extension.
    #[error("Unsupported file type: {name} (expected {expected})")]
    UnsupportedFile {
        /// File name as reported by the host.
        name: String,
        /// Accepted extension.
        expected: String,
    },

    /// Invalid argument was passed to a host function.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Description of why the argument was invalid.
        reason: String,
    },
}

impl RuntimeError {
    /// Create a new `MissingExport` error.
    pub fn missing_export(name: impl Into<String>) -> Self {
        Self::MissingExport { name: name.into() }
    }

    /// Create a new `CompilationFailed` error.
    pub fn compilation_failed(reason: impl Into<String>) -> Self {
        Self::CompilationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `InstantiationFailed` error.
    pub fn instantiation_failed(reason: impl Into<String>) -> Self {
        Self::InstantiationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `Trap` error.
    pub fn trap(export: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Trap {
            export: export.into(),
            message: message.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` for configuration and precondition errors.
    ///
    /// These are never recoverable at the bridge layer.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::WordSizeMismatch { .. }
                | Self::NotBound { .. }
                | Self::AlreadyBound { .. }
                | Self::MissingExport { .. }
        )
    }

    /// Returns `true` if this error came out of the module itself.
    pub fn is_trap(&self) -> bool {
        matches!(self, Self::Trap { .. } | Self::FuelExhausted)
    }
}
