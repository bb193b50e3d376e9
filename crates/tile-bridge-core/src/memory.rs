//! Marshaling between host values and module linear memory.
//!
//! [`MemoryInterface`] starts unbound. After instantiation it is bound exactly
//! once to the module's exports and exactly once to its memory; from then on
//! every operation reads or writes the memory as it is at the time of the
//! call, so pointers are only meaningful until the module grows its memory.
//!
//! # Word size
//!
//! Pointer and length values crossing the boundary are `i32` for wasm32
//! modules and `i64` for wasm64 modules. [`WordSize`] selects which, and
//! exports that disagree are rejected with [`RuntimeError::WordSizeMismatch`]
//! the first time they are used for marshaling.

use std::ops::Range;

use wasmtime::{AsContext, AsContextMut, Func, Memory, Store, Val, ValType};

use crate::exports::ModuleExports;
use crate::instance::map_call_error;
use crate::store::BridgeContext;
use tile_bridge_common::RuntimeError;

/// Width of pointer and length values exchanged with the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordSize {
    /// 4-byte words (wasm32).
    Four,
    /// 8-byte words (wasm64).
    Eight,
}

impl WordSize {
    /// Select the word size from a byte count.
    ///
    /// # Errors
    ///
    /// Only 4 and 8 are valid.
    pub fn from_bytes(bytes: usize) -> Result<Self, RuntimeError> {
        match bytes {
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            other => Err(RuntimeError::invalid_config(format!(
                "Unsupported word size: {other} bytes (expected 4 or 8)"
            ))),
        }
    }

    /// Size of a word in bytes.
    pub const fn bytes(self) -> usize {
        match self {
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    /// Wasm value type used for words.
    pub fn val_type(self) -> ValType {
        match self {
            Self::Four => ValType::I32,
            Self::Eight => ValType::I64,
        }
    }

    /// Check whether a value type is this word type.
    pub fn matches(self, ty: &ValType) -> bool {
        matches!(
            (self, ty),
            (Self::Four, ValType::I32) | (Self::Eight, ValType::I64)
        )
    }

    /// Encode an unsigned word.
    ///
    /// # Errors
    ///
    /// Fails if the value does not fit in a 4-byte word.
    #[allow(clippy::cast_possible_wrap)]
    pub fn to_val(self, value: u64) -> Result<Val, RuntimeError> {
        match self {
            Self::Four => u32::try_from(value)
                .map(|v| Val::I32(v as i32))
                .map_err(|_| RuntimeError::OutOfBounds {
                    ptr: value,
                    len: 0,
                    memory_size: u32::MAX as usize,
                }),
            Self::Eight => Ok(Val::I64(value as i64)),
        }
    }

    /// Decode an unsigned word, or `None` if the value has the other width.
    #[allow(clippy::cast_sign_loss)]
    pub fn from_val(self, val: &Val) -> Option<u64> {
        match (self, val) {
            (Self::Four, Val::I32(v)) => Some(u64::from(*v as u32)),
            (Self::Eight, Val::I64(v)) => Some(*v as u64),
            _ => None,
        }
    }

    /// Verify that the leading `count` parameters of `func` are words.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::WordSizeMismatch`] naming `export`.
    pub fn check_params(
        self,
        store: impl AsContext,
        func: &Func,
        export: &str,
        count: usize,
    ) -> Result<(), RuntimeError> {
        let ty = func.ty(&store);
        let params: Vec<ValType> = ty.params().collect();
        if params.len() < count || !params[..count].iter().all(|p| self.matches(p)) {
            return Err(RuntimeError::WordSizeMismatch {
                expected_bytes: self.bytes(),
                export: export.to_string(),
            });
        }
        Ok(())
    }
}

/// Marshaling interface over the module's memory and allocator exports.
///
/// The wrapped handles are plain store indices, so cloning is cheap. Imports
/// clone it out of the [`BridgeContext`] before touching memory.
#[derive(Clone)]
pub struct MemoryInterface {
    word_size: WordSize,
    memory: Option<Memory>,
    exports: Option<ModuleExports>,
}

impl MemoryInterface {
    /// Create an unbound interface.
    pub fn new(word_size: WordSize) -> Self {
        Self {
            word_size,
            memory: None,
            exports: None,
        }
    }

    /// Configured word size.
    pub fn word_size(&self) -> WordSize {
        self.word_size
    }

    /// Bind the module's exports. Allowed once.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::AlreadyBound`] on a second call.
    pub fn bind_exports(&mut self, exports: ModuleExports) -> Result<(), RuntimeError> {
        if self.exports.is_some() {
            return Err(RuntimeError::AlreadyBound { what: "exports" });
        }
        self.exports = Some(exports);
        Ok(())
    }

    /// Bind the module's linear memory. Allowed once.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::AlreadyBound`] on a second call.
    pub fn bind_memory(&mut self, memory: Memory) -> Result<(), RuntimeError> {
        if self.memory.is_some() {
            return Err(RuntimeError::AlreadyBound { what: "memory" });
        }
        self.memory = Some(memory);
        Ok(())
    }

    /// Returns `true` once both memory and exports are bound.
    pub fn is_bound(&self) -> bool {
        self.memory.is_some() && self.exports.is_some()
    }

    /// Bound exports.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotBound`] before [`Self::bind_exports`].
    pub fn exports(&self) -> Result<&ModuleExports, RuntimeError> {
        self.exports
            .as_ref()
            .ok_or(RuntimeError::NotBound { what: "exports" })
    }

    fn memory(&self) -> Result<Memory, RuntimeError> {
        self.memory.ok_or(RuntimeError::NotBound { what: "memory" })
    }

    /// Current memory size in bytes.
    pub fn size(&self, store: impl AsContext) -> Result<usize, RuntimeError> {
        Ok(self.memory()?.data_size(&store))
    }

    /// Resolve `ptr..ptr + len` against the current memory size.
    fn range(&self, memory_size: usize, ptr: u64, len: u64) -> Result<Range<usize>, RuntimeError> {
        let out_of_bounds = || RuntimeError::OutOfBounds {
            ptr,
            len,
            memory_size,
        };
        let start = usize::try_from(ptr).map_err(|_| out_of_bounds())?;
        let len_usize = usize::try_from(len).map_err(|_| out_of_bounds())?;
        let end = start.checked_add(len_usize).ok_or_else(out_of_bounds)?;
        if end > memory_size {
            return Err(out_of_bounds());
        }
        Ok(start..end)
    }

    /// Copy `len` bytes starting at `ptr` out of memory.
    ///
    /// # Errors
    ///
    /// Fails if unbound or if the range exceeds the current memory.
    pub fn read_bytes(
        &self,
        store: impl AsContext,
        ptr: u64,
        len: u64,
    ) -> Result<Vec<u8>, RuntimeError> {
        let memory = self.memory()?;
        let data = memory.data(&store);
        let range = self.range(data.len(), ptr, len)?;
        Ok(data[range].to_vec())
    }

    /// Decode `len` bytes starting at `ptr` as text.
    ///
    /// Invalid UTF-8 sequences are replaced rather than rejected.
    ///
    /// # Errors
    ///
    /// Fails if unbound or if the range exceeds the current memory.
    pub fn read_string(
        &self,
        store: impl AsContext,
        ptr: u64,
        len: u64,
    ) -> Result<String, RuntimeError> {
        let memory = self.memory()?;
        let data = memory.data(&store);
        let range = self.range(data.len(), ptr, len)?;
        Ok(String::from_utf8_lossy(&data[range]).into_owned())
    }

    /// Copy `bytes` into memory at `ptr`.
    ///
    /// The caller sizes the destination with [`Self::allocate`] first.
    ///
    /// # Errors
    ///
    /// Fails if unbound or if the range exceeds the current memory.
    pub fn write_bytes(
        &self,
        mut store: impl AsContextMut,
        ptr: u64,
        bytes: &[u8],
    ) -> Result<(), RuntimeError> {
        let memory = self.memory()?;
        let data = memory.data_mut(&mut store);
        let range = self.range(data.len(), ptr, bytes.len() as u64)?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Ask the module allocator for `len` bytes.
    ///
    /// # Errors
    ///
    /// Fails if unbound, on a word size mismatch, or if the allocator traps.
    pub async fn allocate(
        &self,
        store: &mut Store<BridgeContext>,
        len: u64,
    ) -> Result<u64, RuntimeError> {
        let exports = self.exports()?;
        let (func, name) = exports.allocate();
        self.word_size.check_params(&*store, func, name, 1)?;

        let mut results = [self.word_size.to_val(0)?];
        func.call_async(&mut *store, &[self.word_size.to_val(len)?], &mut results)
            .await
            .map_err(|e| map_call_error(name, &e))?;

        let ptr = self
            .word_size
            .from_val(&results[0])
            .ok_or_else(|| RuntimeError::WordSizeMismatch {
                expected_bytes: self.word_size.bytes(),
                export: name.to_string(),
            })?;
        store.data_mut().metrics.buffers_allocated += 1;
        Ok(ptr)
    }

    /// Return a buffer to the module allocator.
    ///
    /// # Errors
    ///
    /// Fails if unbound, on a word size mismatch, or if the deallocator traps.
    pub async fn free(&self, store: &mut Store<BridgeContext>, ptr: u64) -> Result<(), RuntimeError> {
        let exports = self.exports()?;
        let (func, name) = exports.free();
        self.word_size.check_params(&*store, func, name, 1)?;

        func.call_async(&mut *store, &[self.word_size.to_val(ptr)?], &mut [])
            .await
            .map_err(|e| map_call_error(name, &e))?;
        store.data_mut().metrics.buffers_freed += 1;
        Ok(())
    }
}

impl std::fmt::Debug for MemoryInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryInterface")
            .field("word_size", &self.word_size)
            .field("memory_bound", &self.memory.is_some())
            .field("exports_bound", &self.exports.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_size_from_bytes() {
        assert_eq!(WordSize::from_bytes(4).unwrap(), WordSize::Four);
        assert_eq!(WordSize::from_bytes(8).unwrap(), WordSize::Eight);
        assert!(matches!(
            WordSize::from_bytes(2),
            Err(RuntimeError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_word_size_values() {
        let four = WordSize::Four;
        assert!(matches!(four.to_val(7).unwrap(), Val::I32(7)));
        assert_eq!(four.from_val(&Val::I32(-1)), Some(u64::from(u32::MAX)));
        assert_eq!(four.from_val(&Val::I64(1)), None);
        assert!(four.to_val(u64::from(u32::MAX) + 1).is_err());

        let eight = WordSize::Eight;
        assert!(matches!(eight.to_val(1 << 40).unwrap(), Val::I64(v) if v == 1 << 40));
        assert_eq!(eight.from_val(&Val::I32(1)), None);
    }

    #[test]
    fn test_word_size_matches() {
        assert!(WordSize::Four.matches(&ValType::I32));
        assert!(!WordSize::Four.matches(&ValType::I64));
        assert!(WordSize::Eight.matches(&ValType::I64));
    }

    #[test]
    fn test_range_checks() {
        let iface = MemoryInterface::new(WordSize::Four);

        assert_eq!(iface.range(16, 4, 8).unwrap(), 4..12);
        assert_eq!(iface.range(16, 16, 0).unwrap(), 16..16);
        assert!(iface.range(16, 10, 8).is_err());
        assert!(iface.range(16, u64::MAX, 2).is_err());
    }

    #[test]
    fn test_unbound_interface() {
        let iface = MemoryInterface::new(WordSize::Four);

        assert!(!iface.is_bound());
        assert!(matches!(
            iface.exports(),
            Err(RuntimeError::NotBound { what: "exports" })
        ));
        assert!(matches!(
            iface.memory(),
            Err(RuntimeError::NotBound { what: "memory" })
        ));
    }
}
