//! Default runtime imports.
//!
//! Every module gets the language runtime's baseline imports under the
//! [`RUNTIME_MODULE`] namespace: console output, traps, clocks, math
//! intrinsics and a random source. Bridge imports are registered on top of
//! these by [`crate::linker`].
//!
//! # Memory Protocol
//!
//! Imports that take text or buffers receive a `(ptr, len)` pair of
//! word-sized integers addressing the module's linear memory. Reads and
//! writes go through the store's [`tile_bridge_core::MemoryInterface`], so an
//! out-of-bounds range traps the calling module.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use tracing::{debug, warn};
use wasmtime::{Caller, FuncType, Linker, Val, ValType};

use tile_bridge_common::RuntimeError;
use tile_bridge_core::store::ConsoleStream;
use tile_bridge_core::{BridgeContext, WordSize};

/// Import namespace of the runtime defaults.
pub const RUNTIME_MODULE: &str = "odin_env";

/// Register every default runtime import.
///
/// # Errors
///
/// Returns an error if a function cannot be defined on the linker.
pub fn register_runtime_imports(
    linker: &mut Linker<BridgeContext>,
    word_size: WordSize,
) -> Result<(), RuntimeError> {
    register_console(linker, word_size)?;
    register_control(linker, word_size)?;
    register_time(linker)?;
    register_math(linker)?;
    register_random(linker, word_size)?;
    Ok(())
}

/// Register `write(fd: i32, ptr: word, len: word)`.
///
/// File descriptors 1 and 2 go to the console buffer. Anything else traps.
fn register_console(
    linker: &mut Linker<BridgeContext>,
    word_size: WordSize,
) -> Result<(), RuntimeError> {
    let word = word_size.val_type();
    let ty = FuncType::new(linker.engine(), [ValType::I32, word.clone(), word], []);

    linker
        .func_new(
            RUNTIME_MODULE,
            "write",
            ty,
            move |mut caller: Caller<'_, BridgeContext>, params: &[Val], _: &mut [Val]| {
                let fd = i32_arg(&params[0])?;
                let ptr = word_arg(word_size, &params[1])?;
                let len = word_arg(word_size, &params[2])?;

                let stream = ConsoleStream::from_fd(fd).ok_or_else(|| {
                    wasmtime::Error::msg(format!("write to unsupported file descriptor {fd}"))
                })?;

                let memory = caller.data().memory.clone();
                let bytes = memory.read_bytes(&caller, ptr, len)?;
                caller.data_mut().console.write(stream, &bytes);
                Ok(())
            },
        )
        .map_err(register_error("write"))?;

    Ok(())
}

/// Register `trap`, `abort`, `alert` and `evaluate`.
fn register_control(
    linker: &mut Linker<BridgeContext>,
    word_size: WordSize,
) -> Result<(), RuntimeError> {
    linker
        .func_wrap(RUNTIME_MODULE, "trap", || -> wasmtime::Result<()> {
            Err(wasmtime::Error::msg("module called trap"))
        })
        .map_err(register_error("trap"))?;

    linker
        .func_wrap(RUNTIME_MODULE, "abort", || -> wasmtime::Result<()> {
            Err(wasmtime::Error::msg("module called abort"))
        })
        .map_err(register_error("abort"))?;

    let word = word_size.val_type();
    let text_ty = FuncType::new(linker.engine(), [word.clone(), word], []);

    linker
        .func_new(
            RUNTIME_MODULE,
            "alert",
            text_ty.clone(),
            move |caller: Caller<'_, BridgeContext>, params: &[Val], _: &mut [Val]| {
                let message = read_text(&caller, word_size, params)?;
                warn!(message = %message, "Module alert");
                Ok(())
            },
        )
        .map_err(register_error("alert"))?;

    linker
        .func_new(
            RUNTIME_MODULE,
            "evaluate",
            text_ty,
            move |caller: Caller<'_, BridgeContext>, params: &[Val], _: &mut [Val]| {
                let source = read_text(&caller, word_size, params)?;
                warn!(len = source.len(), "Script evaluation is not supported, ignoring");
                Ok(())
            },
        )
        .map_err(register_error("evaluate"))?;

    Ok(())
}

/// Register `time_now`, `tick_now` and `time_sleep`.
fn register_time(linker: &mut Linker<BridgeContext>) -> Result<(), RuntimeError> {
    linker
        .func_wrap(RUNTIME_MODULE, "time_now", || -> i64 {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
                .unwrap_or(0)
        })
        .map_err(register_error("time_now"))?;

    linker
        .func_wrap(
            RUNTIME_MODULE,
            "tick_now",
            |caller: Caller<'_, BridgeContext>| -> f64 {
                caller.data().elapsed().as_secs_f64() * 1000.0
            },
        )
        .map_err(register_error("tick_now"))?;

    // No-op; frames are paced by the driver scheduler.
    linker
        .func_wrap(RUNTIME_MODULE, "time_sleep", |ms: i32| {
            debug!(ms, "Ignoring time_sleep");
        })
        .map_err(register_error("time_sleep"))?;

    Ok(())
}

/// Register the f64 math intrinsics.
fn register_math(linker: &mut Linker<BridgeContext>) -> Result<(), RuntimeError> {
    let unary: [(&'static str, fn(f64) -> f64); 5] = [
        ("sqrt", f64::sqrt),
        ("sin", f64::sin),
        ("cos", f64::cos),
        ("ln", f64::ln),
        ("exp", f64::exp),
    ];
    for (name, op) in unary {
        linker
            .func_wrap(RUNTIME_MODULE, name, move |x: f64| op(x))
            .map_err(register_error(name))?;
    }

    linker
        .func_wrap(RUNTIME_MODULE, "pow", |x: f64, power: f64| x.powf(power))
        .map_err(register_error("pow"))?;
    linker
        .func_wrap(RUNTIME_MODULE, "fmuladd", |x: f64, y: f64, z: f64| {
            x.mul_add(y, z)
        })
        .map_err(register_error("fmuladd"))?;
    linker
        .func_wrap(RUNTIME_MODULE, "ldexp", ldexp)
        .map_err(register_error("ldexp"))?;

    Ok(())
}

/// `x * 2^exp`, scaled in steps so that intermediate powers of two stay
/// finite and subnormal results round once.
fn ldexp(x: f64, exp: i32) -> f64 {
    let mut exp = exp.clamp(-2200, 2200);
    let mut y = x;
    while exp > 1023 {
        y *= 2f64.powi(1023);
        exp -= 1023;
    }
    // Stay 53 bits above the subnormal range until the last step.
    while exp < -1022 {
        y *= 2f64.powi(-1022 + 53);
        exp += 1022 - 53;
    }
    y * 2f64.powi(exp)
}

/// Register `rand_bytes(ptr: word, len: word)`.
fn register_random(
    linker: &mut Linker<BridgeContext>,
    word_size: WordSize,
) -> Result<(), RuntimeError> {
    let word = word_size.val_type();
    let ty = FuncType::new(linker.engine(), [word.clone(), word], []);

    linker
        .func_new(
            RUNTIME_MODULE,
            "rand_bytes",
            ty,
            move |mut caller: Caller<'_, BridgeContext>, params: &[Val], _: &mut [Val]| {
                let ptr = word_arg(word_size, &params[0])?;
                let len = word_arg(word_size, &params[1])?;

                let memory = caller.data().memory.clone();
                let memory_size = memory.size(&caller)?;
                let len = usize::try_from(len)
                    .ok()
                    .filter(|len| *len <= memory_size)
                    .ok_or(RuntimeError::OutOfBounds {
                        ptr,
                        len,
                        memory_size,
                    })?;

                let mut bytes = vec![0u8; len];
                rand::thread_rng().fill_bytes(&mut bytes);
                memory.write_bytes(&mut caller, ptr, &bytes)?;
                Ok(())
            },
        )
        .map_err(register_error("rand_bytes"))?;

    Ok(())
}

fn read_text(
    caller: &Caller<'_, BridgeContext>,
    word_size: WordSize,
    params: &[Val],
) -> wasmtime::Result<String> {
    let ptr = word_arg(word_size, &params[0])?;
    let len = word_arg(word_size, &params[1])?;
    let memory = caller.data().memory.clone();
    Ok(memory.read_string(caller, ptr, len)?)
}

pub(crate) fn word_arg(word_size: WordSize, val: &Val) -> wasmtime::Result<u64> {
    word_size
        .from_val(val)
        .ok_or_else(|| wasmtime::Error::msg(format!("expected a {}-byte word", word_size.bytes())))
}

pub(crate) fn i32_arg(val: &Val) -> wasmtime::Result<i32> {
    val.i32()
        .ok_or_else(|| wasmtime::Error::msg("expected an i32 argument"))
}

pub(crate) fn register_error(name: &'static str) -> impl FnOnce(wasmtime::Error) -> RuntimeError {
    move |e| RuntimeError::invalid_config(format!("Failed to register {name} import: {e}"))
}
