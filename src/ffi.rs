//! C ABI exports for hosts that load this crate as a shared library.
//!
//! Every `phb_*` function follows this contract:
//!
//! 1. Clears the last error
//! 2. Validates pointer arguments
//! 3. Performs the operation through the Rust API
//! 4. On error: stores the message via `set_last_error`, returns a negative code
//! 5. On success: returns `0` and fills any out-parameters
//!
//! **Status codes:** `0` is success; negative values are
//! [`BridgeError::code`]. The message is available from `phb_last_error()`.
//!
//! **Memory:**
//! - Result buffers written to `out_values` are allocated here and MUST be
//!   freed with `phb_free_i64s(ptr, len)`.
//! - Binding ids are opaque and MUST be released with `phb_unbind` or by `phb_stop`.

use std::os::raw::c_char;

use crate::call::{self, FunctionBinding};
use crate::config::BridgeConfig;
use crate::convert;
use crate::error::{clear_last_error, set_last_error, BridgeError, Result};
use crate::handle;
use crate::interpreter::{self, InterpreterState};
use crate::logging;
use crate::registry;

// ==================== Internal Helpers ====================

/// Run `f`, translating its result into a status code.
fn status(f: impl FnOnce() -> Result<()>) -> i32 {
    clear_last_error();
    match f() {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(e.detailed());
            e.code()
        }
    }
}

/// Read a C string argument.
///
/// # Safety
/// Pointer must be null or valid and null-terminated.
unsafe fn arg_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str> {
    unsafe { convert::cstr_to_str(ptr) }.map_err(|e| BridgeError::InvalidArgument(format!("{what}: {e}")))
}

/// Borrow the input array. A zero length accepts a null pointer.
///
/// # Safety
/// For `len > 0`, `ptr` must point to `len` readable `f64`s.
unsafe fn arg_values<'a>(ptr: *const f64, len: usize) -> Result<&'a [f64]> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(BridgeError::InvalidArgument("values: null pointer with non-zero length".into()));
    }
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
}

/// Reject null out-pointers before any foreign code runs.
fn arg_output(out_values: *mut *mut i64, out_len: *mut usize) -> Result<()> {
    if out_values.is_null() || out_len.is_null() {
        return Err(BridgeError::InvalidArgument("null output pointer".into()));
    }
    Ok(())
}

/// Hand a result buffer to the caller.
///
/// # Safety
/// Both out-pointers must have passed [`arg_output`] and be valid for writes.
unsafe fn write_output(values: Vec<i64>, out_values: *mut *mut i64, out_len: *mut usize) {
    let boxed = values.into_boxed_slice();
    unsafe {
        *out_len = boxed.len();
        *out_values = Box::into_raw(boxed).cast::<i64>();
    }
}

// ==================== Lifecycle ====================

/// Start the interpreter with configuration from `PYHOST_*` environment variables.
#[no_mangle]
pub extern "C" fn phb_start() -> i32 {
    status(|| interpreter::start(&BridgeConfig::from_env()))
}

/// Start the interpreter with a JSON configuration object.
///
/// # Safety
/// `config_json` must be a valid, null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn phb_start_with_config(config_json: *const c_char) -> i32 {
    status(|| {
        let json = unsafe { arg_str(config_json, "config") }?;
        interpreter::start(&BridgeConfig::from_json(json)?)
    })
}

/// Release all bindings and finalize the interpreter.
#[no_mangle]
pub extern "C" fn phb_stop() -> i32 {
    status(interpreter::stop)
}

/// `0` uninitialized, `1` running, `2` finalized.
#[no_mangle]
pub extern "C" fn phb_state() -> i32 {
    match interpreter::state() {
        InterpreterState::Uninitialized => 0,
        InterpreterState::Running => 1,
        InterpreterState::Finalized => 2,
    }
}

/// Append a directory to `sys.path`.
///
/// # Safety
/// `path` must be a valid, null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn phb_append_path(path: *const c_char) -> i32 {
    status(|| {
        let path = unsafe { arg_str(path, "path") }?;
        interpreter::append_module_search_path(path)
    })
}

/// Install a stderr log subscriber. `0` warn, `1` info, `2` debug, `3` trace.
///
/// Returns `1` if installed, `0` if a subscriber already existed.
#[no_mangle]
pub extern "C" fn phb_init_logging(verbosity: i32) -> i32 {
    i32::from(logging::init(logging::level_from_verbosity(verbosity)))
}

// ==================== Calls ====================

/// `module.function(values)`, result read as `int64`s.
///
/// # Safety
/// `module` and `function` must be valid C strings, `values` must point to
/// `len` doubles (or be null with `len == 0`), and both out-pointers must be
/// writable.
#[no_mangle]
pub unsafe extern "C" fn phb_call_function(
    module: *const c_char,
    function: *const c_char,
    values: *const f64,
    len: usize,
    out_values: *mut *mut i64,
    out_len: *mut usize,
) -> i32 {
    status(|| {
        let module = unsafe { arg_str(module, "module") }?;
        let function = unsafe { arg_str(function, "function") }?;
        let values = unsafe { arg_values(values, len) }?;
        arg_output(out_values, out_len)?;
        let result = call::call_function(module, function, values)?;
        unsafe { write_output(result, out_values, out_len) };
        Ok(())
    })
}

/// Free a buffer returned through `out_values`.
///
/// # Safety
/// `ptr` and `len` must come from one successful `phb_call_*`, or `ptr` is null.
#[no_mangle]
pub unsafe extern "C" fn phb_free_i64s(ptr: *mut i64, len: usize) {
    if !ptr.is_null() {
        drop(unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len)) });
    }
}

// ==================== Bindings ====================

/// Resolve `module.function` once and store it under a new id.
///
/// # Safety
/// String arguments must be valid C strings; `out_id` must be writable.
#[no_mangle]
pub unsafe extern "C" fn phb_bind(module: *const c_char, function: *const c_char, out_id: *mut isize) -> i32 {
    status(|| {
        let module = unsafe { arg_str(module, "module") }?;
        let function = unsafe { arg_str(function, "function") }?;
        if out_id.is_null() {
            return Err(BridgeError::InvalidArgument("null output pointer".into()));
        }
        let id = registry::insert(FunctionBinding::bind(module, function)?)?;
        unsafe { *out_id = id };
        Ok(())
    })
}

/// Call a registered binding.
///
/// # Safety
/// Same pointer requirements as `phb_call_function`.
#[no_mangle]
pub unsafe extern "C" fn phb_call_bound(
    id: isize,
    values: *const f64,
    len: usize,
    out_values: *mut *mut i64,
    out_len: *mut usize,
) -> i32 {
    status(|| {
        let values = unsafe { arg_values(values, len) }?;
        arg_output(out_values, out_len)?;
        let binding = registry::get(id)?;
        let result = binding.call(values)?;
        unsafe { write_output(result, out_values, out_len) };
        Ok(())
    })
}

/// Release a registered binding. The id is invalid afterwards.
#[no_mangle]
pub extern "C" fn phb_unbind(id: isize) -> i32 {
    status(|| registry::remove(id).map(drop))
}

/// Number of registered bindings, or a negative code when not running.
#[no_mangle]
pub extern "C" fn phb_binding_count() -> i64 {
    clear_last_error();
    match registry::len() {
        Ok(n) => n as i64,
        Err(e) => {
            set_last_error(e.to_string());
            i64::from(e.code())
        }
    }
}

/// Owned object handles currently alive (for debugging/diagnostics).
#[no_mangle]
pub extern "C" fn phb_live_handles() -> i64 {
    handle::live_owned_handles() as i64
}
