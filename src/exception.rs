//! Pending-exception draining.
//!
//! CPython keeps one pending exception per thread state. It is only
//! meaningful until the next C API call, so every null/negative return is
//! followed immediately by [`drain`] (usually through [`fetch`]).
//!
//! Formatting the exception runs Python code of its own. Those helper calls
//! never recurse into [`drain`]: any failure while formatting is cleared and
//! replaced by a plainer description.

use std::ffi::CStr;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use pyo3::{ffi, Python};

use crate::error::ForeignError;
use crate::handle::ObjectHandle;

static PRINT_TRACEBACKS: AtomicBool = AtomicBool::new(false);

/// Also hand drained exceptions to the interpreter's own traceback printer.
pub fn set_print_tracebacks(enabled: bool) {
    PRINT_TRACEBACKS.store(enabled, Ordering::Relaxed);
}

/// Take the pending exception, if any, leaving the error indicator clear.
#[allow(deprecated)]
pub fn drain(py: Python<'_>) -> Option<ForeignError> {
    if unsafe { ffi::PyErr_Occurred() }.is_null() {
        return None;
    }

    let mut ptype = ptr::null_mut();
    let mut pvalue = ptr::null_mut();
    let mut ptraceback = ptr::null_mut();
    unsafe {
        ffi::PyErr_Fetch(&mut ptype, &mut pvalue, &mut ptraceback);
        ffi::PyErr_NormalizeException(&mut ptype, &mut pvalue, &mut ptraceback);
    }
    // PyErr_Fetch hands over one new reference per non-null slot.
    let ptype = unsafe { ObjectHandle::new_ref(py, ptype) };
    let pvalue = unsafe { ObjectHandle::new_ref(py, pvalue) };
    let ptraceback = unsafe { ObjectHandle::new_ref(py, ptraceback) };

    let err = ForeignError {
        type_name: ptype
            .as_ref()
            .and_then(|t| silently(|| attr_string(py, t, c"__name__")))
            .unwrap_or_else(|| "Exception".to_string()),
        message: pvalue
            .as_ref()
            .and_then(|v| silently(|| str_of(py, v)))
            .unwrap_or_default(),
        traceback: ptraceback.as_ref().and_then(|tb| format_traceback(py, tb)),
    };

    if PRINT_TRACEBACKS.load(Ordering::Relaxed) {
        if let Some(ptype) = &ptype {
            // PyErr_Restore steals all three; PyErr_PrintEx clears the indicator.
            unsafe {
                ffi::PyErr_Restore(
                    ptype.clone_ref().steal(),
                    pvalue.as_ref().map_or(ptr::null_mut(), |v| v.clone_ref().steal()),
                    ptraceback
                        .as_ref()
                        .map_or(ptr::null_mut(), |tb| tb.clone_ref().steal()),
                );
                ffi::PyErr_PrintEx(0);
            }
        }
    }
    unsafe { ffi::PyErr_Clear() };

    tracing::debug!(exception = %err.type_name, message = %err.message, "drained Python exception");
    Some(err)
}

/// Drain the pending exception for a call that reported failure through
/// `context`. A failure without an exception is reported as `SystemError`.
pub fn fetch(py: Python<'_>, context: &str) -> ForeignError {
    drain(py).unwrap_or_else(|| ForeignError::missing(context))
}

/// True when the pending state marks the clean end of an iterator: no
/// exception at all, or `StopIteration`, which is cleared.
pub(crate) fn take_stop_iteration(_py: Python<'_>) -> bool {
    unsafe {
        if ffi::PyErr_Occurred().is_null() {
            return true;
        }
        if ffi::PyErr_ExceptionMatches(ffi::PyExc_StopIteration) != 0 {
            ffi::PyErr_Clear();
            return true;
        }
    }
    false
}

/// `str(obj)` without touching the pending-error machinery.
fn str_of(py: Python<'_>, obj: &ObjectHandle<'_>) -> Option<String> {
    let s = unsafe { ObjectHandle::new_ref(py, ffi::PyObject_Str(obj.as_ptr())) }?;
    utf8(&s)
}

fn attr_string(py: Python<'_>, obj: &ObjectHandle<'_>, name: &CStr) -> Option<String> {
    let attr = unsafe {
        ObjectHandle::new_ref(py, ffi::PyObject_GetAttrString(obj.as_ptr(), name.as_ptr()))
    }?;
    utf8(&attr)
}

fn utf8(obj: &ObjectHandle<'_>) -> Option<String> {
    let mut size: ffi::Py_ssize_t = 0;
    let data = unsafe { ffi::PyUnicode_AsUTF8AndSize(obj.as_ptr(), &mut size) };
    if data.is_null() {
        return None;
    }
    let bytes = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), size as usize) };
    Some(String::from_utf8_lossy(bytes).into_owned())
}

/// `"".join(traceback.format_tb(tb))`.
fn format_traceback(py: Python<'_>, tb: &ObjectHandle<'_>) -> Option<String> {
    let formatted = silently(|| {
        let module = unsafe {
            ObjectHandle::new_ref(py, ffi::PyImport_ImportModule(c"traceback".as_ptr()))
        }?;
        let format_tb = unsafe {
            ObjectHandle::new_ref(
                py,
                ffi::PyObject_GetAttrString(module.as_ptr(), c"format_tb".as_ptr()),
            )
        }?;
        let args = unsafe { ObjectHandle::new_ref(py, ffi::PyTuple_New(1)) }?;
        let rc = unsafe { ffi::PyTuple_SetItem(args.as_ptr(), 0, tb.clone_ref().steal()) };
        if rc < 0 {
            return None;
        }
        let lines = unsafe {
            ObjectHandle::new_ref(py, ffi::PyObject_CallObject(format_tb.as_ptr(), args.as_ptr()))
        }?;
        let separator =
            unsafe { ObjectHandle::new_ref(py, ffi::PyUnicode_FromString(c"".as_ptr())) }?;
        let joined = unsafe {
            ObjectHandle::new_ref(py, ffi::PyUnicode_Join(separator.as_ptr(), lines.as_ptr()))
        }?;
        utf8(&joined)
    })?;
    Some(format!("Traceback (most recent call last):\n{formatted}"))
}

/// Run a formatting helper and discard whatever exception it leaves behind.
fn silently<T>(f: impl FnOnce() -> Option<T>) -> Option<T> {
    let result = f();
    unsafe { ffi::PyErr_Clear() };
    result
}
