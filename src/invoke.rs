//! Calls into resolved callables.
//!
//! Argument handles are only borrowed by the call: `PyObject_CallObject`
//! does not steal its argument tuple, so whoever created the arguments
//! releases them when their scope ends, whether the call succeeded or not.

use std::ptr;

use pyo3::ffi;

use crate::binding::CallableHandle;
use crate::error::{BridgeError, Result};
use crate::handle::ObjectHandle;

/// `callable(*args)`, with `args` an argument tuple or `None` for no arguments.
///
/// A failed call drains the pending exception before returning.
pub fn invoke<'py>(
    callable: &CallableHandle<'py>,
    args: Option<&ObjectHandle<'py>>,
) -> Result<ObjectHandle<'py>> {
    let py = callable.handle().py();
    let args_ptr = args.map_or(ptr::null_mut(), ObjectHandle::as_ptr);
    let raw = unsafe { ffi::PyObject_CallObject(callable.handle().as_ptr(), args_ptr) };
    unsafe { ObjectHandle::from_new(py, raw, "PyObject_CallObject") }.map_err(|cause| {
        tracing::debug!(function = %callable.qualified_name(), error = %cause, "call raised");
        BridgeError::ForeignRuntime(cause)
    })
}

/// `callable(a, b, ...)`: packs `args` into a fresh tuple and calls.
pub fn invoke_with<'py>(
    callable: &CallableHandle<'py>,
    args: &[&ObjectHandle<'py>],
) -> Result<ObjectHandle<'py>> {
    let py = callable.handle().py();
    let tuple = ObjectHandle::new_tuple(py, args.len())?;
    for (index, arg) in args.iter().enumerate() {
        // The tuple steals its items; give it a reference of its own.
        tuple.set_tuple_item(index, arg.clone_ref())?;
    }
    invoke(callable, Some(&tuple))
}

/// `callable(arg)`.
pub fn invoke1<'py>(callable: &CallableHandle<'py>, arg: &ObjectHandle<'py>) -> Result<ObjectHandle<'py>> {
    invoke_with(callable, &[arg])
}
