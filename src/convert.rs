//! Marshaling between host numbers and foreign objects.
//!
//! Data is copied across the boundary: host slices become fresh Python lists,
//! and Python sequences are read back element by element into a `Vec`.

use std::ffi::CStr;
use std::os::raw::c_char;

use pyo3::{ffi, Python};

use crate::error::{ElementKind, ForeignError, MarshalError, Result};
use crate::exception;
use crate::handle::ObjectHandle;
use crate::iter::ForeignIter;

// ==================== Scalars ====================

/// A host value that can be turned into a new foreign object.
pub trait ToForeign {
    const KIND: ElementKind;

    fn to_foreign<'py>(&self, py: Python<'py>) -> std::result::Result<ObjectHandle<'py>, ForeignError>;
}

/// A host value that can be read out of a foreign object.
pub trait FromForeign: Sized {
    const KIND: ElementKind;

    fn from_foreign(obj: &ObjectHandle<'_>) -> std::result::Result<Self, ForeignError>;
}

impl ToForeign for f64 {
    const KIND: ElementKind = ElementKind::Float64;

    fn to_foreign<'py>(&self, py: Python<'py>) -> std::result::Result<ObjectHandle<'py>, ForeignError> {
        unsafe { ObjectHandle::from_new(py, ffi::PyFloat_FromDouble(*self), "PyFloat_FromDouble") }
    }
}

impl ToForeign for i64 {
    const KIND: ElementKind = ElementKind::Int64;

    fn to_foreign<'py>(&self, py: Python<'py>) -> std::result::Result<ObjectHandle<'py>, ForeignError> {
        unsafe { ObjectHandle::from_new(py, ffi::PyLong_FromLongLong(*self), "PyLong_FromLongLong") }
    }
}

impl ToForeign for bool {
    const KIND: ElementKind = ElementKind::Bool;

    fn to_foreign<'py>(&self, py: Python<'py>) -> std::result::Result<ObjectHandle<'py>, ForeignError> {
        unsafe {
            ObjectHandle::from_new(
                py,
                ffi::PyBool_FromLong(std::os::raw::c_long::from(*self)),
                "PyBool_FromLong",
            )
        }
    }
}

impl FromForeign for f64 {
    const KIND: ElementKind = ElementKind::Float64;

    /// Accepts `float`, `int` and anything implementing `__float__`.
    fn from_foreign(obj: &ObjectHandle<'_>) -> std::result::Result<Self, ForeignError> {
        let value = unsafe { ffi::PyFloat_AsDouble(obj.as_ptr()) };
        if value == -1.0 && !unsafe { ffi::PyErr_Occurred() }.is_null() {
            return Err(exception::fetch(obj.py(), "PyFloat_AsDouble"));
        }
        Ok(value)
    }
}

impl FromForeign for i64 {
    const KIND: ElementKind = ElementKind::Int64;

    /// Accepts `int` and `__index__` implementors. Floats are rejected rather
    /// than truncated.
    fn from_foreign(obj: &ObjectHandle<'_>) -> std::result::Result<Self, ForeignError> {
        if unsafe { ffi::PyFloat_Check(obj.as_ptr()) } != 0 {
            return Err(type_error(obj, "int"));
        }
        let value = unsafe { ffi::PyLong_AsLongLong(obj.as_ptr()) };
        if value == -1 && !unsafe { ffi::PyErr_Occurred() }.is_null() {
            return Err(exception::fetch(obj.py(), "PyLong_AsLongLong"));
        }
        Ok(value)
    }
}

impl FromForeign for bool {
    const KIND: ElementKind = ElementKind::Bool;

    /// Only `True` and `False`; truthiness of other objects is not a bool.
    fn from_foreign(obj: &ObjectHandle<'_>) -> std::result::Result<Self, ForeignError> {
        let ptr = obj.as_ptr();
        unsafe {
            if ptr == ffi::Py_True() {
                Ok(true)
            } else if ptr == ffi::Py_False() {
                Ok(false)
            } else {
                Err(type_error(obj, "bool"))
            }
        }
    }
}

fn type_error(obj: &ObjectHandle<'_>, expected: &str) -> ForeignError {
    let found = obj
        .getattr("__class__")
        .and_then(|cls| cls.getattr("__name__"))
        .and_then(|name| name.str())
        .unwrap_or_else(|_| "object".to_string());
    ForeignError {
        type_name: "TypeError".to_string(),
        message: format!("expected {expected}, found '{found}'"),
        traceback: None,
    }
}

// ==================== Sequences ====================

/// Build a new Python list holding a copy of `values`.
///
/// On failure at element `i`, that element and the partially filled list are
/// released before the error is returned.
pub fn to_foreign_list<'py, T: ToForeign>(py: Python<'py>, values: &[T]) -> Result<ObjectHandle<'py>> {
    let list = ObjectHandle::new_list(py, values.len()).map_err(|cause| MarshalError::Allocation {
        len: values.len(),
        cause,
    })?;
    for (index, value) in values.iter().enumerate() {
        let item = value
            .to_foreign(py)
            .map_err(|cause| MarshalError::NotConvertible {
                index,
                expected: T::KIND,
                cause,
            })?;
        list.set_list_item(index, item)
            .map_err(|cause| MarshalError::Insert { index, cause })?;
    }
    Ok(list)
}

/// Copy a sized Python sequence into a `Vec`.
///
/// Exactly `len(seq)` items are read through the iterator protocol; an
/// iterator that stops early is a [`MarshalError::ShortSequence`].
pub fn from_foreign_list<T: FromForeign>(seq: &ObjectHandle<'_>) -> Result<Vec<T>> {
    let expected = seq
        .len()
        .map_err(|cause| MarshalError::NotASequence { cause })?;
    let mut items = ForeignIter::new(seq).map_err(|cause| MarshalError::NotASequence { cause })?;

    let mut out = Vec::with_capacity(expected);
    for index in 0..expected {
        let item = match items.next() {
            Some(item) => item?,
            None => {
                return Err(MarshalError::ShortSequence {
                    expected,
                    actual: index,
                }
                .into())
            }
        };
        let value = T::from_foreign(&item).map_err(|cause| MarshalError::NotConvertible {
            index,
            expected: T::KIND,
            cause,
        })?;
        out.push(value);
    }
    Ok(out)
}

// ==================== C String Helpers ====================

/// Safely convert a `*const c_char` to `&str`.
///
/// # Safety
/// The pointer must be null or valid and null-terminated.
pub unsafe fn cstr_to_str<'a>(ptr: *const c_char) -> std::result::Result<&'a str, String> {
    if ptr.is_null() {
        return Err("Null string pointer".into());
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|e| format!("Invalid UTF-8: {e}"))
}
