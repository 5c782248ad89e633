//! Object handles: one foreign `PyObject*` plus the reference it represents.
//!
//! Every pointer coming back from the C API is wrapped immediately, using the
//! constructor that matches the call's documented reference semantics:
//!
//! | C API returns      | constructor                     | on drop          |
//! |--------------------|---------------------------------|------------------|
//! | new reference      | [`ObjectHandle::from_new`]      | `Py_DecRef` once |
//! | borrowed reference | [`ObjectHandle::from_borrowed`] | nothing          |
//!
//! Arguments that the C API steals are handed over with [`ObjectHandle::steal`],
//! which consumes the handle so it cannot be released or read again.
//!
//! Handles carry the GIL token `Python<'py>`, so they cannot leave the
//! interpreter session that created them and are never `Send`.

use std::ffi::CString;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use pyo3::{ffi, Py, PyAny, Python};

use crate::error::ForeignError;
use crate::exception;

/// Number of `Owned` handles currently alive, process-wide.
static LIVE_OWNED: AtomicUsize = AtomicUsize::new(0);

/// Diagnostic counter of owned handles that still have a release pending.
///
/// Returns to its previous value once every handle created by a call has
/// been released, on success and on failure.
pub fn live_owned_handles() -> usize {
    LIVE_OWNED.load(Ordering::SeqCst)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// This handle holds one reference and releases it exactly once.
    Owned,
    /// Someone else keeps the object alive; this handle never releases it.
    Borrowed,
}

pub struct ObjectHandle<'py> {
    ptr: NonNull<ffi::PyObject>,
    ownership: Ownership,
    py: Python<'py>,
}

impl<'py> ObjectHandle<'py> {
    /// Wrap a new reference, or `None` for a null pointer.
    ///
    /// # Safety
    /// `ptr` must be null or a new reference the caller now owns, and the GIL
    /// must be held (guaranteed by `py`).
    pub unsafe fn new_ref(py: Python<'py>, ptr: *mut ffi::PyObject) -> Option<Self> {
        let ptr = NonNull::new(ptr)?;
        LIVE_OWNED.fetch_add(1, Ordering::SeqCst);
        Some(Self {
            ptr,
            ownership: Ownership::Owned,
            py,
        })
    }

    /// Wrap a borrowed reference, or `None` for a null pointer.
    ///
    /// # Safety
    /// `ptr` must be null or point to an object kept alive by another owner
    /// for as long as the handle is used.
    pub unsafe fn borrowed_ref(py: Python<'py>, ptr: *mut ffi::PyObject) -> Option<Self> {
        let ptr = NonNull::new(ptr)?;
        Some(Self {
            ptr,
            ownership: Ownership::Borrowed,
            py,
        })
    }

    /// Wrap the result of a C API call returning a new reference.
    ///
    /// A null result drains the pending exception into the error.
    ///
    /// # Safety
    /// Same as [`ObjectHandle::new_ref`].
    pub unsafe fn from_new(
        py: Python<'py>,
        ptr: *mut ffi::PyObject,
        context: &str,
    ) -> Result<Self, ForeignError> {
        unsafe { Self::new_ref(py, ptr) }.ok_or_else(|| exception::fetch(py, context))
    }

    /// Wrap the result of a C API call returning a borrowed reference.
    ///
    /// # Safety
    /// Same as [`ObjectHandle::borrowed_ref`].
    pub unsafe fn from_borrowed(
        py: Python<'py>,
        ptr: *mut ffi::PyObject,
        context: &str,
    ) -> Result<Self, ForeignError> {
        unsafe { Self::borrowed_ref(py, ptr) }.ok_or_else(|| exception::fetch(py, context))
    }

    /// New owned handle to the object behind a `Py<PyAny>`.
    pub fn from_py(py: Python<'py>, obj: &Py<PyAny>) -> Self {
        let ptr = obj.as_ptr();
        unsafe { ffi::Py_IncRef(ptr) };
        LIVE_OWNED.fetch_add(1, Ordering::SeqCst);
        Self {
            // Py<PyAny> always holds a live object.
            ptr: unsafe { NonNull::new_unchecked(ptr) },
            ownership: Ownership::Owned,
            py,
        }
    }

    pub fn py(&self) -> Python<'py> {
        self.py
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn is_owned(&self) -> bool {
        self.ownership == Ownership::Owned
    }

    /// Raw pointer for passing to a C API call that borrows its argument.
    pub fn as_ptr(&self) -> *mut ffi::PyObject {
        self.ptr.as_ptr()
    }

    /// Take ownership of a borrowed object. Owned handles are returned unchanged.
    pub fn promote(mut self) -> Self {
        if self.ownership == Ownership::Borrowed {
            unsafe { ffi::Py_IncRef(self.ptr.as_ptr()) };
            LIVE_OWNED.fetch_add(1, Ordering::SeqCst);
            self.ownership = Ownership::Owned;
        }
        self
    }

    /// A second, independently owned reference to the same object.
    pub fn clone_ref(&self) -> Self {
        unsafe { ffi::Py_IncRef(self.ptr.as_ptr()) };
        LIVE_OWNED.fetch_add(1, Ordering::SeqCst);
        Self {
            ptr: self.ptr,
            ownership: Ownership::Owned,
            py: self.py,
        }
    }

    /// Hand the reference to a C API call that steals it.
    ///
    /// The handle is consumed; the callee is now responsible for the release.
    pub fn steal(self) -> *mut ffi::PyObject {
        let owned = self.promote();
        let ptr = owned.ptr.as_ptr();
        std::mem::forget(owned);
        LIVE_OWNED.fetch_sub(1, Ordering::SeqCst);
        ptr
    }

    /// Move the reference into a `Py<PyAny>` that may outlive this session.
    pub fn into_py(self) -> Py<PyAny> {
        let py = self.py;
        let ptr = self.steal();
        unsafe { Py::from_owned_ptr(py, ptr) }
    }

    /// `getattr(obj, name)`.
    pub fn getattr(&self, name: &str) -> Result<ObjectHandle<'py>, ForeignError> {
        let name = c_string(name)?;
        unsafe {
            Self::from_new(
                self.py,
                ffi::PyObject_GetAttrString(self.as_ptr(), name.as_ptr()),
                "PyObject_GetAttrString",
            )
        }
    }

    /// `len(obj)`.
    pub fn len(&self) -> Result<usize, ForeignError> {
        let n = unsafe { ffi::PyObject_Size(self.as_ptr()) };
        if n < 0 {
            return Err(exception::fetch(self.py, "PyObject_Size"));
        }
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool, ForeignError> {
        Ok(self.len()? == 0)
    }

    pub fn is_callable(&self) -> bool {
        unsafe { ffi::PyCallable_Check(self.as_ptr()) != 0 }
    }

    /// `str(obj)` copied into a host string.
    pub fn str(&self) -> Result<String, ForeignError> {
        let s = unsafe { Self::from_new(self.py, ffi::PyObject_Str(self.as_ptr()), "PyObject_Str") }?;
        unicode_to_string(&s)
    }

    /// Current reference count, for diagnostics only.
    pub fn refcount(&self) -> isize {
        unsafe { ffi::Py_REFCNT(self.as_ptr()) }
    }

    // ==================== Containers ====================

    /// `PyList_New(len)`: a list whose slots must all be filled with
    /// [`ObjectHandle::set_list_item`] before it is handed to Python code.
    pub fn new_list(py: Python<'py>, len: usize) -> Result<Self, ForeignError> {
        unsafe { Self::from_new(py, ffi::PyList_New(len as ffi::Py_ssize_t), "PyList_New") }
    }

    /// `PyTuple_New(len)`, same slot contract as [`ObjectHandle::new_list`].
    pub fn new_tuple(py: Python<'py>, len: usize) -> Result<Self, ForeignError> {
        unsafe { Self::from_new(py, ffi::PyTuple_New(len as ffi::Py_ssize_t), "PyTuple_New") }
    }

    /// `PyList_SetItem`: steals `item`, also when it fails.
    pub fn set_list_item(&self, index: usize, item: ObjectHandle<'py>) -> Result<(), ForeignError> {
        let rc = unsafe {
            ffi::PyList_SetItem(self.as_ptr(), index as ffi::Py_ssize_t, item.steal())
        };
        if rc < 0 {
            return Err(exception::fetch(self.py, "PyList_SetItem"));
        }
        Ok(())
    }

    /// `PyTuple_SetItem`: steals `item`, also when it fails.
    pub fn set_tuple_item(&self, index: usize, item: ObjectHandle<'py>) -> Result<(), ForeignError> {
        let rc = unsafe {
            ffi::PyTuple_SetItem(self.as_ptr(), index as ffi::Py_ssize_t, item.steal())
        };
        if rc < 0 {
            return Err(exception::fetch(self.py, "PyTuple_SetItem"));
        }
        Ok(())
    }

    /// `PyList_Append`: borrows `item`; the list takes its own reference.
    pub fn append(&self, item: &ObjectHandle<'py>) -> Result<(), ForeignError> {
        let rc = unsafe { ffi::PyList_Append(self.as_ptr(), item.as_ptr()) };
        if rc < 0 {
            return Err(exception::fetch(self.py, "PyList_Append"));
        }
        Ok(())
    }

    /// A new `str` object.
    pub fn new_str(py: Python<'py>, value: &str) -> Result<Self, ForeignError> {
        let value = c_string(value)?;
        unsafe { Self::from_new(py, ffi::PyUnicode_FromString(value.as_ptr()), "PyUnicode_FromString") }
    }
}

impl Drop for ObjectHandle<'_> {
    fn drop(&mut self) {
        if self.ownership == Ownership::Owned {
            // The GIL is held for as long as `self.py` exists.
            unsafe { ffi::Py_DecRef(self.ptr.as_ptr()) };
            LIVE_OWNED.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl fmt::Debug for ObjectHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("ptr", &self.ptr)
            .field("ownership", &self.ownership)
            .finish()
    }
}

/// Host string to C string, reporting an interior NUL as a `ValueError`.
pub(crate) fn c_string(s: &str) -> Result<CString, ForeignError> {
    CString::new(s).map_err(|_| ForeignError {
        type_name: "ValueError".to_string(),
        message: format!("embedded null byte in {s:?}"),
        traceback: None,
    })
}

/// Copy a `str` object's UTF-8 contents.
pub(crate) fn unicode_to_string(obj: &ObjectHandle<'_>) -> Result<String, ForeignError> {
    let mut size: ffi::Py_ssize_t = 0;
    let data = unsafe { ffi::PyUnicode_AsUTF8AndSize(obj.as_ptr(), &mut size) };
    if data.is_null() {
        return Err(exception::fetch(obj.py(), "PyUnicode_AsUTF8AndSize"));
    }
    let bytes = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), size as usize) };
    Ok(String::from_utf8_lossy(bytes).into_owned())
}
