//! Module and callable resolution.
//!
//! A module is imported once (new reference), then looked up again in
//! `sys.modules` (borrowed reference) and the import reference is released:
//! from then on the module is kept alive by the interpreter's module table.
//! Attributes are read from the module's namespace dict, also borrowed.

use pyo3::{ffi, Py, PyAny, Python};

use crate::error::{BridgeError, Result};
use crate::handle::{c_string, ObjectHandle, Ownership};

/// `import name`: a new reference to the module.
pub fn resolve_module<'py>(py: Python<'py>, name: &str) -> Result<ObjectHandle<'py>> {
    let cname = c_string(name).map_err(|e| BridgeError::InvalidArgument(e.message))?;
    unsafe {
        ObjectHandle::from_new(py, ffi::PyImport_ImportModule(cname.as_ptr()), "PyImport_ImportModule")
    }
    .map_err(|cause| {
        tracing::debug!(module = name, error = %cause, "import failed");
        BridgeError::ModuleNotFound {
            name: name.to_string(),
            cause,
        }
    })
}

/// A module reachable through `sys.modules`.
///
/// Borrowed: valid while the module stays in the module table, which for
/// ordinary modules is the lifetime of the interpreter.
#[derive(Debug)]
pub struct ModuleHandle<'py> {
    name: String,
    handle: ObjectHandle<'py>,
}

impl<'py> ModuleHandle<'py> {
    /// Import `name` and bind it from the module table.
    pub fn import(py: Python<'py>, name: &str) -> Result<Self> {
        let imported = resolve_module(py, name)?;
        Self::bind(imported, name)
    }

    /// Look `name` up in the module table, then release the import reference.
    ///
    /// Taking `imported` by value ties binding to a successful import.
    pub fn bind(imported: ObjectHandle<'py>, name: &str) -> Result<Self> {
        let py = imported.py();
        let cname = c_string(name).map_err(|e| BridgeError::InvalidArgument(e.message))?;
        #[allow(deprecated)]
        let raw = unsafe { ffi::PyImport_AddModule(cname.as_ptr()) };
        let handle = unsafe { ObjectHandle::from_borrowed(py, raw, "PyImport_AddModule") }
            .map_err(|cause| BridgeError::ModuleNotFound {
                name: name.to_string(),
                cause,
            })?;
        drop(imported);
        tracing::debug!(module = name, "bound module");
        Ok(Self {
            name: name.to_string(),
            handle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &ObjectHandle<'py> {
        &self.handle
    }

    /// Find `attribute` in the module namespace and check that it is callable.
    pub fn resolve_callable(&self, attribute: &str) -> Result<CallableHandle<'py>> {
        let py = self.handle.py();
        let dict = unsafe {
            ObjectHandle::from_borrowed(py, ffi::PyModule_GetDict(self.handle.as_ptr()), "PyModule_GetDict")
        }?;
        let cattr = c_string(attribute).map_err(|e| BridgeError::InvalidArgument(e.message))?;
        // Borrowed; a missing key is a null without an exception.
        let raw = unsafe { ffi::PyDict_GetItemString(dict.as_ptr(), cattr.as_ptr()) };
        let Some(item) = (unsafe { ObjectHandle::borrowed_ref(py, raw) }) else {
            return Err(BridgeError::AttributeNotFound {
                module: self.name.clone(),
                attribute: attribute.to_string(),
            });
        };
        if !item.is_callable() {
            return Err(BridgeError::NotCallable {
                module: self.name.clone(),
                attribute: attribute.to_string(),
            });
        }
        Ok(CallableHandle {
            module: self.name.clone(),
            attribute: attribute.to_string(),
            handle: item,
        })
    }
}

/// A handle that passed `PyCallable_Check` when it was resolved.
#[derive(Debug)]
pub struct CallableHandle<'py> {
    module: String,
    attribute: String,
    handle: ObjectHandle<'py>,
}

impl<'py> CallableHandle<'py> {
    /// Wrap an owned reference to a previously resolved callable.
    pub(crate) fn from_owned(module: &str, attribute: &str, handle: ObjectHandle<'py>) -> Self {
        debug_assert_eq!(handle.ownership(), Ownership::Owned);
        Self {
            module: module.to_string(),
            attribute: attribute.to_string(),
            handle,
        }
    }

    pub fn handle(&self) -> &ObjectHandle<'py> {
        &self.handle
    }

    pub fn ownership(&self) -> Ownership {
        self.handle.ownership()
    }

    /// `module.attribute`, for messages.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.attribute)
    }

    /// Take ownership so the callable survives its module dict entry.
    pub fn promote(self) -> Self {
        Self {
            module: self.module,
            attribute: self.attribute,
            handle: self.handle.promote(),
        }
    }

    /// Owned reference usable across interpreter sessions.
    pub fn into_py(self) -> Py<PyAny> {
        self.handle.into_py()
    }
}
