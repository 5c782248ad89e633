//! Host-facing calls: `module.function(list_of_numbers) -> list_of_numbers`.

use pyo3::{Py, PyAny, Python};

use crate::binding::{CallableHandle, ModuleHandle};
use crate::convert::{self, FromForeign, ToForeign};
use crate::error::{BridgeError, Result};
use crate::handle::ObjectHandle;
use crate::interpreter;
use crate::invoke;

/// Call `module.function(args)` and read the returned sequence as `i64`s.
///
/// Every handle created along the way is released before this returns.
pub fn call_function(module: &str, function: &str, args: &[f64]) -> Result<Vec<i64>> {
    call_function_as(module, function, args)
}

/// [`call_function`] with caller-chosen element types on both sides.
pub fn call_function_as<A: ToForeign, R: FromForeign>(
    module: &str,
    function: &str,
    args: &[A],
) -> Result<Vec<R>> {
    interpreter::with_interpreter(|py| {
        let module = ModuleHandle::import(py, module)?;
        let callable = module.resolve_callable(function)?;
        call_resolved(py, &callable, args)
    })
}

fn call_resolved<'py, A: ToForeign, R: FromForeign>(
    py: Python<'py>,
    callable: &CallableHandle<'py>,
    args: &[A],
) -> Result<Vec<R>> {
    let list = convert::to_foreign_list(py, args)?;
    let result = invoke::invoke1(callable, &list)?;
    convert::from_foreign_list(&result)
}

/// A function resolved once and called many times.
///
/// Holds its own reference to the callable. The reference belongs to the
/// interpreter generation that created it: after `stop()` calls fail with
/// `InterpreterNotRunning` and dropping the binding leaks the reference
/// instead of touching the finalized interpreter.
#[derive(Debug)]
pub struct FunctionBinding {
    module: String,
    function: String,
    callable: Option<Py<PyAny>>,
    generation: u64,
}

impl FunctionBinding {
    pub fn bind(module: &str, function: &str) -> Result<Self> {
        interpreter::with_session(None, |py, generation| {
            let callable = ModuleHandle::import(py, module)?
                .resolve_callable(function)?
                .promote();
            tracing::debug!(function = %callable.qualified_name(), generation, "bound function");
            Ok(Self {
                module: module.to_string(),
                function: function.to_string(),
                callable: Some(callable.into_py()),
                generation,
            })
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn call(&self, args: &[f64]) -> Result<Vec<i64>> {
        self.call_as(args)
    }

    pub fn call_as<A: ToForeign, R: FromForeign>(&self, args: &[A]) -> Result<Vec<R>> {
        interpreter::with_session(Some(self.generation), |py, _| {
            let Some(callable) = &self.callable else {
                return Err(BridgeError::InterpreterNotRunning);
            };
            let callable = CallableHandle::from_owned(
                &self.module,
                &self.function,
                ObjectHandle::from_py(py, callable),
            );
            call_resolved(py, &callable, args)
        })
    }

    /// Release the callable now. The GIL must be held and the binding's
    /// interpreter still running.
    pub(crate) fn release(mut self, _py: Python<'_>) {
        drop(self.callable.take());
    }
}

impl Drop for FunctionBinding {
    fn drop(&mut self) {
        if let Some(callable) = self.callable.take() {
            interpreter::release_in_generation(self.generation, callable);
        }
    }
}
