//! Binding registry: maps integer ids to resolved functions for C callers.
//!
//! Ids are monotonically increasing `isize` values starting from 1.
//! Id 0 is never handed out.
//!
//! All operations are `Mutex`-protected. Entries are `Arc`s: a call clones
//! its entry and releases the lock before entering the interpreter, so a
//! long-running call never blocks `phb_bind` or `phb_unbind` on other threads.
//! The registry is created by `start()` and emptied by `stop()`, which
//! releases every callable with the GIL held before finalizing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pyo3::Python;

use crate::call::FunctionBinding;
use crate::error::{BridgeError, Result};

static REGISTRY: Mutex<Option<BindingRegistry>> = Mutex::new(None);

struct BindingRegistry {
    bindings: HashMap<isize, Arc<FunctionBinding>>,
    next_id: isize,
}

impl BindingRegistry {
    fn new() -> Self {
        Self {
            bindings: HashMap::new(),
            next_id: 1,
        }
    }
}

fn lock() -> MutexGuard<'static, Option<BindingRegistry>> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

// ==================== Public API ====================

/// Create an empty registry. Called by `start()`.
pub fn init_registry() {
    *lock() = Some(BindingRegistry::new());
}

/// Drop every binding. Called by `stop()` with the GIL held.
pub fn destroy_registry(py: Python<'_>) {
    let Some(registry) = lock().take() else {
        return;
    };
    let count = registry.bindings.len();
    for (_, binding) in registry.bindings {
        match Arc::try_unwrap(binding) {
            Ok(binding) => binding.release(py),
            // Still held by a caller between lookup and call; its drop leaks
            // the reference once the interpreter is gone.
            Err(shared) => drop(shared),
        }
    }
    if count > 0 {
        tracing::debug!(count, "released registered bindings");
    }
}

/// Register a binding and return its id.
pub fn insert(binding: FunctionBinding) -> Result<isize> {
    let mut guard = lock();
    let registry = guard.as_mut().ok_or(BridgeError::InterpreterNotRunning)?;
    let id = registry.next_id;
    registry.next_id = registry
        .next_id
        .checked_add(1)
        .ok_or_else(|| BridgeError::InvalidArgument("binding id counter overflow".into()))?;
    registry.bindings.insert(id, Arc::new(binding));
    Ok(id)
}

/// Shared reference to a binding; the id stays registered.
pub fn get(id: isize) -> Result<Arc<FunctionBinding>> {
    let guard = lock();
    let registry = guard.as_ref().ok_or(BridgeError::InterpreterNotRunning)?;
    registry
        .bindings
        .get(&id)
        .cloned()
        .ok_or(BridgeError::InvalidBinding(id))
}

/// Unregister a binding. The callable is released once the last `Arc` drops.
pub fn remove(id: isize) -> Result<Arc<FunctionBinding>> {
    let mut guard = lock();
    let registry = guard.as_mut().ok_or(BridgeError::InterpreterNotRunning)?;
    registry
        .bindings
        .remove(&id)
        .ok_or(BridgeError::InvalidBinding(id))
}

/// Number of registered bindings (for diagnostics).
pub fn len() -> Result<usize> {
    let guard = lock();
    let registry = guard.as_ref().ok_or(BridgeError::InterpreterNotRunning)?;
    Ok(registry.bindings.len())
}
