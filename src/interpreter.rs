//! Process-wide interpreter lifecycle: `Uninitialized → Running → Finalized`.
//!
//! One `RwLock` guards the state. Interpreter sessions ([`with_interpreter`])
//! hold it shared for their whole duration; [`start`] and [`stop`] hold it
//! exclusively, so the interpreter can never be finalized under a running call.
//! Sessions must not be nested on one thread.
//!
//! CPython can be initialized again after finalization, but native extension
//! modules that are not reload-safe break when that happens. Restart is
//! therefore refused unless [`BridgeConfig::allow_reinitialize`] is set.

use std::os::raw::c_int;
use std::path::Path;
use std::sync::{Mutex, PoisonError, RwLock, TryLockError};
use std::thread::{self, ThreadId};

use pyo3::{ffi, Py, PyAny, Python};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::exception;
use crate::handle::ObjectHandle;
use crate::registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpreterState {
    Uninitialized,
    Running,
    Finalized,
}

struct Lifecycle {
    state: InterpreterState,
    /// Incremented on every successful `start()`.
    generation: u64,
    main_thread: Option<MainThread>,
}

/// Thread state released by `PyEval_SaveThread` after initialization.
struct MainThread {
    tstate: *mut ffi::PyThreadState,
    thread: ThreadId,
}

// The pointer is handed back to CPython only by `stop()`, under the write lock.
unsafe impl Send for MainThread {}
unsafe impl Sync for MainThread {}

static LIFECYCLE: RwLock<Lifecycle> = RwLock::new(Lifecycle {
    state: InterpreterState::Uninitialized,
    generation: 0,
    main_thread: None,
});

/// References dropped while `start()`/`stop()` held the lifecycle lock,
/// tagged with the generation that created them.
static DEFERRED: Mutex<Vec<(u64, Py<PyAny>)>> = Mutex::new(Vec::new());

pub fn state() -> InterpreterState {
    LIFECYCLE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .state
}

/// Initialize the interpreter and append `config.search_paths` to `sys.path`.
///
/// If a search path cannot be appended the interpreter stays `Running` and
/// the error is returned; `stop()` is still required.
pub fn start(config: &BridgeConfig) -> Result<()> {
    {
        let mut lifecycle = LIFECYCLE.write().unwrap_or_else(PoisonError::into_inner);
        match lifecycle.state {
            InterpreterState::Running => {
                tracing::warn!("start() called while the interpreter is running");
                return Err(BridgeError::AlreadyRunning);
            }
            InterpreterState::Finalized if !config.allow_reinitialize => {
                tracing::warn!("refusing to re-initialize a finalized interpreter");
                return Err(BridgeError::RestartRefused);
            }
            _ => {}
        }

        if unsafe { ffi::Py_IsInitialized() } != 0 {
            return Err(BridgeError::InitializationFailed(
                "interpreter was initialized outside the bridge".to_string(),
            ));
        }

        #[cfg(target_os = "linux")]
        {
            if config.global_libpython {
                promote_libpython_global();
            }
        }

        unsafe { ffi::Py_InitializeEx(c_int::from(config.install_signal_handlers)) };
        if unsafe { ffi::Py_IsInitialized() } == 0 {
            return Err(BridgeError::InitializationFailed(
                "Py_InitializeEx did not initialize the interpreter".to_string(),
            ));
        }

        // Release the GIL so any thread can attach through PyGILState_Ensure.
        let tstate = unsafe { ffi::PyEval_SaveThread() };
        lifecycle.main_thread = Some(MainThread {
            tstate,
            thread: thread::current().id(),
        });
        lifecycle.state = InterpreterState::Running;
        lifecycle.generation += 1;
        exception::set_print_tracebacks(config.print_tracebacks);
        registry::init_registry();
        tracing::info!(
            generation = lifecycle.generation,
            built_against = option_env!("PYHOST_PYTHON_VERSION").unwrap_or("unknown"),
            "Python interpreter started"
        );
    }

    for path in &config.search_paths {
        append_module_search_path(path)?;
    }
    Ok(())
}

/// Release every bridge-held object and finalize the interpreter.
pub fn stop() -> Result<()> {
    let mut lifecycle = LIFECYCLE.write().unwrap_or_else(PoisonError::into_inner);
    if lifecycle.state != InterpreterState::Running {
        return Err(BridgeError::InterpreterNotRunning);
    }

    let generation = lifecycle.generation;
    Python::with_gil(|py| {
        registry::destroy_registry(py);
        release_deferred(py, generation);
    });

    let main_thread = lifecycle.main_thread.take();
    let status = unsafe {
        match main_thread {
            Some(main) if main.thread == thread::current().id() => {
                ffi::PyEval_RestoreThread(main.tstate);
            }
            _ => {
                tracing::warn!("finalizing the interpreter from a thread other than the one that started it");
                ffi::PyGILState_Ensure();
            }
        }
        ffi::Py_FinalizeEx()
    };
    lifecycle.state = InterpreterState::Finalized;

    if status < 0 {
        tracing::warn!("Py_FinalizeEx reported an error while flushing buffered data");
    }
    tracing::info!(generation, "Python interpreter finalized");
    Ok(())
}

/// Append `path` to `sys.path`.
pub fn append_module_search_path(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let text = path.to_str().ok_or_else(|| {
        BridgeError::InvalidArgument(format!("search path is not valid UTF-8: {}", path.display()))
    })?;
    with_interpreter(|py| {
        let sys_path = unsafe {
            ObjectHandle::from_borrowed(py, ffi::PySys_GetObject(c"path".as_ptr()), "sys.path")
        }?;
        let entry = ObjectHandle::new_str(py, text)?;
        sys_path.append(&entry)?;
        tracing::debug!(path = text, "appended module search path");
        Ok(())
    })
}

/// Run `f` with the GIL held, provided the interpreter is `Running`.
///
/// Fails with `InterpreterNotRunning` before any foreign pointer is touched.
pub fn with_interpreter<F, R>(f: F) -> Result<R>
where
    F: for<'py> FnOnce(Python<'py>) -> Result<R>,
{
    with_session(None, |py, _| f(py))
}

/// Like [`with_interpreter`], also passing the interpreter generation.
/// With `expected` set, an interpreter from another generation counts as not running.
pub(crate) fn with_session<F, R>(expected: Option<u64>, f: F) -> Result<R>
where
    F: for<'py> FnOnce(Python<'py>, u64) -> Result<R>,
{
    let lifecycle = LIFECYCLE.read().unwrap_or_else(PoisonError::into_inner);
    if lifecycle.state != InterpreterState::Running
        || expected.is_some_and(|g| g != lifecycle.generation)
    {
        return Err(BridgeError::InterpreterNotRunning);
    }
    let generation = lifecycle.generation;
    Python::with_gil(|py| {
        release_deferred(py, generation);
        f(py, generation)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposal {
    /// Decrement now under the GIL.
    Release,
    /// The lifecycle lock is busy; release at the next session or `stop()`.
    Defer,
    /// The creating interpreter is gone; never touch the object again.
    Leak,
}

/// `current` is `None` when the lifecycle lock could not be read without blocking.
fn disposal(current: Option<(InterpreterState, u64)>, generation: u64) -> Disposal {
    match current {
        None => Disposal::Defer,
        Some((InterpreterState::Running, g)) if g == generation => Disposal::Release,
        Some(_) => Disposal::Leak,
    }
}

/// Release `obj` if the interpreter that created it is still running.
///
/// An object whose interpreter was finalized is leaked, since decrementing it
/// would touch freed memory. If `start()` or `stop()` holds the lock the
/// release is queued instead. Returns whether the release happened now.
pub(crate) fn release_in_generation(generation: u64, obj: Py<PyAny>) -> bool {
    let guard = match LIFECYCLE.try_read() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    };
    let current = guard.as_ref().map(|l| (l.state, l.generation));
    match disposal(current, generation) {
        Disposal::Release => {
            // The read guard keeps stop() out until the decrement is done.
            Python::with_gil(|_py| drop(obj));
            true
        }
        Disposal::Defer => {
            defer(generation, obj);
            false
        }
        Disposal::Leak => {
            std::mem::forget(obj);
            tracing::debug!(generation, "leaked a reference that outlived its interpreter");
            false
        }
    }
}

fn defer(generation: u64, obj: Py<PyAny>) {
    DEFERRED
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push((generation, obj));
    tracing::debug!(generation, "lifecycle lock busy; deferred a reference release");
}

/// Drop queued references from `generation`; leak those from earlier ones.
fn release_deferred(_py: Python<'_>, generation: u64) {
    let pending = std::mem::take(&mut *DEFERRED.lock().unwrap_or_else(PoisonError::into_inner));
    for (g, obj) in pending {
        if g == generation {
            drop(obj);
        } else {
            std::mem::forget(obj);
        }
    }
}

/// Re-open an already loaded `libpython` with `RTLD_GLOBAL` so that Python C
/// extensions (NumPy, PyTorch) can resolve interpreter symbols.
#[cfg(target_os = "linux")]
fn promote_libpython_global() {
    use libc::{c_char, dlopen, RTLD_GLOBAL, RTLD_NOLOAD, RTLD_NOW};

    let candidates: &[&[u8]] = &[
        b"libpython3.so\0",
        b"libpython3.13.so\0",
        b"libpython3.12.so\0",
        b"libpython3.11.so\0",
        b"libpython3.10.so\0",
        b"libpython3.9.so\0",
    ];
    for name in candidates {
        unsafe {
            let loaded = dlopen(name.as_ptr() as *const c_char, RTLD_NOW | RTLD_NOLOAD);
            if !loaded.is_null() {
                dlopen(name.as_ptr() as *const c_char, RTLD_NOW | RTLD_GLOBAL);
                tracing::debug!(
                    library = %String::from_utf8_lossy(&name[..name.len() - 1]),
                    "re-opened libpython with RTLD_GLOBAL"
                );
                return;
            }
        }
    }
}
