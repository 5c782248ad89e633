//! Bridge error types and the thread-local last-error slot used by the C ABI.
//!
//! Rust callers get a [`BridgeError`] from every fallible operation.
//! C callers get a negative status code (see [`BridgeError::code`]) and read
//! the message with `phb_last_error()`; that string stays owned by the bridge.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::fmt;
use std::os::raw::c_char;
use std::ptr;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Host-side numeric kind an element is marshaled to or from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Int64,
    Float64,
    Bool,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::Int64 => f.write_str("int64"),
            ElementKind::Float64 => f.write_str("float64"),
            ElementKind::Bool => f.write_str("bool"),
        }
    }
}

/// An exception drained from the interpreter's pending-error state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{type_name}: {message}")]
pub struct ForeignError {
    /// Exception class name, e.g. `ValueError`.
    pub type_name: String,
    /// `str(exception)`.
    pub message: String,
    /// Formatted traceback, when the interpreter could produce one.
    pub traceback: Option<String>,
}

impl ForeignError {
    /// Used when a foreign call signalled failure but left no exception behind.
    pub fn missing(context: &str) -> Self {
        Self {
            type_name: "SystemError".to_string(),
            message: format!("{context} failed without setting an exception"),
            traceback: None,
        }
    }

    /// Message with the traceback prepended, as the interpreter would print it.
    pub fn render(&self) -> String {
        match &self.traceback {
            Some(tb) if !tb.is_empty() => format!("{tb}{self}"),
            _ => self.to_string(),
        }
    }
}

/// Type or shape mismatch while crossing the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshalError {
    #[error("element {index} is not convertible to {expected}: {cause}")]
    NotConvertible {
        index: usize,
        expected: ElementKind,
        cause: ForeignError,
    },

    #[error("element {index} could not be placed in the foreign list: {cause}")]
    Insert { index: usize, cause: ForeignError },

    #[error("sequence reported {expected} items but iteration yielded {actual}")]
    ShortSequence { expected: usize, actual: usize },

    #[error("object is not a sized sequence: {cause}")]
    NotASequence { cause: ForeignError },

    #[error("foreign list of length {len} could not be allocated: {cause}")]
    Allocation { len: usize, cause: ForeignError },
}

impl MarshalError {
    /// Index of the offending element, when the failure is tied to one.
    pub fn index(&self) -> Option<usize> {
        match self {
            MarshalError::NotConvertible { index, .. } | MarshalError::Insert { index, .. } => {
                Some(*index)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("Python interpreter is not running. Call start() first.")]
    InterpreterNotRunning,

    #[error("Python interpreter is already running")]
    AlreadyRunning,

    #[error("Python interpreter was finalized and restarting it is disabled (allow_reinitialize = false)")]
    RestartRefused,

    #[error("Python interpreter failed to initialize: {0}")]
    InitializationFailed(String),

    #[error("Module '{name}' could not be imported: {cause}")]
    ModuleNotFound { name: String, cause: ForeignError },

    #[error("Module '{module}' has no attribute '{attribute}'")]
    AttributeNotFound { module: String, attribute: String },

    #[error("'{module}.{attribute}' is not callable")]
    NotCallable { module: String, attribute: String },

    #[error("Marshal error: {0}")]
    Marshal(#[from] MarshalError),

    #[error("Python raised {0}")]
    ForeignRuntime(#[from] ForeignError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid binding id: {0}")]
    InvalidBinding(isize),
}

impl BridgeError {
    /// Stable status code returned across the C ABI. Always negative.
    pub fn code(&self) -> i32 {
        match self {
            BridgeError::InterpreterNotRunning => -1,
            BridgeError::ModuleNotFound { .. } => -2,
            BridgeError::AttributeNotFound { .. } => -3,
            BridgeError::NotCallable { .. } => -4,
            BridgeError::Marshal(_) => -5,
            BridgeError::ForeignRuntime(_) => -6,
            BridgeError::AlreadyRunning => -7,
            BridgeError::RestartRefused => -8,
            BridgeError::InitializationFailed(_) => -9,
            BridgeError::InvalidArgument(_) => -10,
            BridgeError::InvalidBinding(_) => -11,
        }
    }

    /// Lifecycle misuse. Retrying without fixing the caller cannot succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::InterpreterNotRunning
                | BridgeError::AlreadyRunning
                | BridgeError::RestartRefused
                | BridgeError::InitializationFailed(_)
        )
    }

    /// Full diagnostic text, including a foreign traceback when one was captured.
    pub fn detailed(&self) -> String {
        match self {
            BridgeError::ForeignRuntime(e) => format!("Python raised {}", e.render()),
            BridgeError::ModuleNotFound { name, cause } => {
                format!("Module '{name}' could not be imported: {}", cause.render())
            }
            other => other.to_string(),
        }
    }
}

// ==================== C ABI last-error slot ====================

thread_local! {
    /// Message for the most recent failed `phb_*` call on this thread.
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Record `msg` as this thread's last error. Interior NULs are escaped.
pub fn set_last_error(msg: impl Into<String>) {
    let escaped = msg.into().replace('\0', "\\0");
    LAST_ERROR.set(CString::new(escaped).ok());
}

pub fn clear_last_error() {
    LAST_ERROR.take();
}

/// Last error message on this thread, or null after a successful call.
///
/// The string is overwritten by the next `phb_*` call made from this thread.
#[no_mangle]
pub extern "C" fn phb_last_error() -> *const c_char {
    LAST_ERROR.with_borrow(|slot| slot.as_deref().map_or(ptr::null(), CStr::as_ptr))
}

#[no_mangle]
pub extern "C" fn phb_last_error_clear() {
    clear_last_error();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_foreign() -> ForeignError {
        ForeignError {
            type_name: "ValueError".to_string(),
            message: "bad value".to_string(),
            traceback: Some("Traceback (most recent call last):\n  ...\n".to_string()),
        }
    }

    #[test]
    fn codes_are_negative_and_distinct() {
        let errors = vec![
            BridgeError::InterpreterNotRunning,
            BridgeError::ModuleNotFound {
                name: "m".into(),
                cause: sample_foreign(),
            },
            BridgeError::AttributeNotFound {
                module: "m".into(),
                attribute: "f".into(),
            },
            BridgeError::NotCallable {
                module: "m".into(),
                attribute: "f".into(),
            },
            BridgeError::Marshal(MarshalError::ShortSequence {
                expected: 3,
                actual: 1,
            }),
            BridgeError::ForeignRuntime(sample_foreign()),
            BridgeError::AlreadyRunning,
            BridgeError::RestartRefused,
            BridgeError::InitializationFailed("x".into()),
            BridgeError::InvalidArgument("x".into()),
            BridgeError::InvalidBinding(9),
        ];
        let mut codes: Vec<i32> = errors.iter().map(BridgeError::code).collect();
        assert!(codes.iter().all(|c| *c < 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn fatal_errors_are_lifecycle_errors() {
        assert!(BridgeError::InterpreterNotRunning.is_fatal());
        assert!(BridgeError::RestartRefused.is_fatal());
        assert!(!BridgeError::ForeignRuntime(sample_foreign()).is_fatal());
        assert!(!BridgeError::Marshal(MarshalError::ShortSequence {
            expected: 2,
            actual: 0
        })
        .is_fatal());
    }

    #[test]
    fn marshal_error_reports_index() {
        let err = MarshalError::NotConvertible {
            index: 4,
            expected: ElementKind::Int64,
            cause: sample_foreign(),
        };
        assert_eq!(err.index(), Some(4));
        assert!(err.to_string().contains("element 4"));
        assert!(err.to_string().contains("int64"));
        assert_eq!(
            MarshalError::ShortSequence {
                expected: 3,
                actual: 2
            }
            .index(),
            None
        );
    }

    #[test]
    fn detailed_includes_traceback() {
        let err = BridgeError::ForeignRuntime(sample_foreign());
        let text = err.detailed();
        assert!(text.starts_with("Python raised Traceback"));
        assert!(text.ends_with("ValueError: bad value"));
        assert_eq!(err.to_string(), "Python raised ValueError: bad value");
    }

    #[test]
    fn last_error_roundtrip_through_tls() {
        clear_last_error();
        assert!(phb_last_error().is_null());
        set_last_error("boom\0tail");
        let msg = unsafe { CStr::from_ptr(phb_last_error()) };
        assert_eq!(msg.to_str().unwrap(), "boom\\0tail");
        phb_last_error_clear();
        assert!(phb_last_error().is_null());
    }
}
