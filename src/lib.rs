//! pyhost: embed CPython in a host process and call into it in memory.
//!
//! Every object crossing the boundary is wrapped in an [`ObjectHandle`] that
//! records whether the bridge owns a reference to it. Owned references are
//! released exactly once when the handle goes out of scope, borrowed ones
//! never are, and arguments the C API steals are handed over by value.
//!
//! - [`interpreter`]: process-wide start/stop and `sys.path`
//! - [`handle`]: object handles and reference discipline
//! - [`convert`]: marshaling between host numbers and Python lists
//! - [`iter`]: one-pass iteration over Python iterables
//! - [`binding`]: module import and callable lookup
//! - [`invoke`]: calling resolved callables
//! - [`exception`]: draining pending Python exceptions
//! - [`call`]: `call_function` and reusable [`FunctionBinding`]s
//! - [`ffi`]: C ABI (`phb_*`) for hosts written in other languages
//!
//! ```no_run
//! use pyhost::BridgeConfig;
//!
//! pyhost::start(&BridgeConfig::default().with_search_path("./python"))?;
//! let outliers = pyhost::call_function("outliers", "detect", &[0.0, 0.0, 99.0])?;
//! pyhost::stop()?;
//! # Ok::<(), pyhost::BridgeError>(())
//! ```

pub mod binding;
pub mod call;
pub mod config;
pub mod convert;
pub mod error;
pub mod exception;
pub mod ffi;
pub mod handle;
pub mod interpreter;
pub mod invoke;
pub mod iter;
pub mod logging;
pub mod registry;

pub use binding::{resolve_module, CallableHandle, ModuleHandle};
pub use call::{call_function, call_function_as, FunctionBinding};
pub use config::BridgeConfig;
pub use convert::{from_foreign_list, to_foreign_list, FromForeign, ToForeign};
pub use error::{BridgeError, ElementKind, ForeignError, MarshalError, Result};
pub use handle::{live_owned_handles, ObjectHandle, Ownership};
pub use interpreter::{append_module_search_path, start, state, stop, with_interpreter, InterpreterState};
pub use invoke::{invoke, invoke1, invoke_with};
pub use iter::ForeignIter;
