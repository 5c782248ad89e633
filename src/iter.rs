//! One-pass walk over a foreign iterable.

use std::iter::FusedIterator;
use std::ptr;

use pyo3::ffi;

use crate::error::ForeignError;
use crate::exception;
use crate::handle::ObjectHandle;

/// Yields owned handles from `iter(obj)` by calling its cached `__next__`.
///
/// Not restartable. An exception other than `StopIteration` is yielded once
/// as an error and ends the walk.
#[derive(Debug)]
pub struct ForeignIter<'py> {
    /// Bound `__next__`; it keeps the iterator alive.
    next: ObjectHandle<'py>,
    done: bool,
}

impl<'py> ForeignIter<'py> {
    pub fn new(iterable: &ObjectHandle<'py>) -> Result<Self, ForeignError> {
        let py = iterable.py();
        let iterator = unsafe {
            ObjectHandle::from_new(py, ffi::PyObject_GetIter(iterable.as_ptr()), "PyObject_GetIter")
        }?;
        let next = iterator.getattr("__next__")?;
        Ok(Self { next, done: false })
    }
}

impl<'py> Iterator for ForeignIter<'py> {
    type Item = Result<ObjectHandle<'py>, ForeignError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let py = self.next.py();
        let raw = unsafe { ffi::PyObject_CallObject(self.next.as_ptr(), ptr::null_mut()) };
        if let Some(item) = unsafe { ObjectHandle::new_ref(py, raw) } {
            return Some(Ok(item));
        }
        self.done = true;
        if exception::take_stop_iteration(py) {
            None
        } else {
            Some(Err(exception::fetch(py, "__next__")))
        }
    }
}

impl FusedIterator for ForeignIter<'_> {}
