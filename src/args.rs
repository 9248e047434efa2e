//! `argc`/`argv` marshalling for the native entry points.
//!
//! Every argument is copied into its own NUL-terminated heap buffer owned by an
//! [`ArgVec`]. The raw pointer array is only reachable inside
//! [`ArgVec::with_raw`], so the borrow checker keeps the buffers alive and
//! unmoved for exactly as long as the native call can observe them; they are
//! freed when the `ArgVec` drops, on every exit path.

use std::{
    ffi::CString,
    os::raw::{c_char, c_int},
};

use crate::{Error, Result};

/// Owned argument vector in C layout.
pub(crate) struct ArgVec {
    // Each CString is its own heap allocation; moving the Vec never moves the bytes.
    _owned: Vec<CString>,
    ptrs: Vec<*mut c_char>,
}

impl ArgVec {
    pub(crate) fn new<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let owned = args
            .into_iter()
            .enumerate()
            .map(|(i, a)| cstring(a.as_ref(), &format!("argument {i}")))
            .collect::<Result<Vec<_>>>()?;

        if c_int::try_from(owned.len()).is_err() {
            return Err(Error::InvalidArgument(format!(
                "{} arguments exceed the native argc range",
                owned.len()
            )));
        }

        let ptrs = owned.iter().map(|c| c.as_ptr() as *mut c_char).collect();
        Ok(Self {
            _owned: owned,
            ptrs,
        })
    }

    pub(crate) fn argc(&self) -> c_int {
        // Range checked in `new`.
        self.ptrs.len() as c_int
    }

    /// Hand `(argc, argv)` to `f`. An empty vector is passed as `(0, NULL)`.
    ///
    /// The pointers must not escape `f`.
    pub(crate) fn with_raw<R>(&mut self, f: impl FnOnce(c_int, *mut *mut c_char) -> R) -> R {
        let argc = self.argc();
        let argv = if self.ptrs.is_empty() {
            std::ptr::null_mut()
        } else {
            self.ptrs.as_mut_ptr()
        };
        f(argc, argv)
    }
}

/// Copy `s` into a NUL-terminated buffer. `what` names the value in the error.
pub(crate) fn cstring(s: &str, what: &str) -> Result<CString> {
    CString::new(s).map_err(|_| Error::InvalidArgument(format!("{what} contains NUL")))
}
