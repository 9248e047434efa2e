#![allow(non_camel_case_types)]
use std::os::raw::{c_char, c_void};

/// Legacy result record returned by `query_stable`.
///
/// `buf` points to `len` bytes of formatted output. `_vec` is the engine's own
/// backing vector and must never be touched from this side.
#[repr(C)]
pub struct local_result {
    pub buf: *mut c_char,
    pub len: usize,
    pub _vec: *mut c_void,
    pub elapsed: f64,
    pub rows_read: u64,
    pub bytes_read: u64,
}

/// Result record returned by `query_stable_v2` and `query_conn`.
///
/// Same layout as [`local_result`] followed by a nullable, NUL-terminated
/// error message.
#[repr(C)]
pub struct local_result_v2 {
    pub buf: *mut c_char,
    pub len: usize,
    pub _vec: *mut c_void,
    pub elapsed: f64,
    pub rows_read: u64,
    pub bytes_read: u64,
    pub error_message: *mut c_char,
}

/// Connection record. `connect_chdb` hands back a `*mut *mut chdb_conn` so the
/// engine can swap the record behind a stable outer pointer.
#[repr(C)]
pub struct chdb_conn {
    pub server: *mut c_void,
    pub connected: bool,
    pub queue: *mut c_void,
}
