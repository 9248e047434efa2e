#![allow(unsafe_code)]
//! Rust driver for the embedded chdb SQL engine.
//!
//! `libchdb` is loaded at runtime (see [`runtime()`]). Queries go through a [`Connection`] or
//! through the stateless [`query`] / [`query_args`] entry points, and always come back as a
//! [`QueryResult`] that owns the engine's output buffer until it is released or dropped.
//!
//! A failed *call* (library missing, connect refused, connection closed) is an [`Error`]. A
//! failed *query* is not: it is a `QueryResult` whose [`QueryResult::error`] is set.

mod api;
mod args;
mod runtime;
pub mod sys;

use std::{ffi::CStr, fmt, ptr::NonNull};

use thiserror::Error;
use tracing::debug;

pub use api::Api;
pub use runtime::{init_with, runtime, LibrarySearch, Runtime, LIB_PATH_ENV};

use args::{cstring, ArgVec};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The shared library could not be opened, or an entry point is missing.
    #[error("{message} (library: {path})")]
    Load { path: String, message: String },
    #[error("chdb connect failed: {0}")]
    Connect(String),
    #[error("chdb connection is closed")]
    UseAfterClose,
    /// A host value cannot cross the C boundary, e.g. it contains a NUL byte.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

// -------------------------- QueryResult --------------------------

enum RawResult {
    Legacy(NonNull<sys::local_result>),
    V2(NonNull<sys::local_result_v2>),
}

/// Output of one query.
///
/// The payload may alias engine-owned memory, so [`data`](Self::data) borrows `self` and the
/// buffer is handed back to the engine exactly once: by [`release`](Self::release) or on drop.
pub struct QueryResult {
    raw: Option<RawResult>,
    api: &'static Api,
    buf: *const u8,
    len: usize,
    elapsed: f64,
    rows_read: u64,
    bytes_read: u64,
    error: String,
}

// The native record is exclusively owned by this value; nothing else frees it.
unsafe impl Send for QueryResult {}

impl QueryResult {
    fn empty(api: &'static Api, error: impl Into<String>) -> Self {
        Self {
            raw: None,
            api,
            buf: std::ptr::null(),
            len: 0,
            elapsed: 0.0,
            rows_read: 0,
            bytes_read: 0,
            error: error.into(),
        }
    }

    /// Wrap a `local_result_v2`. A null record decodes to an empty result carrying an error.
    ///
    /// # Safety
    ///
    /// `raw` must be null or a live record from `api` that nobody else will free.
    unsafe fn from_v2(api: &'static Api, raw: *mut sys::local_result_v2) -> Self {
        let Some(nn) = NonNull::new(raw) else {
            return Self::empty(api, "chdb returned no result");
        };
        let r = nn.as_ref();
        Self {
            raw: Some(RawResult::V2(nn)),
            api,
            buf: r.buf as *const u8,
            len: r.len,
            elapsed: r.elapsed,
            rows_read: r.rows_read,
            bytes_read: r.bytes_read,
            error: c_str_lossy(r.error_message),
        }
    }

    /// Wrap a legacy `local_result`, which has no error field.
    ///
    /// # Safety
    ///
    /// Same contract as [`from_v2`](Self::from_v2).
    unsafe fn from_legacy(api: &'static Api, raw: *mut sys::local_result) -> Self {
        let Some(nn) = NonNull::new(raw) else {
            return Self::empty(api, "chdb returned no result");
        };
        let r = nn.as_ref();
        Self {
            raw: Some(RawResult::Legacy(nn)),
            api,
            buf: r.buf as *const u8,
            len: r.len,
            elapsed: r.elapsed,
            rows_read: r.rows_read,
            bytes_read: r.bytes_read,
            error: String::new(),
        }
    }

    /// Raw output bytes in the requested format. Empty once released.
    pub fn data(&self) -> &[u8] {
        if self.raw.is_none() || self.buf.is_null() || self.len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.buf, self.len) }
    }

    pub fn text(&self) -> std::result::Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(self.data())
    }

    /// Copy the payload out so it can outlive the result.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data().to_vec()
    }

    /// Engine-reported execution time in seconds.
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Error text reported by the engine, if the query failed.
    pub fn error(&self) -> Option<&str> {
        (!self.error.is_empty()).then_some(self.error.as_str())
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    pub fn is_released(&self) -> bool {
        self.raw.is_none()
    }

    /// Return the buffer to the engine. Later calls are no-ops.
    pub fn release(&mut self) {
        let Some(raw) = self.raw.take() else {
            return;
        };
        match raw {
            RawResult::Legacy(p) => unsafe { (self.api.free_result)(p.as_ptr()) },
            RawResult::V2(p) => unsafe { (self.api.free_result_v2)(p.as_ptr()) },
        }
        self.buf = std::ptr::null();
        self.len = 0;
        debug!("chdb result released");
    }
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("len", &self.data().len())
            .field("elapsed", &self.elapsed)
            .field("rows_read", &self.rows_read)
            .field("bytes_read", &self.bytes_read)
            .field("error", &self.error())
            .field("released", &self.is_released())
            .finish()
    }
}

impl Drop for QueryResult {
    fn drop(&mut self) {
        self.release();
    }
}

unsafe fn c_str_lossy(p: *const std::os::raw::c_char) -> String {
    if p.is_null() {
        return String::new();
    }
    CStr::from_ptr(p).to_string_lossy().into_owned()
}

// -------------------------- Connection --------------------------

/// A session on the embedded engine.
///
/// `Send` but not `Sync`: a connection can move to another thread, but the engine handle is
/// not safe for overlapping queries, so it cannot be shared.
pub struct Connection {
    handle: Option<NonNull<*mut sys::chdb_conn>>,
    api: &'static Api,
}

unsafe impl Send for Connection {}

impl Connection {
    /// Connect using the process-wide runtime.
    pub fn connect(conn_str: &str) -> Result<Self> {
        // Checked here too so an empty string never triggers loading the library.
        if conn_str.is_empty() {
            return Err(empty_conn_str());
        }
        Self::connect_with(&runtime()?.api, conn_str)
    }

    /// Connect through an explicitly supplied entry-point table.
    pub fn connect_with(api: &'static Api, conn_str: &str) -> Result<Self> {
        if conn_str.is_empty() {
            return Err(empty_conn_str());
        }

        let mut argv = ArgVec::new([conn_str])?;
        let raw = argv.with_raw(|argc, argv| unsafe { (api.connect_chdb)(argc, argv) });

        let Some(handle) = NonNull::new(raw) else {
            return Err(Error::Connect(format!("connection failed for: {conn_str}")));
        };
        let conn = unsafe { *handle.as_ptr() };
        if conn.is_null() || !unsafe { (*conn).connected } {
            // The engine owns whatever it half-built here.
            return Err(Error::Connect(format!(
                "connection not properly initialized for: {conn_str}"
            )));
        }

        debug!(conn_str, "chdb connection opened");
        Ok(Self {
            handle: Some(handle),
            api,
        })
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Run `query` and return its output encoded as `format` (any ClickHouse output format
    /// name; passed through untouched).
    ///
    /// # Errors
    ///
    /// [`Error::UseAfterClose`] after [`close`](Self::close); [`Error::InvalidArgument`] if
    /// either string contains NUL; [`Error::Connect`] if the engine has cleared the connection
    /// behind the handle. SQL errors are reported in [`QueryResult::error`].
    pub fn query(&self, query: &str, format: &str) -> Result<QueryResult> {
        let handle = self.handle.ok_or(Error::UseAfterClose)?;
        let q = cstring(query, "query")?;
        let f = cstring(format, "format")?;

        // Re-read every call: the engine may swap the record behind the outer pointer.
        let conn = unsafe { *handle.as_ptr() };
        if conn.is_null() {
            return Err(Error::Connect("engine dropped the connection".into()));
        }

        let raw = unsafe { (self.api.query_conn)(conn, q.as_ptr(), f.as_ptr()) };
        Ok(unsafe { QueryResult::from_v2(self.api, raw) })
    }

    /// Close the native connection. Closing twice is a no-op.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            unsafe { (self.api.close_conn)(handle.as_ptr()) };
            debug!("chdb connection closed");
        }
    }
}

fn empty_conn_str() -> Error {
    Error::Connect("connection string cannot be empty".into())
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

// -------------------------- Stateless queries --------------------------

/// Run one statement without a connection, using the `clickhouse` command-line convention.
pub fn query(sql: &str, format: &str) -> Result<QueryResult> {
    query_args([
        "clickhouse".to_string(),
        "--multiquery".to_string(),
        format!("--output-format={format}"),
        format!("--query={sql}"),
    ])
}

/// Call `query_stable_v2` with a raw argument vector.
pub fn query_args<I, S>(args: I) -> Result<QueryResult>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    query_args_with(&runtime()?.api, args)
}

pub fn query_args_with<I, S>(api: &'static Api, args: I) -> Result<QueryResult>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut argv = ArgVec::new(args)?;
    let raw = argv.with_raw(|argc, argv| unsafe { (api.query_stable_v2)(argc, argv) });
    Ok(unsafe { QueryResult::from_v2(api, raw) })
}

/// Call the legacy `query_stable`. The engine reports no error text through this path.
pub fn query_args_legacy<I, S>(args: I) -> Result<QueryResult>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    query_args_legacy_with(&runtime()?.api, args)
}

pub fn query_args_legacy_with<I, S>(api: &'static Api, args: I) -> Result<QueryResult>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut argv = ArgVec::new(args)?;
    let raw = argv.with_raw(|argc, argv| unsafe { (api.query_stable)(argc, argv) });
    Ok(unsafe { QueryResult::from_legacy(api, raw) })
}
