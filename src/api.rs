use libloading::{Library, Symbol};
use std::os::raw::{c_char, c_int};
use crate::sys::*;

/// Entry points resolved from the chdb shared library.
///
/// Built once by [`Api::load`] and never mutated afterwards, so a shared
/// reference can be read from any thread.
pub struct Api {
    pub query_stable: unsafe extern "C" fn(c_int, *mut *mut c_char) -> *mut local_result,
    pub free_result: unsafe extern "C" fn(*mut local_result),
    pub query_stable_v2: unsafe extern "C" fn(c_int, *mut *mut c_char) -> *mut local_result_v2,
    pub free_result_v2: unsafe extern "C" fn(*mut local_result_v2),
    pub connect_chdb: unsafe extern "C" fn(c_int, *mut *mut c_char) -> *mut *mut chdb_conn,
    pub close_conn: unsafe extern "C" fn(*mut *mut chdb_conn),
    pub query_conn: unsafe extern "C" fn(
        *mut chdb_conn,
        *const c_char,
        *const c_char,
    ) -> *mut local_result_v2,
}

impl Api {
    /// Resolve every entry point from `lib`. Fails on the first missing symbol.
    ///
    /// # Safety
    ///
    /// The signatures above are taken on trust; `lib` must be a chdb build
    /// exporting them with exactly these C types.
    pub unsafe fn load(lib: &Library) -> Result<Self, libloading::Error> {
        unsafe fn get<T: Copy>(
            lib: &Library,
            name: &'static [u8],
        ) -> Result<T, libloading::Error> {
            let sym: Symbol<T> = lib.get::<T>(name)?;
            Ok(*sym)
        }
        Ok(Self {
            query_stable: get(lib, concat!(stringify!(query_stable), "\0").as_bytes())?,
            free_result: get(lib, concat!(stringify!(free_result), "\0").as_bytes())?,
            query_stable_v2: get(
                lib,
                concat!(stringify!(query_stable_v2), "\0").as_bytes(),
            )?,
            free_result_v2: get(
                lib,
                concat!(stringify!(free_result_v2), "\0").as_bytes(),
            )?,
            connect_chdb: get(lib, concat!(stringify!(connect_chdb), "\0").as_bytes())?,
            close_conn: get(lib, concat!(stringify!(close_conn), "\0").as_bytes())?,
            query_conn: get(lib, concat!(stringify!(query_conn), "\0").as_bytes())?,
        })
    }
}
