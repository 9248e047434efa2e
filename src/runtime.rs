//! chdb runtime loader and process-wide API singleton.
//!
//! This module is responsible for:
//! - Locating `libchdb` on the host ([`LibrarySearch`]).
//! - Opening it with immediate, process-global symbol binding.
//! - Resolving the ABI entry points into an [`Api`] table.
//! - Exposing a process-wide singleton [`Runtime`] via [`runtime()`].
//!
//! ## Environment variables
//!
//! - `CHDB_LIB_PATH` *(optional)*: explicit path to the shared library. Skips every other
//!   lookup step.
//! - `LD_LIBRARY_PATH` / `DYLD_LIBRARY_PATH` / `PATH`: directories probed for the platform
//!   library file name when no override is set.
//!
//! ## Initialization semantics
//!
//! The runtime is initialized lazily on first use and stored in a global [`OnceLock`], so
//! concurrent first calls race safely and exactly one load happens. A failed initialization is
//! cached too: every later call to [`runtime()`] returns the same [`Error::Load`]. The library is
//! never unloaded.

use std::{
    env,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use libloading::Library;
use tracing::{debug, warn};

use crate::{api::Api, Error, Result};

/// Environment variable holding an explicit library path.
pub const LIB_PATH_ENV: &str = "CHDB_LIB_PATH";

#[cfg(target_os = "macos")]
const LIB_FILE_NAME: &str = "libchdb.dylib";
#[cfg(windows)]
const LIB_FILE_NAME: &str = "chdb.dll";
#[cfg(not(any(target_os = "macos", windows)))]
const LIB_FILE_NAME: &str = "libchdb.so";

#[cfg(target_os = "macos")]
const LOADER_PATH_ENV: &str = "DYLD_LIBRARY_PATH";
#[cfg(not(target_os = "macos"))]
const LOADER_PATH_ENV: &str = "LD_LIBRARY_PATH";

const WELL_KNOWN_PATHS: &[&str] = &[
    "/usr/local/lib/libchdb.so",
    "/usr/lib/libchdb.so",
    "/opt/homebrew/lib/libchdb.dylib",
    "/usr/local/lib/libchdb.dylib",
];

/// Process-wide singleton storage for the runtime.
static RUNTIME: OnceLock<Result<Runtime>> = OnceLock::new();

/// Where to look for the chdb shared library, in priority order.
///
/// 1. `override_path`, used as-is when set.
/// 2. Each of `search_dirs` joined with `file_name`, first existing file wins.
/// 3. Each of `candidates`, first existing file wins.
/// 4. Bare `file_name`, left to the dynamic loader's default search.
#[derive(Debug, Clone)]
pub struct LibrarySearch {
    pub override_path: Option<PathBuf>,
    pub search_dirs: Vec<PathBuf>,
    pub candidates: Vec<PathBuf>,
    pub file_name: String,
}

impl Default for LibrarySearch {
    fn default() -> Self {
        Self {
            override_path: None,
            search_dirs: Vec::new(),
            candidates: WELL_KNOWN_PATHS.iter().map(PathBuf::from).collect(),
            file_name: LIB_FILE_NAME.to_string(),
        }
    }
}

impl LibrarySearch {
    /// Search order derived from the process environment.
    pub fn from_env() -> Self {
        let override_path = env::var_os(LIB_PATH_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let mut search_dirs = Vec::new();
        for var in [LOADER_PATH_ENV, "PATH"] {
            if let Some(v) = env::var_os(var) {
                search_dirs.extend(env::split_paths(&v).filter(|p| !p.as_os_str().is_empty()));
            }
        }

        Self {
            override_path,
            search_dirs,
            ..Self::default()
        }
    }

    pub fn with_override(mut self, path: impl Into<PathBuf>) -> Self {
        self.override_path = Some(path.into());
        self
    }

    /// Replace the well-known install locations.
    pub fn with_candidates<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.candidates = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Pick the path to hand to the loader. Never fails: the last resort is the
    /// bare file name.
    pub fn resolve(&self) -> PathBuf {
        if let Some(p) = &self.override_path {
            debug!(path = %p.display(), "using {LIB_PATH_ENV} override");
            return p.clone();
        }

        if let Some(p) = self
            .search_dirs
            .iter()
            .map(|d| d.join(&self.file_name))
            .find(|p| p.is_file())
        {
            debug!(path = %p.display(), "found chdb in search path");
            return p;
        }

        if let Some(p) = self.candidates.iter().find(|p| p.is_file()) {
            debug!(path = %p.display(), "found chdb at well-known location");
            return p.clone();
        }

        warn!(
            file = %self.file_name,
            "chdb not found in any known location; deferring to the dynamic loader"
        );
        PathBuf::from(&self.file_name)
    }
}

/// Loaded chdb library and its resolved ABI.
///
/// - `_lib` is kept so the resolved function pointers stay valid for the life of the process.
/// - `api` holds the entry points.
/// - `path` is what was handed to the loader (possibly a bare file name).
pub struct Runtime {
    _lib: Library,
    pub api: Api,
    pub path: PathBuf,
}

/// Get the process-wide chdb runtime, loading it with [`LibrarySearch::from_env`] on first use.
///
/// # Errors
///
/// Returns [`Error::Load`] if the library cannot be opened or any entry point is missing.
pub fn runtime() -> Result<&'static Runtime> {
    init_with(LibrarySearch::from_env())
}

/// Like [`runtime()`], but loads with `search` if this is the first initialization.
///
/// Once the singleton is populated (successfully or not) `search` is ignored.
pub fn init_with(search: LibrarySearch) -> Result<&'static Runtime> {
    match RUNTIME.get_or_init(|| Runtime::init(&search)) {
        Ok(rt) => Ok(rt),
        Err(e) => Err(e.clone()),
    }
}

impl Runtime {
    fn init(search: &LibrarySearch) -> Result<Self> {
        let path = search.resolve();
        unsafe { Self::load_from_path(path) }
    }

    /// Open `path` and resolve the chdb ABI from it.
    ///
    /// # Safety
    ///
    /// Loading a library runs its initializers, and the resolved symbols are trusted to have
    /// the signatures declared in [`Api`]. `path` must name a compatible chdb build.
    unsafe fn load_from_path(path: PathBuf) -> Result<Self> {
        let lib = open_global(&path).map_err(|e| Error::Load {
            path: path.display().to_string(),
            message: format!("failed to load chdb: {e}"),
        })?;

        let api = Api::load(&lib).map_err(|e| Error::Load {
            path: path.display().to_string(),
            message: format!("failed to resolve chdb ABI symbols: {e}"),
        })?;

        debug!(path = %path.display(), "chdb runtime loaded");
        Ok(Self {
            _lib: lib,
            api,
            path,
        })
    }
}

#[cfg(unix)]
unsafe fn open_global(path: &Path) -> std::result::Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_NOW};
    UnixLibrary::open(Some(path), RTLD_NOW | RTLD_GLOBAL).map(Into::into)
}

#[cfg(not(unix))]
unsafe fn open_global(path: &Path) -> std::result::Result<Library, libloading::Error> {
    Library::new(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, io, thread};

    fn bare() -> LibrarySearch {
        LibrarySearch::default().with_candidates(Vec::<PathBuf>::new())
    }

    #[test]
    fn override_wins_even_if_missing() {
        let s = bare().with_override("/nowhere/libchdb.so");
        assert_eq!(s.resolve(), PathBuf::from("/nowhere/libchdb.so"));
    }

    #[test]
    fn search_dir_before_candidates() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let cand = dir.path().join("candidate.so");
        fs::write(dir.path().join(LIB_FILE_NAME), b"")?;
        fs::write(&cand, b"")?;

        let mut s = bare().with_candidates([cand.clone()]);
        s.search_dirs = vec![PathBuf::from("/definitely/not/here"), dir.path().to_path_buf()];
        assert_eq!(s.resolve(), dir.path().join(LIB_FILE_NAME));

        s.search_dirs.clear();
        assert_eq!(s.resolve(), cand);
        Ok(())
    }

    #[test]
    fn falls_back_to_bare_name() {
        let s = bare().with_candidates(["/definitely/not/here/libchdb.so"]);
        assert_eq!(s.resolve(), PathBuf::from(LIB_FILE_NAME));
    }

    #[test]
    fn unloadable_path_is_a_load_error() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let fake = dir.path().join(LIB_FILE_NAME);
        fs::write(&fake, b"not a shared object")?;

        let err = unsafe { Runtime::load_from_path(fake.clone()) }
            .err()
            .expect("garbage must not load");
        match err {
            Error::Load { path, .. } => assert_eq!(path, fake.display().to_string()),
            other => panic!("unexpected error: {other:?}"),
        }
        Ok(())
    }

    // The only test in this binary that touches the process-wide singleton.
    #[test]
    fn failed_init_is_cached_and_shared() {
        let workers: Vec<_> = (0..8)
            .map(|i| {
                thread::spawn(move || {
                    let search = bare().with_override(format!("/definitely/missing/{i}/libchdb.so"));
                    init_with(search).err().expect("missing library must not load")
                })
            })
            .collect();

        let paths: Vec<String> = workers
            .into_iter()
            .map(|w| match w.join().unwrap() {
                Error::Load { path, .. } => path,
                other => panic!("unexpected error: {other:?}"),
            })
            .collect();
        assert!(paths[0].starts_with("/definitely/missing/"));
        assert!(paths.iter().all(|p| p == &paths[0]), "one load, one error: {paths:?}");

        let later = init_with(bare().with_override("/somewhere/else/libchdb.so"))
            .err()
            .expect("cached failure is replayed");
        match later {
            Error::Load { path, .. } => assert_eq!(path, paths[0]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(runtime(), Err(Error::Load { ref path, .. }) if path == &paths[0]));
    }
}
