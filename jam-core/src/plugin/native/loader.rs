//! Native library mapping and export validation using libloading.

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use tracing::debug;

use super::abi::{AttachFn, DetachFn, InvokeFn, ReportFn, REQUIRED_SYMBOLS};
use crate::plugin::error::Rejection;

/// A mapped library that can resolve exported symbols by name.
///
/// Dropping the value unmaps the library.
pub trait PluginLibrary {
    /// Returns the address of `name`, or `None` if it is missing or null.
    fn address_of(&self, name: &str) -> Option<NonNull<c_void>>;
}

/// Maps candidate files into [`PluginLibrary`] handles.
pub trait LibraryLoader {
    type Library: PluginLibrary;

    fn open(&self, path: &Path) -> Result<Self::Library, Rejection>;
}

/// Loads real shared libraries from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

/// A shared library mapped by [`NativeLoader`].
pub struct NativeLibrary {
    library: libloading::Library,
}

impl LibraryLoader for NativeLoader {
    type Library = NativeLibrary;

    /// Maps the library at `path`. Mapping runs the library's initialisers,
    /// so only directories holding trusted libraries should be scanned.
    fn open(&self, path: &Path) -> Result<NativeLibrary, Rejection> {
        debug!("Loading native library from {:?}", path);

        let library = unsafe { libloading::Library::new(path) }
            .map_err(|e| Rejection::LoadFailed(e.to_string()))?;

        Ok(NativeLibrary { library })
    }
}

impl PluginLibrary for NativeLibrary {
    fn address_of(&self, name: &str) -> Option<NonNull<c_void>> {
        let symbol: libloading::Symbol<*mut c_void> =
            unsafe { self.library.get(name.as_bytes()) }.ok()?;
        NonNull::new(*symbol)
    }
}

/// The four entry points of a plugin, resolved from its library.
///
/// Only valid while the library they came from stays mapped, which is why
/// they are never handed out apart from a [`LoadedLibrary`].
#[derive(Clone, Copy)]
pub struct ControlExports {
    pub attach: AttachFn,
    pub detach: DetachFn,
    pub invoke: InvokeFn,
    pub report: ReportFn,
}

/// A mapped library whose required exports all resolved.
pub struct LoadedLibrary<L: PluginLibrary> {
    path: PathBuf,
    exports: ControlExports,
    library: L,
}

impl<L: PluginLibrary> LoadedLibrary<L> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exports(&self) -> ControlExports {
        self.exports
    }

    /// Unmaps the library.
    pub fn release(self) {
        debug!("Releasing library {:?}", self.path);
        drop(self.library);
    }
}

impl<L: PluginLibrary> std::fmt::Debug for LoadedLibrary<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedLibrary")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Resolves `Attach`, `Detach`, `Invoke` and `Report` from `library`.
///
/// On failure the library is dropped before returning, so a rejected
/// candidate never stays mapped.
pub fn validate<L: PluginLibrary>(
    path: &Path,
    library: L,
) -> Result<LoadedLibrary<L>, Rejection> {
    let mut resolved = [NonNull::dangling(); REQUIRED_SYMBOLS.len()];
    for (slot, name) in resolved.iter_mut().zip(REQUIRED_SYMBOLS) {
        *slot = resolve(&library, name)?;
    }
    let [attach, detach, invoke, report] = resolved;

    // SAFETY: the protocol fixes the signature of each export; the pointers
    // are non-null and live as long as `library`, which travels with them.
    let exports = unsafe {
        ControlExports {
            attach: std::mem::transmute::<*mut c_void, AttachFn>(attach.as_ptr()),
            detach: std::mem::transmute::<*mut c_void, DetachFn>(detach.as_ptr()),
            invoke: std::mem::transmute::<*mut c_void, InvokeFn>(invoke.as_ptr()),
            report: std::mem::transmute::<*mut c_void, ReportFn>(report.as_ptr()),
        }
    };

    Ok(LoadedLibrary {
        path: path.to_path_buf(),
        exports,
        library,
    })
}

fn resolve<L: PluginLibrary>(library: &L, name: &'static str) -> Result<NonNull<c_void>, Rejection> {
    library
        .address_of(name)
        .ok_or(Rejection::MissingExport(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::ffi::c_char;
    use std::ffi::c_int;

    use crate::plugin::native::abi::{
        DispatchFn, LibsInfo, ATTACH_SYMBOL, DETACH_SYMBOL, INVOKE_SYMBOL, REPORT_SYMBOL,
    };

    unsafe extern "C" fn attach(_: DispatchFn, _: *mut c_char, _: usize) -> c_int {
        1
    }
    unsafe extern "C" fn detach(_: *mut c_char, _: usize) -> c_int {
        1
    }
    unsafe extern "C" fn invoke(_: *const c_char, _: *const c_char, _: *const c_char) -> *const c_char {
        c"{}".as_ptr()
    }
    unsafe extern "C" fn report(_: *mut c_char, _: usize, _: *mut LibsInfo) -> c_int {
        1
    }

    struct TableLibrary(HashMap<&'static str, *mut c_void>);

    impl PluginLibrary for TableLibrary {
        fn address_of(&self, name: &str) -> Option<NonNull<c_void>> {
            self.0.get(name).and_then(|ptr| NonNull::new(*ptr))
        }
    }

    fn full_table() -> HashMap<&'static str, *mut c_void> {
        HashMap::from([
            (ATTACH_SYMBOL, attach as AttachFn as *mut c_void),
            (DETACH_SYMBOL, detach as DetachFn as *mut c_void),
            (INVOKE_SYMBOL, invoke as InvokeFn as *mut c_void),
            (REPORT_SYMBOL, report as ReportFn as *mut c_void),
        ])
    }

    #[test]
    fn test_validate_resolves_all_exports() {
        let loaded = validate(Path::new("libcontrol.so"), TableLibrary(full_table())).unwrap();
        assert_eq!(loaded.path(), Path::new("libcontrol.so"));
        let response = unsafe { (loaded.exports().invoke)(c"a".as_ptr(), c"b".as_ptr(), c"c".as_ptr()) };
        assert!(!response.is_null());
    }

    #[test]
    fn test_missing_invoke_is_rejected() {
        let mut table = full_table();
        table.remove(INVOKE_SYMBOL);
        let err = validate(Path::new("libbroken.so"), TableLibrary(table)).unwrap_err();
        assert_eq!(err, Rejection::MissingExport(INVOKE_SYMBOL));
    }

    #[test]
    fn test_first_missing_export_is_reported() {
        let mut table = full_table();
        table.remove(DETACH_SYMBOL);
        table.remove(REPORT_SYMBOL);
        let err = validate(Path::new("libbroken.so"), TableLibrary(table)).unwrap_err();
        assert_eq!(err, Rejection::MissingExport(DETACH_SYMBOL));
    }

    #[test]
    fn test_null_report_is_rejected() {
        let mut table = full_table();
        table.insert(REPORT_SYMBOL, std::ptr::null_mut());
        let err = validate(Path::new("libbroken.so"), TableLibrary(table)).unwrap_err();
        assert_eq!(err, Rejection::MissingExport(REPORT_SYMBOL));
    }

    #[test]
    fn test_native_loader_rejects_non_library() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("libfake.so");
        std::fs::write(&path, b"definitely not an object file").unwrap();

        let err = NativeLoader.open(&path).err().unwrap();
        assert!(matches!(err, Rejection::LoadFailed(_)));
    }
}
