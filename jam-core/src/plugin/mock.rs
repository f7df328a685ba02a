//! In-memory plugin libraries for exercising discovery and sessions without
//! building shared objects.
//!
//! A [`MockLoader`] maps file names to [`MockPlugin`] export tables. The
//! exports are plain `extern "C"` functions that record what the host did to
//! them in a per-thread call log (see [`calls`]).

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard};

use super::error::Rejection;
use super::native::abi::{
    owned_text, AttachFn, DetachFn, DispatchFn, InvokeFn, LibsInfo, ReportFn, ATTACH_SYMBOL,
    DETACH_SYMBOL, INVOKE_SYMBOL, REPORT_SYMBOL,
};
use super::native::error_buffer::write_message;
use super::native::loader::{LibraryLoader, PluginLibrary};

/// Address the mock `Invoke` forwards to the host callback.
pub const CALLBACK_ADDRESS: &str = "control.callback";

/// Host route the mock `Invoke` calls for [`CALLBACK_ADDRESS`].
pub const HOST_ROUTE: &str = "host.info";

pub const SUCCESS_RESPONSE: &str = r#"{"success":true}"#;

static SESSION_LOCK: Mutex<()> = Mutex::new(());

/// Serialises tests that attach sessions; the host callback slot is
/// process-wide.
pub fn session_lock() -> MutexGuard<'static, ()> {
    SESSION_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

thread_local! {
    static CALLS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    static DISPATCH: RefCell<Option<DispatchFn>> = const { RefCell::new(None) };
    static RESPONSE: RefCell<CString> = RefCell::new(CString::default());
}

fn record(call: String) {
    CALLS.with(|calls| calls.borrow_mut().push(call));
}

/// Calls made into mock exports on the current thread, in order.
pub fn calls() -> Vec<String> {
    CALLS.with(|calls| calls.borrow().clone())
}

pub fn reset_calls() {
    CALLS.with(|calls| calls.borrow_mut().clear());
}

fn respond(response: String) -> *const c_char {
    RESPONSE.with(|stored| {
        let mut stored = stored.borrow_mut();
        *stored = CString::new(response).unwrap_or_default();
        stored.as_ptr()
    })
}

unsafe extern "C" fn report_control(_: *mut c_char, _: usize, out: *mut LibsInfo) -> c_int {
    record("Report".to_string());
    unsafe {
        *out = LibsInfo {
            plugin_type: c"control".as_ptr(),
            product: c"mock".as_ptr(),
            description_long: c"Mock control plugin".as_ptr(),
            description_short: c"mock".as_ptr(),
            plugin_id: 0x1,
        };
    }
    1
}

unsafe extern "C" fn report_worker(_: *mut c_char, _: usize, out: *mut LibsInfo) -> c_int {
    record("Report".to_string());
    unsafe {
        *out = LibsInfo {
            plugin_type: c"worker".as_ptr(),
            product: c"mock".as_ptr(),
            description_long: std::ptr::null(),
            description_short: std::ptr::null(),
            plugin_id: 0x2,
        };
    }
    1
}

unsafe extern "C" fn report_null_type(_: *mut c_char, _: usize, _: *mut LibsInfo) -> c_int {
    record("Report".to_string());
    1
}

unsafe extern "C" fn report_not_ready(err_buf: *mut c_char, err_cap: usize, _: *mut LibsInfo) -> c_int {
    record("Report".to_string());
    unsafe { write_message(err_buf, err_cap, "not ready") };
    0
}

unsafe extern "C" fn attach_ok(dispatch: DispatchFn, _: *mut c_char, _: usize) -> c_int {
    record("Attach".to_string());
    DISPATCH.with(|slot| *slot.borrow_mut() = Some(dispatch));
    1
}

unsafe extern "C" fn attach_license_expired(_: DispatchFn, err_buf: *mut c_char, err_cap: usize) -> c_int {
    record("Attach".to_string());
    unsafe { write_message(err_buf, err_cap, "license expired") };
    0
}

unsafe extern "C" fn invoke_ok(
    address: *const c_char,
    payload: *const c_char,
    options: *const c_char,
) -> *const c_char {
    let address = unsafe { owned_text(address) };
    let payload = unsafe { owned_text(payload) };
    let options = unsafe { owned_text(options) };
    record(format!("Invoke({address},{payload},{options})"));

    if address != CALLBACK_ADDRESS {
        return respond(SUCCESS_RESPONSE.to_string());
    }

    let Some(dispatch) = DISPATCH.with(|slot| *slot.borrow()) else {
        return respond(r#"{"success":false,"error":"not attached"}"#.to_string());
    };
    let route = CString::new(HOST_ROUTE).unwrap_or_default();
    let response = unsafe {
        let ptr = dispatch(route.as_ptr(), c"{}".as_ptr(), c"{}".as_ptr());
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    };
    respond(response)
}

unsafe extern "C" fn invoke_null(address: *const c_char, _: *const c_char, _: *const c_char) -> *const c_char {
    let address = unsafe { owned_text(address) };
    record(format!("Invoke({address})"));
    std::ptr::null()
}

unsafe extern "C" fn detach_ok(_: *mut c_char, _: usize) -> c_int {
    record("Detach".to_string());
    DISPATCH.with(|slot| slot.borrow_mut().take());
    1
}

unsafe extern "C" fn detach_still_busy(err_buf: *mut c_char, err_cap: usize) -> c_int {
    record("Detach".to_string());
    DISPATCH.with(|slot| slot.borrow_mut().take());
    unsafe { write_message(err_buf, err_cap, "still busy") };
    0
}

/// Export table of one mock library. `None` means the symbol is missing.
#[derive(Clone, Copy)]
pub struct MockPlugin {
    pub report: Option<ReportFn>,
    pub attach: Option<AttachFn>,
    pub invoke: Option<InvokeFn>,
    pub detach: Option<DetachFn>,
}

impl MockPlugin {
    /// Reports `plugin_type="control"`, `plugin_id=0x1`; every call succeeds.
    pub fn control() -> Self {
        Self {
            report: Some(report_control),
            attach: Some(attach_ok),
            invoke: Some(invoke_ok),
            detach: Some(detach_ok),
        }
    }

    /// Reports `plugin_type="worker"`.
    pub fn worker() -> Self {
        Self {
            report: Some(report_worker),
            ..Self::control()
        }
    }

    pub fn without_invoke(self) -> Self {
        Self {
            invoke: None,
            ..self
        }
    }

    pub fn without_report(self) -> Self {
        Self {
            report: None,
            ..self
        }
    }

    /// `Report` fails with "not ready".
    pub fn report_not_ready(self) -> Self {
        Self {
            report: Some(report_not_ready),
            ..self
        }
    }

    /// `Report` succeeds without filling the descriptor.
    pub fn report_null_type(self) -> Self {
        Self {
            report: Some(report_null_type),
            ..self
        }
    }

    /// `Attach` fails with "license expired".
    pub fn attach_license_expired(self) -> Self {
        Self {
            attach: Some(attach_license_expired),
            ..self
        }
    }

    pub fn invoke_null(self) -> Self {
        Self {
            invoke: Some(invoke_null),
            ..self
        }
    }

    /// `Detach` fails with "still busy".
    pub fn detach_still_busy(self) -> Self {
        Self {
            detach: Some(detach_still_busy),
            ..self
        }
    }

    fn address_of(&self, name: &str) -> Option<NonNull<c_void>> {
        let ptr = match name {
            REPORT_SYMBOL => self.report.map(|f| f as *mut c_void),
            ATTACH_SYMBOL => self.attach.map(|f| f as *mut c_void),
            INVOKE_SYMBOL => self.invoke.map(|f| f as *mut c_void),
            DETACH_SYMBOL => self.detach.map(|f| f as *mut c_void),
            _ => None,
        }?;
        NonNull::new(ptr)
    }
}

/// Open/release bookkeeping shared by a loader and its libraries.
#[derive(Debug, Default)]
pub struct MockStats {
    opened: Mutex<Vec<String>>,
    released: Mutex<Vec<String>>,
}

impl MockStats {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Libraries opened but not yet released.
    pub fn mapped(&self) -> Vec<String> {
        let mut released = self.released();
        self.opened()
            .into_iter()
            .filter(|name| match released.iter().position(|r| r == name) {
                Some(index) => {
                    released.remove(index);
                    false
                }
                None => true,
            })
            .collect()
    }
}

/// Loader serving [`MockPlugin`]s by file name. Unknown names fail to load.
#[derive(Clone, Default)]
pub struct MockLoader {
    plugins: HashMap<String, MockPlugin>,
    stats: Arc<MockStats>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plugin(mut self, file_name: impl Into<String>, plugin: MockPlugin) -> Self {
        self.plugins.insert(file_name.into(), plugin);
        self
    }

    pub fn stats(&self) -> Arc<MockStats> {
        self.stats.clone()
    }
}

pub struct MockLibrary {
    name: String,
    plugin: MockPlugin,
    stats: Arc<MockStats>,
}

impl LibraryLoader for MockLoader {
    type Library = MockLibrary;

    fn open(&self, path: &Path) -> Result<MockLibrary, Rejection> {
        let name = file_name(path);
        let plugin = self
            .plugins
            .get(&name)
            .copied()
            .ok_or_else(|| Rejection::LoadFailed(format!("{name}: invalid ELF header")))?;

        self.stats
            .opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(name.clone());

        Ok(MockLibrary {
            name,
            plugin,
            stats: self.stats.clone(),
        })
    }
}

impl PluginLibrary for MockLibrary {
    fn address_of(&self, name: &str) -> Option<NonNull<c_void>> {
        self.plugin.address_of(name)
    }
}

impl Drop for MockLibrary {
    fn drop(&mut self) {
        self.stats
            .released
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(self.name.clone());
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Creates empty files named `names` in `dir` so the enumerator sees them.
pub fn touch_all(dir: &Path, names: &[&str]) -> std::io::Result<Vec<PathBuf>> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            std::fs::write(&path, b"")?;
            Ok(path)
        })
        .collect()
}
