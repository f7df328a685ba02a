//! Host callback handed to the control plugin in `Attach`.
//!
//! Host code deals in [`DispatchCallback`] closures. The only unsafe
//! marshaling lives in [`host_dispatch`], the `extern "C"` adapter the plugin
//! actually receives. It looks the current callback up in a process-wide
//! slot, so at most one session can own the callback at a time.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{c_char, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use super::error::SessionError;
use super::native::abi::owned_text;

/// `(address, payload, options) -> response`
pub type DispatchCallback = Arc<dyn Fn(&str, &str, &str) -> String + Send + Sync>;

type RouteHandler = Box<dyn Fn(&str, &str) -> String + Send + Sync>;

const NO_HANDLER_RESPONSE: &str = r#"{"success":false,"error":"no host handler for address"}"#;
const NOT_ATTACHED_RESPONSE: &str = r#"{"success":false,"error":"host is not attached"}"#;
const HANDLER_PANICKED_RESPONSE: &str = r#"{"success":false,"error":"host handler panicked"}"#;

static SLOT: Mutex<Option<DispatchCallback>> = Mutex::new(None);

thread_local! {
    // Keeps the last response alive until the next dispatch on this thread.
    static RESPONSE: RefCell<CString> = RefCell::new(CString::default());
}

fn slot() -> MutexGuard<'static, Option<DispatchCallback>> {
    SLOT.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owns the dispatch slot; clears it when dropped.
#[derive(Debug)]
pub(crate) struct DispatchRegistration {
    _private: (),
}

pub(crate) fn register(callback: DispatchCallback) -> Result<DispatchRegistration, SessionError> {
    let mut slot = slot();
    if slot.is_some() {
        return Err(SessionError::DispatchBusy);
    }
    *slot = Some(callback);
    Ok(DispatchRegistration { _private: () })
}

impl Drop for DispatchRegistration {
    fn drop(&mut self) {
        slot().take();
    }
}

/// The function pointer passed to `Attach`.
///
/// The returned pointer is valid until the next call to this function on the
/// same thread.
///
/// # Safety
///
/// Each argument must be null or point at a NUL-terminated string.
pub unsafe extern "C" fn host_dispatch(
    address: *const c_char,
    payload: *const c_char,
    options: *const c_char,
) -> *const c_char {
    // Clone out so the lock is not held while the callback runs.
    let callback = slot().clone();

    let response = match callback {
        Some(callback) => {
            let address = unsafe { owned_text(address) };
            let payload = unsafe { owned_text(payload) };
            let options = unsafe { owned_text(options) };
            debug!(address = %address, "Plugin dispatched to host");

            catch_unwind(AssertUnwindSafe(|| callback(&address, &payload, &options))).unwrap_or_else(|_| {
                warn!(address = %address, "Host dispatch handler panicked");
                HANDLER_PANICKED_RESPONSE.to_string()
            })
        }
        None => {
            warn!("Plugin dispatched to host outside of an attached session");
            NOT_ATTACHED_RESPONSE.to_string()
        }
    };

    let response = CString::new(response.replace('\0', "")).unwrap_or_default();
    RESPONSE.with(|stored| {
        let mut stored = stored.borrow_mut();
        *stored = response;
        stored.as_ptr()
    })
}

/// Routes dispatched requests by address.
#[derive(Default)]
pub struct DispatchTable {
    routes: HashMap<String, RouteHandler>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler receiving `(payload, options)` for `address`.
    pub fn route<F>(mut self, address: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&str, &str) -> String + Send + Sync + 'static,
    {
        self.routes.insert(address.into(), Box::new(handler));
        self
    }

    pub fn addresses(&self) -> Vec<&str> {
        let mut addresses: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        addresses.sort_unstable();
        addresses
    }

    pub fn dispatch(&self, address: &str, payload: &str, options: &str) -> String {
        match self.routes.get(address) {
            Some(handler) => handler(payload, options),
            None => {
                debug!(address = %address, "No host handler for address");
                NO_HANDLER_RESPONSE.to_string()
            }
        }
    }

    pub fn into_callback(self) -> DispatchCallback {
        Arc::new(move |address, payload, options| self.dispatch(address, payload, options))
    }
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTable")
            .field("routes", &self.addresses())
            .finish()
    }
}
