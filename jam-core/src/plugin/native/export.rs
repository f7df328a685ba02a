//! Plugin-side half of the ABI.
//!
//! A control plugin implements [`NativePlugin`] and declares its exports with
//! [`export_control_plugin!`](crate::export_control_plugin):
//!
//! ```rust,ignore
//! use jam_core::plugin::native::export::{Dispatcher, NativePlugin, StaticDescriptor};
//!
//! struct MyControl;
//!
//! impl NativePlugin for MyControl {
//!     fn describe(&self) -> Result<StaticDescriptor, String> { ... }
//!     fn attach(&mut self, dispatcher: Dispatcher) -> Result<(), String> { Ok(()) }
//!     fn invoke(&mut self, address: &str, payload: &str, options: &str) -> String { ... }
//!     fn detach(&mut self) -> Result<(), String> { Ok(()) }
//! }
//!
//! jam_core::export_control_plugin!(MyControl, || MyControl);
//! ```

use std::ffi::{c_char, c_int, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard};

use super::abi::{owned_text, DispatchFn, LibsInfo};
use super::error_buffer::write_message;

/// Descriptor strings with static storage, so they outlive the `Report` call.
#[derive(Debug, Clone, Copy)]
pub struct StaticDescriptor {
    pub plugin_type: &'static CStr,
    pub product: &'static CStr,
    pub description_long: &'static CStr,
    pub description_short: &'static CStr,
    pub plugin_id: u64,
}

impl StaticDescriptor {
    fn to_raw(self) -> LibsInfo {
        LibsInfo {
            plugin_type: self.plugin_type.as_ptr(),
            product: self.product.as_ptr(),
            description_long: self.description_long.as_ptr(),
            description_short: self.description_short.as_ptr(),
            plugin_id: self.plugin_id,
        }
    }
}

/// Handle to the host callback received in `Attach`.
#[derive(Clone, Copy)]
pub struct Dispatcher {
    dispatch: DispatchFn,
}

impl Dispatcher {
    pub fn new(dispatch: DispatchFn) -> Self {
        Self { dispatch }
    }

    /// Calls back into the host. Returns `None` if an argument contains a NUL
    /// byte or the host answered with a null pointer.
    pub fn call(&self, address: &str, payload: &str, options: &str) -> Option<String> {
        let address = CString::new(address).ok()?;
        let payload = CString::new(payload).ok()?;
        let options = CString::new(options).ok()?;

        let response = unsafe { (self.dispatch)(address.as_ptr(), payload.as_ptr(), options.as_ptr()) };
        if response.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(response) }.to_string_lossy().into_owned())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

/// Behaviour of a plugin exported through `export_control_plugin!`.
pub trait NativePlugin: Send + 'static {
    fn describe(&self) -> Result<StaticDescriptor, String>;

    fn attach(&mut self, dispatcher: Dispatcher) -> Result<(), String>;

    fn invoke(&mut self, address: &str, payload: &str, options: &str) -> String;

    fn detach(&mut self) -> Result<(), String>;
}

/// Process-wide storage behind the generated exports: the plugin instance
/// and the last `Invoke` response, which must outlive the call that
/// produced it.
pub struct PluginSlot<T> {
    plugin: Mutex<Option<T>>,
    response: Mutex<Option<CString>>,
}

impl<T: NativePlugin> PluginSlot<T> {
    pub const fn new() -> Self {
        Self {
            plugin: Mutex::new(None),
            response: Mutex::new(None),
        }
    }

    fn plugin(&self) -> MutexGuard<'_, Option<T>> {
        self.plugin.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// # Safety
    ///
    /// `err_buf` must be valid for `err_cap` bytes and `out` null or valid
    /// for writes.
    pub unsafe fn report(
        &self,
        construct: fn() -> T,
        err_buf: *mut c_char,
        err_cap: usize,
        out: *mut LibsInfo,
    ) -> c_int {
        if out.is_null() {
            unsafe { write_message(err_buf, err_cap, "descriptor handle is null") };
            return 0;
        }

        let result = guarded(|| self.plugin().get_or_insert_with(construct).describe());
        match result {
            Ok(descriptor) => {
                unsafe {
                    *out = descriptor.to_raw();
                    write_message(err_buf, err_cap, "");
                }
                1
            }
            Err(message) => {
                unsafe { write_message(err_buf, err_cap, &message) };
                0
            }
        }
    }

    /// # Safety
    ///
    /// `err_buf` must be valid for `err_cap` bytes.
    pub unsafe fn attach(
        &self,
        construct: fn() -> T,
        dispatch: Option<DispatchFn>,
        err_buf: *mut c_char,
        err_cap: usize,
    ) -> c_int {
        let Some(dispatch) = dispatch else {
            unsafe { write_message(err_buf, err_cap, "dispatch callback is null") };
            return 0;
        };

        let result = guarded(|| {
            self.plugin()
                .get_or_insert_with(construct)
                .attach(Dispatcher::new(dispatch))
        });
        flag(result, err_buf, err_cap)
    }

    /// # Safety
    ///
    /// Each argument must be null or a NUL-terminated string.
    pub unsafe fn invoke(
        &self,
        construct: fn() -> T,
        address: *const c_char,
        payload: *const c_char,
        options: *const c_char,
    ) -> *const c_char {
        let address = unsafe { owned_text(address) };
        let payload = unsafe { owned_text(payload) };
        let options = unsafe { owned_text(options) };

        let response = guarded(|| {
            Ok(self
                .plugin()
                .get_or_insert_with(construct)
                .invoke(&address, &payload, &options))
        })
        .unwrap_or_else(|message| format!(r#"{{"success":false,"error":{message:?}}}"#));

        let response = CString::new(response.replace('\0', ""))
            .unwrap_or_default();
        let mut stored = self.response.lock().unwrap_or_else(|e| e.into_inner());
        stored.insert(response).as_ptr()
    }

    /// Detaches and drops the plugin instance.
    ///
    /// # Safety
    ///
    /// `err_buf` must be valid for `err_cap` bytes.
    pub unsafe fn detach(&self, err_buf: *mut c_char, err_cap: usize) -> c_int {
        let result = guarded(|| match self.plugin().take() {
            Some(mut plugin) => plugin.detach(),
            None => Err("plugin is not attached".to_string()),
        });
        flag(result, err_buf, err_cap)
    }
}

impl<T: NativePlugin> Default for PluginSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn guarded<R>(f: impl FnOnce() -> Result<R, String>) -> Result<R, String> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| Err("plugin panicked".to_string()))
}

fn flag(result: Result<(), String>, err_buf: *mut c_char, err_cap: usize) -> c_int {
    match result {
        Ok(()) => 1,
        Err(message) => {
            unsafe { write_message(err_buf, err_cap, &message) };
            0
        }
    }
}

/// Declares the `Report`, `Attach`, `Invoke` and `Detach` exports for a
/// [`NativePlugin`] implementation.
#[macro_export]
macro_rules! export_control_plugin {
    ($plugin_type:ty, $constructor:expr) => {
        static __JAM_PLUGIN: $crate::plugin::native::export::PluginSlot<$plugin_type> =
            $crate::plugin::native::export::PluginSlot::new();

        fn __jam_construct() -> $plugin_type {
            ($constructor)()
        }

        #[no_mangle]
        #[allow(non_snake_case)]
        pub unsafe extern "C" fn Report(
            err_buf: *mut ::std::ffi::c_char,
            err_cap: usize,
            out: *mut $crate::plugin::native::abi::LibsInfo,
        ) -> ::std::ffi::c_int {
            unsafe { __JAM_PLUGIN.report(__jam_construct, err_buf, err_cap, out) }
        }

        #[no_mangle]
        #[allow(non_snake_case)]
        pub unsafe extern "C" fn Attach(
            dispatch: Option<$crate::plugin::native::abi::DispatchFn>,
            err_buf: *mut ::std::ffi::c_char,
            err_cap: usize,
        ) -> ::std::ffi::c_int {
            unsafe { __JAM_PLUGIN.attach(__jam_construct, dispatch, err_buf, err_cap) }
        }

        #[no_mangle]
        #[allow(non_snake_case)]
        pub unsafe extern "C" fn Invoke(
            address: *const ::std::ffi::c_char,
            payload: *const ::std::ffi::c_char,
            options: *const ::std::ffi::c_char,
        ) -> *const ::std::ffi::c_char {
            unsafe { __JAM_PLUGIN.invoke(__jam_construct, address, payload, options) }
        }

        #[no_mangle]
        #[allow(non_snake_case)]
        pub unsafe extern "C" fn Detach(
            err_buf: *mut ::std::ffi::c_char,
            err_cap: usize,
        ) -> ::std::ffi::c_int {
            unsafe { __JAM_PLUGIN.detach(err_buf, err_cap) }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::native::abi::PluginDescriptor;
    use crate::plugin::native::error_buffer::ErrorBuffer;

    #[derive(Default)]
    struct Echo {
        dispatcher: Option<Dispatcher>,
        fail_detach: bool,
    }

    impl NativePlugin for Echo {
        fn describe(&self) -> Result<StaticDescriptor, String> {
            Ok(StaticDescriptor {
                plugin_type: c"control",
                product: c"echo",
                description_long: c"Echoes requests",
                description_short: c"echo",
                plugin_id: 0x2a,
            })
        }

        fn attach(&mut self, dispatcher: Dispatcher) -> Result<(), String> {
            self.dispatcher = Some(dispatcher);
            Ok(())
        }

        fn invoke(&mut self, address: &str, payload: &str, _options: &str) -> String {
            if address == "boom" {
                panic!("boom");
            }
            format!("{address}:{payload}")
        }

        fn detach(&mut self) -> Result<(), String> {
            if self.fail_detach {
                return Err("still busy".to_string());
            }
            Ok(())
        }
    }

    unsafe extern "C" fn host(
        _: *const c_char,
        _: *const c_char,
        _: *const c_char,
    ) -> *const c_char {
        c"pong".as_ptr()
    }

    #[test]
    fn test_report_fills_descriptor() {
        let slot = PluginSlot::<Echo>::new();
        let mut buffer = ErrorBuffer::new();
        let mut raw = LibsInfo::empty();
        let capacity = buffer.capacity();

        let ok = unsafe { slot.report(Echo::default, buffer.as_mut_ptr(), capacity, &mut raw) };
        assert_eq!(ok, 1);

        let descriptor = unsafe { PluginDescriptor::copy_from(&raw) }.unwrap();
        assert!(descriptor.is_control());
        assert_eq!(descriptor.product, "echo");
        assert_eq!(descriptor.plugin_id, 0x2a);
    }

    #[test]
    fn test_report_rejects_null_descriptor() {
        let slot = PluginSlot::<Echo>::new();
        let mut buffer = ErrorBuffer::new();
        let capacity = buffer.capacity();

        let ok = unsafe {
            slot.report(Echo::default, buffer.as_mut_ptr(), capacity, std::ptr::null_mut())
        };
        assert_eq!(ok, 0);
        assert_eq!(buffer.message(), "descriptor handle is null");
    }

    #[test]
    fn test_attach_requires_callback() {
        let slot = PluginSlot::<Echo>::new();
        let mut buffer = ErrorBuffer::new();
        let capacity = buffer.capacity();

        let ok = unsafe { slot.attach(Echo::default, None, buffer.as_mut_ptr(), capacity) };
        assert_eq!(ok, 0);
        assert_eq!(buffer.message(), "dispatch callback is null");
    }

    #[test]
    fn test_invoke_response_outlives_call() {
        let slot = PluginSlot::<Echo>::new();
        let response = unsafe { slot.invoke(Echo::default, c"control.run".as_ptr(), c"{}".as_ptr(), std::ptr::null()) };
        let text = unsafe { CStr::from_ptr(response) }.to_str().unwrap();
        assert_eq!(text, "control.run:{}");
    }

    #[test]
    fn test_invoke_panic_becomes_error_response() {
        let slot = PluginSlot::<Echo>::new();
        let response = unsafe { slot.invoke(Echo::default, c"boom".as_ptr(), c"{}".as_ptr(), c"{}".as_ptr()) };
        let text = unsafe { CStr::from_ptr(response) }.to_str().unwrap();
        assert_eq!(text, r#"{"success":false,"error":"plugin panicked"}"#);
    }

    #[test]
    fn test_dispatcher_reaches_host() {
        let slot = PluginSlot::<Echo>::new();
        let mut buffer = ErrorBuffer::new();
        let capacity = buffer.capacity();
        let ok = unsafe { slot.attach(Echo::default, Some(host), buffer.as_mut_ptr(), capacity) };
        assert_eq!(ok, 1);

        let dispatcher = slot.plugin().as_ref().and_then(|p| p.dispatcher).unwrap();
        assert_eq!(dispatcher.call("host.info", "{}", "{}").as_deref(), Some("pong"));
        assert_eq!(dispatcher.call("bad\0address", "{}", "{}"), None);
    }

    #[test]
    fn test_detach_reports_failure() {
        let slot = PluginSlot::<Echo>::new();
        let mut buffer = ErrorBuffer::new();
        let capacity = buffer.capacity();
        let construct: fn() -> Echo = || Echo {
            dispatcher: None,
            fail_detach: true,
        };
        unsafe { slot.attach(construct, Some(host), buffer.as_mut_ptr(), capacity) };

        let ok = unsafe { slot.detach(buffer.as_mut_ptr(), capacity) };
        assert_eq!(ok, 0);
        assert_eq!(buffer.message(), "still busy");

        let ok = unsafe { slot.detach(buffer.as_mut_ptr(), capacity) };
        assert_eq!(ok, 0);
        assert_eq!(buffer.message(), "plugin is not attached");
    }
}
