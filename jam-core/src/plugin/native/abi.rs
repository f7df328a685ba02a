//! ABI definitions shared by jam hosts and control plugins.
//!
//! Every plugin library exports four C functions: `Report`, `Attach`,
//! `Invoke` and `Detach`. The layouts here are the protocol; changing the
//! order or width of any field breaks every plugin built against them.

use std::ffi::{c_char, c_int, CStr};

/// Capacity of the diagnostic buffer handed to every fallible plugin call.
pub const ERROR_BUFFER_CAPACITY: usize = 256;

/// Plugin type tag reported by the control plugin.
pub const CONTROL_PLUGIN_TYPE: &str = "control";

pub const ATTACH_SYMBOL: &str = "Attach";
pub const DETACH_SYMBOL: &str = "Detach";
pub const INVOKE_SYMBOL: &str = "Invoke";
pub const REPORT_SYMBOL: &str = "Report";

/// All exports a library must provide to be considered a plugin, in the
/// order they are resolved.
pub const REQUIRED_SYMBOLS: [&str; 4] = [ATTACH_SYMBOL, DETACH_SYMBOL, INVOKE_SYMBOL, REPORT_SYMBOL];

/// Self-description filled in by `Report`.
///
/// The string pointers are owned by the plugin and only valid for the
/// duration of the `Report` call.
#[repr(C)]
#[derive(Debug)]
pub struct LibsInfo {
    pub plugin_type: *const c_char,
    pub product: *const c_char,
    pub description_long: *const c_char,
    pub description_short: *const c_char,
    pub plugin_id: u64,
}

impl LibsInfo {
    pub const fn empty() -> Self {
        Self {
            plugin_type: std::ptr::null(),
            product: std::ptr::null(),
            description_long: std::ptr::null(),
            description_short: std::ptr::null(),
            plugin_id: 0,
        }
    }
}

impl Default for LibsInfo {
    fn default() -> Self {
        Self::empty()
    }
}

/// Host-owned copy of a [`LibsInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub plugin_type: String,
    pub product: String,
    pub description_long: String,
    pub description_short: String,
    pub plugin_id: u64,
}

impl PluginDescriptor {
    /// Copies the descriptor out of plugin memory.
    ///
    /// Returns `None` when `plugin_type` is null. Other null strings copy as
    /// empty strings.
    ///
    /// # Safety
    ///
    /// Every non-null pointer in `raw` must point at a NUL-terminated string
    /// that stays alive for the duration of this call.
    pub unsafe fn copy_from(raw: &LibsInfo) -> Option<Self> {
        if raw.plugin_type.is_null() {
            return None;
        }

        Some(Self {
            plugin_type: unsafe { owned_text(raw.plugin_type) },
            product: unsafe { owned_text(raw.product) },
            description_long: unsafe { owned_text(raw.description_long) },
            description_short: unsafe { owned_text(raw.description_short) },
            plugin_id: raw.plugin_id,
        })
    }

    pub fn is_control(&self) -> bool {
        self.plugin_type == CONTROL_PLUGIN_TYPE
    }
}

/// Copies borrowed plugin text into an owned string, lossily.
///
/// # Safety
///
/// `ptr` must be null or point at a NUL-terminated string.
pub(crate) unsafe fn owned_text(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

/// Host callback handed to the plugin in `Attach`.
pub type DispatchFn =
    unsafe extern "C" fn(*const c_char, *const c_char, *const c_char) -> *const c_char;

/// Function signature for `Report`.
pub type ReportFn = unsafe extern "C" fn(*mut c_char, usize, *mut LibsInfo) -> c_int;

/// Function signature for `Attach`.
pub type AttachFn = unsafe extern "C" fn(DispatchFn, *mut c_char, usize) -> c_int;

/// Function signature for `Detach`.
pub type DetachFn = unsafe extern "C" fn(*mut c_char, usize) -> c_int;

/// Function signature for `Invoke`.
pub type InvokeFn =
    unsafe extern "C" fn(*const c_char, *const c_char, *const c_char) -> *const c_char;

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_libs_info_layout() {
        let ptr = size_of::<*const c_char>();
        assert_eq!(offset_of!(LibsInfo, plugin_type), 0);
        assert_eq!(offset_of!(LibsInfo, product), ptr);
        assert_eq!(offset_of!(LibsInfo, description_long), 2 * ptr);
        assert_eq!(offset_of!(LibsInfo, description_short), 3 * ptr);
        assert_eq!(offset_of!(LibsInfo, plugin_id), 4 * ptr);
        assert_eq!(size_of::<LibsInfo>(), 4 * ptr + 8);
    }

    #[test]
    fn test_copy_descriptor() {
        let raw = LibsInfo {
            plugin_type: c"control".as_ptr(),
            product: c"core".as_ptr(),
            description_long: std::ptr::null(),
            description_short: c"ctl".as_ptr(),
            plugin_id: 0x1,
        };

        let descriptor = unsafe { PluginDescriptor::copy_from(&raw) }.unwrap();
        assert!(descriptor.is_control());
        assert_eq!(descriptor.product, "core");
        assert_eq!(descriptor.description_long, "");
        assert_eq!(descriptor.description_short, "ctl");
        assert_eq!(descriptor.plugin_id, 1);
    }

    #[test]
    fn test_null_plugin_type_is_rejected() {
        let raw = LibsInfo::empty();
        assert!(unsafe { PluginDescriptor::copy_from(&raw) }.is_none());
    }
}
