//! Classification of validated libraries by their self-description.

use super::error::Rejection;
use super::native::abi::{LibsInfo, PluginDescriptor};
use super::native::error_buffer::ErrorBuffer;
use super::native::loader::{LoadedLibrary, PluginLibrary};

/// Calls `Report` and accepts the library only if it is a control plugin.
///
/// The descriptor strings are copied before returning; nothing borrowed from
/// the plugin survives the call.
pub fn classify<L: PluginLibrary>(library: &LoadedLibrary<L>) -> Result<PluginDescriptor, Rejection> {
    let mut errors = ErrorBuffer::new();
    let capacity = errors.capacity();
    let mut raw = LibsInfo::empty();

    let ok = unsafe { (library.exports().report)(errors.as_mut_ptr(), capacity, &mut raw) };
    if ok == 0 {
        return Err(Rejection::ReportFailed(errors.message()));
    }

    let descriptor = unsafe { PluginDescriptor::copy_from(&raw) }.ok_or(Rejection::NullPluginType)?;
    if !descriptor.is_control() {
        return Err(Rejection::NotControl(descriptor.plugin_type));
    }

    Ok(descriptor)
}
