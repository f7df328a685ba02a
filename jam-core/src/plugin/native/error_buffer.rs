//! Fixed-size diagnostic buffer passed across the plugin boundary.

use std::ffi::c_char;

use super::abi::ERROR_BUFFER_CAPACITY;

/// Host-side error buffer. Zeroed on creation; the plugin writes a
/// NUL-terminated message into it when a call fails.
pub struct ErrorBuffer {
    bytes: [u8; ERROR_BUFFER_CAPACITY],
}

impl ErrorBuffer {
    pub fn new() -> Self {
        Self {
            bytes: [0; ERROR_BUFFER_CAPACITY],
        }
    }

    pub fn as_mut_ptr(&mut self) -> *mut c_char {
        self.bytes.as_mut_ptr() as *mut c_char
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Decodes the message, stopping at the first NUL or at capacity.
    pub fn message(&self) -> String {
        decode_bounded(&self.bytes)
    }
}

impl Default for ErrorBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Lossily decodes `bytes` up to the first NUL. Never reads past the slice.
pub fn decode_bounded(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Writes `message` into a plugin-side view of the host's buffer.
///
/// At most `capacity - 1` bytes are copied and the result is always
/// NUL-terminated. A null buffer or zero capacity is left untouched.
///
/// # Safety
///
/// `buf` must be null or valid for writes of `capacity` bytes.
pub unsafe fn write_message(buf: *mut c_char, capacity: usize, message: &str) {
    if buf.is_null() || capacity == 0 {
        return;
    }
    let len = message.len().min(capacity - 1);
    unsafe {
        std::ptr::copy_nonoverlapping(message.as_ptr(), buf as *mut u8, len);
        *buf.add(len) = 0;
    }
}
