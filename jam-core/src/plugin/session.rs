//! Control session: attach → invoke* → detach over an accepted plugin.

use std::ffi::{CStr, CString};
use std::sync::Arc;

use tracing::{debug, warn};

use super::discovery::DiscoveredPlugin;
use super::dispatch::{self, DispatchCallback, DispatchRegistration};
use super::error::SessionError;
use super::native::abi::PluginDescriptor;
use super::native::error_buffer::ErrorBuffer;
use super::native::loader::{ControlExports, LoadedLibrary, PluginLibrary};
use crate::events::{EventSink, HostEvent};

/// Lifecycle of a [`ControlSession`]. States are never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Discovered,
    Attached,
    Detached,
}

/// Result of `Detach`. A failed detach still releases the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetachOutcome {
    Clean,
    Failed(String),
}

impl DetachOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, DetachOutcome::Clean)
    }
}

/// Sole owner of the accepted plugin's library.
///
/// Dropping an attached session detaches it, so `Detach` runs exactly once
/// after a successful `Attach` even on early returns.
pub struct ControlSession<L: PluginLibrary> {
    state: SessionState,
    descriptor: PluginDescriptor,
    library: Option<LoadedLibrary<L>>,
    registration: Option<DispatchRegistration>,
    events: Arc<dyn EventSink>,
}

impl<L: PluginLibrary> ControlSession<L> {
    pub fn new(plugin: DiscoveredPlugin<L>, events: Arc<dyn EventSink>) -> Self {
        Self {
            state: SessionState::Discovered,
            descriptor: plugin.descriptor,
            library: Some(plugin.library),
            registration: None,
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    /// Hands `callback` to the plugin via `Attach`.
    ///
    /// If the plugin refuses, the library is released and the session ends
    /// without `Detach` being called.
    pub fn attach(&mut self, callback: DispatchCallback) -> Result<(), SessionError> {
        let exports = self.exports_in(SessionState::Discovered, "attach")?;
        let registration = dispatch::register(callback)?;

        let mut errors = ErrorBuffer::new();
        let capacity = errors.capacity();
        let ok = unsafe { (exports.attach)(dispatch::host_dispatch, errors.as_mut_ptr(), capacity) };

        if ok == 0 {
            drop(registration);
            self.release();
            return Err(SessionError::AttachFailed(errors.message()));
        }

        self.registration = Some(registration);
        self.state = SessionState::Attached;
        self.events.emit(&HostEvent::Attached);
        Ok(())
    }

    /// Sends one request to the plugin. Repeatable while attached.
    ///
    /// The response is copied out; the plugin keeps ownership of its buffer.
    pub fn invoke(&mut self, address: &str, payload: &str, options: &str) -> Result<String, SessionError> {
        let exports = self.exports_in(SessionState::Attached, "invoke")?;

        let address_c = CString::new(address).map_err(|_| SessionError::InvalidArgument("address"))?;
        let payload_c = CString::new(payload).map_err(|_| SessionError::InvalidArgument("payload"))?;
        let options_c = CString::new(options).map_err(|_| SessionError::InvalidArgument("options"))?;

        let response = unsafe { (exports.invoke)(address_c.as_ptr(), payload_c.as_ptr(), options_c.as_ptr()) };
        if response.is_null() {
            return Err(SessionError::NullResponse);
        }

        let response = unsafe { CStr::from_ptr(response) }.to_string_lossy().into_owned();
        self.events.emit(&HostEvent::Invoked {
            address: address.to_string(),
            response: response.clone(),
        });
        Ok(response)
    }

    /// Calls `Detach` and releases the library regardless of its result.
    pub fn detach(&mut self) -> Result<DetachOutcome, SessionError> {
        let exports = self.exports_in(SessionState::Attached, "detach")?;
        Ok(self.detach_with(exports))
    }

    fn detach_with(&mut self, exports: ControlExports) -> DetachOutcome {
        let mut errors = ErrorBuffer::new();
        let capacity = errors.capacity();
        let ok = unsafe { (exports.detach)(errors.as_mut_ptr(), capacity) };

        let outcome = if ok == 0 {
            let message = errors.message();
            warn!("Control plugin Detach failed: {}", message);
            DetachOutcome::Failed(message)
        } else {
            DetachOutcome::Clean
        };

        self.registration.take();
        self.release();
        self.events.emit(&HostEvent::Detached {
            clean: outcome.is_clean(),
        });
        outcome
    }

    fn exports_in(&self, expected: SessionState, operation: &'static str) -> Result<ControlExports, SessionError> {
        match &self.library {
            Some(library) if self.state == expected => Ok(library.exports()),
            _ => Err(SessionError::InvalidState {
                operation,
                state: self.state,
            }),
        }
    }

    fn release(&mut self) {
        if let Some(library) = self.library.take() {
            library.release();
        }
        self.state = SessionState::Detached;
    }
}

impl<L: PluginLibrary> Drop for ControlSession<L> {
    fn drop(&mut self) {
        if let Ok(exports) = self.exports_in(SessionState::Attached, "detach") {
            debug!("Detaching control plugin on drop");
            self.detach_with(exports);
        }
    }
}

impl<L: PluginLibrary> std::fmt::Debug for ControlSession<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlSession")
            .field("state", &self.state)
            .field("descriptor", &self.descriptor)
            .field("library", &self.library)
            .finish_non_exhaustive()
    }
}
