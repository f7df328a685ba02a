//! Control plugin discovery and lifecycle.
//!
//! ## Discovery
//!
//! The host scans one directory (normally its own) for files named
//! `lib*.so` / `lib*.dylib` / `lib*.dll`. Each candidate is mapped, checked
//! for the `Attach`/`Detach`/`Invoke`/`Report` exports and asked to describe
//! itself. The first library reporting `plugin_type == "control"` wins; every
//! other candidate is released before the scan moves on.
//!
//! ## Session
//!
//! The accepted library moves into a [`ControlSession`], which attaches the
//! host callback, forwards invocations and detaches exactly once.

pub mod classify;
pub mod discovery;
pub mod dispatch;
pub mod enumerate;
pub mod error;
pub mod mock;
pub mod native;
pub mod session;

pub use discovery::{host_directory, ControlDiscovery, DiscoveredPlugin};
pub use dispatch::{DispatchCallback, DispatchTable};
pub use error::{DiscoveryError, Rejection, SessionError};
pub use session::{ControlSession, DetachOutcome, SessionState};
