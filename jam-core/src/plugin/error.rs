use std::path::PathBuf;

use thiserror::Error;

use super::session::SessionState;

/// Why a candidate library was passed over during a scan. None of these stop
/// the scan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The library could not be mapped (bad format, wrong architecture,
    /// missing dependency).
    #[error("failed to load library: {0}")]
    LoadFailed(String),

    #[error("missing required export: {0}")]
    MissingExport(&'static str),

    #[error("Report failed: {0}")]
    ReportFailed(String),

    #[error("Report returned a null plugin_type")]
    NullPluginType,

    #[error("not a control plugin (type={0})")]
    NotControl(String),
}

/// Failures that end discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to read directory {}: {source}", dir.display())]
    DirectoryUnreadable {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no control plugin found in {}", dir.display())]
    NoControlPlugin { dir: PathBuf },

    #[error("failed to resolve host directory: {0}")]
    HostDirectory(String),
}

/// Errors raised by a control session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("control plugin Attach failed: {0}")]
    AttachFailed(String),

    #[error("cannot {operation} a session in state {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("{0} contains an interior NUL byte")]
    InvalidArgument(&'static str),

    #[error("control plugin Invoke returned a null response")]
    NullResponse,

    #[error("another control session already owns the dispatch callback")]
    DispatchBusy,
}
