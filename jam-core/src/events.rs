//! Observability events emitted while discovering and driving a plugin.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::plugin::error::Rejection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    ScanStarted {
        dir: PathBuf,
    },
    CandidateFound {
        path: PathBuf,
    },
    CandidateRejected {
        path: PathBuf,
        reason: Rejection,
    },
    PluginAccepted {
        path: PathBuf,
        plugin_id: u64,
        plugin_type: String,
        product: String,
    },
    Attached,
    Invoked {
        address: String,
        response: String,
    },
    Detached {
        clean: bool,
    },
}

/// Receives [`HostEvent`]s from the discovery driver and control session.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &HostEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    pub fn shared() -> Arc<dyn EventSink> {
        Arc::new(TracingSink)
    }
}

impl EventSink for TracingSink {
    fn emit(&self, event: &HostEvent) {
        match event {
            HostEvent::ScanStarted { dir } => {
                info!(dir = %dir.display(), "Discovering control plugin");
            }
            HostEvent::CandidateFound { path } => {
                info!(path = %path.display(), "Found candidate");
            }
            HostEvent::CandidateRejected { path, reason } => match reason {
                Rejection::NotControl(_) => {
                    debug!(path = %path.display(), %reason, "Skipping candidate");
                }
                _ => {
                    warn!(path = %path.display(), %reason, "Skipping candidate");
                }
            },
            HostEvent::PluginAccepted {
                path,
                plugin_id,
                plugin_type,
                product,
            } => {
                info!(
                    path = %path.display(),
                    plugin_type = %plugin_type,
                    product = %product,
                    "Identified control plugin (id=0x{:x})",
                    plugin_id
                );
            }
            HostEvent::Attached => info!("Control plugin attached successfully"),
            HostEvent::Invoked { address, response } => {
                info!(address = %address, "Control plugin result: {}", response);
            }
            HostEvent::Detached { clean: true } => info!("Control plugin detached"),
            HostEvent::Detached { clean: false } => {
                warn!("Control plugin detached with errors; library released")
            }
        }
    }
}
