//! Control plugin discovery: enumerate, validate, classify.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::classify::classify;
use super::enumerate::candidates;
use super::error::{DiscoveryError, Rejection};
use super::native::abi::PluginDescriptor;
use super::native::loader::{validate, LibraryLoader, LoadedLibrary, PluginLibrary};
use crate::events::{EventSink, HostEvent};

/// The accepted control plugin, still mapped, with its self-description.
pub struct DiscoveredPlugin<L: PluginLibrary> {
    pub library: LoadedLibrary<L>,
    pub descriptor: PluginDescriptor,
}

impl<L: PluginLibrary> std::fmt::Debug for DiscoveredPlugin<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveredPlugin")
            .field("library", &self.library)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Scans a directory for the control plugin.
pub struct ControlDiscovery<Ld: LibraryLoader> {
    loader: Ld,
    events: Arc<dyn EventSink>,
}

impl<Ld: LibraryLoader> ControlDiscovery<Ld> {
    pub fn new(loader: Ld, events: Arc<dyn EventSink>) -> Self {
        Self { loader, events }
    }

    pub fn events(&self) -> Arc<dyn EventSink> {
        self.events.clone()
    }

    /// Returns the first candidate in `dir` that reports itself as a control
    /// plugin. Later candidates are never opened. Every rejected candidate is
    /// released before the next one is tried.
    pub fn discover(&self, dir: &Path) -> Result<DiscoveredPlugin<Ld::Library>, DiscoveryError> {
        self.events.emit(&HostEvent::ScanStarted {
            dir: dir.to_path_buf(),
        });

        for path in candidates(dir)? {
            self.events.emit(&HostEvent::CandidateFound { path: path.clone() });

            match self.probe(&path) {
                Ok(plugin) => {
                    self.events.emit(&HostEvent::PluginAccepted {
                        path,
                        plugin_id: plugin.descriptor.plugin_id,
                        plugin_type: plugin.descriptor.plugin_type.clone(),
                        product: plugin.descriptor.product.clone(),
                    });
                    return Ok(plugin);
                }
                Err(reason) => {
                    self.events.emit(&HostEvent::CandidateRejected { path, reason });
                }
            }
        }

        Err(DiscoveryError::NoControlPlugin {
            dir: dir.to_path_buf(),
        })
    }

    fn probe(&self, path: &Path) -> Result<DiscoveredPlugin<Ld::Library>, Rejection> {
        let library = self.loader.open(path)?;
        let library = validate(path, library)?;
        debug!("{:?} has valid plugin interface", path);

        match classify(&library) {
            Ok(descriptor) => Ok(DiscoveredPlugin {
                library,
                descriptor,
            }),
            Err(reason) => {
                library.release();
                Err(reason)
            }
        }
    }
}

/// Directory containing the running executable.
pub fn host_directory() -> Result<PathBuf, DiscoveryError> {
    let exe = std::env::current_exe()
        .and_then(|exe| exe.canonicalize())
        .map_err(|e| DiscoveryError::HostDirectory(e.to_string()))?;

    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| DiscoveryError::HostDirectory(format!("{} has no parent", exe.display())))
}
