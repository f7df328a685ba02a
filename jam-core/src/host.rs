//! One host run: discover the control plugin, attach, invoke once, detach.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tracing::{error, info};

use crate::events::EventSink;
use crate::plugin::native::abi::PluginDescriptor;
use crate::plugin::native::loader::LibraryLoader;
use crate::plugin::{
    ControlDiscovery, ControlSession, DetachOutcome, DiscoveryError, DispatchCallback,
    DispatchTable, SessionError,
};
use crate::settings::InvokeSettings;

pub const HOST_NAME: &str = "jam";

/// How a host run ended.
#[derive(Debug)]
pub enum HostOutcome {
    /// Attached, invoked and detached. A failed detach is still a completed run.
    Completed {
        descriptor: PluginDescriptor,
        response: String,
        detach: DetachOutcome,
    },
    DiscoveryFailed(DiscoveryError),
    AttachFailed(SessionError),
    /// The plugin was attached but the invocation failed; it was still
    /// detached.
    InvokeFailed {
        error: SessionError,
        detach: DetachOutcome,
    },
}

impl HostOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, HostOutcome::Completed { .. })
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Drives a single control session over whatever `Ld` loads.
pub struct Host<Ld: LibraryLoader> {
    discovery: ControlDiscovery<Ld>,
    invoke: InvokeSettings,
    callback: DispatchCallback,
}

impl<Ld: LibraryLoader> Host<Ld> {
    pub fn new(loader: Ld, events: Arc<dyn EventSink>, invoke: InvokeSettings) -> Self {
        Self {
            discovery: ControlDiscovery::new(loader, events),
            invoke,
            callback: host_dispatch_table().into_callback(),
        }
    }

    /// Replaces the callback handed to the plugin on attach.
    pub fn with_dispatch(mut self, callback: DispatchCallback) -> Self {
        self.callback = callback;
        self
    }

    pub fn run(&self, dir: &Path) -> HostOutcome {
        let plugin = match self.discovery.discover(dir) {
            Ok(plugin) => plugin,
            Err(e) => {
                error!("{}", e);
                return HostOutcome::DiscoveryFailed(e);
            }
        };

        let mut session = ControlSession::new(plugin, self.discovery.events());
        let descriptor = session.descriptor().clone();

        if let Err(e) = session.attach(self.callback.clone()) {
            error!("{}", e);
            return HostOutcome::AttachFailed(e);
        }

        let result = session.invoke(&self.invoke.address, &self.invoke.payload, &self.invoke.options);

        let detach = session
            .detach()
            .unwrap_or_else(|e| DetachOutcome::Failed(e.to_string()));

        match result {
            Ok(response) => HostOutcome::Completed {
                descriptor,
                response,
                detach,
            },
            Err(e) => {
                error!("Control plugin Invoke failed: {}", e);
                HostOutcome::InvokeFailed { error: e, detach }
            }
        }
    }
}

/// Routes the host answers when the plugin dispatches back to it.
///
/// - `host.info`: host name, version and platform
/// - `host.log`: logs the payload at info level
pub fn host_dispatch_table() -> DispatchTable {
    DispatchTable::new()
        .route("host.info", |_, _| {
            json!({
                "success": true,
                "host": HOST_NAME,
                "version": env!("CARGO_PKG_VERSION"),
                "platform": std::env::consts::OS,
            })
            .to_string()
        })
        .route("host.log", |payload, _| {
            info!(target: "plugin", "{}", payload);
            json!({ "success": true }).to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TracingSink;
    use crate::plugin::enumerate::LIBRARY_EXTENSION;
    use crate::plugin::mock::{self, MockLoader, MockPlugin};
    use tempfile::TempDir;

    #[test]
    fn test_host_info_route() {
        let table = host_dispatch_table();
        let response: serde_json::Value =
            serde_json::from_str(&table.dispatch("host.info", "{}", "{}")).unwrap();

        assert_eq!(response["success"], true);
        assert_eq!(response["host"], HOST_NAME);
        assert_eq!(response["platform"], std::env::consts::OS);
    }

    #[test]
    fn test_host_log_route() {
        let table = host_dispatch_table();
        let response: serde_json::Value =
            serde_json::from_str(&table.dispatch("host.log", "plugin says hi", "{}")).unwrap();

        assert_eq!(response, serde_json::json!({ "success": true }));
    }

    #[test]
    fn test_unknown_route_is_reported() {
        let table = host_dispatch_table();
        let response: serde_json::Value =
            serde_json::from_str(&table.dispatch("host.reboot", "{}", "{}")).unwrap();

        assert_eq!(response["success"], false);
    }

    #[test]
    fn test_custom_dispatch_reaches_plugin() {
        let _guard = mock::session_lock();
        let temp = TempDir::new().unwrap();
        let name = format!("libcontrol{LIBRARY_EXTENSION}");
        mock::touch_all(temp.path(), &[&name]).unwrap();

        let loader = MockLoader::new().with_plugin(name, MockPlugin::control());
        let invoke = InvokeSettings {
            address: mock::CALLBACK_ADDRESS.to_string(),
            ..InvokeSettings::default()
        };
        let host = Host::new(loader, TracingSink::shared(), invoke).with_dispatch(
            DispatchTable::new()
                .route(mock::HOST_ROUTE, |_, _| r#"{"host":"custom"}"#.to_string())
                .into_callback(),
        );

        let HostOutcome::Completed { descriptor, response, .. } = host.run(temp.path()) else {
            panic!("expected a completed run");
        };
        assert_eq!(descriptor.product, "mock");
        assert_eq!(response, r#"{"host":"custom"}"#);
    }

    #[test]
    fn test_exit_codes() {
        let completed = HostOutcome::Completed {
            descriptor: PluginDescriptor {
                plugin_type: "control".to_string(),
                product: String::new(),
                description_long: String::new(),
                description_short: String::new(),
                plugin_id: 0,
            },
            response: "{}".to_string(),
            detach: DetachOutcome::Failed("still busy".to_string()),
        };
        assert_eq!(completed.exit_code(), 0);

        let failed = HostOutcome::AttachFailed(SessionError::AttachFailed("license expired".into()));
        assert_eq!(failed.exit_code(), 1);
    }
}
