//! The core control plugin.
//!
//! Built as `libcontrol` so the host picks it up from its own directory.

use jam_core::plugin::native::{Dispatcher, NativePlugin, StaticDescriptor};
use serde_json::{json, Value};
use tracing::debug;

pub const RUN_ADDRESS: &str = "control.run";
pub const LIST_ADDRESS: &str = "control.list";

const ROUTES: &[&str] = &[RUN_ADDRESS, LIST_ADDRESS];

#[derive(Debug, Default)]
pub struct ControlPlugin {
    dispatcher: Option<Dispatcher>,
}

impl ControlPlugin {
    fn run(&self, payload: &str) -> Value {
        let Some(dispatcher) = &self.dispatcher else {
            return json!({ "success": false, "error": "control plugin is not attached" });
        };

        let host = match dispatcher.call("host.info", "{}", "{}") {
            Some(response) => parse_or_text(&response),
            None => Value::Null,
        };

        json!({
            "success": true,
            "payload": parse_or_text(payload),
            "host": host,
        })
    }
}

/// Keeps structured payloads structured; anything else is echoed as a string.
fn parse_or_text(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

impl NativePlugin for ControlPlugin {
    fn describe(&self) -> Result<StaticDescriptor, String> {
        Ok(StaticDescriptor {
            plugin_type: c"control",
            product: c"core",
            description_long: c"Core control plugin for the jam host",
            description_short: c"core control",
            plugin_id: 0,
        })
    }

    fn attach(&mut self, dispatcher: Dispatcher) -> Result<(), String> {
        self.dispatcher = Some(dispatcher);
        Ok(())
    }

    fn invoke(&mut self, address: &str, payload: &str, options: &str) -> String {
        debug!(address, options, "Handling invoke");

        let response = match address {
            RUN_ADDRESS => self.run(payload),
            LIST_ADDRESS => json!({ "success": true, "routes": ROUTES }),
            _ => json!({ "success": false, "error": "no plugin handled address" }),
        };
        response.to_string()
    }

    fn detach(&mut self) -> Result<(), String> {
        self.dispatcher = None;
        Ok(())
    }
}

jam_core::export_control_plugin!(ControlPlugin, ControlPlugin::default);
