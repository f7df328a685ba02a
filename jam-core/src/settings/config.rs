use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Address, payload and options of the request the host sends once
/// attached. The host treats all three as opaque text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvokeSettings {
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_json")]
    pub payload: String,

    #[serde(default = "default_json")]
    pub options: String,
}

impl Default for InvokeSettings {
    fn default() -> Self {
        Self {
            address: default_address(),
            payload: default_json(),
            options: default_json(),
        }
    }
}

fn default_address() -> String {
    "control.run".to_string()
}

fn default_json() -> String {
    "{}".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or
    /// `jam_core=debug`.
    #[serde(default = "default_level")]
    pub level: String,

    /// Append logs to this file in addition to stderr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: None,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Settings {
    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub invoke: InvokeSettings,
}
