pub mod config;
pub mod manager;


pub use config::{InvokeSettings, LoggingSettings, Settings};
pub use manager::SettingsManager;
