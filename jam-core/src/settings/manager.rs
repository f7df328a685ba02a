use crate::settings::config::Settings;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings for one host run, backed by a TOML file.
#[derive(Debug, Clone)]
pub struct SettingsManager {
    settings_path: PathBuf,
    settings: Settings,
}

impl SettingsManager {
    /// Resolves settings for the CLI.
    ///
    /// An explicit path is loaded (and created with defaults if missing).
    /// Without one, `~/.jam/settings.toml` is read only if it already exists;
    /// otherwise defaults are used and nothing is written.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_path(path.to_path_buf());
        }

        let default_path = Self::default_settings_path()?;
        if default_path.is_file() {
            return Self::from_path(default_path);
        }

        Ok(Self {
            settings_path: default_path,
            settings: Settings::default(),
        })
    }

    /// Create a settings manager from a specific path
    pub fn from_path(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            Self::write_settings(&path, &Settings::default())?;
        }

        let settings = Self::load_from_file_with_backup(&path)?;

        Ok(Self {
            settings_path: path,
            settings,
        })
    }

    /// Get the default settings path (~/.jam/settings.toml)
    fn default_settings_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".jam").join("settings.toml"))
    }

    /// Load settings from a TOML file with backup on parse failure
    fn load_from_file_with_backup(path: &Path) -> Result<Settings> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {path:?}"))?;

        match toml::from_str(&contents) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                tracing::warn!("Settings at {:?} are invalid, restoring defaults: {}", path, e);

                let backup_path = path.with_extension("toml.backup");
                fs::rename(path, &backup_path).with_context(|| {
                    format!("Failed to backup corrupted settings to {backup_path:?}")
                })?;

                let default_settings = Settings::default();
                Self::write_settings(path, &default_settings)?;
                Ok(default_settings)
            }
        }
    }

    fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {parent:?}"))?;
        }
        let contents = toml::to_string_pretty(settings).context("Failed to serialize settings")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write settings to {path:?}"))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Update in-memory settings with a closure. Note: settings are not saved to disk
    pub fn update_setting<F>(&mut self, updater: F)
    where
        F: FnOnce(&mut Settings),
    {
        updater(&mut self.settings);
    }

    /// Explicitly persist in-memory settings to disk
    pub fn save(&self) -> Result<()> {
        Self::write_settings(&self.settings_path, &self.settings)
    }

    /// Get the settings file path
    pub fn path(&self) -> &Path {
        &self.settings_path
    }
}
