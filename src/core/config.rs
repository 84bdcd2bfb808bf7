/*
 * Manages the deployer's persisted settings: where the application manifest
 * is looked for relative to a profile, the optional external copy tool, the
 * staging root, how republish treats a failed removal, and the default log
 * level. Settings live in `deploy_settings.json` inside the per-user local
 * configuration directory; a missing or empty file means defaults.
 *
 * It uses a trait-based approach (`ConfigManagerOperations`) so callers can be
 * tested against other stores. The concrete `CoreConfigManager` resolves its
 * directory through `path_utils` unless given an explicit one.
 */
use crate::core::path_utils;
use crate::core::profiles::{DEFAULT_MANIFEST_RELATIVE_PATH, ManifestLocation};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::PathBuf;

pub const APP_NAME: &str = "FabricDeployer";
const SETTINGS_FILENAME: &str = "deploy_settings.json";

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Serde(serde_json::Error),
    NoConfigDirectory,
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Serde(err)
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Configuration I/O error: {e}"),
            ConfigError::Serde(e) => write!(f, "Configuration file format error: {e}"),
            ConfigError::NoConfigDirectory => {
                write!(f, "Could not determine the configuration directory")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Serde(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// What republish does when the removal half fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RepublishPolicy {
    /// Attempt the publish anyway and report the removal failure alongside its result.
    #[default]
    ContinueOnRemoveFailure,
    AbortOnRemoveFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySettings {
    pub manifest_relative_path: String,
    pub copy_tool: Option<PathBuf>,
    pub staging_root: Option<PathBuf>,
    pub republish_policy: RepublishPolicy,
    pub log_level: String,
}

impl Default for DeploySettings {
    fn default() -> Self {
        DeploySettings {
            manifest_relative_path: DEFAULT_MANIFEST_RELATIVE_PATH.to_string(),
            copy_tool: None,
            staging_root: None,
            republish_policy: RepublishPolicy::default(),
            log_level: "info".to_string(),
        }
    }
}

impl DeploySettings {
    pub fn manifest_location(&self) -> ManifestLocation {
        ManifestLocation::RelativeToProfile(self.manifest_relative_path.clone())
    }

    pub fn staging_root(&self) -> PathBuf {
        self.staging_root.clone().unwrap_or_else(std::env::temp_dir)
    }
}

pub trait ConfigManagerOperations: Send + Sync {
    fn load_settings(&self, app_name: &str) -> Result<DeploySettings>;
    fn save_settings(&self, app_name: &str, settings: &DeploySettings) -> Result<()>;

    /// Loads, edits and saves the settings. Nothing is written when loading fails.
    fn update_settings(
        &self,
        app_name: &str,
        edit: &mut dyn FnMut(&mut DeploySettings),
    ) -> Result<DeploySettings> {
        let mut settings = self.load_settings(app_name)?;
        edit(&mut settings);
        self.save_settings(app_name, &settings)?;
        Ok(settings)
    }
}

pub struct CoreConfigManager {
    config_dir: Option<PathBuf>,
}

impl CoreConfigManager {
    pub fn new() -> Self {
        CoreConfigManager { config_dir: None }
    }

    /// Reads and writes settings in `config_dir` instead of the per-user directory.
    #[cfg(test)]
    pub fn with_config_dir(config_dir: PathBuf) -> Self {
        CoreConfigManager {
            config_dir: Some(config_dir),
        }
    }

    fn settings_path(&self, app_name: &str) -> Result<PathBuf> {
        let dir = match &self.config_dir {
            Some(dir) => {
                path_utils::ensure_dir(dir)?;
                dir.clone()
            }
            None => path_utils::get_base_app_config_local_dir(app_name)
                .ok_or(ConfigError::NoConfigDirectory)?,
        };
        Ok(dir.join(SETTINGS_FILENAME))
    }
}

impl Default for CoreConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManagerOperations for CoreConfigManager {
    fn load_settings(&self, app_name: &str) -> Result<DeploySettings> {
        let file_path = self.settings_path(app_name)?;
        log::trace!("CoreConfigManager: Loading settings for '{app_name}' from {file_path:?}");

        if !file_path.exists() {
            log::debug!("CoreConfigManager: Settings file {file_path:?} does not exist.");
            return Ok(DeploySettings::default());
        }
        let contents = fs::read_to_string(&file_path)?;
        if contents.trim().is_empty() {
            log::debug!("CoreConfigManager: Settings file {file_path:?} is empty.");
            return Ok(DeploySettings::default());
        }
        let settings = serde_json::from_str(&contents)?;
        log::debug!("CoreConfigManager: Loaded settings from {file_path:?}.");
        Ok(settings)
    }

    fn save_settings(&self, app_name: &str, settings: &DeploySettings) -> Result<()> {
        let file_path = self.settings_path(app_name)?;
        let writer = BufWriter::new(File::create(&file_path)?);
        serde_json::to_writer_pretty(writer, settings)?;
        log::debug!("CoreConfigManager: Saved settings for '{app_name}' to {file_path:?}.");
        Ok(())
    }
}
