use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::accounts::AppwriteConfig;
use crate::ai::backend::DEFAULT_BACKEND_URL;
use crate::capture::UploadOptions;
use crate::dispatcher::DEFAULT_SEARCH_TEMPLATE;
use crate::voice::{RetryPolicy, TriggerPhrases, DEFAULT_AGENT_NAME};

pub const SETTINGS_FILE: &str = "settings.toml";

/// Error type for settings persistence
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Settings I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Settings file is invalid: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Settings could not be written: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub agent_name: String,
    pub wake_word_enabled: bool,
    pub backend_url: String,
    pub search_template: String,
    pub appwrite: AppwriteConfig,
    pub upload_max_width: u32,
    pub jpeg_quality: u8,
    /// Consecutive recognizer restarts allowed before giving up.
    pub max_restart_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            agent_name: DEFAULT_AGENT_NAME.into(),
            wake_word_enabled: true,
            backend_url: DEFAULT_BACKEND_URL.into(),
            search_template: DEFAULT_SEARCH_TEMPLATE.into(),
            appwrite: AppwriteConfig::default(),
            upload_max_width: UploadOptions::default().max_width,
            jpeg_quality: UploadOptions::default().jpeg_quality,
            max_restart_attempts: RetryPolicy::default().max_attempts,
        }
    }
}

impl Settings {
    /// Load settings from `path`, falling back to defaults when the file
    /// does not exist yet. Missing keys take their default values.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        log::info!("Settings saved to {}", path.display());
        Ok(())
    }

    pub fn phrases(&self) -> TriggerPhrases {
        TriggerPhrases::for_agent(&self.agent_name)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_restart_attempts,
            ..RetryPolicy::default()
        }
    }

    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            max_width: self.upload_max_width,
            jpeg_quality: self.jpeg_quality,
        }
    }
}
