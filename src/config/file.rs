//! TOML configuration file loading
//!
//! Supports `~/.config/driveassist/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::session::TranscriptMode;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct DriveAssistConfigFile {
    /// Live service connection
    #[serde(default)]
    pub live: LiveFileConfig,

    /// Session behaviour
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Native dial action
    #[serde(default)]
    pub dialer: DialerFileConfig,

    /// Task list import
    #[serde(default)]
    pub tasks: TasksFileConfig,
}

/// Live service configuration
#[derive(Debug, Default, Deserialize)]
pub struct LiveFileConfig {
    /// WebSocket endpoint
    pub endpoint: Option<String>,

    /// Model identifier (e.g. "gemini-2.5-flash-native-audio-preview-12-2025")
    pub model: Option<String>,

    /// Prebuilt voice name; empty uses the service default
    pub voice: Option<String>,

    pub api_key: Option<String>,

    /// Replaces the built-in co-pilot preamble
    pub instruction: Option<String>,
}

/// Session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// "replace" or "accumulate"
    pub transcript_mode: Option<TranscriptMode>,

    /// Milliseconds between releasing the microphone and dialing
    pub dial_settle_ms: Option<u64>,
}

/// Dialer configuration
#[derive(Debug, Default, Deserialize)]
pub struct DialerFileConfig {
    /// Argv template; `{number}` and `{uri}` are substituted
    pub command: Option<Vec<String>>,
}

/// Task import configuration
#[derive(Debug, Default, Deserialize)]
pub struct TasksFileConfig {
    /// JSON task list
    pub path: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `DriveAssistConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> DriveAssistConfigFile {
    let Some(path) = config_file_path() else {
        return DriveAssistConfigFile::default();
    };
    load_config_file_from(&path)
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_file_from(path: &Path) -> DriveAssistConfigFile {
    if !path.exists() {
        return DriveAssistConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                DriveAssistConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            DriveAssistConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/driveassist/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("driveassist").join("config.toml"))
}
