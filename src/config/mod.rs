//! Configuration management for DriveAssist

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::session::{DEFAULT_INSTRUCTION, SessionSettings, TranscriptMode};
use crate::{Error, Result};

use file::DriveAssistConfigFile;

/// Gemini Live bidirectional streaming endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Native-audio live model
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Prebuilt voice
pub const DEFAULT_VOICE: &str = "Zephyr";

/// Wait between releasing the microphone and dialing
pub const DEFAULT_DIAL_SETTLE_MS: u64 = 3000;

/// DriveAssist configuration
#[derive(Debug)]
pub struct Config {
    /// Live service WebSocket endpoint
    pub endpoint: Url,

    /// Live service API key, never logged
    pub api_key: Option<SecretString>,

    /// Settings handed to each session
    pub session: SessionSettings,

    /// Dial argv template, platform opener when unset
    pub dial_command: Option<Vec<String>>,

    /// JSON task list to import
    pub tasks_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid endpoint, transcript mode or
    /// settle delay
    pub fn from_sources(
        fc: DriveAssistConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let endpoint_raw = env("DRIVEASSIST_ENDPOINT")
            .or(fc.live.endpoint)
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let endpoint = Url::parse(&endpoint_raw)
            .map_err(|e| Error::Config(format!("invalid endpoint {endpoint_raw}: {e}")))?;

        // GEMINI_API_KEY > API_KEY > toml
        let api_key = env("GEMINI_API_KEY")
            .or_else(|| env("API_KEY"))
            .or(fc.live.api_key)
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from);

        let model = env("DRIVEASSIST_MODEL")
            .or(fc.live.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let voice = env("DRIVEASSIST_VOICE")
            .or(fc.live.voice)
            .unwrap_or_else(|| DEFAULT_VOICE.to_string());
        let voice = (!voice.trim().is_empty()).then_some(voice);

        let transcript_mode = match env("DRIVEASSIST_TRANSCRIPT_MODE") {
            Some(mode) => mode.parse()?,
            None => fc.session.transcript_mode.unwrap_or_default(),
        };

        let dial_settle_ms = match env("DRIVEASSIST_DIAL_SETTLE_MS") {
            Some(ms) => ms
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid DRIVEASSIST_DIAL_SETTLE_MS: {ms}")))?,
            None => fc.session.dial_settle_ms.unwrap_or(DEFAULT_DIAL_SETTLE_MS),
        };

        let tasks_path = env("DRIVEASSIST_TASKS")
            .or(fc.tasks.path)
            .map(PathBuf::from);

        Ok(Self {
            endpoint,
            api_key,
            session: SessionSettings {
                model,
                voice,
                instruction: fc
                    .live
                    .instruction
                    .unwrap_or_else(|| DEFAULT_INSTRUCTION.to_string()),
                transcript_mode,
                dial_settle_delay: Duration::from_millis(dial_settle_ms),
            },
            dial_command: fc.dialer.command.filter(|argv| !argv.is_empty()),
            tasks_path,
        })
    }

    /// Move out the API key required to open a live session
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if no key is configured
    pub fn take_api_key(&mut self) -> Result<SecretString> {
        self.api_key.take().ok_or_else(|| {
            Error::Config("no API key: set GEMINI_API_KEY or [live].api_key".to_string())
        })
    }
}
