//! Configuration loading and management
//!
//! Paths come from the environment; behavior comes from an optional JSON
//! settings file. Every setting has a default, so a missing file or a
//! partial one is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::session::SessionConfig;
use crate::state::{ActiveBehavior, Mode, ModeSettings};
use crate::transcript::{ProfileName, UtteranceProfile};

const DATA_DIR_ENV: &str = "DICTATION_DAEMON_DATA_DIR";
const CONFIG_ENV: &str = "DICTATION_DAEMON_CONFIG";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    pub settings: Settings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dictation: DictationSettings,
    pub timers: TimerSettings,
    pub ptt: PttSettings,
    pub recognizer: RecognizerSettings,
    pub assistant: AssistantSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DictationSettings {
    pub start_mode: Mode,
    pub behavior: ActiveBehavior,
    pub profile: ProfileName,
    pub custom_profile: CustomProfile,
    pub wake_phrases: Vec<String>,
    pub sleep_phrases: Vec<String>,
    pub format_turns: bool,
    pub turn_history_limit: usize,
}

impl Default for DictationSettings {
    fn default() -> Self {
        Self {
            start_mode: Mode::Off,
            behavior: ActiveBehavior::Dictation,
            profile: ProfileName::Balanced,
            custom_profile: CustomProfile::default(),
            wake_phrases: vec!["microphone on".into(), "wake up".into()],
            sleep_phrases: vec!["microphone off".into(), "go to sleep".into()],
            format_turns: true,
            turn_history_limit: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomProfile {
    pub confidence_threshold: f32,
    pub silence_threshold_ms: u64,
}

impl Default for CustomProfile {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            silence_threshold_ms: 560,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    pub auto_sleep_enabled: bool,
    pub auto_sleep_secs: u64,
    pub auto_off_enabled: bool,
    pub auto_off_secs: u64,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            auto_sleep_enabled: true,
            auto_sleep_secs: 300,
            auto_off_enabled: true,
            auto_off_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PttSettings {
    /// Toggle on press instead of hold-to-talk
    pub sticky: bool,
    pub finalize_timeout_ms: u64,
}

impl Default for PttSettings {
    fn default() -> Self {
        Self {
            sticky: false,
            finalize_timeout_ms: 1200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerSettings {
    pub connect_timeout_ms: u64,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantSettings {
    pub session_id: String,
    /// Program and arguments run once per assistant turn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            session_id: "default".into(),
            command: None,
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os(DATA_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = std::env::var("HOME").context("HOME is not set")?;
                PathBuf::from(home)
                    .join(".local")
                    .join("share")
                    .join("dictation-daemon")
            }
        };
        let config_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::from_data_dir(data_dir, config_path)
    }

    /// Build from a data directory, reading `config_path` or
    /// `<data_dir>/config.json` when present
    pub fn from_data_dir(data_dir: PathBuf, config_path: Option<PathBuf>) -> Result<Self> {
        let explicit = config_path.is_some();
        let config_path = config_path.unwrap_or_else(|| data_dir.join("config.json"));

        let settings = if config_path.exists() {
            Settings::load_file(&config_path)?
        } else if explicit {
            bail!("config file {} does not exist", config_path.display());
        } else {
            debug!(path = %config_path.display(), "no config file, using defaults");
            Settings::default()
        };

        Ok(Self {
            socket_path: data_dir.join("daemon.sock"),
            data_dir,
            settings,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

impl Settings {
    pub fn load_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let settings = Self::from_json(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        info!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let mut settings: Settings = serde_json::from_str(raw).context("malformed settings JSON")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&mut self) -> Result<()> {
        let custom = &mut self.dictation.custom_profile;
        let clamped = UtteranceProfile::custom(custom.confidence_threshold, custom.silence_threshold_ms);
        custom.confidence_threshold = clamped.confidence_threshold;

        if self.timers.auto_sleep_enabled && self.timers.auto_sleep_secs == 0 {
            bail!("timers.auto_sleep_secs must be positive when auto-sleep is enabled");
        }
        if self.timers.auto_off_enabled && self.timers.auto_off_secs == 0 {
            bail!("timers.auto_off_secs must be positive when auto-off is enabled");
        }
        if self.recognizer.connect_timeout_ms == 0 {
            bail!("recognizer.connect_timeout_ms must be positive");
        }
        if self.assistant.session_id.trim().is_empty() {
            bail!("assistant.session_id must not be empty");
        }
        if matches!(&self.assistant.command, Some(cmd) if cmd.is_empty()) {
            bail!("assistant.command must name a program");
        }
        Ok(())
    }

    /// Settings for the session coordinator
    pub fn session_config(&self) -> SessionConfig {
        let dictation = &self.dictation;
        let timers = &self.timers;
        SessionConfig {
            mode: ModeSettings {
                profile: dictation.profile,
                custom_profile: UtteranceProfile::custom(
                    dictation.custom_profile.confidence_threshold,
                    dictation.custom_profile.silence_threshold_ms,
                ),
                behavior: dictation.behavior,
                format_turns: dictation.format_turns,
                wake_phrases: dictation.wake_phrases.clone(),
                sleep_phrases: dictation.sleep_phrases.clone(),
                auto_sleep: timers
                    .auto_sleep_enabled
                    .then(|| Duration::from_secs(timers.auto_sleep_secs)),
                auto_off: timers
                    .auto_off_enabled
                    .then(|| Duration::from_secs(timers.auto_off_secs)),
                connect_timeout: Duration::from_millis(self.recognizer.connect_timeout_ms),
            },
            start_mode: dictation.start_mode,
            ptt_sticky: self.ptt.sticky,
            ptt_finalize_timeout: Duration::from_millis(self.ptt.finalize_timeout_ms),
            assistant_session_id: self.assistant.session_id.clone(),
            turn_history_limit: dictation.turn_history_limit,
        }
    }
}
