use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::core::framing::FramingMode;

/// What end-of-stream without a terminal frame means.
///
/// Backends are expected to end every response with an explicit `done` or
/// `error` frame, but a dropped connection closes the stream without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EofPolicy {
    /// Commit whatever was accumulated, as if a bare `done` had arrived.
    ImplicitDone,
    /// Surface a stream-truncation error; partial content is still kept.
    Error,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Config {
    /// Base URL of the chat API, e.g. `http://localhost:8000/api`.
    pub base_url: Option<String>,
    /// Wire framing the backend speaks.
    pub framing: Option<FramingMode>,
    /// End-of-stream handling; see [`EofPolicy`].
    pub eof: Option<EofPolicy>,
    /// Whether new conversations request reasoning output.
    pub reasoning: Option<bool>,
    /// Plain-text transcript log of committed turns.
    pub transcript_log: Option<String>,
}

impl Config {
    pub fn load() -> Result<Config, Box<dyn std::error::Error>> {
        let config_path = Self::get_config_path();
        Self::load_from_path(&config_path)
    }

    pub fn load_from_path(config_path: &PathBuf) -> Result<Config, Box<dyn std::error::Error>> {
        if config_path.exists() {
            let contents = fs::read_to_string(config_path)?;
            let config: Config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let config_path = Self::get_config_path();
        self.save_to_path(&config_path)
    }

    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    fn get_config_path() -> PathBuf {
        match ProjectDirs::from("io", "chatpipe", "chatpipe") {
            Some(proj_dirs) => proj_dirs.config_dir().join("config.toml"),
            None => PathBuf::from("chatpipe.toml"),
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or("http://localhost:8000/api")
    }

    pub fn framing_mode(&self) -> FramingMode {
        self.framing.unwrap_or(FramingMode::DataLines)
    }

    pub fn eof_policy(&self) -> EofPolicy {
        self.eof.unwrap_or(EofPolicy::ImplicitDone)
    }

    pub fn reasoning_enabled(&self) -> bool {
        self.reasoning.unwrap_or(false)
    }
}
