//! Configuration types for the voice session and action pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Audio capture/playback settings.
    pub audio: AudioConfig,
    /// Realtime voice channel settings.
    pub realtime: RealtimeConfig,
    /// Wallet backend API settings.
    pub backend: BackendConfig,
    /// Action-resolution pipeline settings.
    pub pipeline: PipelineConfig,
}

/// Audio I/O configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture sample rate in Hz. The uplink wire format is 16-bit PCM
    /// at this rate, so it must match what the remote model expects.
    pub capture_sample_rate: u32,
    /// Output sample rate in Hz for the playback device. Inbound model
    /// audio at other rates is resampled to this.
    pub output_sample_rate: u32,
    /// Samples per outbound frame. Loudness is computed per frame and
    /// each frame is one wire message.
    pub frame_size: usize,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: 24_000,
            output_sample_rate: 24_000,
            frame_size: 4096,
            input_device: None,
            output_device: None,
        }
    }
}

/// Realtime voice channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// WebSocket URL of the realtime voice endpoint.
    pub url: String,
    /// API key sent during the channel handshake. Resolved from
    /// `VELA_REALTIME_API_KEY` when empty.
    pub api_key: String,
    /// Voice preset requested from the model.
    pub voice: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "wss://voice.vcn.network/v1/realtime".to_owned(),
            api_key: String::new(),
            voice: "sol".to_owned(),
        }
    }
}

impl RealtimeConfig {
    /// API key from config, falling back to the environment.
    pub fn resolved_api_key(&self) -> String {
        if self.api_key.is_empty() {
            std::env::var("VELA_REALTIME_API_KEY").unwrap_or_default()
        } else {
            self.api_key.clone()
        }
    }
}

/// Wallet backend API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the wallet backend (intent parsing, optimization,
    /// resolution, generation, persistence).
    pub base_url: String,
    /// Bearer token for the backend. Resolved from `VELA_BACKEND_API_KEY`
    /// when empty.
    pub api_key: String,
    /// Request timeout in seconds for backend calls.
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.vcn.network".to_owned(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

impl BackendConfig {
    /// API key from config, falling back to the environment.
    pub fn resolved_api_key(&self) -> String {
        if self.api_key.is_empty() {
            std::env::var("VELA_BACKEND_API_KEY").unwrap_or_default()
        } else {
            self.api_key.clone()
        }
    }
}

/// Action-resolution pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum intent confidence for the resolve stage. At or below this,
    /// the turn goes straight to the general-answer stage.
    pub confidence_threshold: f32,
    /// Maximum user/assistant turns kept as generation context.
    pub max_history_turns: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            max_history_turns: 20,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::AgentError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::AgentError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/vela/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("vela").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("vela")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/vela-config/config.toml")
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AgentConfig::default();
        assert!(config.audio.capture_sample_rate > 0);
        assert!(config.audio.output_sample_rate > 0);
        assert!(config.audio.frame_size > 0);
        assert!(!config.realtime.url.is_empty());
        assert!(!config.backend.base_url.is_empty());
        assert!(config.pipeline.confidence_threshold > 0.0);
        assert!(config.pipeline.confidence_threshold < 1.0);
        assert!(config.pipeline.max_history_turns > 0);
    }

    #[test]
    fn config_serializes_to_toml() {
        let config = AgentConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("capture_sample_rate"));
        assert!(toml_str.contains("confidence_threshold"));
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = AgentConfig::default_config_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.ends_with("config.toml"));
        assert!(path_str.contains("vela"));
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: AgentConfig = toml::from_str("[pipeline]\nconfidence_threshold = 0.8\n").unwrap();
        assert!((config.pipeline.confidence_threshold - 0.8).abs() < f32::EPSILON);
        assert_eq!(config.audio.frame_size, AudioConfig::default().frame_size);
    }
}
