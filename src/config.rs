//! Configuration management for Storyplay
//!
//! Values come from built-in defaults, then an optional `storyplay.toml`,
//! then `STORYPLAY_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::{Error, Result};

/// Storyplay configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External story and narration services
    pub services: ServicesConfig,

    /// Camera detection tuning
    pub detection: DetectionConfig,

    /// Speech session recovery tuning
    pub speech: SpeechConfig,

    /// Scene pacing
    pub playback: PlaybackConfig,

    /// Narration audio
    pub narration: NarrationConfig,
}

/// External service endpoints
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Story generation endpoint (POST JSON); unset means demo story only
    pub story_url: Option<String>,

    /// Narration audio endpoint (POST JSON); unset means silent narration
    pub audio_url: Option<String>,

    /// Bearer key for both services (from `STORYPLAY_API_KEY` only)
    #[serde(skip)]
    pub api_key: Option<SecretString>,

    /// Story generation deadline in seconds
    pub story_timeout_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            story_url: None,
            audio_url: None,
            api_key: None,
            story_timeout_secs: 10,
        }
    }
}

impl ServicesConfig {
    /// Story generation deadline
    #[must_use]
    pub const fn story_timeout(&self) -> Duration {
        Duration::from_secs(self.story_timeout_secs)
    }

    /// Fresh copy of the service key for a client
    #[must_use]
    pub fn api_key(&self) -> Option<SecretString> {
        self.api_key
            .as_ref()
            .map(|key| SecretString::from(key.expose_secret().to_string()))
    }
}

/// Camera detection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Gesture events must score strictly above this
    pub gesture_threshold: f32,

    /// Object events must score strictly above this
    pub object_threshold: f32,

    /// Frame tick interval (display refresh equivalent)
    pub frame_interval_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            gesture_threshold: 0.7,
            object_threshold: 0.6,
            frame_interval_ms: 16,
        }
    }
}

impl DetectionConfig {
    /// Frame tick interval
    #[must_use]
    pub const fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

/// Speech session configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// First restart delay after an unplanned end
    pub initial_backoff_ms: u64,

    /// Growth factor per unplanned end
    pub backoff_multiplier: f64,

    /// Upper bound on the restart delay
    pub max_backoff_ms: u64,

    /// Minimum gap between two start attempts
    pub start_cooldown_ms: u64,

    /// Settle delay before resuming after the host becomes visible
    pub resume_delay_ms: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            backoff_multiplier: 1.5,
            max_backoff_ms: 5000,
            start_cooldown_ms: 300,
            resume_delay_ms: 300,
        }
    }
}

/// Scene pacing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Pause between consecutive narration lines
    pub line_pause_ms: u64,

    /// Hold on the success state before moving on
    pub settle_ms: u64,

    /// Line spoken when a requirement is met
    pub celebration: String,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            line_pause_ms: 500,
            settle_ms: 2000,
            celebration: "Amazing! Well done!".to_string(),
        }
    }
}

impl PlaybackConfig {
    /// Pause between consecutive narration lines
    #[must_use]
    pub const fn line_pause(&self) -> Duration {
        Duration::from_millis(self.line_pause_ms)
    }

    /// Hold on the success state
    #[must_use]
    pub const fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Narration audio configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NarrationConfig {
    /// Number of synthesized lines kept in memory
    pub cache_capacity: usize,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self { cache_capacity: 64 }
    }
}

/// Return the platform config directory for Storyplay
///
/// Uses `~/.config/storyplay/` on Linux
#[must_use]
pub fn config_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "storyplay", "storyplay")
        .map_or_else(|| PathBuf::from(".storyplay"), |d| d.config_dir().to_path_buf())
}

/// Return the platform data directory for Storyplay, creating it if needed
#[must_use]
pub fn data_dir() -> PathBuf {
    let dir = directories::ProjectDirs::from("dev", "storyplay", "storyplay")
        .map_or_else(|| PathBuf::from(".storyplay"), |d| d.data_dir().to_path_buf());

    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(
            path = %dir.display(),
            error = %e,
            "failed to create data directory"
        );
    }

    dir
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns error if the config file exists but cannot be parsed, or an
    /// environment override has an invalid value
    pub fn load() -> Result<Self> {
        let path = std::env::var("STORYPLAY_CONFIG")
            .map_or_else(|_| config_dir().join("storyplay.toml"), PathBuf::from);

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML config file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `STORYPLAY_*` overrides using the given variable lookup
    ///
    /// # Errors
    ///
    /// Returns error if a numeric override cannot be parsed or a threshold
    /// is outside `0.0..=1.0`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var("STORYPLAY_STORY_URL") {
            self.services.story_url = Some(url);
        }
        if let Some(url) = var("STORYPLAY_AUDIO_URL") {
            self.services.audio_url = Some(url);
        }
        if let Some(key) = var("STORYPLAY_API_KEY") {
            self.services.api_key = Some(SecretString::from(key));
        }
        if let Some(v) = var("STORYPLAY_STORY_TIMEOUT_SECS") {
            self.services.story_timeout_secs = parse_var("STORYPLAY_STORY_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("STORYPLAY_GESTURE_THRESHOLD") {
            self.detection.gesture_threshold = parse_var("STORYPLAY_GESTURE_THRESHOLD", &v)?;
        }
        if let Some(v) = var("STORYPLAY_OBJECT_THRESHOLD") {
            self.detection.object_threshold = parse_var("STORYPLAY_OBJECT_THRESHOLD", &v)?;
        }
        if let Some(v) = var("STORYPLAY_FRAME_INTERVAL_MS") {
            self.detection.frame_interval_ms = parse_var("STORYPLAY_FRAME_INTERVAL_MS", &v)?;
        }

        self.validate()
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("gesture_threshold", self.detection.gesture_threshold),
            ("object_threshold", self.detection.object_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{name} must be between 0 and 1, got {value}"
                )));
            }
        }

        if self.detection.frame_interval_ms == 0 {
            return Err(Error::Config("frame_interval_ms must be positive".to_string()));
        }

        if self.speech.backoff_multiplier < 1.0 {
            return Err(Error::Config(
                "backoff_multiplier must be at least 1.0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid value for {name}: {value}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_constants() {
        let config = Config::default();
        assert!((config.detection.gesture_threshold - 0.7).abs() < f32::EPSILON);
        assert!((config.detection.object_threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.services.story_timeout(), Duration::from_secs(10));
        assert_eq!(config.speech.initial_backoff_ms, 500);
        assert_eq!(config.speech.max_backoff_ms, 5000);
        assert_eq!(config.playback.settle(), Duration::from_secs(2));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("STORYPLAY_STORY_URL", "http://localhost:8000/story"),
                ("STORYPLAY_API_KEY", "secret"),
                ("STORYPLAY_GESTURE_THRESHOLD", "0.8"),
                ("STORYPLAY_STORY_TIMEOUT_SECS", "3"),
            ]))
            .unwrap();

        assert_eq!(
            config.services.story_url.as_deref(),
            Some("http://localhost:8000/story")
        );
        assert_eq!(
            config.services.api_key.as_ref().map(|k| k.expose_secret()),
            Some("secret")
        );
        assert!((config.detection.gesture_threshold - 0.8).abs() < f32::EPSILON);
        assert_eq!(config.services.story_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn rejects_bad_threshold() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("STORYPLAY_OBJECT_THRESHOLD", "1.5")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_unparseable_number() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("STORYPLAY_FRAME_INTERVAL_MS", "fast")]))
            .unwrap_err();
        assert!(err.to_string().contains("STORYPLAY_FRAME_INTERVAL_MS"));
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [playback]
            settle_ms = 500

            [speech]
            max_backoff_ms = 4000
            "#,
        )
        .unwrap();

        assert_eq!(config.playback.settle_ms, 500);
        assert_eq!(config.playback.line_pause_ms, 500);
        assert_eq!(config.speech.max_backoff_ms, 4000);
        assert_eq!(config.speech.initial_backoff_ms, 500);
        assert!(config.services.story_url.is_none());
    }
}
