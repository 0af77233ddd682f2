//! Configuration types for the coaching session.
//!
//! Loaded once at startup from TOML; every section falls back to defaults for
//! missing fields.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CoachError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoachConfig {
    /// Microphone capture and playback settings.
    pub audio: AudioConfig,
    /// Suspicion scoring policy.
    pub scoring: ScoringConfig,
    /// Escalation stage timing.
    pub escalation: EscalationConfig,
    /// Speech recency and casual chat timing.
    pub speech: SpeechConfig,
    /// Grace period before a corrective close.
    pub grace: GraceConfig,
    /// Adaptive perception cadence.
    pub polling: PollingConfig,
    /// Break reminder schedule.
    pub breaks: BreakConfig,
    /// Window keyword lists.
    pub windows: WindowsConfig,
    /// Perception service connection.
    pub link: LinkConfig,
    /// Screen sample encoding.
    pub screen: ScreenConfig,
}

/// Audio I/O configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture sample rate sent to the service (16-bit mono PCM).
    pub send_sample_rate: u32,
    /// Sample rate of response audio from the service.
    pub receive_sample_rate: u32,
    /// Samples per captured frame.
    pub frame_samples: usize,
    /// Capacity of the capture → sender channel. Frames are dropped when full.
    pub capture_channel_capacity: usize,
    /// RMS threshold on 16-bit samples above which a frame counts as speech.
    pub vad_threshold: f64,
    /// Lowercase name fragments of virtual/loopback devices to ignore.
    pub excluded_devices: Vec<String>,
    /// Characters of the lowercase device name used to match one physical
    /// device across driver APIs.
    pub name_prefix_len: usize,
    /// Preferred input device index (None = system default).
    pub input_device: Option<usize>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            send_sample_rate: 16_000,
            receive_sample_rate: 24_000,
            frame_samples: 1024,
            capture_channel_capacity: 2,
            vad_threshold: crate::vad::DEFAULT_THRESHOLD,
            excluded_devices: [
                "steam streaming",
                "vb-audio",
                "cable output",
                "cable input",
                "input (vb",
                "wo mic",
                "mappeur",
                "réseau de microphones",
            ]
            .iter()
            .map(|s| (*s).to_owned())
            .collect(),
            name_prefix_len: 15,
            input_device: None,
        }
    }
}

/// Suspicion scoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Delta applied for misaligned activity on a banned category.
    pub banned_misaligned_delta: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            banned_misaligned_delta: 5.0,
        }
    }
}

/// How the three escalation timers interact once armed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerMode {
    /// Timers are independent once armed; only a drop below a threshold
    /// clears that timer and the ones above it.
    #[default]
    Cumulative,
    /// Arming a higher timer clears the lower ones.
    Nested,
}

/// Escalation stage timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub timer_mode: TimerMode,
    /// Seconds above 3 before a contextual remark is allowed.
    pub suspicious_after_secs: u64,
    /// Seconds above 6 before a direct warning.
    pub warning_after_secs: u64,
    /// Seconds above 9 before the final warning.
    pub ultimatum_after_secs: u64,
    /// Seconds above 9 before the strike.
    pub strike_after_secs: u64,
    /// Dwell on an ambiguous target before one curious question is allowed.
    pub curiosity_dwell_secs: u64,
    /// Seconds after session start during which the greeting may be spoken.
    pub greeting_window_secs: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            timer_mode: TimerMode::default(),
            suspicious_after_secs: 5,
            warning_after_secs: 20,
            ultimatum_after_secs: 15,
            strike_after_secs: 30,
            curiosity_dwell_secs: 60,
            greeting_window_secs: 30,
        }
    }
}

/// Locale for mood framing and greetings.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Fr,
}

/// Speech recency and casual chat timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Seconds after user speech during which the coach may answer freely.
    pub user_speech_timeout_secs: f64,
    /// Seconds of silence that end a casual chat.
    pub chat_silence_timeout_secs: f64,
    /// Minimum chat age before the silence timeout applies.
    pub chat_min_elapsed_secs: f64,
    /// Delay before the chat opening prompt is sent.
    pub chat_greeting_delay_secs: f64,
    pub language: Language,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            user_speech_timeout_secs: 12.0,
            chat_silence_timeout_secs: 20.0,
            chat_min_elapsed_secs: 10.0,
            chat_greeting_delay_secs: 2.0,
            language: Language::default(),
        }
    }
}

impl SpeechConfig {
    pub fn user_speech_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.user_speech_timeout_secs)
    }

    pub fn chat_silence_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.chat_silence_timeout_secs)
    }

    pub fn chat_min_elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.chat_min_elapsed_secs)
    }

    pub fn chat_greeting_delay(&self) -> Duration {
        Duration::from_secs_f64(self.chat_greeting_delay_secs)
    }
}

/// Grace period before a corrective close.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraceConfig {
    /// Minimum wait for the current utterance to finish.
    pub utterance_wait_ms: u64,
    /// Upper bound on waiting for playback to go idle.
    pub utterance_max_wait_ms: u64,
    /// Window during which user speech cancels the close.
    pub interrupt_window_ms: u64,
    /// How long the force-speak flag stays open after a close.
    pub force_speak_hold_ms: u64,
}

impl Default for GraceConfig {
    fn default() -> Self {
        Self {
            utterance_wait_ms: 3_000,
            utterance_max_wait_ms: 8_000,
            interrupt_window_ms: 4_000,
            force_speak_hold_ms: 6_000,
        }
    }
}

impl GraceConfig {
    pub fn utterance_wait(&self) -> Duration {
        Duration::from_millis(self.utterance_wait_ms)
    }

    pub fn utterance_max_wait(&self) -> Duration {
        Duration::from_millis(self.utterance_max_wait_ms.max(self.utterance_wait_ms))
    }

    pub fn interrupt_window(&self) -> Duration {
        Duration::from_millis(self.interrupt_window_ms)
    }

    pub fn force_speak_hold(&self) -> Duration {
        Duration::from_millis(self.force_speak_hold_ms)
    }
}

/// One step of the adaptive perception cadence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CadenceTier {
    /// Highest score (inclusive) this tier applies to.
    pub max_score: f64,
    pub interval_ms: u64,
}

/// Adaptive perception cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Tiers ordered by ascending `max_score`.
    pub tiers: Vec<CadenceTier>,
    /// Interval used above the last tier, and the floor for every interval.
    pub floor_ms: u64,
    /// How often casual chat checks for the silence timeout.
    pub chat_check_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                CadenceTier {
                    max_score: 2.0,
                    interval_ms: 8_000,
                },
                CadenceTier {
                    max_score: 5.0,
                    interval_ms: 5_000,
                },
                CadenceTier {
                    max_score: 8.0,
                    interval_ms: 4_000,
                },
            ],
            floor_ms: 3_000,
            chat_check_ms: 2_000,
        }
    }
}

/// Break reminder schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakConfig {
    /// Session minutes at which each break tier is suggested.
    pub checkpoints_min: Vec<u64>,
    /// Break length in minutes per tier.
    pub durations_min: Vec<u64>,
}

impl Default for BreakConfig {
    fn default() -> Self {
        Self {
            checkpoints_min: vec![20, 40, 90, 120],
            durations_min: vec![5, 8, 15, 20],
        }
    }
}

/// Window keyword lists (all lowercase fragments).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowsConfig {
    /// Windows that can never be closed.
    pub protected: Vec<String>,
    /// Browsers get the tab-close shortcut instead of a whole-window close.
    pub browser_keywords: Vec<String>,
    /// Titles eligible as the strike auto-target.
    pub banned_keywords: Vec<String>,
}

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_owned()).collect()
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            protected: owned(crate::scoring::DEFAULT_PROTECTED_WINDOWS),
            browser_keywords: owned(&[
                "chrome", "firefox", "edge", "opera", "brave", "vivaldi", "chromium",
            ]),
            banned_keywords: owned(&[
                "youtube",
                "netflix",
                "twitch",
                "reddit",
                "tiktok",
                "instagram",
                "facebook",
                "steam",
            ]),
        }
    }
}

/// Perception service connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// WebSocket URL of the perception/speech service.
    pub url: String,
    /// Retry delay after a stale resumption handle.
    pub fast_retry_ms: u64,
    /// First retry delay after a generic failure.
    pub base_retry_ms: u64,
    /// Cap on retry delay growth.
    pub max_retry_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8765/live".to_owned(),
            fast_retry_ms: 500,
            base_retry_ms: 3_000,
            max_retry_ms: 30_000,
        }
    }
}

/// Screen sample encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    pub max_width: u32,
    pub max_height: u32,
    /// JPEG quality (1-100).
    pub jpeg_quality: u8,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            max_width: 1024,
            max_height: 512,
            jpeg_quality: 30,
        }
    }
}

impl CoachConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| CoachError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CoachError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/tama/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("tama")
            .join("config.toml")
    }

    /// Reject values the session cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.audio.send_sample_rate == 0 || self.audio.receive_sample_rate == 0 {
            return Err(CoachError::Config("sample rates must be non-zero".into()));
        }
        if self.audio.frame_samples == 0 {
            return Err(CoachError::Config("audio.frame_samples must be non-zero".into()));
        }
        if self.audio.capture_channel_capacity == 0 {
            return Err(CoachError::Config(
                "audio.capture_channel_capacity must be non-zero".into(),
            ));
        }
        if !self.scoring.banned_misaligned_delta.is_finite()
            || self.scoring.banned_misaligned_delta < 0.0
        {
            return Err(CoachError::Config(
                "scoring.banned_misaligned_delta must be a non-negative number".into(),
            ));
        }
        if self.polling.floor_ms == 0 {
            return Err(CoachError::Config("polling.floor_ms must be non-zero".into()));
        }
        if self
            .polling
            .tiers
            .windows(2)
            .any(|pair| pair[0].max_score > pair[1].max_score)
        {
            return Err(CoachError::Config(
                "polling.tiers must be ordered by ascending max_score".into(),
            ));
        }
        if self.breaks.durations_min.is_empty() && !self.breaks.checkpoints_min.is_empty() {
            return Err(CoachError::Config(
                "breaks.durations_min must not be empty when checkpoints are set".into(),
            ));
        }
        if !(1..=100).contains(&self.screen.jpeg_quality) {
            return Err(CoachError::Config("screen.jpeg_quality must be 1-100".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = CoachConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audio.send_sample_rate, 16_000);
        assert_eq!(config.audio.capture_channel_capacity, 2);
        assert_eq!(config.escalation.timer_mode, TimerMode::Cumulative);
        assert!((config.scoring.banned_misaligned_delta - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = CoachConfig::default();
        config.scoring.banned_misaligned_delta = 2.0;
        config.speech.language = Language::Fr;
        config.link.url = "ws://example.invalid/live".to_owned();

        config.save_to_file(&path).unwrap();
        let loaded = CoachConfig::from_file(&path).unwrap();

        assert!((loaded.scoring.banned_misaligned_delta - 2.0).abs() < f64::EPSILON);
        assert_eq!(loaded.speech.language, Language::Fr);
        assert_eq!(loaded.link.url, "ws://example.invalid/live");
    }

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[escalation]\ntimer_mode = \"nested\"\n").unwrap();

        let loaded = CoachConfig::from_file(&path).unwrap();
        assert_eq!(loaded.escalation.timer_mode, TimerMode::Nested);
        assert_eq!(loaded.escalation.strike_after_secs, 30);
        assert_eq!(loaded.breaks.checkpoints_min, vec![20, 40, 90, 120]);
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = CoachConfig::from_file(std::path::Path::new("/nonexistent/tama/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").unwrap();
        assert!(matches!(
            CoachConfig::from_file(&path),
            Err(CoachError::Config(_))
        ));
    }

    #[test]
    fn validate_rejects_unordered_tiers() {
        let mut config = CoachConfig::default();
        config.polling.tiers.reverse();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let mut config = CoachConfig::default();
        config.audio.capture_channel_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = CoachConfig::default_config_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.ends_with("config.toml"));
        assert!(path_str.contains("tama"));
    }
}
