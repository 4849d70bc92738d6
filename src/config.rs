//! Engine configuration
//!
//! Defaults match the live backend's stream format (48kHz stereo) and a
//! 2-second pre-roll. Every field can be overridden from a JSON file or a
//! `PROMPTDJ_*` environment variable.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Runtime configuration for [`crate::engine::Engine`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Generation model requested from the backend
    pub model: String,
    /// Fixed target sample rate for decoding, scheduling and recording
    pub sample_rate: u32,
    /// Fixed target channel count
    pub channels: usize,
    /// Pre-roll before the first scheduled buffer sounds
    pub buffer_time_secs: f64,
    /// Minimum spacing between prompt deliveries
    pub throttle_interval_ms: u64,
    /// Connect attempts longer than this fall back to local loops
    pub connect_timeout_ms: u64,
    /// Ramp length for effect parameter changes
    pub ramp_ms: u64,
    /// Master fade on play/pause/stop
    pub fade_ms: u64,
    /// Initial master volume (0-1)
    pub master_volume: f32,
    /// Delay line time
    pub delay_time_secs: f32,
    /// Delay line capacity
    pub max_delay_secs: f32,
    /// Delay feedback = wet * ratio
    pub delay_feedback_ratio: f32,
    /// Waveshaper strength constant
    pub distortion_strength: f32,
    /// Impulse response length
    pub reverb_seconds: f32,
    /// Impulse response decay rate (1/s)
    pub reverb_decay: f32,
    /// Directory of `<prompt text>.wav` loops used when the backend is unreachable
    pub fallback_assets_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: "lyria-realtime-exp".to_string(),
            sample_rate: 48000,
            channels: 2,
            buffer_time_secs: 2.0,
            throttle_interval_ms: 200,
            connect_timeout_ms: 10_000,
            ramp_ms: 30,
            fade_ms: 100,
            master_volume: 1.0,
            delay_time_secs: 0.5,
            max_delay_secs: 1.0,
            delay_feedback_ratio: 0.7,
            distortion_strength: 50.0,
            reverb_seconds: 2.0,
            reverb_decay: 3.5,
            fallback_assets_dir: None,
        }
    }
}

impl EngineConfig {
    /// Defaults with `PROMPTDJ_*` environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load a JSON config file, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut config: EngineConfig = serde_json::from_str(&text)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(model) = env::var("PROMPTDJ_MODEL") {
            self.model = model;
        }
        override_from_env("PROMPTDJ_SAMPLE_RATE", &mut self.sample_rate)?;
        override_from_env("PROMPTDJ_CHANNELS", &mut self.channels)?;
        override_from_env("PROMPTDJ_BUFFER_TIME_SECS", &mut self.buffer_time_secs)?;
        override_from_env("PROMPTDJ_THROTTLE_MS", &mut self.throttle_interval_ms)?;
        override_from_env("PROMPTDJ_CONNECT_TIMEOUT_MS", &mut self.connect_timeout_ms)?;
        if let Ok(dir) = env::var("PROMPTDJ_FALLBACK_ASSETS") {
            self.fallback_assets_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(config_error("sample_rate must be positive"));
        }
        if self.channels == 0 || self.channels > 2 {
            return Err(config_error("channels must be 1 or 2"));
        }
        if self.buffer_time_secs <= 0.0 {
            return Err(config_error("buffer_time_secs must be positive"));
        }
        if self.delay_time_secs > self.max_delay_secs {
            return Err(config_error(&format!(
                "delay_time_secs {} exceeds max_delay_secs {}",
                self.delay_time_secs, self.max_delay_secs
            )));
        }
        if self.reverb_seconds <= 0.0 {
            return Err(config_error("reverb_seconds must be positive"));
        }
        Ok(())
    }

    pub fn throttle_interval_secs(&self) -> f64 {
        self.throttle_interval_ms as f64 / 1000.0
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Parameter ramp length in frames
    pub fn ramp_frames(&self) -> usize {
        ms_to_frames(self.ramp_ms, self.sample_rate)
    }

    /// Master fade length in frames
    pub fn fade_frames(&self) -> usize {
        ms_to_frames(self.fade_ms, self.sample_rate)
    }
}

fn ms_to_frames(ms: u64, sample_rate: u32) -> usize {
    (ms as f64 * sample_rate as f64 / 1000.0).round() as usize
}

fn config_error(reason: &str) -> EngineError {
    EngineError::Config {
        reason: reason.to_string(),
    }
}

fn override_from_env<T: FromStr>(key: &str, slot: &mut T) -> Result<()> {
    if let Ok(raw) = env::var(key) {
        *slot = raw
            .parse()
            .map_err(|_| config_error(&format!("{key}={raw:?} is not a valid value")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ramp_frames(), 1440);
        assert_eq!(config.fade_frames(), 4800);
        assert_eq!(config.throttle_interval_secs(), 0.2);
    }

    #[test]
    fn test_validate_rejects_delay_over_cap() {
        let config = EngineConfig {
            delay_time_secs: 1.5,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config { .. })));
    }

    #[test]
    fn test_validate_rejects_more_than_two_channels() {
        let config = EngineConfig {
            channels: 3,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config { .. })));

        let mono = EngineConfig {
            channels: 1,
            ..EngineConfig::default()
        };
        assert!(mono.validate().is_ok());
    }

    #[test]
    fn test_load_partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"buffer_time_secs": 1.0, "model": "test-model"}}"#).unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.buffer_time_secs, 1.0);
        assert_eq!(config.sample_rate, 48000);
    }
}
