// ============================================================================
// Relay Configuration
// ============================================================================
//
// Three layers:
// - RelaySettings: user-facing values as stored by the preference store (dB)
// - ProcessingConfig: the immutable value pushed into the effect chain
// - EngineConfig: hardware and lifecycle parameters

use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Number of equalizer bands
pub const EQUALIZER_BAND_COUNT: usize = 5;

/// Fixed equalizer center frequencies in Hz
pub const EQUALIZER_CENTERS_HZ: [f32; EQUALIZER_BAND_COUNT] = [60.0, 230.0, 910.0, 3000.0, 14000.0];

/// Display labels matching `EQUALIZER_CENTERS_HZ`
pub const EQUALIZER_LABELS: [&str; EQUALIZER_BAND_COUNT] = ["60Hz", "230Hz", "910Hz", "3kHz", "14kHz"];

pub const MIN_MIC_GAIN_DB: f32 = -10.0;
pub const MAX_MIC_GAIN_DB: f32 = 30.0;
pub const MIN_EQ_GAIN_DB: f32 = -10.0;
pub const MAX_EQ_GAIN_DB: f32 = 10.0;

pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
pub const DEFAULT_BLOCK_FRAMES: usize = 512;
pub const BUFFER_SIZE_MULTIPLIER: usize = 2;

/// Convert decibels to a linear amplitude factor
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert a linear amplitude factor to decibels
pub fn linear_to_db(linear: f32) -> f32 {
    20.0 * linear.max(1e-10).log10()
}

/// Effect parameters consumed by the processor.
///
/// Replaced wholesale on every change; readers never see a partial update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProcessingConfig {
    /// Linear master gain
    pub gain: f32,
    pub noise_suppression: bool,
    pub dynamics_processing: bool,
    /// Band gains in dB, ordered as `EQUALIZER_CENTERS_HZ`
    pub equalizer_bands: [f32; EQUALIZER_BAND_COUNT],
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            gain: 1.0,
            noise_suppression: false,
            dynamics_processing: false,
            equalizer_bands: [0.0; EQUALIZER_BAND_COUNT],
        }
    }
}

impl ProcessingConfig {
    /// Build from user settings, converting the master gain from dB
    pub fn from_settings(settings: &RelaySettings) -> Self {
        let gain_db = settings.microphone_gain.clamp(MIN_MIC_GAIN_DB, MAX_MIC_GAIN_DB);
        Self {
            gain: db_to_linear(gain_db),
            noise_suppression: settings.noise_suppression_enabled,
            dynamics_processing: settings.dynamics_processing_enabled,
            equalizer_bands: settings.equalizer_bands,
        }
    }

    /// Master gain expressed in dB
    pub fn gain_db(&self) -> f32 {
        linear_to_db(self.gain)
    }
}

/// User settings, as persisted by the preference store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelaySettings {
    /// Microphone gain in dB
    pub microphone_gain: f32,
    pub noise_suppression_enabled: bool,
    pub dynamics_processing_enabled: bool,
    /// Equalizer band gains in dB
    pub equalizer_bands: [f32; EQUALIZER_BAND_COUNT],
    /// Only treat the primary device class (hearing aids) as a relay target
    pub primary_device_only: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            microphone_gain: 0.0,
            noise_suppression_enabled: false,
            dynamics_processing_enabled: false,
            equalizer_bands: [0.0; EQUALIZER_BAND_COUNT],
            primary_device_only: false,
        }
    }
}

impl RelaySettings {
    /// Parse settings from YAML text
    pub fn from_yaml(text: &str) -> RelayResult<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: RelaySettings = serde_yaml::from_str(text)?;
        Ok(settings.validate())
    }

    /// Load settings from a YAML file
    pub fn load(path: &Path) -> RelayResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Save settings as YAML
    pub fn save(&self, path: &Path) -> RelayResult<()> {
        let text = serde_yaml::to_string(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Clamp values into their UI ranges
    pub fn validate(mut self) -> Self {
        if !self.microphone_gain.is_finite() {
            log::warn!("Microphone gain is not finite, resetting to 0 dB");
            self.microphone_gain = 0.0;
        }
        let clamped = self.microphone_gain.clamp(MIN_MIC_GAIN_DB, MAX_MIC_GAIN_DB);
        if clamped != self.microphone_gain {
            log::warn!(
                "Microphone gain {:.1} dB out of range, clamped to {:.1} dB",
                self.microphone_gain,
                clamped
            );
            self.microphone_gain = clamped;
        }
        for (band, label) in self.equalizer_bands.iter_mut().zip(EQUALIZER_LABELS) {
            let value = if band.is_finite() { *band } else { 0.0 };
            let clamped = value.clamp(MIN_EQ_GAIN_DB, MAX_EQ_GAIN_DB);
            if clamped != *band {
                log::warn!("Equalizer band {} at {:.1} dB clamped to {:.1} dB", label, band, clamped);
            }
            *band = clamped;
        }
        self
    }
}

/// Hardware and lifecycle parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Stream sample rate (mono)
    pub sample_rate: u32,

    /// Frames per read/process/write iteration
    pub block_frames: usize,

    /// How long stop() waits for the worker before forcing cleanup
    pub stop_timeout_ms: u64,

    /// Wake lock safety timeout
    pub wake_lock_timeout_ms: u64,

    /// Input device name substring (None = default device)
    pub input_device: Option<String>,

    /// Output device name substring (None = default device)
    pub output_device: Option<String>,

    /// Request exclusive audio focus while relaying
    pub request_audio_focus: bool,

    /// Output device polling interval for topology changes
    pub device_poll_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_frames: DEFAULT_BLOCK_FRAMES,
            stop_timeout_ms: 1000,
            wake_lock_timeout_ms: 10 * 60 * 1000,
            input_device: None,
            output_device: None,
            request_audio_focus: true,
            device_poll_ms: 1000,
        }
    }
}

impl EngineConfig {
    /// Sink buffer size in frames
    pub fn sink_buffer_frames(&self) -> usize {
        self.block_frames * BUFFER_SIZE_MULTIPLIER
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn wake_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.wake_lock_timeout_ms)
    }

    pub fn device_poll_interval(&self) -> Duration {
        Duration::from_millis(self.device_poll_ms.max(10))
    }

    /// Duration of one processing block
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_frames as f64 / self.sample_rate.max(1) as f64)
    }

    /// Reject values the stream cannot run with
    pub fn validate(&self) -> RelayResult<()> {
        if self.sample_rate == 0 {
            return Err(RelayError::Config("sample_rate must be positive".to_string()));
        }
        if self.block_frames == 0 {
            return Err(RelayError::Config("block_frames must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_to_linear() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_linear(20.0) - 10.0).abs() < 1e-4);
        assert!((db_to_linear(-6.0) - 0.501_187).abs() < 1e-4);
        assert!((linear_to_db(db_to_linear(12.5)) - 12.5).abs() < 1e-3);
    }

    #[test]
    fn test_processing_config_from_settings() {
        let settings = RelaySettings {
            microphone_gain: 6.0,
            noise_suppression_enabled: true,
            equalizer_bands: [1.0, 2.0, 3.0, 4.0, 5.0],
            ..Default::default()
        };
        let cfg = ProcessingConfig::from_settings(&settings);
        assert!((cfg.gain - db_to_linear(6.0)).abs() < 1e-6);
        assert!(cfg.noise_suppression);
        assert!(!cfg.dynamics_processing);
        assert_eq!(cfg.equalizer_bands, [1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_settings_yaml_defaults() {
        let settings = RelaySettings::from_yaml("microphoneGain: 3.5\n").unwrap();
        assert_eq!(settings.microphone_gain, 3.5);
        assert!(!settings.primary_device_only);
        assert_eq!(settings.equalizer_bands, [0.0; 5]);

        let empty = RelaySettings::from_yaml("").unwrap();
        assert_eq!(empty, RelaySettings::default());
    }

    #[test]
    fn test_settings_validate_clamps() {
        let text = "microphoneGain: 45.0\nequalizerBands: [-20.0, 0.0, 3.0, 12.0, -9.5]\n";
        let settings = RelaySettings::from_yaml(text).unwrap();
        assert_eq!(settings.microphone_gain, MAX_MIC_GAIN_DB);
        assert_eq!(settings.equalizer_bands, [-10.0, 0.0, 3.0, 10.0, -9.5]);
    }

    #[test]
    fn test_settings_invalid_yaml() {
        assert!(RelaySettings::from_yaml("microphoneGain: [not a number").is_err());
    }

    #[test]
    fn test_settings_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        let settings = RelaySettings {
            microphone_gain: -4.0,
            dynamics_processing_enabled: true,
            primary_device_only: true,
            ..Default::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(RelaySettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.sink_buffer_frames(), 1024);
        assert_eq!(config.stop_timeout(), Duration::from_secs(1));
        assert_eq!(config.wake_lock_timeout(), Duration::from_secs(600));
        assert!(config.validate().is_ok());

        let bad = EngineConfig {
            block_frames: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
