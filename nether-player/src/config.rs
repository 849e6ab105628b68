//! Renderer configuration (TOML)
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```toml
//! resampling_quality = 4
//! ramp_style = "full"
//! max_to_mix = 64
//! sample_rate = 44100
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How volume changes are smoothed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RampStyle {
    /// Volume jumps to its target every tick
    None,
    /// Ramp only when a voice starts or stops
    OnOffOnly,
    /// Ramp every volume change
    #[default]
    Full,
}

impl RampStyle {
    pub(crate) fn level(self) -> i32 {
        match self {
            RampStyle::None => 0,
            RampStyle::OnOffOnly => 1,
            RampStyle::Full => 2,
        }
    }
}

/// Playback settings for a [`Sigrenderer`](crate::Sigrenderer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Interpolation level, 0 = zero-order hold .. 5 = sinc (default: 4, cubic)
    #[serde(default = "default_resampling_quality")]
    pub resampling_quality: i32,
    /// Declick ramp style (default: full)
    #[serde(default)]
    pub ramp_style: RampStyle,
    /// Voices mixed per render call, loudest first (default: 64)
    #[serde(default = "default_max_to_mix")]
    pub max_to_mix: usize,
    /// Output sample rate in Hz (default: 44100)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Scale applied to the module's stereo separation, 128 = unchanged (default: 128)
    #[serde(default = "default_stereo_separation")]
    pub stereo_separation: u8,
    /// Seconds of zero global volume before the global-volume-zero callback fires (default: 12)
    #[serde(default = "default_global_volume_zero_seconds")]
    pub global_volume_zero_seconds: u32,
    /// Seed for random LFO waveforms and instrument variation (default: 0)
    #[serde(default)]
    pub seed: u64,
}

fn default_resampling_quality() -> i32 {
    4
}

fn default_max_to_mix() -> usize {
    64
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_stereo_separation() -> u8 {
    128
}

fn default_global_volume_zero_seconds() -> u32 {
    12
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            resampling_quality: default_resampling_quality(),
            ramp_style: RampStyle::default(),
            max_to_mix: default_max_to_mix(),
            sample_rate: default_sample_rate(),
            stereo_separation: default_stereo_separation(),
            global_volume_zero_seconds: default_global_volume_zero_seconds(),
            seed: 0,
        }
    }
}

impl PlayerConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0..=5).contains(&self.resampling_quality) {
            return Err(ConfigError::OutOfRange {
                field: "resampling_quality",
                value: self.resampling_quality as i64,
            });
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::OutOfRange {
                field: "sample_rate",
                value: 0,
            });
        }
        if self.max_to_mix == 0 {
            return Err(ConfigError::OutOfRange {
                field: "max_to_mix",
                value: 0,
            });
        }
        Ok(())
    }

    /// Render delta in time units per output frame
    pub(crate) fn delta(&self) -> f64 {
        65536.0 / self.sample_rate as f64
    }
}
