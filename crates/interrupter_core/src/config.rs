//! Build-time bounds and defaults.
//!
//! Everything here is fixed for the life of the process. [`DeviceConfig`]
//! can be deserialized so a host build (or the simulator) may override the
//! defaults, but it is validated once at startup and never changes after.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Maximum number of simultaneously sounding notes.
pub const MAX_CHORD: usize = 8;

/// Default sample clock of the tone synthesizer.
pub const SAMPLE_RATE_HZ: u32 = 16_000;

/// Minimum off-time reserved after each pulse.
pub const TOFF_MIN_US: i32 = 50;

pub const PD_MIN: i32 = 0;
pub const PD_MAX: i32 = 2_000;
pub const PD_DEFAULT: i32 = 100;
pub const PD_STEPS: [u16; 2] = [1, 10];

pub const PRF_MIN: i32 = 1;
pub const PRF_MAX: i32 = 5_000;
pub const PRF_DEFAULT: i32 = 100;
pub const PRF_STEPS: [u16; 2] = [1, 100];

pub const POWER_MIN: i32 = 0;
pub const POWER_MAX: i32 = 100;
pub const POWER_DEFAULT: i32 = 50;
pub const POWER_STEPS: [u16; 2] = [1, 10];

pub const GAIN_MIN: i32 = -50;
pub const GAIN_MAX: i32 = 50;
pub const GAIN_DEFAULT: i32 = 0;
pub const GAIN_STEPS: [u16; 2] = [5, 10];

/// Physical range, boot value and encoder steps of one knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnobRange {
    pub min: i32,
    pub max: i32,
    pub default: i32,
    /// Fine step first, coarse step second
    pub steps: [u16; 2],
}

impl KnobRange {
    pub const fn new(min: i32, max: i32, default: i32, steps: [u16; 2]) -> Self {
        Self {
            min,
            max,
            default,
            steps,
        }
    }

    fn validate(&self, knob: &'static str) -> Result<(), ConfigError> {
        if self.min >= self.max {
            return Err(ConfigError::EmptyRange {
                knob,
                min: self.min,
                max: self.max,
            });
        }
        if self.default < self.min || self.default > self.max {
            return Err(ConfigError::DefaultOutOfRange {
                knob,
                default: self.default,
                min: self.min,
                max: self.max,
            });
        }
        if self.steps.contains(&0) {
            return Err(ConfigError::ZeroStep { knob });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Pulse delay (on-time), microseconds
    pub pulse_delay: KnobRange,
    /// Pulse repetition frequency, hertz
    pub repetition_frequency: KnobRange,
    /// Output power, percent
    pub power: KnobRange,
    /// Gain, decibels
    pub gain: KnobRange,
    pub toff_min_us: i32,
    pub sample_rate_hz: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            pulse_delay: KnobRange::new(PD_MIN, PD_MAX, PD_DEFAULT, PD_STEPS),
            repetition_frequency: KnobRange::new(PRF_MIN, PRF_MAX, PRF_DEFAULT, PRF_STEPS),
            power: KnobRange::new(POWER_MIN, POWER_MAX, POWER_DEFAULT, POWER_STEPS),
            gain: KnobRange::new(GAIN_MIN, GAIN_MAX, GAIN_DEFAULT, GAIN_STEPS),
            toff_min_us: TOFF_MIN_US,
            sample_rate_hz: SAMPLE_RATE_HZ,
        }
    }
}

impl DeviceConfig {
    /// Parse a JSON document (missing fields keep their defaults) and
    /// validate it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: DeviceConfig =
            serde_json::from_str(json).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pulse_delay.validate("pulse delay")?;
        self.repetition_frequency.validate("repetition frequency")?;
        self.power.validate("power")?;
        self.gain.validate("gain")?;
        if self.repetition_frequency.min < 1 {
            return Err(ConfigError::FrequencyFloor(self.repetition_frequency.min));
        }
        if self.sample_rate_hz == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        Ok(())
    }
}
