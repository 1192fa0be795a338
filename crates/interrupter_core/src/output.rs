//! Pulse planning and channel routing for the output driver.
//!
//! Both are pure: [`plan_pulses`] turns a frequency / width request into the
//! hardware strategy to use, and [`Routing`] tracks which driver is attached
//! to the pin across mode switches and enable/disable.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Driver, OutputMode, PulseShape, PulseTiming};

/// Pulse generator resolution, 1 µs per tick.
pub const TICK_HZ: u32 = 1_000_000;

/// Lowest non-zero repetition frequency accepted.
pub const MIN_FREQUENCY_HZ: f32 = 0.1;

/// Longest period a single hardware pulse item can hold.
pub const SINGLE_SHOT_LIMIT_TICKS: u32 = 32_767;

pub const DUTY_RES_BITS: u32 = 8;
pub const DUTY_MAX: u8 = u8::MAX;
pub const CARRIER_HZ: u32 = 30_000;

/// How a manual pulse request is realised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "strategy")]
pub enum PulsePlan {
    /// No pulses at all.
    Off,
    /// Short period: one hardware item looping on its own.
    Looped(PulseShape),
    /// Long period: the low-rate loop fires single pulses.
    Retriggered(PulseTiming),
}

impl PulsePlan {
    pub fn timing(&self) -> PulseTiming {
        match self {
            PulsePlan::Off => PulseTiming::OFF,
            PulsePlan::Looped(shape) => PulseTiming::new(shape.high + shape.low, shape.high),
            PulsePlan::Retriggered(timing) => *timing,
        }
    }

    /// Short label used in logs: `HF`, `LF` or `OFF`.
    pub fn label(&self) -> &'static str {
        match self {
            PulsePlan::Off => "OFF",
            PulsePlan::Looped(_) => "HF",
            PulsePlan::Retriggered(_) => "LF",
        }
    }
}

impl fmt::Display for PulsePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timing = self.timing();
        write!(
            f,
            "{} period={} width={}",
            self.label(),
            timing.period,
            timing.pulse_width
        )
    }
}

/// Choose the pulse strategy for `freq_hz` and `width_us`.
pub fn plan_pulses(freq_hz: f32, width_us: u32) -> Result<PulsePlan> {
    if !freq_hz.is_finite() || freq_hz < 0.0 {
        return Err(Error::InvalidArgument("frequency must be finite and positive"));
    }
    if freq_hz == 0.0 || width_us == 0 {
        return Ok(PulsePlan::Off);
    }
    if freq_hz < MIN_FREQUENCY_HZ {
        return Err(Error::InvalidArgument("frequency below 0.1 Hz"));
    }

    let period = (TICK_HZ as f32 / freq_hz) as u32;
    let timing = PulseTiming::new(period, width_us);
    if timing.is_off() {
        return Ok(PulsePlan::Off);
    }

    if timing.period > SINGLE_SHOT_LIMIT_TICKS {
        Ok(PulsePlan::Retriggered(timing))
    } else {
        Ok(PulsePlan::Looped(PulseShape::from_timing(timing)))
    }
}

/// Driver that should be attached for `mode` while the channel is enabled.
pub fn driver_for(mode: OutputMode) -> Driver {
    match mode {
        OutputMode::Manual => Driver::Pulse,
        OutputMode::Modulation => Driver::Duty,
    }
}

/// Mode / enable state machine of the single output channel.
///
/// Exactly one driver is attached after every transition: the mode's own
/// driver while enabled, plain GPIO while disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Routing {
    mode: OutputMode,
    enabled: bool,
    attached: Driver,
}

impl Default for Routing {
    fn default() -> Self {
        Self::new()
    }
}

impl Routing {
    pub fn new() -> Self {
        Self {
            mode: OutputMode::Manual,
            enabled: false,
            attached: Driver::Gpio,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn attached(&self) -> Driver {
        self.attached
    }

    pub fn require(&self, mode: OutputMode) -> Result<()> {
        if self.mode != mode {
            return Err(Error::InvalidState("operation not allowed in current output mode"));
        }
        Ok(())
    }

    /// Switch mode. Returns the driver to re-attach when the pin is live.
    pub fn set_mode(&mut self, mode: OutputMode) -> Result<Option<Driver>> {
        if self.mode == mode {
            return Err(Error::InvalidState("output mode already active"));
        }
        self.mode = mode;
        if !self.enabled {
            return Ok(None);
        }
        self.attached = driver_for(mode);
        Ok(Some(self.attached))
    }

    pub fn enable(&mut self) -> Result<Driver> {
        if self.enabled {
            return Err(Error::InvalidState("output already enabled"));
        }
        self.enabled = true;
        self.attached = driver_for(self.mode);
        Ok(self.attached)
    }

    pub fn disable(&mut self) -> Result<Driver> {
        if !self.enabled {
            return Err(Error::InvalidState("output already disabled"));
        }
        self.enabled = false;
        self.attached = Driver::Gpio;
        Ok(self.attached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_floor_is_invalid_argument() {
        assert!(matches!(
            plan_pulses(0.05, 100),
            Err(Error::InvalidArgument(_))
        ));
        assert!(plan_pulses(-1.0, 100).is_err());
        assert!(plan_pulses(f32::NAN, 100).is_err());
    }

    #[test]
    fn zero_frequency_or_width_is_silence() {
        assert_eq!(plan_pulses(0.0, 100), Ok(PulsePlan::Off));
        assert_eq!(plan_pulses(100.0, 0), Ok(PulsePlan::Off));
    }

    #[test]
    fn short_period_loops_in_hardware() {
        let plan = plan_pulses(1000.0, 100).unwrap();
        assert_eq!(plan, PulsePlan::Looped(PulseShape { high: 100, low: 900 }));
        assert_eq!(plan.label(), "HF");
    }

    #[test]
    fn long_period_is_retriggered() {
        let plan = plan_pulses(10.0, 500).unwrap();
        assert_eq!(plan, PulsePlan::Retriggered(PulseTiming::new(100_000, 500)));
        assert_eq!(plan.to_string(), "LF period=100000 width=500");
    }

    #[test]
    fn strategy_boundary_is_the_single_shot_limit() {
        // 1e6 / 30.52 = 32765 ticks
        assert!(matches!(plan_pulses(30.52, 10), Ok(PulsePlan::Looped(_))));
        // 1e6 / 30.5 = 32786 ticks
        assert!(matches!(plan_pulses(30.5, 10), Ok(PulsePlan::Retriggered(_))));
    }

    #[test]
    fn width_is_clamped_to_period() {
        let plan = plan_pulses(5000.0, 1000).unwrap();
        assert_eq!(plan, PulsePlan::Looped(PulseShape { high: 200, low: 0 }));
    }

    #[test]
    fn repeated_transitions_are_invalid_state() {
        let mut routing = Routing::new();
        assert!(routing.set_mode(OutputMode::Manual).is_err());
        assert!(routing.disable().is_err());
        assert_eq!(routing.enable(), Ok(Driver::Pulse));
        assert!(routing.enable().is_err());
    }

    #[test]
    fn exactly_one_driver_after_each_transition() {
        let mut routing = Routing::new();
        assert_eq!(routing.set_mode(OutputMode::Modulation), Ok(None));
        assert_eq!(routing.attached(), Driver::Gpio);
        assert_eq!(routing.enable(), Ok(Driver::Duty));
        assert_eq!(
            routing.set_mode(OutputMode::Manual),
            Ok(Some(Driver::Pulse))
        );
        assert_eq!(routing.disable(), Ok(Driver::Gpio));
        assert!(routing.require(OutputMode::Manual).is_ok());
        assert!(routing.require(OutputMode::Modulation).is_err());
    }
}
