//! Pulse interrupter core library
//!
//! Event types, knob calibration and coupling, pulse planning, channel
//! routing and tone synthesis. It is a pure library with no threads or I/O;
//! the real-time plumbing around it lives in the `interrupter` crate.

#[macro_use]
extern crate lazy_static;

pub mod config;
pub mod dsp;
pub mod error;
pub mod hal;
pub mod knobs;
pub mod output;
pub mod types;

// Re-export commonly used items
pub use config::{DeviceConfig, KnobRange, MAX_CHORD};
pub use error::{ConfigError, Error, Resource, Result};
pub use knobs::{KnobBank, KnobId, KnobMask, KnobValues};
pub use output::{PulsePlan, Routing, plan_pulses};

pub use types::{
    ControlEvent, Driver, Event, EventSource, LineEvent, NoteMessage, OutputMode, Payload,
    PulseShape, PulseTiming, ToneEvent,
};
