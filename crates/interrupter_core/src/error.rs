use std::fmt;

use thiserror::Error;

/// Fixed-capacity resources that can run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Per-source subscriber table of the event bus
    Subscribers,
    /// Shared event queue of the event bus
    EventQueue,
    /// Active-note registry of the tone synthesizer
    ActiveNotes,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Subscribers => write!(f, "subscriber table"),
            Resource::EventQueue => write!(f, "event queue"),
            Resource::ActiveNotes => write!(f, "active-note registry"),
        }
    }
}

/// Errors returned synchronously by core operations.
///
/// A rejected request never has a partial effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("{0} is full")]
    Capacity(Resource),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("timed out waiting for an event")]
    Timeout,

    /// A peripheral rejected an operation.
    #[error("hardware fault: {0}")]
    Hardware(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Build-time configuration that violates a range constraint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{knob}: min ({min}) must be less than max ({max})")]
    EmptyRange { knob: &'static str, min: i32, max: i32 },

    #[error("{knob}: default ({default}) must be between {min} and {max}")]
    DefaultOutOfRange {
        knob: &'static str,
        default: i32,
        min: i32,
        max: i32,
    },

    #[error("{knob}: step sizes must be non-zero")]
    ZeroStep { knob: &'static str },

    #[error("repetition frequency minimum must be at least 1 Hz, got {0}")]
    FrequencyFloor(i32),

    #[error("sample rate must be non-zero")]
    ZeroSampleRate,

    #[error("malformed configuration: {0}")]
    Parse(String),
}
