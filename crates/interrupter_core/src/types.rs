//! Shared data types: bus events, output modes and pulse timing.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opaque payload carried by an event.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Producer family an event belongs to. Subscriptions are keyed on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Trigger, rotary encoder and its push button
    Controls,
    /// Note input (the synthesizer's controller)
    Tone,
    /// Analog line-in jack
    LineIn,
}

impl EventSource {
    pub const COUNT: usize = 3;
    pub const ALL: [EventSource; Self::COUNT] =
        [EventSource::Controls, EventSource::Tone, EventSource::LineIn];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// A published event. Immutable once created.
#[derive(Clone)]
pub struct Event {
    pub source: EventSource,
    pub kind: u8,
    pub value: u32,
    pub payload: Option<Payload>,
}

impl Event {
    pub fn new(source: EventSource, kind: u8, value: u32) -> Self {
        Self {
            source,
            kind,
            value,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Value reinterpreted as a signed quantity (encoder deltas).
    pub fn signed_value(&self) -> i32 {
        self.value as i32
    }

    /// Borrow the payload as `T` if one is attached and has that type.
    pub fn payload<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("source", &self.source)
            .field("kind", &self.kind)
            .field("value", &self.value)
            .field("payload", &self.payload.is_some())
            .finish()
    }
}

macro_rules! event_kinds {
    (
        $(#[$meta:meta])*
        $name:ident => $source:expr, { $($variant:ident = $code:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        #[repr(u8)]
        pub enum $name {
            $($variant = $code),+
        }

        impl $name {
            pub const SOURCE: EventSource = $source;

            /// Build an event of this kind carrying `value`.
            pub fn event(self, value: u32) -> Event {
                Event::new(Self::SOURCE, self as u8, value)
            }

            /// Decode the kind of `event`, if it comes from this source.
            pub fn of(event: &Event) -> Option<Self> {
                if event.source != Self::SOURCE {
                    return None;
                }
                Self::try_from(event.kind).ok()
            }
        }

        impl TryFrom<u8> for $name {
            type Error = Error;

            fn try_from(code: u8) -> Result<Self> {
                match code {
                    $($code => Ok($name::$variant),)+
                    _ => Err(Error::InvalidArgument(concat!("unknown ", stringify!($name), " code"))),
                }
            }
        }
    };
}

event_kinds! {
    /// Events published by the physical controls.
    ControlEvent => EventSource::Controls, {
        ButtonPressed = 0,
        ButtonClicked = 1,
        ButtonLongPressed = 2,
        ButtonReleased = 3,
        EncoderChanged = 4,
        TriggerPressed = 5,
        TriggerReleased = 6,
        FocusChanged = 7,
    }
}

event_kinds! {
    /// Events published by the note input.
    ToneEvent => EventSource::Tone, {
        Connected = 0,
        Disconnected = 1,
        NoteOn = 2,
        NoteOff = 3,
    }
}

event_kinds! {
    /// Events published by the line-in jack detector.
    LineEvent => EventSource::LineIn, {
        Plugged = 0,
        Unplugged = 1,
    }
}

impl ControlEvent {
    /// Encoder rotation by `delta` detents.
    pub fn encoder(delta: i32) -> Event {
        ControlEvent::EncoderChanged.event(delta as u32)
    }
}

/// A decoded note message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteMessage {
    pub on: bool,
    /// 0..=127
    pub note: u8,
    /// 0..=127
    pub velocity: u8,
}

impl NoteMessage {
    pub fn on(note: u8, velocity: u8) -> Self {
        Self {
            on: true,
            note: note & 0x7f,
            velocity: velocity & 0x7f,
        }
    }

    pub fn off(note: u8) -> Self {
        Self {
            on: false,
            note: note & 0x7f,
            velocity: 0,
        }
    }

    /// Pack into an event value: note in bits 0..7, velocity in bits 8..15.
    pub fn to_event(self) -> Event {
        let kind = if self.on {
            ToneEvent::NoteOn
        } else {
            ToneEvent::NoteOff
        };
        kind.event(self.note as u32 | (self.velocity as u32) << 8)
    }

    pub fn from_event(event: &Event) -> Option<Self> {
        let on = match ToneEvent::of(event)? {
            ToneEvent::NoteOn => true,
            ToneEvent::NoteOff => false,
            _ => return None,
        };
        Some(Self {
            on,
            note: (event.value & 0x7f) as u8,
            velocity: ((event.value >> 8) & 0x7f) as u8,
        })
    }
}

/// Which engine drives the output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum OutputMode {
    /// Pulse train from the pulse-delay / repetition-frequency knobs
    Manual = 1,
    /// 8-bit duty-cycle modulation from line-in or the synthesizer
    Modulation = 2,
}

impl OutputMode {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(OutputMode::Manual),
            2 => Some(OutputMode::Modulation),
            _ => None,
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputMode::Manual => write!(f, "MANUAL"),
            OutputMode::Modulation => write!(f, "MODULATION"),
        }
    }
}

/// Signal attached to the physical output pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Driver {
    /// Plain GPIO held low (channel disconnected)
    Gpio = 0,
    /// Pulse generator
    Pulse = 1,
    /// Duty-cycle generator
    Duty = 2,
}

impl Driver {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Driver::Gpio),
            1 => Some(Driver::Pulse),
            2 => Some(Driver::Duty),
            _ => None,
        }
    }
}

/// Period and pulse width in driver ticks.
///
/// `pulse_width <= period` always holds; both zero means output off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PulseTiming {
    pub period: u32,
    pub pulse_width: u32,
}

impl PulseTiming {
    pub const OFF: PulseTiming = PulseTiming {
        period: 0,
        pulse_width: 0,
    };

    /// Build a timing pair, clamping the width to the period.
    pub fn new(period: u32, pulse_width: u32) -> Self {
        Self {
            period,
            pulse_width: pulse_width.min(period),
        }
    }

    pub fn is_off(&self) -> bool {
        self.period == 0 || self.pulse_width == 0
    }

    /// Ticks the output stays low after the pulse.
    pub fn off_time(&self) -> u32 {
        self.period - self.pulse_width
    }
}

/// One high/low pulse item as programmed into the pulse generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseShape {
    pub high: u32,
    pub low: u32,
}

impl PulseShape {
    pub fn from_timing(timing: PulseTiming) -> Self {
        Self {
            high: timing.pulse_width,
            low: timing.off_time(),
        }
    }

    /// A lone pulse followed by idle-low output.
    pub fn single(high: u32) -> Self {
        Self { high, low: 0 }
    }
}
