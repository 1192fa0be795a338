use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Octave offset between a note's octave number and its code.
pub const OCTAVE_OFFSET: i32 = 2;

/// Code of the 440 Hz reference note.
pub const REFERENCE_CODE: u8 = 69;
pub const REFERENCE_HZ: f64 = 440.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Pitch {
    C = 0,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl Pitch {
    pub const ALL: [Pitch; 12] = [
        Pitch::C,
        Pitch::CSharp,
        Pitch::D,
        Pitch::DSharp,
        Pitch::E,
        Pitch::F,
        Pitch::FSharp,
        Pitch::G,
        Pitch::GSharp,
        Pitch::A,
        Pitch::ASharp,
        Pitch::B,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Pitch::C => "C",
            Pitch::CSharp => "C#",
            Pitch::D => "D",
            Pitch::DSharp => "D#",
            Pitch::E => "E",
            Pitch::F => "F",
            Pitch::FSharp => "F#",
            Pitch::G => "G",
            Pitch::GSharp => "G#",
            Pitch::A => "A",
            Pitch::ASharp => "A#",
            Pitch::B => "B",
        }
    }

    /// Parse a pitch name such as `"A"`, `"c#"` or `"Bb"`.
    pub fn parse(name: &str) -> Option<Self> {
        let mut chars = name.chars();
        let base = match chars.next()?.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };
        let shift: i32 = match chars.as_str() {
            "" => 0,
            "#" | "s" => 1,
            "b" => -1,
            _ => return None,
        };
        let index = (base + shift).rem_euclid(12) as usize;
        Some(Self::ALL[index])
    }
}

/// A pitch in a given octave. Octave 3 holds the 440 Hz `A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note {
    pub octave: i8,
    pub pitch: Pitch,
}

impl Note {
    pub fn new(octave: i8, pitch: Pitch) -> Self {
        Self { octave, pitch }
    }

    /// Linear note code, `(octave + 2) * 12 + pitch`.
    pub fn code(&self) -> Result<u8> {
        let code = (self.octave as i32 + OCTAVE_OFFSET) * 12 + self.pitch as i32;
        u8::try_from(code)
            .ok()
            .filter(|code| *code <= 127)
            .ok_or(Error::InvalidArgument("note code outside 0..=127"))
    }

    pub fn from_code(code: u8) -> Self {
        let code = (code & 0x7f) as i32;
        Self {
            octave: (code / 12 - OCTAVE_OFFSET) as i8,
            pitch: Pitch::ALL[(code % 12) as usize],
        }
    }

    pub fn frequency(&self) -> Result<f64> {
        Ok(code_frequency(self.code()?))
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.pitch.name(), self.octave)
    }
}

/// Equal-tempered frequency of a note code.
pub fn code_frequency(code: u8) -> f64 {
    REFERENCE_HZ * 2f64.powf((code as f64 - REFERENCE_CODE as f64) / 12.0)
}
