//! Guitar strings in standard tuning and where each pitch class sits on them.

use crate::tuning::{Note, PitchClass};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of frets that cover every pitch class once (open string included).
pub const FRETS_PER_OCTAVE: u8 = 12;

/// One of the six strings of a guitar in standard tuning.
///
/// Serialised with the conventional one-letter labels, lower-case `e` for
/// the high string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StringId {
    #[serde(rename = "E")]
    LowE,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "G")]
    G,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "e")]
    HighE,
}

impl StringId {
    /// All strings from lowest to highest.
    pub const ALL: [StringId; 6] = [
        StringId::LowE,
        StringId::A,
        StringId::D,
        StringId::G,
        StringId::B,
        StringId::HighE,
    ];

    /// The note the string sounds when played open.
    pub const fn open_note(self) -> Note {
        match self {
            StringId::LowE => Note::new(PitchClass::E, 2),
            StringId::A => Note::new(PitchClass::A, 2),
            StringId::D => Note::new(PitchClass::D, 3),
            StringId::G => Note::new(PitchClass::G, 3),
            StringId::B => Note::new(PitchClass::B, 3),
            StringId::HighE => Note::new(PitchClass::E, 4),
        }
    }

    /// Lowest fret (0..=11) on this string that sounds `pitch_class`.
    pub const fn fret_of(self, pitch_class: PitchClass) -> u8 {
        let open = self.open_note().pitch_class.semitone() as i32;
        (pitch_class.semitone() as i32 - open).rem_euclid(FRETS_PER_OCTAVE as i32) as u8
    }

    /// Pitch class sounded at `fret`.
    pub const fn pitch_class_at(self, fret: u8) -> PitchClass {
        self.open_note().pitch_class.transpose(fret as i32)
    }

    /// One-letter label, `e` for the high string.
    pub const fn label(self) -> &'static str {
        match self {
            StringId::LowE => "E",
            StringId::A => "A",
            StringId::D => "D",
            StringId::G => "G",
            StringId::B => "B",
            StringId::HighE => "e",
        }
    }
}

impl fmt::Display for StringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for StringId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StringId::ALL
            .into_iter()
            .find(|string| string.label() == s.trim())
            .ok_or_else(|| format!("unknown string `{s}` (expected one of E A D G B e)"))
    }
}
