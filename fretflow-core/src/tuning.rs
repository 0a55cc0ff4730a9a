//! # Musical Tuning Module
//!
//! Maps frequencies onto equal-tempered notes (A4 = 440 Hz) and measures how
//! far a frequency sits from its nearest note in cents.
//!
//! ## Features
//! - Fixed 12-entry pitch-class enumeration (no string lookups)
//! - Frequency to nearest note with octave and cents deviation
//! - Note to equal-tempered frequency
//! - Transposition by semitones, used for interval helpers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference pitch for A4 in Hz.
pub const A4_FREQUENCY: f64 = 440.0;

/// MIDI number of A4.
const A4_MIDI: i32 = 69;

/// One of the twelve semitone names, independent of octave.
///
/// Discriminants are semitones above C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PitchClass {
    C = 0,
    Cs = 1,
    D = 2,
    Ds = 3,
    E = 4,
    F = 5,
    Fs = 6,
    G = 7,
    Gs = 8,
    A = 9,
    As = 10,
    B = 11,
}

impl PitchClass {
    /// All twelve pitch classes, ascending from C.
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::Cs,
        PitchClass::D,
        PitchClass::Ds,
        PitchClass::E,
        PitchClass::F,
        PitchClass::Fs,
        PitchClass::G,
        PitchClass::Gs,
        PitchClass::A,
        PitchClass::As,
        PitchClass::B,
    ];

    /// The seven natural (unaltered) pitch classes.
    pub const NATURALS: [PitchClass; 7] = [
        PitchClass::C,
        PitchClass::D,
        PitchClass::E,
        PitchClass::F,
        PitchClass::G,
        PitchClass::A,
        PitchClass::B,
    ];

    /// Pitch class for a semitone count above C; wraps modulo 12.
    pub const fn from_semitone(semitone: i32) -> PitchClass {
        PitchClass::ALL[semitone.rem_euclid(12) as usize]
    }

    /// Semitones above C (0..=11).
    pub const fn semitone(self) -> u8 {
        self as u8
    }

    /// `true` for the seven white-key pitch classes.
    pub const fn is_natural(self) -> bool {
        !matches!(
            self,
            PitchClass::Cs | PitchClass::Ds | PitchClass::Fs | PitchClass::Gs | PitchClass::As
        )
    }

    /// Pitch class `semitones` above (or below, if negative) this one.
    pub const fn transpose(self, semitones: i32) -> PitchClass {
        PitchClass::from_semitone(self.semitone() as i32 + semitones)
    }

    /// Sharp spelling, e.g. `"C#"`.
    pub const fn name(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::Cs => "C#",
            PitchClass::D => "D",
            PitchClass::Ds => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::Fs => "F#",
            PitchClass::G => "G",
            PitchClass::Gs => "G#",
            PitchClass::A => "A",
            PitchClass::As => "A#",
            PitchClass::B => "B",
        }
    }

    /// Flat spelling, e.g. `"Db"`. Naturals are spelled as themselves.
    pub const fn flat_name(self) -> &'static str {
        match self {
            PitchClass::Cs => "Db",
            PitchClass::Ds => "Eb",
            PitchClass::Fs => "Gb",
            PitchClass::Gs => "Ab",
            PitchClass::As => "Bb",
            natural => natural.name(),
        }
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A detected note: pitch class, scientific octave and deviation from the
/// equal-tempered pitch in cents, within `(-50, 50]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub pitch_class: PitchClass,
    pub octave: i32,
    pub cents_deviation: f32,
}

impl Note {
    /// Finds the nearest equal-tempered note to `freq`.
    ///
    /// Returns `None` for non-positive or non-finite input. A frequency
    /// exactly halfway between two notes maps to the lower one with
    /// `+50` cents so the deviation stays within `(-50, 50]`.
    pub fn from_frequency(freq: f32) -> Option<Note> {
        if !freq.is_finite() || freq <= 0.0 {
            return None;
        }
        let semitones = semitones_from_a4(freq as f64);
        let nearest = (semitones - 0.5).ceil();
        let midi = A4_MIDI + nearest as i32;

        Some(Note {
            pitch_class: PitchClass::from_semitone(midi),
            octave: midi.div_euclid(12) - 1,
            cents_deviation: (100.0 * (semitones - nearest)) as f32,
        })
    }

    /// A note with zero deviation.
    pub const fn new(pitch_class: PitchClass, octave: i32) -> Note {
        Note {
            pitch_class,
            octave,
            cents_deviation: 0.0,
        }
    }

    /// MIDI note number of the nearest equal-tempered pitch.
    pub const fn midi(&self) -> i32 {
        (self.octave + 1) * 12 + self.pitch_class.semitone() as i32
    }

    /// Equal-tempered frequency of this note, ignoring the deviation.
    pub fn frequency(&self) -> f32 {
        (A4_FREQUENCY * 2f64.powf((self.midi() - A4_MIDI) as f64 / 12.0)) as f32
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.pitch_class, self.octave)
    }
}

/// Unrounded semitone distance of `freq` from A4.
fn semitones_from_a4(freq: f64) -> f64 {
    12.0 * (freq / A4_FREQUENCY).log2()
}

/// Calculates the deviation from a target frequency in cents.
///
/// Positive values are sharp, negative values flat.
pub fn cents_between(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}
