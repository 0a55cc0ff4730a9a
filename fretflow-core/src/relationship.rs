//! Harmonic relationship between a detected pitch class and the target.
//!
//! Only the ascending interval `(detected - target) mod 12` is classified.
//! A major third below the target is interval 8 and a fifth below is 5, so
//! both count as [`Relationship::Unrelated`]. Octaves are ignored.

use crate::tuning::PitchClass;

/// Classification of a detected pitch class against the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relationship {
    /// Same pitch class as the target.
    Unison,
    /// Four semitones above the target.
    MajorThird,
    /// Seven semitones above the target.
    PerfectFifth,
    Unrelated,
}

/// Relationship for each ascending interval in semitones.
#[rustfmt::skip]
const BY_INTERVAL: [Relationship; 12] = {
    use Relationship::*;
    [
        Unison, Unrelated, Unrelated, Unrelated, MajorThird, Unrelated,
        Unrelated, PerfectFifth, Unrelated, Unrelated, Unrelated, Unrelated,
    ]
};

impl Relationship {
    /// Classifies `detected` relative to `target`.
    pub const fn between(detected: PitchClass, target: PitchClass) -> Relationship {
        BY_INTERVAL[interval(detected, target) as usize]
    }

    /// Ascending interval in semitones that this relationship stands for,
    /// `None` for [`Relationship::Unrelated`].
    pub const fn semitones(self) -> Option<u8> {
        match self {
            Relationship::Unison => Some(0),
            Relationship::MajorThird => Some(4),
            Relationship::PerfectFifth => Some(7),
            Relationship::Unrelated => None,
        }
    }
}

/// Ascending pitch-class interval from `target` up to `detected` (0..=11).
pub const fn interval(detected: PitchClass, target: PitchClass) -> u8 {
    (detected.semitone() as i32 - target.semitone() as i32).rem_euclid(12) as u8
}

/// The major third and perfect fifth above `root`.
pub const fn related_pitch_classes(root: PitchClass) -> (PitchClass, PitchClass) {
    (root.transpose(4), root.transpose(7))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::Note;

    #[test]
    fn classifies_against_e() {
        let target = PitchClass::E;
        assert_eq!(Relationship::between(PitchClass::E, target), Relationship::Unison);
        assert_eq!(Relationship::between(PitchClass::Gs, target), Relationship::MajorThird);
        assert_eq!(Relationship::between(PitchClass::B, target), Relationship::PerfectFifth);
        assert_eq!(Relationship::between(PitchClass::F, target), Relationship::Unrelated);
    }

    #[test]
    fn only_ascending_intervals_relate() {
        // C is a major third below E, A is a fifth below E.
        assert_eq!(interval(PitchClass::C, PitchClass::E), 8);
        assert_eq!(Relationship::between(PitchClass::C, PitchClass::E), Relationship::Unrelated);
        assert_eq!(interval(PitchClass::A, PitchClass::E), 5);
        assert_eq!(Relationship::between(PitchClass::A, PitchClass::E), Relationship::Unrelated);
    }

    #[test]
    fn octave_shift_does_not_change_classification() {
        let target = PitchClass::A;
        let same_octave = Note::from_frequency(554.37).unwrap();
        let two_up = Note::from_frequency(554.37 * 4.0).unwrap();
        assert_eq!(same_octave.octave + 2, two_up.octave);
        assert_eq!(
            Relationship::between(same_octave.pitch_class, target),
            Relationship::between(two_up.pitch_class, target)
        );
        assert_eq!(
            Relationship::between(two_up.pitch_class, target),
            Relationship::MajorThird
        );
    }

    #[test]
    fn table_agrees_with_semitones() {
        for target in PitchClass::ALL {
            for detected in PitchClass::ALL {
                let relationship = Relationship::between(detected, target);
                match relationship.semitones() {
                    Some(semitones) => assert_eq!(interval(detected, target), semitones),
                    None => assert!(![0, 4, 7].contains(&interval(detected, target))),
                }
            }
        }
    }

    #[test]
    fn related_pitch_classes_of_c_and_a() {
        assert_eq!(related_pitch_classes(PitchClass::C), (PitchClass::E, PitchClass::G));
        assert_eq!(related_pitch_classes(PitchClass::A), (PitchClass::Cs, PitchClass::E));
    }
}
