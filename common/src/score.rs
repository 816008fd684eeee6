// The score model: the representation every transform operates on.
//
// A score is an ordered list of parts; part order is stable and meaningful
// (part 0 is the melody/vocal line by convention). Each part is an ordered
// list of measures, and each measure keeps its events in document order,
// including attribute blocks, so that a score can be read, transformed, and
// written back without reordering anything. Measures are identified by a
// number that is not assumed to be contiguous or zero-based; traversal is
// always stored order.

use crate::pitch::Pitch;
use serde::Serialize;
use std::fmt;
use std::fmt::{Display, Formatter};

/// A key signature expressed as a signed count of sharps (positive) or flats
/// (negative) relative to no accidentals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeySignature {
    pub fifths: i8,
}

impl KeySignature {
    pub fn new(fifths: i8) -> Self {
        Self { fifths }
    }

    pub fn sharps(&self) -> i8 {
        self.fifths
    }

    /// Shift the tonic by a signed number of semitones. One semitone moves
    /// the tonic seven positions on the circle of fifths; the result is
    /// reduced into [-6, 6], enharmonically simplifying theoretical keys.
    pub fn transposed(&self, semitones: i32) -> Self {
        let mut fifths = (self.fifths as i32 + 7 * semitones).rem_euclid(12);
        if fifths > 6 {
            fifths -= 12;
        }
        Self {
            fifths: fifths as i8,
        }
    }
}

impl Display for KeySignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.fifths {
            0 => write!(f, "no accidentals"),
            1 => write!(f, "1 sharp"),
            n if n > 0 => write!(f, "{n} sharps"),
            -1 => write!(f, "1 flat"),
            n => write!(f, "{} flats", -n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeSignature {
    pub beats: u32,
    pub beat_type: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Clef {
    pub sign: String,
    pub line: Option<u8>,
    /// Staff number, for multi-staff parts.
    pub number: Option<u8>,
}

/// One `<attributes>` block. A measure may carry zero or more of these, and
/// each may or may not set a key signature.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Attributes {
    pub divisions: Option<u32>,
    pub key: Option<KeySignature>,
    pub time: Option<TimeSignature>,
    pub staves: Option<u8>,
    pub clefs: Vec<Clef>,
}

/// A single sounded note, optionally carrying one lyric syllable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Note {
    pub pitch: Pitch,
    pub duration: u32,
    pub voice: Option<String>,
    pub note_type: Option<String>,
    pub dots: u8,
    pub staff: Option<u8>,
    pub lyric: Option<String>,
}

/// Simultaneous pitches sharing one duration. Chords never carry lyrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chord {
    pub pitches: Vec<Pitch>,
    pub duration: u32,
    pub voice: Option<String>,
    pub note_type: Option<String>,
    pub dots: u8,
    pub staff: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rest {
    pub duration: u32,
    pub voice: Option<String>,
    pub note_type: Option<String>,
    pub dots: u8,
    pub staff: Option<u8>,
}

/// One event within a measure, in document order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MeasureEvent {
    Attributes(Attributes),
    Note(Note),
    Chord(Chord),
    Rest(Rest),
    /// Cursor move backward by a duration (multi-staff writing).
    Backup(u32),
    /// Cursor move forward by a duration.
    Forward(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measure {
    pub number: i32,
    pub events: Vec<MeasureEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Part {
    pub id: String,
    pub name: Option<String>,
    pub measures: Vec<Measure>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Score {
    pub parts: Vec<Part>,
}

impl Score {
    /// Total measures across all parts, for progress reporting.
    pub fn measure_count(&self) -> usize {
        self.parts.iter().map(|p| p.measures.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_signature_transposed() {
        // F# major (6 sharps) down a semitone is F major (1 flat).
        assert_eq!(KeySignature::new(6).transposed(-1).fifths, -1);
        // C major down a semitone is B major (5 sharps).
        assert_eq!(KeySignature::new(0).transposed(-1).fifths, 5);
        // Ab major (4 flats) down a semitone is G major.
        assert_eq!(KeySignature::new(-4).transposed(-1).fifths, 1);
        // Up a semitone from C is Db major (5 flats).
        assert_eq!(KeySignature::new(0).transposed(1).fifths, -5);
        // A whole-octave shift is the identity.
        assert_eq!(KeySignature::new(3).transposed(12).fifths, 3);
        assert_eq!(KeySignature::new(3).transposed(0).fifths, 3);
        // C# major (7 sharps) down a semitone simplifies to C major.
        assert_eq!(KeySignature::new(7).transposed(-1).fifths, 0);
    }

    #[test]
    fn test_key_signature_display() {
        assert_eq!(KeySignature::new(0).to_string(), "no accidentals");
        assert_eq!(KeySignature::new(1).to_string(), "1 sharp");
        assert_eq!(KeySignature::new(6).to_string(), "6 sharps");
        assert_eq!(KeySignature::new(-4).to_string(), "4 flats");
    }
}
