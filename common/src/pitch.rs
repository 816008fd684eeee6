use anyhow::bail;
use serde::Serialize;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Letter name of a spelled pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Step {
    C,
    D,
    E,
    F,
    G,
    A,
    B,
}

impl Step {
    /// Semitones above C within one octave.
    pub fn semitones(self) -> i32 {
        match self {
            Step::C => 0,
            Step::D => 2,
            Step::E => 4,
            Step::F => 5,
            Step::G => 7,
            Step::A => 9,
            Step::B => 11,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Step::C => 'C',
            Step::D => 'D',
            Step::E => 'E',
            Step::F => 'F',
            Step::G => 'G',
            Step::A => 'A',
            Step::B => 'B',
        }
    }

    pub fn from_letter(c: char) -> Option<Step> {
        match c.to_ascii_uppercase() {
            'C' => Some(Step::C),
            'D' => Some(Step::D),
            'E' => Some(Step::E),
            'F' => Some(Step::F),
            'G' => Some(Step::G),
            'A' => Some(Step::A),
            'B' => Some(Step::B),
            _ => None,
        }
    }
}

/// Which accidental table to use when respelling a transposed pitch. Flat
/// keys want Bb/Eb/Ab spellings; sharp keys want A#/D#/G#.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Spelling {
    Flats,
    Sharps,
}

impl Spelling {
    /// Pick the table matching a key signature's accidental direction.
    pub fn for_fifths(fifths: i8) -> Self {
        if fifths < 0 {
            Spelling::Flats
        } else {
            Spelling::Sharps
        }
    }
}

// (step, alter) for each pitch class 0-11.
const FLAT_NAMES: [(Step, i8); 12] = [
    (Step::C, 0),
    (Step::D, -1),
    (Step::D, 0),
    (Step::E, -1),
    (Step::E, 0),
    (Step::F, 0),
    (Step::G, -1),
    (Step::G, 0),
    (Step::A, -1),
    (Step::A, 0),
    (Step::B, -1),
    (Step::B, 0),
];
const SHARP_NAMES: [(Step, i8); 12] = [
    (Step::C, 0),
    (Step::C, 1),
    (Step::D, 0),
    (Step::D, 1),
    (Step::E, 0),
    (Step::F, 0),
    (Step::F, 1),
    (Step::G, 0),
    (Step::G, 1),
    (Step::A, 0),
    (Step::A, 1),
    (Step::B, 0),
];

/// A spelled pitch: letter, accidental (semitones, flat negative), and
/// scientific octave. C4 is middle C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Pitch {
    pub step: Step,
    pub alter: i8,
    pub octave: i8,
}

impl Pitch {
    pub fn new(step: Step, alter: i8, octave: i8) -> Self {
        Self {
            step,
            alter,
            octave,
        }
    }

    /// Absolute chromatic number, MIDI-aligned (C4 = 60).
    pub fn chromatic(&self) -> i32 {
        (self.octave as i32 + 1) * 12 + self.step.semitones() + self.alter as i32
    }

    /// Spell the given chromatic number using the requested accidental table.
    pub fn from_chromatic(chromatic: i32, spelling: Spelling) -> Self {
        let pc = chromatic.rem_euclid(12) as usize;
        let octave = chromatic.div_euclid(12) - 1;
        let (step, alter) = match spelling {
            Spelling::Flats => FLAT_NAMES[pc],
            Spelling::Sharps => SHARP_NAMES[pc],
        };
        Self {
            step,
            alter,
            octave: octave as i8,
        }
    }

    /// Shift by a signed number of semitones and respell. Total for any pitch
    /// the model can represent; octave changes fall out of the chromatic
    /// arithmetic.
    pub fn transposed(&self, semitones: i32, spelling: Spelling) -> Self {
        Self::from_chromatic(self.chromatic() + semitones, spelling)
    }
}

impl Display for Pitch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.step.letter())?;
        if self.alter < 0 {
            for _ in 0..-self.alter {
                write!(f, "b")?;
            }
        } else {
            for _ in 0..self.alter {
                write!(f, "#")?;
            }
        }
        write!(f, "{}", self.octave)
    }
}

impl FromStr for Pitch {
    type Err = anyhow::Error;

    /// Parse spellings like "C4", "F#5", "Bb3", "Cb-1".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars().peekable();
        let Some(step) = chars.next().and_then(Step::from_letter) else {
            bail!("invalid pitch '{s}': expected a letter A-G");
        };
        let mut alter: i8 = 0;
        while let Some(&c) = chars.peek() {
            match c {
                '#' => alter += 1,
                'b' => alter -= 1,
                _ => break,
            }
            chars.next();
        }
        let rest: String = chars.collect();
        let octave = match rest.parse::<i8>() {
            Ok(o) => o,
            Err(_) => bail!("invalid pitch '{s}': expected an octave number"),
        };
        Ok(Self {
            step,
            alter,
            octave,
        })
    }
}
