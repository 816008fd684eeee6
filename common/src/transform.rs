// Score transforms: key-change removal, fixed-point transposition, lyric
// overlay, and page combination.
//
// Every transform builds a new Score from the input rather than mutating in
// place. The "in modulation" state is an explicit fold accumulator threaded
// through the measures of one part, which makes its monotonic
// once-triggered-stays-triggered semantics a local, testable invariant
// instead of a captured mutable. Rerunning remove_key_change on its own
// output is a no-op: the qualifying key signatures are gone after the first
// pass, so nothing triggers again.

use crate::pitch::Spelling;
use crate::score::{KeySignature, Measure, MeasureEvent, Part, Score};
use anyhow::bail;
use serde::Serialize;
use std::fmt;
use std::fmt::{Display, Formatter};


/// Configuration for detecting and rewriting a modulation.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModulationFix {
    /// A key signature with at least this many sharps marks the modulation.
    pub threshold_sharps: i8,
    /// What qualifying key signatures are replaced with.
    pub replacement: KeySignature,
    /// Signed semitone shift applied to pitches in the modulated region.
    pub semitone_shift: i32,
}

impl Default for ModulationFix {
    /// The observed defaults: 5+ sharps becomes four flats, pitches drop a
    /// semitone.
    fn default() -> Self {
        Self {
            threshold_sharps: 5,
            replacement: KeySignature::new(-4),
            semitone_shift: -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartReport {
    pub part: String,
    pub key_signatures_replaced: usize,
    pub measures_transposed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformReport {
    pub parts: Vec<PartReport>,
}

impl TransformReport {
    pub fn total_replaced(&self) -> usize {
        self.parts.iter().map(|p| p.key_signatures_replaced).sum()
    }

    pub fn total_transposed(&self) -> usize {
        self.parts.iter().map(|p| p.measures_transposed).sum()
    }
}

impl Display for TransformReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "part {} ({}): replaced {} key signature(s), transposed {} measure(s)",
                i + 1,
                part.part,
                part.key_signatures_replaced,
                part.measures_transposed
            )?;
        }
        Ok(())
    }
}

/// Accumulator for one part's walk. `in_modulation` never goes back to false
/// within a part; a later low-sharp key signature does not clear it.
struct PartFold {
    in_modulation: bool,
    replaced: usize,
    transposed: usize,
}

/// Remove a key change: walk each part's measures in stored order, replace
/// every key signature at or above the sharp threshold, and shift every
/// note and chord pitch from the trigger measure onward.
pub fn remove_key_change(score: &Score, fix: &ModulationFix) -> (Score, TransformReport) {
    let spelling = Spelling::for_fifths(fix.replacement.fifths);
    let mut report = TransformReport::default();
    let parts = score
        .parts
        .iter()
        .map(|part| {
            let mut fold = PartFold {
                in_modulation: false,
                replaced: 0,
                transposed: 0,
            };
            let measures = part
                .measures
                .iter()
                .map(|measure| fix_measure(measure, fix, spelling, &mut fold))
                .collect();
            report.parts.push(PartReport {
                part: part.id.clone(),
                key_signatures_replaced: fold.replaced,
                measures_transposed: fold.transposed,
            });
            Part {
                id: part.id.clone(),
                name: part.name.clone(),
                measures,
            }
        })
        .collect();
    (Score { parts }, report)
}

fn fix_measure(
    measure: &Measure,
    fix: &ModulationFix,
    spelling: Spelling,
    fold: &mut PartFold,
) -> Measure {
    // First pass: rewrite qualifying key signatures. The trigger may sit
    // anywhere in the measure, but the whole measure is transposed once
    // triggered, so signature handling happens before any pitch work.
    let mut events: Vec<MeasureEvent> = measure
        .events
        .iter()
        .map(|event| match event {
            MeasureEvent::Attributes(a) => {
                let mut a = a.clone();
                if let Some(key) = a.key {
                    if key.sharps() >= fix.threshold_sharps {
                        a.key = Some(fix.replacement);
                        fold.in_modulation = true;
                        fold.replaced += 1;
                    }
                }
                MeasureEvent::Attributes(a)
            }
            other => other.clone(),
        })
        .collect();

    if fold.in_modulation {
        for event in &mut events {
            shift_event(event, fix.semitone_shift, spelling);
        }
        fold.transposed += 1;
    }

    Measure {
        number: measure.number,
        events,
    }
}

fn shift_event(event: &mut MeasureEvent, semitones: i32, spelling: Spelling) {
    match event {
        MeasureEvent::Note(note) => {
            note.pitch = note.pitch.transposed(semitones, spelling);
        }
        MeasureEvent::Chord(chord) => {
            for pitch in &mut chord.pitches {
                *pitch = pitch.transposed(semitones, spelling);
            }
        }
        MeasureEvent::Attributes(_)
        | MeasureEvent::Rest(_)
        | MeasureEvent::Backup(_)
        | MeasureEvent::Forward(_) => {}
    }
}

/// Transpose every measure numbered `start_measure` or higher by the given
/// shift, moving key signatures along the circle of fifths instead of
/// replacing them. Used when the operator knows where the key change sits.
pub fn transpose_from_measure(
    score: &Score,
    start_measure: i32,
    semitone_shift: i32,
) -> (Score, TransformReport) {
    let fallback = if semitone_shift < 0 {
        Spelling::Flats
    } else {
        Spelling::Sharps
    };
    let mut report = TransformReport::default();
    let parts = score
        .parts
        .iter()
        .map(|part| {
            let mut replaced = 0usize;
            let mut transposed = 0usize;
            // The prevailing key, after its own transposition when in range,
            // decides how shifted pitches are spelled.
            let mut current_key: Option<KeySignature> = None;
            let measures = part
                .measures
                .iter()
                .map(|measure| {
                    let in_range = measure.number >= start_measure;
                    let mut events: Vec<MeasureEvent> = measure
                        .events
                        .iter()
                        .map(|event| match event {
                            MeasureEvent::Attributes(a) => {
                                let mut a = a.clone();
                                if let Some(key) = a.key {
                                    let key = if in_range {
                                        replaced += 1;
                                        key.transposed(semitone_shift)
                                    } else {
                                        key
                                    };
                                    a.key = Some(key);
                                    current_key = Some(key);
                                }
                                MeasureEvent::Attributes(a)
                            }
                            other => other.clone(),
                        })
                        .collect();
                    if in_range {
                        let spelling = current_key
                            .map(|k| Spelling::for_fifths(k.fifths))
                            .unwrap_or(fallback);
                        for event in &mut events {
                            shift_event(event, semitone_shift, spelling);
                        }
                        transposed += 1;
                    }
                    Measure {
                        number: measure.number,
                        events,
                    }
                })
                .collect();
            report.parts.push(PartReport {
                part: part.id.clone(),
                key_signatures_replaced: replaced,
                measures_transposed: transposed,
            });
            Part {
                id: part.id.clone(),
                name: part.name.clone(),
                measures,
            }
        })
        .collect();
    (Score { parts }, report)
}

/// Overlay syllables onto the first part's single notes, in traversal order.
/// Chords and rests are skipped; syllables beyond the note count are
/// silently dropped. Returns the transformed score and how many syllables
/// were attached.
pub fn add_lyrics(score: &Score, syllables: &[String]) -> (Score, usize) {
    let mut result = score.clone();
    let mut next = 0usize;
    if let Some(part) = result.parts.first_mut() {
        'outer: for measure in &mut part.measures {
            for event in &mut measure.events {
                if next >= syllables.len() {
                    break 'outer;
                }
                if let MeasureEvent::Note(note) = event {
                    note.lyric = Some(syllables[next].clone());
                    next += 1;
                }
            }
        }
    }
    (result, next)
}

/// Concatenate per-page scores into one: each later page's measures are
/// appended onto the matching part index of the first page. Part alignment
/// across pages is positional; parts a later page has beyond the first
/// page's count are dropped. An empty page list is an error.
pub fn combine_pages(pages: Vec<Score>) -> anyhow::Result<Score> {
    let mut pages = pages.into_iter();
    let Some(mut combined) = pages.next() else {
        bail!("no scores to combine");
    };
    for page in pages {
        for (idx, part) in page.parts.into_iter().enumerate() {
            if let Some(target) = combined.parts.get_mut(idx) {
                target.measures.extend(part.measures);
            }
        }
    }
    Ok(combined)
}
