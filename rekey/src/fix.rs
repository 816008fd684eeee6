use anyhow::Context;
use clap::Parser;
use rekey_common::musicxml;
use rekey_common::score::KeySignature;
use rekey_common::transform::{self, ModulationFix, TransformReport};
use std::fs;
use std::path::{Path, PathBuf};

#[cfg(test)]
mod tests;

#[derive(Parser, Debug)]
pub struct FixOptions {
    /// Input MusicXML score
    pub input: PathBuf,
    /// Output path; defaults to the input with a .fixed.musicxml suffix
    pub output: Option<PathBuf>,
    /// Measure number where the key change starts. When given, every measure
    /// from this number onward is transposed and its key signatures shifted
    /// along the circle of fifths; otherwise over-sharped key signatures are
    /// detected automatically and replaced.
    pub start_measure: Option<i32>,
    /// Minimum sharp count for a key signature to count as the modulation
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(i8).range(1..))]
    pub threshold_sharps: i8,
    /// Key signature (in fifths) substituted for qualifying signatures
    #[arg(long, default_value_t = -4, allow_hyphen_values = true)]
    pub replacement_fifths: i8,
    /// Semitone shift applied to pitches in the modulated region
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    pub shift: i32,
    /// File of whitespace-separated syllables to overlay on the melody part
    #[arg(long)]
    pub lyrics: Option<PathBuf>,
    /// Write the per-part transform report as JSON
    #[arg(long)]
    pub report_json: Option<PathBuf>,
}

pub fn run(options: FixOptions) -> anyhow::Result<()> {
    let score = musicxml::read_score_file(&options.input)?;
    log::info!(
        "loaded '{}': {} part(s), {} measure(s)",
        options.input.display(),
        score.parts.len(),
        score.measure_count()
    );

    let (mut fixed, report) = match options.start_measure {
        Some(start) => {
            log::info!(
                "transposing from measure {start} onward by {} semitone(s)",
                options.shift
            );
            transform::transpose_from_measure(&score, start, options.shift)
        }
        None => {
            let fix = ModulationFix {
                threshold_sharps: options.threshold_sharps,
                replacement: KeySignature::new(options.replacement_fifths),
                semitone_shift: options.shift,
            };
            log::info!(
                "replacing signatures of {}+ sharps with {} and shifting {} semitone(s)",
                fix.threshold_sharps,
                fix.replacement,
                fix.semitone_shift
            );
            transform::remove_key_change(&score, &fix)
        }
    };
    for line in report.to_string().lines() {
        log::info!("{line}");
    }

    if let Some(lyrics_path) = &options.lyrics {
        let syllables = load_syllables(lyrics_path)?;
        let (with_lyrics, attached) = transform::add_lyrics(&fixed, &syllables);
        fixed = with_lyrics;
        log::info!("attached {attached} of {} syllable(s)", syllables.len());
    }

    let output = options
        .output
        .clone()
        .unwrap_or_else(|| default_output(&options.input, "fixed.musicxml"));
    musicxml::write_score_file(&fixed, &output)?;
    if let Some(report_path) = &options.report_json {
        write_report(&report, report_path)?;
    }
    println!("wrote {}", output.display());
    Ok(())
}

/// Read a lyric file: syllables separated by any whitespace, applied to the
/// melody notes strictly in order.
pub(crate) fn load_syllables(path: &Path) -> anyhow::Result<Vec<String>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    Ok(text.split_whitespace().map(|s| s.to_string()).collect())
}

pub(crate) fn default_output(input: &Path, suffix: &str) -> PathBuf {
    input.with_extension(suffix)
}

pub(crate) fn write_report(report: &TransformReport, path: &Path) -> anyhow::Result<()> {
    let file =
        fs::File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}
