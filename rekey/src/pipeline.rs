// The full scanned-PDF chain, run strictly in sequence: rasterize the PDF,
// recognize each page, combine the per-page scores, remove the key change,
// overlay lyrics, render a new PDF. A page whose recognition fails is
// dropped from the combined score, but every drop is reported at the end so
// a shorter output never passes silently.

use crate::fix;
use crate::tools::{self, Recognition};
use anyhow::{bail, Context};
use clap::Parser;
use rekey_common::musicxml;
use rekey_common::score::KeySignature;
use rekey_common::transform::{self, ModulationFix};
use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs};

#[cfg(test)]
mod tests;

#[derive(Parser, Debug)]
pub struct PipelineOptions {
    /// Input scanned PDF
    pub input: PathBuf,
    /// Output PDF; defaults to the input with a .fixed.pdf suffix
    pub output: Option<PathBuf>,
    /// Working directory for intermediate files (created if missing)
    #[arg(long)]
    pub work_dir: Option<PathBuf>,
    /// Rasterization resolution
    #[arg(long, default_value_t = 300)]
    pub dpi: u32,
    /// Leading pages to skip before recognition (cover sheets)
    #[arg(long, default_value_t = 1)]
    pub cover_pages: usize,
    /// File of whitespace-separated syllables to overlay on the melody part
    #[arg(long)]
    pub lyrics: Option<PathBuf>,
    /// Minimum sharp count for a key signature to count as the modulation
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(i8).range(1..))]
    pub threshold_sharps: i8,
    /// Key signature (in fifths) substituted for qualifying signatures
    #[arg(long, default_value_t = -4, allow_hyphen_values = true)]
    pub replacement_fifths: i8,
    /// Semitone shift applied to pitches in the modulated region
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    pub shift: i32,
    /// Seconds allowed per page for optical recognition
    #[arg(long, default_value_t = 600)]
    pub omr_timeout: u64,
    /// Seconds allowed for the final render
    #[arg(long, default_value_t = 120)]
    pub render_timeout: u64,
    /// Rasterizer executable
    #[arg(long, default_value = "pdftoppm")]
    pub pdftoppm_bin: String,
    /// Optical recognizer executable
    #[arg(long, default_value = "oemer")]
    pub omr_bin: String,
    /// Renderer executable
    #[arg(long, default_value = "musescore3")]
    pub musescore_bin: String,
}

struct PageFailure {
    page: usize,
    reason: String,
}

pub fn run(options: PipelineOptions) -> anyhow::Result<()> {
    if !options.input.exists() {
        bail!("input file not found: {}", options.input.display());
    }
    let work_dir = options
        .work_dir
        .clone()
        .unwrap_or_else(|| env::temp_dir().join("rekey-work"));
    fs::create_dir_all(&work_dir)
        .with_context(|| format!("cannot create {}", work_dir.display()))?;

    log::info!(
        "[1/5] rasterizing {} at {} dpi",
        options.input.display(),
        options.dpi
    );
    let images = tools::rasterize_pdf(
        &options.pdftoppm_bin,
        &options.input,
        &work_dir.join("images"),
        options.dpi,
    )?;
    if images.is_empty() {
        bail!("rasterization produced no page images");
    }
    log::info!("  {} page(s)", images.len());
    if options.cover_pages >= images.len() {
        bail!(
            "nothing left to recognize after skipping {} cover page(s) of {}",
            options.cover_pages,
            images.len()
        );
    }
    let pages = &images[options.cover_pages..];

    log::info!("[2/5] recognizing {} page(s)", pages.len());
    let omr_timeout = Duration::from_secs(options.omr_timeout);
    let musicxml_dir = work_dir.join("musicxml");
    let mut recognized: Vec<(usize, PathBuf)> = Vec::new();
    let mut failures: Vec<PageFailure> = Vec::new();
    for (idx, image) in pages.iter().enumerate() {
        let page = options.cover_pages + idx + 1;
        let page_dir = musicxml_dir.join(format!("page_{page:02}"));
        match tools::recognize_page(&options.omr_bin, image, &page_dir, omr_timeout)? {
            Recognition::Score(path) => {
                log::info!("  page {page}: {}", path.display());
                recognized.push((page, path));
            }
            Recognition::Failed(reason) => {
                log::warn!("  page {page}: recognition failed: {reason}");
                failures.push(PageFailure { page, reason });
            }
        }
    }
    if recognized.is_empty() {
        bail!("optical recognition produced no scores");
    }

    log::info!("[3/5] combining {} page score(s)", recognized.len());
    let mut page_scores = Vec::new();
    for (page, path) in &recognized {
        let score = musicxml::read_score_file(path).with_context(|| format!("page {page}"))?;
        page_scores.push(score);
    }
    let combined = transform::combine_pages(page_scores)?;
    log::info!(
        "  {} part(s), {} measure(s)",
        combined.parts.len(),
        combined.measure_count()
    );

    log::info!("[4/5] removing the key change");
    let fix_config = ModulationFix {
        threshold_sharps: options.threshold_sharps,
        replacement: KeySignature::new(options.replacement_fifths),
        semitone_shift: options.shift,
    };
    let (mut fixed, report) = transform::remove_key_change(&combined, &fix_config);
    for line in report.to_string().lines() {
        log::info!("  {line}");
    }

    if let Some(lyrics_path) = &options.lyrics {
        let syllables = fix::load_syllables(lyrics_path)?;
        let (with_lyrics, attached) = transform::add_lyrics(&fixed, &syllables);
        fixed = with_lyrics;
        log::info!("  attached {attached} of {} syllable(s)", syllables.len());
    }

    let final_xml = work_dir.join("final.musicxml");
    musicxml::write_score_file(&fixed, &final_xml)?;

    let output = options
        .output
        .clone()
        .unwrap_or_else(|| fix::default_output(&options.input, "fixed.pdf"));
    log::info!("[5/5] rendering {}", output.display());
    tools::render_pdf(
        &options.musescore_bin,
        &final_xml,
        &output,
        Duration::from_secs(options.render_timeout),
    )?;

    println!("wrote {}", output.display());
    report_failures(&failures);
    Ok(())
}

/// A page that failed recognition means measures missing from the output;
/// say so instead of letting a shorter score pass silently.
fn report_failures(failures: &[PageFailure]) {
    if failures.is_empty() {
        return;
    }
    println!(
        "{} page(s) failed recognition and are missing from the output:",
        failures.len()
    );
    for f in failures {
        println!("  page {}: {}", f.page, f.reason);
    }
}
