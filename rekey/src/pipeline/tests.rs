use crate::pipeline::{run, PipelineOptions};
use rekey_common::musicxml;
use rekey_common::score::{MeasureEvent, Score};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

// What the stub recognizer "reads" off every page: one part, two measures,
// the second modulating to six sharps.
const PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<score-partwise version="3.1">
  <part-list>
    <score-part id="P1"><part-name>Voice</part-name></score-part>
  </part-list>
  <part id="P1">
    <measure number="1">
      <attributes>
        <divisions>4</divisions>
        <key><fifths>0</fifths></key>
      </attributes>
      <note><pitch><step>G</step><octave>4</octave></pitch><duration>4</duration></note>
    </measure>
    <measure number="2">
      <attributes><key><fifths>6</fifths></key></attributes>
      <note><pitch><step>F</step><alter>1</alter><octave>4</octave></pitch><duration>4</duration></note>
    </measure>
  </part>
</score-partwise>
"#;

fn write_stub(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path.to_string_lossy().into_owned()
}

/// Fake pdftoppm: the last argument is the output prefix; produce three
/// numbered page images.
fn rasterizer_stub(dir: &Path) -> String {
    write_stub(
        dir,
        "fake-pdftoppm",
        "#!/bin/sh\n\
         for last in \"$@\"; do :; done\n\
         : > \"${last}-1.png\"\n\
         : > \"${last}-2.png\"\n\
         : > \"${last}-3.png\"\n",
    )
}

/// Fake oemer: writes a fixed MusicXML file into the -o directory, except
/// for page 2, which fails like a bad scan.
fn recognizer_stub(dir: &Path, page_xml: &str) -> String {
    let body = format!(
        "#!/bin/sh\n\
         case \"$1\" in\n\
           *page-2.png) echo 'no staff lines found' >&2; exit 1 ;;\n\
         esac\n\
         cat > \"$3/page.musicxml\" <<'XMLEOF'\n\
         {page_xml}\n\
         XMLEOF\n"
    );
    write_stub(dir, "fake-oemer", &body)
}

/// Fake MuseScore: checks its input and writes a PDF-shaped file.
fn renderer_stub(dir: &Path) -> String {
    write_stub(
        dir,
        "fake-musescore",
        "#!/bin/sh\n\
         [ -f \"$1\" ] || { echo 'no input score' >&2; exit 1; }\n\
         printf '%%PDF-1.4 stub' > \"$3\"\n",
    )
}

/// Fake oemer that always fails.
fn failing_recognizer_stub(dir: &Path) -> String {
    write_stub(
        dir,
        "fake-oemer-broken",
        "#!/bin/sh\necho 'model not loaded' >&2\nexit 2\n",
    )
}

fn options(dir: &Path, input: PathBuf, work_dir: PathBuf) -> PipelineOptions {
    PipelineOptions {
        input,
        output: Some(dir.join("out.pdf")),
        work_dir: Some(work_dir),
        dpi: 72,
        cover_pages: 1,
        lyrics: None,
        threshold_sharps: 5,
        replacement_fifths: -4,
        shift: -1,
        omr_timeout: 30,
        render_timeout: 30,
        pdftoppm_bin: rasterizer_stub(dir),
        omr_bin: recognizer_stub(dir, PAGE),
        musescore_bin: renderer_stub(dir),
    }
}

fn pitches_of(score: &Score) -> Vec<String> {
    score.parts[0]
        .measures
        .iter()
        .flat_map(|m| &m.events)
        .filter_map(|e| match e {
            MeasureEvent::Note(n) => Some(n.pitch.to_string()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_pipeline_with_stub_tools() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = tmp.path();
    let input = dir.join("input.pdf");
    fs::write(&input, b"%PDF-1.4 fake scan")?;
    let work_dir = dir.join("work");

    run(options(dir, input, work_dir.clone()))?;

    assert!(dir.join("out.pdf").exists());

    // Page 1 is the cover, page 2 fails recognition, so the combined score
    // is page 3 alone: two measures with the modulation fixed.
    let fixed = musicxml::read_score_file(work_dir.join("final.musicxml"))?;
    assert_eq!(fixed.parts.len(), 1);
    assert_eq!(fixed.parts[0].measures.len(), 2);
    let keys: Vec<i8> = fixed.parts[0]
        .measures
        .iter()
        .flat_map(|m| &m.events)
        .filter_map(|e| match e {
            MeasureEvent::Attributes(a) => a.key.map(|k| k.fifths),
            _ => None,
        })
        .collect();
    assert_eq!(keys, vec![0, -4]);
    assert_eq!(pitches_of(&fixed), vec!["G4", "F4"]);
    Ok(())
}

#[test]
fn test_pipeline_missing_input() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    let result = run(options(
        dir,
        dir.join("does-not-exist.pdf"),
        dir.join("work"),
    ));
    assert!(result.is_err());
}

#[test]
fn test_pipeline_all_pages_failing_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    let input = dir.join("input.pdf");
    fs::write(&input, b"%PDF-1.4 fake scan").unwrap();
    let mut options = options(dir, input, dir.join("work"));
    options.omr_bin = failing_recognizer_stub(dir);
    let err = run(options).unwrap_err();
    assert!(err.to_string().contains("no scores"), "{err:#}");
}

#[test]
fn test_pipeline_cover_skip_exhausts_pages() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    let input = dir.join("input.pdf");
    fs::write(&input, b"%PDF-1.4 fake scan").unwrap();
    let mut options = options(dir, input, dir.join("work"));
    options.cover_pages = 3;
    assert!(run(options).is_err());
}
