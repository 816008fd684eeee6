use crate::fix::{run, FixOptions};
use rekey_common::musicxml;
use rekey_common::score::{MeasureEvent, Score};
use std::fs;
use std::path::PathBuf;

// Three measures, with a six-sharp signature arriving in measure 2.
const SCORE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<score-partwise version="3.1">
  <part-list>
    <score-part id="P1"><part-name>Voice</part-name></score-part>
  </part-list>
  <part id="P1">
    <measure number="1">
      <attributes>
        <divisions>4</divisions>
        <key><fifths>0</fifths></key>
        <time><beats>4</beats><beat-type>4</beat-type></time>
      </attributes>
      <note><pitch><step>G</step><octave>4</octave></pitch><duration>4</duration><type>quarter</type></note>
    </measure>
    <measure number="2">
      <attributes><key><fifths>6</fifths></key></attributes>
      <note><pitch><step>F</step><alter>1</alter><octave>4</octave></pitch><duration>4</duration><type>quarter</type></note>
    </measure>
    <measure number="3">
      <note><pitch><step>B</step><octave>4</octave></pitch><duration>4</duration><type>quarter</type></note>
    </measure>
  </part>
</score-partwise>
"#;

fn keys_of(score: &Score) -> Vec<i8> {
    score.parts[0]
        .measures
        .iter()
        .flat_map(|m| &m.events)
        .filter_map(|e| match e {
            MeasureEvent::Attributes(a) => a.key.map(|k| k.fifths),
            _ => None,
        })
        .collect()
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

fn options(input: PathBuf) -> FixOptions {
    FixOptions {
        input,
        output: None,
        start_measure: None,
        threshold_sharps: 5,
        replacement_fifths: -4,
        shift: -1,
        lyrics: None,
        report_json: None,
    }
}

#[test]
fn test_fix_auto_detect() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("score.musicxml");
    fs::write(&input, SCORE)?;
    let lyrics = tmp.path().join("lyrics.txt");
    fs::write(&lyrics, "It is\nwell with my\n")?;
    let report_json = tmp.path().join("report.json");

    run(FixOptions {
        lyrics: Some(lyrics),
        report_json: Some(report_json.clone()),
        ..options(input)
    })?;

    // Default output path is derived from the input.
    let fixed = musicxml::read_score_file(tmp.path().join("score.fixed.musicxml"))?;
    assert_eq!(keys_of(&fixed), vec![0, -4]);
    assert_eq!(pitches_of(&fixed), vec!["G4", "F4", "Bb4"]);

    // Three notes, five syllables: the first three attach, in order.
    let lyrics: Vec<Option<String>> = fixed.parts[0]
        .measures
        .iter()
        .flat_map(|m| &m.events)
        .filter_map(|e| match e {
            MeasureEvent::Note(n) => Some(n.lyric.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        lyrics,
        vec![
            Some("It".to_string()),
            Some("is".to_string()),
            Some("well".to_string())
        ]
    );

    let report: serde_json::Value = serde_json::from_str(&fs::read_to_string(report_json)?)?;
    assert_eq!(report["parts"][0]["part"], "P1");
    assert_eq!(report["parts"][0]["key_signatures_replaced"], 1);
    assert_eq!(report["parts"][0]["measures_transposed"], 2);
    Ok(())
}

#[test]
fn test_fix_from_start_measure() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("score.musicxml");
    fs::write(&input, SCORE)?;
    let output = tmp.path().join("out.musicxml");

    run(FixOptions {
        output: Some(output.clone()),
        start_measure: Some(2),
        ..options(input)
    })?;

    let fixed = musicxml::read_score_file(&output)?;
    // Measure 1 untouched; the six-sharp signature in measure 2 moves along
    // the circle of fifths to one flat instead of being replaced.
    assert_eq!(keys_of(&fixed), vec![0, -1]);
    assert_eq!(pitches_of(&fixed), vec!["G4", "F4", "Bb4"]);
    Ok(())
}

#[test]
fn test_fix_missing_input() {
    let result = run(options(PathBuf::from("/nonexistent/score.musicxml")));
    assert!(result.is_err());
}

#[test]
fn test_fix_output_reparses_as_noop() -> anyhow::Result<()> {
    // Running fix twice must not shift anything further.
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("score.musicxml");
    fs::write(&input, SCORE)?;
    let once = tmp.path().join("once.musicxml");
    let twice = tmp.path().join("twice.musicxml");

    run(FixOptions {
        output: Some(once.clone()),
        ..options(input)
    })?;
    run(FixOptions {
        output: Some(twice.clone()),
        ..options(once.clone())
    })?;

    assert_eq!(
        musicxml::read_score_file(&once)?,
        musicxml::read_score_file(&twice)?
    );
    Ok(())
}
