// MusicXML subset reader and writer.
//
// MusicXML is the interchange boundary: the optical recognizer produces it
// and the renderer consumes it. Only score-partwise documents are handled,
// and only the elements the score model represents. Everything else
// (directions, barlines, print hints, notations) is skipped on read, since
// recognizer output is noisy and full of elements the transforms never
// touch. The round-trip guarantee is model equivalence, not byte-identical
// XML.

use crate::pitch::{Pitch, Step};
use crate::score::{
    Attributes, Chord, Clef, KeySignature, Measure, MeasureEvent, Note, Part, Rest, Score,
    TimeSignature,
};
use anyhow::{anyhow, bail, Context};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;
use xml::attribute::OwnedAttribute;
use xml::reader::{EventReader, XmlEvent};
use xml::writer::{EmitterConfig, EventWriter, XmlEvent as WriterEvent};


pub fn read_score_file(path: impl AsRef<Path>) -> anyhow::Result<Score> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    read_score(BufReader::new(file)).with_context(|| format!("cannot parse {}", path.display()))
}

pub fn read_score<R: Read>(source: R) -> anyhow::Result<Score> {
    Reader::new(source).read()
}

pub fn write_score_file(score: &Score, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    write_score(score, BufWriter::new(file)).with_context(|| format!("cannot write {}", path.display()))
}

struct Reader<R: Read> {
    parser: EventReader<R>,
    part_names: HashMap<String, String>,
}

/// Everything a single `<note>` element can contribute before chord folding.
struct ParsedNote {
    pitch: Option<Pitch>,
    rest: bool,
    chord: bool,
    duration: u32,
    voice: Option<String>,
    note_type: Option<String>,
    dots: u8,
    staff: Option<u8>,
    lyric: Option<String>,
}

fn attr_value(attributes: &[OwnedAttribute], name: &str) -> Option<String> {
    attributes
        .iter()
        .find(|a| a.name.local_name == name)
        .map(|a| a.value.clone())
}

impl<R: Read> Reader<R> {
    fn new(source: R) -> Self {
        Self {
            parser: EventReader::new(source),
            part_names: HashMap::new(),
        }
    }

    fn read(mut self) -> anyhow::Result<Score> {
        let mut parts = Vec::new();
        let mut saw_root = false;
        loop {
            match self.parser.next()? {
                XmlEvent::StartElement {
                    name, attributes, ..
                } => match name.local_name.as_str() {
                    "score-partwise" => {
                        saw_root = true;
                    }
                    "score-timewise" => {
                        bail!("score-timewise documents are not supported");
                    }
                    "score-part" => {
                        let id = attr_value(&attributes, "id")
                            .ok_or_else(|| anyhow!("score-part without an id attribute"))?;
                        self.parse_score_part(id)?;
                    }
                    "part" => {
                        let id = attr_value(&attributes, "id")
                            .unwrap_or_else(|| format!("P{}", parts.len() + 1));
                        parts.push(self.parse_part(id)?);
                    }
                    // part-list and work/identification containers pass
                    // through; their leaves are skipped individually.
                    "part-list" => {}
                    _ if saw_root => self.skip_element()?,
                    _ => {}
                },
                XmlEvent::EndDocument => break,
                _ => {}
            }
        }
        if !saw_root {
            bail!("not a score-partwise document");
        }
        Ok(Score { parts })
    }

    fn parse_score_part(&mut self, id: String) -> anyhow::Result<()> {
        loop {
            match self.parser.next()? {
                XmlEvent::StartElement { name, .. } => {
                    if name.local_name == "part-name" {
                        let text = self.element_text()?;
                        if !text.is_empty() {
                            self.part_names.insert(id.clone(), text);
                        }
                    } else {
                        self.skip_element()?;
                    }
                }
                XmlEvent::EndElement { name } if name.local_name == "score-part" => break,
                XmlEvent::EndDocument => bail!("unexpected end of document in score-part"),
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_part(&mut self, id: String) -> anyhow::Result<Part> {
        let name = self.part_names.get(&id).cloned();
        let mut measures = Vec::new();
        loop {
            match self.parser.next()? {
                XmlEvent::StartElement {
                    name: el,
                    attributes,
                    ..
                } => {
                    if el.local_name == "measure" {
                        let number = match attr_value(&attributes, "number") {
                            Some(v) => v
                                .parse::<i32>()
                                .map_err(|_| anyhow!("invalid measure number '{v}'"))?,
                            None => (measures.len() + 1) as i32,
                        };
                        measures.push(self.parse_measure(number)?);
                    } else {
                        self.skip_element()?;
                    }
                }
                XmlEvent::EndElement { name: el } if el.local_name == "part" => break,
                XmlEvent::EndDocument => bail!("unexpected end of document in part"),
                _ => {}
            }
        }
        Ok(Part { id, name, measures })
    }

    fn parse_measure(&mut self, number: i32) -> anyhow::Result<Measure> {
        let mut events: Vec<MeasureEvent> = Vec::new();
        loop {
            match self.parser.next()? {
                XmlEvent::StartElement { name, .. } => match name.local_name.as_str() {
                    "attributes" => {
                        events.push(MeasureEvent::Attributes(self.parse_attributes()?));
                    }
                    "note" => {
                        let parsed = self.parse_note()?;
                        self.push_note(&mut events, parsed, number)?;
                    }
                    "backup" => {
                        events.push(MeasureEvent::Backup(self.parse_cursor_move("backup")?));
                    }
                    "forward" => {
                        events.push(MeasureEvent::Forward(self.parse_cursor_move("forward")?));
                    }
                    _ => self.skip_element()?,
                },
                XmlEvent::EndElement { name } if name.local_name == "measure" => break,
                XmlEvent::EndDocument => bail!("unexpected end of document in measure"),
                _ => {}
            }
        }
        Ok(Measure { number, events })
    }

    /// Append a parsed note, folding `<chord/>`-flagged notes into the
    /// preceding note or chord event.
    fn push_note(
        &mut self,
        events: &mut Vec<MeasureEvent>,
        parsed: ParsedNote,
        measure_number: i32,
    ) -> anyhow::Result<()> {
        if parsed.chord {
            if let Some(pitch) = parsed.pitch {
                match events.pop() {
                    Some(MeasureEvent::Note(prev)) => {
                        events.push(MeasureEvent::Chord(Chord {
                            pitches: vec![prev.pitch, pitch],
                            duration: prev.duration,
                            voice: prev.voice,
                            note_type: prev.note_type,
                            dots: prev.dots,
                            staff: prev.staff,
                        }));
                        return Ok(());
                    }
                    Some(MeasureEvent::Chord(mut chord)) => {
                        chord.pitches.push(pitch);
                        events.push(MeasureEvent::Chord(chord));
                        return Ok(());
                    }
                    other => {
                        // A chord flag with nothing to attach to; the
                        // recognizer emits these occasionally. Keep the note.
                        log::warn!(
                            "measure {measure_number}: chord note with no preceding note"
                        );
                        if let Some(ev) = other {
                            events.push(ev);
                        }
                    }
                }
            }
        }
        let event = if parsed.rest {
            MeasureEvent::Rest(Rest {
                duration: parsed.duration,
                voice: parsed.voice,
                note_type: parsed.note_type,
                dots: parsed.dots,
                staff: parsed.staff,
            })
        } else {
            let pitch = parsed
                .pitch
                .ok_or_else(|| anyhow!("measure {measure_number}: note has neither pitch nor rest"))?;
            MeasureEvent::Note(Note {
                pitch,
                duration: parsed.duration,
                voice: parsed.voice,
                note_type: parsed.note_type,
                dots: parsed.dots,
                staff: parsed.staff,
                lyric: parsed.lyric,
            })
        };
        events.push(event);
        Ok(())
    }

    fn parse_attributes(&mut self) -> anyhow::Result<Attributes> {
        let mut attributes = Attributes::default();
        loop {
            match self.parser.next()? {
                XmlEvent::StartElement {
                    name,
                    attributes: el_attrs,
                    ..
                } => match name.local_name.as_str() {
                    "divisions" => attributes.divisions = Some(self.numeric_text("divisions")?),
                    "key" => attributes.key = Some(self.parse_key()?),
                    "time" => attributes.time = Some(self.parse_time()?),
                    "staves" => attributes.staves = Some(self.numeric_text("staves")?),
                    "clef" => {
                        let number = attr_value(&el_attrs, "number").and_then(|v| v.parse().ok());
                        attributes.clefs.push(self.parse_clef(number)?);
                    }
                    _ => self.skip_element()?,
                },
                XmlEvent::EndElement { name } if name.local_name == "attributes" => break,
                XmlEvent::EndDocument => bail!("unexpected end of document in attributes"),
                _ => {}
            }
        }
        Ok(attributes)
    }

    fn parse_key(&mut self) -> anyhow::Result<KeySignature> {
        let mut fifths: Option<i8> = None;
        loop {
            match self.parser.next()? {
                XmlEvent::StartElement { name, .. } => {
                    if name.local_name == "fifths" {
                        fifths = Some(self.numeric_text("fifths")?);
                    } else {
                        self.skip_element()?;
                    }
                }
                XmlEvent::EndElement { name } if name.local_name == "key" => break,
                XmlEvent::EndDocument => bail!("unexpected end of document in key"),
                _ => {}
            }
        }
        let fifths = fifths.ok_or_else(|| anyhow!("key signature without a fifths value"))?;
        Ok(KeySignature::new(fifths))
    }

    fn parse_time(&mut self) -> anyhow::Result<TimeSignature> {
        let mut beats: Option<u32> = None;
        let mut beat_type: Option<u32> = None;
        loop {
            match self.parser.next()? {
                XmlEvent::StartElement { name, .. } => match name.local_name.as_str() {
                    "beats" => beats = Some(self.numeric_text("beats")?),
                    "beat-type" => beat_type = Some(self.numeric_text("beat-type")?),
                    _ => self.skip_element()?,
                },
                XmlEvent::EndElement { name } if name.local_name == "time" => break,
                XmlEvent::EndDocument => bail!("unexpected end of document in time"),
                _ => {}
            }
        }
        Ok(TimeSignature {
            beats: beats.ok_or_else(|| anyhow!("time signature without beats"))?,
            beat_type: beat_type.ok_or_else(|| anyhow!("time signature without beat-type"))?,
        })
    }

    fn parse_clef(&mut self, number: Option<u8>) -> anyhow::Result<Clef> {
        let mut sign = String::new();
        let mut line: Option<u8> = None;
        loop {
            match self.parser.next()? {
                XmlEvent::StartElement { name, .. } => match name.local_name.as_str() {
                    "sign" => sign = self.element_text()?,
                    "line" => line = Some(self.numeric_text("clef line")?),
                    _ => self.skip_element()?,
                },
                XmlEvent::EndElement { name } if name.local_name == "clef" => break,
                XmlEvent::EndDocument => bail!("unexpected end of document in clef"),
                _ => {}
            }
        }
        Ok(Clef { sign, line, number })
    }

    fn parse_note(&mut self) -> anyhow::Result<ParsedNote> {
        let mut parsed = ParsedNote {
            pitch: None,
            rest: false,
            chord: false,
            duration: 0,
            voice: None,
            note_type: None,
            dots: 0,
            staff: None,
            lyric: None,
        };
        loop {
            match self.parser.next()? {
                XmlEvent::StartElement { name, .. } => match name.local_name.as_str() {
                    "pitch" => parsed.pitch = Some(self.parse_pitch()?),
                    "rest" => {
                        parsed.rest = true;
                        self.skip_element()?;
                    }
                    "chord" => {
                        parsed.chord = true;
                        self.skip_element()?;
                    }
                    "duration" => parsed.duration = self.numeric_text("duration")?,
                    "voice" => parsed.voice = Some(self.element_text()?),
                    "type" => parsed.note_type = Some(self.element_text()?),
                    "dot" => {
                        parsed.dots += 1;
                        self.skip_element()?;
                    }
                    "staff" => parsed.staff = Some(self.numeric_text("staff")?),
                    "lyric" => {
                        let text = self.parse_lyric()?;
                        // Only the first verse is modeled.
                        if parsed.lyric.is_none() {
                            parsed.lyric = text;
                        }
                    }
                    _ => self.skip_element()?,
                },
                XmlEvent::EndElement { name } if name.local_name == "note" => break,
                XmlEvent::EndDocument => bail!("unexpected end of document in note"),
                _ => {}
            }
        }
        Ok(parsed)
    }

    fn parse_pitch(&mut self) -> anyhow::Result<Pitch> {
        let mut step: Option<Step> = None;
        let mut alter: i8 = 0;
        let mut octave: Option<i8> = None;
        loop {
            match self.parser.next()? {
                XmlEvent::StartElement { name, .. } => match name.local_name.as_str() {
                    "step" => {
                        let text = self.element_text()?;
                        step = Some(
                            text.chars()
                                .next()
                                .and_then(Step::from_letter)
                                .ok_or_else(|| anyhow!("invalid step '{text}'"))?,
                        );
                    }
                    "alter" => alter = self.numeric_text("alter")?,
                    "octave" => octave = Some(self.numeric_text("octave")?),
                    _ => self.skip_element()?,
                },
                XmlEvent::EndElement { name } if name.local_name == "pitch" => break,
                XmlEvent::EndDocument => bail!("unexpected end of document in pitch"),
                _ => {}
            }
        }
        Ok(Pitch {
            step: step.ok_or_else(|| anyhow!("pitch without a step"))?,
            alter,
            octave: octave.ok_or_else(|| anyhow!("pitch without an octave"))?,
        })
    }

    fn parse_lyric(&mut self) -> anyhow::Result<Option<String>> {
        let mut text: Option<String> = None;
        loop {
            match self.parser.next()? {
                XmlEvent::StartElement { name, .. } => {
                    if name.local_name == "text" {
                        let value = self.element_text()?;
                        if text.is_none() {
                            text = Some(value);
                        }
                    } else {
                        self.skip_element()?;
                    }
                }
                XmlEvent::EndElement { name } if name.local_name == "lyric" => break,
                XmlEvent::EndDocument => bail!("unexpected end of document in lyric"),
                _ => {}
            }
        }
        Ok(text)
    }

    fn parse_cursor_move(&mut self, which: &str) -> anyhow::Result<u32> {
        let mut duration: Option<u32> = None;
        loop {
            match self.parser.next()? {
                XmlEvent::StartElement { name, .. } => {
                    if name.local_name == "duration" {
                        duration = Some(self.numeric_text("duration")?);
                    } else {
                        self.skip_element()?;
                    }
                }
                XmlEvent::EndElement { name } if name.local_name == which => break,
                XmlEvent::EndDocument => bail!("unexpected end of document in {which}"),
                _ => {}
            }
        }
        duration.ok_or_else(|| anyhow!("{which} without a duration"))
    }

    /// Consume events until the element just entered is closed.
    fn skip_element(&mut self) -> anyhow::Result<()> {
        let mut depth = 1u32;
        while depth > 0 {
            match self.parser.next()? {
                XmlEvent::StartElement { .. } => depth += 1,
                XmlEvent::EndElement { .. } => depth -= 1,
                XmlEvent::EndDocument => bail!("unexpected end of document"),
                _ => {}
            }
        }
        Ok(())
    }

    /// Collect the text content of the element just entered.
    fn element_text(&mut self) -> anyhow::Result<String> {
        let mut text = String::new();
        let mut depth = 1u32;
        while depth > 0 {
            match self.parser.next()? {
                XmlEvent::Characters(c) => text.push_str(&c),
                XmlEvent::CData(c) => text.push_str(&c),
                XmlEvent::StartElement { .. } => depth += 1,
                XmlEvent::EndElement { .. } => depth -= 1,
                XmlEvent::EndDocument => bail!("unexpected end of document"),
                _ => {}
            }
        }
        Ok(text.trim().to_string())
    }

    fn numeric_text<T: FromStr>(&mut self, what: &str) -> anyhow::Result<T> {
        let text = self.element_text()?;
        text.parse()
            .map_err(|_| anyhow!("invalid {what} value '{text}'"))
    }
}

pub fn write_score<W: Write>(score: &Score, sink: W) -> anyhow::Result<()> {
    let mut writer = EmitterConfig::new()
        .perform_indent(true)
        .create_writer(sink);
    writer.write(WriterEvent::start_element("score-partwise").attr("version", "3.1"))?;

    writer.write(WriterEvent::start_element("part-list"))?;
    for part in &score.parts {
        writer.write(WriterEvent::start_element("score-part").attr("id", part.id.as_str()))?;
        // An absent name round-trips as an empty part-name element.
        write_text_element(&mut writer, "part-name", part.name.as_deref().unwrap_or(""))?;
        writer.write(WriterEvent::end_element())?;
    }
    writer.write(WriterEvent::end_element())?;

    for part in &score.parts {
        writer.write(WriterEvent::start_element("part").attr("id", part.id.as_str()))?;
        for measure in &part.measures {
            let number = measure.number.to_string();
            writer.write(WriterEvent::start_element("measure").attr("number", &number))?;
            for event in &measure.events {
                match event {
                    MeasureEvent::Attributes(a) => write_attributes(&mut writer, a)?,
                    MeasureEvent::Note(n) => write_note(&mut writer, n)?,
                    MeasureEvent::Chord(c) => write_chord(&mut writer, c)?,
                    MeasureEvent::Rest(r) => write_rest(&mut writer, r)?,
                    MeasureEvent::Backup(d) => write_cursor_move(&mut writer, "backup", *d)?,
                    MeasureEvent::Forward(d) => write_cursor_move(&mut writer, "forward", *d)?,
                }
            }
            writer.write(WriterEvent::end_element())?;
        }
        writer.write(WriterEvent::end_element())?;
    }

    writer.write(WriterEvent::end_element())?;
    Ok(())
}

fn write_text_element<W: Write>(
    writer: &mut EventWriter<W>,
    name: &str,
    value: &str,
) -> anyhow::Result<()> {
    writer.write(WriterEvent::start_element(name))?;
    writer.write(WriterEvent::characters(value))?;
    writer.write(WriterEvent::end_element())?;
    Ok(())
}

fn write_attributes<W: Write>(writer: &mut EventWriter<W>, a: &Attributes) -> anyhow::Result<()> {
    writer.write(WriterEvent::start_element("attributes"))?;
    if let Some(divisions) = a.divisions {
        write_text_element(writer, "divisions", &divisions.to_string())?;
    }
    if let Some(key) = a.key {
        writer.write(WriterEvent::start_element("key"))?;
        write_text_element(writer, "fifths", &key.fifths.to_string())?;
        writer.write(WriterEvent::end_element())?;
    }
    if let Some(time) = a.time {
        writer.write(WriterEvent::start_element("time"))?;
        write_text_element(writer, "beats", &time.beats.to_string())?;
        write_text_element(writer, "beat-type", &time.beat_type.to_string())?;
        writer.write(WriterEvent::end_element())?;
    }
    if let Some(staves) = a.staves {
        write_text_element(writer, "staves", &staves.to_string())?;
    }
    for clef in &a.clefs {
        let mut start = WriterEvent::start_element("clef");
        let number;
        if let Some(n) = clef.number {
            number = n.to_string();
            start = start.attr("number", &number);
        }
        writer.write(start)?;
        write_text_element(writer, "sign", &clef.sign)?;
        if let Some(line) = clef.line {
            write_text_element(writer, "line", &line.to_string())?;
        }
        writer.write(WriterEvent::end_element())?;
    }
    writer.write(WriterEvent::end_element())?;
    Ok(())
}

fn write_pitch<W: Write>(writer: &mut EventWriter<W>, pitch: &Pitch) -> anyhow::Result<()> {
    writer.write(WriterEvent::start_element("pitch"))?;
    write_text_element(writer, "step", &pitch.step.letter().to_string())?;
    if pitch.alter != 0 {
        write_text_element(writer, "alter", &pitch.alter.to_string())?;
    }
    write_text_element(writer, "octave", &pitch.octave.to_string())?;
    writer.write(WriterEvent::end_element())?;
    Ok(())
}

/// The duration/voice/type/dot/staff tail shared by notes, chords, and rests.
fn write_note_tail<W: Write>(
    writer: &mut EventWriter<W>,
    duration: u32,
    voice: &Option<String>,
    note_type: &Option<String>,
    dots: u8,
    staff: Option<u8>,
) -> anyhow::Result<()> {
    write_text_element(writer, "duration", &duration.to_string())?;
    if let Some(voice) = voice {
        write_text_element(writer, "voice", voice)?;
    }
    if let Some(note_type) = note_type {
        write_text_element(writer, "type", note_type)?;
    }
    for _ in 0..dots {
        writer.write(WriterEvent::start_element("dot"))?;
        writer.write(WriterEvent::end_element())?;
    }
    if let Some(staff) = staff {
        write_text_element(writer, "staff", &staff.to_string())?;
    }
    Ok(())
}

fn write_note<W: Write>(writer: &mut EventWriter<W>, note: &Note) -> anyhow::Result<()> {
    writer.write(WriterEvent::start_element("note"))?;
    write_pitch(writer, &note.pitch)?;
    write_note_tail(
        writer,
        note.duration,
        &note.voice,
        &note.note_type,
        note.dots,
        note.staff,
    )?;
    if let Some(lyric) = &note.lyric {
        writer.write(WriterEvent::start_element("lyric").attr("number", "1"))?;
        write_text_element(writer, "syllabic", "single")?;
        write_text_element(writer, "text", lyric)?;
        writer.write(WriterEvent::end_element())?;
    }
    writer.write(WriterEvent::end_element())?;
    Ok(())
}

fn write_chord<W: Write>(writer: &mut EventWriter<W>, chord: &Chord) -> anyhow::Result<()> {
    for (i, pitch) in chord.pitches.iter().enumerate() {
        writer.write(WriterEvent::start_element("note"))?;
        if i > 0 {
            writer.write(WriterEvent::start_element("chord"))?;
            writer.write(WriterEvent::end_element())?;
        }
        write_pitch(writer, pitch)?;
        write_note_tail(
            writer,
            chord.duration,
            &chord.voice,
            &chord.note_type,
            chord.dots,
            chord.staff,
        )?;
        writer.write(WriterEvent::end_element())?;
    }
    Ok(())
}

fn write_rest<W: Write>(writer: &mut EventWriter<W>, rest: &Rest) -> anyhow::Result<()> {
    writer.write(WriterEvent::start_element("note"))?;
    writer.write(WriterEvent::start_element("rest"))?;
    writer.write(WriterEvent::end_element())?;
    write_note_tail(
        writer,
        rest.duration,
        &rest.voice,
        &rest.note_type,
        rest.dots,
        rest.staff,
    )?;
    writer.write(WriterEvent::end_element())?;
    Ok(())
}

fn write_cursor_move<W: Write>(
    writer: &mut EventWriter<W>,
    which: &str,
    duration: u32,
) -> anyhow::Result<()> {
    writer.write(WriterEvent::start_element(which))?;
    write_text_element(writer, "duration", &duration.to_string())?;
    writer.write(WriterEvent::end_element())?;
    Ok(())
}
