use crate::timeline::{NoteEvent, NoteKind, TrackEvent};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ChartParseError {
    #[error("Line {line}: unrecognised {content:?}")]
    InvalidLine { line: usize, content: String },
    #[error("Line {line}: invalid number {value:?}")]
    InvalidNumber { line: usize, value: String },
    #[error("Chart has no end marker")]
    MissingEnd,
}

/// A chart read back from text.
#[derive(Debug, Default, PartialEq)]
pub struct ParsedChart {
    /// `#KEY:value` lines in file order; values are kept verbatim.
    pub headers: Vec<(String, String)>,
    /// One event list per `P1`/`P2` section, or a single list for solo charts.
    pub tracks: Vec<Vec<TrackEvent>>,
}

impl ParsedChart {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Names from the `#P1:`/`#P2:` lines of a merged duet.
    pub fn performers(&self) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.len() > 1 && k.starts_with('P') && k[1..].bytes().all(|b| b.is_ascii_digit()))
            .map(|(_, v)| v.trim())
            .collect()
    }
}

/// Parse chart text. Everything after the `E` line is ignored.
pub fn parse_chart(text: &str) -> Result<ParsedChart, ChartParseError> {
    let mut chart = ParsedChart::default();

    for (index, raw) in text.split('\n').enumerate() {
        let line_no = index + 1;
        let line = raw.strip_suffix('\r').unwrap_or(raw);

        if let Some(header) = line.strip_prefix('#') {
            let (key, value) = header.split_once(':').ok_or_else(|| invalid(line_no, line))?;
            chart.headers.push((key.to_string(), value.to_string()));
            continue;
        }
        if line == "E" {
            return Ok(chart);
        }
        if line.is_empty() {
            continue;
        }
        if line.len() > 1 && line.starts_with('P') && line[1..].bytes().all(|b| b.is_ascii_digit()) {
            chart.tracks.push(Vec::new());
            continue;
        }

        let event = parse_event(line_no, line)?;
        if chart.tracks.is_empty() {
            chart.tracks.push(Vec::new());
        }
        if let Some(track) = chart.tracks.last_mut() {
            track.push(event);
        }
    }

    Err(ChartParseError::MissingEnd)
}

fn parse_event(line_no: usize, line: &str) -> Result<TrackEvent, ChartParseError> {
    if let Some(beat) = line.strip_prefix("- ") {
        return Ok(TrackEvent::Gap(number(line_no, beat)?));
    }

    let mut fields = line.splitn(5, ' ');
    let symbol = fields.next().unwrap_or_default();
    let mut symbol_chars = symbol.chars();
    let kind = match (symbol_chars.next(), symbol_chars.next()) {
        (Some(c), None) => NoteKind::from_symbol(c),
        _ => None,
    }
    .ok_or_else(|| invalid(line_no, line))?;

    let mut next_number = || -> Result<u32, ChartParseError> {
        let field = fields.next().ok_or_else(|| invalid(line_no, line))?;
        number(line_no, field)
    };
    let start = next_number()?;
    let duration = next_number()?;
    let pitch = next_number()?;
    let lyric = fields.next().unwrap_or_default().to_string();

    Ok(TrackEvent::Note(NoteEvent {
        kind,
        start,
        duration,
        pitch,
        lyric,
    }))
}

fn number(line: usize, value: &str) -> Result<u32, ChartParseError> {
    value.parse().map_err(|_| ChartParseError::InvalidNumber {
        line,
        value: value.to_string(),
    })
}

fn invalid(line: usize, content: &str) -> ChartParseError {
    ChartParseError::InvalidLine {
        line,
        content: content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SongRecord;
    use crate::chart::{ChartDocument, format_tempo};
    use crate::dom::Document;
    use crate::timeline::{SingerTrack, Timeline, build_timeline};

    const MELODY: &str = r#"<MELODY Tempo="98.5" Resolution="Semiquaver">
        <SENTENCE>
            <NOTE MidiNote="0" Duration="6" Lyric=""/>
            <NOTE MidiNote="60" Duration="4" Lyric="Hel-" Bonus="Yes"/>
            <NOTE MidiNote="62" Duration="2" Lyric="lo"/>
        </SENTENCE>
        <SENTENCE>
            <NOTE MidiNote="0" Duration="8" Lyric=""/>
            <NOTE MidiNote="64" Duration="3" Lyric="wo -" Rap="Yes"/>
            <NOTE MidiNote="65" Duration="3" Lyric="rld" FreeStyle="Yes"/>
            <NOTE MidiNote="67" Duration="1" Lyric="-" Rap="Yes" Bonus="Yes"/>
        </SENTENCE>
    </MELODY>"#;

    #[test]
    fn test_solo_round_trip() {
        let doc = Document::parse(MELODY.as_bytes()).unwrap();
        let Timeline::Solo(track) = build_timeline(&doc, false).unwrap() else {
            panic!("expected solo");
        };
        let song = SongRecord {
            title: "Greeting".to_string(),
            artist: "Band".to_string(),
            tempo: 98.5,
            ..SongRecord::default()
        };

        let text = ChartDocument::solo(&song, &track).to_string();
        let parsed = parse_chart(&text).unwrap();

        assert_eq!(parsed.header("TITLE"), Some("Greeting"));
        assert_eq!(parsed.header("BPM"), Some(format_tempo(98.5).as_str()));
        assert_eq!(parsed.tracks, vec![track.events.clone()]);
        assert!(parsed.tracks[0].contains(&TrackEvent::Gap(12)));
    }

    #[test]
    fn test_merged_sections() {
        let song = SongRecord {
            tempo: 100.0,
            ..SongRecord::default()
        };
        let events = vec![TrackEvent::Note(NoteEvent {
            kind: NoteKind::Normal,
            start: 1,
            duration: 1,
            pitch: 50,
            lyric: "x ".to_string(),
        })];
        let tracks = [
            SingerTrack::new("Alice", events.clone()),
            SingerTrack::new("Bob", Vec::new()),
        ];
        let parsed = parse_chart(&ChartDocument::merged(&song, &tracks).to_string()).unwrap();
        assert_eq!(parsed.performers(), vec!["Alice", "Bob"]);
        assert_eq!(parsed.tracks, vec![events, Vec::new()]);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_chart("#BPM:1\n: 0 1 60 a\n"), Err(ChartParseError::MissingEnd));
        assert_eq!(
            parse_chart("X 0 1 60 a\nE\n"),
            Err(ChartParseError::InvalidLine {
                line: 1,
                content: "X 0 1 60 a".to_string()
            })
        );
        assert_eq!(
            parse_chart("#BPM:1\n- x\nE\n"),
            Err(ChartParseError::InvalidNumber {
                line: 2,
                value: "x".to_string()
            })
        );
    }

    #[test]
    fn test_lyric_whitespace_is_preserved() {
        let parsed = parse_chart(": 0 1 60  two spaces \r\nE").unwrap();
        let TrackEvent::Note(note) = &parsed.tracks[0][0] else {
            panic!("expected note");
        };
        assert_eq!(note.lyric, " two spaces ");
    }
}
