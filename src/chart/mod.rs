//! UltraStar chart (`notes.txt`) writer.

pub mod reader;

use crate::catalog::SongRecord;
use crate::catalog::normalize::safe_name;
use crate::timeline::{SingerTrack, Timeline, TrackEvent};
use std::fmt;
use std::path::{Path, PathBuf};

pub use reader::{ChartParseError, ParsedChart, parse_chart};

/// How a duet is laid out on disk. Solo songs always get one `notes.txt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartMode {
    /// One file with `P1`/`P2` sections.
    Merged,
    /// One file per performer, `notes (name).txt`.
    Split,
}

enum ChartBody<'a> {
    Single(&'a SingerTrack),
    Merged(&'a [SingerTrack; 2]),
}

/// One chart file, rendered through [`fmt::Display`].
pub struct ChartDocument<'a> {
    song: &'a SongRecord,
    title_suffix: String,
    body: ChartBody<'a>,
}

impl<'a> ChartDocument<'a> {
    pub fn solo(song: &'a SongRecord, track: &'a SingerTrack) -> Self {
        Self {
            song,
            title_suffix: String::new(),
            body: ChartBody::Single(track),
        }
    }

    /// A single performer's part of a duet; the title gets ` (name)` appended.
    pub fn performer(song: &'a SongRecord, track: &'a SingerTrack) -> Self {
        Self {
            song,
            title_suffix: format!(" ({})", track.name),
            body: ChartBody::Single(track),
        }
    }

    pub fn merged(song: &'a SongRecord, tracks: &'a [SingerTrack; 2]) -> Self {
        Self {
            song,
            title_suffix: String::new(),
            body: ChartBody::Merged(tracks),
        }
    }

    fn write_header(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let song = self.song;
        if !song.title.is_empty() {
            writeln!(f, "#TITLE:{}{}", song.title, self.title_suffix)?;
        }
        let fields = [
            ("ARTIST", song.artist.as_str()),
            ("GENRE", song.genre.as_str()),
            ("YEAR", song.year.as_str()),
            ("EDITION", song.edition.as_str()),
        ];
        for (key, value) in fields {
            if !value.is_empty() {
                writeln!(f, "#{key}:{value}")?;
            }
        }
        let files = [
            ("MP3", &song.music),
            ("VOCALS", &song.vocals),
            ("VIDEO", &song.video),
            ("COVER", &song.cover),
        ];
        for (key, path) in files {
            if let Some(name) = path.as_deref().and_then(Path::file_name) {
                writeln!(f, "#{key}:{}", name.to_string_lossy())?;
            }
        }
        writeln!(f, "#BPM:{}", format_tempo(song.tempo))?;
        if song.has_medley() {
            writeln!(f, "#MEDLEYSTARTBEAT:{}", medley_beat(song.tempo, song.medley_start))?;
            writeln!(f, "#MEDLEYENDBEAT:{}", medley_beat(song.tempo, song.medley_end))?;
        }
        Ok(())
    }
}

impl fmt::Display for ChartDocument<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_header(f)?;
        match self.body {
            ChartBody::Single(track) => write_events(f, &track.events)?,
            ChartBody::Merged(tracks) => {
                for (i, track) in tracks.iter().enumerate() {
                    writeln!(f, "#P{}: {}", i + 1, track.name)?;
                }
                for (i, track) in tracks.iter().enumerate() {
                    writeln!(f, "P{}", i + 1)?;
                    write_events(f, &track.events)?;
                }
            }
        }
        writeln!(f, "E")
    }
}

fn write_events(f: &mut fmt::Formatter<'_>, events: &[TrackEvent]) -> fmt::Result {
    for event in events {
        match event {
            TrackEvent::Gap(beat) => writeln!(f, "- {beat}")?,
            TrackEvent::Note(n) => writeln!(
                f,
                "{} {} {} {} {}",
                n.kind.symbol(),
                n.start,
                n.duration,
                n.pitch,
                n.lyric
            )?,
        }
    }
    Ok(())
}

/// Seconds to a quarter-beat position at `tempo` BPM.
pub fn medley_beat(tempo: f64, seconds: f64) -> i64 {
    (4.0 * (tempo / 60.0) * seconds).round() as i64
}

/// Tempo with up to six significant digits and no trailing zeros
/// (`120`, `98.5`, `133.333`).
pub fn format_tempo(tempo: f64) -> String {
    if tempo == 0.0 || !tempo.is_finite() {
        return tempo.to_string();
    }
    let scientific = format!("{tempo:.5e}");
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if (-4..6).contains(&exponent) {
        let decimals = (5 - exponent).max(0) as usize;
        trim_fraction(&format!("{tempo:.decimals$}")).to_string()
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_fraction(mantissa), exponent.abs())
    }
}

fn trim_fraction(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}

/// Write the chart file(s) for a song into `dir`, returning the paths written.
pub fn write_charts(
    dir: &Path,
    song: &SongRecord,
    timeline: &Timeline,
    mode: ChartMode,
) -> std::io::Result<Vec<PathBuf>> {
    let documents = match (timeline, mode) {
        (Timeline::Solo(track), _) => {
            vec![("notes.txt".to_string(), ChartDocument::solo(song, track))]
        }
        (Timeline::Duet(tracks), ChartMode::Merged) => {
            vec![("notes.txt".to_string(), ChartDocument::merged(song, tracks))]
        }
        (Timeline::Duet(tracks), ChartMode::Split) => tracks
            .iter()
            .map(|track| {
                let file = format!("notes ({}).txt", safe_name(&track.name));
                (file, ChartDocument::performer(song, track))
            })
            .collect(),
    };

    let mut written = Vec::with_capacity(documents.len());
    for (file, document) in documents {
        let path = dir.join(file);
        log::debug!("  >>> Writing {}", path.display());
        std::fs::write(&path, document.to_string())?;
        written.push(path);
    }
    Ok(written)
}
