//! Turns melody sentences into per-singer note timelines.
//!
//! All timing is in the melody's own beat units (quarter-beats at the
//! normalised tempo); nothing here knows about wall-clock seconds.

pub mod duet;

use crate::dom::Element;
use thiserror::Error;

pub use duet::{DuetLayout, Timeline, build_timeline};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimelineError {
    #[error("Invalid Singer: {0}")]
    InvalidSingerSelector(String),
    #[error("No singer for note")]
    NoActiveSinger,
    #[error("Unable to find any sentences in melody XML")]
    NoSentences,
    #[error("Invalid number of tracks: expected 2, found {0}")]
    InvalidTrackCount(usize),
    #[error("Track {0} without Artist or Name")]
    MissingTrackName(usize),
    #[error("NOTE without {0} attribute")]
    MissingAttribute(&'static str),
    #[error("Invalid {attribute} value: {value:?}")]
    InvalidNumber {
        attribute: &'static str,
        value: String,
    },
    #[error("Duet performer {0} has no notes")]
    EmptyTrack(usize),
}

/// How a note is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoteKind {
    Normal,
    Golden,
    Rap,
    GoldenRap,
    FreeStyle,
}

impl NoteKind {
    /// Rap/bonus combinations take precedence; freestyle only applies to
    /// notes that are neither.
    pub fn classify(rap: bool, bonus: bool, freestyle: bool) -> Self {
        match (rap, bonus) {
            (false, true) => Self::Golden,
            (true, false) => Self::Rap,
            (true, true) => Self::GoldenRap,
            (false, false) if freestyle => Self::FreeStyle,
            (false, false) => Self::Normal,
        }
    }

    /// Chart line prefix.
    pub fn symbol(self) -> char {
        match self {
            Self::Normal => ':',
            Self::Golden => '*',
            Self::Rap => 'R',
            Self::GoldenRap => 'G',
            Self::FreeStyle => 'F',
        }
    }

    pub fn from_symbol(c: char) -> Option<Self> {
        match c {
            ':' => Some(Self::Normal),
            '*' => Some(Self::Golden),
            'R' => Some(Self::Rap),
            'G' => Some(Self::GoldenRap),
            'F' => Some(Self::FreeStyle),
            _ => None,
        }
    }
}

/// One sung note.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteEvent {
    pub kind: NoteKind,
    pub start: u32,
    pub duration: u32,
    pub pitch: u32,
    pub lyric: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackEvent {
    /// Line break: the next note starts a new lyric line at this beat.
    Gap(u32),
    Note(NoteEvent),
}

/// Everything one performer sings, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct SingerTrack {
    pub name: String,
    pub events: Vec<TrackEvent>,
}

impl SingerTrack {
    pub fn new(name: impl Into<String>, events: Vec<TrackEvent>) -> Self {
        Self {
            name: name.into(),
            events,
        }
    }

    pub fn notes(&self) -> impl Iterator<Item = &NoteEvent> {
        self.events.iter().filter_map(|e| match e {
            TrackEvent::Note(n) => Some(n),
            TrackEvent::Gap(_) => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Singer {
    One,
    Two,
}

impl Singer {
    pub const ALL: [Singer; 2] = [Singer::One, Singer::Two];

    pub fn index(self) -> usize {
        match self {
            Self::One => 0,
            Self::Two => 1,
        }
    }
}

/// Which singers the current sentence is routed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveSingers([bool; 2]);

impl ActiveSingers {
    pub fn none() -> Self {
        Self([false, false])
    }

    pub fn only(singer: Singer) -> Self {
        let mut set = Self::none();
        set.0[singer.index()] = true;
        set
    }

    pub fn both() -> Self {
        Self([true, true])
    }

    /// Parse a sentence's `Singer` attribute.
    pub fn from_selector(value: &str) -> Result<Self, TimelineError> {
        match value {
            "Solo 1" => Ok(Self::only(Singer::One)),
            "Solo 2" => Ok(Self::only(Singer::Two)),
            "Group" => Ok(Self::both()),
            other => Err(TimelineError::InvalidSingerSelector(other.to_string())),
        }
    }

    pub fn is_empty(self) -> bool {
        !self.0[0] && !self.0[1]
    }

    pub fn contains(self, singer: Singer) -> bool {
        self.0[singer.index()]
    }

    pub fn iter(self) -> impl Iterator<Item = Singer> {
        Singer::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

/// Elapsed time plus line-break bookkeeping for one traversal.
///
/// `gap` is `None` until the first sung note; afterwards `Some(0)` means no
/// break pending and `Some(t)` a break at beat `t` to emit before the next
/// sung note.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineCursor {
    time: u32,
    gap: Option<u32>,
}

impl TimelineCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time(&self) -> u32 {
        self.time
    }

    pub fn pending_gap(&self) -> Option<u32> {
        self.gap
    }

    pub fn begin_sentence(&mut self) {
        if let Some(gap) = self.gap.as_mut() {
            *gap = self.time;
        }
    }

    /// Consume the pending break, if any, and mark tracking as started.
    pub fn take_gap(&mut self) -> Option<u32> {
        self.gap.replace(0).filter(|&g| g > 0)
    }

    pub fn advance(&mut self, duration: u32) {
        self.time = self.time.saturating_add(duration);
    }
}

/// Per-traversal construction state: the cursor, the active singer set and
/// the events collected so far for each singer.
#[derive(Debug, Default)]
pub struct TimelineBuilder {
    cursor: TimelineCursor,
    active: ActiveSingers,
    tracks: [Vec<TrackEvent>; 2],
}

impl TimelineBuilder {
    pub fn new(active: ActiveSingers) -> Self {
        Self {
            active,
            ..Self::default()
        }
    }

    /// Switch singers according to the sentence's `Singer` attribute, if it has one.
    pub fn apply_selector(&mut self, sentence: &Element) -> Result<(), TimelineError> {
        if let Some(selector) = sentence.attr("Singer") {
            self.active = ActiveSingers::from_selector(selector)?;
        }
        Ok(())
    }

    pub fn push_sentence(&mut self, sentence: &Element) -> Result<(), TimelineError> {
        self.cursor.begin_sentence();
        for note in sentence.children_named("NOTE") {
            self.push_note(note)?;
        }
        Ok(())
    }

    pub fn push_note(&mut self, note: &Element) -> Result<(), TimelineError> {
        let lyric = note
            .attr("Lyric")
            .ok_or(TimelineError::MissingAttribute("Lyric"))?;
        let pitch = number(note, "MidiNote")?;
        let duration = number(note, "Duration")?;
        let kind = NoteKind::classify(
            note.has_attr("Rap"),
            note.has_attr("Bonus"),
            note.has_attr("FreeStyle"),
        );

        if self.active.is_empty() {
            return Err(TimelineError::NoActiveSinger);
        }

        let mut emitted = Vec::with_capacity(2);
        if pitch != 0 {
            if let Some(gap) = self.cursor.take_gap() {
                emitted.push(TrackEvent::Gap(gap));
            }
            emitted.push(TrackEvent::Note(NoteEvent {
                kind,
                start: self.cursor.time(),
                duration,
                pitch,
                lyric: format_lyric(lyric),
            }));
        }
        self.cursor.advance(duration);

        for singer in self.active.iter() {
            self.tracks[singer.index()].extend(emitted.iter().cloned());
        }
        Ok(())
    }

    pub fn into_events(self) -> [Vec<TrackEvent>; 2] {
        self.tracks
    }
}

/// Tidy a syllable for display: `"la -"` joins the next syllable without a
/// space, `"la-"` becomes a tie (`"la~"`), anything else ends a word.
pub fn format_lyric(raw: &str) -> String {
    if let Some(stem) = raw.strip_suffix(" -") {
        stem.to_string()
    } else if let Some(stem) = raw.strip_suffix('-') {
        format!("{stem}~")
    } else {
        format!("{raw} ")
    }
}

fn number(note: &Element, attribute: &'static str) -> Result<u32, TimelineError> {
    let value = note
        .attr(attribute)
        .ok_or(TimelineError::MissingAttribute(attribute))?;
    value
        .trim()
        .parse()
        .map_err(|_| TimelineError::InvalidNumber {
            attribute,
            value: value.to_string(),
        })
}
