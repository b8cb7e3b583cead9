use super::{ActiveSingers, Singer, SingerTrack, TimelineBuilder, TimelineError, TrackEvent};
use crate::dom::{Document, Element};

/// Name given to the only track of a solo song.
pub const SOLO_TRACK_NAME: &str = "Solo";

/// The finished per-performer timelines of one song.
#[derive(Debug, Clone, PartialEq)]
pub enum Timeline {
    Solo(SingerTrack),
    Duet([SingerTrack; 2]),
}

/// The two ways a melody document can lay out a duet.
#[derive(Debug)]
pub enum DuetLayout<'a> {
    /// Two `TRACK` elements name the performers; one flat `SENTENCE` list at
    /// the root switches between them with `Singer="Solo 1|Solo 2|Group"`.
    SingleTrack {
        names: [String; 2],
        sentences: Vec<&'a Element>,
    },
    /// Each `TRACK` carries its own sentences on its own clock.
    DoubleTrack {
        names: [String; 2],
        tracks: [&'a Element; 2],
    },
}

impl<'a> DuetLayout<'a> {
    pub fn detect(doc: &'a Document) -> Result<Self, TimelineError> {
        let tracks = doc.find("/MELODY/TRACK");
        let [first, second] = tracks[..] else {
            return Err(TimelineError::InvalidTrackCount(tracks.len()));
        };
        let names = [track_name(first, 1)?, track_name(second, 2)?];

        let sentences = doc.find("/MELODY/SENTENCE");
        if sentences.is_empty() {
            Ok(Self::DoubleTrack {
                names,
                tracks: [first, second],
            })
        } else {
            Ok(Self::SingleTrack { names, sentences })
        }
    }

    pub fn build(self) -> Result<[SingerTrack; 2], TimelineError> {
        let (names, [one, two]) = match self {
            Self::SingleTrack { names, sentences } => {
                log::debug!("  >>> Single-track duet");
                (names, single_track(&sentences)?)
            }
            Self::DoubleTrack { names, tracks } => {
                log::debug!("  >>> Double-track duet");
                (names, double_track(tracks)?)
            }
        };
        let [name_one, name_two] = names;
        let tracks = [SingerTrack::new(name_one, one), SingerTrack::new(name_two, two)];
        for (i, track) in tracks.iter().enumerate() {
            if track.notes().next().is_none() {
                return Err(TimelineError::EmptyTrack(i + 1));
            }
        }
        Ok(tracks)
    }
}

/// Build the timeline(s) for a melody document.
pub fn build_timeline(doc: &Document, duet: bool) -> Result<Timeline, TimelineError> {
    if duet {
        return Ok(Timeline::Duet(DuetLayout::detect(doc)?.build()?));
    }

    log::debug!("  >>> Solo track");
    let sentences = doc.find("/MELODY/SENTENCE");
    if sentences.is_empty() {
        return Err(TimelineError::NoSentences);
    }
    let mut builder = TimelineBuilder::new(ActiveSingers::only(Singer::One));
    for sentence in sentences {
        builder.push_sentence(sentence)?;
    }
    let [events, _] = builder.into_events();
    Ok(Timeline::Solo(SingerTrack::new(SOLO_TRACK_NAME, events)))
}

fn track_name(track: &Element, number: usize) -> Result<String, TimelineError> {
    track
        .attr("Artist")
        .or_else(|| track.attr("Name"))
        .map(str::to_string)
        .ok_or(TimelineError::MissingTrackName(number))
}

fn single_track(sentences: &[&Element]) -> Result<[Vec<TrackEvent>; 2], TimelineError> {
    let mut builder = TimelineBuilder::new(ActiveSingers::none());
    for sentence in sentences {
        builder.apply_selector(sentence)?;
        builder.push_sentence(sentence)?;
    }
    Ok(builder.into_events())
}

fn double_track(tracks: [&Element; 2]) -> Result<[Vec<TrackEvent>; 2], TimelineError> {
    let (one, two) = rayon::join(
        || track_pass(tracks[0], Singer::One),
        || track_pass(tracks[1], Singer::Two),
    );
    Ok([one?, two?])
}

/// One performer's pass over their own track, with a fresh cursor.
fn track_pass(track: &Element, singer: Singer) -> Result<Vec<TrackEvent>, TimelineError> {
    let sentences = track.find("SENTENCE");
    if sentences.is_empty() {
        return Err(TimelineError::NoSentences);
    }
    let mut builder = TimelineBuilder::new(ActiveSingers::only(singer));
    for sentence in sentences {
        builder.push_sentence(sentence)?;
    }
    let mut events = builder.into_events();
    Ok(std::mem::take(&mut events[singer.index()]))
}
