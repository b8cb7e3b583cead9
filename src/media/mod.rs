//! Audio, video and cover extraction plus the transcoding passes that follow.
//!
//! The disc formats themselves (PS2 audio streams, IPU video, cover textures)
//! are decoded by external programs configured per asset kind; this module
//! stages the archive entries they need and collects what they produce.

pub mod fallback;
pub mod tools;

use crate::archive::{ArchiveError, Disc};
use crate::catalog::SongRecord;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use fallback::{Fallback, Outcome};
pub use tools::{CommandExtractor, ToolCommand, Transcoder};

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("No {0} decoder configured")]
    NotConfigured(&'static str),
    #[error("Data archive {0} not found on disc")]
    MissingArchive(String),
    #[error("{0} not found; is it installed and on PATH?")]
    ToolNotFound(String),
    #[error("{program} failed ({status}): {stderr}")]
    ToolFailed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },
    #[error("{0} was not produced")]
    NoOutput(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("Thread pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// The assets a song can have, and which disc layout each decode path reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    /// European layout: `music.mib` stream + `music.mih` header.
    Audio,
    /// American layout: interleaved `mus+vid.iav` + `mus+vid.ind` index.
    AudioUs,
    /// European layout: `movie.ipu`.
    Video,
    /// American layout: the interleaved stream again.
    VideoUs,
    Cover,
}

/// Where a staged input comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetInput {
    /// Entry in the main archive.
    Main(String),
    /// Entry in the song's data archive.
    Data(String),
}

impl AssetKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::AudioUs => "audio_us",
            Self::Video => "video",
            Self::VideoUs => "video_us",
            Self::Cover => "cover",
        }
    }

    /// Archive entries the decoder needs, in `{in0}`, `{in1}` order.
    pub fn inputs(self, song_id: &str) -> Vec<AssetInput> {
        match self {
            Self::Audio => vec![
                AssetInput::Data(format!("{song_id}/music.mib")),
                AssetInput::Main(format!("export/{song_id}/music.mih")),
            ],
            Self::AudioUs | Self::VideoUs => vec![
                AssetInput::Data(format!("{song_id}/mus+vid.iav")),
                AssetInput::Data(format!("{song_id}/mus+vid.ind")),
            ],
            Self::Video => vec![AssetInput::Data(format!("{song_id}/movie.ipu"))],
            Self::Cover => Vec::new(),
        }
    }

    /// Files the decoder writes: the first is required, the rest optional.
    pub fn outputs(self) -> &'static [&'static str] {
        match self {
            Self::Audio | Self::AudioUs => &["music.wav", "vocals.wav"],
            Self::Video | Self::VideoUs => &["video.mpg"],
            Self::Cover => &["cover.png"],
        }
    }
}

/// Everything an extractor may look at for one song.
pub struct AssetRequest<'a> {
    pub song: &'a SongRecord,
    pub disc: &'a Disc,
    pub out_dir: &'a Path,
}

/// Produces one kind of asset file(s) for a song.
pub trait AssetExtractor: Send + Sync {
    /// Returns the produced files, required output first.
    fn extract(&self, request: &AssetRequest<'_>) -> Result<Vec<PathBuf>, MediaError>;
}

/// The extractors used for each asset kind.
pub struct Extractors {
    pub audio: Box<dyn AssetExtractor>,
    pub audio_us: Box<dyn AssetExtractor>,
    pub video: Box<dyn AssetExtractor>,
    pub video_us: Box<dyn AssetExtractor>,
    pub cover: Box<dyn AssetExtractor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inputs_follow_disc_layout() {
        assert_eq!(
            AssetKind::Audio.inputs("123"),
            vec![
                AssetInput::Data("123/music.mib".to_string()),
                AssetInput::Main("export/123/music.mih".to_string()),
            ]
        );
        assert_eq!(AssetKind::AudioUs.inputs("9"), AssetKind::VideoUs.inputs("9"));
        assert!(AssetKind::Cover.inputs("9").is_empty());
    }

    #[test]
    fn test_required_output_first() {
        assert_eq!(AssetKind::Audio.outputs()[0], "music.wav");
        assert_eq!(AssetKind::VideoUs.outputs(), &["video.mpg"]);
    }
}
