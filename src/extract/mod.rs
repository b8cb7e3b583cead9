//! Per-song extraction: melody, assets, transcodes and chart, with the song's
//! output directory removed again if a required step fails.

use crate::archive::Disc;
use crate::catalog::SongRecord;
use crate::catalog::normalize::safe_name;
use crate::chart::{ChartMode, write_charts};
use crate::dom::Document;
use crate::media::{AssetExtractor, AssetRequest, Extractors, Fallback, MediaError, Outcome, Transcoder};
use crate::melody::{self, MelodyDecoder, MelodyError};
use crate::timeline::{TimelineError, build_timeline};
use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error(transparent)]
    Melody(#[from] MelodyError),
    #[error(transparent)]
    Timeline(#[from] TimelineError),
    #[error("Audio extraction failed: {0}")]
    Audio(MediaError),
    #[error("Failed to write chart: {0}")]
    Chart(std::io::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Thread pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AudioFormat {
    None,
    Ogg,
    Mp3,
    Wav,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VideoFormat {
    None,
    Mkv,
    Mp4,
    Mpeg2,
}

/// What to produce for every song.
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    pub audio: AudioFormat,
    pub video: VideoFormat,
    /// `None` skips chart generation.
    pub chart: Option<ChartMode>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            audio: AudioFormat::Ogg,
            video: VideoFormat::Mkv,
            chart: None,
        }
    }
}

/// How far a song got before it finished or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    DocumentResolved,
    DirectoryCreated,
    AssetsExtracted,
    ChartWritten,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::DocumentResolved => "melody resolved",
            Self::DirectoryCreated => "directory created",
            Self::AssetsExtracted => "assets extracted",
            Self::ChartWritten => "chart written",
        };
        f.write_str(name)
    }
}

/// A song whose output directory was kept.
#[derive(Debug)]
pub struct ExtractedSong {
    /// The record with tempo, duet flag and asset paths filled in.
    pub song: SongRecord,
    pub dir: PathBuf,
    pub charts: Vec<PathBuf>,
}

/// A song that was rolled back.
#[derive(Debug)]
pub struct SongFailure {
    pub id: String,
    pub name: String,
    /// Last stage reached before the error.
    pub stage: Stage,
    pub error: ExtractError,
}

impl fmt::Display for SongFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {} (after {})", self.id, self.name, self.error, self.stage)
    }
}

#[derive(Debug, Default)]
pub struct ExtractReport {
    pub extracted: Vec<ExtractedSong>,
    pub failed: Vec<SongFailure>,
}

/// Removes a song's output directory on drop unless committed.
struct Rollback {
    dir: Option<PathBuf>,
}

impl Rollback {
    fn new() -> Self {
        Self { dir: None }
    }

    fn arm(&mut self, dir: &Path) {
        self.dir = Some(dir.to_path_buf());
    }

    fn commit(mut self) {
        self.dir = None;
    }
}

impl Drop for Rollback {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            log::warn!("!!! Removing {}", dir.display());
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                log::error!("Failed to remove {}: {}", dir.display(), e);
            }
        }
    }
}

/// Runs the extraction pipeline against one disc.
pub struct Extractor<'a> {
    pub disc: &'a Disc,
    pub decoder: &'a dyn MelodyDecoder,
    pub extractors: &'a Extractors,
    pub transcoder: &'a Transcoder,
    pub options: ExtractOptions,
    /// Song directories are created below this.
    pub output_root: &'a Path,
}

impl Extractor<'_> {
    /// Extract one song. On failure its directory is gone and the error
    /// carries the stage reached.
    pub fn extract_song(&self, song: SongRecord) -> Result<ExtractedSong, SongFailure> {
        let dir_name = safe_name(&song.display_name());
        self.extract_into(song, dir_name)
    }

    fn extract_into(&self, song: SongRecord, dir_name: String) -> Result<ExtractedSong, SongFailure> {
        let id = song.id.clone();
        let name = song.display_name();
        log::info!("[{id}] {name}");

        let mut stage = Stage::Pending;
        let mut rollback = Rollback::new();
        match self.run(song, &dir_name, &mut stage, &mut rollback) {
            Ok(extracted) => {
                rollback.commit();
                Ok(extracted)
            }
            Err(error) => {
                drop(rollback);
                Err(SongFailure {
                    id,
                    name,
                    stage,
                    error,
                })
            }
        }
    }

    /// Extract every song on a pool of `jobs` workers. One song failing
    /// never stops the others.
    pub fn extract_all(&self, songs: Vec<SongRecord>, jobs: usize) -> Result<ExtractReport, ExtractError> {
        use rayon::prelude::*;

        let mut report = ExtractReport::default();
        if songs.is_empty() {
            log::info!("No songs to extract");
            return Ok(report);
        }
        log::info!("Extracting {} songs with {} workers", songs.len(), jobs);

        let pb = ProgressBar::new(songs.len() as u64);
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs.max(1))
            .thread_name(|i| format!("song-{i}"))
            .build()?;

        let dir_names = unique_dir_names(&songs);
        let results: Vec<_> = pool.install(|| {
            songs
                .into_par_iter()
                .zip(dir_names)
                .map(|(song, dir_name)| {
                    let result = self.extract_into(song, dir_name);
                    pb.inc(1);
                    result
                })
                .collect()
        });

        for result in results {
            match result {
                Ok(extracted) => report.extracted.push(extracted),
                Err(failure) => {
                    log::error!("{failure}");
                    report.failed.push(failure);
                }
            }
        }

        pb.finish_with_message(format!(
            "Done: {} extracted, {} failed",
            report.extracted.len(),
            report.failed.len()
        ));
        Ok(report)
    }

    fn run(
        &self,
        mut song: SongRecord,
        dir_name: &str,
        stage: &mut Stage,
        rollback: &mut Rollback,
    ) -> Result<ExtractedSong, ExtractError> {
        let (doc, source) = melody::resolve(self.disc.main(), self.decoder, &song.id)?;
        log::debug!("[{}] Melody source: {:?}", song.id, source);
        if song.tempo == 0.0 {
            let header = melody::read_header(&doc)?;
            song.tempo = header.tempo;
            song.duet = header.duet;
        }
        *stage = Stage::DocumentResolved;

        let dir = self.output_root.join(dir_name);
        std::fs::create_dir_all(&dir)?;
        rollback.arm(&dir);
        *stage = Stage::DirectoryCreated;

        std::fs::write(dir.join("notes.xml"), doc.raw())?;

        self.extract_assets(&mut song, &dir)?;
        *stage = Stage::AssetsExtracted;

        let charts = match self.options.chart {
            Some(mode) => self.write_chart(&song, &doc, &dir, mode)?,
            None => Vec::new(),
        };
        *stage = Stage::ChartWritten;

        Ok(ExtractedSong { song, dir, charts })
    }

    fn extract_assets(&self, song: &mut SongRecord, dir: &Path) -> Result<(), ExtractError> {
        let request = AssetRequest {
            song: &*song,
            disc: self.disc,
            out_dir: dir,
        };

        let audio = if self.options.audio == AudioFormat::None {
            None
        } else {
            log::info!(">>> Extracting and decoding music");
            let files = try_both(&*self.extractors.audio, &*self.extractors.audio_us, &request)
                .into_result()
                .map_err(ExtractError::Audio)?;
            Some(files)
        };

        log::info!(">>> Extracting cover image");
        let cover = match self.extractors.cover.extract(&request) {
            Ok(files) => files.into_iter().next(),
            Err(e) => {
                log::debug!("  >>> No cover: {e}");
                None
            }
        };

        let video = if self.options.video == VideoFormat::None {
            None
        } else {
            log::info!(">>> Extracting video");
            match try_both(&*self.extractors.video, &*self.extractors.video_us, &request) {
                Outcome::Failed(errors) => {
                    let reason = errors
                        .last()
                        .map(|(_, e)| e.to_string())
                        .unwrap_or_default();
                    log::warn!("[{}] !!! Unable to extract video: {}", song.id, reason);
                    None
                }
                outcome => outcome.ok().and_then(|files| files.into_iter().next()),
            }
        };

        if let Some(files) = audio {
            let mut files = files.into_iter();
            song.music = files.next();
            song.vocals = files.next();
        }
        song.cover = cover;
        song.video = video;

        self.transcode(song, dir);
        Ok(())
    }

    /// Compression passes; a failed pass keeps the previous file.
    fn transcode(&self, song: &mut SongRecord, dir: &Path) {
        let audio_pass: Option<fn(&Transcoder, &Path) -> Result<PathBuf, MediaError>> = match self.options.audio {
            AudioFormat::Ogg => Some(Transcoder::ogg),
            AudioFormat::Mp3 => Some(Transcoder::mp3),
            AudioFormat::None | AudioFormat::Wav => None,
        };
        if let Some(pass) = audio_pass {
            for slot in [&mut song.music, &mut song.vocals] {
                let Some(input) = slot.clone() else {
                    continue;
                };
                log::info!(">>> Compressing {}", input.display());
                match pass(self.transcoder, &input) {
                    Ok(output) => *slot = Some(output),
                    Err(e) => log::warn!("[{}] Audio compression failed: {}", song.id, e),
                }
            }
        }

        let target = match self.options.video {
            VideoFormat::Mkv => Some("video.m4v"),
            VideoFormat::Mp4 => Some("video.mp4"),
            VideoFormat::None | VideoFormat::Mpeg2 => None,
        };
        if let (Some(target), Some(input)) = (target, song.video.clone()) {
            log::info!(">>> Compressing video into {target}");
            match self.transcoder.h264(&input, &dir.join(target), song) {
                Ok(output) => song.video = Some(output),
                Err(e) => log::warn!("[{}] Video compression failed: {}", song.id, e),
            }
        }
    }

    fn write_chart(&self, song: &SongRecord, doc: &Document, dir: &Path, mode: ChartMode) -> Result<Vec<PathBuf>, ExtractError> {
        log::info!(">>> Extracting lyrics to notes.txt");
        let timeline = build_timeline(doc, song.duet)?;
        write_charts(dir, song, &timeline, mode).map_err(ExtractError::Chart)
    }
}

/// One directory name per song. A name already taken (ignoring case) gets
/// the song ID appended, e.g. `Band - Same [2]`.
fn unique_dir_names(songs: &[SongRecord]) -> Vec<String> {
    let mut taken = HashSet::new();
    songs
        .iter()
        .map(|song| {
            let base = safe_name(&song.display_name());
            let name = if taken.contains(&base.to_lowercase()) {
                safe_name(&format!("{} [{}]", song.display_name(), song.id))
            } else {
                base
            };
            taken.insert(name.to_lowercase());
            name
        })
        .collect()
}

fn try_both(
    primary: &dyn AssetExtractor,
    secondary: &dyn AssetExtractor,
    request: &AssetRequest<'_>,
) -> Outcome<Vec<PathBuf>> {
    let outcome = Fallback::new()
        .then("european layout", || primary.extract(request))
        .then("american layout", || secondary.extract(request))
        .run();
    if let Outcome::Degraded { via, .. } = &outcome {
        log::info!("  >>> Used {via}");
    }
    outcome
}
