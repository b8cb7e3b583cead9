use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::media::{AssetKind, CommandExtractor, Extractors, ToolCommand};

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Where song folders are created (defaults to the current directory).
    pub output_dir: Option<PathBuf>,
    /// Number of songs extracted in parallel. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Encoders used for the compression passes.
    pub tools: ToolsConfig,
    /// External decoders for the disc's media formats.
    pub decoders: DecodersConfig,
}

/// Encoder programs and their limits.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    pub oggenc: String,
    pub lame: String,
    pub ffmpeg: String,
    /// Per-invocation timeout; the encoder is killed when it runs longer.
    pub timeout_secs: u64,
    /// Maximum encoder processes running at once across all songs.
    pub transcode_jobs: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            oggenc: "oggenc".to_string(),
            lame: "lame".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            timeout_secs: 1800,
            transcode_jobs: 2,
        }
    }
}

/// One optional command per asset decode path.
///
/// ```toml
/// [decoders.audio]
/// program = "ss-audio"
/// args = ["{in0}", "{in1}", "{out}"]
/// ```
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct DecodersConfig {
    pub audio: Option<ToolCommand>,
    pub audio_us: Option<ToolCommand>,
    pub video: Option<ToolCommand>,
    pub video_us: Option<ToolCommand>,
    pub cover: Option<ToolCommand>,
}

impl DecodersConfig {
    /// Build the extractors, one per decode path.
    pub fn extractors(&self, timeout: Duration) -> Extractors {
        let make = |kind, command: &Option<ToolCommand>| -> Box<CommandExtractor> {
            Box::new(CommandExtractor::new(kind, command.clone(), timeout))
        };
        Extractors {
            audio: make(AssetKind::Audio, &self.audio),
            audio_us: make(AssetKind::AudioUs, &self.audio_us),
            video: make(AssetKind::Video, &self.video),
            video_us: make(AssetKind::VideoUs, &self.video_us),
            cover: make(AssetKind::Cover, &self.cover),
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/ssrip/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.tools, ToolsConfig::default());
        assert_eq!(config.decoders, DecodersConfig::default());
        assert!(config.output_dir.is_none());
        assert!(config.resolve_workers() >= 1);
    }

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::parse(
            r#"
            output_dir = "/srv/karaoke"
            workers = 3

            [tools]
            ffmpeg = "/opt/ffmpeg/bin/ffmpeg"
            transcode_jobs = 1

            [decoders.audio]
            program = "ss-audio"
            args = ["{in0}", "{in1}", "{out}/music.wav"]

            [decoders.cover]
            program = "ss-cover"
            "#,
        )
        .unwrap();
        assert_eq!(config.output_dir, Some(PathBuf::from("/srv/karaoke")));
        assert_eq!(config.resolve_workers(), 3);
        assert_eq!(config.tools.ffmpeg, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.tools.oggenc, "oggenc");
        assert_eq!(config.tools.transcode_jobs, 1);
        assert_eq!(
            config.decoders.audio,
            Some(ToolCommand::new("ss-audio", &["{in0}", "{in1}", "{out}/music.wav"]))
        );
        assert_eq!(config.decoders.cover, Some(ToolCommand::new("ss-cover", &[])));
        assert!(config.decoders.video.is_none());
    }

    #[test]
    fn test_bad_config_is_an_error() {
        assert!(AppConfig::parse("workers = \"many\"").is_err());
    }
}
