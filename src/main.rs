use anyhow::{Context, Result};
use clap::Parser;
use ssrip::archive::Disc;
use ssrip::catalog::{Catalog, build_catalog};
use ssrip::chart::ChartMode;
use ssrip::extract::{AudioFormat, ExtractOptions, Extractor, VideoFormat};
use ssrip::media::Transcoder;
use ssrip::melody::UnavailableDecoder;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ssrip", version, about = "Rip SingStar discs into UltraStar songs")]
struct Cli {
    /// Path to the mounted disc (folder containing pack_ee.pak)
    dvd: PathBuf,

    /// Only songs whose ID matches or whose "artist - title" contains this
    song: Option<String>,

    /// List the songs on the disc and exit
    #[arg(short, long)]
    list: bool,

    /// With --list, print the catalog as JSON
    #[arg(long, requires = "list")]
    json: bool,

    /// Audio output format
    #[arg(long, value_enum, default_value = "ogg")]
    audio: AudioFormat,

    /// Video output format
    #[arg(long, value_enum, default_value = "mkv")]
    video: VideoFormat,

    /// Also write notes.txt (one file per singer for duets)
    #[arg(short, long)]
    txt: bool,

    /// Write duets as a single notes.txt with P1/P2 sections (implies --txt)
    #[arg(short, long)]
    duet: bool,

    /// Where song folders are created (defaults to config output_dir, then ".")
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Songs extracted in parallel (0 = auto-detect from config)
    #[arg(short = 'j', long, default_value = "0")]
    jobs: usize,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn chart_mode(&self) -> Option<ChartMode> {
        if self.duet {
            Some(ChartMode::Merged)
        } else if self.txt {
            Some(ChartMode::Split)
        } else {
            None
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = ssrip::config::AppConfig::load();

    let disc = Disc::open(&cli.dvd).context("Failed to open disc")?;
    let mut decoder = UnavailableDecoder::default();
    let catalog = build_catalog(disc.main(), &mut decoder, cli.song.as_deref())
        .context("Failed to read song catalog")?;

    if !catalog.edition.is_empty() {
        eprintln!("### {}", catalog.edition);
    }
    eprintln!("{} songs found", catalog.len());

    if cli.list {
        print_listing(&catalog, cli.json)?;
        return Ok(());
    }

    let options = ExtractOptions {
        audio: cli.audio,
        video: cli.video,
        chart: cli.chart_mode(),
    };
    log::info!("Audio: {:?}, video: {:?}, charts: {:?}", options.audio, options.video, options.chart);

    let output_root = cli
        .output
        .or(config.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let workers = if cli.jobs > 0 { cli.jobs } else { config.resolve_workers() };
    let extractors = config
        .decoders
        .extractors(Duration::from_secs(config.tools.timeout_secs));
    let transcoder = Transcoder::new(&config.tools).context("Failed to start transcoder pool")?;

    let extractor = Extractor {
        disc: &disc,
        decoder: &decoder,
        extractors: &extractors,
        transcoder: &transcoder,
        options,
        output_root: &output_root,
    };
    let report = extractor
        .extract_all(catalog.into_songs(), workers)
        .context("Extraction failed")?;

    println!(
        "{} extracted, {} failed",
        report.extracted.len(),
        report.failed.len()
    );
    Ok(())
}

fn print_listing(catalog: &Catalog, json: bool) -> Result<()> {
    if json {
        let songs: Vec<_> = catalog.songs().collect();
        println!("{}", serde_json::to_string_pretty(&songs)?);
    } else {
        for song in catalog.songs() {
            println!("[{}] {}", song.id, song.display_name());
        }
    }
    Ok(())
}
