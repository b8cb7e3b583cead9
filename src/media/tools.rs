use super::{AssetExtractor, AssetInput, AssetKind, AssetRequest, MediaError};
use crate::catalog::SongRecord;
use crate::config::ToolsConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

const STDERR_TAIL: usize = 400;

/// An external program invocation with `{placeholder}` arguments.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Arguments with every `{name}` replaced by its value.
    pub fn expand(&self, vars: &[(&str, String)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (name, value)| {
                    acc.replace(&format!("{{{name}}}"), value)
                })
            })
            .collect()
    }
}

/// Run a program to completion, killing it if it outlives `timeout`.
pub fn run_tool(program: &str, args: &[String], timeout: Duration) -> Result<(), MediaError> {
    log::debug!("{} {}", program, args.join(" "));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_with_deadline(program, args, timeout))
}

async fn run_with_deadline(program: &str, args: &[String], timeout: Duration) -> Result<(), MediaError> {
    let child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MediaError::ToolNotFound(program.to_string()),
            _ => MediaError::Io(e),
        })?;

    // Dropping the unfinished wait kills the child
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            return Err(MediaError::Timeout {
                program: program.to_string(),
                secs: timeout.as_secs(),
            });
        }
    };

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let start = stderr
        .char_indices()
        .rev()
        .nth(STDERR_TAIL)
        .map(|(i, _)| i)
        .unwrap_or(0);
    Err(MediaError::ToolFailed {
        program: program.to_string(),
        status: output.status.to_string(),
        stderr: stderr[start..].trim().to_string(),
    })
}

/// Asset extractor that runs a configured external decoder.
///
/// Inputs are copied out of the archives into the output directory as
/// `.stage-<name>` files, handed over as `{in0}`, `{in1}`, and removed
/// afterwards. `{id}`, `{dvd}` and `{out}` expand to the song ID, disc root
/// and output directory.
pub struct CommandExtractor {
    kind: AssetKind,
    command: Option<ToolCommand>,
    timeout: Duration,
}

impl CommandExtractor {
    pub fn new(kind: AssetKind, command: Option<ToolCommand>, timeout: Duration) -> Self {
        Self {
            kind,
            command,
            timeout,
        }
    }

    /// Copy the inputs out of the archives; nothing is left behind on failure.
    fn stage(&self, request: &AssetRequest<'_>) -> Result<Vec<PathBuf>, MediaError> {
        let mut staged = Vec::new();
        for input in self.kind.inputs(&request.song.id) {
            match stage_input(request, &input) {
                Ok(file) => staged.push(file),
                Err(e) => {
                    remove_all(&staged);
                    return Err(e);
                }
            }
        }
        Ok(staged)
    }

    fn run(&self, command: &ToolCommand, request: &AssetRequest<'_>, staged: &[PathBuf]) -> Result<(), MediaError> {
        let mut vars = vec![
            ("id", request.song.id.clone()),
            ("dvd", path_arg(request.disc.root())),
            ("out", path_arg(request.out_dir)),
        ];
        for (name, file) in ["in0", "in1"].into_iter().zip(staged) {
            vars.push((name, path_arg(file)));
        }
        run_tool(&command.program, &command.expand(&vars), self.timeout)
    }
}

impl AssetExtractor for CommandExtractor {
    fn extract(&self, request: &AssetRequest<'_>) -> Result<Vec<PathBuf>, MediaError> {
        let command = self
            .command
            .as_ref()
            .ok_or(MediaError::NotConfigured(self.kind.label()))?;

        let staged = self.stage(request)?;
        let result = self.run(command, request, &staged);
        remove_all(&staged);
        result?;

        let mut produced = Vec::new();
        for (i, name) in self.kind.outputs().iter().enumerate() {
            let path = request.out_dir.join(name);
            if path.exists() {
                produced.push(path);
            } else if i == 0 {
                return Err(MediaError::NoOutput(path));
            }
        }
        Ok(produced)
    }
}

fn stage_input(request: &AssetRequest<'_>, input: &AssetInput) -> Result<PathBuf, MediaError> {
    let (archive, path) = match input {
        AssetInput::Main(path) => (request.disc.main(), path),
        AssetInput::Data(path) => {
            let part = request
                .disc
                .part(&request.song.data_archive)
                .ok_or_else(|| MediaError::MissingArchive(request.song.data_archive.clone()))?;
            (part, path)
        }
    };
    let bytes = archive.read(path)?;
    let name = path.rsplit('/').next().unwrap_or(path);
    let target = request.out_dir.join(format!(".stage-{name}"));
    std::fs::write(&target, bytes)?;
    Ok(target)
}

fn remove_all(files: &[PathBuf]) {
    for file in files {
        std::fs::remove_file(file).ok();
    }
}

/// Runs the compression passes, at most `transcode_jobs` at a time.
pub struct Transcoder {
    tools: ToolsConfig,
    pool: rayon::ThreadPool,
}

impl Transcoder {
    pub fn new(tools: &ToolsConfig) -> Result<Self, MediaError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(tools.transcode_jobs.max(1))
            .thread_name(|i| format!("transcode-{i}"))
            .build()?;
        Ok(Self {
            tools: tools.clone(),
            pool,
        })
    }

    fn run(&self, program: &str, args: Vec<String>) -> Result<(), MediaError> {
        let timeout = Duration::from_secs(self.tools.timeout_secs);
        self.pool.install(|| run_tool(program, &args, timeout))
    }

    /// `music.wav` → `music.ogg` with oggenc; returns the new file.
    pub fn ogg(&self, input: &Path) -> Result<PathBuf, MediaError> {
        let output = input.with_extension("ogg");
        self.run(
            &self.tools.oggenc,
            vec![path_arg(input), "-o".to_string(), path_arg(&output)],
        )?;
        replace(input, output)
    }

    /// `music.wav` → `music.mp3` with lame at 256 kbit/s.
    pub fn mp3(&self, input: &Path) -> Result<PathBuf, MediaError> {
        let output = input.with_extension("mp3");
        self.run(
            &self.tools.lame,
            vec![
                "-q0".to_string(),
                "-b256".to_string(),
                path_arg(input),
                path_arg(&output),
            ],
        )?;
        replace(input, output)
    }

    /// MPEG-2 video → H.264 in the container implied by `output`'s extension,
    /// tagged with the song's metadata.
    pub fn h264(&self, input: &Path, output: &Path, song: &SongRecord) -> Result<PathBuf, MediaError> {
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            path_arg(input),
            "-vcodec".to_string(),
            "libx264".to_string(),
            "-profile:v".to_string(),
            "main".to_string(),
            "-crf".to_string(),
            "20".to_string(),
            "-threads".to_string(),
            "0".to_string(),
            "-metadata".to_string(),
            format!("album={}", song.edition),
            "-metadata".to_string(),
            format!("author={}", song.artist),
            "-metadata".to_string(),
            format!("comment={}", song.genre),
            "-metadata".to_string(),
            format!("title={}", song.title),
            path_arg(output),
        ];
        self.run(&self.tools.ffmpeg, args)?;
        replace(input, output.to_path_buf())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Keep `output` in place of `input` once a pass has produced it.
fn replace(input: &Path, output: PathBuf) -> Result<PathBuf, MediaError> {
    if !output.exists() {
        return Err(MediaError::NoOutput(output));
    }
    std::fs::remove_file(input)?;
    Ok(output)
}
