//! External filter stages of the voice pipeline
//!
//! Every stage is a single external process invocation described by a
//! [`FilterCommand`]. A stage is a list of strategies tried in order; the
//! first one that succeeds produces the stage output.

use crate::config::voice;
use crate::database::Gender;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Max stderr kept in an error
const STDERR_TAIL: usize = 400;

pub const MALE_PITCH_FACTORS: [f32; 4] = [0.97, 0.99, 1.01, 1.03];
pub const FEMALE_PITCH_FACTORS: [f32; 3] = [1.05, 1.07, 1.09];

pub const MALE_FALLBACK_RATIO: f32 = 0.85;
pub const FEMALE_FALLBACK_RATIO: f32 = 1.15;

#[derive(Error, Debug)]
pub enum StageError {
    #[error("{program} is not available: {source}")]
    Unavailable {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} failed ({status}): {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
    #[error("{program} produced no output at {path:?}")]
    MissingOutput { program: String, path: PathBuf },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One fully-specified external process invocation
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCommand {
    /// Strategy name, used for logs and test scripting
    pub strategy: &'static str,
    pub program: String,
    pub args: Vec<String>,
    /// File the process must produce
    pub output: PathBuf,
}

/// Runs filter commands; swapped for a scripted double in tests
#[async_trait]
pub trait FilterRunner: Send + Sync {
    async fn run(&self, command: &FilterCommand) -> Result<(), StageError>;
}

/// Runs filters as child processes with a per-invocation timeout
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl FilterRunner for ProcessRunner {
    async fn run(&self, command: &FilterCommand) -> Result<(), StageError> {
        debug!(
            strategy = command.strategy,
            program = %command.program,
            args = ?command.args,
            "Running filter"
        );

        let child = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    StageError::Unavailable {
                        program: command.program.clone(),
                        source: e,
                    }
                }
                _ => StageError::Io(e),
            })?;

        // Dropping the wait future on timeout kills the child
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| StageError::TimedOut {
                program: command.program.clone(),
                timeout: self.timeout,
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail_start = stderr
                .char_indices()
                .rev()
                .nth(STDERR_TAIL)
                .map(|(i, _)| i)
                .unwrap_or(0);
            return Err(StageError::Failed {
                program: command.program.clone(),
                status: output.status.to_string(),
                stderr: stderr[tail_start..].trim().to_string(),
            });
        }

        match tokio::fs::metadata(&command.output).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(StageError::MissingOutput {
                program: command.program.clone(),
                path: command.output.clone(),
            }),
        }
    }
}

/// Executable locations for the filter programs
#[derive(Debug, Clone)]
pub struct Tools {
    pub ffmpeg: String,
    pub rubberband: String,
}

/// A concrete way to perform one stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Strategy {
    Normalize,
    RubberBand { factor: f32 },
    ResampleFallback { ratio: f32 },
    Encode,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Normalize => "normalize",
            Strategy::RubberBand { .. } => "rubberband",
            Strategy::ResampleFallback { .. } => "resample_fallback",
            Strategy::Encode => "encode",
        }
    }

    /// Output file name inside the job directory
    fn output_name(&self) -> &'static str {
        match self {
            Strategy::Normalize => "normalized.wav",
            Strategy::RubberBand { .. } | Strategy::ResampleFallback { .. } => "shifted.wav",
            Strategy::Encode => "final.ogg",
        }
    }

    pub fn command(&self, tools: &Tools, input: &Path, workdir: &Path) -> FilterCommand {
        let output = workdir.join(self.output_name());
        let input_arg = input.display().to_string();
        let output_arg = output.display().to_string();
        let rate = voice::SAMPLE_RATE;

        let (program, args): (&str, Vec<String>) = match self {
            Strategy::Normalize => (
                tools.ffmpeg.as_str(),
                vec![
                    "-y".into(),
                    "-hide_banner".into(),
                    "-loglevel".into(),
                    "error".into(),
                    "-i".into(),
                    input_arg,
                    "-ac".into(),
                    "1".into(),
                    "-ar".into(),
                    rate.to_string(),
                    "-af".into(),
                    format!(
                        "highpass=f={},lowpass=f={}",
                        voice::HIGHPASS_HZ,
                        voice::LOWPASS_HZ
                    ),
                    output_arg,
                ],
            ),
            Strategy::RubberBand { factor } => (
                tools.rubberband.as_str(),
                vec![
                    "-t".into(),
                    "1.0".into(),
                    "-f".into(),
                    format!("{:.2}", factor),
                    "-F".into(),
                    input_arg,
                    output_arg,
                ],
            ),
            Strategy::ResampleFallback { ratio } => (
                tools.ffmpeg.as_str(),
                vec![
                    "-y".into(),
                    "-hide_banner".into(),
                    "-loglevel".into(),
                    "error".into(),
                    "-i".into(),
                    input_arg,
                    "-af".into(),
                    format!(
                        "asetrate={rate}*{ratio:.2},aresample={rate},atempo=1/{ratio:.2}"
                    ),
                    output_arg,
                ],
            ),
            Strategy::Encode => (
                tools.ffmpeg.as_str(),
                vec![
                    "-y".into(),
                    "-hide_banner".into(),
                    "-loglevel".into(),
                    "error".into(),
                    "-i".into(),
                    input_arg,
                    "-c:a".into(),
                    "libopus".into(),
                    "-b:a".into(),
                    voice::OPUS_BITRATE.into(),
                    output_arg,
                ],
            ),
        };

        FilterCommand {
            strategy: self.name(),
            program: program.to_string(),
            args,
            output,
        }
    }
}

/// One pipeline stage and the strategies that can perform it
#[derive(Debug, Clone, PartialEq)]
pub struct StagePlan {
    pub stage: &'static str,
    pub strategies: Vec<Strategy>,
}

/// The three filter stages for a speaker of `gender`, using `factor` for
/// the primary pitch shift
pub fn plan(gender: Gender, factor: f32) -> Vec<StagePlan> {
    vec![
        StagePlan {
            stage: "normalize",
            strategies: vec![Strategy::Normalize],
        },
        StagePlan {
            stage: "pitch_shift",
            strategies: vec![
                Strategy::RubberBand { factor },
                Strategy::ResampleFallback {
                    ratio: fallback_ratio(gender),
                },
            ],
        },
        StagePlan {
            stage: "encode",
            strategies: vec![Strategy::Encode],
        },
    ]
}

pub fn pitch_factors(gender: Gender) -> &'static [f32] {
    match gender {
        Gender::Male => &MALE_PITCH_FACTORS,
        Gender::Female => &FEMALE_PITCH_FACTORS,
    }
}

pub fn fallback_ratio(gender: Gender) -> f32 {
    match gender {
        Gender::Male => MALE_FALLBACK_RATIO,
        Gender::Female => FEMALE_FALLBACK_RATIO,
    }
}
