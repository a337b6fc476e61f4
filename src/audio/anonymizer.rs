//! Voice anonymization jobs
//!
//! A job fetches the source clip, runs the filter stages in a disposable
//! working directory and uploads the encoded result. The source bytes are
//! never uploaded: any stage without a remaining strategy aborts the job.

use super::probe::{self, ProbeError};
use super::stages::{self, FilterRunner, StageError, StagePlan, Strategy, Tools};
use crate::database::Gender;
use crate::transport::{FileRef, Transport, TransportError};
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Could not fetch source audio: {0}")]
    Fetch(#[source] TransportError),
    #[error("Voice clip is longer than {max_secs} seconds")]
    TooLong { max_secs: u64 },
    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: StageError,
    },
    #[error("Encoded output is unreadable: {0}")]
    UnreadableOutput(#[source] ProbeError),
    #[error("Encoded output is empty")]
    EmptyOutput,
    #[error("Upload failed: {0}")]
    Upload(#[source] TransportError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the pitch was actually shifted
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PitchOutcome {
    Primary { factor: f32 },
    Fallback { ratio: f32 },
}

/// Input of one anonymization run
#[derive(Debug, Clone)]
pub struct VoiceJob {
    pub source: FileRef,
    pub gender: Gender,
    /// Duration reported by the platform, if any
    pub duration: Option<Duration>,
    pub max_duration: Duration,
    /// Caption of the uploaded result
    pub caption: String,
}

#[derive(Debug, Clone)]
pub struct AnonymizedVoice {
    pub file: FileRef,
    pub pitch: PitchOutcome,
    pub duration: Option<Duration>,
}

pub struct VoiceAnonymizer {
    tools: Tools,
    runner: Arc<dyn FilterRunner>,
    transport: Arc<dyn Transport>,
    temp_root: PathBuf,
    cleanup_grace: Duration,
}

impl VoiceAnonymizer {
    pub fn new(
        tools: Tools,
        runner: Arc<dyn FilterRunner>,
        transport: Arc<dyn Transport>,
        temp_root: PathBuf,
        cleanup_grace: Duration,
    ) -> Self {
        Self {
            tools,
            runner,
            transport,
            temp_root,
            cleanup_grace,
        }
    }

    /// Run one job end to end; the working directory is always released
    pub async fn anonymize(&self, job: VoiceJob) -> Result<AnonymizedVoice, VoiceError> {
        tokio::fs::create_dir_all(&self.temp_root).await?;
        let workdir = tempfile::Builder::new()
            .prefix("voice-")
            .tempdir_in(&self.temp_root)?;

        let started = Instant::now();
        let result = self.run_job(&job, workdir.path()).await;
        match &result {
            Ok(voice) => info!(
                gender = job.gender.as_str(),
                pitch = ?voice.pitch,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Voice anonymized"
            ),
            Err(e) => warn!(gender = job.gender.as_str(), "Voice job failed: {}", e),
        }

        self.schedule_cleanup(workdir);
        result
    }

    async fn run_job(&self, job: &VoiceJob, workdir: &Path) -> Result<AnonymizedVoice, VoiceError> {
        let source = self
            .transport
            .fetch_file(&job.source)
            .await
            .map_err(VoiceError::Fetch)?;

        let duration = match job.duration {
            Some(d) => Some(d),
            None => match probe::opus_duration(&source) {
                Ok(d) => d,
                Err(e) => {
                    debug!("Source is not a readable Ogg/Opus clip: {}", e);
                    None
                }
            },
        };
        if duration.is_some_and(|d| d > job.max_duration) {
            return Err(VoiceError::TooLong {
                max_secs: job.max_duration.as_secs(),
            });
        }

        let mut input = workdir.join("source");
        tokio::fs::write(&input, &source).await?;

        let factor = choose_factor(job.gender);
        let mut pitch = PitchOutcome::Primary { factor };
        for plan in stages::plan(job.gender, factor) {
            let (strategy, output) = self.run_stage(&plan, &input, workdir).await?;
            match strategy {
                Strategy::RubberBand { factor } => pitch = PitchOutcome::Primary { factor },
                Strategy::ResampleFallback { ratio } => pitch = PitchOutcome::Fallback { ratio },
                Strategy::Normalize | Strategy::Encode => {}
            }
            input = output;
        }

        let encoded = tokio::fs::read(&input).await?;
        if encoded.is_empty() {
            return Err(VoiceError::EmptyOutput);
        }
        let encoded_duration = probe::opus_duration(&encoded)
            .map_err(VoiceError::UnreadableOutput)?
            .ok_or(VoiceError::EmptyOutput)?;
        // Untimed non-Opus sources are only measurable here
        if encoded_duration > job.max_duration {
            return Err(VoiceError::TooLong {
                max_secs: job.max_duration.as_secs(),
            });
        }

        let file = self
            .transport
            .upload_voice(encoded, job.caption.clone())
            .await
            .map_err(VoiceError::Upload)?;

        Ok(AnonymizedVoice {
            file,
            pitch,
            duration: Some(encoded_duration),
        })
    }

    /// Try the stage's strategies in order; the last failure aborts the job
    async fn run_stage(
        &self,
        plan: &StagePlan,
        input: &Path,
        workdir: &Path,
    ) -> Result<(Strategy, PathBuf), VoiceError> {
        let mut last_error = None;
        for strategy in &plan.strategies {
            let command = strategy.command(&self.tools, input, workdir);
            match self.runner.run(&command).await {
                Ok(()) => {
                    debug!(stage = plan.stage, strategy = strategy.name(), "Stage complete");
                    return Ok((*strategy, command.output));
                }
                Err(e) => {
                    warn!(
                        stage = plan.stage,
                        strategy = strategy.name(),
                        "Stage strategy failed: {}",
                        e
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(VoiceError::Stage {
            stage: plan.stage,
            source: last_error.unwrap_or_else(|| StageError::MissingOutput {
                program: plan.stage.to_string(),
                path: workdir.to_path_buf(),
            }),
        })
    }

    /// Remove the working directory after a short grace period
    fn schedule_cleanup(&self, workdir: TempDir) {
        let grace = self.cleanup_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let path = workdir.path().to_path_buf();
            if let Err(e) = workdir.close() {
                warn!("Failed to remove voice workdir {:?}: {}", path, e);
            }
        });
    }
}

fn choose_factor(gender: Gender) -> f32 {
    stages::pitch_factors(gender)
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(1.0)
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedRunner;
    use super::*;
    use crate::transport::testing::RecordingTransport;

    struct Harness {
        anonymizer: VoiceAnonymizer,
        runner: Arc<ScriptedRunner>,
        transport: Arc<RecordingTransport>,
        _root: TempDir,
    }

    fn harness(runner: ScriptedRunner) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(runner);
        let transport = Arc::new(RecordingTransport::new());
        let anonymizer = VoiceAnonymizer::new(
            Tools {
                ffmpeg: "ffmpeg".into(),
                rubberband: "rubberband".into(),
            },
            runner.clone(),
            transport.clone(),
            root.path().join("voice"),
            Duration::ZERO,
        );
        Harness {
            anonymizer,
            runner,
            transport,
            _root: root,
        }
    }

    fn job(gender: Gender) -> VoiceJob {
        VoiceJob {
            source: FileRef("https://cdn.example/voice.ogg".into()),
            gender,
            duration: Some(Duration::from_secs(12)),
            max_duration: Duration::from_secs(120),
            caption: "test".into(),
        }
    }

    #[tokio::test]
    async fn test_female_primary_factor() {
        let h = harness(ScriptedRunner::new());
        let voice = h.anonymizer.anonymize(job(Gender::Female)).await.unwrap();

        match voice.pitch {
            PitchOutcome::Primary { factor } => {
                assert!(stages::FEMALE_PITCH_FACTORS.contains(&factor))
            }
            other => panic!("expected primary shift, got {:?}", other),
        }
        assert_eq!(h.runner.strategies(), ["normalize", "rubberband", "encode"]);

        let uploads = h.transport.uploads.lock();
        assert_eq!(uploads.len(), 1);
        assert_ne!(uploads[0], b"source:https://cdn.example/voice.ogg".to_vec());
        assert_eq!(voice.file, FileRef("uploaded://1".into()));
    }

    #[tokio::test]
    async fn test_male_factor_set() {
        let h = harness(ScriptedRunner::new());
        for _ in 0..8 {
            let voice = h.anonymizer.anonymize(job(Gender::Male)).await.unwrap();
            let PitchOutcome::Primary { factor } = voice.pitch else {
                panic!("expected primary shift");
            };
            assert!(stages::MALE_PITCH_FACTORS.contains(&factor));
        }
    }

    #[tokio::test]
    async fn test_fallback_when_rubberband_missing() {
        let h = harness(ScriptedRunner::new().unavailable("rubberband"));
        let voice = h.anonymizer.anonymize(job(Gender::Female)).await.unwrap();

        assert_eq!(voice.pitch, PitchOutcome::Fallback { ratio: 1.15 });
        assert_eq!(
            h.runner.strategies(),
            ["normalize", "rubberband", "resample_fallback", "encode"]
        );
        assert_eq!(h.transport.uploads.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_normalize_failure_is_fatal() {
        let h = harness(ScriptedRunner::new().failing("normalize"));
        let err = h.anonymizer.anonymize(job(Gender::Male)).await.unwrap_err();

        assert!(matches!(err, VoiceError::Stage { stage: "normalize", .. }));
        assert_eq!(h.runner.strategies(), ["normalize"]);
        assert!(h.transport.uploads.lock().is_empty());
    }

    #[tokio::test]
    async fn test_both_pitch_strategies_failing_aborts() {
        let h = harness(
            ScriptedRunner::new()
                .failing("rubberband")
                .failing("resample_fallback"),
        );
        let err = h.anonymizer.anonymize(job(Gender::Female)).await.unwrap_err();
        assert!(matches!(err, VoiceError::Stage { stage: "pitch_shift", .. }));
        assert!(h.transport.uploads.lock().is_empty());
    }

    #[tokio::test]
    async fn test_too_long_and_upload_failure() {
        let h = harness(ScriptedRunner::new());
        let mut long = job(Gender::Male);
        long.duration = Some(Duration::from_secs(121));
        let err = h.anonymizer.anonymize(long).await.unwrap_err();
        assert!(matches!(err, VoiceError::TooLong { max_secs: 120 }));
        assert!(h.runner.strategies().is_empty());

        h.transport
            .fail_uploads
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let err = h.anonymizer.anonymize(job(Gender::Male)).await.unwrap_err();
        assert!(matches!(err, VoiceError::Upload(_)));
    }

    #[tokio::test]
    async fn test_untimed_source_checked_after_encoding() {
        let h = harness(ScriptedRunner::new().output_millis(300_000));
        let mut untimed = job(Gender::Female);
        untimed.duration = None;

        let err = h.anonymizer.anonymize(untimed).await.unwrap_err();
        assert!(matches!(err, VoiceError::TooLong { max_secs: 120 }));
        assert_eq!(h.runner.strategies(), ["normalize", "rubberband", "encode"]);
        assert!(h.transport.uploads.lock().is_empty());
    }

    #[tokio::test]
    async fn test_untimed_source_within_limit() {
        let h = harness(ScriptedRunner::new().output_millis(120_000));
        let mut untimed = job(Gender::Male);
        untimed.duration = None;

        let voice = h.anonymizer.anonymize(untimed).await.unwrap();
        assert_eq!(voice.duration, Some(Duration::from_secs(120)));
        assert_eq!(h.transport.uploads.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_workdir_removed_after_job() {
        let h = harness(ScriptedRunner::new().failing("encode"));
        let _ = h.anonymizer.anonymize(job(Gender::Male)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let root = h.anonymizer.temp_root.clone();
        let leftovers = std::fs::read_dir(&root).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
