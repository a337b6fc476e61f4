//! Text and voice confession submission

use super::{cancel_controls, menu, moderation};
use crate::audio::{AnonymizedVoice, VoiceError, VoiceJob};
use crate::database::ConfessionKind;
use crate::engine::{Engine, EngineError};
use crate::session::{
    validate_text, validate_voice, ConfessionDraft, ConfessionStep, FlowState, ValidationError,
    CONFESSION_TEXT,
};
use crate::transport::{Action, Button, Content, Controls, FileRef, Tone, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub async fn choose_type(engine: &Arc<Engine>, user_id: UserId) -> Result<(), EngineError> {
    engine.sessions.set_flow(
        user_id,
        FlowState::Confession(ConfessionDraft {
            step: ConfessionStep::ChoosingType,
        }),
    );
    engine
        .tell(
            user_id,
            "📝 **New Confession**\n\nHow would you like to confess?",
            Controls::none()
                .row(vec![
                    Button::new("✍️ Text", Action::TextConfession).tone(Tone::Primary),
                    Button::new("🎤 Voice", Action::VoiceConfession).tone(Tone::Primary),
                ])
                .row(cancel_controls().rows.concat()),
        )
        .await;
    Ok(())
}

pub async fn choose(
    engine: &Arc<Engine>,
    user_id: UserId,
    kind: ConfessionKind,
) -> Result<(), EngineError> {
    engine.sessions.set_flow(
        user_id,
        FlowState::Confession(ConfessionDraft {
            step: ConfessionStep::AwaitingContent(kind),
        }),
    );
    let text = match kind {
        ConfessionKind::Text => format!(
            "✍️ Type your confession ({}-{} characters).\n\nIt will be reviewed before it is posted.",
            CONFESSION_TEXT.0, CONFESSION_TEXT.1
        ),
        ConfessionKind::Voice => format!(
            "🎤 Record a voice message (up to {} seconds).\n\n\
             Your voice will be pitch-shifted so nobody can recognize it.",
            engine.config.limits.max_confession_voice.as_secs()
        ),
    };
    engine.tell(user_id, text, cancel_controls()).await;
    Ok(())
}

/// Content received while a confession flow is active
pub async fn on_content(
    engine: &Arc<Engine>,
    user_id: UserId,
    draft: ConfessionDraft,
    content: Content,
) -> Result<(), EngineError> {
    match (draft.step, content) {
        (ConfessionStep::AwaitingContent(ConfessionKind::Text), Content::Text(text)) => {
            submit_text(engine, user_id, &text).await
        }
        (ConfessionStep::AwaitingContent(ConfessionKind::Voice), Content::Voice { file, duration }) => {
            submit_voice(engine, user_id, file, duration).await
        }
        (ConfessionStep::AwaitingContent(ConfessionKind::Text), _) => {
            Err(ValidationError::WrongContent {
                expected: "a text message",
            }
            .into())
        }
        (ConfessionStep::AwaitingContent(ConfessionKind::Voice), _) => {
            Err(ValidationError::WrongContent {
                expected: "a voice message",
            }
            .into())
        }
        (ConfessionStep::ChoosingType, _) => {
            engine
                .tell(
                    user_id,
                    "Please choose Text or Voice first.",
                    cancel_controls(),
                )
                .await;
            Ok(())
        }
        (ConfessionStep::Processing { .. }, _) => {
            engine
                .tell(
                    user_id,
                    "⏳ Your voice confession is still being processed. Please wait.",
                    cancel_controls(),
                )
                .await;
            Ok(())
        }
    }
}

async fn submit_text(engine: &Arc<Engine>, user_id: UserId, text: &str) -> Result<(), EngineError> {
    let text = validate_text(text, CONFESSION_TEXT)?;
    let id = engine.db.save_text_confession(user_id, &text)?;
    engine.sessions.reset(user_id);
    info!(user_id, confession_id = id, "Text confession submitted");

    if let Some(confession) = engine.db.confession(id)? {
        moderation::submit_for_review(engine, &confession).await;
    }
    confirm(engine, user_id, id).await;
    Ok(())
}

async fn submit_voice(
    engine: &Arc<Engine>,
    user_id: UserId,
    file: FileRef,
    duration: Option<Duration>,
) -> Result<(), EngineError> {
    let max = engine.config.limits.max_confession_voice;
    if let Some(duration) = duration {
        validate_voice(duration, max)?;
    }
    let gender = engine
        .db
        .gender(user_id)?
        .ok_or(EngineError::NotFound("declared gender"))?;

    let job_id = engine.sessions.begin_voice_job(user_id);
    engine
        .tell(
            user_id,
            "🔄 Processing your voice. This takes a few seconds...",
            cancel_controls(),
        )
        .await;

    let job = VoiceJob {
        source: file,
        gender,
        duration,
        max_duration: max,
        caption: "🎤 Anonymous voice confession".to_string(),
    };
    let engine = engine.clone();
    tokio::spawn(async move {
        let result = engine.anonymizer.anonymize(job).await;
        if let Err(e) = finish(&engine, user_id, job_id, result).await {
            engine.tell(user_id, e.user_notice(), menu::main_menu()).await;
        }
    });
    Ok(())
}

/// Persist a finished voice job unless the user moved on meanwhile
async fn finish(
    engine: &Arc<Engine>,
    user_id: UserId,
    job_id: u64,
    result: Result<AnonymizedVoice, VoiceError>,
) -> Result<(), EngineError> {
    match result {
        Ok(voice) => {
            if !engine.sessions.finish_voice_job(user_id, job_id) {
                debug!(user_id, job_id, "Voice result discarded; flow was cancelled");
                return Ok(());
            }
            let id = engine.db.save_voice_confession(user_id, &voice.file.0)?;
            info!(user_id, confession_id = id, pitch = ?voice.pitch, "Voice confession submitted");
            if let Some(confession) = engine.db.confession(id)? {
                moderation::submit_for_review(engine, &confession).await;
            }
            confirm(engine, user_id, id).await;
            Ok(())
        }
        Err(e) => {
            if !engine.sessions.finish_voice_job(user_id, job_id) {
                debug!(user_id, job_id, "Voice failure ignored; flow was cancelled");
                return Ok(());
            }
            let VoiceError::TooLong { max_secs } = e else {
                return Err(e.into());
            };
            // Untimed clips are measured after encoding; stay on the voice step
            engine.sessions.set_flow(
                user_id,
                FlowState::Confession(ConfessionDraft {
                    step: ConfessionStep::AwaitingContent(ConfessionKind::Voice),
                }),
            );
            let notice = EngineError::from(ValidationError::VoiceTooLong { max_secs }).user_notice();
            engine.tell(user_id, notice, cancel_controls()).await;
            Ok(())
        }
    }
}

async fn confirm(engine: &Arc<Engine>, user_id: UserId, confession_id: i64) {
    engine
        .tell(
            user_id,
            format!(
                "✅ Confession #{} received!\n\nIt will be posted once a moderator reviews it.",
                confession_id
            ),
            menu::main_menu(),
        )
        .await;
}
