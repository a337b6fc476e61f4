//! Session & pairing engine
//!
//! Owns every shared component and routes normalized inbound events to the
//! flow handlers in `commands`. Events are consumed one at a time; each one
//! runs in its own task so a failure or panic only affects that event.

use crate::audio::{FilterRunner, Tools, VoiceAnonymizer, VoiceError};
use crate::commands;
use crate::config::Config;
use crate::database::{Database, DatabaseError};
use crate::matchmaker::Matchmaker;
use crate::reports::{ReportError, ReportLedger};
use crate::session::{FlowState, ProfileInput, SessionStore, ValidationError};
use crate::transport::{
    is_cancel_token, Action, Content, Controls, Destination, Inbound, InboundKind, MessageRef,
    Outbound, Transport, TransportError, UserId,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const GENERIC_FAILURE: &str = "⚠️ Something went wrong. Please try again.";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),
    #[error("Not found: {0}")]
    NotFound(&'static str),
    #[error("Database error: {0}")]
    Persistence(#[from] DatabaseError),
    #[error("External tool error: {0}")]
    ExternalTool(#[from] VoiceError),
    #[error("Admin contact is rate limited")]
    RateLimited,
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl From<ReportError> for EngineError {
    fn from(e: ReportError) -> Self {
        match e {
            ReportError::InvalidReportTarget => EngineError::NotFound("chat partner"),
            ReportError::Database(e) => EngineError::Persistence(e),
        }
    }
}

impl EngineError {
    /// Message shown to the user whose event failed
    pub fn user_notice(&self) -> String {
        match self {
            EngineError::Validation(e) => {
                format!("⚠️ {}.\nPlease try again, or send cancel to stop.", e)
            }
            EngineError::NotFound(what) => format!("🔍 Sorry, that {} could not be found.", what),
            EngineError::Persistence(_) => {
                "⚠️ We couldn't save that right now. Please try again.".to_string()
            }
            EngineError::ExternalTool(VoiceError::TooLong { max_secs }) => {
                format!("⚠️ Voice messages can be at most {} seconds long.", max_secs)
            }
            EngineError::ExternalTool(_) => {
                "⚠️ Voice processing failed. Please try again or send a text message instead."
                    .to_string()
            }
            EngineError::RateLimited => {
                "⏳ You can contact the admins once every 7 days. Please try again later."
                    .to_string()
            }
            EngineError::Transport(_) => GENERIC_FAILURE.to_string(),
        }
    }
}

pub struct Engine {
    pub config: Arc<Config>,
    pub db: Arc<Database>,
    pub transport: Arc<dyn Transport>,
    pub sessions: Arc<SessionStore>,
    pub matchmaker: Arc<Matchmaker>,
    pub reports: ReportLedger,
    pub anonymizer: VoiceAnonymizer,
}

impl Engine {
    pub fn new(
        config: Arc<Config>,
        db: Arc<Database>,
        transport: Arc<dyn Transport>,
        runner: Arc<dyn FilterRunner>,
    ) -> Arc<Self> {
        let anonymizer = VoiceAnonymizer::new(
            Tools {
                ffmpeg: config.ffmpeg_path.clone(),
                rubberband: config.rubberband_path.clone(),
            },
            runner,
            transport.clone(),
            config.temp_voice_dir.clone(),
            config.limits.cleanup_grace,
        );
        Arc::new(Self {
            reports: ReportLedger::new(config.limits.report_threshold),
            sessions: Arc::new(SessionStore::new()),
            matchmaker: Arc::new(Matchmaker::new()),
            anonymizer,
            config,
            db,
            transport,
        })
    }

    /// Consume events until every sender is dropped
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<Inbound>) {
        info!("Event consumer started");
        while let Some(event) = events.recv().await {
            self.process(event).await;
        }
        info!("Event consumer stopped");
    }

    /// Handle one event in isolation
    pub async fn process(self: &Arc<Self>, event: Inbound) {
        let user_id = event.sender.id;
        let engine = self.clone();
        match tokio::spawn(async move { engine.handle(event).await }).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                match &e {
                    EngineError::Validation(_)
                    | EngineError::NotFound(_)
                    | EngineError::RateLimited => debug!(user_id, "Event rejected: {}", e),
                    _ => error!(user_id, "Event failed: {}", e),
                }
                self.tell(user_id, e.user_notice(), Controls::none()).await;
            }
            Err(join_error) => {
                error!(user_id, "Event handler panicked: {}", join_error);
                self.tell(user_id, GENERIC_FAILURE, Controls::none()).await;
            }
        }
    }

    pub async fn handle(self: &Arc<Self>, event: Inbound) -> Result<(), EngineError> {
        let user_id = event.sender.id;
        self.db.upsert_user(user_id, &event.sender.display_name)?;
        self.sessions.touch(user_id);

        // Moderation and public-post buttons are pressed outside the DM gates
        if let InboundKind::Action { action, origin } = &event.kind {
            if action.is_channel_action() {
                return commands::moderation::dispatch(self, user_id, *action, *origin).await;
            }
        }

        if self.db.is_banned(user_id)? {
            self.tell(
                user_id,
                "⛔ Your account has been restricted for violating the community guidelines.",
                Controls::none(),
            )
            .await;
            return Ok(());
        }

        if self.db.gender(user_id)?.is_none() {
            return match event.kind {
                InboundKind::Action {
                    action: Action::SetGender(gender),
                    ..
                } => commands::menu::set_gender(self, user_id, gender).await,
                _ => commands::menu::ask_gender(self, user_id).await,
            };
        }

        if let InboundKind::Content(Content::Text(text)) = &event.kind {
            if is_cancel_token(text) {
                return self.cancel(user_id).await;
            }
        }

        match event.kind {
            InboundKind::Start(param) => commands::menu::start(self, user_id, param).await,
            InboundKind::Action { action, origin } => {
                commands::dispatch(self, user_id, action, origin).await
            }
            InboundKind::Content(content) => self.handle_content(user_id, content).await,
        }
    }

    async fn handle_content(self: &Arc<Self>, user_id: UserId, content: Content) -> Result<(), EngineError> {
        match self.sessions.flow(user_id) {
            FlowState::Idle => match self.matchmaker.partner_of(user_id) {
                Some(partner) => commands::blind::relay(self, user_id, partner, content).await,
                None => commands::menu::unrecognized(self, user_id).await,
            },
            FlowState::Profile(draft) => match content {
                Content::Text(text) => {
                    commands::profile::on_input(self, user_id, draft, ProfileInput::Text(&text))
                        .await
                }
                _ => Err(ValidationError::WrongContent {
                    expected: "a text answer",
                }
                .into()),
            },
            FlowState::Confession(draft) => {
                commands::confession::on_content(self, user_id, draft, content).await
            }
            FlowState::Comment(draft) => {
                commands::comments::on_content(self, user_id, draft, content).await
            }
            FlowState::AdminContact => {
                commands::admin_contact::on_content(self, user_id, content).await
            }
        }
    }

    /// Return to idle from any flow
    pub async fn cancel(&self, user_id: UserId) -> Result<(), EngineError> {
        let text = match self.sessions.cancel(user_id) {
            Some(kind) => {
                debug!(user_id, ?kind, "Flow cancelled");
                "❌ Cancelled. Nothing was saved."
            }
            None => "Nothing to cancel.",
        };
        self.tell(user_id, text, commands::menu::main_menu()).await;
        Ok(())
    }

    /// Fire-and-forget send; failures are logged only
    pub async fn send(&self, to: Destination, message: Outbound) -> Option<MessageRef> {
        match self.transport.send(to, message).await {
            Ok(sent) => Some(sent),
            Err(e) => {
                warn!(?to, "Send failed: {}", e);
                None
            }
        }
    }

    pub async fn tell(&self, user_id: UserId, text: impl Into<String>, controls: Controls) {
        self.send(
            Destination::User(user_id),
            Outbound::text(text).controls(controls),
        )
        .await;
    }

    /// Replace a posted message's controls, logging failures
    pub async fn edit(&self, target: MessageRef, text: Option<String>, controls: Controls) {
        if let Err(e) = self.transport.edit(target, text, controls).await {
            warn!(?target, "Edit failed: {}", e);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::database::{Gender, ReviewStatus};
    use crate::session::{ConfessionDraft, ConfessionStep};

    #[tokio::test]
    async fn test_gender_gate_comes_first() {
        let t = engine();
        t.send(text(1, "hello")).await;
        let asked = t.transport.last_to(Destination::User(1)).unwrap();
        assert!(asked
            .controls
            .actions()
            .any(|a| a == Action::SetGender(Gender::Male)));

        t.send(press(1, Action::SetGender(Gender::Female))).await;
        assert_eq!(t.engine.db.gender(1).unwrap(), Some(Gender::Female));

        // Gender cannot be changed afterwards
        t.send(press(1, Action::SetGender(Gender::Male))).await;
        assert_eq!(t.engine.db.gender(1).unwrap(), Some(Gender::Female));
    }

    #[tokio::test]
    async fn test_banned_user_is_restricted() {
        let t = engine();
        t.user(5, Gender::Male);
        t.engine.db.ban_user(5).unwrap();
        t.send(press(5, Action::Confess)).await;
        assert!(t.last_text(5).contains("restricted"));
        assert!(t.engine.sessions.flow(5).is_idle());
    }

    #[tokio::test]
    async fn test_cancel_token_resets_session() {
        let t = engine();
        t.user(1, Gender::Male);
        t.send(press(1, Action::Confess)).await;
        t.send(press(1, Action::TextConfession)).await;
        assert_eq!(
            t.engine.sessions.flow(1),
            FlowState::Confession(ConfessionDraft {
                step: ConfessionStep::AwaitingContent(crate::database::ConfessionKind::Text)
            })
        );

        t.send(press(1, Action::Cancel)).await;
        assert!(t.engine.sessions.flow(1).is_idle());
        assert!(t.last_text(1).contains("Cancelled"));
    }

    #[tokio::test]
    async fn test_validation_error_reprompts_without_advancing() {
        let t = engine();
        t.user(1, Gender::Male);
        t.send(press(1, Action::Confess)).await;
        t.send(press(1, Action::TextConfession)).await;
        t.send(text(1, "short")).await;

        assert!(t.last_text(1).contains("between 10 and 2000"));
        assert!(matches!(
            t.engine.sessions.flow(1),
            FlowState::Confession(ConfessionDraft {
                step: ConfessionStep::AwaitingContent(_)
            })
        ));
        assert_eq!(t.engine.db.user_stats(1).unwrap().confessions, 0);
    }

    #[tokio::test]
    async fn test_text_confession_review_cycle() {
        let t = engine();
        t.user(1, Gender::Female);
        t.send(press(1, Action::Confess)).await;
        t.send(press(1, Action::TextConfession)).await;
        t.send(text(1, "I still think about that rainy day")).await;
        assert!(t.engine.sessions.flow(1).is_idle());

        let card = t.transport.last_to(Destination::Moderation).unwrap();
        let approve = card
            .controls
            .actions()
            .find(|a| matches!(a, Action::Approve(_)))
            .unwrap();
        let Action::Approve(id) = approve else { unreachable!() };

        t.send(press(9, approve)).await;
        let confession = t.engine.db.confession(id).unwrap().unwrap();
        assert_eq!(confession.status, ReviewStatus::Approved);
        assert!(confession.public_post.is_some());
        assert_eq!(t.transport.texts_to(Destination::Public).len(), 1);
        assert!(t.last_text(1).contains("approved"));

        // A second press is answered as already handled
        t.send(press(9, Action::Reject(id))).await;
        assert!(t.last_text(9).contains("already handled"));
        assert_eq!(t.transport.texts_to(Destination::Public).len(), 1);
    }

    #[tokio::test]
    async fn test_failing_event_does_not_stop_consumer() {
        let t = engine();
        t.user(1, Gender::Male);
        let (tx, rx) = mpsc::channel(8);
        let consumer = tokio::spawn(t.engine.clone().run(rx));

        tx.send(press(1, Action::Approve(404))).await.unwrap();
        tx.send(press(1, Action::Help)).await.unwrap();
        drop(tx);
        consumer.await.unwrap();

        let texts = t.transport.texts_to(Destination::User(1));
        assert!(texts[0].contains("could not be found"));
        assert!(texts[1].contains("Help"));
    }
}
