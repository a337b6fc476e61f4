//! Blind Connect: matching, chat relay, gestures and reports

use super::menu;
use crate::audio::VoiceJob;
use crate::engine::{Engine, EngineError};
use crate::matchmaker::{EndOutcome, MatchOutcome, Partner};
use crate::reports::ReportReason;
use crate::session::validate_voice;
use crate::transport::{
    Action, Button, Content, Controls, Destination, FileRef, Media, Outbound, Tone, UserId,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const RULE: &str = "──────────────";

/// Buttons shown to both sides while paired
pub fn chat_controls() -> Controls {
    Controls::none()
        .row(vec![
            Button::new("❤️ Send Heart", Action::SendHeart),
            Button::new("😊 Send Smile", Action::SendSmile),
            Button::new("🎤 Send Voice", Action::VoiceTip),
            Button::new("📸 Send Photo", Action::PhotoTip),
        ])
        .row(vec![
            Button::new("💔 End Chat", Action::EndChat).tone(Tone::Danger),
            Button::new("🚨 Report User", Action::Report).tone(Tone::Danger),
        ])
}

fn searching_controls() -> Controls {
    Controls::none().row(vec![
        Button::new("❌ Cancel Search", Action::CancelSearch).tone(Tone::Danger)
    ])
}

async fn not_in_chat(engine: &Engine, user_id: UserId) -> Result<(), EngineError> {
    engine
        .tell(
            user_id,
            "⚠️ **Not in Chat**\n\nUse Blind Connect to find someone first.",
            menu::main_menu(),
        )
        .await;
    Ok(())
}

/// The sender's alias as shown to `partner`
fn alias_seen_by(engine: &Engine, partner: &Partner) -> String {
    engine
        .matchmaker
        .partner_of(partner.user_id)
        .map(|p| p.alias)
        .unwrap_or_else(|| "your partner".to_string())
}

fn connection_text(alias: &str) -> String {
    format!(
        "💖 **Connection Made!**\n{RULE}\n\n✨ You're now connected with **{}**\n\n\
         🌹 This is a safe, anonymous space. Chat freely and respectfully.\n\
         🎤 Voice messages are disguised before delivery.\n\n{RULE}\n\
         **Ground rules:** be respectful, share no personal information, report any discomfort.",
        alias
    )
}

pub async fn connect(engine: &Arc<Engine>, user_id: UserId) -> Result<(), EngineError> {
    let Some(profile) = engine.db.profile(user_id)?.filter(|p| p.profile_complete) else {
        engine
            .tell(
                user_id,
                "👤 You need a Blind Connect profile first.",
                Controls::none().row(vec![
                    Button::new("👤 Create Profile", Action::Profile).tone(Tone::Primary),
                    Button::new("🏠 Menu", Action::MainMenu),
                ]),
            )
            .await;
        return Ok(());
    };

    match engine.matchmaker.request_match(&profile) {
        MatchOutcome::Paired { partner } => {
            engine
                .tell(user_id, connection_text(&partner.alias), chat_controls())
                .await;
            engine
                .tell(partner.user_id, connection_text(&profile.alias()), chat_controls())
                .await;
        }
        MatchOutcome::Waiting { displaced } => {
            if let Some(displaced) = displaced {
                debug!(user_id, displaced, "Previous waiter displaced without notice");
            }
            engine
                .tell(
                    user_id,
                    "💝 **Looking for a compatible match...**\n\n\
                     You'll be connected as soon as someone compatible joins.",
                    searching_controls(),
                )
                .await;
        }
        MatchOutcome::AlreadyPaired { partner } => {
            engine
                .tell(
                    user_id,
                    format!("💬 You're already chatting with **{}**.", partner.alias),
                    chat_controls(),
                )
                .await;
        }
        MatchOutcome::AlreadyWaiting => {
            engine
                .tell(user_id, "⏳ Still searching for a match...", searching_controls())
                .await;
        }
    }
    Ok(())
}

pub async fn cancel_search(engine: &Arc<Engine>, user_id: UserId) -> Result<(), EngineError> {
    let text = if engine.matchmaker.cancel_search(user_id) {
        "❌ Search cancelled."
    } else {
        "You are not searching for a match."
    };
    engine.tell(user_id, text, menu::main_menu()).await;
    Ok(())
}

pub async fn end_chat(engine: &Arc<Engine>, user_id: UserId) -> Result<(), EngineError> {
    let partner = engine.matchmaker.partner_of(user_id);
    match engine.matchmaker.end_chat(user_id) {
        EndOutcome::Ended { partner: partner_id } => {
            let alias = partner.map(|p| p.alias).unwrap_or_default();
            info!(user_id, partner_id, "Blind chat ended");
            engine
                .tell(
                    user_id,
                    format!(
                        "👋 **Chat Ended**\n{RULE}\n\nYou left the chat with {}.\n\
                         Want to chat again? Use Blind Connect.",
                        alias
                    ),
                    menu::main_menu(),
                )
                .await;
            engine
                .tell(
                    partner_id,
                    format!(
                        "⚠️ **Chat Ended**\n{RULE}\n\nYour partner left the chat.\n\
                         Use Blind Connect to find someone new."
                    ),
                    menu::main_menu(),
                )
                .await;
            Ok(())
        }
        EndOutcome::NotInChat => not_in_chat(engine, user_id).await,
    }
}

/// Take a user out of any pairing state, telling the partner
pub async fn remove_from_chat(engine: &Arc<Engine>, user_id: UserId) {
    engine.matchmaker.cancel_search(user_id);
    if let EndOutcome::Ended { partner } = engine.matchmaker.end_chat(user_id) {
        engine
            .tell(
                partner,
                format!("⚠️ **Chat Ended**\n{RULE}\n\nThis chat has been closed by the moderators."),
                menu::main_menu(),
            )
            .await;
    }
}

pub async fn report_menu(engine: &Arc<Engine>, user_id: UserId) -> Result<(), EngineError> {
    let Some(partner) = engine.matchmaker.partner_of(user_id) else {
        return not_in_chat(engine, user_id).await;
    };
    let buttons: Vec<Button> = ReportReason::ALL
        .into_iter()
        .map(|reason| {
            Button::new(
                reason.label(),
                Action::ReportReason {
                    reason,
                    reported: partner.user_id,
                },
            )
        })
        .collect();
    let (first, second) = buttons.split_at(buttons.len() / 2);
    engine
        .tell(
            user_id,
            format!(
                "🚨 **Report {}**\n\nWhy are you reporting this user?",
                partner.alias
            ),
            Controls::none().row(first.to_vec()).row(second.to_vec()),
        )
        .await;
    Ok(())
}

pub async fn file_report(
    engine: &Arc<Engine>,
    user_id: UserId,
    reported: UserId,
    reason: ReportReason,
) -> Result<(), EngineError> {
    let filed = engine
        .reports
        .file(&engine.matchmaker, &engine.db, user_id, reported, reason)?;

    engine
        .tell(
            user_id,
            format!(
                "✅ **Report Submitted**\n{RULE}\n\n📝 Reason: {}\n📊 Reports against user: {}/{}\n\n\
                 Thank you for keeping the community safe! 💖",
                reason.label(),
                filed.count,
                engine.reports.threshold()
            ),
            chat_controls(),
        )
        .await;

    if filed.threshold_crossed {
        auto_ban(engine, reported, filed.count).await?;
    }
    Ok(())
}

async fn auto_ban(engine: &Arc<Engine>, user_id: UserId, count: u32) -> Result<(), EngineError> {
    engine.db.ban_user(user_id)?;
    warn!(user_id, count, "User banned after repeated reports");
    remove_from_chat(engine, user_id).await;
    engine.sessions.reset(user_id);

    engine
        .send(
            Destination::Moderation,
            Outbound::text(format!(
                "⛔ **AUTO-BAN**\n{RULE}\n\n👤 User `{}` was banned after {} reports in Blind Connect.",
                user_id, count
            )),
        )
        .await;
    engine
        .tell(
            user_id,
            "⛔ Your account has been restricted after repeated reports from chat partners.",
            Controls::none(),
        )
        .await;
    Ok(())
}

pub async fn gesture(engine: &Arc<Engine>, user_id: UserId, text: &str) -> Result<(), EngineError> {
    let Some(partner) = engine.matchmaker.partner_of(user_id) else {
        return not_in_chat(engine, user_id).await;
    };
    engine.tell(partner.user_id, text, chat_controls()).await;
    engine.tell(user_id, "✨ Sent!", chat_controls()).await;
    Ok(())
}

pub async fn voice_tip(engine: &Arc<Engine>, user_id: UserId) -> Result<(), EngineError> {
    engine
        .tell(
            user_id,
            format!(
                "🎤 Record a voice message (up to {} seconds). It is disguised before your \
                 partner hears it.",
                engine.config.limits.max_chat_voice.as_secs()
            ),
            chat_controls(),
        )
        .await;
    Ok(())
}

pub async fn photo_tip(engine: &Arc<Engine>, user_id: UserId) -> Result<(), EngineError> {
    engine
        .tell(
            user_id,
            "📸 Send a photo and it will be forwarded to your partner. \
             Make sure it shows nothing that identifies you.",
            chat_controls(),
        )
        .await;
    Ok(())
}

/// Forward content to the chat partner under the sender's alias
pub async fn relay(
    engine: &Arc<Engine>,
    user_id: UserId,
    partner: Partner,
    content: Content,
) -> Result<(), EngineError> {
    let alias = alias_seen_by(engine, &partner);
    let message = match content {
        Content::Text(text) => Outbound::text(format!("💬 **From {}:**\n{}", alias, text)),
        Content::Photo { file, caption } => {
            let text = match caption {
                Some(caption) => format!("📸 **Photo from {}:**\n{}", alias, caption),
                None => format!("📸 **Photo from {}**", alias),
            };
            Outbound::text(text).media(Media::Photo(file))
        }
        Content::Document { file, name } => {
            Outbound::text(format!("📎 **File from {}**", alias)).media(Media::Document { file, name })
        }
        Content::Voice { file, duration } => {
            return relay_voice(engine, user_id, partner, alias, file, duration).await;
        }
    };
    engine
        .send(
            Destination::User(partner.user_id),
            message.controls(chat_controls()),
        )
        .await;
    Ok(())
}

async fn relay_voice(
    engine: &Arc<Engine>,
    user_id: UserId,
    partner: Partner,
    alias: String,
    file: FileRef,
    duration: Option<Duration>,
) -> Result<(), EngineError> {
    let max = engine.config.limits.max_chat_voice;
    if let Some(duration) = duration {
        validate_voice(duration, max)?;
    }
    let gender = engine
        .db
        .gender(user_id)?
        .ok_or(EngineError::NotFound("declared gender"))?;

    let job = VoiceJob {
        source: file,
        gender,
        duration,
        max_duration: max,
        caption: format!("🎤 Voice from {}", alias),
    };
    let engine = engine.clone();
    tokio::spawn(async move {
        match engine.anonymizer.anonymize(job).await {
            Ok(voice) => {
                // Deliver only to the partner the clip was sent to
                if !engine.matchmaker.are_paired(user_id, partner.user_id) {
                    debug!(user_id, "Chat ended before the voice message was ready");
                    return;
                }
                engine
                    .send(
                        Destination::User(partner.user_id),
                        Outbound::text(format!("🎤 **Voice from {}**", alias))
                            .media(Media::Voice(voice.file))
                            .controls(chat_controls()),
                    )
                    .await;
            }
            Err(e) => {
                let notice = EngineError::from(e).user_notice();
                engine.tell(user_id, notice, chat_controls()).await;
            }
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::anonymizer::testing::ScriptedRunner;
    use crate::database::{BlindProfile, Gender, PrefGender, YearOfStudy};
    use crate::engine::testing::*;
    use crate::transport::InboundKind;
    use chrono::Utc;

    fn profile(user_id: UserId, gender: Gender, year: YearOfStudy) -> BlindProfile {
        BlindProfile {
            user_id,
            gender,
            age: 21,
            years_on_campus: 2,
            year_of_study: year,
            pref_gender: PrefGender::Both,
            pref_age_min: 18,
            pref_age_max: 30,
            profile_complete: true,
            created_at: Utc::now(),
        }
    }

    async fn paired(t: &TestEngine) {
        t.user(1, Gender::Male);
        t.user(2, Gender::Female);
        t.engine
            .db
            .save_profile(&profile(1, Gender::Male, YearOfStudy::Third))
            .unwrap();
        t.engine
            .db
            .save_profile(&profile(2, Gender::Female, YearOfStudy::First))
            .unwrap();
        t.send(press(1, Action::BlindConnect)).await;
        assert!(t.last_text(1).contains("Looking for a compatible match"));
        t.send(press(2, Action::BlindConnect)).await;
        assert!(t.engine.matchmaker.are_paired(1, 2));
    }

    fn voice(user_id: UserId, secs: u64) -> crate::transport::Inbound {
        dm(
            user_id,
            InboundKind::Content(Content::Voice {
                file: FileRef("voice://chat".into()),
                duration: Some(Duration::from_secs(secs)),
            }),
        )
    }

    #[tokio::test]
    async fn test_connect_requires_profile() {
        let t = engine();
        t.user(1, Gender::Male);
        t.send(press(1, Action::BlindConnect)).await;
        assert!(t.last_text(1).contains("profile first"));
        assert!(!t.engine.matchmaker.is_waiting(1));
    }

    #[tokio::test]
    async fn test_pairing_and_text_relay() {
        let t = engine();
        paired(&t).await;
        assert!(t.last_text(1).contains("Anonymous 1st Year"));
        assert!(t.last_text(2).contains("Anonymous 3rd Year"));

        t.send(text(1, "hi there")).await;
        assert_eq!(t.last_text(2), "💬 **From Anonymous 3rd Year:**\nhi there");

        t.send(press(2, Action::EndChat)).await;
        assert!(!t.engine.matchmaker.are_paired(1, 2));
        assert!(t.last_text(1).contains("Your partner left"));

        // Not paired any more: plain text is not relayed
        t.send(text(1, "still there?")).await;
        assert!(t.last_text(2).contains("You left the chat"));
    }

    #[tokio::test]
    async fn test_voice_relay_is_anonymized() {
        let t = engine();
        paired(&t).await;
        t.send(voice(2, 30)).await;
        eventually(|| {
            t.transport
                .last_to(Destination::User(1))
                .is_some_and(|m| m.media.is_some())
        })
        .await;

        let delivered = t.transport.last_to(Destination::User(1)).unwrap();
        assert_eq!(delivered.media, Some(Media::Voice(FileRef("uploaded://1".into()))));
        assert!(delivered.text.contains("Anonymous 1st Year"));
    }

    #[tokio::test]
    async fn test_voice_relay_failure_never_forwards_raw_clip() {
        let t = engine_with(ScriptedRunner::new().failing("encode"));
        paired(&t).await;
        t.send(voice(2, 30)).await;
        eventually(|| t.last_text(2).contains("Voice processing failed")).await;

        let sent = t.transport.sent.lock();
        assert!(sent
            .iter()
            .all(|(_, m)| !matches!(m.media, Some(Media::Voice(_)))));
    }

    #[tokio::test]
    async fn test_chat_voice_limit() {
        let t = engine();
        paired(&t).await;
        t.send(voice(1, 61)).await;
        assert!(t.last_text(1).contains("60 seconds"));
        assert!(t.transport.uploads.lock().is_empty());
    }

    #[tokio::test]
    async fn test_untimed_chat_voice_limit() {
        let t = engine_with(ScriptedRunner::new().output_millis(90_000));
        paired(&t).await;
        t.send(dm(
            1,
            InboundKind::Content(Content::Voice {
                file: FileRef("voice://long.mp3".into()),
                duration: None,
            }),
        ))
        .await;
        eventually(|| t.last_text(1).contains("60 seconds")).await;

        assert!(t.transport.uploads.lock().is_empty());
        assert!(t.engine.matchmaker.are_paired(1, 2));
        let sent = t.transport.sent.lock();
        assert!(sent
            .iter()
            .all(|(_, m)| !matches!(m.media, Some(Media::Voice(_)))));
    }

    #[tokio::test]
    async fn test_three_reports_ban_once() {
        let t = engine();
        paired(&t).await;
        let report = Action::ReportReason {
            reason: ReportReason::Harassment,
            reported: 1,
        };

        t.send(press(2, report)).await;
        t.send(press(2, report)).await;
        assert!(!t.engine.db.is_banned(1).unwrap());
        assert!(t.engine.matchmaker.are_paired(1, 2));

        t.send(press(2, report)).await;
        assert!(t.engine.db.is_banned(1).unwrap());
        assert!(!t.engine.matchmaker.are_paired(1, 2));
        assert!(t.last_text(1).contains("restricted"));

        // The pair is gone, so further reports are refused
        t.send(press(2, report)).await;
        assert!(t.last_text(2).contains("could not be found"));

        let moderation = t.transport.texts_to(Destination::Moderation);
        assert_eq!(moderation.len(), 1);
        assert!(moderation[0].contains("AUTO-BAN"));
    }

    #[tokio::test]
    async fn test_report_outside_chat_is_refused() {
        let t = engine();
        t.user(1, Gender::Male);
        t.user(2, Gender::Female);
        t.send(press(
            2,
            Action::ReportReason {
                reason: ReportReason::Spamming,
                reported: 1,
            },
        ))
        .await;
        assert!(t.last_text(2).contains("chat partner could not be found"));
        assert_eq!(t.engine.reports.count(1), 0);
    }

    #[tokio::test]
    async fn test_gesture_reaches_partner() {
        let t = engine();
        paired(&t).await;
        t.send(press(1, Action::SendHeart)).await;
        assert!(t.last_text(2).contains("heart"));
        assert_eq!(t.last_text(1), "✨ Sent!");
    }
}
