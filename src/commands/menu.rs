//! Welcome, main menu and informational screens

use super::comments;
use crate::database::Gender;
use crate::engine::{Engine, EngineError};
use crate::transport::{Action, Button, Controls, DeepLink, Tone, UserId};
use std::sync::Arc;
use tracing::{info, warn};

pub fn main_menu() -> Controls {
    Controls::none()
        .row(vec![
            Button::new("📝 Confess", Action::Confess).tone(Tone::Primary),
            Button::new("💘 Blind Connect", Action::BlindConnect).tone(Tone::Primary),
        ])
        .row(vec![
            Button::new("👤 Profile", Action::Profile),
            Button::new("📊 My Stats", Action::Stats),
        ])
        .row(vec![
            Button::new("📜 Guidelines", Action::Guidelines),
            Button::new("❓ Help", Action::Help),
            Button::new("📨 Contact Admin", Action::ContactAdmin),
        ])
}

fn gender_choice() -> Controls {
    Controls::none().row(
        [Gender::Male, Gender::Female]
            .into_iter()
            .map(|g| Button::new(g.label(), Action::SetGender(g)))
            .collect(),
    )
}

/// `/start`, optionally carrying a deep-link parameter
pub async fn start(
    engine: &Arc<Engine>,
    user_id: UserId,
    param: Option<String>,
) -> Result<(), EngineError> {
    if let Some(param) = param {
        match DeepLink::parse(&param) {
            Some(link) => return comments::open(engine, user_id, link).await,
            None => warn!(user_id, param = %param, "Unknown start parameter"),
        }
    }
    show_menu(engine, user_id).await
}

pub async fn show_menu(engine: &Arc<Engine>, user_id: UserId) -> Result<(), EngineError> {
    engine
        .tell(
            user_id,
            "🪞 **Frosted Mirror**\n\
             Share what you can't say out loud, or meet someone new without names.\n\n\
             Choose an option below.",
            main_menu(),
        )
        .await;
    Ok(())
}

pub async fn ask_gender(engine: &Arc<Engine>, user_id: UserId) -> Result<(), EngineError> {
    engine
        .tell(
            user_id,
            "👋 Welcome to Frosted Mirror!\n\n\
             Before you start, please select your gender. It is used to disguise your voice \
             and for Blind Connect matching.\n\n\
             ⚠️ This choice is permanent and cannot be changed later.",
            gender_choice(),
        )
        .await;
    Ok(())
}

pub async fn set_gender(
    engine: &Arc<Engine>,
    user_id: UserId,
    gender: Gender,
) -> Result<(), EngineError> {
    if !engine.db.set_gender(user_id, gender)? {
        return gender_already_set(engine, user_id).await;
    }
    info!(user_id, gender = gender.as_str(), "Gender recorded");
    engine
        .tell(
            user_id,
            format!("✅ Gender saved as {}.", gender.label()),
            Controls::none(),
        )
        .await;
    show_menu(engine, user_id).await
}

pub async fn gender_already_set(engine: &Arc<Engine>, user_id: UserId) -> Result<(), EngineError> {
    engine
        .tell(
            user_id,
            "Your gender is already set and cannot be changed.",
            main_menu(),
        )
        .await;
    Ok(())
}

pub async fn unrecognized(engine: &Arc<Engine>, user_id: UserId) -> Result<(), EngineError> {
    engine
        .tell(
            user_id,
            "🤔 I didn't understand that. Please use the menu below.",
            main_menu(),
        )
        .await;
    Ok(())
}

pub async fn help(engine: &Arc<Engine>, user_id: UserId) -> Result<(), EngineError> {
    engine
        .tell(
            user_id,
            "❓ **Help**\n\n\
             📝 **Confess**: send a text or voice confession. Voice is anonymized and every \
             confession is reviewed before it is posted.\n\
             💘 **Blind Connect**: create a profile, then get paired with a compatible \
             stranger. Nobody sees your name.\n\
             💬 **Comments**: use the buttons under a public post to comment or read comments.\n\
             📨 **Contact Admin**: one message to the admins per week.\n\n\
             Send `cancel` at any time to stop what you are doing.",
            main_menu(),
        )
        .await;
    Ok(())
}

pub async fn guidelines(engine: &Arc<Engine>, user_id: UserId) -> Result<(), EngineError> {
    engine
        .tell(
            user_id,
            "📜 **Community Guidelines**\n\n\
             1. No names, phone numbers or anything that identifies a person.\n\
             2. No harassment, hate or threats.\n\
             3. No explicit content.\n\
             4. No spam or advertising.\n\
             5. Respect your chat partner; report anyone who does not.\n\n\
             Users reported repeatedly are banned automatically.",
            main_menu(),
        )
        .await;
    Ok(())
}

pub async fn stats(engine: &Arc<Engine>, user_id: UserId) -> Result<(), EngineError> {
    let stats = engine.db.user_stats(user_id)?;
    let in_chat = engine.matchmaker.partner_of(user_id).is_some();
    let searching = engine.matchmaker.is_waiting(user_id);
    let reports = engine.reports.count(user_id);

    let yes_no = |b: bool| if b { "✅" } else { "❌" };
    let text = format!(
        "📊 **Your Stats**\n\n\
         📝 Confessions: {}\n\
         🎙️ Voice confessions: {}\n\
         ✅ Approved: {}\n\
         💬 Comments: {}\n\
         ❤️ Reactions: {}\n\n\
         👤 Blind profile: {}\n\
         💘 In chat: {}{}\n\
         🚩 Reports: {}/{}\n\
         📨 Admin contact available: {}",
        stats.confessions,
        stats.voice_confessions,
        stats.approved,
        stats.comments,
        stats.reactions,
        yes_no(stats.has_profile),
        yes_no(in_chat),
        if searching { " (searching)" } else { "" },
        reports,
        engine.reports.threshold(),
        yes_no(stats.admin_contact_allowed),
    );
    engine.tell(user_id, text, main_menu()).await;
    Ok(())
}
