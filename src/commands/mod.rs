//! Flow handlers and action dispatch
//!
//! Every [`Action`] maps to exactly one handler here. Handlers take the
//! shared engine and the acting user, and report failures as
//! [`EngineError`]s that the consumer turns into user notices.

pub mod admin_contact;
pub mod blind;
pub mod comments;
pub mod confession;
pub mod menu;
pub mod moderation;
pub mod profile;

use crate::engine::{Engine, EngineError};
use crate::session::{ConfessionStep, FlowState, ProfileInput};
use crate::transport::{Action, Button, Controls, DeepLink, MessageRef, UserId};
use std::sync::Arc;

/// Route a DM action for a user who passed the ban and gender gates
pub async fn dispatch(
    engine: &Arc<Engine>,
    user_id: UserId,
    action: Action,
    origin: Option<MessageRef>,
) -> Result<(), EngineError> {
    let flow = engine.sessions.flow(user_id);

    if starts_flow(&action, &flow) && !flow.is_idle() {
        return busy(engine, user_id).await;
    }

    match action {
        Action::Cancel => engine.cancel(user_id).await,
        Action::MainMenu => menu::show_menu(engine, user_id).await,
        Action::Help => menu::help(engine, user_id).await,
        Action::Guidelines => menu::guidelines(engine, user_id).await,
        Action::Stats => menu::stats(engine, user_id).await,
        Action::SetGender(_) => menu::gender_already_set(engine, user_id).await,

        Action::Profile => profile::show_or_start(engine, user_id).await,
        Action::YearOfStudy(year) => match flow {
            FlowState::Profile(draft) => {
                profile::on_input(engine, user_id, draft, ProfileInput::YearOfStudy(year)).await
            }
            _ => expired(engine, user_id).await,
        },
        Action::PrefGender(pref) => match flow {
            FlowState::Profile(draft) => {
                profile::on_input(engine, user_id, draft, ProfileInput::PrefGender(pref)).await
            }
            _ => expired(engine, user_id).await,
        },

        Action::Confess => confession::choose_type(engine, user_id).await,
        Action::TextConfession => {
            confession::choose(engine, user_id, crate::database::ConfessionKind::Text).await
        }
        Action::VoiceConfession => {
            confession::choose(engine, user_id, crate::database::ConfessionKind::Voice).await
        }

        Action::BlindConnect => blind::connect(engine, user_id).await,
        Action::CancelSearch => blind::cancel_search(engine, user_id).await,
        Action::EndChat => blind::end_chat(engine, user_id).await,
        Action::Report => blind::report_menu(engine, user_id).await,
        Action::ReportReason { reason, reported } => {
            blind::file_report(engine, user_id, reported, reason).await
        }
        Action::SendHeart => blind::gesture(engine, user_id, "❤️ Your chat partner sent you a heart!").await,
        Action::SendSmile => blind::gesture(engine, user_id, "😊 Your chat partner sent you a smile!").await,
        Action::VoiceTip => blind::voice_tip(engine, user_id).await,
        Action::PhotoTip => blind::photo_tip(engine, user_id).await,

        Action::ContactAdmin => admin_contact::begin(engine, user_id).await,
        Action::Open(link) => comments::open(engine, user_id, link).await,

        Action::Approve(_)
        | Action::Reject(_)
        | Action::Ban(_)
        | Action::Listen(_)
        | Action::React { .. } => moderation::dispatch(engine, user_id, action, origin).await,
    }
}

/// Actions that would enter a different flow than the current one
fn starts_flow(action: &Action, flow: &FlowState) -> bool {
    match action {
        Action::Confess | Action::ContactAdmin | Action::Open(DeepLink::Comment(_)) => true,
        Action::Profile => !matches!(flow, FlowState::Profile(_)),
        Action::TextConfession | Action::VoiceConfession => !matches!(
            flow,
            FlowState::Confession(d) if !matches!(d.step, ConfessionStep::Processing { .. })
        ),
        _ => false,
    }
}

async fn busy(engine: &Arc<Engine>, user_id: UserId) -> Result<(), EngineError> {
    engine
        .tell(
            user_id,
            "✋ You're in the middle of something. Finish it first, or send cancel to stop.",
            cancel_controls(),
        )
        .await;
    Ok(())
}

async fn expired(engine: &Arc<Engine>, user_id: UserId) -> Result<(), EngineError> {
    engine
        .tell(user_id, "That button has expired.", menu::main_menu())
        .await;
    Ok(())
}

pub fn cancel_controls() -> Controls {
    Controls::none().row(vec![Button::new("❌ Cancel", Action::Cancel)])
}
