//! One-way messages to the moderation team

use super::{cancel_controls, menu};
use crate::engine::{Engine, EngineError};
use crate::session::{validate_text, FlowState, ValidationError};
use crate::transport::{Content, Destination, Outbound, UserId};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

const RULE: &str = "──────────────";
const MESSAGE_TEXT: (usize, usize) = (1, 2000);

pub async fn begin(engine: &Arc<Engine>, user_id: UserId) -> Result<(), EngineError> {
    if !engine.db.can_contact_admin(user_id)? {
        return Err(EngineError::RateLimited);
    }
    engine.sessions.set_flow(user_id, FlowState::AdminContact);
    engine
        .tell(
            user_id,
            format!(
                "📞 **Contact Admin**\n{RULE}\n\n\
                 ✨ Send one message to the admin team: questions, suggestions or feedback.\n\n\
                 {RULE}\n**Note:** one-way message only. Admins will contact you if needed."
            ),
            cancel_controls(),
        )
        .await;
    Ok(())
}

pub async fn on_content(
    engine: &Arc<Engine>,
    user_id: UserId,
    content: Content,
) -> Result<(), EngineError> {
    let Content::Text(text) = content else {
        return Err(ValidationError::WrongContent {
            expected: "a text message",
        }
        .into());
    };
    // Length is checked on the trimmed text; the message goes out as typed
    validate_text(&text, MESSAGE_TEXT)?;

    engine.sessions.reset(user_id);
    engine.db.save_admin_contact(user_id, &text)?;
    info!(user_id, "Admin contact forwarded");

    engine
        .send(
            Destination::Moderation,
            Outbound::text(format!(
                "📬 **ADMIN MESSAGE**\n{RULE}\n\n👤 **From:** `{}`\n🕐 **Time:** {}\n\n\
                 💭 **Message:**\n{}\n\n{RULE}",
                user_id,
                Utc::now().format("%b %-d, %-I:%M %p"),
                text
            )),
        )
        .await;
    engine
        .tell(
            user_id,
            format!(
                "✅ **Message Sent**\n{RULE}\n\nYour message was delivered to the admin team.\n\
                 Thank you for your feedback! 💖"
            ),
            menu::main_menu(),
        )
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::database::Gender;
    use crate::engine::testing::*;
    use crate::session::FlowState;
    use crate::transport::{Action, Destination};

    #[tokio::test]
    async fn test_contact_once_per_window() {
        let t = engine();
        t.user(3, Gender::Male);
        t.send(press(3, Action::ContactAdmin)).await;
        assert_eq!(t.engine.sessions.flow(3), FlowState::AdminContact);

        t.send(text(3, "The bot is great, thanks")).await;
        assert!(t.engine.sessions.flow(3).is_idle());
        let forwarded = t.transport.last_to(Destination::Moderation).unwrap();
        assert!(forwarded.text.contains("ADMIN MESSAGE"));
        assert!(forwarded.text.contains("`3`"));
        assert!(forwarded.text.contains("The bot is great, thanks"));

        t.send(press(3, Action::ContactAdmin)).await;
        assert!(t.last_text(3).contains("once every 7 days"));
        assert!(t.engine.sessions.flow(3).is_idle());
    }

    #[tokio::test]
    async fn test_message_forwarded_as_typed() {
        let t = engine();
        t.user(4, Gender::Female);
        t.send(press(4, Action::ContactAdmin)).await;
        t.send(text(4, "  Two things:\n\n  - dark mode\n  - longer voice notes  ")).await;

        let forwarded = t.transport.last_to(Destination::Moderation).unwrap();
        assert!(forwarded
            .text
            .contains("  Two things:\n\n  - dark mode\n  - longer voice notes  "));
    }

    #[tokio::test]
    async fn test_blank_contact_is_reprompted() {
        let t = engine();
        t.user(4, Gender::Female);
        t.send(press(4, Action::ContactAdmin)).await;
        t.send(text(4, "   ")).await;

        assert_eq!(t.engine.sessions.flow(4), FlowState::AdminContact);
        assert!(t.transport.texts_to(Destination::Moderation).is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_contact_keeps_allowance() {
        let t = engine();
        t.user(3, Gender::Female);
        t.send(press(3, Action::ContactAdmin)).await;
        t.send(press(3, Action::Cancel)).await;
        assert!(t.engine.db.can_contact_admin(3).unwrap());
        assert!(t.transport.texts_to(Destination::Moderation).is_empty());
    }
}
