//! Confession review and the public post controls

use super::blind;
use crate::database::{Confession, ConfessionKind, Reaction, ReviewStatus};
use crate::engine::{Engine, EngineError};
use crate::transport::{
    Action, Button, Controls, DeepLink, Destination, FileRef, Media, MessageRef, Outbound, Tone,
    UserId,
};
use std::sync::Arc;
use tracing::{debug, error, info};

const RULE: &str = "──────────────";

/// Buttons pressed on review cards and public posts
pub async fn dispatch(
    engine: &Arc<Engine>,
    user_id: UserId,
    action: Action,
    origin: Option<MessageRef>,
) -> Result<(), EngineError> {
    match action {
        Action::Approve(id) => approve(engine, user_id, id, origin).await,
        Action::Reject(id) => reject(engine, user_id, id, origin).await,
        Action::Ban(id) => ban_author(engine, user_id, id, origin).await,
        Action::Listen(id) => listen(engine, id).await,
        Action::React {
            confession_id,
            reaction,
        } => react(engine, user_id, confession_id, reaction).await,
        _ => Ok(()),
    }
}

fn review_controls(confession_id: i64, kind: ConfessionKind) -> Controls {
    let mut row = vec![
        Button::new("✅ Approve", Action::Approve(confession_id)).tone(Tone::Success),
        Button::new("❌ Reject", Action::Reject(confession_id)).tone(Tone::Danger),
        Button::new("⛔ Ban author", Action::Ban(confession_id)).tone(Tone::Danger),
    ];
    if kind == ConfessionKind::Voice {
        row.push(Button::new("🎧 Listen", Action::Listen(confession_id)));
    }
    Controls::none().row(row)
}

/// Reaction tallies plus the comment and view-comments links
pub fn public_controls(confession_id: i64, counts: &[(Reaction, u32)], comments: u32) -> Controls {
    Controls::none()
        .row(
            counts
                .iter()
                .map(|(reaction, count)| {
                    Button::new(
                        format!("{} {}", reaction.emoji(), count),
                        Action::React {
                            confession_id,
                            reaction: *reaction,
                        },
                    )
                })
                .collect(),
        )
        .row(vec![
            Button::new(
                format!("💬 Comment ({})", comments),
                Action::Open(DeepLink::Comment(confession_id)),
            )
            .tone(Tone::Primary),
            Button::new(
                format!("📊 View Comments ({})", comments),
                Action::Open(DeepLink::View(confession_id)),
            ),
        ])
}

/// Public "frosted mirror" layout: trimmed lines with generous spacing
pub fn frosted_mirror(text: Option<&str>) -> String {
    let header = format!("{RULE}\n🤫 Anonymous Confession\n{RULE}");
    let body = text
        .map(|t| {
            t.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n")
        })
        .filter(|b| !b.is_empty());
    match body {
        Some(body) => format!("{header}\n\n{body}\n\n{RULE}"),
        None => header,
    }
}

/// Post a new review card to the moderation channel
pub async fn submit_for_review(engine: &Arc<Engine>, confession: &Confession) {
    let when = confession.created_at.format("%b %-d, %-I:%M %p");
    let message = match confession.kind {
        ConfessionKind::Text => Outbound::text(format!(
            "📝 **NEW TEXT CONFESSION** #{}\n{RULE}\n\n💭 **Content:**\n{}\n\n{RULE}\n\
             👤 **Sender ID:** `{}`\n🕐 **Time:** {}",
            confession.id,
            confession.text.as_deref().unwrap_or_default(),
            confession.user_id,
            when,
        )),
        ConfessionKind::Voice => {
            let mut message = Outbound::text(format!(
                "🎤 **NEW VOICE CONFESSION** #{}\n{RULE}\n\n🔊 **Status:** anonymized\n\n{RULE}\n\
                 👤 **Sender ID:** `{}`\n🕐 **Time:** {}",
                confession.id, confession.user_id, when,
            ));
            if let Some(voice) = &confession.voice_ref {
                message = message.media(Media::Voice(FileRef(voice.clone())));
            }
            message
        }
    };
    engine
        .send(
            Destination::Moderation,
            message.controls(review_controls(confession.id, confession.kind)),
        )
        .await;
}

fn load(engine: &Engine, confession_id: i64) -> Result<Confession, EngineError> {
    engine
        .db
        .confession(confession_id)?
        .ok_or(EngineError::NotFound("confession"))
}

async fn already_handled(
    engine: &Engine,
    moderator: UserId,
    confession_id: i64,
) -> Result<(), EngineError> {
    engine
        .tell(
            moderator,
            format!("ℹ️ Confession #{} was already handled.", confession_id),
            Controls::none(),
        )
        .await;
    Ok(())
}

async fn approve(
    engine: &Arc<Engine>,
    moderator: UserId,
    confession_id: i64,
    origin: Option<MessageRef>,
) -> Result<(), EngineError> {
    let confession = load(engine, confession_id)?;
    if !engine
        .db
        .review_confession(confession_id, ReviewStatus::Approved)?
    {
        return already_handled(engine, moderator, confession_id).await;
    }

    let counts = engine.db.reaction_counts(confession_id)?;
    let mut post = Outbound::text(frosted_mirror(confession.text.as_deref()))
        .controls(public_controls(confession_id, &counts, 0));
    if let Some(voice) = &confession.voice_ref {
        post = post.media(Media::Voice(FileRef(voice.clone())));
    }
    let public = match engine.transport.send(Destination::Public, post).await {
        Ok(public) => public,
        Err(e) => {
            error!(
                confession_id,
                moderator,
                "Approved confession has no public post, repost it manually: {}",
                e
            );
            return Err(e.into());
        }
    };
    engine.db.set_public_post(confession_id, public)?;
    info!(confession_id, moderator, "Confession approved and posted");

    if let Some(card) = origin {
        engine
            .edit(
                card,
                Some(format!(
                    "✅ **{} APPROVED** #{}\n{RULE}\n✨ Published to the channel\n👤 Sender ID: `{}`",
                    confession.kind.as_str().to_uppercase(),
                    confession_id,
                    confession.user_id
                )),
                Controls::none(),
            )
            .await;
    }
    engine
        .tell(
            confession.user_id,
            format!(
                "✅ **CONFESSION PUBLISHED**\n{RULE}\n\nYour {} confession #{} was approved and is now live.\n\
                 People can react to it and leave comments.",
                confession.kind.as_str(),
                confession_id
            ),
            super::menu::main_menu(),
        )
        .await;
    Ok(())
}

async fn reject(
    engine: &Arc<Engine>,
    moderator: UserId,
    confession_id: i64,
    origin: Option<MessageRef>,
) -> Result<(), EngineError> {
    let confession = load(engine, confession_id)?;
    if !engine
        .db
        .review_confession(confession_id, ReviewStatus::Rejected)?
    {
        return already_handled(engine, moderator, confession_id).await;
    }
    info!(confession_id, moderator, "Confession rejected");

    if let Some(card) = origin {
        engine
            .edit(
                card,
                Some(format!("❌ **REJECTED** #{}", confession_id)),
                Controls::none(),
            )
            .await;
    }
    engine
        .tell(
            confession.user_id,
            format!(
                "❌ Your confession #{} was not approved. Please review the guidelines.",
                confession_id
            ),
            super::menu::main_menu(),
        )
        .await;
    Ok(())
}

async fn ban_author(
    engine: &Arc<Engine>,
    moderator: UserId,
    confession_id: i64,
    origin: Option<MessageRef>,
) -> Result<(), EngineError> {
    let confession = load(engine, confession_id)?;
    let author = confession.user_id;
    if engine.db.is_banned(author)? {
        return already_handled(engine, moderator, confession_id).await;
    }

    engine
        .db
        .review_confession(confession_id, ReviewStatus::Rejected)?;
    engine.db.ban_user(author)?;
    info!(confession_id, moderator, author, "Confession author banned");

    if let Some(card) = origin {
        engine
            .edit(
                card,
                Some(format!(
                    "⛔ **AUTHOR BANNED** #{}\n👤 Sender ID: `{}`",
                    confession_id, author
                )),
                Controls::none(),
            )
            .await;
    }
    blind::remove_from_chat(engine, author).await;
    engine
        .tell(
            author,
            "⛔ Your account has been restricted for violating the community guidelines.",
            Controls::none(),
        )
        .await;
    Ok(())
}

async fn listen(engine: &Arc<Engine>, confession_id: i64) -> Result<(), EngineError> {
    let confession = load(engine, confession_id)?;
    let voice = confession
        .voice_ref
        .ok_or(EngineError::NotFound("voice recording"))?;
    engine
        .send(
            Destination::Moderation,
            Outbound::text(format!("🎧 Voice confession #{}", confession_id))
                .media(Media::Voice(FileRef(voice))),
        )
        .await;
    Ok(())
}

async fn react(
    engine: &Arc<Engine>,
    user_id: UserId,
    confession_id: i64,
    reaction: Reaction,
) -> Result<(), EngineError> {
    let confession = load(engine, confession_id)?;
    if !confession.is_approved() {
        return Err(EngineError::NotFound("confession"));
    }
    let added = engine
        .db
        .toggle_reaction(confession_id, user_id, reaction)?;
    debug!(
        confession_id,
        user_id,
        reaction = reaction.as_str(),
        added,
        "Reaction toggled"
    );
    refresh_public_post(engine, &confession).await
}

/// Re-render reaction and comment counts on the public post
pub async fn refresh_public_post(
    engine: &Arc<Engine>,
    confession: &Confession,
) -> Result<(), EngineError> {
    let Some(post) = confession.public_post else {
        return Ok(());
    };
    let counts = engine.db.reaction_counts(confession.id)?;
    let comments = engine.db.comment_count(confession.id)?;
    engine
        .edit(post, None, public_controls(confession.id, &counts, comments))
        .await;
    Ok(())
}
