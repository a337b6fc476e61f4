//! Anonymous comments on published confessions

use super::{cancel_controls, menu, moderation};
use crate::database::Confession;
use crate::engine::{Engine, EngineError};
use crate::session::{validate_text, CommentDraft, FlowState, ValidationError, COMMENT_TEXT};
use crate::transport::{Content, DeepLink, UserId};
use std::sync::Arc;
use tracing::info;

const RULE: &str = "──────────────";
const FETCHED: u32 = 20;
const SHOWN: usize = 10;

/// Follow a comment or view-comments link from a public post
pub async fn open(engine: &Arc<Engine>, user_id: UserId, link: DeepLink) -> Result<(), EngineError> {
    match link {
        DeepLink::Comment(id) => start_comment(engine, user_id, id).await,
        DeepLink::View(id) => view(engine, user_id, id).await,
    }
}

fn published(engine: &Engine, confession_id: i64) -> Result<Confession, EngineError> {
    engine
        .db
        .confession(confession_id)?
        .filter(Confession::is_approved)
        .ok_or(EngineError::NotFound("confession"))
}

async fn start_comment(
    engine: &Arc<Engine>,
    user_id: UserId,
    confession_id: i64,
) -> Result<(), EngineError> {
    let confession = published(engine, confession_id)?;
    engine.sessions.set_flow(
        user_id,
        FlowState::Comment(CommentDraft { confession_id }),
    );

    let excerpt = confession
        .text
        .as_deref()
        .unwrap_or("🎤 Voice confession");
    engine
        .tell(
            user_id,
            format!(
                "💬 **ADD ANONYMOUS COMMENT**\n{RULE}\n\n📜 **Confession #{}:**\n{}\n\n{RULE}\n\
                 ✨ Write your comment below ({}-{} characters).\n\
                 • Keep it respectful\n• No personal information\n• Nobody sees who you are",
                confession_id, excerpt, COMMENT_TEXT.0, COMMENT_TEXT.1
            ),
            cancel_controls(),
        )
        .await;
    Ok(())
}

async fn view(engine: &Arc<Engine>, user_id: UserId, confession_id: i64) -> Result<(), EngineError> {
    published(engine, confession_id)?;
    let comments = engine.db.recent_comments(confession_id, FETCHED)?;
    if comments.is_empty() {
        engine
            .tell(
                user_id,
                format!(
                    "💭 **No comments yet for Confession #{}**\n\nBe the first to comment! 🤫",
                    confession_id
                ),
                menu::main_menu(),
            )
            .await;
        return Ok(());
    }

    let total = engine.db.comment_count(confession_id)?;
    let mut text = format!("📊 **Comments on Confession #{}**\n{RULE}\n\n", confession_id);
    for comment in comments.iter().take(SHOWN) {
        text.push_str(&format!(
            "💬 **Anonymous** ({}):\n{}\n{RULE}\n",
            comment.created_at.format("%-I:%M %p"),
            comment.text
        ));
    }
    if comments.len() > SHOWN {
        text.push_str("... and more comments available\n\n");
    }
    text.push_str(&format!(
        "📊 **Total: {} comments**\n{RULE}\n💬 Use the Comment button under the post to add yours.",
        total
    ));
    engine.tell(user_id, text, menu::main_menu()).await;
    Ok(())
}

/// Content received while writing a comment
pub async fn on_content(
    engine: &Arc<Engine>,
    user_id: UserId,
    draft: CommentDraft,
    content: Content,
) -> Result<(), EngineError> {
    let Content::Text(text) = content else {
        return Err(ValidationError::WrongContent {
            expected: "a text comment",
        }
        .into());
    };
    let text = validate_text(&text, COMMENT_TEXT)?;

    // The post may have been removed since the flow started
    let confession = published(engine, draft.confession_id);
    engine.sessions.reset(user_id);
    let confession = confession?;

    engine.db.save_comment(confession.id, user_id, &text)?;
    info!(user_id, confession_id = confession.id, "Comment added");
    moderation::refresh_public_post(engine, &confession).await?;

    engine
        .tell(
            user_id,
            format!(
                "✅ **Comment posted!**\n\nYour anonymous comment on Confession #{} was added.",
                confession.id
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
    use crate::session::{CommentDraft, FlowState};
    use crate::transport::{Action, DeepLink, InboundKind};

    fn approved(t: &TestEngine) -> i64 {
        t.user(1, Gender::Female);
        let id = t
            .engine
            .db
            .save_text_confession(1, "a confession worth discussing")
            .unwrap();
        t.engine
            .db
            .review_confession(id, crate::database::ReviewStatus::Approved)
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_comment_via_start_link() {
        let t = engine();
        let id = approved(&t);
        t.user(2, Gender::Male);

        let start = dm(2, InboundKind::Start(Some(format!("comment{}", id))));
        t.send(start).await;
        assert_eq!(
            t.engine.sessions.flow(2),
            FlowState::Comment(CommentDraft { confession_id: id })
        );

        t.send(text(2, "   ")).await;
        assert!(t.last_text(2).contains("between 1 and 500"));

        t.send(text(2, "You are not alone")).await;
        assert!(t.engine.sessions.flow(2).is_idle());
        assert_eq!(t.engine.db.comment_count(id).unwrap(), 1);
        assert!(t.last_text(2).contains("Comment posted"));
    }

    #[tokio::test]
    async fn test_comment_on_pending_confession_is_refused() {
        let t = engine();
        t.user(1, Gender::Female);
        let id = t
            .engine
            .db
            .save_text_confession(1, "not reviewed just yet")
            .unwrap();
        t.send(press(1, Action::Open(DeepLink::Comment(id)))).await;
        assert!(t.last_text(1).contains("could not be found"));
        assert!(t.engine.sessions.flow(1).is_idle());
    }

    #[tokio::test]
    async fn test_view_shows_ten_newest_and_total() {
        let t = engine();
        let id = approved(&t);
        for i in 0..12 {
            t.engine
                .db
                .save_comment(id, 1, &format!("comment number {}", i))
                .unwrap();
        }
        t.send(press(1, Action::Open(DeepLink::View(id)))).await;
        let shown = t.last_text(1);
        assert!(shown.contains("comment number 11"));
        assert!(!shown.contains("comment number 1\n"));
        assert!(shown.contains("and more comments"));
        assert!(shown.contains("Total: 12 comments"));
    }

    #[tokio::test]
    async fn test_view_without_comments() {
        let t = engine();
        let id = approved(&t);
        t.send(press(1, Action::Open(DeepLink::View(id)))).await;
        assert!(t.last_text(1).contains("No comments yet"));
    }
}
