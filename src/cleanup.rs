//! Periodic sweep of stale in-memory state

use crate::config::Limits;
use crate::database::Database;
use crate::matchmaker::Matchmaker;
use crate::session::SessionStore;
use crate::transport::{Destination, Outbound, Transport, UserId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_comments: Vec<UserId>,
    pub idle_sessions: usize,
    pub evicted_waiter: Option<UserId>,
    pub reopened_contacts: usize,
}

pub struct CleanupScheduler {
    sessions: Arc<SessionStore>,
    matchmaker: Arc<Matchmaker>,
    db: Arc<Database>,
    transport: Arc<dyn Transport>,
    limits: Limits,
}

impl CleanupScheduler {
    pub fn new(
        sessions: Arc<SessionStore>,
        matchmaker: Arc<Matchmaker>,
        db: Arc<Database>,
        transport: Arc<dyn Transport>,
        limits: Limits,
    ) -> Self {
        Self {
            sessions,
            matchmaker,
            db,
            transport,
            limits,
        }
    }

    /// Run the sweep every `sweep_interval` until the task is aborted
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.limits.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = self.sweep_once().await;
                info!(
                    expired_comments = report.expired_comments.len(),
                    idle_sessions = report.idle_sessions,
                    evicted_waiter = ?report.evicted_waiter,
                    reopened_contacts = report.reopened_contacts,
                    "Cleanup sweep finished"
                );
            }
        })
    }

    /// One sweep; notices go out only after every in-memory change is made
    pub async fn sweep_once(&self) -> SweepReport {
        let expired_comments = self.sessions.expire_comments(self.limits.comment_ttl);
        let idle_sessions = self.sessions.sweep_idle(self.limits.session_ttl).len();
        let evicted_waiter = self.matchmaker.evict_stale_waiter(self.limits.session_ttl);

        let reopened_contacts = match self
            .db
            .reopen_admin_contacts(self.limits.admin_contact_window)
        {
            Ok(n) => n,
            Err(e) => {
                warn!("Failed to re-open admin contact windows: {}", e);
                0
            }
        };

        for user_id in &expired_comments {
            self.notify(
                *user_id,
                "⌛ Your comment session expired. Tap the comment button on the post to try again.",
            )
            .await;
        }
        if let Some(user_id) = evicted_waiter {
            self.notify(
                user_id,
                "⌛ Your search timed out with no match. Try Blind Connect again later.",
            )
            .await;
        }

        debug!(
            sessions_left = self.sessions.len(),
            pairs = self.matchmaker.pair_count(),
            "Sweep state"
        );
        SweepReport {
            expired_comments,
            idle_sessions,
            evicted_waiter,
            reopened_contacts,
        }
    }

    async fn notify(&self, user_id: UserId, text: &str) {
        if let Err(e) = self
            .transport
            .send(Destination::User(user_id), Outbound::text(text))
            .await
        {
            warn!(user_id, "Failed to send cleanup notice: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{BlindProfile, Gender, PrefGender, YearOfStudy};
    use crate::session::{CommentDraft, FlowState};
    use crate::transport::testing::RecordingTransport;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sweep_expires_and_notifies() {
        let sessions = Arc::new(SessionStore::new());
        let matchmaker = Arc::new(Matchmaker::new());
        let db = Arc::new(Database::open(":memory:").unwrap());
        let transport = Arc::new(RecordingTransport::new());

        sessions.set_flow(1, FlowState::Comment(CommentDraft { confession_id: 4 }));
        sessions.touch(2);
        matchmaker.request_match(&BlindProfile {
            user_id: 3,
            gender: Gender::Male,
            age: 21,
            years_on_campus: 1,
            year_of_study: YearOfStudy::First,
            pref_gender: PrefGender::Both,
            pref_age_min: 18,
            pref_age_max: 30,
            profile_complete: true,
            created_at: chrono::Utc::now(),
        });
        db.upsert_user(5, "eve").unwrap();
        db.save_admin_contact(5, "please help").unwrap();

        let limits = Limits {
            comment_ttl: Duration::ZERO,
            session_ttl: Duration::ZERO,
            admin_contact_window: chrono::Duration::days(-1),
            ..Limits::default()
        };
        let scheduler = CleanupScheduler::new(
            sessions.clone(),
            matchmaker.clone(),
            db.clone(),
            transport.clone(),
            limits,
        );

        let report = scheduler.sweep_once().await;
        assert_eq!(report.expired_comments, vec![1]);
        assert_eq!(report.idle_sessions, 2);
        assert_eq!(report.evicted_waiter, Some(3));
        assert_eq!(report.reopened_contacts, 1);

        assert!(sessions.is_empty());
        assert!(!matchmaker.is_waiting(3));
        assert!(db.can_contact_admin(5).unwrap());
        assert_eq!(transport.texts_to(Destination::User(1)).len(), 1);
        assert_eq!(transport.texts_to(Destination::User(3)).len(), 1);
    }

    #[tokio::test]
    async fn test_fresh_state_survives() {
        let sessions = Arc::new(SessionStore::new());
        sessions.set_flow(1, FlowState::Comment(CommentDraft { confession_id: 4 }));
        let scheduler = CleanupScheduler::new(
            sessions.clone(),
            Arc::new(Matchmaker::new()),
            Arc::new(Database::open(":memory:").unwrap()),
            Arc::new(RecordingTransport::new()),
            Limits::default(),
        );

        let report = scheduler.sweep_once().await;
        assert_eq!(report, SweepReport::default());
        assert_eq!(sessions.len(), 1);
    }
}
