//! Database management for users, confessions and blind profiles
//!
//! Uses SQLite as the store of record. Sessions, pairs and report counters
//! live in memory; only bans, profiles, reports and content are written here.

use crate::transport::{MessageRef, UserId};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Lock error")]
    LockError,
}

/// Declared gender, permanent once chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Gender::Male => "👨 Male",
            Gender::Female => "👩 Female",
        }
    }
}

/// Which partner genders a profile accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefGender {
    Male,
    Female,
    Both,
}

impl PrefGender {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrefGender::Male => "male",
            PrefGender::Female => "female",
            PrefGender::Both => "both",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "male" | "male only" => Some(PrefGender::Male),
            "female" | "female only" => Some(PrefGender::Female),
            "both" | "both genders" => Some(PrefGender::Both),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PrefGender::Male => "👨 Male Only",
            PrefGender::Female => "👩 Female Only",
            PrefGender::Both => "👫 Both Genders",
        }
    }

    pub fn accepts(&self, gender: Gender) -> bool {
        match self {
            PrefGender::Male => gender == Gender::Male,
            PrefGender::Female => gender == Gender::Female,
            PrefGender::Both => true,
        }
    }
}

/// Current year of study
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearOfStudy {
    First,
    Second,
    Third,
    Fourth,
    FifthPlus,
}

impl YearOfStudy {
    pub const ALL: [YearOfStudy; 5] = [
        YearOfStudy::First,
        YearOfStudy::Second,
        YearOfStudy::Third,
        YearOfStudy::Fourth,
        YearOfStudy::FifthPlus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            YearOfStudy::First => "1st Year",
            YearOfStudy::Second => "2nd Year",
            YearOfStudy::Third => "3rd Year",
            YearOfStudy::Fourth => "4th Year",
            YearOfStudy::FifthPlus => "5th+ Year",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|y| y.as_str().eq_ignore_ascii_case(s))
    }
}

/// Blind connection profile, read-only once stored
#[derive(Debug, Clone, PartialEq)]
pub struct BlindProfile {
    pub user_id: UserId,
    pub gender: Gender,
    pub age: u8,
    pub years_on_campus: u8,
    pub year_of_study: YearOfStudy,
    pub pref_gender: PrefGender,
    pub pref_age_min: u8,
    pub pref_age_max: u8,
    pub profile_complete: bool,
    pub created_at: DateTime<Utc>,
}

impl BlindProfile {
    /// Anonymous name shown to a chat partner
    pub fn alias(&self) -> String {
        format!("Anonymous {}", self.year_of_study.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfessionKind {
    Text,
    Voice,
}

impl ConfessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfessionKind::Text => "text",
            ConfessionKind::Voice => "voice",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ConfessionKind::Text),
            "voice" => Some(ConfessionKind::Voice),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReviewStatus::Pending),
            "approved" => Some(ReviewStatus::Approved),
            "rejected" => Some(ReviewStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Confession {
    pub id: i64,
    pub user_id: UserId,
    pub kind: ConfessionKind,
    pub text: Option<String>,
    pub voice_ref: Option<String>,
    pub status: ReviewStatus,
    pub public_post: Option<MessageRef>,
    pub created_at: DateTime<Utc>,
}

impl Confession {
    pub fn is_approved(&self) -> bool {
        self.status == ReviewStatus::Approved
    }
}

/// Reactions offered on every public post
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    Heart,
    Pensive,
    WhiteHeart,
    Fog,
    Moon,
}

impl Reaction {
    pub const ALL: [Reaction; 5] = [
        Reaction::Heart,
        Reaction::Pensive,
        Reaction::WhiteHeart,
        Reaction::Fog,
        Reaction::Moon,
    ];

    pub fn emoji(&self) -> &'static str {
        match self {
            Reaction::Heart => "❤️",
            Reaction::Pensive => "😔",
            Reaction::WhiteHeart => "🤍",
            Reaction::Fog => "🌫️",
            Reaction::Moon => "🌙",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Reaction::Heart => "heart",
            Reaction::Pensive => "pensive",
            Reaction::WhiteHeart => "white_heart",
            Reaction::Fog => "fog",
            Reaction::Moon => "moon",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == s)
    }
}

#[derive(Debug, Clone)]
pub struct CommentRecord {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Per-user activity summary for the stats screen
#[derive(Debug, Clone, Default)]
pub struct UserStats {
    pub confessions: u32,
    pub voice_confessions: u32,
    pub approved: u32,
    pub comments: u32,
    pub reactions: u32,
    pub has_profile: bool,
    pub banned: bool,
    pub admin_contact_allowed: bool,
}

/// Database connection wrapper
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockError)
    }

    /// Initialize database tables
    fn init(&self) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                display_name TEXT,
                gender TEXT CHECK(gender IN ('male', 'female')),
                banned INTEGER NOT NULL DEFAULT 0,
                admin_contact_allowed INTEGER NOT NULL DEFAULT 1,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS confessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                kind TEXT NOT NULL DEFAULT 'text',
                text TEXT,
                voice_ref TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                posted_at TIMESTAMP,
                public_channel_id INTEGER,
                public_message_id INTEGER,
                FOREIGN KEY (user_id) REFERENCES users(user_id)
            );
            CREATE TABLE IF NOT EXISTS blind_profiles (
                user_id INTEGER PRIMARY KEY,
                gender TEXT NOT NULL CHECK(gender IN ('male', 'female')),
                age INTEGER NOT NULL CHECK(age >= 18 AND age <= 50),
                years_on_campus INTEGER NOT NULL CHECK(years_on_campus >= 0 AND years_on_campus <= 10),
                year_of_study TEXT NOT NULL,
                pref_gender TEXT NOT NULL CHECK(pref_gender IN ('male', 'female', 'both')),
                pref_age_min INTEGER NOT NULL CHECK(pref_age_min >= 18),
                pref_age_max INTEGER NOT NULL CHECK(pref_age_max <= 50),
                profile_complete INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(user_id)
            );
            CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                reporter_id INTEGER NOT NULL,
                reported_id INTEGER NOT NULL,
                reason TEXT NOT NULL,
                context TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS confession_reactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                confession_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                reaction TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(confession_id, user_id, reaction),
                FOREIGN KEY (confession_id) REFERENCES confessions(id)
            );
            CREATE TABLE IF NOT EXISTS confession_comments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                confession_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                text TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (confession_id) REFERENCES confessions(id)
            );
            CREATE TABLE IF NOT EXISTS admin_contacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                message TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );",
        )?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------------

    /// Record a user on first sight and keep their display name current
    pub fn upsert_user(&self, user_id: UserId, display_name: &str) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (user_id, display_name) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET display_name = excluded.display_name",
            params![user_id, display_name],
        )?;
        Ok(())
    }

    pub fn gender(&self, user_id: UserId) -> Result<Option<Gender>, DatabaseError> {
        let conn = self.conn()?;
        let gender: Option<Option<String>> = conn
            .query_row(
                "SELECT gender FROM users WHERE user_id = ?",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(gender.flatten().as_deref().and_then(Gender::from_str))
    }

    /// Set the gender once; returns false if one was already recorded
    pub fn set_gender(&self, user_id: UserId, gender: Gender) -> Result<bool, DatabaseError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE users SET gender = ?1 WHERE user_id = ?2 AND gender IS NULL",
            params![gender.as_str(), user_id],
        )?;
        Ok(changed > 0)
    }

    pub fn is_banned(&self, user_id: UserId) -> Result<bool, DatabaseError> {
        let conn = self.conn()?;
        let banned: Option<bool> = conn
            .query_row(
                "SELECT banned FROM users WHERE user_id = ?",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(banned.unwrap_or(false))
    }

    pub fn ban_user(&self, user_id: UserId) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (user_id, banned) VALUES (?1, 1)
             ON CONFLICT(user_id) DO UPDATE SET banned = 1",
            [user_id],
        )?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Confessions
    // ---------------------------------------------------------------------

    pub fn save_text_confession(&self, user_id: UserId, text: &str) -> Result<i64, DatabaseError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO confessions (user_id, kind, text) VALUES (?1, 'text', ?2)",
            params![user_id, text],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn save_voice_confession(
        &self,
        user_id: UserId,
        voice_ref: &str,
    ) -> Result<i64, DatabaseError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO confessions (user_id, kind, voice_ref) VALUES (?1, 'voice', ?2)",
            params![user_id, voice_ref],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn confession(&self, id: i64) -> Result<Option<Confession>, DatabaseError> {
        let conn = self.conn()?;
        let confession = conn
            .query_row(
                "SELECT id, user_id, kind, text, voice_ref, status,
                        public_channel_id, public_message_id, created_at
                 FROM confessions WHERE id = ?",
                [id],
                confession_from_row,
            )
            .optional()?;
        Ok(confession)
    }

    /// Move a pending confession to a reviewed status.
    ///
    /// Returns false when the confession was already reviewed or is missing.
    pub fn review_confession(&self, id: i64, status: ReviewStatus) -> Result<bool, DatabaseError> {
        let conn = self.conn()?;
        let posted_at = if status == ReviewStatus::Approved {
            Some(now_timestamp())
        } else {
            None
        };
        let changed = conn.execute(
            "UPDATE confessions SET status = ?1, posted_at = ?2
             WHERE id = ?3 AND status = 'pending'",
            params![status.as_str(), posted_at, id],
        )?;
        Ok(changed > 0)
    }

    pub fn set_public_post(&self, id: i64, post: MessageRef) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE confessions SET public_channel_id = ?1, public_message_id = ?2 WHERE id = ?3",
            params![post.channel_id, post.message_id, id],
        )?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Blind profiles
    // ---------------------------------------------------------------------

    /// Store a completed profile. Existing profiles are never overwritten.
    pub fn save_profile(&self, profile: &BlindProfile) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO blind_profiles
             (user_id, gender, age, years_on_campus, year_of_study, pref_gender,
              pref_age_min, pref_age_max, profile_complete, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                profile.user_id,
                profile.gender.as_str(),
                profile.age,
                profile.years_on_campus,
                profile.year_of_study.as_str(),
                profile.pref_gender.as_str(),
                profile.pref_age_min,
                profile.pref_age_max,
                profile.profile_complete,
                profile.created_at.format(TIMESTAMP_FORMAT).to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn profile(&self, user_id: UserId) -> Result<Option<BlindProfile>, DatabaseError> {
        let conn = self.conn()?;
        let profile = conn
            .query_row(
                "SELECT user_id, gender, age, years_on_campus, year_of_study, pref_gender,
                        pref_age_min, pref_age_max, profile_complete, created_at
                 FROM blind_profiles WHERE user_id = ?",
                [user_id],
                profile_from_row,
            )
            .optional()?;
        Ok(profile.flatten())
    }

    // ---------------------------------------------------------------------
    // Reports
    // ---------------------------------------------------------------------

    pub fn save_report<C: serde::Serialize>(
        &self,
        reporter_id: UserId,
        reported_id: UserId,
        reason: &str,
        context: &C,
    ) -> Result<(), DatabaseError> {
        let context = serde_json::to_string(context)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO reports (reporter_id, reported_id, reason, context)
             VALUES (?1, ?2, ?3, ?4)",
            params![reporter_id, reported_id, reason, context],
        )?;
        Ok(())
    }

    pub fn report_count(&self, reported_id: UserId) -> Result<u32, DatabaseError> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM reports WHERE reported_id = ?",
            [reported_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ---------------------------------------------------------------------
    // Comments & reactions
    // ---------------------------------------------------------------------

    pub fn save_comment(
        &self,
        confession_id: i64,
        user_id: UserId,
        text: &str,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO confession_comments (confession_id, user_id, text) VALUES (?1, ?2, ?3)",
            params![confession_id, user_id, text],
        )?;
        Ok(())
    }

    pub fn comment_count(&self, confession_id: i64) -> Result<u32, DatabaseError> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM confession_comments WHERE confession_id = ?",
            [confession_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Newest comments first
    pub fn recent_comments(
        &self,
        confession_id: i64,
        limit: u32,
    ) -> Result<Vec<CommentRecord>, DatabaseError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT text, created_at FROM confession_comments
             WHERE confession_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![confession_id, limit], |row| {
            let created_at: String = row.get(1)?;
            Ok(CommentRecord {
                text: row.get(0)?,
                created_at: parse_timestamp(&created_at),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Toggle a user's reaction; returns true when it was added
    pub fn toggle_reaction(
        &self,
        confession_id: i64,
        user_id: UserId,
        reaction: Reaction,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM confession_reactions
             WHERE confession_id = ?1 AND user_id = ?2 AND reaction = ?3",
            params![confession_id, user_id, reaction.as_str()],
        )?;
        if removed > 0 {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO confession_reactions (confession_id, user_id, reaction) VALUES (?1, ?2, ?3)",
            params![confession_id, user_id, reaction.as_str()],
        )?;
        Ok(true)
    }

    /// Counts for every reaction in display order
    pub fn reaction_counts(&self, confession_id: i64) -> Result<Vec<(Reaction, u32)>, DatabaseError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT COUNT(*) FROM confession_reactions WHERE confession_id = ?1 AND reaction = ?2",
        )?;
        Reaction::ALL
            .into_iter()
            .map(|reaction| {
                let count: u32 =
                    stmt.query_row(params![confession_id, reaction.as_str()], |row| row.get(0))?;
                Ok::<_, DatabaseError>((reaction, count))
            })
            .collect()
    }

    // ---------------------------------------------------------------------
    // Admin contact
    // ---------------------------------------------------------------------

    pub fn can_contact_admin(&self, user_id: UserId) -> Result<bool, DatabaseError> {
        let conn = self.conn()?;
        let allowed: Option<bool> = conn
            .query_row(
                "SELECT admin_contact_allowed FROM users WHERE user_id = ?",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(allowed.unwrap_or(true))
    }

    /// Log the message and close the user's contact window
    pub fn save_admin_contact(&self, user_id: UserId, message: &str) -> Result<(), DatabaseError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO admin_contacts (user_id, message) VALUES (?1, ?2)",
            params![user_id, message],
        )?;
        tx.execute(
            "UPDATE users SET admin_contact_allowed = 0 WHERE user_id = ?",
            [user_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Re-open the contact window for users whose latest contact is older than `window`
    pub fn reopen_admin_contacts(&self, window: chrono::Duration) -> Result<usize, DatabaseError> {
        let cutoff = (Utc::now() - window).format(TIMESTAMP_FORMAT).to_string();
        let conn = self.conn()?;
        let reopened = conn.execute(
            "UPDATE users SET admin_contact_allowed = 1
             WHERE admin_contact_allowed = 0
               AND user_id IN (
                   SELECT user_id FROM admin_contacts
                   GROUP BY user_id HAVING MAX(created_at) < ?1
               )",
            [cutoff],
        )?;
        Ok(reopened)
    }

    // ---------------------------------------------------------------------
    // Stats
    // ---------------------------------------------------------------------

    pub fn user_stats(&self, user_id: UserId) -> Result<UserStats, DatabaseError> {
        let conn = self.conn()?;
        let (confessions, voice_confessions, approved) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN kind = 'voice' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'approved' THEN 1 ELSE 0 END), 0)
             FROM confessions WHERE user_id = ?",
            [user_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let comments = conn.query_row(
            "SELECT COUNT(*) FROM confession_comments WHERE user_id = ?",
            [user_id],
            |row| row.get(0),
        )?;
        let reactions = conn.query_row(
            "SELECT COUNT(*) FROM confession_reactions WHERE user_id = ?",
            [user_id],
            |row| row.get(0),
        )?;
        let has_profile = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM blind_profiles WHERE user_id = ? AND profile_complete = 1)",
            [user_id],
            |row| row.get(0),
        )?;
        let (banned, admin_contact_allowed) = conn
            .query_row(
                "SELECT banned, admin_contact_allowed FROM users WHERE user_id = ?",
                [user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .unwrap_or((false, true));

        Ok(UserStats {
            confessions,
            voice_confessions,
            approved,
            comments,
            reactions,
            has_profile,
            banned,
            admin_contact_allowed,
        })
    }
}

fn confession_from_row(row: &Row<'_>) -> rusqlite::Result<Confession> {
    let kind: String = row.get(2)?;
    let status: String = row.get(5)?;
    let channel_id: Option<u64> = row.get(6)?;
    let message_id: Option<u64> = row.get(7)?;
    let created_at: String = row.get(8)?;
    Ok(Confession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: ConfessionKind::from_str(&kind).unwrap_or(ConfessionKind::Text),
        text: row.get(3)?,
        voice_ref: row.get(4)?,
        status: ReviewStatus::from_str(&status).unwrap_or(ReviewStatus::Pending),
        public_post: channel_id
            .zip(message_id)
            .map(|(channel_id, message_id)| MessageRef {
                channel_id,
                message_id,
            }),
        created_at: parse_timestamp(&created_at),
    })
}

/// Rows with unknown enum values are treated as absent profiles
fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Option<BlindProfile>> {
    let gender: String = row.get(1)?;
    let year: String = row.get(4)?;
    let pref: String = row.get(5)?;
    let created_at: String = row.get(9)?;

    let (Some(gender), Some(year_of_study), Some(pref_gender)) = (
        Gender::from_str(&gender),
        YearOfStudy::from_str(&year),
        PrefGender::from_str(&pref),
    ) else {
        return Ok(None);
    };

    Ok(Some(BlindProfile {
        user_id: row.get(0)?,
        gender,
        age: row.get(2)?,
        years_on_campus: row.get(3)?,
        year_of_study,
        pref_gender,
        pref_age_min: row.get(6)?,
        pref_age_max: row.get(7)?,
        profile_complete: row.get(8)?,
        created_at: parse_timestamp(&created_at),
    }))
}

fn now_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
impl Database {
    /// Raw SQL for tests that need to break or inspect the schema
    pub(crate) fn run_sql(&self, sql: &str) -> Result<(), DatabaseError> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }
}
