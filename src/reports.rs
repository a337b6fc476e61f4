//! Abuse reports against blind-chat partners
//!
//! Counts live in memory for the process lifetime; every filing is also
//! written to the reports table with its reason.

use crate::database::{Database, DatabaseError};
use crate::matchmaker::Matchmaker;
use crate::transport::UserId;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Reporter is not in a chat with the reported user")]
    InvalidReportTarget,
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportReason {
    Harassment,
    FakeProfile,
    Inappropriate,
    PersonalInfo,
    Spamming,
    Other,
}

impl ReportReason {
    pub const ALL: [ReportReason; 6] = [
        ReportReason::Harassment,
        ReportReason::FakeProfile,
        ReportReason::Inappropriate,
        ReportReason::PersonalInfo,
        ReportReason::Spamming,
        ReportReason::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportReason::Harassment => "harassment",
            ReportReason::FakeProfile => "fake_profile",
            ReportReason::Inappropriate => "inappropriate",
            ReportReason::PersonalInfo => "personal_info",
            ReportReason::Spamming => "spamming",
            ReportReason::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == s)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReportReason::Harassment => "🚫 Harassment",
            ReportReason::FakeProfile => "🎭 Fake profile",
            ReportReason::Inappropriate => "🔞 Inappropriate",
            ReportReason::PersonalInfo => "📇 Personal info",
            ReportReason::Spamming => "📢 Spamming",
            ReportReason::Other => "❓ Other",
        }
    }
}

/// Outcome of one filing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportFiled {
    pub count: u32,
    /// True only for the filing that reached the threshold
    pub threshold_crossed: bool,
}

#[derive(Serialize)]
struct ReportContext<'a> {
    source: &'a str,
    count_after: u32,
    threshold: u32,
}

pub struct ReportLedger {
    counts: Mutex<HashMap<UserId, u32>>,
    threshold: u32,
}

impl ReportLedger {
    pub fn new(threshold: u32) -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
            threshold,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn count(&self, user_id: UserId) -> u32 {
        self.counts.lock().get(&user_id).copied().unwrap_or(0)
    }

    /// File a report from one side of a live pair against the other.
    ///
    /// Repeat filings by the same reporter count again.
    pub fn file(
        &self,
        matchmaker: &Matchmaker,
        db: &Database,
        reporter: UserId,
        reported: UserId,
        reason: ReportReason,
    ) -> Result<ReportFiled, ReportError> {
        if !matchmaker.are_paired(reporter, reported) {
            warn!(reporter, reported, "Report rejected: users are not paired");
            return Err(ReportError::InvalidReportTarget);
        }

        // A filing only counts once it is stored
        let mut counts = self.counts.lock();
        let count = counts.get(&reported).copied().unwrap_or(0) + 1;
        let context = ReportContext {
            source: "blind_chat",
            count_after: count,
            threshold: self.threshold,
        };
        db.save_report(reporter, reported, reason.as_str(), &context)?;
        counts.insert(reported, count);
        drop(counts);

        let threshold_crossed = count == self.threshold;
        info!(
            reporter,
            reported,
            reason = reason.as_str(),
            count,
            threshold_crossed,
            "Report filed"
        );
        Ok(ReportFiled {
            count,
            threshold_crossed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{BlindProfile, Gender, PrefGender, YearOfStudy};
    use chrono::Utc;

    fn paired(a: UserId, b: UserId) -> Matchmaker {
        let mm = Matchmaker::new();
        let base = BlindProfile {
            user_id: a,
            gender: Gender::Male,
            age: 25,
            years_on_campus: 1,
            year_of_study: YearOfStudy::First,
            pref_gender: PrefGender::Both,
            pref_age_min: 18,
            pref_age_max: 50,
            profile_complete: true,
            created_at: Utc::now(),
        };
        mm.request_match(&base);
        mm.request_match(&BlindProfile {
            user_id: b,
            gender: Gender::Female,
            ..base
        });
        assert!(mm.are_paired(a, b));
        mm
    }

    #[test]
    fn test_threshold_crossed_exactly_once() {
        let db = Database::open(":memory:").unwrap();
        let mm = paired(1, 2);
        let ledger = ReportLedger::new(3);

        let filings: Vec<ReportFiled> = (0..4)
            .map(|_| ledger.file(&mm, &db, 1, 2, ReportReason::Harassment).unwrap())
            .collect();

        let crossings = filings.iter().filter(|f| f.threshold_crossed).count();
        assert_eq!(crossings, 1);
        assert!(filings[2].threshold_crossed);
        assert!(!filings[3].threshold_crossed);
        assert_eq!(ledger.count(2), 4);
        assert_eq!(db.report_count(2).unwrap(), 4);
    }

    #[test]
    fn test_failed_write_does_not_skip_threshold() {
        let db = Database::open(":memory:").unwrap();
        let mm = paired(1, 2);
        let ledger = ReportLedger::new(3);

        for _ in 0..2 {
            ledger.file(&mm, &db, 1, 2, ReportReason::Harassment).unwrap();
        }
        db.run_sql("ALTER TABLE reports RENAME TO reports_moved").unwrap();
        assert!(ledger.file(&mm, &db, 1, 2, ReportReason::Harassment).is_err());
        assert_eq!(ledger.count(2), 2);

        db.run_sql("ALTER TABLE reports_moved RENAME TO reports").unwrap();
        let third = ledger.file(&mm, &db, 1, 2, ReportReason::Harassment).unwrap();
        assert_eq!(
            third,
            ReportFiled {
                count: 3,
                threshold_crossed: true
            }
        );
        assert_eq!(db.report_count(2).unwrap(), 3);
    }

    #[test]
    fn test_reports_require_live_pair() {
        let db = Database::open(":memory:").unwrap();
        let mm = paired(1, 2);
        let ledger = ReportLedger::new(3);

        let err = ledger
            .file(&mm, &db, 1, 3, ReportReason::Spamming)
            .unwrap_err();
        assert!(matches!(err, ReportError::InvalidReportTarget));

        mm.end_chat(1);
        assert!(ledger.file(&mm, &db, 1, 2, ReportReason::Other).is_err());
        assert_eq!(ledger.count(2), 0);
        assert_eq!(db.report_count(2).unwrap(), 0);
    }

    #[test]
    fn test_reason_tags() {
        for reason in ReportReason::ALL {
            assert_eq!(ReportReason::from_str(reason.as_str()), Some(reason));
        }
        assert_eq!(ReportReason::from_str("rude"), None);
    }
}
