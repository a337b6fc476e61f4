//! Per-user conversational sessions
//!
//! Each active user owns one [`Session`] whose [`FlowState`] carries a typed
//! draft for the multi-step flow in progress. Transitions are pure functions
//! over the drafts; the store only keeps them and sweeps stale entries.

use crate::database::{BlindProfile, ConfessionKind, Gender, PrefGender, YearOfStudy};
use crate::transport::UserId;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const AGE_RANGE: (u8, u8) = (18, 50);
pub const YEARS_ON_CAMPUS_MAX: u8 = 10;
pub const CONFESSION_TEXT: (usize, usize) = (10, 2000);
pub const COMMENT_TEXT: (usize, usize) = (1, 500);

/// Input rejected by the current step; the step is re-prompted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please enter a whole number")]
    NotANumber,
    #[error("Age must be between {min} and {max}")]
    AgeOutOfRange { min: u8, max: u8 },
    #[error("Years on campus must be between 0 and {max}")]
    YearsOutOfRange { max: u8 },
    #[error("Please pick your year of study from the buttons")]
    UnknownYearOfStudy,
    #[error("Please pick Male, Female or Both")]
    UnknownPrefGender,
    #[error("Maximum age must be between {min} and {max}")]
    PrefMaxOutOfRange { min: u8, max: u8 },
    #[error("Text must be between {min} and {max} characters (got {actual})")]
    TextLength {
        min: usize,
        max: usize,
        actual: usize,
    },
    #[error("Voice message must be {max_secs} seconds or shorter")]
    VoiceTooLong { max_secs: u64 },
    #[error("Please send {expected}")]
    WrongContent { expected: &'static str },
}

/// Result of feeding one input to a draft
#[derive(Debug, Clone, PartialEq)]
pub enum Step<D, T> {
    Advance(D),
    Reprompt(D, ValidationError),
    Complete(T),
}

// ---------------------------------------------------------------------------
// Profile creation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileStep {
    Age,
    YearsOnCampus,
    YearOfStudy,
    PrefGender,
    PrefAgeMin,
    PrefAgeMax,
}

/// Answer to a profile step, typed or pressed
#[derive(Debug, Clone, Copy)]
pub enum ProfileInput<'a> {
    Text(&'a str),
    YearOfStudy(YearOfStudy),
    PrefGender(PrefGender),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileDraft {
    pub user_id: UserId,
    pub gender: Gender,
    pub step: ProfileStep,
    age: Option<u8>,
    years_on_campus: Option<u8>,
    year_of_study: Option<YearOfStudy>,
    pref_gender: Option<PrefGender>,
    pref_age_min: Option<u8>,
}

impl ProfileDraft {
    pub fn new(user_id: UserId, gender: Gender) -> Self {
        Self {
            user_id,
            gender,
            step: ProfileStep::Age,
            age: None,
            years_on_campus: None,
            year_of_study: None,
            pref_gender: None,
            pref_age_min: None,
        }
    }

    /// The accepted lower bound of the preferred age range, once entered
    pub fn pref_age_min(&self) -> Option<u8> {
        self.pref_age_min
    }

    /// Feed one answer to the current step
    pub fn apply(mut self, input: ProfileInput<'_>) -> Step<ProfileDraft, BlindProfile> {
        let result = match self.step {
            ProfileStep::Age => {
                parse_in_range(input, AGE_RANGE.0, AGE_RANGE.1, |min, max| {
                    ValidationError::AgeOutOfRange { min, max }
                })
                .map(|age| {
                    self.age = Some(age);
                    ProfileStep::YearsOnCampus
                })
            }
            ProfileStep::YearsOnCampus => {
                parse_in_range(input, 0, YEARS_ON_CAMPUS_MAX, |_, max| {
                    ValidationError::YearsOutOfRange { max }
                })
                .map(|years| {
                    self.years_on_campus = Some(years);
                    ProfileStep::YearOfStudy
                })
            }
            ProfileStep::YearOfStudy => {
                let year = match input {
                    ProfileInput::YearOfStudy(year) => Some(year),
                    ProfileInput::Text(text) => YearOfStudy::from_str(text),
                    ProfileInput::PrefGender(_) => None,
                };
                year.ok_or(ValidationError::UnknownYearOfStudy).map(|year| {
                    self.year_of_study = Some(year);
                    ProfileStep::PrefGender
                })
            }
            ProfileStep::PrefGender => {
                let pref = match input {
                    ProfileInput::PrefGender(pref) => Some(pref),
                    ProfileInput::Text(text) => PrefGender::from_str(text),
                    ProfileInput::YearOfStudy(_) => None,
                };
                pref.ok_or(ValidationError::UnknownPrefGender).map(|pref| {
                    self.pref_gender = Some(pref);
                    ProfileStep::PrefAgeMin
                })
            }
            ProfileStep::PrefAgeMin => {
                parse_in_range(input, AGE_RANGE.0, AGE_RANGE.1, |min, max| {
                    ValidationError::AgeOutOfRange { min, max }
                })
                .map(|min| {
                    self.pref_age_min = Some(min);
                    ProfileStep::PrefAgeMax
                })
            }
            ProfileStep::PrefAgeMax => {
                let min = self.pref_age_min.unwrap_or(AGE_RANGE.0);
                match parse_in_range(input, min, AGE_RANGE.1, |min, max| {
                    ValidationError::PrefMaxOutOfRange { min, max }
                }) {
                    Ok(max) => match self.finish(max) {
                        Some(profile) => return Step::Complete(profile),
                        // Unreachable through the step order; restart rather than guess
                        None => Ok(ProfileStep::Age),
                    },
                    Err(e) => Err(e),
                }
            }
        };

        match result {
            Ok(next) => {
                self.step = next;
                Step::Advance(self)
            }
            Err(e) => Step::Reprompt(self, e),
        }
    }

    fn finish(&self, pref_age_max: u8) -> Option<BlindProfile> {
        Some(BlindProfile {
            user_id: self.user_id,
            gender: self.gender,
            age: self.age?,
            years_on_campus: self.years_on_campus?,
            year_of_study: self.year_of_study?,
            pref_gender: self.pref_gender?,
            pref_age_min: self.pref_age_min?,
            pref_age_max,
            profile_complete: true,
            created_at: Utc::now(),
        })
    }
}

fn parse_in_range(
    input: ProfileInput<'_>,
    min: u8,
    max: u8,
    out_of_range: impl Fn(u8, u8) -> ValidationError,
) -> Result<u8, ValidationError> {
    let ProfileInput::Text(text) = input else {
        return Err(ValidationError::NotANumber);
    };
    let value: i64 = text
        .trim()
        .parse()
        .map_err(|_| ValidationError::NotANumber)?;
    if value < i64::from(min) || value > i64::from(max) {
        return Err(out_of_range(min, max));
    }
    Ok(value as u8)
}

// ---------------------------------------------------------------------------
// Confessions, comments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfessionStep {
    ChoosingType,
    AwaitingContent(ConfessionKind),
    /// A voice job is running; only its own job id may complete the flow
    Processing { job_id: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfessionDraft {
    pub step: ConfessionStep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommentDraft {
    pub confession_id: i64,
}

/// Character-count check shared by confessions and comments
pub fn validate_text(text: &str, (min, max): (usize, usize)) -> Result<String, ValidationError> {
    let text = text.trim();
    let actual = text.chars().count();
    if actual < min || actual > max {
        return Err(ValidationError::TextLength { min, max, actual });
    }
    Ok(text.to_string())
}

pub fn validate_voice(duration: Duration, max: Duration) -> Result<(), ValidationError> {
    if duration > max {
        return Err(ValidationError::VoiceTooLong {
            max_secs: max.as_secs(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Which flow a session is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    Idle,
    Profile,
    Confession,
    Comment,
    AdminContact,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowState {
    Idle,
    Profile(ProfileDraft),
    Confession(ConfessionDraft),
    Comment(CommentDraft),
    AdminContact,
}

impl FlowState {
    pub fn kind(&self) -> FlowKind {
        match self {
            FlowState::Idle => FlowKind::Idle,
            FlowState::Profile(_) => FlowKind::Profile,
            FlowState::Confession(_) => FlowKind::Confession,
            FlowState::Comment(_) => FlowKind::Comment,
            FlowState::AdminContact => FlowKind::AdminContact,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, FlowState::Idle)
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: UserId,
    pub flow: FlowState,
    pub last_active: Instant,
}

impl Session {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            flow: FlowState::Idle,
            last_active: Instant::now(),
        }
    }

    pub fn is_inactive(&self, timeout: Duration) -> bool {
        self.last_active.elapsed() >= timeout
    }
}

/// In-memory session cache keyed by user
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<UserId, Session>,
    next_job: AtomicU64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the session lazily and mark it active
    pub fn touch(&self, user_id: UserId) {
        self.sessions
            .entry(user_id)
            .or_insert_with(|| Session::new(user_id))
            .last_active = Instant::now();
    }

    pub fn flow(&self, user_id: UserId) -> FlowState {
        self.sessions
            .get(&user_id)
            .map(|s| s.flow.clone())
            .unwrap_or(FlowState::Idle)
    }

    /// Enter or advance a flow
    pub fn set_flow(&self, user_id: UserId, flow: FlowState) {
        let mut session = self
            .sessions
            .entry(user_id)
            .or_insert_with(|| Session::new(user_id));
        session.flow = flow;
        session.last_active = Instant::now();
    }

    /// Back to idle, discarding any draft
    pub fn reset(&self, user_id: UserId) {
        if let Some(mut session) = self.sessions.get_mut(&user_id) {
            session.flow = FlowState::Idle;
        }
    }

    /// Reset a non-idle session; returns the flow that was abandoned
    pub fn cancel(&self, user_id: UserId) -> Option<FlowKind> {
        let mut session = self.sessions.get_mut(&user_id)?;
        let previous = session.flow.kind();
        if previous == FlowKind::Idle {
            return None;
        }
        session.flow = FlowState::Idle;
        Some(previous)
    }

    /// Move an awaiting voice confession to processing under a fresh job id
    pub fn begin_voice_job(&self, user_id: UserId) -> u64 {
        let job_id = self.next_job.fetch_add(1, Ordering::Relaxed) + 1;
        self.set_flow(
            user_id,
            FlowState::Confession(ConfessionDraft {
                step: ConfessionStep::Processing { job_id },
            }),
        );
        job_id
    }

    /// Claim the result of a voice job.
    ///
    /// Only succeeds while the session still waits for exactly this job;
    /// the session is reset on success.
    pub fn finish_voice_job(&self, user_id: UserId, job_id: u64) -> bool {
        let Some(mut session) = self.sessions.get_mut(&user_id) else {
            return false;
        };
        let expected = FlowState::Confession(ConfessionDraft {
            step: ConfessionStep::Processing { job_id },
        });
        if session.flow != expected {
            return false;
        }
        session.flow = FlowState::Idle;
        true
    }

    /// Drop sessions inactive for at least `ttl`
    pub fn sweep_idle(&self, ttl: Duration) -> Vec<UserId> {
        let stale: Vec<UserId> = self
            .sessions
            .iter()
            .filter(|s| s.is_inactive(ttl))
            .map(|s| s.user_id)
            .collect();
        for user_id in &stale {
            self.sessions.remove_if(user_id, |_, s| s.is_inactive(ttl));
        }
        stale
    }

    /// Reset comment-authoring sessions inactive for at least `ttl`
    pub fn expire_comments(&self, ttl: Duration) -> Vec<UserId> {
        let mut expired = Vec::new();
        for mut session in self.sessions.iter_mut() {
            if matches!(session.flow, FlowState::Comment(_)) && session.is_inactive(ttl) {
                session.flow = FlowState::Idle;
                expired.push(session.user_id);
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advance(draft: ProfileDraft, input: ProfileInput<'_>) -> ProfileDraft {
        match draft.apply(input) {
            Step::Advance(next) => next,
            other => panic!("expected advance, got {:?}", other),
        }
    }

    #[test]
    fn test_age_range_boundaries() {
        for age in 18..=50 {
            let text = age.to_string();
            let draft = ProfileDraft::new(1, Gender::Male);
            let next = advance(draft, ProfileInput::Text(&text));
            assert_eq!(next.step, ProfileStep::YearsOnCampus);
        }
        for text in ["17", "51", "0", "-3", "abc", "", "300"] {
            let draft = ProfileDraft::new(1, Gender::Male);
            match draft.apply(ProfileInput::Text(text)) {
                Step::Reprompt(same, _) => assert_eq!(same.step, ProfileStep::Age),
                other => panic!("age {:?} should be rejected, got {:?}", text, other),
            }
        }
    }

    #[test]
    fn test_full_profile_flow() {
        let mut draft = ProfileDraft::new(5, Gender::Female);
        draft = advance(draft, ProfileInput::Text("24"));
        draft = advance(draft, ProfileInput::Text("2"));
        draft = advance(draft, ProfileInput::YearOfStudy(YearOfStudy::Third));
        draft = advance(draft, ProfileInput::PrefGender(PrefGender::Male));
        draft = advance(draft, ProfileInput::Text("21"));
        assert_eq!(draft.step, ProfileStep::PrefAgeMax);
        assert_eq!(draft.pref_age_min(), Some(21));

        // Max below the stored min stays on the same sub-step
        let draft = match draft.apply(ProfileInput::Text("20")) {
            Step::Reprompt(d, ValidationError::PrefMaxOutOfRange { min: 21, max: 50 }) => d,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(draft.step, ProfileStep::PrefAgeMax);

        match draft.apply(ProfileInput::Text("29")) {
            Step::Complete(profile) => {
                assert_eq!(profile.user_id, 5);
                assert_eq!(profile.gender, Gender::Female);
                assert_eq!(profile.age, 24);
                assert_eq!(profile.year_of_study, YearOfStudy::Third);
                assert_eq!((profile.pref_age_min, profile.pref_age_max), (21, 29));
                assert!(profile.profile_complete);
            }
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[test]
    fn test_year_of_study_accepts_typed_label() {
        let mut draft = ProfileDraft::new(1, Gender::Male);
        draft = advance(draft, ProfileInput::Text("20"));
        draft = advance(draft, ProfileInput::Text("0"));
        let draft = advance(draft, ProfileInput::Text("5th+ year"));
        assert_eq!(draft.step, ProfileStep::PrefGender);

        assert!(matches!(
            draft.apply(ProfileInput::YearOfStudy(YearOfStudy::First)),
            Step::Reprompt(_, ValidationError::UnknownPrefGender)
        ));
    }

    #[test]
    fn test_text_limits() {
        assert!(validate_text("too short", CONFESSION_TEXT).is_err());
        assert!(validate_text("exactly ten", CONFESSION_TEXT).is_ok());
        assert!(validate_text(&"x".repeat(2001), CONFESSION_TEXT).is_err());
        assert!(validate_text("  ", COMMENT_TEXT).is_err());
        assert_eq!(validate_text(" ok ", COMMENT_TEXT).unwrap(), "ok");
        assert!(validate_voice(Duration::from_secs(121), Duration::from_secs(120)).is_err());
        assert!(validate_voice(Duration::from_secs(120), Duration::from_secs(120)).is_ok());
    }

    #[test]
    fn test_cancel_from_every_flow() {
        let store = SessionStore::new();
        let flows = [
            FlowState::Profile(ProfileDraft::new(1, Gender::Male)),
            FlowState::Confession(ConfessionDraft {
                step: ConfessionStep::AwaitingContent(ConfessionKind::Text),
            }),
            FlowState::Comment(CommentDraft { confession_id: 3 }),
            FlowState::AdminContact,
        ];
        for flow in flows {
            let kind = flow.kind();
            store.set_flow(1, flow);
            assert_eq!(store.cancel(1), Some(kind));
            assert_eq!(store.flow(1), FlowState::Idle);
        }
        assert_eq!(store.cancel(1), None);
    }

    #[test]
    fn test_voice_job_claim_after_cancel_is_rejected() {
        let store = SessionStore::new();
        store.touch(2);
        let job = store.begin_voice_job(2);
        store.cancel(2);
        assert!(!store.finish_voice_job(2, job));

        let second = store.begin_voice_job(2);
        assert_ne!(job, second);
        assert!(!store.finish_voice_job(2, job));
        assert!(store.finish_voice_job(2, second));
        assert!(store.flow(2).is_idle());
    }

    #[test]
    fn test_sweeps() {
        let store = SessionStore::new();
        store.touch(1);
        store.set_flow(2, FlowState::Comment(CommentDraft { confession_id: 9 }));

        assert!(store.sweep_idle(Duration::from_secs(3600)).is_empty());
        assert_eq!(store.expire_comments(Duration::ZERO), vec![2]);
        assert!(store.flow(2).is_idle());

        let mut swept = store.sweep_idle(Duration::ZERO);
        swept.sort();
        assert_eq!(swept, vec![1, 2]);
        assert!(store.is_empty());
    }
}
