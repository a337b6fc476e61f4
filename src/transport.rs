//! Chat platform boundary
//!
//! Everything the engine knows about the platform: inbound events already
//! normalized into [`Action`]s and [`Content`], outbound messages with
//! button [`Controls`], and the [`Transport`] trait used to deliver them.

use crate::database::{Gender, PrefGender, Reaction, YearOfStudy};
use crate::reports::ReportReason;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Platform user identifier
pub type UserId = u64;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Platform error: {0}")]
    Platform(String),
    #[error("Download failed: {0}")]
    Download(String),
    #[error("Upload returned no attachment")]
    MissingAttachment,
}

/// A message already posted somewhere
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel_id: u64,
    pub message_id: u64,
}

/// Stable reference to a file held by the platform
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileRef(pub String);

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    User(UserId),
    Moderation,
    Public,
}

/// Who sent an inbound event
#[derive(Debug, Clone)]
pub struct Sender {
    pub id: UserId,
    pub display_name: String,
}

#[derive(Debug, Clone)]
pub enum Content {
    Text(String),
    Voice {
        file: FileRef,
        duration: Option<Duration>,
    },
    Photo {
        file: FileRef,
        caption: Option<String>,
    },
    Document {
        file: FileRef,
        name: String,
    },
}

#[derive(Debug, Clone)]
pub enum InboundKind {
    Content(Content),
    /// A button press or a recognised command
    Action {
        action: Action,
        origin: Option<MessageRef>,
    },
    /// `/start` with its optional parameter
    Start(Option<String>),
}

#[derive(Debug, Clone)]
pub struct Inbound {
    pub sender: Sender,
    pub kind: InboundKind,
}

/// Deep-link style start parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeepLink {
    Comment(i64),
    View(i64),
}

impl DeepLink {
    pub fn parse(param: &str) -> Option<Self> {
        let param = param.trim();
        if let Some(id) = param.strip_prefix("comment") {
            return id.parse().ok().map(DeepLink::Comment);
        }
        if let Some(id) = param.strip_prefix("view") {
            return id.parse().ok().map(DeepLink::View);
        }
        None
    }

    pub fn param(&self) -> String {
        match self {
            DeepLink::Comment(id) => format!("comment{}", id),
            DeepLink::View(id) => format!("view{}", id),
        }
    }
}

/// Symbolic action behind every button and command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    MainMenu,
    Help,
    Guidelines,
    Stats,
    Profile,
    Confess,
    TextConfession,
    VoiceConfession,
    BlindConnect,
    CancelSearch,
    ContactAdmin,
    Cancel,
    SetGender(Gender),
    YearOfStudy(YearOfStudy),
    PrefGender(PrefGender),
    EndChat,
    Report,
    ReportReason {
        reason: ReportReason,
        reported: UserId,
    },
    SendHeart,
    SendSmile,
    VoiceTip,
    PhotoTip,
    Approve(i64),
    Reject(i64),
    Ban(i64),
    Listen(i64),
    React {
        confession_id: i64,
        reaction: Reaction,
    },
    Open(DeepLink),
}

impl Action {
    /// Compact tag used as a button's custom id
    pub fn tag(&self) -> String {
        match self {
            Action::MainMenu => "menu".into(),
            Action::Help => "help".into(),
            Action::Guidelines => "guidelines".into(),
            Action::Stats => "stats".into(),
            Action::Profile => "profile".into(),
            Action::Confess => "confess".into(),
            Action::TextConfession => "confess:text".into(),
            Action::VoiceConfession => "confess:voice".into(),
            Action::BlindConnect => "blind".into(),
            Action::CancelSearch => "cancel_search".into(),
            Action::ContactAdmin => "contact_admin".into(),
            Action::Cancel => "cancel".into(),
            Action::SetGender(g) => format!("gender:{}", g.as_str()),
            Action::YearOfStudy(y) => format!("year:{}", year_index(*y)),
            Action::PrefGender(p) => format!("pref:{}", p.as_str()),
            Action::EndChat => "end_chat".into(),
            Action::Report => "report".into(),
            Action::ReportReason { reason, reported } => {
                format!("report:{}:{}", reason.as_str(), reported)
            }
            Action::SendHeart => "heart".into(),
            Action::SendSmile => "smile".into(),
            Action::VoiceTip => "tip:voice".into(),
            Action::PhotoTip => "tip:photo".into(),
            Action::Approve(id) => format!("approve:{}", id),
            Action::Reject(id) => format!("reject:{}", id),
            Action::Ban(id) => format!("ban:{}", id),
            Action::Listen(id) => format!("listen:{}", id),
            Action::React {
                confession_id,
                reaction,
            } => format!("react:{}:{}", confession_id, reaction.as_str()),
            Action::Open(link) => format!("start:{}", link.param()),
        }
    }

    /// Parse a button tag back into its action
    pub fn parse(tag: &str) -> Option<Self> {
        let mut parts = tag.splitn(3, ':');
        let head = parts.next()?;
        let first = parts.next();
        let second = parts.next();

        let action = match (head, first, second) {
            ("menu", None, None) => Action::MainMenu,
            ("help", None, None) => Action::Help,
            ("guidelines", None, None) => Action::Guidelines,
            ("stats", None, None) => Action::Stats,
            ("profile", None, None) => Action::Profile,
            ("confess", None, None) => Action::Confess,
            ("confess", Some("text"), None) => Action::TextConfession,
            ("confess", Some("voice"), None) => Action::VoiceConfession,
            ("blind", None, None) => Action::BlindConnect,
            ("cancel_search", None, None) => Action::CancelSearch,
            ("contact_admin", None, None) => Action::ContactAdmin,
            ("cancel", None, None) => Action::Cancel,
            ("gender", Some(g), None) => Action::SetGender(Gender::from_str(g)?),
            ("year", Some(y), None) => {
                let index: usize = y.parse().ok()?;
                Action::YearOfStudy(*YearOfStudy::ALL.get(index.checked_sub(1)?)?)
            }
            ("pref", Some(p), None) => Action::PrefGender(PrefGender::from_str(p)?),
            ("end_chat", None, None) => Action::EndChat,
            ("report", None, None) => Action::Report,
            ("report", Some(reason), Some(id)) => Action::ReportReason {
                reason: ReportReason::from_str(reason)?,
                reported: id.parse().ok()?,
            },
            ("heart", None, None) => Action::SendHeart,
            ("smile", None, None) => Action::SendSmile,
            ("tip", Some("voice"), None) => Action::VoiceTip,
            ("tip", Some("photo"), None) => Action::PhotoTip,
            ("approve", Some(id), None) => Action::Approve(id.parse().ok()?),
            ("reject", Some(id), None) => Action::Reject(id.parse().ok()?),
            ("ban", Some(id), None) => Action::Ban(id.parse().ok()?),
            ("listen", Some(id), None) => Action::Listen(id.parse().ok()?),
            ("react", Some(id), Some(reaction)) => Action::React {
                confession_id: id.parse().ok()?,
                reaction: Reaction::from_str(reaction)?,
            },
            ("start", Some(param), None) => Action::Open(DeepLink::parse(param)?),
            _ => return None,
        };
        Some(action)
    }

    /// Recognise typed commands and the cancel word in a direct message
    pub fn from_text(text: &str) -> Option<Self> {
        let text = text.trim();
        if is_cancel_token(text) {
            return Some(Action::Cancel);
        }
        let command = text.strip_prefix('/')?;
        let action = match command.to_lowercase().as_str() {
            "menu" => Action::MainMenu,
            "help" => Action::Help,
            "rules" => Action::Guidelines,
            "status" => Action::Stats,
            "profile" => Action::Profile,
            "confess" => Action::Confess,
            "blind" => Action::BlindConnect,
            "end" => Action::EndChat,
            "report" => Action::Report,
            "contact_admin" => Action::ContactAdmin,
            _ => return None,
        };
        Some(action)
    }

    /// Actions pressed on moderation or public posts rather than in a DM
    pub fn is_channel_action(&self) -> bool {
        matches!(
            self,
            Action::Approve(_)
                | Action::Reject(_)
                | Action::Ban(_)
                | Action::Listen(_)
                | Action::React { .. }
        )
    }
}

fn year_index(year: YearOfStudy) -> usize {
    YearOfStudy::ALL
        .iter()
        .position(|y| *y == year)
        .map(|i| i + 1)
        .unwrap_or(1)
}

/// The literal cancel word accepted in every step
pub fn is_cancel_token(text: &str) -> bool {
    matches!(
        text.trim().to_lowercase().as_str(),
        "cancel" | "/cancel" | "❌ cancel"
    )
}

/// Split a typed `/start <param>` into its parameter
pub fn parse_start_command(text: &str) -> Option<Option<String>> {
    let rest = text.trim().strip_prefix("/start")?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let param = rest.trim();
    Some((!param.is_empty()).then(|| param.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Primary,
    Secondary,
    Success,
    Danger,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Button {
    pub label: String,
    pub action: Action,
    pub tone: Tone,
}

impl Button {
    pub fn new(label: impl Into<String>, action: Action) -> Self {
        Self {
            label: label.into(),
            action,
            tone: Tone::Secondary,
        }
    }

    pub fn tone(mut self, tone: Tone) -> Self {
        self.tone = tone;
        self
    }
}

/// Rows of interactive buttons attached to a message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Controls {
    pub rows: Vec<Vec<Button>>,
}

impl Controls {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn row(mut self, buttons: Vec<Button>) -> Self {
        if !buttons.is_empty() {
            self.rows.push(buttons);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn actions(&self) -> impl Iterator<Item = Action> + '_ {
        self.rows.iter().flatten().map(|b| b.action)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Media {
    Voice(FileRef),
    Photo(FileRef),
    Document { file: FileRef, name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub text: String,
    pub controls: Controls,
    pub media: Option<Media>,
}

impl Outbound {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            controls: Controls::none(),
            media: None,
        }
    }

    pub fn controls(mut self, controls: Controls) -> Self {
        self.controls = controls;
        self
    }

    pub fn media(mut self, media: Media) -> Self {
        self.media = Some(media);
        self
    }
}

/// Outbound side of the chat platform
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message and return where it landed
    async fn send(&self, to: Destination, message: Outbound) -> Result<MessageRef, TransportError>;

    /// Replace a posted message's controls, and its text when given
    async fn edit(
        &self,
        target: MessageRef,
        text: Option<String>,
        controls: Controls,
    ) -> Result<(), TransportError>;

    /// Raw bytes behind a file reference
    async fn fetch_file(&self, file: &FileRef) -> Result<Vec<u8>, TransportError>;

    /// Upload a processed voice clip and return its new stable reference
    async fn upload_voice(&self, bytes: Vec<u8>, caption: String) -> Result<FileRef, TransportError>;
}

#[cfg(test)]
pub mod testing {
    //! In-memory transport that records every call

    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<(Destination, Outbound)>>,
        pub edits: Mutex<Vec<(MessageRef, Option<String>, Controls)>>,
        pub uploads: Mutex<Vec<Vec<u8>>>,
        pub fail_uploads: AtomicBool,
        pub fail_public: AtomicBool,
        next_id: AtomicU64,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn texts_to(&self, to: Destination) -> Vec<String> {
            self.sent
                .lock()
                .iter()
                .filter(|(d, _)| *d == to)
                .map(|(_, m)| m.text.clone())
                .collect()
        }

        pub fn last_to(&self, to: Destination) -> Option<Outbound> {
            self.sent
                .lock()
                .iter()
                .rev()
                .find(|(d, _)| *d == to)
                .map(|(_, m)| m.clone())
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(
            &self,
            to: Destination,
            message: Outbound,
        ) -> Result<MessageRef, TransportError> {
            if to == Destination::Public && self.fail_public.load(Ordering::SeqCst) {
                return Err(TransportError::Platform("public channel unavailable".into()));
            }
            let channel_id = match to {
                Destination::User(id) => id,
                Destination::Moderation => 1,
                Destination::Public => 2,
            };
            self.sent.lock().push((to, message));
            Ok(MessageRef {
                channel_id,
                message_id: self.next_id.fetch_add(1, Ordering::SeqCst) + 100,
            })
        }

        async fn edit(
            &self,
            target: MessageRef,
            text: Option<String>,
            controls: Controls,
        ) -> Result<(), TransportError> {
            self.edits.lock().push((target, text, controls));
            Ok(())
        }

        async fn fetch_file(&self, file: &FileRef) -> Result<Vec<u8>, TransportError> {
            Ok(format!("source:{}", file).into_bytes())
        }

        async fn upload_voice(
            &self,
            bytes: Vec<u8>,
            _caption: String,
        ) -> Result<FileRef, TransportError> {
            if self.fail_uploads.load(Ordering::SeqCst) {
                return Err(TransportError::Platform("upload rejected".into()));
            }
            let mut uploads = self.uploads.lock();
            uploads.push(bytes);
            Ok(FileRef(format!("uploaded://{}", uploads.len())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_tags_parse_back() {
        let actions = [
            Action::TextConfession,
            Action::SetGender(Gender::Female),
            Action::YearOfStudy(YearOfStudy::FifthPlus),
            Action::PrefGender(PrefGender::Both),
            Action::ReportReason {
                reason: ReportReason::FakeProfile,
                reported: 42,
            },
            Action::React {
                confession_id: 7,
                reaction: Reaction::Fog,
            },
            Action::Open(DeepLink::View(12)),
        ];
        for action in actions {
            assert_eq!(Action::parse(&action.tag()), Some(action));
        }
    }

    #[test]
    fn test_unknown_tags_are_rejected() {
        assert_eq!(Action::parse("year:0"), None);
        assert_eq!(Action::parse("year:6"), None);
        assert_eq!(Action::parse("approve:abc"), None);
        assert_eq!(Action::parse("react:1:sparkles"), None);
        assert_eq!(Action::parse("menu:extra"), None);
    }

    #[test]
    fn test_deep_link_parse() {
        assert_eq!(DeepLink::parse("comment42"), Some(DeepLink::Comment(42)));
        assert_eq!(DeepLink::parse("view7"), Some(DeepLink::View(7)));
        assert_eq!(DeepLink::parse("comment"), None);
        assert_eq!(DeepLink::parse("share5"), None);
    }

    #[test]
    fn test_text_normalization() {
        assert_eq!(Action::from_text("Cancel"), Some(Action::Cancel));
        assert_eq!(Action::from_text(" /cancel "), Some(Action::Cancel));
        assert_eq!(Action::from_text("/blind"), Some(Action::BlindConnect));
        assert_eq!(Action::from_text("cancel my plans"), None);
        assert_eq!(Action::from_text("hello"), None);
    }

    #[test]
    fn test_start_command() {
        assert_eq!(parse_start_command("/start"), Some(None));
        assert_eq!(
            parse_start_command("/start comment9"),
            Some(Some("comment9".to_string()))
        );
        assert_eq!(parse_start_command("/started"), None);
        assert_eq!(parse_start_command("hello"), None);
    }
}
