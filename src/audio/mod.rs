//! Voice anonymization pipeline
//!
//! Normalizes, pitch-shifts and re-encodes voice clips through external
//! filter programs before they are shown to anyone.

pub mod anonymizer;
pub mod probe;
pub mod stages;

pub use anonymizer::{AnonymizedVoice, VoiceAnonymizer, VoiceError, VoiceJob};
pub use stages::{FilterRunner, ProcessRunner, Tools};
