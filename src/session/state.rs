//! Session state machine types and observable events.

use serde::{Deserialize, Serialize};

/// Lifecycle stage of a dictation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    Idle,
    Recording,
    Transcribing,
    Formatting,
    Injecting,
    Error,
}

/// Stage plus an optional human-readable detail (set for `Error`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub stage: SessionStage,
    pub detail: Option<String>,
}

impl SessionState {
    pub fn idle() -> Self {
        Self {
            stage: SessionStage::Idle,
            detail: None,
        }
    }

    pub fn stage(stage: SessionStage) -> Self {
        Self {
            stage,
            detail: None,
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            stage: SessionStage::Error,
            detail: Some(detail.into()),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::idle()
    }
}

/// How the end-of-session formatter treats the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FormatMode {
    /// Emit exactly what was dictated.
    #[default]
    Literal,
    /// Light cleanup: casing, stray fillers.
    Clean,
    /// Free rewriting for clarity.
    Rewrite,
}

/// Events observable by the embedding process.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    ModeChanged(FormatMode),
    DictationCompleted { raw: String, formatted: String },
}
