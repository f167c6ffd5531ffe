//! Transcript formatter collaborator.
//!
//! An optional cleanup stage run once over the finished transcript. The
//! session falls back to the raw transcript when formatting fails, so
//! implementations are free to be best-effort.

use crate::error::{DictflowError, Result};
use crate::session::state::FormatMode;
use async_trait::async_trait;
use std::sync::Mutex;

/// End-of-session transcript formatter.
#[async_trait]
pub trait TranscriptFormatter: Send + Sync {
    /// One-time model warm-up. Default: nothing to warm.
    async fn warmup(&self) -> Result<()> {
        Ok(())
    }

    /// Formats the finished transcript. Returning the input unchanged
    /// is a valid implementation.
    async fn format(&self, mode: FormatMode, text: &str) -> Result<String>;

    /// Releases formatter resources. Default: nothing to release.
    async fn shutdown(&self) {}
}

/// Formatter that returns its input untouched.
pub struct PassthroughFormatter;

#[async_trait]
impl TranscriptFormatter for PassthroughFormatter {
    async fn format(&self, _mode: FormatMode, text: &str) -> Result<String> {
        Ok(text.to_string())
    }
}

/// Scripted formatter for tests.
pub struct MockFormatter {
    response: Mutex<Option<String>>,
    fail: bool,
    calls: Mutex<Vec<(FormatMode, String)>>,
}

impl MockFormatter {
    pub fn new() -> Self {
        Self {
            response: Mutex::new(None),
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Returns this text instead of the input.
    pub fn with_response(self, response: &str) -> Self {
        *self.response.lock().unwrap() = Some(response.to_string());
        self
    }

    /// Makes `format` fail.
    pub fn with_failure(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Every (mode, input) pair seen so far.
    pub fn calls(&self) -> Vec<(FormatMode, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockFormatter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TranscriptFormatter for MockFormatter {
    async fn format(&self, mode: FormatMode, text: &str) -> Result<String> {
        self.calls.lock().unwrap().push((mode, text.to_string()));

        if self.fail {
            return Err(DictflowError::Formatting {
                message: "mock formatter failure".to_string(),
            });
        }

        Ok(self
            .response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| text.to_string()))
    }
}
