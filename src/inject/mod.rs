//! Text injector collaborator.
//!
//! The downstream surface that dictated text lands on. `inject` appends
//! to wherever the user's cursor is; `replace_recent_text` is an
//! optional capability used by the final pass and the formatter to
//! correct text already on screen. Injectors without that capability
//! simply leave the live text as-is; corrections still reach the
//! `dictation_completed` event.

use crate::error::{DictflowError, Result};
use async_trait::async_trait;
use std::io::Write;
use std::sync::Mutex;

/// Where injected text goes.
#[async_trait]
pub trait TextInjector: Send + Sync {
    /// Appends text at the current cursor position.
    async fn inject(&self, text: &str) -> Result<()>;

    /// Whether `replace_recent_text` actually replaces anything.
    fn supports_replacement(&self) -> bool {
        false
    }

    /// Atomically replaces a known-recent suffix of the injected text.
    /// Default implementation does nothing (capability absent).
    async fn replace_recent_text(&self, _existing: &str, _replacement: &str) -> Result<()> {
        Ok(())
    }
}

/// Pipe-mode injector: dictated text goes to stdout.
pub struct StdoutInjector;

#[async_trait]
impl TextInjector for StdoutInjector {
    async fn inject(&self, text: &str) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(text.as_bytes())
            .and_then(|_| stdout.flush())
            .map_err(|e| DictflowError::InjectionFailed {
                message: e.to_string(),
            })
    }
}

/// In-memory injector for tests: appends into a string buffer and
/// supports suffix replacement like a capable desktop injector.
pub struct MockInjector {
    screen: Mutex<String>,
    replacements: Mutex<Vec<(String, String)>>,
    supports_replacement: bool,
    fail_injects: bool,
}

impl MockInjector {
    pub fn new() -> Self {
        Self {
            screen: Mutex::new(String::new()),
            replacements: Mutex::new(Vec::new()),
            supports_replacement: true,
            fail_injects: false,
        }
    }

    /// Simulates an injector without the replacement capability.
    pub fn without_replacement(mut self) -> Self {
        self.supports_replacement = false;
        self
    }

    /// Makes every `inject` fail.
    pub fn with_inject_failure(mut self) -> Self {
        self.fail_injects = true;
        self
    }

    /// Everything injected so far, as the target application sees it.
    pub fn screen(&self) -> String {
        self.screen.lock().unwrap().clone()
    }

    /// Every `(existing, replacement)` pair passed to replacement.
    pub fn replacements(&self) -> Vec<(String, String)> {
        self.replacements.lock().unwrap().clone()
    }
}

impl Default for MockInjector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextInjector for MockInjector {
    async fn inject(&self, text: &str) -> Result<()> {
        if self.fail_injects {
            return Err(DictflowError::InjectionFailed {
                message: "mock injection failure".to_string(),
            });
        }
        self.screen.lock().unwrap().push_str(text);
        Ok(())
    }

    fn supports_replacement(&self) -> bool {
        self.supports_replacement
    }

    async fn replace_recent_text(&self, existing: &str, replacement: &str) -> Result<()> {
        if !self.supports_replacement {
            return Ok(());
        }

        self.replacements
            .lock()
            .unwrap()
            .push((existing.to_string(), replacement.to_string()));

        let mut screen = self.screen.lock().unwrap();
        let trimmed = screen.trim_end();
        if let Some(start) = trimmed.rfind(existing)
            && start + existing.len() == trimmed.len()
        {
            let prefix = screen[..start].to_string();
            *screen = format!("{}{}", prefix, replacement);
            Ok(())
        } else {
            Err(DictflowError::InjectionFailed {
                message: "recent text does not match the screen".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_injector_appends() {
        let injector = MockInjector::new();
        injector.inject("hello ").await.unwrap();
        injector.inject("world ").await.unwrap();
        assert_eq!(injector.screen(), "hello world ");
    }

    #[tokio::test]
    async fn test_mock_injector_replaces_recent_suffix() {
        let injector = MockInjector::new();
        injector.inject("note: helo world ").await.unwrap();
        injector
            .replace_recent_text("helo world", "hello world")
            .await
            .unwrap();
        assert_eq!(injector.screen(), "note: hello world");
        assert_eq!(
            injector.replacements(),
            vec![("helo world".to_string(), "hello world".to_string())]
        );
    }

    #[tokio::test]
    async fn test_mock_injector_replace_rejects_mismatch() {
        let injector = MockInjector::new();
        injector.inject("something else ").await.unwrap();
        assert!(
            injector
                .replace_recent_text("not on screen", "x")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_injector_without_replacement_is_a_noop() {
        let injector = MockInjector::new().without_replacement();
        injector.inject("text ").await.unwrap();
        assert!(!injector.supports_replacement());
        injector.replace_recent_text("text", "other").await.unwrap();
        assert_eq!(injector.screen(), "text ");
        assert!(injector.replacements().is_empty());
    }

    #[tokio::test]
    async fn test_mock_injector_failure() {
        let injector = MockInjector::new().with_inject_failure();
        assert!(injector.inject("x").await.is_err());
    }
}
