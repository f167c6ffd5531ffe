//! Error types for dictflow.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DictflowError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio capture errors
    #[error("Audio capture failed: {message}")]
    Capture { message: String },

    // ASR worker errors
    #[error("ASR worker spawn failed: {message}")]
    WorkerSpawn { message: String },

    #[error("ASR worker exited (code {code:?}, signal {signal:?})")]
    WorkerExited {
        code: Option<i32>,
        signal: Option<i32>,
    },

    #[error("ASR request failed: {message}")]
    Asr { message: String },

    #[error("Transcription error: {message}")]
    Transcription { message: String },

    // IPC transport errors
    #[error("IPC protocol error: {message}")]
    IpcProtocol { message: String },

    #[error("IPC transport closed: {message}")]
    IpcClosed { message: String },

    #[error("IPC request timed out after {timeout_ms}ms ({action})")]
    IpcTimeout { action: String, timeout_ms: u64 },

    // Text injection errors
    #[error("Text injection failed: {message}")]
    InjectionFailed { message: String },

    // Formatter errors
    #[error("Transcript formatting failed: {message}")]
    Formatting { message: String },

    // Session lifecycle errors
    #[error("Session error: {message}")]
    Session { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, DictflowError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_file_not_found_display() {
        let error = DictflowError::ConfigFileNotFound {
            path: "/path/to/config.toml".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Configuration file not found at /path/to/config.toml"
        );
    }

    #[test]
    fn test_worker_exited_display() {
        let error = DictflowError::WorkerExited {
            code: Some(1),
            signal: None,
        };
        assert_eq!(
            error.to_string(),
            "ASR worker exited (code Some(1), signal None)"
        );
    }

    #[test]
    fn test_ipc_timeout_display() {
        let error = DictflowError::IpcTimeout {
            action: "stream_push".to_string(),
            timeout_ms: 30_000,
        };
        assert_eq!(
            error.to_string(),
            "IPC request timed out after 30000ms (stream_push)"
        );
    }

    #[test]
    fn test_injection_failed_display() {
        let error = DictflowError::InjectionFailed {
            message: "window not found".to_string(),
        };
        assert_eq!(error.to_string(), "Text injection failed: window not found");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: DictflowError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_str = "invalid = toml = syntax";
        let toml_error = toml::from_str::<toml::Value>(toml_str).unwrap_err();
        let error: DictflowError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<DictflowError>();
        assert_sync::<DictflowError>();
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);
    }
}
