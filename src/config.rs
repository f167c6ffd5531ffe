//! Configuration for dictflow.
//!
//! TOML file with serde defaults, environment overrides, and validation
//! of the scheduler window bounds and capture chunk length.

use crate::asr::backend::{AsrBackend, StreamContext};
use crate::defaults;
use crate::error::{DictflowError, Result};
use crate::ipc::transport::{WireMode, WorkerCommand};
use crate::session::orchestrator::SessionConfig;
use crate::session::scheduler::SchedulerConfig;
use crate::session::state::FormatMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub asr: AsrConfig,
    pub audio: AudioConfig,
    pub scheduler: WindowConfig,
    pub text: TextConfig,
}

/// ASR worker selection and spawn settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AsrConfig {
    /// Backend selector (capability matrix lives with the proxy).
    pub backend: AsrBackend,
    /// Worker executable and arguments.
    pub worker_program: String,
    pub worker_args: Vec<String>,
    /// Wire layout; script backends may switch to "json-lines".
    pub wire: WireConfig,
    /// Streaming decoder context lookback/lookahead/depth.
    pub stream_context_left: u32,
    pub stream_context_right: u32,
    pub stream_depth: u32,
    /// Re-transcribe the full session at drain and correct the screen.
    pub final_pass: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WireConfig {
    #[default]
    Framed,
    JsonLines,
}

impl From<WireConfig> for WireMode {
    fn from(wire: WireConfig) -> Self {
        match wire {
            WireConfig::Framed => WireMode::Framed,
            WireConfig::JsonLines => WireMode::JsonLines,
        }
    }
}

/// Capture and speech-gate settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture chunk length in milliseconds.
    pub live_stream_chunk_ms: u32,
    /// RMS threshold below which a slice counts as silence (dBFS).
    pub silence_gate_dbfs: f64,
    /// Grace period after speech during which silence still reaches ASR.
    pub speech_hangover_ms: u64,
}

/// Adaptive scheduler window bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub min_asr_window_ms: u32,
    pub normal_asr_window_ms: u32,
    pub backlog_asr_window_ms: u32,
    pub max_asr_window_ms: u32,
    /// Enable the EWMA feedback loop on the window size.
    pub adaptive_asr_window: bool,
}

/// Text pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TextConfig {
    /// Rewrite verbalised punctuation ("comma", "new line") live.
    pub spoken_formatting_commands: bool,
    /// Formatter mode for the finished transcript.
    pub format_mode: FormatMode,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            backend: AsrBackend::default(),
            worker_program: "dictflow-asr-worker".to_string(),
            worker_args: Vec::new(),
            wire: WireConfig::default(),
            stream_context_left: defaults::STREAM_CONTEXT_LEFT,
            stream_context_right: defaults::STREAM_CONTEXT_RIGHT,
            stream_depth: defaults::STREAM_DEPTH,
            final_pass: false,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            live_stream_chunk_ms: defaults::LIVE_STREAM_CHUNK_MS,
            silence_gate_dbfs: defaults::SILENCE_GATE_DBFS,
            speech_hangover_ms: defaults::SPEECH_HANGOVER_MS,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            min_asr_window_ms: defaults::MIN_ASR_WINDOW_MS,
            normal_asr_window_ms: defaults::NORMAL_ASR_WINDOW_MS,
            backlog_asr_window_ms: defaults::BACKLOG_ASR_WINDOW_MS,
            max_asr_window_ms: defaults::MAX_ASR_WINDOW_MS,
            adaptive_asr_window: true,
        }
    }
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            spoken_formatting_commands: true,
            format_mode: FormatMode::Literal,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Missing fields use defaults; invalid TOML is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DictflowError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                DictflowError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or fall back to defaults when the file is
    /// missing. Invalid TOML still fails.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(DictflowError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Supported variables:
    /// - DICTFLOW_ASR_BACKEND → asr.backend
    /// - DICTFLOW_WORKER → asr.worker_program
    /// - DICTFLOW_FORMAT_MODE → text.format_mode
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(backend) = std::env::var("DICTFLOW_ASR_BACKEND")
            && !backend.is_empty()
        {
            match serde_json::from_value(serde_json::Value::String(backend.clone())) {
                Ok(parsed) => self.asr.backend = parsed,
                Err(_) => tracing::warn!("ignoring unknown DICTFLOW_ASR_BACKEND {:?}", backend),
            }
        }

        if let Ok(program) = std::env::var("DICTFLOW_WORKER")
            && !program.is_empty()
        {
            self.asr.worker_program = program;
        }

        if let Ok(mode) = std::env::var("DICTFLOW_FORMAT_MODE")
            && !mode.is_empty()
        {
            match serde_json::from_value(serde_json::Value::String(mode.clone())) {
                Ok(parsed) => self.text.format_mode = parsed,
                Err(_) => tracing::warn!("ignoring unknown DICTFLOW_FORMAT_MODE {:?}", mode),
            }
        }

        self
    }

    /// Cross-field validation.
    pub fn validate(&self) -> Result<()> {
        self.scheduler_config().validate()?;

        if !(defaults::MIN_CHUNK_MS..=defaults::MAX_CHUNK_MS)
            .contains(&self.audio.live_stream_chunk_ms)
        {
            return Err(DictflowError::ConfigInvalidValue {
                key: "audio.live_stream_chunk_ms".to_string(),
                message: format!(
                    "must be within [{}, {}]",
                    defaults::MIN_CHUNK_MS,
                    defaults::MAX_CHUNK_MS
                ),
            });
        }

        if self.asr.wire == WireConfig::JsonLines && !self.asr.backend.supports_json_lines() {
            return Err(DictflowError::ConfigInvalidValue {
                key: "asr.wire".to_string(),
                message: "native workers only speak the framed protocol".to_string(),
            });
        }

        Ok(())
    }

    /// Scheduler view of the configuration.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            min_window_ms: self.scheduler.min_asr_window_ms,
            normal_window_ms: self.scheduler.normal_asr_window_ms,
            backlog_window_ms: self.scheduler.backlog_asr_window_ms,
            max_window_ms: self.scheduler.max_asr_window_ms,
            adaptive: self.scheduler.adaptive_asr_window,
            silence_gate_dbfs: self.audio.silence_gate_dbfs,
            speech_hangover_ms: self.audio.speech_hangover_ms,
        }
    }

    /// Session view of the configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            chunk_ms: self.audio.live_stream_chunk_ms,
            spoken_formatting_commands: self.text.spoken_formatting_commands,
            final_pass: self.asr.final_pass,
            scheduler: self.scheduler_config(),
            stream_context: StreamContext {
                context_left: self.asr.stream_context_left,
                context_right: self.asr.stream_context_right,
                depth: self.asr.stream_depth,
            },
        }
    }

    /// Spawn settings for the ASR worker.
    pub fn worker_command(&self) -> WorkerCommand {
        WorkerCommand {
            program: self.asr.worker_program.clone(),
            args: self.asr.worker_args.clone(),
            wire_mode: self.asr.wire.into(),
        }
    }

    /// Default configuration file path (~/.config/dictflow/config.toml).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dictflow")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: Only used in tests with ENV_LOCK held, so there is no
    // concurrent access to the environment.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_dictflow_env() {
        remove_env("DICTFLOW_ASR_BACKEND");
        remove_env("DICTFLOW_WORKER");
        remove_env("DICTFLOW_FORMAT_MODE");
    }

    #[test]
    fn test_default_config_values() {
        let config = Config::default();
        assert_eq!(config.asr.backend, AsrBackend::NativeParakeet);
        assert_eq!(config.audio.live_stream_chunk_ms, 120);
        assert_eq!(config.audio.silence_gate_dbfs, -52.0);
        assert_eq!(config.audio.speech_hangover_ms, 420);
        assert_eq!(config.scheduler.min_asr_window_ms, 480);
        assert_eq!(config.scheduler.max_asr_window_ms, 3_840);
        assert!(config.scheduler.adaptive_asr_window);
        assert!(config.text.spoken_formatting_commands);
        assert!(!config.asr.final_pass);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_partial_toml_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[audio]\nlive_stream_chunk_ms = 200\n\n[asr]\nbackend = \"script-whisper\"\nwire = \"json-lines\""
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.audio.live_stream_chunk_ms, 200);
        assert_eq!(config.asr.backend, AsrBackend::ScriptWhisper);
        assert_eq!(config.asr.wire, WireConfig::JsonLines);
        // Untouched sections keep their defaults.
        assert_eq!(config.scheduler.normal_asr_window_ms, 960);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/dictflow.toml")).unwrap_err();
        assert!(matches!(err, DictflowError::ConfigFileNotFound { .. }));

        let config = Config::load_or_default(Path::new("/nonexistent/dictflow.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_invalid_toml_fails() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "audio = not valid").unwrap();
        assert!(Config::load(file.path()).is_err());
        assert!(Config::load_or_default(file.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_unordered_windows() {
        let config = Config {
            scheduler: WindowConfig {
                min_asr_window_ms: 1_000,
                normal_asr_window_ms: 500,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_chunk_out_of_bounds() {
        let config = Config {
            audio: AudioConfig {
                live_stream_chunk_ms: 10,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_json_lines_on_native_backend() {
        let config = Config {
            asr: AsrConfig {
                backend: AsrBackend::NativeWhisper,
                wire: WireConfig::JsonLines,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_dictflow_env();

        set_env("DICTFLOW_ASR_BACKEND", "script-parakeet");
        set_env("DICTFLOW_WORKER", "/opt/asr/runner.py");
        set_env("DICTFLOW_FORMAT_MODE", "clean");

        let config = Config::default().with_env_overrides();
        assert_eq!(config.asr.backend, AsrBackend::ScriptParakeet);
        assert_eq!(config.asr.worker_program, "/opt/asr/runner.py");
        assert_eq!(config.text.format_mode, FormatMode::Clean);

        clear_dictflow_env();
    }

    #[test]
    fn test_env_override_ignores_garbage() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_dictflow_env();

        set_env("DICTFLOW_ASR_BACKEND", "no-such-backend");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.asr.backend, AsrBackend::NativeParakeet);

        clear_dictflow_env();
    }

    #[test]
    fn test_session_config_projection() {
        let config = Config::default();
        let session = config.session_config();
        assert_eq!(session.chunk_ms, 120);
        assert!(!session.final_pass);
        assert_eq!(session.stream_context.context_left, 64);
        assert_eq!(session.scheduler.backlog_window_ms, 1_920);
    }

    #[test]
    fn test_worker_command_projection() {
        let config = Config {
            asr: AsrConfig {
                worker_program: "worker".to_string(),
                worker_args: vec!["--serve".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let cmd = config.worker_command();
        assert_eq!(cmd.program, "worker");
        assert_eq!(cmd.args, vec!["--serve"]);
        assert_eq!(cmd.wire_mode, WireMode::Framed);
    }

    #[test]
    fn test_config_roundtrips_through_toml() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed, config);
    }
}
