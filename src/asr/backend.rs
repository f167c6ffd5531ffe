//! ASR backend capability matrix.

use crate::defaults;
use crate::ipc::transport::WireMode;
use serde::{Deserialize, Serialize};

/// Which worker implementation the session talks to.
///
/// Capabilities differ on two axes: whether the worker keeps decoder
/// state across pushes (stateful streaming), and which wire layouts its
/// launcher supports. Native workers only speak the framed protocol;
/// script workers can also run line-JSON with base64 audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AsrBackend {
    /// Native parakeet worker: stateful streaming, framed.
    NativeParakeet,
    /// Native whisper worker: one-shot only, framed.
    NativeWhisper,
    /// Python parakeet runner: stateful streaming, framed or line-JSON.
    ScriptParakeet,
    /// Python whisper runner: one-shot only, framed or line-JSON.
    ScriptWhisper,
}

impl AsrBackend {
    /// Whether the worker keeps context across `stream_push` calls.
    pub fn supports_streaming(self) -> bool {
        matches!(self, Self::NativeParakeet | Self::ScriptParakeet)
    }

    /// Whether the worker can be driven over newline-delimited JSON.
    pub fn supports_json_lines(self) -> bool {
        matches!(self, Self::ScriptParakeet | Self::ScriptWhisper)
    }

    /// The preferred wire mode: framed whenever available.
    pub fn default_wire_mode(self) -> WireMode {
        WireMode::Framed
    }
}

impl Default for AsrBackend {
    fn default() -> Self {
        Self::NativeParakeet
    }
}

/// Context window for stateful streaming decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamContext {
    /// Encoder frames of lookback.
    pub context_left: u32,
    /// Encoder frames of lookahead.
    pub context_right: u32,
    /// Decoder depth.
    pub depth: u32,
}

impl Default for StreamContext {
    fn default() -> Self {
        Self {
            context_left: defaults::STREAM_CONTEXT_LEFT,
            context_right: defaults::STREAM_CONTEXT_RIGHT,
            depth: defaults::STREAM_DEPTH,
        }
    }
}
