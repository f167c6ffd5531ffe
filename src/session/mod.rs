//! Session layer: state machine, adaptive scheduling, and latency
//! accounting for one push-to-talk dictation session.

pub mod latency;
pub mod orchestrator;
pub mod scheduler;
pub mod state;

pub use latency::{LatencyAccumulator, LatencyReport, LatencySample, StatSummary};
pub use orchestrator::{Session, SessionConfig};
pub use scheduler::{SchedulerConfig, WindowScheduler};
pub use state::{FormatMode, SessionEvent, SessionStage, SessionState};
