//! ASR engine access: backend capability matrix and the worker proxy
//! presenting one streaming interface over the IPC transport.

pub mod backend;
pub mod proxy;

pub use backend::{AsrBackend, StreamContext};
pub use proxy::{AsrEngine, MockAsrEngine, WorkerProxy};
