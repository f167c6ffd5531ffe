//! Length-prefixed IPC with ASR worker processes.

pub mod frame;
pub mod transport;
