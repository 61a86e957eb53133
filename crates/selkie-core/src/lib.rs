//! Selkie Core
//!
//! Core types, errors, and constants for the Selkie actor engine.
//!
//! # Overview
//!
//! Selkie runs one actor ("canister") as a single logical thread of control.
//! Handlers run in segments separated by outbound calls; every segment ends
//! at a commit boundary, and a failing segment rolls back alone.
//!
//! # TigerStyle
//!
//! This crate follows [TigerStyle](https://github.com/tigerbeetle/tigerbeetle/blob/main/docs/TIGER_STYLE.md)
//! engineering principles:
//! - Explicit limits with big-endian naming (e.g., `VOLATILE_MEMORY_BYTES_MAX`)
//! - Assertions on invariants
//! - No recursion (bounded iteration only)

pub mod actor;
pub mod config;
pub mod constants;
pub mod error;
pub mod io;
pub mod message;
pub mod metrics;
pub mod telemetry;

pub use actor::ActorId;
pub use config::{DispatcherConfig, EngineConfig, MemoryConfig, SchedulerConfig};
pub use constants::*;
pub use error::{Error, HandlerError, Result};
pub use io::{EntropySource, IoContext, OsEntropy, TimeProvider, WallClockTime};
pub use message::{
    CallId, CallRejection, CallReply, ContinuationId, Message, MessageId, MessageKind, RejectCode,
};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
