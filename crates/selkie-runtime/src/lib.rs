//! Selkie Runtime
//!
//! The execution engine for one Selkie actor.
//!
//! # Overview
//!
//! The runtime provides:
//! - A dispatcher that processes one message at a time in receipt order
//! - Handlers written as explicit state machines that suspend on outbound calls
//! - A continuation scheduler that parks suspended handlers and resumes them
//! - An outbound call gateway that resolves every call exactly once
//! - A seeded PRNG and advisory reentrancy locks
//!
//! # TigerStyle
//! - At most one continuation executes at any instant
//! - Every segment ends at a commit boundary; a failure rolls back only the last segment
//! - Bounded mailbox, parked set and in-flight calls (no silent drops)

pub mod context;
pub mod dispatcher;
pub mod gateway;
pub mod handle;
pub mod handler;
pub mod mailbox;
pub mod prng;
pub mod reentrancy;
pub mod scheduler;

pub use context::HandlerContext;
pub use dispatcher::{Dispatcher, DispatcherStats, HandlerOutcome};
pub use gateway::{
    CallGateway, CallStatus, ChannelTransport, NullTransport, OutboundCall, Transport,
};
pub use handle::{DispatcherCommand, DispatcherHandle};
pub use handler::{
    handler_fn, FnHandler, Handler, HandlerDescription, HandlerSignature, InterfaceDescription,
    Step, StepResult,
};
pub use mailbox::{Envelope, Mailbox, ReplyTo};
pub use prng::{PrngCheckpoint, PrngManager, PrngSeed};
pub use reentrancy::LockTable;
pub use scheduler::{Continuation, Delivery, Entry, RunOutcome, Scheduler};
