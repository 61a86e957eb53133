//! Selkie Storage
//!
//! Stable and volatile memory for a Selkie actor.
//!
//! # Overview
//!
//! - Stable store: durable, survives restarts, capacity only grows
//!   - In-memory (for testing and DST)
//!   - File-backed append-only log (for production)
//! - Volatile store: heap memory bounded by a ceiling, wiped on restart
//! - Segment buffer: one segment's pending writes, applied at a commit boundary
//! - Commit log and state snapshots for observing those boundaries

pub mod commit;
pub mod segment;
pub mod snapshot;
pub mod stable;
pub mod volatile;

pub use commit::{CommitEntry, CommitKind, CommitLog, SegmentEnd, SegmentRef};
pub use segment::{validate_handler_key, AppliedSegment, SegmentBuffer};
pub use snapshot::StateSnapshot;
pub use stable::{FileStableStore, MemoryStableStore, StableBatch, StableStore};
pub use volatile::{VolatileOps, VolatileStore};
