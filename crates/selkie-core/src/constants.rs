//! TigerStyle constants for Selkie
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Actor Limits
// =============================================================================

/// Maximum length of an actor ID in bytes
pub const ACTOR_ID_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of an actor namespace in bytes
pub const ACTOR_NAMESPACE_LENGTH_BYTES_MAX: usize = 128;

/// Maximum length of a registered handler name in bytes
pub const HANDLER_NAME_LENGTH_BYTES_MAX: usize = 128;

// =============================================================================
// Volatile Memory Limits
// =============================================================================

/// Default volatile memory ceiling in bytes (64 MB)
pub const VOLATILE_MEMORY_BYTES_DEFAULT: usize = 64 * 1024 * 1024;

/// Hard upper bound for the configurable volatile ceiling (1 GB)
pub const VOLATILE_MEMORY_BYTES_MAX: usize = 1024 * 1024 * 1024;

// =============================================================================
// Stable Memory Limits
// =============================================================================

/// Default initial stable capacity in bytes (1 MB)
pub const STABLE_CAPACITY_BYTES_INITIAL_DEFAULT: u64 = 1024 * 1024;

/// Default stable capacity ceiling in bytes (256 MB)
pub const STABLE_CAPACITY_BYTES_MAX_DEFAULT: u64 = 256 * 1024 * 1024;

/// Hard upper bound for the configurable stable ceiling (64 GB)
pub const STABLE_CAPACITY_BYTES_LIMIT: u64 = 64 * 1024 * 1024 * 1024;

/// Maximum stable key size in bytes
pub const STABLE_KEY_SIZE_BYTES_MAX: usize = 1024;

/// Maximum stable value size in bytes (2 MB)
pub const STABLE_VALUE_SIZE_BYTES_MAX: usize = 2 * 1024 * 1024;

/// Key prefix reserved for engine metadata in the stable store
pub const STABLE_KEY_RESERVED_PREFIX: &str = "__selkie/";

/// Stable key holding the restart epoch counter
pub const STABLE_KEY_EPOCH: &str = "__selkie/epoch";

// =============================================================================
// Message Limits
// =============================================================================

/// Maximum size of a message payload in bytes (2 MB)
pub const MESSAGE_PAYLOAD_SIZE_BYTES_MAX: usize = 2 * 1024 * 1024;

/// Maximum depth of the dispatcher mailbox
pub const MAILBOX_DEPTH_MAX: usize = 10_000;

/// Default channel buffer for dispatcher commands
pub const DISPATCHER_COMMAND_BUFFER_SIZE_DEFAULT: usize = 1024;

// =============================================================================
// Scheduler Limits
// =============================================================================

/// Default number of continuations that may be parked at once
pub const CONTINUATIONS_SUSPENDED_COUNT_DEFAULT: usize = 1_000;

/// Hard upper bound for parked continuations
pub const CONTINUATIONS_SUSPENDED_COUNT_MAX: usize = 100_000;

/// Default number of outbound calls that may be in flight at once
pub const CALLS_PENDING_COUNT_DEFAULT: usize = 1_000;

/// Hard upper bound for in-flight outbound calls
pub const CALLS_PENDING_COUNT_MAX: usize = 100_000;

/// Maximum number of calls a single segment may issue before awaiting
pub const CALLS_PER_SEGMENT_COUNT_MAX: usize = 64;

/// Maximum length of a reentrancy resource tag in bytes
pub const RESOURCE_TAG_LENGTH_BYTES_MAX: usize = 256;

// =============================================================================
// Commit Log Limits
// =============================================================================

/// Default number of retained commit log entries
pub const COMMIT_LOG_ENTRIES_COUNT_DEFAULT: usize = 4_096;

/// Hard upper bound for retained commit log entries
pub const COMMIT_LOG_ENTRIES_COUNT_MAX: usize = 1_000_000;

// =============================================================================
// PRNG Limits
// =============================================================================

/// Seed length for the ChaCha20 generator in bytes
pub const PRNG_SEED_BYTES: usize = 32;

/// Maximum number of bytes a single `next` request may draw (64 KB)
pub const PRNG_REQUEST_BYTES_MAX: usize = 64 * 1024;

// =============================================================================
// DST Limits
// =============================================================================

/// Maximum simulation steps before forced termination
pub const DST_STEPS_COUNT_MAX: u64 = 10_000_000;

/// Default fault injection probability
pub const DST_FAULT_PROBABILITY_DEFAULT: f64 = 0.01;

// =============================================================================
// Observability - Metric Names (TigerStyle: explicit, with units)
// =============================================================================

/// Metric: Total dispatched messages (counter, labels: kind, status)
pub const METRIC_NAME_MESSAGES_DISPATCHED_TOTAL: &str = "selkie_messages_dispatched_total";

/// Metric: Total committed segments (counter)
pub const METRIC_NAME_SEGMENTS_COMMITTED_TOTAL: &str = "selkie_segments_committed_total";

/// Metric: Total rolled back segments (counter)
pub const METRIC_NAME_SEGMENTS_ROLLED_BACK_TOTAL: &str = "selkie_segments_rolled_back_total";

/// Metric: Segment duration in seconds (histogram, labels: handler)
pub const METRIC_NAME_SEGMENT_DURATION_SECONDS: &str = "selkie_segment_duration_seconds";

// Compile-time assertions for constant validity
const _: () = {
    assert!(VOLATILE_MEMORY_BYTES_DEFAULT <= VOLATILE_MEMORY_BYTES_MAX);
    assert!(STABLE_CAPACITY_BYTES_INITIAL_DEFAULT <= STABLE_CAPACITY_BYTES_MAX_DEFAULT);
    assert!(STABLE_CAPACITY_BYTES_MAX_DEFAULT <= STABLE_CAPACITY_BYTES_LIMIT);
    assert!(CONTINUATIONS_SUSPENDED_COUNT_DEFAULT <= CONTINUATIONS_SUSPENDED_COUNT_MAX);
    assert!(CALLS_PENDING_COUNT_DEFAULT <= CALLS_PENDING_COUNT_MAX);
    assert!(COMMIT_LOG_ENTRIES_COUNT_DEFAULT <= COMMIT_LOG_ENTRIES_COUNT_MAX);
    assert!(PRNG_SEED_BYTES == 32); // ChaCha20 seed size
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_keys_share_prefix() {
        assert!(STABLE_KEY_EPOCH.starts_with(STABLE_KEY_RESERVED_PREFIX));
    }

    #[test]
    fn test_limits_have_units_in_names() {
        // All byte limits end in _BYTES_*, all count limits in _COUNT_*
        let _: usize = VOLATILE_MEMORY_BYTES_MAX;
        let _: u64 = STABLE_CAPACITY_BYTES_LIMIT;
        let _: usize = CONTINUATIONS_SUSPENDED_COUNT_MAX;
    }
}
