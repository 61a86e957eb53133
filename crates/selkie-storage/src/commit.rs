//! Commit log: one entry per segment boundary that changed state
//!
//! TigerStyle: Bounded retention, monotonic sequence numbers, totals that
//! survive eviction.
//!
//! A segment that ends by suspending or completing produces a `Commit`
//! entry. A segment that fails produces a `Rollback` entry. Opening a
//! segment (handler start, resumption) produces nothing.

use selkie_core::{ContinuationId, MessageId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Kind of a commit log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitKind {
    Commit,
    Rollback,
}

/// How the segment ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentEnd {
    /// Suspended on one or more outbound calls
    Suspended,
    /// Handler finished
    Completed,
    /// Handler or engine error
    Failed,
}

/// A single entry in the commit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEntry {
    /// Position in the log, starting at 1
    pub sequence: u64,
    pub kind: CommitKind,
    pub end: SegmentEnd,
    /// Message that started the handler
    pub message_id: MessageId,
    pub handler: String,
    /// Continuation the segment belonged to, if it was ever parked
    pub continuation: Option<ContinuationId>,
    /// Index of the segment within its handler execution
    pub segment: u32,
    pub stable_keys: Vec<String>,
    pub volatile_keys: Vec<String>,
    /// Human-readable failure for rollbacks
    pub reason: Option<String>,
    pub at_ms: u64,
}

/// Segment identity passed when recording an entry
#[derive(Debug, Clone)]
pub struct SegmentRef<'a> {
    pub message_id: MessageId,
    pub handler: &'a str,
    pub continuation: Option<ContinuationId>,
    pub segment: u32,
    pub at_ms: u64,
}

/// Bounded in-memory commit log
#[derive(Debug, Clone)]
pub struct CommitLog {
    entries: VecDeque<CommitEntry>,
    entries_max: usize,
    next_sequence: u64,
    commits_total: u64,
    rollbacks_total: u64,
}

impl CommitLog {
    pub fn new(entries_max: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            entries_max,
            next_sequence: 1,
            commits_total: 0,
            rollbacks_total: 0,
        }
    }

    /// Record a committed segment
    pub fn record_commit(
        &mut self,
        segment: SegmentRef<'_>,
        end: SegmentEnd,
        stable_keys: Vec<String>,
        volatile_keys: Vec<String>,
    ) -> u64 {
        assert!(
            end != SegmentEnd::Failed,
            "VIOLATION: a failed segment cannot commit"
        );
        self.commits_total += 1;
        self.push(segment, CommitKind::Commit, end, stable_keys, volatile_keys, None)
    }

    /// Record a rolled back segment
    pub fn record_rollback(&mut self, segment: SegmentRef<'_>, reason: impl Into<String>) -> u64 {
        self.rollbacks_total += 1;
        self.push(
            segment,
            CommitKind::Rollback,
            SegmentEnd::Failed,
            Vec::new(),
            Vec::new(),
            Some(reason.into()),
        )
    }

    fn push(
        &mut self,
        segment: SegmentRef<'_>,
        kind: CommitKind,
        end: SegmentEnd,
        stable_keys: Vec<String>,
        volatile_keys: Vec<String>,
        reason: Option<String>,
    ) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        if self.entries_max == 0 {
            return sequence;
        }
        while self.entries.len() >= self.entries_max {
            self.entries.pop_front();
        }
        self.entries.push_back(CommitEntry {
            sequence,
            kind,
            end,
            message_id: segment.message_id,
            handler: segment.handler.to_string(),
            continuation: segment.continuation,
            segment: segment.segment,
            stable_keys,
            volatile_keys,
            reason,
            at_ms: segment.at_ms,
        });
        sequence
    }

    /// Retained entries, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &CommitEntry> {
        self.entries.iter()
    }

    /// Retained entries for one message
    pub fn entries_for(&self, message_id: MessageId) -> Vec<&CommitEntry> {
        self.entries
            .iter()
            .filter(|e| e.message_id == message_id)
            .collect()
    }

    /// Sequence number of the latest entry (0 if none)
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    pub fn commits_total(&self) -> u64 {
        self.commits_total
    }

    pub fn rollbacks_total(&self) -> u64 {
        self.rollbacks_total
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
