//! Actor mailbox
//!
//! TigerStyle: Bounded queue with an explicit limit, FIFO, no silent drops.
//!
//! Inbound messages and call replies share one queue, so the actor sees them
//! strictly in receipt order.

use bytes::Bytes;
use selkie_core::constants::MAILBOX_DEPTH_MAX;
use selkie_core::{Error, Message, Result, TimeProvider};
use std::collections::VecDeque;
use tokio::sync::oneshot;

/// Who is waiting on a queued message
#[derive(Debug)]
pub enum ReplyTo {
    /// Nobody; the outcome is only recorded
    None,
    /// An `invoke` caller, answered when the handler completes or fails
    Invoke(oneshot::Sender<Result<Bytes>>),
    /// A `deliver` caller, answered once the reply has been dispatched
    Deliver(oneshot::Sender<Result<()>>),
}

/// A queued message
#[derive(Debug)]
pub struct Envelope {
    pub message: Message,
    pub reply: ReplyTo,
    /// Monotonic time of enqueue in ms
    pub enqueued_at_ms: u64,
}

impl Envelope {
    pub fn new(message: Message, reply: ReplyTo, time: &dyn TimeProvider) -> Self {
        Self {
            message,
            reply,
            enqueued_at_ms: time.monotonic_ms(),
        }
    }

    /// Time this message has been waiting
    pub fn wait_time_ms(&self, time: &dyn TimeProvider) -> u64 {
        time.monotonic_ms().saturating_sub(self.enqueued_at_ms)
    }
}

/// Bounded FIFO of envelopes
#[derive(Debug)]
pub struct Mailbox {
    queue: VecDeque<Envelope>,
    capacity: usize,
    enqueued_count: u64,
    processed_count: u64,
}

impl Mailbox {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "VIOLATION: mailbox capacity must be positive");
        assert!(
            capacity <= MAILBOX_DEPTH_MAX,
            "VIOLATION: mailbox capacity {} exceeds {}",
            capacity,
            MAILBOX_DEPTH_MAX
        );

        Self {
            queue: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            enqueued_count: 0,
            processed_count: 0,
        }
    }

    /// Enqueue an envelope
    ///
    /// On `MailboxFull` the envelope is handed back so its waiter can be told.
    pub fn push(&mut self, envelope: Envelope) -> std::result::Result<(), (Error, Envelope)> {
        if self.queue.len() >= self.capacity {
            let err = Error::MailboxFull {
                depth: self.queue.len(),
                max: self.capacity,
            };
            return Err((err, envelope));
        }

        self.queue.push_back(envelope);
        self.enqueued_count = self.enqueued_count.wrapping_add(1);
        debug_assert!(self.queue.len() <= self.capacity);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Envelope> {
        let envelope = self.queue.pop_front();
        if envelope.is_some() {
            self.processed_count = self.processed_count.wrapping_add(1);
        }
        envelope
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn enqueued_count(&self) -> u64 {
        self.enqueued_count
    }

    pub fn processed_count(&self) -> u64 {
        self.processed_count
    }

    /// Remove every queued envelope
    pub fn drain(&mut self) -> Vec<Envelope> {
        self.queue.drain(..).collect()
    }
}
