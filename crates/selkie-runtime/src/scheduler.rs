//! Continuation scheduler
//!
//! TigerStyle: One active continuation, bounded parked set, explicit state.
//!
//! The scheduler runs one segment at a time. A segment that awaits calls is
//! parked as a `Continuation` keyed by the ids of the calls it waits for.
//! When a call outcome arrives the continuation buffers it; once every
//! awaited call has an outcome the continuation is handed back for resumption
//! with the outcomes in issue order.

use crate::context::HandlerContext;
use crate::handler::{ErasedHandler, ErasedStep};
use bytes::Bytes;
use selkie_core::{
    CallId, CallReply, ContinuationId, Error, HandlerError, MessageId, Result,
};
use std::collections::HashMap;
use tracing::debug;

/// A suspended handler execution
#[derive(Debug, Clone)]
pub struct Continuation {
    pub id: ContinuationId,
    /// Message that started the handler
    pub message_id: MessageId,
    pub handler: String,
    /// Serialized resumption point and saved locals
    saved_state: Vec<u8>,
    /// Index of the segment that runs on resumption
    pub resume_point: u32,
    /// Calls awaited, in issue order
    awaiting: Vec<CallId>,
    /// Outcomes received so far, parallel to `awaiting`
    received: Vec<Option<CallReply>>,
}

impl Continuation {
    pub fn new(
        id: ContinuationId,
        message_id: MessageId,
        handler: impl Into<String>,
        saved_state: Vec<u8>,
        resume_point: u32,
        awaiting: Vec<CallId>,
    ) -> Self {
        assert!(
            !awaiting.is_empty(),
            "VIOLATION: continuation {} awaits no calls",
            id
        );
        let received = vec![None; awaiting.len()];
        Self {
            id,
            message_id,
            handler: handler.into(),
            saved_state,
            resume_point,
            awaiting,
            received,
        }
    }

    pub fn awaiting(&self) -> &[CallId] {
        &self.awaiting
    }

    /// Number of awaited calls without an outcome yet
    pub fn remaining(&self) -> usize {
        self.received.iter().filter(|r| r.is_none()).count()
    }

    pub fn is_ready(&self) -> bool {
        self.remaining() == 0
    }

    fn record(&mut self, call_id: CallId, reply: CallReply) -> Result<()> {
        let index = self
            .awaiting
            .iter()
            .position(|id| *id == call_id)
            .ok_or_else(|| Error::unknown_continuation(call_id))?;
        if self.received[index].is_some() {
            return Err(Error::double_resolution(call_id));
        }
        self.received[index] = Some(reply);
        Ok(())
    }

    /// Split into the saved state and the outcomes in issue order
    fn into_resume(self) -> (Vec<u8>, Vec<CallReply>) {
        assert!(
            self.is_ready(),
            "VIOLATION: continuation {} resumed with {} outcomes missing",
            self.id,
            self.remaining()
        );
        let outcomes = self.received.into_iter().flatten().collect();
        (self.saved_state, outcomes)
    }
}

/// Where a segment starts
#[derive(Debug)]
pub enum Entry {
    /// First segment of an Inbound message
    Start(Bytes),
    /// Resumption of a parked continuation
    Resume {
        saved: Vec<u8>,
        outcomes: Vec<CallReply>,
    },
}

impl Entry {
    /// Entry for a continuation whose outcomes are all in
    pub fn resume(continuation: Continuation) -> Self {
        let (saved, outcomes) = continuation.into_resume();
        Self::Resume { saved, outcomes }
    }
}

/// How a segment ended
#[derive(Debug)]
pub enum RunOutcome {
    /// Awaiting the calls issued in this segment
    Suspended { state: Vec<u8>, calls: Vec<CallId> },
    Completed(Bytes),
    Failed(HandlerError),
}

/// Result of recording a call outcome
#[derive(Debug)]
pub enum Delivery {
    /// The continuation still awaits other calls
    Buffered {
        continuation: ContinuationId,
        message_id: MessageId,
        remaining: usize,
    },
    /// Every awaited call has an outcome; the continuation is unparked
    Ready(Continuation),
}

/// Owner of the active/parked continuation sets
#[derive(Debug)]
pub struct Scheduler {
    active: Option<MessageId>,
    parked: HashMap<ContinuationId, Continuation>,
    by_call: HashMap<CallId, ContinuationId>,
    next_id: u64,
    max_suspended: usize,
}

impl Scheduler {
    pub fn new(max_suspended: usize) -> Self {
        Self {
            active: None,
            parked: HashMap::new(),
            by_call: HashMap::new(),
            next_id: 1,
            max_suspended,
        }
    }

    /// Mark a segment of `message_id` as running
    pub fn begin(&mut self, message_id: MessageId) {
        assert!(
            self.active.is_none(),
            "VIOLATION: segment for {} started while {:?} is active",
            message_id,
            self.active
        );
        self.active = Some(message_id);
    }

    /// Mark the running segment as finished
    pub fn end(&mut self, message_id: MessageId) {
        assert!(
            self.active == Some(message_id),
            "VIOLATION: segment end for {} but active is {:?}",
            message_id,
            self.active
        );
        self.active = None;
    }

    pub fn active(&self) -> Option<MessageId> {
        self.active
    }

    pub fn allocate_id(&mut self) -> ContinuationId {
        let id = ContinuationId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Check that one more continuation can be parked
    pub fn check_capacity(&self) -> Result<()> {
        if self.parked.len() >= self.max_suspended {
            return Err(Error::TooManySuspended {
                count: self.parked.len() + 1,
                limit: self.max_suspended,
            });
        }
        Ok(())
    }

    /// Park a continuation; capacity must have been checked
    pub fn park(&mut self, continuation: Continuation) {
        assert!(
            self.parked.len() < self.max_suspended,
            "VIOLATION: parking beyond limit {}",
            self.max_suspended
        );
        assert!(
            !self.parked.contains_key(&continuation.id),
            "VIOLATION: continuation {} parked twice",
            continuation.id
        );
        for call_id in continuation.awaiting() {
            self.by_call.insert(*call_id, continuation.id);
        }
        debug!(
            continuation_id = %continuation.id,
            message_id = %continuation.message_id,
            awaiting = continuation.awaiting().len(),
            "Continuation parked"
        );
        self.parked.insert(continuation.id, continuation);
    }

    /// Hand a call outcome to the continuation awaiting it
    ///
    /// # Errors
    /// `UnknownContinuation` if no parked continuation awaits `call_id`.
    pub fn record_outcome(&mut self, call_id: CallId, reply: CallReply) -> Result<Delivery> {
        let continuation_id = self
            .by_call
            .remove(&call_id)
            .ok_or_else(|| Error::unknown_continuation(call_id))?;
        let continuation = self
            .parked
            .get_mut(&continuation_id)
            .ok_or_else(|| {
                Error::internal(format!("call {} maps to a missing continuation", call_id))
            })?;
        continuation.record(call_id, reply)?;

        if continuation.is_ready() {
            let ready = self.parked.remove(&continuation_id).ok_or_else(|| {
                Error::internal(format!("continuation {} vanished", continuation_id))
            })?;
            return Ok(Delivery::Ready(ready));
        }
        Ok(Delivery::Buffered {
            continuation: continuation_id,
            message_id: continuation.message_id,
            remaining: continuation.remaining(),
        })
    }

    /// Run one segment of `handler` until it suspends, completes, or fails
    ///
    /// Must be called between `begin` and `end`.
    pub(crate) fn run_until_suspend_or_done(
        &self,
        handler: &dyn ErasedHandler,
        ctx: &mut HandlerContext<'_>,
        entry: Entry,
    ) -> RunOutcome {
        assert!(
            self.active == Some(ctx.message_id),
            "VIOLATION: running a segment of {} that is not active",
            ctx.message_id
        );

        let step = match entry {
            Entry::Start(payload) => handler.start(ctx, payload),
            Entry::Resume { saved, outcomes } => handler.resume(ctx, &saved, outcomes),
        };

        let staged = ctx.gateway.staged_count();
        match step {
            ErasedStep::Await(_) if staged == 0 => RunOutcome::Failed(HandlerError::new(
                "await_without_call",
                "segment awaited without issuing a call",
            )),
            ErasedStep::Await(state) => RunOutcome::Suspended {
                state,
                calls: ctx.gateway.staged_ids(),
            },
            ErasedStep::Complete(_) if staged > 0 => RunOutcome::Failed(HandlerError::new(
                "unawaited_calls",
                format!("segment completed with {} unawaited calls", staged),
            )),
            ErasedStep::Complete(reply) => RunOutcome::Completed(reply),
            ErasedStep::Fail(err) => RunOutcome::Failed(err),
        }
    }

    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    pub fn get(&self, id: ContinuationId) -> Option<&Continuation> {
        self.parked.get(&id)
    }

    /// Continuation awaiting `call_id`, if any
    pub fn awaiting(&self, call_id: CallId) -> Option<ContinuationId> {
        self.by_call.get(&call_id).copied()
    }
}
