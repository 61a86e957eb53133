//! Outbound call gateway
//!
//! TigerStyle: Every call resolves exactly once, limits checked at issue time.
//!
//! Calls issued inside a segment are staged. When the segment commits they
//! become pending and move to the outbox for the transport; when it rolls
//! back they are discarded and their ids are never used. Resolving a call
//! removes it from the pending set, so a second resolution of the same id
//! is detected as `DoubleResolution`.

use async_trait::async_trait;
use bytes::Bytes;
use selkie_core::constants::CALLS_PER_SEGMENT_COUNT_MAX;
use selkie_core::{
    ActorId, CallId, CallReply, ContinuationId, Error, MessageId, RejectCode, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Lifecycle of an outbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    Pending,
    Succeeded,
    Rejected(RejectCode),
}

/// A call issued by a handler to another actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundCall {
    pub id: CallId,
    pub target: ActorId,
    pub method: String,
    pub payload: Bytes,
    /// Message whose handler issued the call
    pub origin: MessageId,
    /// Handler that issued the call
    pub handler: String,
    /// Continuation awaiting the reply, set when the issuing segment commits
    pub continuation: Option<ContinuationId>,
    pub status: CallStatus,
}

/// Registry of issued calls for one engine epoch
#[derive(Debug)]
pub struct CallGateway {
    epoch: u64,
    next_sequence: u64,
    /// First sequence number of the running segment
    segment_start: u64,
    staged: Vec<OutboundCall>,
    pending: HashMap<CallId, OutboundCall>,
    outbox: VecDeque<OutboundCall>,
    max_pending: usize,
}

impl CallGateway {
    pub fn new(epoch: u64, max_pending: usize) -> Self {
        Self {
            epoch,
            next_sequence: 0,
            segment_start: 0,
            staged: Vec::new(),
            pending: HashMap::new(),
            outbox: VecDeque::new(),
            max_pending,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Mark the start of a segment
    pub fn begin_segment(&mut self) {
        assert!(
            self.staged.is_empty(),
            "VIOLATION: {} calls staged outside a segment",
            self.staged.len()
        );
        self.segment_start = self.next_sequence;
    }

    /// Stage a call from the running segment
    ///
    /// # Errors
    /// `TooManyPendingCalls` if the in-flight limit or the per-segment limit
    /// would be exceeded.
    pub fn stage(
        &mut self,
        origin: MessageId,
        handler: &str,
        target: ActorId,
        method: impl Into<String>,
        payload: Bytes,
    ) -> Result<CallId> {
        let in_flight = self.pending.len() + self.staged.len();
        if in_flight >= self.max_pending {
            return Err(Error::TooManyPendingCalls {
                count: in_flight + 1,
                limit: self.max_pending,
            });
        }
        if self.staged.len() >= CALLS_PER_SEGMENT_COUNT_MAX {
            return Err(Error::TooManyPendingCalls {
                count: self.staged.len() + 1,
                limit: CALLS_PER_SEGMENT_COUNT_MAX,
            });
        }

        let id = CallId::new(self.epoch, self.next_sequence);
        self.next_sequence += 1;
        self.staged.push(OutboundCall {
            id,
            target,
            method: method.into(),
            payload,
            origin,
            handler: handler.to_string(),
            continuation: None,
            status: CallStatus::Pending,
        });
        Ok(id)
    }

    /// Ids staged by the running segment, in issue order
    pub fn staged_ids(&self) -> Vec<CallId> {
        self.staged.iter().map(|c| c.id).collect()
    }

    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }

    /// Register the segment's staged calls as pending and queue them for sending
    pub fn commit_staged(&mut self, continuation: ContinuationId) -> Vec<CallId> {
        let mut ids = Vec::with_capacity(self.staged.len());
        for mut call in self.staged.drain(..) {
            call.continuation = Some(continuation);
            ids.push(call.id);
            self.outbox.push_back(call.clone());
            self.pending.insert(call.id, call);
        }
        assert!(
            self.pending.len() <= self.max_pending,
            "VIOLATION: {} pending calls exceed limit {}",
            self.pending.len(),
            self.max_pending
        );
        ids
    }

    /// Drop the segment's staged calls and reuse their sequence numbers
    pub fn discard_staged(&mut self) -> usize {
        let discarded = self.staged.len();
        self.staged.clear();
        self.next_sequence = self.segment_start;
        discarded
    }

    /// Take every committed call not yet handed to the transport
    pub fn take_outbox(&mut self) -> Vec<OutboundCall> {
        self.outbox.drain(..).collect()
    }

    /// Resolve a pending call exactly once
    ///
    /// # Errors
    /// - `UnknownContinuation` for an id from another epoch or never issued
    /// - `DoubleResolution` for an id issued in this epoch and already resolved
    pub fn resolve(&mut self, call_id: CallId, reply: &CallReply) -> Result<OutboundCall> {
        if let Some(mut call) = self.pending.remove(&call_id) {
            call.status = match reply {
                Ok(_) => CallStatus::Succeeded,
                Err(rejection) => CallStatus::Rejected(rejection.code),
            };
            debug!(call_id = %call_id, status = ?call.status, "Call resolved");
            return Ok(call);
        }

        if call_id.epoch == self.epoch && call_id.sequence < self.segment_start_or_next() {
            error!(call_id = %call_id, "Call resolved twice");
            return Err(Error::double_resolution(call_id));
        }

        warn!(call_id = %call_id, epoch = self.epoch, "Reply for unknown call");
        Err(Error::unknown_continuation(call_id))
    }

    /// Highest issued sequence bound (staged ids are not yet issued)
    fn segment_start_or_next(&self) -> u64 {
        if self.staged.is_empty() {
            self.next_sequence
        } else {
            self.segment_start
        }
    }

    pub fn get(&self, call_id: CallId) -> Option<&OutboundCall> {
        self.pending.get(&call_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Carries outbound calls to other actors
///
/// The transport must eventually produce exactly one reply per call it
/// accepts, delivered back through `DispatcherHandle::deliver`. A send error
/// means the call was not accepted; the engine turns it into a
/// `TransportError` rejection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, call: OutboundCall) -> Result<()>;
}

/// Transport that hands calls to an in-process channel
///
/// The receiving side decides how and when to reply.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<OutboundCall>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, call: OutboundCall) -> Result<()> {
        self.tx
            .send(call)
            .map_err(|_| Error::internal("transport channel closed"))
    }
}

/// Transport with no destinations; every send fails
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn send(&self, call: OutboundCall) -> Result<()> {
        Err(Error::internal(format!(
            "no transport configured for call {} to {}",
            call.id, call.target
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use selkie_core::{CallRejection, RejectCode};

    fn target() -> ActorId {
        ActorId::new("ledger", "bank").unwrap()
    }

    #[test]
    fn test_stage_commit_resolve() {
        let mut gateway = CallGateway::new(0, 8);
        gateway.begin_segment();
        let id = gateway
            .stage(MessageId(1), "transfer", target(), "debit", Bytes::new())
            .unwrap();
        assert_eq!(id, CallId::new(0, 0));

        let ids = gateway.commit_staged(ContinuationId(5));
        assert_eq!(ids, vec![id]);
        let sent = gateway.take_outbox();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].continuation, Some(ContinuationId(5)));

        let resolved = gateway.resolve(id, &Ok(Bytes::from("ok"))).unwrap();
        assert_eq!(resolved.status, CallStatus::Succeeded);
        assert_eq!(gateway.pending_count(), 0);
    }

    #[test]
    fn test_double_resolution_detected() {
        let mut gateway = CallGateway::new(3, 8);
        gateway.begin_segment();
        let id = gateway
            .stage(MessageId(1), "transfer", target(), "debit", Bytes::new())
            .unwrap();
        gateway.commit_staged(ContinuationId(1));

        let reject = Err(CallRejection::new(RejectCode::Timeout, "slow"));
        gateway.resolve(id, &reject).unwrap();
        assert!(matches!(
            gateway.resolve(id, &reject),
            Err(Error::DoubleResolution { .. })
        ));
    }

    #[test]
    fn test_unknown_ids() {
        let mut gateway = CallGateway::new(2, 8);
        // Earlier epoch
        assert!(matches!(
            gateway.resolve(CallId::new(1, 0), &Ok(Bytes::new())),
            Err(Error::UnknownContinuation { .. })
        ));
        // Never issued
        assert!(matches!(
            gateway.resolve(CallId::new(2, 40), &Ok(Bytes::new())),
            Err(Error::UnknownContinuation { .. })
        ));
    }

    #[test]
    fn test_discarded_calls_are_never_issued() {
        let mut gateway = CallGateway::new(0, 8);
        gateway.begin_segment();
        let id = gateway
            .stage(MessageId(1), "transfer", target(), "debit", Bytes::new())
            .unwrap();
        assert_eq!(gateway.discard_staged(), 1);
        assert!(gateway.take_outbox().is_empty());
        assert!(matches!(
            gateway.resolve(id, &Ok(Bytes::new())),
            Err(Error::UnknownContinuation { .. })
        ));

        // The sequence number is reused by the next segment
        gateway.begin_segment();
        let next = gateway
            .stage(MessageId(2), "transfer", target(), "debit", Bytes::new())
            .unwrap();
        assert_eq!(next, id);
    }

    #[test]
    fn test_pending_limit() {
        let mut gateway = CallGateway::new(0, 1);
        gateway.begin_segment();
        gateway
            .stage(MessageId(1), "fanout", target(), "a", Bytes::new())
            .unwrap();
        assert!(matches!(
            gateway.stage(MessageId(1), "fanout", target(), "b", Bytes::new()),
            Err(Error::TooManyPendingCalls { .. })
        ));
    }

    #[tokio::test]
    async fn test_channel_transport_delivers() {
        let (transport, mut rx) = ChannelTransport::new();
        let mut gateway = CallGateway::new(0, 8);
        gateway.begin_segment();
        gateway
            .stage(MessageId(1), "transfer", target(), "debit", Bytes::new())
            .unwrap();
        gateway.commit_staged(ContinuationId(1));
        for call in gateway.take_outbox() {
            transport.send(call).await.unwrap();
        }
        let received = rx.recv().await.unwrap();
        assert_eq!(received.method, "debit");
    }

    #[tokio::test]
    async fn test_null_transport_fails() {
        let call = OutboundCall {
            id: CallId::new(0, 0),
            target: target(),
            method: "debit".into(),
            payload: Bytes::new(),
            origin: MessageId(1),
            handler: "transfer".into(),
            continuation: None,
            status: CallStatus::Pending,
        };
        assert!(NullTransport.send(call).await.is_err());
    }
}
