//! Simulated transport for deterministic testing
//!
//! TigerStyle: Calls are captured, never sent; replies go back in seeded order.
//!
//! The transport holds every committed call in flight until the test asks for
//! the next one. Which call comes next is drawn from the RNG, so a seed fixes
//! one delivery order and different seeds explore different orders.

use crate::fault::{FaultInjector, FaultType};
use crate::rng::DeterministicRng;
use async_trait::async_trait;
use selkie_core::{CallRejection, CallReply, Error, RejectCode, Result};
use selkie_runtime::{Dispatcher, HandlerOutcome, OutboundCall, Transport};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    refused: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
}

/// Snapshot of transport counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub accepted: u64,
    /// Sends refused by an injected fault
    pub refused: u64,
    /// Replies replaced by an injected reject
    pub rejected: u64,
    /// Calls lost in flight, answered with a timeout
    pub dropped: u64,
    pub delivered: u64,
}

/// In-memory transport with fault injection
///
/// Clones share the in-flight set and counters.
#[derive(Debug, Clone)]
pub struct SimTransport {
    rng: DeterministicRng,
    fault_injector: Arc<FaultInjector>,
    in_flight: Arc<Mutex<Vec<OutboundCall>>>,
    counters: Arc<Counters>,
}

impl SimTransport {
    pub fn new(rng: DeterministicRng, fault_injector: Arc<FaultInjector>) -> Self {
        Self {
            rng,
            fault_injector,
            in_flight: Arc::new(Mutex::new(Vec::new())),
            counters: Arc::new(Counters::default()),
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, Vec<OutboundCall>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take a committed call into flight
    ///
    /// # Errors
    /// `Other` when an injected fault refuses the send.
    pub fn accept(&self, call: OutboundCall) -> Result<()> {
        if let Some(FaultType::TransportSendFail) = self.fault_injector.should_inject("transport_send")
        {
            self.counters.refused.fetch_add(1, Ordering::SeqCst);
            return Err(Error::Other(anyhow::anyhow!(
                "injected send failure for call {} to {}",
                call.id,
                call.target
            )));
        }

        debug!(call_id = %call.id, target = %call.target, method = %call.method, "Call in flight");
        self.counters.accepted.fetch_add(1, Ordering::SeqCst);
        self.in_flight().push(call);
        Ok(())
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight().len()
    }

    /// Remove a call chosen by the RNG
    pub fn take_next(&self) -> Option<OutboundCall> {
        let mut in_flight = self.in_flight();
        if in_flight.is_empty() {
            return None;
        }
        let index = self.rng.next_index(in_flight.len());
        Some(in_flight.swap_remove(index))
    }

    /// Outcome for `call`, from `responder` unless a fault overrides it
    pub fn resolve(
        &self,
        call: &OutboundCall,
        responder: impl FnOnce(&OutboundCall) -> CallReply,
    ) -> CallReply {
        match self.fault_injector.should_inject("transport_reply") {
            Some(FaultType::TransportReject) => {
                self.counters.rejected.fetch_add(1, Ordering::SeqCst);
                Err(CallRejection::new(
                    RejectCode::CanisterReject,
                    "injected reject",
                ))
            }
            Some(FaultType::TransportDrop) => {
                self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                Err(CallRejection::new(RejectCode::Timeout, "call lost in flight"))
            }
            _ => responder(call),
        }
    }

    /// Move committed calls from `dispatcher` into flight
    ///
    /// A refused send is answered at once with a `TransportError` reject,
    /// which may resume a handler and commit further calls; those are moved
    /// too. Returns the outcomes of those rejects.
    pub fn pump(&self, dispatcher: &mut Dispatcher) -> Vec<HandlerOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let calls = dispatcher.take_outbound();
            if calls.is_empty() {
                return outcomes;
            }
            for call in calls {
                let call_id = call.id;
                let Err(err) = self.accept(call) else {
                    continue;
                };
                let reply = Err(CallRejection::new(
                    RejectCode::TransportError,
                    err.to_string(),
                ));
                match dispatcher.deliver(call_id, reply) {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(err) => warn!(call_id = %call_id, error = %err, "Transport reject dropped"),
                }
            }
        }
    }

    /// Deliver the outcome of one in-flight call, chosen by the RNG
    ///
    /// Returns `None` when nothing is in flight.
    pub fn deliver_next(
        &self,
        dispatcher: &mut Dispatcher,
        responder: impl FnOnce(&OutboundCall) -> CallReply,
    ) -> Option<Result<HandlerOutcome>> {
        let call = self.take_next()?;
        let reply = self.resolve(&call, responder);
        self.counters.delivered.fetch_add(1, Ordering::SeqCst);
        Some(dispatcher.deliver(call.id, reply))
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            accepted: self.counters.accepted.load(Ordering::SeqCst),
            refused: self.counters.refused.load(Ordering::SeqCst),
            rejected: self.counters.rejected.load(Ordering::SeqCst),
            dropped: self.counters.dropped.load(Ordering::SeqCst),
            delivered: self.counters.delivered.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn send(&self, call: OutboundCall) -> Result<()> {
        self.accept(call)
    }
}
