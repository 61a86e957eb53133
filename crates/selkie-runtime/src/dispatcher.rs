//! Message dispatcher: the actor's single logical thread
//!
//! TigerStyle: One segment at a time, commit at every boundary, roll back
//! only the failing segment.
//!
//! The dispatcher owns every piece of actor state by value. Messages are
//! dispatched one at a time in receipt order; Inbound messages start a
//! handler, Response and Reject messages resume the continuation awaiting the
//! call they answer. Each segment either commits (its buffered writes reach
//! the stores, its calls go to the transport) or rolls back alone.

use crate::context::HandlerContext;
use crate::gateway::{CallGateway, NullTransport, OutboundCall, Transport};
use crate::handle::{DispatcherCommand, DispatcherHandle};
use crate::handler::{Erased, ErasedHandler, Handler, HandlerSignature, InterfaceDescription};
use crate::mailbox::{Envelope, Mailbox, ReplyTo};
use crate::prng::{PrngManager, PrngSeed};
use crate::reentrancy::LockTable;
use crate::scheduler::{Continuation, Delivery, Entry, RunOutcome, Scheduler};
use bytes::Bytes;
use selkie_core::constants::{HANDLER_NAME_LENGTH_BYTES_MAX, STABLE_KEY_EPOCH};
use selkie_core::{
    metrics, CallId, CallRejection, CallReply, ContinuationId, EngineConfig, Error, HandlerError,
    IoContext, Message, MessageId, RejectCode, Result,
};
use selkie_storage::{
    CommitLog, MemoryStableStore, SegmentBuffer, SegmentEnd, SegmentRef, StableStore,
    StateSnapshot, VolatileStore,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};

/// Result of dispatching one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The handler finished; every segment committed
    Completed { message_id: MessageId, reply: Bytes },
    /// The segment committed and the handler is parked on `awaiting`
    Suspended {
        message_id: MessageId,
        continuation: ContinuationId,
        awaiting: Vec<CallId>,
    },
    /// A join continuation received one outcome and still awaits others
    Buffered {
        message_id: MessageId,
        continuation: ContinuationId,
        remaining: usize,
    },
    /// The last segment rolled back; earlier commits stand
    Failed {
        message_id: MessageId,
        error: HandlerError,
    },
}

impl HandlerOutcome {
    /// Message that started the handler
    pub fn message_id(&self) -> MessageId {
        match self {
            Self::Completed { message_id, .. }
            | Self::Suspended { message_id, .. }
            | Self::Buffered { message_id, .. }
            | Self::Failed { message_id, .. } => *message_id,
        }
    }

    /// True once the handler has completed or failed
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    fn status(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Suspended { .. } => "suspended",
            Self::Buffered { .. } => "buffered",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Counters kept by the dispatcher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    pub messages_dispatched: u64,
    pub handlers_completed: u64,
    pub handlers_failed: u64,
    pub segments_committed: u64,
    pub segments_rolled_back: u64,
    /// Replies dropped because no continuation awaited them
    pub unknown_continuation_drops: u64,
    pub double_resolutions: u64,
    pub transport_failures: u64,
}

/// One segment to run
struct SegmentJob {
    message_id: MessageId,
    handler_name: String,
    handler: Arc<dyn ErasedHandler>,
    continuation: Option<ContinuationId>,
    segment: u32,
    entry: Entry,
}

/// The actor engine
pub struct Dispatcher {
    config: EngineConfig,
    io: IoContext,
    /// Restart generation, persisted in the stable store
    epoch: u64,
    handlers: BTreeMap<String, Arc<dyn ErasedHandler>>,
    stable: Arc<dyn StableStore>,
    volatile: VolatileStore,
    scheduler: Scheduler,
    gateway: CallGateway,
    locks: LockTable,
    prng: PrngManager,
    commit_log: CommitLog,
    mailbox: Mailbox,
    next_message_id: u64,
    stats: DispatcherStats,
    transport: Arc<dyn Transport>,
    /// Invoke callers waiting for a suspended handler to finish
    pending_invokes: HashMap<MessageId, oneshot::Sender<Result<Bytes>>>,
    command_tx: mpsc::Sender<DispatcherCommand>,
    command_rx: Option<mpsc::Receiver<DispatcherCommand>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("epoch", &self.epoch)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("parked", &self.scheduler.parked_count())
            .field("pending_calls", &self.gateway.pending_count())
            .field("mailbox", &self.mailbox.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Dispatcher {
    /// Create an engine over `stable`, bumping the persisted epoch
    ///
    /// The PRNG starts unseeded; call `on_init` for a fresh actor or
    /// `on_restart` for one whose stable store already existed.
    #[instrument(skip_all, level = "info")]
    pub fn new(config: EngineConfig, stable: Arc<dyn StableStore>, io: IoContext) -> Result<Self> {
        config.validate()?;
        let epoch = advance_epoch(stable.as_ref())?;
        let (command_tx, command_rx) = mpsc::channel(config.dispatcher.command_buffer_size);

        info!(
            epoch,
            stable_capacity_bytes = stable.capacity_bytes(),
            volatile_ceiling_bytes = config.memory.volatile_ceiling_bytes,
            "Dispatcher created"
        );

        Ok(Self {
            volatile: VolatileStore::new(config.memory.volatile_ceiling_bytes),
            scheduler: Scheduler::new(config.scheduler.max_suspended_continuations),
            gateway: CallGateway::new(epoch, config.scheduler.max_pending_calls),
            locks: LockTable::new(),
            prng: PrngManager::new(io.entropy.clone()),
            commit_log: CommitLog::new(config.dispatcher.commit_log_entries_max),
            mailbox: Mailbox::with_capacity(config.dispatcher.mailbox_depth_max),
            handlers: BTreeMap::new(),
            next_message_id: 0,
            stats: DispatcherStats::default(),
            transport: Arc::new(NullTransport),
            pending_invokes: HashMap::new(),
            command_tx,
            command_rx: Some(command_rx),
            config,
            io,
            epoch,
            stable,
        })
    }

    /// Engine over a fresh in-memory stable store sized from `config`
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        let stable = MemoryStableStore::new(
            config.memory.stable_capacity_bytes_initial,
            config.memory.stable_capacity_bytes_max,
        );
        Self::new(config, Arc::new(stable), IoContext::production())
    }

    /// Set the transport that carries committed outbound calls
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Register a handler under `name`
    ///
    /// # Errors
    /// `InvalidArgument` for an empty, oversized or duplicate name.
    pub fn register<H: Handler>(&mut self, name: impl Into<String>, handler: H) -> Result<()> {
        let name = name.into();
        if name.is_empty() || name.len() > HANDLER_NAME_LENGTH_BYTES_MAX {
            return Err(Error::invalid_argument(format!(
                "handler name length {} must be in 1..={}",
                name.len(),
                HANDLER_NAME_LENGTH_BYTES_MAX
            )));
        }
        if self.handlers.contains_key(&name) {
            return Err(Error::invalid_argument(format!(
                "handler {} is already registered",
                name
            )));
        }
        debug!(handler = %name, "Handler registered");
        self.handlers.insert(name, Arc::new(Erased(handler)));
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Seed the PRNG for a newly created actor
    pub fn on_init(&mut self, seed: Option<PrngSeed>) {
        self.prng.on_init(seed);
    }

    /// Reseed the PRNG after a restart
    pub fn on_restart(&mut self) {
        self.prng.on_restart(self.epoch);
    }

    /// Simulate a restart or upgrade
    ///
    /// Only the stable store, the registered handlers and the transport
    /// survive. Parked continuations, pending calls, locks, volatile data
    /// and the PRNG are gone; replies to calls of the old epoch are
    /// `UnknownContinuation`. Existing handles stop working.
    #[instrument(skip(self), fields(epoch = self.epoch), level = "info")]
    pub fn restart(self) -> Result<Self> {
        let dropped_continuations = self.scheduler.parked_count();
        let dropped_calls = self.gateway.pending_count();

        let mut next = Self::new(self.config, self.stable, self.io)?;
        next.handlers = self.handlers;
        next.transport = self.transport;

        info!(
            new_epoch = next.epoch,
            dropped_continuations,
            dropped_calls,
            "Engine restarted"
        );
        Ok(next)
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    fn allocate_message_id(&mut self) -> MessageId {
        self.next_message_id += 1;
        MessageId(self.next_message_id)
    }

    /// Build an Inbound message with the next message id
    pub fn inbound(&mut self, handler: impl Into<String>, payload: Bytes) -> Result<Message> {
        let id = self.allocate_message_id();
        Message::inbound(id, handler, payload)
    }

    /// Build the Response or Reject message carrying `reply` for `call_id`
    pub fn reply_message(&mut self, call_id: CallId, reply: CallReply) -> Result<Message> {
        let handler = self
            .gateway
            .get(call_id)
            .map(|call| call.handler.clone())
            .unwrap_or_default();
        let id = self.allocate_message_id();
        Message::reply(id, handler, call_id, reply)
    }

    /// Dispatch one message
    ///
    /// # Errors
    /// - `HandlerNotFound` for an Inbound message naming no registered handler
    /// - `UnknownContinuation` for a reply no continuation awaits
    /// - `DoubleResolution` for a reply to a call already resolved
    ///
    /// In every error case the message is dropped and the actor continues.
    #[instrument(
        skip(self, message),
        fields(message_id = %message.id(), handler = message.handler(), kind = message.kind().as_str()),
        level = "debug"
    )]
    pub fn dispatch(&mut self, message: Message) -> Result<HandlerOutcome> {
        self.stats.messages_dispatched += 1;
        let kind = message.kind().as_str();

        let result = match message.kind().call_id() {
            None => self.start_handler(message),
            Some(call_id) => self.resume_handler(call_id, message),
        };

        match &result {
            Ok(outcome) => {
                metrics::record_dispatch(kind, outcome.status());
                self.settle(outcome);
            }
            Err(err) => metrics::record_dispatch(kind, err.kind()),
        }
        result
    }

    /// Resolve `call_id` with `reply` and dispatch the resulting message
    pub fn deliver(&mut self, call_id: CallId, reply: CallReply) -> Result<HandlerOutcome> {
        let message = self.reply_message(call_id, reply)?;
        self.dispatch(message)
    }

    fn start_handler(&mut self, message: Message) -> Result<HandlerOutcome> {
        let Some(handler) = self.handlers.get(message.handler()).cloned() else {
            warn!(message_id = %message.id(), handler = message.handler(), "No such handler");
            return Err(Error::handler_not_found(message.handler()));
        };

        Ok(self.run_segment(SegmentJob {
            message_id: message.id(),
            handler_name: message.handler().to_string(),
            handler,
            continuation: None,
            segment: 0,
            entry: Entry::Start(message.payload().clone()),
        }))
    }

    fn resume_handler(&mut self, call_id: CallId, message: Message) -> Result<HandlerOutcome> {
        let reply = message
            .to_reply()
            .ok_or_else(|| Error::internal("reply message without an outcome"))?;

        if let Err(err) = self.gateway.resolve(call_id, &reply) {
            match err {
                Error::DoubleResolution { .. } => self.stats.double_resolutions += 1,
                _ => self.stats.unknown_continuation_drops += 1,
            }
            return Err(err);
        }
        if let Err(rejection) = &reply {
            warn!(call_id = %call_id, code = %rejection.code, "Outbound call rejected");
        }

        match self.scheduler.record_outcome(call_id, reply)? {
            Delivery::Buffered {
                continuation,
                message_id,
                remaining,
            } => {
                debug!(
                    call_id = %call_id,
                    continuation_id = %continuation,
                    remaining,
                    "Call outcome buffered"
                );
                Ok(HandlerOutcome::Buffered {
                    message_id,
                    continuation,
                    remaining,
                })
            }
            Delivery::Ready(continuation) => {
                let handler = self
                    .handlers
                    .get(&continuation.handler)
                    .cloned()
                    .ok_or_else(|| Error::handler_not_found(continuation.handler.clone()))?;
                Ok(self.run_segment(SegmentJob {
                    message_id: continuation.message_id,
                    handler_name: continuation.handler.clone(),
                    handler,
                    continuation: Some(continuation.id),
                    segment: continuation.resume_point,
                    entry: Entry::resume(continuation),
                }))
            }
        }
    }

    /// Run one segment and commit or roll it back
    fn run_segment(&mut self, job: SegmentJob) -> HandlerOutcome {
        let SegmentJob {
            message_id,
            handler_name,
            handler,
            continuation,
            segment,
            entry,
        } = job;

        let started_ms = self.io.time.monotonic_ms();
        let now_ms = self.io.now_ms();
        let checkpoint = self.prng.checkpoint();
        let mut buffer = SegmentBuffer::new();

        self.gateway.begin_segment();
        self.scheduler.begin(message_id);
        let outcome = {
            let mut ctx = HandlerContext {
                message_id,
                handler: &handler_name,
                segment,
                now_ms,
                stable: self.stable.as_ref(),
                volatile: &self.volatile,
                buffer: &mut buffer,
                gateway: &mut self.gateway,
                locks: &mut self.locks,
                prng: &mut self.prng,
            };
            self.scheduler
                .run_until_suspend_or_done(handler.as_ref(), &mut ctx, entry)
        };
        self.scheduler.end(message_id);

        let seg = SegmentRef {
            message_id,
            handler: &handler_name,
            continuation,
            segment,
            at_ms: now_ms,
        };

        let committed = match outcome {
            RunOutcome::Suspended { state, calls } => {
                self.commit_suspension(&seg, buffer, state, calls)
            }
            RunOutcome::Completed(reply) => self.commit_completion(&seg, buffer, reply),
            RunOutcome::Failed(err) => {
                let discarded = buffer.discard();
                debug!(message_id = %message_id, discarded, "Segment writes discarded");
                Err(err)
            }
        };

        match committed {
            Ok(outcome) => {
                let elapsed_ms = self.io.time.monotonic_ms().saturating_sub(started_ms);
                metrics::record_commit(&handler_name, elapsed_ms as f64 / 1000.0);
                outcome
            }
            Err(err) => {
                self.prng.rollback_to(checkpoint);
                self.roll_back(&seg, err)
            }
        }
    }

    fn commit_suspension(
        &mut self,
        seg: &SegmentRef<'_>,
        buffer: SegmentBuffer,
        state: Vec<u8>,
        calls: Vec<CallId>,
    ) -> std::result::Result<HandlerOutcome, HandlerError> {
        self.scheduler.check_capacity()?;
        let applied = buffer.apply(self.stable.as_ref(), &mut self.volatile)?;

        let id = match seg.continuation {
            Some(id) => id,
            None => self.scheduler.allocate_id(),
        };
        let awaiting = self.gateway.commit_staged(id);
        assert!(
            awaiting == calls,
            "VIOLATION: committed calls {:?} differ from awaited calls {:?}",
            awaiting,
            calls
        );
        self.scheduler.park(Continuation::new(
            id,
            seg.message_id,
            seg.handler,
            state,
            seg.segment + 1,
            awaiting.clone(),
        ));

        let mut entry = seg.clone();
        entry.continuation = Some(id);
        self.commit_log.record_commit(
            entry,
            SegmentEnd::Suspended,
            applied.stable_keys,
            applied.volatile_keys,
        );
        self.stats.segments_committed += 1;

        debug!(
            message_id = %seg.message_id,
            handler = seg.handler,
            continuation_id = %id,
            segment = seg.segment,
            awaiting = awaiting.len(),
            "Segment committed, handler suspended"
        );
        Ok(HandlerOutcome::Suspended {
            message_id: seg.message_id,
            continuation: id,
            awaiting,
        })
    }

    fn commit_completion(
        &mut self,
        seg: &SegmentRef<'_>,
        buffer: SegmentBuffer,
        reply: Bytes,
    ) -> std::result::Result<HandlerOutcome, HandlerError> {
        let applied = buffer.apply(self.stable.as_ref(), &mut self.volatile)?;
        self.commit_log.record_commit(
            seg.clone(),
            SegmentEnd::Completed,
            applied.stable_keys,
            applied.volatile_keys,
        );
        self.stats.segments_committed += 1;
        self.stats.handlers_completed += 1;
        let released_locks = self.locks.release_all(seg.message_id);

        info!(
            message_id = %seg.message_id,
            handler = seg.handler,
            segments = seg.segment + 1,
            released_locks,
            "Handler completed"
        );
        Ok(HandlerOutcome::Completed {
            message_id: seg.message_id,
            reply,
        })
    }

    fn roll_back(&mut self, seg: &SegmentRef<'_>, error: HandlerError) -> HandlerOutcome {
        let discarded_calls = self.gateway.discard_staged();
        let released_locks = self.locks.release_all(seg.message_id);
        self.commit_log.record_rollback(seg.clone(), error.to_string());
        self.stats.segments_rolled_back += 1;
        self.stats.handlers_failed += 1;
        metrics::record_rollback(seg.handler);

        warn!(
            message_id = %seg.message_id,
            handler = seg.handler,
            segment = seg.segment,
            code = %error.code,
            discarded_calls,
            released_locks,
            "Segment rolled back, handler failed"
        );
        HandlerOutcome::Failed {
            message_id: seg.message_id,
            error,
        }
    }

    /// Answer an invoke caller once its handler finished
    fn settle(&mut self, outcome: &HandlerOutcome) {
        let result = match outcome {
            HandlerOutcome::Completed { reply, .. } => Ok(reply.clone()),
            HandlerOutcome::Failed { error, .. } => Err(Error::from(error.clone())),
            _ => return,
        };
        if let Some(reply_tx) = self.pending_invokes.remove(&outcome.message_id()) {
            let _ = reply_tx.send(result);
        }
    }

    // =========================================================================
    // Mailbox
    // =========================================================================

    /// Queue a message for `process_next`
    ///
    /// # Errors
    /// `MailboxFull` when the mailbox is at capacity.
    pub fn enqueue(&mut self, message: Message) -> Result<()> {
        let envelope = Envelope::new(message, ReplyTo::None, self.io.time.as_ref());
        self.mailbox.push(envelope).map_err(|(err, _)| err)
    }

    fn enqueue_with_waiter(&mut self, message: Message, reply: ReplyTo) {
        let envelope = Envelope::new(message, reply, self.io.time.as_ref());
        if let Err((err, rejected)) = self.mailbox.push(envelope) {
            warn!(message_id = %rejected.message.id(), error = %err, "Message rejected");
            fail_waiter(rejected.reply, err);
        }
    }

    /// Dispatch the oldest queued message; false when the mailbox is empty
    ///
    /// The outcome goes to whoever waits on the message.
    pub fn process_next(&mut self) -> bool {
        let Some(envelope) = self.mailbox.pop() else {
            return false;
        };
        let waited_ms = envelope.wait_time_ms(self.io.time.as_ref());
        let Envelope { message, reply, .. } = envelope;
        let message_id = message.id();
        debug!(message_id = %message_id, waited_ms, "Message dequeued");

        let ack = match reply {
            ReplyTo::Invoke(reply_tx) => {
                self.pending_invokes.insert(message_id, reply_tx);
                None
            }
            ReplyTo::Deliver(ack_tx) => Some(ack_tx),
            ReplyTo::None => None,
        };

        match self.dispatch(message) {
            Ok(_) => {
                if let Some(ack_tx) = ack {
                    let _ = ack_tx.send(Ok(()));
                }
            }
            Err(err) => {
                if let Some(reply_tx) = self.pending_invokes.remove(&message_id) {
                    let _ = reply_tx.send(Err(err));
                } else if let Some(ack_tx) = ack {
                    let _ = ack_tx.send(Err(err));
                } else {
                    debug!(message_id = %message_id, error = %err, "Message dropped");
                }
            }
        }
        true
    }

    /// Process queued messages until the mailbox is empty
    pub fn run_until_idle(&mut self) -> usize {
        let mut processed = 0;
        while self.process_next() {
            processed += 1;
        }
        processed
    }

    /// Take committed calls not yet handed to a transport
    pub fn take_outbound(&mut self) -> Vec<OutboundCall> {
        self.gateway.take_outbox()
    }

    // =========================================================================
    // Run loop
    // =========================================================================

    /// Handle for sending commands to `run`
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle::new(self.command_tx.clone())
    }

    /// Run the idle loop until shutdown
    ///
    /// Commands are queued in the mailbox in arrival order; committed calls
    /// are handed to the transport after every dispatch.
    #[instrument(skip(self), fields(epoch = self.epoch), level = "info")]
    pub async fn run(&mut self) {
        let Some(mut command_rx) = self.command_rx.take() else {
            error!("Dispatcher run loop is already running");
            return;
        };
        info!(handlers = self.handlers.len(), "Dispatcher starting");

        let mut stopping = false;
        while !stopping {
            let Some(command) = command_rx.recv().await else {
                break;
            };
            stopping = self.accept(command);
            while !stopping && !self.mailbox.is_full() {
                match command_rx.try_recv() {
                    Ok(command) => stopping = self.accept(command),
                    Err(_) => break,
                }
            }
            self.drain().await;
        }

        self.command_rx = Some(command_rx);
        self.fail_waiters();
        info!("Dispatcher stopped");
    }

    /// Turn a command into a queued message; true on shutdown
    fn accept(&mut self, command: DispatcherCommand) -> bool {
        match command {
            DispatcherCommand::Invoke {
                handler,
                payload,
                reply_tx,
            } => {
                match self.inbound(handler, payload) {
                    Ok(message) => self.enqueue_with_waiter(message, ReplyTo::Invoke(reply_tx)),
                    Err(err) => {
                        let _ = reply_tx.send(Err(err));
                    }
                }
                false
            }
            DispatcherCommand::Deliver {
                call_id,
                reply,
                ack_tx,
            } => {
                match self.reply_message(call_id, reply) {
                    Ok(message) => self.enqueue_with_waiter(message, ReplyTo::Deliver(ack_tx)),
                    Err(err) => {
                        let _ = ack_tx.send(Err(err));
                    }
                }
                false
            }
            DispatcherCommand::Shutdown => {
                info!("Dispatcher shutting down");
                true
            }
        }
    }

    async fn drain(&mut self) {
        self.flush_outbound().await;
        while self.process_next() {
            self.flush_outbound().await;
        }
    }

    /// Hand committed calls to the transport
    ///
    /// A call the transport refuses is answered with a `TransportError`
    /// reject, so its continuation still resumes.
    async fn flush_outbound(&mut self) {
        let transport = self.transport.clone();
        for call in self.gateway.take_outbox() {
            let call_id = call.id;
            let handler = call.handler.clone();
            let Err(err) = transport.send(call).await else {
                continue;
            };

            self.stats.transport_failures += 1;
            warn!(call_id = %call_id, error = %err, "Transport refused call");
            let reply = Err(CallRejection::new(RejectCode::TransportError, err.to_string()));
            let message = match Message::reply(self.allocate_message_id(), handler, call_id, reply)
            {
                Ok(message) => message,
                Err(err) => {
                    error!(call_id = %call_id, error = %err, "Cannot build transport reject");
                    continue;
                }
            };

            let envelope = Envelope::new(message, ReplyTo::None, self.io.time.as_ref());
            if let Err((_, rejected)) = self.mailbox.push(envelope) {
                // The reject must not be lost; dispatch it now instead.
                if let Err(err) = self.dispatch(rejected.message) {
                    error!(call_id = %call_id, error = %err, "Transport reject not dispatched");
                }
            }
        }
    }

    /// Fail everyone still waiting when the loop stops
    fn fail_waiters(&mut self) {
        for envelope in self.mailbox.drain() {
            fail_waiter(envelope.reply, Error::internal("dispatcher shut down"));
        }
        for (message_id, reply_tx) in self.pending_invokes.drain() {
            debug!(message_id = %message_id, "Failing suspended invocation at shutdown");
            let _ = reply_tx.send(Err(Error::internal(
                "dispatcher shut down while the handler was suspended",
            )));
        }
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Committed state of both stores
    pub fn snapshot(&self) -> Result<StateSnapshot> {
        StateSnapshot::capture(
            self.stable.as_ref(),
            &self.volatile,
            self.commit_log.last_sequence(),
        )
    }

    pub fn commit_log(&self) -> &CommitLog {
        &self.commit_log
    }

    /// Signatures of every registered handler
    pub fn interface(&self) -> InterfaceDescription {
        InterfaceDescription {
            handlers: self
                .handlers
                .iter()
                .map(|(name, handler)| HandlerSignature {
                    name: name.clone(),
                    description: handler.describe(),
                })
                .collect(),
        }
    }

    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn prng(&self) -> &PrngManager {
        &self.prng
    }

    pub fn stable(&self) -> &Arc<dyn StableStore> {
        &self.stable
    }

    pub fn parked_continuations(&self) -> usize {
        self.scheduler.parked_count()
    }

    pub fn pending_calls(&self) -> usize {
        self.gateway.pending_count()
    }

    pub fn lock_holder(&self, tag: &str) -> Option<MessageId> {
        self.locks.holder(tag)
    }

    pub fn mailbox_len(&self) -> usize {
        self.mailbox.len()
    }
}

/// Read the stored epoch, advance it, and persist the new value
fn advance_epoch(stable: &dyn StableStore) -> Result<u64> {
    let epoch = match stable.read(STABLE_KEY_EPOCH)? {
        None => 0,
        Some(raw) => {
            let bytes = <[u8; 8]>::try_from(&raw[..]).map_err(|_| {
                Error::internal(format!("epoch record has {} bytes, expected 8", raw.len()))
            })?;
            u64::from_le_bytes(bytes) + 1
        }
    };
    stable.write(STABLE_KEY_EPOCH, Bytes::copy_from_slice(&epoch.to_le_bytes()))?;
    Ok(epoch)
}

fn fail_waiter(reply: ReplyTo, err: Error) {
    match reply {
        ReplyTo::None => {}
        ReplyTo::Invoke(reply_tx) => {
            let _ = reply_tx.send(Err(err));
        }
        ReplyTo::Deliver(ack_tx) => {
            let _ = ack_tx.send(Err(err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, Step, StepResult};
    use selkie_core::ActorId;

    fn dispatcher() -> Dispatcher {
        let mut dispatcher = Dispatcher::in_memory(EngineConfig::default()).unwrap();
        dispatcher.on_init(Some([0u8; 32]));
        dispatcher
    }

    /// Writes a key, calls out, then writes the outcome
    struct Forward;

    impl Handler for Forward {
        type Suspended = ();

        fn start(&self, ctx: &mut HandlerContext<'_>, payload: Bytes) -> StepResult<()> {
            ctx.stable_write("request", payload.clone())?;
            let target = ActorId::new("remote", "echo")?;
            ctx.call(&target, "echo", payload)?;
            Ok(Step::Await(()))
        }

        fn resume(
            &self,
            ctx: &mut HandlerContext<'_>,
            _state: (),
            outcomes: Vec<CallReply>,
        ) -> StepResult<()> {
            match outcomes.into_iter().next() {
                Some(Ok(reply)) => {
                    ctx.stable_write("reply", reply.clone())?;
                    Ok(Step::Complete(reply))
                }
                Some(Err(rejection)) => Ok(Step::Fail(HandlerError::new(
                    "rejected",
                    rejection.message,
                ))),
                None => Ok(Step::Fail(HandlerError::new("no_outcome", "missing"))),
            }
        }
    }

    #[test]
    fn test_inbound_completes() {
        let mut dispatcher = dispatcher();
        dispatcher
            .register("echo", handler_fn(|_ctx, payload| Ok(payload)))
            .unwrap();

        let message = dispatcher.inbound("echo", Bytes::from("hi")).unwrap();
        let outcome = dispatcher.dispatch(message).unwrap();
        assert!(matches!(
            outcome,
            HandlerOutcome::Completed { ref reply, .. } if reply == &Bytes::from("hi")
        ));
        assert_eq!(dispatcher.stats().segments_committed, 1);
    }

    #[test]
    fn test_unknown_handler() {
        let mut dispatcher = dispatcher();
        let message = dispatcher.inbound("missing", Bytes::new()).unwrap();
        assert!(matches!(
            dispatcher.dispatch(message),
            Err(Error::HandlerNotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut dispatcher = dispatcher();
        dispatcher
            .register("echo", handler_fn(|_ctx, payload| Ok(payload)))
            .unwrap();
        assert!(dispatcher
            .register("echo", handler_fn(|_ctx, payload| Ok(payload)))
            .is_err());
    }

    #[test]
    fn test_suspend_then_resume() {
        let mut dispatcher = dispatcher();
        dispatcher.register("forward", Forward).unwrap();

        let message = dispatcher.inbound("forward", Bytes::from("ping")).unwrap();
        let HandlerOutcome::Suspended { awaiting, .. } = dispatcher.dispatch(message).unwrap()
        else {
            panic!("expected suspension");
        };
        assert_eq!(awaiting.len(), 1);
        assert_eq!(dispatcher.parked_continuations(), 1);

        // First segment is committed and its call released to the transport
        let snapshot = dispatcher.snapshot().unwrap();
        assert_eq!(snapshot.stable_get("request"), Some(&Bytes::from("ping")));
        let outbound = dispatcher.take_outbound();
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].method, "echo");

        let outcome = dispatcher.deliver(awaiting[0], Ok(Bytes::from("pong"))).unwrap();
        assert!(outcome.is_final());
        assert_eq!(dispatcher.stats().segments_committed, 2);
        assert_eq!(dispatcher.parked_continuations(), 0);
    }

    #[test]
    fn test_failed_segment_rolls_back_only_itself() {
        let mut dispatcher = dispatcher();
        dispatcher.register("forward", Forward).unwrap();

        let message = dispatcher.inbound("forward", Bytes::from("ping")).unwrap();
        let HandlerOutcome::Suspended { awaiting, .. } = dispatcher.dispatch(message).unwrap()
        else {
            panic!("expected suspension");
        };
        let reject = Err(CallRejection::new(RejectCode::CanisterReject, "no"));
        let outcome = dispatcher.deliver(awaiting[0], reject).unwrap();
        assert!(matches!(outcome, HandlerOutcome::Failed { .. }));

        let snapshot = dispatcher.snapshot().unwrap();
        assert_eq!(snapshot.stable_get("request"), Some(&Bytes::from("ping")));
        assert_eq!(dispatcher.commit_log().commits_total(), 1);
        assert_eq!(dispatcher.commit_log().rollbacks_total(), 1);
    }

    #[test]
    fn test_complete_with_unawaited_call_fails() {
        let mut dispatcher = dispatcher();
        dispatcher
            .register(
                "leaky",
                handler_fn(|ctx, _payload| {
                    ctx.stable_write("k", "v")?;
                    ctx.call(&ActorId::new("remote", "x")?, "m", Bytes::new())?;
                    Ok(Bytes::new())
                }),
            )
            .unwrap();

        let message = dispatcher.inbound("leaky", Bytes::new()).unwrap();
        let outcome = dispatcher.dispatch(message).unwrap();
        match outcome {
            HandlerOutcome::Failed { error, .. } => assert_eq!(error.code, "unawaited_calls"),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(dispatcher.take_outbound().is_empty());
        assert_eq!(dispatcher.snapshot().unwrap().stable_get("k"), None);
    }

    #[test]
    fn test_epoch_advances_on_restart() {
        let dispatcher = dispatcher();
        assert_eq!(dispatcher.epoch(), 0);
        let restarted = dispatcher.restart().unwrap();
        assert_eq!(restarted.epoch(), 1);
        assert!(!restarted.prng().is_seeded());
    }

    #[test]
    fn test_interface_lists_handlers_sorted() {
        let mut dispatcher = dispatcher();
        dispatcher.register("withdraw", Forward).unwrap();
        dispatcher
            .register("deposit", handler_fn(|_ctx, payload| Ok(payload)))
            .unwrap();
        let names: Vec<_> = dispatcher.interface().names().map(String::from).collect();
        assert_eq!(names, vec!["deposit", "withdraw"]);
    }

    #[test]
    fn test_mailbox_processes_in_order() {
        let mut dispatcher = dispatcher();
        dispatcher
            .register(
                "append",
                handler_fn(|ctx, payload| {
                    let mut log = ctx.stable_read("log")?.map(|b| b.to_vec()).unwrap_or_default();
                    log.extend_from_slice(&payload);
                    ctx.stable_write("log", log)?;
                    Ok(Bytes::new())
                }),
            )
            .unwrap();

        for part in ["a", "b", "c"] {
            let message = dispatcher.inbound("append", Bytes::from(part)).unwrap();
            dispatcher.enqueue(message).unwrap();
        }
        assert_eq!(dispatcher.run_until_idle(), 3);
        assert_eq!(
            dispatcher.snapshot().unwrap().stable_get("log"),
            Some(&Bytes::from("abc"))
        );
    }
}
