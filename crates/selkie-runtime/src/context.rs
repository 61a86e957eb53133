//! Handler context: everything a running segment may touch
//!
//! TigerStyle: The only path from handler code to engine state.
//!
//! Stable and volatile writes go to the segment buffer and become visible to
//! other handlers only when the segment commits. Calls are staged in the
//! gateway and sent only on commit. PRNG draws and lock operations take
//! effect immediately; a rollback rewinds the PRNG and releases the locks.

use crate::gateway::CallGateway;
use crate::prng::PrngManager;
use crate::reentrancy::LockTable;
use bytes::Bytes;
use selkie_core::constants::MESSAGE_PAYLOAD_SIZE_BYTES_MAX;
use selkie_core::{ActorId, CallId, Error, MessageId, Result};
use selkie_storage::{SegmentBuffer, StableStore, VolatileStore};
use tracing::debug;

/// Borrowed view of the engine for one segment
pub struct HandlerContext<'a> {
    pub(crate) message_id: MessageId,
    pub(crate) handler: &'a str,
    pub(crate) segment: u32,
    pub(crate) now_ms: u64,
    pub(crate) stable: &'a dyn StableStore,
    pub(crate) volatile: &'a VolatileStore,
    pub(crate) buffer: &'a mut SegmentBuffer,
    pub(crate) gateway: &'a mut CallGateway,
    pub(crate) locks: &'a mut LockTable,
    pub(crate) prng: &'a mut PrngManager,
}

impl<'a> HandlerContext<'a> {
    /// Message that started this handler execution
    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn handler_name(&self) -> &str {
        self.handler
    }

    /// Index of the running segment, 0 for the first
    pub fn segment(&self) -> u32 {
        self.segment
    }

    /// Wall-clock time when the segment started
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    // =========================================================================
    // Stable memory
    // =========================================================================

    pub fn stable_read(&self, key: &str) -> Result<Option<Bytes>> {
        self.buffer.stable_read(self.stable, key)
    }

    /// Buffer a durable write, committed at the next boundary
    pub fn stable_write(&mut self, key: &str, value: impl Into<Bytes>) -> Result<()> {
        self.buffer.stable_write(self.stable, key, value.into())
    }

    /// Grow stable capacity; takes effect immediately and is never returned
    pub fn stable_grow(&mut self, additional_bytes: u64) -> Result<u64> {
        let capacity = self.stable.grow(additional_bytes)?;
        debug!(additional_bytes, capacity, "Stable capacity grown");
        Ok(capacity)
    }

    pub fn stable_capacity_bytes(&self) -> u64 {
        self.stable.capacity_bytes()
    }

    // =========================================================================
    // Volatile memory
    // =========================================================================

    pub fn volatile_get(&self, key: &str) -> Option<Bytes> {
        self.buffer.volatile_get(self.volatile, key)
    }

    pub fn volatile_put(&mut self, key: &str, value: impl Into<Bytes>) -> Result<()> {
        self.buffer.volatile_put(self.volatile, key, value.into())
    }

    pub fn volatile_remove(&mut self, key: &str) -> Result<()> {
        self.buffer.volatile_remove(self.volatile, key)
    }

    // =========================================================================
    // Outbound calls
    // =========================================================================

    /// Issue a call to another actor
    ///
    /// The call is sent when this segment commits, so the handler must return
    /// `Step::Await` afterwards. Its outcome arrives in `Handler::resume`.
    ///
    /// # Errors
    /// `TooManyPendingCalls` at the in-flight limit, `InvalidArgument` for an
    /// empty method or oversized payload.
    pub fn call(
        &mut self,
        target: &ActorId,
        method: &str,
        payload: impl Into<Bytes>,
    ) -> Result<CallId> {
        let payload = payload.into();
        if method.is_empty() {
            return Err(Error::invalid_argument("call method must not be empty"));
        }
        if payload.len() > MESSAGE_PAYLOAD_SIZE_BYTES_MAX {
            return Err(Error::invalid_argument(format!(
                "call payload size {} exceeds limit {}",
                payload.len(),
                MESSAGE_PAYLOAD_SIZE_BYTES_MAX
            )));
        }

        let call_id = self.gateway.stage(
            self.message_id,
            self.handler,
            target.clone(),
            method,
            payload,
        )?;
        debug!(call_id = %call_id, target = %target, method, "Call staged");
        Ok(call_id)
    }

    // =========================================================================
    // Randomness
    // =========================================================================

    /// Draw bytes from the actor's seeded generator
    pub fn random_bytes(&mut self, n_bytes: usize) -> Result<Bytes> {
        self.prng.next(n_bytes)
    }

    // =========================================================================
    // Reentrancy locks
    // =========================================================================

    /// Take the advisory lock on `tag` for this handler execution
    pub fn lock(&mut self, tag: &str) -> Result<()> {
        self.locks.acquire(tag, self.message_id)
    }

    /// Release `tag` if this handler execution holds it
    pub fn unlock(&mut self, tag: &str) -> bool {
        self.locks.release(tag, self.message_id)
    }

    /// Message currently holding `tag`, if any
    pub fn lock_holder(&self, tag: &str) -> Option<MessageId> {
        self.locks.holder(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use selkie_core::OsEntropy;
    use selkie_storage::MemoryStableStore;
    use std::sync::Arc;

    struct Parts {
        stable: MemoryStableStore,
        volatile: VolatileStore,
        buffer: SegmentBuffer,
        gateway: CallGateway,
        locks: LockTable,
        prng: PrngManager,
    }

    impl Parts {
        fn new() -> Self {
            Self {
                stable: MemoryStableStore::default(),
                volatile: VolatileStore::new(1024),
                buffer: SegmentBuffer::new(),
                gateway: CallGateway::new(0, 4),
                locks: LockTable::new(),
                prng: PrngManager::new(Arc::new(OsEntropy)),
            }
        }

        fn ctx(&mut self) -> HandlerContext<'_> {
            HandlerContext {
                message_id: MessageId(1),
                handler: "test",
                segment: 0,
                now_ms: 0,
                stable: &self.stable,
                volatile: &self.volatile,
                buffer: &mut self.buffer,
                gateway: &mut self.gateway,
                locks: &mut self.locks,
                prng: &mut self.prng,
            }
        }
    }

    #[test]
    fn test_writes_are_buffered_until_commit() {
        let mut parts = Parts::new();
        {
            let mut ctx = parts.ctx();
            ctx.stable_write("balance", "100").unwrap();
            ctx.volatile_put("cache", "x").unwrap();
            assert_eq!(ctx.stable_read("balance").unwrap(), Some(Bytes::from("100")));
            assert_eq!(ctx.volatile_get("cache"), Some(Bytes::from("x")));
        }
        assert_eq!(parts.stable.read("balance").unwrap(), None);
        assert!(parts.volatile.is_empty());
    }

    #[test]
    fn test_call_is_staged() {
        let mut parts = Parts::new();
        parts.gateway.begin_segment();
        let target = ActorId::new("ledger", "bank").unwrap();
        let id = parts.ctx().call(&target, "debit", "10").unwrap();
        assert_eq!(parts.gateway.staged_ids(), vec![id]);
        assert!(parts.ctx().call(&target, "", "10").is_err());
    }

    #[test]
    fn test_random_bytes_requires_seed() {
        let mut parts = Parts::new();
        assert!(matches!(
            parts.ctx().random_bytes(4),
            Err(Error::PrngUnseeded)
        ));
        parts.prng.on_init(Some([1u8; 32]));
        assert_eq!(parts.ctx().random_bytes(4).unwrap().len(), 4);
    }

    #[test]
    fn test_lock_and_unlock() {
        let mut parts = Parts::new();
        let mut ctx = parts.ctx();
        ctx.lock("account:alice").unwrap();
        assert_eq!(ctx.lock_holder("account:alice"), Some(MessageId(1)));
        assert!(ctx.unlock("account:alice"));
        assert_eq!(ctx.lock_holder("account:alice"), None);
    }
}
