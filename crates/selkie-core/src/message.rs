//! Messages and the identifiers that tie them to continuations and calls
//!
//! TigerStyle: Newtype identifiers, immutable messages, explicit size limits.

use crate::constants::*;
use crate::error::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of a message, monotonic per engine instance
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Identifier of a continuation (a suspended handler execution)
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ContinuationId(pub u64);

impl fmt::Display for ContinuationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Identifier of an outbound call
///
/// The epoch is the restart generation. Replies carrying an id from an
/// earlier epoch can never match a live continuation.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CallId {
    pub epoch: u64,
    pub sequence: u64,
}

impl CallId {
    pub fn new(epoch: u64, sequence: u64) -> Self {
        Self { epoch, sequence }
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.epoch, self.sequence)
    }
}

// =============================================================================
// Call outcomes
// =============================================================================

/// Why an outbound call was rejected
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum RejectCode {
    /// The target does not exist or cannot be reached
    DestinationInvalid,
    /// The target's handler explicitly rejected the call
    CanisterReject,
    /// No reply arrived in time
    Timeout,
    /// The transport failed to hand off the payload
    TransportError,
    /// The call was refused before leaving the engine
    ApiRejected,
}

impl RejectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DestinationInvalid => "destination_invalid",
            Self::CanisterReject => "canister_reject",
            Self::Timeout => "timeout",
            Self::TransportError => "transport_error",
            Self::ApiRejected => "api_rejected",
        }
    }
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected outbound call, delivered to the awaiting handler as a value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRejection {
    pub code: RejectCode,
    pub message: String,
}

impl CallRejection {
    pub fn new(code: RejectCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CallRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Outcome of an outbound call as seen by the awaiting handler
pub type CallReply = std::result::Result<Bytes, CallRejection>;

// =============================================================================
// Message
// =============================================================================

/// What a message is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// A fresh request that starts a handler
    Inbound,
    /// A successful reply to an outbound call
    Response { call_id: CallId },
    /// A failed outbound call
    Reject { call_id: CallId, code: RejectCode },
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Response { .. } => "response",
            Self::Reject { .. } => "reject",
        }
    }

    /// The call this message answers, if any
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            Self::Inbound => None,
            Self::Response { call_id } | Self::Reject { call_id, .. } => Some(*call_id),
        }
    }
}

/// A unit of work for the dispatcher. Immutable once constructed.
///
/// For `Response` and `Reject` messages `handler` names the handler that
/// issued the call, and a reject's payload carries the UTF-8 reject message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: MessageId,
    handler: String,
    payload: Bytes,
    kind: MessageKind,
}

impl Message {
    /// Create a message with validation
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the handler name or payload exceeds its limit.
    pub fn new(
        id: MessageId,
        handler: impl Into<String>,
        payload: Bytes,
        kind: MessageKind,
    ) -> Result<Self> {
        let handler = handler.into();
        if handler.len() > HANDLER_NAME_LENGTH_BYTES_MAX {
            return Err(Error::invalid_argument(format!(
                "handler name length {} exceeds limit {}",
                handler.len(),
                HANDLER_NAME_LENGTH_BYTES_MAX
            )));
        }
        if payload.len() > MESSAGE_PAYLOAD_SIZE_BYTES_MAX {
            return Err(Error::invalid_argument(format!(
                "payload size {} exceeds limit {}",
                payload.len(),
                MESSAGE_PAYLOAD_SIZE_BYTES_MAX
            )));
        }
        Ok(Self {
            id,
            handler,
            payload,
            kind,
        })
    }

    pub fn inbound(id: MessageId, handler: impl Into<String>, payload: Bytes) -> Result<Self> {
        Self::new(id, handler, payload, MessageKind::Inbound)
    }

    /// Build the Response or Reject message that carries `reply` for `call_id`
    ///
    /// A response payload over the message limit arrives as a
    /// `TransportError` reject, and an oversized reject message is cut to
    /// the limit, so every reply still resolves its call.
    pub fn reply(
        id: MessageId,
        handler: impl Into<String>,
        call_id: CallId,
        reply: CallReply,
    ) -> Result<Self> {
        match bound_reply(reply) {
            Ok(payload) => Self::new(id, handler, payload, MessageKind::Response { call_id }),
            Err(rejection) => Self::new(
                id,
                handler,
                Bytes::from(rejection.message),
                MessageKind::Reject {
                    call_id,
                    code: rejection.code,
                },
            ),
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    /// Recover the call outcome carried by a Response or Reject message
    pub fn to_reply(&self) -> Option<CallReply> {
        match &self.kind {
            MessageKind::Inbound => None,
            MessageKind::Response { .. } => Some(Ok(self.payload.clone())),
            MessageKind::Reject { code, .. } => Some(Err(CallRejection::new(
                *code,
                String::from_utf8_lossy(&self.payload).into_owned(),
            ))),
        }
    }
}

fn bound_reply(reply: CallReply) -> CallReply {
    match reply {
        Ok(payload) if payload.len() > MESSAGE_PAYLOAD_SIZE_BYTES_MAX => Err(CallRejection::new(
            RejectCode::TransportError,
            format!(
                "reply payload size {} exceeds limit {}",
                payload.len(),
                MESSAGE_PAYLOAD_SIZE_BYTES_MAX
            ),
        )),
        Err(mut rejection) if rejection.message.len() > MESSAGE_PAYLOAD_SIZE_BYTES_MAX => {
            let mut end = MESSAGE_PAYLOAD_SIZE_BYTES_MAX;
            while !rejection.message.is_char_boundary(end) {
                end -= 1;
            }
            rejection.message.truncate(end);
            Err(rejection)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_id_display() {
        assert_eq!(CallId::new(2, 17).to_string(), "2:17");
        assert!(CallId::new(1, 99) < CallId::new(2, 0));
    }

    #[test]
    fn test_message_payload_too_large() {
        let payload = Bytes::from(vec![0u8; MESSAGE_PAYLOAD_SIZE_BYTES_MAX + 1]);
        let result = Message::inbound(MessageId(1), "deposit", payload);
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn test_reject_message_carries_rejection() {
        let call_id = CallId::new(0, 4);
        let rejection = CallRejection::new(RejectCode::CanisterReject, "insufficient funds");
        let msg = Message::reply(MessageId(9), "transfer", call_id, Err(rejection.clone())).unwrap();

        assert_eq!(msg.kind().call_id(), Some(call_id));
        assert_eq!(msg.kind().as_str(), "reject");
        assert_eq!(msg.to_reply(), Some(Err(rejection)));
    }

    #[test]
    fn test_oversized_response_becomes_transport_reject() {
        let call_id = CallId::new(0, 1);
        let payload = Bytes::from(vec![0u8; MESSAGE_PAYLOAD_SIZE_BYTES_MAX + 1]);
        let msg = Message::reply(MessageId(3), "transfer", call_id, Ok(payload)).unwrap();

        assert_eq!(msg.kind().as_str(), "reject");
        let rejection = msg.to_reply().unwrap().unwrap_err();
        assert_eq!(rejection.code, RejectCode::TransportError);
        assert!(rejection.message.contains("exceeds limit"));
    }

    #[test]
    fn test_oversized_reject_message_is_cut() {
        let call_id = CallId::new(0, 2);
        let rejection = CallRejection::new(
            RejectCode::CanisterReject,
            "é".repeat(MESSAGE_PAYLOAD_SIZE_BYTES_MAX / 2 + 1),
        );
        let msg = Message::reply(MessageId(4), "transfer", call_id, Err(rejection)).unwrap();

        assert!(msg.payload().len() <= MESSAGE_PAYLOAD_SIZE_BYTES_MAX);
        let rejection = msg.to_reply().unwrap().unwrap_err();
        assert_eq!(rejection.code, RejectCode::CanisterReject);
        assert!(rejection.message.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_inbound_has_no_reply() {
        let msg = Message::inbound(MessageId(1), "deposit", Bytes::from_static(b"5")).unwrap();
        assert!(msg.to_reply().is_none());
        assert!(msg.kind().call_id().is_none());
    }
}
