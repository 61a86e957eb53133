//! Handler model: explicit state machines split into segments
//!
//! TigerStyle: Suspension points are data, not stack frames.
//!
//! A handler runs synchronously from `start` (or `resume`) until it returns a
//! `Step`. `Await` carries the handler's resumption point and the locals it
//! needs afterwards; the engine serializes it into the parked continuation
//! and hands it back to `resume` together with the call outcomes.

use crate::context::HandlerContext;
use bytes::Bytes;
use selkie_core::{CallReply, Error, HandlerError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// What a segment asks the engine to do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<S> {
    /// Suspend on every call issued in this segment, saving `S`
    Await(S),
    /// Finish the handler with a reply
    Complete(Bytes),
    /// Fail the handler; only this segment rolls back
    Fail(HandlerError),
}

/// Result type of a handler segment
///
/// `Err` behaves exactly like `Ok(Step::Fail(..))`; it lets handlers use `?`
/// on context operations.
pub type StepResult<S> = std::result::Result<Step<S>, HandlerError>;

/// A message handler
///
/// `Suspended` is the enum of resumption points. Every variant holds the
/// locals live across that suspension.
pub trait Handler: Send + Sync + 'static {
    type Suspended: Serialize + DeserializeOwned + Send;

    /// First segment, run for an Inbound message
    fn start(&self, ctx: &mut HandlerContext<'_>, payload: Bytes) -> StepResult<Self::Suspended>;

    /// Later segment, run once every awaited call has an outcome
    ///
    /// `outcomes` are in the order the calls were issued.
    fn resume(
        &self,
        ctx: &mut HandlerContext<'_>,
        state: Self::Suspended,
        outcomes: Vec<CallReply>,
    ) -> StepResult<Self::Suspended>;

    /// Metadata published through the engine's interface description
    fn describe(&self) -> HandlerDescription {
        HandlerDescription::default()
    }
}

/// Free-form handler metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerDescription {
    pub doc: Option<String>,
    pub argument_type: Option<String>,
    pub reply_type: Option<String>,
}

impl HandlerDescription {
    pub fn new(doc: impl Into<String>) -> Self {
        Self {
            doc: Some(doc.into()),
            ..Self::default()
        }
    }

    pub fn with_types(mut self, argument: impl Into<String>, reply: impl Into<String>) -> Self {
        self.argument_type = Some(argument.into());
        self.reply_type = Some(reply.into());
        self
    }
}

/// Signature of one registered handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerSignature {
    pub name: String,
    #[serde(flatten)]
    pub description: HandlerDescription,
}

/// Every handler the engine exposes, sorted by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescription {
    pub handlers: Vec<HandlerSignature>,
}

impl InterfaceDescription {
    pub fn get(&self, name: &str) -> Option<&HandlerSignature> {
        self.handlers.iter().find(|h| h.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.iter().map(|h| h.name.as_str())
    }
}

// =============================================================================
// Type erasure
// =============================================================================

/// A step with the suspension state already serialized
#[derive(Debug)]
pub(crate) enum ErasedStep {
    Await(Vec<u8>),
    Complete(Bytes),
    Fail(HandlerError),
}

/// Object-safe view of a `Handler`, used by the dispatcher's registry
pub(crate) trait ErasedHandler: Send + Sync {
    fn start(&self, ctx: &mut HandlerContext<'_>, payload: Bytes) -> ErasedStep;

    fn resume(
        &self,
        ctx: &mut HandlerContext<'_>,
        saved: &[u8],
        outcomes: Vec<CallReply>,
    ) -> ErasedStep;

    fn describe(&self) -> HandlerDescription;
}

pub(crate) struct Erased<H>(pub H);

impl<H: Handler> ErasedHandler for Erased<H> {
    fn start(&self, ctx: &mut HandlerContext<'_>, payload: Bytes) -> ErasedStep {
        erase(self.0.start(ctx, payload))
    }

    fn resume(
        &self,
        ctx: &mut HandlerContext<'_>,
        saved: &[u8],
        outcomes: Vec<CallReply>,
    ) -> ErasedStep {
        match serde_json::from_slice::<H::Suspended>(saved) {
            Ok(state) => erase(self.0.resume(ctx, state, outcomes)),
            Err(e) => ErasedStep::Fail(
                Error::DeserializationFailed {
                    reason: format!("continuation state: {}", e),
                }
                .into(),
            ),
        }
    }

    fn describe(&self) -> HandlerDescription {
        self.0.describe()
    }
}

fn erase<S: Serialize>(result: StepResult<S>) -> ErasedStep {
    match result {
        Ok(Step::Await(state)) => match serde_json::to_vec(&state) {
            Ok(saved) => ErasedStep::Await(saved),
            Err(e) => ErasedStep::Fail(
                Error::SerializationFailed {
                    reason: format!("continuation state: {}", e),
                }
                .into(),
            ),
        },
        Ok(Step::Complete(reply)) => ErasedStep::Complete(reply),
        Ok(Step::Fail(err)) | Err(err) => ErasedStep::Fail(err),
    }
}

// =============================================================================
// Closure handlers
// =============================================================================

/// Handler made from a closure that never suspends
pub struct FnHandler<F> {
    f: F,
    description: HandlerDescription,
}

/// Wrap a non-suspending closure as a handler
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&mut HandlerContext<'_>, Bytes) -> std::result::Result<Bytes, HandlerError>
        + Send
        + Sync
        + 'static,
{
    FnHandler {
        f,
        description: HandlerDescription::default(),
    }
}

impl<F> FnHandler<F> {
    pub fn with_description(mut self, description: HandlerDescription) -> Self {
        self.description = description;
        self
    }
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&mut HandlerContext<'_>, Bytes) -> std::result::Result<Bytes, HandlerError>
        + Send
        + Sync
        + 'static,
{
    type Suspended = ();

    fn start(&self, ctx: &mut HandlerContext<'_>, payload: Bytes) -> StepResult<()> {
        (self.f)(ctx, payload).map(Step::Complete)
    }

    fn resume(
        &self,
        _ctx: &mut HandlerContext<'_>,
        _state: (),
        _outcomes: Vec<CallReply>,
    ) -> StepResult<()> {
        Err(HandlerError::new(
            "not_resumable",
            "closure handlers never suspend",
        ))
    }

    fn describe(&self) -> HandlerDescription {
        self.description.clone()
    }
}
