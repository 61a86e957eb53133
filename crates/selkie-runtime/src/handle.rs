//! Dispatcher handle for callers outside the actor
//!
//! TigerStyle: Cloneable command sender, explicit error on a stopped engine.

use bytes::Bytes;
use selkie_core::{CallId, CallReply, Error, Result};
use tokio::sync::{mpsc, oneshot};

/// Commands sent to a running dispatcher
#[derive(Debug)]
pub enum DispatcherCommand {
    /// Run a handler for a new Inbound message
    Invoke {
        handler: String,
        payload: Bytes,
        reply_tx: oneshot::Sender<Result<Bytes>>,
    },
    /// Deliver the outcome of an outbound call
    Deliver {
        call_id: CallId,
        reply: CallReply,
        ack_tx: oneshot::Sender<Result<()>>,
    },
    /// Stop the run loop
    Shutdown,
}

/// Handle to a dispatcher's run loop
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    command_tx: mpsc::Sender<DispatcherCommand>,
}

impl DispatcherHandle {
    pub(crate) fn new(command_tx: mpsc::Sender<DispatcherCommand>) -> Self {
        Self { command_tx }
    }

    /// Invoke a handler and wait for it to finish
    ///
    /// Resolves when the handler completes or fails, however many times it
    /// suspends in between. A handler failure is returned as
    /// `Error::HandlerFailed`.
    pub async fn invoke(&self, handler: impl Into<String>, payload: Bytes) -> Result<Bytes> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(DispatcherCommand::Invoke {
            handler: handler.into(),
            payload,
            reply_tx,
        })
        .await?;

        reply_rx
            .await
            .map_err(|_| Error::internal("dispatcher dropped the invocation"))?
    }

    /// Deliver a call outcome, waiting until it has been dispatched
    ///
    /// # Errors
    /// `UnknownContinuation` or `DoubleResolution` if the reply matched no
    /// pending call.
    pub async fn deliver(&self, call_id: CallId, reply: CallReply) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(DispatcherCommand::Deliver {
            call_id,
            reply,
            ack_tx,
        })
        .await?;

        ack_rx
            .await
            .map_err(|_| Error::internal("dispatcher dropped the delivery"))?
    }

    /// Invoke with a JSON request and response
    pub async fn request<Req, Resp>(&self, handler: impl Into<String>, request: &Req) -> Result<Resp>
    where
        Req: serde::Serialize,
        Resp: serde::de::DeserializeOwned,
    {
        let payload = serde_json::to_vec(request).map_err(|e| Error::SerializationFailed {
            reason: format!("request: {}", e),
        })?;

        let response = self.invoke(handler, Bytes::from(payload)).await?;

        serde_json::from_slice(&response).map_err(|e| Error::DeserializationFailed {
            reason: format!("response: {}", e),
        })
    }

    /// Ask the run loop to stop
    ///
    /// Invocations still suspended at shutdown fail.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(DispatcherCommand::Shutdown).await
    }

    async fn send(&self, command: DispatcherCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| Error::internal("dispatcher is not running"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stopped_dispatcher_is_an_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = DispatcherHandle::new(tx);
        assert!(matches!(
            handle.invoke("deposit", Bytes::new()).await,
            Err(Error::Internal { .. })
        ));
        assert!(handle.shutdown().await.is_err());
    }

    #[tokio::test]
    async fn test_invoke_round_trip_through_channel() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = DispatcherHandle::new(tx);

        let responder = tokio::spawn(async move {
            if let Some(DispatcherCommand::Invoke {
                handler, reply_tx, ..
            }) = rx.recv().await
            {
                let _ = reply_tx.send(Ok(Bytes::from(handler)));
            }
        });

        let reply = handle.invoke("echo", Bytes::new()).await.unwrap();
        assert_eq!(reply, Bytes::from("echo"));
        responder.await.unwrap();
    }
}
