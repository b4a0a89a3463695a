//! Response sinks — decouple dispatch outcome from transport
//!
//! The dispatcher produces exactly one `DispatchResponse` per
//! envelope and hands it to a `Responder`. The same dispatch logic
//! thereby serves real HTTP responses (via a channel back to the
//! transport task), unverified callbacks, and direct in-process
//! invocations in tests.

use crate::error::{DispatchError, Result};
use crate::types::DispatchResponse;
use async_trait::async_trait;
use tokio::sync::oneshot;

/// Sink for the single aggregated response of a dispatch
#[async_trait]
pub trait Responder: Send {
    async fn respond(&mut self, response: DispatchResponse) -> Result<()>;
}

/// Captures the response for direct programmatic inspection
#[derive(Default)]
pub struct CapturingResponder {
    captured: Option<DispatchResponse>,
}

impl CapturingResponder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The captured response, if a dispatch has completed
    pub fn response(&self) -> Option<&DispatchResponse> {
        self.captured.as_ref()
    }

    /// Consume the responder, yielding the captured response
    pub fn into_response(self) -> Option<DispatchResponse> {
        self.captured
    }
}

#[async_trait]
impl Responder for CapturingResponder {
    async fn respond(&mut self, response: DispatchResponse) -> Result<()> {
        self.captured = Some(response);
        Ok(())
    }
}

/// Forwards the response to a transport task over a oneshot channel
///
/// The HTTP layer keeps the receiving half and writes the payload out
/// as the response body with the payload's status code.
pub struct ChannelResponder {
    tx: Option<oneshot::Sender<DispatchResponse>>,
}

impl ChannelResponder {
    /// Create a responder and the receiver the transport awaits
    pub fn new() -> (Self, oneshot::Receiver<DispatchResponse>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }
}

#[async_trait]
impl Responder for ChannelResponder {
    async fn respond(&mut self, response: DispatchResponse) -> Result<()> {
        let tx = self.tx.take().ok_or_else(|| {
            DispatchError::Config("Response already sent for this dispatch".to_string())
        })?;
        tx.send(response).map_err(|_| {
            DispatchError::Connection("Transport dropped before the response was sent".to_string())
        })
    }
}
