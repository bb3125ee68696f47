//! Transport seam — the boundary to HTTP/SDK collaborators.
//!
//! The core never performs I/O. A `ChatTransport` implementation (reqwest
//! client, SDK wrapper, test stub) owns the connection, authentication, and
//! retry policy, and hands raw JSON back across this trait. Retry must treat
//! an entire streamed response as the unit: a retried stream starts over
//! with a fresh accumulator on the caller's side.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// The boundary between formatting and the network.
///
/// `send` resolves to one terminal response object. `send_streaming`
/// resolves to a channel of incremental chunk objects, already split out of
/// whatever framing (SSE, chunked JSON) the vendor uses; the receiver sees
/// them strictly in arrival order.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// A human-readable name for this transport (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    /// Send a request body and await the complete response object.
    async fn send(&self, body: Value) -> std::result::Result<Value, TransportError>;

    /// Send a request body and receive chunk objects as they arrive.
    async fn send_streaming(
        &self,
        body: Value,
    ) -> std::result::Result<mpsc::Receiver<Value>, TransportError>;
}
