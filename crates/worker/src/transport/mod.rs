//! Channels between a worker and the dispatcher
//!
//! - [`RequestChannel`]: readiness announcement, then execution requests
//! - [`ControlChannel`]: PAUSE / ABORT / EXIT signals
//! - [`ResultsChannel`]: execution events, one-way
//!
//! [`grpc`] connects all three to the dispatcher with mutual TLS;
//! [`memory`] provides in-process channels for tests.

use async_trait::async_trait;
use fleetrun_internal_protocol::proto;

pub mod grpc;
pub mod memory;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connecting to the dispatcher failed
    #[error("connection failed: {0}")]
    Connect(String),

    /// The dispatcher rejected or aborted a call
    #[error("rpc failed: {0}")]
    Status(#[from] tonic::Status),

    /// The dispatcher ended a stream the worker still needs
    #[error("stream ended by dispatcher")]
    StreamEnded,

    /// Requests were received before readiness was announced
    #[error("readiness has not been announced")]
    NotReady,

    /// The channel has been closed
    #[error("channel is closed")]
    Closed,
}

/// Inbound execution requests
#[async_trait]
pub trait RequestChannel: Send + Sync + 'static {
    /// Tell the dispatcher this worker is ready for requests
    async fn announce_ready(&self) -> Result<(), TransportError>;

    /// Receive the next request, `None` once the dispatcher ends the channel
    async fn recv(&self) -> Result<Option<proto::ExecuteWorkflowMessage>, TransportError>;

    async fn close(&self);
}

/// Inbound control signals
#[async_trait]
pub trait ControlChannel: Send + Sync + 'static {
    /// Receive the next packet, `None` once the channel is closed
    ///
    /// Errors are transient; the next call may succeed. A stream ended by the
    /// dispatcher is reported as [`TransportError::StreamEnded`].
    async fn recv(&self) -> Result<Option<proto::CommunicationPacket>, TransportError>;

    /// Close the channel, waking a pending [`recv`](ControlChannel::recv)
    async fn close(&self);
}

/// Outbound execution events
#[async_trait]
pub trait ResultsChannel: Send + Sync + 'static {
    /// Hand one message to the dispatcher; messages are never retried
    async fn send(&self, message: proto::Message) -> Result<(), TransportError>;

    async fn close(&self);
}
