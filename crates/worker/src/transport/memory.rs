//! In-process channels for testing
//!
//! Each channel comes with the dispatcher-side handle used to drive it:
//! a sender for requests and control packets, the recorded messages for
//! results.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use fleetrun_internal_protocol::proto;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use super::{ControlChannel, RequestChannel, ResultsChannel, TransportError};

/// Dispatcher side of an [`InMemoryRequestChannel`]
pub type RequestSender = mpsc::UnboundedSender<proto::ExecuteWorkflowMessage>;

/// Dispatcher side of an [`InMemoryControlChannel`]
pub type ControlSender = mpsc::UnboundedSender<proto::CommunicationPacket>;

/// Request channel fed by a [`RequestSender`]
pub struct InMemoryRequestChannel {
    receiver: AsyncMutex<mpsc::UnboundedReceiver<proto::ExecuteWorkflowMessage>>,
    ready: AtomicBool,
    closed: CancellationToken,
}

impl InMemoryRequestChannel {
    pub fn new() -> (RequestSender, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let channel = Self {
            receiver: AsyncMutex::new(receiver),
            ready: AtomicBool::new(false),
            closed: CancellationToken::new(),
        };
        (sender, channel)
    }

    /// Whether readiness has been announced
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl RequestChannel for InMemoryRequestChannel {
    async fn announce_ready(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn recv(&self) -> Result<Option<proto::ExecuteWorkflowMessage>, TransportError> {
        if !self.is_ready() {
            return Err(TransportError::NotReady);
        }
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Ok(None),
            message = receiver.recv() => Ok(message),
        }
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

/// Control channel fed by a [`ControlSender`]
pub struct InMemoryControlChannel {
    receiver: AsyncMutex<mpsc::UnboundedReceiver<proto::CommunicationPacket>>,
    closed: CancellationToken,
}

impl InMemoryControlChannel {
    pub fn new() -> (ControlSender, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let channel = Self {
            receiver: AsyncMutex::new(receiver),
            closed: CancellationToken::new(),
        };
        (sender, channel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl ControlChannel for InMemoryControlChannel {
    async fn recv(&self) -> Result<Option<proto::CommunicationPacket>, TransportError> {
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Ok(None),
            packet = receiver.recv() => Ok(packet),
        }
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

/// Results channel recording every message it is handed
#[derive(Default)]
pub struct InMemoryResultsChannel {
    messages: Mutex<Vec<proto::Message>>,
    closed: AtomicBool,
}

impl InMemoryResultsChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far, in order
    pub fn messages(&self) -> Vec<proto::Message> {
        self.messages.lock().clone()
    }

    /// Event names of the messages sent so far, in order
    pub fn event_names(&self) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .map(|message| message.event_name.clone())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResultsChannel for InMemoryResultsChannel {
    async fn send(&self, message: proto::Message) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.messages.lock().push(message);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
