// gRPC channels to the dispatcher
// Decision: One tonic Channel per logical channel, each dialled at its own address
// Decision: Mutual TLS authenticates the worker, call metadata carries its identity
// Decision: Closing a channel drops its client so the connection is released with it

use std::time::Duration;

use async_trait::async_trait;
use fleetrun_internal_protocol::proto;
use fleetrun_internal_protocol::{WorkerFabricClient, READY_TOKEN, WORKER_IDENTITY_HEADER};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::{Channel, Endpoint};
use tonic::Streaming;
use tracing::{debug, info, warn};

use super::{ControlChannel, RequestChannel, ResultsChannel, TransportError};
use crate::config::WorkerConfig;
use crate::credentials::Credentials;

type Client = WorkerFabricClient<Channel>;

/// Outbound messages buffered while the results stream is busy
const RESULTS_BUFFER: usize = 256;

/// How long closing the results channel waits for the dispatcher's receipt
const RESULTS_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

async fn connect(
    address: &str,
    credentials: &Credentials,
    domain: &str,
) -> Result<Client, TransportError> {
    let endpoint = Endpoint::from_shared(format!("https://{}", address))
        .map_err(|e| TransportError::Connect(format!("invalid address {}: {}", address, e)))?
        .tls_config(credentials.tls_config(domain))
        .map_err(|e| TransportError::Connect(format!("tls config for {}: {}", address, e)))?;

    let channel = endpoint
        .connect()
        .await
        .map_err(|e| TransportError::Connect(format!("{}: {}", address, e)))?;

    Ok(WorkerFabricClient::new(channel))
}

/// `x-worker-identity` metadata attached to every call
#[derive(Clone)]
struct WorkerIdentity(AsciiMetadataValue);

impl WorkerIdentity {
    fn new(identity: &str) -> Result<Self, TransportError> {
        identity.parse().map(Self).map_err(|_| {
            TransportError::Connect(format!("identity {:?} is not valid metadata", identity))
        })
    }

    fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        request
            .metadata_mut()
            .insert(WORKER_IDENTITY_HEADER, self.0.clone());
        request
    }
}

/// The three channels of one worker
pub struct GrpcChannels {
    pub requests: GrpcRequestChannel,
    pub control: GrpcControlChannel,
    pub results: GrpcResultsChannel,
}

impl GrpcChannels {
    /// Connect all three channels
    pub async fn connect(
        config: &WorkerConfig,
        credentials: &Credentials,
    ) -> Result<Self, TransportError> {
        let identity = WorkerIdentity::new(&config.identity())?;

        let requests = connect(&config.requests_address, credentials, &config.tls_domain).await?;
        let control = connect(&config.control_address, credentials, &config.tls_domain).await?;
        let results = connect(&config.results_address, credentials, &config.tls_domain).await?;

        info!(
            identity = %config.identity(),
            requests = %config.requests_address,
            control = %config.control_address,
            results = %config.results_address,
            "Connected to dispatcher"
        );

        Ok(Self {
            requests: GrpcRequestChannel::new(requests, identity.clone()),
            control: GrpcControlChannel::new(control, identity.clone()),
            results: GrpcResultsChannel::open(results, identity),
        })
    }

    /// Close all three channels, for callers that give up before a worker
    /// owns them
    pub async fn close(&self) {
        self.requests.close().await;
        self.results.close().await;
        self.control.close().await;
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Server-streamed execution requests, opened by the readiness announcement
pub struct GrpcRequestChannel {
    client: Mutex<Option<Client>>,
    identity: WorkerIdentity,
    stream: AsyncMutex<Option<Streaming<proto::ExecuteWorkflowMessage>>>,
    closed: CancellationToken,
}

impl GrpcRequestChannel {
    fn new(client: Client, identity: WorkerIdentity) -> Self {
        Self {
            client: Mutex::new(Some(client)),
            identity,
            stream: AsyncMutex::new(None),
            closed: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl RequestChannel for GrpcRequestChannel {
    async fn announce_ready(&self) -> Result<(), TransportError> {
        let mut client = self.client.lock().clone().ok_or(TransportError::Closed)?;
        let request = self.identity.request(proto::ReadyAnnouncement {
            token: READY_TOKEN.to_string(),
        });

        let response = client.requests(request).await?;
        *self.stream.lock().await = Some(response.into_inner());
        debug!("Announced readiness");
        Ok(())
    }

    async fn recv(&self) -> Result<Option<proto::ExecuteWorkflowMessage>, TransportError> {
        if self.closed.is_cancelled() {
            return Ok(None);
        }

        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(TransportError::NotReady)?;

        tokio::select! {
            _ = self.closed.cancelled() => Ok(None),
            message = stream.message() => Ok(message?),
        }
    }

    async fn close(&self) {
        self.closed.cancel();
        self.stream.lock().await.take();
        self.client.lock().take();
        debug!("Request channel closed");
    }
}

// =============================================================================
// Control
// =============================================================================

/// Server-streamed control packets
///
/// A failed or ended stream is dropped and the next `recv` subscribes again.
/// Only [`close`](ControlChannel::close) ends the channel.
pub struct GrpcControlChannel {
    client: Mutex<Option<Client>>,
    identity: WorkerIdentity,
    stream: AsyncMutex<Option<Streaming<proto::CommunicationPacket>>>,
    closed: CancellationToken,
}

impl GrpcControlChannel {
    fn new(client: Client, identity: WorkerIdentity) -> Self {
        Self {
            client: Mutex::new(Some(client)),
            identity,
            stream: AsyncMutex::new(None),
            closed: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl ControlChannel for GrpcControlChannel {
    async fn recv(&self) -> Result<Option<proto::CommunicationPacket>, TransportError> {
        if self.closed.is_cancelled() {
            return Ok(None);
        }

        let mut guard = self.stream.lock().await;

        if guard.is_none() {
            let Some(mut client) = self.client.lock().clone() else {
                return Ok(None);
            };
            let request = self.identity.request(proto::ControlSubscription {});
            let response = tokio::select! {
                _ = self.closed.cancelled() => return Ok(None),
                response = client.control(request) => response?,
            };
            debug!("Subscribed to control signals");
            *guard = Some(response.into_inner());
        }

        let Some(stream) = guard.as_mut() else {
            return Ok(None);
        };

        let received = tokio::select! {
            _ = self.closed.cancelled() => return Ok(None),
            received = stream.message() => received,
        };

        match received {
            Ok(Some(packet)) => Ok(Some(packet)),
            Ok(None) => {
                guard.take();
                warn!("Control stream ended by dispatcher, resubscribing");
                Err(TransportError::StreamEnded)
            }
            Err(status) => {
                guard.take();
                Err(status.into())
            }
        }
    }

    async fn close(&self) {
        self.closed.cancel();
        self.stream.lock().await.take();
        self.client.lock().take();
        debug!("Control channel closed");
    }
}

// =============================================================================
// Results
// =============================================================================

/// Client-streamed execution events
///
/// Messages are queued onto one long-lived stream; the dispatcher's receipt
/// arrives when the stream is closed.
pub struct GrpcResultsChannel {
    sender: Mutex<Option<mpsc::Sender<proto::Message>>>,
    call: Mutex<Option<JoinHandle<Result<proto::ResultsReceipt, tonic::Status>>>>,
}

impl GrpcResultsChannel {
    fn open(mut client: Client, identity: WorkerIdentity) -> Self {
        let (sender, receiver) = mpsc::channel(RESULTS_BUFFER);
        let request = identity.request(ReceiverStream::new(receiver));

        let call = tokio::spawn(async move {
            client
                .results(request)
                .await
                .map(|response| response.into_inner())
        });

        Self {
            sender: Mutex::new(Some(sender)),
            call: Mutex::new(Some(call)),
        }
    }
}

#[async_trait]
impl ResultsChannel for GrpcResultsChannel {
    async fn send(&self, message: proto::Message) -> Result<(), TransportError> {
        let sender = self.sender.lock().clone().ok_or(TransportError::Closed)?;
        sender
            .send(message)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) {
        // Dropping the last sender ends the client stream
        self.sender.lock().take();

        let Some(call) = self.call.lock().take() else {
            return;
        };

        match tokio::time::timeout(RESULTS_CLOSE_TIMEOUT, call).await {
            Ok(Ok(Ok(receipt))) => {
                info!(accepted = receipt.accepted, "Results channel closed")
            }
            Ok(Ok(Err(status))) => warn!(error = %status, "Results stream ended with error"),
            Ok(Err(e)) => warn!(error = %e, "Results stream task failed"),
            Err(_) => warn!("Timed out waiting for results receipt"),
        }
    }
}
