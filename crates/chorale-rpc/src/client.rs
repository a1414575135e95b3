//! RPC client for connecting to the Chorale daemon.
//!
//! Works over the Unix socket or the TCP listener; both use the same framing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs, UnixStream};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::debug;

use chorale_types::{Delta, Mutation, SessionSnapshot, SessionSummary};

use crate::events::{ServerEvent, notification_to_event};
use crate::protocol::{
    ClientRole, Message, MutateParams, Notification, RegisterParams, RegisterResult, Request,
    RequestId, Response, RpcError, StatusResult, methods,
};
use crate::transport::{CodecError, JsonRpcCodec};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Get the default socket path for the Chorale daemon.
///
/// On Linux, prefers `$XDG_RUNTIME_DIR` for proper runtime file handling.
/// Falls back to the system temp directory for cross-platform compatibility.
#[must_use]
pub fn socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map_or_else(|_| std::env::temp_dir(), PathBuf::from)
        .join("chorale.sock")
}

/// Errors that can occur with the RPC client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC error: {code} - {message}")]
    Rpc { code: i32, message: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request timeout")]
    Timeout,

    #[error("Unexpected response type")]
    UnexpectedResponse,
}

impl From<RpcError> for ClientError {
    fn from(e: RpcError) -> Self {
        ClientError::Rpc {
            code: e.code,
            message: e.message,
        }
    }
}

/// Any byte stream the client can speak over
trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

type BoxedTransport = Box<dyn Transport>;
type Sink = SplitSink<Framed<BoxedTransport, JsonRpcCodec>, Message>;

/// Pending request waiting for a response
type PendingRequest = oneshot::Sender<Result<Response, ClientError>>;

/// RPC client for communicating with the Chorale daemon
pub struct RpcClient {
    sender: Arc<Mutex<Sink>>,
    incoming_rx: mpsc::Receiver<Message>,
    pending: Arc<Mutex<HashMap<RequestId, PendingRequest>>>,
    next_id: AtomicU64,
    connection_id: Option<String>,
    reader: JoinHandle<()>,
}

impl Drop for RpcClient {
    // The reader owns half of the socket; stop it so dropping the client hangs up
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl RpcClient {
    /// Connect to the daemon at the default socket path.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Io` if the socket connection fails.
    pub async fn connect() -> Result<Self, ClientError> {
        Self::connect_to(&socket_path()).await
    }

    /// Connect to the daemon at a custom socket path.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Io` if the socket connection fails.
    pub async fn connect_to(path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self::from_transport(Box::new(stream)))
    }

    /// Connect to the daemon's TCP listener.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Io` if the connection fails.
    pub async fn connect_tcp(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::from_transport(Box::new(stream)))
    }

    fn from_transport(transport: BoxedTransport) -> Self {
        let framed = Framed::new(transport, JsonRpcCodec::new());
        let (sink, mut stream) = framed.split();

        let pending: Arc<Mutex<HashMap<RequestId, PendingRequest>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let pending_reader = pending.clone();

        let (incoming_tx, incoming_rx) = mpsc::channel(64);

        let reader = tokio::spawn(async move {
            while let Some(result) = stream.next().await {
                match result {
                    Ok(Message::Response(resp)) => {
                        let mut pending = pending_reader.lock().await;
                        if let Some(tx) = pending.remove(&resp.id) {
                            let _ = tx.send(Ok(resp));
                        }
                    }
                    Ok(msg) => {
                        if incoming_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("Connection read error: {e}");
                        break;
                    }
                }
            }

            // Fail whatever is still waiting; dropping the senders reports ConnectionClosed
            pending_reader.lock().await.clear();
        });

        Self {
            sender: Arc::new(Mutex::new(sink)),
            incoming_rx,
            pending,
            next_id: AtomicU64::new(1),
            connection_id: None,
            reader,
        }
    }

    /// Register this connection with the daemon.
    ///
    /// A viewer joining a PIN nobody is broadcasting on gets a result with
    /// `status == NoActiveSession`, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the RPC request fails or the daemon rejects registration.
    pub async fn register(&mut self, role: ClientRole) -> Result<RegisterResult, ClientError> {
        let params = RegisterParams { role };
        let result: RegisterResult = self
            .request(methods::REGISTER, Some(serde_json::to_value(params)?))
            .await?;

        self.connection_id = Some(result.connection_id.clone());
        Ok(result)
    }

    #[must_use]
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// Apply a mutation as the session operator and return the broadcast delta.
    ///
    /// # Errors
    ///
    /// Returns the daemon's rejection (`NOT_AUTHORIZED`, `OUT_OF_RANGE`, ...) as
    /// `ClientError::Rpc`.
    pub async fn mutate(&self, mutation: Mutation) -> Result<Delta, ClientError> {
        let params = serde_json::to_value(MutateParams { mutation })?;
        self.request(methods::MUTATE, Some(params)).await
    }

    /// Fire-and-forget variant of [`mutate`](Self::mutate).
    ///
    /// # Errors
    ///
    /// Returns an error if the notification can't be sent.
    pub async fn mutate_notify(&self, mutation: Mutation) -> Result<(), ClientError> {
        let params = serde_json::to_value(MutateParams { mutation })?;
        self.notify(methods::MUTATE, Some(params)).await
    }

    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, ClientError> {
        self.request(methods::SNAPSHOT, None).await
    }

    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn status(&self) -> Result<StatusResult, ClientError> {
        self.request(methods::STATUS, None).await
    }

    /// # Errors
    ///
    /// Returns an error if the request fails or this isn't a control connection.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ClientError> {
        self.request(methods::LIST_SESSIONS, None).await
    }

    /// # Errors
    ///
    /// Returns an error if the request fails or this isn't a control connection.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        let _: serde_json::Value = self.request(methods::SHUTDOWN, None).await?;
        Ok(())
    }

    /// Send an RPC request and wait for a response.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails, the connection closes, or deserialization fails.
    pub async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<T, ClientError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let request = Request::new(method, params, id.clone());

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        self.sender
            .lock()
            .await
            .send(Message::Request(request))
            .await?;

        let response = tokio::time::timeout(REQUEST_TIMEOUT, rx)
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(|_| ClientError::ConnectionClosed)??;

        if let Some(error) = response.error {
            return Err(error.into());
        }

        let result = response.result.ok_or(ClientError::UnexpectedResponse)?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a notification (no response expected).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Codec` if sending fails.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), ClientError> {
        let notification = Notification::new(method, params);
        self.sender
            .lock()
            .await
            .send(Message::Notification(notification))
            .await?;
        Ok(())
    }

    /// Next raw message pushed by the daemon. `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<Message> {
        self.incoming_rx.recv().await
    }

    /// Next decodable daemon notification, skipping anything unrecognized.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        loop {
            let message = self.recv().await?;
            if let Some((method, params)) = message.into_notification()
                && let Some(event) = notification_to_event(&method, params)
            {
                return Some(event);
            }
        }
    }
}
