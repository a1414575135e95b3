//! Socket server implementation for the chorale daemon.
//!
//! Accepts operator, viewer and control connections on a Unix socket and,
//! optionally, a TCP listener for displays on other machines. Both speak the
//! same length-prefixed JSON-RPC framing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chorale_core::config::{Config, HubConfig};
use chorale_rpc::client::socket_path;
use chorale_rpc::protocol::{ClosedParams, Message, Notification, methods};
use chorale_rpc::transport::JsonRpcCodec;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener, UnixStream};
use tokio::sync::{Notify, RwLock};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use crate::config_watcher::run_config_reloader;
use crate::connection::{ConnectionHandle, Outbound, closes_socket};
use crate::error::{DaemonError, Result};
use crate::handlers::{HandlerContext, handle_notification, handle_request};
use crate::registry::SessionRegistry;
use crate::session::{ClientInfo, ConnectionId};

const WRITER_DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(250);

pub struct DaemonState {
    pub registry: SessionRegistry,
    pub clients: HashMap<ConnectionId, ClientInfo>,
    pub shutdown: bool,
}

impl DaemonState {
    #[must_use]
    pub fn new(hub: HubConfig) -> Self {
        Self {
            registry: SessionRegistry::new(hub),
            clients: HashMap::new(),
            shutdown: false,
        }
    }

    pub fn remove_client(&mut self, id: &ConnectionId) -> Option<ClientInfo> {
        self.clients.remove(id)
    }
}

/// Where the daemon listens and what it starts with
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    pub socket_path: Option<PathBuf>,
    pub tcp_listen: Option<String>,
    pub config: Config,
    /// Watched for `hub` changes when set
    pub config_path: Option<PathBuf>,
}

/// Run the daemon until a control client asks it to shut down.
///
/// # Errors
///
/// Returns an error if another daemon owns the socket or a listener can't bind.
pub async fn run(options: ServerOptions) -> Result<()> {
    let path = options
        .socket_path
        .or_else(|| options.config.server.socket_path.clone())
        .unwrap_or_else(socket_path);

    cleanup_stale_socket(&path).await?;

    let listener = UnixListener::bind(&path)?;
    info!("Daemon listening on {}", path.display());

    let tcp_listen = options
        .tcp_listen
        .or_else(|| options.config.server.tcp_listen.clone());
    let tcp_listener = match tcp_listen {
        Some(addr) => {
            let listener = TcpListener::bind(addr.as_str()).await?;
            info!("Daemon listening on tcp://{}", listener.local_addr()?);
            Some(listener)
        }
        None => None,
    };

    let state = Arc::new(RwLock::new(DaemonState::new(options.config.hub)));
    let shutdown = Arc::new(Notify::new());

    if let Some(config_path) = options.config_path {
        let registry = state.read().await.registry.clone();
        tokio::spawn(run_config_reloader(config_path, registry));
    }

    info!("Ready to accept connections");
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    debug!("Accepted connection");
                    spawn_connection(stream, &state, &shutdown);
                }
                Err(e) => error!("Accept error: {e}"),
            },
            accepted = accept_tcp(tcp_listener.as_ref()) => match accepted {
                Ok((stream, addr)) => {
                    debug!("Accepted tcp connection from {addr}");
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY for {addr}: {e}");
                    }
                    spawn_connection(stream, &state, &shutdown);
                }
                Err(e) => error!("TCP accept error: {e}"),
            },
            () = shutdown.notified() => {
                info!("Shutdown requested, stopping server");
                break;
            }
        }
    }

    if path.exists()
        && let Err(e) = std::fs::remove_file(&path)
    {
        warn!("Failed to remove socket file {}: {e}", path.display());
    }

    Ok(())
}

async fn accept_tcp(
    listener: Option<&TcpListener>,
) -> std::io::Result<(tokio::net::TcpStream, std::net::SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

fn spawn_connection<S>(stream: S, state: &Arc<RwLock<DaemonState>>, shutdown: &Arc<Notify>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let state = state.clone();
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = handle_connection(stream, state, shutdown).await {
            error!("Connection error: {e}");
        }
    });
}

async fn cleanup_stale_socket(path: &Path) -> Result<()> {
    if path.exists() {
        if UnixStream::connect(path).await.is_ok() {
            return Err(DaemonError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "Another daemon is already running",
            )));
        }
        info!("Removing stale socket at {}", path.display());
        std::fs::remove_file(path)?;
    }
    Ok(())
}

fn closed_notification(params: ClosedParams) -> Option<Message> {
    let params = serde_json::to_value(params).ok()?;
    Some(Message::Notification(Notification::new(
        methods::CLOSED,
        Some(params),
    )))
}

async fn handle_connection<S>(
    stream: S,
    state: Arc<RwLock<DaemonState>>,
    shutdown: Arc<Notify>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let framed = Framed::new(stream, JsonRpcCodec::new());
    let (mut sink, mut stream) = framed.split();

    let client_id = ConnectionId::new();
    debug!("New connection: {client_id}");

    let registry = {
        let mut state_guard = state.write().await;
        state_guard
            .clients
            .insert(client_id.clone(), ClientInfo::with_id(client_id.clone()));
        state_guard.registry.clone()
    };
    let buffer = registry.config().await.viewer_buffer;
    let (connection, mut rx) = ConnectionHandle::new(client_id.clone(), buffer);

    let kicked = connection.kick_signal();
    let id = client_id.clone();
    let mut send_task = tokio::spawn(async move {
        trace!("[{id}] send_task started");
        loop {
            let outbound = tokio::select! {
                biased;
                () = kicked.notified() => {
                    warn!("[{id}] outbound queue overflowed, closing");
                    Outbound::Close(chorale_rpc::protocol::CloseReason::SlowConsumer)
                }
                outbound = rx.recv() => match outbound {
                    Some(outbound) => outbound,
                    None => break,
                },
            };

            match outbound {
                Outbound::Message(msg) => {
                    if let Message::Notification(n) = &msg {
                        trace!("[{id}] send_task: sending notification method={}", n.method);
                    }
                    if let Err(e) = sink.send(msg).await {
                        warn!("Failed to send to {id}: {e}");
                        break;
                    }
                }
                Outbound::Close(reason) => {
                    debug!("[{id}] closed: {reason}");
                    if let Some(msg) = closed_notification(ClosedParams { reason })
                        && let Err(e) = sink.send(msg).await
                    {
                        warn!("Failed to send to {id}: {e}");
                        break;
                    }
                    if closes_socket(reason) {
                        break;
                    }
                }
            }
        }
        trace!("[{id}] send_task ended");
    });

    let mut writer_done = false;
    let mut stop_server = false;
    loop {
        tokio::select! {
            // The writer stops when the connection must close
            _ = &mut send_task => {
                writer_done = true;
                break;
            }
            frame = stream.next() => match frame {
                Some(Ok(msg)) => {
                    let ctx = HandlerContext {
                        state: &state,
                        client_id: &client_id,
                        connection: &connection,
                    };
                    if let Some(response) = process_message(&ctx, msg).await
                        && !connection.send_reply(response).await
                    {
                        break;
                    }

                    if state.read().await.shutdown {
                        stop_server = true;
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!("Read error from {client_id}: {e}");
                    break;
                }
                None => break,
            },
        }
    }

    debug!("Connection closed: {client_id}");
    let client = state.write().await.remove_client(&client_id);
    if let Some(session) = client.as_ref().and_then(ClientInfo::session) {
        session.disconnect(client_id.clone()).await;
    }

    // Let queued replies (like the shutdown ack) drain before hanging up
    drop(connection);
    if !writer_done && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut send_task).await.is_err() {
        send_task.abort();
    }

    if stop_server {
        shutdown.notify_one();
    }

    Ok(())
}

async fn process_message(ctx: &HandlerContext<'_>, msg: Message) -> Option<Message> {
    match msg {
        Message::Request(request) if request.id.is_none() => {
            debug!(
                "Processing notification (from Request): method={}",
                request.method
            );
            if let Err(e) = handle_notification(ctx, &request.method, request.params.as_ref()).await
            {
                warn!("Notification handler error: {e}");
            }
            None
        }

        Message::Request(request) => {
            trace!(
                "Processing request: method={}, id={:?}",
                request.method, request.id
            );
            Some(Message::Response(handle_request(ctx, &request).await))
        }

        Message::Notification(notification) => {
            debug!("Processing notification: method={}", notification.method);
            if let Err(e) =
                handle_notification(ctx, &notification.method, notification.params.as_ref()).await
            {
                warn!("Notification handler error: {e}");
            }
            None
        }

        Message::Response(response) => {
            debug!("Ignoring unexpected response id={}", response.id);
            None
        }
    }
}
