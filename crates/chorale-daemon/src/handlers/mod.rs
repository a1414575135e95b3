//! Request handlers for the daemon.
//!
//! This module contains handlers for all RPC methods organized by category:
//! - Registration (operator, viewer and control roles)
//! - Session methods (`mutate`, `snapshot`)
//! - Control methods (`status`, `list_sessions`, `shutdown`)

mod register;
mod session;

use std::sync::Arc;

use chorale_rpc::protocol::{Request, RequestId, Response, StatusResult, methods};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{trace, warn};

use crate::connection::ConnectionHandle;
use crate::error::{DaemonError, Result};
use crate::hub::SessionHandle;
use crate::server::DaemonState;
use crate::session::{Binding, ClientInfo, ConnectionId};

pub struct HandlerContext<'a> {
    pub state: &'a Arc<RwLock<DaemonState>>,
    pub client_id: &'a ConnectionId,
    /// The connection's own outbound queue, handed to the session it joins
    pub connection: &'a ConnectionHandle,
}

impl HandlerContext<'_> {
    pub async fn client(&self) -> Option<ClientInfo> {
        self.state.read().await.clients.get(self.client_id).cloned()
    }

    pub async fn is_registered(&self) -> bool {
        self.client().await.as_ref().is_some_and(ClientInfo::is_registered)
    }

    pub async fn bind(&self, binding: Binding) {
        let mut state = self.state.write().await;
        if let Some(client) = state.clients.get_mut(self.client_id) {
            client.binding = binding;
        }
    }
}

pub async fn handle_request(ctx: &HandlerContext<'_>, request: &Request) -> Response {
    let id = request.id.clone().unwrap_or(RequestId::Number(0));
    let params = request.params.as_ref();

    let result = match request.method.as_str() {
        methods::REGISTER => register::handle_register(ctx, params).await,
        methods::MUTATE => session::handle_mutate(ctx, params).await,
        methods::SNAPSHOT => session::handle_snapshot(ctx).await,
        methods::STATUS => handle_status(ctx).await,
        methods::LIST_SESSIONS => handle_list_sessions(ctx).await,
        methods::SHUTDOWN => handle_shutdown(ctx).await,
        method => Err(DaemonError::MethodNotFound(method.to_string())),
    };

    match result {
        Ok(value) => Response::success(id, value),
        Err(e) => Response::error(id, e.into()),
    }
}

/// Handle a request sent without an id. Only `mutate` is meaningful this way.
pub async fn handle_notification(
    ctx: &HandlerContext<'_>,
    method: &str,
    params: Option<&Value>,
) -> Result<()> {
    trace!("Handling notification: method={method}");

    match method {
        methods::MUTATE => session::handle_mutate(ctx, params).await.map(|_| ()),
        _ => {
            warn!("Unknown notification method: {method}");
            Ok(())
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<&Value>) -> Result<T> {
    let params = params.ok_or_else(|| DaemonError::InvalidParams("Missing params".to_string()))?;
    serde_json::from_value(params.clone()).map_err(|e| DaemonError::InvalidParams(e.to_string()))
}

async fn require_registered(ctx: &HandlerContext<'_>) -> Result<()> {
    if !ctx.is_registered().await {
        return Err(DaemonError::NotRegistered);
    }
    Ok(())
}

async fn require_control(ctx: &HandlerContext<'_>) -> Result<()> {
    let client = ctx.client().await.ok_or(DaemonError::NotRegistered)?;
    match client.binding {
        Binding::Control => Ok(()),
        Binding::Pending => Err(DaemonError::NotRegistered),
        Binding::Operator(_) | Binding::Viewer(_) => Err(DaemonError::NotAuthorized),
    }
}

/// The live session this connection is bound to.
async fn require_session(ctx: &HandlerContext<'_>) -> Result<(ClientInfo, SessionHandle)> {
    let client = ctx.client().await.ok_or(DaemonError::NotRegistered)?;
    match &client.binding {
        Binding::Operator(handle) | Binding::Viewer(handle) => {
            if handle.is_closed() {
                return Err(DaemonError::SessionClosed);
            }
            let handle = handle.clone();
            Ok((client, handle))
        }
        Binding::Control => Err(DaemonError::NotAuthorized),
        Binding::Pending => Err(DaemonError::NotRegistered),
    }
}

async fn handle_status(ctx: &HandlerContext<'_>) -> Result<Value> {
    require_registered(ctx).await?;
    let (registry, connections) = {
        let state = ctx.state.read().await;
        (state.registry.clone(), state.clients.len())
    };

    let status = StatusResult {
        sessions: registry.count().await,
        connections,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    Ok(serde_json::to_value(status)?)
}

async fn handle_list_sessions(ctx: &HandlerContext<'_>) -> Result<Value> {
    require_control(ctx).await?;
    let registry = ctx.state.read().await.registry.clone();

    let mut summaries = Vec::new();
    for handle in registry.list().await {
        match handle.summary().await {
            Ok(summary) => summaries.push(summary),
            Err(e) => trace!("Skipping session {}: {e}", handle.pin()),
        }
    }
    Ok(serde_json::to_value(summaries)?)
}

/// The server stops accepting once this succeeds.
async fn handle_shutdown(ctx: &HandlerContext<'_>) -> Result<Value> {
    require_control(ctx).await?;
    ctx.state.write().await.shutdown = true;
    Ok(serde_json::json!({ "ok": true }))
}
