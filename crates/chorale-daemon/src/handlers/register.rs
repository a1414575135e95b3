use chorale_core::SessionSnapshot;
use chorale_rpc::protocol::{ClientRole, JoinStatus, RegisterParams, RegisterResult};
use serde_json::Value;
use tracing::{debug, info};

use super::{HandlerContext, parse_params};
use crate::error::{DaemonError, Result};
use crate::hub::SessionHandle;
use crate::session::Binding;

/// A session can end between lookup and attach; retry against the registry.
const ATTACH_ATTEMPTS: usize = 3;

pub(super) async fn handle_register(
    ctx: &HandlerContext<'_>,
    params: Option<&Value>,
) -> Result<Value> {
    let params: RegisterParams = parse_params(params)?;

    if ctx.is_registered().await {
        return Err(DaemonError::AlreadyRegistered);
    }

    let connection_id = ctx.client_id.to_string();
    let result = match params.role {
        ClientRole::Operator { pin, create } => {
            let (handle, snapshot) = attach_operator(ctx, pin.as_deref(), create).await?;
            let pin = handle.pin().to_string();
            ctx.bind(Binding::Operator(handle)).await;
            info!("Operator {} registered for session {pin}", ctx.client_id);

            RegisterResult {
                connection_id,
                status: None,
                pin: Some(pin),
                snapshot: Some(snapshot),
            }
        }
        ClientRole::Viewer { pin } => {
            let pin = pin.trim().to_string();
            match join_viewer(ctx, &pin).await {
                Some((handle, snapshot)) => {
                    ctx.bind(Binding::Viewer(handle)).await;
                    debug!("Viewer {} joined session {pin}", ctx.client_id);
                    RegisterResult {
                        connection_id,
                        status: Some(JoinStatus::Joined),
                        pin: Some(pin),
                        snapshot: Some(snapshot),
                    }
                }
                None => {
                    debug!("Viewer {} waiting: no session {pin}", ctx.client_id);
                    RegisterResult {
                        connection_id,
                        status: Some(JoinStatus::NoActiveSession),
                        pin: Some(pin),
                        snapshot: None,
                    }
                }
            }
        }
        ClientRole::Control => {
            ctx.bind(Binding::Control).await;
            debug!("Control client registered: {}", ctx.client_id);
            RegisterResult {
                connection_id,
                status: None,
                pin: None,
                snapshot: None,
            }
        }
    };

    Ok(serde_json::to_value(result)?)
}

/// Become the operator of `pin`. Without a PIN, or with `create`, the session
/// is created if needed.
async fn attach_operator(
    ctx: &HandlerContext<'_>,
    pin: Option<&str>,
    create: bool,
) -> Result<(SessionHandle, SessionSnapshot)> {
    let registry = ctx.state.read().await.registry.clone();

    let mut last_err = DaemonError::SessionClosed;
    for _ in 0..ATTACH_ATTEMPTS {
        let handle = match pin {
            Some(pin) if !create => registry
                .lookup(pin)
                .await
                .ok_or_else(|| DaemonError::SessionNotFound(pin.to_string()))?,
            _ => registry.create_or_get(pin).await?.0,
        };

        match handle.operator_connect(ctx.connection.clone()).await {
            Ok(snapshot) => return Ok((handle, snapshot)),
            Err(e @ DaemonError::SessionClosed) => {
                debug!("Session {} ended while attaching, retrying", handle.pin());
                last_err = e;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err)
}

/// `None` when nobody is broadcasting on `pin`.
async fn join_viewer(ctx: &HandlerContext<'_>, pin: &str) -> Option<(SessionHandle, SessionSnapshot)> {
    let registry = ctx.state.read().await.registry.clone();
    let handle = registry.lookup(pin).await?;
    let snapshot = handle.viewer_join(ctx.connection.clone()).await.ok()?;
    Some((handle, snapshot))
}
