use chorale_rpc::protocol::MutateParams;
use serde_json::Value;
use tracing::warn;

use super::{HandlerContext, parse_params, require_session};
use crate::error::{DaemonError, Result};

pub(super) async fn handle_mutate(ctx: &HandlerContext<'_>, params: Option<&Value>) -> Result<Value> {
    let MutateParams { mutation } = parse_params(params)?;
    let (client, session) = require_session(ctx).await?;

    if !client.is_operator() {
        warn!(
            "Viewer {} tried {} on session {}",
            ctx.client_id,
            mutation.name(),
            session.pin()
        );
        return Err(DaemonError::NotAuthorized);
    }

    let delta = session.mutate(ctx.client_id.clone(), mutation).await?;
    Ok(serde_json::to_value(delta)?)
}

pub(super) async fn handle_snapshot(ctx: &HandlerContext<'_>) -> Result<Value> {
    let (_, session) = require_session(ctx).await?;
    let snapshot = session.snapshot().await?;
    Ok(serde_json::to_value(snapshot)?)
}
