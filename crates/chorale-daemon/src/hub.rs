//! Connection hub: one task per live session.
//!
//! The task owns the [`Session`] together with its operator and viewer
//! connections, and is the only place either is touched. Joins, mutations and
//! disconnects arrive as [`HubCommand`]s on a single queue, so a joining viewer
//! always sees the state strictly before or strictly after any mutation, and
//! deltas fan out in the order the operator issued them.
//!
//! The task also owns the two timers that drive the session on its own: the
//! operator grace period and the active countdown's deadline.

use std::collections::HashMap;
use std::time::Duration;

use chorale_core::config::HubConfig;
use chorale_core::{Delta, Mutation, Session, SessionSnapshot, SessionSummary, now_millis};
use chorale_rpc::protocol::{CloseReason, Message, Notification, SessionEndedParams, methods};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::connection::{ConnectionHandle, Outbound};
use crate::error::{DaemonError, Result};
use crate::registry::SessionRegistry;
use crate::session::ConnectionId;

pub(crate) enum HubCommand {
    OperatorConnect {
        connection: ConnectionHandle,
        reply: oneshot::Sender<SessionSnapshot>,
    },
    ViewerJoin {
        connection: ConnectionHandle,
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Mutate {
        connection_id: ConnectionId,
        mutation: Mutation,
        reply: oneshot::Sender<Result<Delta>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Summary {
        reply: oneshot::Sender<SessionSummary>,
    },
    Disconnect {
        connection_id: ConnectionId,
    },
}

/// Address of a running session task
#[derive(Clone)]
pub struct SessionHandle {
    id: u64,
    pin: String,
    tx: mpsc::Sender<HubCommand>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("pin", &self.pin)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn pin(&self) -> &str {
        &self.pin
    }

    /// The session task has exited (grace period ran out).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> HubCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| DaemonError::SessionClosed)?;
        rx.await.map_err(|_| DaemonError::SessionClosed)
    }

    /// Attach `connection` as the operator, replacing any attached one.
    ///
    /// # Errors
    ///
    /// Returns `SessionClosed` if the session already ended.
    pub async fn operator_connect(&self, connection: ConnectionHandle) -> Result<SessionSnapshot> {
        self.call(|reply| HubCommand::OperatorConnect { connection, reply })
            .await
    }

    /// Subscribe `connection` and return the snapshot it starts from.
    ///
    /// Every delta later pushed to the connection has a `seq` greater than the
    /// snapshot's.
    ///
    /// # Errors
    ///
    /// Returns `SessionClosed` if the session already ended.
    pub async fn viewer_join(&self, connection: ConnectionHandle) -> Result<SessionSnapshot> {
        self.call(|reply| HubCommand::ViewerJoin { connection, reply })
            .await
    }

    /// # Errors
    ///
    /// Returns `NotAuthorized` unless `connection_id` is the attached operator,
    /// or the session's validation error.
    pub async fn mutate(&self, connection_id: ConnectionId, mutation: Mutation) -> Result<Delta> {
        self.call(|reply| HubCommand::Mutate {
            connection_id,
            mutation,
            reply,
        })
        .await?
    }

    /// # Errors
    ///
    /// Returns `SessionClosed` if the session already ended.
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.call(|reply| HubCommand::Snapshot { reply }).await
    }

    /// # Errors
    ///
    /// Returns `SessionClosed` if the session already ended.
    pub async fn summary(&self) -> Result<SessionSummary> {
        self.call(|reply| HubCommand::Summary { reply }).await
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) {
        if self
            .tx
            .send(HubCommand::Disconnect { connection_id })
            .await
            .is_err()
        {
            trace!("Session {} already closed", self.pin);
        }
    }

    #[cfg(test)]
    pub(crate) fn closed_for_test(pin: &str) -> Self {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        Self {
            id: 0,
            pin: pin.to_string(),
            tx,
        }
    }
}

/// Maps tokio time onto wall-clock milliseconds, so tool anchors stay
/// wall-clock based while timers follow the runtime clock.
#[derive(Debug, Clone, Copy)]
struct HubClock {
    origin: Instant,
    origin_ms: u64,
}

impl HubClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_ms: now_millis(),
        }
    }

    fn now_ms(self) -> u64 {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.origin_ms.saturating_add(elapsed)
    }

    fn instant_at(self, ms: u64) -> Instant {
        self.origin + Duration::from_millis(ms.saturating_sub(self.origin_ms))
    }
}

/// Start the task for a new session.
pub(crate) fn spawn(
    id: u64,
    pin: String,
    config: HubConfig,
    registry: SessionRegistry,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
    let handle = SessionHandle {
        id,
        pin: pin.clone(),
        tx,
    };

    let grace_period = Duration::from_millis(config.grace_period_ms);
    let hub = Hub {
        id,
        session: Session::new(pin),
        grace_period,
        registry,
        clock: HubClock::new(),
        operator: None,
        viewers: HashMap::new(),
        // Nobody is attached until the creating operator's connect arrives
        grace_deadline: Some(Instant::now() + grace_period),
    };
    tokio::spawn(hub.run(rx));

    handle
}

struct Hub {
    id: u64,
    session: Session,
    grace_period: Duration,
    registry: SessionRegistry,
    clock: HubClock,
    operator: Option<ConnectionHandle>,
    viewers: HashMap<ConnectionId, ConnectionHandle>,
    grace_deadline: Option<Instant>,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Hub {
    async fn run(mut self, mut rx: mpsc::Receiver<HubCommand>) {
        debug!("[{}] session task started", self.session.pin());

        loop {
            let grace_deadline = self.grace_deadline;
            let tool_deadline = self
                .session
                .next_tool_deadline_ms()
                .map(|ms| self.clock.instant_at(ms));

            tokio::select! {
                command = rx.recv() => {
                    let Some(command) = command else { break };
                    self.handle(command);
                }
                () = sleep_until(grace_deadline) => {
                    self.end(&mut rx).await;
                    break;
                }
                () = sleep_until(tool_deadline) => self.expire_tool(),
            }
        }

        debug!("[{}] session task ended", self.session.pin());
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::OperatorConnect { connection, reply } => {
                self.operator_connect(connection);
                let _ = reply.send(self.session.snapshot());
            }
            HubCommand::ViewerJoin { connection, reply } => {
                let snapshot = self.viewer_join(connection);
                let _ = reply.send(snapshot);
            }
            HubCommand::Mutate {
                connection_id,
                mutation,
                reply,
            } => {
                let result = self.mutate(&connection_id, mutation);
                let _ = reply.send(result);
            }
            HubCommand::Snapshot { reply } => {
                let _ = reply.send(self.session.snapshot());
            }
            HubCommand::Summary { reply } => {
                let _ = reply.send(self.summary());
            }
            HubCommand::Disconnect { connection_id } => self.disconnect(&connection_id),
        }
    }

    fn operator_connect(&mut self, connection: ConnectionHandle) {
        let pin = self.session.pin().to_string();

        if let Some(previous) = self.operator.take()
            && previous.id != connection.id
        {
            info!(
                "[{pin}] operator {} replaced by {}",
                previous.id, connection.id
            );
            previous.send(Outbound::Close(CloseReason::ReplacedByNewOperator));
        }

        if self.grace_deadline.take().is_some() {
            info!("[{pin}] operator {} attached", connection.id);
        }
        self.operator = Some(connection);
    }

    fn viewer_join(&mut self, connection: ConnectionHandle) -> SessionSnapshot {
        debug!(
            "[{}] viewer {} joined",
            self.session.pin(),
            connection.id
        );
        let joined = connection.id.clone();
        self.viewers.insert(joined.clone(), connection);
        let delta = self.session.set_viewer_count(self.viewers.len());
        let snapshot = self.session.snapshot();

        // The joiner's snapshot already includes this delta
        self.fan_out(&delta, true, Some(&joined));
        snapshot
    }

    fn mutate(&mut self, connection_id: &ConnectionId, mutation: Mutation) -> Result<Delta> {
        let is_operator = self
            .operator
            .as_ref()
            .is_some_and(|op| &op.id == connection_id);
        if !is_operator {
            warn!(
                "[{}] rejecting {} from non-operator {connection_id}",
                self.session.pin(),
                mutation.name()
            );
            return Err(DaemonError::NotAuthorized);
        }

        let name = mutation.name();
        let delta = self.session.apply(mutation, self.clock.now_ms())?;
        debug!(
            "[{}] applied {name}, seq={}",
            self.session.pin(),
            delta.seq
        );
        self.broadcast(&delta, false);
        Ok(delta)
    }

    fn summary(&self) -> SessionSummary {
        let state = self.session.state();
        SessionSummary {
            pin: state.pin.clone(),
            seq: state.seq,
            viewer_count: self.viewers.len(),
            operator_attached: self.operator.is_some(),
            content_id: state.active_content.id().map(str::to_string),
        }
    }

    fn disconnect(&mut self, connection_id: &ConnectionId) {
        let pin = self.session.pin().to_string();

        if self
            .operator
            .as_ref()
            .is_some_and(|op| &op.id == connection_id)
        {
            self.operator = None;
            self.grace_deadline = Some(Instant::now() + self.grace_period);
            info!(
                "[{pin}] operator left, ending session in {}ms unless it returns",
                self.grace_period.as_millis()
            );
            return;
        }

        if self.viewers.remove(connection_id).is_some() {
            debug!("[{pin}] viewer {connection_id} left");
            let delta = self.session.set_viewer_count(self.viewers.len());
            self.broadcast(&delta, true);
        }
    }

    fn expire_tool(&mut self) {
        if let Some(delta) = self.session.expire_tool(self.clock.now_ms()) {
            debug!("[{}] countdown expired", self.session.pin());
            self.broadcast(&delta, true);
        }
    }

    fn broadcast(&mut self, delta: &Delta, to_operator: bool) {
        self.fan_out(delta, to_operator, None);
    }

    /// Push `delta` to every viewer but `skip` (and to the operator for deltas it
    /// didn't ask for). Viewers whose queue is full or gone are dropped, and the
    /// shrunken count is broadcast in turn.
    fn fan_out(&mut self, delta: &Delta, to_operator: bool, skip: Option<&ConnectionId>) {
        let message = match serde_json::to_value(delta) {
            Ok(params) => Message::Notification(Notification::new(methods::DELTA, Some(params))),
            Err(e) => {
                warn!("Failed to serialize delta {}: {e}", delta.seq);
                return;
            }
        };

        trace!(
            "[{}] fan-out seq={} to {} viewers",
            self.session.pin(),
            delta.seq,
            self.viewers.len()
        );

        let dropped: Vec<ConnectionId> = self
            .viewers
            .values()
            .filter(|viewer| Some(&viewer.id) != skip)
            .filter(|viewer| !viewer.send_message(message.clone()))
            .map(|viewer| viewer.id.clone())
            .collect();

        if to_operator && let Some(operator) = &self.operator {
            operator.send_message(message);
        }

        if dropped.is_empty() {
            return;
        }
        for id in &dropped {
            warn!("[{}] dropping slow viewer {id}", self.session.pin());
            self.viewers.remove(id);
        }
        let delta = self.session.set_viewer_count(self.viewers.len());
        self.broadcast(&delta, true);
    }

    async fn end(&mut self, rx: &mut mpsc::Receiver<HubCommand>) {
        let pin = self.session.pin().to_string();
        info!("[{pin}] no operator for {}ms, ending session", self.grace_period.as_millis());

        // Handles must read as closed before any viewer learns the session ended
        rx.close();

        let params = serde_json::to_value(SessionEndedParams { pin: pin.clone() }).ok();
        for viewer in self.viewers.values() {
            viewer.send_message(Message::Notification(Notification::new(
                methods::SESSION_ENDED,
                params.clone(),
            )));
            viewer.send(Outbound::Close(CloseReason::SessionEnded));
        }
        self.viewers.clear();

        self.registry.remove(&pin, self.id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorale_core::{Content, Slide, SongContent, Tool};
    use serde_json::Value;

    const GRACE_MS: u64 = 1_000;

    fn config() -> HubConfig {
        HubConfig {
            grace_period_ms: GRACE_MS,
            ..HubConfig::default()
        }
    }

    fn song() -> Content {
        Content::Song(SongContent {
            id: "song-1".to_string(),
            title: "Test Song".to_string(),
            slides: vec![
                Slide::new("Verse1", "a"),
                Slide::new("Chorus", "b"),
                Slide::new("Verse2", "c"),
            ],
            ..Default::default()
        })
    }

    fn connection(buffer: usize) -> (ConnectionHandle, mpsc::Receiver<Outbound>) {
        ConnectionHandle::new(ConnectionId::new(), buffer)
    }

    async fn next_notification(rx: &mut mpsc::Receiver<Outbound>) -> (String, Value) {
        match rx.recv().await {
            Some(Outbound::Message(message)) => {
                let (method, params) = message.into_notification().unwrap();
                (method, params.unwrap_or(Value::Null))
            }
            other => panic!("Expected notification, got {other:?}"),
        }
    }

    async fn live_session(registry: &SessionRegistry) -> (SessionHandle, ConnectionHandle) {
        let (session, _) = registry.create_or_get(Some("4821")).await.unwrap();
        let (operator, _rx) = connection(16);
        session.operator_connect(operator.clone()).await.unwrap();
        (session, operator)
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewer_join_gets_snapshot_and_deltas() {
        let registry = SessionRegistry::new(config());
        let (session, operator) = live_session(&registry).await;

        let (viewer, mut viewer_rx) = connection(16);
        let snapshot = session.viewer_join(viewer).await.unwrap();
        assert_eq!(snapshot.viewer_count, 1);
        assert_eq!(snapshot.seq, 1);

        let delta = session
            .mutate(operator.id.clone(), Mutation::SetContent { content: song() })
            .await
            .unwrap();
        assert_eq!(delta.seq, 2);

        let (method, params) = next_notification(&mut viewer_rx).await;
        assert_eq!(method, methods::DELTA);
        assert_eq!(params["seq"], 2);
        assert_eq!(params["type"], "content_frame");
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_from_viewer_is_rejected() {
        let registry = SessionRegistry::new(config());
        let (session, _operator) = live_session(&registry).await;

        let (viewer, _viewer_rx) = connection(16);
        session.viewer_join(viewer.clone()).await.unwrap();

        let err = session
            .mutate(viewer.id.clone(), Mutation::SetContent { content: song() })
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::NotAuthorized));

        let snapshot = session.snapshot().await.unwrap();
        assert_eq!(snapshot.active_content, Content::None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_mutation_leaves_state_unchanged() {
        let registry = SessionRegistry::new(config());
        let (session, operator) = live_session(&registry).await;
        session
            .mutate(operator.id.clone(), Mutation::SetContent { content: song() })
            .await
            .unwrap();
        let before = session.snapshot().await.unwrap();

        let err = session
            .mutate(
                operator.id.clone(),
                Mutation::SetCursor {
                    slide_index: 9,
                    is_blank: false,
                    display_mode: chorale_core::DisplayMode::Bilingual,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DaemonError::Core(chorale_core::Error::OutOfRange { index: 9, len: 3 })
        ));
        assert_eq!(session.snapshot().await.unwrap(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_operator_replaces_first() {
        let registry = SessionRegistry::new(config());
        let (session, _) = registry.create_or_get(Some("4821")).await.unwrap();

        let (first, mut first_rx) = connection(16);
        let (second, _second_rx) = connection(16);
        session.operator_connect(first.clone()).await.unwrap();
        session.operator_connect(second.clone()).await.unwrap();

        assert!(matches!(
            first_rx.recv().await,
            Some(Outbound::Close(CloseReason::ReplacedByNewOperator))
        ));

        let err = session
            .mutate(first.id.clone(), Mutation::StopTool)
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::NotAuthorized));
        assert!(
            session
                .mutate(second.id.clone(), Mutation::StopTool)
                .await
                .is_ok()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_ends_session() {
        let registry = SessionRegistry::new(config());
        let (session, operator) = live_session(&registry).await;
        let (viewer, mut viewer_rx) = connection(16);
        session.viewer_join(viewer).await.unwrap();

        session.disconnect(operator.id.clone()).await;
        tokio::time::sleep(Duration::from_millis(GRACE_MS + 1)).await;

        let (method, params) = next_notification(&mut viewer_rx).await;
        assert_eq!(method, methods::SESSION_ENDED);
        assert_eq!(params["pin"], "4821");
        assert!(matches!(
            viewer_rx.recv().await,
            Some(Outbound::Close(CloseReason::SessionEnded))
        ));

        assert!(registry.lookup("4821").await.is_none());
        assert!(session.is_closed());
        assert!(matches!(
            session.snapshot().await,
            Err(DaemonError::SessionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_return_cancels_grace_period() {
        let registry = SessionRegistry::new(config());
        let (session, operator) = live_session(&registry).await;
        session
            .mutate(operator.id.clone(), Mutation::SetContent { content: song() })
            .await
            .unwrap();

        session.disconnect(operator.id.clone()).await;
        tokio::time::sleep(Duration::from_millis(GRACE_MS / 2)).await;

        // A restarted app comes back with a different connection id
        let (returning, mut returning_rx) = connection(16);
        let snapshot = session.operator_connect(returning).await.unwrap();
        assert_eq!(snapshot.active_content.id(), Some("song-1"));

        tokio::time::sleep(Duration::from_millis(GRACE_MS * 2)).await;
        assert!(registry.lookup("4821").await.is_some());
        assert!(returning_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_without_operator_ends() {
        let registry = SessionRegistry::new(config());
        let (session, _) = registry.create_or_get(Some("9999")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(GRACE_MS + 1)).await;
        assert!(session.is_closed());
        assert!(registry.lookup("9999").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_expiry_is_broadcast() {
        let registry = SessionRegistry::new(config());
        let (session, operator) = live_session(&registry).await;
        let (viewer, mut viewer_rx) = connection(16);
        session.viewer_join(viewer).await.unwrap();

        session
            .mutate(
                operator.id.clone(),
                Mutation::StartTool {
                    tool: Tool::Countdown {
                        duration_ms: 5_000,
                        label: None,
                    },
                },
            )
            .await
            .unwrap();
        let (_, started) = next_notification(&mut viewer_rx).await;
        assert!(started["activeTool"].get("expired").is_none());

        tokio::time::sleep(Duration::from_millis(5_001)).await;

        let (method, expired) = next_notification(&mut viewer_rx).await;
        assert_eq!(method, methods::DELTA);
        assert_eq!(expired["type"], "tool_frame");
        assert_eq!(expired["activeTool"]["expired"], true);

        let snapshot = session.snapshot().await.unwrap();
        assert!(snapshot.active_tool.unwrap().expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_viewer_is_dropped() {
        let registry = SessionRegistry::new(config());
        let (session, operator) = live_session(&registry).await;

        let (slow, _slow_rx) = connection(1);
        let (steady, mut steady_rx) = connection(16);
        session.viewer_join(steady).await.unwrap();
        session.viewer_join(slow.clone()).await.unwrap();
        // steady saw the count go to 2
        let (_, count) = next_notification(&mut steady_rx).await;
        assert_eq!(count["viewerCount"], 2);

        for _ in 0..2 {
            session
                .mutate(operator.id.clone(), Mutation::StopTool)
                .await
                .unwrap();
        }

        assert_eq!(slow.drop_count(), 1);
        let summary = session.summary().await.unwrap();
        assert_eq!(summary.viewer_count, 1);

        // Two tool frames, then the shrunken count
        next_notification(&mut steady_rx).await;
        next_notification(&mut steady_rx).await;
        let (_, count) = next_notification(&mut steady_rx).await;
        assert_eq!(count["type"], "viewer_count");
        assert_eq!(count["viewerCount"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewer_disconnect_updates_count() {
        let registry = SessionRegistry::new(config());
        let (session, _operator) = live_session(&registry).await;
        let (a, mut a_rx) = connection(16);
        let (b, _b_rx) = connection(16);
        session.viewer_join(a).await.unwrap();
        session.viewer_join(b.clone()).await.unwrap();
        next_notification(&mut a_rx).await;

        session.disconnect(b.id.clone()).await;
        let (_, params) = next_notification(&mut a_rx).await;
        assert_eq!(params["viewerCount"], 1);

        // A second disconnect for the same id is ignored
        session.disconnect(b.id.clone()).await;
        assert_eq!(session.summary().await.unwrap().viewer_count, 1);
    }
}
