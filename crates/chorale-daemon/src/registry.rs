//! Session registry: the process-wide PIN table.
//!
//! The table is the only state shared between sessions. It is touched to
//! create, look up and remove sessions, never for per-session state, which
//! lives in each session's hub task.

use std::collections::HashMap;
use std::sync::Arc;

use chorale_core::config::HubConfig;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{DaemonError, Result};
use crate::hub::{self, SessionHandle};

const MAX_PIN_ATTEMPTS: usize = 64;
const MAX_PIN_CHARS: usize = 32;

struct RegistryInner {
    sessions: HashMap<String, SessionHandle>,
    config: HubConfig,
    next_id: u64,
}

#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                sessions: HashMap::new(),
                config,
                next_id: 1,
            })),
        }
    }

    /// Return the live session for `pin`, creating it if there is none.
    ///
    /// Without a PIN a fresh one is generated. Concurrent calls for the same PIN
    /// get the same session. The flag is `true` when the session was created.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPin` for an unusable PIN or when no free PIN can be found.
    pub async fn create_or_get(&self, pin: Option<&str>) -> Result<(SessionHandle, bool)> {
        let mut inner = self.inner.write().await;

        let pin = match pin {
            Some(pin) => validate_pin(pin)?,
            None => generate_pin(&inner)?,
        };

        if let Some(existing) = inner.sessions.get(&pin)
            && !existing.is_closed()
        {
            return Ok((existing.clone(), false));
        }

        let id = inner.next_id;
        inner.next_id += 1;
        let handle = hub::spawn(id, pin.clone(), inner.config.clone(), self.clone());
        inner.sessions.insert(pin.clone(), handle.clone());
        info!("Session {pin} created");

        Ok((handle, true))
    }

    pub async fn lookup(&self, pin: &str) -> Option<SessionHandle> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .get(pin.trim())
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    /// Remove `pin` if it still belongs to session `id`. A session created
    /// later under the same PIN is left alone.
    pub async fn remove(&self, pin: &str, id: u64) {
        let mut inner = self.inner.write().await;
        if inner.sessions.get(pin).is_some_and(|h| h.id() == id) {
            inner.sessions.remove(pin);
            info!("Session {pin} removed");
        }
    }

    /// Live sessions, ordered by PIN.
    pub async fn list(&self) -> Vec<SessionHandle> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<SessionHandle> = inner
            .sessions
            .values()
            .filter(|handle| !handle.is_closed())
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.pin().cmp(b.pin()));
        sessions
    }

    pub async fn count(&self) -> usize {
        self.list().await.len()
    }

    /// Settings for sessions created from now on.
    pub async fn update_config(&self, config: HubConfig) {
        let mut inner = self.inner.write().await;
        if inner.config != config {
            debug!("Hub config updated: {config:?}");
            inner.config = config;
        }
    }

    pub async fn config(&self) -> HubConfig {
        self.inner.read().await.config.clone()
    }
}

fn validate_pin(pin: &str) -> Result<String> {
    let pin = pin.trim();
    let valid = !pin.is_empty()
        && pin.len() <= MAX_PIN_CHARS
        && pin
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(pin.to_string())
    } else {
        Err(DaemonError::Core(chorale_core::Error::InvalidPin(
            pin.to_string(),
        )))
    }
}

fn generate_pin(inner: &RegistryInner) -> Result<String> {
    let length = inner.config.pin_length;
    let modulus = u32::try_from(length)
        .ok()
        .and_then(|exp| 10u128.checked_pow(exp))
        .ok_or_else(|| DaemonError::Core(chorale_core::Error::InvalidPin(format!(
            "cannot generate a {length}-digit PIN"
        ))))?;

    for _ in 0..MAX_PIN_ATTEMPTS {
        let n = uuid::Uuid::new_v4().as_u128() % modulus;
        let pin = format!("{n:0length$}");
        if inner.sessions.get(&pin).is_none_or(SessionHandle::is_closed) {
            return Ok(pin);
        }
    }

    Err(DaemonError::Core(chorale_core::Error::InvalidPin(format!(
        "no free {length}-digit PIN"
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(HubConfig::default())
    }

    #[tokio::test]
    async fn test_create_or_get_is_idempotent() {
        let registry = registry();
        let (first, created) = registry.create_or_get(Some("4821")).await.unwrap();
        assert!(created);
        let (second, created) = registry.create_or_get(Some("4821")).await.unwrap();
        assert!(!created);
        assert_eq!(first.id(), second.id());
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_create_yields_one_session() {
        let registry = registry();
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.create_or_get(Some("7777")).await })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            let (handle, _) = task.await.unwrap().unwrap();
            ids.push(handle.id());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_lookup_missing_pin() {
        let registry = registry();
        assert!(registry.lookup("4821").await.is_none());
    }

    #[tokio::test]
    async fn test_lookup_trims_pin() {
        let registry = registry();
        registry.create_or_get(Some("4821")).await.unwrap();
        assert!(registry.lookup(" 4821 ").await.is_some());
    }

    #[tokio::test]
    async fn test_remove_ignores_stale_id() {
        let registry = registry();
        let (handle, _) = registry.create_or_get(Some("4821")).await.unwrap();

        registry.remove("4821", handle.id() + 100).await;
        assert!(registry.lookup("4821").await.is_some());

        registry.remove("4821", handle.id()).await;
        assert!(registry.lookup("4821").await.is_none());
    }

    #[tokio::test]
    async fn test_generated_pin_uses_configured_length() {
        let registry = SessionRegistry::new(HubConfig {
            pin_length: 6,
            ..HubConfig::default()
        });
        let (handle, created) = registry.create_or_get(None).await.unwrap();
        assert!(created);
        assert_eq!(handle.pin().len(), 6);
        assert!(handle.pin().chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_generated_pins_are_unique_among_live_sessions() {
        let registry = registry();
        let mut pins = std::collections::HashSet::new();
        for _ in 0..20 {
            let (handle, _) = registry.create_or_get(None).await.unwrap();
            assert!(pins.insert(handle.pin().to_string()));
        }
    }

    #[tokio::test]
    async fn test_invalid_pin_rejected() {
        let registry = registry();
        for pin in ["", "   ", "48 21", "pin/with/slash"] {
            let err = registry.create_or_get(Some(pin)).await.unwrap_err();
            assert!(matches!(
                err,
                DaemonError::Core(chorale_core::Error::InvalidPin(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_update_config_applies_to_new_sessions() {
        let registry = registry();
        registry
            .update_config(HubConfig {
                pin_length: 8,
                ..HubConfig::default()
            })
            .await;
        assert_eq!(registry.config().await.pin_length, 8);

        let (handle, _) = registry.create_or_get(None).await.unwrap();
        assert_eq!(handle.pin().len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_session_reads_closed_before_viewers_hear() {
        use crate::connection::{ConnectionHandle, Outbound};
        use crate::session::{Binding, ClientInfo, ConnectionId};

        let registry = SessionRegistry::new(HubConfig {
            grace_period_ms: 1_000,
            ..HubConfig::default()
        });
        let (session, _) = registry.create_or_get(Some("4821")).await.unwrap();
        let (viewer, mut viewer_rx) = ConnectionHandle::new(ConnectionId::new(), 16);
        session.viewer_join(viewer.clone()).await.unwrap();
        let info = ClientInfo {
            id: viewer.id.clone(),
            binding: Binding::Viewer(session.clone()),
        };

        // Keep the table busy so the ending session cannot drop its entry yet
        let table = registry.inner.write().await;
        tokio::time::sleep(Duration::from_millis(1_001)).await;

        assert!(matches!(viewer_rx.recv().await, Some(Outbound::Message(_))));
        assert!(session.is_closed());
        assert!(!info.is_registered());
        drop(table);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(registry.lookup("4821").await.is_none());
        let (fresh, created) = registry.create_or_get(Some("4821")).await.unwrap();
        assert!(created);
        assert_ne!(fresh.id(), session.id());
    }

    #[tokio::test]
    async fn test_list_sorted_by_pin() {
        let registry = registry();
        for pin in ["3000", "1000", "2000"] {
            registry.create_or_get(Some(pin)).await.unwrap();
        }
        let pins: Vec<String> = registry
            .list()
            .await
            .iter()
            .map(|h| h.pin().to_string())
            .collect();
        assert_eq!(pins, ["1000", "2000", "3000"]);
    }
}
