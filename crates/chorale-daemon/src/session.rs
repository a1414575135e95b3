//! Per-connection client state.

use serde::{Deserialize, Serialize};

use crate::hub::SessionHandle;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What a connection registered as
#[derive(Debug, Clone)]
pub enum Binding {
    Pending,
    Operator(SessionHandle),
    Viewer(SessionHandle),
    Control,
}

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: ConnectionId,
    pub binding: Binding,
}

impl ClientInfo {
    #[must_use]
    pub fn with_id(id: ConnectionId) -> Self {
        Self {
            id,
            binding: Binding::Pending,
        }
    }

    /// Bound session, if it is still live.
    ///
    /// A viewer whose session ended stays connected and may register again.
    #[must_use]
    pub fn session(&self) -> Option<&SessionHandle> {
        match &self.binding {
            Binding::Operator(handle) | Binding::Viewer(handle) if !handle.is_closed() => {
                Some(handle)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        match self.binding {
            Binding::Pending => false,
            Binding::Control => true,
            Binding::Operator(_) | Binding::Viewer(_) => self.session().is_some(),
        }
    }

    #[must_use]
    pub fn is_operator(&self) -> bool {
        matches!(self.binding, Binding::Operator(_))
    }

    #[must_use]
    pub fn is_control(&self) -> bool {
        matches!(self.binding, Binding::Control)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::from("conn-1");
        assert_eq!(id.to_string(), "conn-1");
        assert_eq!(id.as_str(), "conn-1");
    }

    #[test]
    fn test_client_info_starts_pending() {
        let info = ClientInfo::with_id(ConnectionId::new());
        assert!(!info.is_registered());
        assert!(info.session().is_none());
    }

    #[test]
    fn test_control_is_registered() {
        let mut info = ClientInfo::with_id(ConnectionId::new());
        info.binding = Binding::Control;
        assert!(info.is_registered());
        assert!(info.is_control());
        assert!(!info.is_operator());
    }

    #[test]
    fn test_binding_to_closed_session_is_not_registered() {
        let handle = SessionHandle::closed_for_test("4821");
        let mut info = ClientInfo::with_id(ConnectionId::new());
        info.binding = Binding::Viewer(handle);
        assert!(!info.is_registered());
        assert!(info.session().is_none());
    }
}
