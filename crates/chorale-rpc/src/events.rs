//! Decoding daemon notifications.

use crate::protocol::{CloseReason, ClosedParams, SessionEndedParams, methods};
use chorale_types::Delta;
use serde_json::Value;
use tracing::warn;

/// A notification pushed by the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Delta(Delta),
    Closed(CloseReason),
    SessionEnded { pin: String },
}

/// Convert a notification method + params into a `ServerEvent`.
///
/// Returns `None` for unknown methods or params that don't match the method.
#[must_use]
pub fn notification_to_event(method: &str, params: Option<Value>) -> Option<ServerEvent> {
    let params = params.unwrap_or(Value::Null);

    let event = match method {
        methods::DELTA => serde_json::from_value(params).map(ServerEvent::Delta),
        methods::CLOSED => {
            serde_json::from_value::<ClosedParams>(params).map(|p| ServerEvent::Closed(p.reason))
        }
        methods::SESSION_ENDED => serde_json::from_value::<SessionEndedParams>(params)
            .map(|p| ServerEvent::SessionEnded { pin: p.pin }),
        other => {
            warn!("Ignoring unknown notification: {other}");
            return None;
        }
    };

    event
        .inspect_err(|e| warn!("Malformed '{method}' notification: {e}"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorale_types::Change;
    use serde_json::json;

    #[test]
    fn test_delta_notification() {
        let event = notification_to_event(
            "delta",
            Some(json!({"seq": 3, "type": "viewer_count", "viewerCount": 2})),
        );
        assert_eq!(
            event,
            Some(ServerEvent::Delta(Delta {
                seq: 3,
                change: Change::ViewerCount { viewer_count: 2 },
            }))
        );
    }

    #[test]
    fn test_closed_notification() {
        let event = notification_to_event("closed", Some(json!({"reason": "slow_consumer"})));
        assert_eq!(event, Some(ServerEvent::Closed(CloseReason::SlowConsumer)));
    }

    #[test]
    fn test_session_ended_notification() {
        let event = notification_to_event("session_ended", Some(json!({"pin": "4821"})));
        assert_eq!(
            event,
            Some(ServerEvent::SessionEnded {
                pin: "4821".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_or_malformed() {
        assert!(notification_to_event("bogus", None).is_none());
        assert!(notification_to_event("delta", None).is_none());
        assert!(notification_to_event("closed", Some(json!({"reason": "bored"}))).is_none());
    }
}
