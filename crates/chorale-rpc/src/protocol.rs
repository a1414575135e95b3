//! JSON-RPC 2.0 protocol types.
//!
//! Message envelopes, error codes and the request/notification payloads spoken
//! between the daemon and its clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use chorale_types::{Mutation, SessionSnapshot};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const NOT_REGISTERED: i32 = -32000;
pub const ALREADY_REGISTERED: i32 = -32001;
pub const SESSION_NOT_FOUND: i32 = -32002;
pub const NOT_AUTHORIZED: i32 = -32003;
pub const INVALID_CONTENT: i32 = -32004;
pub const OUT_OF_RANGE: i32 = -32005;
pub const INVALID_TOOL_UPDATE: i32 = -32006;
pub const SESSION_CLOSED: i32 = -32007;

/// Method names used on the wire
pub mod methods {
    pub const REGISTER: &str = "register";
    pub const MUTATE: &str = "mutate";
    pub const SNAPSHOT: &str = "snapshot";
    pub const STATUS: &str = "status";
    pub const LIST_SESSIONS: &str = "list_sessions";
    pub const SHUTDOWN: &str = "shutdown";

    // Daemon -> client notifications
    pub const DELTA: &str = "delta";
    pub const CLOSED: &str = "closed";
    pub const SESSION_ENDED: &str = "session_ended";
}

/// JSON-RPC 2.0 Request ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// JSON-RPC 2.0 Request. Without an `id` it is a notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Request {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(id),
        }
    }

    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: None,
        }
    }
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: RequestId,
}

impl Response {
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    #[must_use]
    pub fn error(id: RequestId, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// JSON-RPC 2.0 Notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 Error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "Parse error")
    }

    #[must_use]
    pub fn invalid_request() -> Self {
        Self::new(INVALID_REQUEST, "Invalid Request")
    }

    #[must_use]
    pub fn method_not_found() -> Self {
        Self::new(METHOD_NOT_FOUND, "Method not found")
    }

    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }

    #[must_use]
    pub fn not_registered() -> Self {
        Self::new(NOT_REGISTERED, "Not registered")
    }

    #[must_use]
    pub fn already_registered() -> Self {
        Self::new(ALREADY_REGISTERED, "Already registered")
    }

    #[must_use]
    pub fn session_not_found(pin: impl Into<String>) -> Self {
        Self::new(
            SESSION_NOT_FOUND,
            format!("Session not found: {}", pin.into()),
        )
    }

    #[must_use]
    pub fn not_authorized() -> Self {
        Self::new(NOT_AUTHORIZED, "Not the operator of this session")
    }

    #[must_use]
    pub fn session_closed() -> Self {
        Self::new(SESSION_CLOSED, "Session closed")
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// Incoming message that could be a request, response, or notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Message {
    /// Parse a JSON string into a `Message`.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or doesn't match any message type.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(r) if r.id.is_some())
    }

    #[must_use]
    pub fn is_notification(&self) -> bool {
        matches!(self, Message::Request(r) if r.id.is_none())
            || matches!(self, Message::Notification(_))
    }

    #[must_use]
    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }

    /// Method name and params of a notification, however it was decoded.
    #[must_use]
    pub fn into_notification(self) -> Option<(String, Option<Value>)> {
        match self {
            Message::Notification(n) => Some((n.method, n.params)),
            Message::Request(r) if r.id.is_none() => Some((r.method, r.params)),
            _ => None,
        }
    }
}

/// Client role for registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRole {
    /// Drives a session. Without a PIN (and with `create`) the daemon generates one.
    Operator {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pin: Option<String>,
        #[serde(default)]
        create: bool,
    },

    /// Mirrors a session
    Viewer { pin: String },

    /// Operations tooling: status, session listing, shutdown
    Control,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterParams {
    pub role: ClientRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStatus {
    Joined,
    /// Nobody is broadcasting on this PIN yet; not an error
    NoActiveSession,
}

/// Registration result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResult {
    pub connection_id: String,

    /// Viewers only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JoinStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SessionSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutateParams {
    pub mutation: Mutation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResult {
    pub sessions: usize,
    pub connections: usize,
    pub version: String,
}

/// Why the daemon is closing a connection's session binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    ReplacedByNewOperator,
    SessionEnded,
    /// The connection's outbound buffer overflowed
    SlowConsumer,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            CloseReason::ReplacedByNewOperator => "replaced by new operator",
            CloseReason::SessionEnded => "session ended",
            CloseReason::SlowConsumer => "slow consumer",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedParams {
    pub reason: CloseReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEndedParams {
    pub pin: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::new("snapshot", Some(serde_json::json!({})), 1.into());
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"snapshot\""));
        assert!(json.contains("\"id\":1"));
    }

    #[test]
    fn test_notification_request_has_no_id() {
        let notif = Request::notification("mutate", None);
        let json = serde_json::to_string(&notif).unwrap();
        assert!(!json.contains("\"id\""));
        assert!(!json.contains("\"params\""));
    }

    #[test]
    fn test_response_error() {
        let resp = Response::error(1.into(), RpcError::not_authorized());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("\"result\""));
        assert!(json.contains("-32003"));
    }

    #[test]
    fn test_request_id_types() {
        let id: RequestId = serde_json::from_str("456").unwrap();
        assert_eq!(id, RequestId::Number(456));
        let id: RequestId = serde_json::from_str("\"xyz\"").unwrap();
        assert_eq!(id, RequestId::from("xyz"));
        assert_eq!(id.to_string(), "xyz");
    }

    #[test]
    fn test_application_error_codes_are_distinct() {
        let codes = [
            NOT_REGISTERED,
            ALREADY_REGISTERED,
            SESSION_NOT_FOUND,
            NOT_AUTHORIZED,
            INVALID_CONTENT,
            OUT_OF_RANGE,
            INVALID_TOOL_UPDATE,
            SESSION_CLOSED,
        ];
        let unique: std::collections::HashSet<i32> = codes.iter().copied().collect();
        assert_eq!(unique.len(), codes.len());
        assert!(codes.iter().all(|c| (-32099..=-32000).contains(c)));
    }

    #[test]
    fn test_session_not_found_message() {
        let err = RpcError::session_not_found("4821");
        assert_eq!(err.code, SESSION_NOT_FOUND);
        assert!(err.message.contains("4821"));
    }

    #[test]
    fn test_message_kinds() {
        let msg = Message::parse(r#"{"jsonrpc":"2.0","method":"status","id":1}"#).unwrap();
        assert!(msg.is_request());

        let msg = Message::parse(r#"{"jsonrpc":"2.0","method":"delta","params":{}}"#).unwrap();
        assert!(msg.is_notification());
        let (method, params) = msg.into_notification().unwrap();
        assert_eq!(method, "delta");
        assert!(params.is_some());

        let msg = Message::parse(r#"{"jsonrpc":"2.0","result":{"ok":true},"id":1}"#).unwrap();
        assert!(msg.is_response());
        assert!(msg.into_notification().is_none());
    }

    #[test]
    fn test_client_role_wire_shape() {
        let role: ClientRole = serde_json::from_str(r#"{"type":"viewer","pin":"4821"}"#).unwrap();
        assert_eq!(
            role,
            ClientRole::Viewer {
                pin: "4821".to_string()
            }
        );

        let role: ClientRole = serde_json::from_str(r#"{"type":"operator"}"#).unwrap();
        assert_eq!(
            role,
            ClientRole::Operator {
                pin: None,
                create: false
            }
        );

        let json = serde_json::to_value(ClientRole::Control).unwrap();
        assert_eq!(json, serde_json::json!({"type": "control"}));
    }

    #[test]
    fn test_register_result_no_active_session() {
        let result = RegisterResult {
            connection_id: "c1".to_string(),
            status: Some(JoinStatus::NoActiveSession),
            pin: Some("4821".to_string()),
            snapshot: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "no_active_session");
        assert_eq!(json["connectionId"], "c1");
        assert!(json.get("snapshot").is_none());
    }

    #[test]
    fn test_closed_params() {
        let params = ClosedParams {
            reason: CloseReason::ReplacedByNewOperator,
        };
        let json = serde_json::to_value(params).unwrap();
        assert_eq!(json["reason"], "replaced_by_new_operator");
        assert_eq!(
            CloseReason::SlowConsumer.to_string(),
            "slow consumer"
        );
    }

    #[test]
    fn test_mutate_params() {
        let params: MutateParams =
            serde_json::from_str(r#"{"mutation":{"type":"stop_tool"}}"#).unwrap();
        assert_eq!(params.mutation, Mutation::StopTool);
    }
}
