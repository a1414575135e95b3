//! Error types for the chorale daemon.

use chorale_rpc::protocol::{self, RpcError};

/// Errors that can occur in the daemon
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Client not registered
    #[error("Client not registered")]
    NotRegistered,

    /// Client already registered
    #[error("Client already registered")]
    AlreadyRegistered,

    /// No live session for this PIN
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Connection is not the session's current operator
    #[error("Not the operator of this session")]
    NotAuthorized,

    /// The session task has shut down
    #[error("Session closed")]
    SessionClosed,

    /// Session state rejected a mutation
    #[error("Core error: {0}")]
    Core(#[from] chorale_core::Error),

    /// Codec error
    #[error("Codec error: {0}")]
    Codec(#[from] chorale_rpc::transport::CodecError),

    /// Invalid parameters
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Method not found
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// File watcher error
    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),
}

fn core_error_code(err: &chorale_core::Error) -> i32 {
    use chorale_core::Error;
    match err {
        Error::InvalidContent(_) => protocol::INVALID_CONTENT,
        Error::OutOfRange { .. } | Error::UnknownSlideCode(_) => protocol::OUT_OF_RANGE,
        Error::NoActiveTool | Error::InvalidToolUpdate(_) => protocol::INVALID_TOOL_UPDATE,
        Error::InvalidPin(_) => protocol::INVALID_PARAMS,
        Error::Io(_) | Error::Json(_) | Error::Config(_) => protocol::INTERNAL_ERROR,
    }
}

impl From<DaemonError> for RpcError {
    fn from(err: DaemonError) -> Self {
        match err {
            DaemonError::Io(e) => RpcError::internal_error(e.to_string()),
            DaemonError::Json(e) => RpcError::internal_error(e.to_string()),
            DaemonError::NotRegistered => RpcError::not_registered(),
            DaemonError::AlreadyRegistered => RpcError::already_registered(),
            DaemonError::SessionNotFound(pin) => RpcError::session_not_found(pin),
            DaemonError::NotAuthorized => RpcError::not_authorized(),
            DaemonError::SessionClosed => RpcError::session_closed(),
            DaemonError::Core(e) => RpcError::new(core_error_code(&e), e.to_string()),
            DaemonError::Codec(e) => RpcError::internal_error(e.to_string()),
            DaemonError::InvalidParams(msg) => RpcError::invalid_params(msg),
            DaemonError::MethodNotFound(name) => RpcError::new(
                protocol::METHOD_NOT_FOUND,
                format!("Method not found: {name}"),
            ),
            DaemonError::Watcher(ref e) => RpcError::internal_error(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
