//! JSON-RPC 2.0 protocol definitions for Chorale.
//!
//! This crate provides the protocol types, transport codec, and client helper
//! used between the Chorale daemon and operator, viewer and control clients.
//!
//! # Architecture
//!
//! - [`protocol`]: JSON-RPC 2.0 message types, error codes, registration types
//! - [`transport`]: Length-prefixed codec for message framing
//! - [`client`]: RPC client for connecting to the daemon
//! - [`events`]: Decoding daemon notifications into [`ServerEvent`]s
//!
//! # Example
//!
//! ```no_run
//! use chorale_rpc::{ClientRole, RpcClient, ServerEvent};
//!
//! # async fn example() -> Result<(), chorale_rpc::ClientError> {
//! let mut client = RpcClient::connect().await?;
//!
//! // Join session 4821 as a viewer
//! let joined = client
//!     .register(ClientRole::Viewer { pin: "4821".to_string() })
//!     .await?;
//!
//! let mut state = joined.snapshot.unwrap_or_default();
//! while let Some(event) = client.next_event().await {
//!     if let ServerEvent::Delta(delta) = event {
//!         state.apply(&delta);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod events;
pub mod protocol;
pub mod transport;

pub use client::{ClientError, RpcClient, socket_path};

pub use events::{ServerEvent, notification_to_event};

pub use protocol::{
    ALREADY_REGISTERED, CloseReason, ClosedParams, ClientRole, INTERNAL_ERROR, INVALID_CONTENT,
    INVALID_PARAMS, INVALID_REQUEST, INVALID_TOOL_UPDATE, JSONRPC_VERSION, JoinStatus,
    METHOD_NOT_FOUND, Message, MutateParams, NOT_AUTHORIZED, NOT_REGISTERED, Notification,
    OUT_OF_RANGE, PARSE_ERROR, RegisterParams, RegisterResult, Request, RequestId, Response,
    RpcError, SESSION_CLOSED, SESSION_NOT_FOUND, SessionEndedParams, StatusResult, methods,
};

pub use transport::{CodecError, JsonRpcCodec};

pub use chorale_types::{Delta, Mutation, SessionSnapshot, SessionSummary};
