//! Chorale daemon library: the session registry, per-session hubs and the
//! socket server.
//!
//! Operators drive a session, viewers mirror it and control clients inspect
//! the daemon. Each live session runs as its own task (see [`hub`]); the
//! [`registry`] maps PINs to those tasks.

pub(crate) mod config_watcher;
pub mod connection;
pub mod error;
pub(crate) mod handlers;
pub mod hub;
pub mod registry;
pub mod server;
pub(crate) mod session;

pub use connection::{ConnectionHandle, Outbound};
pub use error::{DaemonError, Result};
pub use hub::SessionHandle;
pub use registry::SessionRegistry;
pub use server::{DaemonState, ServerOptions, run};
pub use session::{Binding, ClientInfo, ConnectionId};
