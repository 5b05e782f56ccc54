//! Fog authority channel: decoding pushed tile updates, keeping the
//! connection alive, and handing the results to the apply queue.
//!
//! # Invariants
//! - Frames are decoded on the reader thread; store writes happen only on the apply queue.
//! - A bad item or field never discards the rest of its message.
//! - A reader thread from an older connection cannot change the current connection state.
//! - Closing waits at most the configured timeout.

pub mod apply;
pub mod client;
pub mod endpoint;
pub mod message;
pub mod reconnect;
pub mod transport;

pub use apply::{MessageApplier, apply_message};
pub use client::{ClientOptions, ConnectionState, SyncClient};
pub use endpoint::{FOG_PATH, connect_uri, normalize_endpoint};
pub use message::{ActorDirective, InboundMessage, decode, encode_snapshot};
pub use reconnect::{ReconnectPolicy, ReconnectSupervisor, SupervisorStatus};
pub use transport::{
    CloseHandle, Connection, Connector, MemoryConnector, MemoryListener, MemoryPeer,
    TcpLineConnector, TransportError,
};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("no actor identity set")]
    MissingIdentity,
    #[error("endpoint is empty")]
    EmptyEndpoint,
    #[error("connection is {0}")]
    Busy(ConnectionState),
    #[error("connect interrupted by close")]
    Interrupted,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("message is not a JSON object")]
    NotObject,
    #[error("failed to spawn reader: {0}")]
    Spawn(std::io::Error),
}
