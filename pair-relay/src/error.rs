//! Error types for the relay core and its HTTP/WebSocket boundary.
//!
//! The `Display` text of each variant is exactly what a client sees in the
//! `error` field of a server reply.

use thiserror::Error;

/// Errors from `RoomTable::register`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// Room or client identifier was missing or empty.
    #[error("Invalid register request: missing 'clientid' or 'roomid'")]
    InvalidRequest,

    /// The client identifier is already registered, either by this
    /// connection or by another one.
    #[error("Duplicated register request: client '{client_id}' is already registered")]
    DuplicateRegistration { client_id: String },

    /// The room already has two members.
    #[error("Room '{room_id}' is full")]
    RoomFull { room_id: String },
}

/// Errors from relaying a message, by room or by client identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// The sender is not a member of the room it is sending to.
    #[error("Client not registered")]
    NotRegistered,

    /// Direct-routing target is not currently connected.
    #[error("Client '{client_id}' is offline")]
    PeerOffline { client_id: String },

    /// The half-open room already holds the configured number of pending
    /// messages.
    #[error("Room '{room_id}' pending queue is full ({capacity} messages)")]
    QueueFull { room_id: String, capacity: usize },
}

/// Malformed input on a WebSocket. Each of these ends the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid send request: missing 'msg'")]
    MissingMessage,

    #[error("Invalid message: unexpected 'cmd' '{0}'")]
    UnexpectedCommand(String),

    #[error("Invalid message: {0}")]
    Decode(String),
}

/// Failures at the transport boundary.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Could not bind the listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Socket-level failure while serving.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure encoding a status report.
    #[error("Failed to encode to JSON: err={0}")]
    Internal(#[from] serde_json::Error),
}
