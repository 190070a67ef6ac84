//! Non-owning handle to a client connection.
//!
//! The socket itself is owned by the connection task in [`crate::server`].
//! The core only holds a [`ConnectionHandle`], which enqueues onto the task's
//! unbounded outbound channel. Enqueueing never blocks, so the room table may
//! deliver while holding its lock; the actual socket write happens later, in
//! the connection task, in the order items were enqueued.
//!
//! The outbound channel is unbounded, like the pending queue of a half-open
//! room without `--max-pending`. A client that stops reading its socket keeps
//! accumulating relayed records until the read timeout closes it, so deploy
//! with a read timeout that matches the memory you are willing to spend per
//! stalled client.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

use crate::message::ServerMessage;

pub type ConnectionId = u64;

/// Tags one registration made over a connection. A connection may leave and
/// register again; eviction notices name the registration they end.
pub type RegistrationId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Items a connection task receives from the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write this record to the socket.
    Message(ServerMessage),
    /// The core dropped `registration` (timeout or forced removal). The
    /// connection stays open; a later registration is unaffected.
    Evicted { registration: RegistrationId },
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    registration: RegistrationId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// Creates a handle with a fresh connection id and the receiving end its
    /// owner must drain.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        (
            Self {
                id,
                registration: 0,
                tx,
            },
            rx,
        )
    }

    /// Same connection, tagged with `registration` for eviction notices.
    pub fn for_registration(&self, registration: RegistrationId) -> Self {
        Self {
            registration,
            ..self.clone()
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn deliver(&self, kind: &str, payload: &str, from: Option<&str>) {
        self.push(Outbound::Message(ServerMessage::relay(kind, payload, from)));
    }

    pub fn deliver_error(&self, text: &str) {
        self.push(Outbound::Message(ServerMessage::error(text)));
    }

    pub fn evict(&self) {
        self.push(Outbound::Evicted {
            registration: self.registration,
        });
    }

    fn push(&self, item: Outbound) {
        // The receiver disappears when the connection task ends; its close
        // path deregisters, so a failed enqueue needs no further handling.
        if self.tx.send(item).is_err() {
            debug!(connection = self.id, "dropping outbound item for closed connection");
        }
    }
}
