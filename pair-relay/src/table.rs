//! The room table: every room, every registered client, one lock.
//!
//! All membership changes, queue drains and timer firings run under a single
//! `tokio::sync::Mutex`, so two registrations racing into an empty room see a
//! strict order and exactly one of them is first. Deliveries are enqueued onto
//! connection channels while the lock is held (see [`crate::connection`]);
//! this keeps per-room delivery order equal to lock order without doing any
//! socket I/O under the lock.

use std::{
    collections::HashMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    config::RelayConfig,
    connection::{ConnectionHandle, ConnectionId},
    directory::{Client, ClientDirectory},
    error::{RegistrationError, RoutingError},
    room::Room,
    timer::RegistrationTimer,
};

/// Handle to the shared room table. Cheap to clone.
#[derive(Clone)]
pub struct RoomTable {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<TableState>,
    register_timeout: Duration,
    max_pending: Option<usize>,
    next_epoch: AtomicU64,
}

#[derive(Default)]
struct TableState {
    rooms: HashMap<String, Room>,
    directory: ClientDirectory,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RoomReport {
    pub room_id: String,
    pub members: Vec<String>,
    pub pending: usize,
    pub half_open: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TableReport {
    pub clients: usize,
    pub rooms: Vec<RoomReport>,
}

impl TableReport {
    pub fn room(&self, room_id: &str) -> Option<&RoomReport> {
        self.rooms.iter().find(|room| room.room_id == room_id)
    }
}

impl RoomTable {
    pub fn new(register_timeout: Duration, max_pending: Option<usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(TableState::default()),
                register_timeout,
                max_pending,
                next_epoch: AtomicU64::new(1),
            }),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.register_timeout, config.max_pending)
    }

    /// Registers `client_id` in `room_id`, creating the room if needed.
    ///
    /// The first member arms the registration timer. The second member
    /// disarms it and receives every queued message, oldest first, before
    /// the lock is released.
    pub async fn register(
        &self,
        room_id: &str,
        client_id: &str,
        connection: ConnectionHandle,
    ) -> Result<(), RegistrationError> {
        if room_id.is_empty() || client_id.is_empty() {
            return Err(RegistrationError::InvalidRequest);
        }

        let mut state = self.shared.state.lock().await;
        let TableState { rooms, directory } = &mut *state;

        if directory.contains(client_id) {
            return Err(RegistrationError::DuplicateRegistration {
                client_id: client_id.to_string(),
            });
        }

        let created = !rooms.contains_key(room_id);
        let room = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(room_id));
        let size = room.add_member(client_id)?;

        directory.insert(
            client_id,
            Client {
                room_id: room_id.to_string(),
                connection: connection.clone(),
            },
        );

        if size == 1 {
            room.arm_timer(self.start_timer(room_id));
            info!(
                room = room_id,
                client = client_id,
                created,
                "client registered, waiting for peer"
            );
        } else {
            room.cancel_timer();
            let pending = room.take_pending();
            info!(
                room = room_id,
                client = client_id,
                flushed = pending.len(),
                "client registered, room is full"
            );
            for message in pending {
                connection.deliver(&message.kind, &message.payload, None);
            }
        }

        Ok(())
    }

    /// Relays a message from `origin` to the other member of `room_id`, or
    /// queues it if the origin is alone in the room.
    pub async fn send(
        &self,
        room_id: &str,
        origin: &str,
        kind: &str,
        payload: &str,
    ) -> Result<(), RoutingError> {
        let mut state = self.shared.state.lock().await;
        let TableState { rooms, directory } = &mut *state;

        let room = match rooms.get_mut(room_id) {
            Some(room) if room.contains(origin) => room,
            _ => return Err(RoutingError::NotRegistered),
        };

        match room.peer_of(origin).and_then(|peer| directory.get(peer)) {
            Some(peer) => {
                debug!(room = room_id, from = origin, kind, "relaying message to peer");
                peer.connection.deliver(kind, payload, None);
                Ok(())
            }
            None => {
                room.push_pending(kind, payload, self.shared.max_pending)?;
                debug!(
                    room = room_id,
                    from = origin,
                    kind,
                    depth = room.pending_len(),
                    "queued message for absent peer"
                );
                Ok(())
            }
        }
    }

    /// Delivers straight to a connected client, regardless of room. Never
    /// queues.
    pub async fn send_by_id(
        &self,
        target: &str,
        kind: &str,
        payload: &str,
        from: Option<&str>,
    ) -> Result<(), RoutingError> {
        let state = self.shared.state.lock().await;
        match state.directory.get(target) {
            Some(client) => {
                debug!(to = target, ?from, kind, "direct-routing message");
                client.connection.deliver(kind, payload, from);
                Ok(())
            }
            None => Err(RoutingError::PeerOffline {
                client_id: target.to_string(),
            }),
        }
    }

    /// Sends a structured error to a registered client.
    pub async fn notify(&self, client_id: &str, error: &str) -> Result<(), RoutingError> {
        let state = self.shared.state.lock().await;
        match state.directory.get(client_id) {
            Some(client) => {
                client.connection.deliver_error(error);
                Ok(())
            }
            None => Err(RoutingError::PeerOffline {
                client_id: client_id.to_string(),
            }),
        }
    }

    /// Removes `client_id` from `room_id`. No-op if it is not a member.
    pub async fn deregister(&self, room_id: &str, client_id: &str) {
        let mut state = self.shared.state.lock().await;
        self.detach(&mut state, room_id, client_id);
    }

    /// Like [`RoomTable::deregister`], but only if the registration still
    /// belongs to `connection`. Used by connection cleanup so that a stale
    /// connection cannot remove a newer registration of the same client id.
    pub async fn release(&self, room_id: &str, client_id: &str, connection: ConnectionId) {
        let mut state = self.shared.state.lock().await;
        let owned = state
            .directory
            .get(client_id)
            .is_some_and(|client| client.connection_id() == connection);
        if owned {
            self.detach(&mut state, room_id, client_id);
        }
    }

    /// Forcibly removes one member on behalf of someone other than its
    /// connection. The removed connection is told it is no longer registered.
    pub async fn remove(&self, room_id: &str, client_id: &str) {
        let mut state = self.shared.state.lock().await;
        if let Some(client) = self.detach(&mut state, room_id, client_id) {
            info!(room = room_id, client = client_id, "client forcibly removed");
            client.connection.evict();
        }
    }

    /// Tears down a room: members, queue and timer.
    pub async fn remove_room(&self, room_id: &str) {
        let mut state = self.shared.state.lock().await;
        let TableState { rooms, directory } = &mut *state;

        let Some(mut room) = rooms.remove(room_id) else {
            return;
        };
        room.cancel_timer();

        let notice = format!("room {room_id} was closed");
        for member in room.members() {
            if let Some(client) = directory.remove(room_id, member) {
                client.connection.deliver_error(&notice);
                client.connection.evict();
            }
        }
        info!(
            room = room_id,
            members = room.len(),
            dropped = room.pending_len(),
            "room removed"
        );
    }

    pub async fn is_registered(&self, client_id: &str) -> bool {
        self.shared.state.lock().await.directory.contains(client_id)
    }

    pub async fn client_count(&self) -> usize {
        self.shared.state.lock().await.directory.len()
    }

    /// Snapshot of every room, ordered by room id.
    pub async fn report(&self) -> TableReport {
        let state = self.shared.state.lock().await;
        let mut rooms: Vec<RoomReport> = state
            .rooms
            .values()
            .map(|room| RoomReport {
                room_id: room.id().to_string(),
                members: room.members().to_vec(),
                pending: room.pending_len(),
                half_open: room.is_half_open(),
            })
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));

        TableReport {
            clients: state.directory.len(),
            rooms,
        }
    }

    /// Removes a member from its room and the directory. An emptied room is
    /// deleted; a room left with one member gets a fresh registration timer.
    fn detach(&self, state: &mut TableState, room_id: &str, client_id: &str) -> Option<Client> {
        let TableState { rooms, directory } = state;

        let room = rooms.get_mut(room_id)?;
        if !room.remove_member(client_id) {
            return None;
        }
        let client = directory.remove(room_id, client_id);

        if room.is_empty() {
            room.cancel_timer();
            rooms.remove(room_id);
            info!(room = room_id, client = client_id, "client left, room deleted");
        } else {
            room.arm_timer(self.start_timer(room_id));
            info!(room = room_id, client = client_id, "client left, room is half-open");
        }

        client
    }

    fn start_timer(&self, room_id: &str) -> RegistrationTimer {
        let epoch = self.shared.next_epoch.fetch_add(1, Ordering::Relaxed);
        let table: Weak<Shared> = Arc::downgrade(&self.shared);
        let room_id = room_id.to_string();

        RegistrationTimer::start(epoch, self.shared.register_timeout, move |epoch| async move {
            if let Some(shared) = table.upgrade() {
                RoomTable { shared }.expire(&room_id, epoch).await;
            }
        })
    }

    /// Timer callback. Only acts if `epoch` is still the room's live timer.
    async fn expire(&self, room_id: &str, epoch: u64) {
        let mut state = self.shared.state.lock().await;
        let TableState { rooms, directory } = &mut *state;

        let live = rooms
            .get(room_id)
            .is_some_and(|room| room.timer_epoch() == Some(epoch));
        if !live {
            return;
        }
        let Some(mut room) = rooms.remove(room_id) else {
            return;
        };
        room.disarm_timer();

        let notice = format!("peer never joined room {room_id}");
        for member in room.members() {
            if let Some(client) = directory.remove(room_id, member) {
                client.connection.deliver_error(&notice);
                client.connection.evict();
            }
        }
        info!(
            room = room_id,
            dropped = room.pending_len(),
            "registration timed out, room removed"
        );
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::{UnboundedReceiver, error::TryRecvError};

    use super::*;
    use crate::{connection::Outbound, message::ServerMessage};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn table() -> RoomTable {
        RoomTable::new(TIMEOUT, None)
    }

    fn relayed(kind: &str, payload: &str) -> Outbound {
        Outbound::Message(ServerMessage::relay(kind, payload, None))
    }

    fn assert_idle(rx: &mut UnboundedReceiver<Outbound>) {
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn paired_clients_relay_both_ways() {
        let table = table();
        let (a, mut a_rx) = ConnectionHandle::channel();
        let (b, mut b_rx) = ConnectionHandle::channel();

        table.register("r", "a", a).await.expect("a registers");
        table.register("r", "b", b).await.expect("b registers");

        table.send("r", "a", "send", "hello b").await.expect("a sends");
        table.send("r", "b", "send", "hello a").await.expect("b sends");

        assert_eq!(b_rx.try_recv(), Ok(relayed("send", "hello b")));
        assert_eq!(a_rx.try_recv(), Ok(relayed("send", "hello a")));
        assert_idle(&mut a_rx);
        assert_idle(&mut b_rx);

        let report = table.report().await;
        assert_eq!(report.clients, 2);
        assert_eq!(report.room("r").map(|r| r.members.len()), Some(2));
    }

    #[tokio::test]
    async fn queued_messages_flush_once_and_before_later_sends() {
        let table = table();
        let (a, mut a_rx) = ConnectionHandle::channel();
        let (b, mut b_rx) = ConnectionHandle::channel();

        table.register("r1", "A", a).await.expect("A registers");
        assert_idle(&mut a_rx);

        table.send("r1", "A", "send", "offer1").await.expect("queued");
        assert_eq!(table.report().await.room("r1").map(|r| r.pending), Some(1));

        table.register("r1", "B", b).await.expect("B registers");
        assert_eq!(b_rx.try_recv(), Ok(relayed("send", "offer1")));
        assert_idle(&mut b_rx);
        assert_eq!(table.report().await.room("r1").map(|r| r.pending), Some(0));

        table.send("r1", "A", "send", "offer2").await.expect("relayed");
        assert_eq!(b_rx.try_recv(), Ok(relayed("send", "offer2")));
        assert_idle(&mut b_rx);
        assert_idle(&mut a_rx);
    }

    #[tokio::test]
    async fn duplicate_registration_leaves_state_unchanged() {
        let table = table();
        let (a, _a_rx) = ConnectionHandle::channel();
        let (again, _again_rx) = ConnectionHandle::channel();

        table.register("r", "a", a).await.expect("a registers");
        let before = table.report().await;

        let err = table.register("r", "a", again.clone()).await;
        assert_eq!(
            err,
            Err(RegistrationError::DuplicateRegistration {
                client_id: "a".into()
            })
        );
        let err = table.register("other", "a", again).await;
        assert!(matches!(err, Err(RegistrationError::DuplicateRegistration { .. })));

        assert_eq!(table.report().await, before);
    }

    #[tokio::test]
    async fn empty_identifiers_are_rejected() {
        let table = table();
        let (a, _rx) = ConnectionHandle::channel();
        assert_eq!(
            table.register("", "a", a.clone()).await,
            Err(RegistrationError::InvalidRequest)
        );
        assert_eq!(
            table.register("r", "", a).await,
            Err(RegistrationError::InvalidRequest)
        );
        assert!(table.report().await.rooms.is_empty());
    }

    #[tokio::test]
    async fn third_client_is_turned_away() {
        let table = table();
        for id in ["a", "b"] {
            let (conn, _rx) = ConnectionHandle::channel();
            table.register("r", id, conn).await.expect("member registers");
        }
        let (c, _c_rx) = ConnectionHandle::channel();
        assert_eq!(
            table.register("r", "c", c).await,
            Err(RegistrationError::RoomFull { room_id: "r".into() })
        );
        assert!(!table.is_registered("c").await);
    }

    #[tokio::test]
    async fn concurrent_first_registrations_produce_one_room_of_two() {
        let table = table();
        let mut tasks = Vec::new();
        for id in ["a", "b", "c", "d"] {
            let table = table.clone();
            tasks.push(tokio::spawn(async move {
                let (conn, rx) = ConnectionHandle::channel();
                (table.register("race", id, conn).await, rx)
            }));
        }

        let mut accepted = 0;
        for task in tasks {
            let (result, _rx) = task.await.expect("task joins");
            match result {
                Ok(()) => accepted += 1,
                Err(err) => assert!(matches!(err, RegistrationError::RoomFull { .. })),
            }
        }

        assert_eq!(accepted, 2);
        let report = table.report().await;
        assert_eq!(report.clients, 2);
        assert_eq!(report.room("race").map(|r| r.half_open), Some(false));
    }

    #[tokio::test]
    async fn send_requires_membership() {
        let table = table();
        assert_eq!(
            table.send("nowhere", "a", "send", "m").await,
            Err(RoutingError::NotRegistered)
        );

        let (a, _rx) = ConnectionHandle::channel();
        table.register("r", "a", a).await.expect("a registers");
        assert_eq!(
            table.send("r", "stranger", "send", "m").await,
            Err(RoutingError::NotRegistered)
        );
    }

    #[tokio::test]
    async fn bounded_queue_reports_full() {
        let table = RoomTable::new(TIMEOUT, Some(1));
        let (a, _rx) = ConnectionHandle::channel();
        table.register("r", "a", a).await.expect("a registers");

        table.send("r", "a", "send", "one").await.expect("fits");
        assert_eq!(
            table.send("r", "a", "send", "two").await,
            Err(RoutingError::QueueFull {
                room_id: "r".into(),
                capacity: 1
            })
        );
    }

    #[tokio::test]
    async fn deregistered_client_is_offline_for_direct_routing() {
        let table = table();
        let (a, _a_rx) = ConnectionHandle::channel();
        let (b, mut b_rx) = ConnectionHandle::channel();
        table.register("r1", "a", a).await.expect("a registers");
        table.register("r2", "b", b).await.expect("b registers");

        table
            .send_by_id("b", "chat", "hi", Some("a"))
            .await
            .expect("b is online");
        assert_eq!(
            b_rx.try_recv(),
            Ok(Outbound::Message(ServerMessage::relay("chat", "hi", Some("a"))))
        );

        table.deregister("r1", "a").await;
        assert_eq!(
            table.send_by_id("a", "chat", "hi", Some("b")).await,
            Err(RoutingError::PeerOffline {
                client_id: "a".into()
            })
        );
        assert!(table.report().await.room("r1").is_none());
    }

    #[tokio::test]
    async fn deregister_is_idempotent() {
        let table = table();
        let (a, _rx) = ConnectionHandle::channel();
        table.register("r", "a", a).await.expect("a registers");

        table.deregister("r", "a").await;
        table.deregister("r", "a").await;
        table.deregister("missing", "a").await;

        assert_eq!(table.client_count().await, 0);
        assert!(table.report().await.rooms.is_empty());
    }

    #[tokio::test]
    async fn remove_room_drops_members_and_queue() {
        let table = table();
        let (a, mut a_rx) = ConnectionHandle::channel();
        let (b, mut b_rx) = ConnectionHandle::channel();
        table.register("r", "a", a).await.expect("a registers");
        table.register("r", "b", b).await.expect("b registers");

        table.remove_room("r").await;

        assert!(!table.is_registered("a").await);
        assert!(!table.is_registered("b").await);
        assert_eq!(
            table.send("r", "a", "send", "m").await,
            Err(RoutingError::NotRegistered)
        );
        for rx in [&mut a_rx, &mut b_rx] {
            assert_eq!(
                rx.try_recv(),
                Ok(Outbound::Message(ServerMessage::error("room r was closed")))
            );
            assert_eq!(rx.try_recv(), Ok(Outbound::Evicted { registration: 0 }));
        }
    }

    #[tokio::test]
    async fn forced_removal_evicts_only_the_target() {
        let table = table();
        let (a, mut a_rx) = ConnectionHandle::channel();
        let (b, mut b_rx) = ConnectionHandle::channel();
        table.register("r", "a", a).await.expect("a registers");
        table.register("r", "b", b).await.expect("b registers");

        table.remove("r", "b").await;

        assert_eq!(b_rx.try_recv(), Ok(Outbound::Evicted { registration: 0 }));
        assert_idle(&mut a_rx);
        let report = table.report().await;
        assert_eq!(report.room("r").map(|r| r.members.clone()), Some(vec!["a".to_string()]));
        assert_eq!(report.room("r").map(|r| r.half_open), Some(true));
    }

    #[tokio::test]
    async fn release_ignores_a_newer_registration() {
        let table = table();
        let (old, _old_rx) = ConnectionHandle::channel();
        let (new, _new_rx) = ConnectionHandle::channel();
        let stale_id = old.id();

        table.register("r", "a", old).await.expect("first registration");
        table.remove("r", "a").await;
        table.register("r", "a", new).await.expect("re-registration");

        table.release("r", "a", stale_id).await;
        assert!(table.is_registered("a").await);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_room_expires() {
        let table = table();
        let (a, mut a_rx) = ConnectionHandle::channel();
        table.register("r", "a", a).await.expect("a registers");
        table.send("r", "a", "send", "offer").await.expect("queued");

        tokio::time::sleep(TIMEOUT - Duration::from_secs(1)).await;
        assert!(table.is_registered("a").await);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!table.is_registered("a").await);
        assert!(table.report().await.rooms.is_empty());
        assert_eq!(
            a_rx.try_recv(),
            Ok(Outbound::Message(ServerMessage::error("peer never joined room r")))
        );
        assert_eq!(a_rx.try_recv(), Ok(Outbound::Evicted { registration: 0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn second_registration_cancels_the_timer() {
        let table = table();
        let (a, _a_rx) = ConnectionHandle::channel();
        let (b, _b_rx) = ConnectionHandle::channel();
        table.register("r", "a", a).await.expect("a registers");
        tokio::time::sleep(Duration::from_secs(5)).await;
        table.register("r", "b", b).await.expect("b registers");

        tokio::time::sleep(TIMEOUT * 3).await;
        assert_eq!(table.client_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_leaving_rearms_the_timer() {
        let table = table();
        let (a, mut a_rx) = ConnectionHandle::channel();
        let (b, _b_rx) = ConnectionHandle::channel();
        table.register("r1", "A", a).await.expect("A registers");
        table.register("r1", "B", b).await.expect("B registers");

        tokio::time::sleep(TIMEOUT * 2).await;
        table.deregister("r1", "B").await;
        assert_eq!(table.report().await.room("r1").map(|r| r.half_open), Some(true));

        tokio::time::sleep(TIMEOUT - Duration::from_secs(1)).await;
        assert!(table.report().await.room("r1").is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(table.report().await.room("r1").is_none());
        assert!(!table.is_registered("A").await);
        assert!(matches!(a_rx.try_recv(), Ok(Outbound::Message(msg)) if msg.is_error()));
    }
}
