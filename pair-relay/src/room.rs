//! Pairing state for one room id.

use std::collections::VecDeque;

use crate::error::{RegistrationError, RoutingError};
use crate::timer::RegistrationTimer;

/// Maximum number of members a room can hold.
pub const ROOM_CAPACITY: usize = 2;

/// A message sent to a half-open room, waiting for the second member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub kind: String,
    pub payload: String,
}

#[derive(Debug)]
pub struct Room {
    id: String,
    members: Vec<String>,
    pending: VecDeque<PendingMessage>,
    timer: Option<RegistrationTimer>,
}

impl Room {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            members: Vec::with_capacity(ROOM_CAPACITY),
            pending: VecDeque::new(),
            timer: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_half_open(&self) -> bool {
        self.members.len() == 1
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.members.iter().any(|member| member == client_id)
    }

    /// The other member of the room, if there is one.
    pub fn peer_of(&self, client_id: &str) -> Option<&str> {
        self.members
            .iter()
            .find(|member| *member != client_id)
            .map(String::as_str)
    }

    /// Adds a member and returns the new membership size.
    pub fn add_member(&mut self, client_id: &str) -> Result<usize, RegistrationError> {
        if self.contains(client_id) {
            return Err(RegistrationError::DuplicateRegistration {
                client_id: client_id.to_string(),
            });
        }
        if self.members.len() >= ROOM_CAPACITY {
            return Err(RegistrationError::RoomFull {
                room_id: self.id.clone(),
            });
        }
        self.members.push(client_id.to_string());
        Ok(self.members.len())
    }

    pub fn remove_member(&mut self, client_id: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|member| member != client_id);
        self.members.len() != before
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Queues a message. `capacity` of `None` means the queue is unbounded.
    pub fn push_pending(
        &mut self,
        kind: &str,
        payload: &str,
        capacity: Option<usize>,
    ) -> Result<(), RoutingError> {
        if let Some(capacity) = capacity {
            if self.pending.len() >= capacity {
                return Err(RoutingError::QueueFull {
                    room_id: self.id.clone(),
                    capacity,
                });
            }
        }
        self.pending.push_back(PendingMessage {
            kind: kind.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    /// Empties the queue, returning its messages oldest first.
    pub fn take_pending(&mut self) -> VecDeque<PendingMessage> {
        std::mem::take(&mut self.pending)
    }

    pub fn timer_epoch(&self) -> Option<u64> {
        self.timer.as_ref().map(RegistrationTimer::epoch)
    }

    /// Installs a new timer, cancelling any previous one.
    pub fn arm_timer(&mut self, timer: RegistrationTimer) {
        if let Some(previous) = self.timer.replace(timer) {
            previous.cancel();
        }
    }

    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }

    /// Drops the timer without aborting its task. Used from the timer's own
    /// callback, which must not abort itself.
    pub fn disarm_timer(&mut self) {
        self.timer = None;
    }
}
