//! Process-wide client id → connection mapping.
//!
//! Only the room table mutates the directory, under the same lock as room
//! membership, so an entry's `room_id` always names the room that lists the
//! client as a member.

use std::collections::HashMap;

use crate::connection::{ConnectionHandle, ConnectionId};

#[derive(Debug, Clone)]
pub struct Client {
    pub room_id: String,
    pub connection: ConnectionHandle,
}

impl Client {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }
}

#[derive(Debug, Default)]
pub struct ClientDirectory {
    clients: HashMap<String, Client>,
}

impl ClientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    pub fn get(&self, client_id: &str) -> Option<&Client> {
        self.clients.get(client_id)
    }

    /// Inserts a client. Returns `false`, leaving the existing entry intact,
    /// if the id is already present.
    pub fn insert(&mut self, client_id: &str, client: Client) -> bool {
        if self.clients.contains_key(client_id) {
            return false;
        }
        self.clients.insert(client_id.to_string(), client);
        true
    }

    /// Removes a client only if it is recorded as a member of `room_id`.
    pub fn remove(&mut self, room_id: &str, client_id: &str) -> Option<Client> {
        match self.clients.get(client_id) {
            Some(client) if client.room_id == room_id => self.clients.remove(client_id),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
