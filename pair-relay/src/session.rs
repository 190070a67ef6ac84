//! Per-connection command dispatch.
//!
//! A [`Session`] moves `Unregistered → Registered → Closed`. Leaving a room or
//! being evicted from it returns the session to `Unregistered`; the connection
//! stays open and may register again. Only [`Session::close`] is terminal.

use std::{fmt::Display, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    connection::{ConnectionHandle, RegistrationId},
    dashboard::Dashboard,
    error::{ProtocolError, RegistrationError, RoutingError},
    message::{Command, DirectKind},
    table::RoomTable,
};

/// What the connection task should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Unregistered,
    Registered {
        room_id: String,
        client_id: String,
        registration: RegistrationId,
    },
    Closed,
}

pub struct Session {
    table: RoomTable,
    dashboard: Arc<Dashboard>,
    connection: ConnectionHandle,
    state: State,
    last_registration: RegistrationId,
}

impl Session {
    pub fn new(table: RoomTable, dashboard: Arc<Dashboard>, connection: ConnectionHandle) -> Self {
        Self {
            table,
            dashboard,
            connection,
            state: State::Unregistered,
            last_registration: 0,
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(self.state, State::Registered { .. })
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Room and client id, while registered.
    pub fn registration(&self) -> Option<(&str, &str)> {
        match &self.state {
            State::Registered {
                room_id, client_id, ..
            } => Some((room_id.as_str(), client_id.as_str())),
            _ => None,
        }
    }

    pub async fn handle(&mut self, command: Command) -> Flow {
        if self.is_closed() {
            return Flow::Close;
        }

        match command {
            Command::Register { room_id, client_id } => self.register(room_id, client_id).await,
            Command::Send { msg } => self.send(msg).await,
            Command::Direct { kind, to, msg } => self.direct(kind, to, msg).await,
            Command::Leave => self.leave().await,
            Command::Unknown(cmd) => {
                warn!(connection = self.connection.id(), cmd = %cmd, "unexpected command");
                self.fail(ProtocolError::UnexpectedCommand(cmd))
            }
        }
    }

    /// Reports an undecodable frame and asks for the connection to close.
    pub fn reject_frame(&mut self, reason: impl Display) -> Flow {
        let reason = reason.to_string();
        warn!(connection = self.connection.id(), %reason, "failed to decode client message");
        self.fail(ProtocolError::Decode(reason))
    }

    /// The table dropped `registration`. Notices for an earlier registration
    /// of this connection are ignored.
    pub fn on_evicted(&mut self, registration: RegistrationId) {
        let current = matches!(
            &self.state,
            State::Registered { registration: live, .. } if *live == registration
        );
        if !current {
            debug!(
                connection = self.connection.id(),
                registration, "ignoring stale eviction notice"
            );
            return;
        }
        if let Some((room_id, client_id)) = self.registration() {
            info!(room = %room_id, client = %client_id, "session evicted from room");
        }
        self.state = State::Unregistered;
    }

    /// Ends the session, deregistering it if still registered. Safe to call
    /// more than once.
    pub async fn close(&mut self) {
        let state = std::mem::replace(&mut self.state, State::Closed);
        if let State::Registered {
            room_id, client_id, ..
        } = state
        {
            self.table
                .release(&room_id, &client_id, self.connection.id())
                .await;
            info!(room = %room_id, client = %client_id, "session closed");
        }
    }

    async fn register(&mut self, room_id: Option<String>, client_id: Option<String>) -> Flow {
        if let Some((_, current)) = self.registration() {
            let client_id = current.to_string();
            self.report(RegistrationError::DuplicateRegistration { client_id });
            return Flow::Continue;
        }

        let (room_id, client_id) = match (room_id, client_id) {
            (Some(room_id), Some(client_id)) if !room_id.is_empty() && !client_id.is_empty() => {
                (room_id, client_id)
            }
            _ => return self.fail(RegistrationError::InvalidRequest),
        };

        let registration = self.last_registration + 1;
        self.last_registration = registration;
        let connection = self.connection.for_registration(registration);

        match self.table.register(&room_id, &client_id, connection).await {
            Ok(()) => {
                self.dashboard.incr_ws();
                self.state = State::Registered {
                    room_id,
                    client_id,
                    registration,
                };
                Flow::Continue
            }
            Err(RegistrationError::InvalidRequest) => self.fail(RegistrationError::InvalidRequest),
            Err(err) => {
                warn!(room = %room_id, client = %client_id, error = %err, "registration rejected");
                self.report(err);
                Flow::Continue
            }
        }
    }

    async fn send(&mut self, msg: Option<String>) -> Flow {
        let Some((room_id, client_id)) = self.registration() else {
            self.report(RoutingError::NotRegistered);
            return Flow::Continue;
        };

        let msg = match msg {
            Some(msg) if !msg.is_empty() => msg,
            _ => return self.fail(ProtocolError::MissingMessage),
        };

        if let Err(err) = self.table.send(room_id, client_id, "send", &msg).await {
            self.report(err);
        }
        Flow::Continue
    }

    async fn direct(&mut self, kind: DirectKind, to: Option<String>, msg: Option<String>) -> Flow {
        let Some((_, client_id)) = self.registration() else {
            self.report(RoutingError::NotRegistered);
            return Flow::Continue;
        };

        let (Some(to), Some(msg)) = (to, msg) else {
            return Flow::Continue;
        };
        if to.is_empty() || msg.is_empty() {
            return Flow::Continue;
        }

        match self
            .table
            .send_by_id(&to, kind.as_str(), &msg, Some(client_id))
            .await
        {
            Ok(()) => debug!(
                from = client_id,
                to = %to,
                kind = kind.as_str(),
                "direct message delivered"
            ),
            Err(err) => self.report(err),
        }
        Flow::Continue
    }

    async fn leave(&mut self) -> Flow {
        match std::mem::replace(&mut self.state, State::Unregistered) {
            State::Registered {
                room_id, client_id, ..
            } => {
                self.table
                    .release(&room_id, &client_id, self.connection.id())
                    .await;
                info!(room = %room_id, client = %client_id, "client left room");
            }
            other => {
                self.state = other;
                self.report(RoutingError::NotRegistered);
            }
        }
        Flow::Continue
    }

    fn report(&self, err: impl Display) {
        self.connection.deliver_error(&err.to_string());
        self.dashboard.on_ws_error();
    }

    fn fail(&self, err: impl Display) -> Flow {
        self.report(err);
        Flow::Close
    }
}
