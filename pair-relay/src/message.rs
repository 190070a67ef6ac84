use serde::{Deserialize, Serialize};

/// Raw inbound record as it arrives in a WebSocket text frame.
///
/// Every field except `cmd` is optional on the wire; which ones are required
/// depends on the command and is decided by [`Command::from`] and the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientMessage {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roomid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clientid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl ClientMessage {
    pub fn register(room_id: &str, client_id: &str) -> Self {
        Self {
            cmd: "register".to_string(),
            roomid: Some(room_id.to_string()),
            clientid: Some(client_id.to_string()),
            ..Self::default()
        }
    }

    pub fn send(msg: &str) -> Self {
        Self {
            cmd: "send".to_string(),
            msg: Some(msg.to_string()),
            ..Self::default()
        }
    }

    pub fn direct(kind: DirectKind, to: &str, msg: &str) -> Self {
        Self {
            cmd: kind.as_str().to_string(),
            to: Some(to.to_string()),
            msg: Some(msg.to_string()),
            ..Self::default()
        }
    }

    pub fn leave() -> Self {
        Self {
            cmd: "leave".to_string(),
            ..Self::default()
        }
    }
}

/// Ancillary message kinds routed by target client id instead of by room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectKind {
    Chat,
    VideoChat,
    AudioChat,
}

impl DirectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DirectKind::Chat => "chat",
            DirectKind::VideoChat => "video_chat",
            DirectKind::AudioChat => "audio_chat",
        }
    }

    fn parse(cmd: &str) -> Option<Self> {
        match cmd {
            "chat" => Some(DirectKind::Chat),
            "video_chat" => Some(DirectKind::VideoChat),
            "audio_chat" => Some(DirectKind::AudioChat),
            _ => None,
        }
    }
}

/// Inbound event after dispatch on the `cmd` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register {
        room_id: Option<String>,
        client_id: Option<String>,
    },
    Send {
        msg: Option<String>,
    },
    Direct {
        kind: DirectKind,
        to: Option<String>,
        msg: Option<String>,
    },
    Leave,
    Unknown(String),
}

impl From<ClientMessage> for Command {
    fn from(message: ClientMessage) -> Self {
        let ClientMessage {
            cmd,
            roomid,
            clientid,
            msg,
            to,
        } = message;

        match cmd.as_str() {
            "register" => Command::Register {
                room_id: roomid,
                client_id: clientid,
            },
            "send" => Command::Send { msg },
            "leave" => Command::Leave,
            other => match DirectKind::parse(other) {
                Some(kind) => Command::Direct { kind, to, msg },
                None => Command::Unknown(cmd),
            },
        }
    }
}

/// Decodes one text frame into a [`Command`].
pub fn decode_command(text: &str) -> Result<Command, serde_json::Error> {
    serde_json::from_str::<ClientMessage>(text).map(Command::from)
}

/// Outbound record written to a client's socket.
///
/// Relayed payloads carry the originating kind in `cmd`; structured errors
/// carry an empty `msg` and a non-empty `error`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(default)]
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default)]
    pub error: String,
}

impl ServerMessage {
    pub fn relay(kind: &str, payload: &str, from: Option<&str>) -> Self {
        Self {
            cmd: Some(kind.to_string()),
            msg: payload.to_string(),
            from: from.map(str::to_string),
            error: String::new(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            error: text.into(),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}
