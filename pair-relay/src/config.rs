use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

/// Default wait for the second client of a room.
pub const DEFAULT_REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Default idle limit for a WebSocket. Long enough for any real session, short
/// enough that a zombie connection does not live forever.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24);

pub const DEFAULT_PORT: u16 = 8089;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    pub register_timeout: Duration,
    pub read_timeout: Duration,
    /// `None` leaves the pending queue unbounded.
    pub max_pending: Option<usize>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            register_timeout: DEFAULT_REGISTER_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_pending: None,
        }
    }
}
