//! Operational counters exposed on `GET /status`.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use serde::Serialize;

use crate::table::{RoomReport, RoomTable};

#[derive(Debug)]
pub struct Dashboard {
    started: Instant,
    total_ws: AtomicU64,
    ws_errors: AtomicU64,
    http_errors: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusReport {
    #[serde(rename = "upsec")]
    pub uptime_secs: f64,
    #[serde(rename = "openws")]
    pub open_ws: usize,
    #[serde(rename = "totalws")]
    pub total_ws: u64,
    #[serde(rename = "wserrors")]
    pub ws_errors: u64,
    #[serde(rename = "httperrors")]
    pub http_errors: u64,
    pub rooms: Vec<RoomReport>,
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Dashboard {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            total_ws: AtomicU64::new(0),
            ws_errors: AtomicU64::new(0),
            http_errors: AtomicU64::new(0),
        }
    }

    /// Counts a successful WebSocket registration.
    pub fn incr_ws(&self) {
        self.total_ws.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_ws_error(&self) {
        self.ws_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_http_error(&self) {
        self.http_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn report(&self, table: &RoomTable) -> StatusReport {
        let table = table.report().await;
        StatusReport {
            uptime_secs: self.started.elapsed().as_secs_f64(),
            open_ws: table.clients,
            total_ws: self.total_ws.load(Ordering::Relaxed),
            ws_errors: self.ws_errors.load(Ordering::Relaxed),
            http_errors: self.http_errors.load(Ordering::Relaxed),
            rooms: table.rooms,
        }
    }
}
