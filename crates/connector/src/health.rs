//! Upstream feed health and local connection lifecycle.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// What the gateway last reported about its upstream data source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionHealth {
    Disconnected = 0,
    Connected = 1,
    Stale = 2,
    ReconnectFailed = 3,
}

impl ConnectionHealth {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionHealth::Connected,
            2 => ConnectionHealth::Stale,
            3 => ConnectionHealth::ReconnectFailed,
            _ => ConnectionHealth::Disconnected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionHealth::Disconnected => "disconnected",
            ConnectionHealth::Connected => "connected",
            ConnectionHealth::Stale => "stale",
            ConnectionHealth::ReconnectFailed => "reconnect_failed",
        }
    }
}

impl fmt::Display for ConnectionHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local lifecycle of a feed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Idle = 0,
    Connecting = 1,
    Handshake = 2,
    Running = 3,
    Disconnecting = 4,
    Closed = 5,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Handshake,
            3 => ConnectionState::Running,
            4 => ConnectionState::Disconnecting,
            5 => ConnectionState::Closed,
            _ => ConnectionState::Idle,
        }
    }
}

/// Shared between the reader task, the owning connection and the health server.
///
/// Health only moves in response to gateway system messages. The
/// reconnect-failed latch never clears for the life of the value.
#[derive(Debug)]
pub struct FeedHealth {
    health: AtomicU8,
    state: AtomicU8,
    reconnect_failed: AtomicBool,
}

impl Default for FeedHealth {
    fn default() -> Self {
        Self {
            health: AtomicU8::new(ConnectionHealth::Disconnected as u8),
            state: AtomicU8::new(ConnectionState::Idle as u8),
            reconnect_failed: AtomicBool::new(false),
        }
    }
}

impl FeedHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn health(&self) -> ConnectionHealth {
        ConnectionHealth::from_u8(self.health.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool {
        self.health() == ConnectionHealth::Connected
    }

    pub fn is_stale(&self) -> bool {
        matches!(
            self.health(),
            ConnectionHealth::Stale | ConnectionHealth::ReconnectFailed
        )
    }

    pub fn reconnect_failed(&self) -> bool {
        self.reconnect_failed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Connected with no reconnect failure ever seen
    pub fn is_ready(&self) -> bool {
        self.is_connected() && !self.reconnect_failed()
    }

    pub(crate) fn mark_connected(&self) {
        self.set_health(ConnectionHealth::Connected);
    }

    pub(crate) fn mark_stale(&self) {
        self.set_health(ConnectionHealth::Stale);
    }

    pub(crate) fn mark_reconnect_failed(&self) {
        self.reconnect_failed.store(true, Ordering::SeqCst);
        self.set_health(ConnectionHealth::ReconnectFailed);
    }

    /// Local socket gone; upstream status unknown
    pub(crate) fn mark_disconnected(&self) {
        self.set_health(ConnectionHealth::Disconnected);
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn set_health(&self, health: ConnectionHealth) {
        self.health.store(health as u8, Ordering::SeqCst);
    }
}
