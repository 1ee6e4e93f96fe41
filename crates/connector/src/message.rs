//! Typed events decoded from the gateway's text protocol.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use std::fmt;

use crate::error::FeedError;

/// Field separator on the wire
pub const FIELD_DELIMITER: char = ',';

/// One framed line split into its comma-separated fields.
///
/// Fields are never unquoted; a field containing the delimiter cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    fields: Vec<String>,
}

impl RawMessage {
    pub fn parse(line: &str) -> Self {
        Self {
            fields: line.split(FIELD_DELIMITER).map(str::to_string).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// First character of the first field
    pub fn primary_key(&self) -> Option<char> {
        self.fields.first().and_then(|f| f.chars().next())
    }

    /// Fail with `MalformedRecord` unless at least `min` fields are present
    pub fn require(&self, record: &'static str, min: usize) -> Result<(), FeedError> {
        if self.fields.len() < min {
            return Err(FeedError::MalformedRecord {
                record,
                expected: min,
                actual: self.fields.len(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for RawMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fields.join(","))
    }
}

/// Which stream a bar belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarKind {
    /// Still-forming bar
    Update,
    /// Completed bar from the live stream
    CompleteLive,
    /// Completed bar from a backfill
    CompleteHistorical,
}

impl BarKind {
    pub fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'U' => Some(BarKind::Update),
            'C' => Some(BarKind::CompleteLive),
            'H' => Some(BarKind::CompleteHistorical),
            _ => None,
        }
    }

    pub fn tag(self) -> char {
        match self {
            BarKind::Update => 'U',
            BarKind::CompleteLive => 'C',
            BarKind::CompleteHistorical => 'H',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BarKind::Update => "update",
            BarKind::CompleteLive => "live",
            BarKind::CompleteHistorical => "history",
        }
    }
}

/// One interval bar
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: NaiveDateTime,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// Cumulative volume for the day
    pub total_volume: u64,
    /// Volume inside this bar
    pub period_volume: u64,
    pub trade_count: u64,
}

/// Connection statistics reported by the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct ConnStats {
    pub server_ip: String,
    pub server_port: u64,
    pub max_symbols: u64,
    pub num_symbols: u64,
    pub num_clients: u64,
    pub secs_since_last_update: u64,
    pub num_reconnects: u64,
    pub num_failed_reconnects: u64,
    pub connection_time: String,
    /// Cleared when the upstream connection is not up
    pub market_time: Option<String>,
    pub connected: bool,
    pub feed_version: String,
    pub login: String,
    pub kbs_recv: f64,
    pub kbps_recv: f64,
    pub avg_kbps_recv: f64,
    pub kbs_sent: f64,
    pub kbps_sent: f64,
    pub avg_kbps_sent: f64,
}

/// One row of a WATCHES reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEntry {
    pub symbol: String,
    pub interval: String,
    pub request_id: Option<String>,
}

/// A decoded gateway message
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// `E` record; fields after the key
    Error(Vec<String>),
    /// `T` heartbeat
    Timestamp(NaiveDateTime),
    ServerConnected,
    ServerDisconnected,
    ReconnectFailed,
    CurrentProtocol(String),
    Stats(ConnStats),
    ReplacedPreviousWatch(String),
    SymbolLimitReached(String),
    Watches(Vec<WatchEntry>),
    /// `n` record
    InvalidSymbol(String),
    Bar { kind: BarKind, bar: Bar },
}

impl FeedEvent {
    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            FeedEvent::Error(_) => "error",
            FeedEvent::Timestamp(_) => "timestamp",
            FeedEvent::ServerConnected => "server_connected",
            FeedEvent::ServerDisconnected => "server_disconnected",
            FeedEvent::ReconnectFailed => "reconnect_failed",
            FeedEvent::CurrentProtocol(_) => "current_protocol",
            FeedEvent::Stats(_) => "stats",
            FeedEvent::ReplacedPreviousWatch(_) => "replaced_previous_watch",
            FeedEvent::SymbolLimitReached(_) => "symbol_limit_reached",
            FeedEvent::Watches(_) => "watches",
            FeedEvent::InvalidSymbol(_) => "invalid_symbol",
            FeedEvent::Bar { kind, .. } => kind.as_str(),
        }
    }
}
