//! Two-level routing of framed lines to decoders.
//!
//! The primary key is the first character of the first field. `S` records are
//! routed a second time on the exact system-message name in field 1. Tables are
//! open: [`Dispatcher::base`] registers the records every gateway socket sends and
//! [`crate::bars::register`] extends it for the interval-bar socket.

use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::str::FromStr;

use crate::bars;
use crate::error::FeedError;
use crate::message::{ConnStats, FeedEvent, RawMessage};

pub type Decoder = fn(&RawMessage) -> Result<FeedEvent, FeedError>;

/// Primary key of system records
pub const SYSTEM_KEY: char = 'S';

pub const SERVER_CONNECTED: &str = "SERVER CONNECTED";
pub const SERVER_DISCONNECTED: &str = "SERVER DISCONNECTED";
pub const SERVER_RECONNECT_FAILED: &str = "SERVER RECONNECT FAILED";
pub const CURRENT_PROTOCOL: &str = "CURRENT PROTOCOL";
pub const STATS: &str = "STATS";

const TIMESTAMP_FORMAT: &str = "%Y%m%d %H:%M:%S";
const STATS_FIELDS: usize = 21;

#[derive(Clone, Copy)]
enum Route {
    Decode(Decoder),
    System,
}

#[derive(Clone)]
pub struct Dispatcher {
    conn: String,
    primary: HashMap<char, Route>,
    system: HashMap<String, Decoder>,
}

impl Dispatcher {
    /// Empty table; every message is unexpected
    pub fn new(conn: impl Into<String>) -> Self {
        Self {
            conn: conn.into(),
            primary: HashMap::new(),
            system: HashMap::new(),
        }
    }

    /// Errors, heartbeats and the system records shared by all gateway sockets
    pub fn base(conn: impl Into<String>) -> Self {
        let mut dispatcher = Self::new(conn);
        dispatcher
            .register('E', decode_error)
            .register('T', decode_timestamp)
            .route_system(SYSTEM_KEY)
            .register_system(SERVER_CONNECTED, |_| Ok(FeedEvent::ServerConnected))
            .register_system(SERVER_DISCONNECTED, |_| Ok(FeedEvent::ServerDisconnected))
            .register_system(SERVER_RECONNECT_FAILED, |_| Ok(FeedEvent::ReconnectFailed))
            .register_system(CURRENT_PROTOCOL, decode_current_protocol)
            .register_system(STATS, decode_stats);
        dispatcher
    }

    /// Base table extended with bar data records
    pub fn with_bars(conn: impl Into<String>) -> Self {
        let mut dispatcher = Self::base(conn);
        bars::register(&mut dispatcher);
        dispatcher
    }

    pub fn register(&mut self, key: char, decoder: Decoder) -> &mut Self {
        self.primary.insert(key, Route::Decode(decoder));
        self
    }

    /// Route records with this primary key through the system-name table
    pub fn route_system(&mut self, key: char) -> &mut Self {
        self.primary.insert(key, Route::System);
        self
    }

    pub fn register_system(&mut self, name: &str, decoder: Decoder) -> &mut Self {
        self.system.insert(name.to_string(), decoder);
        self
    }

    pub fn handles(&self, key: char) -> bool {
        self.primary.contains_key(&key)
    }

    pub fn handles_system(&self, name: &str) -> bool {
        self.system.contains_key(name)
    }

    pub fn dispatch(&self, msg: &RawMessage) -> Result<FeedEvent, FeedError> {
        let route = msg
            .primary_key()
            .and_then(|key| self.primary.get(&key))
            .ok_or_else(|| self.unexpected(msg))?;

        match route {
            Route::Decode(decode) => decode(msg),
            Route::System => {
                msg.require("system", 2)?;
                let name = msg.field(1).unwrap_or_default();
                let decode = self.system.get(name).ok_or_else(|| self.unexpected(msg))?;
                decode(msg)
            }
        }
    }

    fn unexpected(&self, msg: &RawMessage) -> FeedError {
        FeedError::UnexpectedMessage {
            conn: self.conn.clone(),
            line: msg.to_string(),
        }
    }
}

fn decode_error(msg: &RawMessage) -> Result<FeedEvent, FeedError> {
    msg.require("error", 2)?;
    Ok(FeedEvent::Error(msg.fields()[1..].to_vec()))
}

fn decode_timestamp(msg: &RawMessage) -> Result<FeedEvent, FeedError> {
    msg.require("timestamp", 2)?;
    let raw = msg.field(1).unwrap_or_default();
    let ts = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).map_err(|_| {
        FeedError::InvalidField {
            field: "timestamp",
            value: raw.to_string(),
        }
    })?;
    Ok(FeedEvent::Timestamp(ts))
}

fn decode_current_protocol(msg: &RawMessage) -> Result<FeedEvent, FeedError> {
    msg.require("current protocol", 3)?;
    Ok(FeedEvent::CurrentProtocol(
        msg.field(2).unwrap_or_default().to_string(),
    ))
}

fn decode_stats(msg: &RawMessage) -> Result<FeedEvent, FeedError> {
    msg.require("stats", STATS_FIELDS)?;
    let f = |i: usize| msg.field(i).unwrap_or_default();

    let connected = f(12) == "Connected";
    Ok(FeedEvent::Stats(ConnStats {
        server_ip: f(2).to_string(),
        server_port: read_or_zero("server_port", f(3))?,
        max_symbols: read_or_zero("max_symbols", f(4))?,
        num_symbols: read_or_zero("num_symbols", f(5))?,
        num_clients: read_or_zero("num_clients", f(6))?,
        secs_since_last_update: read_or_zero("secs_since_last_update", f(7))?,
        num_reconnects: read_or_zero("num_reconnects", f(8))?,
        num_failed_reconnects: read_or_zero("num_failed_reconnects", f(9))?,
        connection_time: f(10).to_string(),
        market_time: (connected && !f(11).is_empty()).then(|| f(11).to_string()),
        connected,
        feed_version: f(13).to_string(),
        login: f(14).to_string(),
        kbs_recv: read_or_zero("kbs_recv", f(15))?,
        kbps_recv: read_or_zero("kbps_recv", f(16))?,
        avg_kbps_recv: read_or_zero("avg_kbps_recv", f(17))?,
        kbs_sent: read_or_zero("kbs_sent", f(18))?,
        kbps_sent: read_or_zero("kbps_sent", f(19))?,
        avg_kbps_sent: read_or_zero("avg_kbps_sent", f(20))?,
    }))
}

/// Parse a numeric field; empty reads as zero
pub(crate) fn read_or_zero<T>(field: &'static str, raw: &str) -> Result<T, FeedError>
where
    T: FromStr + Default,
{
    if raw.is_empty() {
        return Ok(T::default());
    }
    raw.parse().map_err(|_| FeedError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const STATS_LINE: &str = "S,STATS,66.112.156.228,60002,1300,12,1,0,3,0,\
        Dec 04 9:28AM,Dec 04 9:30AM,Connected,6.1.0.20,USER01,1024.5,12.25,11.5,2.0,0.1,0.05";

    fn dispatch(line: &str) -> Result<FeedEvent, FeedError> {
        Dispatcher::base("test").dispatch(&RawMessage::parse(line))
    }

    #[test]
    fn test_unregistered_primary_key_is_unexpected() {
        for line in ["Q,SPY,1", "", "B,not registered in base", "nSPY"] {
            match dispatch(line) {
                Err(FeedError::UnexpectedMessage { conn, line: raw }) => {
                    assert_eq!(conn, "test");
                    assert_eq!(raw, line);
                }
                other => panic!("{:?} dispatched to {:?}", line, other),
            }
        }
    }

    #[test]
    fn test_unregistered_system_name_is_unexpected() {
        let err = dispatch("S,KEY,abc").unwrap_err();
        assert!(matches!(err, FeedError::UnexpectedMessage { .. }));
        assert!(err.is_fatal());

        // bar-only system names are not part of the base table
        assert!(dispatch("S,WATCHES,SPY,60").is_err());
    }

    #[test]
    fn test_bare_system_key_is_malformed() {
        assert!(matches!(
            dispatch("S"),
            Err(FeedError::MalformedRecord { record: "system", .. })
        ));
    }

    #[test]
    fn test_base_records() {
        assert_eq!(
            dispatch("S,SERVER CONNECTED").unwrap(),
            FeedEvent::ServerConnected
        );
        assert_eq!(
            dispatch("S,SERVER DISCONNECTED").unwrap(),
            FeedEvent::ServerDisconnected
        );
        assert_eq!(
            dispatch("S,SERVER RECONNECT FAILED").unwrap(),
            FeedEvent::ReconnectFailed
        );
        assert_eq!(
            dispatch("S,CURRENT PROTOCOL,6.0").unwrap(),
            FeedEvent::CurrentProtocol("6.0".into())
        );
        assert_eq!(
            dispatch("E,!SYNTAX_ERROR!,bad request").unwrap(),
            FeedEvent::Error(vec!["!SYNTAX_ERROR!".into(), "bad request".into()])
        );
        assert_eq!(
            dispatch("T,20201204 09:30:05").unwrap(),
            FeedEvent::Timestamp(
                NaiveDate::from_ymd_opt(2020, 12, 4)
                    .unwrap()
                    .and_hms_opt(9, 30, 5)
                    .unwrap()
            )
        );
    }

    #[test]
    fn test_bad_heartbeat_is_per_record_fault() {
        let err = dispatch("T,yesterday").unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_stats_record() {
        let FeedEvent::Stats(stats) = dispatch(STATS_LINE).unwrap() else {
            panic!("expected stats");
        };
        assert_eq!(stats.server_ip, "66.112.156.228");
        assert_eq!(stats.server_port, 60002);
        assert_eq!(stats.max_symbols, 1300);
        assert_eq!(stats.num_symbols, 12);
        assert_eq!(stats.num_reconnects, 3);
        assert_eq!(stats.connection_time, "Dec 04 9:28AM");
        assert_eq!(stats.market_time.as_deref(), Some("Dec 04 9:30AM"));
        assert!(stats.connected);
        assert_eq!(stats.feed_version, "6.1.0.20");
        assert_eq!(stats.login, "USER01");
        assert_eq!(stats.kbs_recv, 1024.5);
        assert_eq!(stats.avg_kbps_sent, 0.05);
    }

    #[test]
    fn test_stats_empty_numbers_read_as_zero() {
        let line = "S,STATS,,,,,,,,,,Dec 04 9:30AM,Not Connected,,,,,,,,";
        let FeedEvent::Stats(stats) = dispatch(line).unwrap() else {
            panic!("expected stats");
        };
        assert_eq!(stats.server_port, 0);
        assert_eq!(stats.kbps_recv, 0.0);
        assert!(!stats.connected);
        assert_eq!(stats.market_time, None);
    }

    #[test]
    fn test_stats_underflow_is_fatal() {
        let err = dispatch("S,STATS,1,2,3").unwrap_err();
        assert!(matches!(
            err,
            FeedError::MalformedRecord {
                record: "stats",
                expected: 21,
                actual: 5
            }
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_extension_does_not_change_base() {
        let mut dispatcher = Dispatcher::base("test");
        assert!(!dispatcher.handles('Z'));
        dispatcher.register('Z', |msg| Ok(FeedEvent::InvalidSymbol(msg.to_string())));
        assert!(dispatcher.handles('Z'));
        assert!(dispatcher.handles_system(STATS));
        assert_eq!(
            dispatcher.dispatch(&RawMessage::parse("Z,1")).unwrap(),
            FeedEvent::InvalidSymbol("Z,1".into())
        );
    }
}
