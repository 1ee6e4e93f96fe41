//! Decoders for the interval-bar socket.

use chrono::NaiveDateTime;
use std::str::FromStr;

use crate::dispatch::{read_or_zero, Dispatcher};
use crate::error::FeedError;
use crate::message::{Bar, BarKind, FeedEvent, RawMessage, WatchEntry};

pub const REPLACED_PREVIOUS_WATCH: &str = "REPLACED PREVIOUS WATCH";
pub const SYMBOL_LIMIT_REACHED: &str = "SYMBOL LIMIT REACHED";
pub const WATCHES: &str = "WATCHES";

const BAR_FIELDS: usize = 11;
const BAR_TIMESTAMP_FORMAT: &str = "%Y%m%d %H%M%S";

/// Add bar data, invalid-symbol notices and watch bookkeeping to `dispatcher`
pub fn register(dispatcher: &mut Dispatcher) {
    dispatcher
        .register('B', decode_bar)
        .register('n', decode_invalid_symbol)
        .register_system(REPLACED_PREVIOUS_WATCH, |msg| {
            msg.require("replaced previous watch", 3)?;
            Ok(FeedEvent::ReplacedPreviousWatch(field(msg, 2).to_string()))
        })
        .register_system(SYMBOL_LIMIT_REACHED, |msg| {
            msg.require("symbol limit reached", 3)?;
            Ok(FeedEvent::SymbolLimitReached(field(msg, 2).to_string()))
        })
        .register_system(WATCHES, decode_watches);
}

fn field(msg: &RawMessage, index: usize) -> &str {
    msg.field(index).unwrap_or_default()
}

/// Kind tag of a bar record.
///
/// Field 0 is normally the echoed request id and field 1 carries `B<kind>`.
/// A compact `B<kind>,B,...` header puts the tag in field 0 instead.
fn kind_tag(msg: &RawMessage) -> Option<char> {
    let header = field(msg, 1);
    if header.chars().count() >= 2 {
        header.chars().nth(1)
    } else {
        field(msg, 0).chars().nth(1)
    }
}

fn decode_bar(msg: &RawMessage) -> Result<FeedEvent, FeedError> {
    msg.require("bar", BAR_FIELDS)?;

    let kind = kind_tag(msg)
        .and_then(BarKind::from_tag)
        .ok_or_else(|| {
            FeedError::UnexpectedBarKind(format!("{},{}", field(msg, 0), field(msg, 1)))
        })?;

    let symbol = field(msg, 2);
    if symbol.is_empty() {
        return Err(FeedError::InvalidField {
            field: "symbol",
            value: String::new(),
        });
    }

    let raw_ts = field(msg, 3);
    let timestamp = NaiveDateTime::parse_from_str(raw_ts, BAR_TIMESTAMP_FORMAT).map_err(|_| {
        FeedError::InvalidField {
            field: "timestamp",
            value: raw_ts.to_string(),
        }
    })?;

    let bar = Bar {
        symbol: symbol.to_string(),
        timestamp,
        open: required(msg, 4, "open")?,
        high: required(msg, 5, "high")?,
        low: required(msg, 6, "low")?,
        close: required(msg, 7, "close")?,
        total_volume: required(msg, 8, "total_volume")?,
        period_volume: required(msg, 9, "period_volume")?,
        trade_count: read_or_zero("trade_count", field(msg, 10))?,
    };
    Ok(FeedEvent::Bar { kind, bar })
}

fn required<T: FromStr>(msg: &RawMessage, index: usize, name: &'static str) -> Result<T, FeedError> {
    let raw = field(msg, index);
    raw.parse().map_err(|_| FeedError::InvalidField {
        field: name,
        value: raw.to_string(),
    })
}

fn decode_invalid_symbol(msg: &RawMessage) -> Result<FeedEvent, FeedError> {
    msg.require("invalid symbol", 2)?;
    Ok(FeedEvent::InvalidSymbol(field(msg, 1).to_string()))
}

/// `S,WATCHES,<symbol>,<interval>,<request id>,...`; the last request id may be cut off
fn decode_watches(msg: &RawMessage) -> Result<FeedEvent, FeedError> {
    let rest = &msg.fields()[2..];
    let mut entries = Vec::with_capacity(rest.len() / 3 + 1);
    for chunk in rest.chunks(3) {
        if chunk.len() < 2 {
            // trailing empty field after the last triple
            if chunk[0].is_empty() {
                continue;
            }
            return Err(FeedError::MalformedRecord {
                record: "watches",
                expected: msg.len() + 1,
                actual: msg.len(),
            });
        }
        entries.push(WatchEntry {
            symbol: chunk[0].clone(),
            interval: chunk[1].clone(),
            request_id: chunk.get(2).filter(|id| !id.is_empty()).cloned(),
        });
    }
    Ok(FeedEvent::Watches(entries))
}
