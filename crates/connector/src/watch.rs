//! Interval-bar subscription requests and the control commands around them.

use barfeed_metadata::{contains_delimiter, IntervalType, WatchSpec};
use chrono::{NaiveDateTime, NaiveTime};

use crate::error::FeedError;

pub const UNWATCH_ALL: &str = "S,UNWATCH ALL\r\n";
pub const REQUEST_WATCHES: &str = "S,REQUEST WATCHES\r\n";
pub const DISCONNECT: &str = "S,DISCONNECT\r\n";

const BACKFILL_FORMAT: &str = "%Y%m%d %H%M%S";
const FILTER_FORMAT: &str = "%H%M%S";

/// Live interval bars for one symbol, optionally preceded by a backfill.
///
/// At most one of `backfill_start`, `lookback_days` and `lookback_bars` may be set.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchRequest {
    pub symbol: String,
    pub interval_len: u32,
    pub interval_type: IntervalType,
    pub begin_filter: Option<NaiveTime>,
    pub end_filter: Option<NaiveTime>,
    pub update_secs: Option<u32>,
    pub backfill_start: Option<NaiveDateTime>,
    pub lookback_days: Option<u32>,
    pub lookback_bars: Option<u32>,
}

impl WatchRequest {
    pub fn new(symbol: impl Into<String>, interval_len: u32, interval_type: IntervalType) -> Self {
        Self {
            symbol: symbol.into(),
            interval_len,
            interval_type,
            begin_filter: None,
            end_filter: None,
            update_secs: None,
            backfill_start: None,
            lookback_days: None,
            lookback_bars: None,
        }
    }

    /// Only deliver bars between `begin` and `end` each day
    pub fn with_daily_filter(mut self, begin: NaiveTime, end: NaiveTime) -> Self {
        self.begin_filter = Some(begin);
        self.end_filter = Some(end);
        self
    }

    pub fn with_update_secs(mut self, secs: u32) -> Self {
        self.update_secs = Some(secs);
        self
    }

    pub fn with_backfill_start(mut self, start: NaiveDateTime) -> Self {
        self.backfill_start = Some(start);
        self
    }

    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = Some(days);
        self
    }

    pub fn with_lookback_bars(mut self, bars: u32) -> Self {
        self.lookback_bars = Some(bars);
        self
    }

    /// Echoed back in every bar and notice for this subscription
    pub fn request_id(&self) -> String {
        format!(
            "B-{}-{:04}-{}",
            self.symbol,
            self.interval_len,
            self.interval_type.code()
        )
    }

    pub fn validate(&self) -> Result<(), FeedError> {
        check_symbol(&self.symbol)?;
        if self.interval_len == 0 {
            return Err(FeedError::InvalidWatch(format!(
                "{} has a zero interval",
                self.symbol
            )));
        }
        let backfills = [
            self.backfill_start.is_some(),
            self.lookback_days.is_some(),
            self.lookback_bars.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if backfills > 1 {
            return Err(FeedError::InvalidWatch(format!(
                "{} sets more than one backfill mode",
                self.symbol
            )));
        }
        Ok(())
    }

    /// `BW` subscribe command, CRLF terminated
    pub fn to_command(&self) -> Result<String, FeedError> {
        self.validate()?;
        Ok(format!(
            "BW,{},{},{},{},{},{},{},{},{},,{}\r\n",
            self.symbol,
            self.interval_len,
            opt(self.backfill_start.map(|t| t.format(BACKFILL_FORMAT))),
            opt(self.lookback_days),
            opt(self.lookback_bars),
            opt(self.begin_filter.map(|t| t.format(FILTER_FORMAT))),
            opt(self.end_filter.map(|t| t.format(FILTER_FORMAT))),
            self.request_id(),
            self.interval_type.code(),
            opt(self.update_secs),
        ))
    }
}

fn opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// A symbol must be non-empty and fit in one field of one command line
pub(crate) fn check_symbol(symbol: &str) -> Result<(), FeedError> {
    if symbol.is_empty() {
        return Err(FeedError::InvalidWatch("empty symbol".into()));
    }
    if contains_delimiter(symbol) {
        return Err(FeedError::InvalidWatch(format!(
            "symbol {:?} contains a delimiter",
            symbol
        )));
    }
    Ok(())
}

/// `BR` unsubscribe command
pub fn unwatch_command(symbol: &str) -> String {
    format!("BR,{}\r\n", symbol)
}

impl From<&WatchSpec> for WatchRequest {
    fn from(spec: &WatchSpec) -> Self {
        Self {
            symbol: spec.symbol.clone(),
            interval_len: spec.interval,
            interval_type: spec.interval_type,
            begin_filter: spec.begin_filter,
            end_filter: spec.end_filter,
            update_secs: spec.update_secs,
            backfill_start: spec.backfill_start,
            lookback_days: spec.lookback_days,
            lookback_bars: spec.lookback_bars,
        }
    }
}
