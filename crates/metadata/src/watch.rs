use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::MetadataError;

/// True if `value` would split a wire field or a command line
pub fn contains_delimiter(value: &str) -> bool {
    value.chars().any(|c| matches!(c, ',' | '\r' | '\n'))
}

/// Unit an interval bar is measured in.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IntervalType {
    #[default]
    #[serde(alias = "s")]
    Seconds,
    #[serde(alias = "v")]
    Volume,
    #[serde(alias = "t")]
    Ticks,
}

impl IntervalType {
    /// Single-letter code used on the wire
    pub fn code(self) -> char {
        match self {
            IntervalType::Seconds => 's',
            IntervalType::Volume => 'v',
            IntervalType::Ticks => 't',
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "s" => Some(IntervalType::Seconds),
            "v" => Some(IntervalType::Volume),
            "t" => Some(IntervalType::Ticks),
            _ => None,
        }
    }
}

impl fmt::Display for IntervalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One configured interval-bar subscription.
///
/// At most one of `backfill_start`, `lookback_days`, `lookback_bars` may be set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchSpec {
    pub symbol: String,
    pub interval: u32,
    #[serde(default)]
    pub interval_type: IntervalType,
    #[serde(default)]
    pub begin_filter: Option<NaiveTime>,
    #[serde(default)]
    pub end_filter: Option<NaiveTime>,
    #[serde(default)]
    pub update_secs: Option<u32>,
    #[serde(default)]
    pub backfill_start: Option<NaiveDateTime>,
    #[serde(default)]
    pub lookback_days: Option<u32>,
    #[serde(default)]
    pub lookback_bars: Option<u32>,
}

impl WatchSpec {
    pub fn new(symbol: impl Into<String>, interval: u32, interval_type: IntervalType) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            interval_type,
            begin_filter: None,
            end_filter: None,
            update_secs: None,
            backfill_start: None,
            lookback_days: None,
            lookback_bars: None,
        }
    }

    /// Number of backfill modes set
    pub fn backfill_modes(&self) -> usize {
        [
            self.backfill_start.is_some(),
            self.lookback_days.is_some(),
            self.lookback_bars.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.symbol.trim().is_empty() {
            return Err(MetadataError::Validation("watch symbol is empty".into()));
        }
        if contains_delimiter(&self.symbol) {
            return Err(MetadataError::Validation(format!(
                "watch symbol {:?} contains a field or line delimiter",
                self.symbol
            )));
        }
        if self.interval == 0 {
            return Err(MetadataError::Validation(format!(
                "watch {} has a zero interval",
                self.symbol
            )));
        }
        if self.backfill_modes() > 1 {
            return Err(MetadataError::Validation(format!(
                "watch {} sets more than one of backfill_start, lookback_days, lookback_bars",
                self.symbol
            )));
        }
        Ok(())
    }
}
