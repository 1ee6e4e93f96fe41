//! Human-readable notices routed to console, daily file and alert channels.

use std::ops::BitOr;
use tracing::{error, info, warn};

use crate::traits::Notifier;
use crate::writer::DailyLogWriter;

/// Subset of {console, file, alert}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Channels(u8);

impl Channels {
    pub const NONE: Channels = Channels(0);
    pub const CONSOLE: Channels = Channels(0b001);
    pub const FILE: Channels = Channels(0b010);
    pub const ALERT: Channels = Channels(0b100);
    pub const ALL: Channels = Channels(0b111);

    pub fn contains(self, other: Channels) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Channels {
    type Output = Channels;

    fn bitor(self, rhs: Channels) -> Channels {
        Channels(self.0 | rhs.0)
    }
}

/// Console → `tracing` info, file → [`DailyLogWriter`], alert → `tracing` error on target `alert`.
pub struct LogNotifier {
    feed: String,
    file: Option<DailyLogWriter>,
}

impl LogNotifier {
    pub fn new(feed: impl Into<String>) -> Self {
        Self {
            feed: feed.into(),
            file: None,
        }
    }

    /// Enable the file channel
    pub fn with_file(mut self, writer: DailyLogWriter) -> Self {
        self.file = Some(writer);
        self
    }

    pub fn close(&self) {
        if let Some(file) = &self.file {
            if let Err(e) = file.close() {
                warn!(feed = %self.feed, error = %e, "Failed to flush notice log");
            }
        }
    }
}

impl Notifier for LogNotifier {
    fn log(&self, message: &str, channels: Channels) {
        if channels.contains(Channels::CONSOLE) {
            info!(feed = %self.feed, "{}", message);
        }
        if channels.contains(Channels::FILE) {
            if let Some(file) = &self.file {
                if let Err(e) = file.append(message) {
                    warn!(feed = %self.feed, error = %e, "Failed to write notice log");
                }
            }
        }
        if channels.contains(Channels::ALERT) {
            error!(target: "alert", feed = %self.feed, "{}", message);
        }
    }
}
