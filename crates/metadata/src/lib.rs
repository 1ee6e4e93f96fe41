//! barfeed-metadata: YAML configuration for the bar feed connector

pub mod error;
pub mod feed;
pub mod watch;

pub use error::MetadataError;
pub use feed::{DatabaseConfig, FeedConfig, GatewayConfig, NotifierConfig, QueueConfig};
pub use watch::{contains_delimiter, IntervalType, WatchSpec};
