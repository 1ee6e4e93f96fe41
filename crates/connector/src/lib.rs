//! barfeed-connector-lib: streaming bar feed client runtime
//!
//! Frames and decodes the gateway's line protocol, tracks upstream health,
//! and hands decoded events through a bounded queue to a router that
//! persists completed bars and logs notices.

pub mod bars;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod framer;
pub mod health;
pub mod listener;
pub mod message;
pub mod metrics;
pub mod notifier;
pub mod queue;
pub mod router;
pub mod server;
pub mod store;
pub mod traits;
pub mod watch;
pub mod writer;

pub use connection::{FeedConnection, FeedProcessor};
pub use dispatch::Dispatcher;
pub use error::{FeedError, StoreError};
pub use framer::LineFramer;
pub use health::{ConnectionHealth, ConnectionState, FeedHealth};
pub use listener::{FeedListener, ListenerSet};
pub use message::{Bar, BarKind, ConnStats, FeedEvent, RawMessage, WatchEntry};
pub use notifier::{Channels, LogNotifier};
pub use queue::{event_queue, DrainHandle, EventReceiver, EventSender};
pub use router::{BarRouter, RouteOutcome, RouterHandle, RouterStats};
pub use server::{create_router, run_server, ServerState};
pub use store::{MemoryBarStore, PostgresBarStore};
pub use traits::{BarStore, Notifier};
pub use watch::WatchRequest;
pub use writer::DailyLogWriter;
