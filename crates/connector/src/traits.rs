use async_trait::async_trait;

use crate::error::StoreError;
use crate::message::Bar;
use crate::notifier::Channels;

/// Persistence sink for completed bars (Postgres, in-memory, etc.)
#[async_trait]
pub trait BarStore: Send + Sync {
    /// Whether a table exists for `symbol`. Tables are provisioned elsewhere.
    async fn table_exists(&self, symbol: &str) -> Result<bool, StoreError>;

    /// Append one row to `table`
    async fn insert_bar(&self, table: &str, bar: &Bar) -> Result<(), StoreError>;
}

/// Notification sink for human-readable feed notices
pub trait Notifier: Send + Sync {
    /// Deliver `message` to each channel in `channels`
    fn log(&self, message: &str, channels: Channels);
}
