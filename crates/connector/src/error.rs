use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("transport failed on {conn}: {reason}")]
    Transport { conn: String, reason: String },
    #[error("{conn} received unexpected message: {line}")]
    UnexpectedMessage { conn: String, line: String },
    #[error("malformed {record} record: expected at least {expected} fields, got {actual}")]
    MalformedRecord {
        record: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("unexpected bar kind in header {0:?}")]
    UnexpectedBarKind(String),
    #[error("desired protocol {expected}, server says protocol {actual} in {conn}")]
    ProtocolVersionMismatch {
        conn: String,
        expected: String,
        actual: String,
    },
    #[error("invalid {field} value {value:?}")]
    InvalidField { field: &'static str, value: String },
    #[error("invalid watch request: {0}")]
    InvalidWatch(String),
    #[error("{0} is not connected")]
    NotConnected(String),
    #[error("{0} is already connected")]
    AlreadyConnected(String),
    #[error("event queue closed")]
    QueueClosed,
    #[error("shutdown incomplete: {0}")]
    Shutdown(String),
}

impl FeedError {
    pub(crate) fn transport(conn: &str, err: impl std::fmt::Display) -> Self {
        FeedError::Transport {
            conn: conn.to_string(),
            reason: err.to_string(),
        }
    }

    /// Whether the reader must stop after this error.
    ///
    /// Per-record faults (bad numbers, bad timestamps) only drop the record;
    /// everything that means the stream can no longer be trusted is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            FeedError::InvalidField { .. } | FeedError::InvalidWatch(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("invalid table name {0:?}")]
    InvalidTable(String),
    #[error("unknown table {0}")]
    UnknownTable(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
