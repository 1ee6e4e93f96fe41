//! Bar persistence: one pre-provisioned table per symbol.

use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, Runtime};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use tokio_postgres::NoTls;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::message::Bar;
use crate::traits::BarStore;

/// Tables are named after the lower-cased symbol
pub fn table_for_symbol(symbol: &str) -> String {
    symbol.to_lowercase()
}

/// Table names are interpolated into SQL, so only `[a-z0-9_]` is accepted
fn checked_table(table: &str) -> Result<&str, StoreError> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(table)
    } else {
        Err(StoreError::InvalidTable(table.to_string()))
    }
}

/// Create a connection pool from a database URL
pub fn create_pool(database_url: &str) -> Result<Pool, StoreError> {
    let pg_config: tokio_postgres::Config = database_url
        .parse()
        .map_err(|e: tokio_postgres::Error| StoreError::Pool(format!("invalid database URL: {}", e)))?;

    let mut cfg = Config::new();
    if let Some(host) = pg_config.get_hosts().first() {
        match host {
            tokio_postgres::config::Host::Tcp(h) => cfg.host = Some(h.clone()),
            #[cfg(unix)]
            tokio_postgres::config::Host::Unix(p) => {
                cfg.host = Some(p.to_string_lossy().to_string())
            }
        }
    }
    if let Some(port) = pg_config.get_ports().first() {
        cfg.port = Some(*port);
    }
    if let Some(user) = pg_config.get_user() {
        cfg.user = Some(user.to_string());
    }
    if let Some(password) = pg_config.get_password() {
        cfg.password = Some(String::from_utf8_lossy(password).to_string());
    }
    if let Some(dbname) = pg_config.get_dbname() {
        cfg.dbname = Some(dbname.to_string());
    }

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| StoreError::Pool(format!("failed to create pool: {}", e)))
}

/// Postgres-backed store. The set of public tables is loaded once by
/// [`PostgresBarStore::connect`] and again on [`PostgresBarStore::refresh_tables`].
pub struct PostgresBarStore {
    pool: Pool,
    tables: RwLock<HashSet<String>>,
}

impl PostgresBarStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let store = Self {
            pool: create_pool(database_url)?,
            tables: RwLock::new(HashSet::new()),
        };
        let count = store.refresh_tables().await?;
        info!(tables = count, "Loaded public tables");
        Ok(store)
    }

    pub async fn refresh_tables(&self) -> Result<usize, StoreError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(format!("failed to get connection: {}", e)))?;

        let rows = client
            .query(
                "SELECT table_name::text FROM information_schema.tables WHERE table_schema = 'public'",
                &[],
            )
            .await?;

        let tables: HashSet<String> = rows
            .iter()
            .map(|row| row.get::<_, String>(0).to_lowercase())
            .collect();
        let count = tables.len();
        *self.tables.write().unwrap_or_else(PoisonError::into_inner) = tables;
        Ok(count)
    }
}

#[async_trait]
impl BarStore for PostgresBarStore {
    async fn table_exists(&self, symbol: &str) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&table_for_symbol(symbol)))
    }

    async fn insert_bar(&self, table: &str, bar: &Bar) -> Result<(), StoreError> {
        let table = checked_table(table)?;
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(format!("failed to get connection: {}", e)))?;

        let sql = format!(
            "INSERT INTO \"{}\" (date, time, open, high, low, close, volume, cumvol) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            table
        );
        let date = bar.timestamp.date();
        let time = bar.timestamp.time();
        let volume = Decimal::from(bar.period_volume);
        let cumvol = Decimal::from(bar.total_volume);
        client
            .execute(
                sql.as_str(),
                &[
                    &date, &time, &bar.open, &bar.high, &bar.low, &bar.close, &volume, &cumvol,
                ],
            )
            .await?;

        debug!(table = %table, ts = %bar.timestamp, "Inserted bar");
        Ok(())
    }
}

/// In-process store keyed by table name
#[derive(Default)]
pub struct MemoryBarStore {
    tables: Mutex<HashMap<String, Vec<Bar>>>,
    unavailable: AtomicBool,
}

impl MemoryBarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tables<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let store = Self::new();
        for symbol in symbols {
            store.create_table(symbol.as_ref());
        }
        store
    }

    pub fn create_table(&self, symbol: &str) {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(table_for_symbol(symbol))
            .or_default();
    }

    /// Make every insert fail until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn rows(&self, table: &str) -> Vec<Bar> {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn total_rows(&self) -> usize {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }
}

#[async_trait]
impl BarStore for MemoryBarStore {
    async fn table_exists(&self, symbol: &str) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&table_for_symbol(symbol)))
    }

    async fn insert_bar(&self, table: &str, bar: &Bar) -> Result<(), StoreError> {
        let table = checked_table(table)?;
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        rows.push(bar.clone());
        Ok(())
    }
}
