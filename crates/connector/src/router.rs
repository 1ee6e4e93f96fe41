use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::error::FeedError;
use crate::message::{Bar, BarKind, FeedEvent};
use crate::metrics::FeedMetrics;
use crate::notifier::Channels;
use crate::queue::{DrainHandle, EventReceiver};
use crate::store::table_for_symbol;
use crate::traits::{BarStore, Notifier};

/// What happened to one queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Stored,
    /// Update bar while update persistence is off
    Skipped,
    UnknownSymbol,
    MissingTable,
    StoreFailed,
    Notified,
}

/// Totals reported when the router stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub events: u64,
    pub bars_stored: u64,
    pub bars_skipped: u64,
    pub bars_dropped: u64,
    pub store_failures: u64,
    pub notices: u64,
}

impl RouterStats {
    fn record(&mut self, outcome: RouteOutcome) {
        self.events += 1;
        match outcome {
            RouteOutcome::Stored => self.bars_stored += 1,
            RouteOutcome::Skipped => self.bars_skipped += 1,
            RouteOutcome::UnknownSymbol | RouteOutcome::MissingTable => self.bars_dropped += 1,
            RouteOutcome::StoreFailed => self.store_failures += 1,
            RouteOutcome::Notified => self.notices += 1,
        }
    }
}

/// Drains the event queue: bars go to the store, everything else to the notifier.
pub struct BarRouter<S: BarStore, N: Notifier> {
    feed_name: String,
    store: Arc<S>,
    notifier: Arc<N>,
    symbols: HashSet<String>,
    persist_updates: bool,
    metrics: FeedMetrics,
}

impl<S: BarStore + 'static, N: Notifier + 'static> BarRouter<S, N> {
    /// Only bars for `symbols` ever reach the store
    pub fn new<I>(feed_name: impl Into<String>, store: Arc<S>, notifier: Arc<N>, symbols: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let feed_name = feed_name.into();
        Self {
            metrics: FeedMetrics::new(feed_name.clone()),
            feed_name,
            store,
            notifier,
            symbols: symbols.into_iter().collect(),
            persist_updates: false,
        }
    }

    /// Also persist still-forming update bars
    pub fn persist_updates(mut self, enabled: bool) -> Self {
        self.persist_updates = enabled;
        self
    }

    /// Handle one entry
    pub async fn route(&self, event: FeedEvent) -> RouteOutcome {
        match event {
            FeedEvent::Bar { kind, bar } => self.route_bar(kind, &bar).await,
            other => {
                for (message, channels) in describe(&other) {
                    self.notifier.log(&message, channels);
                }
                RouteOutcome::Notified
            }
        }
    }

    async fn route_bar(&self, kind: BarKind, bar: &Bar) -> RouteOutcome {
        if kind == BarKind::Update && !self.persist_updates {
            trace!(feed = %self.feed_name, symbol = %bar.symbol, "Update bar not persisted");
            return RouteOutcome::Skipped;
        }

        if !self.symbols.contains(&bar.symbol) {
            warn!(feed = %self.feed_name, symbol = %bar.symbol, "Bar for unregistered symbol");
            self.notifier.log(
                &format!("Bar received for unregistered symbol {}", bar.symbol),
                Channels::CONSOLE | Channels::FILE,
            );
            self.metrics.inc_dropped("unknown_symbol");
            return RouteOutcome::UnknownSymbol;
        }

        match self.store.table_exists(&bar.symbol).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(feed = %self.feed_name, symbol = %bar.symbol, "No table for symbol");
                self.notifier.log(
                    &format!("No table for symbol {}, bar dropped", bar.symbol),
                    Channels::CONSOLE | Channels::FILE,
                );
                self.metrics.inc_dropped("missing_table");
                return RouteOutcome::MissingTable;
            }
            Err(e) => {
                error!(feed = %self.feed_name, symbol = %bar.symbol, error = %e, "Table lookup failed");
                self.metrics.inc_dropped("store_error");
                return RouteOutcome::StoreFailed;
            }
        }

        let table = table_for_symbol(&bar.symbol);
        match self.store.insert_bar(&table, bar).await {
            Ok(()) => {
                debug!(
                    feed = %self.feed_name,
                    symbol = %bar.symbol,
                    kind = kind.as_str(),
                    ts = %bar.timestamp,
                    "Stored bar"
                );
                self.metrics.inc_stored();
                RouteOutcome::Stored
            }
            Err(e) => {
                error!(feed = %self.feed_name, symbol = %bar.symbol, error = %e, "Failed to store bar");
                self.notifier.log(
                    &format!("Failed to store {} bar at {}: {}", bar.symbol, bar.timestamp, e),
                    Channels::CONSOLE | Channels::FILE,
                );
                self.metrics.inc_dropped("store_error");
                RouteOutcome::StoreFailed
            }
        }
    }

    /// Spawn the consumer task
    pub fn start_listening(self, mut rx: EventReceiver, join_timeout: Duration) -> RouterHandle {
        let drain = rx.drain_handle();
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let feed_name = self.feed_name.clone();

        let task = tokio::spawn(async move {
            let mut stats = RouterStats::default();
            info!(feed = %self.feed_name, "Bar router started");
            loop {
                select! {
                    // queued entries win over cancellation
                    biased;
                    event = rx.recv() => {
                        match event {
                            Some(event) => {
                                let outcome = self.route(event).await;
                                stats.record(outcome);
                                rx.task_done();
                                self.metrics.set_queue_in_flight(rx.in_flight());
                            }
                            None => {
                                info!(feed = %self.feed_name, "Event queue closed");
                                break;
                            }
                        }
                    }
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            stats
        });

        RouterHandle {
            feed_name,
            drain,
            cancel_tx,
            task: Some(task),
            join_timeout,
        }
    }
}

/// Owner's handle on a running router task
pub struct RouterHandle {
    feed_name: String,
    drain: DrainHandle,
    cancel_tx: watch::Sender<bool>,
    task: Option<JoinHandle<RouterStats>>,
    join_timeout: Duration,
}

impl RouterHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Entries pushed but not yet processed
    pub fn in_flight(&self) -> usize {
        self.drain.in_flight()
    }

    /// Drain, cancel, then join; the whole wait is bounded by the join timeout.
    ///
    /// Everything in the queue when this is called is processed before the task
    /// exits. A consumer that dies or stalls mid-drain is reported as
    /// [`FeedError::Shutdown`] and aborted.
    pub async fn stop_listening(&mut self) -> Result<RouterStats, FeedError> {
        let Some(mut task) = self.task.take() else {
            return Ok(RouterStats::default());
        };
        let deadline = Instant::now() + self.join_timeout;

        info!(feed = %self.feed_name, in_flight = self.drain.in_flight(), "Waiting for event queue to clear");
        let drain = &self.drain;
        let drained = timeout_at(deadline, async {
            select! {
                _ = drain.join() => None,
                joined = &mut task => Some(joined),
            }
        })
        .await;

        let joined = match drained {
            // consumer already exited
            Ok(Some(joined)) => joined,
            Ok(None) => {
                self.cancel_tx.send(true).ok();
                match timeout_at(deadline, &mut task).await {
                    Ok(joined) => joined,
                    Err(_) => return Err(self.abandon(task, "did not stop")),
                }
            }
            Err(_) => return Err(self.abandon(task, "did not drain the event queue")),
        };

        match joined {
            Ok(stats) => {
                let left = self.drain.in_flight();
                if left > 0 {
                    error!(feed = %self.feed_name, in_flight = left, "Bar router exited with events still queued");
                    return Err(FeedError::Shutdown(format!(
                        "bar router exited with {} events unprocessed",
                        left
                    )));
                }
                info!(
                    feed = %self.feed_name,
                    events = stats.events,
                    stored = stats.bars_stored,
                    dropped = stats.bars_dropped,
                    failures = stats.store_failures,
                    "Bar router stopped"
                );
                Ok(stats)
            }
            Err(e) => {
                error!(feed = %self.feed_name, error = %e, "Bar router task panicked");
                Err(FeedError::Shutdown(format!("bar router panicked: {}", e)))
            }
        }
    }

    fn abandon(&self, task: JoinHandle<RouterStats>, what: &str) -> FeedError {
        self.cancel_tx.send(true).ok();
        task.abort();
        error!(
            feed = %self.feed_name,
            in_flight = self.drain.in_flight(),
            "Bar router {} within {:?}",
            what,
            self.join_timeout
        );
        FeedError::Shutdown(format!(
            "bar router {} within {:?}",
            what, self.join_timeout
        ))
    }
}

/// Log lines and channels for a non-bar event
pub fn describe(event: &FeedEvent) -> Vec<(String, Channels)> {
    let console_file = Channels::CONSOLE | Channels::FILE;
    match event {
        FeedEvent::Timestamp(ts) => vec![(format!("Heartbeat: {}", ts), Channels::CONSOLE)],
        FeedEvent::Error(fields) => {
            vec![(format!("Gateway error: {}", fields.join(",")), Channels::ALL)]
        }
        FeedEvent::ServerConnected => {
            vec![("SERVER CONNECTED: feed is fresh".to_string(), Channels::ALL)]
        }
        FeedEvent::ServerDisconnected => {
            vec![("SERVER DISCONNECTED: feed is stale".to_string(), Channels::ALL)]
        }
        FeedEvent::ReconnectFailed => vec![(
            "SERVER RECONNECT FAILED: feed is stale, halt trading until resolved".to_string(),
            Channels::ALL,
        )],
        FeedEvent::CurrentProtocol(version) => {
            vec![(format!("CURRENT PROTOCOL {}", version), console_file)]
        }
        FeedEvent::Stats(stats) => vec![(
            format!(
                "STATS: server {}:{} status {} symbols {}/{} clients {} reconnects {} failed {} recv {:.1} kbps",
                stats.server_ip,
                stats.server_port,
                if stats.connected { "Connected" } else { "Not Connected" },
                stats.num_symbols,
                stats.max_symbols,
                stats.num_clients,
                stats.num_reconnects,
                stats.num_failed_reconnects,
                stats.kbps_recv
            ),
            Channels::FILE,
        )],
        FeedEvent::ReplacedPreviousWatch(symbol) => {
            vec![(format!("REPLACED PREVIOUS WATCH: {}", symbol), console_file)]
        }
        FeedEvent::SymbolLimitReached(symbol) => {
            vec![(format!("SYMBOL LIMIT REACHED: {}", symbol), Channels::ALL)]
        }
        FeedEvent::Watches(entries) => entries
            .iter()
            .map(|w| {
                (
                    format!(
                        "WATCHING: Symbol: {} Interval: {} RequestID: {}",
                        w.symbol,
                        w.interval,
                        w.request_id.as_deref().unwrap_or("")
                    ),
                    console_file,
                )
            })
            .collect(),
        FeedEvent::InvalidSymbol(symbol) => {
            vec![(format!("Invalid symbol: {}", symbol), Channels::ALL)]
        }
        FeedEvent::Bar { .. } => Vec::new(),
    }
}
