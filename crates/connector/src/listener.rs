//! In-line listeners called from the reader task.

use chrono::NaiveDateTime;
use std::sync::{Arc, PoisonError, RwLock};

use crate::message::{Bar, BarKind, ConnStats, FeedEvent, WatchEntry};

/// Callbacks fired synchronously, in wire order, on the reader task.
///
/// A slow listener stalls ingestion; anything that does I/O belongs behind the
/// event queue instead.
pub trait FeedListener: Send + Sync {
    fn feed_is_fresh(&self) {}
    fn feed_is_stale(&self) {}
    fn feed_has_error(&self) {}
    fn process_conn_stats(&self, _stats: &ConnStats) {}
    fn process_timestamp(&self, _timestamp: NaiveDateTime) {}
    fn process_error(&self, _fields: &[String]) {}
    fn process_invalid_symbol(&self, _symbol: &str) {}
    fn process_replaced_previous_watch(&self, _symbol: &str) {}
    fn process_symbol_limit_reached(&self, _symbol: &str) {}
    fn process_watch(&self, _watch: &WatchEntry) {}
    fn process_latest_bar_update(&self, _bar: &Bar) {}
    fn process_live_bar(&self, _bar: &Bar) {}
    fn process_history_bar(&self, _bar: &Bar) {}
}

type Snapshot = Arc<Vec<Arc<dyn FeedListener>>>;

/// Listener registry safe to mutate while the reader is fanning out.
///
/// Writers swap in a new list; fan-out iterates the snapshot it grabbed.
#[derive(Default)]
pub struct ListenerSet {
    inner: RwLock<Snapshot>,
}

fn same(a: &Arc<dyn FeedListener>, b: &Arc<dyn FeedListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if `listener` was already registered
    pub fn add(&self, listener: Arc<dyn FeedListener>) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if guard.iter().any(|l| same(l, &listener)) {
            return false;
        }
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(listener);
        *guard = Arc::new(next);
        true
    }

    /// Returns false if `listener` was not registered
    pub fn remove(&self, listener: &Arc<dyn FeedListener>) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !guard.iter().any(|l| same(l, listener)) {
            return false;
        }
        let next: Vec<_> = guard.iter().filter(|l| !same(l, listener)).cloned().collect();
        *guard = Arc::new(next);
        true
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Snapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Deliver `event` to every registered listener
    pub fn notify(&self, event: &FeedEvent) {
        let listeners = self.snapshot();
        for listener in listeners.iter() {
            deliver(listener.as_ref(), event);
        }
    }
}

fn deliver(listener: &dyn FeedListener, event: &FeedEvent) {
    match event {
        FeedEvent::Error(fields) => listener.process_error(fields),
        FeedEvent::Timestamp(ts) => listener.process_timestamp(*ts),
        FeedEvent::ServerConnected => listener.feed_is_fresh(),
        FeedEvent::ServerDisconnected => listener.feed_is_stale(),
        FeedEvent::ReconnectFailed => {
            listener.feed_is_stale();
            listener.feed_has_error();
        }
        FeedEvent::CurrentProtocol(_) => {}
        FeedEvent::Stats(stats) => listener.process_conn_stats(stats),
        FeedEvent::ReplacedPreviousWatch(symbol) => {
            listener.process_replaced_previous_watch(symbol)
        }
        FeedEvent::SymbolLimitReached(symbol) => listener.process_symbol_limit_reached(symbol),
        FeedEvent::Watches(entries) => {
            for entry in entries {
                listener.process_watch(entry);
            }
        }
        FeedEvent::InvalidSymbol(symbol) => listener.process_invalid_symbol(symbol),
        FeedEvent::Bar { kind, bar } => match kind {
            BarKind::Update => listener.process_latest_bar_update(bar),
            BarKind::CompleteLive => listener.process_live_bar(bar),
            BarKind::CompleteHistorical => listener.process_history_bar(bar),
        },
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every callback as a short string
    #[derive(Default)]
    pub struct RecordingListener {
        pub calls: Mutex<Vec<String>>,
    }

    impl RecordingListener {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn push(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl FeedListener for RecordingListener {
        fn feed_is_fresh(&self) {
            self.push("fresh".into());
        }
        fn feed_is_stale(&self) {
            self.push("stale".into());
        }
        fn feed_has_error(&self) {
            self.push("error".into());
        }
        fn process_conn_stats(&self, stats: &ConnStats) {
            self.push(format!("stats:{}", stats.server_port));
        }
        fn process_timestamp(&self, timestamp: NaiveDateTime) {
            self.push(format!("timestamp:{}", timestamp));
        }
        fn process_error(&self, fields: &[String]) {
            self.push(format!("gateway_error:{}", fields.join("|")));
        }
        fn process_invalid_symbol(&self, symbol: &str) {
            self.push(format!("invalid:{}", symbol));
        }
        fn process_replaced_previous_watch(&self, symbol: &str) {
            self.push(format!("replaced:{}", symbol));
        }
        fn process_symbol_limit_reached(&self, symbol: &str) {
            self.push(format!("limit:{}", symbol));
        }
        fn process_watch(&self, watch: &WatchEntry) {
            self.push(format!("watch:{}", watch.symbol));
        }
        fn process_latest_bar_update(&self, bar: &Bar) {
            self.push(format!("update:{}", bar.symbol));
        }
        fn process_live_bar(&self, bar: &Bar) {
            self.push(format!("live:{}", bar.symbol));
        }
        fn process_history_bar(&self, bar: &Bar) {
            self.push(format!("history:{}", bar.symbol));
        }
    }
}
