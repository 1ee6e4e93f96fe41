//! Bounded, ordered hand-off from the reader task to the bar router.
//!
//! A plain mpsc channel plus an in-flight counter: an entry counts from the
//! moment it is pushed until the consumer calls [`EventReceiver::task_done`],
//! so [`DrainHandle::join`] returns only once everything pushed so far has been
//! fully processed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

use crate::error::FeedError;
use crate::message::FeedEvent;

#[derive(Debug, Default)]
struct QueueState {
    in_flight: AtomicUsize,
    drained: Notify,
}

impl QueueState {
    fn done(&self) {
        let prev = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        if prev <= 1 {
            self.drained.notify_waiters();
        }
    }
}

pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let state = Arc::new(QueueState::default());
    (
        EventSender {
            tx,
            state: state.clone(),
        },
        EventReceiver { rx, state },
    )
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<FeedEvent>,
    state: Arc<QueueState>,
}

impl EventSender {
    /// Waits for capacity; fails only once the receiver is gone.
    ///
    /// Cancel safe: an entry is counted only once a slot is reserved for it.
    pub async fn push(&self, event: FeedEvent) -> Result<(), FeedError> {
        let permit = self.tx.reserve().await.map_err(|_| FeedError::QueueClosed)?;
        self.state.in_flight.fetch_add(1, Ordering::AcqRel);
        permit.send(event);
        Ok(())
    }

    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::Acquire)
    }

    pub fn drain_handle(&self) -> DrainHandle {
        DrainHandle {
            state: self.state.clone(),
        }
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<FeedEvent>,
    state: Arc<QueueState>,
}

impl EventReceiver {
    /// `None` once every sender is dropped and the buffer is empty
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.rx.recv().await
    }

    /// Mark one received entry as fully processed
    pub fn task_done(&self) {
        self.state.done();
    }

    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::Acquire)
    }

    pub fn drain_handle(&self) -> DrainHandle {
        DrainHandle {
            state: self.state.clone(),
        }
    }
}

/// Waits for the queue to drain without owning either end
#[derive(Debug, Clone)]
pub struct DrainHandle {
    state: Arc<QueueState>,
}

impl DrainHandle {
    pub async fn join(&self) {
        loop {
            let notified = self.state.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_preserves_order() {
        let (tx, mut rx) = event_queue(4);
        tx.push(FeedEvent::ServerConnected).await.unwrap();
        tx.push(FeedEvent::InvalidSymbol("A".into())).await.unwrap();
        tx.push(FeedEvent::ServerDisconnected).await.unwrap();

        assert_eq!(rx.recv().await, Some(FeedEvent::ServerConnected));
        assert_eq!(rx.recv().await, Some(FeedEvent::InvalidSymbol("A".into())));
        assert_eq!(rx.recv().await, Some(FeedEvent::ServerDisconnected));
    }

    #[tokio::test]
    async fn test_join_waits_for_task_done() {
        let (tx, mut rx) = event_queue(4);
        tx.push(FeedEvent::ServerConnected).await.unwrap();
        tx.push(FeedEvent::ServerDisconnected).await.unwrap();
        assert_eq!(tx.in_flight(), 2);

        let drain = tx.drain_handle();
        let joined = tokio::spawn(async move { drain.join().await });

        // received but not yet processed still counts
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!joined.is_finished());

        rx.task_done();
        rx.task_done();
        tokio::time::timeout(Duration::from_secs(1), joined)
            .await
            .expect("join did not return")
            .unwrap();
        assert_eq!(rx.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_join_on_empty_queue_returns() {
        let (tx, _rx) = event_queue(1);
        tokio::time::timeout(Duration::from_secs(1), tx.drain_handle().join())
            .await
            .expect("empty queue must not block");
    }

    #[tokio::test]
    async fn test_push_applies_backpressure() {
        let (tx, mut rx) = event_queue(1);
        tx.push(FeedEvent::ServerConnected).await.unwrap();

        let blocked = tokio::time::timeout(
            Duration::from_millis(20),
            tx.push(FeedEvent::ServerDisconnected),
        )
        .await;
        assert!(blocked.is_err());

        rx.recv().await.unwrap();
        rx.task_done();
        tx.push(FeedEvent::ServerDisconnected).await.unwrap();
    }

    #[tokio::test]
    async fn test_push_after_receiver_dropped() {
        let (tx, rx) = event_queue(1);
        drop(rx);
        assert!(matches!(
            tx.push(FeedEvent::ServerConnected).await,
            Err(FeedError::QueueClosed)
        ));
        assert_eq!(tx.in_flight(), 0);
    }
}
