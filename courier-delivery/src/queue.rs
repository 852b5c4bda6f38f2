//! Serialized delivery queue
//!
//! Entries are processed strictly one at a time in submission order by a
//! single worker ([`DeliveryQueue::run`]). Each submission hands back a
//! [`PendingDelivery`] that resolves once the worker has produced a result for
//! that entry.
//!
//! Each entry is processed in its own task which the worker awaits, so a panic
//! while processing one entry rejects that entry and the worker carries on
//! with the next.

use std::{
    collections::VecDeque,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use async_trait::async_trait;
use courier_common::{DeliveryOutcome, Message, Signal, internal, tracing};
use tokio::{
    sync::{Notify, broadcast, oneshot},
    time::Instant,
};

use crate::error::DeliveryError;

type DeliveryResult = Result<DeliveryOutcome, DeliveryError>;

/// Processes a single dequeued message
#[async_trait]
pub trait EntryHandler: Send + Sync + 'static {
    /// Produce the result for `message`, starting at retry round `attempts`
    async fn process(&self, message: Message, attempts: u32) -> DeliveryResult;
}

#[derive(Debug)]
struct QueueEntry {
    message: Message,
    responder: oneshot::Sender<DeliveryResult>,
    attempts: u32,
    enqueued_at: Instant,
}

impl QueueEntry {
    fn new(message: Message, responder: oneshot::Sender<DeliveryResult>) -> Self {
        Self {
            message,
            responder,
            attempts: 0,
            enqueued_at: Instant::now(),
        }
    }

    fn reject(self, error: DeliveryError) {
        // The caller may have stopped waiting, which is fine
        let _ = self.responder.send(Err(error));
    }
}

#[derive(Debug, Default)]
struct State {
    pending: VecDeque<QueueEntry>,
    paused: bool,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: parking_lot::Mutex<State>,
    notify: Notify,
}

/// Handle to a delivery queue, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct DeliveryQueue {
    shared: Arc<Shared>,
}

impl DeliveryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `message` to the queue
    ///
    /// The returned future resolves when the worker has processed the
    /// message. If the queue is already closed it resolves immediately with
    /// [`DeliveryError::QueueClosed`].
    pub fn enqueue(&self, message: Message) -> PendingDelivery {
        let (responder, receiver) = oneshot::channel();
        let entry = QueueEntry::new(message, responder);

        let mut state = self.shared.state.lock();
        if state.closed {
            drop(state);
            entry.reject(DeliveryError::QueueClosed);
        } else {
            state.pending.push_back(entry);
            let len = state.pending.len();
            drop(state);

            tracing::trace!(queue_len = len, "Message queued");
            self.shared.notify.notify_one();
        }

        PendingDelivery { receiver }
    }

    /// Stop dequeuing new entries; an entry already being processed finishes
    pub fn pause(&self) {
        self.shared.state.lock().paused = true;
        internal!(level = INFO, "Delivery queue paused");
    }

    pub fn resume(&self) {
        self.shared.state.lock().paused = false;
        internal!(level = INFO, "Delivery queue resumed");
        self.shared.notify.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Number of entries waiting to be processed
    pub fn len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard every waiting entry
    ///
    /// Each discarded entry resolves with [`DeliveryError::QueueCleared`].
    /// Returns the number of discarded entries.
    pub fn clear(&self) -> usize {
        let discarded: Vec<_> = self.shared.state.lock().pending.drain(..).collect();
        let count = discarded.len();

        for entry in discarded {
            entry.reject(DeliveryError::QueueCleared);
        }

        internal!(level = INFO, discarded = count, "Delivery queue cleared");
        count
    }

    /// Process entries until a shutdown signal arrives
    ///
    /// On return the queue is closed: entries still waiting, and any enqueued
    /// later, resolve with [`DeliveryError::QueueClosed`].
    pub async fn run<H: EntryHandler>(
        &self,
        handler: Arc<H>,
        mut shutdown: broadcast::Receiver<Signal>,
    ) {
        internal!("Delivery queue worker started");

        loop {
            if shutdown_requested(&mut shutdown) {
                break;
            }

            let Some(entry) = self.next_entry() else {
                let stop = tokio::select! {
                    () = self.shared.notify.notified() => false,
                    signal = shutdown.recv() => matches!(
                        signal,
                        Ok(Signal::Shutdown | Signal::Finalised)
                            | Err(broadcast::error::RecvError::Closed)
                    ),
                };

                if stop {
                    break;
                }
                continue;
            };

            Self::process(entry, &handler).await;
        }

        let remaining = self.close();
        internal!(level = INFO, remaining, "Delivery queue worker stopped");
    }

    fn next_entry(&self) -> Option<QueueEntry> {
        let mut state = self.shared.state.lock();
        if state.paused {
            None
        } else {
            state.pending.pop_front()
        }
    }

    async fn process<H: EntryHandler>(entry: QueueEntry, handler: &Arc<H>) {
        let QueueEntry {
            message,
            responder,
            attempts,
            enqueued_at,
        } = entry;
        let message_id = message.id().clone();

        tracing::debug!(
            message_id = %message_id,
            waited = ?enqueued_at.elapsed(),
            "Processing queued message"
        );

        let handler = Arc::clone(handler);
        let task = tokio::spawn(async move { handler.process(message, attempts).await });

        let result = match task.await {
            Ok(result) => result,
            Err(error) => {
                tracing::error!(
                    message_id = %message_id,
                    error = %error,
                    "Delivery task failed"
                );
                Err(DeliveryError::Internal(error.to_string()))
            }
        };

        if responder.send(result).is_err() {
            tracing::debug!(
                message_id = %message_id,
                "Caller stopped waiting for the delivery outcome"
            );
        }
    }

    /// Mark the queue closed and reject everything still waiting
    fn close(&self) -> usize {
        let discarded: Vec<_> = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            state.pending.drain(..).collect()
        };
        let count = discarded.len();

        for entry in discarded {
            entry.reject(DeliveryError::QueueClosed);
        }

        count
    }
}

fn shutdown_requested(shutdown: &mut broadcast::Receiver<Signal>) -> bool {
    use broadcast::error::TryRecvError;

    loop {
        match shutdown.try_recv() {
            Ok(Signal::Shutdown | Signal::Finalised) | Err(TryRecvError::Closed) => return true,
            Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty) => return false,
        }
    }
}

/// Result of a queued delivery, resolved by the queue worker
#[derive(Debug)]
#[must_use = "the delivery result is only observable through this future"]
pub struct PendingDelivery {
    receiver: oneshot::Receiver<DeliveryResult>,
}

impl PendingDelivery {
    /// A delivery that is already resolved with `result`
    pub(crate) fn resolved(result: DeliveryResult) -> Self {
        let (responder, receiver) = oneshot::channel();
        let _ = responder.send(result);
        Self { receiver }
    }
}

impl Future for PendingDelivery {
    type Output = DeliveryResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(DeliveryError::QueueClosed)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    /// Succeeds with the message subject as the provider name
    #[derive(Debug, Default)]
    struct Echo {
        seen: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EntryHandler for Echo {
        async fn process(&self, message: Message, _attempts: u32) -> DeliveryResult {
            self.seen.lock().push(message.subject().to_string());
            Ok(DeliveryOutcome::success(message.subject(), "sent"))
        }
    }

    fn message(subject: &str) -> Message {
        Message::new("user@example.com", subject, "Body")
    }

    #[tokio::test]
    async fn test_processes_in_submission_order() {
        let queue = DeliveryQueue::new();
        let handler = Arc::new(Echo::default());
        let (tx, rx) = broadcast::channel(1);

        let pending: Vec<_> = ["A", "B", "C"]
            .into_iter()
            .map(|subject| queue.enqueue(message(subject)))
            .collect();
        assert_eq!(queue.len(), 3);

        let worker = tokio::spawn({
            let queue = queue.clone();
            let handler = Arc::clone(&handler);
            async move { queue.run(handler, rx).await }
        });

        for (future, expected) in pending.into_iter().zip(["A", "B", "C"]) {
            assert_eq!(future.await.unwrap().provider, expected);
        }
        assert_eq!(*handler.seen.lock(), vec!["A", "B", "C"]);

        tx.send(Signal::Shutdown).unwrap();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_rejects_waiting_entries() {
        let queue = DeliveryQueue::new();

        let first = queue.enqueue(message("A"));
        let second = queue.enqueue(message("B"));

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert!(matches!(first.await, Err(DeliveryError::QueueCleared)));
        assert!(matches!(second.await, Err(DeliveryError::QueueCleared)));
    }

    #[tokio::test]
    async fn test_pause_holds_entries_until_resume() {
        let queue = DeliveryQueue::new();
        let handler = Arc::new(Echo::default());
        let (tx, rx) = broadcast::channel(1);

        queue.pause();
        assert!(queue.is_paused());

        let worker = tokio::spawn({
            let queue = queue.clone();
            let handler = Arc::clone(&handler);
            async move { queue.run(handler, rx).await }
        });

        let mut pending = queue.enqueue(message("A"));
        let waited = tokio::time::timeout(Duration::from_millis(50), &mut pending).await;
        assert!(waited.is_err());
        assert_eq!(queue.len(), 1);

        queue.resume();
        assert!(pending.await.unwrap().success);
        assert!(queue.is_empty());

        tx.send(Signal::Shutdown).unwrap();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_queue() {
        let queue = DeliveryQueue::new();
        let handler = Arc::new(Echo::default());
        let (tx, rx) = broadcast::channel(1);

        queue.pause();
        let waiting = queue.enqueue(message("A"));

        tx.send(Signal::Shutdown).unwrap();
        queue.run(handler, rx).await;

        assert!(queue.is_closed());
        assert!(matches!(waiting.await, Err(DeliveryError::QueueClosed)));
        assert!(matches!(
            queue.enqueue(message("B")).await,
            Err(DeliveryError::QueueClosed)
        ));
    }

    #[derive(Debug)]
    struct PanicsOn(&'static str);

    #[async_trait]
    impl EntryHandler for PanicsOn {
        async fn process(&self, message: Message, _attempts: u32) -> DeliveryResult {
            assert_ne!(message.subject(), self.0, "handler blew up");
            Ok(DeliveryOutcome::success("primary", "sent"))
        }
    }

    #[tokio::test]
    async fn test_panic_rejects_only_that_entry() {
        let queue = DeliveryQueue::new();
        let (tx, rx) = broadcast::channel(1);

        let bad = queue.enqueue(message("boom"));
        let good = queue.enqueue(message("fine"));

        let worker = tokio::spawn({
            let queue = queue.clone();
            async move { queue.run(Arc::new(PanicsOn("boom")), rx).await }
        });

        assert!(matches!(bad.await, Err(DeliveryError::Internal(_))));
        assert!(good.await.unwrap().success);

        tx.send(Signal::Shutdown).unwrap();
        worker.await.unwrap();
    }
}
