//! Notification fan-out worker
//!
//! A single bounded queue feeds exactly one worker task. Producers clone the
//! sender; the worker delivers messages in arrival order, one observer at a
//! time. Shutting down closes the queue to new messages and waits for the
//! worker to finish everything already queued.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tigerhall_common::NotificationMessage;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Delivery transport (email, push, ...)
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, observer_id: i64, tiger_id: i64) -> anyhow::Result<()>;
}

/// Placeholder transport: records the attempt in the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, observer_id: i64, tiger_id: i64) -> anyhow::Result<()> {
        info!(observer_id, tiger_id, "Sending sighting notification");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("notification queue is full")]
    Full(NotificationMessage),
    #[error("notification queue is closed")]
    Closed(NotificationMessage),
}

impl DispatchError {
    pub fn into_message(self) -> NotificationMessage {
        match self {
            DispatchError::Full(m) | DispatchError::Closed(m) => m,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time view of the dispatcher counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Messages accepted into the queue
    pub enqueued: u64,
    /// Messages refused because the queue was closed
    pub dropped: u64,
    /// Messages the worker finished
    pub processed: u64,
    /// Successful per-observer deliveries
    pub delivered: u64,
    /// Failed per-observer deliveries
    pub failed: u64,
    /// Messages waiting in the queue
    pub queued: usize,
    pub closed: bool,
}

pub struct NotificationDispatcher {
    sender: RwLock<Option<mpsc::Sender<NotificationMessage>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Flips to `true` once the worker has drained the queue and returned
    finished: watch::Receiver<bool>,
    counters: Arc<Counters>,
    capacity: usize,
}

impl NotificationDispatcher {
    /// Create the queue and spawn its worker. Must run inside a tokio runtime.
    pub fn start(capacity: usize, notifier: Arc<dyn Notifier>) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let counters = Arc::new(Counters::default());
        let (finished_tx, finished) = watch::channel(false);

        let worker = tokio::spawn(run_worker(rx, notifier, counters.clone(), finished_tx));
        info!("Notification dispatcher started (capacity: {})", capacity);

        Self {
            sender: RwLock::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            finished,
            counters,
            capacity,
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<NotificationMessage>> {
        self.sender
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn refuse(&self, message: NotificationMessage) -> DispatchError {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(
            tiger_id = message.tiger_id,
            observers = ?message.observer_ids,
            "Notification dropped, queue is closed"
        );
        DispatchError::Closed(message)
    }

    /// Queue a message, waiting for room when the queue is full.
    pub async fn enqueue(&self, message: NotificationMessage) -> Result<(), DispatchError> {
        let Some(sender) = self.sender() else {
            return Err(self.refuse(message));
        };

        match sender.send(message).await {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::SendError(message)) => Err(self.refuse(message)),
        }
    }

    /// Queue a message without waiting.
    pub fn try_enqueue(&self, message: NotificationMessage) -> Result<(), DispatchError> {
        let Some(sender) = self.sender() else {
            return Err(self.refuse(message));
        };

        match sender.try_send(message) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(message)) => Err(DispatchError::Full(message)),
            Err(TrySendError::Closed(message)) => Err(self.refuse(message)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    pub fn stats(&self) -> DispatchStats {
        let sender = self.sender();
        let queued = sender
            .as_ref()
            .map(|s| self.capacity.saturating_sub(s.capacity()))
            .unwrap_or(0);

        DispatchStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            queued,
            closed: sender.is_none(),
        }
    }

    /// Close the queue and wait until the worker has drained it.
    ///
    /// Safe to call more than once and from several tasks at the same time;
    /// every caller returns only after the worker has exited.
    pub async fn shutdown(&self) -> DispatchStats {
        let sender = self
            .sender
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(sender);

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(worker) = worker {
            info!("Draining notification queue...");
            if let Err(e) = worker.await {
                warn!("Notification worker ended abnormally: {}", e);
            }
        }

        // a worker that panicked drops its sender, which also ends the wait
        let mut finished = self.finished.clone();
        let _ = finished.wait_for(|done| *done).await;

        let stats = self.stats();
        info!(
            "Notification dispatcher stopped: {} processed, {} delivered, {} failed, {} dropped",
            stats.processed, stats.delivered, stats.failed, stats.dropped
        );
        stats
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<NotificationMessage>,
    notifier: Arc<dyn Notifier>,
    counters: Arc<Counters>,
    finished: watch::Sender<bool>,
) {
    // recv() yields None only once every sender is gone and the buffer is empty
    while let Some(message) = rx.recv().await {
        debug!(
            tiger_id = message.tiger_id,
            observers = ?message.observer_ids,
            "Delivering notification"
        );

        for &observer_id in &message.observer_ids {
            match notifier.notify(observer_id, message.tiger_id).await {
                Ok(()) => {
                    counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        observer_id,
                        tiger_id = message.tiger_id,
                        "Notification delivery failed: {:#}",
                        e
                    );
                }
            }
        }

        counters.processed.fetch_add(1, Ordering::Relaxed);
    }

    info!("Notification queue closed, worker exiting");
    finished.send_replace(true);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::{Notify, Semaphore};

    /// Records every delivery; fails for observers listed in `fail_for`.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub delivered: Mutex<Vec<(i64, i64)>>,
        pub fail_for: Vec<i64>,
        pub delay: Option<Duration>,
    }

    impl RecordingNotifier {
        pub fn deliveries(&self) -> Vec<(i64, i64)> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, observer_id: i64, tiger_id: i64) -> anyhow::Result<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_for.contains(&observer_id) {
                anyhow::bail!("mailbox unavailable for {}", observer_id);
            }
            self.delivered.lock().unwrap().push((observer_id, tiger_id));
            Ok(())
        }
    }

    /// Blocks every delivery until the test hands out permits.
    pub(crate) struct GatedNotifier {
        pub started: Notify,
        pub gate: Semaphore,
    }

    impl GatedNotifier {
        pub fn closed() -> Self {
            Self {
                started: Notify::new(),
                gate: Semaphore::new(0),
            }
        }
    }

    #[async_trait]
    impl Notifier for GatedNotifier {
        async fn notify(&self, _observer_id: i64, _tiger_id: i64) -> anyhow::Result<()> {
            self.started.notify_one();
            self.gate.acquire().await?.forget();
            Ok(())
        }
    }

    fn message(tiger_id: i64, observers: &[i64]) -> NotificationMessage {
        NotificationMessage {
            tiger_id,
            observer_ids: observers.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_delivers_in_fifo_order() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = NotificationDispatcher::start(8, notifier.clone());

        dispatcher.enqueue(message(1, &[10, 11])).await.unwrap();
        dispatcher.enqueue(message(2, &[12])).await.unwrap();
        dispatcher.enqueue(message(1, &[13])).await.unwrap();

        let stats = dispatcher.shutdown().await;

        assert_eq!(notifier.deliveries(), vec![(10, 1), (11, 1), (12, 2), (13, 1)]);
        assert_eq!(stats.enqueued, 3);
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.delivered, 4);
        assert!(stats.closed);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue_then_refuses() {
        let notifier = Arc::new(RecordingNotifier {
            delay: Some(Duration::from_millis(2)),
            ..Default::default()
        });
        let dispatcher = NotificationDispatcher::start(64, notifier.clone());

        const N: i64 = 25;
        for i in 0..N {
            dispatcher.try_enqueue(message(i, &[100 + i])).unwrap();
        }

        let stats = dispatcher.shutdown().await;

        let expected: Vec<(i64, i64)> = (0..N).map(|i| (100 + i, i)).collect();
        assert_eq!(notifier.deliveries(), expected);
        assert_eq!(stats.processed, N as u64);
        assert_eq!(stats.queued, 0);

        assert!(matches!(
            dispatcher.enqueue(message(99, &[1])).await,
            Err(DispatchError::Closed(_))
        ));
        assert!(matches!(
            dispatcher.try_enqueue(message(99, &[1])),
            Err(DispatchError::Closed(_))
        ));
        assert_eq!(dispatcher.stats().dropped, 2);
        assert_eq!(notifier.deliveries().len(), N as usize);

        // second shutdown is a no-op
        assert_eq!(dispatcher.shutdown().await.processed, N as u64);
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_stop_worker() {
        let notifier = Arc::new(RecordingNotifier {
            fail_for: vec![2],
            ..Default::default()
        });
        let dispatcher = NotificationDispatcher::start(4, notifier.clone());

        dispatcher.enqueue(message(7, &[1, 2, 3])).await.unwrap();
        dispatcher.enqueue(message(8, &[2, 4])).await.unwrap();
        let stats = dispatcher.shutdown().await;

        assert_eq!(notifier.deliveries(), vec![(1, 7), (3, 7), (4, 8)]);
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.processed, 2);
    }

    #[tokio::test]
    async fn test_full_queue_applies_back_pressure() {
        let notifier = Arc::new(GatedNotifier::closed());
        let dispatcher = Arc::new(NotificationDispatcher::start(1, notifier.clone()));

        // worker picks this one up and blocks inside the notifier
        dispatcher.try_enqueue(message(1, &[1])).unwrap();
        notifier.started.notified().await;

        // fills the single slot
        dispatcher.try_enqueue(message(2, &[2])).unwrap();
        assert_eq!(dispatcher.stats().queued, 1);

        let refused = dispatcher.try_enqueue(message(3, &[3])).unwrap_err();
        assert!(matches!(refused, DispatchError::Full(_)));

        // a blocking enqueue waits until the worker frees the slot
        let producer = {
            let dispatcher = dispatcher.clone();
            let message = refused.into_message();
            tokio::spawn(async move { dispatcher.enqueue(message).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        notifier.gate.add_permits(10);
        producer.await.unwrap().unwrap();

        let stats = dispatcher.shutdown().await;
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.delivered, 3);
    }

    #[tokio::test]
    async fn test_concurrent_shutdowns_all_wait_for_drain() {
        let notifier = Arc::new(GatedNotifier::closed());
        let dispatcher = NotificationDispatcher::start(8, notifier.clone());

        for i in 0..3 {
            dispatcher.try_enqueue(message(i, &[i])).unwrap();
        }
        notifier.started.notified().await;

        let release = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            notifier.gate.add_permits(10);
        };
        let (first, second, ()) = tokio::join!(dispatcher.shutdown(), dispatcher.shutdown(), release);

        for stats in [first, second] {
            assert!(stats.closed);
            assert_eq!(stats.processed, 3);
            assert_eq!(stats.delivered, 3);
            assert_eq!(stats.queued, 0);
        }
    }
}
