//! Shared queue joining the producer and consumer halves of the pipeline
//!
//! A thread-safe FIFO of tagged envelopes with explicit capacity, built on
//! tokio's mpsc channel. The queue also tracks item completion so a driver
//! can wait for everything it produced to be fully handled.

use async_stream::stream;
use futures_util::stream::BoxStream;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};

/// Backing channel capacity used for "unbounded" queues. Large enough that a
/// producer never observes the bound in practice while keeping a single
/// channel type behind both constructors.
const UNBOUNDED_CAPACITY: usize = 1_000_000;

/// Error types for queue operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Queue has been closed
    Closed,
    /// Queue is full (bounded queues, non-suspending enqueue)
    Full,
    /// Channel disconnected underneath a send
    Disconnected,
    /// Invalid operation, e.g. `task_done` with nothing outstanding
    InvalidOperation,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Closed => write!(f, "Queue is closed"),
            QueueError::Full => write!(f, "Queue is full"),
            QueueError::Disconnected => write!(f, "Queue channel disconnected"),
            QueueError::InvalidOperation => write!(f, "Invalid queue operation"),
        }
    }
}

impl std::error::Error for QueueError {}

/// A queue entry: either a payload or the termination marker.
///
/// Modelling the marker as a variant instead of a reserved payload value means
/// `Stop` can never collide with a legitimate item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope<T> {
    /// A regular payload travelling producer → consumer.
    Item(T),
    /// Termination marker; ends exactly one consumer loop run.
    Stop,
}

impl<T> Envelope<T> {
    pub fn is_item(&self) -> bool {
        matches!(self, Envelope::Item(_))
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, Envelope::Stop)
    }

    /// Unwrap the payload, discarding a `Stop` marker.
    pub fn into_item(self) -> Option<T> {
        match self {
            Envelope::Item(item) => Some(item),
            Envelope::Stop => None,
        }
    }
}

/// Internal queue state shared by all handles
struct QueueState<T> {
    /// Send half. Taken (dropped) on `close` so blocked receivers are
    /// released by the channel itself once the buffer drains.
    sender: Mutex<Option<mpsc::Sender<Envelope<T>>>>,
    capacity: Option<usize>,
    closed: AtomicBool,
    /// Envelopes currently buffered, stop markers included.
    depth: AtomicUsize,
    /// Items enqueued but not yet marked done. Stop markers are not counted.
    unfinished: AtomicUsize,
    done_notify: Notify,
}

/// Thread-safe FIFO channel shared by one producer and one consumer.
///
/// Cloning is cheap and every clone refers to the same queue. Capacity is an
/// explicit construction choice: `bounded(n)` makes `enqueue` suspend while
/// the queue is full, `unbounded()` never applies backpressure.
#[derive(Clone)]
pub struct SharedQueue<T> {
    state: Arc<QueueState<T>>,
    receiver: Arc<Mutex<mpsc::Receiver<Envelope<T>>>>,
}

impl<T> SharedQueue<T>
where
    T: Send + 'static,
{
    /// Create a new bounded queue with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; a queue without a bound is spelled
    /// [`unbounded`](Self::unbounded).
    pub fn bounded(capacity: usize) -> Self {
        assert!(capacity > 0, "SharedQueue capacity must be at least 1");
        Self::with_capacity(capacity, Some(capacity))
    }

    /// Create a new unbounded queue
    pub fn unbounded() -> Self {
        Self::with_capacity(UNBOUNDED_CAPACITY, None)
    }

    fn with_capacity(channel_capacity: usize, reported: Option<usize>) -> Self {
        let (sender, receiver) = mpsc::channel(channel_capacity);
        Self {
            state: Arc::new(QueueState {
                sender: Mutex::new(Some(sender)),
                capacity: reported,
                closed: AtomicBool::new(false),
                depth: AtomicUsize::new(0),
                unfinished: AtomicUsize::new(0),
                done_notify: Notify::new(),
            }),
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    /// Enqueue an item, suspending while a bounded queue is full
    pub async fn enqueue(&self, item: T) -> Result<(), QueueError> {
        // Counted before the send: the consumer may dequeue and mark the item
        // done the instant it lands, and `task_done` must not see a stale zero.
        self.state.unfinished.fetch_add(1, Ordering::AcqRel);
        match self.send_envelope(Envelope::Item(item)).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.rollback_unfinished();
                Err(err)
            }
        }
    }

    /// Try to enqueue an item without suspending
    pub async fn try_enqueue(&self, item: T) -> Result<(), QueueError> {
        self.state.unfinished.fetch_add(1, Ordering::AcqRel);
        match self.try_send_envelope(Envelope::Item(item)).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.rollback_unfinished();
                Err(err)
            }
        }
    }

    /// Enqueue the termination marker.
    ///
    /// One marker terminates exactly one `consume` run; a driver running
    /// several consumer loops over the same queue must send one marker each.
    pub async fn signal_stop(&self) -> Result<(), QueueError> {
        self.send_envelope(Envelope::Stop).await
    }

    // Depth is bumped before the send for the same reason as `unfinished`:
    // a receive of the envelope must never decrement past zero.
    async fn send_envelope(&self, envelope: Envelope<T>) -> Result<(), QueueError> {
        let sender = self.sender_handle().await?;
        self.state.depth.fetch_add(1, Ordering::Relaxed);
        match sender.send(envelope).await {
            Ok(()) => Ok(()),
            Err(_) => {
                self.state.depth.fetch_sub(1, Ordering::Relaxed);
                Err(QueueError::Disconnected)
            }
        }
    }

    async fn try_send_envelope(&self, envelope: Envelope<T>) -> Result<(), QueueError> {
        let sender = self.sender_handle().await?;
        self.state.depth.fetch_add(1, Ordering::Relaxed);
        match sender.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.state.depth.fetch_sub(1, Ordering::Relaxed);
                match err {
                    mpsc::error::TrySendError::Full(_) => Err(QueueError::Full),
                    mpsc::error::TrySendError::Closed(_) => Err(QueueError::Disconnected),
                }
            }
        }
    }

    async fn sender_handle(&self) -> Result<mpsc::Sender<Envelope<T>>, QueueError> {
        if self.state.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        let guard = self.state.sender.lock().await;
        guard.as_ref().cloned().ok_or(QueueError::Closed)
    }

    /// Dequeue the next envelope, suspending until one is available.
    ///
    /// Returns `None` once the queue has been closed and drained.
    pub async fn recv(&self) -> Option<Envelope<T>> {
        let envelope = {
            let mut rx = self.receiver.lock().await;
            rx.recv().await
        };
        if envelope.is_some() {
            self.state.depth.fetch_sub(1, Ordering::Relaxed);
        }
        envelope
    }

    /// Stream view over the queue - returns BoxStream to avoid pinning issues.
    ///
    /// The stream ends when the queue is closed and drained; a `Stop` marker
    /// is yielded like any other envelope.
    pub fn dequeue(&self) -> BoxStream<'static, Envelope<T>> {
        let receiver = Arc::clone(&self.receiver);
        let state = Arc::clone(&self.state);

        let stream = stream! {
            loop {
                let envelope = {
                    let mut rx = receiver.lock().await;
                    rx.recv().await
                };
                match envelope {
                    Some(envelope) => {
                        state.depth.fetch_sub(1, Ordering::Relaxed);
                        yield envelope;
                    }
                    None => break,
                }
            }
        };

        Box::pin(stream)
    }

    /// Close the queue, preventing further enqueues but allowing buffered
    /// envelopes to be consumed.
    ///
    /// Dropping the send half is what releases a consumer suspended on an
    /// empty queue: after the buffer drains, `recv` returns `None`.
    pub async fn close(&self) {
        self.state.closed.store(true, Ordering::Release);
        let mut sender = self.state.sender.lock().await;
        *sender = None;
    }

    /// Check if the queue is closed
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    // Undo one optimistic `unfinished` increment after a failed send. Any
    // decrement that reaches zero must fire the join wakeup, exactly as
    // `task_done` does, or a parked `join` never returns.
    fn rollback_unfinished(&self) {
        if self.state.unfinished.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.state.done_notify.notify_waiters();
        }
    }

    /// Mark one previously dequeued item as fully handled.
    ///
    /// Errors if there is no outstanding item, mirroring the "called too many
    /// times" failure of joinable queues.
    pub fn task_done(&self) -> Result<(), QueueError> {
        let mut outstanding = self.state.unfinished.load(Ordering::Acquire);
        loop {
            if outstanding == 0 {
                return Err(QueueError::InvalidOperation);
            }
            match self.state.unfinished.compare_exchange_weak(
                outstanding,
                outstanding - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if outstanding == 1 {
                        self.state.done_notify.notify_waiters();
                    }
                    return Ok(());
                }
                Err(actual) => outstanding = actual,
            }
        }
    }

    /// Suspend until every enqueued item has been marked done.
    ///
    /// Returns immediately when nothing is outstanding. Stop markers never
    /// count, so a consumer that exits on `Stop` without a matching
    /// `task_done` leaves `join` in a sane state.
    pub async fn join(&self) {
        let notified = self.state.done_notify.notified();
        tokio::pin!(notified);
        loop {
            if self.state.unfinished.load(Ordering::Acquire) == 0 {
                return;
            }
            // Register for the wakeup, then re-check so a task_done racing
            // with this call is not missed.
            notified.as_mut().enable();
            if self.state.unfinished.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.as_mut().await;
            notified.set(self.state.done_notify.notified());
        }
    }

    /// Get the capacity of the queue (None for unbounded)
    pub fn capacity(&self) -> Option<usize> {
        self.state.capacity
    }

    /// Check if the queue is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Get the current number of buffered envelopes
    pub async fn len(&self) -> usize {
        // Prefer the channel's own count when the receiver is free
        if let Ok(rx) = self.receiver.try_lock() {
            rx.len()
        } else {
            self.state.depth.load(Ordering::Relaxed)
        }
    }

    /// Get the current depth without suspending (may be slightly stale)
    pub fn len_fast(&self) -> usize {
        self.state.depth.load(Ordering::Relaxed)
    }

    /// Remove and return all currently buffered envelopes.
    ///
    /// Drained `Item` envelopes still count as unfinished work: the caller
    /// now owns them, and `join` keeps waiting until each one is balanced
    /// with [`task_done`](Self::task_done).
    pub async fn drain(&self) -> Vec<Envelope<T>> {
        let mut envelopes = Vec::new();
        let mut rx = self.receiver.lock().await;

        while let Ok(envelope) = rx.try_recv() {
            self.state.depth.fetch_sub(1, Ordering::Relaxed);
            envelopes.push(envelope);
        }

        envelopes
    }

    /// Get queue statistics for monitoring
    pub fn stats(&self) -> QueueStats {
        let depth = self.len_fast();
        let capacity = self.capacity();
        let utilization = match capacity {
            Some(cap) if cap > 0 => depth as f64 / cap as f64,
            // Unbounded queues have 0 utilization by definition
            _ => 0.0,
        };

        QueueStats {
            depth,
            capacity,
            utilization,
            is_closed: self.is_closed(),
        }
    }

    /// Check if the queue is nearly full (useful for backpressure decisions)
    pub fn is_nearly_full(&self, threshold: f64) -> bool {
        match self.capacity() {
            Some(cap) if cap > 0 => (self.len_fast() as f64 / cap as f64) >= threshold,
            // Unbounded queues are never "full"
            _ => false,
        }
    }

    /// Get available space in the queue (None for unbounded)
    pub fn available_capacity(&self) -> Option<usize> {
        self.capacity()
            .map(|cap| cap.saturating_sub(self.len_fast()))
    }
}

/// Queue statistics snapshot for monitoring and debugging
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QueueStats {
    pub depth: usize,
    pub capacity: Option<usize>,
    /// 0.0 to 1.0 for bounded queues
    pub utilization: f64,
    pub is_closed: bool,
}

impl fmt::Display for QueueStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.capacity {
            Some(cap) => write!(
                f,
                "SharedQueue({}/{}, {:.1}%{})",
                self.depth,
                cap,
                self.utilization * 100.0,
                if self.is_closed { ", closed" } else { "" }
            ),
            None => write!(
                f,
                "SharedQueue({}, unbounded{})",
                self.depth,
                if self.is_closed { ", closed" } else { "" }
            ),
        }
    }
}

impl<T> fmt::Debug for SharedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedQueue")
            .field(
                "capacity",
                &match self.state.capacity {
                    Some(cap) => cap.to_string(),
                    None => "unbounded".to_string(),
                },
            )
            .field("depth", &self.state.depth.load(Ordering::Relaxed))
            .field("is_closed", &self.state.closed.load(Ordering::Acquire))
            .finish()
    }
}
