//! Consumer half of the pipeline
//!
//! Runs the blocking dequeue loop: take the next envelope, stop on the
//! termination marker, otherwise process the item and pause for the
//! configured fixed delay before going around again.

use crate::queue::{Envelope, SharedQueue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;

const STATE_RUNNING: u8 = 0;
const STATE_STOPPED: u8 = 1;

/// What the loop does when a handler rejects an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Log the failure, count the item as skipped, keep consuming
    Skip,
    /// Terminate the loop and surface the failure to the caller
    Halt,
}

/// Configuration for the consumer loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Fixed pause after each item, simulating work
    pub process_delay: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            process_delay: Duration::from_secs(1),
            failure_policy: FailurePolicy::Skip,
        }
    }
}

/// Why a consume run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A stop marker was dequeued
    StopMarker,
    /// The queue was closed and drained before any stop marker arrived
    Closed,
}

/// Loop state, observable from other tasks.
///
/// The only transition is `Running` → `Stopped`, taken when a run ends.
/// Invoking the loop again re-arms it back to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Running,
    Stopped,
}

fn state_from_u8(value: u8) -> ConsumerState {
    if value == STATE_STOPPED {
        ConsumerState::Stopped
    } else {
        ConsumerState::Running
    }
}

/// Errors surfaced by a consume run
#[derive(Debug, Error)]
pub enum ConsumeError {
    /// A handler rejected an item while the failure policy was `Halt`
    #[error("processing failed: {source}")]
    Processing {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Counters accumulated across consume runs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsumerStats {
    pub items_processed: u64,
    pub items_skipped: u64,
    /// Runs that ended via stop marker or queue closure (halted runs do not
    /// count)
    pub runs_completed: u64,
}

/// Consuming half of a producer/consumer pair.
///
/// Holds a shared reference to the same queue as the producer. A consumer is
/// not `Clone`: the pipeline is single-consumer, and one stop marker ends
/// exactly one loop run.
pub struct Consumer<T> {
    queue: Arc<SharedQueue<T>>,
    config: ConsumerConfig,
    state: AtomicU8,
    stats: Mutex<ConsumerStats>,
}

impl<T> Consumer<T>
where
    T: Send + 'static,
{
    /// Bind a consumer to the shared queue with the default configuration.
    pub fn new(queue: Arc<SharedQueue<T>>) -> Self {
        Self::with_config(queue, ConsumerConfig::default())
    }

    /// Bind a consumer with an explicit configuration.
    pub fn with_config(queue: Arc<SharedQueue<T>>, config: ConsumerConfig) -> Self {
        Self {
            queue,
            config,
            state: AtomicU8::new(STATE_RUNNING),
            stats: Mutex::new(ConsumerStats::default()),
        }
    }

    /// Current loop state.
    pub fn state(&self) -> ConsumerState {
        state_from_u8(self.state.load(Ordering::Acquire))
    }

    /// Snapshot of the counters accumulated so far.
    pub async fn stats(&self) -> ConsumerStats {
        self.stats.lock().await.clone()
    }

    /// Run the loop with the default processing step: emit one info log line
    /// per item, then pause for the configured delay.
    ///
    /// Returns when a stop marker is dequeued, or early (and cleanly) when
    /// the queue is closed and drained without one. A consumer suspended on
    /// an empty queue that never receives either suspends forever; that is
    /// the documented contract, not a defect.
    pub async fn consume(&self) -> Result<StopReason, ConsumeError>
    where
        T: fmt::Display,
    {
        self.consume_with(|item| async move {
            log::info!("Consumed: {}", item);
            Ok::<(), std::convert::Infallible>(())
        })
        .await
    }

    /// Run the loop with a caller-supplied fallible handler.
    ///
    /// Handler failures follow the configured [`FailurePolicy`]. Whatever the
    /// handler outcome, each dequeued item is marked done on the queue before
    /// the fixed delay, so completion tracking stays balanced.
    pub async fn consume_with<F, Fut, E>(&self, mut handler: F) -> Result<StopReason, ConsumeError>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        // Re-arms a previously stopped consumer; a fresh run simply blocks
        // for the next stop-terminated sequence on the same queue.
        self.state.store(STATE_RUNNING, Ordering::Release);
        log::debug!("consumer loop entered");

        loop {
            // Sole suspension point apart from the simulated-work pause.
            let envelope = match self.queue.recv().await {
                Some(envelope) => envelope,
                None => return Ok(self.finish_run(StopReason::Closed).await),
            };

            let item = match envelope {
                Envelope::Stop => return Ok(self.finish_run(StopReason::StopMarker).await),
                Envelope::Item(item) => item,
            };

            let outcome = handler(item).await;
            // The item left the queue either way; completion tracking must
            // balance or `join` would wedge on a failed item.
            let _ = self.queue.task_done();

            match outcome {
                Ok(()) => {
                    self.stats.lock().await.items_processed += 1;
                }
                Err(err) => {
                    let err = err.into();
                    match self.config.failure_policy {
                        FailurePolicy::Skip => {
                            log::warn!("skipping item after processing failure: {}", err);
                            self.stats.lock().await.items_skipped += 1;
                        }
                        FailurePolicy::Halt => {
                            self.state.store(STATE_STOPPED, Ordering::Release);
                            log::debug!("consumer loop halted by processing failure");
                            return Err(ConsumeError::Processing { source: err });
                        }
                    }
                }
            }

            if !self.config.process_delay.is_zero() {
                // Simulated work, not a synchronization point.
                sleep(self.config.process_delay).await;
            }
        }
    }

    async fn finish_run(&self, reason: StopReason) -> StopReason {
        self.state.store(STATE_STOPPED, Ordering::Release);
        self.stats.lock().await.runs_completed += 1;
        log::debug!("consumer loop ended: {:?}", reason);
        reason
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("queue", &self.queue)
            .field("config", &self.config)
            .field("state", &state_from_u8(self.state.load(Ordering::Acquire)))
            .finish()
    }
}
