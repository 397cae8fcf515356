//! Producer half of the pipeline

use crate::queue::{QueueError, SharedQueue};
use std::fmt;
use std::sync::Arc;

/// Producing half of a producer/consumer pair.
///
/// Holds a shared reference to the queue handed in by the driver and exposes
/// exactly one operation. No validation is performed on items and there are
/// no side effects beyond the enqueue itself.
#[derive(Clone)]
pub struct Producer<T> {
    queue: Arc<SharedQueue<T>>,
}

impl<T> Producer<T>
where
    T: Send + 'static,
{
    /// Bind a producer to the shared queue.
    pub fn new(queue: Arc<SharedQueue<T>>) -> Self {
        Self { queue }
    }

    /// Enqueue one item.
    ///
    /// Suspends only as long as the underlying bounded queue is full. The
    /// only failure mode is producing into a queue that has already been
    /// closed.
    pub async fn produce(&self, item: T) -> Result<(), QueueError> {
        self.queue.enqueue(item).await
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer").field("queue", &self.queue).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Envelope;

    #[tokio::test]
    async fn produce_places_the_item_on_the_queue() {
        let queue = Arc::new(SharedQueue::bounded(4));
        let producer = Producer::new(Arc::clone(&queue));

        producer.produce("test_item").await.unwrap();

        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.recv().await, Some(Envelope::Item("test_item")));
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn produce_into_closed_queue_errors() {
        let queue = Arc::new(SharedQueue::bounded(4));
        let producer = Producer::new(Arc::clone(&queue));

        queue.close().await;

        assert_eq!(producer.produce(1).await, Err(QueueError::Closed));
    }
}
