use handoff::{Consumer, ConsumerConfig, FailurePolicy, Producer, SharedQueue};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::time::Duration;

fn main() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let queue = Arc::new(SharedQueue::unbounded());
        let producer = Producer::new(Arc::clone(&queue));

        for i in 1..=5 {
            producer.produce(i).await.unwrap();
        }
        println!("Driver: items enqueued, {}", queue.stats());

        let config = ConsumerConfig {
            process_delay: Duration::from_millis(100),
            failure_policy: FailurePolicy::Skip,
        };
        let consumer = Arc::new(Consumer::with_config(Arc::clone(&queue), config));
        let consumer_handle = Arc::clone(&consumer);
        let consumer_task = tokio::spawn(async move {
            consumer_handle
                .consume_with(|i| async move {
                    println!("Consumed: {}", i);
                    Ok::<_, std::convert::Infallible>(())
                })
                .await
        });

        // Suspends until the consumer has marked every item done
        queue.join().await;
        println!("Driver: all items handled, {}", queue.stats());

        queue.signal_stop().await.unwrap();
        let reason = consumer_task.await.unwrap().unwrap();

        let stats = consumer.stats().await;
        println!(
            "Driver: consumer ended ({:?}), {} items processed",
            reason, stats.items_processed
        );
    });
}
