use handoff::{Consumer, ConsumerConfig, FailurePolicy, Producer, SharedQueue};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::time::{sleep, Duration};

fn main() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        // Create the shared queue both halves hand items through
        let queue = Arc::new(SharedQueue::bounded(10));

        // Spawn producer task
        let producer = Producer::new(Arc::clone(&queue));
        let producer_queue = Arc::clone(&queue);
        let producer_task = tokio::spawn(async move {
            for i in 1..=10 {
                // Simulate some work
                sleep(Duration::from_millis(100)).await;

                match producer.produce(i).await {
                    Ok(_) => println!("Producer: Enqueued {}", i),
                    Err(e) => println!("Producer: Failed to enqueue {}: {:?}", i, e),
                }
            }

            // One stop marker ends the one consumer loop
            producer_queue.signal_stop().await.unwrap();
            println!("Producer: Done, stop marker sent");
        });

        // Spawn consumer task
        let config = ConsumerConfig {
            process_delay: Duration::from_millis(200),
            failure_policy: FailurePolicy::Skip,
        };
        let consumer = Consumer::with_config(Arc::clone(&queue), config);
        let consumer_task = tokio::spawn(async move {
            let reason = consumer
                .consume_with(|item| async move {
                    println!("Consumed: {}", item);
                    Ok::<_, std::convert::Infallible>(())
                })
                .await;

            println!("Consumer: Loop ended ({:?})", reason);
        });

        // Wait for both tasks to complete
        let _ = tokio::join!(producer_task, consumer_task);
    });
}
