use handoff::{Consumer, ConsumerConfig, FailurePolicy, Producer, SharedQueue};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::time::Duration;

fn main() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let queue = Arc::new(SharedQueue::bounded(5));
        let producer = Producer::new(Arc::clone(&queue));

        for word in ["alpha", "beta", "gamma"] {
            producer.produce(word).await.unwrap();
            println!("Producer: Enqueued {}", word);
        }

        // Closing rejects further producers but keeps the buffer consumable
        queue.close().await;
        match producer.produce("delta").await {
            Ok(_) => println!("Producer: Enqueued delta"),
            Err(e) => println!("Producer: {}", e),
        }

        let config = ConsumerConfig {
            process_delay: Duration::from_millis(150),
            failure_policy: FailurePolicy::Skip,
        };
        let consumer = Consumer::with_config(Arc::clone(&queue), config);

        // No stop marker was sent; the drained, closed queue ends the loop
        let reason = consumer
            .consume_with(|word| async move {
                println!("Consumed: {}", word);
                Ok::<_, std::convert::Infallible>(())
            })
            .await;

        println!("Consumer: Loop ended ({:?})", reason);
    });
}
