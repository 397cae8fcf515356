use handoff::{
    ConsumeError, Consumer, ConsumerConfig, ConsumerState, Envelope, FailurePolicy, Producer,
    SharedQueue, StopReason,
};
use quickcheck::TestResult;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_test::assert_ok;

fn fast_config() -> ConsumerConfig {
    ConsumerConfig {
        process_delay: Duration::ZERO,
        ..ConsumerConfig::default()
    }
}

#[tokio::test]
async fn test_consumer_processes_items_then_stops_on_marker() {
    let queue = Arc::new(SharedQueue::bounded(10));
    let producer = Producer::new(Arc::clone(&queue));

    assert_ok!(producer.produce("item1").await);
    assert_ok!(producer.produce("item2").await);
    assert_ok!(queue.signal_stop().await);

    let consumer = Consumer::with_config(Arc::clone(&queue), fast_config());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let reason = consumer
        .consume_with(move |item| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().await.push(item);
                Ok::<_, Infallible>(())
            }
        })
        .await
        .unwrap();

    // The marker itself never reaches the handler
    assert_eq!(reason, StopReason::StopMarker);
    assert_eq!(*seen.lock().await, vec!["item1", "item2"]);
    assert_eq!(consumer.state(), ConsumerState::Stopped);

    let stats = consumer.stats().await;
    assert_eq!(stats.items_processed, 2);
    assert_eq!(stats.runs_completed, 1);
}

#[tokio::test]
async fn test_stop_only_run_processes_nothing() {
    let queue: Arc<SharedQueue<u32>> = Arc::new(SharedQueue::bounded(4));
    assert_ok!(queue.signal_stop().await);

    let consumer = Consumer::with_config(Arc::clone(&queue), fast_config());
    let reason = consumer.consume().await.unwrap();

    assert_eq!(reason, StopReason::StopMarker);
    assert_eq!(consumer.stats().await.items_processed, 0);
}

#[tokio::test]
async fn test_pipeline_runs_producer_and_consumer_concurrently() {
    // Capacity well below the item count so the producer actually suspends
    let queue = Arc::new(SharedQueue::bounded(2));
    let producer = Producer::new(Arc::clone(&queue));
    let consumer = Arc::new(Consumer::with_config(Arc::clone(&queue), fast_config()));

    let producer_queue = Arc::clone(&queue);
    let producer_task = tokio::spawn(async move {
        for i in 0..10u32 {
            producer.produce(i).await.unwrap();
        }
        producer_queue.signal_stop().await.unwrap();
    });

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let consumer_handle = Arc::clone(&consumer);
    let consumer_task = tokio::spawn(async move {
        consumer_handle
            .consume_with(move |item| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().await.push(item);
                    Ok::<_, Infallible>(())
                }
            })
            .await
    });

    let (produced, consumed) = tokio::join!(producer_task, consumer_task);
    produced.unwrap();
    let reason = consumed.unwrap().unwrap();

    // No loss, no duplication, no reordering
    assert_eq!(reason, StopReason::StopMarker);
    assert_eq!(*seen.lock().await, (0..10).collect::<Vec<u32>>());
    assert_eq!(consumer.stats().await.items_processed, 10);
}

#[tokio::test]
async fn test_skip_policy_counts_failures_and_continues() {
    let queue = Arc::new(SharedQueue::bounded(10));
    for i in 1..=5u32 {
        queue.enqueue(i).await.unwrap();
    }
    assert_ok!(queue.signal_stop().await);

    let config = ConsumerConfig {
        process_delay: Duration::ZERO,
        failure_policy: FailurePolicy::Skip,
    };
    let consumer = Consumer::with_config(Arc::clone(&queue), config);

    let reason = consumer
        .consume_with(|item| async move {
            if item % 2 == 0 {
                Err("rejected even item")
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();

    assert_eq!(reason, StopReason::StopMarker);
    let stats = consumer.stats().await;
    assert_eq!(stats.items_processed, 3);
    assert_eq!(stats.items_skipped, 2);
}

#[tokio::test]
async fn test_halt_policy_surfaces_the_failure() {
    let queue = Arc::new(SharedQueue::bounded(10));
    for i in 1..=3u32 {
        queue.enqueue(i).await.unwrap();
    }
    assert_ok!(queue.signal_stop().await);

    let config = ConsumerConfig {
        process_delay: Duration::ZERO,
        failure_policy: FailurePolicy::Halt,
    };
    let consumer = Consumer::with_config(Arc::clone(&queue), config);

    let result = consumer
        .consume_with(|item| async move {
            if item == 2 {
                Err("rejected item 2")
            } else {
                Ok(())
            }
        })
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, ConsumeError::Processing { .. }));
    assert!(err.to_string().contains("rejected item 2"));
    assert_eq!(consumer.state(), ConsumerState::Stopped);
    assert_eq!(consumer.stats().await.items_processed, 1);

    // The rest of the sequence is still buffered for another run
    assert_eq!(queue.recv().await, Some(Envelope::Item(3)));
    assert_eq!(queue.recv().await, Some(Envelope::Stop));
}

#[tokio::test]
async fn test_close_without_marker_ends_run_cleanly() {
    let queue = Arc::new(SharedQueue::bounded(4));
    queue.enqueue(1u32).await.unwrap();
    queue.enqueue(2u32).await.unwrap();
    queue.close().await;

    let consumer = Consumer::with_config(Arc::clone(&queue), fast_config());
    let reason = consumer.consume().await.unwrap();

    assert_eq!(reason, StopReason::Closed);
    assert_eq!(consumer.stats().await.items_processed, 2);
}

#[tokio::test]
async fn test_consumer_rearms_for_a_second_run() {
    let queue: Arc<SharedQueue<u32>> = Arc::new(SharedQueue::bounded(4));
    let consumer = Consumer::with_config(Arc::clone(&queue), fast_config());

    assert_ok!(queue.signal_stop().await);
    assert_eq!(consumer.consume().await.unwrap(), StopReason::StopMarker);
    assert_eq!(consumer.state(), ConsumerState::Stopped);

    // A stopped consumer can be pointed at the next stop-terminated sequence
    queue.enqueue(42).await.unwrap();
    assert_ok!(queue.signal_stop().await);
    assert_eq!(consumer.consume().await.unwrap(), StopReason::StopMarker);

    let stats = consumer.stats().await;
    assert_eq!(stats.items_processed, 1);
    assert_eq!(stats.runs_completed, 2);
}

#[tokio::test]
async fn test_join_completes_once_consumer_marks_everything_done() {
    let queue = Arc::new(SharedQueue::bounded(10));
    for i in 0..3u32 {
        queue.enqueue(i).await.unwrap();
    }

    let consumer = Arc::new(Consumer::with_config(Arc::clone(&queue), fast_config()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let consumer_handle = Arc::clone(&consumer);
    let consumer_task = tokio::spawn(async move {
        consumer_handle
            .consume_with(move |item| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().await.push(item);
                    Ok::<_, Infallible>(())
                }
            })
            .await
    });

    // Returns only after all three items were handled and marked done
    queue.join().await;
    assert_eq!(*seen.lock().await, vec![0, 1, 2]);

    assert_ok!(queue.signal_stop().await);
    let reason = consumer_task.await.unwrap().unwrap();
    assert_eq!(reason, StopReason::StopMarker);
}

#[tokio::test]
async fn test_join_completes_despite_handler_failures() {
    let queue = Arc::new(SharedQueue::bounded(10));
    for i in 1..=4u32 {
        queue.enqueue(i).await.unwrap();
    }

    // Skip policy: rejected items are logged and counted, never re-queued
    let consumer = Arc::new(Consumer::with_config(Arc::clone(&queue), fast_config()));
    let consumer_handle = Arc::clone(&consumer);
    let consumer_task = tokio::spawn(async move {
        consumer_handle
            .consume_with(|item| async move {
                if item % 2 == 0 {
                    Err("rejected even item")
                } else {
                    Ok(())
                }
            })
            .await
    });

    // Failed items are still marked done, so this must return
    queue.join().await;

    assert_ok!(queue.signal_stop().await);
    let reason = consumer_task.await.unwrap().unwrap();
    assert_eq!(reason, StopReason::StopMarker);

    let stats = consumer.stats().await;
    assert_eq!(stats.items_processed, 2);
    assert_eq!(stats.items_skipped, 2);
}

#[tokio::test(start_paused = true)]
async fn test_fixed_delay_paces_the_loop() {
    let queue: Arc<SharedQueue<u32>> = Arc::new(SharedQueue::bounded(10));
    for i in 0..3 {
        queue.enqueue(i).await.unwrap();
    }
    assert_ok!(queue.signal_stop().await);

    // Default configuration pauses one second per item
    let consumer = Consumer::new(Arc::clone(&queue));
    let started = tokio::time::Instant::now();
    let reason = consumer.consume().await.unwrap();

    assert_eq!(reason, StopReason::StopMarker);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "elapsed {:?}", elapsed);
}

// Property: whatever the produced sequence, the consumer sees exactly that
// sequence, in order, with the marker consumed by the loop itself.
async fn ordered_delivery_property(input: Vec<u32>) -> TestResult {
    if input.len() > 500 {
        return TestResult::discard();
    }

    let queue = Arc::new(SharedQueue::unbounded());
    let producer = Producer::new(Arc::clone(&queue));
    for item in input.clone() {
        if producer.produce(item).await.is_err() {
            return TestResult::failed();
        }
    }
    if queue.signal_stop().await.is_err() {
        return TestResult::failed();
    }

    let consumer = Consumer::with_config(Arc::clone(&queue), fast_config());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let run = consumer
        .consume_with(move |item| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().await.push(item);
                Ok::<_, Infallible>(())
            }
        })
        .await;
    if run.is_err() {
        return TestResult::failed();
    }

    let seen = seen.lock().await.clone();
    TestResult::from_bool(seen == input)
}

#[tokio::test]
async fn property_pipeline_preserves_arbitrary_sequences() {
    for size in [0usize, 1, 10, 100] {
        let input: Vec<u32> = (0..size as u32).map(|i| i * 7 % 13).collect();
        let result = ordered_delivery_property(input).await;
        assert_ne!(
            format!("{:?}", result),
            format!("{:?}", TestResult::failed()),
            "property failed for size {}",
            size
        );
    }
}
