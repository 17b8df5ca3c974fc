use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use stream_batcher::{
    Batcher, BatcherConfig, BatcherError, BoxError, FlushReason, LifecycleState, Result,
};

type Batches<T> = Arc<Mutex<Vec<Vec<T>>>>;

fn recording<T: Send + 'static>() -> (
    Batches<T>,
    impl FnMut(Vec<T>) -> std::result::Result<(), BoxError> + Send + 'static,
) {
    let batches: Batches<T> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&batches);
    let processor = move |batch: Vec<T>| -> std::result::Result<(), BoxError> {
        sink.lock().push(batch);
        Ok(())
    };
    (batches, processor)
}

#[test]
fn test_no_items_lost_across_producers() -> Result<()> {
    let (batches, processor) = recording::<u64>();
    let batcher = Arc::new(
        Batcher::<u64>::builder()
            .batch_size(37)
            .batch_interval(Duration::from_millis(5))
            .processor(processor)
            .build()?,
    );

    let producers: Vec<_> = (0..4u64)
        .map(|p| {
            let batcher = Arc::clone(&batcher);
            thread::spawn(move || {
                for i in 0..250 {
                    batcher.add(p * 1000 + i);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer panicked");
    }

    batcher.close()?;

    let mut seen: Vec<u64> = batches.lock().iter().flatten().copied().collect();
    assert_eq!(seen.len(), 1000);
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), 1000);
    assert_eq!(batcher.len(), 0);
    Ok(())
}

#[test]
fn test_count_trigger_yields_full_batches_in_order() -> Result<()> {
    let (batches, processor) = recording::<usize>();
    let batcher = Batcher::<usize>::builder()
        .batch_size(4)
        .batch_interval(Duration::from_secs(10))
        .processor(processor)
        .build()?;

    for i in 0..20 {
        batcher.add(i);
    }
    batcher.join(Duration::from_secs(1))?;

    let batches = batches.lock();
    assert_eq!(batches.len(), 5);
    for (n, batch) in batches.iter().enumerate() {
        assert_eq!(*batch, (n * 4..n * 4 + 4).collect::<Vec<_>>());
    }
    Ok(())
}

#[test]
fn test_processes_entire_batches_before_timer_expires() -> Result<()> {
    let batch_count = Arc::new(AtomicUsize::new(0));
    let processed = Arc::new(AtomicUsize::new(0));
    let (b, p) = (Arc::clone(&batch_count), Arc::clone(&processed));

    let batcher = Batcher::<u8>::builder()
        .batch_size(5)
        .batch_interval(Duration::from_secs(10))
        .processor(move |items: Vec<u8>| -> std::result::Result<(), BoxError> {
            b.fetch_add(1, Ordering::SeqCst);
            p.fetch_add(items.len(), Ordering::SeqCst);
            Ok(())
        })
        .build()?;

    for _ in 0..10 {
        batcher.add(0);
    }

    batcher.join(Duration::from_millis(100))?;
    assert_eq!(batch_count.load(Ordering::SeqCst), 2);
    assert_eq!(processed.load(Ordering::SeqCst), 10);
    Ok(())
}

#[test]
fn test_byte_trigger_isolates_large_items() -> Result<()> {
    let (batches, processor) = recording::<String>();
    let batcher = Batcher::<String>::builder()
        .batch_size(100)
        .batch_size_bytes(50)
        .batch_interval(Duration::from_secs(10))
        .processor(processor)
        .build()?;

    for i in 0..5 {
        batcher.add(format!("{i:0>40}"));
    }
    batcher.join(Duration::from_millis(500))?;

    let batches = batches.lock();
    assert_eq!(batches.len(), 5);
    assert!(batches.iter().all(|b| b.len() == 1));
    assert_eq!(batcher.metrics().flushes(FlushReason::Bytes), 5);
    Ok(())
}

#[test]
fn test_byte_trigger_flushes_before_overflow() -> Result<()> {
    let (batches, processor) = recording::<String>();
    let batcher = Batcher::<String>::builder()
        .batch_size(100)
        // two empty strings fit, a third would not
        .batch_size_bytes(2 * stream_batcher::size::TEXT_HEADER + 1)
        .batch_interval(Duration::from_secs(10))
        .processor(processor)
        .build()?;

    for _ in 0..6 {
        batcher.add(String::new());
    }
    batcher.close()?;

    let sizes: Vec<usize> = batches.lock().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![2, 2, 2]);
    Ok(())
}

#[test]
fn test_timer_trigger_flushes_single_item() -> Result<()> {
    let (batches, processor) = recording::<&'static str>();
    let batcher = Batcher::<&'static str>::builder()
        .batch_size(1000)
        .batch_interval(Duration::from_millis(50))
        .processor(processor)
        .build()?;

    batcher.add("lonely");
    thread::sleep(Duration::from_millis(250));

    assert_eq!(*batches.lock(), vec![vec!["lonely"]]);
    assert_eq!(batcher.metrics().flushes(FlushReason::Timer), 1);
    assert!(batcher.is_empty());
    Ok(())
}

#[test]
fn test_flush_on_close() -> Result<()> {
    let (batches, processor) = recording::<u32>();
    let batcher = Batcher::<u32>::builder()
        .batch_size(100)
        .batch_interval(Duration::from_secs(10))
        .processor(processor)
        .build()?;

    for i in 0..250 {
        batcher.add(i);
    }
    batcher.close()?;

    assert_eq!(batcher.len(), 0);
    let sizes: Vec<usize> = batches.lock().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![100, 100, 50]);
    assert_eq!(batcher.metrics().flushes(FlushReason::Close), 1);
    assert!(batcher.is_closed());
    Ok(())
}

#[test]
fn test_concurrent_close_runs_once() -> Result<()> {
    let (batches, processor) = recording::<u32>();
    let batcher = Arc::new(
        Batcher::<u32>::builder()
            .batch_size(10)
            .batch_interval(Duration::from_secs(10))
            .processor(processor)
            .build()?,
    );
    for i in 0..25 {
        batcher.add(i);
    }

    let closers: Vec<_> = (0..8)
        .map(|_| {
            let batcher = Arc::clone(&batcher);
            thread::spawn(move || batcher.close().is_ok())
        })
        .collect();
    for closer in closers {
        assert!(closer.join().expect("closer panicked"));
    }

    assert_eq!(batcher.metrics().flushes(FlushReason::Close), 1);
    assert_eq!(batches.lock().iter().map(Vec::len).sum::<usize>(), 25);
    assert_eq!(batcher.state(), LifecycleState::Closed);
    Ok(())
}

#[test]
fn test_close_timeout_is_sticky() -> Result<()> {
    // worker never started, so nothing can drain
    let batcher = Batcher::<u32>::builder()
        .batch_size(10)
        .batch_interval(Duration::from_millis(20))
        .skip_auto_start()
        .build()?;
    for i in 0..3 {
        batcher.add(i);
    }

    let first = batcher.close().unwrap_err();
    let second = batcher.close().unwrap_err();
    match (first, second) {
        (
            BatcherError::Timeout { waited: a, pending: pa },
            BatcherError::Timeout { waited: b, pending: pb },
        ) => {
            assert_eq!(a, b);
            assert_eq!(pa, 3);
            assert_eq!(pb, 3);
        }
        other => panic!("expected timeouts, got {other:?}"),
    }
    assert!(batcher.is_closed());
    assert_eq!(batcher.len(), 3);
    Ok(())
}

#[test]
fn test_join_timeout_leaves_items_pending() -> Result<()> {
    let batcher = Batcher::<u32>::builder()
        .batch_size(1)
        .processor(|_batch: Vec<u32>| -> std::result::Result<(), BoxError> {
            thread::sleep(Duration::from_millis(200));
            Ok(())
        })
        .build()?;

    batcher.add(1);
    let err = batcher.join(Duration::from_millis(20)).unwrap_err();
    assert!(err.is_timeout());
    assert!(batcher.len() > 0);

    batcher.close()?;
    assert_eq!(batcher.len(), 0);
    Ok(())
}

#[test]
fn test_processor_errors_are_reported() -> Result<()> {
    let batcher = Batcher::<u32>::builder()
        .batch_size(10)
        .batch_interval(Duration::from_millis(1))
        .processor(|_batch: Vec<u32>| -> std::result::Result<(), String> {
            Err("sink unavailable".to_string())
        })
        .build()?;

    for i in 0..100 {
        batcher.add(i);
    }
    batcher.join(Duration::from_secs(1))?;
    assert_eq!(batcher.len(), 0);

    let err = batcher
        .errors()
        .recv_timeout(Duration::from_secs(1))
        .expect("processing error");
    assert_eq!(err.batch_len, 10);
    assert!(err.to_string().contains("sink unavailable"));

    batcher.close()?;
    // stream ends once the worker is gone
    let remaining = batcher.errors().iter().count();
    assert_eq!(remaining, 9);
    assert_eq!(batcher.metrics().snapshot().processing_failures, 10);
    Ok(())
}

#[test]
fn test_deferred_start() -> Result<()> {
    let (batches, processor) = recording::<u32>();
    let batcher = Batcher::<u32>::builder()
        .batch_size(2)
        .skip_auto_start()
        .processor(processor)
        .build()?;

    batcher.add(1);
    batcher.add(2);
    assert!(batcher.join(Duration::from_millis(30)).is_err());
    assert!(batches.lock().is_empty());

    batcher.start()?;
    batcher.join(Duration::from_secs(1))?;
    assert_eq!(*batches.lock(), vec![vec![1, 2]]);
    assert!(matches!(batcher.start(), Err(BatcherError::AlreadyStarted)));
    Ok(())
}

#[test]
fn test_add_after_close_is_ignored() -> Result<()> {
    let (batches, processor) = recording::<u32>();
    let batcher = Batcher::<u32>::new(processor)?;
    batcher.close()?;

    batcher.add(1);
    assert_eq!(batcher.len(), 0);
    assert!(batches.lock().is_empty());
    assert_eq!(batcher.metrics().snapshot().items_rejected, 1);
    Ok(())
}

#[test]
fn test_from_json_config() -> Result<()> {
    let config = BatcherConfig::from_json(r#"{"batch_size": 0, "batch_interval": "20ms"}"#)?;
    let (batches, processor) = recording::<u32>();
    let batcher = Batcher::<u32>::from_config(config, processor)?;

    assert_eq!(batcher.config().batch_size, stream_batcher::DEFAULT_BATCH_SIZE);
    assert_eq!(batcher.config().batch_interval, Duration::from_millis(20));

    batcher.add(9);
    batcher.join(Duration::from_secs(1))?;
    assert_eq!(*batches.lock(), vec![vec![9]]);
    Ok(())
}

#[test]
fn test_close_interrupts_producer_stuck_on_full_queue() -> Result<()> {
    // no worker and room for one batch: the second add blocks in the hand-off
    let batcher = Arc::new(
        Batcher::<u32>::builder()
            .batch_size(1)
            .queue_capacity(1)
            .batch_interval(Duration::from_millis(10))
            .skip_auto_start()
            .build()?,
    );
    batcher.add(1);
    assert_eq!(batcher.queued_batches(), 1);

    let producer = {
        let batcher = Arc::clone(&batcher);
        thread::spawn(move || batcher.add(2))
    };
    thread::sleep(Duration::from_millis(50));
    assert_eq!(batcher.len(), 2);

    let (done_tx, done_rx) = crossbeam::channel::bounded(1);
    let closer = {
        let batcher = Arc::clone(&batcher);
        thread::spawn(move || {
            let _ = done_tx.send(batcher.close());
        })
    };

    let outcome = done_rx
        .recv_timeout(Duration::from_secs(3))
        .expect("close stayed blocked behind the stalled hand-off");
    match outcome {
        Err(BatcherError::Timeout { pending, .. }) => assert_eq!(pending, 2),
        other => panic!("expected timeout, got {other:?}"),
    }

    producer.join().expect("producer panicked");
    closer.join().expect("closer panicked");
    assert!(batcher.is_closed());
    assert_eq!(batcher.len(), 2);
    Ok(())
}
