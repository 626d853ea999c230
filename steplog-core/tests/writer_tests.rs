// steplog-core/tests/writer_tests.rs
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use steplog_core::{spawn_writer, MemorySink, PipelineEvent, SteplogError, WriterSettings};
use tokio::sync::broadcast;
use tokio::time::Instant;

fn settings(batch_size: usize, debounce_ms: u64, flush_limit_ms: u64, budget: usize) -> WriterSettings {
    WriterSettings {
        time_unit_limit: Duration::from_millis(1000),
        message_size_limit_per_time_unit: budget,
        flush_time_limit: Duration::from_millis(flush_limit_ms),
        debounce_delay: Duration::from_millis(debounce_ms),
        batch_size,
        max_deferred_writes: 64,
        channel_capacity: 64,
    }
}

/// Waits for the next `Flush` event, returning its byte count and error flag.
async fn next_flush(events: &mut broadcast::Receiver<PipelineEvent>) -> (usize, bool) {
    loop {
        match events.recv().await.unwrap() {
            PipelineEvent::Flush { error, bytes } => return (bytes, error.is_some()),
            PipelineEvent::WriteCalls => continue,
            other => panic!("unexpected event {:?}", other),
        }
    }
}

fn line(i: usize) -> String {
    format!("line-{:02}", i)
}

fn strings(values: Vec<Value>) -> Vec<String> {
    values.into_iter().map(|v| v.as_str().unwrap().to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn eleven_writes_flush_as_five_five_one() {
    let sink = Arc::new(MemorySink::new());
    let (writer, _task) = spawn_writer(sink.clone(), settings(5, 500, 700, 1_000_000));
    let mut events = writer.subscribe();
    let start = Instant::now();

    for i in 0..11 {
        writer.write("logs", &line(i)).await.unwrap();
    }
    for _ in 0..3 {
        next_flush(&mut events).await;
    }

    assert!(Instant::now() - start <= Duration::from_millis(700));
    let sizes: Vec<usize> = sink.batches().await.iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![5, 5, 1]);
    assert_eq!(strings(sink.values("logs").await), (0..11).map(line).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn batch_is_flushed_once_it_reaches_flush_limit() {
    let sink = Arc::new(MemorySink::new());
    // Debounce longer than the limit so only the age check can trigger.
    let (writer, _task) = spawn_writer(sink.clone(), settings(100, 400, 300, 1_000_000));
    let mut events = writer.subscribe();
    let start = Instant::now();

    writer.write("logs", &line(0)).await.unwrap();
    next_flush(&mut events).await;
    let elapsed = Instant::now() - start;
    assert!(elapsed >= Duration::from_millis(300) && elapsed < Duration::from_millis(400));

    let sizes: Vec<usize> = sink.batches().await.iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![1]);
}

#[tokio::test(start_paused = true)]
async fn steady_trickle_cannot_postpone_flush_past_limit() {
    let sink = Arc::new(MemorySink::new());
    let (writer, _task) = spawn_writer(sink.clone(), settings(100, 500, 700, 1_000_000));
    let mut events = writer.subscribe();
    let start = Instant::now();

    writer.write("logs", &line(0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    writer.write("logs", &line(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    writer.write("logs", &line(2)).await.unwrap();
    next_flush(&mut events).await;

    // Bounded by max(flush limit, debounce), not by the last write's debounce.
    assert!(Instant::now() - start <= Duration::from_millis(701));
    let sizes: Vec<usize> = sink.batches().await.iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![3]);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_defers_writes_to_next_window() {
    let sink = Arc::new(MemorySink::new());
    // Each record serializes to 9 bytes; three fit in the 30 byte budget.
    let (writer, _task) = spawn_writer(sink.clone(), settings(100, 50, 1000, 30));
    let mut events = writer.subscribe();
    let start = Instant::now();

    for i in 0..7 {
        writer.write("logs", &line(i)).await.unwrap();
    }

    let mut flushed_at = Vec::new();
    for _ in 0..3 {
        let (bytes, failed) = next_flush(&mut events).await;
        assert!(!failed);
        assert!(bytes <= 30);
        flushed_at.push(Instant::now() - start);
    }

    let sizes: Vec<usize> = sink.batches().await.iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![3, 3, 1]);
    assert!(flushed_at[1] >= Duration::from_millis(1000));
    assert!(flushed_at[2] >= Duration::from_millis(2000));
    assert_eq!(strings(sink.values("logs").await), (0..7).map(line).collect::<Vec<_>>());
    assert!(writer.stats().records_deferred >= 2);
}

#[tokio::test(start_paused = true)]
async fn flush_waits_for_deferred_writes() {
    let sink = Arc::new(MemorySink::new());
    let (writer, _task) = spawn_writer(sink.clone(), settings(100, 50, 1000, 30));
    let start = Instant::now();

    for i in 0..7 {
        writer.write("logs", &line(i)).await.unwrap();
    }
    let bytes = writer.flush().await.unwrap();

    assert_eq!(bytes, 9);
    assert!(Instant::now() - start >= Duration::from_millis(2000));
    assert_eq!(sink.entries().await.len(), 7);
    assert_eq!(writer.stats().deferred_pending, 0);
}

#[tokio::test(start_paused = true)]
async fn oversize_record_is_not_stuck() {
    let sink = Arc::new(MemorySink::new());
    let (writer, _task) = spawn_writer(sink.clone(), settings(100, 50, 1000, 4));

    writer.write("logs", "far more than four bytes").await.unwrap();
    writer.flush().await.unwrap();
    assert_eq!(sink.entries().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn writes_during_flush_go_to_next_batch() {
    let sink = Arc::new(MemorySink::with_latency(Duration::from_millis(100)));
    let (writer, _task) = spawn_writer(sink.clone(), settings(2, 500, 1000, 1_000_000));

    writer.write("logs", "a").await.unwrap();
    writer.write("logs", "b").await.unwrap();
    // The service is now inside the sink call; these wait in the channel.
    writer.write("logs", "c").await.unwrap();
    writer.write("logs", "d").await.unwrap();
    writer.write("logs", "e").await.unwrap();
    writer.flush().await.unwrap();

    let batches: Vec<Vec<String>> = sink
        .batches()
        .await
        .iter()
        .map(|b| b.entries().iter().map(|e| e.value.get().to_string()).collect())
        .collect();
    assert_eq!(batches[0], vec!["\"a\"", "\"b\""]);
    assert_eq!(batches[1], vec!["\"c\"", "\"d\""]);
    assert_eq!(batches[2], vec!["\"e\""]);
}

#[tokio::test(start_paused = true)]
async fn failed_flush_keeps_batch_for_next_attempt() {
    let sink = Arc::new(MemorySink::new());
    sink.fail_next(1);
    let (writer, _task) = spawn_writer(sink.clone(), settings(2, 500, 1000, 1_000_000));
    let mut events = writer.subscribe();

    writer.write("logs", "a").await.unwrap();
    writer.write("logs", "b").await.unwrap();

    assert!(matches!(events.recv().await.unwrap(), PipelineEvent::WriteCalls));
    let (bytes, failed) = next_flush(&mut events).await;
    assert!(failed);
    assert_eq!(bytes, 6);
    assert!(sink.batches().await.is_empty());

    assert_eq!(writer.flush().await.unwrap(), 6);
    let sizes: Vec<usize> = sink.batches().await.iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![2]);

    let stats = writer.stats();
    assert_eq!(stats.flush_attempts, 2);
    assert_eq!(stats.failed_flushes, 1);
    assert_eq!(stats.entries_flushed, 2);
}

#[tokio::test(start_paused = true)]
async fn retained_batch_counts_against_the_window_it_is_resent_in() {
    let sink = Arc::new(MemorySink::new());
    sink.fail_next(1);
    // 9 byte records, 30 byte budget per second.
    let (writer, _task) = spawn_writer(sink.clone(), settings(100, 50, 5000, 30));
    let mut events = writer.subscribe();

    for i in 0..3 {
        writer.write("logs", &line(i)).await.unwrap();
    }
    let (bytes, failed) = next_flush(&mut events).await;
    assert!(failed);
    assert_eq!(bytes, 27);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let resend_window = Instant::now();
    for i in 3..6 {
        writer.write("logs", &line(i)).await.unwrap();
    }
    writer.flush().await.unwrap();

    let mut flushed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::Flush { error: None, bytes } = event {
            flushed.push(bytes);
        }
    }
    assert_eq!(flushed, vec![27, 27]);
    // The new records had to wait for a window the retained bytes were not charged to.
    assert!(Instant::now() - resend_window >= Duration::from_millis(1000));
    assert_eq!(strings(sink.values("logs").await), (0..6).map(line).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn failed_flush_is_returned_from_flush() {
    let sink = Arc::new(MemorySink::new());
    let (writer, _task) = spawn_writer(sink.clone(), settings(10, 500, 1000, 1_000_000));
    writer.write("logs", "a").await.unwrap();
    sink.fail_next(1);

    let err = writer.flush().await.unwrap_err();
    assert!(matches!(err, SteplogError::Sink(_)));

    assert_eq!(writer.discard_batch().await.unwrap(), 1);
    assert_eq!(writer.flush().await.unwrap(), 0);
    assert!(sink.entries().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn empty_batch_is_never_flushed() {
    let sink = Arc::new(MemorySink::new());
    let (writer, _task) = spawn_writer(sink.clone(), settings(10, 50, 1000, 1_000_000));
    let mut events = writer.subscribe();

    assert_eq!(writer.flush().await.unwrap(), 0);
    assert!(events.try_recv().is_err());
    assert_eq!(writer.stats().flush_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn full_deferred_queue_applies_backpressure() {
    let sink = Arc::new(MemorySink::new());
    let tight = WriterSettings {
        max_deferred_writes: 1,
        channel_capacity: 1,
        ..settings(100, 50, 1000, 9)
    };
    let (writer, _task) = spawn_writer(sink.clone(), tight);
    let start = Instant::now();

    let producer = {
        let writer = writer.clone();
        tokio::spawn(async move {
            for i in 0..4 {
                writer.write("logs", &line(i)).await.unwrap();
            }
        })
    };
    producer.await.unwrap();
    writer.flush().await.unwrap();

    assert!(Instant::now() - start >= Duration::from_millis(3000));
    assert_eq!(strings(sink.values("logs").await), (0..4).map(line).collect::<Vec<_>>());
    assert!(sink.batches().await.iter().all(|b| b.len() == 1));
}

#[tokio::test(start_paused = true)]
async fn close_flushes_and_stops() {
    let sink = Arc::new(MemorySink::new());
    let (writer, task) = spawn_writer(sink.clone(), settings(10, 500, 1000, 1_000_000));

    writer.write("logs", "last words").await.unwrap();
    assert_eq!(writer.close().await.unwrap(), 12);
    task.await.unwrap();

    assert_eq!(sink.entries().await.len(), 1);
    let err = writer.write("logs", "too late").await.unwrap_err();
    assert!(matches!(err, SteplogError::ChannelClosed(_)));
}

#[tokio::test(start_paused = true)]
async fn entries_keep_their_destination() {
    let sink = Arc::new(MemorySink::new());
    let (writer, _task) = spawn_writer(sink.clone(), settings(10, 500, 1000, 1_000_000));

    writer.write("t/steps/a/logs", "from a").await.unwrap();
    writer.write("t/steps/b/logs", "from b").await.unwrap();
    writer.flush().await.unwrap();

    assert_eq!(strings(sink.values("t/steps/a/logs").await), vec!["from a"]);
    assert_eq!(strings(sink.values("t/steps/b/logs").await), vec!["from b"]);
    let keys: Vec<String> = sink.entries().await.into_iter().map(|e| e.key).collect();
    assert_ne!(keys[0], keys[1]);
}
