use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use sentinel::batch::Batch;
use sentinel::codec::{encode_binary, encode_text, Record};
use sentinel::ingest::{IngestError, IngestLoop, IngestOptions};
use sentinel::sink::line::write_batch;
use sentinel::sink::{ForwardError, Forwarder};
use sentinel::transport::{channel, Publisher, Transport, TransportError};
use tokio_util::sync::CancellationToken;

/// Serializes every forwarded batch to line protocol and keeps the text.
#[derive(Default)]
struct LineRecorder {
    bodies: Vec<String>,
    fail_calls: Vec<usize>,
    calls: usize,
}

impl Forwarder for LineRecorder {
    fn name(&self) -> &str {
        "line-recorder"
    }

    async fn forward(&mut self, batch: &Batch) -> Result<(), ForwardError> {
        self.calls += 1;
        if self.fail_calls.contains(&self.calls) {
            return Err(ForwardError::Transport("connection reset".into()));
        }

        let mut buf = BytesMut::new();
        write_batch(&mut buf, "system_stats", batch.entries());
        self.bodies
            .push(String::from_utf8(buf.to_vec()).expect("utf8 body"));
        Ok(())
    }
}

/// Replays scripted results, then fails hard.
struct ScriptedTransport {
    payloads: VecDeque<Bytes>,
    closed: bool,
}

impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.payloads.pop_front() {
            Some(p) => Ok(Some(p)),
            None => Err(TransportError::Disconnected("metrics".into())),
        }
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn binary(observed_at: i64, sent_at_nanos: i64) -> Bytes {
    Bytes::copy_from_slice(&encode_binary(&Record {
        observed_at,
        cpu_usage: 10.0 + observed_at as f64 % 50.0,
        mem_usage: 55.5,
        sent_at_nanos,
    }))
}

fn options(batch_size: usize, flush_on_shutdown: bool) -> IngestOptions {
    IngestOptions {
        batch_size,
        window_size: 1000,
        flush_on_shutdown,
    }
}

#[tokio::test]
async fn test_256_binary_payloads_forward_one_batch() {
    let (tx, rx) = channel(512);
    let base = 1_700_000_000i64;

    for i in 0..256 {
        tx.publish(binary(base + i, now_nanos()))
            .await
            .expect("publish");
    }
    drop(tx);

    let mut ingest = IngestLoop::new(rx, LineRecorder::default(), options(256, true));
    let report = ingest.run(CancellationToken::new()).await.expect("run");

    assert_eq!(report.received, 256);
    assert_eq!(report.batches_forwarded, 1);
    assert_eq!(report.entries_forwarded, 256);

    let bodies = &ingest.forwarder().bodies;
    assert_eq!(bodies.len(), 1);

    let lines: Vec<&str> = bodies[0].lines().collect();
    assert_eq!(lines.len(), 256);
    for (i, line) in lines.iter().enumerate() {
        let expected_ts = (base + i as i64) * 1_000_000_000;
        assert!(line.starts_with("system_stats cpu="), "bad line: {line}");
        assert!(
            line.ends_with(&format!(" {expected_ts}")),
            "line {i} has wrong timestamp: {line}"
        );
    }

    // Every payload carried a send time.
    assert_eq!(ingest.latency().end_to_end().len(), 256);
    assert_eq!(ingest.latency().internal().len(), 256);
}

#[tokio::test]
async fn test_mixed_formats_and_garbage() {
    let (tx, rx) = channel(16);

    tx.publish(binary(1, 0)).await.expect("publish");
    tx.publish(Bytes::from_static(b"not a record"))
        .await
        .expect("publish");
    let text = encode_text(&Record {
        observed_at: 2,
        cpu_usage: 30.0,
        mem_usage: 40.0,
        sent_at_nanos: 0,
    })
    .expect("encode text");
    tx.publish(Bytes::from(text)).await.expect("publish");
    tx.publish(Bytes::from_static(br#"{"timestamp":3}"#))
        .await
        .expect("publish");
    tx.publish(binary(4, 0)).await.expect("publish");
    drop(tx);

    let mut ingest = IngestLoop::new(rx, LineRecorder::default(), options(3, true));
    let report = ingest.run(CancellationToken::new()).await.expect("run");

    assert_eq!(report.received, 5);
    assert_eq!(report.decode_errors, 2);
    assert_eq!(report.decoded, 3);
    assert_eq!(report.batches_forwarded, 1);

    let body = &ingest.forwarder().bodies[0];
    let stamps: Vec<&str> = body
        .lines()
        .filter_map(|l| l.rsplit(' ').next())
        .collect();
    assert_eq!(stamps, vec!["1000000000", "2000000000", "4000000000"]);
}

#[tokio::test]
async fn test_forward_failure_does_not_stop_ingestion() {
    let (tx, rx) = channel(64);
    for i in 0..12 {
        tx.publish(binary(i, 0)).await.expect("publish");
    }
    drop(tx);

    let recorder = LineRecorder {
        fail_calls: vec![2],
        ..Default::default()
    };
    let mut ingest = IngestLoop::new(rx, recorder, options(4, false));
    let report = ingest.run(CancellationToken::new()).await.expect("run");

    assert_eq!(report.received, 12);
    assert_eq!(report.forward_errors, 1);
    assert_eq!(report.batches_forwarded, 2);

    // The failed second batch (4..8) is not re-sent with the third.
    let bodies = &ingest.forwarder().bodies;
    assert_eq!(bodies.len(), 2);
    assert!(bodies[0].lines().next().is_some_and(|l| l.ends_with(" 0")));
    assert_eq!(bodies[1].lines().count(), 4);
    assert!(bodies[1]
        .lines()
        .next()
        .is_some_and(|l| l.ends_with(" 8000000000")));
}

#[tokio::test]
async fn test_zero_send_time_never_reaches_end_to_end_window() {
    let (tx, rx) = channel(64);
    for i in 0..10 {
        let sent = if i % 2 == 0 { 0 } else { now_nanos() };
        tx.publish(binary(i, sent)).await.expect("publish");
    }
    drop(tx);

    let mut ingest = IngestLoop::new(rx, LineRecorder::default(), options(256, false));
    ingest.run(CancellationToken::new()).await.expect("run");

    assert_eq!(ingest.latency().internal().len(), 10);
    assert_eq!(ingest.latency().end_to_end().len(), 5);
}

#[tokio::test]
async fn test_cancellation_is_graceful_and_flushes() {
    let (tx, rx) = channel(64);
    for i in 0..5 {
        tx.publish(binary(i, 0)).await.expect("publish");
    }

    let cancel = CancellationToken::new();
    let mut ingest = IngestLoop::new(rx, LineRecorder::default(), options(256, true));

    let run = {
        let cancel = cancel.clone();
        async move {
            let report = ingest.run(cancel).await;
            (report, ingest)
        }
    };
    let handle = tokio::spawn(run);

    // Let the loop drain what was published, then stop it while idle.
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let (report, ingest) = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop stopped")
        .expect("task joined");
    let report = report.expect("cancellation is not an error");

    assert_eq!(report.received, 5);
    assert_eq!(report.batches_forwarded, 1);
    assert_eq!(ingest.forwarder().bodies[0].lines().count(), 5);
    drop(tx);
}

#[tokio::test]
async fn test_transport_failure_is_fatal_after_flush() {
    let transport = ScriptedTransport {
        payloads: (0..3).map(|i| binary(i, 0)).collect(),
        closed: false,
    };

    let mut ingest = IngestLoop::new(transport, LineRecorder::default(), options(256, true));
    let err = ingest
        .run(CancellationToken::new())
        .await
        .expect_err("transport failure");

    assert!(matches!(
        err,
        IngestError::Transport(TransportError::Disconnected(_))
    ));
    assert_eq!(ingest.report().received, 3);
    assert_eq!(ingest.forwarder().bodies.len(), 1);

    let (transport, _) = ingest.into_parts();
    assert!(transport.closed);
}
