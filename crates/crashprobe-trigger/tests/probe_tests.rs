use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crashprobe_process::{EventBus, OutputStream, TargetEvent};
use crashprobe_trigger::{CountingProbe, LogEventProbe, ProbeError};
use tokio::sync::oneshot;

fn publish(bus: &EventBus, line: &str) {
    bus.publish(TargetEvent {
        pid: 4242,
        stream: OutputStream::Stdout,
        line: line.to_string(),
    });
}

/// Let the probe task drain everything published so far.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn test_fires_on_fifth_occurrence_and_not_before() {
    let bus = EventBus::new();
    let probe = LogEventProbe::new(bus.clone());
    let (tx, mut rx) = oneshot::channel();

    let armed = probe
        .arm("LogPrintStr", 5, Box::new(move |count| {
            let _ = tx.send(count);
        }))
        .unwrap();

    for i in 1..=4 {
        publish(&bus, &format!("LogPrintStr line {i}"));
    }
    settle().await;
    assert!(rx.try_recv().is_err(), "fired before the fifth occurrence");
    assert_eq!(armed.observed(), 4);

    publish(&bus, "LogPrintStr line 5");
    let count = tokio::time::timeout(Duration::from_secs(1), &mut rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(count, 5);
}

#[tokio::test]
async fn test_threshold_beyond_run_never_fires() {
    let bus = EventBus::new();
    let probe = LogEventProbe::new(bus.clone());
    let (tx, mut rx) = oneshot::channel::<u64>();

    let armed = probe
        .arm("LogPrintStr", 1000, Box::new(move |count| {
            let _ = tx.send(count);
        }))
        .unwrap();

    for _ in 0..5 {
        publish(&bus, "LogPrintStr");
    }
    settle().await;

    assert!(rx.try_recv().is_err());
    assert_eq!(armed.disarm(), 5);
}

#[tokio::test]
async fn test_at_most_once_per_arm() {
    let bus = EventBus::new();
    let probe = LogEventProbe::new(bus.clone());
    let calls = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&calls);

    let armed = probe
        .arm("tick", 2, Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

    for _ in 0..10 {
        publish(&bus, "tick");
    }
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // The probe stopped counting once it fired.
    assert_eq!(armed.observed(), 2);
}

#[tokio::test]
async fn test_disarm_detaches_from_bus() {
    let bus = EventBus::new();
    let probe = LogEventProbe::new(bus.clone());

    let armed = probe.arm("tick", 3, Box::new(|_| {})).unwrap();
    settle().await;
    assert_eq!(bus.subscriber_count(), 1);

    armed.disarm();
    settle().await;
    assert_eq!(bus.subscriber_count(), 0);
}

#[tokio::test]
async fn test_each_arm_counts_from_zero() {
    let bus = EventBus::new();
    let probe = LogEventProbe::new(bus.clone());

    let first = probe.arm("tick", 10, Box::new(|_| {})).unwrap();
    publish(&bus, "tick");
    publish(&bus, "tick");
    settle().await;
    assert_eq!(first.disarm(), 2);

    let second = probe.arm("tick", 10, Box::new(|_| {})).unwrap();
    publish(&bus, "tick");
    settle().await;
    assert_eq!(second.disarm(), 1);
}

#[tokio::test]
async fn test_zero_threshold_rejected() {
    let probe = LogEventProbe::new(EventBus::new());
    let err = probe.arm("tick", 0, Box::new(|_| {})).unwrap_err();
    assert_eq!(err, ProbeError::ZeroThreshold);
}
