//! Concurrency tests
//!
//! - The throttle bounds how many hosts are probed at once
//! - A full metric channel holds executors back instead of dropping samples

use std::sync::{Arc, Mutex};
use std::time::Duration;

use probe_relay::{
    actors::{executor::ProbeExecutor, throttle::Throttle},
    probes::Probe,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

#[tokio::test(start_paused = true)]
async fn test_single_slot_serializes_hosts() {
    let throttle = Throttle::new(1);
    let running = Arc::new(Mutex::new((0, 0)));
    let (metric_tx, mut metric_rx) = mpsc::channel(16);

    let mut handles = vec![];
    for i in 0..3 {
        let id = format!("h{i}");
        let probe = GaugedProbe {
            host_id: id.clone(),
            duration: Duration::from_millis(100),
            running: Arc::clone(&running),
        };
        let executor = ProbeExecutor::new(
            local_host(&id, &format!("web-{i}")),
            vec![Box::new(probe) as Box<dyn Probe>],
            metric_tx.clone(),
            throttle.clone(),
            CancellationToken::new(),
        );
        handles.push(tokio::spawn(executor.run()));
    }
    drop(metric_tx);

    let start = tokio::time::Instant::now();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(start.elapsed(), Duration::from_millis(300));
    assert_eq!(running.lock().unwrap().1, 1);
    assert_eq!(throttle.in_flight(), 0);

    let mut hosts = vec![];
    while let Some(metric) = metric_rx.recv().await {
        hosts.push(metric.host_id);
    }
    hosts.sort();
    assert_eq!(hosts, vec!["h0", "h1", "h2"]);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_never_exceeds_capacity() {
    let throttle = Throttle::new(3);
    let running = Arc::new(Mutex::new((0, 0)));
    let (metric_tx, mut metric_rx) = mpsc::channel(64);

    let mut handles = vec![];
    for i in 0..20 {
        let id = format!("h{i}");
        let probe = GaugedProbe {
            host_id: id.clone(),
            duration: Duration::from_millis(10 + i as u64),
            running: Arc::clone(&running),
        };
        let executor = ProbeExecutor::new(
            local_host(&id, &id),
            vec![Box::new(probe) as Box<dyn Probe>],
            metric_tx.clone(),
            throttle.clone(),
            CancellationToken::new(),
        );
        handles.push(tokio::spawn(executor.run()));
    }
    drop(metric_tx);

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(running.lock().unwrap().1, 3);

    let mut count = 0;
    while metric_rx.recv().await.is_some() {
        count += 1;
    }
    assert_eq!(count, 20);
}

#[tokio::test(start_paused = true)]
async fn test_full_channel_applies_backpressure() {
    let (metric_tx, mut metric_rx) = mpsc::channel(1);
    let executor = ProbeExecutor::new(
        local_host("h1", "web-1"),
        vec![Box::new(BurstProbe {
            host_id: "h1".to_string(),
            count: 3,
        }) as Box<dyn Probe>],
        metric_tx,
        Throttle::new(1),
        CancellationToken::new(),
    );
    let handle = tokio::spawn(executor.run());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!handle.is_finished(), "executor should wait for channel space");

    let mut names = vec![];
    while let Some(metric) = metric_rx.recv().await {
        names.push(metric.name);
    }

    handle.await.unwrap();
    assert_eq!(names, vec!["burst.0", "burst.1", "burst.2"]);
}
