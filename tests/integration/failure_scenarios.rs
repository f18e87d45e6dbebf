//! Failure tests for the pipeline
//!
//! These tests verify that the system handles failures gracefully:
//! - Discovery failures stay isolated to one definition
//! - A failing host does not affect its siblings
//! - Backend outages keep samples for a retry
//! - Unreachable backends do not block shutdown

use std::sync::Arc;
use std::time::Duration;

use probe_relay::{
    actors::{
        fanout::{ProbeContext, run_fan_out},
        relay::{RelayHandle, RelayMode, RelaySettings},
        throttle::Throttle,
    },
    backend::{Backend, MackerelClient, MemoryBackend},
    config::{CommandProbeConfig, ProbeDefinition, TcpProbeConfig},
    metric::Metric,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

fn settings() -> RelaySettings {
    RelaySettings {
        batch_size: 100,
        flush_interval: Duration::from_secs(60),
        retry_backoff: Duration::from_millis(10),
    }
}

fn tcp_definition(service: &str, port: u16) -> ProbeDefinition {
    ProbeDefinition {
        service: service.to_string(),
        roles: vec![],
        tcp: vec![TcpProbeConfig {
            host: "{{ host.ip }}".to_string(),
            port: port.to_string(),
            send: None,
            expect_pattern: None,
            timeout: 2,
        }],
        http: vec![],
        command: vec![],
    }
}

#[tokio::test]
async fn test_discovery_failure_is_isolated() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((_socket, _)) = listener.accept().await {}
    });

    let backend = Arc::new(
        MemoryBackend::new()
            .with_hosts("prod", vec![local_host("h1", "web-1"), local_host("h2", "web-2")])
            .with_hosts("broken", vec![local_host("h3", "web-3")]),
    );
    backend.fail_discovery("broken");

    let (metric_tx, mut metric_rx) = mpsc::channel(64);
    let ctx = ProbeContext {
        backend: Arc::clone(&backend) as Arc<dyn Backend>,
        metric_tx,
        throttle: Throttle::new(4),
        cancel: CancellationToken::new(),
        probe_interval: Duration::from_millis(100),
    };

    let broken = run_fan_out(&ctx, &tcp_definition("broken", port)).await;
    let healthy = run_fan_out(&ctx, &tcp_definition("prod", port)).await;
    drop(ctx);

    assert_eq!(broken.launched, 0);
    assert_eq!(healthy.launched, 2);

    let mut samples = vec![];
    while let Some(metric) = metric_rx.recv().await {
        samples.push(metric);
    }

    assert!(samples.iter().all(|m| m.host_id != "h3"));
    for id in ["h1", "h2"] {
        let ok = samples
            .iter()
            .find(|m| m.host_id == id && m.name == "tcp.check.ok")
            .map(|m| m.value);
        assert_eq!(ok, Some(1.0), "host {id} should be reachable");
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_failing_host_does_not_affect_siblings() {
    let backend = Arc::new(MemoryBackend::new().with_hosts(
        "prod",
        vec![
            local_host("h1", "web-1"),
            local_host("h2", "web-2"),
            local_host("h3", "web-3"),
        ],
    ));

    // exits non-zero on h2 only
    let definition = ProbeDefinition {
        service: "prod".to_string(),
        roles: vec![],
        tcp: vec![],
        http: vec![],
        command: vec![CommandProbeConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "[ {{ host.id }} != h2 ] && printf 'a\\t1\\nb\\t2\\n'".to_string(),
            ],
            timeout: 5,
        }],
    };

    let (metric_tx, mut metric_rx) = mpsc::channel(64);
    let ctx = ProbeContext {
        backend: Arc::clone(&backend) as Arc<dyn Backend>,
        metric_tx,
        throttle: Throttle::new(4),
        cancel: CancellationToken::new(),
        probe_interval: Duration::from_millis(100),
    };

    let summary = run_fan_out(&ctx, &definition).await;
    drop(ctx);

    assert_eq!(summary.launched, 3);

    let mut samples = vec![];
    while let Some(metric) = metric_rx.recv().await {
        samples.push(metric);
    }

    assert_eq!(samples.len(), 4);
    assert!(samples.iter().all(|m| m.host_id != "h2"));
    for id in ["h1", "h3"] {
        let names: Vec<&str> = samples
            .iter()
            .filter(|m| m.host_id == id)
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"], "host {id}");
    }
}

#[tokio::test]
async fn test_outage_retries_the_same_batch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v0/tssdb"))
        .respond_with(ResponseTemplate::new(500).set_body_string("unavailable"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v0/tssdb"))
        .respond_with(ResponseTemplate::new(200))
        .with_priority(2)
        .mount(&mock_server)
        .await;

    let backend: Arc<dyn Backend> = Arc::new(MackerelClient::new(mock_server.uri(), "k").unwrap());
    let (metric_tx, metric_rx) = mpsc::channel(16);
    let relay = RelayHandle::spawn(
        RelayMode::Post(backend),
        settings(),
        metric_rx,
        CancellationToken::new(),
    );

    for i in 0..3 {
        metric_tx
            .send(Metric::new("h1", format!("m{i}"), i as f64))
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(relay.flush().await.is_err());
    assert_eq!(relay.get_stats().await.unwrap().pending, 3);

    relay.flush().await.unwrap();
    let stats = relay.get_stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.posted_batches, 1);
    assert_eq!(stats.failed_attempts, 1);

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].body, requests[1].body);

    drop(metric_tx);
    relay.join().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_backend_does_not_block_shutdown() {
    let backend: Arc<dyn Backend> = Arc::new(MackerelClient::new("http://127.0.0.1:1", "k").unwrap());
    let cancel = CancellationToken::new();
    let (metric_tx, metric_rx) = mpsc::channel(16);
    let relay = RelayHandle::spawn(
        RelayMode::Post(backend),
        settings(),
        metric_rx,
        cancel.clone(),
    );

    metric_tx.send(Metric::new("h1", "m", 1.0)).await.unwrap();
    metric_tx.send(Metric::new("h1", "m", 2.0)).await.unwrap();
    cancel.cancel();

    let stats = tokio::time::timeout(Duration::from_secs(30), relay.join())
        .await
        .expect("relay should stop after one final attempt")
        .unwrap();

    assert_eq!(stats.posted_batches, 0);
    assert_eq!(stats.failed_attempts, 1);
    assert_eq!(stats.pending, 2);
}
