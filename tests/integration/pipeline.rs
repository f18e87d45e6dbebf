//! End-to-end tests for the whole pipeline
//!
//! These tests run the orchestrator against a mock backend:
//! - Discovery → probes → relay → backend submission
//! - Probe-only mode dumps samples and never submits

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use probe_relay::{
    actors::orchestrator::Orchestrator,
    backend::{Backend, MackerelClient},
    config::FileConfigSource,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

fn write_config(config: serde_json::Value) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{config}").unwrap();
    file
}

#[tokio::test]
async fn test_samples_flow_from_probes_to_backend() {
    let mock_server = MockServer::start().await;
    mount_hosts(
        &mock_server,
        "prod",
        vec![
            host_json("h1", "web-1", "127.0.0.1"),
            host_json("h2", "web-2", "127.0.0.1"),
        ],
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/health/web-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/health/web-2"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v0/tssdb"))
        .and(header("X-Api-Key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true })))
        .mount(&mock_server)
        .await;

    // the mock server doubles as a reachable TCP endpoint
    let mock_url = url::Url::parse(&mock_server.uri()).unwrap();
    let port = mock_url.port().unwrap();

    let file = write_config(serde_json::json!({
        "api_key": "secret",
        "backend_url": mock_server.uri(),
        "probes": [{
            "service": "prod",
            "tcp": [{ "host": "{{ host.ip.eth0 }}", "port": port.to_string() }],
            "http": [{ "url": format!("{}/health/{{{{ host.name }}}}", mock_server.uri()) }]
        }],
        "tunables": { "probe_interval_secs": 1, "flush_interval_secs": 1 }
    }));

    let backend: Arc<dyn Backend> = Arc::new(MackerelClient::new(mock_server.uri(), "secret").unwrap());
    let orchestrator = Orchestrator::new(FileConfigSource::new(file.path()), backend).unwrap();

    let cancel = CancellationToken::new();
    let task = tokio::spawn(orchestrator.run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("orchestrator should stop after cancellation")
        .unwrap()
        .unwrap();

    let values = posted_values(&mock_server).await;
    let hosts: HashSet<&str> = values
        .iter()
        .filter_map(|value| value["hostId"].as_str())
        .collect();
    assert_eq!(hosts, HashSet::from(["h1", "h2"]));

    let check = |host: &str, name: &str| {
        values
            .iter()
            .find(|value| value["hostId"] == host && value["name"] == name)
            .map(|value| value["value"].as_f64().unwrap())
    };
    assert_eq!(check("h1", "http.check.ok"), Some(1.0));
    assert_eq!(check("h2", "http.check.ok"), Some(0.0));
    assert_eq!(check("h1", "tcp.check.ok"), Some(1.0));
    assert_eq!(check("h2", "tcp.check.ok"), Some(1.0));

    // every posted value carries a timestamp
    assert!(values.iter().all(|value| value["time"].as_i64().unwrap() > 0));
}

#[tokio::test]
async fn test_probe_only_dumps_and_never_posts() {
    let mock_server = MockServer::start().await;
    mount_hosts(&mock_server, "prod", vec![host_json("h1", "web-1", "127.0.0.1")]).await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v0/tssdb"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    // no api key needed when forced into probe-only mode
    let file = write_config(serde_json::json!({
        "backend_url": mock_server.uri(),
        "probes": [{
            "service": "prod",
            "http": [{ "url": format!("{}/health", mock_server.uri()) }]
        }],
        "tunables": { "probe_interval_secs": 1, "flush_interval_secs": 1 }
    }));

    let buffer = SharedBuffer::default();
    let backend: Arc<dyn Backend> = Arc::new(MackerelClient::new(mock_server.uri(), "").unwrap());
    let orchestrator =
        Orchestrator::new(FileConfigSource::new(file.path()).probe_only(true), backend)
            .unwrap()
            .with_dump_writer(Box::new(buffer.clone()));
    assert!(orchestrator.config().probe_only);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(orchestrator.run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(1200)).await;
    cancel.cancel();
    task.await.unwrap().unwrap();

    let lines = buffer.lines();
    assert!(!lines.is_empty());
    for line in &lines {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["hostId"], "h1");
    }
    assert!(lines.iter().any(|line| line.contains("http.check.ok")));

    assert!(posted_values(&mock_server).await.is_empty());
}
