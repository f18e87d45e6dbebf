//! In-memory backend (no network)
//!
//! Serves a fixed host inventory and records every submitted batch. It's
//! useful for:
//! - Testing the pipeline without a mock HTTP server
//! - Simulating backend outages (scripted discovery/submission failures)
//!
//! ## Limitations
//!
//! - **No persistence**: recorded batches live only as long as the value
//! - **Static inventory**: hosts change only when the caller changes them

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use super::{Backend, BackendError, BackendResult, Host};
use crate::metric::MetricValue;

#[derive(Debug, Default)]
struct State {
    /// Hosts grouped by service
    hosts: HashMap<String, Vec<Host>>,

    failing_services: HashSet<String>,

    /// How many upcoming submissions should fail
    post_failures_remaining: usize,

    batches: Vec<Vec<MetricValue>>,

    post_attempts: usize,

    discovery_calls: usize,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // a panicking test thread must not hide the recorded data
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the inventory for `service`
    pub fn set_hosts(&self, service: impl Into<String>, hosts: Vec<Host>) {
        self.state().hosts.insert(service.into(), hosts);
    }

    pub fn with_hosts(self, service: impl Into<String>, hosts: Vec<Host>) -> Self {
        self.set_hosts(service, hosts);
        self
    }

    /// Make discovery for `service` fail until further notice
    pub fn fail_discovery(&self, service: impl Into<String>) {
        self.state().failing_services.insert(service.into());
    }

    /// Make the next `count` submissions fail
    pub fn fail_next_posts(&self, count: usize) {
        self.state().post_failures_remaining = count;
    }

    /// Every successfully submitted batch, in submission order
    pub fn batches(&self) -> Vec<Vec<MetricValue>> {
        self.state().batches.clone()
    }

    /// Every successfully submitted value, flattened
    pub fn posted_values(&self) -> Vec<MetricValue> {
        self.state().batches.iter().flatten().cloned().collect()
    }

    /// Submission attempts including failed ones
    pub fn post_attempts(&self) -> usize {
        self.state().post_attempts
    }

    pub fn discovery_calls(&self) -> usize {
        self.state().discovery_calls
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn find_hosts(&self, service: &str, roles: &[String]) -> BackendResult<Vec<Host>> {
        let mut state = self.state();
        state.discovery_calls += 1;

        if state.failing_services.contains(service) {
            return Err(BackendError::Status {
                status: 503,
                body: format!("discovery for {service} unavailable"),
            });
        }

        let hosts = state
            .hosts
            .get(service)
            .map(|hosts| {
                hosts
                    .iter()
                    .filter(|host| {
                        roles.is_empty()
                            || host
                                .roles
                                .get(service)
                                .is_some_and(|assigned| assigned.iter().any(|r| roles.contains(r)))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(hosts)
    }

    async fn post_metrics(&self, batch: &[MetricValue]) -> BackendResult<()> {
        let mut state = self.state();
        state.post_attempts += 1;

        if state.post_failures_remaining > 0 {
            state.post_failures_remaining -= 1;
            return Err(BackendError::Request("simulated outage".to_string()));
        }

        debug!("recording batch of {} metric values", batch.len());
        state.batches.push(batch.to_vec());
        Ok(())
    }
}
