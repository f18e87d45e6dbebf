//! Monitoring backend abstraction
//!
//! The pipeline needs exactly two remote calls: host discovery for a
//! service/role selector, and submission of a batch of metric values.
//! Both live behind the [`Backend`] trait so tests can swap in a
//! [`MemoryBackend`] and the binary can use [`MackerelClient`].

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::metric::MetricValue;

pub mod error;
pub mod mackerel;
pub mod memory;

pub use error::{BackendError, BackendResult};
pub use mackerel::MackerelClient;
pub use memory::MemoryBackend;

/// A host as returned by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    /// Service name to role names
    #[serde(default)]
    pub roles: HashMap<String, Vec<String>>,
}

impl Host {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: String::new(),
            interfaces: Vec::new(),
            roles: HashMap::new(),
        }
    }

    pub fn with_interface(mut self, name: impl Into<String>, ip_address: impl Into<String>) -> Self {
        self.interfaces.push(Interface {
            name: name.into(),
            ip_address: ip_address.into(),
        });
        self
    }

    /// Address of the named interface
    pub fn ip_address(&self, interface: &str) -> Option<&str> {
        self.interfaces
            .iter()
            .find(|iface| iface.name == interface)
            .map(|iface| iface.ip_address.as_str())
    }

    /// Address of the first interface that has one
    pub fn primary_ip_address(&self) -> Option<&str> {
        self.interfaces
            .iter()
            .map(|iface| iface.ip_address.as_str())
            .find(|addr| !addr.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    pub name: String,
    #[serde(default)]
    pub ip_address: String,
}

/// Remote monitoring backend
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// fan-out scheduler and the relay worker.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Find hosts belonging to `service`, optionally restricted to `roles`
    async fn find_hosts(&self, service: &str, roles: &[String]) -> BackendResult<Vec<Host>>;

    /// Submit one batch of metric values
    ///
    /// Submission is all-or-nothing: an error means the caller must treat
    /// the whole batch as not delivered.
    async fn post_metrics(&self, batch: &[MetricValue]) -> BackendResult<()>;
}
