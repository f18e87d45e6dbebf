//! Concrete probes and their generation from probe definitions
//!
//! A [`ProbeDefinition`] carries templates; combining it with a discovered
//! [`Host`] yields one or more concrete probes. Each probe is a single-use
//! unit of work that produces zero or more [`Metric`]s or fails.
//!
//! ## Probe kinds
//!
//! - **tcp**: connect (optionally send/expect) and time it
//! - **http**: request a URL and validate status/body
//! - **command**: run a plugin command and parse its `name\tvalue\ttime` output

use std::fmt;
use std::future::Future;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::backend::Host;
use crate::config::ProbeDefinition;
use crate::metric::Metric;

pub mod command;
pub mod http;
pub mod tcp;
pub mod template;

pub use command::CommandProbe;
pub use http::HttpProbe;
pub use tcp::TcpProbe;

/// One fully parameterized, host-bound probe
///
/// The `Display` impl is the human-readable descriptor used in logs.
#[async_trait]
pub trait Probe: fmt::Display + Send + Sync {
    /// Execute the probe, aborting promptly once `cancel` fires
    async fn run(&self, cancel: &CancellationToken) -> Result<Vec<Metric>>;
}

/// Drive `fut` to completion unless `cancel` fires first
pub async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => bail!("cancelled"),
        result = fut => result,
    }
}

/// Build every concrete probe `definition` describes for `host`
///
/// Templates that cannot be expanded for this host are skipped with a
/// warning; the remaining probes are still returned.
pub fn generate_probes(definition: &ProbeDefinition, host: &Host) -> Vec<Box<dyn Probe>> {
    let mut probes: Vec<Box<dyn Probe>> = Vec::with_capacity(definition.template_count());

    for config in &definition.tcp {
        match TcpProbe::generate(config, host) {
            Ok(probe) => probes.push(Box::new(probe)),
            Err(e) => warn!("skipping tcp probe for host {}: {e:#}", host.name),
        }
    }

    for config in &definition.http {
        match HttpProbe::generate(config, host) {
            Ok(probe) => probes.push(Box::new(probe)),
            Err(e) => warn!("skipping http probe for host {}: {e:#}", host.name),
        }
    }

    for config in &definition.command {
        match CommandProbe::generate(config, host) {
            Ok(probe) => probes.push(Box::new(probe)),
            Err(e) => warn!("skipping command probe for host {}: {e:#}", host.name),
        }
    }

    probes
}
