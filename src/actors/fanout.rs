//! Host fan-out for one probe definition
//!
//! ## Message Flow
//!
//! ```text
//! find_hosts(service, roles) → for each host: sleep(launch delay) → spawn ProbeExecutor
//!                                                                      ↓
//!                                         wait for every executor of this definition
//! ```
//!
//! Launches are paced so that probe starts spread across roughly half of the
//! probe interval, capped at one second between two launches.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

use super::executor::ProbeExecutor;
use super::throttle::Throttle;
use crate::backend::Backend;
use crate::config::ProbeDefinition;
use crate::metric::Metric;
use crate::probes::generate_probes;

/// Upper bound for the delay between two executor launches
pub const MAX_LAUNCH_DELAY: Duration = Duration::from_secs(1);

/// Everything a fan-out needs besides the definition itself
#[derive(Clone)]
pub struct ProbeContext {
    pub backend: Arc<dyn Backend>,
    pub metric_tx: mpsc::Sender<Metric>,
    pub throttle: Throttle,
    pub cancel: CancellationToken,
    pub probe_interval: Duration,
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutSummary {
    pub hosts_found: usize,
    pub launched: usize,
}

/// Delay between two launches: `min(1s, interval / hosts / 2)`
pub fn launch_delay(probe_interval: Duration, host_count: usize) -> Duration {
    if host_count == 0 {
        return Duration::ZERO;
    }

    let hosts = u32::try_from(host_count).unwrap_or(u32::MAX);
    let per_host = probe_interval / hosts / 2;
    per_host.min(MAX_LAUNCH_DELAY)
}

/// Discover hosts for `definition` and probe each of them
///
/// Discovery failures are logged and make this definition contribute
/// nothing for the current tick.
#[instrument(skip_all, fields(service = %definition.service))]
pub async fn run_fan_out(ctx: &ProbeContext, definition: &ProbeDefinition) -> FanOutSummary {
    debug!(
        "finding hosts service:{} roles:{:?}",
        definition.service, definition.roles
    );

    let hosts = match ctx
        .backend
        .find_hosts(&definition.service, &definition.roles)
        .await
    {
        Ok(hosts) => hosts,
        Err(e) => {
            error!("host discovery failed: {e}");
            return FanOutSummary::default();
        }
    };

    debug!("{} hosts found", hosts.len());
    if hosts.is_empty() {
        return FanOutSummary::default();
    }

    let hosts_found = hosts.len();
    let delay = launch_delay(ctx.probe_interval, hosts_found);
    let mut handles = Vec::with_capacity(hosts_found);

    for host in hosts {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                debug!("cancelled, not launching remaining hosts");
                break;
            }
            _ = sleep(delay) => {}
        }

        debug!("preparing host id:{} name:{}", host.id, host.name);
        let probes = generate_probes(definition, &host);

        let executor = ProbeExecutor::new(
            host,
            probes,
            ctx.metric_tx.clone(),
            ctx.throttle.clone(),
            ctx.cancel.clone(),
        );
        handles.push(tokio::spawn(executor.run()));
    }

    let launched = handles.len();
    for handle in handles {
        if let Err(e) = handle.await {
            error!("probe executor task failed: {e}");
        }
    }

    FanOutSummary {
        hosts_found,
        launched,
    }
}
