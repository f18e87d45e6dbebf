//! ProbeExecutor - runs every generated probe for one host
//!
//! One executor holds one throttle slot for the whole per-host probe set.
//! Probe failures are isolated: they are logged and the next probe runs.
//! Samples are pushed onto the shared metric channel, which blocks when the
//! relay worker falls behind.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use super::throttle::Throttle;
use crate::backend::Host;
use crate::metric::Metric;
use crate::probes::Probe;

pub struct ProbeExecutor {
    host: Host,
    probes: Vec<Box<dyn Probe>>,
    metric_tx: mpsc::Sender<Metric>,
    throttle: Throttle,
    cancel: CancellationToken,
}

impl ProbeExecutor {
    pub fn new(
        host: Host,
        probes: Vec<Box<dyn Probe>>,
        metric_tx: mpsc::Sender<Metric>,
        throttle: Throttle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            host,
            probes,
            metric_tx,
            throttle,
            cancel,
        }
    }

    #[instrument(skip(self), fields(host_id = %self.host.id, host = %self.host.name))]
    pub async fn run(self) {
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!("cancelled while waiting for a throttle slot");
                return;
            }
            permit = self.throttle.acquire() => permit,
        };

        for probe in &self.probes {
            if self.cancel.is_cancelled() {
                debug!("cancelled, skipping remaining probes");
                return;
            }

            debug!("probing host id:{} name:{} probe:{probe}", self.host.id, self.host.name);

            let metrics = match probe.run(&self.cancel).await {
                Ok(metrics) => metrics,
                Err(e) => {
                    warn!(
                        "probe failed. {e:#} host id:{} name:{} probe:{probe}",
                        self.host.id, self.host.name
                    );
                    continue;
                }
            };

            trace!("{probe} produced {} metrics", metrics.len());

            for metric in metrics {
                if self.metric_tx.send(metric).await.is_err() {
                    warn!("metric channel closed, dropping remaining samples");
                    return;
                }
            }
        }
    }
}
