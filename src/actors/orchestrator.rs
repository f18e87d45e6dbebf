//! Orchestrator - the tick loop
//!
//! ## State Machine
//!
//! ```text
//! Idle → Probing → Waiting ─tick─→ ReloadCheck → Idle
//!                     │
//!                     └─cancel─→ Cancelled (terminal)
//! ```
//!
//! Every tick launches one fan-out task per probe definition and waits for
//! all of them. Ticks are wall-clock periodic: an overrunning tick is
//! followed immediately by the next one, without catch-up bursts.
//!
//! The active configuration is an `Arc<Config>` snapshot taken at the start
//! of each tick. A reload replaces the snapshot as a whole, so in-flight
//! fan-outs keep the view they started with.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::fanout::{ProbeContext, run_fan_out};
use super::relay::{RelayHandle, RelayMode, RelaySettings};
use super::throttle::Throttle;
use crate::backend::Backend;
use crate::config::{Config, ConfigSource, Tunables};

/// Result of one reload check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// New configuration is structurally equal to the active one
    Unchanged,
    Reloaded,
    /// Loading failed, the active configuration stays in place
    Failed,
}

pub struct Orchestrator {
    source: Box<dyn ConfigSource>,

    backend: Arc<dyn Backend>,

    /// Active configuration snapshot
    config: Arc<Config>,

    /// Fixed at startup
    tunables: Tunables,

    /// Dump target for probe-only mode (stdout unless overridden)
    dump_writer: Option<Box<dyn Write + Send>>,
}

impl Orchestrator {
    /// Load the initial configuration
    ///
    /// A configuration error here is fatal and returned to the caller.
    pub fn new(source: impl ConfigSource + 'static, backend: Arc<dyn Backend>) -> Result<Self> {
        let config = source.load()?;
        debug!("initial config: {config:?}");

        Ok(Self {
            source: Box::new(source),
            backend,
            tunables: config.tunables.clone(),
            config: Arc::new(config),
            dump_writer: None,
        })
    }

    /// Write probe-only output somewhere other than stdout
    pub fn with_dump_writer(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.dump_writer = Some(writer);
        self
    }

    /// Current configuration snapshot
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Reload from the source and swap only if something changed
    pub fn reload(&mut self) -> ReloadOutcome {
        debug!("checking a new config");

        let new_config = match self.source.load() {
            Ok(config) => config,
            Err(e) => {
                warn!("{e:#}");
                warn!("still using current config");
                return ReloadOutcome::Failed;
            }
        };

        if new_config == *self.config {
            return ReloadOutcome::Unchanged;
        }

        if new_config.tunables != self.tunables {
            warn!("tunables changed; they take effect after a restart");
        }

        self.config = Arc::new(new_config);
        info!("config reloaded");
        debug!("{:?}", self.config);
        ReloadOutcome::Reloaded
    }

    /// Run every definition's fan-out concurrently and wait for all of them
    async fn probe_all(config: &Config, ctx: &ProbeContext) {
        let handles = config.probes.iter().cloned().map(|definition| {
            let ctx = ctx.clone();
            tokio::spawn(async move { run_fan_out(&ctx, &definition).await })
        });

        for result in join_all(handles).await {
            match result {
                Ok(summary) => debug!(
                    "fan-out finished ({} hosts, {} launched)",
                    summary.hosts_found, summary.launched
                ),
                Err(e) => error!("fan-out task failed: {e}"),
            }
        }
    }

    /// Run the tick loop until `cancel` fires
    ///
    /// Returns after the current tick has finished and the relay worker has
    /// made its final flush attempt.
    #[instrument(skip_all)]
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!("starting probe relay");

        let tunables = self.tunables.clone();
        let (metric_tx, metric_rx) = mpsc::channel(tunables.channel_capacity());

        let mode = if self.config.probe_only {
            let writer = self
                .dump_writer
                .take()
                .unwrap_or_else(|| Box::new(std::io::stdout()) as Box<dyn Write + Send>);
            RelayMode::Dump(writer)
        } else {
            RelayMode::Post(Arc::clone(&self.backend))
        };
        let relay = RelayHandle::spawn(
            mode,
            RelaySettings::from(&tunables),
            metric_rx,
            cancel.clone(),
        );

        let ctx = ProbeContext {
            backend: Arc::clone(&self.backend),
            metric_tx,
            throttle: Throttle::new(tunables.max_concurrency),
            cancel: cancel.clone(),
            probe_interval: tunables.probe_interval(),
        };
        debug!(
            "probing every {:?} with up to {} hosts at once",
            ctx.probe_interval,
            ctx.throttle.capacity()
        );

        let period = tunables.probe_interval();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let config = self.config();
            Self::probe_all(&config, &ctx).await;

            debug!("waiting for a next tick");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("stopping probe relay");
                    break;
                }
                _ = ticker.tick() => {}
            }

            self.reload();
        }

        // closes the metric channel once every executor is gone
        drop(ctx);
        relay.join().await?;

        Ok(())
    }
}
