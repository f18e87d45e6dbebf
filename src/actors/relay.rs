//! RelayWorker - Batches metric samples and submits them to the backend
//!
//! ## Modes
//!
//! ### Post (default)
//! - Samples are converted to wire values and appended to a batch
//! - Submission is attempted on three triggers (see below)
//! - A failed submission keeps the batch untouched, waits the retry
//!   backoff and retries on the next trigger
//!
//! ### Dump (probe-only)
//! - Every sample is written as one JSON line as soon as it is dequeued
//! - No batching, no retry, no backend traffic
//!
//! ## Flush Triggers
//!
//! - **Size trigger**: batch reached `batch_size`
//! - **Time trigger**: `flush_interval` elapsed
//! - **Shutdown**: cancellation or channel closure, one best-effort attempt
//!
//! Delivery is at-least-once. Under a sustained outage the batch keeps
//! growing; the only backpressure towards executors is the bounded metric
//! channel.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::{RelayCommand, RelayStats};
use crate::backend::Backend;
use crate::config::Tunables;
use crate::metric::{Metric, MetricValue};

/// Where samples end up
pub enum RelayMode {
    Post(Arc<dyn Backend>),
    Dump(Box<dyn Write + Send>),
}

impl RelayMode {
    fn name(&self) -> &'static str {
        match self {
            RelayMode::Post(_) => "post",
            RelayMode::Dump(_) => "dump",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub retry_backoff: Duration,
}

impl From<&Tunables> for RelaySettings {
    fn from(tunables: &Tunables) -> Self {
        Self {
            batch_size: tunables.batch_size,
            flush_interval: tunables.flush_interval(),
            retry_backoff: tunables.retry_backoff(),
        }
    }
}

pub struct RelayWorker {
    mode: RelayMode,

    settings: RelaySettings,

    /// Single consumer side of the metric channel
    metric_rx: mpsc::Receiver<Metric>,

    command_rx: mpsc::Receiver<RelayCommand>,

    cancel: CancellationToken,

    /// Pending wire values, cleared only after a confirmed submission
    batch: Vec<MetricValue>,

    stats: RelayStats,
}

impl RelayWorker {
    pub fn new(
        mode: RelayMode,
        settings: RelaySettings,
        metric_rx: mpsc::Receiver<Metric>,
        command_rx: mpsc::Receiver<RelayCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            mode,
            settings,
            metric_rx,
            command_rx,
            cancel,
            batch: Vec::with_capacity(settings.batch_size),
            stats: RelayStats::default(),
        }
    }

    /// Run until cancelled or until every metric sender is gone
    ///
    /// Returns the final statistics.
    #[instrument(skip(self), fields(mode = self.mode.name()))]
    pub async fn run(mut self) -> RelayStats {
        debug!("starting relay worker");

        let period = self.settings.flush_interval;
        let mut flush_ticker = time::interval_at(Instant::now() + period, period);
        flush_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("cancellation requested");
                    break;
                }

                // Time-based flush trigger
                _ = flush_ticker.tick() => {
                    if !self.batch.is_empty() {
                        trace!("time-based flush triggered ({} metrics)", self.batch.len());
                        self.flush_with_backoff().await;
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    self.handle_command(cmd).await;
                }

                result = self.metric_rx.recv() => {
                    match result {
                        Some(metric) => self.accept(metric).await,
                        None => {
                            debug!("metric channel closed");
                            break;
                        }
                    }
                }
            }
        }

        // Take whatever executors already queued before giving up
        while let Ok(metric) = self.metric_rx.try_recv() {
            self.buffer(metric);
        }

        if !self.batch.is_empty() {
            debug!("final flush before shutdown ({} metrics)", self.batch.len());
            if self.flush().await.is_err() {
                warn!("abandoning {} unsent metrics", self.batch.len());
            }
        }

        let stats = self.stats();
        info!(
            "relay worker stopped (posted {} metrics in {} batches, {} failed attempts)",
            stats.posted_metrics, stats.posted_batches, stats.failed_attempts
        );
        stats
    }

    fn stats(&self) -> RelayStats {
        RelayStats {
            pending: self.batch.len(),
            ..self.stats.clone()
        }
    }

    /// Buffer or dump one sample without triggering a submission
    fn buffer(&mut self, metric: Metric) {
        match &mut self.mode {
            RelayMode::Post(_) => self.batch.push(metric.to_wire()),
            RelayMode::Dump(writer) => {
                let line = match serde_json::to_string(&metric.to_wire()) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("failed to encode metric {}: {e}", metric.name);
                        return;
                    }
                };

                debug!("{line}");
                match writeln!(writer, "{line}").and_then(|_| writer.flush()) {
                    Ok(()) => self.stats.dumped_metrics += 1,
                    Err(e) => warn!("failed to dump metric: {e}"),
                }
            }
        }
    }

    async fn accept(&mut self, metric: Metric) {
        self.buffer(metric);

        // Size-based flush trigger
        if self.batch.len() >= self.settings.batch_size {
            trace!("size-based flush triggered ({} metrics)", self.batch.len());
            self.flush_with_backoff().await;
        }
    }

    /// Submit the pending batch; the batch is cleared only on success
    async fn flush(&mut self) -> Result<()> {
        let RelayMode::Post(backend) = &self.mode else {
            return Ok(());
        };
        let backend = Arc::clone(backend);

        if self.batch.is_empty() {
            return Ok(());
        }

        let batch_size = self.batch.len();
        debug!("posting {batch_size} metrics to backend");
        trace!("{}", serde_json::to_string(&self.batch).unwrap_or_default());

        match backend.post_metrics(&self.batch).await {
            Ok(()) => {
                self.batch.clear();
                self.stats.posted_batches += 1;
                self.stats.posted_metrics += batch_size as u64;
                debug!("post succeeded");
                Ok(())
            }
            Err(e) => {
                self.stats.failed_attempts += 1;
                // every failure is retried; permanent ones need an operator
                if e.is_transient() {
                    warn!("failed to post metrics to backend, will retry: {e}");
                } else {
                    error!("backend rejected metrics, retrying until fixed: {e}");
                }
                Err(e.into())
            }
        }
    }

    /// Flush, and on failure wait the retry backoff (or until cancelled)
    async fn flush_with_backoff(&mut self) {
        if self.flush().await.is_ok() {
            return;
        }

        trace!("backing off for {:?}", self.settings.retry_backoff);
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = time::sleep(self.settings.retry_backoff) => {}
        }
    }

    async fn handle_command(&mut self, cmd: RelayCommand) {
        match cmd {
            RelayCommand::Flush { respond_to } => {
                debug!("manual flush requested");
                let result = self.flush().await;
                let _ = respond_to.send(result);
            }

            RelayCommand::GetStats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }
        }
    }
}

/// Handle for controlling a RelayWorker
pub struct RelayHandle {
    sender: mpsc::Sender<RelayCommand>,
    task: JoinHandle<RelayStats>,
}

impl RelayHandle {
    /// Spawn a new relay worker consuming `metric_rx`
    pub fn spawn(
        mode: RelayMode,
        settings: RelaySettings,
        metric_rx: mpsc::Receiver<Metric>,
        cancel: CancellationToken,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let worker = RelayWorker::new(mode, settings, metric_rx, cmd_rx, cancel);
        let task = tokio::spawn(worker.run());

        Self {
            sender: cmd_tx,
            task,
        }
    }

    /// Attempt to submit the pending batch now
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RelayCommand::Flush { respond_to: tx })
            .await
            .context("failed to send Flush command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn get_stats(&self) -> Result<RelayStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RelayCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive response")
    }

    /// Wait for the worker to stop and return its final statistics
    pub async fn join(self) -> Result<RelayStats> {
        self.task.await.context("relay worker task failed")
    }
}
