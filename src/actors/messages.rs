//! Message types for actor communication
//!
//! Metric samples themselves travel over a plain bounded mpsc channel
//! (many executors, one relay worker). This module holds the control
//! messages sent to the relay worker and the statistics it reports.

use tokio::sync::oneshot;

/// Commands that can be sent to the RelayWorker
#[derive(Debug)]
pub enum RelayCommand {
    /// Attempt to submit the pending batch right away
    ///
    /// Responds with the submission result. A failed manual flush keeps the
    /// batch but does not apply the retry backoff.
    Flush {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    /// Get relay statistics
    GetStats {
        respond_to: oneshot::Sender<RelayStats>,
    },
}

/// Relay statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Samples waiting in the current batch
    pub pending: usize,

    /// Batches confirmed by the backend
    pub posted_batches: u64,

    /// Samples confirmed by the backend
    pub posted_metrics: u64,

    /// Submission attempts that failed
    pub failed_attempts: u64,

    /// Samples written in dump mode
    pub dumped_metrics: u64,
}
