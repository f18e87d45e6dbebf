//! Actor-based probe pipeline
//!
//! Each stage runs as an independent async task communicating via Tokio
//! channels. A single cancellation token reaches every stage.
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌──────────────────┐
//!                    │   Orchestrator   │ tick loop + config reload
//!                    └────────┬─────────┘
//!                             │ spawns per definition
//!                ┌────────────┼────────────┐
//!                │            │            │
//!        ┌───────▼───────┐    │    ┌───────▼───────┐
//!        │  Fan-out (A)  │    │    │  Fan-out (N)  │ host discovery
//!        └───────┬───────┘    │    └───────┬───────┘
//!                │ spawns per host         │
//!        ┌───────▼───────┐         ┌───────▼───────┐
//!        │ ProbeExecutor │   ...   │ ProbeExecutor │ one throttle slot each
//!        └───────┬───────┘         └───────┬───────┘
//!                │                         │
//!                └────────────┬────────────┘
//!                             │
//!                   ┌─────────▼──────────┐
//!                   │  Metric Channel    │ bounded mpsc
//!                   └─────────┬──────────┘
//!                             │
//!                   ┌─────────▼──────────┐
//!                   │    RelayWorker     │ batch + retry, or dump
//!                   └────────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Samples**: bounded mpsc channel, senders wait when it is full
//! 2. **Commands**: the relay worker has an mpsc command channel
//! 3. **Request/Response**: oneshot channels for flush results and stats

pub mod executor;
pub mod fanout;
pub mod messages;
pub mod orchestrator;
pub mod relay;
pub mod throttle;
