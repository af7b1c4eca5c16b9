//! Global application state.
//!
//! Used for access to common resources such as the worker pool
//! behind the greeting streams.

use super::{config::Config, worker::WorkerPool};
use crate::api::greeting::greeting_service::{GreetingStreamer, GREETING_INTERVAL};
use axum::extract::FromRef;
use tokio_util::sync::CancellationToken;

/// Global application state.
#[derive(Clone, Debug, FromRef)]
pub struct AppState {
    streamer: GreetingStreamer,
}

impl AppState {
    /// Constructs a new [`AppState`].
    pub fn new(streamer: GreetingStreamer) -> Self {
        Self { streamer }
    }

    /// Constructs the state described by `config`.
    ///
    /// Cancelling `shutdown` ends every open greeting stream.
    pub fn from_config(config: &Config, shutdown: CancellationToken) -> Self {
        let workers = WorkerPool::new(config.worker.max_threads);
        Self::new(GreetingStreamer::new(GREETING_INTERVAL, workers, shutdown))
    }
}
