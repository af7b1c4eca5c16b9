//! A service for greeting someone, once or periodically.

use crate::infra::{error::ApiResult, worker::WorkerPool};
use async_stream::stream;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::mpsc,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, Instrument};
use utoipa::ToSchema;

/// The delay before each streamed greeting, including the first.
pub const GREETING_INTERVAL: Duration = Duration::from_secs(1);

/// Who to greet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetingRequest {
    name: String,
}

impl GreetingRequest {
    /// Constructs a new [`GreetingRequest`].
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The name to greet.
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }
}

/// A timestamped greeting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GreetingResponse {
    /// The greeting, e.g. `Hello World at 2024-01-01T00:00:00Z`.
    message: String,
}

impl GreetingResponse {
    /// Constructs a new [`GreetingResponse`].
    pub fn new(message: String) -> Self {
        Self { message }
    }

    /// Returns the message.
    pub fn message(&self) -> &str {
        self.message.as_ref()
    }
}

/// Greets someone at the current time.
pub fn greet(request: &GreetingRequest) -> GreetingResponse {
    greet_at(request, Utc::now())
}

/// Greets someone at the given time.
#[instrument(ret)]
pub fn greet_at(request: &GreetingRequest, now: DateTime<Utc>) -> GreetingResponse {
    GreetingResponse::new(format!(
        "Hello {} at {}",
        request.name(),
        now.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    ))
}

/// Produces a single greeting right away.
pub fn greet_once(request: &GreetingRequest) -> GreetingResponse {
    greet(request)
}

/// Produces an endless stream of greetings, one per interval.
///
/// Each stream owns a timer task that hands greeting generation to the
/// [`WorkerPool`]. The task stops when the stream is dropped, when the
/// shutdown token is cancelled, or after the first failed generation.
#[derive(Clone, Debug)]
pub struct GreetingStreamer {
    interval: Duration,
    workers: WorkerPool,
    shutdown: CancellationToken,
    open_streams: Arc<AtomicUsize>,
}

impl GreetingStreamer {
    /// Constructs a new [`GreetingStreamer`].
    pub fn new(interval: Duration, workers: WorkerPool, shutdown: CancellationToken) -> Self {
        Self {
            interval,
            workers,
            shutdown,
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The number of streams whose timer task is still running.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Greets someone once per interval until the stream is dropped.
    ///
    /// The first greeting is emitted one full interval after the call.
    pub fn greet_many(
        &self,
        request: GreetingRequest,
    ) -> impl Stream<Item = ApiResult<GreetingResponse>> + Send + 'static {
        let (tx, mut rx) = mpsc::channel::<ApiResult<GreetingResponse>>(1);
        let period = self.interval;
        let workers = self.workers.clone();
        let shutdown = self.shutdown.clone();
        let open = OpenStream::new(self.open_streams.clone());
        let span = tracing::info_span!("greet_many", name = request.name());

        tokio::spawn(
            async move {
                let _open = open;
                let mut ticks = time::interval_at(Instant::now() + period, period);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
                let mut sent: u64 = 0;
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => {
                            tracing::debug!(sent, "Stream cancelled by shutdown");
                            break;
                        }
                        _ = tx.closed() => {
                            tracing::debug!(sent, "Client went away");
                            break;
                        }
                        _ = ticks.tick() => {}
                    }
                    let request = request.clone();
                    let greeting = workers.run(move || greet(&request)).await;
                    let failed = greeting.is_err();
                    // A client that stopped reading must not hold up shutdown.
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => {
                            tracing::debug!(sent, "Stream cancelled by shutdown");
                            break;
                        }
                        delivered = tx.send(greeting.map_err(Into::into)) => {
                            if delivered.is_err() {
                                tracing::debug!(sent, "Client went away");
                                break;
                            }
                        }
                    }
                    if failed {
                        tracing::warn!(sent, "Greeting failed, closing stream");
                        break;
                    }
                    sent += 1;
                }
            }
            .instrument(span),
        );

        stream! {
            while let Some(greeting) = rx.recv().await {
                yield greeting;
            }
        }
    }
}

/// Counts a stream as open for as long as it lives.
struct OpenStream(Arc<AtomicUsize>);

impl OpenStream {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
