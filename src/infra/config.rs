//! For reading application configuration.

use serde::Deserialize;
use std::time::Duration;

/// Application configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Worker pool configuration.
    pub worker: WorkerConfig,
}

/// Server configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    /// Server address.
    pub address: String,
    /// Server http port.
    pub port: u16,
    /// How long a handler may take before the response headers are sent.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// The maximum number of requests handled at once.
    pub concurrency_limit: usize,
}

/// Configuration of the worker pool used by the streaming endpoints.
#[derive(Clone, Debug, Deserialize)]
pub struct WorkerConfig {
    /// The maximum number of worker threads in use at once.
    pub max_threads: usize,
}

/// Retrieve [`Config`] from the optional configuration file and the environment.
///
/// Environment variables use the `APP` prefix and `__` as separator,
/// e.g. `APP__SERVER__PORT=3000`.
#[tracing::instrument]
pub fn load_config() -> color_eyre::Result<Config> {
    let config = config::Config::builder()
        .set_default("server.address", "127.0.0.1")?
        .set_default("server.port", 8080)?
        .set_default("server.request_timeout", "10s")?
        .set_default("server.concurrency_limit", 500)?
        .set_default("worker.max_threads", 16)?
        .add_source(config::File::with_name("config").required(false))
        .add_source(config::Environment::with_prefix("app").separator("__"))
        .build()?
        .try_deserialize()?;
    Ok(config)
}
