//! Serves greetings over HTTP.

use greeting_stream::{
    app,
    infra::{config, logging, shutdown},
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;
    let _guard = logging::init_logging()?;
    let config = config::load_config()?;

    let listener =
        TcpListener::bind(format!("{}:{}", config.server.address, config.server.port)).await?;
    app::run_app(listener, config, shutdown::shutdown_signal()).await?;

    Ok(())
}
