//! The axum application.
//!
//! # Examples
//!
//! A single greeting.
//!
//! ```rust
//! # use greeting_stream::api::greeting::greeting_service::GreetingResponse;
//! # tokio_test::block_on(async {
//! # let url = greeting_stream::app::spawn_app().await.unwrap();
//! let response = reqwest::get(format!("{url}/greeting/World")).await.unwrap();
//! assert_eq!(200, response.status());
//! let greeting = response.json::<GreetingResponse>().await.unwrap();
//! assert!(greeting.message().starts_with("Hello World at "));
//! # });
//! ```
//!
//! A stream of greetings, one server-sent event per second.
//!
//! ```rust
//! # tokio_test::block_on(async {
//! # let url = greeting_stream::app::spawn_app().await.unwrap();
//! let mut response = reqwest::get(format!("{url}/greetings/World")).await.unwrap();
//! assert_eq!("text/event-stream", response.headers()["content-type"]);
//! let event = response.chunk().await.unwrap().unwrap();
//! assert!(String::from_utf8_lossy(&event).contains("Hello World at "));
//! # });
//! ```

use crate::infra::{
    config::Config,
    error::{InternalError, PanicHandler},
    middleware::{log_request_response, MakeRequestIdSpan},
    openapi::ApiDoc,
    state::AppState,
};
use axum::{error_handling::HandleErrorLayer, response::IntoResponse, routing::get, Json, Router};
use http::{header::AUTHORIZATION, StatusCode};
use std::{future::Future, iter};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    sensitive_headers::SetSensitiveRequestHeadersLayer,
    timeout::TimeoutLayer,
    trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use utoipa::OpenApi;

/// Constructs the full axum application.
pub fn app(state: AppState, config: &Config) -> Router {
    // Fallible middleware from tower, mapped to infallible response with [`HandleErrorLayer`].
    let tower_middleware = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(|e| async move {
            InternalError::Other(format!("Tower middleware failed: {e}")).into_response()
        }))
        .concurrency_limit(config.server.concurrency_limit);

    Router::new()
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(crate::api::api(state))
        // Layers
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.server.request_timeout,
        ))
        .layer(axum::middleware::from_fn(log_request_response))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(MakeRequestIdSpan)
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO))
                .on_failure(()),
        )
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(SetSensitiveRequestHeadersLayer::new(iter::once(
            AUTHORIZATION,
        )))
        .layer(tower_middleware)
        .layer(CatchPanicLayer::custom(PanicHandler))
}

/// Starts the axum server and serves until `signal` completes.
///
/// Open greeting streams are ended when the signal fires, so that the
/// graceful shutdown does not wait on them forever.
pub async fn run_app(
    listener: TcpListener,
    config: Config,
    signal: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let shutdown = CancellationToken::new();
    let state = AppState::from_config(&config, shutdown.clone());
    let app = app(state, &config).into_make_service();

    tracing::info!("Starting axum on {}", listener.local_addr()?);
    let exit_result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            shutdown.cancel();
        })
        .await;

    match &exit_result {
        Ok(_) => tracing::info!("Successfully shut down"),
        Err(e) => tracing::error!("Shutdown failed: {}", e),
    }
    exit_result
}

/// Spawn a server on a random port.
///
/// Returns the base url of the server.
pub async fn spawn_app() -> color_eyre::Result<String> {
    let address = "127.0.0.1";
    let listener = TcpListener::bind(format!("{address}:0")).await?;
    let port = listener.local_addr()?.port();
    let config = crate::infra::config::load_config()?;
    tokio::spawn(run_app(listener, config, std::future::pending()));
    Ok(format!("http://{address}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::{
            greeting::greeting_service::{GreetingResponse, GreetingStreamer},
            info::info_api::AppInfo,
        },
        infra::worker::WorkerPool,
    };
    use axum::body::Body;
    use futures::StreamExt;
    use http::Request;
    use http_body_util::BodyExt;
    use serde::de::DeserializeOwned;
    use std::time::Duration;
    use tower::ServiceExt;

    const TEST_INTERVAL: Duration = Duration::from_millis(100);

    fn test_app() -> (Router, GreetingStreamer) {
        let config = crate::infra::config::load_config().unwrap();
        let streamer = GreetingStreamer::new(
            TEST_INTERVAL,
            WorkerPool::new(config.worker.max_threads),
            CancellationToken::new(),
        );
        let state = AppState::new(streamer.clone());
        (app(state, &config), streamer)
    }

    async fn json_body<T: DeserializeOwned>(res: http::Response<Body>) -> T {
        let body = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    /// Extracts the greeting from each `data:` line of a chunk of server-sent events.
    fn events(chunk: &[u8]) -> Vec<GreetingResponse> {
        String::from_utf8_lossy(chunk)
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|data| serde_json::from_str(data.trim()).unwrap())
            .collect()
    }

    fn timestamp_of(greeting: &GreetingResponse) -> chrono::DateTime<chrono::FixedOffset> {
        let (_, ts) = greeting.message().rsplit_once(" at ").unwrap();
        chrono::DateTime::parse_from_rfc3339(ts).unwrap()
    }

    #[tokio::test]
    async fn greeting_oneshot() {
        let (app, _) = test_app();
        let req = Request::get("/greeting/World").body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(StatusCode::OK, res.status());
        assert_eq!("application/json", res.headers()["content-type"]);
        assert!(res.headers().contains_key("x-request-id"));
        let greeting: GreetingResponse = json_body(res).await;
        assert!(greeting.message().starts_with("Hello World at "));
        timestamp_of(&greeting);
    }

    #[tokio::test]
    async fn greeting_decodes_path() {
        let (app, _) = test_app();
        let req = Request::get("/greeting/J%C3%BCrgen%20X")
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(StatusCode::OK, res.status());
        let greeting: GreetingResponse = json_body(res).await;
        assert!(greeting.message().starts_with("Hello Jürgen X at "));
    }

    #[tokio::test]
    async fn greeting_without_name_is_not_found() {
        let (app, _) = test_app();
        let req = Request::get("/greeting/").body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(StatusCode::NOT_FOUND, res.status());
    }

    #[tokio::test]
    async fn greetings_oneshot_streams_events() {
        let (app, streamer) = test_app();
        let req = Request::get("/greetings/World").body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(StatusCode::OK, res.status());
        assert_eq!("text/event-stream", res.headers()["content-type"]);

        let mut body = res.into_body().into_data_stream();
        let mut greetings = Vec::new();
        while greetings.len() < 3 {
            let chunk = body.next().await.unwrap().unwrap();
            greetings.extend(events(&chunk));
        }
        for greeting in &greetings {
            assert!(greeting.message().starts_with("Hello World at "));
        }
        for pair in greetings.windows(2) {
            assert!(timestamp_of(&pair[0]) < timestamp_of(&pair[1]));
        }

        // Disconnect
        drop(body);
        for _ in 0..50 {
            if streamer.open_streams() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("stream was not closed after disconnect");
    }

    #[tokio::test]
    async fn info_oneshot() {
        let (app, _) = test_app();
        let req = Request::get("/info").body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(StatusCode::OK, res.status());
        let info: AppInfo = json_body(res).await;
        assert_eq!(env!("CARGO_PKG_NAME"), info.name());
    }

    #[tokio::test]
    async fn openapi_oneshot() {
        let (app, _) = test_app();
        let req = Request::get("/openapi.json").body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(StatusCode::OK, res.status());
        let doc: serde_json::Value = json_body(res).await;
        assert!(doc["paths"]["/greetings/{name}"].is_object());
        assert!(doc["components"]["schemas"]["ErrorBody"].is_object());
    }

    #[tokio::test]
    async fn greeting_over_http() {
        let url = spawn_app().await.unwrap();
        let response = reqwest::get(format!("{url}/greeting/World")).await.unwrap();
        assert_eq!(200, response.status());
        let greeting: GreetingResponse = response.json().await.unwrap();
        assert!(greeting.message().starts_with("Hello World at "));
    }

    #[tokio::test]
    async fn greetings_over_http_once_per_second() {
        let url = spawn_app().await.unwrap();
        let start = std::time::Instant::now();
        let mut response = reqwest::get(format!("{url}/greetings/World")).await.unwrap();
        assert_eq!(200, response.status());

        let mut greetings = Vec::new();
        while greetings.len() < 2 {
            let chunk = response.chunk().await.unwrap().unwrap();
            greetings.extend(events(&chunk));
        }
        // The first greeting is delayed too.
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(4));

        for greeting in &greetings {
            assert!(greeting.message().contains("Hello World at "));
        }
        let gap = timestamp_of(&greetings[1]) - timestamp_of(&greetings[0]);
        assert!(gap >= chrono::Duration::milliseconds(900));
        assert!(gap <= chrono::Duration::milliseconds(1500));
    }
}
