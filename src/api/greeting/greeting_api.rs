//! Implementation of the greeting API. Greets a name from the path, once or once per second.

use super::greeting_service::{self, GreetingRequest, GreetingResponse, GreetingStreamer};
use crate::infra::{
    error::{ApiError, ClientError, InternalError},
    state::AppState,
};
use axum::{
    extract::State,
    response::sse::{Event, Sse},
    Json, Router,
};
use axum_extra::routing::{RouterExt, TypedPath};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::instrument;

/// The greeting API endpoints.
pub fn routes() -> Router<AppState> {
    Router::new().typed_get(greeting).typed_get(greetings)
}

/// The path of a single greeting.
#[derive(Debug, Deserialize, TypedPath)]
#[typed_path("/greeting/:name", rejection(ClientError))]
pub struct GreetingPath {
    name: String,
}

/// The path of a greeting stream.
#[derive(Debug, Deserialize, TypedPath)]
#[typed_path("/greetings/:name", rejection(ClientError))]
pub struct GreetingsPath {
    name: String,
}

/// Greets someone once.
#[utoipa::path(
    get,
    path = "/greeting/{name}",
    params(("name" = String, Path, description = "Who to greet")),
    responses(
        (status = 200, description = "Success", body = GreetingResponse),
        (status = 500, description = "Internal Server Error", body = crate::infra::error::ErrorBody),
    )
)]
#[instrument]
pub async fn greeting(GreetingPath { name }: GreetingPath) -> Json<GreetingResponse> {
    Json(greeting_service::greet_once(&GreetingRequest::new(name)))
}

/// Greets someone once per second, as server-sent events, until the client disconnects.
#[utoipa::path(
    get,
    path = "/greetings/{name}",
    params(("name" = String, Path, description = "Who to greet")),
    responses(
        (status = 200, description = "An endless stream of greetings", content_type = "text/event-stream", body = GreetingResponse),
        (status = 500, description = "Internal Server Error", body = crate::infra::error::ErrorBody),
    )
)]
#[instrument(skip(streamer))]
pub async fn greetings(
    GreetingsPath { name }: GreetingsPath,
    State(streamer): State<GreetingStreamer>,
) -> Sse<impl Stream<Item = Result<Event, ApiError>>> {
    let greetings = streamer
        .greet_many(GreetingRequest::new(name))
        .map(|greeting| greeting.and_then(|greeting| to_event(&greeting)));
    Sse::new(greetings)
}

fn to_event(greeting: &GreetingResponse) -> Result<Event, ApiError> {
    Ok(Event::default()
        .json_data(greeting)
        .map_err(InternalError::from)?)
}
