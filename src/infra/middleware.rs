//! Middleware for modifying requests and responses.

use crate::infra::error::{ApiError, ClientError, InternalError};
use axum::{
    body::{Body, Bytes, HttpBody as _},
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use tower_http::trace::MakeSpan;

static X_REQUEST_ID: &str = "x-request-id";

/// Creates a request span tagged with the `x-request-id` header.
#[derive(Clone, Copy, Debug)]
pub(crate) struct MakeRequestIdSpan;

impl<B> MakeSpan<B> for MakeRequestIdSpan {
    fn make_span(&mut self, request: &http::Request<B>) -> tracing::Span {
        let request_id = request
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|id| id.to_str().ok())
            .unwrap_or("unknown");
        tracing::info_span!(
            "request",
            request_id = request_id,
            method = %request.method(),
            uri = %request.uri(),
            version = ?request.version(),
        )
    }
}

/// The maximum size of a body to log.
const MAX_BODY_SIZE: u64 = 8192;

/// Logs request and response bodies at trace level.
///
/// Only bodies with a known, small size are buffered. Streaming bodies,
/// such as server-sent events, pass through untouched.
pub(crate) async fn log_request_response(req: Request, next: Next) -> Result<Response, ApiError> {
    let (parts, body) = req.into_parts();
    let req = if is_small(&body) {
        let bytes = buffer_and_print("Request", body).await?;
        Request::from_parts(parts, Body::from(bytes))
    } else {
        Request::from_parts(parts, body)
    };
    let host = req
        .headers()
        .get(http::header::HOST)
        .map(|h| h.to_str())
        .transpose()
        .map_err(|e| ClientError::BadRequest(e.to_string()))?
        .unwrap_or("unknown")
        .to_string();

    let res = next.run(req).await;

    let (parts, body) = res.into_parts();
    let res = if is_small(&body) {
        let bytes = buffer_and_print("Response", body).await?;
        Response::from_parts(parts, Body::from(bytes))
    } else {
        tracing::trace!("Response body is streamed");
        Response::from_parts(parts, body)
    };
    tracing::debug!(host = %host, status = res.status().as_u16(), "Handled request");

    Ok(res.into_response())
}

fn is_small(body: &Body) -> bool {
    matches!(body.size_hint().upper(), Some(n) if n <= MAX_BODY_SIZE)
}

/// Read the entire body and store it in memory.
async fn buffer_and_print(direction: &str, body: Body) -> Result<Bytes, ApiError> {
    let body = body
        .collect()
        .await
        .map_err(|e| InternalError::Other(format!("failed to read {direction} body: {e}")))?
        .to_bytes();

    // Log if valid text
    if let Ok(body) = std::str::from_utf8(&body) {
        tracing::trace!("{} body = {:?}", direction, body);
    }

    Ok(body)
}
