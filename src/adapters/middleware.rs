//! Axum middleware around the proxied exchange.
//!
//! [`request_validation_middleware`] buffers a JSON request body, validates it and
//! either replays the identical bytes to the next stage or answers with an error
//! payload. [`response_validation_middleware`] does the same for the upstream
//! response. Both read the live toggles on every exchange. Bodies are buffered
//! without holding any lock.
use std::sync::Arc;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::LengthLimitError;
use tracing::Instrument;

use crate::{
    core::{
        flags::FeatureToggles,
        validation::{
            ERROR_SENTINEL, ErrorKind, Rejection, SERVER_ERROR_MESSAGE, ValidationEngine,
            ValidationOutcome,
        },
    },
    tracing_setup::create_request_span,
};

/// Shared state of both validation layers.
#[derive(Clone)]
pub struct ValidationState {
    pub engine: Arc<ValidationEngine>,
    pub toggles: Arc<FeatureToggles>,
    pub max_body_bytes: usize,
}

/// Render a rejection as `{"status": ..., "details": [...]}` with its status code.
pub fn rejection_response(rejection: &Rejection) -> Response {
    (rejection.status, Json(rejection.to_payload())).into_response()
}

/// Only the media type counts; parameters such as `charset` are ignored.
pub fn is_json_content(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|media_type| media_type.trim().eq_ignore_ascii_case("application/json"))
}

fn carries_validated_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

fn is_length_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

fn too_large(limit: usize) -> Response {
    rejection_response(&Rejection::new(
        ErrorKind::DeserializeError,
        vec![format!("request body exceeds {limit} bytes")],
        StatusCode::PAYLOAD_TOO_LARGE,
    ))
}

/// Validate JSON request bodies of POST, PUT and PATCH before they are forwarded.
pub async fn request_validation_middleware(
    State(state): State<ValidationState>,
    req: Request,
    next: Next,
) -> Response {
    let flags = state.toggles.load();
    if !flags.request_validation_on
        || !carries_validated_body(req.method())
        || !is_json_content(req.headers())
    {
        tracing::debug!(method = %req.method(), path = req.uri().path(), "Request validation skipped");
        return next.run(req).await;
    }

    if declared_length(req.headers()).is_some_and(|len| len > state.max_body_bytes) {
        tracing::warn!(path = req.uri().path(), "Declared request body over limit");
        return too_large(state.max_body_bytes);
    }

    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) if is_length_limit(&e) => {
            tracing::warn!(path = parts.uri.path(), "Request body over limit");
            return too_large(state.max_body_bytes);
        }
        Err(e) => {
            tracing::warn!(path = parts.uri.path(), "Failed to read request body: {}", e);
            return rejection_response(&Rejection::new(
                ErrorKind::DeserializeError,
                vec![format!("failed to read request body: {e}")],
                StatusCode::BAD_REQUEST,
            ));
        }
    };

    let method = parts.method.as_str().to_ascii_lowercase();
    match state
        .engine
        .validate_request(&method, &bytes, parts.uri.path())
    {
        ValidationOutcome::Passthrough(_) => {
            next.run(Request::from_parts(parts, Body::from(bytes))).await
        }
        ValidationOutcome::Rejected(rejection) => rejection_response(&rejection),
    }
}

/// HEAD answers and 204/304 statuses never carry a body.
fn is_bodyless(method: &Method, status: StatusCode) -> bool {
    *method == Method::HEAD
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

/// Validate JSON upstream responses before they reach the caller. Error payloads
/// produced by this gateway are recognized by their prefix and passed through,
/// and so are responses without a body.
pub async fn response_validation_middleware(
    State(state): State<ValidationState>,
    req: Request,
    next: Next,
) -> Response {
    let request_method = req.method().clone();
    let method = request_method.as_str().to_ascii_lowercase();
    let path = req.uri().path().to_string();
    let response = next.run(req).await;

    if !state.toggles.load().response_validation_on || !is_json_content(response.headers()) {
        return response;
    }
    if is_bodyless(&request_method, response.status()) {
        tracing::debug!(%method, %path, status = %response.status(), "Bodyless response passed through");
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes: Bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(%method, %path, "Failed to read upstream response body: {}", e);
            return rejection_response(&Rejection::new(
                ErrorKind::ServerError,
                vec![SERVER_ERROR_MESSAGE.to_string()],
                StatusCode::INTERNAL_SERVER_ERROR,
            ));
        }
    };

    if bytes.is_empty() {
        tracing::debug!(%method, %path, "Empty response body passed through");
        return Response::from_parts(parts, Body::empty());
    }

    if bytes.starts_with(ERROR_SENTINEL) {
        tracing::debug!(%method, %path, "Error payload passed through unvalidated");
        return Response::from_parts(parts, Body::from(bytes));
    }

    match state.engine.validate_response(&method, &bytes, &path) {
        ValidationOutcome::Passthrough(body) => Response::from_parts(parts, Body::from(body)),
        ValidationOutcome::Rejected(rejection) => rejection_response(&rejection),
    }
}

/// Generate a per‑request UUID, run the request inside its span and expose it
/// via `X-Request-ID`.
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = create_request_span(req.method().as_str(), req.uri().path(), &request_id);

    let mut response = next.run(req).instrument(span.clone()).await;
    span.record("http.status_code", response.status().as_u16());

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("X-Request-ID", header_value);
    }
    response
}
