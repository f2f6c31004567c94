use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{ConnectInfo, Path, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::{
    adapters::middleware::{
        ValidationState, rejection_response, request_id_middleware,
        request_validation_middleware, response_validation_middleware,
    },
    core::{
        flags::FeatureToggles,
        gateway::{UpstreamError, UpstreamRouter},
        refresh::{RefreshCoordinator, TOKEN_HEADER},
        registry::SchemaRegistry,
        schema_index::Direction,
        validation::ValidationEngine,
    },
    ports::http_client::{HttpClient, HttpClientError},
};

/// HTTP surface of the gateway: schema content, refresh webhook, health and
/// the validated reverse proxy.
#[derive(Clone)]
pub struct HttpHandler {
    registry: Arc<SchemaRegistry>,
    refresh: Arc<RefreshCoordinator>,
    upstreams: Arc<UpstreamRouter>,
    http_client: Arc<dyn HttpClient>,
    validation: ValidationState,
}

impl HttpHandler {
    pub fn new(
        refresh: Arc<RefreshCoordinator>,
        engine: Arc<ValidationEngine>,
        toggles: Arc<FeatureToggles>,
        upstreams: Arc<UpstreamRouter>,
        http_client: Arc<dyn HttpClient>,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            registry: engine.registry().clone(),
            refresh,
            upstreams,
            http_client,
            validation: ValidationState {
                engine,
                toggles,
                max_body_bytes,
            },
        }
    }

    /// Build the application router.
    ///
    /// Proxied exchanges pass the response layer (outer) and then the request
    /// layer (inner), so a request-side error payload still flows back through
    /// the response layer, where its prefix marks it as already handled.
    pub fn router(self) -> Router {
        let proxy = Router::new()
            .fallback(proxy_handler)
            .layer(middleware::from_fn_with_state(
                self.validation.clone(),
                request_validation_middleware,
            ))
            .layer(middleware::from_fn_with_state(
                self.validation.clone(),
                response_validation_middleware,
            ))
            .with_state(self.clone());

        Router::new()
            .route("/jsonschema/{*file}", get(schema_handler))
            .route("/refresh", post(refresh_handler))
            .route("/health", get(health_handler))
            .with_state(self)
            .fallback_service(proxy)
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(request_id_middleware))
    }
}

/// Raw text of a schema file from the current generation.
async fn schema_handler(State(handler): State<HttpHandler>, Path(file): Path<String>) -> Response {
    let generation = handler.registry.current();
    match generation.raw_schemas().get(&file) {
        Some(text) => (StatusCode::OK, text.to_string()).into_response(),
        None => {
            tracing::debug!(file, "Schema file not found");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

async fn refresh_handler(State(handler): State<HttpHandler>, headers: HeaderMap) -> Response {
    // A non UTF-8 header can never match the secret
    let token = headers
        .get(TOKEN_HEADER)
        .map(|value| value.to_str().unwrap_or_default());

    match handler.refresh.refresh(token).await {
        Ok(changed) => {
            tracing::info!(changed = changed.len(), "Refresh completed");
            (StatusCode::OK, Json(changed)).into_response()
        }
        Err(e) if e.is_plain() => (e.status_code(), Json(vec![e.to_string()])).into_response(),
        Err(e) => rejection_response(&e.to_rejection()),
    }
}

async fn health_handler(State(handler): State<HttpHandler>) -> Response {
    let generation = handler.registry.current();
    let health_data = serde_json::json!({
        "status": "healthy",
        "generation": generation.id(),
        "built_at": generation.built_at().to_rfc3339(),
        "schemas": generation.raw_schemas().len(),
        "request_routes": generation.index(Direction::Request).route_count(),
        "response_routes": generation.index(Direction::Response).route_count(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    });
    (StatusCode::OK, Json(health_data)).into_response()
}

/// Forward the request to its upstream.
async fn proxy_handler(State(handler): State<HttpHandler>, mut req: Request) -> Response {
    let target = match handler.upstreams.resolve(req.uri()) {
        Ok(target) => target,
        Err(UpstreamError::NoRoute(path)) => {
            tracing::warn!("No upstream for path: {}", path);
            return (StatusCode::NOT_FOUND, "No upstream configured").into_response();
        }
        Err(e) => {
            tracing::error!("{}", e);
            return (StatusCode::BAD_GATEWAY, "Backend request failed").into_response();
        }
    };

    let client_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let original_host = req.headers().get(header::HOST).cloned();
    tracing::debug!(prefix = %target.prefix, upstream = %target.base_url, "Proxying request");

    *req.uri_mut() = target.uri;
    add_forwarded_headers(req.headers_mut(), client_addr, original_host);

    match handler.http_client.send_request(req).await {
        Ok(response) => response,
        Err(HttpClientError::Timeout(secs)) => {
            tracing::error!("Upstream timed out after {}s", secs);
            (StatusCode::GATEWAY_TIMEOUT, "Backend request timed out").into_response()
        }
        Err(e) => {
            tracing::error!("Backend request failed: {}", e);
            (StatusCode::BAD_GATEWAY, "Backend request failed").into_response()
        }
    }
}

/// Append the caller to `X-Forwarded-For` and record the original host and protocol.
fn add_forwarded_headers(
    headers: &mut HeaderMap,
    client_addr: Option<SocketAddr>,
    original_host: Option<HeaderValue>,
) {
    if let Some(addr) = client_addr {
        let client_ip = addr.ip().to_string();
        let chain = match headers
            .get("X-Forwarded-For")
            .and_then(|value| value.to_str().ok())
        {
            Some(existing) => format!("{existing}, {client_ip}"),
            None => client_ip,
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert("X-Forwarded-For", value);
        }
    }
    headers.insert("X-Forwarded-Proto", HeaderValue::from_static("http"));
    if let Some(host) = original_host {
        headers.insert("X-Forwarded-Host", host);
    }
    // The upstream gets its own Host from the client adapter
    headers.remove(header::HOST);
}

impl std::fmt::Debug for HttpHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpHandler")
            .field("generation", &self.registry.current().id())
            .field("upstreams", &self.upstreams.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_headers_append_chain() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", HeaderValue::from_static("10.0.0.1"));
        headers.insert(header::HOST, HeaderValue::from_static("gateway.local"));
        let host = headers.get(header::HOST).cloned();

        add_forwarded_headers(&mut headers, Some("192.168.1.5:5000".parse().unwrap()), host);

        assert_eq!(headers.get("X-Forwarded-For").unwrap(), "10.0.0.1, 192.168.1.5");
        assert_eq!(headers.get("X-Forwarded-Host").unwrap(), "gateway.local");
        assert_eq!(headers.get("X-Forwarded-Proto").unwrap(), "http");
        assert!(headers.get(header::HOST).is_none());
    }

    #[test]
    fn test_forwarded_headers_without_client() {
        let mut headers = HeaderMap::new();
        add_forwarded_headers(&mut headers, None, None);
        assert!(headers.get("X-Forwarded-For").is_none());
        assert!(headers.get("X-Forwarded-Host").is_none());
    }
}
