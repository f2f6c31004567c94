#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, Bytes},
    http::{Request, Response, StatusCode, header},
};
use schemaguard::{
    DirectorySchemaSource, FeatureToggles, FileConfigProvider, HttpHandler, RefreshCoordinator,
    SchemaRegistry, UpstreamRouter, ValidationEngine,
    core::build_generation,
    ports::{
        config_provider::{ConfigProvider, RouteConfig},
        http_client::{HttpClient, HttpClientError, HttpClientResult},
        schema_source::SchemaSource,
    },
};
use tempfile::TempDir;
use tower::ServiceExt;

pub const ORDER_SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "type": "object",
  "required": ["id"],
  "properties": { "id": { "type": "integer" } }
}"#;

pub const TOKEN: &str = "s3cret-token";

/// Upstream stand-in: records what it receives and answers with a fixed body.
pub struct StubUpstream {
    pub calls: AtomicUsize,
    pub last_uri: Mutex<Option<String>>,
    pub last_body: Mutex<Option<Bytes>>,
    pub reply: Mutex<(String, String)>,
}

impl StubUpstream {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            last_uri: Mutex::new(None),
            last_body: Mutex::new(None),
            reply: Mutex::new(("application/json".to_string(), r#"{"id": 1}"#.to_string())),
        }
    }

    pub fn reply_with(&self, content_type: &str, body: &str) {
        *self.reply.lock().unwrap() = (content_type.to_string(), body.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for StubUpstream {
    async fn send_request(&self, req: Request<Body>) -> HttpClientResult<Response<Body>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_uri.lock().unwrap() = Some(req.uri().to_string());
        let body = axum::body::to_bytes(req.into_body(), usize::MAX)
            .await
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
        *self.last_body.lock().unwrap() = Some(body);

        let (content_type, reply) = self.reply.lock().unwrap().clone();
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(reply))
            .unwrap())
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub schemas: PathBuf,
    pub config_path: PathBuf,
    pub registry: Arc<SchemaRegistry>,
    pub engine: Arc<ValidationEngine>,
    pub toggles: Arc<FeatureToggles>,
    pub upstream: Arc<StubUpstream>,
    pub router: Router,
}

pub fn write_config(path: &Path, schemas: &Path, flags: (bool, bool), request: &str, response: &str) {
    let config = format!(
        r#"
listen_addr: "127.0.0.1:0"
validate:
  request_on: {}
  response_on: {}
request:
{request}
response:
{response}
repository:
  local_path: "{}"
  access_token: {TOKEN}
  sync: false
upstreams:
  "/orders": "http://orders.upstream.test"
  "/users": "http://users.upstream.test"
limits:
  max_body_bytes: 4096
"#,
        flags.0,
        flags.1,
        schemas.display()
    );
    std::fs::write(path, config).unwrap();
}

pub const DEFAULT_REQUEST_ROUTES: &str = "  post:\n    orders: orders/create.json";
pub const DEFAULT_RESPONSE_ROUTES: &str =
    "  get:\n    orders: orders/view.json\n  post:\n    orders: orders/view.json";

pub async fn fixture(request_on: bool, response_on: bool) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let schemas = dir.path().join("schemas");
    std::fs::create_dir_all(schemas.join("orders")).unwrap();
    std::fs::write(schemas.join("orders/create.json"), ORDER_SCHEMA).unwrap();
    std::fs::write(schemas.join("orders/view.json"), ORDER_SCHEMA).unwrap();

    let config_path = dir.path().join("gateway.yaml");
    write_config(
        &config_path,
        &schemas,
        (request_on, response_on),
        DEFAULT_REQUEST_ROUTES,
        DEFAULT_RESPONSE_ROUTES,
    );

    let provider = Arc::new(FileConfigProvider::unwatched(&config_path));
    let config = provider.load_config().await.unwrap();
    let source = Arc::new(DirectorySchemaSource::new(&schemas));
    let routes = RouteConfig::from(&config);
    let generation = build_generation(1, source.load().await.unwrap(), &routes)
        .await
        .unwrap();

    let registry = Arc::new(SchemaRegistry::new(generation));
    let toggles = Arc::new(FeatureToggles::new(routes.flags));
    let engine = Arc::new(ValidationEngine::new(registry.clone(), 256));
    let refresh = Arc::new(RefreshCoordinator::new(
        source,
        provider,
        registry.clone(),
        toggles.clone(),
        config.repository.access_token.clone(),
        routes.properties,
    ));
    let upstream = Arc::new(StubUpstream::new());
    let router = HttpHandler::new(
        refresh,
        engine.clone(),
        toggles.clone(),
        Arc::new(UpstreamRouter::new(&config.upstreams)),
        upstream.clone(),
        config.limits.max_body_bytes,
    )
    .router();

    Fixture {
        dir,
        schemas,
        config_path,
        registry,
        engine,
        toggles,
        upstream,
        router,
    }
}

pub fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn refresh_request(token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri("/refresh");
    if let Some(token) = token {
        builder = builder.header("X-Gitlab-Token", token);
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Bytes) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body)
}

pub fn json(body: &Bytes) -> serde_json::Value {
    serde_json::from_slice(body).unwrap()
}
