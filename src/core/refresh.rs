//! Webhook-triggered rebuild of the schema generation.
//!
//! A refresh authenticates the caller, syncs the schema repository, rereads the
//! route configuration, builds a complete new generation off to the side and
//! publishes it with one atomic swap. Refreshes are single-flight: a trigger
//! that arrives while another refresh runs is rejected.
use std::{collections::BTreeMap, sync::Arc};

use http::StatusCode;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::{
    config::models::changed_keys,
    core::{
        flags::FeatureToggles,
        registry::{SchemaGeneration, SchemaRegistry},
        schema_index::{BuildError, RawSchemaSet},
        validation::{ErrorKind, Rejection},
    },
    ports::{
        config_provider::{RouteConfig, RouteConfigSource},
        schema_source::{SchemaSource, SourceError},
    },
    tracing_setup::create_refresh_span,
};

/// Header carrying the shared refresh secret.
pub const TOKEN_HEADER: &str = "X-Gitlab-Token";

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RefreshError {
    #[error("Missing access token")]
    MissingToken,

    #[error("Invalid access token")]
    InvalidToken,

    #[error("Refresh already in progress")]
    InProgress,

    #[error("schema repository: {0}")]
    Source(#[from] SourceError),

    #[error("route configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("refresh task failed: {0}")]
    Task(String),
}

impl RefreshError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RefreshError::MissingToken | RefreshError::InvalidToken => StatusCode::FORBIDDEN,
            RefreshError::InProgress => StatusCode::CONFLICT,
            RefreshError::Source(_)
            | RefreshError::Config(_)
            | RefreshError::Build(_)
            | RefreshError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Authentication and concurrency rejections answer with a bare detail list.
    pub fn is_plain(&self) -> bool {
        matches!(
            self,
            RefreshError::MissingToken | RefreshError::InvalidToken | RefreshError::InProgress
        )
    }

    pub fn to_rejection(&self) -> Rejection {
        let kind = match self {
            RefreshError::MissingToken | RefreshError::InvalidToken => ErrorKind::AuthError,
            RefreshError::Build(_) => ErrorKind::BuildError,
            _ => ErrorKind::ServerError,
        };
        Rejection::new(kind, vec![self.to_string()], self.status_code())
    }
}

/// Build a generation on the blocking pool. Used at startup and by every refresh.
pub async fn build_generation(
    id: u64,
    raw: RawSchemaSet,
    routes: &RouteConfig,
) -> Result<SchemaGeneration, BuildError> {
    let request_routes = routes.request_routes.clone();
    let response_routes = routes.response_routes.clone();
    tokio::task::spawn_blocking(move || {
        SchemaGeneration::build(id, raw, &request_routes, &response_routes)
    })
    .await
    .map_err(|e| BuildError::Aborted(e.to_string()))?
}

pub struct RefreshCoordinator {
    source: Arc<dyn SchemaSource>,
    routes: Arc<dyn RouteConfigSource>,
    registry: Arc<SchemaRegistry>,
    toggles: Arc<FeatureToggles>,
    access_token: String,
    /// Properties of the last published configuration. Held for the whole refresh.
    last_properties: Arc<Mutex<BTreeMap<String, String>>>,
}

impl RefreshCoordinator {
    pub fn new(
        source: Arc<dyn SchemaSource>,
        routes: Arc<dyn RouteConfigSource>,
        registry: Arc<SchemaRegistry>,
        toggles: Arc<FeatureToggles>,
        access_token: impl Into<String>,
        initial_properties: BTreeMap<String, String>,
    ) -> Self {
        Self {
            source,
            routes,
            registry,
            toggles,
            access_token: access_token.into(),
            last_properties: Arc::new(Mutex::new(initial_properties)),
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    fn authenticate(&self, token: Option<&str>) -> Result<(), RefreshError> {
        let Some(token) = token else {
            tracing::warn!("Header {} is missing", TOKEN_HEADER);
            return Err(RefreshError::MissingToken);
        };
        if bool::from(token.as_bytes().ct_eq(self.access_token.as_bytes())) {
            tracing::debug!("Access token from header {} is correct", TOKEN_HEADER);
            Ok(())
        } else {
            tracing::warn!("Invalid access token in header {}", TOKEN_HEADER);
            Err(RefreshError::InvalidToken)
        }
    }

    /// Authenticate and run one refresh. Returns the sorted configuration keys
    /// whose values changed. On any failure the current generation stays live.
    ///
    /// The rebuild runs on its own task holding the single-flight guard, so it
    /// completes and publishes even if the caller stops waiting.
    pub async fn refresh(
        self: &Arc<Self>,
        token: Option<&str>,
    ) -> Result<Vec<String>, RefreshError> {
        self.authenticate(token)?;

        let Ok(mut last_properties) = self.last_properties.clone().try_lock_owned() else {
            tracing::warn!("Refresh rejected, another refresh is running");
            return Err(RefreshError::InProgress);
        };

        let coordinator = Arc::clone(self);
        let task = tokio::spawn(
            async move {
                let result = coordinator.rebuild(&last_properties).await;
                match result {
                    Ok((properties, changed)) => {
                        *last_properties = properties;
                        Ok(changed)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Refresh failed, keeping current schema generation");
                        Err(e)
                    }
                }
            }
            .instrument(create_refresh_span()),
        );

        task.await.map_err(|e| RefreshError::Task(e.to_string()))?
    }

    async fn rebuild(
        &self,
        last_properties: &BTreeMap<String, String>,
    ) -> Result<(BTreeMap<String, String>, Vec<String>), RefreshError> {
        self.source.sync().await?;
        let raw = self.source.load().await?;
        let routes = self
            .routes
            .load_routes()
            .await
            .map_err(|e| RefreshError::Config(format!("{e:#}")))?;

        let id = self.registry.allocate_id();
        tracing::Span::current().record("generation", id);
        let generation = build_generation(id, raw, &routes).await?;
        tracing::info!(
            generation = generation.id(),
            schemas = generation.raw_schemas().len(),
            request_routes = routes.request_routes.len(),
            response_routes = routes.response_routes.len(),
            "Schema generation built"
        );
        self.registry.publish(generation);
        self.toggles.store(routes.flags);

        let changed = changed_keys(last_properties, &routes.properties);
        Ok((routes.properties, changed))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        config::models::FeatureFlags,
        core::schema_index::{Direction, RawSchema, RouteEntry},
    };

    struct StaticSource {
        files: std::sync::Mutex<Vec<(String, String)>>,
        syncs: AtomicUsize,
    }

    impl StaticSource {
        fn new(files: &[(&str, &str)]) -> Self {
            Self {
                files: std::sync::Mutex::new(
                    files
                        .iter()
                        .map(|(p, t)| (p.to_string(), t.to_string()))
                        .collect(),
                ),
                syncs: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SchemaSource for StaticSource {
        async fn sync(&self) -> Result<(), SourceError> {
            self.syncs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn load(&self) -> Result<RawSchemaSet, SourceError> {
            let files = self.files.lock().unwrap().clone();
            Ok(files
                .into_iter()
                .map(|(relative_path, text)| RawSchema {
                    relative_path,
                    text,
                })
                .collect())
        }
    }

    struct StaticRoutes(std::sync::Mutex<RouteConfig>);

    #[async_trait]
    impl RouteConfigSource for StaticRoutes {
        async fn load_routes(&self) -> eyre::Result<RouteConfig> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    fn routes(paths: &[&str]) -> RouteConfig {
        let entries: Vec<RouteEntry> = paths
            .iter()
            .map(|p| RouteEntry {
                http_method: "post".to_string(),
                url_path_key: p.to_string(),
                schema_file_id: "any.json".to_string(),
            })
            .collect();
        let properties = paths
            .iter()
            .map(|p| (format!("request.post.{p}"), "any.json".to_string()))
            .collect();
        RouteConfig {
            flags: FeatureFlags {
                request_validation_on: true,
                response_validation_on: false,
            },
            request_routes: entries,
            response_routes: Vec::new(),
            properties,
        }
    }

    /// Serves schemas only after `release` is notified.
    struct GatedSource {
        inner: StaticSource,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl SchemaSource for GatedSource {
        async fn sync(&self) -> Result<(), SourceError> {
            self.inner.sync().await
        }

        async fn load(&self) -> Result<RawSchemaSet, SourceError> {
            self.release.notified().await;
            self.inner.load().await
        }
    }

    async fn coordinator(
        source: Arc<StaticSource>,
        route_config: Arc<StaticRoutes>,
    ) -> Arc<RefreshCoordinator> {
        let raw = source.load().await.unwrap();
        coordinator_with(source, raw, route_config).await
    }

    async fn coordinator_with(
        source: Arc<dyn SchemaSource>,
        raw: RawSchemaSet,
        route_config: Arc<StaticRoutes>,
    ) -> Arc<RefreshCoordinator> {
        let initial = route_config.0.lock().unwrap().clone();
        let generation = build_generation(1, raw, &initial).await.unwrap();
        Arc::new(RefreshCoordinator::new(
            source,
            route_config,
            Arc::new(SchemaRegistry::new(generation)),
            Arc::new(FeatureToggles::new(FeatureFlags::default())),
            "secret",
            initial.properties,
        ))
    }

    #[tokio::test]
    async fn test_refresh_rejects_bad_tokens() {
        let source = Arc::new(StaticSource::new(&[("any.json", "{}")]));
        let coordinator =
            coordinator(source.clone(), Arc::new(StaticRoutes(std::sync::Mutex::new(routes(&["orders"]))))).await;

        let missing = coordinator.refresh(None).await.unwrap_err();
        assert!(matches!(missing, RefreshError::MissingToken));
        assert_eq!(missing.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(missing.to_string(), "Missing access token");

        let invalid = coordinator.refresh(Some("guess")).await.unwrap_err();
        assert!(matches!(invalid, RefreshError::InvalidToken));
        assert_eq!(invalid.to_string(), "Invalid access token");

        assert_eq!(coordinator.registry().current().id(), 1);
        assert_eq!(source.syncs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_publishes_and_reports_changes() {
        let source = Arc::new(StaticSource::new(&[("any.json", "{}")]));
        let route_config = Arc::new(StaticRoutes(std::sync::Mutex::new(routes(&["orders"]))));
        let coordinator = coordinator(source.clone(), route_config.clone()).await;

        *route_config.0.lock().unwrap() = routes(&["orders", "users"]);
        let changed = coordinator.refresh(Some("secret")).await.unwrap();
        assert_eq!(changed, vec!["request.post.users".to_string()]);

        let current = coordinator.registry().current();
        assert_eq!(current.id(), 2);
        let index = current.index(Direction::Request);
        assert!(index.lookup("post", "/users").1.is_some());
        assert!(coordinator.toggles.load().request_validation_on);

        // Nothing changed since the last refresh.
        let changed = coordinator.refresh(Some("secret")).await.unwrap();
        assert!(changed.is_empty());
        assert_eq!(coordinator.registry().current().id(), 3);
    }

    #[tokio::test]
    async fn test_failed_build_keeps_current_generation() {
        let source = Arc::new(StaticSource::new(&[("any.json", "{}")]));
        let coordinator =
            coordinator(source.clone(), Arc::new(StaticRoutes(std::sync::Mutex::new(routes(&["orders"]))))).await;

        *source.files.lock().unwrap() = vec![("any.json".to_string(), "{\"type\":".to_string())];
        let err = coordinator.refresh(Some("secret")).await.unwrap_err();
        assert!(matches!(err, RefreshError::Build(_)));
        assert_eq!(err.to_rejection().to_payload().status, "build error");

        let current = coordinator.registry().current();
        assert_eq!(current.id(), 1);
        assert!(current.index(Direction::Request).lookup("post", "/orders").1.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_rejected() {
        let source = Arc::new(StaticSource::new(&[("any.json", "{}")]));
        let coordinator =
            coordinator(source, Arc::new(StaticRoutes(std::sync::Mutex::new(routes(&["orders"]))))).await;

        let _running = coordinator.last_properties.lock().await;
        let err = coordinator.refresh(Some("secret")).await.unwrap_err();
        assert!(matches!(err, RefreshError::InProgress));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_refresh_completes_after_caller_goes_away() {
        let source = Arc::new(GatedSource {
            inner: StaticSource::new(&[("any.json", "{}")]),
            release: tokio::sync::Notify::new(),
        });
        let raw = source.inner.load().await.unwrap();
        let route_config = Arc::new(StaticRoutes(std::sync::Mutex::new(routes(&["orders"]))));
        let coordinator = coordinator_with(source.clone(), raw, route_config.clone()).await;
        *route_config.0.lock().unwrap() = routes(&["orders", "users"]);

        // The caller gives up while the source is still loading
        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            coordinator.refresh(Some("secret")),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(coordinator.registry().current().id(), 1);

        // The rebuild still owns the single-flight guard
        let err = coordinator.refresh(Some("secret")).await.unwrap_err();
        assert!(matches!(err, RefreshError::InProgress));

        source.release.notify_one();
        for _ in 0..200 {
            if coordinator.registry().current().id() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let current = coordinator.registry().current();
        assert_eq!(current.id(), 2);
        assert!(current.index(Direction::Request).lookup("post", "/users").1.is_some());

        // Once published the guard is free again
        source.release.notify_one();
        let changed = coordinator.refresh(Some("secret")).await.unwrap();
        assert!(changed.is_empty());
    }
}
