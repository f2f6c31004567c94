//! schemaguard - a JSON Schema validation gateway.
//!
//! schemaguard sits in front of upstream services and validates JSON request and
//! response bodies against schemas kept in a git repository. Schemas and route
//! mappings are hot-reloaded through a webhook: a refresh builds a complete new
//! generation of compiled schemas and publishes it atomically, so in-flight
//! exchanges never see a half-built index.
//!
//! # Features
//! - Per (method, path) JSON Schema (2020-12) validation of request and response bodies
//! - Trailing numeric id elision (`/orders/42` validates against `/orders`)
//! - Masked response-side errors so upstream internals never leak to callers
//! - Webhook refresh (`POST /refresh`) authenticated by a shared secret, single-flight
//! - Live validation toggles from the configuration file
//! - Longest-prefix reverse proxy with `X-Forwarded-*` headers
//! - Structured tracing via `tracing` and graceful shutdown
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use schemaguard::{
//!     DirectorySchemaSource, SchemaRegistry, ValidationEngine,
//!     core::build_generation, ports::config_provider::RouteConfig,
//!     ports::schema_source::SchemaSource,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg = schemaguard::config::load_config("gateway.yaml").await?;
//! let raw = DirectorySchemaSource::new(&cfg.repository.local_path).load().await?;
//! let generation = build_generation(1, raw, &RouteConfig::from(&cfg)).await?;
//! let engine = ValidationEngine::new(Arc::new(SchemaRegistry::new(generation)), 1024);
//! let outcome = engine.validate_request("post", &bytes::Bytes::from_static(b"{}"), "/orders");
//! # let _ = outcome;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! validation logic inside `core`. Startup wires them in a fixed order:
//! configuration, schema source, route configuration, index build, publication,
//! validation engine, interceptors and router.
//!
//! # Error Handling
//! Domain errors are `thiserror` enums (`BuildError`, `SourceError`, `RefreshError`,
//! `HttpClientError`). Startup plumbing returns `eyre::Result<T>` with `WrapErr` context.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{DirectorySchemaSource, FileConfigProvider, GitSchemaSource, HttpClientAdapter, HttpHandler},
    core::{FeatureToggles, RefreshCoordinator, SchemaRegistry, UpstreamRouter, ValidationEngine},
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
