use std::collections::BTreeMap;

use async_trait::async_trait;
use eyre::Result;
use tokio::sync::mpsc;

use crate::{
    config::models::{FeatureFlags, GatewayConfig},
    core::schema_index::{Direction, RouteEntry},
};

/// Trait for configuration providers that can load and watch for configuration changes.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Load the current configuration.
    async fn load_config(&self) -> Result<GatewayConfig>;

    /// Return a channel that signals when the configuration has changed.
    /// The receiver should trigger a reload by calling `load_config`.
    /// Returns `None` when the channel was already handed out.
    fn watch(&self) -> Option<mpsc::Receiver<()>>;
}

/// Route mappings and toggles as of one configuration read.
#[derive(Debug, Clone, Default)]
pub struct RouteConfig {
    pub flags: FeatureFlags,
    pub request_routes: Vec<RouteEntry>,
    pub response_routes: Vec<RouteEntry>,
    /// Flattened dotted view, used to report what a refresh changed.
    pub properties: BTreeMap<String, String>,
}

impl From<&GatewayConfig> for RouteConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            flags: config.validate,
            request_routes: config.route_entries(Direction::Request),
            response_routes: config.route_entries(Direction::Response),
            properties: config.refreshable_properties(),
        }
    }
}

/// Source of the current route mappings. Re-read on every refresh.
#[async_trait]
pub trait RouteConfigSource: Send + Sync {
    async fn load_routes(&self) -> Result<RouteConfig>;
}

