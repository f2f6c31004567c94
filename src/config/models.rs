//! Configuration data structures for schemaguard.
//!
//! These types map directly to YAML (also TOML / JSON) configuration files. They are
//! serde‑friendly and include defaults so that minimal configs remain concise.
//! Route tables accept both flat dotted keys (`orders.list: orders/list.json`) and
//! nested tables; nested tables are flattened into dotted keys on load.
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::core::schema_index::{Direction, RouteEntry};

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_sync() -> bool {
    true
}

/// Live toggles for the request / response interceptors. Read on every exchange.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(default)]
pub struct FeatureFlags {
    #[serde(rename = "request_on", alias = "requestOn")]
    pub request_validation_on: bool,
    #[serde(rename = "response_on", alias = "responseOn")]
    pub response_validation_on: bool,
}

/// A single route-table value: either a schema file id or a nested table of
/// further path segments.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum RouteNode {
    File(String),
    Nested(BTreeMap<String, RouteNode>),
}

/// `httpMethod -> urlPathKey -> node` for one direction.
pub type RouteTable = BTreeMap<String, BTreeMap<String, RouteNode>>;

/// Where schemas come from and how the refresh webhook is authenticated.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RepositoryConfig {
    /// Remote repository URL (https or ssh). Optional when `sync` is false.
    #[serde(default)]
    pub remote_url: Option<String>,
    /// Local working copy; cloned here on first sync.
    pub local_path: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    /// Shared secret expected in the `X-Gitlab-Token` header of `/refresh`.
    pub access_token: String,
    /// When false the working copy is read as-is and never pulled.
    #[serde(default = "default_sync")]
    pub sync: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            local_path: "./schemas".to_string(),
            username: None,
            password: None,
            branch: None,
            access_token: String::new(),
            sync: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest request or response body buffered for validation.
    pub max_body_bytes: usize,
    pub upstream_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 10 * 1024 * 1024,
            upstream_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    /// Bodies are cut to this many bytes in log lines.
    pub max_body_log_bytes: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            max_body_log_bytes: 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub validate: FeatureFlags,
    #[serde(default)]
    pub request: RouteTable,
    #[serde(default)]
    pub response: RouteTable,
    #[serde(default)]
    pub repository: RepositoryConfig,
    /// Path prefix -> upstream base URL. Longest prefix wins.
    #[serde(default)]
    pub upstreams: HashMap<String, String>,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            validate: FeatureFlags::default(),
            request: RouteTable::new(),
            response: RouteTable::new(),
            repository: RepositoryConfig::default(),
            upstreams: HashMap::new(),
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn routes(&self, direction: Direction) -> &RouteTable {
        match direction {
            Direction::Request => &self.request,
            Direction::Response => &self.response,
        }
    }

    /// Flatten one direction's route table into entries. Methods are lowercased;
    /// nested tables become dotted keys. Path keys are kept as configured and
    /// normalized by the index builder.
    pub fn route_entries(&self, direction: Direction) -> Vec<RouteEntry> {
        let mut entries = Vec::new();
        for (method, paths) in self.routes(direction) {
            let mut flat = BTreeMap::new();
            for (key, node) in paths {
                flatten_node(key, node, &mut flat);
            }
            for (url_path_key, schema_file_id) in flat {
                entries.push(RouteEntry {
                    http_method: method.to_ascii_lowercase(),
                    url_path_key,
                    schema_file_id,
                });
            }
        }
        entries
    }

    /// Dotted property view of everything a refresh can change. Used to report
    /// which keys changed between two configurations.
    pub fn refreshable_properties(&self) -> BTreeMap<String, String> {
        let mut props = BTreeMap::new();
        props.insert(
            "validate.request_on".to_string(),
            self.validate.request_validation_on.to_string(),
        );
        props.insert(
            "validate.response_on".to_string(),
            self.validate.response_validation_on.to_string(),
        );
        for direction in [Direction::Request, Direction::Response] {
            for entry in self.route_entries(direction) {
                props.insert(
                    format!(
                        "{}.{}.{}",
                        direction.as_str(),
                        entry.http_method,
                        entry.url_path_key
                    ),
                    entry.schema_file_id,
                );
            }
        }
        props
    }
}

fn flatten_node(prefix: &str, node: &RouteNode, out: &mut BTreeMap<String, String>) {
    match node {
        RouteNode::File(file) => {
            out.insert(prefix.to_string(), file.clone());
        }
        RouteNode::Nested(children) => {
            for (key, child) in children {
                flatten_node(&format!("{prefix}.{key}"), child, out);
            }
        }
    }
}

/// Keys present in either map whose values differ, sorted.
pub fn changed_keys(
    before: &BTreeMap<String, String>,
    after: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut keys: Vec<String> = before
        .keys()
        .chain(after.keys())
        .filter(|key| before.get(*key) != after.get(*key))
        .cloned()
        .collect();
    keys.sort();
    keys.dedup();
    keys
}
