//! Compiled, immutable `method -> path -> schema` index for one direction.
//!
//! An index is built from the raw schema files of the repository and the route
//! entries of the configuration. Building is all-or-nothing: one unresolvable
//! file reference, malformed document or duplicate route aborts the whole build.
//! Schema documents are compiled in parallel (each referenced file once) and the
//! resulting tables are assembled in a fixed order afterwards.
use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::Arc,
};

use jsonschema::{Draft, Retrieve, Uri, Validator};
use rayon::prelude::*;
use serde_json::Value;
use thiserror::Error;

use crate::core::path_resolver::{self, ModifiedPath, normalize_route_key};

/// Which body of an exchange a schema applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Request => "request",
            Direction::Response => "response",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One schema file as read from the repository working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSchema {
    pub relative_path: String,
    pub text: String,
}

/// Normalized form shared by repository file paths, configured schema file ids
/// and the schema content endpoint: `/`-separated, lowercase, no leading `/`.
pub fn normalize_schema_key(path: &str) -> String {
    path.replace('\\', "/")
        .trim_start_matches('/')
        .to_lowercase()
}

/// Raw schema text keyed by normalized relative path.
#[derive(Debug, Clone, Default)]
pub struct RawSchemaSet {
    files: HashMap<String, String>,
}

impl RawSchemaSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, schema: RawSchema) {
        self.files
            .insert(normalize_schema_key(&schema.relative_path), schema.text);
    }

    /// Case-insensitive lookup by file id or relative path.
    pub fn get(&self, file_id: &str) -> Option<&str> {
        self.files
            .get(&normalize_schema_key(file_id))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

impl FromIterator<RawSchema> for RawSchemaSet {
    fn from_iter<I: IntoIterator<Item = RawSchema>>(iter: I) -> Self {
        let mut set = Self::new();
        for schema in iter {
            set.insert(schema);
        }
        set
    }
}

/// A configured `(method, path key) -> schema file` mapping for one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub http_method: String,
    pub url_path_key: String,
    pub schema_file_id: String,
}

#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum BuildError {
    #[error(
        "{direction} route {method} {path}: schema file '{file}' not found in repository"
    )]
    MissingSchemaFile {
        direction: Direction,
        method: String,
        path: String,
        file: String,
    },

    #[error("{direction} schema '{file}' is not valid JSON: {reason}")]
    InvalidJson {
        direction: Direction,
        file: String,
        reason: String,
    },

    #[error("{direction} schema '{file}' failed to compile: {reason}")]
    InvalidSchema {
        direction: Direction,
        file: String,
        reason: String,
    },

    #[error("{direction} route {method} {path} is configured more than once")]
    DuplicateRoute {
        direction: Direction,
        method: String,
        path: String,
    },

    #[error("schema build task failed: {0}")]
    Aborted(String),
}

/// Validator compiled from one schema document (JSON Schema 2020-12).
pub struct CompiledSchema {
    file_id: String,
    validator: Validator,
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("file_id", &self.file_id)
            .finish_non_exhaustive()
    }
}

/// Base URI given to repository schemas without their own `$id`, so relative
/// `$ref`s resolve against the file's place in the repository.
const REPOSITORY_BASE_URI: &str = "json-schema:///";

/// Path prefix of the schema content endpoint. `$ref`s to it are served from
/// the repository being built.
const CONTENT_ENDPOINT: &str = "/jsonschema/";

/// Resolves `$ref` targets from the schema files of the build in progress.
/// Nothing is fetched over the network.
struct RepositoryRetriever {
    files: Arc<RawSchemaSet>,
}

impl Retrieve for RepositoryRetriever {
    fn retrieve(
        &self,
        uri: &Uri<&str>,
    ) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        let uri = uri.as_str();
        let key = repository_key(uri)
            .ok_or_else(|| format!("'{uri}' does not point into the schema repository"))?;
        let text = self
            .files
            .get(&key)
            .ok_or_else(|| format!("schema file '{key}' not found in repository"))?;
        Ok(serde_json::from_str(text)?)
    }
}

/// Repository key for a `$ref` target: either under the repository base URI or
/// under the content endpoint of any host.
fn repository_key(uri: &str) -> Option<String> {
    let uri = uri.split(['#', '?']).next().unwrap_or(uri);
    let path = match uri.strip_prefix(REPOSITORY_BASE_URI) {
        Some(path) => path,
        None => uri.split_once(CONTENT_ENDPOINT)?.1,
    };
    let key = normalize_schema_key(path);
    (!key.is_empty()).then_some(key)
}

impl CompiledSchema {
    /// Compile one schema document. `$ref`s to other files resolve from `repository`.
    pub fn compile(
        direction: Direction,
        file_id: &str,
        text: &str,
        repository: &Arc<RawSchemaSet>,
    ) -> Result<Self, BuildError> {
        let mut document: Value =
            serde_json::from_str(text).map_err(|e| BuildError::InvalidJson {
                direction,
                file: file_id.to_string(),
                reason: e.to_string(),
            })?;
        if let Value::Object(map) = &mut document {
            map.entry("$id")
                .or_insert_with(|| Value::String(format!("{REPOSITORY_BASE_URI}{file_id}")));
        }

        let mut options = jsonschema::options();
        options
            .with_draft(Draft::Draft202012)
            .with_retriever(RepositoryRetriever {
                files: Arc::clone(repository),
            });
        let validator = options
            .build(&document)
            .map_err(|e| BuildError::InvalidSchema {
                direction,
                file: file_id.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            file_id: file_id.to_string(),
            validator,
        })
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    /// Every constraint violation of `instance`, rendered as `$.path: message`.
    pub fn violations(&self, instance: &Value) -> Vec<String> {
        self.validator
            .iter_errors(instance)
            .map(|error| {
                let pointer = error.instance_path.to_string();
                format!("{}: {}", json_path(&pointer), error)
            })
            .collect()
    }
}

fn json_path(pointer: &str) -> String {
    let mut path = String::from("$");
    for segment in pointer.split('/').filter(|s| !s.is_empty()) {
        if segment.bytes().all(|b| b.is_ascii_digit()) {
            path.push('[');
            path.push_str(segment);
            path.push(']');
        } else {
            path.push('.');
            path.push_str(segment);
        }
    }
    path
}

type PathTable = HashMap<String, Arc<CompiledSchema>>;

/// Immutable `method -> normalized path -> schema` table for one direction.
#[derive(Debug)]
pub struct SchemaIndex {
    direction: Direction,
    routes: HashMap<String, PathTable>,
}

impl SchemaIndex {
    /// Compile every entry's schema and assemble the index. Fails on the first
    /// problem; nothing partial is ever returned.
    pub fn build(
        direction: Direction,
        raw: &RawSchemaSet,
        entries: &[RouteEntry],
    ) -> Result<Self, BuildError> {
        // Resolve all file references first so a missing file is reported
        // deterministically before any compilation work starts.
        let mut files = BTreeSet::new();
        for entry in entries {
            let file = normalize_schema_key(&entry.schema_file_id);
            if raw.get(&file).is_none() {
                return Err(BuildError::MissingSchemaFile {
                    direction,
                    method: entry.http_method.clone(),
                    path: entry.url_path_key.clone(),
                    file: entry.schema_file_id.clone(),
                });
            }
            files.insert(file);
        }

        let repository = Arc::new(raw.clone());
        let compiled: HashMap<String, Arc<CompiledSchema>> = files
            .into_par_iter()
            .map(|file| {
                let text = repository.get(&file).unwrap_or_default();
                CompiledSchema::compile(direction, &file, text, &repository)
                    .map(|schema| (file, Arc::new(schema)))
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .collect();

        let mut routes: HashMap<String, PathTable> = HashMap::new();
        for entry in entries {
            let method = entry.http_method.to_ascii_lowercase();
            let path = normalize_route_key(&entry.url_path_key);
            let file = normalize_schema_key(&entry.schema_file_id);
            let schema = compiled
                .get(&file)
                .cloned()
                .ok_or_else(|| BuildError::MissingSchemaFile {
                    direction,
                    method: method.clone(),
                    path: path.clone(),
                    file: entry.schema_file_id.clone(),
                })?;

            let table = routes.entry(method.clone()).or_default();
            if table.insert(path.clone(), schema).is_some() {
                return Err(BuildError::DuplicateRoute {
                    direction,
                    method,
                    path,
                });
            }
        }

        Ok(Self { direction, routes })
    }

    /// An index with no routes; every lookup misses.
    pub fn empty(direction: Direction) -> Self {
        Self {
            direction,
            routes: HashMap::new(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Path table for a method, if any route is registered for it.
    pub fn method(&self, http_method: &str) -> Option<&PathTable> {
        self.routes.get(&http_method.to_ascii_lowercase())
    }

    /// Resolve a request path (with numeric id elision) to its schema.
    pub fn lookup(
        &self,
        http_method: &str,
        request_path: &str,
    ) -> (ModifiedPath, Option<Arc<CompiledSchema>>) {
        let resolved = path_resolver::resolve_in(&self.routes, http_method, request_path);
        let schema = if resolved.found {
            self.method(http_method)
                .and_then(|paths| paths.get(&resolved.resolved_path))
                .cloned()
        } else {
            None
        };
        (resolved, schema)
    }

    pub fn route_count(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    /// All registered `(method, path)` pairs, sorted.
    pub fn routes(&self) -> Vec<(String, String)> {
        let mut routes: Vec<(String, String)> = self
            .routes
            .iter()
            .flat_map(|(method, paths)| {
                paths
                    .keys()
                    .map(move |path| (method.clone(), path.clone()))
            })
            .collect();
        routes.sort();
        routes
    }
}
