use async_trait::async_trait;
use thiserror::Error;

use crate::core::schema_index::RawSchemaSet;

/// Failures while synchronizing or reading the schema repository.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SourceError {
    #[error("git {operation} failed ({status}): {stderr}")]
    Git {
        operation: &'static str,
        status: String,
        stderr: String,
    },

    #[error("failed to run git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("invalid repository url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to read schema file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk schema repository: {0}")]
    Walk(String),

    #[error("schema source task failed: {0}")]
    Aborted(String),
}

/// Port over the repository holding the JSON schema files.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Bring the local working copy up to date with the remote.
    async fn sync(&self) -> Result<(), SourceError>;

    /// Read every `.json` file of the working copy.
    async fn load(&self) -> Result<RawSchemaSet, SourceError>;
}
