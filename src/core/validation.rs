//! Body validation against the published schema generation.
//!
//! Request and response validation share one resolution routine; they differ
//! only in how outcomes are presented, which is captured by [`Presentation`].
//! Request rejections carry full details. Response rejections are masked as a
//! generic server error (status 500) so upstream internals never reach the
//! client; only a response parse failure keeps the parser message.
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{
    core::{
        registry::{SchemaGeneration, SchemaRegistry},
        schema_index::Direction,
    },
    tracing_setup::truncate_for_log,
};

pub const NO_SCHEMA_MESSAGE: &str = "can't find json validation scheme";
pub const SERVER_ERROR_MESSAGE: &str = "Server response error";

/// Leading bytes of every serialized [`ErrorResponse`].
pub const ERROR_SENTINEL: &[u8] = b"{\"status\":";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoSchema,
    DeserializeError,
    ValidationError,
    ServerError,
    AuthError,
    BuildError,
}

impl ErrorKind {
    /// Value of the `status` field in the error payload.
    pub fn as_status(&self) -> &'static str {
        match self {
            ErrorKind::NoSchema | ErrorKind::ValidationError => "validation error",
            ErrorKind::DeserializeError => "deserialization error",
            ErrorKind::ServerError => "Error",
            ErrorKind::AuthError => "access error",
            ErrorKind::BuildError => "build error",
        }
    }
}

/// Structured rejection: error category, client-facing details, HTTP status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: ErrorKind,
    pub details: Vec<String>,
    pub status: StatusCode,
}

impl Rejection {
    pub fn new(kind: ErrorKind, details: Vec<String>, status: StatusCode) -> Self {
        Self {
            kind,
            details,
            status,
        }
    }

    pub fn to_payload(&self) -> ErrorResponse {
        ErrorResponse {
            status: self.kind.as_status().to_string(),
            details: self.details.clone(),
        }
    }
}

/// Wire shape of every rejection: `{"status": ..., "details": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub details: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Forward the buffered body. Empty for requests, the original body for responses.
    Passthrough(Bytes),
    Rejected(Rejection),
}

impl ValidationOutcome {
    pub fn is_passthrough(&self) -> bool {
        matches!(self, ValidationOutcome::Passthrough(_))
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ValidationOutcome::Rejected(rejection) => Some(rejection),
            ValidationOutcome::Passthrough(_) => None,
        }
    }
}

/// How one direction reports its outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presentation {
    pub direction: Direction,
    /// Replace no-schema and violation details with a generic message.
    pub mask_details: bool,
    /// Return the original body on success instead of an empty one.
    pub echo_body: bool,
    pub no_schema_status: StatusCode,
    pub deserialize_status: StatusCode,
    pub violation_status: StatusCode,
}

impl Presentation {
    pub const REQUEST: Presentation = Presentation {
        direction: Direction::Request,
        mask_details: false,
        echo_body: false,
        no_schema_status: StatusCode::PRECONDITION_FAILED,
        deserialize_status: StatusCode::BAD_REQUEST,
        violation_status: StatusCode::PRECONDITION_FAILED,
    };

    pub const RESPONSE: Presentation = Presentation {
        direction: Direction::Response,
        mask_details: true,
        echo_body: true,
        no_schema_status: StatusCode::INTERNAL_SERVER_ERROR,
        deserialize_status: StatusCode::INTERNAL_SERVER_ERROR,
        violation_status: StatusCode::INTERNAL_SERVER_ERROR,
    };

    fn kind(&self, unmasked: ErrorKind) -> ErrorKind {
        if self.mask_details {
            ErrorKind::ServerError
        } else {
            unmasked
        }
    }

    fn masked(&self, details: Vec<String>) -> Vec<String> {
        if self.mask_details {
            vec![SERVER_ERROR_MESSAGE.to_string()]
        } else {
            details
        }
    }

    fn no_schema(&self) -> ValidationOutcome {
        ValidationOutcome::Rejected(Rejection::new(
            self.kind(ErrorKind::NoSchema),
            self.masked(vec![NO_SCHEMA_MESSAGE.to_string()]),
            self.no_schema_status,
        ))
    }

    fn deserialize_failed(&self, message: String) -> ValidationOutcome {
        ValidationOutcome::Rejected(Rejection::new(
            self.kind(ErrorKind::DeserializeError),
            vec![message],
            self.deserialize_status,
        ))
    }

    fn violated(&self, violations: Vec<String>) -> ValidationOutcome {
        ValidationOutcome::Rejected(Rejection::new(
            self.kind(ErrorKind::ValidationError),
            self.masked(violations),
            self.violation_status,
        ))
    }

    fn passed(&self, body: &Bytes) -> ValidationOutcome {
        if self.echo_body {
            ValidationOutcome::Passthrough(body.clone())
        } else {
            ValidationOutcome::Passthrough(Bytes::new())
        }
    }
}

/// Resolves schemas through the registry and validates bodies against them.
pub struct ValidationEngine {
    registry: Arc<SchemaRegistry>,
    max_body_log_bytes: usize,
}

impl ValidationEngine {
    pub fn new(registry: Arc<SchemaRegistry>, max_body_log_bytes: usize) -> Self {
        Self {
            registry,
            max_body_log_bytes,
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn validate_request(&self, method: &str, body: &Bytes, path: &str) -> ValidationOutcome {
        self.validate(Presentation::REQUEST, method, body, path)
    }

    pub fn validate_response(&self, method: &str, body: &Bytes, path: &str) -> ValidationOutcome {
        self.validate(Presentation::RESPONSE, method, body, path)
    }

    /// Validate against the generation current at call time. The snapshot is held
    /// for the whole call, so a concurrent publish never mixes generations.
    pub fn validate(
        &self,
        policy: Presentation,
        method: &str,
        body: &Bytes,
        path: &str,
    ) -> ValidationOutcome {
        let generation = self.registry.current();
        self.validate_against(&generation, policy, method, body, path)
    }

    pub fn validate_against(
        &self,
        generation: &SchemaGeneration,
        policy: Presentation,
        method: &str,
        body: &Bytes,
        path: &str,
    ) -> ValidationOutcome {
        let direction = policy.direction;
        let index = generation.index(direction);

        if index.method(method).is_none() {
            tracing::info!(%direction, method, path, "No JSON schema for method");
            return policy.no_schema();
        }

        let (resolved, schema) = index.lookup(method, path);
        let Some(schema) = schema else {
            tracing::info!(%direction, method, path, "No JSON schema for path");
            return policy.no_schema();
        };

        let document: serde_json::Value = match serde_json::from_slice(body) {
            Ok(document) => document,
            Err(e) => {
                tracing::error!(
                    %direction,
                    method,
                    path,
                    body = %truncate_for_log(body, self.max_body_log_bytes),
                    "Can't parse body: {}",
                    e
                );
                return policy.deserialize_failed(e.to_string());
            }
        };

        let violations = schema.violations(&document);
        if violations.is_empty() {
            tracing::debug!(
                %direction,
                method,
                path = %resolved.resolved_path,
                id_elided = resolved.used_fallback,
                generation = generation.id(),
                "No validation errors"
            );
            policy.passed(body)
        } else {
            tracing::error!(
                %direction,
                method,
                path = %resolved.resolved_path,
                schema = schema.file_id(),
                ?violations,
                "Validation errors"
            );
            policy.violated(violations)
        }
    }
}
