#![allow(clippy::collapsible_if)]

use std::net::SocketAddr;

use eyre::Result;

use crate::{
    config::models::{GatewayConfig, LimitsConfig, RepositoryConfig},
    core::schema_index::Direction,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

const KNOWN_METHODS: [&str; 9] = [
    "get", "head", "post", "put", "patch", "delete", "options", "trace", "connect",
];

/// Gateway configuration validator
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration, collecting every problem found.
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        for (prefix, target) in &config.upstreams {
            if !prefix.starts_with('/') {
                errors.push(ValidationError::InvalidField {
                    field: format!("upstreams '{prefix}'"),
                    message: "Upstream prefixes must start with '/'".to_string(),
                });
            }
            if let Err(e) = Self::validate_url(target, &format!("upstream '{prefix}' target")) {
                errors.push(e);
            }
        }

        for direction in [Direction::Request, Direction::Response] {
            errors.extend(Self::validate_routes(config, direction));
        }

        errors.extend(Self::validate_repository(&config.repository));
        errors.extend(Self::validate_limits(&config.limits));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_routes(config: &GatewayConfig, direction: Direction) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let section = direction.as_str();

        for method in config.routes(direction).keys() {
            if !KNOWN_METHODS.contains(&method.to_ascii_lowercase().as_str()) {
                errors.push(ValidationError::InvalidField {
                    field: format!("{section}.{method}"),
                    message: format!("Unknown HTTP method '{method}'"),
                });
            }
        }

        for entry in config.route_entries(direction) {
            let field = format!("{section}.{}.{}", entry.http_method, entry.url_path_key);
            if entry.url_path_key.trim_matches(['.', '/']).is_empty() {
                errors.push(ValidationError::InvalidField {
                    field: field.clone(),
                    message: "Route path key cannot be empty".to_string(),
                });
            }
            if entry.schema_file_id.trim().is_empty() {
                errors.push(ValidationError::InvalidField {
                    field,
                    message: "Schema file id cannot be empty".to_string(),
                });
            }
        }

        errors
    }

    fn validate_repository(repository: &RepositoryConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if repository.local_path.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "repository.local_path".to_string(),
            });
        }

        if repository.access_token.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "repository.access_token".to_string(),
            });
        }

        if repository.sync {
            match &repository.remote_url {
                None => errors.push(ValidationError::MissingField {
                    field: "repository.remote_url".to_string(),
                }),
                Some(remote) => {
                    if let Err(e) = Self::validate_remote(remote) {
                        errors.push(e);
                    }
                }
            }
        }

        errors
    }

    fn validate_limits(limits: &LimitsConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if limits.max_body_bytes == 0 {
            errors.push(ValidationError::InvalidField {
                field: "limits.max_body_bytes".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }
        if limits.upstream_timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "limits.upstream_timeout_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }
        errors
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    /// Remote repositories may also be addressed over ssh, git or a local file URL.
    /// scp-like `user@host:path` remotes are passed through unchecked.
    fn validate_remote(remote: &str) -> ValidationResult<()> {
        if !remote.contains("://") {
            if remote.contains('@') && remote.contains(':') {
                return Ok(());
            }
            return Err(ValidationError::InvalidField {
                field: "repository.remote_url".to_string(),
                message: format!("Unrecognised remote '{remote}'"),
            });
        }

        match url::Url::parse(remote) {
            Ok(url) if matches!(url.scheme(), "http" | "https" | "ssh" | "git" | "file") => Ok(()),
            Ok(url) => Err(ValidationError::InvalidField {
                field: "repository.remote_url".to_string(),
                message: format!("Unsupported remote scheme '{}'", url.scheme()),
            }),
            Err(e) => Err(ValidationError::InvalidField {
                field: "repository.remote_url".to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
