pub mod config_providers;
pub mod http_client;
pub mod http_handler;
pub mod middleware;
pub mod schema_source;

/// Re-export commonly used types from adapters
pub use config_providers::FileConfigProvider;
pub use http_client::HttpClientAdapter;
pub use http_handler::HttpHandler;
pub use middleware::ValidationState;
pub use schema_source::{DirectorySchemaSource, GitSchemaSource};
