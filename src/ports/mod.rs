pub mod config_provider;
pub mod http_client;
pub mod schema_source;
