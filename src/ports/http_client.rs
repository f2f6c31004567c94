use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Custom error type for upstream HTTP operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Connection to the upstream failed
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The upstream did not answer in time
    #[error("Timeout error after {0} seconds")]
    Timeout(u64),

    /// The outgoing request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for forwarding requests upstream
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an HTTP request to an upstream server
    ///
    /// # Arguments
    /// * `req` - The fully rewritten request (absolute URI)
    ///
    /// # Returns
    /// A future that resolves to the upstream's response or an error
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;
}
