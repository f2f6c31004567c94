use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;
use tracing::Instrument;

use crate::{
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
    tracing_setup::create_upstream_span,
};

/// Upstream HTTP client using Hyper with Rustls.
///
/// Responsibilities:
/// * Sets a `User-Agent` when the caller sent none
/// * Forces request version to HTTP/1.1 while allowing ALPN to negotiate
/// * Bounds every exchange by the configured upstream timeout
/// * Converts between Hyper body and Axum body types
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
    request_timeout: Duration,
}

impl HttpClientAdapter {
    /// Create a new HTTP client adapter.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        // Another component may already have installed a provider
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::info!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        tracing::info!(
            timeout_secs = request_timeout.as_secs(),
            "Created upstream HTTP client"
        );
        Ok(Self {
            client,
            request_timeout,
        })
    }

    fn add_common_headers(req: &mut Request<AxumBody>) {
        let headers = req.headers_mut();
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(
                header::USER_AGENT,
                HeaderValue::from_static(concat!("schemaguard/", env!("CARGO_PKG_VERSION"))),
            );
        }
    }

    fn host_header(req: &Request<AxumBody>) -> HttpClientResult<HeaderValue> {
        let Some(host) = req.uri().host() else {
            tracing::error!("Outgoing URI has no host: {}", req.uri());
            return Err(HttpClientError::InvalidRequest(
                "Outgoing URI has no host".to_string(),
            ));
        };
        let value = match req.uri().port_u16() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        HeaderValue::from_str(&value).map_err(|e| HttpClientError::InvalidRequest(e.to_string()))
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        Self::add_common_headers(&mut req);
        let host = Self::host_header(&req)?;
        req.headers_mut().insert(header::HOST, host);

        let upstream = format!(
            "{}://{}",
            req.uri().scheme_str().unwrap_or("http"),
            req.uri()
                .authority()
                .map_or_else(|| "unknown".to_string(), |a| a.to_string())
        );
        let span = create_upstream_span(&upstream, req.method().as_str(), req.uri().path());

        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;
        let method = parts.method.clone();
        let uri = parts.uri.clone();
        tracing::debug!("Outgoing request headers: {:?}", parts.headers);

        let client = self.client.clone();
        let exchange = client
            .request(Request::from_parts(parts, body))
            .instrument(span.clone());

        match timeout(self.request_timeout, exchange).await {
            Ok(Ok(response)) => {
                span.record("http.status_code", response.status().as_u16());
                let (mut parts, hyper_body) = response.into_parts();
                // Framing is redone by the serving side
                parts.headers.remove(header::TRANSFER_ENCODING);
                Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
            }
            Ok(Err(e)) => {
                tracing::error!(
                    "Error making request to upstream {} ({} {}): {}",
                    upstream,
                    method,
                    uri,
                    e
                );
                Err(HttpClientError::ConnectionError(format!(
                    "Request to {method} {uri} failed: {e}"
                )))
            }
            Err(_) => {
                tracing::error!("Upstream {} timed out ({} {})", upstream, method, uri);
                Err(HttpClientError::Timeout(self.request_timeout.as_secs()))
            }
        }
    }
}
