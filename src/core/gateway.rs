//! Upstream selection for proxied exchanges.
//!
//! The `UpstreamRouter` maps request paths onto configured upstream base URLs by
//! longest prefix. No I/O happens here.
use std::collections::HashMap;

use http::Uri;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("No upstream configured for path: {0}")]
    NoRoute(String),

    #[error("Invalid upstream URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },
}

/// A resolved upstream for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub prefix: String,
    pub base_url: String,
    pub uri: Uri,
}

/// Longest‑prefix router over `path prefix -> upstream base URL`.
#[derive(Debug, Clone, Default)]
pub struct UpstreamRouter {
    // Sorted by descending prefix length so the first hit is the longest match
    upstreams: Vec<(String, String)>,
}

impl UpstreamRouter {
    pub fn new(upstreams: &HashMap<String, String>) -> Self {
        let mut upstreams: Vec<(String, String)> = upstreams
            .iter()
            .map(|(prefix, url)| (prefix.clone(), url.trim_end_matches('/').to_string()))
            .collect();
        upstreams.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self { upstreams }
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }

    /// Longest‑prefix match to find the upstream for an incoming path.
    pub fn find_upstream(&self, path: &str) -> Option<(&str, &str)> {
        self.upstreams
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(prefix, url)| (prefix.as_str(), url.as_str()))
    }

    /// Rewrite an incoming URI onto its upstream. Path and query are kept as sent.
    pub fn resolve(&self, uri: &Uri) -> Result<UpstreamTarget, UpstreamError> {
        let path = uri.path();
        let (prefix, base_url) = self
            .find_upstream(path)
            .ok_or_else(|| UpstreamError::NoRoute(path.to_string()))?;

        let target = format!(
            "{}{}",
            base_url,
            uri.path_and_query().map_or(path, |pq| pq.as_str())
        );
        let rewritten: Uri = target.parse().map_err(|e: http::uri::InvalidUri| {
            UpstreamError::InvalidUri {
                uri: target.clone(),
                reason: e.to_string(),
            }
        })?;

        Ok(UpstreamTarget {
            prefix: prefix.to_string(),
            base_url: base_url.to_string(),
            uri: rewritten,
        })
    }
}
