use std::borrow::Cow;

use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging with JSON output
pub fn init_tracing() -> Result<()> {
    init_tracing_with_config("info", true)
}

/// Initialize console-friendly logging for development
pub fn init_console_tracing() -> Result<()> {
    init_tracing_with_config("info", false)
}

/// Initialize tracing with the configured level and format.
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_tracing_with_config(level: &str, json_format: bool) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if json_format {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.json().with_current_span(false).with_span_list(true))
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    }

    tracing::info!(level, json = json_format, "schemaguard logging initialized");
    Ok(())
}

/// Create a request-scoped tracing span
pub fn create_request_span(method: &str, path: &str, request_id: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        http.method = method,
        http.path = path,
        request.id = request_id,
        http.status_code = tracing::field::Empty,
    )
}

/// Span covering one schema refresh
pub fn create_refresh_span() -> tracing::Span {
    tracing::info_span!("refresh", generation = tracing::field::Empty)
}

/// Create an upstream request span
pub fn create_upstream_span(upstream_url: &str, method: &str, path: &str) -> tracing::Span {
    tracing::info_span!(
        "upstream_request",
        upstream.url = upstream_url,
        http.method = method,
        http.path = path,
        http.status_code = tracing::field::Empty,
    )
}

/// Body text for log lines, cut to at most `max_bytes` on a char boundary.
pub fn truncate_for_log(body: &[u8], max_bytes: usize) -> Cow<'_, str> {
    if body.len() <= max_bytes {
        return String::from_utf8_lossy(body);
    }
    let text = String::from_utf8_lossy(&body[..max_bytes]);
    // A multi-byte char split at the cut shows up as a trailing replacement char
    let text = text.trim_end_matches('\u{FFFD}');
    Cow::Owned(format!("{text}... ({} bytes total)", body.len()))
}
