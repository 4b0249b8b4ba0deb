//! Endpoint Resolver
//!
//! Pure derivations of every backend address from the configured base URL.
//!
//! | Endpoint | Address |
//! |---|---|
//! | Live stream | `ws(s)://{host}/ws/updates` |
//! | History | `{base}/history?limit=N[&cursor=C]` |
//! | Latest | `{base}/latest` |
//! | Health | `{base}/health` |

use url::Url;

use super::settings::ConfigError;

/// Path of the live update stream on the backend host.
pub const STREAM_PATH: &str = "/ws/updates";

/// Parse and validate a base address.
///
/// # Errors
///
/// Returns `ConfigError` if the address is not a URL or not http(s).
pub fn parse_base_url(base: &str) -> Result<Url, ConfigError> {
    let trimmed = base.trim();
    let url = Url::parse(trimmed).map_err(|e| ConfigError::InvalidBaseUrl {
        value: trimmed.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidBaseUrl {
            value: trimmed.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(url)
}

/// Resolve the live-stream address for a base address.
///
/// Same host and port, `http→ws`, `https→wss`, fixed path.
///
/// # Errors
///
/// Returns `ConfigError` if the base address is invalid.
pub fn resolve_stream_url(base: &str) -> Result<Url, ConfigError> {
    stream_url_for(&parse_base_url(base)?)
}

/// Derive the live-stream address from an already validated base.
pub(crate) fn stream_url_for(base: &Url) -> Result<Url, ConfigError> {
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    let host = base.host_str().unwrap_or_default();
    let authority = base
        .port()
        .map_or_else(|| host.to_string(), |port| format!("{host}:{port}"));

    Url::parse(&format!("{scheme}://{authority}{STREAM_PATH}")).map_err(|e| {
        ConfigError::InvalidBaseUrl {
            value: base.to_string(),
            reason: e.to_string(),
        }
    })
}

/// History query address.
#[must_use]
pub fn history_url(base: &Url, limit: u32, cursor: Option<&str>) -> Url {
    let mut url = rest_url(base, "history");
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("limit", &limit.to_string());
        if let Some(cursor) = cursor {
            query.append_pair("cursor", cursor);
        }
    }
    url
}

/// Latest-signal address.
#[must_use]
pub fn latest_url(base: &Url) -> Url {
    rest_url(base, "latest")
}

/// Health diagnostic address.
#[must_use]
pub fn health_url(base: &Url) -> Url {
    rest_url(base, "health")
}

/// Append a path segment to the base, keeping any path prefix.
fn rest_url(base: &Url, segment: &str) -> Url {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    let prefix = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{prefix}/{segment}"));
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("http://localhost:8000", "ws://localhost:8000/ws/updates" ; "http with port")]
    #[test_case("https://api.example.com", "wss://api.example.com/ws/updates" ; "https default port")]
    #[test_case("https://api.example.com:8443/v1/", "wss://api.example.com:8443/ws/updates" ; "https with prefix")]
    #[test_case("http://10.0.0.5", "ws://10.0.0.5/ws/updates" ; "ip host")]
    #[test_case("  http://host:80  ", "ws://host/ws/updates" ; "default port normalized")]
    fn resolves_stream_url(base: &str, expected: &str) {
        assert_eq!(resolve_stream_url(base).unwrap().as_str(), expected);
    }

    #[test_case("" ; "empty")]
    #[test_case("localhost:8000" ; "missing scheme")]
    #[test_case("not a url" ; "garbage")]
    fn rejects_unparseable_base(base: &str) {
        assert!(matches!(
            resolve_stream_url(base),
            Err(ConfigError::InvalidBaseUrl { .. } | ConfigError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(matches!(
            resolve_stream_url("ftp://example.com"),
            Err(ConfigError::UnsupportedScheme(s)) if s == "ftp"
        ));
    }

    #[test]
    fn history_url_with_limit_and_cursor() {
        let base = parse_base_url("http://localhost:8000").unwrap();
        assert_eq!(
            history_url(&base, 100, None).as_str(),
            "http://localhost:8000/history?limit=100"
        );
        assert_eq!(
            history_url(&base, 50, Some("2024-01-01T00:00:00")).as_str(),
            "http://localhost:8000/history?limit=50&cursor=2024-01-01T00%3A00%3A00"
        );
    }

    #[test]
    fn rest_urls_keep_path_prefix() {
        let base = parse_base_url("https://example.com/api/").unwrap();
        assert_eq!(health_url(&base).as_str(), "https://example.com/api/health");
        assert_eq!(latest_url(&base).as_str(), "https://example.com/api/latest");
    }
}
