//! Route and component configuration
//!
//! Every component receives its settings as an immutable value at
//! construction time; nothing here is read from process-wide state.

use std::fmt;
use std::time::Duration;

use url::Url;

use crate::error::{RelayError, Result};
use crate::restart::RestartPolicy;

/// A source channel relayed to one target endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    source: Url,
    target: Url,
}

impl Route {
    /// Create a route from already parsed URLs
    pub fn new(source: Url, target: Url) -> Result<Self> {
        check_scheme(&source)?;
        check_scheme(&target)?;
        Ok(Self { source, target })
    }

    /// Parse and validate both URLs
    pub fn parse(source: &str, target: &str) -> Result<Self> {
        Self::new(parse_url(source)?, parse_url(target)?)
    }

    /// SSE channel events are read from
    pub fn source(&self) -> &Url {
        &self.source
    }

    /// Endpoint events are posted to
    pub fn target(&self) -> &Url {
        &self.target
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|source| RelayError::InvalidUrl {
        url: url.to_string(),
        source,
    })
}

fn check_scheme(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(RelayError::UnsupportedScheme(url.to_string())),
    }
}

/// Default connect timeout for the source connection
const DEFAULT_SOURCE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default time without any bytes from the source before reconnecting
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Settings for the long-lived source connection
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// TCP connect + TLS handshake bound
    pub connect_timeout: Duration,
    /// Maximum silence between body chunks
    pub idle_timeout: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_SOURCE_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// What to do with an event whose data is not a valid payload document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeFailurePolicy {
    /// Forward with empty headers and an empty body
    #[default]
    ZeroValued,
    /// Forward the undecoded event data as the body
    ForwardRaw,
    /// Log and skip the event
    Drop,
}

/// Default overall request timeout for outbound requests
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Default TCP connect + TLS handshake bound for outbound requests
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(2500);
/// Default idle pooled connections kept per target host
const DEFAULT_MAX_IDLE_PER_HOST: usize = 4;

/// Settings for the outbound HTTP client of one route
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub decode_failure: DecodeFailurePolicy,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            pool_max_idle_per_host: DEFAULT_MAX_IDLE_PER_HOST,
            decode_failure: DecodeFailurePolicy::default(),
        }
    }
}

/// Settings shared by every route of a supervisor
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    pub subscription: SubscriptionConfig,
    pub forwarder: ForwarderConfig,
    pub restart: RestartPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_route() {
        let route = Route::parse("https://smee.io/abc", "http://127.0.0.1:3000/hook").unwrap();
        assert_eq!(route.source().as_str(), "https://smee.io/abc");
        assert_eq!(route.target().as_str(), "http://127.0.0.1:3000/hook");
        assert_eq!(
            route.to_string(),
            "https://smee.io/abc -> http://127.0.0.1:3000/hook"
        );
    }

    #[test]
    fn test_invalid_url() {
        let err = Route::parse("not a url", "http://localhost/").unwrap_err();
        assert!(matches!(err, RelayError::InvalidUrl { ref url, .. } if url == "not a url"));
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = Route::parse("https://smee.io/abc", "ftp://localhost/").unwrap_err();
        assert!(matches!(err, RelayError::UnsupportedScheme(_)));
    }

    #[test]
    fn test_forwarder_defaults_are_bounded() {
        let config = ForwarderConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_millis(2500));
        assert_eq!(config.decode_failure, DecodeFailurePolicy::ZeroValued);
    }
}
