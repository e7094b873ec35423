use std::time::Duration;

use bon::Builder;
pub use tokio_tungstenite::tungstenite::http::{HeaderMap, HeaderName, HeaderValue};

use crate::Result;
use crate::error::Error;

const DEFAULT_PING_INTERVAL_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_PING_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_PING_FAILURE_THRESHOLD: u32 = 2;
const DEFAULT_MESSAGE_CAPACITY: usize = 1024;

/// Configuration for [`Client`](crate::Client) behavior.
///
/// ```
/// use std::time::Duration;
///
/// use resilient_ws::config::Config;
///
/// let config = Config::builder()
///     .ping_interval(Duration::from_secs(1))
///     .ping_failure_threshold(3)
///     .build();
///
/// assert_eq!(config.ping_timeout, Duration::from_secs(10));
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Extra headers sent with the opening handshake
    #[builder(default)]
    pub headers: HeaderMap,
    /// How long the keepalive loop sleeps between probes
    #[builder(default = DEFAULT_PING_INTERVAL_DURATION)]
    pub ping_interval: Duration,
    /// How long a probe may wait for its PONG before it counts as failed
    #[builder(default = DEFAULT_PING_TIMEOUT_DURATION)]
    pub ping_timeout: Duration,
    /// Consecutive probe failures that force a reconnect. Must be at least 1.
    #[builder(default = DEFAULT_PING_FAILURE_THRESHOLD)]
    pub ping_failure_threshold: u32,
    /// Buffered inbound messages per [`Client::subscribe`](crate::Client::subscribe) stream
    #[builder(default = DEFAULT_MESSAGE_CAPACITY)]
    pub message_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    /// Returns a copy of this configuration with `name: value` added to the handshake headers.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.ping_interval.is_zero() {
            return Err(Error::validation("ping_interval must be greater than zero"));
        }
        if self.ping_timeout.is_zero() {
            return Err(Error::validation("ping_timeout must be greater than zero"));
        }
        if self.ping_failure_threshold == 0 {
            return Err(Error::validation(
                "ping_failure_threshold must be at least 1",
            ));
        }
        if self.message_capacity == 0 {
            return Err(Error::validation("message_capacity must be greater than zero"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Kind;

    #[test]
    fn defaults() {
        let config = Config::default();

        assert_eq!(config.ping_interval, Duration::from_secs(5));
        assert_eq!(config.ping_failure_threshold, 2);
        assert!(config.headers.is_empty(), "no headers by default");
        assert!(config.validate().is_ok(), "defaults should validate");
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let config = Config::builder().ping_failure_threshold(0).build();

        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), Kind::Validation);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = Config::builder().ping_interval(Duration::ZERO).build();

        assert!(config.validate().is_err(), "zero interval must not validate");
    }

    #[test]
    fn with_header_should_insert() -> Result<()> {
        let config = Config::default().with_header("x-client", "resilient")?;

        assert_eq!(
            config.headers.get("x-client").map(HeaderValue::as_bytes),
            Some(b"resilient".as_slice())
        );
        Ok(())
    }

    #[test]
    fn with_header_rejects_invalid_name() {
        let err = Config::default().with_header("bad header", "v").unwrap_err();

        assert_eq!(err.kind(), Kind::Validation);
    }
}
