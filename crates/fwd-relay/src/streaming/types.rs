//! Types for event-stream subscriptions

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

/// Event name used by sources for keep-alive heartbeats
pub const PING_EVENT: &str = "ping";

/// One completed record from a `text/event-stream` body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    /// Value of the `id:` line, empty when the record had none
    pub id: String,

    /// Value of the `event:` line, empty when the record had none
    pub name: String,

    /// All `data:` line values of the record, concatenated without separator
    pub data: Bytes,
}

impl Event {
    /// Whether this event carries domain data worth relaying.
    ///
    /// Heartbeats and records without a usable id (empty or the `"0"`
    /// sentinel) are dropped.
    pub fn is_forwardable(&self) -> bool {
        self.name != PING_EVENT && !self.id.is_empty() && self.id != "0"
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id={}, name={}, payload={}",
            self.id,
            self.name,
            String::from_utf8_lossy(&self.data)
        )
    }
}

/// Errors that end a subscription
#[derive(Debug, Error)]
pub enum StreamError {
    /// Source connection could not be established
    #[error("Connection error: {0}")]
    Connect(#[source] reqwest::Error),

    /// Source answered with something other than 200
    #[error("Unexpected status {status} from source")]
    Status { status: u16 },

    /// Source answered with the wrong content type
    #[error("Invalid Content-Type {found:?}, expected text/event-stream")]
    ContentType { found: String },

    /// Unrecognized line in the event stream
    #[error("Unrecognized event-stream line (len {len}): {line}")]
    Parse { line: String, len: usize },

    /// A single line exceeded the buffering bound
    #[error("Event-stream line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    /// Reading the response body failed
    #[error("Read error: {0}")]
    Read(#[source] reqwest::Error),

    /// No bytes arrived within the idle timeout
    #[error("No data from source for {0:?}")]
    IdleTimeout(Duration),

    /// Stream was closed by the source
    #[error("Stream closed")]
    Closed,

    /// Subscription was cancelled
    #[error("Subscription cancelled")]
    Cancelled,
}

/// Result type for streaming operations
pub type StreamResult<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, name: &str) -> Event {
        Event {
            id: id.to_string(),
            name: name.to_string(),
            data: Bytes::from_static(b"{}"),
        }
    }

    #[test]
    fn test_ping_is_never_forwardable() {
        assert!(!event("17", "ping").is_forwardable());
        assert!(!event("", "ping").is_forwardable());
    }

    #[test]
    fn test_missing_or_sentinel_id_is_not_forwardable() {
        assert!(!event("", "").is_forwardable());
        assert!(!event("0", "push").is_forwardable());
        assert!(!event("0", "").is_forwardable());
    }

    #[test]
    fn test_regular_event_is_forwardable() {
        assert!(event("1700000000000", "").is_forwardable());
        assert!(event("42", "push").is_forwardable());
        assert!(event("00", "").is_forwardable());
    }

    #[test]
    fn test_display_format() {
        let ev = Event {
            id: "7".into(),
            name: "push".into(),
            data: Bytes::from_static(b"{\"a\":1}"),
        };
        assert_eq!(ev.to_string(), "id=7, name=push, payload={\"a\":1}");
    }
}
