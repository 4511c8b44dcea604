//! Forwarder - relays one route's events to its target endpoint

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use serde_json::value::RawValue;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DecodeFailurePolicy, ForwarderConfig, Route};
use crate::error::{ForwardError, Result};
use crate::streaming::Event;

/// Webhook delivery as published by the source channel inside `Event.data`
///
/// Missing or `null` fields decode to their zero value.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Payload {
    #[serde(deserialize_with = "null_as_default")]
    pub host: String,
    #[serde(deserialize_with = "null_as_default")]
    pub connection: String,
    #[serde(rename = "user-agent", deserialize_with = "null_as_default")]
    pub user_agent: String,
    #[serde(rename = "accept-encoding", deserialize_with = "null_as_default")]
    pub accept_encoding: String,
    #[serde(deserialize_with = "null_as_default")]
    pub accept: String,
    #[serde(rename = "content-type", deserialize_with = "null_as_default")]
    pub content_type: String,
    #[serde(rename = "x-request-id", deserialize_with = "null_as_default")]
    pub x_request_id: String,
    #[serde(rename = "x-github-delivery", deserialize_with = "null_as_default")]
    pub x_github_delivery: String,
    #[serde(rename = "x-github-event", deserialize_with = "null_as_default")]
    pub x_github_event: String,
    #[serde(rename = "x-hub-signature", deserialize_with = "null_as_default")]
    pub x_hub_signature: String,
    /// Original request body, kept byte-for-byte so signatures still verify
    pub body: Option<Box<RawValue>>,
    #[serde(deserialize_with = "null_as_default")]
    pub timestamp: i64,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Payload {
    /// Decode the payload carried by an event
    pub fn decode(data: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Headers copied onto the outbound request, empty when absent
    pub fn headers(&self) -> [(&'static str, &str); 5] {
        [
            ("content-type", self.content_type.as_str()),
            ("x-request-id", self.x_request_id.as_str()),
            ("x-github-delivery", self.x_github_delivery.as_str()),
            ("x-github-event", self.x_github_event.as_str()),
            ("x-hub-signature", self.x_hub_signature.as_str()),
        ]
    }

    /// Raw body bytes, empty when the payload had none
    pub fn body_bytes(&self) -> Bytes {
        self.body
            .as_ref()
            .map(|raw| Bytes::copy_from_slice(raw.get().as_bytes()))
            .unwrap_or_default()
    }
}

/// What happened to one event
#[derive(Debug)]
pub enum ForwardOutcome {
    /// Filtered out (heartbeat or missing id)
    Skipped,
    /// Target accepted the request
    Delivered { status: u16 },
    /// Not delivered; never retried
    Failed(ForwardError),
}

/// Relays events of one route to its target over an exclusive HTTP client
#[derive(Debug)]
pub struct Forwarder {
    route: Route,
    client: Client,
    decode_failure: DecodeFailurePolicy,
}

impl Forwarder {
    /// Create a forwarder with its own bounded HTTP client
    pub fn new(route: Route, config: &ForwarderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()?;

        Ok(Self {
            route,
            client,
            decode_failure: config.decode_failure,
        })
    }

    /// Route served by this forwarder
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Drain `events` until the channel closes or `cancel` fires.
    ///
    /// Cancellation is observed between events; an in-flight request is
    /// bounded by the request timeout instead.
    pub async fn run(&self, mut events: mpsc::Receiver<Event>, cancel: CancellationToken) {
        debug!(route = %self.route, "Forwarder started");

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.forward(&event).await;
        }

        debug!(route = %self.route, "Forwarder stopped");
    }

    /// Relay one event. Failures are logged and returned, never retried.
    pub async fn forward(&self, event: &Event) -> ForwardOutcome {
        if !event.is_forwardable() {
            debug!(target_url = %self.route.target(), %event, "Skipping received event");
            return ForwardOutcome::Skipped;
        }

        info!(target_url = %self.route.target(), %event, "Received event");

        let (headers, body) = match self.prepare(event) {
            Ok(request) => request,
            Err(e) => {
                warn!(id = %event.id, error = %e, "Dropping event");
                return ForwardOutcome::Failed(e);
            }
        };

        match self.send(headers, body).await {
            Ok(status) => {
                debug!(id = %event.id, status, "Event delivered");
                ForwardOutcome::Delivered { status }
            }
            Err(e) => {
                warn!(id = %event.id, target_url = %self.route.target(), error = %e, "Forwarding failed");
                ForwardOutcome::Failed(e)
            }
        }
    }

    /// Headers and body for the outbound request
    fn prepare(&self, event: &Event) -> std::result::Result<(HeaderMap, Bytes), ForwardError> {
        let payload = match Payload::decode(&event.data) {
            Ok(payload) => payload,
            Err(e) => match self.decode_failure {
                DecodeFailurePolicy::ZeroValued => {
                    warn!(id = %event.id, error = %e, "Undecodable payload, forwarding empty request");
                    Payload::default()
                }
                DecodeFailurePolicy::ForwardRaw => {
                    warn!(id = %event.id, error = %e, "Undecodable payload, forwarding raw data");
                    return Ok((HeaderMap::new(), event.data.clone()));
                }
                DecodeFailurePolicy::Drop => return Err(ForwardError::PayloadDecode(e)),
            },
        };

        Ok((header_map(&payload), payload.body_bytes()))
    }

    async fn send(&self, headers: HeaderMap, body: Bytes) -> std::result::Result<u16, ForwardError> {
        let response = self
            .client
            .post(self.route.target().clone())
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), %body, "Target rejected event");
            return Err(ForwardError::status(status.as_u16(), body));
        }

        Ok(status.as_u16())
    }
}

/// Copy payload headers, skipping values that are not legal header values
fn header_map(payload: &Payload) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in payload.headers() {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(name), value);
            }
            Err(_) => warn!(header = name, "Skipping invalid header value"),
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DELIVERY: &str = r#"{
        "host": "smee.io",
        "content-type": "application/json",
        "x-request-id": "req-1",
        "x-github-delivery": "72d3162e",
        "x-github-event": "push",
        "x-hub-signature": "sha1=abc",
        "body": {"zeta": 1, "alpha": [1, 2]},
        "timestamp": 1700000000000
    }"#;

    fn forwarder(policy: DecodeFailurePolicy) -> Forwarder {
        let route = Route::parse("http://127.0.0.1:1/source", "http://127.0.0.1:1/target").unwrap();
        let config = ForwarderConfig {
            decode_failure: policy,
            ..ForwarderConfig::default()
        };
        Forwarder::new(route, &config).unwrap()
    }

    fn event(id: &str, name: &str, data: &'static str) -> Event {
        Event {
            id: id.into(),
            name: name.into(),
            data: Bytes::from_static(data.as_bytes()),
        }
    }

    #[test]
    fn test_decode_payload() {
        let payload = Payload::decode(DELIVERY.as_bytes()).unwrap();
        assert_eq!(payload.host, "smee.io");
        assert_eq!(payload.x_github_event, "push");
        assert_eq!(payload.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_body_is_forwarded_verbatim() {
        let payload = Payload::decode(DELIVERY.as_bytes()).unwrap();
        assert_eq!(&payload.body_bytes()[..], br#"{"zeta": 1, "alpha": [1, 2]}"#);
    }

    #[test]
    fn test_missing_fields_are_empty() {
        let payload = Payload::decode(br#"{"x-request-id": "r"}"#).unwrap();
        assert_eq!(payload.content_type, "");
        assert!(payload.body_bytes().is_empty());

        let headers = header_map(&payload);
        assert_eq!(headers.len(), 5);
        assert_eq!(headers["x-request-id"], "r");
        assert_eq!(headers["x-hub-signature"], "");
    }

    #[test]
    fn test_null_fields_keep_the_rest_of_the_payload() {
        let fwd = forwarder(DecodeFailurePolicy::Drop);
        let data = r#"{"x-hub-signature": null, "x-github-event": "push", "timestamp": null, "body": {"a":1}}"#;
        let (headers, body) = fwd.prepare(&event("1", "", data)).unwrap();

        assert_eq!(&body[..], br#"{"a":1}"#);
        assert_eq!(headers["x-hub-signature"], "");
        assert_eq!(headers["x-github-event"], "push");
    }

    #[test]
    fn test_header_map_copies_provider_headers() {
        let payload = Payload::decode(DELIVERY.as_bytes()).unwrap();
        let headers = header_map(&payload);
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(headers["x-github-delivery"], "72d3162e");
        assert_eq!(headers["x-github-event"], "push");
        assert_eq!(headers["x-hub-signature"], "sha1=abc");
    }

    #[test]
    fn test_invalid_header_value_is_skipped() {
        let payload = Payload {
            x_request_id: "bad\nvalue".into(),
            ..Payload::default()
        };
        let headers = header_map(&payload);
        assert!(headers.get("x-request-id").is_none());
        assert_eq!(headers.len(), 4);
    }

    #[test]
    fn test_prepare_zero_valued_on_decode_failure() {
        let fwd = forwarder(DecodeFailurePolicy::ZeroValued);
        let (headers, body) = fwd.prepare(&event("1", "", "not json")).unwrap();
        assert!(body.is_empty());
        assert_eq!(headers["content-type"], "");
    }

    #[test]
    fn test_prepare_forward_raw_on_decode_failure() {
        let fwd = forwarder(DecodeFailurePolicy::ForwardRaw);
        let (headers, body) = fwd.prepare(&event("1", "", "not json")).unwrap();
        assert!(headers.is_empty());
        assert_eq!(&body[..], b"not json");
    }

    #[tokio::test]
    async fn test_drop_on_decode_failure() {
        let fwd = forwarder(DecodeFailurePolicy::Drop);
        let outcome = fwd.forward(&event("1", "", "not json")).await;
        assert!(matches!(
            outcome,
            ForwardOutcome::Failed(ForwardError::PayloadDecode(_))
        ));
    }

    #[tokio::test]
    async fn test_filtered_events_never_reach_the_network() {
        let fwd = forwarder(DecodeFailurePolicy::ZeroValued);
        for ev in [
            event("5", "ping", DELIVERY),
            event("0", "", DELIVERY),
            event("", "push", DELIVERY),
        ] {
            assert!(matches!(fwd.forward(&ev).await, ForwardOutcome::Skipped));
        }
    }

    #[tokio::test]
    async fn test_unreachable_target_is_reported() {
        let fwd = forwarder(DecodeFailurePolicy::ZeroValued);
        let outcome = fwd.forward(&event("1", "", DELIVERY)).await;
        assert!(matches!(outcome, ForwardOutcome::Failed(ForwardError::Send(_))));
    }

    #[tokio::test]
    async fn test_run_stops_when_channel_closes() {
        let fwd = forwarder(DecodeFailurePolicy::ZeroValued);
        let (tx, rx) = mpsc::channel(4);
        tx.send(event("1", "ping", "")).await.unwrap();
        drop(tx);

        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            fwd.run(rx, CancellationToken::new()),
        )
        .await
        .unwrap();
    }
}
