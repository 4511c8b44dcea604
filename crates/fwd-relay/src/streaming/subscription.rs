//! Subscription implementation

use std::time::Duration;

use bytes::Bytes;
use futures::stream::{Stream, StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use super::parser::{LineSplitter, SseParser};
use super::types::{Event, StreamError, StreamResult};
use crate::config::SubscriptionConfig;
use crate::error::Result;

const EVENT_STREAM: &str = "text/event-stream";

/// One long-lived connection to an SSE source
///
/// # Lifecycle
///
/// - `connect()` validates the response (status 200, `text/event-stream`)
/// - `stream()` reads the body and publishes events in wire order
/// - `stop()` may be called at any time from any task; the read loop exits at
///   the next line boundary and the response body is dropped with it
///
/// The response body is owned by the future returned from `stream()`, so it
/// is released exactly once on every exit path.
#[derive(Debug)]
pub struct Subscription {
    url: Url,
    http_client: Client,
    idle_timeout: Duration,
    cancel: CancellationToken,
}

impl Subscription {
    /// Create a subscription to `url`; `cancel` stops it
    pub fn new(url: Url, config: &SubscriptionConfig, cancel: CancellationToken) -> Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            url,
            http_client,
            idle_timeout: config.idle_timeout,
            cancel,
        })
    }

    /// Source URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Ask the read loop to exit. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether `stop()` was requested
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Connect and stream until stopped or failed.
    ///
    /// `Ok(())` means the subscription was stopped cooperatively; every
    /// error is a reason to reconnect.
    pub async fn serve(&self, events: &mpsc::Sender<Event>) -> StreamResult<()> {
        match self.connect().await {
            Ok(response) => self.stream(response, events).await,
            Err(StreamError::Cancelled) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Open the source connection and check it is an event stream
    pub async fn connect(&self) -> StreamResult<Response> {
        debug!(url = %self.url, "Connecting to SSE stream");

        let request = self
            .http_client
            .get(self.url.clone())
            .header(ACCEPT, EVENT_STREAM)
            .send();

        // connect_timeout only covers TCP and TLS; bound the wait for headers too.
        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(StreamError::Cancelled),
            response = tokio::time::timeout(self.idle_timeout, request) => response
                .map_err(|_| StreamError::IdleTimeout(self.idle_timeout))?
                .map_err(StreamError::Connect)?,
        };

        if response.status() != StatusCode::OK {
            return Err(StreamError::Status {
                status: response.status().as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .unwrap_or_default();
        if content_type != EVENT_STREAM {
            return Err(StreamError::ContentType {
                found: content_type,
            });
        }

        info!(url = %self.url, "Subscribed to SSE stream");
        Ok(response)
    }

    /// Read an accepted response until stopped or failed
    pub async fn stream(&self, response: Response, events: &mpsc::Sender<Event>) -> StreamResult<()> {
        let body = response.bytes_stream().map_err(StreamError::Read);
        self.stream_body(body, events).await
    }

    /// Parse any body stream into events.
    ///
    /// Cancellation is observed while waiting for bytes, before each line,
    /// and while waiting for the receiver to accept an event.
    pub async fn stream_body<S>(&self, body: S, events: &mpsc::Sender<Event>) -> StreamResult<()>
    where
        S: Stream<Item = StreamResult<Bytes>>,
    {
        let mut body = std::pin::pin!(body);
        let mut lines = LineSplitter::new();
        let mut parser = SseParser::new();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(url = %self.url, "Subscription stopped");
                    return Ok(());
                }
                chunk = tokio::time::timeout(self.idle_timeout, body.next()) => {
                    chunk.map_err(|_| StreamError::IdleTimeout(self.idle_timeout))?
                }
            };

            let Some(chunk) = chunk else {
                if let Some(rest) = lines.finish() {
                    parser.process_line(&rest)?;
                }
                if parser.has_pending() {
                    debug!(url = %self.url, "Source closed mid-record, discarding partial event");
                }
                return Err(StreamError::Closed);
            };
            lines.push(&chunk?);

            while let Some(line) = lines.next_line()? {
                if self.cancel.is_cancelled() {
                    debug!(url = %self.url, "Subscription stopped");
                    return Ok(());
                }

                let Some(event) = parser.process_line(&line)? else {
                    continue;
                };

                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Ok(()),
                    sent = events.send(event) => {
                        if sent.is_err() {
                            debug!(url = %self.url, "Event receiver closed");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
