//! Test utilities for fwd-relay
//!
//! In-process fakes for both ends of a route: [`SseSource`] serves scripted
//! event streams, [`CaptureTarget`] records the requests it receives.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;

/// An HTTP server on an ephemeral port that shuts down when dropped
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// Serve `router` on 127.0.0.1
    ///
    /// # Example
    ///
    /// ```ignore
    /// let source = SseSource::new(SourceResponse::stream(["id: 1\ndata: {}\n\n"]));
    /// let server = TestServer::start(source.router("/channel")).await?;
    /// let url = server.url("/channel");
    /// ```
    pub async fn start(router: Router) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Base URL of the server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Absolute URL for `path`
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// Shut down, aborting connections still open after a short grace period
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(Duration::from_millis(500), handle)
                .await
                .is_err()
            {
                abort.abort();
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// How the fake source answers one connection
#[derive(Debug, Clone)]
pub enum SourceResponse {
    /// `200 text/event-stream` with the given body chunks
    Stream {
        chunks: Vec<String>,
        /// Hold the connection open after the last chunk
        keep_open: bool,
    },
    /// Empty reply with an arbitrary status and content type
    Reply { status: u16, content_type: String },
}

impl SourceResponse {
    /// Stream `chunks` and keep the connection open
    pub fn stream<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Stream {
            chunks: chunks.into_iter().map(Into::into).collect(),
            keep_open: true,
        }
    }

    /// Stream `chunks` and close the connection
    pub fn stream_then_close<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Stream {
            chunks: chunks.into_iter().map(Into::into).collect(),
            keep_open: false,
        }
    }

    /// Reply with `status` and the event-stream content type
    pub fn status(status: u16) -> Self {
        Self::Reply {
            status,
            content_type: "text/event-stream".into(),
        }
    }

    /// Reply 200 with a different content type
    pub fn content_type(content_type: impl Into<String>) -> Self {
        Self::Reply {
            status: 200,
            content_type: content_type.into(),
        }
    }

    fn into_response(self) -> Response {
        match self {
            SourceResponse::Stream { chunks, keep_open } => {
                let chunks = stream::iter(
                    chunks
                        .into_iter()
                        .map(|chunk| Ok::<_, Infallible>(Bytes::from(chunk))),
                );
                let body = if keep_open {
                    Body::from_stream(chunks.chain(stream::pending()))
                } else {
                    Body::from_stream(chunks)
                };
                ([(CONTENT_TYPE, "text/event-stream")], body).into_response()
            }
            SourceResponse::Reply {
                status,
                content_type,
            } => {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, [(CONTENT_TYPE, content_type)]).into_response()
            }
        }
    }
}

struct SourceState {
    script: Mutex<VecDeque<SourceResponse>>,
    fallback: SourceResponse,
    connections: AtomicUsize,
}

/// Fake SSE channel answering connections from a script
#[derive(Clone)]
pub struct SseSource {
    inner: Arc<SourceState>,
}

impl SseSource {
    /// Source answering every connection with `fallback`
    pub fn new(fallback: SourceResponse) -> Self {
        Self {
            inner: Arc::new(SourceState {
                script: Mutex::new(VecDeque::new()),
                fallback,
                connections: AtomicUsize::new(0),
            }),
        }
    }

    /// Queue `response` for one connection; the fallback answers once the queue is empty
    pub fn then(self, response: SourceResponse) -> Self {
        self.inner.script.lock().push_back(response);
        self
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.inner.connections.load(Ordering::SeqCst)
    }

    /// Router serving the channel at `path`
    pub fn router(&self, path: &str) -> Router {
        let source = self.clone();
        Router::new().route(
            path,
            get(move || {
                let source = source.clone();
                async move { source.respond() }
            }),
        )
    }

    fn respond(&self) -> Response {
        self.inner.connections.fetch_add(1, Ordering::SeqCst);
        let response = self
            .inner
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.inner.fallback.clone());
        response.into_response()
    }
}

/// One request received by a [`CaptureTarget`]
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CapturedRequest {
    /// Header value as text, empty when missing
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }
}

/// Fake webhook receiver recording every POST
#[derive(Clone)]
pub struct CaptureTarget {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    status: StatusCode,
}

impl Default for CaptureTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureTarget {
    /// Target answering 200
    pub fn new() -> Self {
        Self::with_status(200)
    }

    /// Target answering `status` to every request
    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received so far
    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    /// Whether nothing was received yet
    pub fn is_empty(&self) -> bool {
        self.requests.lock().is_empty()
    }

    /// Router accepting POSTs at `path`
    pub fn router(&self, path: &str) -> Router {
        let target = self.clone();
        Router::new().route(
            path,
            post(move |headers: HeaderMap, body: Bytes| {
                let target = target.clone();
                async move { target.record(headers, body) }
            }),
        )
    }

    fn record(&self, headers: HeaderMap, body: Bytes) -> StatusCode {
        self.requests.lock().push(CapturedRequest { headers, body });
        self.status
    }
}

/// Wait for a condition with timeout
pub async fn wait_for<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    condition()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_source_follows_script_then_fallback() {
        let source = SseSource::new(SourceResponse::status(503)).then(SourceResponse::stream_then_close([
            "id: 1\n\n",
        ]));
        let server = TestServer::start(source.router("/channel")).await.unwrap();
        let client = reqwest::Client::new();

        let first = client.get(server.url("/channel")).send().await.unwrap();
        assert_eq!(first.status(), 200);
        assert_eq!(first.headers()["content-type"], "text/event-stream");
        assert_eq!(first.text().await.unwrap(), "id: 1\n\n");

        let second = client.get(server.url("/channel")).send().await.unwrap();
        assert_eq!(second.status(), 503);
        assert_eq!(source.connections(), 2);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_capture_target_records_requests() {
        let target = CaptureTarget::with_status(202);
        let server = TestServer::start(target.router("/hook")).await.unwrap();

        let response = reqwest::Client::new()
            .post(server.url("/hook"))
            .header("x-github-event", "push")
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 202);

        let requests = target.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].header("x-github-event"), "push");
        assert_eq!(&requests[0].body[..], b"{}");
    }

    #[tokio::test]
    async fn test_urls_use_bound_port() {
        let server = TestServer::start(Router::new()).await.unwrap();
        assert_ne!(server.addr.port(), 0);
        assert_eq!(
            server.base_url(),
            format!("http://127.0.0.1:{}", server.addr.port())
        );
        assert_eq!(server.url("/hook"), format!("{}/hook", server.base_url()));

        server.shutdown().await;
    }
}
