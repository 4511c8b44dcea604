//! fwd relay library
//!
//! Relays server-sent events published on a source channel (for example a
//! smee.io webhook channel) to HTTP endpoints that cannot be reached from
//! the outside.
//!
//! # Example
//!
//! ```rust,no_run
//! use fwd_relay::{RelayConfig, Route, RouteSupervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut supervisor = RouteSupervisor::new(RelayConfig::default());
//!     supervisor.add_route(Route::parse(
//!         "https://smee.io/abc123",
//!         "http://127.0.0.1:3000/webhook",
//!     )?)?;
//!     supervisor.start();
//!
//!     tokio::signal::ctrl_c().await?;
//!     supervisor.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Pipeline
//!
//! Per route, bytes from the source are split into lines and parsed into
//! [`Event`]s by a [`Subscription`], queued in wire order, and relayed by a
//! [`Forwarder`] as `POST` requests to the target. The [`RouteSupervisor`]
//! restarts failed subscriptions according to a [`RestartPolicy`].
//!
//! # Testing
//!
//! The `testing` module provides in-process fakes for both ends of a route:
//!
//! ```rust,ignore
//! use fwd_relay::testing::{CaptureTarget, SourceResponse, SseSource, TestServer};
//!
//! let source = SseSource::new(SourceResponse::stream(["id: 1\ndata: {}\n\n"]));
//! let server = TestServer::start(source.router("/channel")).await?;
//! ```

pub mod config;
mod error;
pub mod forwarder;
pub mod restart;
pub mod streaming;
pub mod supervisor;
pub mod testing;

pub use config::{DecodeFailurePolicy, ForwarderConfig, RelayConfig, Route, SubscriptionConfig};
pub use error::{ForwardError, RelayError, Result};
pub use forwarder::{ForwardOutcome, Forwarder, Payload};
pub use restart::{Backoff, RestartPolicy};
pub use streaming::{Event, StreamError, Subscription};
pub use supervisor::{RouteState, RouteStatus, RouteSupervisor};
