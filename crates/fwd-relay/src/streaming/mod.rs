//! Event-stream subscriptions
//!
//! Reads a `text/event-stream` response line by line and turns it into
//! [`Event`]s.
//!
//! # Example
//!
//! ```no_run
//! use fwd_relay::config::SubscriptionConfig;
//! use fwd_relay::streaming::Subscription;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let url = "https://smee.io/abc123".parse()?;
//! let subscription = Subscription::new(url, &SubscriptionConfig::default(), CancellationToken::new())?;
//!
//! let (tx, mut rx) = tokio::sync::mpsc::channel(1);
//! tokio::spawn(async move {
//!     while let Some(event) = rx.recv().await {
//!         println!("{}", event);
//!     }
//! });
//!
//! // Returns Ok(()) only after subscription.stop()
//! subscription.serve(&tx).await?;
//! # Ok(())
//! # }
//! ```

mod parser;
mod subscription;
mod types;

pub use parser::{LineSplitter, SseParser, MAX_LINE_LEN};
pub use subscription::Subscription;
pub use types::{Event, StreamError, StreamResult, PING_EVENT};
