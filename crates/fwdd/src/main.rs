//! fwdd - SSE channel relay daemon
//!
//! Subscribes to event channels (for example smee.io webhook channels) and
//! re-posts every delivered webhook to a local HTTP endpoint.
//!
//! Usage:
//!   fwdd --source <channel-url> --target <url>
//!   fwdd --config routes.json
//!   fwdd --target <url>            # allocates a new channel first
//!
//! Every flag can also be set through the environment (`FWD_SOURCE`,
//! `FWD_TARGET`, `FWD_CONFIG`, `FWD_DEBUG`).

mod channel;
mod config;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, ValueEnum};
use fwd_relay::{
    DecodeFailurePolicy, ForwarderConfig, RelayConfig, RestartPolicy, RouteSupervisor,
    SubscriptionConfig,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::channel::DEFAULT_CHANNEL_SERVICE;
use crate::config::{collect_routes, RouteTable};

#[derive(Parser, Debug)]
#[command(name = "fwdd")]
#[command(author, version, about = "Relay SSE channel events to HTTP endpoints")]
struct Cli {
    /// Source channel URL
    #[arg(short, long, env = "FWD_SOURCE")]
    source: Option<String>,

    /// Target URL receiving the relayed requests
    #[arg(short, long, env = "FWD_TARGET")]
    target: Option<String>,

    /// Route table file (JSON, or TOML by extension) [default: ~/.config/fwd/fwd.json]
    #[arg(short, long, env = "FWD_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(
        short,
        long,
        env = "FWD_DEBUG",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    debug: bool,

    /// Service allocating a channel when only a target is given
    #[arg(long, env = "FWD_CHANNEL_SERVICE", default_value = DEFAULT_CHANNEL_SERVICE)]
    channel_service: String,

    /// Seconds without data from a source before it is reconnected
    #[arg(long, default_value_t = 300)]
    idle_timeout: u64,

    /// Give up on a route after this many consecutive restarts
    #[arg(long)]
    max_restarts: Option<u32>,

    /// Handling of events whose data is not a valid payload
    #[arg(long, value_enum, default_value_t = DecodeFailureArg::Empty)]
    on_decode_error: DecodeFailureArg,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DecodeFailureArg {
    /// Forward with empty headers and body
    Empty,
    /// Forward the raw event data as body
    Raw,
    /// Skip the event
    Drop,
}

impl From<DecodeFailureArg> for DecodeFailurePolicy {
    fn from(arg: DecodeFailureArg) -> Self {
        match arg {
            DecodeFailureArg::Empty => DecodeFailurePolicy::ZeroValued,
            DecodeFailureArg::Raw => DecodeFailurePolicy::ForwardRaw,
            DecodeFailureArg::Drop => DecodeFailurePolicy::Drop,
        }
    }
}

impl Cli {
    fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            subscription: SubscriptionConfig {
                idle_timeout: Duration::from_secs(self.idle_timeout),
                ..SubscriptionConfig::default()
            },
            forwarder: ForwarderConfig {
                decode_failure: self.on_decode_error.into(),
                ..ForwarderConfig::default()
            },
            restart: RestartPolicy {
                max_restarts: self.max_restarts,
                ..RestartPolicy::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --debug
    let default_filter = if cli.debug {
        "fwdd=debug,fwd_relay=debug"
    } else {
        "fwdd=info,fwd_relay=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting fwdd");

    let table = RouteTable::load(cli.config.as_deref())?;

    let mut source = cli.source.clone();
    if source.is_none() && cli.target.is_some() {
        let channel = channel::create_channel(&cli.channel_service)
            .await
            .context("Failed to allocate a source channel")?;
        tracing::info!(%channel, "No source given, allocated a new channel");
        source = Some(channel.to_string());
    }

    let routes = collect_routes(source.as_deref(), cli.target.as_deref(), &table)?;
    if routes.is_empty() {
        bail!("No routes configured: pass --source and --target, or a route table with --config");
    }

    let mut supervisor = RouteSupervisor::new(cli.relay_config());
    for route in routes {
        tracing::info!(%route, "Adding route");
        supervisor.add_route(route)?;
    }
    tracing::info!("{} routes loaded", supervisor.len());

    supervisor.start();

    // Wait for Ctrl+C
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    supervisor.shutdown().await;
    tracing::info!("fwdd stopped");

    Ok(())
}
