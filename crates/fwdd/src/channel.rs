//! Source channel allocation

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::header::LOCATION;
use reqwest::redirect;
use url::Url;

/// Service handing out fresh channels via a redirect
pub const DEFAULT_CHANNEL_SERVICE: &str = "https://smee.io/new";

/// Allocate a new channel on `service`.
///
/// The service answers `HEAD` with a redirect whose `Location` is the new
/// channel URL. Redirects are not followed.
pub async fn create_channel(service: &str) -> Result<Url> {
    let service =
        Url::parse(service).with_context(|| format!("Invalid channel service URL: {service}"))?;

    let client = reqwest::Client::builder()
        .redirect(redirect::Policy::none())
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    let response = client
        .head(service.clone())
        .send()
        .await
        .with_context(|| format!("Failed to reach channel service {service}"))?;

    let Some(location) = response.headers().get(LOCATION) else {
        bail!(
            "Channel service {service} answered {} without a Location header",
            response.status()
        );
    };
    let location = location
        .to_str()
        .context("Channel service returned a non-ASCII Location header")?;

    service
        .join(location)
        .with_context(|| format!("Invalid channel location: {location}"))
}
