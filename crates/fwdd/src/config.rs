//! Route table file handling for fwdd

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fwd_relay::Route;
use serde::Deserialize;
use tracing::warn;

/// Route table: source channel URL -> target URL
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteTable {
    #[serde(rename = "Routes", alias = "routes", default)]
    pub routes: BTreeMap<String, String>,
}

impl RouteTable {
    /// Load a route table; `.toml` files are TOML, anything else JSON
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let is_toml = path.extension().and_then(|e| e.to_str()) == Some("toml");
        if is_toml {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        }
    }

    /// Load `path`, or the default file if it exists.
    ///
    /// A missing default file yields an empty table; a missing explicit
    /// file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// `~/.config/fwd/fwd.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config").join("fwd").join("fwd.json"))
    }
}

/// Merge the single `source`/`target` pair with the route table
pub fn collect_routes(
    source: Option<&str>,
    target: Option<&str>,
    table: &RouteTable,
) -> Result<Vec<Route>> {
    let mut routes = Vec::with_capacity(table.routes.len() + 1);

    match (source, target) {
        (Some(source), Some(target)) => {
            routes.push(
                Route::parse(source, target)
                    .with_context(|| format!("Invalid route {source} -> {target}"))?,
            );
        }
        (Some(source), None) => warn!(%source, "Ignoring source without a target"),
        _ => {}
    }

    for (source, target) in &table.routes {
        routes.push(
            Route::parse(source, target)
                .with_context(|| format!("Invalid route in config: {source} -> {target}"))?,
        );
    }

    Ok(routes)
}
