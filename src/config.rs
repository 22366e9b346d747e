//! Deployment settings and Source definitions, loaded from YAML.
//!
//! Sources are plain data: a name, a Discover strategy, an optional
//! historical (backfill) Discover and an optional Scrape. They are compiled
//! once by [`build_sources`]; a bad selector or URL fails there, at startup.
//!
//! ```yaml
//! interval_secs: 600
//! sources:
//!   - name: tesco
//!     discover:
//!       kind: page
//!       url: http://www.tescoplc.com/index.asp?pageid=17
//!       links: ".news-item a"
//!     scrape:
//!       title: "#page-title"
//!       content: ".body-copy"
//!       cruft: ".share"
//!       published: ".date"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::scrapers::{ConfiguredSource, Source};

fn default_listen() -> String {
    "0.0.0.0:9998".to_string()
}

fn default_database() -> PathBuf {
    PathBuf::from("./prstore.db")
}

fn default_interval_secs() -> u64 {
    600
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_source_budget_secs() -> u64 {
    300
}

fn default_max_concurrent_sources() -> usize {
    4
}

fn default_subscriber_buffer() -> usize {
    256
}

fn default_user_agent() -> String {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_pages() -> usize {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Wall-clock allowance for one Source within one cycle.
    #[serde(default = "default_source_budget_secs")]
    pub source_budget_secs: u64,
    #[serde(default = "default_max_concurrent_sources")]
    pub max_concurrent_sources: usize,
    /// Live events buffered per topic before slow subscribers start lagging.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub discover: DiscoverConfig,
    /// Alternate Discover used with `--historical` to backfill old releases.
    #[serde(default)]
    pub historical: Option<DiscoverConfig>,
    #[serde(default)]
    pub scrape: Option<ScrapeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscoverConfig {
    /// One index page listing links to releases.
    Page {
        url: String,
        links: String,
        #[serde(default)]
        allow_host_change: bool,
    },
    /// An index spread across pages chained by a "next" link.
    Paginated {
        url: String,
        links: String,
        next: String,
        #[serde(default)]
        allow_host_change: bool,
        #[serde(default = "default_max_pages")]
        max_pages: usize,
    },
    /// RSS or Atom feeds.
    Feed { urls: Vec<String> },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeConfig {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub cruft: Option<String>,
    #[serde(default)]
    pub published: Option<String>,
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        let config = Self::from_yaml(&text)?;
        info!(path = %path.display(), sources = config.sources.len(), "Loaded configuration");
        Ok(config)
    }
}

/// Compile every Source definition, in file order.
///
/// With `historical` set, Sources that define a `historical` Discover use it
/// in place of their regular one.
pub fn build_sources(config: &Config, historical: bool) -> Result<Vec<Arc<dyn Source>>> {
    let mut seen = HashSet::new();
    let mut sources: Vec<Arc<dyn Source>> = Vec::with_capacity(config.sources.len());
    for def in &config.sources {
        if def.name.trim().is_empty() {
            return Err(Error::Config("source with empty name".into()));
        }
        if !seen.insert(def.name.as_str()) {
            return Err(Error::Config(format!("duplicate source name {:?}", def.name)));
        }
        sources.push(Arc::new(ConfiguredSource::from_config(def, historical)?));
    }
    Ok(sources)
}

/// Keep only the named Sources. Naming one that isn't configured is an error.
pub fn restrict(sources: Vec<Arc<dyn Source>>, only: &[String]) -> Result<Vec<Arc<dyn Source>>> {
    if only.is_empty() {
        return Ok(sources);
    }
    if let Some(unknown) = only
        .iter()
        .find(|name| !sources.iter().any(|s| s.name() == name.as_str()))
    {
        return Err(Error::Config(format!("unknown source {unknown:?}")));
    }
    Ok(sources
        .into_iter()
        .filter(|s| only.iter().any(|name| name == s.name()))
        .collect())
}
