//! Configuration-driven extraction engine.
//!
//! A [`Source`] is the capability the scheduler drives. Each one runs in two
//! phases:
//!
//! 1. **Discover**: list candidate press releases, from an index page, a chain
//!    of paginated index pages, or RSS/Atom feeds
//! 2. **Scrape**: complete one discovered item from its fetched page using CSS
//!    selectors for title, content, cruft and publication date
//!
//! # Strategies
//!
//! | Discover | Module | Items |
//! |----------|--------|-------|
//! | single page | [`discover`] | incomplete, permalink only |
//! | paginated | [`discover`] | incomplete, permalink only |
//! | feed | [`feed`] | complete, unless the Source also has a Scrape |
//!
//! Selectors and URLs are compiled when the Source is built, so a typo in the
//! configuration is reported at startup rather than on the first poll.
//!
//! [`ConfiguredSource`] is the only implementation shipped here, but the
//! scheduler only sees `dyn Source`, so hand-written site adapters can sit
//! alongside configured ones.

pub mod discover;
pub mod feed;
pub mod scrape;

use async_trait::async_trait;

use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::models::Item;

pub use discover::Discover;
pub use scrape::Scrape;

#[async_trait]
pub trait Source: Send + Sync {
    /// Stable unique name. Doubles as topic and archive partition key.
    fn name(&self) -> &str;

    /// List candidate items. A failed fetch fails the whole call.
    async fn discover(&self, fetcher: &dyn Fetcher) -> Result<Vec<Item>>;

    /// Complete `item` in place from the HTML of its permalink.
    fn scrape(&self, item: &mut Item, html: &str) -> Result<()>;
}

/// A Source assembled from a [`SourceConfig`].
#[derive(Debug)]
pub struct ConfiguredSource {
    name: String,
    discover: Discover,
    scrape: Option<Scrape>,
}

impl ConfiguredSource {
    pub fn new(name: impl Into<String>, discover: Discover, scrape: Option<Scrape>) -> Result<Self> {
        let name = name.into();
        if scrape.is_none() && !matches!(discover, Discover::Feed(_)) {
            return Err(Error::Config(format!(
                "source {name:?}: link-listing discover needs a scrape section"
            )));
        }
        Ok(Self {
            name,
            discover,
            scrape,
        })
    }

    /// Compile `def`. With `historical`, its backfill Discover (if any) is
    /// used instead of the regular one.
    pub fn from_config(def: &SourceConfig, historical: bool) -> Result<Self> {
        let discover_def = match (&def.historical, historical) {
            (Some(alt), true) => alt,
            _ => &def.discover,
        };
        let in_source = |e: Error| match e {
            Error::Config(msg) => Error::Config(format!("source {:?}: {msg}", def.name)),
            other => other,
        };
        let discover = Discover::from_config(discover_def).map_err(in_source)?;
        let scrape = def
            .scrape
            .as_ref()
            .map(Scrape::from_config)
            .transpose()
            .map_err(in_source)?;
        Self::new(def.name.clone(), discover, scrape)
    }
}

#[async_trait]
impl Source for ConfiguredSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn discover(&self, fetcher: &dyn Fetcher) -> Result<Vec<Item>> {
        self.discover
            .run(&self.name, fetcher, self.scrape.is_some())
            .await
    }

    fn scrape(&self, item: &mut Item, html: &str) -> Result<()> {
        match &self.scrape {
            Some(scrape) => scrape.apply(item, html),
            None => Err(Error::Extraction(format!(
                "{}: feed entry has no content and no scrape is configured",
                item.permalink
            ))),
        }
    }
}
