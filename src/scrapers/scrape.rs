//! Selector-driven completion of a discovered item from its page.

use scraper::{Html, Selector};
use tracing::debug;

use crate::config::ScrapeConfig;
use crate::dates;
use crate::error::{Error, Result};
use crate::markup::{
    comments, compress_space, describe_node, exclude_matches, normalize_text, render_text,
    text_content,
};
use crate::models::Item;

use super::discover::compile_selector;

#[derive(Debug)]
pub struct Scrape {
    title: Selector,
    content: Selector,
    /// Removed from within each content match before rendering.
    cruft: Option<Selector>,
    published: Option<Selector>,
}

impl Scrape {
    pub fn from_config(def: &ScrapeConfig) -> Result<Self> {
        let optional = |css: &Option<String>| -> Result<Option<Selector>> {
            match css.as_deref().map(str::trim) {
                None | Some("") => Ok(None),
                Some(css) => compile_selector(css).map(Some),
            }
        };
        Ok(Self {
            title: compile_selector(&def.title)?,
            content: compile_selector(&def.content)?,
            cruft: optional(&def.cruft)?,
            published: optional(&def.published)?,
        })
    }

    /// Fill in title, content and (when a date selector is configured) the
    /// publication date of `item` from `html`.
    ///
    /// Without a date selector `published_at` is left as it was, so a date
    /// already supplied by a feed survives.
    pub fn apply(&self, item: &mut Item, html: &str) -> Result<()> {
        let doc = Html::parse_document(html);
        let missing = |what: &str| Error::Extraction(format!("{what} selector matched nothing on {}", item.permalink));

        let title = doc
            .select(&self.title)
            .next()
            .map(|el| compress_space(&text_content(*el)))
            .ok_or_else(|| missing("title"))?;

        let published = match &self.published {
            Some(sel) => {
                let el = doc.select(sel).next().ok_or_else(|| missing("date"))?;
                Some(dates::parse_fuzzy(&text_content(*el))?)
            }
            None => None,
        };

        let mut excluded = comments(doc.tree.root());
        let mut blocks = Vec::new();
        for el in doc.select(&self.content) {
            debug!(node = %describe_node(*el), "Content match");
            if let Some(cruft) = &self.cruft {
                exclude_matches(el, cruft, &mut excluded);
            }
            blocks.push(render_text(*el, &excluded));
        }
        if blocks.is_empty() {
            return Err(missing("content"));
        }
        let content = normalize_text(&blocks.join("\n\n"));
        if content.is_empty() {
            return Err(Error::Extraction(format!("empty content on {}", item.permalink)));
        }

        debug!(permalink = %item.permalink, bytes = content.len(), "Scraped item");
        item.title = title;
        item.content = content;
        if published.is_some() {
            item.published_at = published;
        }
        Ok(())
    }
}
