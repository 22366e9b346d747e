//! RSS 2.0 and Atom feed discovery.
//!
//! Feed entries usually carry everything a press release needs, so they come
//! out complete and skip Scrape. Two exceptions leave an entry incomplete for
//! Scrape to finish: the Source pairs its feed with a Scrape (the feed only
//! carries summaries), or the entry body renders to nothing. Either way the
//! feed's publication date is kept.

use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::dates;
use crate::error::{Error, Result};
use crate::fetch::Page;
use crate::markup::{compress_space, render_fragment};
use crate::models::Item;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    /// `content:encoded`. The deserializer matches on local names.
    #[serde(rename = "encoded")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    content: Option<AtomText>,
    summary: Option<AtomText>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

/// The fields every feed flavour boils down to.
struct Entry {
    title: String,
    link: Option<String>,
    published: Option<String>,
    body: String,
}

impl From<RssItem> for Entry {
    fn from(it: RssItem) -> Self {
        // Fall back to a permalink guid when there is no <link>.
        let link = it
            .link
            .or_else(|| it.guid.filter(|g| g.starts_with("http")));
        Self {
            title: it.title.unwrap_or_default(),
            link,
            published: it.pub_date,
            body: it.content.or(it.description).unwrap_or_default(),
        }
    }
}

impl From<AtomEntry> for Entry {
    fn from(entry: AtomEntry) -> Self {
        let link = entry
            .links
            .iter()
            .find(|l| l.rel.as_deref().is_none_or(|rel| rel == "alternate"))
            .or(entry.links.first())
            .and_then(|l| l.href.clone());
        Self {
            title: entry.title.map(|t| t.value).unwrap_or_default(),
            link,
            published: entry.published.or(entry.updated),
            body: entry
                .content
                .or(entry.summary)
                .map(|t| t.value)
                .unwrap_or_default(),
        }
    }
}

/// Turn a fetched feed into Items for `source`. With `scraped`, entries are
/// left incomplete so Scrape fetches the full page.
pub fn parse(source: &str, page: &Page, scraped: bool) -> Result<Vec<Item>> {
    let entries = parse_entries(&page.text)?;
    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(link) = entry
            .link
            .as_deref()
            .and_then(|l| page.url.join(l.trim()).ok())
        else {
            warn!(source, title = %entry.title, "Feed entry has no usable link; skipping");
            continue;
        };

        let mut item = Item::stub(source, link.to_string());
        item.title = compress_space(&render_fragment(&entry.title));
        item.content = render_fragment(&entry.body);
        item.published_at = entry.published.as_deref().and_then(|raw| feed_date(source, raw));
        item.complete = !scraped && !item.content.is_empty();
        items.push(item);
    }
    debug!(source, feed = %page.url, count = items.len(), "Parsed feed");
    Ok(items)
}

fn parse_entries(text: &str) -> Result<Vec<Entry>> {
    let xml = scrub_html_entities_for_xml(text);
    let rss_err = match from_str::<Rss>(&xml) {
        Ok(rss) => return Ok(rss.channel.items.into_iter().map(Entry::from).collect()),
        Err(e) => e,
    };
    // Any document deserializes as an empty Atom feed, so the root element
    // decides which error is worth reporting.
    let atom_root = xml.contains("<feed");
    match from_str::<AtomFeed>(&xml) {
        Ok(atom) if atom_root || !atom.entries.is_empty() => {
            Ok(atom.entries.into_iter().map(Entry::from).collect())
        }
        Err(atom_err) if atom_root => Err(Error::Parse(format!("bad Atom feed: {atom_err}"))),
        _ => Err(Error::Parse(format!("not an RSS or Atom feed: {rss_err}"))),
    }
}

fn feed_date(source: &str, raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let parsed = DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| dates::parse_fuzzy(raw));
    match parsed {
        Ok(dt) => Some(dt),
        Err(e) => {
            warn!(source, error = %e, "Ignoring unparseable feed date");
            None
        }
    }
}

/// Replace HTML named entities that XML doesn't define.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
        .replace("&pound;", "£")
        .replace("&euro;", "€")
        .replace("&copy;", "©")
}
