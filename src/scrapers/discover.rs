//! Discover strategies: single index page, paginated index, feeds.

use std::collections::HashSet;

use itertools::Itertools;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::DiscoverConfig;
use crate::error::{Error, Result};
use crate::fetch::{Fetcher, Page};
use crate::markup::get_attr;
use crate::models::Item;

use super::feed;

/// Where to find candidate links on an index page.
#[derive(Debug)]
pub struct LinkListing {
    pub url: Url,
    pub links: Selector,
    /// Keep links pointing at other hosts.
    pub allow_host_change: bool,
}

#[derive(Debug)]
pub enum Discover {
    Page(LinkListing),
    Paginated {
        listing: LinkListing,
        next: Selector,
        max_pages: usize,
    },
    Feed(Vec<Url>),
}

pub fn compile_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::Config(format!("bad selector {css:?}: {e}")))
}

pub fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::Config(format!("bad url {raw:?}: {e}")))
}

impl Discover {
    pub fn from_config(def: &DiscoverConfig) -> Result<Self> {
        let discover = match def {
            DiscoverConfig::Page {
                url,
                links,
                allow_host_change,
            } => Self::Page(LinkListing {
                url: parse_url(url)?,
                links: compile_selector(links)?,
                allow_host_change: *allow_host_change,
            }),
            DiscoverConfig::Paginated {
                url,
                links,
                next,
                allow_host_change,
                max_pages,
            } => {
                if *max_pages == 0 {
                    return Err(Error::Config("max_pages must be at least 1".into()));
                }
                Self::Paginated {
                    listing: LinkListing {
                        url: parse_url(url)?,
                        links: compile_selector(links)?,
                        allow_host_change: *allow_host_change,
                    },
                    next: compile_selector(next)?,
                    max_pages: *max_pages,
                }
            }
            DiscoverConfig::Feed { urls } => {
                if urls.is_empty() {
                    return Err(Error::Config("feed discover needs at least one url".into()));
                }
                Self::Feed(urls.iter().map(|u| parse_url(u)).collect::<Result<_>>()?)
            }
        };
        Ok(discover)
    }

    /// Run this strategy for `source`. `scraped` tells feed discovery whether
    /// a Scrape step will complete its entries.
    #[instrument(level = "info", skip_all, fields(%source))]
    pub async fn run(&self, source: &str, fetcher: &dyn Fetcher, scraped: bool) -> Result<Vec<Item>> {
        let items = match self {
            Self::Page(listing) => {
                let page = fetcher.fetch(&listing.url).await?;
                let (links, _) = listing.extract(&page, None);
                stubs(source, links)
            }
            Self::Paginated {
                listing,
                next,
                max_pages,
            } => {
                let links = paginate(listing, next, *max_pages, fetcher).await?;
                stubs(source, links)
            }
            Self::Feed(urls) => {
                let mut items = Vec::new();
                for url in urls {
                    let page = fetcher.fetch(url).await?;
                    items.extend(feed::parse(source, &page, scraped)?);
                }
                items
            }
        };
        info!(source, count = items.len(), "Discovered items");
        Ok(items)
    }
}

fn stubs(source: &str, links: Vec<Url>) -> Vec<Item> {
    links
        .into_iter()
        .unique()
        .map(|url| Item::stub(source, url.to_string()))
        .collect()
}

async fn paginate(
    listing: &LinkListing,
    next_selector: &Selector,
    max_pages: usize,
    fetcher: &dyn Fetcher,
) -> Result<Vec<Url>> {
    // Requested and post-redirect URLs, for loop detection only.
    let mut visited: HashSet<Url> = HashSet::new();
    let mut fetched = 0;
    let mut links = Vec::new();
    let mut url = listing.url.clone();

    loop {
        visited.insert(url.clone());
        let page = fetcher.fetch(&url).await?;
        fetched += 1;
        visited.insert(page.url.clone());

        let (found, next) = listing.extract(&page, Some(next_selector));
        debug!(page = %page.url, links = found.len(), "Indexed page");
        links.extend(found);

        match next {
            None => break,
            Some(next) if visited.contains(&next) => {
                warn!(%next, "Pagination loops back to a visited page; stopping");
                break;
            }
            Some(_) if fetched >= max_pages => {
                warn!(max_pages, "Pagination limit reached; stopping");
                break;
            }
            Some(next) => url = next,
        }
    }
    Ok(links)
}

impl LinkListing {
    /// Absolute links on `page`, plus the resolved "next page" link when a
    /// selector for one is given. Parsing stays in this synchronous helper so
    /// the document never lives across an await.
    fn extract(&self, page: &Page, next: Option<&Selector>) -> (Vec<Url>, Option<Url>) {
        let doc = Html::parse_document(&page.text);
        let base = &page.url;

        let links = doc
            .select(&self.links)
            .filter_map(|el| resolve(base, get_attr(el, "href")))
            .filter(|link| self.allow_host_change || link.host_str() == base.host_str())
            .unique()
            .collect();

        let next = next.and_then(|sel| {
            doc.select(sel)
                .find_map(|el| resolve(base, get_attr(el, "href")))
        });

        (links, next)
    }
}

fn resolve(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    match base.join(href) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
        Ok(url) => {
            debug!(%url, "Skipping non-http link");
            None
        }
        Err(e) => {
            debug!(href, error = %e, "Skipping unresolvable link");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::MapFetcher;

    fn listing(url: &str, links: &str, allow_host_change: bool) -> LinkListing {
        LinkListing {
            url: Url::parse(url).unwrap(),
            links: compile_selector(links).unwrap(),
            allow_host_change,
        }
    }

    fn permalinks(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.permalink.as_str()).collect()
    }

    #[tokio::test]
    async fn test_single_page_resolves_and_filters_hosts() {
        let html = r#"
            <div class="news">
              <a href="/pr/1">One</a>
              <a href="pr/2">Two</a>
              <a href="/pr/1">One again</a>
              <a href="http://elsewhere.example/pr/3">Three</a>
              <a href="mailto:press@acme.example">Mail</a>
              <a>No href</a>
            </div>
            <a href="/not-news">outside</a>"#;
        let fetcher = MapFetcher::new().with("http://acme.example/media/", html);

        let discover = Discover::Page(listing("http://acme.example/media/", ".news a", false));
        let items = discover.run("acme", &fetcher, true).await.unwrap();
        assert_eq!(
            permalinks(&items),
            ["http://acme.example/pr/1", "http://acme.example/media/pr/2"]
        );
        assert!(items.iter().all(|i| !i.complete && i.source == "acme"));

        let discover = Discover::Page(listing("http://acme.example/media/", ".news a", true));
        let items = discover.run("acme", &fetcher, true).await.unwrap();
        assert_eq!(items.len(), 3);
    }

    #[tokio::test]
    async fn test_single_page_fetch_failure_propagates() {
        let fetcher = MapFetcher::new();
        let discover = Discover::Page(listing("http://acme.example/", "a", false));
        let err = discover.run("acme", &fetcher, true).await.unwrap_err();
        assert_eq!(err.kind(), "transport");
    }

    #[tokio::test]
    async fn test_paginated_follows_next_until_absent() {
        let fetcher = MapFetcher::new()
            .with(
                "http://acme.example/news?page=1",
                r#"<a class="pr" href="/pr/1">1</a><a class="next" href="?page=2">next</a>"#,
            )
            .with(
                "http://acme.example/news?page=2",
                r#"<a class="pr" href="/pr/2">2</a><a class="next" href="/news?page=3">next</a>"#,
            )
            .with(
                "http://acme.example/news?page=3",
                r#"<a class="pr" href="/pr/3">3</a>"#,
            );

        let discover = Discover::Paginated {
            listing: listing("http://acme.example/news?page=1", "a.pr", false),
            next: compile_selector("a.next").unwrap(),
            max_pages: 50,
        };
        let items = discover.run("acme", &fetcher, true).await.unwrap();
        assert_eq!(fetcher.hits().len(), 3);
        assert_eq!(
            permalinks(&items),
            [
                "http://acme.example/pr/1",
                "http://acme.example/pr/2",
                "http://acme.example/pr/3"
            ]
        );
    }

    #[tokio::test]
    async fn test_paginated_stops_on_cycle_and_limit() {
        let fetcher = MapFetcher::new()
            .with(
                "http://acme.example/a",
                r#"<a class="pr" href="/pr/1">1</a><a class="next" href="/b">next</a>"#,
            )
            .with(
                "http://acme.example/b",
                r#"<a class="pr" href="/pr/1">1</a><a class="next" href="/a">next</a>"#,
            );
        let discover = Discover::Paginated {
            listing: listing("http://acme.example/a", "a.pr", false),
            next: compile_selector("a.next").unwrap(),
            max_pages: 50,
        };
        let items = discover.run("acme", &fetcher, true).await.unwrap();
        assert_eq!(fetcher.hits().len(), 2);
        assert_eq!(permalinks(&items), ["http://acme.example/pr/1"]);

        let fetcher = MapFetcher::new();
        for n in 1..=10 {
            fetcher.insert(
                &format!("http://acme.example/p{n}"),
                &format!(r#"<a class="next" href="/p{}">next</a>"#, n + 1),
            );
        }
        let discover = Discover::Paginated {
            listing: listing("http://acme.example/p1", "a.pr", false),
            next: compile_selector("a.next").unwrap(),
            max_pages: 4,
        };
        discover.run("acme", &fetcher, true).await.unwrap();
        assert_eq!(fetcher.hits().len(), 4);
    }

    #[tokio::test]
    async fn test_paginated_limit_counts_redirected_pages_once() {
        // Every http page redirects to its https twin.
        let mut fetcher = MapFetcher::new();
        for n in 1..=10 {
            fetcher = fetcher
                .redirect(
                    &format!("http://acme.example/p{n}"),
                    &format!("https://acme.example/p{n}"),
                )
                .with(
                    &format!("https://acme.example/p{n}"),
                    &format!(
                        r#"<a class="pr" href="/pr/{n}">{n}</a><a class="next" href="http://acme.example/p{}">next</a>"#,
                        n + 1
                    ),
                );
        }
        let discover = Discover::Paginated {
            listing: listing("http://acme.example/p1", "a.pr", false),
            next: compile_selector("a.next").unwrap(),
            max_pages: 4,
        };
        let items = discover.run("acme", &fetcher, true).await.unwrap();
        assert_eq!(fetcher.hits().len(), 4);
        assert_eq!(
            permalinks(&items),
            [
                "https://acme.example/pr/1",
                "https://acme.example/pr/2",
                "https://acme.example/pr/3",
                "https://acme.example/pr/4"
            ]
        );
    }

    #[test]
    fn test_from_config_validates() {
        let bad = DiscoverConfig::Paginated {
            url: "http://example.com/".into(),
            links: "a".into(),
            next: "a:nth-child(".into(),
            allow_host_change: false,
            max_pages: 5,
        };
        assert!(matches!(Discover::from_config(&bad), Err(Error::Config(_))));

        let bad = DiscoverConfig::Page {
            url: "/relative/only".into(),
            links: "a".into(),
            allow_host_change: false,
        };
        assert!(matches!(Discover::from_config(&bad), Err(Error::Config(_))));

        let empty = DiscoverConfig::Feed { urls: vec![] };
        assert!(matches!(Discover::from_config(&empty), Err(Error::Config(_))));
    }
}
