//! Network access for Discover and Scrape.
//!
//! Everything that talks to a remote site goes through the [`Fetcher`]
//! capability. The production [`HttpFetcher`] wraps one shared
//! `reqwest::Client`; tests swap in an in-memory implementation that serves
//! canned pages.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument};
use url::Url;

use crate::charset;
use crate::error::{Error, Result};

/// A fetched, UTF-8 decoded page.
#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL after redirects. Relative links resolve against this.
    pub url: Url,
    pub text: String,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Page>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn fetch(&self, url: &Url) -> Result<Page> {
        let resp = self.client.get(url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::transport(url.as_str(), format!("HTTP {status}")));
        }

        let final_url = resp.url().clone();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = resp.bytes().await?;
        debug!(bytes = bytes.len(), final_url = %final_url, "Fetched page");

        Ok(Page {
            url: final_url,
            text: charset::decode(&bytes, content_type.as_deref()),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Canned-page fetcher for unit tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MapFetcher {
        pages: Mutex<HashMap<String, String>>,
        redirects: Mutex<HashMap<String, String>>,
        hits: Mutex<Vec<String>>,
    }

    impl MapFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(self, url: &str, body: &str) -> Self {
            self.insert(url, body);
            self
        }

        pub fn insert(&self, url: &str, body: &str) {
            self.pages
                .lock()
                .unwrap()
                .insert(url.to_string(), body.to_string());
        }

        /// Answer requests for `from` with the page at `to`, as a redirect
        /// would.
        pub fn redirect(self, from: &str, to: &str) -> Self {
            self.redirects
                .lock()
                .unwrap()
                .insert(from.to_string(), to.to_string());
            self
        }

        /// Every URL requested so far, in order.
        pub fn hits(&self) -> Vec<String> {
            self.hits.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetcher for MapFetcher {
        async fn fetch(&self, url: &Url) -> Result<Page> {
            self.hits.lock().unwrap().push(url.to_string());
            let target = match self.redirects.lock().unwrap().get(url.as_str()) {
                Some(to) => Url::parse(to).unwrap(),
                None => url.clone(),
            };
            let body = self.pages.lock().unwrap().get(target.as_str()).cloned();
            match body {
                Some(text) => Ok(Page { url: target, text }),
                None => Err(Error::transport(url.as_str(), "HTTP 404 Not Found")),
            }
        }
    }
}
