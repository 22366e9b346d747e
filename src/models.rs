//! Data models for press releases and the events that carry them.
//!
//! - [`Item`]: one press release, possibly incomplete while it moves through
//!   the pipeline
//! - [`Event`]: an archived [`Item`] together with its sequence id
//!
//! The serialized field names (`published`, `text`, `type`) are the payload
//! shape subscribers see on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Type tag carried by every archived item.
pub const ITEM_TYPE: &str = "press release";

/// Event name used on the subscription stream.
pub const EVENT_TYPE: &str = "press_release";

/// A press release.
///
/// `(permalink, source)` is the identity key. Discover may hand out items with
/// only those two fields set; Scrape fills in the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub title: String,
    pub source: String,
    pub permalink: String,
    /// Publication time. `None` until a source supplies one; the pipeline
    /// falls back to ingestion time only if it is still unset after Scrape.
    #[serde(rename = "published")]
    pub published_at: Option<DateTime<Utc>>,
    /// Normalized plain text.
    #[serde(rename = "text")]
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Scratch flag: true once every field is populated. Never persisted.
    #[serde(skip)]
    pub complete: bool,
}

impl Item {
    /// An incomplete item, as emitted by link-listing discovery.
    pub fn stub(source: impl Into<String>, permalink: impl Into<String>) -> Self {
        Self {
            title: String::new(),
            source: source.into(),
            permalink: permalink.into(),
            published_at: None,
            content: String::new(),
            kind: ITEM_TYPE.to_string(),
            complete: false,
        }
    }
}

/// An archived item with its store-assigned sequence id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: i64,
    pub item: Item,
}

impl Event {
    pub fn topic(&self) -> &str {
        &self.item.source
    }

    /// JSON payload as sent to subscribers.
    pub fn data(&self) -> String {
        // Item only holds strings and a timestamp, serialization cannot fail.
        serde_json::to_string(&self.item).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stub_is_incomplete() {
        let item = Item::stub("tesco", "http://example.com/pr/1");
        assert!(!item.complete);
        assert_eq!(item.kind, ITEM_TYPE);
        assert!(item.title.is_empty());
        assert!(item.published_at.is_none());
    }

    #[test]
    fn test_payload_field_names() {
        let mut item = Item::stub("tesco", "http://example.com/pr/1");
        item.title = "Prices cut".into();
        item.content = "Body".into();
        item.published_at = Some(Utc.with_ymd_and_hms(2013, 11, 28, 3, 34, 56).unwrap());
        item.complete = true;

        let ev = Event { id: 7, item };
        let json: serde_json::Value = serde_json::from_str(&ev.data()).unwrap();
        assert_eq!(json["title"], "Prices cut");
        assert_eq!(json["source"], "tesco");
        assert_eq!(json["permalink"], "http://example.com/pr/1");
        assert_eq!(json["published"], "2013-11-28T03:34:56Z");
        assert_eq!(json["text"], "Body");
        assert_eq!(json["type"], "press release");
        assert!(json.get("complete").is_none());
        assert_eq!(ev.topic(), "tesco");
    }
}
