//! Human-readable dry-run listings.

use std::fmt::Write;

use crate::models::Item;

const RULE: &str = "----------------------------------------";

fn published(item: &Item) -> String {
    item.published_at
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "(no date)".to_string())
}

/// Every field of every item, separated by rules.
pub fn full(items: &[Item]) -> String {
    let mut out = String::new();
    for item in items {
        let _ = writeln!(out, "{}", item.title);
        let _ = writeln!(out, "{}", published(item));
        let _ = writeln!(out, "{}", item.permalink);
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", item.content);
        let _ = writeln!(out, "{RULE}");
    }
    let _ = writeln!(out, "{} items", items.len());
    out
}

/// One title line and one indented permalink line per item.
pub fn brief(items: &[Item]) -> String {
    let mut out = String::new();
    for item in items {
        let _ = writeln!(out, "{}", item.title);
        let _ = writeln!(out, "  {}", item.permalink);
    }
    let _ = writeln!(out, "{} items", items.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample() -> Item {
        let mut item = Item::stub("acme", "http://acme.example/pr/1");
        item.title = "Plant opens".into();
        item.content = "Acme opened a plant.".into();
        item.published_at = Some(Utc.with_ymd_and_hms(2013, 11, 28, 10, 15, 0).unwrap());
        item
    }

    #[test]
    fn test_full_listing() {
        let out = full(&[sample()]);
        assert!(out.starts_with("Plant opens\n2013-11-28T10:15:00+00:00\nhttp://acme.example/pr/1\n\n"));
        assert!(out.contains("Acme opened a plant.\n"));
        assert!(out.ends_with("1 items\n"));
    }

    #[test]
    fn test_brief_listing() {
        assert_eq!(
            brief(&[sample()]),
            "Plant opens\n  http://acme.example/pr/1\n1 items\n"
        );
    }
}
