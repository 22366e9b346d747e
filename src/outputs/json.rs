//! JSON rendering of scraped items.

use crate::models::Item;

/// Pretty-printed JSON array using the subscriber payload field names.
pub fn items_to_json(items: &[Item]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_items_to_json() {
        let mut item = Item::stub("acme", "http://acme.example/pr/1");
        item.title = "Hello".into();
        item.content = "Body".into();
        let json = items_to_json(&[item]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["title"], "Hello");
        assert_eq!(parsed[0]["text"], "Body");
        assert_eq!(parsed[0]["published"], serde_json::Value::Null);
    }

    #[test]
    fn test_empty_list() {
        assert_eq!(items_to_json(&[]).unwrap(), "[]");
    }
}
