//! Dry-run output for `--test`.
//!
//! # Formats
//!
//! - [`Format::Full`]: title, date, permalink and text of every item
//! - [`Format::Brief`]: title and permalink only
//! - [`Format::Json`]: a JSON array of item payloads, as subscribers see them

pub mod json;
pub mod text;

use crate::models::Item;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Full,
    Brief,
    Json,
}

pub fn render(items: &[Item], format: Format) -> serde_json::Result<String> {
    match format {
        Format::Full => Ok(text::full(items)),
        Format::Brief => Ok(text::brief(items)),
        Format::Json => json::items_to_json(items),
    }
}
