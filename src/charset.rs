//! Character encoding detection and transcoding to UTF-8.
//!
//! Run once per fetched page, before it reaches the HTML or feed parser.
//! Evidence is weighed in this order:
//!
//! 1. byte-order mark
//! 2. `charset=` in the HTTP `Content-Type` header
//! 3. `<meta charset>`, `<meta http-equiv="Content-Type">` or `<?xml encoding?>`
//!    near the start of the document
//! 4. UTF-8 if the bytes are valid UTF-8, otherwise Windows-1252

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use tracing::debug;

/// How far into the document to look for an in-band declaration.
const SNIFF_LEN: usize = 1024;

static HEADER_CHARSET: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r#"(?i)charset\s*=\s*["']?([A-Za-z0-9._:\-]+)"#).unwrap());

static META_CHARSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?\s*([A-Za-z0-9._:\-]+)"#).unwrap()
});

static XML_ENCODING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<\?xml[^>]+encoding\s*=\s*["']([A-Za-z0-9._:\-]+)["']"#).unwrap()
});

/// Pick the encoding of `bytes`, given the `Content-Type` header if any.
pub fn detect(bytes: &[u8], content_type: Option<&str>) -> &'static Encoding {
    if let Some((enc, _)) = Encoding::for_bom(bytes) {
        return enc;
    }

    if let Some(enc) = content_type.and_then(from_header) {
        return enc;
    }

    let head = &bytes[..bytes.len().min(SNIFF_LEN)];
    for pattern in [&*META_CHARSET, &*XML_ENCODING] {
        if let Some(enc) = pattern
            .captures(head)
            .and_then(|caps| caps.get(1))
            .and_then(|label| Encoding::for_label(label.as_bytes()))
        {
            return enc;
        }
    }

    if std::str::from_utf8(bytes).is_ok() {
        UTF_8
    } else {
        WINDOWS_1252
    }
}

fn from_header(content_type: &str) -> Option<&'static Encoding> {
    let label = HEADER_CHARSET.captures(content_type)?.get(1)?;
    Encoding::for_label(label.as_str().as_bytes())
}

/// Detect the encoding of `bytes` and return them as UTF-8 text.
pub fn decode(bytes: &[u8], content_type: Option<&str>) -> String {
    let encoding = detect(bytes, content_type);
    let (text, used, had_errors) = encoding.decode(bytes);
    if used != UTF_8 || had_errors {
        debug!(encoding = used.name(), had_errors, "Transcoded page to UTF-8");
    }
    text.into_owned()
}
