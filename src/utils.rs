//! Small helpers shared by the binary and the pipeline.
//!
//! - String truncation for log fields
//! - Startup validation of the archive location

use std::fs as stdfs;
use std::path::Path;

use tokio::fs;
use tracing::{info, instrument};

use crate::error::{Error, Result};

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (on a character boundary) with
/// an ellipsis and the number of dropped bytes appended.
///
/// # Arguments
///
/// * `s` - The string to potentially truncate
/// * `max` - Maximum number of bytes to keep
///
/// # Returns
///
/// `s` unchanged if it fits, otherwise the cut prefix with `"…(+N bytes)"`
/// appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(+{} bytes)", &s[..end], s.len() - end)
}

/// Make sure the directory that will hold the archive file exists and is
/// writable, so a bad `--database` fails before anything is fetched.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::Config(format!("cannot create {}: {e}", dir.display())))?;

    // Try a small sync write using std fs (simpler error surface)
    let marker = dir.join("..__write_check__");
    match stdfs::File::create(&marker) {
        Ok(_) => {
            let _ = stdfs::remove_file(&marker);
            info!("Archive directory is writable");
            Ok(())
        }
        Err(e) => Err(Error::Config(format!("{} is not writable: {e}", dir.display()))),
    }
}
