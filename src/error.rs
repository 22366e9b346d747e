//! Error taxonomy shared by the extraction engine, the archive store and the
//! scheduler.
//!
//! Every failure is classified at the point it happens so the scheduler can
//! decide how far it propagates: configuration problems are fatal at startup,
//! everything else only costs the Source or Item it happened to.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid selector, URL or settings supplied when building a Source.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Network failure or a non-2xx response.
    #[error("fetching {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// Malformed markup or feed.
    #[error("parse error: {0}")]
    Parse(String),

    /// A required selector matched nothing, or the extracted item is unusable.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Publication-date text could not be understood.
    #[error("unparseable date: {0:?}")]
    DateParse(String),

    /// Persistence or transaction failure.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl Error {
    pub fn transport(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transport {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Short machine-friendly label, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Transport { .. } => "transport",
            Self::Parse(_) => "parse",
            Self::Extraction(_) => "extraction",
            Self::DateParse(_) => "date_parse",
            Self::Store(_) => "store",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let url = e.url().map(|u| u.to_string()).unwrap_or_default();
        Self::Transport {
            url,
            reason: e.to_string(),
        }
    }
}
