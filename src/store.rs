//! Durable, deduplicating archive of press releases.
//!
//! One SQLite table holds every archived item. `(permalink, source)` is
//! unique, and `id` comes from `AUTOINCREMENT` so sequence ids only ever grow,
//! even if old rows are pruned later. Every archived row is an [`Event`];
//! per-source replay is an id-ordered range scan.
//!
//! # Operations
//!
//! - [`Store::which_are_new`]: filter candidates down to unarchived ones
//! - [`Store::stash`]: insert one item in its own transaction
//! - [`Store::replay`]: stream a source's events after a checkpoint
//! - [`Store::latest_id`]: a source's high-water mark

use std::path::Path;
use std::time::Duration;

use async_stream::try_stream;
use chrono::{DateTime, Utc};
use futures::Stream;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::FromRow;
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::models::{Event, Item, ITEM_TYPE};

/// Rows fetched per replay query.
const REPLAY_BATCH: i64 = 256;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS press_release (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        source TEXT NOT NULL,
        permalink TEXT NOT NULL,
        published TEXT NOT NULL,
        content TEXT NOT NULL,
        UNIQUE (permalink, source)
    )",
    "CREATE INDEX IF NOT EXISTS press_release_source_id ON press_release (source, id)",
];

#[derive(Debug, FromRow)]
struct Row {
    id: i64,
    title: String,
    source: String,
    permalink: String,
    published: DateTime<Utc>,
    content: String,
}

impl From<Row> for Event {
    fn from(row: Row) -> Self {
        Event {
            id: row.id,
            item: Item {
                title: row.title,
                source: row.source,
                permalink: row.permalink,
                published_at: Some(row.published),
                content: row.content,
                kind: ITEM_TYPE.to_string(),
                complete: true,
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the archive at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        info!(path = %path.display(), "Opened archive");
        Ok(Self { pool })
    }

    /// The candidates, in input order, whose `(permalink, source)` is not yet
    /// archived.
    #[instrument(level = "debug", skip_all, fields(candidates = candidates.len()))]
    pub async fn which_are_new(&self, candidates: Vec<Item>) -> Result<Vec<Item>> {
        let mut fresh = Vec::with_capacity(candidates.len());
        for item in candidates {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT id FROM press_release WHERE permalink = ? AND source = ?")
                    .bind(&item.permalink)
                    .bind(&item.source)
                    .fetch_optional(&self.pool)
                    .await?;
            if exists.is_none() {
                fresh.push(item);
            }
        }
        debug!(new = fresh.len(), "Filtered archived items");
        Ok(fresh)
    }

    /// Archive `item`, assigning it the next event id.
    ///
    /// The insert runs in one transaction and is a no-op when the
    /// `(permalink, source)` pair is already archived. A missing publication
    /// date becomes the stash time.
    ///
    /// # Arguments
    ///
    /// * `item` - A completed item. Its content must not be blank.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(event))` - Newly archived, with its id
    /// * `Ok(None)` - Already archived; nothing changed
    /// * `Err(Error::Extraction)` - Blank content
    /// * `Err(Error::Store)` - Database failure
    ///
    /// # Examples
    ///
    /// ```ignore
    /// if let Some(event) = store.stash(&item).await? {
    ///     broker.publish(&event);
    /// }
    /// ```
    pub async fn stash(&self, item: &Item) -> Result<Option<Event>> {
        if item.content.trim().is_empty() {
            return Err(Error::Extraction(format!(
                "refusing to archive {} with empty content",
                item.permalink
            )));
        }
        let published = item.published_at.unwrap_or_else(Utc::now);

        let mut tx = self.pool.begin().await?;
        let id: Option<i64> = sqlx::query_scalar(
            "INSERT INTO press_release (title, source, permalink, published, content)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (permalink, source) DO NOTHING
             RETURNING id",
        )
        .bind(&item.title)
        .bind(&item.source)
        .bind(&item.permalink)
        .bind(published)
        .bind(&item.content)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(id.map(|id| {
            let mut item = item.clone();
            item.published_at = Some(published);
            item.kind = ITEM_TYPE.to_string();
            item.complete = true;
            Event { id, item }
        }))
    }

    /// Every archived Event for `source` with id greater than `after`, in
    /// ascending id order.
    ///
    /// Rows are read in keyset-paginated batches; rows committed while the
    /// stream is running may or may not be included.
    pub fn replay(
        &self,
        source: &str,
        after: Option<i64>,
    ) -> impl Stream<Item = Result<Event>> + Send + use<> {
        let pool = self.pool.clone();
        let source = source.to_string();
        try_stream! {
            let mut last = after.unwrap_or(0);
            loop {
                let rows: Vec<Row> = sqlx::query_as(
                    "SELECT id, title, source, permalink, published, content
                     FROM press_release
                     WHERE source = ? AND id > ?
                     ORDER BY id
                     LIMIT ?",
                )
                .bind(&source)
                .bind(last)
                .bind(REPLAY_BATCH)
                .fetch_all(&pool)
                .await?;

                let exhausted = (rows.len() as i64) < REPLAY_BATCH;
                for row in rows {
                    last = row.id;
                    yield Event::from(row);
                }
                if exhausted {
                    break;
                }
            }
        }
    }

    /// Highest archived id for `source`, 0 if it has none.
    pub async fn latest_id(&self, source: &str) -> Result<i64> {
        let id: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) FROM press_release WHERE source = ?")
                .bind(source)
                .fetch_one(&self.pool)
                .await?;
        Ok(id)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tempfile::TempDir;

    /// A store in a throwaway directory. Keep the `TempDir` alive.
    pub async fn temp_store() -> (Store, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("archive.db")).await.unwrap();
        (store, dir)
    }

    pub fn item(source: &str, n: u32) -> Item {
        let mut item = Item::stub(source, format!("http://{source}.example/pr/{n}"));
        item.title = format!("Release {n}");
        item.content = format!("Body of release {n}.");
        item.complete = true;
        item
    }
}
