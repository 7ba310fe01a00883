//! Embedded libSQL article store.
//!
//! The [`Storage`] struct is the Store Gateway: insert-or-update by URL,
//! paginated streaming reads, keyword search, grouped counts, and purge by age.
//!
//! **Connection rules:**
//! - every operation opens its own connection and drops it on return
//! - writes run inside a transaction that is committed on success and rolled
//!   back on any error
//! - the pipeline only needs [`ArticleStore::upsert`]; the other operations
//!   serve the CLI

mod migrations;

use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, params};
use tracing::{debug, error, info, warn};

use articlepipe_shared::{
    ArticlePipeError, ConflictPolicy, PersistableRecord, Result, StoreStats, StoredArticle,
};

/// Columns selected for every [`StoredArticle`] read, in `row_to_article` order.
const ARTICLE_COLUMNS: &str = "id, title, url, content, source, fetched_at, created_at";

/// The narrow write interface the pipeline depends on.
///
/// `upsert` never fails loudly: a storage-layer error is logged by the
/// implementation and surfaces as `None`.
pub trait ArticleStore: Send + Sync {
    /// Insert `record`, or overwrite title/content/fetched_at of the row with
    /// the same url. Returns the row id.
    fn upsert(&self, record: &PersistableRecord) -> impl Future<Output = Option<i64>> + Send;
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Database,
    path: PathBuf,
    policy: ConflictPolicy,
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    ///
    /// Fails if the parent directory cannot be created or the file cannot be
    /// opened; callers treat this as a fatal setup error.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ArticlePipeError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let storage = Self {
            db,
            path: path.to_path_buf(),
            policy: ConflictPolicy::default(),
        };
        storage.run_migrations().await?;
        info!(path = %path.display(), "article store opened");
        Ok(storage)
    }

    /// Use `policy` for subsequent upserts.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        self.db.connect().map_err(storage_err)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let conn = self.connect()?;
        let current_version = get_schema_version(&conn).await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                conn.execute_batch(migration.sql).await.map_err(|e| {
                    ArticlePipeError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Insert or update `record` keyed by its url, returning the row id.
    ///
    /// On conflict only `title`, `content` and `fetched_at` change; `source`
    /// and `created_at` keep their first-insert values.
    pub async fn try_upsert(&self, record: &PersistableRecord) -> Result<i64> {
        let conn = self.connect()?;
        let tx = conn.transaction().await.map_err(storage_err)?;

        match upsert_in(&tx, record, self.policy).await {
            Ok(id) => {
                tx.commit().await.map_err(storage_err)?;
                Ok(id)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback after failed upsert also failed");
                }
                Err(e)
            }
        }
    }

    /// Delete every article fetched more than `days` days ago.
    /// Returns the number of deleted rows.
    ///
    /// An age reaching past the earliest representable timestamp deletes
    /// nothing.
    pub async fn purge_older_than(&self, days: u32) -> Result<u64> {
        let Some(cutoff) = chrono::TimeDelta::try_days(i64::from(days))
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            info!(days, "purge cutoff out of range, nothing to delete");
            return Ok(0);
        };
        let cutoff = format_timestamp(&cutoff);

        let conn = self.connect()?;
        let tx = conn.transaction().await.map_err(storage_err)?;
        let deleted = match tx
            .execute(
                "DELETE FROM articles WHERE fetched_at < ?1",
                params![cutoff.as_str()],
            )
            .await
        {
            Ok(n) => n,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback after failed purge also failed");
                }
                return Err(storage_err(e));
            }
        };
        tx.commit().await.map_err(storage_err)?;

        info!(days, deleted, "purged old articles");
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Stream articles newest-first, optionally restricted to one source label.
    ///
    /// Rows are decoded lazily as the returned cursor advances.
    pub async fn stream(
        &self,
        source: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<ArticleStream> {
        let conn = self.connect()?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {ARTICLE_COLUMNS} FROM articles
                     WHERE (?1 IS NULL OR source = ?1)
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?2 OFFSET ?3"
                ),
                params![source, limit, offset],
            )
            .await
            .map_err(storage_err)?;

        Ok(ArticleStream { rows, _conn: conn })
    }

    /// Case-insensitive substring search over title and content, newest first.
    ///
    /// `%` and `_` in `keyword` match literally.
    pub async fn search(&self, keyword: &str, limit: u32) -> Result<Vec<StoredArticle>> {
        let pattern = format!("%{}%", escape_like(keyword));
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                &format!(
                    r"SELECT {ARTICLE_COLUMNS} FROM articles
                      WHERE title LIKE ?1 ESCAPE '\' OR content LIKE ?1 ESCAPE '\'
                      ORDER BY created_at DESC, id DESC
                      LIMIT ?2"
                ),
                params![pattern.as_str(), limit],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_article(&row)?);
        }
        debug!(keyword, hits = results.len(), "keyword search");
        Ok(results)
    }

    /// Fetch a single article by its url.
    pub async fn find_by_url(&self, url: &str) -> Result<Option<StoredArticle>> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE url = ?1"),
                params![url],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_to_article(&row)?)),
            None => Ok(None),
        }
    }

    /// Total row count plus counts grouped by source label.
    pub async fn stats(&self) -> Result<StoreStats> {
        let conn = self.connect()?;

        let mut rows = conn
            .query("SELECT COUNT(*) FROM articles", params![])
            .await
            .map_err(storage_err)?;
        let total_articles = match rows.next().await.map_err(storage_err)? {
            Some(row) => row.get::<i64>(0).map_err(storage_err)?,
            None => 0,
        };

        let mut rows = conn
            .query(
                "SELECT COALESCE(source, ''), COUNT(*) FROM articles GROUP BY source",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut stats = StoreStats {
            total_articles: total_articles as u64,
            database_path: self.path.display().to_string(),
            ..StoreStats::default()
        };
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let source: String = row.get(0).map_err(storage_err)?;
            let count: i64 = row.get(1).map_err(storage_err)?;
            *stats.by_source.entry(source).or_default() += count as u64;
        }
        Ok(stats)
    }
}

impl ArticleStore for Storage {
    async fn upsert(&self, record: &PersistableRecord) -> Option<i64> {
        match self.try_upsert(record).await {
            Ok(id) => {
                debug!(id, url = %record.url, "article upserted");
                Some(id)
            }
            Err(e) => {
                error!(url = %record.url, error = %e, "article upsert failed");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ArticleStream
// ---------------------------------------------------------------------------

/// A finite, forward-only cursor over stored articles.
///
/// Holds its own connection; re-reading requires a new [`Storage::stream`] call.
pub struct ArticleStream {
    rows: libsql::Rows,
    _conn: Connection,
}

impl ArticleStream {
    /// Decode the next row, or `None` once the page is exhausted.
    pub async fn next(&mut self) -> Result<Option<StoredArticle>> {
        match self.rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_to_article(&row)?)),
            None => Ok(None),
        }
    }

    /// Drain the remaining rows into a vector.
    pub async fn collect_all(mut self) -> Result<Vec<StoredArticle>> {
        let mut articles = Vec::new();
        while let Some(article) = self.next().await? {
            articles.push(article);
        }
        Ok(articles)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn upsert_in(
    conn: &Connection,
    record: &PersistableRecord,
    policy: ConflictPolicy,
) -> Result<i64> {
    let sql = match policy {
        ConflictPolicy::LastWriteWins => {
            "INSERT INTO articles (title, url, content, source, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(url) DO UPDATE SET
               title = excluded.title,
               content = excluded.content,
               fetched_at = excluded.fetched_at
             RETURNING id"
        }
        ConflictPolicy::NewerFetchWins => {
            "INSERT INTO articles (title, url, content, source, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(url) DO UPDATE SET
               title = excluded.title,
               content = excluded.content,
               fetched_at = excluded.fetched_at
             WHERE articles.fetched_at IS NULL OR excluded.fetched_at >= articles.fetched_at
             RETURNING id"
        }
    };

    let fetched_at = format_timestamp(&record.fetched_at);
    let returned = {
        let mut rows = conn
            .query(
                sql,
                params![
                    record.title.as_str(),
                    record.url.as_str(),
                    record.content.as_str(),
                    record.source.as_str(),
                    fetched_at.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => Some(row.get::<i64>(0).map_err(storage_err)?),
            None => None,
        }
    };

    if let Some(id) = returned {
        return Ok(id);
    }

    // The conflict guard rejected a stale write; report the existing row.
    debug!(url = %record.url, "stale write skipped by newer-fetch-wins policy");
    let mut rows = conn
        .query("SELECT id FROM articles WHERE url = ?1", params![record.url.as_str()])
        .await
        .map_err(storage_err)?;
    match rows.next().await.map_err(storage_err)? {
        Some(row) => row.get::<i64>(0).map_err(storage_err),
        None => Err(ArticlePipeError::Storage(format!(
            "upsert of {} returned no row",
            record.url
        ))),
    }
}

/// Get the current schema version, or 0 if no migrations have been applied.
async fn get_schema_version(conn: &Connection) -> u32 {
    let result = conn
        .query("SELECT MAX(version) FROM schema_migrations", params![])
        .await;

    match result {
        Ok(mut rows) => {
            if let Ok(Some(row)) = rows.next().await {
                row.get::<u32>(0).unwrap_or(0)
            } else {
                0
            }
        }
        Err(_) => 0, // Table doesn't exist yet
    }
}

fn storage_err(e: libsql::Error) -> ArticlePipeError {
    ArticlePipeError::Storage(e.to_string())
}

/// Timestamps are stored as fixed-width RFC 3339 strings so that text
/// comparison orders them chronologically.
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ArticlePipeError::Storage(format!("invalid date {s:?}: {e}")))
}

fn escape_like(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len());
    for c in keyword.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Convert a database row selected with [`ARTICLE_COLUMNS`] to a [`StoredArticle`].
fn row_to_article(row: &libsql::Row) -> Result<StoredArticle> {
    Ok(StoredArticle {
        id: row.get::<i64>(0).map_err(storage_err)?,
        title: row.get::<String>(1).map_err(storage_err)?,
        url: row.get::<String>(2).map_err(storage_err)?,
        content: row.get::<String>(3).unwrap_or_default(),
        source: row.get::<String>(4).ok(),
        fetched_at: match row.get::<String>(5).ok() {
            Some(s) => Some(parse_timestamp(&s)?),
            None => None,
        },
        created_at: {
            let s: String = row.get(6).map_err(storage_err)?;
            parse_timestamp(&s)?
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("ap_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn record(url: &str, title: &str, content: &str, source: &str) -> PersistableRecord {
        PersistableRecord {
            title: title.into(),
            url: url.into(),
            content: content.into(),
            source: source.into(),
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let conn = storage.connect().unwrap();
        assert_eq!(get_schema_version(&conn).await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("ap_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        s1.try_upsert(&record("https://example.com/a", "A", "a", "test"))
            .await
            .unwrap();
        drop(s1);

        let s2 = Storage::open(&tmp).await.expect("second open");
        let conn = s2.connect().unwrap();
        assert_eq!(get_schema_version(&conn).await, 1);
        assert_eq!(s2.stats().await.unwrap().total_articles, 1);
    }

    #[tokio::test]
    async fn open_fails_when_parent_is_a_file() {
        let blocker = std::env::temp_dir().join(format!("ap_blocker_{}", Uuid::now_v7()));
        std::fs::write(&blocker, b"not a directory").unwrap();

        let result = Storage::open(&blocker.join("articles.db")).await;
        assert!(result.is_err());

        let _ = std::fs::remove_file(&blocker);
    }

    #[tokio::test]
    async fn upsert_same_url_keeps_one_row_with_second_values() {
        let storage = test_storage().await;
        let url = "https://example.com/post";

        let first = storage
            .try_upsert(&record(url, "First title", "first body", "blog"))
            .await
            .expect("first upsert");
        let before = storage.find_by_url(url).await.unwrap().unwrap();

        let second = storage
            .try_upsert(&record(url, "Second title", "second body", "other-label"))
            .await
            .expect("second upsert");
        assert_eq!(first, second);

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.total_articles, 1);

        let after = storage.find_by_url(url).await.unwrap().unwrap();
        assert_eq!(after.title, "Second title");
        assert_eq!(after.content, "second body");
        // Source and creation time belong to the first insert.
        assert_eq!(after.source.as_deref(), Some("blog"));
        assert_eq!(after.created_at, before.created_at);
    }

    #[tokio::test]
    async fn trait_upsert_returns_none_on_storage_error() {
        let storage = test_storage().await;
        storage
            .connect()
            .unwrap()
            .execute("DROP TABLE articles", params![])
            .await
            .unwrap();

        let id = ArticleStore::upsert(&storage, &record("https://example.com/x", "X", "x", "t"))
            .await;
        assert!(id.is_none());
    }

    #[tokio::test]
    async fn newer_fetch_wins_skips_stale_write() {
        let storage = test_storage()
            .await
            .with_conflict_policy(ConflictPolicy::NewerFetchWins);
        let url = "https://example.com/race";

        let fresh = record(url, "Fresh", "fresh body", "t");
        let stale = PersistableRecord {
            title: "Stale".into(),
            content: "stale body".into(),
            fetched_at: fresh.fetched_at - chrono::Duration::minutes(5),
            ..fresh.clone()
        };

        let id1 = storage.try_upsert(&fresh).await.unwrap();
        let id2 = storage.try_upsert(&stale).await.unwrap();
        assert_eq!(id1, id2);

        let stored = storage.find_by_url(url).await.unwrap().unwrap();
        assert_eq!(stored.title, "Fresh");
    }

    #[tokio::test]
    async fn stream_filters_by_source_and_paginates_newest_first() {
        let storage = test_storage().await;
        for i in 0..5 {
            let source = if i % 2 == 0 { "even" } else { "odd" };
            storage
                .try_upsert(&record(
                    &format!("https://example.com/{i}"),
                    &format!("Article {i}"),
                    "body",
                    source,
                ))
                .await
                .unwrap();
        }

        let all = storage.stream(None, 100, 0).await.unwrap().collect_all().await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].url, "https://example.com/4");
        assert_eq!(all[4].url, "https://example.com/0");

        let even = storage
            .stream(Some("even"), 100, 0)
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        assert_eq!(even.len(), 3);
        assert!(even.iter().all(|a| a.source.as_deref() == Some("even")));

        let mut page = storage.stream(None, 2, 2).await.unwrap();
        let first = page.next().await.unwrap().unwrap();
        assert_eq!(first.url, "https://example.com/2");
        assert!(page.next().await.unwrap().is_some());
        assert!(page.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_is_case_insensitive_over_title_and_content() {
        let storage = test_storage().await;
        storage
            .try_upsert(&record("https://example.com/1", "Rust Async Guide", "tokio", "t"))
            .await
            .unwrap();
        storage
            .try_upsert(&record("https://example.com/2", "Cooking", "a RUST-free pan", "t"))
            .await
            .unwrap();
        storage
            .try_upsert(&record("https://example.com/3", "Gardening", "soil", "t"))
            .await
            .unwrap();

        let hits = storage.search("rust", 10).await.unwrap();
        let urls: Vec<&str> = hits.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(hits.len(), 2);
        assert!(urls.contains(&"https://example.com/1"));
        assert!(urls.contains(&"https://example.com/2"));

        let limited = storage.search("rust", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn search_treats_wildcards_literally() {
        let storage = test_storage().await;
        storage
            .try_upsert(&record("https://example.com/pct", "100% done", "", "t"))
            .await
            .unwrap();
        storage
            .try_upsert(&record("https://example.com/plain", "1000 done", "", "t"))
            .await
            .unwrap();

        let hits = storage.search("0%", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://example.com/pct");
    }

    #[tokio::test]
    async fn stats_groups_by_source() {
        let storage = test_storage().await;
        for (i, source) in ["quotes", "quotes", "httpbin"].iter().enumerate() {
            storage
                .try_upsert(&record(&format!("https://example.com/{i}"), "T", "c", source))
                .await
                .unwrap();
        }

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.total_articles, 3);
        assert_eq!(stats.by_source.get("quotes"), Some(&2));
        assert_eq!(stats.by_source.get("httpbin"), Some(&1));
        assert!(stats.database_path.ends_with(".db"));
    }

    #[tokio::test]
    async fn purge_removes_only_old_rows() {
        let storage = test_storage().await;
        let old = PersistableRecord {
            fetched_at: Utc::now() - chrono::Duration::days(45),
            ..record("https://example.com/old", "Old", "old", "t")
        };
        storage.try_upsert(&old).await.unwrap();
        storage
            .try_upsert(&record("https://example.com/new", "New", "new", "t"))
            .await
            .unwrap();

        let deleted = storage.purge_older_than(30).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(storage.find_by_url("https://example.com/old").await.unwrap().is_none());
        assert!(storage.find_by_url("https://example.com/new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_with_out_of_range_age_deletes_nothing() {
        let storage = test_storage().await;
        let old = PersistableRecord {
            fetched_at: Utc::now() - chrono::Duration::days(3650),
            ..record("https://example.com/ancient", "Ancient", "a", "t")
        };
        storage.try_upsert(&old).await.unwrap();

        assert_eq!(storage.purge_older_than(100_000_000).await.unwrap(), 0);
        assert_eq!(storage.purge_older_than(u32::MAX).await.unwrap(), 0);
        assert!(storage.find_by_url("https://example.com/ancient").await.unwrap().is_some());
    }

    #[test]
    fn like_escaping() {
        assert_eq!(escape_like("50%_off"), r"50\%\_off");
        assert_eq!(escape_like(r"a\b"), r"a\\b");
        assert_eq!(escape_like("plain"), "plain");
    }
}
