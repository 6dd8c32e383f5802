//! Embedded SQLite adapter.
//!
//! Metadata lives in real columns instead of a serialized blob, so the
//! table is inspectable with any SQLite tool. First open runs the schema
//! forward (create-table-if-missing plus a `user_version` bump) before the
//! self-test; the configured table name is substituted into the bundled
//! query files.

use crate::adapter::{self, AdapterSettings, StorageAdapter};
use crate::entry::CacheEntry;
use crate::error::{Error, ErrorKind, Result};
use crate::key;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::PathBuf;
use std::sync::OnceLock;
use tokio::sync::OnceCell;
use webstash_config::AdapterKind;

static SUPPORTED: OnceLock<bool> = OnceLock::new();

/// Bumped whenever a schema step is appended to `migrate`.
const SCHEMA_USER_VERSION: i64 = 2;
// We want to make use of that async-goodness, so... 5-ish?
const MAX_CONNECTIONS: u32 = 5;

#[derive(sqlx::FromRow)]
struct EntryRow {
    key: String,
    content: String,
    last_modified: i64,
    version: f64,
    lifetime: i64,
    expires_at: i64,
}

impl From<EntryRow> for CacheEntry {
    fn from(row: EntryRow) -> Self {
        Self {
            key: row.key,
            content: row.content,
            last_modified: row.last_modified,
            version: row.version,
            lifetime: row.lifetime,
            expires_at: row.expires_at,
        }
    }
}

pub struct RelationalAdapter {
    settings: AdapterSettings,
    db_path: Option<PathBuf>,
    sql_create: String,
    sql_index: String,
    sql_upsert: String,
    sql_select: String,
    sql_delete: String,
    pool: OnceCell<SqlitePool>,
    ready: OnceCell<()>,
}

impl RelationalAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        let db_path = Some(settings.root.join(&settings.name).join("cache.db"));
        Self::with_path(settings, db_path)
    }

    /// An in-memory database (useful for testing).
    ///
    /// Note:
    /// - In-memory databases are destroyed when the pool closes.
    /// - Do NOT apply `#[cfg(test)]` so that other crates can also use
    ///   this in their tests.
    pub fn in_memory(settings: AdapterSettings) -> Self {
        Self::with_path(settings, None)
    }

    fn with_path(settings: AdapterSettings, db_path: Option<PathBuf>) -> Self {
        // Table names can't be bound as parameters, so they are substituted
        // into the query files up front.
        let table = settings.table.clone();
        let sql = |raw: &str| raw.replace("{table}", &table);
        Self {
            db_path,
            sql_create: sql(include_str!("../../queries/create_entries.sql")),
            sql_index: sql(include_str!("../../queries/create_expiry_index.sql")),
            sql_upsert: sql(include_str!("../../queries/upsert_entry.sql")),
            sql_select: sql(include_str!("../../queries/select_entry.sql")),
            sql_delete: sql(include_str!("../../queries/delete_entry.sql")),
            settings,
            pool: OnceCell::new(),
            ready: OnceCell::new(),
        }
    }

    fn pool(&self) -> Result<&SqlitePool> {
        self.pool.get().ok_or_raise(|| ErrorKind::Backend("adapter not opened".to_string()))
    }

    async fn connect(&self) -> std::result::Result<SqlitePool, Error> {
        let options = match &self.db_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
                }
                SqliteConnectOptions::new().filename(path).create_if_missing(true)
            },
            None => SqliteConnectOptions::new().filename(":memory:"),
        }
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_millis(1500));
        // In-memory databases must be limited to one connection, otherwise
        // parallel connections see different (empty) databases.
        let max = if self.db_path.is_some() { MAX_CONNECTIONS } else { 1 };
        SqlitePoolOptions::new()
            .max_connections(max)
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    /// Walk the schema forward step by step, then record the version.
    /// Re-running against an up-to-date database is a no-op.
    async fn migrate(&self, pool: &SqlitePool) -> Result<()> {
        let (version,): (i64,) =
            sqlx::query_as("PRAGMA user_version").fetch_one(pool).await.or_raise(|| ErrorKind::Database)?;
        if version < 1 {
            sqlx::query(&self.sql_create).execute(pool).await.or_raise(|| ErrorKind::Database)?;
        }
        if version < 2 {
            sqlx::query(&self.sql_index).execute(pool).await.or_raise(|| ErrorKind::Database)?;
        }
        if version < SCHEMA_USER_VERSION {
            // PRAGMA values can't be bound either.
            sqlx::query(&format!("PRAGMA user_version = {SCHEMA_USER_VERSION}"))
                .execute(pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
            tracing::debug!(from = version, to = SCHEMA_USER_VERSION, "cache schema migrated");
        }
        Ok(())
    }

    async fn setup(&self) -> Result<()> {
        let pool = self.pool.get_or_try_init(|| self.connect()).await?;
        self.migrate(pool).await?;
        adapter::self_test(self, &self.settings.sentinel_key).await
    }
}

#[async_trait]
impl StorageAdapter for RelationalAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Relational
    }

    fn is_supported(&self) -> bool {
        // The engine is compiled in; the only thing that can be missing is
        // somewhere to put the database file.
        *SUPPORTED.get_or_init(adapter::scratch_writable)
    }

    async fn open(&self) -> Result<()> {
        self.ready.get_or_try_init(|| self.setup()).await?;
        Ok(())
    }

    async fn create(&self, entry: &CacheEntry) -> Result<()> {
        key::validate(&entry.key)?;
        sqlx::query(&self.sql_upsert)
            .bind(&entry.key)
            .bind(&entry.content)
            .bind(entry.last_modified)
            .bind(entry.version)
            .bind(entry.lifetime)
            .bind(entry.expires_at)
            .execute(self.pool()?)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<CacheEntry>> {
        key::validate(key)?;
        let row: Option<EntryRow> = sqlx::query_as(&self.sql_select)
            .bind(key)
            .fetch_optional(self.pool()?)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(row.map(CacheEntry::from))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        key::validate(key)?;
        sqlx::query(&self.sql_delete).bind(key).execute(self.pool()?).await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }
}
