//! SQLite table store.

use super::TableStore;
use crate::error::{ErrorKind, Result};
use crate::models::{IndexKind, InsertMode, Key, RawRow, Selector, TableOptions, validate_table_name};
use async_trait::async_trait;
use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{FromRow, Sqlite};
use std::path::Path;
use tracing::{debug, instrument, warn};

// Index builds are single-writer and query serving is read-mostly.
const MAX_CONNECTIONS: u32 = 4;

type Query<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Tuning knobs for a SQLite store.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOptions {
    /// Shrink the page cache and disable memory mapping.
    pub low_memory: bool,
}

impl StoreOptions {
    fn cache_size_kib(&self) -> i64 {
        if self.low_memory { 1024 } else { 8192 }
    }

    fn mmap_size(&self) -> i64 {
        if self.low_memory { 0 } else { 33_554_432 }
    }
}

/// Table store backed by a SQLite database.
///
/// Every table has the columns `id INTEGER PRIMARY KEY`, `tkey TEXT`,
/// `nkey INTEGER`, `flag INTEGER` and `data TEXT`. Text keys go to `tkey`,
/// numeric keys to `nkey`; a unique index is created over whichever column
/// the table was declared with.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(FromRow)]
struct SqlRow {
    id: i64,
    tkey: Option<String>,
    nkey: Option<i64>,
    flag: bool,
    data: String,
}

#[derive(FromRow)]
struct SqlKey {
    id: i64,
    tkey: Option<String>,
    nkey: Option<i64>,
}

enum Bind {
    Text(String),
    Int(i64),
}

/// A compiled selector: `WHERE ... ORDER BY ... LIMIT ...` plus its arguments.
struct Clause {
    sql: String,
    binds: Vec<Bind>,
}

impl SqliteStore {
    async fn new(options: SqliteConnectOptions, store_options: StoreOptions, max: Option<u32>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // Apply the query-based PRAGMAs to EVERY connection the pool
            // opens, not only the first one.
            .after_connect(move |conn, _meta| {
                Box::pin(async move { Self::apply_pragmas(conn, store_options).await })
            })
            .max_connections(max.unwrap_or(MAX_CONNECTIONS))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(Self { pool })
    }

    /// Open (or create) the store at the given path.
    pub async fn connect(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), low_memory = options.low_memory, "opening sqlite store");
        let connect = Self::base_options().filename(path).create_if_missing(true);
        Self::new(connect, options, None).await
    }

    /// Connect to an in-memory database (useful for testing).
    ///
    /// Note:
    /// - In-memory databases are destroyed when the connection closes.
    /// - Do NOT apply `#[cfg(test)]` so that other crates can also use this in their tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        // Parallel connections to `:memory:` would each see their own
        // database, so the pool is limited to one connection.
        Self::new(options, StoreOptions::default(), Some(1)).await
    }

    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            // Readers may wait on the single build writer for a while.
            .busy_timeout(std::time::Duration::from_millis(5000))
            .auto_vacuum(sqlx::sqlite::SqliteAutoVacuum::None)
    }

    async fn apply_pragmas(conn: &mut SqliteConnection, options: StoreOptions) -> sqlx::Result<()> {
        let pragmas = format!(
            r#"
                PRAGMA locking_mode = NORMAL;
                PRAGMA wal_autocheckpoint = 800;
                PRAGMA cache_size = -{};
                PRAGMA temp_store = MEMORY;
                PRAGMA mmap_size = {};
            "#,
            options.cache_size_kib(),
            options.mmap_size(),
        );
        sqlx::query(&pragmas).execute(conn).await?;
        Ok(())
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn compile(selector: &Selector) -> Result<Clause> {
        let clause = match selector {
            Selector::All => Clause {
                sql: "ORDER BY id".to_string(),
                binds: Vec::new(),
            },
            Selector::Ids(ids) => Clause {
                sql: "WHERE id IN (SELECT value FROM json_each(?)) ORDER BY id".to_string(),
                binds: vec![Bind::Text(serde_json::to_string(ids).or_raise(|| ErrorKind::InvalidData)?)],
            },
            Selector::KeyRange { from, to } => match (from, to) {
                (Key::Text(from), Key::Text(to)) => Clause {
                    sql: "WHERE tkey >= ? AND tkey <= ? ORDER BY tkey".to_string(),
                    binds: vec![Bind::Text(from.clone()), Bind::Text(to.clone())],
                },
                (Key::Number(from), Key::Number(to)) => Clause {
                    sql: "WHERE nkey >= ? AND nkey <= ? ORDER BY nkey".to_string(),
                    binds: vec![Bind::Int(*from), Bind::Int(*to)],
                },
                _ => exn::bail!(ErrorKind::MixedKeyRange),
            },
            Selector::Keys(keys) => {
                let texts: Vec<&str> = keys.iter().filter_map(Key::as_text).collect();
                let numbers: Vec<i64> = keys.iter().filter_map(Key::as_number).collect();
                Clause {
                    sql: "WHERE tkey IN (SELECT value FROM json_each(?)) OR nkey IN (SELECT value FROM json_each(?)) \
                          ORDER BY tkey IS NOT NULL, nkey, tkey"
                        .to_string(),
                    binds: vec![
                        Bind::Text(serde_json::to_string(&texts).or_raise(|| ErrorKind::InvalidData)?),
                        Bind::Text(serde_json::to_string(&numbers).or_raise(|| ErrorKind::InvalidData)?),
                    ],
                }
            },
            Selector::After { id, limit } => Clause {
                sql: "WHERE id > ? ORDER BY id LIMIT ?".to_string(),
                binds: vec![Bind::Int(to_sql_id(*id)?), Bind::Int(i64::try_from(*limit).unwrap_or(i64::MAX))],
            },
            Selector::Flagged => Clause {
                sql: "WHERE flag <> 0 ORDER BY id".to_string(),
                binds: Vec::new(),
            },
        };
        Ok(clause)
    }

    fn bind_all<'q>(mut query: Query<'q>, binds: Vec<Bind>) -> Query<'q> {
        for bind in binds {
            query = match bind {
                Bind::Text(text) => query.bind(text),
                Bind::Int(int) => query.bind(int),
            };
        }
        query
    }
}

/// Map a driver error onto the error kind the caller can act on.
fn classify(table: &str, err: &sqlx::Error) -> ErrorKind {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => ErrorKind::Constraint(table.to_string()),
        sqlx::Error::Database(db) if db.message().starts_with("no such table") => {
            ErrorKind::TableNotFound(table.to_string())
        },
        sqlx::Error::PoolClosed => ErrorKind::Closed,
        _ => ErrorKind::Database,
    }
}

trait SqlResultExt<T> {
    fn or_raise_for(self, table: &str) -> Result<T>;
}

impl<T> SqlResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn or_raise_for(self, table: &str) -> Result<T> {
        let kind = match &self {
            Ok(_) => ErrorKind::Database,
            Err(err) => classify(table, err),
        };
        self.or_raise(|| kind.clone())
    }
}

fn to_sql_id(id: u64) -> Result<i64> {
    i64::try_from(id).or_raise(|| ErrorKind::InvalidData)
}

fn from_sql_id(id: i64) -> Result<u64> {
    u64::try_from(id).or_raise(|| ErrorKind::InvalidData)
}

fn key_from_columns(tkey: Option<String>, nkey: Option<i64>) -> Option<Key> {
    tkey.map(Key::Text).or(nkey.map(Key::Number))
}

#[async_trait]
impl TableStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    #[instrument(level = "debug", skip(self))]
    async fn create_table(&self, table: &str, options: TableOptions) -> Result<()> {
        validate_table_name(table)?;
        if self.has_table(table).await? {
            exn::bail!(ErrorKind::TableExists(table.to_string()));
        }
        let create = format!(
            r#"CREATE TABLE "{table}" (
                id INTEGER PRIMARY KEY,
                tkey TEXT,
                nkey INTEGER,
                flag INTEGER NOT NULL DEFAULT 0,
                data TEXT NOT NULL
            )"#
        );
        sqlx::query(&create).execute(&self.pool).await.or_raise_for(table)?;
        if let Some(kind) = options.unique_index {
            let column = match kind {
                IndexKind::Text => "tkey",
                IndexKind::Number => "nkey",
            };
            let index = format!(r#"CREATE UNIQUE INDEX "{table}__key" ON "{table}" ({column})"#);
            sqlx::query(&index).execute(&self.pool).await.or_raise_for(table)?;
        }
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        validate_table_name(table)?;
        let drop = format!(r#"DROP TABLE IF EXISTS "{table}""#);
        sqlx::query(&drop).execute(&self.pool).await.or_raise_for(table)?;
        Ok(())
    }

    async fn has_table(&self, table: &str) -> Result<bool> {
        validate_table_name(table)?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_one(&self.pool)
            .await
            .or_raise_for(table)?;
        Ok(count > 0)
    }

    async fn insert(&self, table: &str, rows: Vec<RawRow>, mode: InsertMode) -> Result<()> {
        validate_table_name(table)?;
        if rows.is_empty() {
            return Ok(());
        }
        let verb = match mode {
            InsertMode::Fail => "INSERT",
            InsertMode::Replace => "INSERT OR REPLACE",
        };
        let statement = format!(r#"{verb} INTO "{table}" (id, tkey, nkey, flag, data) VALUES (?, ?, ?, ?, ?)"#);
        let mut tx = self.pool.begin().await.or_raise_for(table)?;
        for row in rows {
            let id = row.id.map(to_sql_id).transpose()?;
            let (tkey, nkey) = match row.key {
                Some(Key::Text(text)) => (Some(text), None),
                Some(Key::Number(number)) => (None, Some(number)),
                None => (None, None),
            };
            sqlx::query(&statement)
                .bind(id)
                .bind(tkey)
                .bind(nkey)
                .bind(row.flagged)
                .bind(row.data)
                .execute(&mut *tx)
                .await
                .or_raise_for(table)?;
        }
        tx.commit().await.or_raise_for(table)
    }

    async fn select(&self, table: &str, selector: Selector) -> Result<Vec<RawRow>> {
        validate_table_name(table)?;
        let clause = Self::compile(&selector)?;
        let sql = format!(r#"SELECT id, tkey, nkey, flag, data FROM "{table}" {}"#, clause.sql);
        let query = Self::bind_all(sqlx::query(&sql), clause.binds);
        let fetched = query.fetch_all(&self.pool).await.or_raise_for(table)?;
        fetched
            .iter()
            .map(|row| {
                let row = SqlRow::from_row(row).or_raise_for(table)?;
                Ok(RawRow {
                    id: Some(from_sql_id(row.id)?),
                    key: key_from_columns(row.tkey, row.nkey),
                    flagged: row.flag,
                    data: row.data,
                })
            })
            .collect()
    }

    async fn keys(&self, table: &str, selector: Selector) -> Result<Vec<(u64, Option<Key>)>> {
        validate_table_name(table)?;
        let clause = Self::compile(&selector)?;
        let sql = format!(r#"SELECT id, tkey, nkey FROM "{table}" {}"#, clause.sql);
        let query = Self::bind_all(sqlx::query(&sql), clause.binds);
        let fetched = query.fetch_all(&self.pool).await.or_raise_for(table)?;
        fetched
            .iter()
            .map(|row| {
                let row = SqlKey::from_row(row).or_raise_for(table)?;
                Ok((from_sql_id(row.id)?, key_from_columns(row.tkey, row.nkey)))
            })
            .collect()
    }

    async fn delete(&self, table: &str, selector: Selector) -> Result<u64> {
        validate_table_name(table)?;
        let sql = match selector {
            Selector::All => format!(r#"DELETE FROM "{table}""#),
            ref other => {
                let clause = Self::compile(other)?;
                let sql = format!(r#"DELETE FROM "{table}" WHERE id IN (SELECT id FROM "{table}" {})"#, clause.sql);
                let query = Self::bind_all(sqlx::query(&sql), clause.binds);
                let result = query.execute(&self.pool).await.or_raise_for(table)?;
                return Ok(result.rows_affected());
            },
        };
        let result = sqlx::query(&sql).execute(&self.pool).await.or_raise_for(table)?;
        Ok(result.rows_affected())
    }

    async fn count(&self, table: &str) -> Result<u64> {
        validate_table_name(table)?;
        let sql = format!(r#"SELECT COUNT(*) FROM "{table}""#);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await.or_raise_for(table)?;
        from_sql_id(count)
    }

    async fn release_memory(&self) -> Result<()> {
        sqlx::query("PRAGMA shrink_memory").execute(&self.pool).await.or_raise(|| ErrorKind::Database)?;
        sqlx::query("PRAGMA wal_checkpoint(PASSIVE)").execute(&self.pool).await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn close(&self) {
        // Let SQLite update query planner statistics and fold the WAL back
        // into the main file, so the database can be moved once closed.
        for pragma in ["PRAGMA optimize", "PRAGMA wal_checkpoint(TRUNCATE)"] {
            if let Err(err) = sqlx::query(pragma).execute(&self.pool).await {
                warn!(pragma, error = %err, "sqlite maintenance on close failed");
            }
        }
        self.pool.close().await;
    }
}
