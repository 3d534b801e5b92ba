//! sqlite-backed catalog
//!
//! Stores the whole catalog in a single sqlite database. Queries are bound
//! at runtime so the crate builds without a live database; bulk operations
//! go through `QueryBuilder` in chunks to stay under sqlite's bind-parameter
//! cap. Timestamps persist as unix microseconds.
//!
//! Atomicity notes: `INSERT OR IGNORE` gives the unique-key insert, and the
//! lease is `UPDATE … WHERE indexing IS NULL`, both atomic at the statement
//! level even across cooperating processes sharing the file.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::info;

use super::{
    Catalog, CatalogResult, FileEntry, NewFileEntry, ServerRecord, SQLITE_BULK_SIZE,
};

/// Chunk for `DELETE … WHERE id IN (…)` statements.
const DELETE_CHUNK: usize = 500;

pub struct SqliteCatalog {
    pool: SqlitePool,
    bulk_size: usize,
}

impl SqliteCatalog {
    /// Open (creating if missing) the database at `url` and make sure the
    /// schema exists. `bulk_size` overrides the sqlite default chunk of
    /// [`SQLITE_BULK_SIZE`].
    pub async fn connect(url: &str, bulk_size: Option<usize>) -> CatalogResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // In-memory databases exist per connection; a wider pool would hand
        // out empty catalogs.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let catalog = Self {
            pool,
            bulk_size: bulk_size.unwrap_or(SQLITE_BULK_SIZE),
        };
        catalog.init_schema().await?;
        info!(url, "catalog opened");
        Ok(catalog)
    }

    async fn init_schema(&self) -> CatalogResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS ftp_server (
                address      TEXT PRIMARY KEY,
                name         TEXT NOT NULL DEFAULT '',
                online       INTEGER NOT NULL DEFAULT 1,
                size         INTEGER NOT NULL DEFAULT 0,
                last_online  INTEGER NOT NULL,
                last_indexed INTEGER,
                indexing     INTEGER
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS file (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                server_address TEXT NOT NULL
                               REFERENCES ftp_server(address) ON DELETE CASCADE,
                path           TEXT NOT NULL,
                name           TEXT NOT NULL,
                is_directory   INTEGER NOT NULL,
                size           INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_file_server ON file(server_address)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS indexer_parameter (
                name  TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or(DateTime::UNIX_EPOCH)
}

fn server_from_row(row: &SqliteRow) -> Result<ServerRecord, sqlx::Error> {
    Ok(ServerRecord {
        address: row.try_get("address")?,
        name: row.try_get("name")?,
        online: row.try_get("online")?,
        size: row.try_get::<i64, _>("size")? as u64,
        last_online: from_micros(row.try_get("last_online")?),
        last_indexed: row
            .try_get::<Option<i64>, _>("last_indexed")?
            .map(from_micros),
        indexing: row.try_get::<Option<i64>, _>("indexing")?.map(from_micros),
    })
}

fn file_from_row(row: &SqliteRow) -> Result<FileEntry, sqlx::Error> {
    Ok(FileEntry {
        id: row.try_get("id")?,
        server_address: row.try_get("server_address")?,
        path: row.try_get("path")?,
        name: row.try_get("name")?,
        is_directory: row.try_get("is_directory")?,
        size: row.try_get::<i64, _>("size")? as u64,
    })
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn insert_server_if_absent(&self, record: &ServerRecord) -> CatalogResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO ftp_server
                 (address, name, online, size, last_online, last_indexed, indexing)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.address)
        .bind(&record.name)
        .bind(record.online)
        .bind(record.size as i64)
        .bind(to_micros(record.last_online))
        .bind(record.last_indexed.map(to_micros))
        .bind(record.indexing.map(to_micros))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn try_lease(&self, address: &str, now: DateTime<Utc>) -> CatalogResult<bool> {
        let result = sqlx::query(
            "UPDATE ftp_server SET indexing = ? WHERE address = ? AND indexing IS NULL",
        )
        .bind(to_micros(now))
        .bind(address)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_server(&self, address: &str) -> CatalogResult<Option<ServerRecord>> {
        let row = sqlx::query("SELECT * FROM ftp_server WHERE address = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(server_from_row).transpose()?)
    }

    async fn update_server(&self, record: &ServerRecord) -> CatalogResult<()> {
        sqlx::query(
            "UPDATE ftp_server
             SET name = ?, online = ?, size = ?, last_online = ?,
                 last_indexed = ?, indexing = ?
             WHERE address = ?",
        )
        .bind(&record.name)
        .bind(record.online)
        .bind(record.size as i64)
        .bind(to_micros(record.last_online))
        .bind(record.last_indexed.map(to_micros))
        .bind(record.indexing.map(to_micros))
        .bind(&record.address)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_servers(&self) -> CatalogResult<Vec<ServerRecord>> {
        let rows = sqlx::query("SELECT * FROM ftp_server ORDER BY address")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(server_from_row)
            .collect::<Result<_, _>>()?)
    }

    async fn servers_due_indexing(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> CatalogResult<Vec<ServerRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM ftp_server
             WHERE last_indexed IS NULL OR last_indexed <= ?
             ORDER BY last_indexed ASC
             LIMIT ?",
        )
        .bind(to_micros(cutoff))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(server_from_row)
            .collect::<Result<_, _>>()?)
    }

    async fn delete_servers_older_than(&self, cutoff: DateTime<Utc>) -> CatalogResult<u64> {
        let result = sqlx::query("DELETE FROM ftp_server WHERE last_online < ?")
            .bind(to_micros(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn files_by_fullpath(
        &self,
        address: &str,
    ) -> CatalogResult<HashMap<String, FileEntry>> {
        let rows = sqlx::query("SELECT * FROM file WHERE server_address = ?")
            .bind(address)
            .fetch_all(&self.pool)
            .await?;
        let mut map = HashMap::with_capacity(rows.len());
        for row in &rows {
            let entry = file_from_row(row)?;
            map.insert(entry.fullpath(), entry);
        }
        Ok(map)
    }

    async fn delete_files(&self, ids: &[i64]) -> CatalogResult<()> {
        for chunk in ids.chunks(DELETE_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM file WHERE id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id);
            }
            builder.push(")");
            builder.build().execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn bulk_insert_files(
        &self,
        address: &str,
        entries: &[NewFileEntry],
    ) -> CatalogResult<()> {
        for chunk in entries.chunks(self.bulk_size.max(1)) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO file (server_address, path, name, is_directory, size) ",
            );
            builder.push_values(chunk, |mut b, entry| {
                b.push_bind(address)
                    .push_bind(&entry.path)
                    .push_bind(&entry.name)
                    .push_bind(entry.is_directory)
                    .push_bind(entry.size as i64);
            });
            builder.build().execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn get_parameter(&self, name: &str) -> CatalogResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM indexer_parameter WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get("value")).transpose()?)
    }

    async fn set_parameter(&self, name: &str, value: &str) -> CatalogResult<()> {
        sqlx::query(
            "INSERT INTO indexer_parameter (name, value) VALUES (?, ?)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        )
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn bulk_size(&self) -> usize {
        self.bulk_size
    }
}
