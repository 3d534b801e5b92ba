//! Catalog store abstraction
//!
//! The engine talks to its persistent store through the [`Catalog`] trait:
//! server records keyed by address, file entries keyed by (server, path,
//! name), and a small parameter table for scan-resume state. Two guarantees
//! carry all the concurrency coordination: inserting a server is unique-key
//! atomic, and taking the indexing lease is an atomic conditional update.
//! Anything honoring those two contracts can back the engine; the in-memory
//! implementation doubles as the reference for tests.

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use memory::MemoryCatalog;
pub use sqlite::SqliteCatalog;

#[derive(Error, Debug)]
pub enum CatalogError {
    /// SQL query or connection error
    #[error("catalog query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Catalog configuration is invalid or missing
    #[error("catalog configuration error: {0}")]
    Config(String),

    /// Requested record does not exist
    #[error("{0} not found in catalog")]
    NotFound(String),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Bulk insert chunk for server-class stores.
pub const DEFAULT_BULK_SIZE: usize = 10_000;

/// Bulk insert chunk for sqlite, which caps bind parameters per statement.
pub const SQLITE_BULK_SIZE: usize = 100;

/// One known FTP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    /// IPv4 text form; primary key.
    pub address: String,

    /// Reverse-DNS name captured at discovery, or empty.
    pub name: String,

    pub online: bool,

    /// Total bytes over the last indexed snapshot.
    pub size: u64,

    /// Most recent successful probe.
    pub last_online: DateTime<Utc>,

    /// Most recent completed walk, if any.
    pub last_indexed: Option<DateTime<Utc>>,

    /// Indexing lease: free when `None`, else the time the lease was taken.
    /// Only ever set through [`Catalog::try_lease`] or a unique-key insert.
    pub indexing: Option<DateTime<Utc>>,
}

impl ServerRecord {
    /// A freshly discovered, online, un-indexed server.
    pub fn discovered(address: &str, name: &str, now: DateTime<Utc>) -> Self {
        Self {
            address: address.to_string(),
            name: name.to_string(),
            online: true,
            size: 0,
            last_online: now,
            last_indexed: None,
            indexing: None,
        }
    }

    /// Human-facing name: the reverse-DNS name when known, else the address.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.address
        } else {
            &self.name
        }
    }
}

/// One catalogued file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub id: i64,
    pub server_address: String,

    /// Parent directory: empty for the root, `/sub/dir` otherwise, never a
    /// trailing slash.
    pub path: String,

    pub name: String,
    pub is_directory: bool,

    /// Bytes; for directories, the recursive sum of descendant files.
    pub size: u64,
}

impl FileEntry {
    /// The reconciliation key: `path + "/" + name`.
    pub fn fullpath(&self) -> String {
        format!("{}/{}", self.path, self.name)
    }
}

/// A file entry about to be inserted (no id yet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileEntry {
    pub path: String,
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
}

/// Store contract required by the engine.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Insert `record` unless its address already exists. Returns whether a
    /// row was inserted; atomic against concurrent inserts of the same
    /// address.
    async fn insert_server_if_absent(&self, record: &ServerRecord) -> CatalogResult<bool>;

    /// Atomically set `indexing = now` where the lease is currently free.
    /// Returns whether the lease was taken.
    async fn try_lease(&self, address: &str, now: DateTime<Utc>) -> CatalogResult<bool>;

    async fn get_server(&self, address: &str) -> CatalogResult<Option<ServerRecord>>;

    /// Persist every mutable field of `record`.
    async fn update_server(&self, record: &ServerRecord) -> CatalogResult<()>;

    async fn list_servers(&self) -> CatalogResult<Vec<ServerRecord>>;

    /// Servers whose `last_indexed` is null or `<= cutoff`, oldest first,
    /// capped at `limit`.
    async fn servers_due_indexing(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> CatalogResult<Vec<ServerRecord>>;

    /// Delete servers whose `last_online` predates `cutoff`, cascading to
    /// their file entries. Returns how many servers went away.
    async fn delete_servers_older_than(&self, cutoff: DateTime<Utc>) -> CatalogResult<u64>;

    /// Every file entry of `address`, keyed by full path.
    async fn files_by_fullpath(&self, address: &str)
        -> CatalogResult<HashMap<String, FileEntry>>;

    async fn delete_files(&self, ids: &[i64]) -> CatalogResult<()>;

    /// Insert `entries` for `address`, chunked by [`Catalog::bulk_size`].
    async fn bulk_insert_files(
        &self,
        address: &str,
        entries: &[NewFileEntry],
    ) -> CatalogResult<()>;

    async fn get_parameter(&self, name: &str) -> CatalogResult<Option<String>>;

    /// Upsert.
    async fn set_parameter(&self, name: &str, value: &str) -> CatalogResult<()>;

    /// Preferred bulk insert chunk for this backend.
    fn bulk_size(&self) -> usize {
        DEFAULT_BULK_SIZE
    }
}
