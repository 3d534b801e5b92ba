//! In-memory catalog
//!
//! Reference implementation of the [`Catalog`] contract. A single mutex
//! stands in for the store's row-level atomicity, which makes the unique
//! insert and the conditional lease update trivially correct. Backs the
//! unit and contract tests; also handy for dry runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    Catalog, CatalogError, CatalogResult, FileEntry, NewFileEntry, ServerRecord,
};

#[derive(Default)]
struct Inner {
    servers: BTreeMap<String, ServerRecord>,
    files: BTreeMap<i64, FileEntry>,
    params: BTreeMap<String, String>,
    next_file_id: i64,
}

#[derive(Default)]
pub struct MemoryCatalog {
    inner: Mutex<Inner>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CatalogResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| CatalogError::Config("memory catalog mutex poisoned".to_string()))
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn insert_server_if_absent(&self, record: &ServerRecord) -> CatalogResult<bool> {
        let mut inner = self.lock()?;
        if inner.servers.contains_key(&record.address) {
            return Ok(false);
        }
        inner
            .servers
            .insert(record.address.clone(), record.clone());
        Ok(true)
    }

    async fn try_lease(&self, address: &str, now: DateTime<Utc>) -> CatalogResult<bool> {
        let mut inner = self.lock()?;
        match inner.servers.get_mut(address) {
            Some(server) if server.indexing.is_none() => {
                server.indexing = Some(now);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn get_server(&self, address: &str) -> CatalogResult<Option<ServerRecord>> {
        Ok(self.lock()?.servers.get(address).cloned())
    }

    async fn update_server(&self, record: &ServerRecord) -> CatalogResult<()> {
        let mut inner = self.lock()?;
        match inner.servers.get_mut(&record.address) {
            Some(server) => {
                *server = record.clone();
                Ok(())
            },
            None => Err(CatalogError::NotFound(format!(
                "server {}",
                record.address
            ))),
        }
    }

    async fn list_servers(&self) -> CatalogResult<Vec<ServerRecord>> {
        Ok(self.lock()?.servers.values().cloned().collect())
    }

    async fn servers_due_indexing(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> CatalogResult<Vec<ServerRecord>> {
        let inner = self.lock()?;
        let mut due: Vec<ServerRecord> = inner
            .servers
            .values()
            .filter(|s| s.last_indexed.map_or(true, |t| t <= cutoff))
            .cloned()
            .collect();
        // `None` sorts first: never-indexed servers take priority.
        due.sort_by_key(|s| s.last_indexed);
        due.truncate(limit);
        Ok(due)
    }

    async fn delete_servers_older_than(&self, cutoff: DateTime<Utc>) -> CatalogResult<u64> {
        let mut inner = self.lock()?;
        let stale: Vec<String> = inner
            .servers
            .values()
            .filter(|s| s.last_online < cutoff)
            .map(|s| s.address.clone())
            .collect();
        for address in &stale {
            inner.servers.remove(address);
            inner
                .files
                .retain(|_, f| &f.server_address != address);
        }
        Ok(stale.len() as u64)
    }

    async fn files_by_fullpath(
        &self,
        address: &str,
    ) -> CatalogResult<HashMap<String, FileEntry>> {
        Ok(self
            .lock()?
            .files
            .values()
            .filter(|f| f.server_address == address)
            .map(|f| (f.fullpath(), f.clone()))
            .collect())
    }

    async fn delete_files(&self, ids: &[i64]) -> CatalogResult<()> {
        let mut inner = self.lock()?;
        for id in ids {
            inner.files.remove(id);
        }
        Ok(())
    }

    async fn bulk_insert_files(
        &self,
        address: &str,
        entries: &[NewFileEntry],
    ) -> CatalogResult<()> {
        let mut inner = self.lock()?;
        for entry in entries {
            inner.next_file_id += 1;
            let id = inner.next_file_id;
            inner.files.insert(
                id,
                FileEntry {
                    id,
                    server_address: address.to_string(),
                    path: entry.path.clone(),
                    name: entry.name.clone(),
                    is_directory: entry.is_directory,
                    size: entry.size,
                },
            );
        }
        Ok(())
    }

    async fn get_parameter(&self, name: &str) -> CatalogResult<Option<String>> {
        Ok(self.lock()?.params.get(name).cloned())
    }

    async fn set_parameter(&self, name: &str, value: &str) -> CatalogResult<()> {
        self.lock()?
            .params
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}
