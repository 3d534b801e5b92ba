//! Per-server indexing lease
//!
//! At most one walk of a given address may run at a time, across every
//! process sharing the catalog. The `indexing` timestamp on the server
//! record is the lock: it is only ever taken by a unique-key insert of a
//! fresh record or by the store's atomic conditional update, so two
//! contenders cannot both win.
//!
//! There is no async `Drop`, so release is explicit: callers run the walk
//! with its errors captured, call [`IndexingLease::release`] unconditionally
//! and only then propagate the walk's result. Release also persists any
//! changes the caller made to the record (`size`, `last_indexed`, `name`).

use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use crate::catalog::{Catalog, CatalogError, ServerRecord};

#[derive(Error, Debug)]
pub enum LeaseError {
    /// Another worker holds the lease; skip this server for now.
    #[error("server {0} is already being indexed")]
    AlreadyIndexing(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// A held indexing lease. `server` is the leased record; mutations made to
/// it are persisted by [`release`](Self::release).
pub struct IndexingLease<'a, C: Catalog> {
    catalog: &'a C,
    pub server: ServerRecord,
}

impl<'a, C: Catalog> IndexingLease<'a, C> {
    /// Take the lease on `address`, creating the server record if this is
    /// the first time the address is seen. `name` is only used for a newly
    /// created record.
    pub async fn acquire(
        catalog: &'a C,
        address: &str,
        name: &str,
    ) -> Result<Self, LeaseError> {
        let now = Utc::now();

        let mut candidate = ServerRecord::discovered(address, name, now);
        candidate.indexing = Some(now);
        if catalog.insert_server_if_absent(&candidate).await? {
            debug!(address, "lease taken on new server record");
            return Ok(Self {
                catalog,
                server: candidate,
            });
        }

        // The record exists: claim it only if nobody else holds the lease.
        if !catalog.try_lease(address, now).await? {
            return Err(LeaseError::AlreadyIndexing(address.to_string()));
        }

        let mut server = catalog
            .get_server(address)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("server {address}")))?;
        server.online = true;
        server.last_online = now;
        server.indexing = Some(now);
        catalog.update_server(&server).await?;

        debug!(address, "lease taken on existing server record");
        Ok(Self { catalog, server })
    }

    /// Free the lease, persisting the record with every change the caller
    /// made while holding it.
    pub async fn release(mut self) -> Result<ServerRecord, LeaseError> {
        self.server.indexing = None;
        self.catalog.update_server(&self.server).await?;
        debug!(address = %self.server.address, "lease released");
        Ok(self.server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use futures::future::join_all;

    #[tokio::test]
    async fn test_acquire_creates_unknown_server() {
        let catalog = MemoryCatalog::new();
        let lease = IndexingLease::acquire(&catalog, "10.9.8.7", "mirror.lan")
            .await
            .unwrap();
        assert_eq!(lease.server.address, "10.9.8.7");
        assert!(lease.server.online);
        assert!(lease.server.indexing.is_some());

        let stored = catalog.get_server("10.9.8.7").await.unwrap().unwrap();
        assert!(stored.indexing.is_some());
    }

    #[tokio::test]
    async fn test_second_acquire_is_contention() {
        let catalog = MemoryCatalog::new();
        let _held = IndexingLease::acquire(&catalog, "10.9.8.7", "")
            .await
            .unwrap();

        let second = IndexingLease::acquire(&catalog, "10.9.8.7", "").await;
        assert!(matches!(second, Err(LeaseError::AlreadyIndexing(_))));
    }

    #[tokio::test]
    async fn test_release_persists_caller_updates() {
        let catalog = MemoryCatalog::new();
        let mut lease = IndexingLease::acquire(&catalog, "10.9.8.7", "")
            .await
            .unwrap();
        lease.server.size = 1057;
        lease.server.last_indexed = Some(Utc::now());
        lease.release().await.unwrap();

        let stored = catalog.get_server("10.9.8.7").await.unwrap().unwrap();
        assert!(stored.indexing.is_none());
        assert_eq!(stored.size, 1057);
        assert!(stored.last_indexed.is_some());

        // Lease can be taken again once released.
        let again = IndexingLease::acquire(&catalog, "10.9.8.7", "").await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_acquires_admit_exactly_one() {
        let catalog = MemoryCatalog::new();
        let attempts =
            join_all((0..8).map(|_| IndexingLease::acquire(&catalog, "10.9.8.7", ""))).await;

        let winners = attempts.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(attempts
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(LeaseError::AlreadyIndexing(_)))));
    }
}
