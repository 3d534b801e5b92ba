//! Scheduler and indexing pipeline
//!
//! One [`Indexer::tick`] is a full scheduler pass: a resumable, rate-limited
//! scan of the configured ranges, a liveness sweep over every known server,
//! pruning of servers offline too long, and an indexing pass over the
//! longest-unindexed servers. Each piece is also callable on its own, which
//! is what the ad-hoc commands use.
//!
//! Per-server failures never abort a pass: a dead server is logged and
//! skipped, a contended lease is somebody else's progress. Only the catalog
//! going away stops a tick.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use chrono::Utc;
use tokio::task;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, ServerRecord};
use crate::config::IndexerConfig;
use crate::error::{IndexerError, IndexerResult};
use crate::ftp::FtpSession;
use crate::iptools::{parse_ip_ranges_str, InvalidAddress, Ip, IpRange, IpSet};
use crate::lease::{IndexingLease, LeaseError};
use crate::probe::{probe_many, FTP_PORT};
use crate::reconcile::{reconcile, ReconcileOutcome, MAX_FILES};
use crate::walker::Walker;

/// Parameter key: address the range scan stopped at.
pub const PARAM_LAST_SCANNED_IP: &str = "last_scanned_ip";

/// Parameter key: unix time the scan last passed the first address.
pub const PARAM_LAST_SCAN_FIRST_IP: &str = "last_scan_first_ip";

/// What one indexing run did.
#[derive(Debug, Clone, Copy)]
pub struct IndexOutcome {
    pub nb_files: u64,
    pub total_size: u64,
    pub inserted: usize,
    pub deleted: usize,
}

/// The indexer engine over some catalog backend.
pub struct Indexer<C: Catalog> {
    catalog: Arc<C>,
    config: IndexerConfig,
    ip_ranges: IpSet,
    ftp_port: u16,
    max_files: u64,
}

impl<C: Catalog> Indexer<C> {
    pub fn new(catalog: Arc<C>, config: IndexerConfig) -> Result<Self, InvalidAddress> {
        let ip_ranges = parse_ip_ranges_str(&config.ip_ranges)?;
        Ok(Self {
            catalog,
            config,
            ip_ranges,
            ftp_port: FTP_PORT,
            max_files: MAX_FILES,
        })
    }

    /// One scheduler tick: range scan, liveness sweep, prune, indexing pass.
    pub async fn tick(&self) -> IndexerResult<()> {
        self.scan_step().await?;
        self.check_all_statuses().await?;
        self.prune().await?;
        self.index_pass().await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------

    /// Resume the cyclic range scan from where the previous tick stopped,
    /// probing up to `scan_count` addresses. Passing the first address of
    /// the set is rate-limited by `scan_delay`.
    async fn scan_step(&self) -> IndexerResult<()> {
        let Some(first) = self.ip_ranges.first() else {
            debug!("no IP ranges configured; skipping range scan");
            return Ok(());
        };

        let start = match self.catalog.get_parameter(PARAM_LAST_SCANNED_IP).await? {
            Some(text) => text
                .parse::<Ip>()
                .ok()
                .filter(|ip| self.ip_ranges.contains(*ip))
                .unwrap_or(first),
            None => first,
        };

        let mut emitted: Vec<Ip> = Vec::with_capacity(self.config.scan_count);
        for ip in self.ip_ranges.loop_iter_from(start) {
            if emitted.len() >= self.config.scan_count {
                break;
            }
            if ip == first && !self.may_pass_first().await? {
                info!(
                    "last full sweep was less than {}s ago; scan paused for this tick",
                    self.config.scan_delay.as_secs()
                );
                break;
            }
            emitted.push(ip);
        }

        if emitted.is_empty() {
            return Ok(());
        }

        debug!(count = emitted.len(), from = %emitted[0], "scanning range segment");
        let results = probe_many(
            emitted.iter().copied(),
            self.config.timeout,
            self.config.probe_pool,
        )
        .await;

        // Persist the cursor even when an update fails, so the next tick
        // resumes instead of rescanning the same segment.
        let mut apply_error = None;
        for (ip, online) in results {
            if let Err(e) = self.apply_probe(ip, online).await {
                apply_error.get_or_insert(e);
            }
        }
        if let Some(last) = emitted.last() {
            self.catalog
                .set_parameter(PARAM_LAST_SCANNED_IP, &last.to_string())
                .await?;
        }

        match apply_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Rate limit on wrapping past the first address. Returns whether the
    /// scan may continue, stamping the passage time when it does.
    async fn may_pass_first(&self) -> IndexerResult<bool> {
        let now = Utc::now();
        let last_pass = self
            .catalog
            .get_parameter(PARAM_LAST_SCAN_FIRST_IP)
            .await?
            .and_then(|s| s.parse::<i64>().ok());

        if let Some(ts) = last_pass {
            if now.timestamp() - ts < self.config.scan_delay.as_secs() as i64 {
                return Ok(false);
            }
        }
        self.catalog
            .set_parameter(PARAM_LAST_SCAN_FIRST_IP, &now.timestamp().to_string())
            .await?;
        Ok(true)
    }

    /// Probe an explicit range once, outside the cyclic schedule. Returns
    /// how many servers answered.
    pub async fn scan_range(&self, first: Ip, last: Ip) -> IndexerResult<usize> {
        let range = IpRange::new(first, last);
        info!(first = %range.first(), last = %range.last(), "scanning ad-hoc range");

        let results = probe_many(range.iter(), self.config.timeout, self.config.probe_pool)
            .await;
        let mut found = 0;
        for (ip, online) in results {
            if online {
                found += 1;
            }
            self.apply_probe(ip, online).await?;
        }
        Ok(found)
    }

    // ------------------------------------------------------------------
    // Liveness
    // ------------------------------------------------------------------

    /// Probe every known server and record the outcomes.
    pub async fn check_all_statuses(&self) -> IndexerResult<()> {
        let servers = self.catalog.list_servers().await?;
        if servers.is_empty() {
            return Ok(());
        }
        debug!(count = servers.len(), "sweeping known servers");

        let addresses: Vec<Ip> = servers
            .iter()
            .filter_map(|s| s.address.parse().ok())
            .collect();
        let results = probe_many(addresses, self.config.timeout, self.config.probe_pool)
            .await;
        for (ip, online) in results {
            self.apply_probe(ip, online).await?;
        }
        Ok(())
    }

    /// Probe the given addresses and record the outcomes.
    pub async fn check_statuses(&self, addresses: &[String]) -> IndexerResult<()> {
        let mut ips = Vec::with_capacity(addresses.len());
        for address in addresses {
            ips.push(address.parse::<Ip>()?);
        }
        let results = probe_many(ips, self.config.timeout, self.config.probe_pool).await;
        for (ip, online) in results {
            self.apply_probe(ip, online).await?;
        }
        Ok(())
    }

    /// Record one probe outcome. New servers are created on a positive
    /// probe with their reverse-DNS name; unknown silent addresses leave no
    /// trace.
    async fn apply_probe(&self, ip: Ip, online: bool) -> IndexerResult<()> {
        let address = ip.to_string();
        let known = self.catalog.get_server(&address).await?;

        match (online, known) {
            (true, Some(mut server)) => {
                if server.online {
                    info!("{} is still online", server.display_name());
                } else {
                    warn!("{} is now online", server.display_name());
                }
                server.online = true;
                server.last_online = Utc::now();
                self.catalog.update_server(&server).await?;
            },
            (true, None) => {
                warn!("discovered new server at {}", address);
                let name = self.default_server_name(ip).await;
                let record = ServerRecord::discovered(&address, &name, Utc::now());
                if !self.catalog.insert_server_if_absent(&record).await? {
                    // Lost a discovery race with a peer; refresh instead.
                    if let Some(mut server) = self.catalog.get_server(&address).await? {
                        server.online = true;
                        server.last_online = Utc::now();
                        self.catalog.update_server(&server).await?;
                    }
                }
            },
            (false, Some(mut server)) => {
                if server.online {
                    warn!("{} is now offline", server.display_name());
                    server.online = false;
                    self.catalog.update_server(&server).await?;
                } else {
                    info!("{} is still offline", server.display_name());
                }
            },
            (false, None) => {
                debug!("{} didn't respond", address);
            },
        }
        Ok(())
    }

    /// Reverse-DNS name for a discovered server, with configured suffixes
    /// stripped; empty when resolution fails.
    async fn default_server_name(&self, ip: Ip) -> String {
        let suffixes = self.config.hostname_strip_suffixes.clone();
        task::spawn_blocking(move || {
            match dns_lookup::lookup_addr(&IpAddr::V4(ip.into())) {
                Ok(name) if name == ip.to_string() => String::new(),
                Ok(mut name) => {
                    for suffix in &suffixes {
                        if let Some(stripped) = name.strip_suffix(suffix.as_str()) {
                            name = stripped.to_string();
                            break;
                        }
                    }
                    name
                },
                Err(_) => String::new(),
            }
        })
        .await
        .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Pruning
    // ------------------------------------------------------------------

    /// Drop servers that have been offline longer than `prune_ftp_time`,
    /// together with their catalogued files.
    pub async fn prune(&self) -> IndexerResult<u64> {
        let cutoff =
            Utc::now() - chrono::Duration::seconds(self.config.prune_ftp_time.as_secs() as i64);
        let removed = self.catalog.delete_servers_older_than(cutoff).await?;
        if removed > 0 {
            info!(removed, "pruned servers gone for too long");
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Indexing
    // ------------------------------------------------------------------

    /// Index the servers that have waited longest, up to `index_count`.
    async fn index_pass(&self) -> IndexerResult<()> {
        let cutoff =
            Utc::now() - chrono::Duration::seconds(self.config.index_delay.as_secs() as i64);
        let due = self
            .catalog
            .servers_due_indexing(cutoff, self.config.index_count)
            .await?;
        if due.is_empty() {
            debug!("no server is due for indexing");
            return Ok(());
        }

        info!(count = due.len(), "indexing pass");
        for server in due {
            match self.index_server(&server.address).await {
                Ok(outcome) => {
                    debug!(
                        address = %server.address,
                        nb_files = outcome.nb_files,
                        total_size = outcome.total_size,
                        "server indexed"
                    );
                },
                Err(IndexerError::Lease(LeaseError::AlreadyIndexing(_))) => {
                    info!(
                        address = %server.address,
                        "already being indexed elsewhere; skipping"
                    );
                },
                Err(e) => {
                    warn!(address = %server.address, error = %e, "indexing failed; skipping server");
                },
            }
        }
        Ok(())
    }

    /// Walk one server and reconcile the catalog with what is actually
    /// there. Takes the indexing lease for the duration; releases it on
    /// every exit path.
    pub async fn index_server(&self, address: &str) -> IndexerResult<IndexOutcome> {
        let ip: Ip = address.parse()?;
        let address = ip.to_string();
        info!("indexing '{}'...", address);

        let addr = SocketAddr::new(IpAddr::V4(ip.into()), self.ftp_port);
        let timeout = self.config.timeout;
        let connected =
            task::spawn_blocking(move || FtpSession::connect(addr, timeout)).await?;
        let session = match connected {
            Ok(session) => session,
            Err(e) => {
                // Unreachable; reflect that in the catalog before bailing.
                if let Some(mut server) = self.catalog.get_server(&address).await? {
                    if server.online {
                        warn!("{} is now offline", server.display_name());
                        server.online = false;
                        self.catalog.update_server(&server).await?;
                    }
                }
                return Err(e.into());
            },
        };

        let name = self.default_server_name(ip).await;
        let mut lease = IndexingLease::acquire(self.catalog.as_ref(), &address, &name).await?;

        // Run the walk with its errors captured so the lease is released no
        // matter how it went; only then surface the outcome.
        let applied = self.walk_and_apply(session, &mut lease).await;
        let released = lease.release().await;

        let outcome = applied?;
        released?;

        info!(
            "{} files found on {}, {} b",
            outcome.nb_files, address, outcome.total_size
        );
        info!(
            "{} insertions, {} deletions",
            outcome.inserted, outcome.deleted
        );
        Ok(outcome)
    }

    /// Log in, walk the tree, and apply the reconciled diff in bulk.
    /// Updates the leased record's `size` and `last_indexed` on success;
    /// persisting them is the lease release's job.
    async fn walk_and_apply(
        &self,
        session: FtpSession,
        lease: &mut IndexingLease<'_, C>,
    ) -> IndexerResult<IndexOutcome> {
        let address = lease.server.address.clone();
        let existing = self.catalog.files_by_fullpath(&address).await?;
        let max_files = self.max_files;

        let outcome: ReconcileOutcome = task::spawn_blocking(move || {
            let mut session = session;
            session.login_anonymous()?;
            match session.try_utf8() {
                Ok(true) => {},
                Ok(false) => warn!(
                    "server {} doesn't seem to handle unicode, brace yourselves",
                    address
                ),
                Err(e) => return Err(IndexerError::from(e)),
            }

            let walker = Walker::new(&mut session);
            let outcome = reconcile(walker, existing, max_files)?;
            session.quit();
            Ok(outcome)
        })
        .await??;

        self.catalog.delete_files(&outcome.to_delete).await?;
        self.catalog
            .bulk_insert_files(&lease.server.address, &outcome.to_insert)
            .await?;

        lease.server.size = outcome.total_size;
        lease.server.last_indexed = Some(Utc::now());

        Ok(IndexOutcome {
            nb_files: outcome.nb_files,
            total_size: outcome.total_size,
            inserted: outcome.to_insert.len(),
            deleted: outcome.to_delete.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::ftp::testserver;
    use crate::walker::WalkError;
    use std::collections::HashMap;
    use std::net::TcpListener;
    use std::time::Duration;

    fn test_config() -> IndexerConfig {
        IndexerConfig {
            ip_ranges: "192.0.2.1-192.0.2.3".to_string(),
            timeout: Duration::from_millis(50),
            scan_count: 2,
            probe_pool: 4,
            ..Default::default()
        }
    }

    fn indexer(config: IndexerConfig) -> Indexer<MemoryCatalog> {
        Indexer::new(Arc::new(MemoryCatalog::new()), config).unwrap()
    }

    /// Indexer pointed at a scripted FTP server; the timeout is roomy since
    /// these tests exercise the pipeline, not probe latency.
    fn pipeline_indexer(port: u16) -> Indexer<MemoryCatalog> {
        let mut config = test_config();
        config.timeout = Duration::from_secs(2);
        let mut indexer = indexer(config);
        indexer.ftp_port = port;
        indexer
    }

    async fn seed_server(
        indexer: &Indexer<MemoryCatalog>,
        address: &str,
        online: bool,
    ) {
        let mut record = ServerRecord::discovered(address, "", Utc::now());
        record.online = online;
        assert!(indexer
            .catalog
            .insert_server_if_absent(&record)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_probe_update_transitions() {
        let indexer = indexer(test_config());
        seed_server(&indexer, "192.0.2.7", true).await;

        // online -> offline
        indexer.apply_probe("192.0.2.7".parse().unwrap(), false).await.unwrap();
        let server = indexer.catalog.get_server("192.0.2.7").await.unwrap().unwrap();
        assert!(!server.online);

        // offline -> offline: no change
        indexer.apply_probe("192.0.2.7".parse().unwrap(), false).await.unwrap();
        assert!(!indexer.catalog.get_server("192.0.2.7").await.unwrap().unwrap().online);

        // offline -> online refreshes last_online
        indexer.apply_probe("192.0.2.7".parse().unwrap(), true).await.unwrap();
        let server = indexer.catalog.get_server("192.0.2.7").await.unwrap().unwrap();
        assert!(server.online);
    }

    #[tokio::test]
    async fn test_probe_update_ignores_silent_unknown_address() {
        let indexer = indexer(test_config());
        indexer.apply_probe("192.0.2.9".parse().unwrap(), false).await.unwrap();
        assert!(indexer.catalog.get_server("192.0.2.9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_probe_update_creates_answering_unknown_address() {
        let indexer = indexer(test_config());
        // Loopback keeps the reverse lookup local.
        indexer.apply_probe("127.0.0.1".parse().unwrap(), true).await.unwrap();
        let server = indexer.catalog.get_server("127.0.0.1").await.unwrap().unwrap();
        assert!(server.online);
        assert!(server.last_indexed.is_none());
        assert!(server.indexing.is_none());
    }

    #[tokio::test]
    async fn test_scan_step_resumes_from_cursor() {
        let indexer = indexer(test_config());
        indexer
            .catalog
            .set_parameter(PARAM_LAST_SCANNED_IP, "192.0.2.2")
            .await
            .unwrap();

        indexer.scan_step().await.unwrap();

        // scan_count = 2 starting inclusively from the cursor.
        let cursor = indexer
            .catalog
            .get_parameter(PARAM_LAST_SCANNED_IP)
            .await
            .unwrap();
        assert_eq!(cursor.as_deref(), Some("192.0.2.3"));
    }

    #[tokio::test]
    async fn test_scan_step_stamps_first_pass() {
        let indexer = indexer(test_config());

        indexer.scan_step().await.unwrap();

        assert!(indexer
            .catalog
            .get_parameter(PARAM_LAST_SCAN_FIRST_IP)
            .await
            .unwrap()
            .is_some());
        assert_eq!(
            indexer
                .catalog
                .get_parameter(PARAM_LAST_SCANNED_IP)
                .await
                .unwrap()
                .as_deref(),
            Some("192.0.2.2")
        );
    }

    #[tokio::test]
    async fn test_scan_step_throttled_when_sweep_is_recent() {
        let indexer = indexer(test_config());
        indexer
            .catalog
            .set_parameter(PARAM_LAST_SCAN_FIRST_IP, &Utc::now().timestamp().to_string())
            .await
            .unwrap();

        indexer.scan_step().await.unwrap();

        // Nothing was emitted, so no cursor was written.
        assert!(indexer
            .catalog
            .get_parameter(PARAM_LAST_SCANNED_IP)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_scan_step_stops_on_second_wrap() {
        let mut config = test_config();
        config.scan_count = 5;
        let indexer = indexer(config);
        indexer
            .catalog
            .set_parameter(PARAM_LAST_SCANNED_IP, "192.0.2.3")
            .await
            .unwrap();
        // Ancient stamp: the first wrap may pass, the second may not.
        indexer
            .catalog
            .set_parameter(PARAM_LAST_SCAN_FIRST_IP, "0")
            .await
            .unwrap();

        indexer.scan_step().await.unwrap();

        assert_eq!(
            indexer
                .catalog
                .get_parameter(PARAM_LAST_SCANNED_IP)
                .await
                .unwrap()
                .as_deref(),
            Some("192.0.2.3")
        );
    }

    #[tokio::test]
    async fn test_sweep_marks_unreachable_servers_offline() {
        let indexer = indexer(test_config());
        seed_server(&indexer, "192.0.2.1", true).await;
        seed_server(&indexer, "192.0.2.2", true).await;

        indexer.check_all_statuses().await.unwrap();

        for address in ["192.0.2.1", "192.0.2.2"] {
            let server = indexer.catalog.get_server(address).await.unwrap().unwrap();
            assert!(!server.online, "{address} should be offline");
        }
    }

    #[tokio::test]
    async fn test_check_statuses_rejects_bad_address() {
        let indexer = indexer(test_config());
        let result = indexer.check_statuses(&["not-an-ip".to_string()]).await;
        assert!(matches!(result, Err(IndexerError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_prune_removes_long_offline_servers() {
        let indexer = indexer(test_config());
        let now = Utc::now();

        let mut stale = ServerRecord::discovered("192.0.2.1", "", now);
        stale.online = false;
        stale.last_online = now - chrono::Duration::days(30);
        indexer.catalog.insert_server_if_absent(&stale).await.unwrap();
        seed_server(&indexer, "192.0.2.2", true).await;

        let removed = indexer.prune().await.unwrap();
        assert_eq!(removed, 1);
        assert!(indexer.catalog.get_server("192.0.2.1").await.unwrap().is_none());
        assert!(indexer.catalog.get_server("192.0.2.2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_index_server_rejects_bad_address() {
        let indexer = indexer(test_config());
        let result = indexer.index_server("10.9.8").await;
        assert!(matches!(result, Err(IndexerError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_index_server_marks_known_server_offline_on_dead_port() {
        let mut indexer = indexer(test_config());
        // Grab a port nothing listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        indexer.ftp_port = port;
        seed_server(&indexer, "127.0.0.1", true).await;

        let result = indexer.index_server("127.0.0.1").await;
        assert!(result.is_err());
        let server = indexer.catalog.get_server("127.0.0.1").await.unwrap().unwrap();
        assert!(!server.online);
        assert!(server.indexing.is_none());
    }

    fn basic_tree() -> HashMap<Vec<u8>, Vec<u8>> {
        let mut tree = HashMap::new();
        tree.insert(
            b"/".to_vec(),
            b"-r--r--r-- 1 ftp ftp 57 Feb 20  2012 smthg.zip\r\n\
              drwxr-xr-x 1 ftp ftp  0 Mar 11 13:49 stuff\r\n"
                .to_vec(),
        );
        tree.insert(
            b"/stuff".to_vec(),
            b"-r--r--r-- 1 ftp ftp 1000 Feb 20  2012 mysterious.zip\r\n".to_vec(),
        );
        tree
    }

    #[tokio::test]
    async fn test_index_server_catalogs_a_tree() {
        let addr = testserver::serve(basic_tree(), 1);
        let indexer = pipeline_indexer(addr.port());

        let outcome = indexer.index_server("127.0.0.1").await.unwrap();
        assert_eq!(outcome.nb_files, 3);
        assert_eq!(outcome.total_size, 1057);
        assert_eq!(outcome.inserted, 3);
        assert_eq!(outcome.deleted, 0);

        let server = indexer.catalog.get_server("127.0.0.1").await.unwrap().unwrap();
        assert_eq!(server.size, 1057);
        assert!(server.last_indexed.is_some());
        assert!(server.indexing.is_none());

        let files = indexer.catalog.files_by_fullpath("127.0.0.1").await.unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(files["/smthg.zip"].size, 57);
        assert_eq!(files["/stuff"].size, 1000);
        assert!(files["/stuff"].is_directory);
        assert_eq!(files["/stuff/mysterious.zip"].size, 1000);
    }

    #[tokio::test]
    async fn test_reindex_of_unchanged_server_keeps_row_identities() {
        let addr = testserver::serve(basic_tree(), 2);
        let indexer = pipeline_indexer(addr.port());

        indexer.index_server("127.0.0.1").await.unwrap();
        let before = indexer.catalog.files_by_fullpath("127.0.0.1").await.unwrap();

        let outcome = indexer.index_server("127.0.0.1").await.unwrap();
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.deleted, 0);

        let after = indexer.catalog.files_by_fullpath("127.0.0.1").await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_index_server_file_count_guard_persists_nothing() {
        let addr = testserver::serve(basic_tree(), 1);
        let mut indexer = pipeline_indexer(addr.port());
        indexer.max_files = 2;

        let result = indexer.index_server("127.0.0.1").await;
        assert!(matches!(
            result,
            Err(IndexerError::Walk(WalkError::SuspiciousFtp(_)))
        ));

        // Lease released, catalog untouched for this server.
        let server = indexer.catalog.get_server("127.0.0.1").await.unwrap().unwrap();
        assert!(server.indexing.is_none());
        assert!(server.last_indexed.is_none());
        let files = indexer.catalog.files_by_fullpath("127.0.0.1").await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_index_server_skips_symlinks() {
        let mut tree = HashMap::new();
        tree.insert(
            b"/".to_vec(),
            b"lrwxrwxrwx 1 0 0 12 Sep 12  2007 incoming -> pub/incoming\r\n".to_vec(),
        );
        let addr = testserver::serve(tree, 1);
        let indexer = pipeline_indexer(addr.port());

        let outcome = indexer.index_server("127.0.0.1").await.unwrap();
        assert_eq!(outcome.nb_files, 0);
        let files = indexer.catalog.files_by_fullpath("127.0.0.1").await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_index_server_decodes_legacy_names() {
        let mut tree = HashMap::new();
        tree.insert(
            b"/".to_vec(),
            b"-rw-r--r-- 1 ftp ftp 57 Feb 20  2012 \xe9l\xe8ve.zip\r\n".to_vec(),
        );
        let addr = testserver::serve(tree, 1);
        let indexer = pipeline_indexer(addr.port());

        indexer.index_server("127.0.0.1").await.unwrap();
        let files = indexer.catalog.files_by_fullpath("127.0.0.1").await.unwrap();
        assert!(files.contains_key("/\u{e9}l\u{e8}ve.zip"));
    }

    #[tokio::test]
    async fn test_index_server_contention_is_reported() {
        let addr = testserver::serve(basic_tree(), 1);
        let indexer = pipeline_indexer(addr.port());

        // Somebody else holds the lease.
        seed_server(&indexer, "127.0.0.1", true).await;
        assert!(indexer
            .catalog
            .try_lease("127.0.0.1", Utc::now())
            .await
            .unwrap());

        let result = indexer.index_server("127.0.0.1").await;
        assert!(matches!(
            result,
            Err(IndexerError::Lease(LeaseError::AlreadyIndexing(_)))
        ));
    }
}
