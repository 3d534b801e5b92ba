//! ftpscout indexer engine
//!
//! Periodically discovers anonymous FTP servers inside configured IP ranges,
//! mirrors their directory trees into a searchable catalog, and tracks
//! per-server liveness. The engine is everything behind the catalog: the
//! scan scheduler, the probe pool, the LIST parser with encoding fallback,
//! the guarded tree walker, the per-server indexing lease and the bulk
//! reconciler. Serving browse/search queries out of the catalog is a
//! separate front end.
//!
//! # Overview
//!
//! - [`iptools`]: IPv4 addresses, ranges and range sets with cyclic
//!   iteration for resumable scans
//! - [`probe`]: bounded-concurrency liveness probes
//! - [`listing`]: unix LIST line parsing and the UTF-8/latin-9 fallback
//!   decoder
//! - [`ftp`]: raw-byte anonymous FTP session used by walks
//! - [`walker`]: guarded depth-first traversal
//! - [`reconcile`]: snapshot vs. catalog diffing
//! - [`catalog`]: store contract plus in-memory and sqlite backends
//! - [`lease`]: at-most-one-walk-per-server coordination
//! - [`indexer`]: the scheduler tying it all together

pub mod catalog;
pub mod config;
pub mod error;
pub mod ftp;
pub mod indexer;
pub mod iptools;
pub mod lease;
pub mod listing;
pub mod probe;
pub mod reconcile;
pub mod walker;

pub use catalog::{Catalog, MemoryCatalog, ServerRecord, SqliteCatalog};
pub use config::IndexerConfig;
pub use error::{IndexerError, IndexerResult};
pub use indexer::{IndexOutcome, Indexer};
pub use iptools::{Ip, IpRange, IpSet};
