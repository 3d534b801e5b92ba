//! Engine-level error type

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::ftp::FtpError;
use crate::iptools::InvalidAddress;
use crate::lease::LeaseError;
use crate::walker::WalkError;

/// Everything that can go wrong inside the engine. Per-server failures are
/// caught by the scheduler; the variants mostly matter for log routing and
/// for callers of the one-shot commands.
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error(transparent)]
    InvalidAddress(#[from] InvalidAddress),

    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Walk(#[from] WalkError),

    #[error(transparent)]
    Ftp(#[from] FtpError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type IndexerResult<T> = Result<T, IndexerError>;
