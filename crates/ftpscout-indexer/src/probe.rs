//! FTP liveness probe
//!
//! A probe opens the control connection to port 21, waits for the greeting
//! and hangs up. Anything else (refusal, timeout, protocol garbage) counts
//! as offline. No retries; the scheduler will come back on a later tick.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use futures::{stream, StreamExt};
use suppaftp::FtpStream;
use tokio::task;
use tracing::{debug, trace};

use crate::iptools::Ip;

/// FTP control port
pub const FTP_PORT: u16 = 21;

/// Default width of the concurrent probe pool
pub const DEFAULT_PROBE_POOL: usize = 64;

/// Probe a single address. Returns whether an FTP server answered its
/// greeting within `timeout`.
///
/// Safe to invoke concurrently; each probe owns its connection.
pub async fn probe_ftp(ip: Ip, timeout: Duration) -> bool {
    let addr = SocketAddr::new(IpAddr::V4(ip.into()), FTP_PORT);

    let attempt = task::spawn_blocking(move || {
        // connect_timeout also reads the server greeting.
        match FtpStream::connect_timeout(addr, timeout) {
            Ok(mut stream) => {
                if let Err(e) = stream.quit() {
                    debug!(address = %ip, error = %e, "FTP server greeted but QUIT failed");
                }
                true
            },
            Err(e) => {
                trace!(address = %ip, error = %e, "probe failed");
                false
            },
        }
    });

    // The inner connect timeout does not cover the greeting read, so the
    // whole attempt shares one outer budget.
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(online)) => online,
        Ok(Err(e)) => {
            debug!(address = %ip, error = %e, "probe task failed");
            false
        },
        Err(_) => {
            trace!(address = %ip, "probe timed out");
            false
        },
    }
}

/// Probe many addresses through a bounded pool, yielding `(address, online)`
/// pairs in completion order.
pub async fn probe_many(
    addresses: impl IntoIterator<Item = Ip>,
    timeout: Duration,
    pool: usize,
) -> Vec<(Ip, bool)> {
    stream::iter(
        addresses
            .into_iter()
            .map(|ip| async move { (ip, probe_ftp(ip, timeout).await) }),
    )
    .buffer_unordered(pool.max(1))
    .collect()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_dead_address_is_offline() {
        // TEST-NET-1 is guaranteed unrouted; refusal or timeout both count
        // as offline.
        let ip: Ip = "192.0.2.1".parse().unwrap();
        assert!(!probe_ftp(ip, Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_probe_many_reports_every_address() {
        let addresses: Vec<Ip> = vec![
            "192.0.2.1".parse().unwrap(),
            "192.0.2.2".parse().unwrap(),
            "192.0.2.3".parse().unwrap(),
        ];
        let results = probe_many(addresses.clone(), Duration::from_millis(50), 2).await;
        assert_eq!(results.len(), addresses.len());
        assert!(results.iter().all(|(_, online)| !online));
    }
}
