//! Venue feed adapters. Each adapter owns one long-lived streaming
//! connection, maintains a per-symbol snapshot table, and reconnects on its
//! own exponential backoff schedule. Venues never share mutable state.

pub mod binance;
pub mod bybit;
pub mod hyperliquid;
pub mod okx;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Notify;
use tracing::{info, warn};

use crate::types::{InstrumentSnapshot, Venue};

pub use binance::BinanceFeed;
pub use bybit::BybitFeed;
pub use hyperliquid::HyperliquidFeed;
pub use okx::OkxFeed;

// ---------------------------------------------------------------------------
// VenueFeed
// ---------------------------------------------------------------------------

/// Common capability surface of one venue connection. One concrete
/// implementation per venue; the scorer and API only see this trait, so tests
/// substitute fakes without any network I/O.
pub trait VenueFeed: Send + Sync {
    fn venue(&self) -> Venue;

    /// Idempotent: spawns the connection task on first call, no-op after.
    fn connect(&self);

    /// Non-blocking read of the current cache; never touches the network.
    fn get_data(&self, symbol: &str) -> Option<InstrumentSnapshot>;

    /// Stops keepalive and reconnection and closes the connection.
    /// Idempotent; safe to call concurrently with an in-flight reconnect.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// All complete snapshots, for the raw-snapshot API endpoint.
    fn snapshots(&self) -> Vec<InstrumentSnapshot>;
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Reconnect delay schedule: `min(base * 2^failures, cap)`, reset to base
/// after a successful connected transition.
#[derive(Debug)]
pub struct Backoff {
    base_ms: u64,
    cap_ms: u64,
    failures: u32,
}

impl Backoff {
    pub fn new(base_ms: u64, cap_ms: u64) -> Self {
        Self { base_ms, cap_ms, failures: 0 }
    }

    pub fn next_delay(&mut self) -> Duration {
        let shift = self.failures.min(16);
        let ms = self.base_ms.saturating_mul(1u64 << shift).min(self.cap_ms);
        self.failures = self.failures.saturating_add(1);
        Duration::from_millis(ms)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Shutdown flag shared between an adapter handle and its connection task.
/// `trigger` is idempotent; `notified` completes immediately if shutdown was
/// already requested, so the reconnect sleep can never outlive a disconnect.
pub struct Shutdown {
    flag: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { flag: AtomicBool::new(false), notify: Notify::new() })
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub async fn notified(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_shutdown() {
            return;
        }
        notified.await;
    }
}

// ---------------------------------------------------------------------------
// Connection supervisor
// ---------------------------------------------------------------------------

/// Drives one venue's connect → stream → reconnect loop forever.
///
/// `connect_once` performs the venue handshake and pumps messages until the
/// connection drops; it must set `connected` once the stream is established.
/// The supervisor resets the backoff only if the attempt actually reached the
/// connected state, so a venue that fails during its handshake keeps doubling.
pub(crate) async fn supervise<F, Fut>(
    venue: Venue,
    mut backoff: Backoff,
    shutdown: Arc<Shutdown>,
    connected: Arc<AtomicBool>,
    mut connect_once: F,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::error::Result<()>>,
{
    loop {
        if shutdown.is_shutdown() {
            break;
        }

        info!(venue = %venue, "connecting");
        match connect_once().await {
            Ok(()) => info!(venue = %venue, "connection closed"),
            Err(e) => warn!(venue = %venue, "connection error: {e}"),
        }

        if connected.swap(false, Ordering::SeqCst) {
            backoff.reset();
        }

        if shutdown.is_shutdown() {
            break;
        }

        let delay = backoff.next_delay();
        warn!(venue = %venue, "reconnecting in {}ms", delay.as_millis());
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.notified() => break,
        }
    }

    info!(venue = %venue, "feed stopped");
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base_and_caps() {
        let mut backoff = Backoff::new(1_000, 30_000);
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
    }

    #[test]
    fn backoff_resets_to_base_after_connected() {
        let mut backoff = Backoff::new(5_000, 60_000);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.next_delay().as_millis(), 20_000);

        backoff.reset();
        assert_eq!(backoff.next_delay().as_millis(), 5_000);
    }

    #[test]
    fn backoff_never_overflows_on_many_failures() {
        let mut backoff = Backoff::new(1_000, 30_000);
        for _ in 0..100 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay().as_millis(), 30_000);
    }

    #[tokio::test]
    async fn shutdown_notified_completes_after_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        // Already triggered: must not hang.
        shutdown.notified().await;
        assert!(shutdown.is_shutdown());
    }

    #[tokio::test]
    async fn shutdown_trigger_is_idempotent() {
        let shutdown = Shutdown::new();
        let waiter = {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move { shutdown.notified().await })
        };
        tokio::task::yield_now().await;
        shutdown.trigger();
        shutdown.trigger();
        waiter.await.unwrap();
    }
}
