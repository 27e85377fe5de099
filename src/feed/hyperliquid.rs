//! Hyperliquid feed.
//!
//! Prices arrive on the `allMids` subscription (mid price stands in for mark
//! price; the venue publishes no separate mark stream). Funding rates change
//! hourly and are not on the socket at all, so a REST poll against
//! `metaAndAssetCtxs` refreshes them once a minute. Funding settles every
//! hour on the hour; the hourly rate is stored exactly as observed with
//! `funding_interval_hours = 1`, since comparability across venues is the
//! normalizer's job, not a rescale here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::config::{
    HYPERLIQUID_FUNDING_POLL_SECS, HYPERLIQUID_INFO_URL, HYPERLIQUID_PING_INTERVAL_SECS,
    HYPERLIQUID_RECONNECT_BASE_MS, HYPERLIQUID_RECONNECT_CAP_MS, HYPERLIQUID_WS_URL,
};
use crate::error::Result;
use crate::feed::{now_ms, supervise, Backoff, Shutdown, VenueFeed};
use crate::state::SnapshotStore;
use crate::types::{InstrumentSnapshot, Venue};

const MS_PER_HOUR: i64 = 3_600_000;

/// Parse an `allMids` push into `(symbol, mid)` pairs. Keys starting with
/// `@` are spot index ids, not perp symbols, and are skipped.
pub fn parse_all_mids_frame(raw: &str) -> Vec<(String, f64)> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return Vec::new();
    };
    if value.get("channel").and_then(|c| c.as_str()) != Some("allMids") {
        return Vec::new();
    }
    let Some(mids) = value
        .get("data")
        .and_then(|d| d.get("mids"))
        .and_then(|m| m.as_object())
    else {
        return Vec::new();
    };

    mids.iter()
        .filter(|(symbol, _)| !symbol.starts_with('@'))
        .filter_map(|(symbol, price)| {
            let price = price.as_str()?.parse::<f64>().ok()?;
            Some((symbol.clone(), price))
        })
        .collect()
}

/// Extract `(symbol, hourly rate percent)` pairs from a `metaAndAssetCtxs`
/// response: `[{universe: [{name}, ...]}, [{funding}, ...]]`, index-aligned.
pub fn parse_funding_contexts(value: &serde_json::Value) -> Vec<(String, f64)> {
    let Some(parts) = value.as_array() else { return Vec::new() };
    let (Some(meta), Some(contexts)) = (parts.first(), parts.get(1)) else {
        return Vec::new();
    };
    let Some(universe) = meta.get("universe").and_then(|u| u.as_array()) else {
        return Vec::new();
    };
    let Some(contexts) = contexts.as_array() else { return Vec::new() };

    universe
        .iter()
        .zip(contexts)
        .filter_map(|(asset, ctx)| {
            let name = asset.get("name")?.as_str()?;
            let rate_fraction = ctx.get("funding")?.as_str()?.parse::<f64>().ok()?;
            Some((name.to_string(), rate_fraction * 100.0))
        })
        .collect()
}

/// Hyperliquid settles funding on the hour; the next settlement is the next
/// full hour after `now`.
pub fn next_top_of_hour(now_ms: i64) -> i64 {
    (now_ms / MS_PER_HOUR + 1) * MS_PER_HOUR
}

pub struct HyperliquidFeed {
    store: Arc<SnapshotStore>,
    running: AtomicBool,
    shutdown: Arc<Shutdown>,
    connected: Arc<AtomicBool>,
}

impl HyperliquidFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            store: SnapshotStore::new(),
            running: AtomicBool::new(false),
            shutdown: Shutdown::new(),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn connect_once(
        store: Arc<SnapshotStore>,
        shutdown: Arc<Shutdown>,
        connected: Arc<AtomicBool>,
    ) -> Result<()> {
        let (ws_stream, _) = connect_async(HYPERLIQUID_WS_URL).await?;
        let (mut write, mut read) = ws_stream.split();

        let sub = serde_json::json!({"method": "subscribe", "subscription": {"type": "allMids"}});
        write.send(Message::Text(sub.to_string().into())).await?;
        connected.store(true, Ordering::SeqCst);

        let mut ping_interval = interval(Duration::from_secs(HYPERLIQUID_PING_INTERVAL_SECS));
        ping_interval.tick().await; // consume immediate first tick

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            handle_mids_frame(&store, &text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(_)) => {}
                    }
                }
                _ = ping_interval.tick() => {
                    write.send(Message::Text(r#"{"method":"ping"}"#.to_string().into())).await?;
                }
                _ = shutdown.notified() => return Ok(()),
            }
        }
    }

    /// REST poll keeping funding rates fresh. Runs independently of the
    /// socket: a venue whose stream is down but whose REST API answers still
    /// degrades to stale-price rather than no-funding data.
    async fn funding_poll(store: Arc<SnapshotStore>, shutdown: Arc<Shutdown>) {
        let client = match reqwest::Client::builder().timeout(Duration::from_secs(10)).build() {
            Ok(c) => c,
            Err(e) => {
                warn!("hyperliquid funding poll disabled, cannot build HTTP client: {e}");
                return;
            }
        };

        let mut poll_interval = interval(Duration::from_secs(HYPERLIQUID_FUNDING_POLL_SECS));
        loop {
            tokio::select! {
                _ = poll_interval.tick() => {}
                _ = shutdown.notified() => return,
            }

            match fetch_funding(&client).await {
                Ok(rates) => {
                    let observed_at = now_ms();
                    let next_funding_time = next_top_of_hour(observed_at);
                    let count = rates.len();
                    for (symbol, rate_percent) in rates {
                        store.update_funding(&symbol, rate_percent, 1, next_funding_time, observed_at);
                    }
                    debug!("hyperliquid funding rates updated for {count} assets");
                }
                Err(e) => warn!("hyperliquid funding poll failed: {e}"),
            }
        }
    }
}

async fn fetch_funding(client: &reqwest::Client) -> Result<Vec<(String, f64)>> {
    let resp: serde_json::Value = client
        .post(HYPERLIQUID_INFO_URL)
        .json(&serde_json::json!({"type": "metaAndAssetCtxs"}))
        .send()
        .await?
        .json()
        .await?;
    Ok(parse_funding_contexts(&resp))
}

fn handle_mids_frame(store: &SnapshotStore, raw: &str) {
    let observed_at = now_ms();
    for (symbol, mid) in parse_all_mids_frame(raw) {
        store.update_mark_price(&symbol, mid, observed_at);
    }
}

impl VenueFeed for HyperliquidFeed {
    fn venue(&self) -> Venue {
        Venue::Hyperliquid
    }

    fn connect(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let poll_store = Arc::clone(&self.store);
        let poll_shutdown = Arc::clone(&self.shutdown);
        tokio::spawn(async move {
            Self::funding_poll(poll_store, poll_shutdown).await;
        });

        let store = Arc::clone(&self.store);
        let shutdown = Arc::clone(&self.shutdown);
        let connected = Arc::clone(&self.connected);
        tokio::spawn(async move {
            let backoff = Backoff::new(HYPERLIQUID_RECONNECT_BASE_MS, HYPERLIQUID_RECONNECT_CAP_MS);
            let shutdown_loop = Arc::clone(&shutdown);
            let connected_loop = Arc::clone(&connected);
            supervise(Venue::Hyperliquid, backoff, shutdown, connected, move || {
                Self::connect_once(
                    Arc::clone(&store),
                    Arc::clone(&shutdown_loop),
                    Arc::clone(&connected_loop),
                )
            })
            .await;
        });
    }

    fn get_data(&self, symbol: &str) -> Option<InstrumentSnapshot> {
        self.store.get(symbol)
    }

    fn disconnect(&self) {
        self.shutdown.trigger();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn snapshots(&self) -> Vec<InstrumentSnapshot> {
        self.store.all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_mids_and_skips_spot_indexes() {
        let raw = r#"{"channel":"allMids","data":{"mids":{"BTC":"50000.5","ETH":"3000.25","@1":"12.34"}}}"#;
        let mut mids = parse_all_mids_frame(raw);
        mids.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(mids.len(), 2);
        assert_eq!(mids[0].0, "BTC");
        assert!((mids[0].1 - 50_000.5).abs() < 1e-9);
        assert_eq!(mids[1].0, "ETH");
    }

    #[test]
    fn other_channels_are_discarded() {
        assert!(parse_all_mids_frame(r#"{"channel":"subscriptionResponse","data":{}}"#).is_empty());
        assert!(parse_all_mids_frame(r#"{"channel":"pong"}"#).is_empty());
        assert!(parse_all_mids_frame("garbage").is_empty());
    }

    #[test]
    fn funding_contexts_align_universe_with_rates() {
        let resp: serde_json::Value = serde_json::from_str(
            r#"[
                {"universe":[{"name":"BTC"},{"name":"ETH"}]},
                [{"funding":"0.0000125","markPx":"50000"},{"funding":"-0.00002","markPx":"3000"}]
            ]"#,
        )
        .unwrap();
        let rates = parse_funding_contexts(&resp);
        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0].0, "BTC");
        // Hourly fraction 0.0000125 = 0.00125 percent per hour, kept hourly.
        assert!((rates[0].1 - 0.00125).abs() < 1e-12);
        assert!((rates[1].1 - -0.002).abs() < 1e-12);
    }

    #[test]
    fn next_settlement_is_the_next_full_hour() {
        let base = 1_700_000_000_000 / MS_PER_HOUR * MS_PER_HOUR;
        assert_eq!(next_top_of_hour(base), base + MS_PER_HOUR);
        assert_eq!(next_top_of_hour(base + 1), base + MS_PER_HOUR);
        assert_eq!(next_top_of_hour(base + MS_PER_HOUR - 1), base + MS_PER_HOUR);
    }

    #[test]
    fn mids_merge_with_polled_funding() {
        let store = SnapshotStore::new();
        handle_mids_frame(&store, r#"{"channel":"allMids","data":{"mids":{"BTC":"50000"}}}"#);
        assert!(store.get("BTC").is_none());

        let observed_at = 1_700_000_000_000;
        store.update_funding("BTC", 0.00125, 1, next_top_of_hour(observed_at), observed_at);
        let snap = store.get("BTC").unwrap();
        assert_eq!(snap.funding_interval_hours, 1);
        assert!((snap.mark_price - 50_000.0).abs() < 1e-9);
    }
}
