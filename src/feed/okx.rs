//! OKX USDT-margined swap feed.
//!
//! OKX has no combined stream: each symbol needs explicit `mark-price` and
//! `funding-rate` channel subscriptions, and the two halves of a snapshot
//! arrive on separate messages, merged in the store. Keepalive is the literal
//! text frame `ping` every 20 s; the literal `pong` reply is discarded before
//! JSON parsing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use crate::config::{OKX_PING_INTERVAL_SECS, OKX_WS_URL, RECONNECT_BASE_MS, RECONNECT_CAP_MS};
use crate::error::Result;
use crate::feed::{now_ms, supervise, Backoff, Shutdown, VenueFeed};
use crate::metadata::MetadataCache;
use crate::state::SnapshotStore;
use crate::types::{InstrumentSnapshot, Venue};

#[derive(Debug, PartialEq)]
pub enum OkxUpdate {
    MarkPrice {
        inst_id: String,
        mark_price: f64,
    },
    FundingRate {
        inst_id: String,
        /// Percent per interval (wire fraction × 100).
        funding_rate: f64,
        next_funding_time: i64,
    },
}

#[derive(Debug, Deserialize)]
struct RawArg {
    channel: String,
}

/// Raw shape covering data pushes and subscribe acks; acks have no `data`.
#[derive(Debug, Deserialize)]
struct RawOkxMsg {
    arg: Option<RawArg>,
    data: Option<Vec<serde_json::Value>>,
}

/// Parse one inbound frame into zero or more updates. `pong` replies,
/// subscribe acks, and malformed frames all yield nothing.
pub fn parse_okx_frame(raw: &str) -> Vec<OkxUpdate> {
    if raw.trim() == "pong" {
        return Vec::new();
    }
    let Ok(msg) = serde_json::from_str::<RawOkxMsg>(raw) else {
        return Vec::new();
    };
    let (Some(arg), Some(data)) = (msg.arg, msg.data) else {
        return Vec::new();
    };

    let mut updates = Vec::new();
    for item in data {
        let Some(inst_id) = item.get("instId").and_then(|s| s.as_str()) else { continue };
        match arg.channel.as_str() {
            "mark-price" => {
                let Some(mark_price) = item
                    .get("markPx")
                    .and_then(|p| p.as_str())
                    .and_then(|p| p.parse::<f64>().ok())
                else {
                    continue;
                };
                updates.push(OkxUpdate::MarkPrice { inst_id: inst_id.to_string(), mark_price });
            }
            "funding-rate" => {
                let Some(rate_fraction) = item
                    .get("fundingRate")
                    .and_then(|r| r.as_str())
                    .and_then(|r| r.parse::<f64>().ok())
                else {
                    continue;
                };
                let Some(next_funding_time) = item
                    .get("nextFundingTime")
                    .and_then(|t| t.as_str())
                    .and_then(|t| t.parse::<i64>().ok())
                else {
                    continue;
                };
                updates.push(OkxUpdate::FundingRate {
                    inst_id: inst_id.to_string(),
                    funding_rate: rate_fraction * 100.0,
                    next_funding_time,
                });
            }
            _ => {}
        }
    }
    updates
}

fn build_subscribe_msg(symbols: &[String]) -> String {
    let args: Vec<serde_json::Value> = symbols
        .iter()
        .flat_map(|s| {
            [
                serde_json::json!({"channel": "mark-price", "instId": s}),
                serde_json::json!({"channel": "funding-rate", "instId": s}),
            ]
        })
        .collect();
    serde_json::json!({"op": "subscribe", "args": args}).to_string()
}

pub struct OkxFeed {
    store: Arc<SnapshotStore>,
    metadata: Arc<MetadataCache>,
    symbols: Vec<String>,
    running: AtomicBool,
    shutdown: Arc<Shutdown>,
    connected: Arc<AtomicBool>,
}

impl OkxFeed {
    pub fn new(metadata: Arc<MetadataCache>, symbols: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            store: SnapshotStore::new(),
            metadata,
            symbols,
            running: AtomicBool::new(false),
            shutdown: Shutdown::new(),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn connect_once(
        store: Arc<SnapshotStore>,
        metadata: Arc<MetadataCache>,
        symbols: Arc<Vec<String>>,
        shutdown: Arc<Shutdown>,
        connected: Arc<AtomicBool>,
    ) -> Result<()> {
        let (ws_stream, _) = connect_async(OKX_WS_URL).await?;
        let (mut write, mut read) = ws_stream.split();

        // Subscriptions do not survive a reconnect; re-send every time.
        write.send(Message::Text(build_subscribe_msg(&symbols).into())).await?;
        debug!("okx subscribed to {} symbols", symbols.len());
        connected.store(true, Ordering::SeqCst);

        let mut ping_interval = interval(Duration::from_secs(OKX_PING_INTERVAL_SECS));
        ping_interval.tick().await; // consume immediate first tick

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            handle_frame(&store, &metadata, &text);
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
                    write.send(Message::Text("ping".to_string().into())).await?;
                }
                _ = shutdown.notified() => return Ok(()),
            }
        }
    }
}

fn handle_frame(store: &SnapshotStore, metadata: &MetadataCache, raw: &str) {
    let observed_at = now_ms();
    for update in parse_okx_frame(raw) {
        match update {
            OkxUpdate::MarkPrice { inst_id, mark_price } => {
                store.update_mark_price(&inst_id, mark_price, observed_at);
            }
            OkxUpdate::FundingRate { inst_id, funding_rate, next_funding_time } => {
                let interval_hours = metadata.interval_for(Venue::Okx, &inst_id);
                store.update_funding(
                    &inst_id,
                    funding_rate,
                    interval_hours,
                    next_funding_time,
                    observed_at,
                );
            }
        }
    }
}

impl VenueFeed for OkxFeed {
    fn venue(&self) -> Venue {
        Venue::Okx
    }

    fn connect(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let store = Arc::clone(&self.store);
        let metadata = Arc::clone(&self.metadata);
        let symbols = Arc::new(self.symbols.clone());
        let shutdown = Arc::clone(&self.shutdown);
        let connected = Arc::clone(&self.connected);
        tokio::spawn(async move {
            let backoff = Backoff::new(RECONNECT_BASE_MS, RECONNECT_CAP_MS);
            let shutdown_loop = Arc::clone(&shutdown);
            let connected_loop = Arc::clone(&connected);
            supervise(Venue::Okx, backoff, shutdown, connected, move || {
                Self::connect_once(
                    Arc::clone(&store),
                    Arc::clone(&metadata),
                    Arc::clone(&symbols),
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
    fn parses_mark_price_push() {
        let raw = r#"{"arg":{"channel":"mark-price","instId":"BTC-USDT-SWAP"},"data":[{"instType":"SWAP","instId":"BTC-USDT-SWAP","markPx":"50000.1","ts":"1700000000000"}]}"#;
        let updates = parse_okx_frame(raw);
        assert_eq!(
            updates,
            vec![OkxUpdate::MarkPrice { inst_id: "BTC-USDT-SWAP".to_string(), mark_price: 50000.1 }]
        );
    }

    #[test]
    fn parses_funding_rate_push_as_percent() {
        let raw = r#"{"arg":{"channel":"funding-rate","instId":"BTC-USDT-SWAP"},"data":[{"instId":"BTC-USDT-SWAP","fundingRate":"0.0001","fundingTime":"1700000000000","nextFundingTime":"1700028800000"}]}"#;
        let updates = parse_okx_frame(raw);
        assert_eq!(updates.len(), 1);
        match &updates[0] {
            OkxUpdate::FundingRate { inst_id, funding_rate, next_funding_time } => {
                assert_eq!(inst_id, "BTC-USDT-SWAP");
                assert!((funding_rate - 0.01).abs() < 1e-12);
                assert_eq!(*next_funding_time, 1_700_028_800_000);
            }
            other => panic!("expected FundingRate, got {other:?}"),
        }
    }

    #[test]
    fn pong_and_acks_are_discarded() {
        assert!(parse_okx_frame("pong").is_empty());
        assert!(parse_okx_frame(r#"{"event":"subscribe","arg":{"channel":"mark-price","instId":"BTC-USDT-SWAP"},"connId":"abc"}"#).is_empty());
        assert!(parse_okx_frame("garbage").is_empty());
    }

    #[test]
    fn split_channels_merge_into_one_snapshot() {
        let store = SnapshotStore::new();
        let metadata = MetadataCache::new();
        metadata.set_interval(Venue::Okx, "BTC-USDT-SWAP", 8);

        handle_frame(
            &store,
            &metadata,
            r#"{"arg":{"channel":"mark-price","instId":"BTC-USDT-SWAP"},"data":[{"instId":"BTC-USDT-SWAP","markPx":"50000"}]}"#,
        );
        assert!(store.get("BTC-USDT-SWAP").is_none());

        handle_frame(
            &store,
            &metadata,
            r#"{"arg":{"channel":"funding-rate","instId":"BTC-USDT-SWAP"},"data":[{"instId":"BTC-USDT-SWAP","fundingRate":"0.0002","nextFundingTime":"1700028800000"}]}"#,
        );
        let snap = store.get("BTC-USDT-SWAP").unwrap();
        assert!((snap.mark_price - 50_000.0).abs() < 1e-9);
        assert!((snap.funding_rate - 0.02).abs() < 1e-12);
        assert_eq!(snap.funding_interval_hours, 8);
    }

    #[test]
    fn subscribe_msg_covers_both_channels() {
        let msg = build_subscribe_msg(&["BTC-USDT-SWAP".to_string()]);
        let v: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(v["op"], "subscribe");
        let args = v["args"].as_array().unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(args[0]["channel"], "mark-price");
        assert_eq!(args[1]["channel"], "funding-rate");
    }
}
