//! Bybit linear perpetuals feed.
//!
//! Ticker pushes come as a full snapshot on subscribe and as deltas after,
//! and a delta carries only the fields that changed, so updates must merge,
//! never replace blindly. Keepalive is `{"op":"ping"}` every 20 s; the
//! `op:pong` ack has no topic and falls through the parser.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use crate::config::{BYBIT_PING_INTERVAL_SECS, BYBIT_WS_URL, RECONNECT_BASE_MS, RECONNECT_CAP_MS};
use crate::error::Result;
use crate::feed::{now_ms, supervise, Backoff, Shutdown, VenueFeed};
use crate::metadata::MetadataCache;
use crate::state::SnapshotStore;
use crate::types::{InstrumentSnapshot, Venue};

/// Fields of a ticker push we care about. All optional: deltas omit
/// whatever did not change.
#[derive(Debug, Default, PartialEq)]
pub struct TickerUpdate {
    pub symbol: String,
    pub mark_price: Option<f64>,
    /// Percent per interval (wire fraction × 100).
    pub funding_rate: Option<f64>,
    pub next_funding_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawTickerData {
    symbol: String,
    #[serde(rename = "markPrice")]
    mark_price: Option<String>,
    #[serde(rename = "fundingRate")]
    funding_rate: Option<String>,
    #[serde(rename = "nextFundingTime")]
    next_funding_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBybitMsg {
    topic: Option<String>,
    data: Option<RawTickerData>,
}

/// Parse one inbound frame. Pong acks, subscribe confirmations, and frames
/// for other topics yield None.
pub fn parse_ticker_frame(raw: &str) -> Option<TickerUpdate> {
    let msg = serde_json::from_str::<RawBybitMsg>(raw).ok()?;
    let topic = msg.topic?;
    if !topic.starts_with("tickers.") {
        return None;
    }
    let data = msg.data?;

    Some(TickerUpdate {
        symbol: data.symbol,
        mark_price: data.mark_price.and_then(|p| p.parse().ok()),
        funding_rate: data
            .funding_rate
            .and_then(|r| r.parse::<f64>().ok())
            .map(|fraction| fraction * 100.0),
        next_funding_time: data.next_funding_time.and_then(|t| t.parse().ok()),
    })
}

fn build_subscribe_msg(symbols: &[String]) -> String {
    let args: Vec<String> = symbols.iter().map(|s| format!("tickers.{s}")).collect();
    serde_json::json!({"op": "subscribe", "args": args}).to_string()
}

pub struct BybitFeed {
    store: Arc<SnapshotStore>,
    metadata: Arc<MetadataCache>,
    symbols: Vec<String>,
    running: AtomicBool,
    shutdown: Arc<Shutdown>,
    connected: Arc<AtomicBool>,
}

impl BybitFeed {
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
        let (ws_stream, _) = connect_async(BYBIT_WS_URL).await?;
        let (mut write, mut read) = ws_stream.split();

        write.send(Message::Text(build_subscribe_msg(&symbols).into())).await?;
        debug!("bybit subscribed to {} symbols", symbols.len());
        connected.store(true, Ordering::SeqCst);

        let mut ping_interval = interval(Duration::from_secs(BYBIT_PING_INTERVAL_SECS));
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
                    write.send(Message::Text(r#"{"op":"ping"}"#.to_string().into())).await?;
                }
                _ = shutdown.notified() => return Ok(()),
            }
        }
    }
}

fn handle_frame(store: &SnapshotStore, metadata: &MetadataCache, raw: &str) {
    let Some(update) = parse_ticker_frame(raw) else { return };
    let observed_at = now_ms();

    if let Some(mark_price) = update.mark_price {
        store.update_mark_price(&update.symbol, mark_price, observed_at);
    }
    // Funding data is only usable when rate and settlement time arrive
    // together; a lone nextFundingTime delta keeps the previous pair.
    if let (Some(funding_rate), Some(next_funding_time)) =
        (update.funding_rate, update.next_funding_time)
    {
        let interval_hours = metadata.interval_for(Venue::Bybit, &update.symbol);
        store.update_funding(
            &update.symbol,
            funding_rate,
            interval_hours,
            next_funding_time,
            observed_at,
        );
    }
}

impl VenueFeed for BybitFeed {
    fn venue(&self) -> Venue {
        Venue::Bybit
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
            supervise(Venue::Bybit, backoff, shutdown, connected, move || {
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
    fn parses_full_ticker_snapshot() {
        let raw = r#"{"topic":"tickers.BTCUSDT","type":"snapshot","ts":1700000000000,"data":{"symbol":"BTCUSDT","markPrice":"50000.50","fundingRate":"0.0001","nextFundingTime":"1700028800000","lastPrice":"50001"}}"#;
        let update = parse_ticker_frame(raw).unwrap();
        assert_eq!(update.symbol, "BTCUSDT");
        assert!((update.mark_price.unwrap() - 50_000.5).abs() < 1e-9);
        assert!((update.funding_rate.unwrap() - 0.01).abs() < 1e-12);
        assert_eq!(update.next_funding_time, Some(1_700_028_800_000));
    }

    #[test]
    fn parses_price_only_delta() {
        let raw = r#"{"topic":"tickers.BTCUSDT","type":"delta","ts":1700000001000,"data":{"symbol":"BTCUSDT","markPrice":"50010.00"}}"#;
        let update = parse_ticker_frame(raw).unwrap();
        assert!((update.mark_price.unwrap() - 50_010.0).abs() < 1e-9);
        assert!(update.funding_rate.is_none());
        assert!(update.next_funding_time.is_none());
    }

    #[test]
    fn pong_ack_is_discarded() {
        let raw = r#"{"success":true,"ret_msg":"pong","conn_id":"abc","op":"ping"}"#;
        assert!(parse_ticker_frame(raw).is_none());
    }

    #[test]
    fn other_topics_are_discarded() {
        let raw = r#"{"topic":"orderbook.50.BTCUSDT","data":{"symbol":"BTCUSDT"}}"#;
        assert!(parse_ticker_frame(raw).is_none());
    }

    #[test]
    fn delta_preserves_funding_from_earlier_snapshot() {
        let store = SnapshotStore::new();
        let metadata = MetadataCache::new();
        metadata.set_interval(Venue::Bybit, "BTCUSDT", 8);

        handle_frame(
            &store,
            &metadata,
            r#"{"topic":"tickers.BTCUSDT","type":"snapshot","data":{"symbol":"BTCUSDT","markPrice":"50000","fundingRate":"0.0001","nextFundingTime":"1700028800000"}}"#,
        );
        handle_frame(
            &store,
            &metadata,
            r#"{"topic":"tickers.BTCUSDT","type":"delta","data":{"symbol":"BTCUSDT","markPrice":"50500"}}"#,
        );

        let snap = store.get("BTCUSDT").unwrap();
        assert!((snap.mark_price - 50_500.0).abs() < 1e-9);
        assert!((snap.funding_rate - 0.01).abs() < 1e-12);
        assert_eq!(snap.next_funding_time, 1_700_028_800_000);
    }

    #[test]
    fn subscribe_msg_uses_ticker_topics() {
        let msg = build_subscribe_msg(&["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
        let v: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(v["op"], "subscribe");
        assert_eq!(v["args"][0], "tickers.BTCUSDT");
        assert_eq!(v["args"][1], "tickers.ETHUSDT");
    }
}
