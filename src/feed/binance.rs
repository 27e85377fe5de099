//! Binance USDT-margined perpetuals feed.
//!
//! One combined stream (`!markPrice@arr`) carries mark price, funding rate,
//! and next funding time for every listed perpetual, so each frame fully
//! replaces the affected snapshots. Binance pings from the server side; no
//! client keepalive is needed beyond answering with pongs.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use crate::config::{BINANCE_WS_URL, RECONNECT_BASE_MS, RECONNECT_CAP_MS};
use crate::error::Result;
use crate::feed::{now_ms, supervise, Backoff, Shutdown, VenueFeed};
use crate::metadata::MetadataCache;
use crate::state::SnapshotStore;
use crate::types::{InstrumentSnapshot, Venue};

static PARSE_FAILURES: AtomicU64 = AtomicU64::new(0);

/// One entry of a `!markPrice@arr` frame.
#[derive(Debug, Deserialize)]
pub struct MarkPriceUpdate {
    #[serde(rename = "s")]
    pub symbol: String,
    /// Mark price, decimal string.
    #[serde(rename = "p")]
    pub mark_price: String,
    /// Funding rate as a fraction per interval, decimal string.
    #[serde(rename = "r")]
    pub funding_rate: String,
    /// Next funding time, epoch ms.
    #[serde(rename = "T")]
    pub next_funding_time: i64,
}

/// Parse a raw frame into its updates. Anything that is not the expected
/// array shape is discarded: a malformed message must never break the stream.
pub fn parse_mark_price_frame(raw: &str) -> Vec<MarkPriceUpdate> {
    match serde_json::from_str::<Vec<MarkPriceUpdate>>(raw) {
        Ok(updates) => updates,
        Err(_) => {
            let count = PARSE_FAILURES.fetch_add(1, Ordering::Relaxed) + 1;
            if count <= 10 || count % 1000 == 0 {
                let sample = &raw[..200.min(raw.len())];
                debug!(count, "unrecognized binance frame: {sample}");
            }
            Vec::new()
        }
    }
}

pub struct BinanceFeed {
    store: Arc<SnapshotStore>,
    metadata: Arc<MetadataCache>,
    running: AtomicBool,
    shutdown: Arc<Shutdown>,
    connected: Arc<AtomicBool>,
}

impl BinanceFeed {
    pub fn new(metadata: Arc<MetadataCache>) -> Arc<Self> {
        Arc::new(Self {
            store: SnapshotStore::new(),
            metadata,
            running: AtomicBool::new(false),
            shutdown: Shutdown::new(),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn connect_once(
        store: Arc<SnapshotStore>,
        metadata: Arc<MetadataCache>,
        shutdown: Arc<Shutdown>,
        connected: Arc<AtomicBool>,
    ) -> Result<()> {
        let (ws_stream, _) = connect_async(BINANCE_WS_URL).await?;
        let (mut write, mut read) = ws_stream.split();
        connected.store(true, Ordering::SeqCst);

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
                _ = shutdown.notified() => return Ok(()),
            }
        }
    }
}

fn handle_frame(store: &SnapshotStore, metadata: &MetadataCache, raw: &str) {
    let observed_at = now_ms();
    for update in parse_mark_price_frame(raw) {
        let (Ok(mark_price), Ok(rate_fraction)) = (
            update.mark_price.parse::<f64>(),
            update.funding_rate.parse::<f64>(),
        ) else {
            continue;
        };
        let funding_interval_hours = metadata.interval_for(Venue::Binance, &update.symbol);
        store.insert(InstrumentSnapshot {
            symbol: update.symbol,
            mark_price,
            // The wire carries a fraction; snapshots store percent.
            funding_rate: rate_fraction * 100.0,
            funding_interval_hours,
            next_funding_time: update.next_funding_time,
            observed_at,
        });
    }
}

impl VenueFeed for BinanceFeed {
    fn venue(&self) -> Venue {
        Venue::Binance
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
        let shutdown = Arc::clone(&self.shutdown);
        let connected = Arc::clone(&self.connected);
        tokio::spawn(async move {
            let backoff = Backoff::new(RECONNECT_BASE_MS, RECONNECT_CAP_MS);
            let shutdown_loop = Arc::clone(&shutdown);
            let connected_loop = Arc::clone(&connected);
            supervise(Venue::Binance, backoff, shutdown, connected, move || {
                Self::connect_once(
                    Arc::clone(&store),
                    Arc::clone(&metadata),
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
