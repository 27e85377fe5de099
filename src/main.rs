mod api;
mod config;
mod error;
mod feed;
mod funding;
mod instruments;
mod metadata;
mod scorer;
mod state;
mod types;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, SCORE_INTERVAL_SECS};
use crate::error::Result;
use crate::feed::{BinanceFeed, BybitFeed, HyperliquidFeed, OkxFeed, VenueFeed};
use crate::metadata::MetadataCache;
use crate::scorer::{OpportunityScorer, PairEvaluator, RankingsCache};
use crate::types::Venue;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Instrument-identity table: fatal if a configured file is unusable ---
    let instruments = Arc::new(instruments::load_instruments(&cfg)?);
    info!("Instrument table ready: {} instruments", instruments.len());

    // --- Venue metadata (funding intervals): best effort ---
    let metadata = MetadataCache::new();
    metadata.fetch().await;

    // --- Venue feeds, one connection task each ---
    let okx_symbols = instruments::venue_symbols(&instruments, Venue::Okx);
    let bybit_symbols = instruments::venue_symbols(&instruments, Venue::Bybit);

    let binance: Arc<dyn VenueFeed> = BinanceFeed::new(Arc::clone(&metadata));
    let okx: Arc<dyn VenueFeed> = OkxFeed::new(Arc::clone(&metadata), okx_symbols);
    let bybit: Arc<dyn VenueFeed> = BybitFeed::new(Arc::clone(&metadata), bybit_symbols);
    let hyperliquid: Arc<dyn VenueFeed> = HyperliquidFeed::new();

    let feeds: Arc<Vec<Arc<dyn VenueFeed>>> = Arc::new(vec![binance, okx, bybit, hyperliquid]);
    for feed in feeds.iter() {
        feed.connect();
    }
    info!("Started {} venue feeds", feeds.len());

    // --- Scoring loops, one per unordered venue pair ---
    let scorer = Arc::new(OpportunityScorer::new(&cfg));
    let rankings = RankingsCache::new();
    let health = Arc::new(HealthState::new());
    let (update_tx, update_rx) = watch::channel(0u64);
    let update_tx = Arc::new(update_tx);

    let mut pair_count = 0usize;
    for i in 0..feeds.len() {
        for j in (i + 1)..feeds.len() {
            let evaluator = PairEvaluator::new(
                Arc::clone(&feeds[i]),
                Arc::clone(&feeds[j]),
                Arc::clone(&instruments),
                Arc::clone(&scorer),
                Arc::clone(&rankings),
                Arc::clone(&health),
                Arc::clone(&update_tx),
            );
            tokio::spawn(async move { evaluator.run().await });
            pair_count += 1;
        }
    }
    info!("Scoring {pair_count} venue pairs every {SCORE_INTERVAL_SECS}s");

    // --- HTTP API server ---
    let api_state = ApiState {
        feeds: Arc::clone(&feeds),
        rankings,
        health,
        update_rx,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for feed in feeds.iter() {
        feed.disconnect();
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown requested");
}
