//! Venue metadata: authoritative funding intervals per venue/symbol.
//!
//! The wire feeds mostly do not carry the funding interval, so adapters ask
//! this cache when tagging snapshots. Fetch failures degrade to an explicit,
//! logged default, never a silent one.

use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use tracing::{info, warn};

use crate::config::{BINANCE_FAPI_URL, BYBIT_API_URL, DEFAULT_FUNDING_INTERVAL_HOURS};
use crate::error::Result;
use crate::types::Venue;

pub struct MetadataCache {
    /// (venue, native symbol) → funding interval hours.
    intervals: DashMap<(Venue, String), u32>,
    /// Symbols whose fallback default has already been logged.
    fallback_logged: DashSet<(Venue, String)>,
}

impl MetadataCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { intervals: DashMap::new(), fallback_logged: DashSet::new() })
    }

    /// Fetch funding intervals from the venues that publish them. Each fetch
    /// fails gracefully: a venue without metadata falls back per-symbol at
    /// lookup time. OKX publishes no interval endpoint; Hyperliquid settles
    /// hourly by construction.
    pub async fn fetch(&self) {
        if let Err(e) = self.fetch_binance().await {
            warn!("Binance metadata fetch failed (continuing with fallbacks): {e}");
        }
        if let Err(e) = self.fetch_bybit().await {
            warn!("Bybit metadata fetch failed (continuing with fallbacks): {e}");
        }
    }

    pub fn set_interval(&self, venue: Venue, symbol: &str, hours: u32) {
        self.intervals.insert((venue, symbol.to_string()), hours);
    }

    /// Authoritative funding interval for a venue/symbol. When metadata is
    /// genuinely unavailable the venue convention default is returned and the
    /// fallback is logged once per symbol.
    pub fn interval_for(&self, venue: Venue, symbol: &str) -> u32 {
        if venue == Venue::Hyperliquid {
            return 1;
        }
        if let Some(hours) = self.intervals.get(&(venue, symbol.to_string())) {
            return *hours;
        }

        let key = (venue, symbol.to_string());
        if self.fallback_logged.insert(key) {
            warn!(
                venue = %venue,
                symbol,
                "no funding interval metadata; assuming {DEFAULT_FUNDING_INTERVAL_HOURS}h"
            );
        }
        DEFAULT_FUNDING_INTERVAL_HOURS
    }

    async fn fetch_binance(&self) -> Result<()> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
        let url = format!("{BINANCE_FAPI_URL}/fapi/v1/exchangeInfo");
        let resp: serde_json::Value = client.get(&url).send().await?.json().await?;

        let mut loaded = 0usize;
        if let Some(symbols) = resp.get("symbols").and_then(|s| s.as_array()) {
            for sym in symbols {
                let is_perp = sym
                    .get("contractType")
                    .and_then(|c| c.as_str())
                    .map(|c| c == "PERPETUAL")
                    .unwrap_or(false);
                if !is_perp {
                    continue;
                }
                let Some(name) = sym.get("symbol").and_then(|s| s.as_str()) else { continue };
                // fundingIntervalHours is present for most perps; symbols
                // without it use the logged lookup-time fallback instead.
                if let Some(hours) = sym.get("fundingIntervalHours").and_then(|h| h.as_u64()) {
                    self.set_interval(Venue::Binance, name, hours as u32);
                    loaded += 1;
                }
            }
        }
        info!("Loaded {loaded} Binance funding intervals");
        Ok(())
    }

    async fn fetch_bybit(&self) -> Result<()> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
        let url = format!("{BYBIT_API_URL}/v5/market/instruments-info?category=linear");
        let resp: serde_json::Value = client.get(&url).send().await?.json().await?;

        let mut loaded = 0usize;
        if let Some(list) = resp
            .get("result")
            .and_then(|r| r.get("list"))
            .and_then(|l| l.as_array())
        {
            for inst in list {
                let Some(name) = inst.get("symbol").and_then(|s| s.as_str()) else { continue };
                // Bybit reports the interval in minutes (480 = 8h).
                let minutes = inst
                    .get("fundingInterval")
                    .and_then(|f| f.as_u64().or_else(|| f.as_str().and_then(|s| s.parse().ok())));
                if let Some(minutes) = minutes {
                    if minutes >= 60 {
                        self.set_interval(Venue::Bybit, name, (minutes / 60) as u32);
                        loaded += 1;
                    }
                }
            }
        }
        info!("Loaded {loaded} Bybit funding intervals");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_interval_is_returned() {
        let cache = MetadataCache::new();
        cache.set_interval(Venue::Bybit, "BTCUSDT", 4);
        assert_eq!(cache.interval_for(Venue::Bybit, "BTCUSDT"), 4);
    }

    #[test]
    fn unknown_interval_falls_back_to_default() {
        let cache = MetadataCache::new();
        assert_eq!(cache.interval_for(Venue::Okx, "BTC-USDT-SWAP"), DEFAULT_FUNDING_INTERVAL_HOURS);
    }

    #[test]
    fn hyperliquid_is_always_hourly() {
        let cache = MetadataCache::new();
        // Even a bogus stored value cannot override the venue's settlement clock.
        cache.set_interval(Venue::Hyperliquid, "BTC", 8);
        assert_eq!(cache.interval_for(Venue::Hyperliquid, "BTC"), 1);
    }
}
