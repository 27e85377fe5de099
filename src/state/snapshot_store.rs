use std::sync::Arc;

use dashmap::DashMap;

use crate::types::InstrumentSnapshot;

// ---------------------------------------------------------------------------
// PartialSnapshot
// ---------------------------------------------------------------------------

/// Internal record accumulating the two halves of a snapshot for venues that
/// deliver mark price and funding data on separate messages (OKX splits them
/// across channels, Bybit ticker pushes can be deltas). A symbol only becomes
/// readable once both halves have arrived.
#[derive(Debug, Default, Clone)]
struct PartialSnapshot {
    mark_price: Option<f64>,
    mark_observed_at: i64,
    funding_rate: Option<f64>,
    funding_interval_hours: Option<u32>,
    next_funding_time: Option<i64>,
    funding_observed_at: i64,
}

impl PartialSnapshot {
    /// Freshness reflects the older half: a merged snapshot is only as
    /// current as its least recently updated component.
    fn observed_at(&self) -> i64 {
        if self.mark_observed_at == 0 || self.funding_observed_at == 0 {
            self.mark_observed_at.max(self.funding_observed_at)
        } else {
            self.mark_observed_at.min(self.funding_observed_at)
        }
    }

    fn complete(&self, symbol: &str) -> Option<InstrumentSnapshot> {
        Some(InstrumentSnapshot {
            symbol: symbol.to_string(),
            mark_price: self.mark_price?,
            funding_rate: self.funding_rate?,
            funding_interval_hours: self.funding_interval_hours?,
            next_funding_time: self.next_funding_time?,
            observed_at: self.observed_at(),
        })
    }
}

// ---------------------------------------------------------------------------
// SnapshotStore
// ---------------------------------------------------------------------------

/// Latest-value cache for one venue: native symbol → snapshot.
///
/// Single writer (the owning adapter task), many readers (scorer, API).
/// Each update replaces the whole per-symbol record under the shard lock,
/// so readers observe stale-but-consistent records, never torn ones.
pub struct SnapshotStore {
    snapshots: DashMap<String, PartialSnapshot>,
}

impl SnapshotStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { snapshots: DashMap::new() })
    }

    /// Whole-record replace, for venues whose messages carry every field
    /// (Binance mark-price stream).
    pub fn insert(&self, snapshot: InstrumentSnapshot) {
        self.snapshots.insert(
            snapshot.symbol.clone(),
            PartialSnapshot {
                mark_price: Some(snapshot.mark_price),
                mark_observed_at: snapshot.observed_at,
                funding_rate: Some(snapshot.funding_rate),
                funding_interval_hours: Some(snapshot.funding_interval_hours),
                next_funding_time: Some(snapshot.next_funding_time),
                funding_observed_at: snapshot.observed_at,
            },
        );
    }

    /// Merge the price half of a snapshot, preserving any funding data.
    pub fn update_mark_price(&self, symbol: &str, mark_price: f64, observed_at: i64) {
        let mut entry = self.snapshots.entry(symbol.to_string()).or_default();
        entry.mark_price = Some(mark_price);
        entry.mark_observed_at = observed_at;
    }

    /// Merge the funding half of a snapshot, preserving any price data.
    pub fn update_funding(
        &self,
        symbol: &str,
        funding_rate: f64,
        funding_interval_hours: u32,
        next_funding_time: i64,
        observed_at: i64,
    ) {
        let mut entry = self.snapshots.entry(symbol.to_string()).or_default();
        entry.funding_rate = Some(funding_rate);
        entry.funding_interval_hours = Some(funding_interval_hours);
        entry.next_funding_time = Some(next_funding_time);
        entry.funding_observed_at = observed_at;
    }

    /// Non-blocking read of the current cache. Returns None until both the
    /// price and funding halves have arrived for the symbol.
    pub fn get(&self, symbol: &str) -> Option<InstrumentSnapshot> {
        let entry = self.snapshots.get(symbol)?;
        entry.complete(symbol)
    }

    /// All complete snapshots, for the raw-snapshot API endpoint.
    pub fn all(&self) -> Vec<InstrumentSnapshot> {
        self.snapshots
            .iter()
            .filter_map(|e| e.value().complete(e.key()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(symbol: &str, mark: f64, rate: f64, observed_at: i64) -> InstrumentSnapshot {
        InstrumentSnapshot {
            symbol: symbol.to_string(),
            mark_price: mark,
            funding_rate: rate,
            funding_interval_hours: 8,
            next_funding_time: 1_700_000_000_000,
            observed_at,
        }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let store = SnapshotStore::new();
        store.insert(snap("BTCUSDT", 50_000.0, 0.01, 1_000));

        let got = store.get("BTCUSDT").unwrap();
        assert_eq!(got.symbol, "BTCUSDT");
        assert!((got.mark_price - 50_000.0).abs() < 1e-9);
        assert_eq!(got.observed_at, 1_000);
    }

    #[test]
    fn insert_overwrites_in_place() {
        let store = SnapshotStore::new();
        store.insert(snap("BTCUSDT", 50_000.0, 0.01, 1_000));
        store.insert(snap("BTCUSDT", 51_000.0, -0.02, 2_000));

        let got = store.get("BTCUSDT").unwrap();
        assert!((got.mark_price - 51_000.0).abs() < 1e-9);
        assert!((got.funding_rate - -0.02).abs() < 1e-12);
        assert_eq!(store.all().len(), 1);
    }

    #[test]
    fn partial_symbol_is_unreadable_until_both_halves_arrive() {
        let store = SnapshotStore::new();
        store.update_mark_price("BTC-USDT-SWAP", 50_000.0, 1_000);
        assert!(store.get("BTC-USDT-SWAP").is_none());
        assert!(store.all().is_empty());

        store.update_funding("BTC-USDT-SWAP", 0.0125, 8, 1_700_000_000_000, 2_000);
        let got = store.get("BTC-USDT-SWAP").unwrap();
        assert!((got.funding_rate - 0.0125).abs() < 1e-12);
        assert_eq!(got.funding_interval_hours, 8);
        assert_eq!(store.all().len(), 1);
    }

    #[test]
    fn merged_observed_at_is_the_older_half() {
        let store = SnapshotStore::new();
        store.update_mark_price("BTC", 50_000.0, 5_000);
        store.update_funding("BTC", 0.01, 1, 1_700_000_000_000, 2_000);

        let got = store.get("BTC").unwrap();
        assert_eq!(got.observed_at, 2_000);
    }

    #[test]
    fn unknown_symbol_returns_none() {
        let store = SnapshotStore::new();
        assert!(store.get("ETHUSDT").is_none());
    }

    #[test]
    fn delta_update_preserves_other_half() {
        let store = SnapshotStore::new();
        store.insert(snap("ETHUSDT", 3_000.0, 0.005, 1_000));

        // Bybit-style delta carrying only a new price.
        store.update_mark_price("ETHUSDT", 3_100.0, 2_000);

        let got = store.get("ETHUSDT").unwrap();
        assert!((got.mark_price - 3_100.0).abs() < 1e-9);
        assert!((got.funding_rate - 0.005).abs() < 1e-12);
    }
}
