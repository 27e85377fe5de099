use serde::{Deserialize, Serialize};

use crate::config::FRESHNESS_WINDOW_MS;

// ---------------------------------------------------------------------------
// Venue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Binance,
    Okx,
    Bybit,
    Hyperliquid,
}

impl Venue {
    pub fn slug(&self) -> &'static str {
        match self {
            Venue::Binance => "binance",
            Venue::Okx => "okx",
            Venue::Bybit => "bybit",
            Venue::Hyperliquid => "hyperliquid",
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.slug())
    }
}

impl std::str::FromStr for Venue {
    type Err = crate::error::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binance" => Ok(Venue::Binance),
            "okx" => Ok(Venue::Okx),
            "bybit" => Ok(Venue::Bybit),
            "hyperliquid" => Ok(Venue::Hyperliquid),
            other => Err(crate::error::AppError::UnknownVenue(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// InstrumentSnapshot — one per symbol per venue, overwritten on every update
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSnapshot {
    /// Venue-native symbol (e.g. `BTCUSDT`, `BTC-USDT-SWAP`, `BTC`).
    pub symbol: String,
    pub mark_price: f64,
    /// Signed percent per funding interval: 0.0125 means 0.0125%.
    /// Positive means longs pay shorts.
    pub funding_rate: f64,
    /// Length of one funding period as this venue actually settles it.
    /// Never rescaled to a common convention.
    pub funding_interval_hours: u32,
    /// Epoch ms of the next funding settlement.
    pub next_funding_time: i64,
    /// Local receipt epoch ms, used for staleness checks.
    pub observed_at: i64,
}

impl InstrumentSnapshot {
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms - self.observed_at <= FRESHNESS_WINDOW_MS
    }

    /// Structural validity for scoring: finite numbers, positive price.
    pub fn is_well_formed(&self) -> bool {
        self.mark_price.is_finite() && self.mark_price > 0.0 && self.funding_rate.is_finite()
    }
}

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Long on venue A, short on venue B.
    LongAShortB,
    /// Short on venue A, long on venue B.
    ShortALongB,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Direction::LongAShortB => "LONG_A_SHORT_B",
            Direction::ShortALongB => "SHORT_A_LONG_B",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// FundingProjection — ephemeral, produced fresh per evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FundingProjection {
    pub direction: Direction,
    /// Shared evaluation horizon: min(24, lcm(intervalA, intervalB)).
    pub cycle_duration_hours: u32,
    /// Settlements each leg accrues within the horizon, counted from that
    /// leg's own next_funding_time phase.
    pub payment_count_a: u32,
    pub payment_count_b: u32,
    pub net_cycle_income_percent: f64,
    pub net_cycle_income_usd: f64,
    pub annualized_return_percent: f64,
}

// ---------------------------------------------------------------------------
// Opportunity — output record, one per instrument per scored pair
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct OpportunityLeg {
    pub venue: Venue,
    pub symbol: String,
    pub mark_price: f64,
    pub funding_rate: f64,
    pub funding_interval_hours: u32,
    pub next_funding_time: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Opportunity {
    /// Canonical instrument symbol shared across venues (e.g. `BTC`).
    pub symbol: String,
    pub leg_a: OpportunityLeg,
    pub leg_b: OpportunityLeg,
    pub projection: FundingProjection,
    /// Signed one-time basis PnL in percent for the chosen direction.
    pub price_spread_percent: f64,
    /// Taker fees across entry and exit of both legs, percent of notional.
    pub fee_percent: f64,
    /// projection income − fees + price-spread PnL, percent of notional.
    pub net_profit_percent: f64,
    pub is_opportunity: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_slug_round_trips() {
        for venue in [Venue::Binance, Venue::Okx, Venue::Bybit, Venue::Hyperliquid] {
            let parsed: Venue = venue.slug().parse().unwrap();
            assert_eq!(parsed, venue);
        }
    }

    #[test]
    fn unknown_venue_is_rejected() {
        assert!("deribit".parse::<Venue>().is_err());
    }

    #[test]
    fn snapshot_freshness_window() {
        let snap = InstrumentSnapshot {
            symbol: "BTCUSDT".to_string(),
            mark_price: 50_000.0,
            funding_rate: 0.01,
            funding_interval_hours: 8,
            next_funding_time: 1_700_000_000_000,
            observed_at: 1_700_000_000_000,
        };
        // 10 minutes later the snapshot is stale even though well-formed.
        assert!(snap.is_fresh(snap.observed_at + 4 * 60 * 1000));
        assert!(!snap.is_fresh(snap.observed_at + 10 * 60 * 1000));
        assert!(snap.is_well_formed());
    }

    #[test]
    fn non_finite_snapshot_is_malformed() {
        let snap = InstrumentSnapshot {
            symbol: "BTCUSDT".to_string(),
            mark_price: f64::NAN,
            funding_rate: 0.01,
            funding_interval_hours: 8,
            next_funding_time: 1,
            observed_at: 1,
        };
        assert!(!snap.is_well_formed());
    }
}
