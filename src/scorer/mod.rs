//! Opportunity scoring: pulls current snapshots from two venue feeds,
//! validates them, evaluates both directional assignments through the
//! funding normalizer, applies the cost model, and produces the ranked
//! opportunity list for the pair. Read-only with respect to feed state.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info};

use crate::api::health::HealthState;
use crate::config::{Config, PRICE_RATIO_MAX, PRICE_RATIO_MIN, SCORE_INTERVAL_SECS};
use crate::feed::{now_ms, VenueFeed};
use crate::funding::{project, FundingLeg};
use crate::instruments::InstrumentMapping;
use crate::types::{Direction, Opportunity, OpportunityLeg};

// ---------------------------------------------------------------------------
// ScorerStats
// ---------------------------------------------------------------------------

/// Per-pass diagnostic counters. A skipped instrument is expected
/// steady-state (startup, venue gaps); a rejected one tripped a validity
/// check. Neither aborts the pass.
#[derive(Debug, Default, PartialEq)]
pub struct ScorerStats {
    pub skipped_no_mapping: usize,
    pub skipped_missing: usize,
    pub rejected_non_finite: usize,
    pub rejected_stale: usize,
    pub rejected_price_ratio: usize,
    pub failed_projection: usize,
    pub scored: usize,
}

// ---------------------------------------------------------------------------
// OpportunityScorer
// ---------------------------------------------------------------------------

pub struct OpportunityScorer {
    notional_usd: f64,
    taker_fee_rate: f64,
}

impl OpportunityScorer {
    pub fn new(cfg: &Config) -> Self {
        Self {
            notional_usd: cfg.notional_usd,
            taker_fee_rate: cfg.taker_fee_rate,
        }
    }

    /// Evaluate the instrument universe for one venue pair. Always returns
    /// every scoreable instrument (callers filter/truncate), sorted
    /// descending by annualized return, ties broken by symbol for
    /// deterministic output.
    pub fn get_opportunities(
        &self,
        feed_a: &dyn VenueFeed,
        feed_b: &dyn VenueFeed,
        instruments: &[InstrumentMapping],
        now_ms: i64,
    ) -> (Vec<Opportunity>, ScorerStats) {
        let mut stats = ScorerStats::default();
        let mut opportunities: Vec<Opportunity> = instruments
            .iter()
            .filter_map(|inst| self.score_instrument(inst, feed_a, feed_b, now_ms, &mut stats))
            .collect();

        opportunities.sort_by(|a, b| {
            b.projection
                .annualized_return_percent
                .partial_cmp(&a.projection.annualized_return_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        (opportunities, stats)
    }

    fn score_instrument(
        &self,
        inst: &InstrumentMapping,
        feed_a: &dyn VenueFeed,
        feed_b: &dyn VenueFeed,
        now_ms: i64,
        stats: &mut ScorerStats,
    ) -> Option<Opportunity> {
        let (Some(sym_a), Some(sym_b)) = (inst.native(feed_a.venue()), inst.native(feed_b.venue()))
        else {
            stats.skipped_no_mapping += 1;
            return None;
        };

        // Absent data is normal during warmup, not an error.
        let (Some(snap_a), Some(snap_b)) = (feed_a.get_data(sym_a), feed_b.get_data(sym_b)) else {
            stats.skipped_missing += 1;
            return None;
        };

        if !snap_a.is_well_formed() || !snap_b.is_well_formed() {
            stats.rejected_non_finite += 1;
            return None;
        }
        if !snap_a.is_fresh(now_ms) || !snap_b.is_fresh(now_ms) {
            stats.rejected_stale += 1;
            return None;
        }

        // A ratio outside the band is a denomination mismatch (times-1000
        // contract against its unscaled counterpart), not a 100x arbitrage.
        let ratio = snap_a.mark_price / snap_b.mark_price;
        if !(PRICE_RATIO_MIN..=PRICE_RATIO_MAX).contains(&ratio) {
            stats.rejected_price_ratio += 1;
            return None;
        }

        let leg_a = FundingLeg {
            funding_rate: snap_a.funding_rate,
            funding_interval_hours: snap_a.funding_interval_hours,
            next_funding_time: snap_a.next_funding_time,
        };
        let leg_b = FundingLeg {
            funding_rate: snap_b.funding_rate,
            funding_interval_hours: snap_b.funding_interval_hours,
            next_funding_time: snap_b.next_funding_time,
        };

        // Both directions evaluated independently; the better one wins and a
        // tie keeps LongAShortB.
        let forward = project(&leg_a, &leg_b, Direction::LongAShortB, now_ms, self.notional_usd);
        let reverse = project(&leg_a, &leg_b, Direction::ShortALongB, now_ms, self.notional_usd);
        let (forward, reverse) = match (forward, reverse) {
            (Ok(f), Ok(r)) => (f, r),
            (Err(e), _) | (_, Err(e)) => {
                debug!(symbol = %inst.symbol, "projection failed: {e}");
                stats.failed_projection += 1;
                return None;
            }
        };
        let projection = if reverse.net_cycle_income_usd > forward.net_cycle_income_usd {
            reverse
        } else {
            forward
        };

        let price_spread_percent =
            spread_pnl_percent(snap_a.mark_price, snap_b.mark_price, projection.direction);
        // Taker on both legs, entry and exit.
        let fee_percent = self.taker_fee_rate * 2.0 * 2.0 * 100.0;
        let net_profit_percent =
            projection.net_cycle_income_percent - fee_percent + price_spread_percent;

        stats.scored += 1;
        Some(Opportunity {
            symbol: inst.symbol.clone(),
            leg_a: OpportunityLeg {
                venue: feed_a.venue(),
                symbol: snap_a.symbol.clone(),
                mark_price: snap_a.mark_price,
                funding_rate: snap_a.funding_rate,
                funding_interval_hours: snap_a.funding_interval_hours,
                next_funding_time: snap_a.next_funding_time,
            },
            leg_b: OpportunityLeg {
                venue: feed_b.venue(),
                symbol: snap_b.symbol.clone(),
                mark_price: snap_b.mark_price,
                funding_rate: snap_b.funding_rate,
                funding_interval_hours: snap_b.funding_interval_hours,
                next_funding_time: snap_b.next_funding_time,
            },
            is_opportunity: net_profit_percent > 0.0,
            projection,
            price_spread_percent,
            fee_percent,
            net_profit_percent,
        })
    }
}

/// One-time basis PnL for the chosen direction, percent of notional.
/// Long A / short B buys at A's mark and sells at B's, so a B premium is
/// income and an A premium is the entry cost; mirrored for the reverse.
fn spread_pnl_percent(mark_a: f64, mark_b: f64, direction: Direction) -> f64 {
    match direction {
        Direction::LongAShortB => (mark_b - mark_a) / mark_a * 100.0,
        Direction::ShortALongB => (mark_a - mark_b) / mark_b * 100.0,
    }
}

// ---------------------------------------------------------------------------
// RankingsCache
// ---------------------------------------------------------------------------

/// Latest ranked list per pair, written by the evaluation loops and read by
/// the API layer. Whole-list replacement per pass; no derived state survives
/// between passes.
pub struct RankingsCache {
    inner: DashMap<String, Vec<Opportunity>>,
}

impl RankingsCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { inner: DashMap::new() })
    }

    pub fn publish(&self, pair: &str, opportunities: Vec<Opportunity>) {
        self.inner.insert(pair.to_string(), opportunities);
    }

    pub fn get(&self, pair: &str) -> Option<Vec<Opportunity>> {
        self.inner.get(pair).map(|e| e.value().clone())
    }

    pub fn pairs(&self) -> Vec<String> {
        let mut pairs: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        pairs.sort();
        pairs
    }
}

pub fn pair_name(a: &dyn VenueFeed, b: &dyn VenueFeed) -> String {
    format!("{}-{}", a.venue(), b.venue())
}

// ---------------------------------------------------------------------------
// PairEvaluator — periodic scoring loop for one venue pair
// ---------------------------------------------------------------------------

pub struct PairEvaluator {
    pair: String,
    feed_a: Arc<dyn VenueFeed>,
    feed_b: Arc<dyn VenueFeed>,
    instruments: Arc<Vec<InstrumentMapping>>,
    scorer: Arc<OpportunityScorer>,
    rankings: Arc<RankingsCache>,
    health: Arc<HealthState>,
    update_tx: Arc<watch::Sender<u64>>,
}

impl PairEvaluator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        feed_a: Arc<dyn VenueFeed>,
        feed_b: Arc<dyn VenueFeed>,
        instruments: Arc<Vec<InstrumentMapping>>,
        scorer: Arc<OpportunityScorer>,
        rankings: Arc<RankingsCache>,
        health: Arc<HealthState>,
        update_tx: Arc<watch::Sender<u64>>,
    ) -> Self {
        Self {
            pair: pair_name(&*feed_a, &*feed_b),
            feed_a,
            feed_b,
            instruments,
            scorer,
            rankings,
            health,
            update_tx,
        }
    }

    pub async fn run(self) {
        let mut ticker = interval(Duration::from_secs(SCORE_INTERVAL_SECS));
        let mut passes: u64 = 0;

        loop {
            ticker.tick().await;
            let now = now_ms();
            let (opportunities, stats) = self.scorer.get_opportunities(
                &*self.feed_a,
                &*self.feed_b,
                &self.instruments,
                now,
            );

            passes += 1;
            // One info line a minute per pair; the per-second detail stays at debug.
            if passes % 60 == 1 {
                info!(
                    pair = %self.pair,
                    scored = stats.scored,
                    missing = stats.skipped_missing,
                    stale = stats.rejected_stale,
                    price_ratio = stats.rejected_price_ratio,
                    "pass complete: {} scored, best {}",
                    stats.scored,
                    opportunities
                        .first()
                        .map(|o| format!(
                            "{} {:.2}% APR",
                            o.symbol, o.projection.annualized_return_percent
                        ))
                        .unwrap_or_else(|| "n/a".to_string()),
                );
            } else {
                debug!(pair = %self.pair, ?stats, "pass complete");
            }

            self.rankings.publish(&self.pair, opportunities);
            self.health.mark_scoring_pass(now);
            self.update_tx.send_modify(|n| *n = n.wrapping_add(1));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
