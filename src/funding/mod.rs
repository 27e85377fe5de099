//! Funding-cycle normalization: projects the net funding income of a
//! two-legged position over a horizon shared by both venues, even when the
//! venues settle funding on different intervals and phases.
//!
//! Everything here is pure. Invalid input is a caller bug and fails fast with
//! a typed error instead of producing silently wrong numbers.

use thiserror::Error;

use crate::config::{HOURS_PER_YEAR, MAX_CYCLE_HOURS};
use crate::types::{Direction, FundingProjection};

const MS_PER_HOUR: i64 = 3_600_000;

#[derive(Debug, Error, PartialEq)]
pub enum ProjectionError {
    #[error("funding interval must be at least 1 hour, got {0}")]
    InvalidInterval(u32),

    #[error("next funding time must be a positive epoch timestamp, got {0}")]
    InvalidFundingTime(i64),

    #[error("funding rate must be finite, got {0}")]
    NonFiniteRate(f64),
}

/// One leg's funding inputs, extracted from a validated snapshot.
#[derive(Debug, Clone, Copy)]
pub struct FundingLeg {
    /// Signed percent per interval; positive means longs pay shorts.
    pub funding_rate: f64,
    pub funding_interval_hours: u32,
    /// Epoch ms of this leg's next settlement.
    pub next_funding_time: i64,
}

impl FundingLeg {
    fn validate(&self) -> Result<(), ProjectionError> {
        if self.funding_interval_hours < 1 {
            return Err(ProjectionError::InvalidInterval(self.funding_interval_hours));
        }
        if self.next_funding_time <= 0 {
            return Err(ProjectionError::InvalidFundingTime(self.next_funding_time));
        }
        if !self.funding_rate.is_finite() {
            return Err(ProjectionError::NonFiniteRate(self.funding_rate));
        }
        Ok(())
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn lcm(a: u32, b: u32) -> u32 {
    a / gcd(a, b) * b
}

/// Shared evaluation horizon: lcm of the two intervals, capped at 24 h so
/// coprime intervals (5 h vs 7 h would need 35 h) stay economically
/// meaningful and settlement counts stay bounded.
pub fn cycle_duration_hours(interval_a: u32, interval_b: u32) -> u32 {
    lcm(interval_a, interval_b).min(MAX_CYCLE_HOURS)
}

/// Number of settlements a leg accrues within the horizon, stepping from the
/// leg's own next settlement by its own interval. A settlement landing
/// exactly on the horizon end counts.
fn count_settlements(next_funding_time: i64, interval_hours: u32, horizon_end_ms: i64) -> u32 {
    if next_funding_time > horizon_end_ms {
        return 0;
    }
    let interval_ms = interval_hours as i64 * MS_PER_HOUR;
    ((horizon_end_ms - next_funding_time) / interval_ms + 1) as u32
}

/// Project net funding income for one directional assignment.
///
/// Sign rule: a long position pays the venue's funding rate when positive and
/// receives it when negative, so the long leg contributes `-rate` per
/// settlement and the short leg `+rate`. Settlement counts come from each
/// leg's own phase; the two directions share counts but are evaluated
/// independently by the caller, never derived from each other by negation.
pub fn project(
    leg_a: &FundingLeg,
    leg_b: &FundingLeg,
    direction: Direction,
    now_ms: i64,
    notional_usd: f64,
) -> Result<FundingProjection, ProjectionError> {
    leg_a.validate()?;
    leg_b.validate()?;

    let cycle = cycle_duration_hours(leg_a.funding_interval_hours, leg_b.funding_interval_hours);
    let horizon_end_ms = now_ms + cycle as i64 * MS_PER_HOUR;

    let payment_count_a =
        count_settlements(leg_a.next_funding_time, leg_a.funding_interval_hours, horizon_end_ms);
    let payment_count_b =
        count_settlements(leg_b.next_funding_time, leg_b.funding_interval_hours, horizon_end_ms);

    let (flow_a, flow_b) = match direction {
        Direction::LongAShortB => (-leg_a.funding_rate, leg_b.funding_rate),
        Direction::ShortALongB => (leg_a.funding_rate, -leg_b.funding_rate),
    };

    let net_cycle_income_percent =
        payment_count_a as f64 * flow_a + payment_count_b as f64 * flow_b;
    // Rates are percentages: divide by 100 exactly once to scale notional.
    let net_cycle_income_usd = net_cycle_income_percent / 100.0 * notional_usd;
    let annualized_return_percent = net_cycle_income_percent * HOURS_PER_YEAR / cycle as f64;

    Ok(FundingProjection {
        direction,
        cycle_duration_hours: cycle,
        payment_count_a,
        payment_count_b,
        net_cycle_income_percent,
        net_cycle_income_usd,
        annualized_return_percent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: i64 = MS_PER_HOUR;

    fn leg(rate: f64, interval: u32, next: i64) -> FundingLeg {
        FundingLeg {
            funding_rate: rate,
            funding_interval_hours: interval,
            next_funding_time: next,
        }
    }

    #[test]
    fn cycle_is_lcm_capped_at_24() {
        assert_eq!(cycle_duration_hours(1, 8), 8);
        assert_eq!(cycle_duration_hours(4, 8), 8);
        assert_eq!(cycle_duration_hours(1, 1), 1);
        // lcm(5,7) = 35 > 24, capped.
        assert_eq!(cycle_duration_hours(5, 7), 24);
        assert_eq!(cycle_duration_hours(2, 8), 8);
    }

    #[test]
    fn three_settlements_in_24h_at_8h_interval() {
        let now = 1_700_000_000_000;
        // First settlement 8h out: 8h, 16h, 24h all land inside the horizon.
        assert_eq!(count_settlements(now + 8 * H, 8, now + 24 * H), 3);
    }

    #[test]
    fn settlement_exactly_at_horizon_end_counts() {
        let now = 1_700_000_000_000;
        assert_eq!(count_settlements(now + 24 * H, 8, now + 24 * H), 1);
        // One millisecond past the horizon does not.
        assert_eq!(count_settlements(now + 24 * H + 1, 8, now + 24 * H), 0);
    }

    #[test]
    fn phase_shifts_settlement_counts() {
        let now = 1_700_000_000_000;
        // Settling 1h out at an 8h interval: 1h, 9h, 17h → 3 in a 24h horizon.
        assert_eq!(count_settlements(now + H, 8, now + 24 * H), 3);
        // Settling 7h out: 7h, 15h, 23h → still 3.
        assert_eq!(count_settlements(now + 7 * H, 8, now + 24 * H), 3);
        // Hourly leg settling on the next full hour: 24 settlements.
        assert_eq!(count_settlements(now + H, 1, now + 24 * H), 24);
    }

    #[test]
    fn worked_example_long_a_short_b() {
        // Venue A +0.01%/8h, venue B +0.04%/8h. Long A pays 0.01, short B
        // receives 0.04: net +0.03 per 8h cycle, annualized 0.03 * 3 * 365.
        let now = 1_700_000_000_000;
        let a = leg(0.01, 8, now + 8 * H);
        let b = leg(0.04, 8, now + 8 * H);

        let long_a = project(&a, &b, Direction::LongAShortB, now, 100.0).unwrap();
        let short_a = project(&a, &b, Direction::ShortALongB, now, 100.0).unwrap();

        assert_eq!(long_a.cycle_duration_hours, 8);
        assert_eq!(long_a.payment_count_a, 1);
        assert_eq!(long_a.payment_count_b, 1);
        assert!((long_a.net_cycle_income_percent - 0.03).abs() < 1e-12);
        assert!((long_a.net_cycle_income_usd - 0.03).abs() < 1e-12);
        assert!((long_a.annualized_return_percent - 0.03 * 3.0 * 365.0).abs() < 1e-9);

        assert!((short_a.net_cycle_income_percent - -0.03).abs() < 1e-12);
        assert!(long_a.net_cycle_income_usd > short_a.net_cycle_income_usd);
    }

    #[test]
    fn mixed_intervals_use_each_legs_own_phase() {
        // Hourly venue against an 8h venue: cycle 8h. The hourly leg settles
        // at the top of each hour (8 payments), the 8h leg once.
        let now = 1_700_000_000_000;
        let hourly = leg(0.005, 1, now + H);
        let eight = leg(0.01, 8, now + 8 * H);

        let p = project(&hourly, &eight, Direction::ShortALongB, now, 100.0).unwrap();
        assert_eq!(p.cycle_duration_hours, 8);
        assert_eq!(p.payment_count_a, 8);
        assert_eq!(p.payment_count_b, 1);
        // Short the hourly leg receives 8 * 0.005, long the 8h leg pays 0.01.
        assert!((p.net_cycle_income_percent - (8.0 * 0.005 - 0.01)).abs() < 1e-12);
    }

    #[test]
    fn directions_are_mirrors_when_counts_match() {
        let now = 1_700_000_000_000;
        let a = leg(-0.02, 4, now + 2 * H);
        let b = leg(0.015, 8, now + 5 * H);

        let fwd = project(&a, &b, Direction::LongAShortB, now, 250.0).unwrap();
        let rev = project(&a, &b, Direction::ShortALongB, now, 250.0).unwrap();

        assert_eq!(fwd.payment_count_a, rev.payment_count_a);
        assert_eq!(fwd.payment_count_b, rev.payment_count_b);
        assert!((fwd.net_cycle_income_percent + rev.net_cycle_income_percent).abs() < 1e-12);
    }

    #[test]
    fn projection_is_idempotent() {
        let now = 1_700_000_000_000;
        let a = leg(0.0125, 8, now + 3 * H);
        let b = leg(-0.007, 1, now + H / 2);

        let first = project(&a, &b, Direction::LongAShortB, now, 100.0).unwrap();
        let second = project(&a, &b, Direction::LongAShortB, now, 100.0).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn notional_scales_usd_but_not_percent() {
        let now = 1_700_000_000_000;
        let a = leg(0.01, 8, now + 8 * H);
        let b = leg(0.04, 8, now + 8 * H);

        let small = project(&a, &b, Direction::LongAShortB, now, 100.0).unwrap();
        let large = project(&a, &b, Direction::LongAShortB, now, 10_000.0).unwrap();

        assert!((small.net_cycle_income_percent - large.net_cycle_income_percent).abs() < 1e-12);
        assert!((large.net_cycle_income_usd - small.net_cycle_income_usd * 100.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_inputs_fail_fast() {
        let now = 1_700_000_000_000;
        let good = leg(0.01, 8, now + 8 * H);

        let zero_interval = leg(0.01, 0, now + 8 * H);
        assert_eq!(
            project(&zero_interval, &good, Direction::LongAShortB, now, 100.0),
            Err(ProjectionError::InvalidInterval(0)),
        );

        let no_timestamp = leg(0.01, 8, 0);
        assert_eq!(
            project(&good, &no_timestamp, Direction::LongAShortB, now, 100.0),
            Err(ProjectionError::InvalidFundingTime(0)),
        );

        let nan_rate = leg(f64::NAN, 8, now + 8 * H);
        assert!(matches!(
            project(&nan_rate, &good, Direction::LongAShortB, now, 100.0),
            Err(ProjectionError::NonFiniteRate(_)),
        ));
    }

    #[test]
    fn leg_past_horizon_accrues_nothing() {
        let now = 1_700_000_000_000;
        let a = leg(0.01, 8, now + 8 * H);
        // B's next settlement lands beyond the 8h shared horizon.
        let b = leg(0.04, 8, now + 9 * H);

        let p = project(&a, &b, Direction::LongAShortB, now, 100.0).unwrap();
        assert_eq!(p.payment_count_a, 1);
        assert_eq!(p.payment_count_b, 0);
        assert!((p.net_cycle_income_percent - -0.01).abs() < 1e-12);
    }
}
