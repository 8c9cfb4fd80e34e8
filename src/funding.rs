// 5.0: funding rates. each interval longs pay shorts or vice versa to keep perp price near spot.
// 5.0 has the params/state structs. 5.1+ has the rate and settlement math.
// the market carries one global accumulator; positions settle lazily against a checkpoint,
// so a funding tick never fans out to every open position.

use crate::types::{Bps, FundingRate, MathError, Price, Quote, SignedSize, Timestamp, PRICE_SCALE};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingParams {
    /// symmetric clamp on the per-interval rate
    pub max_funding_rate_bps: Bps,
    /// minimum seconds between two accumulator updates
    pub funding_interval_secs: i64,
}

impl Default for FundingParams {
    fn default() -> Self {
        Self {
            max_funding_rate_bps: Bps::new(100),
            funding_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingState {
    /// quote owed per base unit since market creation (PRICE_SCALE, signed)
    pub cumulative_funding: i128,
    pub last_funding_ts: Timestamp,
    pub last_rate: FundingRate,
}

impl FundingState {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            cumulative_funding: 0,
            last_funding_ts: timestamp,
            last_rate: FundingRate::zero(),
        }
    }

    pub fn interval_elapsed(&self, now: Timestamp, params: &FundingParams) -> bool {
        now.seconds_since(self.last_funding_ts) >= params.funding_interval_secs
    }
}

// 5.1: how far perp is from spot, PRICE_SCALE units. positive = perp above spot
pub fn calculate_premium(mark_price: Price, index_price: Price) -> Result<i128, MathError> {
    let diff = mark_price.value() as i128 - index_price.value() as i128;
    let scaled = diff.checked_mul(PRICE_SCALE).ok_or(MathError::Overflow)?;
    Ok(scaled / index_price.value() as i128)
}

// 5.2: clamps the premium into [-max, +max]
pub fn clamp_funding_rate(premium: i128, max_rate_bps: Bps) -> FundingRate {
    let bound = FundingRate::from_bps(max_rate_bps).value() as i128;
    // bound fits i64, so the clamped value does too
    FundingRate::new(premium.clamp(-bound, bound) as i64)
}

// 5.3: accumulator step. index * rate / PRICE_SCALE = quote per base unit this interval
pub fn funding_increment(index_price: Price, rate: FundingRate) -> Result<i128, MathError> {
    let product = (index_price.value() as i128)
        .checked_mul(rate.value() as i128)
        .ok_or(MathError::Overflow)?;
    Ok(product / PRICE_SCALE)
}

/// Accumulator update for one interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingStep {
    pub premium: i128,
    pub rate: FundingRate,
    pub increment: i128,
}

pub fn compute_funding_step(
    mark_price: Price,
    index_price: Price,
    params: &FundingParams,
) -> Result<FundingStep, MathError> {
    let premium = calculate_premium(mark_price, index_price)?;
    let rate = clamp_funding_rate(premium, params.max_funding_rate_bps);
    let increment = funding_increment(index_price, rate)?;
    Ok(FundingStep {
        premium,
        rate,
        increment,
    })
}

impl FundingState {
    pub fn apply(&mut self, step: &FundingStep, now: Timestamp) -> Result<(), MathError> {
        self.cumulative_funding = self
            .cumulative_funding
            .checked_add(step.increment)
            .ok_or(MathError::Overflow)?;
        self.last_funding_ts = now;
        self.last_rate = step.rate;
        Ok(())
    }
}

// 5.4: what a position owes since its checkpoint. positive = position pays.
// longs pay while the accumulator rises, shorts receive; reversed when it falls.
pub fn calculate_funding_owed(
    size: SignedSize,
    checkpoint: i128,
    current_cumulative: i128,
) -> Result<Quote, MathError> {
    let diff = current_cumulative
        .checked_sub(checkpoint)
        .ok_or(MathError::Overflow)?;
    (size.value() as i128)
        .checked_mul(diff)
        .map(Quote::new)
        .ok_or(MathError::Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> FundingParams {
        FundingParams {
            max_funding_rate_bps: Bps::new(100), // 1%
            funding_interval_secs: 3600,
        }
    }

    #[test]
    fn premium_positive() {
        let premium = calculate_premium(Price::from_units(101), Price::from_units(100)).unwrap();
        assert_eq!(premium, 10_000); // 1%
    }

    #[test]
    fn premium_negative() {
        let premium = calculate_premium(Price::new_unchecked(99_500_000), Price::from_units(100)).unwrap();
        assert_eq!(premium, -5_000); // -0.5%
    }

    #[test]
    fn rate_clamped_both_ways() {
        // 5% premium against a 1% bound
        assert_eq!(clamp_funding_rate(50_000, Bps::new(100)).value(), 10_000);
        assert_eq!(clamp_funding_rate(-50_000, Bps::new(100)).value(), -10_000);
        assert_eq!(clamp_funding_rate(3_000, Bps::new(100)).value(), 3_000);
    }

    #[test]
    fn zero_bound_disables_funding() {
        assert_eq!(clamp_funding_rate(50_000, Bps::new(0)), FundingRate::zero());
    }

    #[test]
    fn increment_scales_with_index() {
        // 1% of $100 = $1 per base unit
        let inc = funding_increment(Price::from_units(100), FundingRate::new(10_000)).unwrap();
        assert_eq!(inc, 1_000_000);
    }

    #[test]
    fn step_with_clamp() {
        let step = compute_funding_step(Price::from_units(110), Price::from_units(100), &params()).unwrap();
        assert_eq!(step.premium, 100_000);
        assert_eq!(step.rate.value(), 10_000);
        assert_eq!(step.increment, 1_000_000);
    }

    #[test]
    fn interval_gate() {
        let state = FundingState::new(Timestamp::from_secs(1_000));
        assert!(!state.interval_elapsed(Timestamp::from_secs(4_599), &params()));
        assert!(state.interval_elapsed(Timestamp::from_secs(4_600), &params()));
    }

    #[test]
    fn owed_sign_convention() {
        // accumulator rose by $1 per unit: 10 long pays $10, 10 short receives $10
        let long = calculate_funding_owed(SignedSize::new(10), 0, 1_000_000).unwrap();
        let short = calculate_funding_owed(SignedSize::new(-10), 0, 1_000_000).unwrap();
        assert_eq!(long, Quote::from_units(10));
        assert_eq!(short, Quote::from_units(-10));

        // falling accumulator reverses it
        let long = calculate_funding_owed(SignedSize::new(10), 1_000_000, 0).unwrap();
        assert_eq!(long, Quote::from_units(-10));
    }

    #[test]
    fn owed_is_zero_at_checkpoint() {
        let owed = calculate_funding_owed(SignedSize::new(7), 42, 42).unwrap();
        assert!(owed.is_zero());
    }

    #[test]
    fn state_accumulates_linearly() {
        let mut state = FundingState::new(Timestamp::from_secs(0));
        let step = compute_funding_step(Price::from_units(101), Price::from_units(100), &params()).unwrap();
        for i in 1..=3 {
            state.apply(&step, Timestamp::from_secs(i * 3600)).unwrap();
        }
        assert_eq!(state.cumulative_funding, 3 * step.increment);
        assert_eq!(state.last_funding_ts, Timestamp::from_secs(3 * 3600));
        assert_eq!(state.last_rate, step.rate);
    }
}
