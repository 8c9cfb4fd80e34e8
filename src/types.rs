// 1.0: all the primitives live here. nothing in the ledger works without these types.
// IDs, prices, quote amounts, sizes, leverage, bps, timestamps. each is a newtype so the
// compiler catches type mixups. everything monetary is a fixed-point integer scaled by
// PRICE_SCALE; rust_decimal is only used to render values for humans.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

/// 1 quote unit (and 1 price unit) = 1_000_000 raw.
pub const PRICE_SCALE: i128 = 1_000_000;

/// Basis point denominator. 100 bps = 1%.
pub const BPS_DENOMINATOR: i128 = 10_000;

/// Fixed-point decimals matching PRICE_SCALE.
const SCALE_DECIMALS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MathError {
    #[error("Arithmetic overflow")]
    Overflow,

    #[error("Division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarketId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub u64);

/// Identifier of a price feed inside the oracle adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedId(pub u64);

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "market#{}", self.0)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

// Long = profit when price goes up. Short = profit when price goes down.
// only used at the API boundary; internally the sign lives in SignedSize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(&self) -> i64 {
        match self {
            Side::Long => 1,
            Side::Short => -1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

// 1.1: signed size in whole base units: positive = long, negative = short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignedSize(i64);

impl SignedSize {
    pub fn new(size: i64) -> Self {
        Self(size)
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn from_side(side: Side, abs_size: u64) -> Result<Self, MathError> {
        let magnitude = i64::try_from(abs_size).map_err(|_| MathError::Overflow)?;
        Ok(Self(side.sign() * magnitude))
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn abs(&self) -> u64 {
        self.0.unsigned_abs()
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_long(&self) -> bool {
        self.0 > 0
    }

    pub fn is_short(&self) -> bool {
        self.0 < 0
    }

    pub fn side(&self) -> Option<Side> {
        if self.is_long() {
            Some(Side::Long)
        } else if self.is_short() {
            Some(Side::Short)
        } else {
            None
        }
    }

    pub fn checked_add(&self, delta: i64) -> Result<Self, MathError> {
        self.0.checked_add(delta).map(Self).ok_or(MathError::Overflow)
    }
}

impl fmt::Display for SignedSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.2: price in quote per base unit, scaled by PRICE_SCALE. must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(i64);

impl Price {
    #[must_use]
    pub fn new(raw: i64) -> Option<Self> {
        if raw > 0 {
            Some(Self(raw))
        } else {
            None
        }
    }

    pub fn new_unchecked(raw: i64) -> Self {
        debug_assert!(raw > 0);
        Self(raw)
    }

    /// Whole quote units per base unit, e.g. `Price::from_units(100)` is $100.
    pub fn from_units(units: i64) -> Self {
        Self::new_unchecked(units * PRICE_SCALE as i64)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, SCALE_DECIMALS)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

// 1.3: signed quote amount scaled by PRICE_SCALE. collateral, margin, pnl, fees all use this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Quote(i128);

impl Quote {
    pub fn new(raw: i128) -> Self {
        Self(raw)
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn from_units(units: i64) -> Self {
        Self(units as i128 * PRICE_SCALE)
    }

    pub fn value(&self) -> i128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    pub fn min(self, other: Quote) -> Self {
        Self(self.0.min(other.0))
    }

    pub fn max(self, other: Quote) -> Self {
        Self(self.0.max(other.0))
    }

    pub fn checked_add(&self, other: Quote) -> Result<Self, MathError> {
        self.0.checked_add(other.0).map(Self).ok_or(MathError::Overflow)
    }

    pub fn checked_sub(&self, other: Quote) -> Result<Self, MathError> {
        self.0.checked_sub(other.0).map(Self).ok_or(MathError::Overflow)
    }

    pub fn checked_neg(&self) -> Result<Self, MathError> {
        self.0.checked_neg().map(Self).ok_or(MathError::Overflow)
    }

    /// `self * bps / 10_000`, truncating toward zero.
    pub fn bps(&self, bps: Bps) -> Result<Self, MathError> {
        let scaled = self
            .0
            .checked_mul(bps.value() as i128)
            .ok_or(MathError::Overflow)?;
        Ok(Self(scaled / BPS_DENOMINATOR))
    }

    pub fn to_decimal(&self) -> Decimal {
        // values past 96 bits cannot be rendered exactly; saturate for display only
        Decimal::try_from_i128_with_scale(self.0, SCALE_DECIMALS).unwrap_or(if self.0 < 0 {
            Decimal::MIN
        } else {
            Decimal::MAX
        })
    }
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl PartialOrd for Quote {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quote {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// sums are used for reporting; ledger math goes through checked_add
impl Sum for Quote {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, q| Self(acc.0 + q.0))
    }
}

impl<'a> Sum<&'a Quote> for Quote {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, q| Self(acc.0 + q.0))
    }
}

// 1.4: integer leverage multiplier. must be >= 1x.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Leverage(u16);

impl Leverage {
    #[must_use]
    pub fn new(value: u16) -> Option<Self> {
        if value >= 1 {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: u16) -> Self {
        debug_assert!(value >= 1);
        Self(value)
    }

    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Leverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

// 1.5: basis points. 100 bps = 1%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Bps(u16);

impl Bps {
    pub fn new(bps: u16) -> Self {
        Self(bps)
    }

    pub fn value(&self) -> u16 {
        self.0
    }

    pub fn as_fraction(&self) -> Decimal {
        Decimal::new(self.0 as i64, 4)
    }
}

// 1.6: funding rate per interval, in PRICE_SCALE units (10_000 = 1%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct FundingRate(i64);

impl FundingRate {
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn zero() -> Self {
        Self(0)
    }

    /// Symmetric bound for a market's `max_funding_rate_bps`.
    pub fn from_bps(bps: Bps) -> Self {
        Self(bps.value() as i64 * (PRICE_SCALE / BPS_DENOMINATOR) as i64)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn as_fraction(&self) -> Decimal {
        Decimal::new(self.0, SCALE_DECIMALS)
    }
}

impl fmt::Display for FundingRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.as_fraction() * Decimal::ONE_HUNDRED)
    }
}

// 1.7: unix timestamp in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp())
    }

    pub fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> i64 {
        self.0
    }

    pub fn seconds_since(&self, earlier: Timestamp) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    pub fn plus_secs(&self, secs: i64) -> Self {
        Self(self.0.saturating_add(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn signed_size_operations() {
        let long = SignedSize::from_side(Side::Long, 10).unwrap();
        assert!(long.is_long());
        assert_eq!(long.abs(), 10);

        let short = SignedSize::from_side(Side::Short, 10).unwrap();
        assert!(short.is_short());
        assert_eq!(short.abs(), 10);
        assert_eq!(short.value(), -10);
        assert_eq!(short.side(), Some(Side::Short));
        assert_eq!(SignedSize::zero().side(), None);
    }

    #[test]
    fn oversized_side_conversion_is_rejected() {
        assert_eq!(
            SignedSize::from_side(Side::Long, u64::MAX),
            Err(MathError::Overflow)
        );
    }

    #[test]
    fn fixed_point_rendering() {
        assert_eq!(Price::from_units(91).to_decimal(), dec!(91));
        assert_eq!(Quote::new(45_500_000).to_decimal(), dec!(45.5));
        assert_eq!(Quote::new(-1).to_decimal(), dec!(-0.000001));
        assert_eq!(Quote::from_units(100).to_string(), "100.000000");
    }

    #[test]
    fn bps_conversion() {
        let hundred_bps = Bps::new(100);
        assert_eq!(hundred_bps.as_fraction(), dec!(0.01)); // 1%

        let notional = Quote::from_units(910);
        assert_eq!(notional.bps(Bps::new(500)).unwrap(), Quote::new(45_500_000));
    }

    #[test]
    fn funding_rate_bound_from_bps() {
        // 1 bps = 0.0001 = 100 in PRICE_SCALE units
        assert_eq!(FundingRate::from_bps(Bps::new(1)).value(), 100);
        assert_eq!(FundingRate::from_bps(Bps::new(100)).as_fraction(), dec!(0.01));
    }

    #[test]
    fn leverage_bounds() {
        assert!(Leverage::new(0).is_none());
        assert_eq!(Leverage::new(10).unwrap().to_string(), "10x");
    }
}
