//! Fee rates and fee policy
//!
//! Rates are expressed in satoshis per 1000 bytes of serialized transaction,
//! the same unit the relay policy of the chain uses. Converting a rate into an
//! absolute fee always rounds up so a transaction never lands a satoshi short
//! of the rate it was built for.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default minimum relay fee rate (sat/kvB)
pub const DEFAULT_MIN_RELAY_FEE_RATE: u64 = 1_000;

/// Default incremental relay fee rate used by replacement rules (sat/kvB)
pub const DEFAULT_INCREMENTAL_RELAY_FEE_RATE: u64 = 1_000;

/// Default rate the wallet pays when the caller does not pick one (sat/kvB)
pub const DEFAULT_WALLET_FEE_RATE: u64 = 10_000;

/// Default minimum absolute fee increase for a bump (sat)
pub const DEFAULT_MIN_BUMP_FEE_DELTA: u64 = 1_000;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct FeeRate(u64);

impl FeeRate {
    pub const ZERO: FeeRate = FeeRate(0);

    pub fn from_sat_per_kvb(sat_per_kvb: u64) -> FeeRate {
        FeeRate(sat_per_kvb)
    }

    /// Effective rate paid by `fee` over `size` bytes (rounded down)
    pub fn from_fee_and_size(fee: u64, size: usize) -> FeeRate {
        if size == 0 {
            return FeeRate::ZERO;
        }
        FeeRate(fee.saturating_mul(1_000) / size as u64)
    }

    pub fn sat_per_kvb(&self) -> u64 {
        self.0
    }

    /// Absolute fee for `size` bytes, rounded up
    pub fn fee_for(&self, size: usize) -> u64 {
        let numerator = self.0.saturating_mul(size as u64);
        numerator.div_ceil(1_000)
    }

    pub fn saturating_add(self, other: FeeRate) -> FeeRate {
        FeeRate(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sat/kvB", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_for_rounds_up() {
        let rate = FeeRate::from_sat_per_kvb(1_000);
        assert_eq!(rate.fee_for(250), 250);

        let rate = FeeRate::from_sat_per_kvb(1_500);
        assert_eq!(rate.fee_for(1), 2);
        assert_eq!(rate.fee_for(0), 0);
    }

    #[test]
    fn test_from_fee_and_size() {
        assert_eq!(FeeRate::from_fee_and_size(500, 250).sat_per_kvb(), 2_000);
        assert_eq!(FeeRate::from_fee_and_size(500, 0), FeeRate::ZERO);
    }

    #[test]
    fn test_ordering_and_display() {
        let low = FeeRate::from_sat_per_kvb(1_000);
        let high = low.saturating_add(FeeRate::from_sat_per_kvb(1_000));
        assert!(high > low);
        assert_eq!(high.to_string(), "2000 sat/kvB");
    }
}
