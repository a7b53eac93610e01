/// Monetary units and policy constants
///
/// Amounts are integer satoshis everywhere in the wallet. Coins only show up
/// when formatting for people.
///
/// Number of satoshis in one coin
pub const SATOSHIS_PER_COIN: u64 = 100_000_000;

/// Coinbase subsidy paid by the local chain (50 coins)
pub const INITIAL_BLOCK_REWARD: u64 = 50 * SATOSHIS_PER_COIN;

/// A coinbase output needs this many blocks on top of it before it can be spent
pub const COINBASE_MATURITY: u32 = 100;

/// Outputs smaller than this are not worth creating
pub const DUST_THRESHOLD: u64 = 546;

/// Default cap on the absolute fee of a wallet transaction (0.1 coins)
pub const DEFAULT_MAX_TX_FEE: u64 = SATOSHIS_PER_COIN / 10;

/// Utility functions for monetary conversions
pub mod conversions {
    use super::*;

    /// Convert satoshis to coins
    pub fn satoshis_to_coins(satoshis: u64) -> f64 {
        satoshis as f64 / SATOSHIS_PER_COIN as f64
    }

    /// Format satoshis with eight decimals, without going through floating point
    ///
    /// # Examples
    /// ```
    /// use architect_wallet::core::monetary::conversions::format_satoshis;
    /// assert_eq!(format_satoshis(100_000_000), "1.00000000 coins");
    /// assert_eq!(format_satoshis(1), "0.00000001 coins");
    /// ```
    pub fn format_satoshis(satoshis: u64) -> String {
        format!(
            "{}.{:08} coins",
            satoshis / SATOSHIS_PER_COIN,
            satoshis % SATOSHIS_PER_COIN
        )
    }

    pub fn is_above_dust_threshold(amount: u64, threshold: u64) -> bool {
        amount >= threshold
    }
}
