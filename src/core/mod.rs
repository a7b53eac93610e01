//! Core chain primitives
//!
//! Transactions, blocks, amounts and fee rates shared by the chain view, the
//! signer and the wallet.

pub mod block;
pub mod fees;
pub mod monetary;
pub mod transaction;

pub use block::{Block, BlockRef, GENESIS_PREV_HASH};
pub use fees::{
    FeeRate, DEFAULT_INCREMENTAL_RELAY_FEE_RATE, DEFAULT_MIN_BUMP_FEE_DELTA,
    DEFAULT_MIN_RELAY_FEE_RATE, DEFAULT_WALLET_FEE_RATE,
};
pub use monetary::{
    COINBASE_MATURITY, DEFAULT_MAX_TX_FEE, DUST_THRESHOLD, INITIAL_BLOCK_REWARD,
    SATOSHIS_PER_COIN,
};
pub use transaction::{
    OutPoint, TXInput, TXOutput, Transaction, TxId, MAX_BIP125_RBF_SEQUENCE,
    MAX_SEQUENCE_NONFINAL, SEQUENCE_FINAL,
};
