//! # Architect Wallet - Wallet Transaction Management
//!
//! This is the wallet side of my chain: it keeps track of the transactions
//! that matter to my keys, scans blocks for new ones, bumps fees on stuck
//! payments and relays them. When I come back to this code, here's what I
//! need to remember:
//!
//! ## What I Built
//! - **Transaction Store**: every wallet transaction with its confirmation,
//!   conflicts and replacement links, persisted atomically in sled
//! - **Scan Engine**: resumable, cancellable block scans that survive reorgs
//! - **Fee Bumping**: BIP125 replace-by-fee, paid from the change output
//! - **Broadcast**: mempool submission with a timeout and typed rejections
//! - **Receive Requests**: versioned payment request records
//!
//! ## How I Organized My Code
//! - `core/`: transactions, blocks, amounts and fee rates
//! - `chain/`: the chain view the wallet reads from, plus a local chain for tests and the simulator
//! - `signer/`: keys, addresses and the signing provider interface
//! - `storage/`: key-value backends (sled and in-memory)
//! - `wallet/`: the store, scanner, spending, fee bumping, broadcast and the `Wallet` facade
//! - `config/`: `WalletConfig` with file and environment overrides
//! - `utils/`: hashing, base58, ECDSA and bincode helpers
//! - `cli/`: command-line interface
//!
//! ## Key Design Decisions I Made
//! - Everything the wallet depends on is passed into `Wallet::new`, no globals
//! - Store writes hit the database first and memory second, so a failed write changes nothing
//! - Conflicts are kept as txid sets on each record instead of pointers
//! - The user's "yes, send it" is a plain `confirmed: bool`, never a UI callback

pub mod chain;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod signer;
pub mod storage;
pub mod utils;
pub mod wallet;

// Re-export commonly used types for convenience
pub use chain::{ChainView, LocalChain, MempoolRejection, RejectKind, RelayPolicy};
pub use cli::{Command, Opt};
pub use config::WalletConfig;
pub use core::{
    Block, BlockRef, FeeRate, OutPoint, TXInput, TXOutput, Transaction, TxId,
    MAX_BIP125_RBF_SEQUENCE, MAX_SEQUENCE_NONFINAL, SATOSHIS_PER_COIN, SEQUENCE_FINAL,
};
pub use error::{BumpError, Result, SubmitError, WalletError};
pub use signer::{
    convert_address, hash_pub_key, pub_key_hash_from_address, validate_address, LocalSigner,
    SigningError, SigningProvider,
};
pub use storage::{MemoryDatabase, SledDatabase, WalletDatabase};
pub use wallet::{
    Balance, ChangeType, CoinControl, FeeOptions, ReceiveRequestEntry, RecipientRequest,
    ScanOptions, ScanResult, ScanStatus, TransactionRecord, Wallet, WalletEvent,
    WalletTransaction,
};
