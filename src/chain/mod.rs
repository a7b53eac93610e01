//! Chain view
//!
//! Everything the wallet knows about the block chain comes through
//! [`ChainView`]: blocks by height, the current tip, new-block notifications
//! and mempool submission. `LocalChain` is an in-process implementation with
//! a BIP125-aware mempool; the CLI simulator and the tests run against it.

pub mod local;
pub mod mempool;

pub use local::{LocalChain, RelayPolicy};
pub use mempool::{MemoryPool, MempoolEntry};

use crate::core::{Block, BlockRef, Transaction};
use crate::error::Result;
use std::fmt;

/// Called once per connected block, in chain order
pub type BlockCallback = Box<dyn Fn(&Block) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectKind {
    /// Below the relay minimum, or not enough to replace what it conflicts with
    InsufficientFee,
    /// Spends an input already spent by a mempool transaction that cannot be replaced
    Conflict,
    MissingInputs,
    /// Any other policy or consensus failure (bad signature, premature coinbase spend)
    Invalid,
    /// The chain service could not be reached
    Unavailable,
}

/// Why the mempool refused a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MempoolRejection {
    pub kind: RejectKind,
    pub reason: String,
}

impl MempoolRejection {
    pub fn new(kind: RejectKind, reason: impl Into<String>) -> MempoolRejection {
        MempoolRejection {
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for MempoolRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.reason)
    }
}

impl std::error::Error for MempoolRejection {}

pub trait ChainView: Send + Sync {
    /// Block at `height` on the active chain, `None` past the tip
    fn get_block_at_height(&self, height: u32) -> Result<Option<Block>>;

    /// `None` only for a chain without blocks
    fn get_tip(&self) -> Result<Option<BlockRef>>;

    /// Register for block-connected notifications
    fn subscribe(&self, on_block: BlockCallback);

    /// Validate `tx` against mempool policy and relay it.
    /// Resubmitting a transaction already in the mempool succeeds.
    fn accept_to_memory_pool(&self, tx: &Transaction) -> std::result::Result<(), MempoolRejection>;
}
