//! Wallet persistence
//!
//! The wallet only needs an ordered key-value store with atomic batches.
//! `SledDatabase` is the on-disk backend, `MemoryDatabase` keeps everything in
//! process for tests and throwaway wallets.

pub mod memory;
pub mod sled_db;

pub use memory::MemoryDatabase;
pub use sled_db::SledDatabase;

use crate::error::Result;

/// One write inside an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

impl DbOp {
    pub fn put(key: impl AsRef<[u8]>, value: Vec<u8>) -> DbOp {
        DbOp::Put(key.as_ref().to_vec(), value)
    }

    pub fn delete(key: impl AsRef<[u8]>) -> DbOp {
        DbOp::Delete(key.as_ref().to_vec())
    }
}

/// Key-value store interface the wallet persists through.
///
/// `apply_batch` must be all-or-nothing: either every op lands or none does.
pub trait WalletDatabase: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// All entries whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    fn apply_batch(&self, ops: Vec<DbOp>) -> Result<()>;

    fn flush(&self) -> Result<()>;

    fn put(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.apply_batch(vec![DbOp::Put(key.to_vec(), value)])
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.apply_batch(vec![DbOp::Delete(key.to_vec())])
    }
}
