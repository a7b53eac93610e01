// Sled-backed wallet database, one tree per wallet
use crate::error::{Result, WalletError};
use crate::storage::{DbOp, WalletDatabase};
use log::info;
use sled::{Batch, Db, Tree};
use std::path::{Path, PathBuf};

const WALLET_TREE: &str = "wallet";

pub struct SledDatabase {
    db: Db,
    tree: Tree,
    path: Option<PathBuf>,
}

impl SledDatabase {
    pub fn open(path: impl AsRef<Path>) -> Result<SledDatabase> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path)
            .map_err(|e| WalletError::Database(format!("Failed to open database: {e}")))?;
        let tree = db
            .open_tree(WALLET_TREE)
            .map_err(|e| WalletError::Database(format!("Failed to open wallet tree: {e}")))?;
        info!("Opened wallet database at {}", path.display());
        Ok(SledDatabase {
            db,
            tree,
            path: Some(path),
        })
    }

    /// Database removed when dropped
    pub fn temporary() -> Result<SledDatabase> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| WalletError::Database(format!("Failed to open database: {e}")))?;
        let tree = db
            .open_tree(WALLET_TREE)
            .map_err(|e| WalletError::Database(format!("Failed to open wallet tree: {e}")))?;
        Ok(SledDatabase {
            db,
            tree,
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl WalletDatabase for SledDatabase {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self
            .tree
            .get(key)
            .map_err(|e| WalletError::Database(format!("Failed to read key: {e}")))?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = vec![];
        for item in self.tree.scan_prefix(prefix) {
            let (k, v) = item
                .map_err(|e| WalletError::Database(format!("Failed to iterate wallet tree: {e}")))?;
            entries.push((k.to_vec(), v.to_vec()));
        }
        Ok(entries)
    }

    fn apply_batch(&self, ops: Vec<DbOp>) -> Result<()> {
        let mut batch = Batch::default();
        for op in ops {
            match op {
                DbOp::Put(key, value) => batch.insert(key, value),
                DbOp::Delete(key) => batch.remove(key),
            }
        }
        self.tree
            .apply_batch(batch)
            .map_err(|e| WalletError::Database(format!("Failed to apply batch: {e}")))
    }

    fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| WalletError::Database(format!("Failed to flush database: {e}")))?;
        Ok(())
    }
}
