use crate::error::{Result, WalletError};
use crate::storage::{DbOp, WalletDatabase};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// ( K -> record key, V => encoded record )
pub struct MemoryDatabase {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    pub fn new() -> MemoryDatabase {
        MemoryDatabase {
            inner: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(map) => map.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory database");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> WalletError {
    log::error!("Memory database lock poisoned");
    WalletError::Database("memory database lock poisoned".to_string())
}

impl WalletDatabase for MemoryDatabase {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn apply_batch(&self, ops: Vec<DbOp>) -> Result<()> {
        // One write guard for the whole batch, readers never see half of it
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        for op in ops {
            match op {
                DbOp::Put(key, value) => {
                    map.insert(key, value);
                }
                DbOp::Delete(key) => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
