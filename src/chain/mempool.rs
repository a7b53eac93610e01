use crate::core::{OutPoint, TXOutput, Transaction, TxId};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub fee: u64,
    pub size: usize,
    sequence: u64,
}

/// ( K -> txid, V => MempoolEntry ) plus an index of which entry spends which outpoint
///
/// Entries are kept in arrival order, which is also a valid topological order
/// because a child is only accepted once its parent is present.
#[derive(Debug, Default)]
pub struct MemoryPool {
    entries: HashMap<TxId, MempoolEntry>,
    spent_by: HashMap<OutPoint, TxId>,
    next_sequence: u64,
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool::default()
    }

    pub fn get(&self, txid: &TxId) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    pub fn contains(&self, txid: &TxId) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add(&mut self, tx: Transaction, fee: u64, size: usize) {
        for input in tx.get_vin() {
            self.spent_by.insert(*input.prev_out(), tx.get_id());
        }
        let entry = MempoolEntry {
            tx,
            fee,
            size,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.entries.insert(entry.tx.get_id(), entry);
    }

    pub fn remove(&mut self, txid: &TxId) -> Option<MempoolEntry> {
        let entry = self.entries.remove(txid)?;
        for input in entry.tx.get_vin() {
            if self.spent_by.get(input.prev_out()) == Some(txid) {
                self.spent_by.remove(input.prev_out());
            }
        }
        Some(entry)
    }

    /// Unconfirmed output created by a mempool transaction
    pub fn output(&self, outpoint: &OutPoint) -> Option<&TXOutput> {
        self.entries
            .get(&outpoint.txid)
            .and_then(|entry| entry.tx.get_vout().get(outpoint.vout as usize))
    }

    pub fn spender_of(&self, outpoint: &OutPoint) -> Option<TxId> {
        self.spent_by.get(outpoint).copied()
    }

    /// Mempool transactions spending any input of `tx`
    pub fn conflicts_of(&self, tx: &Transaction) -> BTreeSet<TxId> {
        tx.get_vin()
            .iter()
            .filter_map(|input| self.spent_by.get(input.prev_out()).copied())
            .filter(|spender| *spender != tx.get_id())
            .collect()
    }

    /// `txid` and everything in the mempool that depends on it
    pub fn with_descendants(&self, txid: &TxId) -> BTreeSet<TxId> {
        let mut found = BTreeSet::new();
        let mut stack = vec![*txid];
        while let Some(current) = stack.pop() {
            if !found.insert(current) {
                continue;
            }
            if let Some(entry) = self.entries.get(&current) {
                for vout in 0..entry.tx.get_vout().len() as u32 {
                    if let Some(child) = self.spent_by.get(&OutPoint::new(current, vout)) {
                        stack.push(*child);
                    }
                }
            }
        }
        found
    }

    /// Entries in arrival order
    pub fn ordered(&self) -> Vec<&MempoolEntry> {
        let mut entries: Vec<&MempoolEntry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.sequence);
        entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.spent_by.clear();
    }
}
