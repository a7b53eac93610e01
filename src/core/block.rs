use crate::core::{TXOutput, Transaction, TxId};
use crate::error::{Result, WalletError};
use crate::utils::{current_timestamp, deserialize, serialize, sha256_digest};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Previous-block hash of the first block in a chain
pub const GENESIS_PREV_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// A block as the wallet sees it: an ordered list of transactions with a
/// position in the chain. Consensus fields (proof of work, merkle roots)
/// belong to the chain service, not to the wallet.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    timestamp: i64,
    pre_block_hash: String,
    hash: String,
    transactions: Vec<Transaction>,
    height: u32,
}

// Hashed header contents
#[derive(Serialize, bincode::Encode)]
struct BlockHeader {
    timestamp: i64,
    pre_block_hash: String,
    height: u32,
    tx_ids: Vec<TxId>,
}

impl Block {
    pub fn new_block(
        pre_block_hash: String,
        transactions: &[Transaction],
        height: u32,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(WalletError::Chain(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let mut block = Block {
            timestamp: current_timestamp()?,
            pre_block_hash,
            hash: String::new(),
            transactions: transactions.to_vec(),
            height,
        };
        block.hash = block.compute_hash()?;
        Ok(block)
    }

    fn compute_hash(&self) -> Result<String> {
        let header = BlockHeader {
            timestamp: self.timestamp,
            pre_block_hash: self.pre_block_hash.clone(),
            height: self.height,
            tx_ids: self.transactions.iter().map(|tx| tx.get_id()).collect(),
        };
        Ok(HEXLOWER.encode(&sha256_digest(&serialize(&header)?)))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pre_block_hash(&self) -> &str {
        self.pre_block_hash.as_str()
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_height(&self) -> u32 {
        self.height
    }

    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            hash: self.hash.clone(),
            height: self.height,
        }
    }

    /// Output `vout` of transaction `txid` if this block created it
    pub fn find_output(&self, txid: &TxId, vout: u32) -> Option<&TXOutput> {
        self.transactions
            .iter()
            .find(|tx| tx.get_id() == *txid)
            .and_then(|tx| tx.get_vout().get(vout as usize))
    }
}

/// A (hash, height) pair naming a block, used for checkpoints and scan results
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct BlockRef {
    pub hash: String,
    pub height: u32,
}

impl BlockRef {
    pub fn new(hash: impl Into<String>, height: u32) -> BlockRef {
        BlockRef {
            hash: hash.into(),
            height,
        }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.hash, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_hash_commits_to_parent() {
        let coinbase = Transaction::new_coinbase_with_subsidy(&[1u8; 20], 1).unwrap();
        let a = Block::new_block(GENESIS_PREV_HASH.to_string(), &[coinbase.clone()], 1).unwrap();
        let b = Block::new_block("ff".repeat(32), &[coinbase.clone()], 1).unwrap();

        assert_eq!(a.get_hash().len(), 64);
        assert_ne!(a.get_hash(), b.get_hash());
        assert!(a.find_output(&coinbase.get_id(), 0).is_some());
        assert!(a.find_output(&coinbase.get_id(), 1).is_none());
    }

    #[test]
    fn test_empty_block_rejected() {
        assert!(Block::new_block(GENESIS_PREV_HASH.to_string(), &[], 0).is_err());
    }

    #[test]
    fn test_block_serialization() {
        let coinbase = Transaction::new_coinbase_with_subsidy(&[1u8; 20], 0).unwrap();
        let block = Block::new_block(GENESIS_PREV_HASH.to_string(), &[coinbase], 0).unwrap();
        let decoded = Block::deserialize(&block.serialize().unwrap()).unwrap();
        assert_eq!(decoded.get_hash(), block.get_hash());
        assert_eq!(decoded.block_ref(), BlockRef::new(block.get_hash(), 0));
    }
}
