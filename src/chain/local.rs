// In-process chain used by the simulator and the tests.
// Blocks are produced on demand (no proof of work), the UTXO set is kept in
// memory, and the mempool enforces the relay rules a wallet runs into in
// practice: missing inputs, signatures, coinbase maturity, the minimum relay
// fee and BIP125 replacement.

use crate::chain::{BlockCallback, ChainView, MemoryPool, MempoolRejection, RejectKind};
use crate::core::{
    Block, BlockRef, FeeRate, OutPoint, TXOutput, Transaction, TxId, COINBASE_MATURITY,
    DEFAULT_INCREMENTAL_RELAY_FEE_RATE, DEFAULT_MIN_RELAY_FEE_RATE, GENESIS_PREV_HASH,
    INITIAL_BLOCK_REWARD,
};
use crate::error::{Result, WalletError};
use log::{debug, error, info};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

// Genesis coinbase pays to a key nobody holds
const GENESIS_PUB_KEY_HASH: [u8; 20] = [0u8; 20];

/// Mempool acceptance rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayPolicy {
    pub min_relay_fee: FeeRate,
    /// Extra rate a replacement must pay on top of what it evicts
    pub incremental_relay_fee: FeeRate,
    pub coinbase_maturity: u32,
}

impl Default for RelayPolicy {
    fn default() -> Self {
        RelayPolicy {
            min_relay_fee: FeeRate::from_sat_per_kvb(DEFAULT_MIN_RELAY_FEE_RATE),
            incremental_relay_fee: FeeRate::from_sat_per_kvb(DEFAULT_INCREMENTAL_RELAY_FEE_RATE),
            coinbase_maturity: COINBASE_MATURITY,
        }
    }
}

#[derive(Debug, Clone)]
struct Coin {
    output: TXOutput,
    height: u32,
    is_coinbase: bool,
}

#[derive(Default)]
struct ChainState {
    blocks: Vec<Block>,
    utxos: HashMap<OutPoint, Coin>,
    mempool: MemoryPool,
}

pub struct LocalChain {
    state: RwLock<ChainState>,
    subscribers: RwLock<Vec<BlockCallback>>,
    policy: RelayPolicy,
}

impl LocalChain {
    /// New chain holding only the genesis block
    pub fn new(policy: RelayPolicy) -> Result<LocalChain> {
        let coinbase = Transaction::new_coinbase_with_subsidy(&GENESIS_PUB_KEY_HASH, 0)?;
        let genesis = Block::new_block(GENESIS_PREV_HASH.to_string(), &[coinbase], 0)?;
        info!("Created local chain with genesis block {}", genesis.get_hash());

        let mut state = ChainState::default();
        Self::connect_block(&mut state, genesis);
        Ok(LocalChain {
            state: RwLock::new(state),
            subscribers: RwLock::new(Vec::new()),
            policy,
        })
    }

    pub fn policy(&self) -> &RelayPolicy {
        &self.policy
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, ChainState>> {
        self.state
            .read()
            .map_err(|_| WalletError::Chain("chain state lock poisoned".to_string()))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, ChainState>> {
        self.state
            .write()
            .map_err(|_| WalletError::Chain("chain state lock poisoned".to_string()))
    }

    pub fn height(&self) -> Result<u32> {
        Ok(self.read_state()?.blocks.len().saturating_sub(1) as u32)
    }

    pub fn mempool_contains(&self, txid: &TxId) -> bool {
        self.read_state()
            .map(|state| state.mempool.contains(txid))
            .unwrap_or(false)
    }

    pub fn mempool_len(&self) -> usize {
        self.read_state()
            .map(|state| state.mempool.len())
            .unwrap_or(0)
    }

    /// Fee paid by a mempool transaction
    pub fn mempool_fee(&self, txid: &TxId) -> Option<u64> {
        let state = self.read_state().ok()?;
        state.mempool.get(txid).map(|entry| entry.fee)
    }

    /// True when the confirmed UTXO set still holds `outpoint`
    pub fn is_unspent(&self, outpoint: &OutPoint) -> bool {
        self.read_state()
            .map(|state| state.utxos.contains_key(outpoint))
            .unwrap_or(false)
    }

    /// Mine one block paying the subsidy plus mempool fees to `pub_key_hash`.
    /// Every mempool transaction is included.
    pub fn mine_block(&self, pub_key_hash: &[u8]) -> Result<Block> {
        let block = {
            let mut state = self.write_state()?;
            let height = state.blocks.len() as u32;
            let prev_hash = state
                .blocks
                .last()
                .map(|block| block.get_hash().to_string())
                .unwrap_or_else(|| GENESIS_PREV_HASH.to_string());

            let pending: Vec<(Transaction, u64)> = state
                .mempool
                .ordered()
                .into_iter()
                .map(|entry| (entry.tx.clone(), entry.fee))
                .collect();
            let fees: u64 = pending.iter().map(|(_, fee)| *fee).sum();

            let coinbase =
                Transaction::new_coinbase(pub_key_hash, INITIAL_BLOCK_REWARD + fees, height)?;
            let mut transactions = vec![coinbase];
            transactions.extend(pending.into_iter().map(|(tx, _)| tx));

            let block = Block::new_block(prev_hash, &transactions, height)?;
            debug!(
                "Mined block {} at height {height} with {} transactions",
                block.get_hash(),
                transactions.len()
            );
            Self::connect_block(&mut state, block.clone());
            block
        };
        // Subscribers run without the state lock so they may query the chain
        self.notify(&block);
        Ok(block)
    }

    pub fn mine_blocks(&self, count: u32, pub_key_hash: &[u8]) -> Result<Vec<Block>> {
        (0..count).map(|_| self.mine_block(pub_key_hash)).collect()
    }

    /// Drop every block above `fork_height` and mine `count` replacement
    /// blocks on top of it. Transactions from the dropped blocks go back to
    /// the mempool when they are still valid.
    pub fn reorganize(&self, fork_height: u32, count: u32, pub_key_hash: &[u8]) -> Result<Vec<Block>> {
        {
            let mut state = self.write_state()?;
            if fork_height as usize >= state.blocks.len() {
                return Err(WalletError::Chain(format!(
                    "Fork height {fork_height} is above the tip"
                )));
            }
            let disconnected = state.blocks.split_off(fork_height as usize + 1);
            let mut pending: Vec<Transaction> = disconnected
                .iter()
                .flat_map(|block| block.get_transactions().iter())
                .filter(|tx| !tx.is_coinbase())
                .cloned()
                .collect();
            pending.extend(
                state
                    .mempool
                    .ordered()
                    .into_iter()
                    .map(|entry| entry.tx.clone()),
            );
            state.mempool.clear();

            let ChainState { blocks, utxos, .. } = &mut *state;
            utxos.clear();
            for block in blocks.iter() {
                Self::apply_to_utxos(utxos, block);
            }

            for tx in pending {
                if let Err(rejection) = Self::accept_locked(&mut state, &self.policy, &tx) {
                    debug!("Dropped {} after reorganisation: {rejection}", tx.get_id());
                }
            }
            info!(
                "Disconnected {} blocks back to height {fork_height}",
                disconnected.len()
            );
        }
        self.mine_blocks(count, pub_key_hash)
    }

    fn notify(&self, block: &Block) {
        match self.subscribers.read() {
            Ok(subscribers) => {
                for on_block in subscribers.iter() {
                    on_block(block);
                }
            }
            Err(_) => error!("Failed to acquire read lock on chain subscribers"),
        }
    }

    fn apply_to_utxos(utxos: &mut HashMap<OutPoint, Coin>, block: &Block) {
        for tx in block.get_transactions() {
            if !tx.is_coinbase() {
                for input in tx.get_vin() {
                    utxos.remove(input.prev_out());
                }
            }
            for (vout, output) in tx.get_vout().iter().enumerate() {
                utxos.insert(
                    OutPoint::new(tx.get_id(), vout as u32),
                    Coin {
                        output: output.clone(),
                        height: block.get_height(),
                        is_coinbase: tx.is_coinbase(),
                    },
                );
            }
        }
    }

    fn connect_block(state: &mut ChainState, block: Block) {
        Self::apply_to_utxos(&mut state.utxos, &block);
        for tx in block.get_transactions() {
            state.mempool.remove(&tx.get_id());
            // Anything left that spends the same coins lost the race
            for conflict in state.mempool.conflicts_of(tx) {
                for evicted in state.mempool.with_descendants(&conflict) {
                    state.mempool.remove(&evicted);
                }
            }
        }
        state.blocks.push(block);
    }

    fn accept_locked(
        state: &mut ChainState,
        policy: &RelayPolicy,
        tx: &Transaction,
    ) -> std::result::Result<(), MempoolRejection> {
        let txid = tx.get_id();
        if tx.is_coinbase() {
            return Err(MempoolRejection::new(RejectKind::Invalid, "coinbase"));
        }
        if state.mempool.contains(&txid) {
            return Ok(());
        }

        let spend_height = state.blocks.len() as u32;
        let mut seen = HashSet::new();
        let mut input_value = 0u64;
        for (idx, input) in tx.get_vin().iter().enumerate() {
            let prev_out = input.prev_out();
            if !seen.insert(*prev_out) {
                return Err(MempoolRejection::new(
                    RejectKind::Invalid,
                    "bad-txns-inputs-duplicate",
                ));
            }
            let output = if let Some(coin) = state.utxos.get(prev_out) {
                if coin.is_coinbase && spend_height - coin.height < policy.coinbase_maturity {
                    return Err(MempoolRejection::new(
                        RejectKind::Invalid,
                        format!(
                            "bad-txns-premature-spend-of-coinbase, tried to spend coinbase at depth {}",
                            spend_height - coin.height
                        ),
                    ));
                }
                coin.output.clone()
            } else if let Some(output) = state.mempool.output(prev_out) {
                output.clone()
            } else {
                return Err(MempoolRejection::new(
                    RejectKind::MissingInputs,
                    "bad-txns-inputs-missingorspent",
                ));
            };
            if !tx.verify_input(idx, &output) {
                return Err(MempoolRejection::new(
                    RejectKind::Invalid,
                    format!("mandatory-script-verify-flag-failed (input {idx})"),
                ));
            }
            input_value = input_value.saturating_add(output.get_value());
        }

        let output_value = tx
            .output_value()
            .map_err(|e| MempoolRejection::new(RejectKind::Invalid, e.to_string()))?;
        if input_value < output_value {
            return Err(MempoolRejection::new(
                RejectKind::Invalid,
                "bad-txns-in-belowout",
            ));
        }
        let fee = input_value - output_value;
        let size = tx
            .size()
            .map_err(|e| MempoolRejection::new(RejectKind::Invalid, e.to_string()))?;

        let min_fee = policy.min_relay_fee.fee_for(size);
        if fee < min_fee {
            return Err(MempoolRejection::new(
                RejectKind::InsufficientFee,
                format!("min relay fee not met, {fee} < {min_fee}"),
            ));
        }

        let conflicts = state.mempool.conflicts_of(tx);
        if !conflicts.is_empty() {
            let evicted = Self::check_replacement(state, policy, tx, fee, size, &conflicts)?;
            for id in &evicted {
                state.mempool.remove(id);
            }
            info!("Replaced {} mempool transactions with {txid}", evicted.len());
        }

        state.mempool.add(tx.clone(), fee, size);
        debug!("Accepted {txid} to mempool (fee {fee}, {size} bytes)");
        Ok(())
    }

    // BIP125 rules 1, 3, 4 and 6. Returns everything the replacement evicts.
    fn check_replacement(
        state: &ChainState,
        policy: &RelayPolicy,
        tx: &Transaction,
        fee: u64,
        size: usize,
        conflicts: &BTreeSet<TxId>,
    ) -> std::result::Result<BTreeSet<TxId>, MempoolRejection> {
        let txid = tx.get_id();
        let new_rate = FeeRate::from_fee_and_size(fee, size);
        let mut evicted = BTreeSet::new();
        for conflict in conflicts {
            let Some(entry) = state.mempool.get(conflict) else {
                continue;
            };
            if !entry.tx.signals_rbf() {
                return Err(MempoolRejection::new(
                    RejectKind::Conflict,
                    format!("txn-mempool-conflict: {conflict} is not replaceable"),
                ));
            }
            let old_rate = FeeRate::from_fee_and_size(entry.fee, entry.size);
            if new_rate <= old_rate {
                return Err(MempoolRejection::new(
                    RejectKind::InsufficientFee,
                    format!(
                        "insufficient fee, rejecting replacement {txid}; new feerate {new_rate} <= old feerate {old_rate}"
                    ),
                ));
            }
            evicted.extend(state.mempool.with_descendants(conflict));
        }

        if tx
            .get_vin()
            .iter()
            .any(|input| evicted.contains(&input.prev_out().txid))
        {
            return Err(MempoolRejection::new(
                RejectKind::Invalid,
                format!("bad-txns-spends-conflicting-tx, {txid} spends an output it replaces"),
            ));
        }

        let replaced_fees: u64 = evicted
            .iter()
            .filter_map(|id| state.mempool.get(id))
            .map(|entry| entry.fee)
            .sum();
        if fee < replaced_fees {
            return Err(MempoolRejection::new(
                RejectKind::InsufficientFee,
                format!(
                    "insufficient fee, rejecting replacement {txid}, less fees than conflicting txs; {fee} < {replaced_fees}"
                ),
            ));
        }
        let additional = policy.incremental_relay_fee.fee_for(size);
        if fee - replaced_fees < additional {
            return Err(MempoolRejection::new(
                RejectKind::InsufficientFee,
                format!(
                    "insufficient fee, rejecting replacement {txid}, not enough additional fees to relay; {} < {additional}",
                    fee - replaced_fees
                ),
            ));
        }
        Ok(evicted)
    }
}

impl ChainView for LocalChain {
    fn get_block_at_height(&self, height: u32) -> Result<Option<Block>> {
        Ok(self.read_state()?.blocks.get(height as usize).cloned())
    }

    fn get_tip(&self) -> Result<Option<BlockRef>> {
        Ok(self.read_state()?.blocks.last().map(Block::block_ref))
    }

    fn subscribe(&self, on_block: BlockCallback) {
        match self.subscribers.write() {
            Ok(mut subscribers) => subscribers.push(on_block),
            Err(_) => error!("Failed to acquire write lock on chain subscribers"),
        }
    }

    fn accept_to_memory_pool(&self, tx: &Transaction) -> std::result::Result<(), MempoolRejection> {
        let mut state = self
            .state
            .write()
            .map_err(|_| MempoolRejection::new(RejectKind::Unavailable, "chain state lock poisoned"))?;
        Self::accept_locked(&mut state, &self.policy, tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TXInput, MAX_BIP125_RBF_SEQUENCE, MAX_SEQUENCE_NONFINAL, SEQUENCE_FINAL};
    use crate::signer::{pub_key_hash_from_address, LocalSigner, SigningProvider};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct Fixture {
        chain: LocalChain,
        signer: LocalSigner,
        pkh: Vec<u8>,
    }

    fn fixture(blocks: u32) -> Fixture {
        let chain = LocalChain::new(RelayPolicy::default()).unwrap();
        let signer = LocalSigner::new();
        let pkh = pub_key_hash_from_address(&signer.generate_key().unwrap()).unwrap();
        chain.mine_blocks(blocks, &pkh).unwrap();
        Fixture { chain, signer, pkh }
    }

    fn coinbase_at(chain: &LocalChain, height: u32) -> (OutPoint, TXOutput) {
        let block = chain.get_block_at_height(height).unwrap().unwrap();
        let coinbase = &block.get_transactions()[0];
        (
            OutPoint::new(coinbase.get_id(), 0),
            coinbase.get_vout()[0].clone(),
        )
    }

    fn spend(f: &Fixture, from: (OutPoint, TXOutput), fee: u64, sequence: u32) -> Transaction {
        let value = from.1.get_value() - fee;
        let unsigned = Transaction::new(
            vec![TXInput::new(from.0, sequence)],
            vec![TXOutput::to_pub_key_hash(value, &f.pkh)],
            0,
        )
        .unwrap();
        f.signer.sign(&unsigned, &[from.1]).unwrap()
    }

    #[test]
    fn test_mining_extends_tip() {
        let f = fixture(3);
        let tip = f.chain.get_tip().unwrap().unwrap();
        assert_eq!(tip.height, 3);
        let block = f.chain.get_block_at_height(3).unwrap().unwrap();
        let parent = f.chain.get_block_at_height(2).unwrap().unwrap();
        assert_eq!(block.get_pre_block_hash(), parent.get_hash());
        assert!(f.chain.get_block_at_height(4).unwrap().is_none());
    }

    #[test]
    fn test_coinbase_maturity_enforced() {
        let f = fixture(100);
        // Next block is 101, so the height 1 coinbase is exactly old enough
        let mature = spend(&f, coinbase_at(&f.chain, 1), 10_000, SEQUENCE_FINAL);
        assert!(f.chain.accept_to_memory_pool(&mature).is_ok());

        let immature = spend(&f, coinbase_at(&f.chain, 2), 10_000, SEQUENCE_FINAL);
        let rejection = f.chain.accept_to_memory_pool(&immature).unwrap_err();
        assert_eq!(rejection.kind, RejectKind::Invalid);
        assert!(rejection.reason.contains("premature-spend-of-coinbase"));
    }

    #[test]
    fn test_min_relay_fee_and_missing_inputs() {
        let f = fixture(101);
        let cheap = spend(&f, coinbase_at(&f.chain, 1), 1, SEQUENCE_FINAL);
        let rejection = f.chain.accept_to_memory_pool(&cheap).unwrap_err();
        assert_eq!(rejection.kind, RejectKind::InsufficientFee);

        let unknown = (
            OutPoint::new(TxId::from_bytes(&[5u8; 32]).unwrap(), 0),
            TXOutput::to_pub_key_hash(1_000_000, &f.pkh),
        );
        let orphan = spend(&f, unknown, 10_000, SEQUENCE_FINAL);
        let rejection = f.chain.accept_to_memory_pool(&orphan).unwrap_err();
        assert_eq!(rejection.kind, RejectKind::MissingInputs);
    }

    #[test]
    fn test_bad_signature_rejected() {
        let f = fixture(101);
        let (outpoint, output) = coinbase_at(&f.chain, 1);
        let other = LocalSigner::new();
        let other_pkh = pub_key_hash_from_address(&other.generate_key().unwrap()).unwrap();
        let unsigned = Transaction::new(
            vec![TXInput::new(outpoint, SEQUENCE_FINAL)],
            vec![TXOutput::to_pub_key_hash(output.get_value() - 10_000, &f.pkh)],
            0,
        )
        .unwrap();
        // Signed by a key that does not own the coin
        let forged = other
            .sign(&unsigned, &[TXOutput::to_pub_key_hash(output.get_value(), &other_pkh)])
            .unwrap();
        let rejection = f.chain.accept_to_memory_pool(&forged).unwrap_err();
        assert!(rejection.reason.contains("mandatory-script-verify-flag-failed"));
    }

    #[test]
    fn test_replacement_rules() {
        let f = fixture(101);
        let coin = coinbase_at(&f.chain, 1);

        let final_tx = spend(&f, coin.clone(), 10_000, MAX_SEQUENCE_NONFINAL);
        f.chain.accept_to_memory_pool(&final_tx).unwrap();
        let rival = spend(&f, coin.clone(), 50_000, MAX_BIP125_RBF_SEQUENCE);
        let rejection = f.chain.accept_to_memory_pool(&rival).unwrap_err();
        assert_eq!(rejection.kind, RejectKind::Conflict);

        let coin = coinbase_at(&f.chain, 2);
        let original = spend(&f, coin.clone(), 10_000, MAX_BIP125_RBF_SEQUENCE);
        f.chain.accept_to_memory_pool(&original).unwrap();

        let same_fee = spend(&f, coin.clone(), 10_000 + 1, MAX_BIP125_RBF_SEQUENCE);
        let rejection = f.chain.accept_to_memory_pool(&same_fee).unwrap_err();
        assert_eq!(rejection.kind, RejectKind::InsufficientFee);

        let bumped = spend(&f, coin, 20_000, MAX_BIP125_RBF_SEQUENCE);
        f.chain.accept_to_memory_pool(&bumped).unwrap();
        assert!(f.chain.mempool_contains(&bumped.get_id()));
        assert!(!f.chain.mempool_contains(&original.get_id()));
        assert_eq!(f.chain.mempool_fee(&bumped.get_id()), Some(20_000));

        // Resubmission is a no-op
        assert!(f.chain.accept_to_memory_pool(&bumped).is_ok());
    }

    #[test]
    fn test_mined_block_collects_fees_and_clears_mempool() {
        let f = fixture(101);
        let coin = coinbase_at(&f.chain, 1);
        let tx = spend(&f, coin.clone(), 10_000, SEQUENCE_FINAL);
        f.chain.accept_to_memory_pool(&tx).unwrap();

        let block = f.chain.mine_block(&f.pkh).unwrap();
        assert_eq!(block.get_transactions().len(), 2);
        assert_eq!(
            block.get_transactions()[0].output_value().unwrap(),
            INITIAL_BLOCK_REWARD + 10_000
        );
        assert_eq!(f.chain.mempool_len(), 0);
        assert!(!f.chain.is_unspent(&coin.0));
        assert!(f.chain.is_unspent(&OutPoint::new(tx.get_id(), 0)));
    }

    #[test]
    fn test_reorganize_notifies_and_restores_mempool() {
        let f = fixture(101);
        let seen = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&seen);
        f.chain.subscribe(Box::new(move |block: &Block| {
            counter.store(block.get_height(), Ordering::SeqCst);
        }));

        let tx = spend(&f, coinbase_at(&f.chain, 1), 10_000, SEQUENCE_FINAL);
        f.chain.accept_to_memory_pool(&tx).unwrap();
        f.chain.mine_block(&f.pkh).unwrap();
        let old_tip = f.chain.get_tip().unwrap().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 102);

        f.chain.reorganize(101, 2, &f.pkh).unwrap();
        let new_tip = f.chain.get_tip().unwrap().unwrap();
        assert_eq!(new_tip.height, 103);
        assert_ne!(
            f.chain.get_block_at_height(102).unwrap().unwrap().get_hash(),
            old_tip.hash
        );
        assert_eq!(seen.load(Ordering::SeqCst), 103);
        // The spend went back to the mempool and was mined again
        assert!(f.chain.is_unspent(&OutPoint::new(tx.get_id(), 0)));
        assert!(f.chain.reorganize(500, 1, &f.pkh).is_err());
    }
}
