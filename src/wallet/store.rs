// Wallet transaction store
//
// Owns every transaction the wallet cares about together with its wallet
// metadata (confirmation, conflicts, replacement links) and the receive
// request log. Mutations run under one write lock, are persisted as a single
// atomic batch and only then applied in memory, so readers never observe a
// half-applied update and a failed write leaves the store untouched.

use crate::config::WalletConfig;
use crate::core::{BlockRef, OutPoint, TXOutput, Transaction, TxId};
use crate::error::{BumpError, Result, WalletError};
use crate::signer::SigningProvider;
use crate::storage::{DbOp, WalletDatabase};
use crate::utils::{current_timestamp, deserialize, serialize};
use crate::wallet::requests::{ReceiveRequestEntry, RecipientRequest};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

const TX_PREFIX: &str = "tx/";
const BEST_BLOCK_KEY: &str = "bestblock";
const REQUEST_PREFIX: &str = "rr/";
const NEXT_REQUEST_ID_KEY: &str = "rr_next_id";

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum ConfirmationStatus {
    Unconfirmed,
    Confirmed(BlockRef),
}

impl ConfirmationStatus {
    pub fn block(&self) -> Option<&BlockRef> {
        match self {
            ConfirmationStatus::Confirmed(block) => Some(block),
            ConfirmationStatus::Unconfirmed => None,
        }
    }

    pub fn height(&self) -> Option<u32> {
        self.block().map(|block| block.height)
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct WalletTransaction {
    pub tx: Transaction,
    pub confirmation: ConfirmationStatus,
    /// Wallet transactions spending at least one of the same outpoints
    pub conflicts: BTreeSet<TxId>,
    /// Set once a fee bump replaced this transaction
    pub replaced_by: Option<TxId>,
    pub replaces: Option<TxId>,
    pub time_received: i64,
    /// Every input spends a wallet output
    pub from_me: bool,
    pub in_mempool: bool,
    pub abandoned: bool,
    pub order_pos: u64,
}

impl WalletTransaction {
    pub fn txid(&self) -> TxId {
        self.tx.get_id()
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self.confirmation, ConfirmationStatus::Confirmed(_))
    }

    /// BIP125 opt-in signalled by at least one input
    pub fn is_replaceable(&self) -> bool {
        self.tx.signals_rbf()
    }

    pub fn is_bumped(&self) -> bool {
        self.replaced_by.is_some()
    }

    /// Confirmations relative to `tip_height`, 0 while unconfirmed
    pub fn depth(&self, tip_height: u32) -> u32 {
        match &self.confirmation {
            ConfirmationStatus::Confirmed(block) if tip_height >= block.height => {
                tip_height - block.height + 1
            }
            ConfirmationStatus::Confirmed(_) => 1,
            ConfirmationStatus::Unconfirmed => 0,
        }
    }
}

/// Wallet balance split the way the GUI shows it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Balance {
    /// Confirmed, plus unconfirmed outputs of our own transactions
    pub trusted: u64,
    /// Unconfirmed outputs paid to us by others
    pub untrusted_pending: u64,
    /// Coinbase outputs that have not reached maturity
    pub immature: u64,
}

impl Balance {
    pub fn total(&self, include_unconfirmed: bool) -> u64 {
        if include_unconfirmed {
            self.trusted + self.untrusted_pending
        } else {
            self.trusted
        }
    }
}

/// A spendable wallet output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletCoin {
    pub outpoint: OutPoint,
    pub output: TXOutput,
    pub depth: u32,
    pub from_me: bool,
}

/// One row of the transaction list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionRecord {
    pub txid: String,
    pub confirmations: u32,
    /// Net effect on the wallet in satoshis
    pub amount: i64,
    pub fee: Option<u64>,
    pub replaceable: bool,
    pub replaced_by: Option<String>,
    pub can_bump: bool,
}

#[derive(Default)]
struct StoreState {
    txs: HashMap<TxId, WalletTransaction>,
    // outpoint -> wallet transactions spending it
    spends: HashMap<OutPoint, BTreeSet<TxId>>,
    best_block: Option<BlockRef>,
    next_order: u64,
    requests: BTreeMap<i64, Vec<u8>>,
    next_request_id: i64,
}

impl StoreState {
    fn index(&mut self, record: WalletTransaction) {
        let txid = record.txid();
        if !self.txs.contains_key(&txid) && !record.tx.is_coinbase() {
            for input in record.tx.get_vin() {
                self.spends.entry(*input.prev_out()).or_default().insert(txid);
            }
        }
        self.next_order = self.next_order.max(record.order_pos + 1);
        self.txs.insert(txid, record);
    }

    fn tip_height(&self) -> u32 {
        self.best_block.as_ref().map(|b| b.height).unwrap_or(0)
    }

    // Part of the wallet's view of history: confirmed, or still able to confirm
    fn is_active(&self, record: &WalletTransaction) -> bool {
        if record.is_confirmed() {
            return true;
        }
        if record.tx.is_coinbase() || record.abandoned || record.replaced_by.is_some() {
            return false;
        }
        !record.conflicts.iter().any(|other| {
            self.txs
                .get(other)
                .map(WalletTransaction::is_confirmed)
                .unwrap_or(false)
        })
    }

    fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.spends
            .get(outpoint)
            .map(|spenders| {
                spenders
                    .iter()
                    .filter_map(|txid| self.txs.get(txid))
                    .any(|spender| self.is_active(spender))
            })
            .unwrap_or(false)
    }

    fn prev_output(&self, outpoint: &OutPoint) -> Option<&TXOutput> {
        self.txs
            .get(&outpoint.txid)
            .and_then(|record| record.tx.get_vout().get(outpoint.vout as usize))
    }

    fn is_from_me(&self, tx: &Transaction, signer: &dyn SigningProvider) -> bool {
        !tx.is_coinbase()
            && tx.get_vin().iter().all(|input| {
                self.prev_output(input.prev_out())
                    .map(|out| signer.is_mine(out.get_pub_key_hash()))
                    .unwrap_or(false)
            })
    }

    fn debit(&self, tx: &Transaction, signer: &dyn SigningProvider) -> u64 {
        if tx.is_coinbase() {
            return 0;
        }
        tx.get_vin()
            .iter()
            .filter_map(|input| self.prev_output(input.prev_out()))
            .filter(|out| signer.is_mine(out.get_pub_key_hash()))
            .map(TXOutput::get_value)
            .sum()
    }

    fn blocks_to_maturity(&self, record: &WalletTransaction, maturity: u32) -> u32 {
        if !record.tx.is_coinbase() {
            return 0;
        }
        (maturity + 1).saturating_sub(record.depth(self.tip_height()))
    }
}

fn tx_key(txid: &TxId) -> String {
    format!("{TX_PREFIX}{txid}")
}

fn request_key(id: i64) -> Vec<u8> {
    let mut key = REQUEST_PREFIX.as_bytes().to_vec();
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn credit(tx: &Transaction, signer: &dyn SigningProvider) -> u64 {
    tx.get_vout()
        .iter()
        .filter(|out| signer.is_mine(out.get_pub_key_hash()))
        .map(TXOutput::get_value)
        .sum()
}

pub struct WalletTxStore {
    db: Arc<dyn WalletDatabase>,
    signer: Arc<dyn SigningProvider>,
    coinbase_maturity: u32,
    spend_zero_conf_change: bool,
    state: RwLock<StoreState>,
}

impl WalletTxStore {
    /// Open the store, reloading everything previously persisted in `db`
    pub fn load(
        db: Arc<dyn WalletDatabase>,
        signer: Arc<dyn SigningProvider>,
        config: &WalletConfig,
    ) -> Result<WalletTxStore> {
        let mut state = StoreState {
            next_request_id: 1,
            ..StoreState::default()
        };

        for (_, value) in db.scan_prefix(TX_PREFIX.as_bytes())? {
            let record: WalletTransaction = deserialize(&value)?;
            state.index(record);
        }
        state.best_block = db
            .get(BEST_BLOCK_KEY.as_bytes())?
            .map(|bytes| deserialize::<BlockRef>(&bytes))
            .transpose()?;

        for (key, value) in db.scan_prefix(REQUEST_PREFIX.as_bytes())? {
            let id_bytes: [u8; 8] = match key[REQUEST_PREFIX.len()..].try_into() {
                Ok(bytes) => bytes,
                Err(_) => {
                    warn!("Skipping receive request with malformed key");
                    continue;
                }
            };
            state.requests.insert(i64::from_be_bytes(id_bytes), value);
        }
        let persisted_next = db
            .get(NEXT_REQUEST_ID_KEY.as_bytes())?
            .map(|bytes| deserialize::<i64>(&bytes))
            .transpose()?
            .unwrap_or(1);
        let after_existing = state.requests.keys().next_back().map(|id| id + 1).unwrap_or(1);
        state.next_request_id = persisted_next.max(after_existing);

        info!(
            "Loaded {} wallet transactions and {} receive requests",
            state.txs.len(),
            state.requests.len()
        );
        Ok(WalletTxStore {
            db,
            signer,
            coinbase_maturity: config.coinbase_maturity,
            spend_zero_conf_change: config.spend_zero_conf_change,
            state: RwLock::new(state),
        })
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.state.read().map_err(|_| {
            log::error!("Wallet store lock poisoned");
            WalletError::Database("wallet store lock poisoned".to_string())
        })
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.state.write().map_err(|_| {
            log::error!("Wallet store lock poisoned");
            WalletError::Database("wallet store lock poisoned".to_string())
        })
    }

    // Persist first, then apply. A failed batch leaves memory untouched.
    fn commit(
        &self,
        state: &mut StoreState,
        records: Vec<WalletTransaction>,
        extra: Vec<DbOp>,
    ) -> Result<()> {
        let mut ops = Vec::with_capacity(records.len() + extra.len());
        for record in &records {
            ops.push(DbOp::put(tx_key(&record.txid()), serialize(record)?));
        }
        ops.extend(extra);
        self.db.apply_batch(ops)?;
        for record in records {
            state.index(record);
        }
        Ok(())
    }

    // A fresh record for `tx` plus the existing records it conflicts with,
    // already updated to point back at it
    fn new_record(
        &self,
        state: &StoreState,
        tx: Transaction,
        confirmation: ConfirmationStatus,
        in_mempool: bool,
    ) -> Result<(WalletTransaction, Vec<WalletTransaction>)> {
        let txid = tx.get_id();
        let mut conflicts = BTreeSet::new();
        if !tx.is_coinbase() {
            for input in tx.get_vin() {
                if let Some(spenders) = state.spends.get(input.prev_out()) {
                    conflicts.extend(spenders.iter().filter(|other| **other != txid));
                }
            }
        }
        let touched: Vec<WalletTransaction> = conflicts
            .iter()
            .filter_map(|other| state.txs.get(other))
            .map(|other| {
                let mut other = other.clone();
                other.conflicts.insert(txid);
                other
            })
            .collect();
        if !conflicts.is_empty() {
            info!("{txid} conflicts with {} wallet transactions", conflicts.len());
        }

        let confirmed = matches!(confirmation, ConfirmationStatus::Confirmed(_));
        let record = WalletTransaction {
            from_me: state.is_from_me(&tx, self.signer.as_ref()),
            tx,
            confirmation,
            conflicts,
            replaced_by: None,
            replaces: None,
            time_received: current_timestamp()?,
            in_mempool: in_mempool && !confirmed,
            abandoned: false,
            order_pos: state.next_order,
        };
        Ok((record, touched))
    }

    /// Add or update a transaction. Returns whether anything that affects the
    /// balance changed; re-inserting identical data is a no-op returning false.
    /// Confirmed transactions are never demoted here, see `disconnect_above`.
    pub fn insert(&self, tx: Transaction, confirmation: ConfirmationStatus) -> Result<bool> {
        self.insert_tx(tx, confirmation, false)
    }

    /// Insert a transaction the mempool just accepted
    pub fn insert_broadcast(&self, tx: Transaction) -> Result<bool> {
        self.insert_tx(tx, ConfirmationStatus::Unconfirmed, true)
    }

    fn insert_tx(
        &self,
        tx: Transaction,
        confirmation: ConfirmationStatus,
        in_mempool: bool,
    ) -> Result<bool> {
        let mut state = self.write_state()?;
        let txid = tx.get_id();

        if let Some(existing) = state.txs.get(&txid) {
            let mut updated = existing.clone();
            if let ConfirmationStatus::Confirmed(_) = confirmation {
                updated.confirmation = confirmation;
                updated.in_mempool = false;
                updated.abandoned = false;
            } else if in_mempool && !existing.is_confirmed() {
                updated.in_mempool = true;
                updated.abandoned = false;
            }
            if updated == *existing {
                return Ok(false);
            }
            let balance_changed = updated.confirmation != existing.confirmation
                || updated.abandoned != existing.abandoned;
            debug!("Updated wallet transaction {txid}");
            self.commit(&mut state, vec![updated], vec![])?;
            return Ok(balance_changed);
        }

        let (record, mut touched) = self.new_record(&state, tx, confirmation, in_mempool)?;
        touched.push(record);
        self.commit(&mut state, touched, vec![])?;
        debug!("Added wallet transaction {txid}");
        Ok(true)
    }

    /// Record that `a` and `b` conflict, on both sides. Unknown ids are ignored.
    pub fn mark_conflicted(&self, a: &TxId, b: &TxId) -> Result<()> {
        if a == b {
            return Ok(());
        }
        let mut state = self.write_state()?;
        let (Some(first), Some(second)) = (state.txs.get(a), state.txs.get(b)) else {
            warn!("Cannot mark {a} and {b} as conflicting: transaction not in wallet");
            return Ok(());
        };
        if first.conflicts.contains(b) && second.conflicts.contains(a) {
            return Ok(());
        }
        let mut first = first.clone();
        let mut second = second.clone();
        first.conflicts.insert(*b);
        second.conflicts.insert(*a);
        self.commit(&mut state, vec![first, second], vec![])
    }

    /// Atomically store the replacement created by a fee bump and link it
    /// with the transaction it replaces
    pub fn record_replacement(
        &self,
        original: &TxId,
        replacement: Transaction,
    ) -> Result<WalletTransaction> {
        let mut state = self.write_state()?;
        let old = state
            .txs
            .get(original)
            .ok_or_else(|| WalletError::UnknownTransaction(original.to_hex()))?;
        if let Some(replaced_by) = old.replaced_by {
            return Err(WalletError::Bump(BumpError::AlreadyBumped {
                txid: original.to_hex(),
                replaced_by: replaced_by.to_hex(),
            }));
        }
        let new_txid = replacement.get_id();
        let old = old.clone();
        if let Some(existing) = state.txs.get(&new_txid) {
            // Bumping again after abandoning a bump can rebuild the same transaction
            if !(existing.abandoned && existing.replaces == Some(*original)) {
                return Err(WalletError::Transaction(format!(
                    "Replacement {new_txid} is already in the wallet"
                )));
            }
            let mut revived = existing.clone();
            revived.abandoned = false;
            let mut previous = old;
            previous.replaced_by = Some(new_txid);
            self.commit(&mut state, vec![previous, revived.clone()], vec![])?;
            info!("Restored {new_txid} as replacement for {original}");
            return Ok(revived);
        }

        let (mut record, mut touched) =
            self.new_record(&state, replacement, ConfirmationStatus::Unconfirmed, false)?;
        record.replaces = Some(*original);
        record.conflicts.insert(*original);
        match touched.iter_mut().find(|r| r.txid() == *original) {
            Some(previous) => previous.replaced_by = Some(new_txid),
            None => {
                let mut previous = old;
                previous.conflicts.insert(new_txid);
                previous.replaced_by = Some(new_txid);
                touched.push(previous);
            }
        }
        touched.push(record.clone());
        self.commit(&mut state, touched, vec![])?;
        info!("Recorded {new_txid} as replacement for {original}");
        Ok(record)
    }

    /// Return transactions confirmed above `height` to unconfirmed
    pub fn disconnect_above(&self, height: u32) -> Result<Vec<TxId>> {
        let mut state = self.write_state()?;
        let records: Vec<WalletTransaction> = state
            .txs
            .values()
            .filter(|record| record.confirmation.height().is_some_and(|h| h > height))
            .map(|record| {
                let mut record = record.clone();
                record.confirmation = ConfirmationStatus::Unconfirmed;
                record.in_mempool = false;
                record
            })
            .collect();
        let txids: Vec<TxId> = records.iter().map(WalletTransaction::txid).collect();
        self.commit(&mut state, records, vec![])?;
        if !txids.is_empty() {
            info!(
                "Disconnected {} wallet transactions above height {height}",
                txids.len()
            );
        }
        Ok(txids)
    }

    /// Give up on an unconfirmed transaction that is not in the mempool,
    /// together with its unconfirmed wallet descendants
    pub fn abandon(&self, txid: &TxId) -> Result<Vec<TxId>> {
        let mut state = self.write_state()?;
        let record = state
            .txs
            .get(txid)
            .ok_or_else(|| WalletError::UnknownTransaction(txid.to_hex()))?;
        if record.is_confirmed() || record.in_mempool {
            return Err(WalletError::Transaction(format!(
                "Transaction {txid} not eligible for abandonment"
            )));
        }

        let mut abandoned = Vec::new();
        let mut stack = vec![*txid];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let Some(record) = state.txs.get(&current) else {
                continue;
            };
            if record.is_confirmed() {
                continue;
            }
            for vout in 0..record.tx.get_vout().len() as u32 {
                if let Some(spenders) = state.spends.get(&OutPoint::new(current, vout)) {
                    stack.extend(spenders.iter().copied());
                }
            }
            if !record.abandoned {
                let mut record = record.clone();
                record.abandoned = true;
                abandoned.push(record);
            }
        }
        let txids: Vec<TxId> = abandoned.iter().map(WalletTransaction::txid).collect();

        // An abandoned fee bump no longer replaces anything; its original
        // spends the coins again and may be bumped anew
        let unlinked: Vec<WalletTransaction> = abandoned
            .iter()
            .filter_map(|record| record.replaces)
            .filter(|original| !seen.contains(original))
            .filter_map(|original| state.txs.get(&original))
            .filter(|original| {
                original
                    .replaced_by
                    .is_some_and(|replacement| seen.contains(&replacement))
            })
            .map(|original| {
                let mut original = original.clone();
                original.replaced_by = None;
                original
            })
            .collect();
        for original in &unlinked {
            info!("{} is no longer replaced", original.txid());
        }
        abandoned.extend(unlinked);

        self.commit(&mut state, abandoned, vec![])?;
        info!("Abandoned {} wallet transactions", txids.len());
        Ok(txids)
    }

    /// Push buffered writes to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()
    }

    pub fn best_block(&self) -> Option<BlockRef> {
        self.read_state().ok().and_then(|state| state.best_block.clone())
    }

    /// Move the scan checkpoint; `persist` writes it to the database
    pub fn set_best_block(&self, block: BlockRef, persist: bool) -> Result<()> {
        let mut state = self.write_state()?;
        if persist {
            self.db
                .put(BEST_BLOCK_KEY.as_bytes(), serialize(&block)?)?;
        }
        state.best_block = Some(block);
        Ok(())
    }

    /// Move the checkpoint to `block` unless it already sits higher.
    /// Returns whether it moved.
    pub fn advance_best_block(&self, block: BlockRef, persist: bool) -> Result<bool> {
        let mut state = self.write_state()?;
        if state.best_block.as_ref().is_some_and(|best| best.height > block.height) {
            return Ok(false);
        }
        if persist {
            self.db
                .put(BEST_BLOCK_KEY.as_bytes(), serialize(&block)?)?;
        }
        state.best_block = Some(block);
        Ok(true)
    }

    pub fn get(&self, txid: &TxId) -> Option<WalletTransaction> {
        self.read_state().ok()?.txs.get(txid).cloned()
    }

    pub fn contains(&self, txid: &TxId) -> bool {
        self.read_state()
            .map(|state| state.txs.contains_key(txid))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.read_state().map(|state| state.txs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every known transaction in the order the wallet learned about them
    pub fn list_transactions(&self) -> Result<Vec<WalletTransaction>> {
        let state = self.read_state()?;
        let mut records: Vec<WalletTransaction> = state.txs.values().cloned().collect();
        records.sort_by_key(|record| record.order_pos);
        Ok(records)
    }

    pub fn conflicts_of(&self, txid: &TxId) -> BTreeSet<TxId> {
        self.read_state()
            .ok()
            .and_then(|state| state.txs.get(txid).map(|r| r.conflicts.clone()))
            .unwrap_or_default()
    }

    /// Pays to us or spends one of our outputs
    pub fn is_relevant(&self, tx: &Transaction) -> bool {
        let Ok(state) = self.read_state() else {
            return false;
        };
        let signer = self.signer.as_ref();
        tx.get_vout()
            .iter()
            .any(|out| signer.is_mine(out.get_pub_key_hash()))
            || state.debit(tx, signer) > 0
    }

    /// True when an active wallet transaction spends an output of `txid`
    pub fn has_wallet_spend(&self, txid: &TxId) -> bool {
        let Ok(state) = self.read_state() else {
            return false;
        };
        let Some(record) = state.txs.get(txid) else {
            return false;
        };
        (0..record.tx.get_vout().len() as u32)
            .any(|vout| state.is_spent(&OutPoint::new(*txid, vout)))
    }

    /// True when a confirmed wallet transaction double-spends `txid`
    pub fn has_confirmed_conflict(&self, txid: &TxId) -> bool {
        let Ok(state) = self.read_state() else {
            return false;
        };
        state
            .txs
            .get(txid)
            .map(|record| {
                record.conflicts.iter().any(|other| {
                    state
                        .txs
                        .get(other)
                        .map(WalletTransaction::is_confirmed)
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    }

    /// Outputs spent by each input of `tx`, in input order
    pub fn prev_outputs(&self, tx: &Transaction) -> Result<Vec<TXOutput>> {
        let state = self.read_state()?;
        tx.get_vin()
            .iter()
            .map(|input| {
                state
                    .prev_output(input.prev_out())
                    .cloned()
                    .ok_or_else(|| WalletError::UnknownTransaction(input.prev_out().to_string()))
            })
            .collect()
    }

    /// Fee paid, when every input is known to the wallet
    pub fn fee_of(&self, tx: &Transaction) -> Option<u64> {
        if tx.is_coinbase() {
            return None;
        }
        let state = self.read_state().ok()?;
        let mut input_value = 0u64;
        for input in tx.get_vin() {
            input_value += state.prev_output(input.prev_out())?.get_value();
        }
        input_value.checked_sub(tx.output_value().ok()?)
    }

    /// Credit minus debit for the wallet
    pub fn net_amount(&self, tx: &Transaction) -> i64 {
        let Ok(state) = self.read_state() else {
            return 0;
        };
        let signer = self.signer.as_ref();
        credit(tx, signer) as i64 - state.debit(tx, signer) as i64
    }

    pub fn depth(&self, record: &WalletTransaction) -> u32 {
        self.read_state()
            .map(|state| record.depth(state.tip_height()))
            .unwrap_or(0)
    }

    pub fn get_balance(&self) -> Result<Balance> {
        let state = self.read_state()?;
        let signer = self.signer.as_ref();
        let mut balance = Balance::default();
        for record in state.txs.values() {
            if !state.is_active(record) {
                continue;
            }
            let immature = state.blocks_to_maturity(record, self.coinbase_maturity) > 0;
            let trusted = record.is_confirmed() || record.from_me;
            for (vout, output) in record.tx.get_vout().iter().enumerate() {
                if !signer.is_mine(output.get_pub_key_hash())
                    || state.is_spent(&OutPoint::new(record.txid(), vout as u32))
                {
                    continue;
                }
                if immature {
                    balance.immature += output.get_value();
                } else if trusted {
                    balance.trusted += output.get_value();
                } else {
                    balance.untrusted_pending += output.get_value();
                }
            }
        }
        Ok(balance)
    }

    /// Mature, unspent wallet outputs that coin selection may use
    pub fn available_coins(&self) -> Result<Vec<WalletCoin>> {
        let state = self.read_state()?;
        let signer = self.signer.as_ref();
        let tip_height = state.tip_height();
        let mut coins = Vec::new();
        for record in state.txs.values() {
            if !state.is_active(record)
                || state.blocks_to_maturity(record, self.coinbase_maturity) > 0
            {
                continue;
            }
            if !record.is_confirmed() && !(record.from_me && self.spend_zero_conf_change) {
                continue;
            }
            for (vout, output) in record.tx.get_vout().iter().enumerate() {
                let outpoint = OutPoint::new(record.txid(), vout as u32);
                if signer.is_mine(output.get_pub_key_hash()) && !state.is_spent(&outpoint) {
                    coins.push(WalletCoin {
                        outpoint,
                        output: output.clone(),
                        depth: record.depth(tip_height),
                        from_me: record.from_me,
                    });
                }
            }
        }
        coins.sort_by_key(|coin| coin.outpoint);
        Ok(coins)
    }

    /// height -> block hash for every block holding a confirmed wallet transaction
    pub fn confirmed_block_hashes(&self) -> BTreeMap<u32, String> {
        let Ok(state) = self.read_state() else {
            return BTreeMap::new();
        };
        state
            .txs
            .values()
            .filter_map(|record| record.confirmation.block())
            .map(|block| (block.height, block.hash.clone()))
            .collect()
    }

    pub fn add_receive_request(&self, recipient: RecipientRequest) -> Result<ReceiveRequestEntry> {
        let mut state = self.write_state()?;
        let id = state.next_request_id;
        let entry = ReceiveRequestEntry::new(id, current_timestamp()?, recipient);
        let bytes = entry.encode()?;
        self.db.apply_batch(vec![
            DbOp::put(request_key(id), bytes.clone()),
            DbOp::put(NEXT_REQUEST_ID_KEY, serialize(&(id + 1))?),
        ])?;
        state.requests.insert(id, bytes);
        state.next_request_id = id + 1;
        info!("Stored receive request {id} for {}", entry.recipient.address);
        Ok(entry)
    }

    /// Returns false when no request has this id
    pub fn remove_receive_request(&self, id: i64) -> Result<bool> {
        let mut state = self.write_state()?;
        if !state.requests.contains_key(&id) {
            return Ok(false);
        }
        self.db.delete(&request_key(id))?;
        state.requests.remove(&id);
        info!("Removed receive request {id}");
        Ok(true)
    }

    /// Persisted receive request records, oldest first
    pub fn get_receive_requests(&self) -> Vec<Vec<u8>> {
        self.read_state()
            .map(|state| state.requests.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn receive_requests(&self) -> Result<Vec<ReceiveRequestEntry>> {
        self.get_receive_requests()
            .iter()
            .map(|bytes| ReceiveRequestEntry::decode(bytes))
            .collect()
    }
}
