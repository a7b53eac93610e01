// Scan engine
//
// Walks the chain view block by block and feeds wallet-relevant transactions
// into the store. Only one scan runs per wallet at a time (see `ScanReserver`),
// cancellation is cooperative and checked between blocks, and the last
// scanned block is checkpointed so an interrupted scan resumes where it
// stopped instead of starting again from genesis.

use crate::chain::ChainView;
use crate::core::{Block, BlockRef};
use crate::error::{Result, WalletError};
use crate::wallet::notify::{ChangeType, Notifier, WalletEvent};
use crate::wallet::store::{ConfirmationStatus, WalletTxStore};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanStatus {
    Success,
    /// Reorganisation or I/O error; see `last_failed_block`
    Failure,
    UserAbort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub status: ScanStatus,
    /// Highest block fully processed
    pub last_scanned_block: Option<BlockRef>,
    pub last_failed_block: Option<BlockRef>,
}

impl ScanResult {
    fn new() -> ScanResult {
        ScanResult {
            status: ScanStatus::Success,
            last_scanned_block: None,
            last_failed_block: None,
        }
    }

    fn fail(&mut self, at: Option<BlockRef>) {
        self.status = ScanStatus::Failure;
        self.last_failed_block = at;
    }

    /// `Failure` becomes an error; success and user abort return the last scanned block
    pub fn into_result(self) -> Result<Option<BlockRef>> {
        match self.status {
            ScanStatus::Success | ScanStatus::UserAbort => Ok(self.last_scanned_block),
            ScanStatus::Failure => match self.last_failed_block {
                Some(failed) => Err(WalletError::ReorgDetected {
                    last_scanned: self.last_scanned_block.map(|b| b.to_string()),
                    fork_point: failed.to_string(),
                }),
                None => Err(WalletError::Chain("Rescan failed".to_string())),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Persist the checkpoint after every block
    pub save_progress: bool,
    /// Refresh transactions the wallet already knows
    pub update: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            save_progress: true,
            update: true,
        }
    }
}

/// Exclusive right to scan. Released on drop.
#[derive(Debug)]
pub struct ScanReserver {
    scanning: Arc<AtomicBool>,
}

impl ScanReserver {
    fn reserve(scanning: &Arc<AtomicBool>) -> Result<ScanReserver> {
        scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| WalletError::ReservationConflict)?;
        Ok(ScanReserver {
            scanning: Arc::clone(scanning),
        })
    }

    fn holds(&self, scanning: &Arc<AtomicBool>) -> bool {
        Arc::ptr_eq(&self.scanning, scanning)
    }
}

impl Drop for ScanReserver {
    fn drop(&mut self) {
        self.scanning.store(false, Ordering::SeqCst);
    }
}

pub struct ScanEngine {
    chain: Arc<dyn ChainView>,
    store: Arc<WalletTxStore>,
    notifier: Arc<Notifier>,
    scanning: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
}

impl ScanEngine {
    pub fn new(
        chain: Arc<dyn ChainView>,
        store: Arc<WalletTxStore>,
        notifier: Arc<Notifier>,
    ) -> ScanEngine {
        ScanEngine {
            chain,
            store,
            notifier,
            scanning: Arc::new(AtomicBool::new(false)),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Fails with `ReservationConflict` while another scan holds the reservation.
    /// An abort requested after this returns applies to the next `scan`.
    pub fn reserve(&self) -> Result<ScanReserver> {
        let reserver = ScanReserver::reserve(&self.scanning)?;
        self.abort.store(false, Ordering::SeqCst);
        Ok(reserver)
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Ask the running scan to stop at the next block boundary
    pub fn abort_scan(&self) {
        if self.is_scanning() {
            self.abort.store(true, Ordering::SeqCst);
        }
    }

    /// Flag another thread can raise to cancel the scan in progress
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Scan from `start` up to `max_height` (the tip when `None`).
    /// `start` must still be on the active chain.
    pub fn scan(
        &self,
        start: &BlockRef,
        max_height: Option<u32>,
        reserver: &ScanReserver,
        options: ScanOptions,
    ) -> Result<ScanResult> {
        if !reserver.holds(&self.scanning) {
            return Err(WalletError::ReservationConflict);
        }
        info!("Rescan started from block {start}");

        let mut result = ScanResult::new();
        let mut balance_changed = false;
        let mut prev_hash: Option<String> = None;
        let mut height = start.height;
        let mut reached_tip = false;

        loop {
            if max_height.is_some_and(|max| height > max) {
                break;
            }
            if self.abort.swap(false, Ordering::SeqCst) {
                result.status = ScanStatus::UserAbort;
                info!("Rescan aborted at height {height}");
                break;
            }

            let block = match self.chain.get_block_at_height(height) {
                Ok(Some(block)) => block,
                Ok(None) if prev_hash.is_some() => {
                    reached_tip = true;
                    break;
                }
                Ok(None) => {
                    warn!("Rescan start block {start} is not on the active chain");
                    result.fail(Some(start.clone()));
                    break;
                }
                Err(e) => {
                    error!("Rescan could not read block at height {height}: {e}");
                    result.fail(None);
                    break;
                }
            };

            let linked = match &prev_hash {
                None => block.get_hash() == start.hash,
                Some(prev) => block.get_pre_block_hash() == prev,
            };
            if !linked {
                warn!(
                    "Chain reorganised during rescan at {}, last scanned {:?}",
                    block.block_ref(),
                    result.last_scanned_block
                );
                result.fail(Some(block.block_ref()));
                break;
            }

            match self.sync_block(&block, &options) {
                Ok(changed) => balance_changed |= changed,
                Err(e) => {
                    error!("Failed to ingest block {}: {e}", block.block_ref());
                    result.fail(Some(block.block_ref()));
                    break;
                }
            }
            if let Err(e) = self.advance_checkpoint(&block, options.save_progress) {
                error!("Failed to write checkpoint at {}: {e}", block.block_ref());
                result.fail(Some(block.block_ref()));
                break;
            }
            debug!("Scanned block {}", block.block_ref());

            result.last_scanned_block = Some(block.block_ref());
            prev_hash = Some(block.get_hash().to_string());
            height += 1;
        }

        // A complete scan to the tip defines the wallet's view of the chain
        if reached_tip && result.status == ScanStatus::Success {
            if let Some(last) = &result.last_scanned_block {
                self.store.set_best_block(last.clone(), options.save_progress)?;
            }
        }
        self.abort.store(false, Ordering::SeqCst);

        if balance_changed {
            self.notifier.notify(WalletEvent::BalanceChanged);
        }
        self.notifier
            .notify(WalletEvent::ScanFinished(result.clone()));
        info!(
            "Rescan finished with {:?}, last scanned block {:?}",
            result.status, result.last_scanned_block
        );
        Ok(result)
    }

    /// Continue from the stored checkpoint, or from genesis for a new wallet.
    /// A checkpoint that fell off the active chain is rolled back to the fork first.
    pub fn rescan_from_checkpoint(&self, options: ScanOptions) -> Result<ScanResult> {
        let reserver = self.reserve()?;
        let best = self.store.best_block();
        let mut start_height = best.as_ref().map(|b| b.height + 1).unwrap_or(0);

        if let Some(best) = &best {
            if !self.is_on_chain(best)? {
                let fork = self.find_fork(best, best.height + 1)?;
                self.disconnect_to(fork)?;
                start_height = fork + 1;
            }
        }

        let Some(start) = self.chain.get_block_at_height(start_height)? else {
            debug!("Wallet is up to date at {best:?}");
            return Ok(ScanResult {
                status: ScanStatus::Success,
                last_scanned_block: best,
                last_failed_block: None,
            });
        };
        self.scan(&start.block_ref(), None, &reserver, options)
    }

    /// Ingest a newly connected tip. A block that does not extend the
    /// checkpoint is treated as a reorganisation: wallet transactions on
    /// the stale branch go back to unconfirmed and the new branch is read.
    pub fn block_connected(&self, block: &Block) -> Result<()> {
        let height = block.get_height();
        let Some(best) = self.store.best_block() else {
            return self.ingest(block);
        };
        if best.hash == block.get_hash() {
            return Ok(());
        }
        if best.height + 1 == height && best.hash == block.get_pre_block_hash() {
            return self.ingest(block);
        }

        let fork = self.find_fork(&best, height)?;
        if fork < best.height {
            warn!("Chain reorganised: new block {} forks at height {fork}", block.block_ref());
            self.disconnect_to(fork)?;
        }
        for missing in fork + 1..height {
            match self.chain.get_block_at_height(missing)? {
                Some(between) => self.ingest(&between)?,
                None => break,
            }
        }
        self.ingest(block)
    }

    fn ingest(&self, block: &Block) -> Result<()> {
        let changed = self.sync_block(block, &ScanOptions::default())?;
        self.store.set_best_block(block.block_ref(), true)?;
        if changed {
            self.notifier.notify(WalletEvent::BalanceChanged);
        }
        Ok(())
    }

    fn sync_block(&self, block: &Block, options: &ScanOptions) -> Result<bool> {
        let confirmation = ConfirmationStatus::Confirmed(block.block_ref());
        let mut changed = false;
        for tx in block.get_transactions() {
            let txid = tx.get_id();
            let known = self.store.contains(&txid);
            if (known && !options.update) || (!known && !self.store.is_relevant(tx)) {
                continue;
            }
            if self.store.insert(tx.clone(), confirmation.clone())? {
                changed = true;
                let status = if known {
                    ChangeType::Updated
                } else {
                    ChangeType::New
                };
                self.notifier.transaction_changed(txid, status);
            }
        }
        Ok(changed)
    }

    // Never moves the checkpoint backwards while rescanning old history
    fn advance_checkpoint(&self, block: &Block, persist: bool) -> Result<()> {
        self.store.advance_best_block(block.block_ref(), persist)?;
        Ok(())
    }

    fn is_on_chain(&self, block: &BlockRef) -> Result<bool> {
        Ok(self
            .chain
            .get_block_at_height(block.height)?
            .is_some_and(|b| b.get_hash() == block.hash))
    }

    // Highest height below `new_height` where the wallet's view and the
    // active chain agree
    fn find_fork(&self, best: &BlockRef, new_height: u32) -> Result<u32> {
        let top = best.height.min(new_height.saturating_sub(1));
        if best.height <= top && self.is_on_chain(best)? {
            return Ok(best.height);
        }
        let recorded = self.store.confirmed_block_hashes();
        for (height, hash) in recorded.range(..=top).rev() {
            if self.is_on_chain(&BlockRef::new(hash.clone(), *height))? {
                return Ok(*height);
            }
        }
        Ok(0)
    }

    fn disconnect_to(&self, fork: u32) -> Result<()> {
        let disconnected = self.store.disconnect_above(fork)?;
        if let Some(block) = self.chain.get_block_at_height(fork)? {
            self.store.set_best_block(block.block_ref(), true)?;
        }
        for txid in &disconnected {
            self.notifier.transaction_changed(*txid, ChangeType::Updated);
        }
        if !disconnected.is_empty() {
            self.notifier.notify(WalletEvent::BalanceChanged);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{BlockCallback, LocalChain, MempoolRejection, RelayPolicy};
    use crate::config::WalletConfig;
    use crate::core::Transaction;
    use crate::signer::{pub_key_hash_from_address, LocalSigner};
    use crate::storage::MemoryDatabase;

    struct Fixture {
        chain: Arc<LocalChain>,
        store: Arc<WalletTxStore>,
        notifier: Arc<Notifier>,
        pkh: Vec<u8>,
    }

    fn fixture(blocks: u32) -> Fixture {
        let signer = Arc::new(LocalSigner::new());
        let pkh = pub_key_hash_from_address(&signer.generate_key().unwrap()).unwrap();
        let chain = Arc::new(LocalChain::new(RelayPolicy::default()).unwrap());
        chain.mine_blocks(blocks, &pkh).unwrap();
        let store = Arc::new(
            WalletTxStore::load(
                Arc::new(MemoryDatabase::new()),
                signer,
                &WalletConfig::default(),
            )
            .unwrap(),
        );
        Fixture {
            chain,
            store,
            notifier: Arc::new(Notifier::new()),
            pkh,
        }
    }

    fn engine(f: &Fixture, chain: Arc<dyn ChainView>) -> ScanEngine {
        ScanEngine::new(chain, f.store.clone(), f.notifier.clone())
    }

    fn genesis(chain: &dyn ChainView) -> BlockRef {
        chain.get_block_at_height(0).unwrap().unwrap().block_ref()
    }

    // Serves `first` below `switch_at` and `second` from there on,
    // optionally raising a flag when a given height is read
    struct SwitchingChain {
        first: Arc<LocalChain>,
        second: Arc<LocalChain>,
        switch_at: u32,
        trip: Option<(u32, Arc<AtomicBool>)>,
    }

    impl ChainView for SwitchingChain {
        fn get_block_at_height(&self, height: u32) -> Result<Option<Block>> {
            if let Some((at, flag)) = &self.trip {
                if *at == height {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            if height < self.switch_at {
                self.first.get_block_at_height(height)
            } else {
                self.second.get_block_at_height(height)
            }
        }

        fn get_tip(&self) -> Result<Option<BlockRef>> {
            self.second.get_tip()
        }

        fn subscribe(&self, _on_block: BlockCallback) {}

        fn accept_to_memory_pool(
            &self,
            tx: &Transaction,
        ) -> std::result::Result<(), MempoolRejection> {
            self.second.accept_to_memory_pool(tx)
        }
    }

    #[test]
    fn test_full_scan_ingests_relevant_transactions() {
        let f = fixture(5);
        let events = f.notifier.subscribe();
        let scanner = engine(&f, f.chain.clone());
        let reserver = scanner.reserve().unwrap();

        let result = scanner
            .scan(&genesis(f.chain.as_ref()), None, &reserver, ScanOptions::default())
            .unwrap();
        assert_eq!(result.status, ScanStatus::Success);
        assert_eq!(result.last_scanned_block, f.chain.get_tip().unwrap());
        assert_eq!(result.last_failed_block, None);
        // Genesis pays to nobody, the five mined coinbases pay to us
        assert_eq!(f.store.len(), 5);
        assert_eq!(f.store.best_block(), f.chain.get_tip().unwrap());
        assert!(events
            .try_iter()
            .any(|event| event == WalletEvent::ScanFinished(result.clone())));
    }

    #[test]
    fn test_rescan_is_idempotent() {
        let f = fixture(3);
        let scanner = engine(&f, f.chain.clone());
        let start = genesis(f.chain.as_ref());
        {
            let reserver = scanner.reserve().unwrap();
            scanner.scan(&start, None, &reserver, ScanOptions::default()).unwrap();
        }
        let before = f.store.list_transactions().unwrap();
        let reserver = scanner.reserve().unwrap();
        scanner.scan(&start, None, &reserver, ScanOptions::default()).unwrap();
        assert_eq!(f.store.list_transactions().unwrap(), before);
    }

    #[test]
    fn test_only_one_reservation_at_a_time() {
        let f = fixture(1);
        let scanner = engine(&f, f.chain.clone());
        let reserver = scanner.reserve().unwrap();
        assert!(scanner.is_scanning());
        assert_eq!(scanner.reserve().unwrap_err(), WalletError::ReservationConflict);
        drop(reserver);
        assert!(!scanner.is_scanning());
        assert!(scanner.reserve().is_ok());
    }

    #[test]
    fn test_foreign_reservation_rejected() {
        let f = fixture(1);
        let scanner = engine(&f, f.chain.clone());
        let other = engine(&f, f.chain.clone());
        let reserver = other.reserve().unwrap();
        assert_eq!(
            scanner
                .scan(&genesis(f.chain.as_ref()), None, &reserver, ScanOptions::default())
                .unwrap_err(),
            WalletError::ReservationConflict
        );
    }

    #[test]
    fn test_max_height_bounds_scan() {
        let f = fixture(5);
        let scanner = engine(&f, f.chain.clone());
        let reserver = scanner.reserve().unwrap();
        let result = scanner
            .scan(&genesis(f.chain.as_ref()), Some(2), &reserver, ScanOptions::default())
            .unwrap();
        assert_eq!(result.status, ScanStatus::Success);
        assert_eq!(result.last_scanned_block.unwrap().height, 2);
        assert_eq!(f.store.len(), 2);
    }

    #[test]
    fn test_unknown_start_block_fails() {
        let f = fixture(2);
        let scanner = engine(&f, f.chain.clone());
        let reserver = scanner.reserve().unwrap();
        let bogus = BlockRef::new("ab".repeat(32), 1);
        let result = scanner
            .scan(&bogus, None, &reserver, ScanOptions::default())
            .unwrap();
        assert_eq!(result.status, ScanStatus::Failure);
        assert_eq!(result.last_scanned_block, None);
        assert_eq!(
            result.last_failed_block,
            Some(f.chain.get_block_at_height(1).unwrap().unwrap().block_ref())
        );
        assert!(f.store.is_empty());
    }

    #[test]
    fn test_reorg_during_scan_reports_failure() {
        let f = fixture(5);
        let other = Arc::new(LocalChain::new(RelayPolicy::default()).unwrap());
        other.mine_blocks(5, &f.pkh).unwrap();
        let switching = Arc::new(SwitchingChain {
            first: f.chain.clone(),
            second: other.clone(),
            switch_at: 3,
            trip: None,
        });
        let scanner = engine(&f, switching);
        let reserver = scanner.reserve().unwrap();

        let result = scanner
            .scan(&genesis(f.chain.as_ref()), None, &reserver, ScanOptions::default())
            .unwrap();
        assert_eq!(result.status, ScanStatus::Failure);
        assert_eq!(
            result.last_scanned_block,
            Some(f.chain.get_block_at_height(2).unwrap().unwrap().block_ref())
        );
        assert_eq!(
            result.last_failed_block,
            Some(other.get_block_at_height(3).unwrap().unwrap().block_ref())
        );
        assert!(matches!(
            result.into_result(),
            Err(WalletError::ReorgDetected { .. })
        ));
    }

    #[test]
    fn test_abort_stops_between_blocks() {
        let f = fixture(5);
        let abort = Arc::new(AtomicBool::new(false));
        let switching = Arc::new(SwitchingChain {
            first: f.chain.clone(),
            second: f.chain.clone(),
            switch_at: 0,
            trip: Some((2, abort.clone())),
        });
        let scanner = ScanEngine {
            abort: abort.clone(),
            ..engine(&f, switching)
        };
        let reserver = scanner.reserve().unwrap();

        let result = scanner
            .scan(&genesis(f.chain.as_ref()), None, &reserver, ScanOptions::default())
            .unwrap();
        assert_eq!(result.status, ScanStatus::UserAbort);
        assert_eq!(result.last_scanned_block.unwrap().height, 2);
        assert!(!abort.load(Ordering::SeqCst));
        assert_eq!(f.store.len(), 2);
    }

    #[test]
    fn test_abort_between_reserve_and_scan() {
        let f = fixture(3);
        let scanner = engine(&f, f.chain.clone());
        let start = genesis(f.chain.as_ref());

        let reserver = scanner.reserve().unwrap();
        scanner.abort_scan();
        let result = scanner
            .scan(&start, None, &reserver, ScanOptions::default())
            .unwrap();
        assert_eq!(result.status, ScanStatus::UserAbort);
        assert_eq!(result.last_scanned_block, None);
        assert!(f.store.is_empty());
        drop(reserver);

        // A fresh reservation starts without a pending abort
        let reserver = scanner.reserve().unwrap();
        let result = scanner
            .scan(&start, None, &reserver, ScanOptions::default())
            .unwrap();
        assert_eq!(result.status, ScanStatus::Success);
        assert_eq!(f.store.len(), 3);
    }

    #[test]
    fn test_tip_ingest_keeps_checkpoint_ahead_of_old_blocks() {
        let f = fixture(4);
        let scanner = engine(&f, f.chain.clone());
        let tip = f.chain.get_block_at_height(4).unwrap().unwrap();
        scanner.block_connected(&tip).unwrap();
        assert_eq!(f.store.best_block().unwrap().height, 4);

        // A scan over older history must not pull the checkpoint back
        let reserver = scanner.reserve().unwrap();
        scanner
            .scan(&genesis(f.chain.as_ref()), Some(2), &reserver, ScanOptions::default())
            .unwrap();
        assert_eq!(f.store.best_block().unwrap().height, 4);
    }

    #[test]
    fn test_checkpoint_resume() {
        let f = fixture(3);
        let scanner = engine(&f, f.chain.clone());
        scanner.rescan_from_checkpoint(ScanOptions::default()).unwrap();
        assert_eq!(f.store.len(), 3);

        f.chain.mine_blocks(2, &f.pkh).unwrap();
        let result = scanner.rescan_from_checkpoint(ScanOptions::default()).unwrap();
        assert_eq!(result.last_scanned_block.unwrap().height, 5);
        assert_eq!(f.store.len(), 5);

        // Nothing new: reports the checkpoint
        let result = scanner.rescan_from_checkpoint(ScanOptions::default()).unwrap();
        assert_eq!(result.status, ScanStatus::Success);
        assert_eq!(result.last_scanned_block, f.chain.get_tip().unwrap());
    }

    #[test]
    fn test_block_connected_follows_reorg() {
        let f = fixture(3);
        let scanner = Arc::new(engine(&f, f.chain.clone()));
        scanner.rescan_from_checkpoint(ScanOptions::default()).unwrap();

        let weak = Arc::downgrade(&scanner);
        f.chain.subscribe(Box::new(move |block: &Block| {
            if let Some(scanner) = weak.upgrade() {
                scanner.block_connected(block).unwrap();
            }
        }));

        f.chain.mine_block(&f.pkh).unwrap();
        assert_eq!(f.store.len(), 4);
        let stale = f.chain.get_block_at_height(4).unwrap().unwrap();
        let stale_coinbase = stale.get_transactions()[0].get_id();

        f.chain.reorganize(2, 3, &f.pkh).unwrap();
        assert_eq!(f.store.best_block(), f.chain.get_tip().unwrap());
        // Coinbases from the stale blocks 3 and 4 are no longer confirmed
        assert!(!f.store.get(&stale_coinbase).unwrap().is_confirmed());
        assert_eq!(f.store.len(), 7);
        let confirmed = f
            .store
            .list_transactions()
            .unwrap()
            .into_iter()
            .filter(|record| record.is_confirmed())
            .count();
        assert_eq!(confirmed, 5);
    }
}
