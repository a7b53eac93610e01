// Broadcast coordination
//
// Submission runs on a worker thread so a stalled chain service cannot hang
// the caller past the configured timeout. Rejected transactions never reach
// the wallet. A timed out one is recorded as unconfirmed so its inputs stay
// spent, and the worker marks it in the mempool if the chain accepts it late.

use crate::chain::{ChainView, MempoolRejection, RejectKind};
use crate::core::{Transaction, TxId};
use crate::error::SubmitError;
use crate::wallet::notify::{ChangeType, Notifier, WalletEvent};
use crate::wallet::store::{ConfirmationStatus, WalletTxStore};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub struct BroadcastCoordinator {
    chain: Arc<dyn ChainView>,
    store: Arc<WalletTxStore>,
    notifier: Arc<Notifier>,
    enabled: AtomicBool,
    timeout: Duration,
}

impl BroadcastCoordinator {
    pub fn new(
        chain: Arc<dyn ChainView>,
        store: Arc<WalletTxStore>,
        notifier: Arc<Notifier>,
        enabled: bool,
        timeout: Duration,
    ) -> BroadcastCoordinator {
        BroadcastCoordinator {
            chain,
            store,
            notifier,
            enabled: AtomicBool::new(enabled),
            timeout,
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Relay `tx` and commit it to the wallet. `confirmed` is the user's
    /// answer to the send confirmation; nothing happens without it.
    pub fn submit(&self, tx: Transaction, confirmed: bool) -> Result<TxId, SubmitError> {
        if !confirmed {
            return Err(SubmitError::NotConfirmed);
        }
        if !self.is_enabled() {
            return Err(SubmitError::BroadcastDisabled);
        }
        let txid = tx.get_id();

        match self.accept(&tx) {
            Ok(()) => {}
            Err(SubmitError::Timeout(timeout)) => {
                warn!("Transaction {txid} timed out after {timeout:?}; keeping it as unconfirmed");
                self.record_pending(tx)?;
                return Err(SubmitError::Timeout(timeout));
            }
            Err(err) => {
                warn!("Transaction {txid} was not relayed: {err}");
                return Err(err);
            }
        }

        let is_new = !self.store.contains(&txid);
        self.store
            .insert_broadcast(tx)
            .map_err(|e| SubmitError::WalletUpdate(e.to_string()))?;
        let status = if is_new {
            ChangeType::New
        } else {
            ChangeType::Updated
        };
        self.notifier.transaction_changed(txid, status);
        self.notifier.notify(WalletEvent::BalanceChanged);
        info!("Transaction {txid} accepted to the memory pool");
        Ok(txid)
    }

    // Relayed or not, the chain may still take it; its inputs must stay spent
    fn record_pending(&self, tx: Transaction) -> Result<(), SubmitError> {
        let txid = tx.get_id();
        let is_new = !self.store.contains(&txid);
        let changed = self
            .store
            .insert(tx, ConfirmationStatus::Unconfirmed)
            .map_err(|e| SubmitError::WalletUpdate(e.to_string()))?;
        if is_new {
            self.notifier.transaction_changed(txid, ChangeType::New);
        }
        if changed {
            self.notifier.notify(WalletEvent::BalanceChanged);
        }
        Ok(())
    }

    fn accept(&self, tx: &Transaction) -> Result<(), SubmitError> {
        let (sender, receiver) = mpsc::channel();
        // Set once the caller stopped waiting; the worker then commits the result itself
        let gave_up = Arc::new(Mutex::new(false));
        let chain = self.chain.clone();
        let store = self.store.clone();
        let notifier = self.notifier.clone();
        let worker_gave_up = gave_up.clone();
        let tx = tx.clone();
        thread::spawn(move || {
            let result = chain.accept_to_memory_pool(&tx);
            let Ok(gave_up) = worker_gave_up.lock() else {
                error!("Submission lock poisoned");
                return;
            };
            if !*gave_up {
                let _ = sender.send(result);
                return;
            }
            let txid = tx.get_id();
            match result {
                Ok(()) => match store.insert_broadcast(tx) {
                    Ok(_) => {
                        info!("Transaction {txid} accepted to the memory pool after the timeout");
                        notifier.transaction_changed(txid, ChangeType::Updated);
                    }
                    Err(e) => error!("Failed to record late acceptance of {txid}: {e}"),
                },
                Err(rejection) => warn!(
                    "Transaction {txid} rejected after the timeout: {}",
                    map_rejection(rejection)
                ),
            }
        });

        match receiver.recv_timeout(self.timeout) {
            Ok(result) => return result.map_err(map_rejection),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(SubmitError::ChainUnavailable(
                    "submission worker exited without a result".to_string(),
                ))
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        let mut gave_up = gave_up
            .lock()
            .map_err(|_| SubmitError::WalletUpdate("submission lock poisoned".to_string()))?;
        // The worker may have answered between the timeout and taking the lock
        if let Ok(result) = receiver.try_recv() {
            return result.map_err(map_rejection);
        }
        *gave_up = true;
        Err(SubmitError::Timeout(self.timeout))
    }
}

fn map_rejection(rejection: MempoolRejection) -> SubmitError {
    match rejection.kind {
        RejectKind::InsufficientFee => SubmitError::FeeTooLow(rejection.reason),
        RejectKind::Conflict => SubmitError::MempoolConflict(rejection.reason),
        RejectKind::MissingInputs => SubmitError::MissingInputs(rejection.reason),
        RejectKind::Invalid => SubmitError::PolicyViolation(rejection.reason),
        RejectKind::Unavailable => SubmitError::ChainUnavailable(rejection.reason),
    }
}
