//! The wallet
//!
//! `Wallet` ties the pieces together: the transaction store, the scan engine,
//! the fee bumper and the broadcast coordinator, all built from the
//! configuration, database, chain view and signing provider handed to
//! `Wallet::new`. It is the surface a GUI or the CLI talks to.

pub mod broadcast;
pub mod feebump;
pub mod notify;
pub mod requests;
pub mod scan;
pub mod spend;
pub mod store;

pub use broadcast::BroadcastCoordinator;
pub use feebump::{FeeBumper, FeeOptions};
pub use notify::{ChangeType, Notifier, WalletEvent};
pub use requests::{ReceiveRequestEntry, RecipientRequest, RECEIVE_REQUEST_VERSION};
pub use scan::{ScanEngine, ScanOptions, ScanReserver, ScanResult, ScanStatus};
pub use spend::{CoinControl, CreatedTransaction, Recipient};
pub use store::{
    Balance, ConfirmationStatus, TransactionRecord, WalletCoin, WalletTransaction, WalletTxStore,
};

use crate::chain::ChainView;
use crate::config::WalletConfig;
use crate::core::{BlockRef, Transaction, TxId};
use crate::error::{BumpError, Result, SubmitError};
use crate::signer::SigningProvider;
use crate::storage::WalletDatabase;
use log::{error, info};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Weak};

pub struct Wallet {
    config: WalletConfig,
    chain: Arc<dyn ChainView>,
    signer: Arc<dyn SigningProvider>,
    store: Arc<WalletTxStore>,
    scanner: Arc<ScanEngine>,
    bumper: FeeBumper,
    broadcaster: BroadcastCoordinator,
    notifier: Arc<Notifier>,
}

impl Wallet {
    pub fn new(
        config: WalletConfig,
        db: Arc<dyn WalletDatabase>,
        chain: Arc<dyn ChainView>,
        signer: Arc<dyn SigningProvider>,
    ) -> Result<Wallet> {
        config.validate()?;
        let store = Arc::new(WalletTxStore::load(db, signer.clone(), &config)?);
        let notifier = Arc::new(Notifier::new());
        let scanner = Arc::new(ScanEngine::new(
            chain.clone(),
            store.clone(),
            notifier.clone(),
        ));
        let bumper = FeeBumper::new(store.clone(), signer.clone(), config.clone());
        let broadcaster = BroadcastCoordinator::new(
            chain.clone(),
            store.clone(),
            notifier.clone(),
            config.broadcast_transactions,
            config.submit_timeout(),
        );
        Ok(Wallet {
            config,
            chain,
            signer,
            store,
            scanner,
            bumper,
            broadcaster,
            notifier,
        })
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn store(&self) -> &WalletTxStore {
        &self.store
    }

    pub fn subscribe(&self) -> Receiver<WalletEvent> {
        self.notifier.subscribe()
    }

    pub fn new_address(&self) -> Result<String> {
        self.signer.new_address()
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    // Queries

    pub fn get_balance(&self) -> Result<Balance> {
        self.store.get_balance()
    }

    pub fn get_transaction(&self, txid: &TxId) -> Option<WalletTransaction> {
        self.store.get(txid)
    }

    pub fn list_transactions(&self) -> Result<Vec<WalletTransaction>> {
        self.store.list_transactions()
    }

    /// The transaction list as the query layer shows it
    pub fn transaction_records(&self) -> Result<Vec<TransactionRecord>> {
        Ok(self
            .store
            .list_transactions()?
            .into_iter()
            .map(|record| TransactionRecord {
                txid: record.txid().to_hex(),
                confirmations: self.store.depth(&record),
                amount: self.store.net_amount(&record.tx),
                fee: if record.from_me {
                    self.store.fee_of(&record.tx)
                } else {
                    None
                },
                replaceable: record.is_replaceable(),
                replaced_by: record.replaced_by.map(|txid| txid.to_hex()),
                can_bump: self.bumper.can_bump(&record.txid()),
            })
            .collect())
    }

    // Scanning

    pub fn reserve_scan(&self) -> Result<ScanReserver> {
        self.scanner.reserve()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    pub fn scan_for_wallet_transactions(
        &self,
        start: &BlockRef,
        max_height: Option<u32>,
        reserver: &ScanReserver,
        options: ScanOptions,
    ) -> Result<ScanResult> {
        self.scanner.scan(start, max_height, reserver, options)
    }

    pub fn rescan_from_checkpoint(&self) -> Result<ScanResult> {
        self.scanner.rescan_from_checkpoint(ScanOptions::default())
    }

    pub fn abort_scan(&self) {
        self.scanner.abort_scan()
    }

    /// Follow the chain tip. The subscription holds only a weak reference,
    /// so it goes quiet once the wallet is dropped.
    pub fn attach_to_chain(&self) {
        let scanner: Weak<ScanEngine> = Arc::downgrade(&self.scanner);
        self.chain.subscribe(Box::new(move |block| {
            let Some(scanner) = scanner.upgrade() else {
                return;
            };
            if let Err(e) = scanner.block_connected(block) {
                error!("Failed to process block {}: {e}", block.block_ref());
            }
        }));
        info!("Wallet attached to chain notifications");
    }

    // Spending

    pub fn create_transaction(
        &self,
        recipients: &[Recipient],
        control: &CoinControl,
    ) -> Result<CreatedTransaction> {
        spend::create_transaction(
            &self.store,
            self.signer.as_ref(),
            &self.config,
            recipients,
            control,
        )
    }

    /// Create, then submit, a payment of `amount` to `address`
    pub fn send_to(
        &self,
        address: &str,
        amount: u64,
        replaceable: bool,
        confirmed: bool,
    ) -> Result<TxId> {
        if !confirmed {
            return Err(SubmitError::NotConfirmed.into());
        }
        let recipients = [Recipient::to_address(address, amount)?];
        let control = CoinControl {
            replaceable,
            fee_rate: None,
        };
        let created = self.create_transaction(&recipients, &control)?;
        Ok(self.broadcaster.submit(created.tx, confirmed)?)
    }

    pub fn submit(&self, tx: Transaction, confirmed: bool) -> Result<TxId> {
        Ok(self.broadcaster.submit(tx, confirmed)?)
    }

    pub fn set_broadcast_transactions(&self, enabled: bool) {
        self.broadcaster.set_enabled(enabled);
    }

    // Fee bumping

    pub fn can_bump(&self, txid: &TxId) -> bool {
        self.bumper.can_bump(txid)
    }

    pub fn check_bump(&self, txid: &TxId) -> std::result::Result<WalletTransaction, BumpError> {
        self.bumper.check(txid)
    }

    /// Sign and record a replacement without relaying it
    pub fn create_bump_transaction(
        &self,
        txid: &TxId,
        options: &FeeOptions,
    ) -> std::result::Result<WalletTransaction, BumpError> {
        let replacement = self.bumper.create_bump_transaction(txid, options)?;
        self.notifier
            .transaction_changed(replacement.txid(), ChangeType::New);
        self.notifier.transaction_changed(*txid, ChangeType::Updated);
        Ok(replacement)
    }

    /// Create a replacement and relay it. A declined confirmation or disabled
    /// broadcasting leaves the wallet untouched. A relay failure after the
    /// replacement was recorded leaves it recorded.
    pub fn bump_fee(&self, txid: &TxId, options: &FeeOptions, confirmed: bool) -> Result<TxId> {
        if !confirmed {
            return Err(SubmitError::NotConfirmed.into());
        }
        if !self.broadcaster.is_enabled() {
            return Err(SubmitError::BroadcastDisabled.into());
        }
        let replacement = self.create_bump_transaction(txid, options)?;
        Ok(self.broadcaster.submit(replacement.tx, confirmed)?)
    }

    // Conflicts

    pub fn mark_conflicted(&self, a: &TxId, b: &TxId) -> Result<()> {
        self.store.mark_conflicted(a, b)
    }

    pub fn abandon_transaction(&self, txid: &TxId) -> Result<Vec<TxId>> {
        let abandoned = self.store.abandon(txid)?;
        for txid in &abandoned {
            self.notifier.transaction_changed(*txid, ChangeType::Updated);
        }
        if !abandoned.is_empty() {
            self.notifier.notify(WalletEvent::BalanceChanged);
        }
        Ok(abandoned)
    }

    // Receive requests

    /// Store a request for `amount` to a fresh address
    pub fn request_payment(
        &self,
        label: &str,
        amount: u64,
        message: &str,
    ) -> Result<ReceiveRequestEntry> {
        let recipient = RecipientRequest {
            address: self.signer.new_address()?,
            label: label.to_string(),
            amount,
            message: message.to_string(),
            ..RecipientRequest::default()
        };
        self.add_receive_request(recipient)
    }

    pub fn add_receive_request(&self, recipient: RecipientRequest) -> Result<ReceiveRequestEntry> {
        self.store.add_receive_request(recipient)
    }

    pub fn remove_receive_request(&self, id: i64) -> Result<bool> {
        self.store.remove_receive_request(id)
    }

    /// Encoded records, oldest first
    pub fn get_receive_requests(&self) -> Vec<Vec<u8>> {
        self.store.get_receive_requests()
    }

    pub fn receive_requests(&self) -> Result<Vec<ReceiveRequestEntry>> {
        self.store.receive_requests()
    }
}
