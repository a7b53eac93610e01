//! Wallet event notifications
//!
//! Interested parties (a GUI, the CLI) call `subscribe` and receive events on
//! a channel. Receivers that have been dropped are pruned on the next send.

use crate::core::TxId;
use crate::wallet::scan::ScanResult;
use log::error;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    New,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    TransactionChanged { txid: TxId, status: ChangeType },
    BalanceChanged,
    ScanFinished(ScanResult),
}

#[derive(Default)]
pub struct Notifier {
    subscribers: Mutex<Vec<Sender<WalletEvent>>>,
}

impl Notifier {
    pub fn new() -> Notifier {
        Notifier::default()
    }

    pub fn subscribe(&self) -> Receiver<WalletEvent> {
        let (sender, receiver) = channel();
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(sender),
            Err(_) => error!("Failed to acquire lock on wallet subscribers"),
        }
        receiver
    }

    pub fn notify(&self, event: WalletEvent) {
        match self.subscribers.lock() {
            Ok(mut subscribers) => {
                subscribers.retain(|sender| sender.send(event.clone()).is_ok());
            }
            Err(_) => error!("Failed to acquire lock on wallet subscribers"),
        }
    }

    pub fn transaction_changed(&self, txid: TxId, status: ChangeType) {
        self.notify(WalletEvent::TransactionChanged { txid, status });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}
