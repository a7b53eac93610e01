//! Wallet integration tests
//!
//! Drives the public `Wallet` surface against a `LocalChain`: scanning,
//! sending, fee bumping, receive requests, persistence and reorgs.

use architect_wallet::chain::{ChainView, LocalChain, RelayPolicy};
use architect_wallet::signer::{pub_key_hash_from_address, LocalSigner};
use architect_wallet::storage::{MemoryDatabase, SledDatabase, WalletDatabase};
use architect_wallet::wallet::requests::ReceiveRequestEntry;
use architect_wallet::{
    BumpError, ChangeType, FeeOptions, ScanStatus, SubmitError, Wallet, WalletConfig,
    WalletError, WalletEvent, SATOSHIS_PER_COIN,
};
use std::sync::Arc;
use tempfile::tempdir;

struct TestWallet {
    wallet: Wallet,
    chain: Arc<LocalChain>,
    mining_pkh: Vec<u8>,
}

// Mine `blocks` to a fresh wallet key, then scan them
fn scanned_wallet(blocks: u32, db: Arc<dyn WalletDatabase>) -> TestWallet {
    let chain = Arc::new(LocalChain::new(RelayPolicy::default()).unwrap());
    let signer = Arc::new(LocalSigner::with_database(db.clone()).unwrap());
    let mining_pkh = pub_key_hash_from_address(&signer.generate_key().unwrap()).unwrap();
    chain.mine_blocks(blocks, &mining_pkh).unwrap();

    let wallet = Wallet::new(WalletConfig::default(), db, chain.clone(), signer).unwrap();
    let result = wallet.rescan_from_checkpoint().unwrap();
    assert_eq!(result.status, ScanStatus::Success);
    TestWallet {
        wallet,
        chain,
        mining_pkh,
    }
}

#[test]
fn test_scan_credits_mature_coinbases() {
    let t = scanned_wallet(105, Arc::new(MemoryDatabase::new()));

    // Heights 1 to 5 have the 101 confirmations a coinbase needs
    let balance = t.wallet.get_balance().unwrap();
    assert_eq!(balance.trusted, 250 * SATOSHIS_PER_COIN);
    assert_eq!(balance.immature, 100 * 50 * SATOSHIS_PER_COIN);
    assert_eq!(balance.untrusted_pending, 0);
    assert_eq!(t.wallet.list_transactions().unwrap().len(), 105);
    assert_eq!(t.wallet.store().best_block().unwrap().height, 105);
}

#[test]
fn test_send_and_bump_fee() {
    let t = scanned_wallet(105, Arc::new(MemoryDatabase::new()));
    let wallet = &t.wallet;
    let address = wallet.new_address().unwrap();

    let non_replaceable = wallet
        .send_to(&address, 5 * SATOSHIS_PER_COIN, false, true)
        .unwrap();
    let replaceable = wallet
        .send_to(&address, 10 * SATOSHIS_PER_COIN, true, true)
        .unwrap();

    let transactions = wallet.list_transactions().unwrap();
    assert_eq!(transactions.len(), 107);
    assert!(transactions.iter().any(|r| r.txid() == non_replaceable));
    assert!(transactions.iter().any(|r| r.txid() == replaceable));
    assert!(t.chain.mempool_contains(&non_replaceable));
    assert!(t.chain.mempool_contains(&replaceable));

    // Not replaceable: refused and shown as not bumpable
    assert_eq!(
        wallet.check_bump(&non_replaceable).unwrap_err(),
        BumpError::NotReplaceable(non_replaceable.to_hex())
    );
    let records = wallet.transaction_records().unwrap();
    let row = records
        .iter()
        .find(|r| r.txid == non_replaceable.to_hex())
        .unwrap();
    assert!(!row.can_bump);
    assert!(!row.replaceable);

    // Declining the bump confirmation creates nothing
    assert_eq!(
        wallet.bump_fee(&replaceable, &FeeOptions::default(), false),
        Err(WalletError::Submit(SubmitError::NotConfirmed))
    );
    assert_eq!(wallet.list_transactions().unwrap().len(), 107);
    assert!(t.chain.mempool_contains(&replaceable));

    // Replaceable: bumps once
    assert!(wallet.can_bump(&replaceable));
    let replacement = wallet
        .create_bump_transaction(&replaceable, &FeeOptions::default())
        .unwrap();
    assert!(replacement.conflicts.contains(&replaceable));
    assert!(wallet
        .store()
        .conflicts_of(&replaceable)
        .contains(&replacement.txid()));
    assert!(matches!(
        wallet.check_bump(&replaceable),
        Err(BumpError::AlreadyBumped { .. })
    ));
    assert!(matches!(
        wallet.create_bump_transaction(&replaceable, &FeeOptions::default()),
        Err(BumpError::AlreadyBumped { .. })
    ));

    // Relay the replacement; the mempool swaps it in
    let relayed = wallet.submit(replacement.tx.clone(), true).unwrap();
    assert_eq!(relayed, replacement.txid());
    assert!(t.chain.mempool_contains(&relayed));
    assert!(!t.chain.mempool_contains(&replaceable));

    // Once mined nothing can be bumped any more
    t.chain.mine_block(&t.mining_pkh).unwrap();
    wallet.rescan_from_checkpoint().unwrap();
    assert!(!wallet.can_bump(&replacement.txid()));
    assert!(matches!(
        wallet.check_bump(&replaceable),
        Err(BumpError::Confirmed(_))
    ));
}

#[test]
fn test_declined_send_changes_nothing() {
    let t = scanned_wallet(101, Arc::new(MemoryDatabase::new()));
    let address = t.wallet.new_address().unwrap();
    let before = t.wallet.get_balance().unwrap();

    assert_eq!(
        t.wallet.send_to(&address, SATOSHIS_PER_COIN, true, false),
        Err(WalletError::Submit(SubmitError::NotConfirmed))
    );
    assert_eq!(t.wallet.get_balance().unwrap(), before);
    assert_eq!(t.chain.mempool_len(), 0);
}

#[test]
fn test_send_emits_events() {
    let t = scanned_wallet(101, Arc::new(MemoryDatabase::new()));
    let events = t.wallet.subscribe();
    let address = t.wallet.new_address().unwrap();

    let txid = t
        .wallet
        .send_to(&address, SATOSHIS_PER_COIN, true, true)
        .unwrap();
    assert_eq!(
        events.try_recv().unwrap(),
        WalletEvent::TransactionChanged {
            txid,
            status: ChangeType::New
        }
    );
    assert_eq!(events.try_recv().unwrap(), WalletEvent::BalanceChanged);
}

#[test]
fn test_receive_request_round_trip() {
    let t = scanned_wallet(1, Arc::new(MemoryDatabase::new()));
    let wallet = &t.wallet;

    let entry = wallet
        .request_payment("TEST_LABEL_1", 1, "TEST_MESSAGE_1")
        .unwrap();
    let encoded = wallet.get_receive_requests();
    assert_eq!(encoded.len(), 1);

    let decoded = ReceiveRequestEntry::decode(&encoded[0]).unwrap();
    assert_eq!(decoded, entry);
    assert_eq!(decoded.recipient.label, "TEST_LABEL_1");
    assert_eq!(decoded.recipient.amount, 1);
    assert_eq!(decoded.recipient.message, "TEST_MESSAGE_1");

    wallet.request_payment("other", 2, "").unwrap();
    let before = wallet.get_receive_requests().len();
    assert!(wallet.remove_receive_request(entry.id).unwrap());
    assert_eq!(wallet.get_receive_requests().len(), before - 1);
    assert!(!wallet.remove_receive_request(entry.id).unwrap());
}

#[test]
fn test_scan_reservation_is_exclusive() {
    let t = scanned_wallet(3, Arc::new(MemoryDatabase::new()));
    let reserver = t.wallet.reserve_scan().unwrap();
    assert!(t.wallet.is_scanning());
    assert_eq!(
        t.wallet.rescan_from_checkpoint(),
        Err(WalletError::ReservationConflict)
    );
    drop(reserver);
    assert!(!t.wallet.is_scanning());
    assert!(t.wallet.rescan_from_checkpoint().is_ok());
}

#[test]
fn test_wallet_state_survives_reopen() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("wallet");

    let (chain, txid) = {
        let db: Arc<dyn WalletDatabase> = Arc::new(SledDatabase::open(&db_path).unwrap());
        let t = scanned_wallet(102, db);
        let address = t.wallet.new_address().unwrap();
        let txid = t
            .wallet
            .send_to(&address, 3 * SATOSHIS_PER_COIN, true, true)
            .unwrap();
        t.wallet.request_payment("persisted", 42, "").unwrap();
        t.wallet.flush().unwrap();
        (t.chain, txid)
    };

    let db: Arc<dyn WalletDatabase> = Arc::new(SledDatabase::open(&db_path).unwrap());
    let signer = Arc::new(LocalSigner::with_database(db.clone()).unwrap());
    let wallet = Wallet::new(WalletConfig::default(), db, chain.clone(), signer).unwrap();

    assert_eq!(wallet.list_transactions().unwrap().len(), 103);
    assert!(wallet.get_transaction(&txid).unwrap().in_mempool);
    assert!(wallet.can_bump(&txid));
    assert_eq!(wallet.store().best_block().unwrap().height, 102);
    assert_eq!(wallet.receive_requests().unwrap()[0].recipient.amount, 42);

    // Nothing new since the checkpoint
    let result = wallet.rescan_from_checkpoint().unwrap();
    assert_eq!(result.status, ScanStatus::Success);
    assert_eq!(wallet.list_transactions().unwrap().len(), 103);
}

#[test]
fn test_attached_wallet_handles_reorg() {
    let t = scanned_wallet(101, Arc::new(MemoryDatabase::new()));
    t.wallet.attach_to_chain();
    let address = t.wallet.new_address().unwrap();
    let txid = t
        .wallet
        .send_to(&address, SATOSHIS_PER_COIN, true, true)
        .unwrap();

    let stale = t.chain.mine_block(&t.mining_pkh).unwrap();
    let confirmed = t.wallet.get_transaction(&txid).unwrap();
    assert_eq!(confirmed.confirmation.block(), Some(&stale.block_ref()));

    // Replace block 102 with a two-block branch; the payment is mined again
    let other = [9u8; 20];
    t.chain.reorganize(101, 2, &other).unwrap();
    let new_block = t.chain.get_block_at_height(102).unwrap().unwrap();
    assert_ne!(new_block.get_hash(), stale.get_hash());

    let record = t.wallet.get_transaction(&txid).unwrap();
    assert_eq!(record.confirmation.block(), Some(&new_block.block_ref()));
    assert_eq!(
        t.wallet.store().best_block(),
        t.chain.get_tip().unwrap()
    );
    // The stale coinbase paid us; it is no longer confirmed
    let stale_coinbase = stale.get_transactions()[0].get_id();
    assert!(!t
        .wallet
        .get_transaction(&stale_coinbase)
        .unwrap()
        .is_confirmed());
}
