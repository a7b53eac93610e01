// End-to-end walk through the wallet against a local chain: scan, send,
// bump, confirm. Every step's outcome lands in the report, failures included.

use crate::chain::{ChainView, LocalChain, RelayPolicy};
use crate::config::WalletConfig;
use crate::core::{TxId, SATOSHIS_PER_COIN};
use crate::error::Result;
use crate::signer::{pub_key_hash_from_address, LocalSigner};
use crate::storage::{MemoryDatabase, SledDatabase, WalletDatabase};
use crate::wallet::{Balance, FeeOptions, ScanResult, TransactionRecord, Wallet};
use log::info;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

const NON_REPLACEABLE_AMOUNT: u64 = 5 * SATOSHIS_PER_COIN;
const REPLACEABLE_AMOUNT: u64 = 10 * SATOSHIS_PER_COIN;

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step: String,
    pub txid: Option<String>,
    pub error: Option<String>,
}

impl StepOutcome {
    fn record(step: &str, result: Result<TxId>) -> StepOutcome {
        match result {
            Ok(txid) => {
                info!("{step}: {txid}");
                StepOutcome {
                    step: step.to_string(),
                    txid: Some(txid.to_hex()),
                    error: None,
                }
            }
            Err(e) => {
                info!("{step} failed: {e}");
                StepOutcome {
                    step: step.to_string(),
                    txid: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn txid(&self) -> Option<TxId> {
        self.txid.as_deref().and_then(|hex| TxId::from_hex(hex).ok())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Sled directory holding the simulated wallet, `None` when kept in memory
    pub wallet_path: Option<String>,
    pub scan: ScanResult,
    pub balance_after_scan: Balance,
    pub transactions_after_scan: usize,
    pub steps: Vec<StepOutcome>,
    pub transactions_after_sends: usize,
    pub final_balance: Balance,
    pub transactions: Vec<TransactionRecord>,
}

/// Run the walk-through. With `data_dir` the wallet goes to a fresh sled
/// database under it, otherwise it stays in memory.
pub fn run_simulation(
    config: &WalletConfig,
    blocks: u32,
    bump: FeeOptions,
    data_dir: Option<&Path>,
) -> Result<SimulationReport> {
    let (db, wallet_path): (Arc<dyn WalletDatabase>, Option<String>) = match data_dir {
        Some(dir) => {
            let path = dir.join(format!("simulation-{}", Uuid::new_v4()));
            let display = path.display().to_string();
            (Arc::new(SledDatabase::open(&path)?), Some(display))
        }
        None => (Arc::new(MemoryDatabase::new()), None),
    };

    let policy = RelayPolicy {
        min_relay_fee: config.min_relay_fee(),
        incremental_relay_fee: config.incremental_relay_fee(),
        coinbase_maturity: config.coinbase_maturity,
    };
    let chain = Arc::new(LocalChain::new(policy)?);
    let signer = Arc::new(LocalSigner::with_database(db.clone())?);
    let mining_pkh = pub_key_hash_from_address(&signer.generate_key()?)?;
    chain.mine_blocks(blocks, &mining_pkh)?;
    info!("Mined {blocks} blocks to the wallet");

    let wallet = Wallet::new(config.clone(), db, chain.clone(), signer)?;
    wallet.attach_to_chain();
    let scan = wallet.rescan_from_checkpoint()?;
    let balance_after_scan = wallet.get_balance()?;
    let transactions_after_scan = wallet.store().len();

    let mut steps = Vec::new();
    let destination = wallet.new_address()?;
    steps.push(StepOutcome::record(
        "send non-replaceable",
        wallet.send_to(&destination, NON_REPLACEABLE_AMOUNT, false, true),
    ));
    steps.push(StepOutcome::record(
        "send replaceable",
        wallet.send_to(&destination, REPLACEABLE_AMOUNT, true, true),
    ));
    let transactions_after_sends = wallet.store().len();

    let sent: Vec<Option<TxId>> = steps.iter().map(StepOutcome::txid).collect();
    if let Some(non_replaceable) = sent[0] {
        steps.push(StepOutcome::record(
            "bump non-replaceable",
            wallet.bump_fee(&non_replaceable, &bump, true),
        ));
    }
    if let Some(replaceable) = sent[1] {
        steps.push(StepOutcome::record(
            "bump replaceable",
            wallet.bump_fee(&replaceable, &bump, true),
        ));
        steps.push(StepOutcome::record(
            "bump replaceable again",
            wallet.bump_fee(&replaceable, &bump, true),
        ));
    }

    chain.mine_block(&mining_pkh)?;
    let tip = chain.get_tip()?;
    info!("Confirmed pending transactions, tip is now {tip:?}");

    Ok(SimulationReport {
        wallet_path,
        scan,
        balance_after_scan,
        transactions_after_scan,
        steps,
        transactions_after_sends,
        final_balance: wallet.get_balance()?,
        transactions: wallet.transaction_records()?,
    })
}
