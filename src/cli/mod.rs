//! Command-line interface
//!
//! Argument parsing for the `architect-wallet` binary, the simulator it
//! runs, and the wallet it opens for the receive-request commands.

pub mod commands;
pub mod simulate;

pub use commands::{BumpModeArg, Command, Opt};
pub use simulate::{run_simulation, SimulationReport, StepOutcome};

use crate::chain::{LocalChain, RelayPolicy};
use crate::config::WalletConfig;
use crate::error::Result;
use crate::signer::LocalSigner;
use crate::storage::{SledDatabase, WalletDatabase};
use crate::wallet::Wallet;
use std::sync::Arc;

/// Open the wallet persisted in `config.data_dir` without a chain
/// connection. Good for anything that only reads or writes wallet records,
/// such as receive requests.
pub fn open_offline_wallet(config: &WalletConfig) -> Result<Wallet> {
    let db: Arc<dyn WalletDatabase> = Arc::new(SledDatabase::open(&config.data_dir)?);
    let signer = Arc::new(LocalSigner::with_database(db.clone())?);
    if signer.is_empty() {
        signer.generate_key()?;
    }
    let chain = Arc::new(LocalChain::new(RelayPolicy::default())?);
    Wallet::new(config.clone(), db, chain, signer)
}
