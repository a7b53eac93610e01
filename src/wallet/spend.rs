// Transaction creation for "send coins"
//
// Largest-first coin selection over the wallet's available coins. The fee is
// computed from a size upper bound (unsigned inputs count with full-size
// signatures, change counts with the widest amount encoding) so the signed
// transaction always pays at least the requested rate.

use crate::config::WalletConfig;
use crate::core::{
    FeeRate, TXInput, TXOutput, Transaction, MAX_BIP125_RBF_SEQUENCE,
    MAX_SEQUENCE_NONFINAL,
};
use crate::error::{Result, WalletError};
use crate::signer::{pub_key_hash_from_address, SigningProvider};
use crate::wallet::store::{WalletCoin, WalletTxStore};
use log::{debug, info};

const CHANGE_PLACEHOLDER_PKH: [u8; 20] = [0u8; 20];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub pub_key_hash: Vec<u8>,
    pub amount: u64,
}

impl Recipient {
    pub fn to_address(address: &str, amount: u64) -> Result<Recipient> {
        Ok(Recipient {
            pub_key_hash: pub_key_hash_from_address(address)?,
            amount,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoinControl {
    /// Signal BIP125 so the transaction can be fee-bumped later
    pub replaceable: bool,
    /// Wallet default when `None`
    pub fee_rate: Option<FeeRate>,
}

impl Default for CoinControl {
    fn default() -> Self {
        CoinControl {
            replaceable: true,
            fee_rate: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedTransaction {
    pub tx: Transaction,
    pub fee: u64,
    pub change_pos: Option<usize>,
}

fn build_unsigned(
    coins: &[WalletCoin],
    recipients: &[Recipient],
    change: Option<(&[u8], u64)>,
    sequence: u32,
) -> Result<Transaction> {
    let vin: Vec<TXInput> = coins
        .iter()
        .map(|coin| TXInput::new(coin.outpoint, sequence))
        .collect();
    let mut vout: Vec<TXOutput> = recipients
        .iter()
        .map(|r| TXOutput::to_pub_key_hash(r.amount, &r.pub_key_hash))
        .collect();
    if let Some((pub_key_hash, value)) = change {
        vout.push(TXOutput::to_pub_key_hash(value, pub_key_hash));
    }
    Transaction::new(vin, vout, 0)
}

fn estimate_fee(
    coins: &[WalletCoin],
    recipients: &[Recipient],
    with_change: bool,
    sequence: u32,
    rate: FeeRate,
) -> Result<u64> {
    let change = with_change.then_some((&CHANGE_PLACEHOLDER_PKH[..], u64::MAX));
    let size = build_unsigned(coins, recipients, change, sequence)?.signed_size_estimate()?;
    Ok(rate.fee_for(size))
}

/// Select coins, add change when it is worth keeping, and sign
pub fn create_transaction(
    store: &WalletTxStore,
    signer: &dyn SigningProvider,
    config: &WalletConfig,
    recipients: &[Recipient],
    control: &CoinControl,
) -> Result<CreatedTransaction> {
    if recipients.is_empty() {
        return Err(WalletError::Transaction(
            "Transaction must have at least one recipient".to_string(),
        ));
    }
    let mut target = 0u64;
    for recipient in recipients {
        if recipient.amount < config.dust_threshold {
            return Err(WalletError::Transaction(format!(
                "Amount {} is below the dust threshold {}",
                recipient.amount, config.dust_threshold
            )));
        }
        target = target
            .checked_add(recipient.amount)
            .ok_or_else(|| WalletError::Transaction("Amount overflow".to_string()))?;
    }

    let rate = control.fee_rate.unwrap_or_else(|| config.default_fee());
    if rate < config.min_relay_fee() {
        return Err(WalletError::Transaction(format!(
            "Fee rate {rate} is below the minimum relay fee {}",
            config.min_relay_fee()
        )));
    }
    let sequence = if control.replaceable {
        MAX_BIP125_RBF_SEQUENCE
    } else {
        MAX_SEQUENCE_NONFINAL
    };

    let mut coins = store.available_coins()?;
    coins.sort_by(|a, b| {
        b.output
            .get_value()
            .cmp(&a.output.get_value())
            .then(a.outpoint.cmp(&b.outpoint))
    });
    let available: u64 = coins.iter().map(|c| c.output.get_value()).sum();

    let mut selected: Vec<WalletCoin> = Vec::new();
    let mut selected_value = 0u64;
    let mut required = target;
    for coin in coins {
        selected_value += coin.output.get_value();
        selected.push(coin);

        let fee_with_change = estimate_fee(&selected, recipients, true, sequence, rate)?;
        let fee_without_change = estimate_fee(&selected, recipients, false, sequence, rate)?;
        required = target + fee_without_change;
        if selected_value < required {
            continue;
        }

        let surplus = selected_value - target;
        let change = surplus.checked_sub(fee_with_change).unwrap_or(0);
        // Change that would be dust goes to the fee
        let with_change = change >= config.dust_threshold;
        let fee = if with_change { fee_with_change } else { surplus };
        if fee > config.max_tx_fee {
            return Err(WalletError::Transaction(format!(
                "Fee {fee} exceeds the maximum transaction fee {}",
                config.max_tx_fee
            )));
        }

        // Only draw a change key once the transaction is going to be signed
        let (unsigned, change_pos) = if with_change {
            let change_pkh = pub_key_hash_from_address(&signer.new_address()?)?;
            let unsigned =
                build_unsigned(&selected, recipients, Some((&change_pkh, change)), sequence)?;
            (unsigned, Some(recipients.len()))
        } else {
            (build_unsigned(&selected, recipients, None, sequence)?, None)
        };

        let prevouts: Vec<TXOutput> = selected.iter().map(|c| c.output.clone()).collect();
        let tx = signer.sign(&unsigned, &prevouts)?;
        info!(
            "Created transaction {} spending {} coins (fee {fee}, replaceable: {})",
            tx.get_id(),
            selected.len(),
            control.replaceable
        );
        return Ok(CreatedTransaction {
            tx,
            fee,
            change_pos,
        });
    }

    debug!("Coin selection failed: need {required}, have {available}");
    Err(WalletError::InsufficientFunds {
        required,
        available,
    })
}
