// Fee bumping (BIP125 replace-by-fee)
//
// A bump re-spends exactly the inputs of the original transaction, keeps
// every recipient output and pays the extra fee out of the wallet's change
// output. The replacement is signed and recorded in the store, linked to the
// original, but not broadcast; `Wallet::bump_fee` does both steps.

use crate::config::WalletConfig;
use crate::core::{FeeRate, TXInput, TXOutput, Transaction, TxId};
use crate::error::{BumpError, WalletError};
use crate::signer::SigningProvider;
use crate::wallet::store::{WalletTransaction, WalletTxStore};
use log::{debug, info};
use std::sync::Arc;

type BumpResult<T> = std::result::Result<T, BumpError>;

/// How much more to pay. With neither field set the bump pays the old fee
/// plus the larger of `min_bump_fee_delta` and the incremental relay fee.
/// `fee_rate` wins when both are set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeeOptions {
    pub fee_rate: Option<FeeRate>,
    /// Absolute increase over the old fee (sat)
    pub fee_delta: Option<u64>,
}

pub struct FeeBumper {
    store: Arc<WalletTxStore>,
    signer: Arc<dyn SigningProvider>,
    config: WalletConfig,
}

impl FeeBumper {
    pub fn new(
        store: Arc<WalletTxStore>,
        signer: Arc<dyn SigningProvider>,
        config: WalletConfig,
    ) -> FeeBumper {
        FeeBumper {
            store,
            signer,
            config,
        }
    }

    /// The original transaction when it may be bumped, otherwise the reason it may not
    pub fn check(&self, txid: &TxId) -> BumpResult<WalletTransaction> {
        let hex = txid.to_hex();
        let wtx = self
            .store
            .get(txid)
            .ok_or_else(|| BumpError::NotFound(hex.clone()))?;
        if self.store.has_wallet_spend(txid) {
            return Err(BumpError::HasDescendants(hex));
        }
        if wtx.is_confirmed() || self.store.has_confirmed_conflict(txid) {
            return Err(BumpError::Confirmed(hex));
        }
        if !wtx.is_replaceable() {
            return Err(BumpError::NotReplaceable(hex));
        }
        if let Some(replaced_by) = wtx.replaced_by {
            return Err(BumpError::AlreadyBumped {
                txid: hex,
                replaced_by: replaced_by.to_hex(),
            });
        }
        if !wtx.from_me {
            return Err(BumpError::NotAllInputsMine(hex));
        }
        Ok(wtx)
    }

    pub fn can_bump(&self, txid: &TxId) -> bool {
        self.check(txid).is_ok()
    }

    pub fn create_bump_transaction(
        &self,
        txid: &TxId,
        options: &FeeOptions,
    ) -> BumpResult<WalletTransaction> {
        let original = self.check(txid)?;
        let tx = &original.tx;

        let prevouts = self
            .store
            .prev_outputs(tx)
            .map_err(|_| BumpError::NotAllInputsMine(txid.to_hex()))?;
        let input_value: u64 = prevouts.iter().map(TXOutput::get_value).sum();
        let output_value = tx
            .output_value()
            .map_err(|e| BumpError::Storage(e.to_string()))?;
        let old_fee = input_value.saturating_sub(output_value);
        let old_size = tx.size().map_err(|e| BumpError::Storage(e.to_string()))?;
        let old_rate = FeeRate::from_fee_and_size(old_fee, old_size);

        let inputs: Vec<TXInput> = tx
            .get_vin()
            .iter()
            .map(|input| TXInput::new(*input.prev_out(), input.sequence()))
            .collect();
        let mut outputs: Vec<TXOutput> = tx.get_vout().to_vec();
        let size = Transaction::new(inputs.clone(), outputs.clone(), tx.lock_time())
            .and_then(|template| template.signed_size_estimate())
            .map_err(|e| BumpError::Storage(e.to_string()))?;

        let new_fee = self.new_fee(old_fee, old_rate, size, options)?;
        let increase = new_fee - old_fee;

        let change_index = outputs
            .iter()
            .rposition(|out| self.signer.is_mine(out.get_pub_key_hash()))
            .ok_or(BumpError::InsufficientFundsForFee {
                required: increase,
                available: 0,
            })?;
        let change = outputs[change_index].clone();
        if change.get_value() < increase {
            return Err(BumpError::InsufficientFundsForFee {
                required: increase,
                available: change.get_value(),
            });
        }
        let remaining = change.get_value() - increase;
        let mut fee = new_fee;
        if remaining < self.config.dust_threshold {
            if outputs.len() == 1 {
                return Err(BumpError::InsufficientFundsForFee {
                    required: increase + self.config.dust_threshold,
                    available: change.get_value(),
                });
            }
            debug!("Dropping change output of {remaining}, below dust");
            outputs.remove(change_index);
            fee += remaining;
        } else {
            outputs[change_index] =
                TXOutput::to_pub_key_hash(remaining, change.get_pub_key_hash());
        }

        if fee > self.config.max_tx_fee {
            return Err(BumpError::FeeExceedsMaximum {
                fee,
                maximum: self.config.max_tx_fee,
            });
        }

        let unsigned = Transaction::new(inputs, outputs, tx.lock_time())
            .map_err(|e| BumpError::SigningFailed(e.to_string()))?;
        let signed = self
            .signer
            .sign(&unsigned, &prevouts)
            .map_err(|e| BumpError::SigningFailed(e.to_string()))?;

        let record = self
            .store
            .record_replacement(txid, signed)
            .map_err(|e| match e {
                WalletError::Bump(reason) => reason,
                other => BumpError::Storage(other.to_string()),
            })?;
        info!(
            "Bumped fee of {txid}: replacement {} pays {fee} (was {old_fee})",
            record.txid()
        );
        Ok(record)
    }

    // Fee the replacement must pay before any dust change is folded in
    fn new_fee(
        &self,
        old_fee: u64,
        old_rate: FeeRate,
        size: usize,
        options: &FeeOptions,
    ) -> BumpResult<u64> {
        let incremental = self.config.incremental_relay_fee();
        let min_increase = self
            .config
            .min_bump_fee_delta
            .max(incremental.fee_for(size));
        let min_fee = old_fee + min_increase;

        match (options.fee_rate, options.fee_delta) {
            (Some(rate), _) => {
                let minimum = old_rate.saturating_add(incremental);
                if rate < minimum {
                    return Err(BumpError::FeeRateTooLow {
                        requested: rate.sat_per_kvb(),
                        minimum: minimum.sat_per_kvb(),
                    });
                }
                Ok(rate.fee_for(size).max(min_fee))
            }
            (None, Some(delta)) => {
                if delta < min_increase {
                    return Err(BumpError::FeeRateTooLow {
                        requested: FeeRate::from_fee_and_size(old_fee + delta, size)
                            .sat_per_kvb(),
                        minimum: FeeRate::from_fee_and_size(min_fee, size).sat_per_kvb(),
                    });
                }
                Ok(old_fee + delta)
            }
            (None, None) => Ok(min_fee),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        BlockRef, OutPoint, MAX_BIP125_RBF_SEQUENCE, MAX_SEQUENCE_NONFINAL, SATOSHIS_PER_COIN,
    };
    use crate::signer::{pub_key_hash_from_address, LocalSigner};
    use crate::storage::MemoryDatabase;
    use crate::wallet::store::ConfirmationStatus;

    const FOREIGN: [u8; 20] = [7u8; 20];

    struct Fixture {
        signer: Arc<LocalSigner>,
        store: Arc<WalletTxStore>,
        pkh: Vec<u8>,
        funding: Transaction,
    }

    fn fixture() -> Fixture {
        let signer = Arc::new(LocalSigner::new());
        let pkh = pub_key_hash_from_address(&signer.generate_key().unwrap()).unwrap();
        let store = Arc::new(
            WalletTxStore::load(
                Arc::new(MemoryDatabase::new()),
                signer.clone(),
                &WalletConfig::default(),
            )
            .unwrap(),
        );
        let funding = Transaction::new_coinbase_with_subsidy(&pkh, 1).unwrap();
        store
            .insert(
                funding.clone(),
                ConfirmationStatus::Confirmed(BlockRef::new("01", 1)),
            )
            .unwrap();
        store.set_best_block(BlockRef::new("tip", 101), false).unwrap();
        Fixture {
            signer,
            store,
            pkh,
            funding,
        }
    }

    fn bumper(f: &Fixture, config: WalletConfig) -> FeeBumper {
        FeeBumper::new(f.store.clone(), f.signer.clone(), config)
    }

    // Pays `amount` away and `change` back to the wallet, leaving the rest as fee
    fn send(f: &Fixture, amount: u64, change: u64, sequence: u32) -> Transaction {
        let unsigned = Transaction::new(
            vec![TXInput::new(OutPoint::new(f.funding.get_id(), 0), sequence)],
            vec![
                TXOutput::to_pub_key_hash(amount, &FOREIGN),
                TXOutput::to_pub_key_hash(change, &f.pkh),
            ],
            0,
        )
        .unwrap();
        let signed = f
            .signer
            .sign(&unsigned, &[f.funding.get_vout()[0].clone()])
            .unwrap();
        f.store.insert_broadcast(signed.clone()).unwrap();
        signed
    }

    fn standard_send(f: &Fixture, sequence: u32) -> Transaction {
        send(
            f,
            10 * SATOSHIS_PER_COIN,
            40 * SATOSHIS_PER_COIN - 10_000,
            sequence,
        )
    }

    #[test]
    fn test_non_replaceable_cannot_bump() {
        let f = fixture();
        let tx = standard_send(&f, MAX_SEQUENCE_NONFINAL);
        let bumper = bumper(&f, WalletConfig::default());
        assert!(!bumper.can_bump(&tx.get_id()));
        assert_eq!(
            bumper
                .create_bump_transaction(&tx.get_id(), &FeeOptions::default())
                .unwrap_err(),
            BumpError::NotReplaceable(tx.get_id().to_hex())
        );
    }

    #[test]
    fn test_bump_once_then_already_bumped() {
        let f = fixture();
        let tx = standard_send(&f, MAX_BIP125_RBF_SEQUENCE);
        let bumper = bumper(&f, WalletConfig::default());
        assert!(bumper.can_bump(&tx.get_id()));

        let replacement = bumper
            .create_bump_transaction(&tx.get_id(), &FeeOptions::default())
            .unwrap();
        let old_fee = f.store.fee_of(&tx).unwrap();
        let new_fee = f.store.fee_of(&replacement.tx).unwrap();
        assert!(new_fee >= old_fee + WalletConfig::default().min_bump_fee_delta);
        // Recipient untouched, fee came out of change
        assert_eq!(replacement.tx.get_vout()[0], tx.get_vout()[0]);
        assert_eq!(
            replacement.tx.get_vout()[1].get_value(),
            tx.get_vout()[1].get_value() - (new_fee - old_fee)
        );
        assert!(f.store.conflicts_of(&tx.get_id()).contains(&replacement.txid()));
        assert!(replacement.conflicts.contains(&tx.get_id()));
        assert_eq!(replacement.replaces, Some(tx.get_id()));

        assert!(!bumper.can_bump(&tx.get_id()));
        assert!(matches!(
            bumper.create_bump_transaction(&tx.get_id(), &FeeOptions::default()),
            Err(BumpError::AlreadyBumped { .. })
        ));
        // The replacement itself is still replaceable
        assert!(bumper.can_bump(&replacement.txid()));
    }

    #[test]
    fn test_confirmed_and_unknown() {
        let f = fixture();
        let bumper = bumper(&f, WalletConfig::default());
        assert!(matches!(
            bumper.check(&f.funding.get_id()),
            Err(BumpError::Confirmed(_))
        ));

        let tx = standard_send(&f, MAX_BIP125_RBF_SEQUENCE);
        f.store
            .insert(
                tx.clone(),
                ConfirmationStatus::Confirmed(BlockRef::new("02", 102)),
            )
            .unwrap();
        assert_eq!(
            bumper.check(&tx.get_id()).unwrap_err(),
            BumpError::Confirmed(tx.get_id().to_hex())
        );

        let unknown = TxId::from_bytes(&[1u8; 32]).unwrap();
        assert_eq!(
            bumper.check(&unknown).unwrap_err(),
            BumpError::NotFound(unknown.to_hex())
        );
    }

    #[test]
    fn test_spent_change_blocks_bump() {
        let f = fixture();
        let tx = standard_send(&f, MAX_BIP125_RBF_SEQUENCE);
        let child = Transaction::new(
            vec![TXInput::new(OutPoint::new(tx.get_id(), 1), MAX_BIP125_RBF_SEQUENCE)],
            vec![TXOutput::to_pub_key_hash(SATOSHIS_PER_COIN, &FOREIGN)],
            0,
        )
        .unwrap();
        f.store.insert_broadcast(child).unwrap();
        assert!(matches!(
            bumper(&f, WalletConfig::default()).check(&tx.get_id()),
            Err(BumpError::HasDescendants(_))
        ));
    }

    #[test]
    fn test_foreign_inputs_rejected() {
        let f = fixture();
        let incoming = Transaction::new(
            vec![TXInput::new(
                OutPoint::new(TxId::from_bytes(&[2u8; 32]).unwrap(), 0),
                MAX_BIP125_RBF_SEQUENCE,
            )],
            vec![TXOutput::to_pub_key_hash(SATOSHIS_PER_COIN, &f.pkh)],
            0,
        )
        .unwrap();
        f.store.insert_broadcast(incoming.clone()).unwrap();
        assert!(matches!(
            bumper(&f, WalletConfig::default()).check(&incoming.get_id()),
            Err(BumpError::NotAllInputsMine(_))
        ));
    }

    #[test]
    fn test_fee_options() {
        let f = fixture();
        let tx = standard_send(&f, MAX_BIP125_RBF_SEQUENCE);
        let bumper = bumper(&f, WalletConfig::default());

        let too_low = FeeOptions {
            fee_rate: Some(FeeRate::from_sat_per_kvb(1_000)),
            fee_delta: None,
        };
        assert!(matches!(
            bumper.create_bump_transaction(&tx.get_id(), &too_low),
            Err(BumpError::FeeRateTooLow { .. })
        ));

        let tiny_delta = FeeOptions {
            fee_rate: None,
            fee_delta: Some(1),
        };
        assert!(matches!(
            bumper.create_bump_transaction(&tx.get_id(), &tiny_delta),
            Err(BumpError::FeeRateTooLow { .. })
        ));

        let huge_delta = FeeOptions {
            fee_rate: None,
            fee_delta: Some(45 * SATOSHIS_PER_COIN),
        };
        assert!(matches!(
            bumper.create_bump_transaction(&tx.get_id(), &huge_delta),
            Err(BumpError::InsufficientFundsForFee { .. })
        ));

        let delta = FeeOptions {
            fee_rate: None,
            fee_delta: Some(50_000),
        };
        let replacement = bumper.create_bump_transaction(&tx.get_id(), &delta).unwrap();
        assert_eq!(f.store.fee_of(&replacement.tx), Some(10_000 + 50_000));
    }

    #[test]
    fn test_fee_above_maximum_rejected() {
        let f = fixture();
        let tx = standard_send(&f, MAX_BIP125_RBF_SEQUENCE);
        let config = WalletConfig {
            max_tx_fee: 10_500,
            ..WalletConfig::default()
        };
        assert!(matches!(
            bumper(&f, config).create_bump_transaction(&tx.get_id(), &FeeOptions::default()),
            Err(BumpError::FeeExceedsMaximum { .. })
        ));
        // Nothing was recorded
        assert!(f.store.get(&tx.get_id()).unwrap().replaced_by.is_none());
    }

    #[test]
    fn test_dust_change_is_dropped() {
        let f = fixture();
        let change = 1_500;
        let tx = send(
            &f,
            50 * SATOSHIS_PER_COIN - change - 10_000,
            change,
            MAX_BIP125_RBF_SEQUENCE,
        );
        let replacement = bumper(&f, WalletConfig::default())
            .create_bump_transaction(&tx.get_id(), &FeeOptions::default())
            .unwrap();
        assert_eq!(replacement.tx.get_vout().len(), 1);
        assert_eq!(f.store.fee_of(&replacement.tx), Some(10_000 + change));
    }
}
