use crate::core::{TXOutput, Transaction};
use crate::error::{Result, WalletError};
use crate::signer::{convert_address, KeyPair, SigningError, SigningProvider};
use crate::storage::WalletDatabase;
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

const KEY_PREFIX: &str = "key/";

/// Keys held in memory, optionally persisted to the wallet database
pub struct LocalSigner {
    keys: RwLock<HashMap<Vec<u8>, KeyPair>>,
    db: Option<Arc<dyn WalletDatabase>>,
}

impl Default for LocalSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSigner {
    pub fn new() -> LocalSigner {
        LocalSigner {
            keys: RwLock::new(HashMap::new()),
            db: None,
        }
    }

    /// Load every stored key and persist new ones to `db`
    pub fn with_database(db: Arc<dyn WalletDatabase>) -> Result<LocalSigner> {
        let mut keys = HashMap::new();
        for (_, value) in db.scan_prefix(KEY_PREFIX.as_bytes())? {
            let key: KeyPair = deserialize(&value)?;
            keys.insert(key.pub_key_hash(), key);
        }
        info!("Loaded {} signing keys", keys.len());
        Ok(LocalSigner {
            keys: RwLock::new(keys),
            db: Some(db),
        })
    }

    pub fn add_key(&self, key: KeyPair) -> Result<String> {
        let pub_key_hash = key.pub_key_hash();
        let address = key.get_address();
        if let Some(db) = &self.db {
            let db_key = format!("{KEY_PREFIX}{}", HEXLOWER.encode(&pub_key_hash));
            db.put(db_key.as_bytes(), serialize(&key)?)?;
        }
        let mut keys = self
            .keys
            .write()
            .map_err(|_| WalletError::Crypto("key store lock poisoned".to_string()))?;
        keys.insert(pub_key_hash, key);
        debug!("Added key for {address}");
        Ok(address)
    }

    pub fn generate_key(&self) -> Result<String> {
        self.add_key(KeyPair::generate()?)
    }

    /// Import an existing PKCS#8 key, e.g. a key that already receives coinbase rewards
    pub fn import_pkcs8(&self, pkcs8: Vec<u8>) -> Result<String> {
        self.add_key(KeyPair::from_pkcs8(pkcs8)?)
    }

    pub fn addresses(&self) -> Vec<String> {
        match self.keys.read() {
            Ok(keys) => keys.keys().map(|pkh| convert_address(pkh)).collect(),
            Err(_) => {
                log::error!("Failed to acquire read lock on key store");
                vec![]
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.keys.read() {
            Ok(keys) => keys.len(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SigningProvider for LocalSigner {
    fn is_mine(&self, pub_key_hash: &[u8]) -> bool {
        match self.keys.read() {
            Ok(keys) => keys.contains_key(pub_key_hash),
            Err(_) => {
                log::error!("Failed to acquire read lock on key store");
                false
            }
        }
    }

    fn sign(
        &self,
        tx: &Transaction,
        prevouts: &[TXOutput],
    ) -> std::result::Result<Transaction, SigningError> {
        if tx.get_vin().len() != prevouts.len() {
            return Err(SigningError::PrevoutCount {
                inputs: tx.get_vin().len(),
                prevouts: prevouts.len(),
            });
        }
        let keys = self
            .keys
            .read()
            .map_err(|_| SigningError::Crypto("key store lock poisoned".to_string()))?;

        let mut signed = tx.clone();
        for (idx, prev_out) in prevouts.iter().enumerate() {
            let key = keys
                .get(prev_out.get_pub_key_hash())
                .ok_or_else(|| SigningError::MissingKey(convert_address(prev_out.get_pub_key_hash())))?;
            let message = tx
                .signature_hash(idx, prev_out.get_pub_key_hash())
                .map_err(|e| SigningError::Crypto(e.to_string()))?;
            let signature = key
                .sign(&message)
                .map_err(|e| SigningError::Crypto(e.to_string()))?;
            signed
                .set_input_signature(idx, signature, key.get_public_key().to_vec())
                .map_err(|e| SigningError::Crypto(e.to_string()))?;
        }
        Ok(signed)
    }

    fn new_address(&self) -> Result<String> {
        self.generate_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OutPoint, TXInput, TxId, SEQUENCE_FINAL};
    use crate::signer::pub_key_hash_from_address;
    use crate::storage::MemoryDatabase;

    fn spend_of(prev: &TXOutput) -> Transaction {
        Transaction::new(
            vec![TXInput::new(
                OutPoint::new(TxId::from_bytes(&[4u8; 32]).unwrap(), 0),
                SEQUENCE_FINAL,
            )],
            vec![TXOutput::to_pub_key_hash(prev.get_value() - 10, &[9u8; 20])],
            0,
        )
        .unwrap()
    }

    #[test]
    fn test_sign_with_owned_key() {
        let signer = LocalSigner::new();
        let address = signer.new_address().unwrap();
        let pkh = pub_key_hash_from_address(&address).unwrap();
        assert!(signer.is_mine(&pkh));

        let prev = TXOutput::to_pub_key_hash(1_000, &pkh);
        let tx = spend_of(&prev);
        let signed = signer.sign(&tx, std::slice::from_ref(&prev)).unwrap();
        assert!(signed.verify_input(0, &prev));
        assert_eq!(signed.get_id(), tx.get_id());
    }

    #[test]
    fn test_sign_without_key_fails() {
        let signer = LocalSigner::new();
        let prev = TXOutput::to_pub_key_hash(1_000, &[1u8; 20]);
        let tx = spend_of(&prev);
        assert!(matches!(
            signer.sign(&tx, &[prev]),
            Err(SigningError::MissingKey(_))
        ));
        assert!(matches!(
            signer.sign(&tx, &[]),
            Err(SigningError::PrevoutCount { .. })
        ));
    }

    #[test]
    fn test_keys_persist_in_database() {
        let db: Arc<dyn WalletDatabase> = Arc::new(MemoryDatabase::new());
        let address = {
            let signer = LocalSigner::with_database(db.clone()).unwrap();
            signer.generate_key().unwrap()
        };
        let reloaded = LocalSigner::with_database(db).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.addresses(), vec![address]);
    }
}
