// Transactions follow the UTXO model: each input spends an output of an earlier
// transaction and each output locks value to a public key hash.
// Transaction ids hash the transaction with signatures stripped, so re-signing
// never changes an id and a replacement only gets a new id when its content changes.

use crate::core::monetary::INITIAL_BLOCK_REWARD;
use crate::error::{Result, WalletError};
use crate::signer::{hash_pub_key, pub_key_hash_from_address};
use crate::utils::{deserialize, ecdsa_p256_sha256_sign_verify, serialize, sha256_digest};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Input sequence that opts out of both lock time and replacement
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// Highest sequence that still honours lock time without signalling replacement
pub const MAX_SEQUENCE_NONFINAL: u32 = 0xffff_fffe;

/// Inputs at or below this sequence signal BIP125 opt-in replace-by-fee
pub const MAX_BIP125_RBF_SEQUENCE: u32 = 0xffff_fffd;

// Byte lengths of a P-256 fixed signature and an uncompressed public key,
// used to size transactions before they are signed
const SIGNATURE_LEN: usize = 64;
const PUBLIC_KEY_LEN: usize = 65;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct TxId([u8; 32]);

impl TxId {
    pub const NULL: TxId = TxId([0u8; 32]);

    pub fn from_bytes(bytes: &[u8]) -> Result<TxId> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            WalletError::Transaction(format!(
                "Transaction id must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(TxId(array))
    }

    pub fn from_hex(hex: &str) -> Result<TxId> {
        let bytes = HEXLOWER
            .decode(hex.as_bytes())
            .map_err(|e| WalletError::Transaction(format!("Invalid transaction ID: {e}")))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.0)
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for TxId {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        TxId::from_hex(s)
    }
}

/// Reference to a single output: "output #vout of transaction txid"
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct OutPoint {
    pub txid: TxId,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: TxId, vout: u32) -> OutPoint {
        OutPoint { txid, vout }
    }

    pub fn null() -> OutPoint {
        OutPoint {
            txid: TxId::NULL,
            vout: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_null() && self.vout == u32::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXInput {
    prev_out: OutPoint,
    sequence: u32,
    signature: Vec<u8>, // coinbase inputs carry arbitrary data here instead
    pub_key: Vec<u8>,
}

impl TXInput {
    // Unsigned input, the signing provider fills in signature and public key
    pub fn new(prev_out: OutPoint, sequence: u32) -> TXInput {
        TXInput {
            prev_out,
            sequence,
            signature: vec![],
            pub_key: vec![],
        }
    }

    pub fn prev_out(&self) -> &OutPoint {
        &self.prev_out
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty() && !self.pub_key.is_empty()
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        if value == 0 {
            return Err(WalletError::Transaction(
                "Transaction value must be positive".to_string(),
            ));
        }
        let pub_key_hash = pub_key_hash_from_address(address)?;
        Ok(TXOutput {
            value,
            pub_key_hash,
        })
    }

    pub fn to_pub_key_hash(value: u64, pub_key_hash: &[u8]) -> TXOutput {
        TXOutput {
            value,
            pub_key_hash: pub_key_hash.to_vec(),
        }
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    id: TxId,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
    lock_time: u32,
}

impl Transaction {
    pub fn new(vin: Vec<TXInput>, vout: Vec<TXOutput>, lock_time: u32) -> Result<Transaction> {
        if vin.is_empty() {
            return Err(WalletError::Transaction(
                "Transaction must have at least one input".to_string(),
            ));
        }
        if vout.is_empty() {
            return Err(WalletError::Transaction(
                "Transaction must have at least one output".to_string(),
            ));
        }
        let mut tx = Transaction {
            id: TxId::NULL,
            vin,
            vout,
            lock_time,
        };
        tx.id = tx.compute_id()?;
        Ok(tx)
    }

    /// Coinbase paying the block reward to `pub_key_hash`.
    /// Height and a random nonce keep every coinbase id unique.
    pub fn new_coinbase(pub_key_hash: &[u8], reward: u64, height: u32) -> Result<Transaction> {
        let mut data = height.to_le_bytes().to_vec();
        data.extend_from_slice(Uuid::new_v4().as_bytes());
        let tx_input = TXInput {
            prev_out: OutPoint::null(),
            sequence: SEQUENCE_FINAL,
            signature: data,
            pub_key: vec![],
        };
        let txout = TXOutput::to_pub_key_hash(reward, pub_key_hash);
        Self::new(vec![tx_input], vec![txout], 0)
    }

    pub fn new_coinbase_with_subsidy(pub_key_hash: &[u8], height: u32) -> Result<Transaction> {
        Self::new_coinbase(pub_key_hash, INITIAL_BLOCK_REWARD, height)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].prev_out.is_null()
    }

    /// BIP125: any input with a sequence at or below the threshold opts the
    /// whole transaction into replacement.
    pub fn signals_rbf(&self) -> bool {
        self.vin
            .iter()
            .any(|input| input.sequence <= MAX_BIP125_RBF_SEQUENCE)
    }

    // Copy with all signing data removed, the basis for ids and signature hashes
    fn trimmed_copy(&self) -> Transaction {
        let vin = if self.is_coinbase() {
            self.vin.clone()
        } else {
            self.vin
                .iter()
                .map(|input| TXInput::new(input.prev_out, input.sequence))
                .collect()
        };
        Transaction {
            id: TxId::NULL,
            vin,
            vout: self.vout.clone(),
            lock_time: self.lock_time,
        }
    }

    fn compute_id(&self) -> Result<TxId> {
        let bytes = serialize(&self.trimmed_copy())?;
        TxId::from_bytes(&sha256_digest(&bytes))
    }

    /// Message signed for input `index`, committing to the output it spends
    pub fn signature_hash(&self, index: usize, prev_pub_key_hash: &[u8]) -> Result<Vec<u8>> {
        if index >= self.vin.len() {
            return Err(WalletError::Transaction(format!(
                "Input index {index} out of range"
            )));
        }
        let mut tx_copy = self.trimmed_copy();
        tx_copy.vin[index].pub_key = prev_pub_key_hash.to_vec();
        Ok(sha256_digest(&serialize(&tx_copy)?))
    }

    /// Attach a signature; the id does not change
    pub fn set_input_signature(
        &mut self,
        index: usize,
        signature: Vec<u8>,
        pub_key: Vec<u8>,
    ) -> Result<()> {
        let input = self.vin.get_mut(index).ok_or_else(|| {
            WalletError::Transaction(format!("Input index {index} out of range"))
        })?;
        input.signature = signature;
        input.pub_key = pub_key;
        Ok(())
    }

    pub fn verify_input(&self, index: usize, prev_out: &TXOutput) -> bool {
        let input = match self.vin.get(index) {
            Some(input) => input,
            None => return false,
        };
        if hash_pub_key(&input.pub_key) != prev_out.get_pub_key_hash() {
            return false;
        }
        match self.signature_hash(index, prev_out.get_pub_key_hash()) {
            Ok(message) => {
                ecdsa_p256_sha256_sign_verify(&input.pub_key, &input.signature, &message)
            }
            Err(e) => {
                log::error!("Could not compute signature hash: {e}");
                false
            }
        }
    }

    pub fn get_id(&self) -> TxId {
        self.id
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn lock_time(&self) -> u32 {
        self.lock_time
    }

    pub fn output_value(&self) -> Result<u64> {
        let mut total = 0u64;
        for vout in &self.vout {
            total = total
                .checked_add(vout.get_value())
                .ok_or_else(|| WalletError::Transaction("Output value overflow".to_string()))?;
        }
        Ok(total)
    }

    /// Serialized size in bytes
    pub fn size(&self) -> Result<usize> {
        Ok(self.serialize()?.len())
    }

    /// Size once signed. Unsigned inputs are counted with signature-sized
    /// placeholders, so the result is an upper bound for any signing.
    pub fn signed_size_estimate(&self) -> Result<usize> {
        let mut tx_copy = self.clone();
        for input in tx_copy.vin.iter_mut() {
            if !input.is_signed() {
                input.signature = vec![0u8; SIGNATURE_LEN];
                input.pub_key = vec![0u8; PUBLIC_KEY_LEN];
            }
        }
        tx_copy.size()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}
