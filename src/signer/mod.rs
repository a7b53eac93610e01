//! Signing provider
//!
//! The wallet never touches private keys directly. It asks a
//! [`SigningProvider`] whether an output belongs to it, for fresh addresses,
//! and to sign transactions. `LocalSigner` is the in-process implementation
//! backed by ECDSA P-256 keys.

pub mod address;
pub mod keys;
pub mod local;

pub use address::{
    convert_address, hash_pub_key, pub_key_hash_from_address, validate_address,
    ADDRESS_CHECK_SUM_LEN,
};
pub use keys::KeyPair;
pub use local::LocalSigner;

use crate::core::{TXOutput, Transaction};
use crate::error::{Result, WalletError};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    /// One previous output is needed per input
    PrevoutCount { inputs: usize, prevouts: usize },
    /// No key for the output being spent
    MissingKey(String),
    Crypto(String),
}

impl fmt::Display for SigningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningError::PrevoutCount { inputs, prevouts } => write!(
                f,
                "Transaction has {inputs} inputs but {prevouts} previous outputs were supplied"
            ),
            SigningError::MissingKey(address) => write!(f, "No private key for {address}"),
            SigningError::Crypto(msg) => write!(f, "Signing failed: {msg}"),
        }
    }
}

impl std::error::Error for SigningError {}

impl From<SigningError> for WalletError {
    fn from(err: SigningError) -> Self {
        WalletError::Crypto(err.to_string())
    }
}

/// Key ownership and signing, consumed by the wallet through this interface only
pub trait SigningProvider: Send + Sync {
    /// True when the provider holds the key for `pub_key_hash`
    fn is_mine(&self, pub_key_hash: &[u8]) -> bool;

    /// Sign every input. `prevouts[i]` is the output spent by input `i`.
    fn sign(
        &self,
        tx: &Transaction,
        prevouts: &[TXOutput],
    ) -> std::result::Result<Transaction, SigningError>;

    /// A fresh address owned by this provider, used for change and payment requests
    fn new_address(&self) -> Result<String>;
}
