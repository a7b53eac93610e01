//! Utility functions and helpers
//!
//! Hashing, Base58, ECDSA helpers and the bincode wrappers used for every
//! persisted record.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    base58_decode, base58_encode, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, new_key_pair, public_key_from_pkcs8, ripemd160_digest,
    sha256_digest,
};

pub use serialization::{deserialize, deserialize_prefix, serialize};
