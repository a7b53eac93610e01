use ring::digest::{Context, SHA256};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED, ECDSA_P256_SHA256_FIXED_SIGNING,
};
use ripemd::{Digest as RipemdDigest, Ripemd160};

use crate::error::{Result, WalletError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the unix epoch
pub fn current_timestamp() -> Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| WalletError::Crypto(format!("System time error: {e}")))?
        .as_secs();

    if duration > i64::MAX as u64 {
        return Err(WalletError::Crypto("Timestamp overflow".to_string()));
    }

    Ok(duration as i64)
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    context.finish().as_ref().to_vec()
}

pub fn ripemd160_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn base58_encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

pub fn base58_decode(data: &str) -> Result<Vec<u8>> {
    bs58::decode(data)
        .into_vec()
        .map_err(|e| WalletError::InvalidAddress(format!("Invalid base58 encoding: {e}")))
}

/// A fresh P-256 key as PKCS#8 bytes
pub fn new_key_pair() -> Result<Vec<u8>> {
    let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &SystemRandom::new())
        .map_err(|e| WalletError::Crypto(format!("Key generation failed: {e}")))?;
    Ok(document.as_ref().to_vec())
}

fn load_key_pair(pkcs8: &[u8], rng: &SystemRandom) -> Result<EcdsaKeyPair> {
    EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, rng)
        .map_err(|e| WalletError::Crypto(format!("Invalid PKCS#8 key: {e}")))
}

pub fn public_key_from_pkcs8(pkcs8: &[u8]) -> Result<Vec<u8>> {
    let key_pair = load_key_pair(pkcs8, &SystemRandom::new())?;
    Ok(key_pair.public_key().as_ref().to_vec())
}

/// Sign `message` (a sighash) with the P-256 key in `pkcs8`. Fixed-width 64-byte output.
pub fn ecdsa_p256_sha256_sign_digest(pkcs8: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = load_key_pair(pkcs8, &rng)?;
    let signature = key_pair
        .sign(&rng, message)
        .map_err(|e| WalletError::Crypto(format!("Failed to sign message: {e}")))?
        .as_ref()
        .to_vec();
    Ok(signature)
}

pub fn ecdsa_p256_sha256_sign_verify(public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
    ring::signature::UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, public_key)
        .verify(message, signature)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let pkcs8 = new_key_pair().unwrap();
        let public_key = public_key_from_pkcs8(&pkcs8).unwrap();
        let message = sha256_digest(b"spend");

        let signature = ecdsa_p256_sha256_sign_digest(&pkcs8, &message).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(ecdsa_p256_sha256_sign_verify(&public_key, &signature, &message));
        assert!(!ecdsa_p256_sha256_sign_verify(
            &public_key,
            &signature,
            &sha256_digest(b"other")
        ));
    }

    #[test]
    fn test_base58_round_trip() {
        let data = vec![0u8, 1, 2, 250];
        assert_eq!(base58_decode(&base58_encode(&data)).unwrap(), data);
        assert!(base58_decode("0OIl").is_err());
    }
}
