use crate::error::{Result, WalletError};
use crate::utils::{base58_decode, base58_encode, ripemd160_digest, sha256_digest};

const VERSION: u8 = 0x00;
pub const ADDRESS_CHECK_SUM_LEN: usize = 4;
const PUB_KEY_HASH_LEN: usize = 20;

pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    let pub_key_sha256 = sha256_digest(pub_key);
    ripemd160_digest(pub_key_sha256.as_slice())
}

fn checksum(payload: &[u8]) -> Vec<u8> {
    let first_sha = sha256_digest(payload);
    let second_sha = sha256_digest(first_sha.as_slice());
    second_sha[0..ADDRESS_CHECK_SUM_LEN].to_vec()
}

pub fn validate_address(address: &str) -> bool {
    pub_key_hash_from_address(address).is_ok()
}

/// version + pub_key_hash + checksum, Base58 encoded
pub fn convert_address(pub_key_hash: &[u8]) -> String {
    let mut payload: Vec<u8> = vec![VERSION];
    payload.extend(pub_key_hash);
    let checksum = checksum(payload.as_slice());
    payload.extend(checksum.as_slice());
    base58_encode(payload.as_slice())
}

pub fn pub_key_hash_from_address(address: &str) -> Result<Vec<u8>> {
    let payload = base58_decode(address)?;
    if payload.len() != 1 + PUB_KEY_HASH_LEN + ADDRESS_CHECK_SUM_LEN {
        return Err(WalletError::InvalidAddress(format!(
            "{address}: unexpected payload length {}",
            payload.len()
        )));
    }
    if payload[0] != VERSION {
        return Err(WalletError::InvalidAddress(format!(
            "{address}: unknown version byte {}",
            payload[0]
        )));
    }

    let split = payload.len() - ADDRESS_CHECK_SUM_LEN;
    let actual_checksum = &payload[split..];
    if checksum(&payload[..split]) != actual_checksum {
        return Err(WalletError::InvalidAddress(format!(
            "{address}: checksum mismatch"
        )));
    }
    Ok(payload[1..split].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip() {
        let pkh = hash_pub_key(b"some public key");
        assert_eq!(pkh.len(), PUB_KEY_HASH_LEN);

        let address = convert_address(&pkh);
        assert!(validate_address(&address));
        assert_eq!(pub_key_hash_from_address(&address).unwrap(), pkh);
    }

    #[test]
    fn test_rejects_corrupted_addresses() {
        let address = convert_address(&[3u8; 20]);
        let mut corrupted = address.clone().into_bytes();
        let last = corrupted.len() - 1;
        corrupted[last] = if corrupted[last] == b'2' { b'3' } else { b'2' };
        let corrupted = String::from_utf8(corrupted).unwrap();

        assert!(!validate_address(&corrupted));
        assert!(!validate_address(""));
        assert!(!validate_address("not-base58-0OIl"));
    }
}
