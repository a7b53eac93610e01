use crate::error::Result;
use crate::signer::{convert_address, hash_pub_key};
use crate::utils::{ecdsa_p256_sha256_sign_digest, new_key_pair, public_key_from_pkcs8};
use serde::{Deserialize, Serialize};

/// An ECDSA P-256 key pair kept as PKCS#8 plus the derived public key
#[derive(Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct KeyPair {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl KeyPair {
    pub fn generate() -> Result<KeyPair> {
        let pkcs8 = new_key_pair()?;
        Self::from_pkcs8(pkcs8)
    }

    pub fn from_pkcs8(pkcs8: Vec<u8>) -> Result<KeyPair> {
        let public_key = public_key_from_pkcs8(&pkcs8)?;
        Ok(KeyPair { pkcs8, public_key })
    }

    pub fn get_address(&self) -> String {
        convert_address(&self.pub_key_hash())
    }

    pub fn pub_key_hash(&self) -> Vec<u8> {
        hash_pub_key(self.public_key.as_slice())
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        ecdsa_p256_sha256_sign_digest(&self.pkcs8, message)
    }
}

// Keep key material out of debug output
impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.get_address())
            .finish()
    }
}
