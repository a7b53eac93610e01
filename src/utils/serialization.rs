// Thin wrappers over bincode 2.0 so every record uses the same configuration
use crate::error::{Result, WalletError};
use serde::{Deserialize, Serialize};

pub fn serialize<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    bincode::encode_to_vec(data, bincode::config::standard())
        .map_err(|e| WalletError::Serialization(format!("Failed to encode record: {e}")))
}

/// Decode a whole record; trailing bytes are ignored
pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let (data, _) = deserialize_prefix(bytes)?;
    Ok(data)
}

/// Deserialize a value from the front of `bytes`, returning how many bytes it used.
///
/// Versioned records rely on this to skip fields appended by newer writers.
pub fn deserialize_prefix<T>(bytes: &[u8]) -> Result<(T, usize)>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| WalletError::Serialization(format!("Failed to decode record: {e}")))
}
