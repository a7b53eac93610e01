//! Receive requests
//!
//! A receive request records "I asked to be paid `amount` at `address`".
//! Records are persisted in a versioned layout: the version comes first so a
//! reader can refuse records it does not understand instead of misreading
//! them, and bytes after the fields a reader knows are ignored.

use crate::error::{Result, WalletError};
use crate::utils::{deserialize_prefix, serialize};
use serde::{Deserialize, Serialize};

pub const RECEIVE_REQUEST_VERSION: i32 = 1;

/// Who should pay, how much and why
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct RecipientRequest {
    pub address: String,
    pub label: String,
    /// satoshis
    pub amount: u64,
    pub message: String,
    /// Legacy payment-request blob, empty when unused
    pub payment_request: Vec<u8>,
    /// Empty when unused
    pub authenticated_merchant: String,
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct ReceiveRequestEntry {
    pub version: i32,
    pub id: i64,
    /// Unix seconds
    pub date: i64,
    pub recipient: RecipientRequest,
}

impl ReceiveRequestEntry {
    pub fn new(id: i64, date: i64, recipient: RecipientRequest) -> ReceiveRequestEntry {
        ReceiveRequestEntry {
            version: RECEIVE_REQUEST_VERSION,
            id,
            date,
            recipient,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<ReceiveRequestEntry> {
        let (version, _) = deserialize_prefix::<i32>(bytes)?;
        if version != RECEIVE_REQUEST_VERSION {
            return Err(WalletError::UnsupportedRecordVersion {
                found: version,
                supported: RECEIVE_REQUEST_VERSION,
            });
        }
        let (entry, _) = deserialize_prefix::<ReceiveRequestEntry>(bytes)?;
        Ok(entry)
    }
}
