//! Error handling for the wallet engine
//!
//! `WalletError` is the crate-wide error. Fee bumping and broadcasting have
//! their own enums because callers branch on them (the GUI shows the reason
//! and decides whether to retry), and both fold into `WalletError` when a
//! caller only wants a single error type.

use std::fmt;
use std::time::Duration;

/// Result type alias for wallet operations
pub type Result<T> = std::result::Result<T, WalletError>;

/// Error types for wallet operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Key-value store errors
    Database(String),
    /// Cryptographic operation errors
    Crypto(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// File I/O errors
    Io(String),
    /// Configuration errors
    Config(String),
    /// Transaction construction errors
    Transaction(String),
    /// Invalid address format
    InvalidAddress(String),
    /// Chain view errors (block lookup failures, missing tip)
    Chain(String),
    /// Not enough spendable coins to fund a transaction
    InsufficientFunds { required: u64, available: u64 },
    /// Transaction id unknown to the wallet
    UnknownTransaction(String),
    /// Another scan already holds the reservation, retry later
    ReservationConflict,
    /// The chain reorganised underneath a scan
    ReorgDetected {
        last_scanned: Option<String>,
        fork_point: String,
    },
    /// Persisted record written by an incompatible version
    UnsupportedRecordVersion { found: i32, supported: i32 },
    /// Fee bump failed
    Bump(BumpError),
    /// Submission to the mempool failed
    Submit(SubmitError),
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletError::Database(msg) => write!(f, "Database error: {msg}"),
            WalletError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            WalletError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            WalletError::Io(msg) => write!(f, "I/O error: {msg}"),
            WalletError::Config(msg) => write!(f, "Configuration error: {msg}"),
            WalletError::Transaction(msg) => write!(f, "Transaction error: {msg}"),
            WalletError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            WalletError::Chain(msg) => write!(f, "Chain error: {msg}"),
            WalletError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            WalletError::UnknownTransaction(txid) => {
                write!(f, "Transaction {txid} is not known to the wallet")
            }
            WalletError::ReservationConflict => {
                write!(f, "Wallet is currently rescanning, try again later")
            }
            WalletError::ReorgDetected {
                last_scanned,
                fork_point,
            } => match last_scanned {
                Some(last) => write!(
                    f,
                    "Chain reorganisation detected at {fork_point} (last scanned block {last})"
                ),
                None => write!(f, "Chain reorganisation detected at {fork_point}"),
            },
            WalletError::UnsupportedRecordVersion { found, supported } => write!(
                f,
                "Unsupported record version {found} (this wallet reads version {supported})"
            ),
            WalletError::Bump(e) => write!(f, "Fee bump error: {e}"),
            WalletError::Submit(e) => write!(f, "Submit error: {e}"),
        }
    }
}

impl std::error::Error for WalletError {}

impl From<std::io::Error> for WalletError {
    fn from(err: std::io::Error) -> Self {
        WalletError::Io(err.to_string())
    }
}

impl From<sled::Error> for WalletError {
    fn from(err: sled::Error) -> Self {
        WalletError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for WalletError {
    fn from(err: bincode::error::EncodeError) -> Self {
        WalletError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for WalletError {
    fn from(err: bincode::error::DecodeError) -> Self {
        WalletError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for WalletError {
    fn from(err: toml::de::Error) -> Self {
        WalletError::Config(err.to_string())
    }
}

impl From<BumpError> for WalletError {
    fn from(err: BumpError) -> Self {
        WalletError::Bump(err)
    }
}

impl From<SubmitError> for WalletError {
    fn from(err: SubmitError) -> Self {
        WalletError::Submit(err)
    }
}

/// Reasons a transaction cannot be fee-bumped
///
/// These are user-facing: the caller has to change its input (pick another
/// transaction, raise the fee, add funds) before trying again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BumpError {
    NotFound(String),
    /// An output of the transaction is already spent by another wallet transaction
    HasDescendants(String),
    /// Already mined (or conflicted by a mined transaction)
    Confirmed(String),
    NotReplaceable(String),
    AlreadyBumped { txid: String, replaced_by: String },
    NotAllInputsMine(String),
    InsufficientFundsForFee { required: u64, available: u64 },
    FeeRateTooLow { requested: u64, minimum: u64 },
    FeeExceedsMaximum { fee: u64, maximum: u64 },
    SigningFailed(String),
    Storage(String),
}

impl fmt::Display for BumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BumpError::NotFound(txid) => write!(f, "Invalid or non-wallet transaction id {txid}"),
            BumpError::HasDescendants(txid) => {
                write!(f, "Transaction {txid} has descendants in the wallet")
            }
            BumpError::Confirmed(txid) => {
                write!(f, "Transaction {txid} has been mined, or is conflicted with a mined transaction")
            }
            BumpError::NotReplaceable(txid) => {
                write!(f, "Transaction {txid} is not BIP 125 replaceable")
            }
            BumpError::AlreadyBumped { txid, replaced_by } => write!(
                f,
                "Cannot bump transaction {txid} which was already bumped by transaction {replaced_by}"
            ),
            BumpError::NotAllInputsMine(txid) => write!(
                f,
                "Transaction {txid} contains inputs that don't belong to this wallet"
            ),
            BumpError::InsufficientFundsForFee {
                required,
                available,
            } => write!(
                f,
                "Insufficient funds for fee: need {required} more, change output holds {available}"
            ),
            BumpError::FeeRateTooLow { requested, minimum } => write!(
                f,
                "Insufficient total fee rate {requested} sat/kvB, must be at least {minimum} sat/kvB"
            ),
            BumpError::FeeExceedsMaximum { fee, maximum } => write!(
                f,
                "Specified or calculated fee {fee} is too high (cannot be higher than {maximum})"
            ),
            BumpError::SigningFailed(msg) => write!(f, "Can't sign transaction: {msg}"),
            BumpError::Storage(msg) => write!(f, "Could not record replacement: {msg}"),
        }
    }
}

impl std::error::Error for BumpError {}

/// Reasons a submission did not reach the mempool
///
/// All of these are recoverable: the transaction stays locally valid, it just
/// was not broadcast. Retrying is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// The user declined the send confirmation
    NotConfirmed,
    BroadcastDisabled,
    FeeTooLow(String),
    MempoolConflict(String),
    PolicyViolation(String),
    MissingInputs(String),
    Timeout(Duration),
    ChainUnavailable(String),
    /// Accepted by the mempool but the wallet could not record it
    WalletUpdate(String),
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::NotConfirmed => write!(f, "Transaction was not confirmed by the user"),
            SubmitError::BroadcastDisabled => {
                write!(f, "Transaction broadcasting is disabled for this wallet")
            }
            SubmitError::FeeTooLow(reason) => write!(f, "Fee too low: {reason}"),
            SubmitError::MempoolConflict(reason) => {
                write!(f, "Conflicts with a mempool transaction: {reason}")
            }
            SubmitError::PolicyViolation(reason) => write!(f, "Rejected by policy: {reason}"),
            SubmitError::MissingInputs(reason) => write!(f, "Missing inputs: {reason}"),
            SubmitError::Timeout(after) => {
                write!(f, "Submission timed out after {} ms", after.as_millis())
            }
            SubmitError::ChainUnavailable(reason) => write!(f, "Chain unavailable: {reason}"),
            SubmitError::WalletUpdate(reason) => {
                write!(f, "Transaction relayed but wallet update failed: {reason}")
            }
        }
    }
}

impl std::error::Error for SubmitError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_messages_name_the_reason() {
        let err = BumpError::NotReplaceable("ab".to_string());
        assert!(err.to_string().contains("not BIP 125 replaceable"));

        let err = BumpError::AlreadyBumped {
            txid: "ab".to_string(),
            replaced_by: "cd".to_string(),
        };
        assert!(err.to_string().contains("already bumped"));
    }

    #[test]
    fn test_wrapping_into_wallet_error() {
        let err: WalletError = SubmitError::NotConfirmed.into();
        assert_eq!(err, WalletError::Submit(SubmitError::NotConfirmed));
        assert!(err.to_string().starts_with("Submit error"));
    }
}
