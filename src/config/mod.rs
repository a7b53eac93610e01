//! Configuration management
//!
//! `WalletConfig` carries the fee policy, maturity and broadcast settings the
//! wallet components need. It is built once (defaults, then an optional TOML
//! file, then environment overrides) and handed to `Wallet::new`.

pub mod settings;

pub use settings::{WalletConfig, DEFAULT_SUBMIT_TIMEOUT_MS};
