use crate::core::FeeRate;
use crate::wallet::FeeOptions;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

/// How the simulator bumps the replaceable payment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BumpModeArg {
    /// Smallest increase policy allows
    Minimum,
    /// Target fee rate in sat/kvB
    Rate(u64),
    /// Absolute fee increase in satoshis
    Delta(u64),
}

impl FromStr for BumpModeArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        if lower == "min" || lower == "minimum" {
            return Ok(BumpModeArg::Minimum);
        }
        let parse = |value: &str| {
            value
                .parse::<u64>()
                .map_err(|_| format!("Invalid amount in bump mode: {s}"))
        };
        if let Some(value) = lower.strip_prefix("rate=") {
            Ok(BumpModeArg::Rate(parse(value)?))
        } else if let Some(value) = lower.strip_prefix("delta=") {
            Ok(BumpModeArg::Delta(parse(value)?))
        } else {
            Err(format!(
                "Invalid bump mode: {s}. Use 'min', 'rate=<sat/kvB>' or 'delta=<sat>'"
            ))
        }
    }
}

impl std::fmt::Display for BumpModeArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BumpModeArg::Minimum => write!(f, "min"),
            BumpModeArg::Rate(rate) => write!(f, "rate={rate}"),
            BumpModeArg::Delta(delta) => write!(f, "delta={delta}"),
        }
    }
}

impl From<BumpModeArg> for FeeOptions {
    fn from(mode: BumpModeArg) -> Self {
        match mode {
            BumpModeArg::Minimum => FeeOptions::default(),
            BumpModeArg::Rate(rate) => FeeOptions {
                fee_rate: Some(FeeRate::from_sat_per_kvb(rate)),
                fee_delta: None,
            },
            BumpModeArg::Delta(delta) => FeeOptions {
                fee_rate: None,
                fee_delta: Some(delta),
            },
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "architect-wallet")]
pub struct Opt {
    #[arg(long, global = true, help = "Wallet configuration file (TOML)")]
    pub config: Option<PathBuf>,
    #[arg(long = "data-dir", global = true, help = "Wallet data directory")]
    pub data_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(
        name = "simulate",
        about = "Mine a local chain, scan it, send coins and bump fees"
    )]
    Simulate {
        #[arg(long, default_value_t = 105, help = "Blocks to mine to the wallet")]
        blocks: u32,
        #[arg(
            long,
            default_value = "min",
            help = "Fee bump: 'min', 'rate=<sat/kvB>' or 'delta=<sat>'"
        )]
        bump: BumpModeArg,
    },
    #[command(name = "requestpayment", about = "Create a receive request")]
    RequestPayment {
        #[arg(long, default_value = "", help = "Label shown with the request")]
        label: String,
        #[arg(long, help = "Requested amount (in satoshis)")]
        amount: u64,
        #[arg(long, default_value = "", help = "Message for the payer")]
        message: String,
    },
    #[command(name = "listrequests", about = "Print stored receive requests")]
    ListRequests,
    #[command(name = "removerequest", about = "Delete a receive request")]
    RemoveRequest {
        #[arg(help = "Request id")]
        id: i64,
    },
    #[command(name = "showconfig", about = "Print the effective configuration")]
    ShowConfig,
}
