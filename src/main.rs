// This is my entry point for the wallet CLI
use architect_wallet::cli::{open_offline_wallet, run_simulation};
use architect_wallet::{Command, FeeOptions, Opt, WalletConfig};
use clap::Parser;
use log::{error, info, LevelFilter};
use std::process;

fn main() {
    // Info by default, RUST_LOG overrides it
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();

    if let Err(e) = run_command(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    // Defaults, then the config file, then environment variables
    let mut config = WalletConfig::load(opt.config.as_deref())?;
    if let Some(data_dir) = &opt.data_dir {
        config.data_dir = data_dir.clone();
    }

    match opt.command {
        // I use this to walk through scan, send and bump against a fresh local chain
        Command::Simulate { blocks, bump } => {
            info!("Simulating {blocks} blocks, bump mode {bump}");
            let options: FeeOptions = bump.into();
            let report = run_simulation(&config, blocks, options, opt.data_dir.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::RequestPayment {
            label,
            amount,
            message,
        } => {
            let wallet = open_offline_wallet(&config)?;
            let entry = wallet.request_payment(&label, amount, &message)?;
            wallet.flush()?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Command::ListRequests => {
            let wallet = open_offline_wallet(&config)?;
            println!("{}", serde_json::to_string_pretty(&wallet.receive_requests()?)?);
        }
        Command::RemoveRequest { id } => {
            let wallet = open_offline_wallet(&config)?;
            if !wallet.remove_receive_request(id)? {
                return Err(format!("No receive request with id {id}").into());
            }
            wallet.flush()?;
            println!("Removed receive request {id}");
        }
        Command::ShowConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
