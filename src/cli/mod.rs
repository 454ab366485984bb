pub mod admin;
pub mod tools;

use crate::crypto::Address;
use crate::operation::Selector;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "custody")]
#[command(about = "Delegated wallet authorization CLI", long_about = None)]
pub struct Cli {
    /// Path to the TOML config (created with defaults if missing)
    #[arg(long, default_value = "custody.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a new ed25519 signing key
    Keygen,
    /// Create an empty registry owned by OWNER
    Init {
        #[arg(long)]
        owner: Address,
    },
    /// Master authorization
    Master {
        #[command(subcommand)]
        cmd: admin::MasterCommands,
    },
    /// Account -> master control
    Wallet {
        #[command(subcommand)]
        cmd: admin::WalletCommands,
    },
    /// Account records and session keys
    Account {
        #[command(subcommand)]
        cmd: admin::AccountCommands,
    },
    /// Session-key templates and bulk provisioning
    Template {
        #[command(subcommand)]
        cmd: admin::TemplateCommands,
    },
    /// Print a summary of the stored state
    Status,
    /// Show recent audit events
    Events {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Estimate validation cost savings for a batch size
    Gas {
        count: u64,
    },
    /// Decode an aggregated signature blob (hex)
    DecodeBlob {
        blob: String,
    },
}

/// Parse `<target-hex>:<selector-hex>`
pub fn parse_scope(s: &str) -> Result<(Address, Selector), String> {
    let (target, selector) = s
        .split_once(':')
        .ok_or_else(|| format!("Invalid scope '{}': expected <target>:<selector>", s))?;
    Ok((target.parse()?, selector.parse()?))
}
