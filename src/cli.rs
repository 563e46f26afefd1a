use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::info;

use crate::blockchain::hashing::to_hex;
use crate::blockchain::Ledger;
use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "ledger")]
#[command(about = "Single-node proof-of-work ledger with UTXO transfers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Data directory of the block store")]
    pub data_dir: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        help = "Proof-of-work difficulty (1-255); must match an existing ledger"
    )]
    pub difficulty: Option<u32>,

    #[arg(long, global = true, help = "Enable debug logging")]
    pub debug: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Creates a ledger and sends the genesis reward to ADDRESS
    #[command(name = "createblockchain")]
    CreateBlockchain {
        #[arg(long, help = "Address receiving the genesis reward")]
        address: String,
    },

    /// Gets the balance for an address
    #[command(name = "getbalance")]
    GetBalance {
        #[arg(long, help = "Address to get the balance for")]
        address: String,
    },

    /// Prints the blocks in the chain, newest first
    #[command(name = "printchain")]
    PrintChain,

    /// Sends an amount of coins
    Send {
        #[arg(long, help = "Source wallet address")]
        from: String,

        #[arg(long, help = "Destination wallet address")]
        to: String,

        #[arg(long, value_parser = clap::value_parser!(u64).range(1..), help = "Amount to send")]
        amount: u64,
    },
}

impl Cli {
    /// Resolves the effective configuration from file and flags
    pub fn load_config(&self) -> anyhow::Result<Config> {
        let config = Config::load(self.config.as_deref())?
            .with_overrides(self.data_dir.clone(), self.difficulty)?;
        Ok(config)
    }
}

/// Runs one command against the ledger configured by `config`
///
/// The ledger is opened (or created) for the duration of the command and
/// closed before returning.
pub fn execute<W: Write>(command: &Commands, config: &Config, out: &mut W) -> anyhow::Result<()> {
    match command {
        Commands::CreateBlockchain { address } => {
            let ledger = Ledger::initialize(
                &config.data_dir,
                address,
                &config.genesis_memo,
                config.creation_difficulty(),
            )?;
            info!("Genesis reward sent to {}", address);
            drop(ledger);
            writeln!(out, "Finished!")?;
        }

        Commands::GetBalance { address } => {
            let ledger = Ledger::reopen(&config.data_dir, config.difficulty)?;
            let balance = ledger.resolver().balance_of(address)?;
            writeln!(out, "Balance of {}: {}", address, balance)?;
        }

        Commands::PrintChain => {
            let ledger = Ledger::reopen(&config.data_dir, config.difficulty)?;
            for block in ledger.iterator() {
                let block = block?;

                writeln!(out, "Prev. hash: {}", to_hex(&block.prev_hash))?;
                writeln!(out, "Hash: {}", to_hex(&block.hash))?;
                writeln!(out, "Nonce: {}", block.nonce)?;
                for tx in &block.transactions {
                    writeln!(out, "Transaction {}", tx.id_hex())?;
                    for (index, output) in tx.outputs.iter().enumerate() {
                        writeln!(out, "  Output {}: {} to {}", index, output.value, output.owner_key)?;
                    }
                }
                writeln!(out, "PoW: {}", block.verify(ledger.proof_of_work()))?;
                writeln!(out)?;
            }
        }

        Commands::Send { from, to, amount } => {
            let mut ledger = Ledger::reopen(&config.data_dir, config.difficulty)?;
            ledger.send(from, to, *amount)?;
            writeln!(out, "Success!")?;
        }
    }

    Ok(())
}
