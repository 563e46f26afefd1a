use clap::Parser;
use log::debug;

use utxo_ledger::cli::{execute, Cli};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let default_filter = if cli.debug { "debug" } else { "info" };
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let config = cli.load_config()?;
    debug!("Using configuration {:?}", config);

    let stdout = std::io::stdout();
    execute(&cli.command, &config, &mut stdout.lock())
}
