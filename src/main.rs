use clap::Parser;
use rust_custody::cli::{admin, tools, Cli, Commands};
use rust_custody::config::CustodyConfig;
use rust_custody::error::CustodyResult;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

fn run(cli: Cli) -> CustodyResult<()> {
    let config = CustodyConfig::load_or_default(&cli.config)?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.node.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    debug!("Loaded config from {} (db: {})", cli.config, config.node.db_path);

    match cli.command {
        Commands::Keygen => tools::handle_keygen(),
        Commands::Init { owner } => admin::handle_init(&config, owner)?,
        Commands::Master { cmd } => admin::handle_master_command(&config, cmd)?,
        Commands::Wallet { cmd } => admin::handle_wallet_command(&config, cmd)?,
        Commands::Account { cmd } => admin::handle_account_command(&config, cmd)?,
        Commands::Template { cmd } => admin::handle_template_command(&config, cmd)?,
        Commands::Status => admin::handle_status(&config)?,
        Commands::Events { limit } => admin::handle_events(&config, limit)?,
        Commands::Gas { count } => tools::handle_gas(count),
        Commands::DecodeBlob { blob } => tools::handle_decode_blob(&blob)?,
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
