use super::parse_scope;
use crate::account::SessionPermissions;
use crate::clock::{Clock, SystemClock};
use crate::config::CustodyConfig;
use crate::crypto::{Address, KeyPair};
use crate::custody::CustodyState;
use crate::error::{CustodyError, CustodyResult};
use crate::storage::Storage;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum MasterCommands {
    /// Authorize (or with --revoke, deauthorize) a master
    Authorize {
        /// Hex secret key of the acting principal
        #[arg(long)]
        secret: String,
        #[arg(long)]
        master: Address,
        #[arg(long)]
        revoke: bool,
    },
    /// List authorized masters with their nonces
    List,
}

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Put accounts under a master's control (or release them with --release)
    Assign {
        /// Hex secret key of the acting principal
        #[arg(long)]
        secret: String,
        #[arg(long)]
        master: Address,
        #[arg(long, required = true, num_args = 1..)]
        accounts: Vec<Address>,
        #[arg(long)]
        release: bool,
    },
    /// Show the master controlling an account
    Resolve {
        account: Address,
    },
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Create and initialize an account record
    Create {
        #[arg(long)]
        address: Address,
        #[arg(long)]
        owner: Address,
        #[arg(long)]
        master: Option<Address>,
    },
    /// Register an account with the batch registrar under its master
    Register {
        /// Hex secret key of the acting principal
        #[arg(long)]
        secret: String,
        #[arg(long)]
        master: Address,
        #[arg(long)]
        account: Address,
        #[arg(long)]
        remove: bool,
    },
    /// Add a session key valid from now for DURATION seconds
    AddSessionKey {
        #[arg(long)]
        account: Address,
        /// Hex secret key of the acting principal
        #[arg(long)]
        secret: String,
        #[arg(long)]
        key: Address,
        #[arg(long)]
        duration: u64,
        /// <target>:<selector> pairs; omit for allow-all
        #[arg(long)]
        scope: Vec<String>,
    },
    RevokeSessionKey {
        #[arg(long)]
        account: Address,
        /// Hex secret key of the acting principal
        #[arg(long)]
        secret: String,
        #[arg(long)]
        key: Address,
    },
    /// Print an account as JSON
    Show {
        address: Address,
    },
    List,
}

#[derive(Subcommand)]
pub enum TemplateCommands {
    Create {
        /// Hex secret key of the acting principal
        #[arg(long)]
        secret: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        duration: u64,
        /// <target>:<selector> pairs; omit for allow-all
        #[arg(long)]
        scope: Vec<String>,
    },
    /// Activate or (with --deactivate) deactivate a template
    Activate {
        /// Hex secret key of the acting principal
        #[arg(long)]
        secret: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        deactivate: bool,
    },
    List,
    /// Provision a session key on every account registered under the
    /// master whose secret is given
    Apply {
        /// Hex secret key of the master
        #[arg(long)]
        secret: String,
        #[arg(long)]
        key: Address,
        #[arg(long)]
        name: String,
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Revoke a session key on every account registered under the master
    /// whose secret is given
    Revoke {
        /// Hex secret key of the master
        #[arg(long)]
        secret: String,
        #[arg(long)]
        key: Address,
    },
}

fn permissions_from(scopes: &[String]) -> CustodyResult<SessionPermissions> {
    if scopes.is_empty() {
        return Ok(SessionPermissions::AllowAll);
    }
    let pairs = scopes
        .iter()
        .map(|s| parse_scope(s))
        .collect::<Result<Vec<_>, _>>()
        .map_err(CustodyError::Config)?;
    Ok(SessionPermissions::scoped(pairs))
}

/// The caller is whoever holds the secret, never a bare address
fn signer_address(secret: &str) -> CustodyResult<Address> {
    KeyPair::from_secret_hex(secret)
        .map(|keys| keys.address())
        .map_err(CustodyError::Config)
}

fn to_json<T: serde::Serialize>(value: &T) -> CustodyResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| CustodyError::Serialization(e.to_string()))
}

/// Load the stored state, apply `f`, and persist the result
fn with_state<F>(config: &CustodyConfig, f: F) -> CustodyResult<()>
where
    F: FnOnce(&mut CustodyState, u64) -> CustodyResult<()>,
{
    let storage = Storage::open(&config.node.db_path)?;
    let mut state = storage
        .load_state()?
        .ok_or_else(|| CustodyError::Config("No registry found. Run `custody init` first.".to_string()))?;
    f(&mut state, SystemClock.now())?;
    storage.save_state(&state)
}

fn read_state(config: &CustodyConfig) -> CustodyResult<CustodyState> {
    Storage::open(&config.node.db_path)?
        .load_state()?
        .ok_or_else(|| CustodyError::Config("No registry found. Run `custody init` first.".to_string()))
}

pub fn handle_init(config: &CustodyConfig, owner: Address) -> CustodyResult<()> {
    if owner.is_zero() {
        return Err(CustodyError::InvalidPrincipal);
    }
    let storage = Storage::open(&config.node.db_path)?;
    if storage.load_state()?.is_some() {
        return Err(CustodyError::Config(format!(
            "Registry already exists at '{}'",
            config.node.db_path
        )));
    }
    let state = CustodyState::new(config.aggregation_config(), owner, config.node.event_capacity);
    storage.save_state(&state)?;
    println!("Registry initialized. Owner: {}", owner);
    Ok(())
}

pub fn handle_master_command(config: &CustodyConfig, cmd: MasterCommands) -> CustodyResult<()> {
    match cmd {
        MasterCommands::Authorize { secret, master, revoke } => {
            let caller = signer_address(&secret)?;
            with_state(config, |state, now| state.set_master_authorization(caller, master, !revoke, now))?;
            println!("Master {} {}", master, if revoke { "deauthorized" } else { "authorized" });
        }
        MasterCommands::List => {
            let state = read_state(config)?;
            let registry = state.registry();
            for master in registry.authorized_masters() {
                println!(
                    "Master: {}\tNonce: {}\tAccounts: {}",
                    master,
                    registry.nonce(master),
                    registry.controlled_accounts(master).len()
                );
            }
        }
    }
    Ok(())
}

pub fn handle_wallet_command(config: &CustodyConfig, cmd: WalletCommands) -> CustodyResult<()> {
    match cmd {
        WalletCommands::Assign { secret, master, accounts, release } => {
            let caller = signer_address(&secret)?;
            with_state(config, |state, now| {
                state.batch_set_wallet_authorization(caller, master, &accounts, !release, now)
            })?;
            println!(
                "{} account(s) {} master {}",
                accounts.len(),
                if release { "released from" } else { "assigned to" },
                master
            );
        }
        WalletCommands::Resolve { account } => {
            let state = read_state(config)?;
            match state.resolve_master(&account) {
                Some(master) => println!("{}", master),
                None => println!("Account {} has no controlling master", account),
            }
        }
    }
    Ok(())
}

pub fn handle_account_command(config: &CustodyConfig, cmd: AccountCommands) -> CustodyResult<()> {
    match cmd {
        AccountCommands::Create { address, owner, master } => {
            with_state(config, |state, now| state.create_account(address, owner, master, now))?;
            println!("Account {} created. Owner: {}", address, owner);
        }
        AccountCommands::Register { secret, master, account, remove } => {
            let caller = signer_address(&secret)?;
            with_state(config, |state, now| {
                if remove {
                    state.unregister_account(caller, master, account, now)
                } else {
                    state.register_account(caller, master, account, now)
                }
            })?;
            println!("Account {} {} under {}", account, if remove { "unregistered" } else { "registered" }, master);
        }
        AccountCommands::AddSessionKey { account, secret, key, duration, scope } => {
            let caller = signer_address(&secret)?;
            let permissions = permissions_from(&scope)?;
            with_state(config, |state, now| {
                state.add_session_key(account, caller, key, now, now.saturating_add(duration), permissions, now)
            })?;
            println!("Session key {} added to {}", key, account);
        }
        AccountCommands::RevokeSessionKey { account, secret, key } => {
            let caller = signer_address(&secret)?;
            with_state(config, |state, now| state.revoke_session_key(account, caller, key, now))?;
            println!("Session key {} revoked on {}", key, account);
        }
        AccountCommands::Show { address } => {
            let state = read_state(config)?;
            println!("{}", to_json(state.account(&address)?)?);
        }
        AccountCommands::List => {
            let state = read_state(config)?;
            for address in state.accounts().addresses() {
                let master = state.resolve_master(&address);
                println!(
                    "{}\tMaster: {}",
                    address,
                    master.map_or_else(|| "-".to_string(), |m| m.to_string())
                );
            }
        }
    }
    Ok(())
}

pub fn handle_template_command(config: &CustodyConfig, cmd: TemplateCommands) -> CustodyResult<()> {
    match cmd {
        TemplateCommands::Create { secret, name, duration, scope } => {
            let caller = signer_address(&secret)?;
            let permissions = permissions_from(&scope)?;
            with_state(config, |state, now| {
                state.create_template(caller, &name, duration, permissions, now).map(|_| ())
            })?;
            println!("Template '{}' created ({}s)", name, duration);
        }
        TemplateCommands::Activate { secret, name, deactivate } => {
            let caller = signer_address(&secret)?;
            with_state(config, |state, now| state.set_template_active(caller, &name, !deactivate, now))?;
            println!("Template '{}' {}", name, if deactivate { "deactivated" } else { "activated" });
        }
        TemplateCommands::List => {
            let state = read_state(config)?;
            for t in state.registrar().catalog().templates() {
                let scope = match &t.permissions {
                    SessionPermissions::AllowAll => "allow-all".to_string(),
                    SessionPermissions::Scoped(s) => format!("{} scope(s)", s.len()),
                };
                println!("Name: {}\tDuration: {}s\tActive: {}\tPermissions: {}", t.name, t.default_duration, t.active, scope);
            }
        }
        TemplateCommands::Apply { secret, key, name, duration } => {
            let master = signer_address(&secret)?;
            let mut updated = 0;
            with_state(config, |state, now| {
                updated = state.add_session_key_with_template(master, master, key, &name, duration, now)?;
                Ok(())
            })?;
            println!("Session key {} provisioned on {} account(s)", key, updated);
        }
        TemplateCommands::Revoke { secret, key } => {
            let master = signer_address(&secret)?;
            let mut revoked = 0;
            with_state(config, |state, now| {
                revoked = state.batch_revoke_session_key(master, master, key, now)?;
                Ok(())
            })?;
            println!("Session key {} revoked on {} account(s)", key, revoked);
        }
    }
    Ok(())
}

pub fn handle_status(config: &CustodyConfig) -> CustodyResult<()> {
    let state = read_state(config)?;
    let registry = state.registry();
    let engine_config = state.engine().config();
    println!("Registry owner:     {}", registry.owner());
    println!("Chain id:           {}", engine_config.chain_id);
    println!("Aggregator id:      {}", engine_config.aggregator_id);
    println!("Max batch size:     {}", engine_config.max_batch_size);
    println!("Accounts:           {}", state.accounts().len());
    println!("Authorized masters: {}", registry.authorized_masters().len());
    println!("Templates:          {}", state.registrar().catalog().templates().len());
    println!("Events recorded:    {}", state.events().len());
    Ok(())
}

pub fn handle_events(config: &CustodyConfig, limit: usize) -> CustodyResult<()> {
    let state = read_state(config)?;
    for record in state.events().recent(limit) {
        println!("#{} @{} {}", record.seq, record.at, to_json(&record.event)?);
    }
    Ok(())
}
