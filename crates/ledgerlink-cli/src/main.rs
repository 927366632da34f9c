//! Ledgerlink CLI - Token Service client with delegated sessions

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ledgerlink_core::amount::{self, AmountUnits};
use ledgerlink_core::config::Config;
use ledgerlink_core::gateway::{ApiClient, AuthGateway};
use ledgerlink_core::infrastructure::security::KeyringDelegationStore;
use ledgerlink_core::operations::{CreateTokenRequest, Executor, IcpLedger, TokenService};
use ledgerlink_core::session::{
    ConnectOutcome, ImportedDelegationProvider, ProviderKey, SessionManager,
};
use serde::Serialize;
use tracing::debug;

#[derive(Parser)]
#[command(name = "ledgerlink")]
#[command(author, version, about = "Token Service client with delegated sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert between decimal amounts and base units
    Amount {
        #[command(subcommand)]
        action: AmountAction,
    },

    /// Connect by importing a delegation chain
    Connect {
        /// Identity provider (internet_identity or nfid)
        #[arg(short, long, default_value = "internet_identity")]
        provider: String,
        /// Delegation chain JSON file
        #[arg(short, long)]
        import: PathBuf,
    },

    /// End the current session
    Disconnect,

    /// Show session status
    Status,

    /// Token Service operations
    Tokens {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Token balance of an owner
    Balance {
        /// Token ID
        token_id: String,
        /// Owner principal
        owner: String,
    },

    /// ICP ledger operations
    Icp {
        #[command(subcommand)]
        action: IcpAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum AmountAction {
    /// Decimal amount to base units
    Encode { decimal: String },
    /// Base units to decimal amount
    Decode { units: String },
}

#[derive(Subcommand)]
enum TokenAction {
    /// List tokens
    List,
    /// Show a token
    Get { id: String },
    /// Search tokens by name or symbol
    Search { query: String },
    /// Create a token
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        symbol: String,
        /// Initial supply as a decimal amount
        #[arg(long)]
        supply: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        logo_url: Option<String>,
    },
    /// Mint tokens to a principal
    Mint {
        id: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: String,
    },
    /// Burn tokens held by the connected principal
    Burn {
        id: String,
        #[arg(long)]
        amount: String,
    },
    /// Transfer tokens to a principal
    Transfer {
        id: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: String,
        #[arg(long)]
        memo: Option<String>,
    },
    /// Reconcile a token with its canister
    Sync { id: String },
    /// Transaction history of a token
    Transactions { id: String },
}

#[derive(Subcommand)]
enum IcpAction {
    /// ICP balance of a principal or account id
    Balance { account: String },
    /// Transfer ICP
    Transfer {
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: String,
        #[arg(long)]
        memo: Option<u64>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

/// Everything a network command needs
struct App {
    session: SessionManager,
    provider: Arc<ImportedDelegationProvider>,
    tokens: TokenService,
    icp: IcpLedger,
}

impl App {
    async fn start() -> anyhow::Result<Self> {
        let config = Config::load()?;

        let provider = Arc::new(ImportedDelegationProvider::new(Arc::new(
            KeyringDelegationStore::new(),
        )));
        let session = SessionManager::with_provider(provider.clone(), config.session.clone());
        let state = session.initialize().await;
        debug!(state = %state, "Session initialized");

        let client = ApiClient::new(&config.api)?;
        let gateway = AuthGateway::new(session.clone(), client);
        let exec = Executor::new(gateway, config.retry.clone());

        Ok(Self {
            session,
            provider,
            tokens: TokenService::new(exec.clone()),
            icp: IcpLedger::new(exec),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ledgerlink=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let out = Output {
        format: cli.format,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Amount { action } => cmd_amount(action, out),
        Commands::Config { action } => cmd_config(action, out),
        Commands::Connect { provider, import } => cmd_connect(&provider, &import, out).await,
        Commands::Disconnect => {
            let app = App::start().await?;
            app.session.disconnect().await;
            out.message("Disconnected.");
            Ok(())
        }
        Commands::Status => {
            let app = App::start().await?;
            let info = app.session.info();
            out.emit(&info, |info| match &info.principal {
                Some(principal) => format!("{} as {}", info.state, principal),
                None => info.state.to_string(),
            })
        }
        Commands::Tokens { action } => cmd_tokens(action, out).await,
        Commands::Balance { token_id, owner } => {
            let app = App::start().await?;
            let balance = app.tokens.get_balance(&token_id, &owner).await?;
            out.emit(&balance, |b| format!("{} ({} units)", b.formatted(), b.balance))
        }
        Commands::Icp { action } => cmd_icp(action, out).await,
    }
}

// ============================================================================
// Output
// ============================================================================

#[derive(Clone, Copy)]
struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T) -> String) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Text => println!("{}", text(value)),
        }
        Ok(())
    }

    fn message(&self, text: &str) {
        if !self.quiet && self.format == OutputFormat::Text {
            println!("{}", text);
        }
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

#[derive(Serialize)]
struct Conversion {
    decimal: String,
    units: AmountUnits,
}

fn cmd_amount(action: AmountAction, out: Output) -> anyhow::Result<()> {
    let conversion = match action {
        AmountAction::Encode { decimal } => {
            let units = amount::encode(&decimal)?;
            Conversion {
                decimal: amount::decode(&units),
                units,
            }
        }
        AmountAction::Decode { units } => {
            let units: AmountUnits = units.parse()?;
            Conversion {
                decimal: amount::decode(&units),
                units,
            }
        }
    };

    out.emit(&conversion, |c| match out.quiet {
        true => c.units.to_string(),
        false => format!("{} = {} units", c.decimal, c.units),
    })
}

async fn cmd_connect(provider: &str, import: &PathBuf, out: Output) -> anyhow::Result<()> {
    let key: ProviderKey = provider.parse()?;
    let document = std::fs::read_to_string(import)
        .with_context(|| format!("Failed to read delegation file: {}", import.display()))?;

    let app = App::start().await?;
    if app.session.is_connected() {
        app.session.disconnect().await;
    }

    app.provider.stage(document);
    match app.session.connect(key).await? {
        ConnectOutcome::Connected(principal) => {
            out.emit(&app.session.info(), |_| format!("Connected as {}", principal))
        }
        ConnectOutcome::Cancelled => {
            out.message("Login cancelled.");
            Ok(())
        }
    }
}

async fn cmd_tokens(action: TokenAction, out: Output) -> anyhow::Result<()> {
    let app = App::start().await?;
    let tokens = &app.tokens;

    match action {
        TokenAction::List => {
            let list = tokens.list_tokens().await?;
            out.emit(&list, |list| {
                list.iter()
                    .map(|t| format!("{}  {:<8} {}", t.id, t.symbol, t.name))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        TokenAction::Get { id } => {
            let token = tokens.get_token(&id).await?;
            out.emit(&token, |t| {
                format!(
                    "{} ({})\n  id: {}\n  supply: {}",
                    t.name,
                    t.symbol,
                    t.id,
                    t.formatted_supply()
                )
            })
        }
        TokenAction::Search { query } => {
            let found = tokens.search_tokens(&query).await?;
            out.emit(&found, |found| {
                found
                    .iter()
                    .map(|t| format!("{}  {:<8} {}", t.id, t.symbol, t.name))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        TokenAction::Create {
            name,
            symbol,
            supply,
            description,
            logo_url,
        } => {
            let token = tokens
                .create_token(CreateTokenRequest {
                    name,
                    symbol,
                    initial_supply: supply,
                    description,
                    logo_url,
                })
                .await?;
            out.emit(&token, |t| format!("Created token {} ({})", t.id, t.symbol))
        }
        TokenAction::Mint { id, to, amount } => {
            let receipt = tokens.mint(&id, &to, &amount).await?;
            out.emit(&receipt, |r| format!("Minted, transaction {}", r.transaction_id))
        }
        TokenAction::Burn { id, amount } => {
            let receipt = tokens.burn(&id, &amount).await?;
            out.emit(&receipt, |r| format!("Burned, transaction {}", r.transaction_id))
        }
        TokenAction::Transfer {
            id,
            to,
            amount,
            memo,
        } => {
            let receipt = tokens.transfer(&id, &to, &amount, memo.as_deref()).await?;
            out.emit(&receipt, |r| {
                format!("Transferred, transaction {}", r.transaction_id)
            })
        }
        TokenAction::Sync { id } => {
            let status = tokens.sync_with_canister(&id).await?;
            out.emit(&status, |s| match s.synced {
                true => format!("Token {} is in sync", s.token_id),
                false => format!("Token {} could not be synced", s.token_id),
            })
        }
        TokenAction::Transactions { id } => {
            let records = tokens.get_transactions(&id).await?;
            out.emit(&records, |records| {
                records
                    .iter()
                    .map(|r| {
                        format!(
                            "{}  {:<8} {}",
                            r.id,
                            r.kind,
                            amount::decode(&r.amount)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
    }
}

async fn cmd_icp(action: IcpAction, out: Output) -> anyhow::Result<()> {
    let app = App::start().await?;

    match action {
        IcpAction::Balance { account } => {
            let balance = app.icp.get_balance(&account).await?;
            out.emit(&balance, |b| format!("{} ICP", b.formatted()))
        }
        IcpAction::Transfer { to, amount, memo } => {
            let receipt = app.icp.perform_transfer(&to, &amount, memo).await?;
            out.emit(&receipt, |r| {
                format!("Transferred, block height {}", r.block_height)
            })
        }
    }
}

fn cmd_config(action: ConfigAction, out: Output) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            out.message(&format!("Set {} = {}", key, value));
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            out.message("Configuration reset to defaults.");
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_transfer_args() {
        let cli = Cli::try_parse_from([
            "ledgerlink",
            "--format",
            "json",
            "tokens",
            "transfer",
            "tok-1",
            "--to",
            "aaaaa-aa",
            "--amount",
            "1.5",
        ])
        .unwrap();

        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Tokens {
                action: TokenAction::Transfer { id, amount, memo, .. },
            } => {
                assert_eq!(id, "tok-1");
                assert_eq!(amount, "1.5");
                assert!(memo.is_none());
            }
            _ => panic!("expected tokens transfer"),
        }
    }

    #[test]
    fn test_connect_requires_import() {
        assert!(Cli::try_parse_from(["ledgerlink", "connect"]).is_err());
    }
}
