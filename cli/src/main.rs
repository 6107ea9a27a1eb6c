//! Tessera command line wallet.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tessera_types::Amount;
use tessera_utils::LogFormat;
use tessera_wallet_core::ClientConfig;

#[derive(Parser)]
#[command(name = "tessera", about = "Wallet client for a Tessera ledger authority")]
struct Cli {
    /// Base URL of the ledger authority.
    #[arg(long, env = "TESSERA_AUTHORITY")]
    authority: Option<String>,

    /// Wallet store file.
    #[arg(long, env = "TESSERA_WALLET_STORE")]
    wallet_store: Option<PathBuf>,

    /// Act as this wallet instead of the active one.
    #[arg(long, env = "TESSERA_WALLET")]
    wallet: Option<String>,

    /// Password protecting the wallet's keystore.
    #[arg(long, env = "TESSERA_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "TESSERA_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "TESSERA_LOG_FORMAT")]
    log_format: Option<String>,

    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "TESSERA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
pub enum Command {
    /// Manage local wallets.
    Wallet {
        #[command(subcommand)]
        action: WalletAction,
    },
    /// Show the wallet's confirmed balance.
    Balance,
    /// Queue a transfer from the wallet.
    Send {
        recipient: String,
        amount: Amount,
        #[arg(long, default_value = "0")]
        fee: Amount,
    },
    /// Show the canonical chain.
    Chain,
    /// Show pending transactions and the current block reward.
    Mempool,
    /// Mine a block with up to three pending transactions.
    Mine {
        /// Mempool indices to include (repeatable, at most three).
        #[arg(long = "tx", required = true)]
        transactions: Vec<usize>,
    },
    /// Escrow agreements.
    Escrow {
        #[command(subcommand)]
        action: EscrowCommand,
    },
    /// Read or change the mining difficulty.
    Difficulty {
        #[command(subcommand)]
        action: DifficultyAction,
    },
    /// Keep the wallet views refreshed and log changes until interrupted.
    Watch,
    /// Check that a signed transaction is recorded in a block.
    Verify {
        /// Index of the block that should hold the transaction.
        block: u64,
        #[arg(long)]
        sender: Option<String>,
        #[arg(long)]
        recipient: String,
        #[arg(long)]
        amount: Amount,
        #[arg(long, default_value = "0")]
        fee: Amount,
        /// Hex signature of the transaction.
        #[arg(long, default_value = "")]
        signature: String,
        /// The sender's public key.
        #[arg(long, default_value = "")]
        public_key: String,
        /// Verify a payout made by the escrow contract instead of a user.
        #[arg(long, conflicts_with_all = ["sender", "signature", "public_key"])]
        contract: bool,
    },
}

#[derive(clap::Subcommand)]
pub enum WalletAction {
    /// Ask the authority for a new wallet and store it locally.
    New {
        #[arg(long)]
        label: Option<String>,
    },
    /// List stored wallets.
    List,
    /// Make a stored wallet the active one.
    Use { address: String },
}

#[derive(clap::Subcommand)]
pub enum EscrowCommand {
    /// Open an agreement as buyer.
    Create {
        seller: String,
        amount: Amount,
        description: String,
    },
    /// List agreements involving the wallet with the steps it can take.
    List,
    /// Accept an agreement as seller.
    ConfirmSeller { id: String },
    /// Mark the goods shipped as seller.
    Ship { id: String, tracking_info: String },
    /// Confirm receipt as buyer, releasing the funds.
    Deliver { id: String },
    /// Dispute an agreement as buyer.
    Dispute {
        id: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
}

#[derive(clap::Subcommand)]
pub enum DifficultyAction {
    Get,
    Set { value: u32 },
}

/// Global flags after they have been folded into the configuration.
pub struct Context {
    pub config: ClientConfig,
    pub wallet: Option<String>,
    pub password: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file_config = match cli.config {
        Some(ref path) => Some(ClientConfig::from_toml_file(&path.to_string_lossy())?),
        None => None,
    };

    let base = file_config.unwrap_or_default();
    let config = ClientConfig {
        authority_url: cli.authority.unwrap_or(base.authority_url),
        wallet_store: cli.wallet_store.unwrap_or(base.wallet_store),
        log_level: cli.log_level.unwrap_or(base.log_level),
        log_format: cli.log_format.unwrap_or(base.log_format),
        ..base
    };
    config.validate()?;

    let format: LogFormat = config.log_format.parse()?;
    tessera_utils::init_logging(format, &config.log_level);
    if let Some(path) = &cli.config {
        tracing::debug!("Loaded config from {}", path.display());
    }

    let ctx = Context {
        config,
        wallet: cli.wallet,
        password: cli.password,
    };
    commands::run(&ctx, cli.command).await
}
