//! Subcommand handlers. Command output goes to stdout; diagnostics go
//! through `tracing` to stderr.

use anyhow::{bail, Context as _};
use std::sync::Arc;
use std::time::Duration;
use tessera_types::WalletAddress;
use tessera_utils::format_duration;
use tessera_wallet_core::{
    available_actions, AgreementId, ChainView, FileWalletStore, HttpAuthority, Identity,
    KdfParams, LedgerAuthority, MiningStatus, TransactionSelection, Verification,
    VerificationRequest, WalletRecord, WalletSession, WalletStore,
};
use tokio::signal;

use crate::{Command, Context, DifficultyAction, EscrowCommand, WalletAction};

pub async fn run(ctx: &Context, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Wallet { action } => wallet(ctx, action).await,
        Command::Balance => {
            let session = open(ctx, Access::WatchOnly)?;
            let balance = session.balance().refresh().await?;
            println!("{} {}", session.address(), balance);
            Ok(())
        }
        Command::Send {
            recipient,
            amount,
            fee,
        } => {
            let session = open(ctx, Access::Signing)?;
            let message = session
                .send(&WalletAddress::new(recipient), amount, fee)
                .await?;
            println!("{message}");
            Ok(())
        }
        Command::Chain => {
            let session = open(ctx, Access::WatchOnly)?;
            session.chain().refresh().await?;
            for block in session.chain().blocks().await {
                println!(
                    "#{:<4} {} txs  nonce {}  {}",
                    block.index,
                    block.transactions.len(),
                    block.nonce.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
                    block.hash.as_deref().unwrap_or("-"),
                );
            }
            Ok(())
        }
        Command::Mempool => {
            let session = open(ctx, Access::WatchOnly)?;
            let snapshot = session.mempool().refresh().await?;
            println!("block reward {}", snapshot.block_reward);
            for (i, tx) in snapshot.transactions.iter().enumerate() {
                println!(
                    "[{i}] {} -> {}  amount {}  fee {}",
                    tx.sender.short(),
                    tx.recipient.short(),
                    tx.amount,
                    tx.fee
                );
            }
            Ok(())
        }
        Command::Mine { transactions } => mine(ctx, &transactions).await,
        Command::Escrow { action } => escrow(ctx, action).await,
        Command::Difficulty { action } => {
            let authority = authority(ctx)?;
            match action {
                DifficultyAction::Get => println!("{}", authority.difficulty().await?),
                DifficultyAction::Set { value } => {
                    authority.set_difficulty(value).await?;
                    println!("difficulty set to {value}");
                }
            }
            Ok(())
        }
        Command::Watch => watch(ctx).await,
        Command::Verify {
            block,
            sender,
            recipient,
            amount,
            fee,
            signature,
            public_key,
            contract,
        } => {
            let recipient = WalletAddress::new(recipient);
            let request = if contract {
                VerificationRequest::contract_transfer(block, recipient, amount, fee)
            } else {
                let sender = match sender {
                    Some(raw) => WalletAddress::new(raw),
                    None => identity(ctx, Access::WatchOnly)?.address().clone(),
                };
                VerificationRequest::transfer(
                    block, sender, recipient, amount, fee, signature, public_key,
                )
            };
            let chain = ChainView::new(authority(ctx)?);
            match chain.verify(&request).await? {
                Verification::Valid => println!("valid"),
                Verification::Invalid => println!("invalid"),
            }
            Ok(())
        }
    }
}

// ── Wiring ──────────────────────────────────────────────────────────────

enum Access {
    WatchOnly,
    Signing,
}

fn authority(ctx: &Context) -> anyhow::Result<Arc<dyn LedgerAuthority>> {
    Ok(Arc::new(HttpAuthority::new(&ctx.config)?))
}

fn store(ctx: &Context) -> FileWalletStore {
    FileWalletStore::new(&ctx.config.wallet_store)
}

fn password(ctx: &Context) -> anyhow::Result<&str> {
    match ctx.password.as_deref() {
        Some(p) if !p.is_empty() => Ok(p),
        _ => bail!("a keystore password is required (--password or TESSERA_PASSWORD)"),
    }
}

fn identity(ctx: &Context, access: Access) -> anyhow::Result<Identity> {
    let store = store(ctx);
    let address = match &ctx.wallet {
        Some(raw) => WalletAddress::new(raw.as_str()),
        None => store
            .active()?
            .context("no active wallet; run `tessera wallet new` or pass --wallet")?,
    };
    match access {
        Access::WatchOnly => Ok(Identity::watch_only(address)),
        Access::Signing => {
            let record = store
                .get(&address)?
                .with_context(|| format!("wallet {address} is not in the local store"))?;
            Ok(record.unlock(password(ctx)?)?)
        }
    }
}

fn open(ctx: &Context, access: Access) -> anyhow::Result<WalletSession> {
    let identity = identity(ctx, access)?;
    Ok(WalletSession::new(authority(ctx)?, identity, &ctx.config))
}

// ── Wallets ─────────────────────────────────────────────────────────────

async fn wallet(ctx: &Context, action: WalletAction) -> anyhow::Result<()> {
    let store = store(ctx);
    match action {
        WalletAction::New { label } => {
            let password = password(ctx)?;
            let generated = authority(ctx)?.generate_wallet().await?;
            let record = WalletRecord::seal(&generated, label, password, KdfParams::default())?;
            store.put(record)?;
            tracing::info!(address = %generated.address.short(), "wallet stored");
            println!("{}", generated.address);
        }
        WalletAction::List => {
            let active = store.active()?;
            for record in store.list()? {
                let marker = if active.as_ref() == Some(&record.address) { "*" } else { " " };
                println!(
                    "{marker} {}  {}",
                    record.address,
                    record.label.as_deref().unwrap_or("")
                );
            }
        }
        WalletAction::Use { address } => {
            let address = WalletAddress::new(address);
            store.set_active(&address)?;
            println!("active wallet: {address}");
        }
    }
    Ok(())
}

// ── Escrow ──────────────────────────────────────────────────────────────

async fn escrow(ctx: &Context, action: EscrowCommand) -> anyhow::Result<()> {
    if let EscrowCommand::List = action {
        let session = open(ctx, Access::WatchOnly)?;
        session.agreements().refresh().await?;
        let address = session.address().clone();
        for agreement in session.agreements().all().await {
            let steps = available_actions(&agreement, &address);
            let steps: Vec<&str> = steps.iter().map(|a| a.as_str()).collect();
            println!(
                "{}  {}  {} -> {}  {}  \"{}\"  [{}]",
                agreement.id,
                agreement.status,
                agreement.buyer.short(),
                agreement.seller.short(),
                agreement.amount,
                agreement.description,
                steps.join(", "),
            );
        }
        return Ok(());
    }

    let session = open(ctx, Access::Signing)?;
    // Transitions are guarded against the cached agreement.
    session.agreements().refresh().await?;
    let identity = session.identity();
    let escrow = session.escrow();
    let receipt = match action {
        EscrowCommand::Create {
            seller,
            amount,
            description,
        } => {
            let id = escrow
                .create(identity, &WalletAddress::new(seller), amount, &description)
                .await?;
            println!("agreement {id} created");
            return Ok(());
        }
        EscrowCommand::ConfirmSeller { id } => {
            escrow.confirm_seller(identity, &AgreementId::new(id)).await?
        }
        EscrowCommand::Ship { id, tracking_info } => {
            escrow
                .confirm_shipment(identity, &AgreementId::new(id), &tracking_info)
                .await?
        }
        EscrowCommand::Deliver { id } => {
            escrow.confirm_delivery(identity, &AgreementId::new(id)).await?
        }
        EscrowCommand::Dispute { id, reason } => {
            escrow
                .open_dispute(identity, &AgreementId::new(id), &reason)
                .await?
        }
        EscrowCommand::List => return Ok(()),
    };
    println!("{}", receipt.message.as_deref().unwrap_or("ok"));
    Ok(())
}

// ── Mining ──────────────────────────────────────────────────────────────

async fn mine(ctx: &Context, transactions: &[usize]) -> anyhow::Result<()> {
    let session = open(ctx, Access::WatchOnly)?;
    let snapshot = session.mempool().refresh().await?;

    let mut preview = TransactionSelection::new();
    for &i in transactions {
        preview.toggle(i);
    }
    println!(
        "expected reward {}",
        preview.total_reward(snapshot.block_reward, &snapshot.transactions)
    );

    let mining = session.mining();
    let mut rx = mining.subscribe();
    mining.submit(session.address(), transactions).await?;

    loop {
        let job = rx.borrow_and_update().clone();
        let elapsed = job.elapsed().map(format_duration).unwrap_or_default();
        match job.status {
            MiningStatus::Completed => {
                println!(
                    "block mined in {elapsed}: nonce {} hash {}",
                    job.final_nonce.unwrap_or_default(),
                    job.final_hash.as_deref().unwrap_or("-"),
                );
                if let Some(balance) = session.balance().current().await {
                    println!("balance {balance}");
                }
                return Ok(());
            }
            MiningStatus::Error => {
                let reason = job.error.map(|e| e.to_string()).unwrap_or_default();
                bail!("mining failed: {reason}");
            }
            status => {
                if let (Some(nonce), Some(hash)) = (job.nonce, job.hash.as_deref()) {
                    println!("{status} {elapsed}  nonce {nonce}  {hash}");
                }
            }
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    bail!("mining orchestrator stopped");
                }
            }
            _ = signal::ctrl_c() => {
                tracing::info!("interrupted; the authority keeps mining the submitted job");
                return Ok(());
            }
        }
    }
}

// ── Watch ───────────────────────────────────────────────────────────────

async fn watch(ctx: &Context) -> anyhow::Result<()> {
    let mut session = open(ctx, Access::WatchOnly)?;
    session.start();

    let mut report = tokio::time::interval(Duration::from_secs(1));
    let mut last = None;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = report.tick() => {
                let current = (
                    session.balance().current().await,
                    session.chain().height().await,
                    session.mempool().snapshot().await.map(|s| s.len()),
                    session.agreements().len().await,
                );
                if last.as_ref() != Some(&current) {
                    let (balance, height, pending, agreements) = &current;
                    tracing::info!(
                        balance = %balance.map(|b| b.to_string()).unwrap_or_else(|| "-".into()),
                        height,
                        pending = pending.unwrap_or(0),
                        agreements,
                        "wallet state changed"
                    );
                    last = Some(current);
                }
            }
        }
    }

    session.logout().await;
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { tracing::info!("received SIGINT, shutting down"); }
        _ = terminate => { tracing::info!("received SIGTERM, shutting down"); }
    }
}
