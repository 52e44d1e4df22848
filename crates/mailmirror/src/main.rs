//! `MailMirror` - headless mailbox mirror.
//!
//! Mirrors a spool directory into local snapshots, replays deferred
//! actions and sends templated mail.

#![forbid(unsafe_code)]

mod spool;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mailmirror_core::backlog::read_pending;
use mailmirror_core::{
    AccountContext, AccountId, ActionKind, ActionOutcome, EngineConfig, MailboxRole, MessageId,
    SnapshotStore, TemplateMessage,
};
use spool::SpoolStore;

#[derive(Debug, Parser)]
#[command(
    name = "mailmirror",
    version,
    about = "Mirror a mail store locally, replay deferred actions, send templated mail"
)]
struct Cli {
    /// Configuration file (JSON). Defaults to the user config directory.
    #[arg(long, env = "MAILMIRROR_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory for snapshots and the backlog. Overrides the config file.
    #[arg(long, env = "MAILMIRROR_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Account identifier.
    #[arg(long, default_value_t = 1, global = true)]
    account: i64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct Spool {
    /// Spool directory acting as the remote store.
    #[arg(long, env = "MAILMIRROR_SPOOL")]
    spool: PathBuf,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll mailboxes and replay deferred actions until interrupted.
    Sync {
        #[command(flatten)]
        spool: Spool,
        /// Mailboxes to poll (default, drafts, sent, spam, bin). All if omitted.
        #[arg(long = "role", value_name = "ROLE")]
        roles: Vec<MailboxRole>,
    },
    /// Send a templated message, one dispatch per group of equal values.
    Send {
        #[command(flatten)]
        spool: Spool,
        /// Template message as JSON.
        template: PathBuf,
    },
    /// Mark a message as read.
    MarkRead {
        #[command(flatten)]
        spool: Spool,
        #[arg(long, default_value = "default")]
        role: MailboxRole,
        id: String,
    },
    /// Move an inbox message to spam.
    MarkSpam {
        #[command(flatten)]
        spool: Spool,
        id: String,
    },
    /// Move a spam message back to the inbox.
    UnmarkSpam {
        #[command(flatten)]
        spool: Spool,
        id: String,
    },
    /// Move a message out of the bin back to the inbox.
    Restore {
        #[command(flatten)]
        spool: Spool,
        id: String,
    },
    /// Move a message to the bin, or purge it when already there.
    Delete {
        #[command(flatten)]
        spool: Spool,
        #[arg(long, default_value = "default")]
        role: MailboxRole,
        id: String,
    },
    /// Show snapshot sizes and pending actions.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailmirror=info,mailmirror_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli).await?;
    let account = AccountId::new(cli.account);

    info!("Starting MailMirror for account {}", account);

    match cli.command {
        Command::Sync { spool, roles } => sync(config, account, &spool.spool, roles).await,
        Command::Send { spool, template } => send(config, account, &spool.spool, &template).await,
        Command::MarkRead { spool, role, id } => {
            act(config, account, &spool.spool, ActionKind::MarkRead, role, id).await
        }
        Command::MarkSpam { spool, id } => {
            let role = MailboxRole::Default;
            act(config, account, &spool.spool, ActionKind::MarkSpam, role, id).await
        }
        Command::UnmarkSpam { spool, id } => {
            let role = MailboxRole::Spam;
            act(config, account, &spool.spool, ActionKind::UnmarkSpam, role, id).await
        }
        Command::Restore { spool, id } => {
            let role = MailboxRole::Bin;
            act(config, account, &spool.spool, ActionKind::Restore, role, id).await
        }
        Command::Delete { spool, role, id } => {
            act(config, account, &spool.spool, ActionKind::Delete, role, id).await
        }
        Command::Status => status(&config, account).await,
    }
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailmirror")
        .join("config.json")
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailmirror")
}

/// Resolve configuration: flags, then the config file, then user directories.
async fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let path = cli.config.clone().unwrap_or_else(default_config_path);
    let file_exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
    let mut config = EngineConfig::load(&path)
        .await
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    if let Some(data_dir) = &cli.data_dir {
        config.data_dir.clone_from(data_dir);
    } else if !file_exists {
        config.data_dir = default_data_dir();
    }
    Ok(config)
}

async fn open(
    config: EngineConfig,
    account: AccountId,
    spool: &Path,
) -> Result<AccountContext<SpoolStore>> {
    let remote = Arc::new(SpoolStore::new(spool));
    AccountContext::open(config, account, remote)
        .await
        .context("Failed to open account")
}

async fn sync(
    config: EngineConfig,
    account: AccountId,
    spool: &Path,
    roles: Vec<MailboxRole>,
) -> Result<()> {
    let roles = if roles.is_empty() {
        MailboxRole::ALL.to_vec()
    } else {
        roles
    };

    let context = open(config, account, spool).await?;
    let (tx, mut rx) = mpsc::channel(64);
    let handles: Vec<_> = roles
        .iter()
        .map(|role| context.watch(*role, tx.clone()))
        .collect();
    drop(tx);

    info!("Watching {} mailbox(es) in {}", handles.len(), spool.display());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            delta = rx.recv() => {
                let Some(delta) = delta else { break };
                for message in &delta.added {
                    println!("{} + {} {}", delta.role, message.id, message.header.subject);
                }
                for id in &delta.removed {
                    println!("{} - {}", delta.role, id);
                }
            }
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Interrupted");
                break;
            }
        }
    }

    for handle in handles {
        handle.cancel().await;
    }
    context.shutdown().await;
    Ok(())
}

async fn send(
    config: EngineConfig,
    account: AccountId,
    spool: &Path,
    template: &Path,
) -> Result<()> {
    let contents = tokio::fs::read_to_string(template)
        .await
        .with_context(|| format!("Failed to read {}", template.display()))?;
    let message: TemplateMessage = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid template in {}", template.display()))?;

    let context = open(config, account, spool).await?;
    let results = context
        .send_grouped(context.remote().as_ref(), &message)
        .await;
    context.shutdown().await;

    for result in results? {
        let recipients: Vec<&str> = result.message.all_recipients();
        match &result.error {
            None => println!("sent to {}", recipients.join(", ")),
            Some(e) => println!("FAILED for {}: {}", recipients.join(", "), e),
        }
    }
    Ok(())
}

async fn act(
    config: EngineConfig,
    account: AccountId,
    spool: &Path,
    kind: ActionKind,
    role: MailboxRole,
    id: String,
) -> Result<()> {
    let context = open(config, account, spool).await?;

    // Best effort: a cached snapshot is enough to act on while offline.
    if let Err(e) = context.refresh(role).await {
        info!("Using cached {} snapshot: {}", role, e);
    }

    let id = MessageId::new(id);
    let outcome = context.actions().perform(kind, role, &id).await;
    context.shutdown().await;

    match outcome.with_context(|| format!("Failed to act on {id}"))? {
        ActionOutcome::Applied => println!("done"),
        ActionOutcome::AlreadyDone => println!("already gone"),
        ActionOutcome::Deferred => println!("store unreachable; queued for the next sync"),
    }
    Ok(())
}

async fn status(config: &EngineConfig, account: AccountId) -> Result<()> {
    let store = SnapshotStore::new(&config.data_dir, account);
    println!("data: {}", config.data_dir.display());

    for role in MailboxRole::ALL {
        match store.load(role).await {
            Ok(snapshot) => println!("{:>8}: {} message(s)", role.as_str(), snapshot.len()),
            Err(e) => println!("{:>8}: unreadable ({e})", role.as_str()),
        }
    }

    let pending = read_pending(&config.data_dir, account)
        .await
        .context("Failed to read backlog")?;
    println!("pending: {}", pending.len());
    for action in &pending {
        println!("  {} {} in {}", action.kind.as_str(), action.id(), action.role);
    }
    Ok(())
}
