//! vpsphere: single-operator Telegram bot for a VPS.
//!
//! Runs the operator's shell commands and streams their output back,
//! transfers files, and alerts on SSH logins.

mod config;
mod handlers;
mod ssh_watch;
mod system;
mod telegram;

use anyhow::{Context, Result};
use clap::Parser;
use config::{BotConfig, Overrides};
use handlers::BotState;
use ssh_watch::SshWatcher;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use telegram::TelegramSink;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use vpsphere_core::{
    ActivityLog, OperatorGate, SessionKey, SessionRegistry, ShellSessionController,
    WorkingDirectoryState,
};

/// vpsphere: remote shell over Telegram
#[derive(Parser, Debug)]
#[command(name = "vpsphere", version, about = "Remote shell over Telegram")]
struct Cli {
    /// Telegram bot token
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Telegram user id of the operator
    #[arg(long, env = "USER_ID")]
    operator_id: Option<u64>,

    /// Initial working directory for commands
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Shell used to run commands
    #[arg(long)]
    shell: Option<String>,

    /// Activity log path (empty disables it)
    #[arg(long)]
    activity_log: Option<String>,

    /// Do not watch the journal for SSH logins
    #[arg(long)]
    no_ssh_watch: bool,

    /// Config file path
    #[arg(long, default_value = "~/.vpsphere/config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    // BOT_TOKEN and USER_ID may come from a .env file.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting vpsphere");

    if let Err(e) = run(cli).await {
        error!(error = %format!("{e:#}"), "vpsphere failed");
        std::process::exit(1);
    }
    info!("vpsphere stopped");
}

async fn run(cli: Cli) -> Result<()> {
    let overrides = Overrides {
        token: cli.token,
        operator_id: cli.operator_id,
        working_dir: cli.working_dir,
        shell: cli.shell,
        activity_log: cli.activity_log,
        disable_ssh_watch: cli.no_ssh_watch,
    };
    let config = BotConfig::load(&PathBuf::from(&cli.config), overrides)?;

    let workdir = WorkingDirectoryState::new(&config.working_dir).with_context(|| {
        format!("working directory {} is unusable", config.working_dir.display())
    })?;
    let shutdown = CancellationToken::new();
    let mut controller = ShellSessionController::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(workdir),
        config.controller.clone(),
    )
    .with_shutdown_token(shutdown.clone());
    if let Some(path) = &config.activity_log {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        info!(path = %path.display(), "activity log enabled");
        controller = controller.with_activity_log(Arc::new(ActivityLog::new(path.clone())));
    }
    let controller = Arc::new(controller);

    let bot = Bot::new(&config.token);
    let sink = Arc::new(TelegramSink::new(bot.clone()));
    let gate = Arc::new(OperatorGate::new(config.operator));
    let state = Arc::new(BotState {
        controller: controller.clone(),
        sink: sink.clone(),
        upload_dir_name: config.upload_dir_name.clone(),
    });

    let watcher = config.ssh_watch.clone().map(|watch| {
        let watcher = SshWatcher::new(watch, SessionKey(config.operator.0 as i64));
        let sink = sink.clone();
        let token = shutdown.clone();
        tokio::spawn(async move { watcher.run(sink.as_ref(), token).await })
    });

    let mut dispatcher = Dispatcher::builder(bot, handlers::schema())
        .dependencies(dptree::deps![state, gate])
        .default_handler(|_| async {})
        .build();

    let dispatcher_token = dispatcher.shutdown_token();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => info!("received shutdown signal"),
            _ = signal_token.cancelled() => {}
        }
        signal_token.cancel();
        if let Ok(stopped) = dispatcher_token.shutdown() {
            stopped.await;
        }
    });

    info!(
        operator = %config.operator,
        cwd = %config.working_dir.display(),
        "dispatching updates"
    );
    dispatcher.dispatch().await;

    // The dispatcher can also stop on its own; make sure everything follows.
    shutdown.cancel();
    controller.shutdown().await;
    if let Some(watcher) = watcher {
        let _ = watcher.await;
    }
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
