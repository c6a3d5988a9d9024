use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod cli;
mod config;
mod supervisor;

use config::WardenConfig;
use supervisor::{ChildStdinSink, Supervisor};

use gsw_core::audit::{AuditLog, SystemLog};
use gsw_core::sink::CommandSink;
use gsw_moderation::BanRegistry;
use gsw_moderation::rules::load_rules;
use gsw_process::ChildProcess;
use gsw_requests::RequestVoteEngine;
use gsw_web::ApiState;
use gsw_web::ops::load_ops;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .try_init()
        .ok();

    let cli = cli::parse();
    let mut config = WardenConfig::load(&cli.config)?;
    if let Some(data_dir) = cli.data_dir.clone() {
        config.data_dir = data_dir;
    }
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create {}", config.data_dir.display()))?;

    run(cli, config).await
}

async fn run(cli: cli::Cli, config: WardenConfig) -> Result<()> {
    let audit = Arc::new(AuditLog::new(config.audit_capacity));
    let syslog = Arc::new(SystemLog::new(config.audit_capacity));

    let child = ChildProcess::new(cli.server_command.clone());
    let sink: Arc<dyn CommandSink> = Arc::new(ChildStdinSink(Arc::clone(&child)));

    let rules = load_rules(&config.forbidden_path())?;
    let registry = Arc::new(BanRegistry::load(
        config.players_path(),
        config.banned_path(),
        rules,
        Arc::clone(&sink),
        Arc::clone(&syslog),
    )?);
    let engine = Arc::new(RequestVoteEngine::load(
        config.requests_path(),
        config.upload_dir(),
        config.engine_config(),
        sink,
        Arc::clone(&syslog),
    )?);
    let ops = load_ops(&config.ops_file);

    // Bind before spawning the server; both failures are fatal.
    let listener = gsw_web::bind(cli.port).await?;

    let root = CancellationToken::new();
    let mut supervisor = Supervisor::new(
        Arc::clone(&child),
        Arc::clone(&registry),
        Arc::clone(&engine),
        Arc::clone(&audit),
        root.child_token(),
    );
    supervisor
        .start(
            Duration::from_secs(config.ban_sweep_secs),
            Duration::from_secs(config.request_sweep_secs),
        )
        .await?;
    info!(command = %cli.server_command, "server process started");

    let state = Arc::new(ApiState {
        registry,
        engine,
        audit,
        syslog,
        ops,
    });
    let app = gsw_web::router(
        state,
        &config.web_root,
        &config.upload_dir(),
        config.max_upload_bytes,
    );
    let web_cancel = root.child_token();
    let web = tokio::spawn(async move {
        if let Err(err) = gsw_web::serve(listener, app, web_cancel).await {
            error!(error = %err, "web console failed");
        }
    });

    // Run until the operator interrupts or the server process dies.
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                if !supervisor.child_running() {
                    warn!("server process exited, shutting down");
                    break;
                }
            }
        }
    }

    root.cancel();
    supervisor.shutdown().await;
    if let Err(err) = web.await {
        warn!(error = %err, "web console task failed");
    }
    Ok(())
}
