use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tracing::{error, info, warn};

use sentinex_core::{logging, Config};
use sentinex_discovery::{Error, RedisNodeConnector, SentinelEngine};

#[derive(Parser, Debug)]
#[command(name = "sentinex")]
#[command(about = "Discovers Redis masters through Sentinel and keeps a connection to each", long_about = None)]
struct Args {
    /// Config file (TOML, YAML or JSON)
    #[arg(long, env = "SENTINEX_CONFIG")]
    config: Option<String>,

    /// Sentinel endpoint as HOST:PORT, repeatable. Replaces configured endpoints.
    #[arg(long = "sentinel", value_name = "HOST:PORT")]
    sentinels: Vec<String>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Seconds between status reports
    #[arg(long, default_value = "10")]
    status_interval_secs: u64,

    /// PING the picked master on every status report
    #[arg(long, default_value = "false")]
    ping: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if !args.sentinels.is_empty() {
        config.sentinel.endpoints = args.sentinels.clone();
    }
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }

    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        anyhow::bail!("Configuration validation failed with {} error(s)", errors.len());
    }

    logging::init_logging(&config.logging)?;

    info!(
        sentinels = ?config.sentinel.endpoints,
        refresh_interval_ms = config.sentinel.refresh_interval_ms,
        strategy = %config.selection.strategy,
        "Starting sentinex"
    );

    let engine = SentinelEngine::from_config(&config)?;
    engine.start()?;

    let mut status = tokio::time::interval(Duration::from_secs(args.status_interval_secs.max(1)));
    // First tick fires immediately, before any round has finished
    status.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            _ = status.tick() => report_status(&engine, args.ping).await,
        }
    }

    match engine.close().await {
        Ok(()) => info!("Shutdown complete"),
        Err(Error::PartialShutdown { failed, total }) => {
            warn!(failed, total, "Some connections failed to close");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

async fn report_status(engine: &SentinelEngine<RedisNodeConnector>, ping: bool) {
    let masters = engine.masters();
    info!(
        count = masters.len(),
        masters = ?masters.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "Known masters"
    );

    if !ping {
        return;
    }

    match engine.get_client() {
        Ok(master) => {
            let result: redis::RedisResult<String> = redis::cmd("PING")
                .query_async(&mut master.connection())
                .await;
            match result {
                Ok(reply) => info!(master = %master.address(), %reply, "Ping"),
                Err(e) => warn!(master = %master.address(), error = %e, "Ping failed"),
            }
        }
        Err(e) => warn!(error = %e, "No master to ping"),
    }
}

/// Wait for SIGTERM or Ctrl+C
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
