use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use cronhook_core::config::{CronhookConfig, LogFormat, LoggingConfig};
use cronhook_scheduler::{
    ReqwestTransport, SchedulerService, SqliteHistoryStore, SqliteJobStore, SystemClock,
};
use tracing::info;

mod alert;
mod app;
mod http;

/// HTTP webhook scheduler.
#[derive(Debug, Parser)]
#[command(name = "cronhook-gateway", version, about)]
struct Args {
    /// Path to the TOML config file (falls back to CRONHOOK_CONFIG, then ~/.cronhook/cronhook.toml).
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // load config: --config > CRONHOOK_CONFIG env > ~/.cronhook/cronhook.toml
    let config_path = args
        .config
        .or_else(|| std::env::var("CRONHOOK_CONFIG").ok());
    let loaded = CronhookConfig::load(config_path.as_deref());
    let config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => CronhookConfig::default(),
    };
    init_logging(&config.logging);
    if let Err(e) = loaded {
        tracing::warn!("Config load failed ({}), using defaults", e);
    }

    // initialize SQLite database: one file, one connection per store
    let db_path = &config.database.path;
    ensure_parent_dir(db_path)
        .with_context(|| format!("cannot create the directory for database {db_path}"))?;
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    cronhook_scheduler::db::init_db(&db)?;
    drop(db);
    info!("database migrations complete");

    let jobs = Arc::new(SqliteJobStore::new(rusqlite::Connection::open(db_path)?));
    let history = Arc::new(SqliteHistoryStore::new(rusqlite::Connection::open(db_path)?));
    let client = reqwest::Client::builder()
        .user_agent(concat!("cronhook/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let scheduler = Arc::new(SchedulerService::new(
        jobs,
        history,
        Arc::new(ReqwestTransport::with_client(client)),
        Arc::new(SystemClock),
        &config.scheduler,
    )?);
    scheduler.listeners().register(Arc::new(alert::PauseAlert));
    scheduler.start();

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let state = Arc::new(app::AppState::new(config, scheduler.clone()));
    let router = app::build_router(state);

    info!("cronhook gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // stop the loop, then let in-flight webhooks finish writing history
    scheduler.shutdown().await;
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "cronhook_gateway={0},cronhook_scheduler={0},tower_http=info",
            logging.level
        )
        .into()
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) -> std::io::Result<()> {
    match std::path::Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("cronhook-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn parent_dir_is_created() {
        let dir = scratch("nested");
        let db = dir.join("a/b/cronhook.db");
        ensure_parent_dir(db.to_str().unwrap()).unwrap();
        assert!(dir.join("a/b").is_dir());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn unusable_parent_is_reported() {
        let dir = scratch("blocked");
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("not-a-dir");
        std::fs::write(&file, b"").unwrap();

        let db = file.join("cronhook.db");
        assert!(ensure_parent_dir(db.to_str().unwrap()).is_err());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn bare_file_name_needs_no_directory() {
        ensure_parent_dir("cronhook.db").unwrap();
    }
}
