use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use tracing::info;

use crush_core::GameConfig;

mod ledger;
mod routes;
mod state;

use crate::{ledger::SqliteLedger, state::AppState};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let game = match std::env::var("CRUSH_CONFIG") {
        Ok(path) => GameConfig::load(&path).with_context(|| format!("loading {path}"))?,
        Err(_) => GameConfig::default(),
    };
    game.validate()?;

    let initial_credits: u64 = env_or("INITIAL_CREDITS", "1000")
        .parse()
        .context("INITIAL_CREDITS must be a whole number")?;
    let snapshot_dir = PathBuf::from(env_or("SNAPSHOT_DIR", "./snapshots"));
    std::fs::create_dir_all(&snapshot_dir)
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let ledger = SqliteLedger::connect(&env_or("DATABASE_URL", "sqlite://crush.db"), 5).await?;
    let state = Arc::new(AppState::new(ledger, game, snapshot_dir, initial_credits));
    let app = routes::router(state);

    let addr = env_or("BIND", "127.0.0.1:8080");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
