use std::str::FromStr;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Row, SqlitePool,
};

#[derive(Parser)]
#[command(name = "crush-cli", about = "Admin CLI for the Casino Crush ledger")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Database URL, default sqlite://crush.db
    #[arg(long, value_parser, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a credit account
    CreateAccount {
        id: String,
        display_name: String,
        #[arg(long, default_value_t = 1000)]
        credits: u64,
    },
    /// Add credits to an account
    Grant { id: String, amount: u64 },
    /// Show one account and its latest movements
    Show {
        id: String,
        #[arg(long, default_value_t = 10)]
        movements: i64,
    },
    /// List accounts by balance
    List {
        #[arg(default_value_t = 20)]
        n: i64,
    },
    /// Export accounts to CSV path
    ExportCsv { path: String },
}

async fn get_pool(url: Option<String>) -> anyhow::Result<SqlitePool> {
    let url = url.unwrap_or_else(|| "sqlite://crush.db".into());
    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    sqlx::migrate!("../crush_server/migrations").run(&pool).await?;
    Ok(pool)
}

fn as_credits(amount: u64) -> anyhow::Result<i64> {
    i64::try_from(amount).context("amount does not fit the ledger")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let pool = get_pool(cli.database_url).await?;

    match cli.command {
        Commands::CreateAccount {
            id,
            display_name,
            credits,
        } => {
            let ts = Utc::now().to_rfc3339();
            let created = sqlx::query(
                "INSERT INTO accounts (id, display_name, credits, created_at, updated_at) VALUES (?, ?, ?, ?, ?) ON CONFLICT(id) DO NOTHING",
            )
            .bind(&id)
            .bind(&display_name)
            .bind(as_credits(credits)?)
            .bind(&ts)
            .bind(&ts)
            .execute(&pool)
            .await?;
            if created.rows_affected() == 0 {
                bail!("account {id} already exists");
            }
            println!("Created {} ({}) with {} credits", id, display_name, credits);
        }
        Commands::Grant { id, amount } => {
            if amount == 0 {
                bail!("grant must be positive");
            }
            let value = as_credits(amount)?;
            let now = Utc::now();
            let ts = now.to_rfc3339();
            let mut tx = pool.begin().await?;
            let updated =
                sqlx::query("UPDATE accounts SET credits = credits + ?, updated_at = ? WHERE id = ?")
                    .bind(value)
                    .bind(&ts)
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;
            if updated.rows_affected() == 0 {
                bail!("no account {id}");
            }
            let balance: i64 = sqlx::query_scalar("SELECT credits FROM accounts WHERE id = ?")
                .bind(&id)
                .fetch_one(&mut *tx)
                .await?;
            let reference = format!(
                "{}:admin-{:x}:grant",
                id,
                now.timestamp_nanos_opt().unwrap_or_default()
            );
            sqlx::query(
                "INSERT INTO ledger_refs (reference, account, kind, amount, balance_after, created_at) VALUES (?, ?, 'grant', ?, ?, ?)",
            )
            .bind(&reference)
            .bind(&id)
            .bind(value)
            .bind(balance)
            .bind(&ts)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            println!("Granted {} to {}. Balance: {}", amount, id, balance);
        }
        Commands::Show { id, movements } => {
            let row = sqlx::query(
                "SELECT id, display_name, credits, created_at, updated_at FROM accounts WHERE id = ?",
            )
            .bind(&id)
            .fetch_optional(&pool)
            .await?;
            let Some(r) = row else {
                bail!("no account {id}");
            };
            println!(
                "{} ({}) credits={} created={} updated={}",
                r.get::<String, _>("id"),
                r.get::<String, _>("display_name"),
                r.get::<i64, _>("credits"),
                r.get::<String, _>("created_at"),
                r.get::<String, _>("updated_at"),
            );
            let rows = sqlx::query("SELECT reference, kind, amount, balance_after, created_at FROM ledger_refs WHERE account = ? ORDER BY rowid DESC LIMIT ?")
                .bind(&id)
                .bind(movements)
                .fetch_all(&pool).await?;
            for r in rows {
                let reference: String = r.get("reference");
                let kind: String = r.get("kind");
                let amount: i64 = r.get("amount");
                let balance_after: i64 = r.get("balance_after");
                let ts: String = r.get("created_at");
                println!(
                    "  {} {:<6} {:>8} -> {:>8}  {}",
                    ts, kind, amount, balance_after, reference
                );
            }
        }
        Commands::List { n } => {
            let rows = sqlx::query(
                "SELECT id, display_name, credits FROM accounts ORDER BY credits DESC, id ASC LIMIT ?",
            )
            .bind(n)
            .fetch_all(&pool)
            .await?;
            for r in rows {
                let id: String = r.get("id");
                let display_name: String = r.get("display_name");
                let credits: i64 = r.get("credits");
                println!("{:<24} {:<24} {:>10}", id, display_name, credits);
            }
        }
        Commands::ExportCsv { path } => {
            let mut wtr = csv::Writer::from_path(&path)?;
            wtr.write_record(["id", "display_name", "credits", "created_at", "updated_at"])?;
            let rows = sqlx::query("SELECT id, display_name, credits, created_at, updated_at FROM accounts ORDER BY id ASC")
                .fetch_all(&pool).await?;
            let total = rows.len();
            for r in &rows {
                wtr.write_record(&[
                    r.get::<String, _>("id"),
                    r.get::<String, _>("display_name"),
                    r.get::<i64, _>("credits").to_string(),
                    r.get::<String, _>("created_at"),
                    r.get::<String, _>("updated_at"),
                ])?;
            }
            wtr.flush()?;
            println!("Exported {} accounts to {}", total, path);
        }
    }

    Ok(())
}
