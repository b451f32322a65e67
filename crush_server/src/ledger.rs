use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Sqlite, SqlitePool, Transaction,
};
use tracing::{debug, warn};

use crush_core::ledger::{AccountId, Ledger, LedgerError, TxRef};
use crush_shared::AccountRecord;

/// Credit ledger in SQLite. Every movement runs in one transaction together
/// with its reference row, so a retried reference is answered from
/// `ledger_refs` instead of being applied twice.
#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: String,
    display_name: String,
    credits: i64,
    created_at: String,
    updated_at: String,
}

impl AccountRow {
    fn into_record(self) -> anyhow::Result<AccountRecord> {
        Ok(AccountRecord {
            id: self.id,
            display_name: self.display_name,
            credits: u64::try_from(self.credits)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

fn parse_ts(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn transient(err: sqlx::Error) -> LedgerError {
    warn!(?err, "ledger query failed");
    LedgerError::Transient(err.to_string())
}

fn as_amount(amount: u64) -> Result<i64, LedgerError> {
    match i64::try_from(amount) {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(LedgerError::InvalidAmount(amount)),
    }
}

impl SqliteLedger {
    pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn account(&self, account: &AccountId) -> anyhow::Result<Option<AccountRecord>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, display_name, credits, created_at, updated_at FROM accounts WHERE id = ?",
        )
        .bind(account.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(AccountRow::into_record).transpose()
    }

    /// Open a transaction that holds the write lock from its first statement.
    /// A deferred transaction that reads first and writes later gets
    /// `SQLITE_BUSY` on the upgrade without the busy handler ever running.
    async fn begin_write(
        &self,
        account: &AccountId,
    ) -> Result<Transaction<'static, Sqlite>, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(transient)?;
        sqlx::query("UPDATE accounts SET updated_at = updated_at WHERE id = ?")
            .bind(account.as_str())
            .execute(&mut *tx)
            .await
            .map_err(transient)?;
        Ok(tx)
    }

    async fn applied(
        tx: &mut Transaction<'_, Sqlite>,
        reference: &TxRef,
    ) -> Result<Option<u64>, LedgerError> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance_after FROM ledger_refs WHERE reference = ?")
                .bind(reference.as_str())
                .fetch_optional(&mut **tx)
                .await
                .map_err(transient)?;
        Ok(balance.map(|b| b.max(0) as u64))
    }

    async fn credits(
        tx: &mut Transaction<'_, Sqlite>,
        account: &AccountId,
    ) -> Result<Option<i64>, LedgerError> {
        sqlx::query_scalar("SELECT credits FROM accounts WHERE id = ?")
            .bind(account.as_str())
            .fetch_optional(&mut **tx)
            .await
            .map_err(transient)
    }

    async fn record_ref(
        tx: &mut Transaction<'_, Sqlite>,
        account: &AccountId,
        reference: &TxRef,
        kind: &str,
        amount: i64,
        balance: i64,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO ledger_refs (reference, account, kind, amount, balance_after, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(reference.as_str())
        .bind(account.as_str())
        .bind(kind)
        .bind(amount)
        .bind(balance)
        .bind(now())
        .execute(&mut **tx)
        .await
        .map_err(transient)?;
        Ok(())
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn ensure_account(
        &self,
        account: &AccountId,
        display_name: &str,
        initial_credits: u64,
    ) -> Result<u64, LedgerError> {
        let initial =
            i64::try_from(initial_credits).map_err(|_| LedgerError::InvalidAmount(initial_credits))?;
        let ts = now();
        let mut tx = self.pool.begin().await.map_err(transient)?;
        let created = sqlx::query(
            "INSERT INTO accounts (id, display_name, credits, created_at, updated_at) VALUES (?, ?, ?, ?, ?) ON CONFLICT(id) DO NOTHING",
        )
        .bind(account.as_str())
        .bind(display_name)
        .bind(initial)
        .bind(&ts)
        .bind(&ts)
        .execute(&mut *tx)
        .await
        .map_err(transient)?;
        let credits = Self::credits(&mut tx, account)
            .await?
            .ok_or(LedgerError::AccountNotFound)?;
        tx.commit().await.map_err(transient)?;
        if created.rows_affected() > 0 {
            debug!(%account, credits, "account created");
        }
        Ok(credits as u64)
    }

    async fn balance(&self, account: &AccountId) -> Result<u64, LedgerError> {
        let credits: Option<i64> = sqlx::query_scalar("SELECT credits FROM accounts WHERE id = ?")
            .bind(account.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(transient)?;
        credits
            .map(|c| c as u64)
            .ok_or(LedgerError::AccountNotFound)
    }

    async fn conditional_debit(
        &self,
        account: &AccountId,
        amount: u64,
        reference: &TxRef,
    ) -> Result<u64, LedgerError> {
        let value = as_amount(amount)?;
        let mut tx = self.begin_write(account).await?;
        if let Some(balance) = Self::applied(&mut tx, reference).await? {
            debug!(%reference, "debit already applied");
            return Ok(balance);
        }
        let updated = sqlx::query(
            "UPDATE accounts SET credits = credits - ?, updated_at = ? WHERE id = ? AND credits >= ?",
        )
        .bind(value)
        .bind(now())
        .bind(account.as_str())
        .bind(value)
        .execute(&mut *tx)
        .await
        .map_err(transient)?;
        if updated.rows_affected() == 0 {
            return match Self::credits(&mut tx, account).await? {
                None => Err(LedgerError::AccountNotFound),
                Some(balance) => Err(LedgerError::InsufficientFunds {
                    balance: balance as u64,
                }),
            };
        }
        let balance = Self::credits(&mut tx, account)
            .await?
            .ok_or(LedgerError::AccountNotFound)?;
        Self::record_ref(&mut tx, account, reference, "stake", value, balance).await?;
        tx.commit().await.map_err(transient)?;
        Ok(balance as u64)
    }

    async fn credit(
        &self,
        account: &AccountId,
        amount: u64,
        reference: &TxRef,
    ) -> Result<u64, LedgerError> {
        let value = as_amount(amount)?;
        let ts = now();
        let mut tx = self.begin_write(account).await?;
        if let Some(balance) = Self::applied(&mut tx, reference).await? {
            debug!(%reference, "credit already applied");
            return Ok(balance);
        }
        sqlx::query(
            "INSERT INTO accounts (id, display_name, credits, created_at, updated_at) VALUES (?, ?, 0, ?, ?) ON CONFLICT(id) DO NOTHING",
        )
        .bind(account.as_str())
        .bind(account.as_str())
        .bind(&ts)
        .bind(&ts)
        .execute(&mut *tx)
        .await
        .map_err(transient)?;
        sqlx::query("UPDATE accounts SET credits = credits + ?, updated_at = ? WHERE id = ?")
            .bind(value)
            .bind(&ts)
            .bind(account.as_str())
            .execute(&mut *tx)
            .await
            .map_err(transient)?;
        let balance = Self::credits(&mut tx, account)
            .await?
            .ok_or(LedgerError::AccountNotFound)?;
        Self::record_ref(&mut tx, account, reference, "payout", value, balance).await?;
        tx.commit().await.map_err(transient)?;
        Ok(balance as u64)
    }
}
