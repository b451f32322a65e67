//! Balance ledger contract.
//!
//! The authoritative credit balance lives outside the game core. A ledger must
//! apply a conditional debit atomically (never below zero, safe under
//! concurrent calls for one account) and must recognise a repeated
//! [`TxRef`] by returning the recorded result instead of applying it again.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Stake,
    Payout,
}

impl TxKind {
    fn as_str(self) -> &'static str {
        match self {
            TxKind::Stake => "stake",
            TxKind::Payout => "payout",
        }
    }
}

/// Reference for one logical ledger movement: `account:round:kind`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxRef(String);

impl TxRef {
    pub fn new(account: &AccountId, round_id: u64, kind: TxKind) -> Self {
        Self(format!("{}:{:016x}:{}", account, round_id, kind.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the reference was issued for `account`.
    pub fn belongs_to(&self, account: &AccountId) -> bool {
        self.0.rsplitn(3, ':').nth(2) == Some(account.as_str())
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("account not found")]
    AccountNotFound,
    #[error("insufficient credits (balance {balance})")]
    InsufficientFunds { balance: u64 },
    #[error("invalid amount {0}")]
    InvalidAmount(u64),
    #[error("ledger unavailable: {0}")]
    Transient(String),
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Create the account with `initial_credits` if it does not exist yet.
    /// Returns the current balance either way.
    async fn ensure_account(
        &self,
        account: &AccountId,
        display_name: &str,
        initial_credits: u64,
    ) -> Result<u64, LedgerError>;

    async fn balance(&self, account: &AccountId) -> Result<u64, LedgerError>;

    /// Debit `amount` only if the balance covers it. Returns the new balance.
    async fn conditional_debit(
        &self,
        account: &AccountId,
        amount: u64,
        reference: &TxRef,
    ) -> Result<u64, LedgerError>;

    /// Credit `amount`, creating the account if needed. Returns the new balance.
    async fn credit(
        &self,
        account: &AccountId,
        amount: u64,
        reference: &TxRef,
    ) -> Result<u64, LedgerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub display_name: String,
    pub credits: u64,
}

#[derive(Default)]
struct Book {
    accounts: HashMap<AccountId, AccountRecord>,
    applied: HashMap<TxRef, u64>,
}

/// In-process ledger for simulated play and tests.
#[derive(Default)]
pub struct MemoryLedger {
    book: Mutex<Book>,
    offline: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(account: &AccountId, credits: u64) -> Self {
        let ledger = Self::new();
        ledger.set_balance(account, credits);
        ledger
    }

    pub fn set_balance(&self, account: &AccountId, credits: u64) {
        let mut book = self.lock();
        book.accounts
            .entry(account.clone())
            .and_modify(|rec| rec.credits = credits)
            .or_insert_with(|| AccountRecord {
                display_name: account.to_string(),
                credits,
            });
    }

    pub fn record(&self, account: &AccountId) -> Option<AccountRecord> {
        self.lock().accounts.get(account).cloned()
    }

    /// Simulate a backend outage: every call fails with `Transient`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Book> {
        // A panic while holding the book cannot leave a half-applied movement.
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_online(&self) -> Result<(), LedgerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Transient("ledger offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn ensure_account(
        &self,
        account: &AccountId,
        display_name: &str,
        initial_credits: u64,
    ) -> Result<u64, LedgerError> {
        self.check_online()?;
        let mut book = self.lock();
        let record = book
            .accounts
            .entry(account.clone())
            .or_insert_with(|| AccountRecord {
                display_name: display_name.to_string(),
                credits: initial_credits,
            });
        Ok(record.credits)
    }

    async fn balance(&self, account: &AccountId) -> Result<u64, LedgerError> {
        self.check_online()?;
        self.lock()
            .accounts
            .get(account)
            .map(|rec| rec.credits)
            .ok_or(LedgerError::AccountNotFound)
    }

    async fn conditional_debit(
        &self,
        account: &AccountId,
        amount: u64,
        reference: &TxRef,
    ) -> Result<u64, LedgerError> {
        self.check_online()?;
        if amount == 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let mut book = self.lock();
        if let Some(&balance) = book.applied.get(reference) {
            debug!(%reference, "debit already applied");
            return Ok(balance);
        }
        let record = book
            .accounts
            .get_mut(account)
            .ok_or(LedgerError::AccountNotFound)?;
        if record.credits < amount {
            return Err(LedgerError::InsufficientFunds {
                balance: record.credits,
            });
        }
        record.credits -= amount;
        let balance = record.credits;
        book.applied.insert(reference.clone(), balance);
        Ok(balance)
    }

    async fn credit(
        &self,
        account: &AccountId,
        amount: u64,
        reference: &TxRef,
    ) -> Result<u64, LedgerError> {
        self.check_online()?;
        if amount == 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let mut book = self.lock();
        if let Some(&balance) = book.applied.get(reference) {
            debug!(%reference, "credit already applied");
            return Ok(balance);
        }
        let record = book
            .accounts
            .entry(account.clone())
            .or_insert_with(|| AccountRecord {
                display_name: account.to_string(),
                credits: 0,
            });
        record.credits = record.credits.saturating_add(amount);
        let balance = record.credits;
        book.applied.insert(reference.clone(), balance);
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn alice() -> AccountId {
        AccountId::new("alice")
    }

    #[test]
    fn test_reference_names_its_account() {
        let reference = TxRef::new(&AccountId::new("p.1"), 42, TxKind::Payout);
        assert!(reference.belongs_to(&AccountId::new("p.1")));
        assert!(!reference.belongs_to(&AccountId::new("p_1")));
        assert!(!reference.belongs_to(&AccountId::new("1")));
        let nested = TxRef::new(&AccountId::new("a:b"), 1, TxKind::Stake);
        assert!(nested.belongs_to(&AccountId::new("a:b")));
        assert!(!nested.belongs_to(&AccountId::new("b")));
    }

    #[tokio::test]
    async fn test_debit_rejection_leaves_balance() {
        let ledger = MemoryLedger::with_account(&alice(), 5);
        let reference = TxRef::new(&alice(), 1, TxKind::Stake);
        assert_eq!(
            ledger.conditional_debit(&alice(), 10, &reference).await,
            Err(LedgerError::InsufficientFunds { balance: 5 })
        );
        assert_eq!(ledger.balance(&alice()).await, Ok(5));
    }

    #[tokio::test]
    async fn test_debit_subtracts_exactly() {
        let ledger = MemoryLedger::with_account(&alice(), 100);
        let reference = TxRef::new(&alice(), 1, TxKind::Stake);
        assert_eq!(ledger.conditional_debit(&alice(), 30, &reference).await, Ok(70));
        assert_eq!(ledger.balance(&alice()).await, Ok(70));
    }

    #[tokio::test]
    async fn test_repeated_reference_is_not_reapplied() {
        let ledger = MemoryLedger::with_account(&alice(), 100);
        let stake = TxRef::new(&alice(), 7, TxKind::Stake);
        let payout = TxRef::new(&alice(), 7, TxKind::Payout);
        assert_eq!(ledger.conditional_debit(&alice(), 10, &stake).await, Ok(90));
        assert_eq!(ledger.conditional_debit(&alice(), 10, &stake).await, Ok(90));
        assert_eq!(ledger.credit(&alice(), 25, &payout).await, Ok(115));
        assert_eq!(ledger.credit(&alice(), 25, &payout).await, Ok(115));
        assert_eq!(ledger.balance(&alice()).await, Ok(115));
    }

    #[tokio::test]
    async fn test_missing_account() {
        let ledger = MemoryLedger::new();
        let reference = TxRef::new(&alice(), 1, TxKind::Stake);
        assert_eq!(
            ledger.conditional_debit(&alice(), 1, &reference).await,
            Err(LedgerError::AccountNotFound)
        );
        assert_eq!(ledger.ensure_account(&alice(), "Alice", 1000).await, Ok(1000));
        assert_eq!(ledger.ensure_account(&alice(), "Alice", 5).await, Ok(1000));
        assert_eq!(ledger.record(&alice()).unwrap().display_name, "Alice");
    }

    #[tokio::test]
    async fn test_concurrent_debits_never_overdraw() {
        let ledger = Arc::new(MemoryLedger::with_account(&alice(), 50));
        let mut handles = Vec::new();
        for round in 0..20u64 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let reference = TxRef::new(&alice(), round, TxKind::Stake);
                ledger.conditional_debit(&alice(), 10, &reference).await
            }));
        }
        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 5);
        assert_eq!(ledger.balance(&alice()).await, Ok(0));
    }

    #[tokio::test]
    async fn test_offline_is_transient() {
        let ledger = MemoryLedger::with_account(&alice(), 50);
        ledger.set_offline(true);
        assert!(matches!(
            ledger.balance(&alice()).await,
            Err(LedgerError::Transient(_))
        ));
        ledger.set_offline(false);
        assert_eq!(ledger.balance(&alice()).await, Ok(50));
    }

    #[test]
    fn test_reference_format() {
        let reference = TxRef::new(&alice(), 0xab, TxKind::Payout);
        assert_eq!(reference.as_str(), "alice:00000000000000ab:payout");
    }
}
