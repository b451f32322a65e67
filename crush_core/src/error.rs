use thiserror::Error;

use crate::ledger::LedgerError;

/// Everything a player action can fail with. Only `StaleTurn` is internal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("sign in to play")]
    NotAuthenticated,
    #[error("stake {stake} is outside {min}..={max}")]
    InvalidStake { stake: u64, min: u64, max: u64 },
    #[error("insufficient credits: balance {balance}, stake {stake}")]
    InsufficientFunds { balance: u64, stake: u64 },
    #[error("credit account is not initialized")]
    AccountNotInitialized,
    #[error("ledger unavailable: {0}")]
    LedgerTransient(String),
    #[error("turn superseded")]
    StaleTurn,
    #[error("saved session was unreadable: {0}")]
    CorruptPersistedState(String),
    #[error("a round is already in progress")]
    RoundInProgress,
    #[error("no round in progress")]
    NoActiveRound,
    #[error("column {column} is not on a {cols}-column row")]
    InvalidPick { column: usize, cols: usize },
    #[error("clear at least one row before cashing out")]
    CashoutNotAllowed,
    #[error("no pending credit to reconcile")]
    NothingToReconcile,
}

impl GameError {
    /// Superseded turns are concurrency control, never shown to a player.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, GameError::StaleTurn)
    }

    /// Build the rejection for a failed stake debit.
    pub fn from_debit(err: LedgerError, stake: u64) -> Self {
        match err {
            LedgerError::InsufficientFunds { balance } => {
                GameError::InsufficientFunds { balance, stake }
            }
            other => other.into(),
        }
    }
}

impl From<LedgerError> for GameError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AccountNotFound => GameError::AccountNotInitialized,
            LedgerError::InsufficientFunds { balance } => GameError::InsufficientFunds {
                balance,
                stake: 0,
            },
            LedgerError::InvalidAmount(amount) => {
                GameError::LedgerTransient(format!("ledger refused amount {amount}"))
            }
            LedgerError::Transient(reason) => GameError::LedgerTransient(reason),
        }
    }
}
