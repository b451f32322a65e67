use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EnsureAccountRequest {
    pub display_name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SpinRequest {
    pub stake: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TowerStartRequest {
    pub stake: u64,
    /// Clamped to the server's limits; the server default when omitted.
    #[serde(default)]
    pub rows: Option<usize>,
    #[serde(default)]
    pub cols: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PickRequest {
    pub column: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub id: String,
    pub display_name: String,
    pub credits: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BalanceResponse {
    pub credits: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SettlementView {
    Lost,
    Credited { amount: u64, balance: u64 },
    PendingCredit { amount: u64, reason: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LineView {
    pub kind: String,
    pub index: usize,
    pub symbol: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SpinResponse {
    pub turn_token: u64,
    /// Symbol names, row-major.
    pub grid: Vec<Vec<String>>,
    pub lines: Vec<LineView>,
    pub winning_cells: Vec<CellRef>,
    pub bonus_bps: u32,
    pub reward: u64,
    pub settlement: SettlementView,
    pub balance: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PickView {
    pub row: usize,
    pub column: usize,
    pub safe: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TowerResponse {
    pub stake: u64,
    pub rows: usize,
    pub cols: usize,
    pub active_row: usize,
    pub history: Vec<PickView>,
    pub potential_payout: u64,
    pub next_multiplier_bps: Option<u64>,
    /// sha256 of `"{salt}:{traps}"`, fixed at round start.
    pub commitment: String,
    /// `running`, `trapped`, `cashed_out`, `completed` or `stopped`.
    pub status: String,
    pub revealed_traps: Option<Vec<usize>>,
    pub revealed_salt: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PickResponse {
    pub safe: bool,
    pub tower: TowerResponse,
    pub settlement: Option<SettlementView>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CashoutResponse {
    pub tower: TowerResponse,
    pub settlement: SettlementView,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SessionResponse {
    pub phase: String,
    pub turn_token: u64,
    pub balance_snapshot: Option<u64>,
    pub stake: u64,
    pub last_win: u64,
    /// Total of wins not yet credited.
    pub pending_credits: u64,
    pub notice: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("missing or invalid bearer token")]
    Unauthorized,
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::Invalid(_) => "invalid",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Unavailable(_) => "unavailable",
            ApiError::Internal => "internal",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tower_start_shape_is_optional() {
        let req: TowerStartRequest = serde_json::from_str(r#"{"stake":10}"#).unwrap();
        assert_eq!(req.stake, 10);
        assert_eq!(req.rows, None);
        assert_eq!(req.cols, None);
    }

    #[test]
    fn settlement_is_tagged() {
        let json = serde_json::to_value(SettlementView::Credited {
            amount: 12,
            balance: 102,
        })
        .unwrap();
        assert_eq!(json["status"], "credited");
        assert_eq!(json["amount"], 12);
    }

    #[test]
    fn error_body_carries_code() {
        let body = ApiError::Conflict("a round is already in progress".into()).body();
        assert_eq!(body.code, "conflict");
        assert_eq!(body.message, "a round is already in progress");
    }
}
