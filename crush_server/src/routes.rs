use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crush_core::{
    session::PickRecord, AccountId, CashoutReport, ConfigError, GameError, Ledger, Phase,
    PickOutcome, PickReport, Session, Settlement, SpinReport, TowerOutcome, TowerShape, TowerView,
};
use crush_shared::{
    AccountRecord, ApiError, BalanceResponse, CashoutResponse, CellRef, EnsureAccountRequest,
    LineView, PickRequest, PickResponse, PickView, SessionResponse, SettlementView, SpinRequest,
    SpinResponse, TowerResponse, TowerStartRequest,
};

use crate::state::AppState;

type BearerHeader = Option<TypedHeader<Authorization<Bearer>>>;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/account", get(route_account).post(route_ensure_account))
        .route("/balance", get(route_balance))
        .route("/session", get(route_session))
        .route("/slots/spin", post(route_spin))
        .route("/tower", get(route_tower))
        .route("/tower/start", post(route_tower_start))
        .route("/tower/pick", post(route_tower_pick))
        .route("/tower/cashout", post(route_tower_cashout))
        .route("/stop", post(route_stop))
        .route("/reset", post(route_reset))
        .route("/reconcile", post(route_reconcile))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

pub struct Failure(pub ApiError);

impl From<GameError> for Failure {
    fn from(err: GameError) -> Self {
        let message = err.to_string();
        Failure(match err {
            GameError::NotAuthenticated => ApiError::Unauthorized,
            GameError::InvalidStake { .. } | GameError::InvalidPick { .. } => {
                ApiError::Invalid(message)
            }
            GameError::AccountNotInitialized => ApiError::NotFound(message),
            GameError::InsufficientFunds { .. }
            | GameError::StaleTurn
            | GameError::RoundInProgress
            | GameError::NoActiveRound
            | GameError::CashoutNotAllowed
            | GameError::NothingToReconcile => ApiError::Conflict(message),
            GameError::LedgerTransient(reason) => ApiError::Unavailable(reason),
            GameError::CorruptPersistedState(reason) => {
                error!(%reason, "unreadable session");
                ApiError::Internal
            }
        })
    }
}

impl From<ConfigError> for Failure {
    fn from(err: ConfigError) -> Self {
        error!(%err, "game config rejected");
        Failure(ApiError::Internal)
    }
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        error!(?err, "request failed");
        Failure(ApiError::Internal)
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Invalid(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self.0.body())).into_response()
    }
}

/// The bearer token names the player's account.
fn account_of(bearer: BearerHeader) -> Result<AccountId, Failure> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(Failure(ApiError::Unauthorized))?;
    let token = bearer.token();
    let valid = !token.is_empty()
        && token.len() <= 64
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(Failure(ApiError::Unauthorized));
    }
    Ok(AccountId::new(token))
}

fn settlement_view(settlement: &Settlement) -> SettlementView {
    match settlement {
        Settlement::Lost => SettlementView::Lost,
        Settlement::Credited { amount, balance } => SettlementView::Credited {
            amount: *amount,
            balance: *balance,
        },
        Settlement::PendingCredit { amount, reason } => SettlementView::PendingCredit {
            amount: *amount,
            reason: reason.clone(),
        },
    }
}

fn phase_name(phase: Phase) -> &'static str {
    match phase {
        Phase::Idle => "idle",
        Phase::Staking => "staking",
        Phase::Animating => "animating",
        Phase::AwaitingPick => "awaiting_pick",
        Phase::AwaitingSettlement => "awaiting_settlement",
        Phase::Settled => "settled",
    }
}

fn session_response(session: &Session) -> SessionResponse {
    SessionResponse {
        phase: phase_name(session.phase).to_string(),
        turn_token: session.turn_token,
        balance_snapshot: session.balance_snapshot,
        stake: session.stake,
        last_win: session.last_win,
        pending_credits: session.pending_credits.iter().map(|p| p.amount).sum(),
        notice: session.notice.clone(),
    }
}

fn spin_response(report: &SpinReport) -> SpinResponse {
    SpinResponse {
        turn_token: report.token,
        grid: report
            .grid
            .as_rows()
            .iter()
            .map(|row| row.iter().map(|key| key.name().to_string()).collect())
            .collect(),
        lines: report
            .result
            .lines
            .iter()
            .map(|win| LineView {
                kind: win.line.kind.name().to_string(),
                index: win.line.index,
                symbol: win.symbol.name().to_string(),
            })
            .collect(),
        winning_cells: report
            .winning_cells
            .iter()
            .map(|cell| CellRef {
                row: cell.row,
                col: cell.col,
            })
            .collect(),
        bonus_bps: report.result.bonus_bps,
        reward: report.result.reward,
        settlement: settlement_view(&report.settlement),
        balance: report.balance,
    }
}

fn pick_view(record: &PickRecord) -> PickView {
    PickView {
        row: record.row,
        column: record.pick,
        safe: record.outcome == PickOutcome::Safe,
    }
}

fn tower_response(view: &TowerView) -> TowerResponse {
    let status = match view.outcome {
        None => "running",
        Some(TowerOutcome::Trapped) => "trapped",
        Some(TowerOutcome::CashedOut { .. }) => "cashed_out",
        Some(TowerOutcome::Completed { .. }) => "completed",
        Some(TowerOutcome::Stopped) => "stopped",
    };
    TowerResponse {
        stake: view.stake,
        rows: view.shape.rows,
        cols: view.shape.cols,
        active_row: view.active_row,
        history: view.history.iter().map(pick_view).collect(),
        potential_payout: view.potential_payout,
        next_multiplier_bps: view.next_multiplier_bps,
        commitment: view.commitment.clone(),
        status: status.to_string(),
        revealed_traps: view.revealed_traps.clone(),
        revealed_salt: view.revealed_salt.clone(),
    }
}

fn pick_response(report: &PickReport) -> PickResponse {
    PickResponse {
        safe: report.outcome == PickOutcome::Safe,
        tower: tower_response(&report.tower),
        settlement: report.settlement.as_ref().map(settlement_view),
    }
}

fn cashout_response(report: &CashoutReport) -> CashoutResponse {
    CashoutResponse {
        tower: tower_response(&report.tower),
        settlement: settlement_view(&report.settlement),
    }
}

pub async fn route_ensure_account(
    State(state): State<Arc<AppState>>,
    bearer: BearerHeader,
    Json(req): Json<EnsureAccountRequest>,
) -> Result<Json<AccountRecord>, Failure> {
    let account = account_of(bearer)?;
    let display_name = req.display_name.trim();
    if display_name.is_empty() || display_name.len() > 64 {
        return Err(Failure(ApiError::Invalid("display name must be 1-64 characters".into())));
    }
    let arcade = state.open(&account)?;
    arcade
        .ensure_account(display_name, state.initial_credits)
        .await?;
    let record = state
        .ledger
        .account(&account)
        .await?
        .ok_or(GameError::AccountNotInitialized)?;
    Ok(Json(record))
}

pub async fn route_account(
    State(state): State<Arc<AppState>>,
    bearer: BearerHeader,
) -> Result<Json<AccountRecord>, Failure> {
    let account = account_of(bearer)?;
    let record = state
        .ledger
        .account(&account)
        .await?
        .ok_or(GameError::AccountNotInitialized)?;
    Ok(Json(record))
}

pub async fn route_balance(
    State(state): State<Arc<AppState>>,
    bearer: BearerHeader,
) -> Result<Json<BalanceResponse>, Failure> {
    let account = account_of(bearer)?;
    let credits = state.ledger.balance(&account).await.map_err(GameError::from)?;
    Ok(Json(BalanceResponse { credits }))
}

pub async fn route_session(
    State(state): State<Arc<AppState>>,
    bearer: BearerHeader,
) -> Result<Json<SessionResponse>, Failure> {
    let account = account_of(bearer)?;
    let arcade = state.arcade(&account).await?;
    Ok(Json(session_response(&arcade.session())))
}

pub async fn route_spin(
    State(state): State<Arc<AppState>>,
    bearer: BearerHeader,
    Json(req): Json<SpinRequest>,
) -> Result<Json<SpinResponse>, Failure> {
    let account = account_of(bearer)?;
    let report = state.arcade(&account).await?.spin(req.stake).await?;
    Ok(Json(spin_response(&report)))
}

pub async fn route_tower(
    State(state): State<Arc<AppState>>,
    bearer: BearerHeader,
) -> Result<Json<TowerResponse>, Failure> {
    let account = account_of(bearer)?;
    let view = state
        .arcade(&account)
        .await?
        .tower_view()
        .ok_or(GameError::NoActiveRound)?;
    Ok(Json(tower_response(&view)))
}

pub async fn route_tower_start(
    State(state): State<Arc<AppState>>,
    bearer: BearerHeader,
    Json(req): Json<TowerStartRequest>,
) -> Result<Json<TowerResponse>, Failure> {
    let account = account_of(bearer)?;
    let shape = match (req.rows, req.cols) {
        (None, None) => None,
        (rows, cols) => {
            let default = state.game.tower.default_shape;
            Some(TowerShape {
                rows: rows.unwrap_or(default.rows),
                cols: cols.unwrap_or(default.cols),
            })
        }
    };
    let view = state
        .arcade(&account)
        .await?
        .start_tower(req.stake, shape)
        .await?;
    Ok(Json(tower_response(&view)))
}

pub async fn route_tower_pick(
    State(state): State<Arc<AppState>>,
    bearer: BearerHeader,
    Json(req): Json<PickRequest>,
) -> Result<Json<PickResponse>, Failure> {
    let account = account_of(bearer)?;
    let report = state.arcade(&account).await?.pick(req.column).await?;
    Ok(Json(pick_response(&report)))
}

pub async fn route_tower_cashout(
    State(state): State<Arc<AppState>>,
    bearer: BearerHeader,
) -> Result<Json<CashoutResponse>, Failure> {
    let account = account_of(bearer)?;
    let report = state.arcade(&account).await?.cashout().await?;
    Ok(Json(cashout_response(&report)))
}

pub async fn route_stop(
    State(state): State<Arc<AppState>>,
    bearer: BearerHeader,
) -> Result<Json<SessionResponse>, Failure> {
    let account = account_of(bearer)?;
    let session = state.arcade(&account).await?.stop();
    Ok(Json(session_response(&session)))
}

pub async fn route_reset(
    State(state): State<Arc<AppState>>,
    bearer: BearerHeader,
) -> Result<Json<SessionResponse>, Failure> {
    let account = account_of(bearer)?;
    let session = state.arcade(&account).await?.reset();
    Ok(Json(session_response(&session)))
}

pub async fn route_reconcile(
    State(state): State<Arc<AppState>>,
    bearer: BearerHeader,
) -> Result<Json<BalanceResponse>, Failure> {
    let account = account_of(bearer)?;
    let credits = state.arcade(&account).await?.reconcile().await?;
    Ok(Json(BalanceResponse { credits }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crush_core::{GameConfig, RevealPacing};
    use tempfile::TempDir;

    use crate::ledger::SqliteLedger;

    async fn state() -> (Arc<AppState>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SqliteLedger::connect("sqlite::memory:", 1).await.unwrap();
        let mut game = GameConfig::default();
        game.slots.reveal = RevealPacing::INSTANT;
        let state = AppState::new(ledger, game, dir.path().to_path_buf(), 1000);
        (Arc::new(state), dir)
    }

    fn bearer(token: &str) -> BearerHeader {
        Some(TypedHeader(Authorization::bearer(token).unwrap()))
    }

    fn status(err: Failure) -> StatusCode {
        err.into_response().status()
    }

    async fn open_account(state: &Arc<AppState>, token: &str) -> AccountRecord {
        let Json(record) = route_ensure_account(
            State(state.clone()),
            bearer(token),
            Json(EnsureAccountRequest {
                display_name: "Player".into(),
            }),
        )
        .await
        .map_err(|e| e.0)
        .unwrap();
        record
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let (state, _dir) = state().await;
        let err = route_spin(State(state.clone()), None, Json(SpinRequest { stake: 10 }))
            .await
            .err()
            .unwrap();
        assert_eq!(status(err), StatusCode::UNAUTHORIZED);

        let err = route_balance(State(state), bearer("bad/token")).await.err().unwrap();
        assert_eq!(status(err), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn spin_settles_against_the_ledger() {
        let (state, _dir) = state().await;
        let record = open_account(&state, "p1").await;
        assert_eq!(record.credits, 1000);

        let Json(spin) = route_spin(State(state.clone()), bearer("p1"), Json(SpinRequest { stake: 10 }))
            .await
            .map_err(|e| e.0)
            .unwrap();
        assert_eq!(spin.grid.len(), 3);
        assert_eq!(spin.balance, 990 + spin.reward);
        match spin.settlement {
            SettlementView::Lost => assert_eq!(spin.reward, 0),
            SettlementView::Credited { amount, balance } => {
                assert_eq!(amount, spin.reward);
                assert_eq!(balance, spin.balance);
            }
            other => panic!("unexpected settlement {other:?}"),
        }

        let Json(balance) = route_balance(State(state.clone()), bearer("p1"))
            .await
            .map_err(|e| e.0)
            .unwrap();
        assert_eq!(balance.credits, spin.balance);

        let Json(session) = route_session(State(state), bearer("p1"))
            .await
            .map_err(|e| e.0)
            .unwrap();
        assert_eq!(session.phase, "settled");
        assert_eq!(session.turn_token, spin.turn_token);
    }

    #[tokio::test]
    async fn game_errors_map_to_statuses() {
        let (state, _dir) = state().await;
        let err = route_spin(State(state.clone()), bearer("nobody"), Json(SpinRequest { stake: 10 }))
            .await
            .err()
            .unwrap();
        assert_eq!(status(err), StatusCode::NOT_FOUND);

        open_account(&state, "p2").await;
        let err = route_spin(State(state.clone()), bearer("p2"), Json(SpinRequest { stake: 1 }))
            .await
            .err()
            .unwrap();
        assert_eq!(status(err), StatusCode::BAD_REQUEST);

        let err = route_tower_cashout(State(state.clone()), bearer("p2"))
            .await
            .err()
            .unwrap();
        assert_eq!(status(err), StatusCode::CONFLICT);

        assert_eq!(
            status(Failure::from(GameError::LedgerTransient("down".into()))),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn unknown_accounts_open_no_arcade() {
        let (state, _dir) = state().await;
        for token in ["ghost-1", "ghost-2", "ghost.3"] {
            let err = route_session(State(state.clone()), bearer(token))
                .await
                .err()
                .unwrap();
            assert_eq!(status(err), StatusCode::NOT_FOUND);
        }
        assert_eq!(state.open_arcades(), 0);

        open_account(&state, "p4").await;
        route_session(State(state.clone()), bearer("p4"))
            .await
            .map_err(|e| e.0)
            .unwrap();
        assert_eq!(state.open_arcades(), 1);
    }

    #[tokio::test]
    async fn tower_round_over_http() {
        let (state, _dir) = state().await;
        open_account(&state, "p3").await;
        let Json(tower) = route_tower_start(
            State(state.clone()),
            bearer("p3"),
            Json(TowerStartRequest {
                stake: 10,
                rows: Some(99),
                cols: None,
            }),
        )
        .await
        .map_err(|e| e.0)
        .unwrap();
        assert_eq!(tower.rows, 50);
        assert_eq!(tower.cols, 3);
        assert_eq!(tower.status, "running");
        assert_eq!(tower.revealed_traps, None);

        let err = route_tower_cashout(State(state.clone()), bearer("p3"))
            .await
            .err()
            .unwrap();
        assert_eq!(status(err), StatusCode::CONFLICT);

        let err = route_tower_pick(State(state.clone()), bearer("p3"), Json(PickRequest { column: 3 }))
            .await
            .err()
            .unwrap();
        assert_eq!(status(err), StatusCode::BAD_REQUEST);

        let Json(pick) = route_tower_pick(State(state.clone()), bearer("p3"), Json(PickRequest { column: 0 }))
            .await
            .map_err(|e| e.0)
            .unwrap();
        if pick.safe {
            assert_eq!(pick.tower.active_row, 1);
            assert_eq!(pick.tower.potential_payout, 12);
        } else {
            assert_eq!(pick.settlement, Some(SettlementView::Lost));
            assert_eq!(pick.tower.status, "trapped");
            assert!(pick.tower.revealed_traps.is_some());
        }

        let Json(session) = route_stop(State(state.clone()), bearer("p3"))
            .await
            .map_err(|e| e.0)
            .unwrap();
        assert_eq!(session.phase, if pick.safe { "idle" } else { "settled" });
        let Json(session) = route_reset(State(state), bearer("p3"))
            .await
            .map_err(|e| e.0)
            .unwrap();
        assert_eq!(session.phase, "idle");
        assert_eq!(session.last_win, 0);
    }
}
