//! The arcade controller.
//!
//! [`Arcade`] owns one player's [`Session`] and drives every round through the
//! same sequence: stake debit, reveal, evaluation, winnings credit, snapshot.
//! Each action captures the session's turn token when it starts and re-checks
//! it after every suspension point; `stop`, `reset` and a new round bump the
//! token, so a superseded action finds a mismatch and abandons all further
//! mutation. The round lock is held through a [`RoundLock`] guard that
//! releases it on every exit path.

use std::sync::{Arc, Mutex, MutexGuard};

use rand::RngCore;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    config::{ConfigError, GameConfig, TowerShape},
    error::GameError,
    grid::{check_pick, evaluate, winning_cells, Cell, Grid, LineSet, PickOutcome},
    ledger::{AccountId, Ledger, TxKind, TxRef},
    paytable::{Paytable, TowerMultipliers, WinResult},
    rng::{bounded, entropy, SharedRng},
    session::{
        PendingCredit, Phase, PickRecord, Round, Session, Settlement, SlotsRound,
        TowerOutcome, TowerRound,
    },
    snapshot::SnapshotStore,
};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArcadeEvent {
    /// Cosmetic reel frame; never evaluated.
    Frame { token: u64, grid: Grid },
    Balance { credits: u64 },
    Settled { token: u64, settlement: Settlement },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpinReport {
    pub token: u64,
    pub grid: Grid,
    pub result: WinResult,
    /// Union of the winning lines' cells, each listed once.
    pub winning_cells: Vec<Cell>,
    pub settlement: Settlement,
    pub balance: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TowerView {
    pub stake: u64,
    pub shape: TowerShape,
    pub active_row: usize,
    pub history: Vec<PickRecord>,
    pub potential_payout: u64,
    pub next_multiplier_bps: Option<u64>,
    pub commitment: String,
    pub outcome: Option<TowerOutcome>,
    /// Trap layout and salt, revealed once the round is over.
    pub revealed_traps: Option<Vec<usize>>,
    pub revealed_salt: Option<String>,
}

impl TowerView {
    pub fn of(round: &TowerRound, multipliers: &TowerMultipliers) -> Self {
        let running = round.is_running();
        Self {
            stake: round.stake,
            shape: round.shape,
            active_row: round.active_row,
            history: round.history.clone(),
            potential_payout: round.potential_payout,
            next_multiplier_bps: if running {
                multipliers.get(round.active_row)
            } else {
                None
            },
            commitment: round.commitment(),
            outcome: round.outcome,
            revealed_traps: (!running).then(|| round.trap_columns.clone()),
            revealed_salt: (!running).then(|| round.salt.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PickReport {
    pub outcome: PickOutcome,
    pub tower: TowerView,
    /// Present once the pick ended the round.
    pub settlement: Option<Settlement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CashoutReport {
    pub tower: TowerView,
    pub settlement: Settlement,
}

struct Table {
    session: Session,
    /// Token of the action holding the round lock.
    lock_owner: Option<u64>,
    account: Option<AccountId>,
    rng: SharedRng,
}

impl Table {
    fn ensure_free(&self) -> Result<(), GameError> {
        if self.lock_owner.is_some() || self.session.phase == Phase::AwaitingPick {
            return Err(GameError::RoundInProgress);
        }
        Ok(())
    }

    /// Start a new turn: bump the token and take the round lock.
    fn begin_round(&mut self) -> (u64, u64) {
        self.session.turn_token += 1;
        let token = self.session.turn_token;
        self.lock_owner = Some(token);
        self.session.phase = Phase::Staking;
        // Random high half survives a wiped snapshot; the token keeps ids
        // distinct within one session.
        let round_id = (self.rng.next_u64() << 32) | (token & 0xffff_ffff);
        (token, round_id)
    }
}

fn lock_table(table: &Mutex<Table>) -> MutexGuard<'_, Table> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Releases the round lock when dropped, unless a newer action owns it.
struct RoundLock<'a> {
    table: &'a Mutex<Table>,
    token: u64,
}

impl<'a> RoundLock<'a> {
    fn new(table: &'a Mutex<Table>, token: u64) -> Self {
        Self { table, token }
    }
}

impl Drop for RoundLock<'_> {
    fn drop(&mut self) {
        let mut table = lock_table(self.table);
        if table.lock_owner != Some(self.token) {
            debug!(token = self.token, "round lock already released");
            return;
        }
        table.lock_owner = None;
        if table.session.turn_token == self.token && table.session.phase.is_transient() {
            table.session.phase = Phase::Idle;
        }
        debug!(token = self.token, "round lock released");
    }
}

struct Shared<L, S> {
    config: GameConfig,
    lines: LineSet,
    ledger: Arc<L>,
    store: S,
    table: Mutex<Table>,
    events: broadcast::Sender<ArcadeEvent>,
}

enum PickStep {
    Trapped,
    Climbed,
    Completed { payout: u64, round_id: u64 },
}

pub struct Arcade<L, S> {
    shared: Arc<Shared<L, S>>,
}

impl<L, S> Clone for Arcade<L, S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<L: Ledger, S: SnapshotStore> Arcade<L, S> {
    /// Arcade drawing from OS entropy, resuming whatever `store` holds.
    pub fn new(config: GameConfig, ledger: Arc<L>, store: S) -> Result<Self, ConfigError> {
        Self::with_rng(config, ledger, store, entropy())
    }

    pub fn with_rng(
        config: GameConfig,
        ledger: Arc<L>,
        store: S,
        rng: SharedRng,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let lines = config.slots.line_set().into_owned();
        let mut session = store.load();
        if let Err(reason) = session.check_against(&config) {
            warn!(%reason, "stored round does not fit the game config, dropping it");
            session = Session::reset_from(&session);
        }
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                lines,
                ledger,
                store,
                table: Mutex::new(Table {
                    session,
                    lock_owner: None,
                    account: None,
                    rng,
                }),
                events,
            }),
        })
    }

    pub fn config(&self) -> &GameConfig {
        &self.shared.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArcadeEvent> {
        self.shared.events.subscribe()
    }

    pub fn session(&self) -> Session {
        self.table().session.clone()
    }

    pub fn is_locked(&self) -> bool {
        self.table().lock_owner.is_some()
    }

    pub fn account(&self) -> Option<AccountId> {
        self.table().account.clone()
    }

    pub fn tower_view(&self) -> Option<TowerView> {
        let table = self.table();
        table
            .session
            .tower()
            .map(|round| TowerView::of(round, &self.shared.config.tower.multipliers))
    }

    /// Attach the player. Switching to a different player discards the
    /// previous player's session.
    pub fn sign_in(&self, account: AccountId) {
        let mut table = self.table();
        if table.account.as_ref() == Some(&account) {
            return;
        }
        let foreign = table
            .session
            .pending_credits
            .iter()
            .any(|p| !p.reference.belongs_to(&account));
        if foreign {
            warn!(%account, "stored session owes another player, starting fresh");
        }
        if table.account.is_some() || foreign {
            self.discard_session(&mut table);
        }
        info!(%account, "player signed in");
        table.account = Some(account);
    }

    pub fn sign_out(&self) {
        let mut table = self.table();
        if let Some(account) = table.account.take() {
            info!(%account, "player signed out");
            self.discard_session(&mut table);
        }
    }

    fn discard_session(&self, table: &mut Table) {
        let token = table.session.turn_token + 1;
        table.session = Session {
            turn_token: token,
            ..Session::default()
        };
        table.lock_owner = None;
        self.persist(&table.session);
    }

    /// Create the ledger record if the player has none yet.
    pub async fn ensure_account(
        &self,
        display_name: &str,
        initial_credits: u64,
    ) -> Result<u64, GameError> {
        let (account, token) = self.current_player()?;
        let balance = self
            .shared
            .ledger
            .ensure_account(&account, display_name, initial_credits)
            .await?;
        self.with_current(token, |t| t.session.balance_snapshot = Some(balance))?;
        self.emit(ArcadeEvent::Balance { credits: balance });
        Ok(balance)
    }

    /// Re-read the balance from the ledger.
    pub async fn refresh_balance(&self) -> Result<u64, GameError> {
        let (account, token) = self.current_player()?;
        let balance = self.shared.ledger.balance(&account).await?;
        self.with_current(token, |t| t.session.balance_snapshot = Some(balance))?;
        self.emit(ArcadeEvent::Balance { credits: balance });
        Ok(balance)
    }

    /// One slots round: debit, cosmetic frames, committed grid, credit.
    pub async fn spin(&self, stake: u64) -> Result<SpinReport, GameError> {
        let stake = self.shared.config.stakes.check(stake)?;
        let (account, token, round_id) = {
            let mut table = self.table();
            let account = table.account.clone().ok_or(GameError::NotAuthenticated)?;
            table.ensure_free()?;
            let (token, round_id) = table.begin_round();
            (account, token, round_id)
        };
        let _lock = RoundLock::new(&self.shared.table, token);
        info!(%account, stake, token, "spin started");

        let debited = self.debit(&account, stake, round_id, token).await?;

        let slots = &self.shared.config.slots;
        self.with_current(token, |t| {
            t.session.phase = Phase::Animating;
            t.session.round = Some(Round::Slots(SlotsRound {
                round_id,
                stake,
                grid: None,
                result: None,
            }));
        })?;
        for frame in 0..slots.reveal.frames {
            let grid = self.with_current(token, |t| {
                Grid::build(&slots.symbols, slots.rows, slots.cols, &mut *t.rng)
            })?;
            debug!(token, frame, "reel frame");
            self.emit(ArcadeEvent::Frame { token, grid });
            tokio::time::sleep(slots.reveal.delay(frame)).await;
        }

        let (grid, result) = self.with_current(token, |t| {
            let grid = Grid::build(&slots.symbols, slots.rows, slots.cols, &mut *t.rng);
            let wins = evaluate(&grid, &self.shared.lines);
            let result = Paytable::new(&slots.symbols, &slots.bonus).settle(wins, stake);
            if let Some(Round::Slots(round)) = &mut t.session.round {
                round.grid = Some(grid.clone());
                round.result = Some(result.clone());
            }
            t.session.last_win = result.reward;
            t.session.phase = Phase::AwaitingSettlement;
            (grid, result)
        })?;
        debug!(token, lines = result.lines.len(), reward = result.reward, "grid committed");

        let settlement = self
            .settle(&account, round_id, result.reward, token)
            .await?;
        let balance = match &settlement {
            Settlement::Credited { balance, .. } => *balance,
            _ => debited,
        };
        Ok(SpinReport {
            token,
            winning_cells: winning_cells(&result.lines).into_iter().collect(),
            grid,
            result,
            settlement,
            balance,
        })
    }

    /// Debit the stake and open a tower round with a fresh trap layout.
    pub async fn start_tower(
        &self,
        stake: u64,
        shape: Option<TowerShape>,
    ) -> Result<TowerView, GameError> {
        let stake = self.shared.config.stakes.check(stake)?;
        let shape = self.shared.config.tower.clamp(shape);
        let (account, token, round_id) = {
            let mut table = self.table();
            let account = table.account.clone().ok_or(GameError::NotAuthenticated)?;
            table.ensure_free()?;
            let (token, round_id) = table.begin_round();
            (account, token, round_id)
        };
        let _lock = RoundLock::new(&self.shared.table, token);
        info!(%account, stake, rows = shape.rows, cols = shape.cols, token, "tower started");

        self.debit(&account, stake, round_id, token).await?;

        let multipliers = &self.shared.config.tower.multipliers;
        self.with_current(token, |t| {
            let trap_columns = (0..shape.rows)
                .map(|_| bounded(&mut *t.rng, shape.cols as u32) as usize)
                .collect();
            let mut salt = [0u8; 16];
            t.rng.fill_bytes(&mut salt);
            let round = TowerRound {
                round_id,
                stake,
                shape,
                trap_columns,
                salt: hex::encode(salt),
                active_row: 0,
                history: Vec::new(),
                potential_payout: 0,
                outcome: None,
            };
            let view = TowerView::of(&round, multipliers);
            t.session.round = Some(Round::Tower(round));
            t.session.phase = Phase::AwaitingPick;
            t.session.last_win = 0;
            self.persist(&t.session);
            view
        })
    }

    /// Reveal one tile on the active row.
    pub async fn pick(&self, column: usize) -> Result<PickReport, GameError> {
        let multipliers = &self.shared.config.tower.multipliers;
        let (account, token, outcome, step) = {
            let mut table = self.table();
            let account = table.account.clone().ok_or(GameError::NotAuthenticated)?;
            if table.lock_owner.is_some() {
                return Err(GameError::RoundInProgress);
            }
            if table.session.phase != Phase::AwaitingPick {
                return Err(GameError::NoActiveRound);
            }
            let token = table.session.turn_token;
            let round = match table.session.tower_mut() {
                Some(round) if round.is_running() && round.active_row < round.shape.rows => round,
                _ => return Err(GameError::NoActiveRound),
            };
            if column >= round.shape.cols {
                return Err(GameError::InvalidPick {
                    column,
                    cols: round.shape.cols,
                });
            }

            let row = round.active_row;
            let outcome = check_pick(round.trap_columns[row], column);
            round.history.push(PickRecord {
                row,
                pick: column,
                outcome,
            });
            let step = match outcome {
                PickOutcome::Trap => {
                    round.outcome = Some(TowerOutcome::Trapped);
                    round.potential_payout = 0;
                    PickStep::Trapped
                }
                PickOutcome::Safe => {
                    round.active_row += 1;
                    round.potential_payout =
                        multipliers.potential_payout(round.stake, round.active_row);
                    if round.active_row == round.shape.rows {
                        let payout = round.potential_payout;
                        round.outcome = Some(TowerOutcome::Completed { payout });
                        PickStep::Completed {
                            payout,
                            round_id: round.round_id,
                        }
                    } else {
                        PickStep::Climbed
                    }
                }
            };
            debug!(token, row, column, ?outcome, "tile picked");

            match step {
                PickStep::Trapped => {
                    table.session.phase = Phase::Settled;
                    table.session.last_win = 0;
                    self.persist(&table.session);
                }
                PickStep::Climbed => self.persist(&table.session),
                PickStep::Completed { .. } => {
                    table.session.phase = Phase::AwaitingSettlement;
                    table.lock_owner = Some(token);
                }
            }
            (account, token, outcome, step)
        };

        let settlement = match step {
            PickStep::Trapped => {
                info!(%account, token, "tower trapped");
                self.emit(ArcadeEvent::Settled {
                    token,
                    settlement: Settlement::Lost,
                });
                Some(Settlement::Lost)
            }
            PickStep::Climbed => None,
            PickStep::Completed { payout, round_id } => {
                let _lock = RoundLock::new(&self.shared.table, token);
                info!(%account, token, payout, "tower completed");
                Some(self.settle(&account, round_id, payout, token).await?)
            }
        };
        let tower = self.tower_view().ok_or(GameError::StaleTurn)?;
        Ok(PickReport {
            outcome,
            tower,
            settlement,
        })
    }

    /// Credit the current potential payout and end the tower round.
    pub async fn cashout(&self) -> Result<CashoutReport, GameError> {
        let (account, token, payout, round_id) = {
            let mut table = self.table();
            let account = table.account.clone().ok_or(GameError::NotAuthenticated)?;
            if table.lock_owner.is_some() {
                return Err(GameError::RoundInProgress);
            }
            if table.session.phase != Phase::AwaitingPick {
                return Err(GameError::NoActiveRound);
            }
            let token = table.session.turn_token;
            let round = match table.session.tower_mut() {
                Some(round) if round.is_running() => round,
                _ => return Err(GameError::NoActiveRound),
            };
            if round.active_row == 0 {
                return Err(GameError::CashoutNotAllowed);
            }
            let payout = self
                .shared
                .config
                .tower
                .multipliers
                .potential_payout(round.stake, round.active_row);
            round.potential_payout = payout;
            let round_id = round.round_id;
            round.outcome = Some(TowerOutcome::CashedOut { payout });
            table.session.phase = Phase::AwaitingSettlement;
            table.lock_owner = Some(token);
            (account, token, payout, round_id)
        };
        let _lock = RoundLock::new(&self.shared.table, token);
        info!(%account, token, payout, "tower cashout");

        let settlement = self.settle(&account, round_id, payout, token).await?;
        let tower = self.tower_view().ok_or(GameError::StaleTurn)?;
        Ok(CashoutReport { tower, settlement })
    }

    /// Abandon the round in progress without settling it. A running tower is
    /// forfeited; the stake stays debited.
    pub fn stop(&self) -> Session {
        let mut table = self.table();
        table.session.turn_token += 1;
        table.lock_owner = None;
        if let Some(round) = table.session.tower_mut() {
            if round.is_running() {
                round.outcome = Some(TowerOutcome::Stopped);
            }
        }
        if matches!(table.session.phase, Phase::AwaitingPick) || table.session.phase.is_transient() {
            table.session.phase = Phase::Idle;
            table.session.notice = Some("round stopped".into());
        }
        info!(token = table.session.turn_token, "round stopped");
        self.persist(&table.session);
        table.session.clone()
    }

    /// Back to a fresh session. Unreconciled wins are kept.
    pub fn reset(&self) -> Session {
        let mut table = self.table();
        let mut fresh = Session::reset_from(&table.session);
        fresh.turn_token += 1;
        table.session = fresh;
        table.lock_owner = None;
        info!(token = table.session.turn_token, "session reset");
        self.persist(&table.session);
        table.session.clone()
    }

    /// Retry every win whose credit failed, with its original reference.
    pub async fn reconcile(&self) -> Result<u64, GameError> {
        let (account, token, pending) = {
            let mut table = self.table();
            let account = table.account.clone().ok_or(GameError::NotAuthenticated)?;
            if table.lock_owner.is_some() {
                return Err(GameError::RoundInProgress);
            }
            if table.session.pending_credits.is_empty() {
                return Err(GameError::NothingToReconcile);
            }
            let token = table.session.turn_token;
            table.lock_owner = Some(token);
            (account, token, table.session.pending_credits.clone())
        };
        let _lock = RoundLock::new(&self.shared.table, token);

        let mut settled = Vec::new();
        let mut balance = None;
        let mut failure = None;
        for credit in &pending {
            match self
                .shared
                .ledger
                .credit(&account, credit.amount, &credit.reference)
                .await
            {
                Ok(credited) => {
                    info!(%account, amount = credit.amount, reference = %credit.reference, "pending win credited");
                    settled.push(credit.reference.clone());
                    balance = Some(credited);
                }
                Err(err) => {
                    warn!(%account, reference = %credit.reference, %err, "pending win still not credited");
                    failure = Some(GameError::from(err));
                }
            }
        }

        let remaining = self.with_current(token, |t| {
            t.session
                .pending_credits
                .retain(|p| !settled.contains(&p.reference));
            if let Some(balance) = balance {
                t.session.balance_snapshot = Some(balance);
            }
            if t.session.pending_credits.is_empty() {
                t.session.notice = None;
            }
            self.persist(&t.session);
            t.session.balance_snapshot
        })?;
        if let Some(balance) = balance {
            self.emit(ArcadeEvent::Balance { credits: balance });
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(remaining.unwrap_or_default()),
        }
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        lock_table(&self.shared.table)
    }

    fn current_player(&self) -> Result<(AccountId, u64), GameError> {
        let table = self.table();
        let account = table.account.clone().ok_or(GameError::NotAuthenticated)?;
        Ok((account, table.session.turn_token))
    }

    /// Run `f` only if no reset, stop or newer round superseded `token`.
    fn with_current<T>(
        &self,
        token: u64,
        f: impl FnOnce(&mut Table) -> T,
    ) -> Result<T, GameError> {
        let mut table = self.table();
        if table.session.turn_token != token {
            warn!(
                token,
                current = table.session.turn_token,
                "stale turn dropped"
            );
            return Err(GameError::StaleTurn);
        }
        Ok(f(&mut table))
    }

    async fn debit(
        &self,
        account: &AccountId,
        stake: u64,
        round_id: u64,
        token: u64,
    ) -> Result<u64, GameError> {
        let reference = TxRef::new(account, round_id, TxKind::Stake);
        match self
            .shared
            .ledger
            .conditional_debit(account, stake, &reference)
            .await
        {
            Ok(balance) => {
                self.with_current(token, |t| {
                    t.session.balance_snapshot = Some(balance);
                    t.session.stake = stake;
                    t.session.notice = None;
                })?;
                self.emit(ArcadeEvent::Balance { credits: balance });
                Ok(balance)
            }
            Err(err) => {
                let err = GameError::from_debit(err, stake);
                warn!(%account, stake, %err, "stake rejected");
                self.with_current(token, |t| {
                    t.session.phase = Phase::Idle;
                    t.session.notice = Some(err.to_string());
                    if let GameError::InsufficientFunds { balance, .. } = &err {
                        t.session.balance_snapshot = Some(*balance);
                    }
                })?;
                Err(err)
            }
        }
    }

    /// Credit `amount` (if any) and move the session to `Settled`. A failed
    /// credit leaves a pending credit behind instead of an error.
    async fn settle(
        &self,
        account: &AccountId,
        round_id: u64,
        amount: u64,
        token: u64,
    ) -> Result<Settlement, GameError> {
        let reference = TxRef::new(account, round_id, TxKind::Payout);
        let settlement = if amount == 0 {
            Settlement::Lost
        } else {
            match self.shared.ledger.credit(account, amount, &reference).await {
                Ok(balance) => Settlement::Credited { amount, balance },
                Err(err) => {
                    error!(%account, amount, %reference, %err, "win not credited");
                    Settlement::PendingCredit {
                        amount,
                        reason: err.to_string(),
                    }
                }
            }
        };

        let applied = self.with_current(token, |t| {
            match &settlement {
                Settlement::Lost => {}
                Settlement::Credited { balance, .. } => {
                    t.session.balance_snapshot = Some(*balance);
                }
                Settlement::PendingCredit { amount, .. } => {
                    t.session.pending_credits.push(PendingCredit {
                        amount: *amount,
                        reference: reference.clone(),
                    });
                    t.session.notice = Some(format!("won {amount}, not yet credited"));
                }
            }
            t.session.last_win = amount;
            t.session.phase = Phase::Settled;
            self.persist(&t.session);
        });
        if let Err(err) = applied {
            if let Settlement::PendingCredit { amount, .. } = &settlement {
                self.keep_pending(account, *amount, reference);
            }
            return Err(err);
        }

        if let Settlement::Credited { balance, .. } = &settlement {
            self.emit(ArcadeEvent::Balance { credits: *balance });
        }
        info!(%account, token, ?settlement, "round settled");
        self.emit(ArcadeEvent::Settled {
            token,
            settlement: settlement.clone(),
        });
        Ok(settlement)
    }

    /// Record a win owed by the ledger even though its round was superseded.
    fn keep_pending(&self, account: &AccountId, amount: u64, reference: TxRef) {
        let mut table = self.table();
        if table.account.as_ref() != Some(account) {
            error!(%account, amount, %reference, "player left before an uncredited win was recorded");
            return;
        }
        warn!(%account, amount, %reference, "superseded round left a win uncredited");
        table.session.pending_credits.push(PendingCredit { amount, reference });
        table.session.notice = Some(format!("won {amount}, not yet credited"));
        self.persist(&table.session);
    }

    fn persist(&self, session: &Session) {
        if let Err(err) = self.shared.store.save(session) {
            warn!(%err, "could not persist session");
        }
    }

    fn emit(&self, event: ArcadeEvent) {
        // Nobody listening is fine.
        let _ = self.shared.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ledger::MemoryLedger,
        snapshot::MemorySnapshotStore,
    };
    use rand::rngs::mock::StepRng;

    type TestArcade = Arcade<MemoryLedger, MemorySnapshotStore>;

    fn arcade(credits: u64, rng: StepRng) -> (TestArcade, Arc<MemoryLedger>) {
        let account = AccountId::new("p1");
        let ledger = Arc::new(MemoryLedger::with_account(&account, credits));
        let mut config = GameConfig::default();
        config.slots.reveal = crate::config::RevealPacing::INSTANT;
        let store = MemorySnapshotStore::new();
        let arcade = Arcade::with_rng(config, ledger.clone(), store, Box::new(rng)).unwrap();
        arcade.sign_in(account);
        (arcade, ledger)
    }

    #[test]
    fn test_stale_guard_keeps_newer_lock() {
        let (arcade, _) = arcade(100, StepRng::new(2, 0));
        {
            let mut table = arcade.table();
            table.lock_owner = Some(7);
        }
        drop(RoundLock::new(&arcade.shared.table, 3));
        assert!(arcade.is_locked());
        drop(RoundLock::new(&arcade.shared.table, 7));
        assert!(!arcade.is_locked());
    }

    #[test]
    fn test_guard_returns_transient_phase_to_idle() {
        let (arcade, _) = arcade(100, StepRng::new(2, 0));
        let token = {
            let mut table = arcade.table();
            table.begin_round().0
        };
        assert_eq!(arcade.session().phase, Phase::Staking);
        drop(RoundLock::new(&arcade.shared.table, token));
        assert_eq!(arcade.session().phase, Phase::Idle);
        assert!(!arcade.is_locked());
    }

    #[tokio::test]
    async fn test_locked_round_rejects_new_actions() {
        let (arcade, _) = arcade(100, StepRng::new(2, 0));
        arcade.table().lock_owner = Some(99);
        assert_eq!(arcade.spin(10).await, Err(GameError::RoundInProgress));
        assert_eq!(arcade.start_tower(10, None).await, Err(GameError::RoundInProgress));
        assert_eq!(arcade.pick(0).await.unwrap_err(), GameError::RoundInProgress);
    }

    #[tokio::test]
    async fn test_debit_failure_clears_lock() {
        let (arcade, ledger) = arcade(100, StepRng::new(2, 0));
        ledger.set_offline(true);
        let err = arcade.spin(10).await.unwrap_err();
        assert!(matches!(err, GameError::LedgerTransient(_)));
        assert!(!arcade.is_locked());
        assert_eq!(arcade.session().phase, Phase::Idle);
        assert!(arcade.session().notice.is_some());
        ledger.set_offline(false);
        assert_eq!(ledger.balance(&AccountId::new("p1")).await, Ok(100));
    }

    #[tokio::test]
    async fn test_missing_ledger_account() {
        let ledger = Arc::new(MemoryLedger::new());
        let arcade = Arcade::with_rng(
            GameConfig::default(),
            ledger,
            MemorySnapshotStore::new(),
            Box::new(StepRng::new(2, 0)),
        )
        .unwrap();
        arcade.sign_in(AccountId::new("ghost"));
        assert_eq!(arcade.spin(10).await.unwrap_err(), GameError::AccountNotInitialized);
        assert_eq!(arcade.ensure_account("Ghost", 1000).await, Ok(1000));
        assert_eq!(arcade.session().balance_snapshot, Some(1000));
    }

    #[test]
    fn test_sign_in_switch_discards_session() {
        let (arcade, _) = arcade(100, StepRng::new(2, 0));
        arcade.table().session.last_win = 40;
        let before = arcade.session().turn_token;
        arcade.sign_in(AccountId::new("p1"));
        assert_eq!(arcade.session().last_win, 40);
        arcade.sign_in(AccountId::new("p2"));
        assert_eq!(arcade.session().last_win, 0);
        assert!(arcade.session().turn_token > before);
        arcade.sign_out();
        assert_eq!(arcade.account(), None);
    }
}
