//! Session state: what a player sees and what survives a reload.
//!
//! The round lock is deliberately not part of [`Session`]; it lives beside it in
//! the controller so a restored session is never locked.

use serde::{Deserialize, Serialize};

use crate::{
    config::{GameConfig, TowerShape},
    grid::{check_pick, Grid, PickOutcome},
    ledger::TxRef,
    paytable::WinResult,
    rng::derive_hash_hex,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    /// Stake debit in flight.
    Staking,
    /// Slots reel frames in flight.
    Animating,
    /// Tower round waiting for the next tile.
    AwaitingPick,
    /// Winnings being credited.
    AwaitingSettlement,
    Settled,
}

impl Phase {
    /// Phases that only exist while an action is suspended.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Phase::Staking | Phase::Animating | Phase::AwaitingSettlement
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotsRound {
    pub round_id: u64,
    pub stake: u64,
    pub grid: Option<Grid>,
    pub result: Option<WinResult>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PickRecord {
    pub row: usize,
    pub pick: usize,
    pub outcome: PickOutcome,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TowerOutcome {
    Trapped,
    CashedOut { payout: u64 },
    Completed { payout: u64 },
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TowerRound {
    pub round_id: u64,
    pub stake: u64,
    pub shape: TowerShape,
    /// One trap column per row, drawn at round start and never changed.
    pub trap_columns: Vec<usize>,
    pub salt: String,
    pub active_row: usize,
    pub history: Vec<PickRecord>,
    pub potential_payout: u64,
    pub outcome: Option<TowerOutcome>,
}

impl TowerRound {
    /// SHA-256 over the salt and trap layout, published when the round starts
    /// and checkable once the layout is revealed.
    pub fn commitment(&self) -> String {
        layout_commitment(&self.salt, &self.trap_columns)
    }

    pub fn is_running(&self) -> bool {
        self.outcome.is_none()
    }
}

pub fn layout_commitment(salt: &str, trap_columns: &[usize]) -> String {
    let layout = trap_columns
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",");
    derive_hash_hex(format!("{salt}:{layout}").as_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "game", rename_all = "snake_case")]
pub enum Round {
    Slots(SlotsRound),
    Tower(TowerRound),
}

/// A confirmed win whose ledger credit failed and still has to be applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingCredit {
    pub amount: u64,
    pub reference: TxRef,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Settlement {
    Lost,
    Credited { amount: u64, balance: u64 },
    /// Won but not yet credited; the session keeps a [`PendingCredit`] until
    /// it is reconciled.
    PendingCredit { amount: u64, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Session {
    pub phase: Phase,
    pub turn_token: u64,
    /// Last balance the ledger reported. Advisory only.
    pub balance_snapshot: Option<u64>,
    /// Stake of the latest round.
    pub stake: u64,
    pub round: Option<Round>,
    /// Winnings of the latest settled round, credited or not.
    pub last_win: u64,
    /// Wins still owed by the ledger.
    pub pending_credits: Vec<PendingCredit>,
    pub notice: Option<String>,
}

impl Session {
    /// Fresh session that keeps the token sequence and any unreconciled win.
    pub fn reset_from(previous: &Session) -> Self {
        Self {
            turn_token: previous.turn_token,
            pending_credits: previous.pending_credits.clone(),
            ..Self::default()
        }
    }

    pub fn tower(&self) -> Option<&TowerRound> {
        match &self.round {
            Some(Round::Tower(round)) => Some(round),
            _ => None,
        }
    }

    pub fn tower_mut(&mut self) -> Option<&mut TowerRound> {
        match &mut self.round {
            Some(Round::Tower(round)) => Some(round),
            _ => None,
        }
    }

    pub fn slots(&self) -> Option<&SlotsRound> {
        match &self.round {
            Some(Round::Slots(round)) => Some(round),
            _ => None,
        }
    }

    /// Structural checks applied to anything read back from storage.
    pub fn validate(&self) -> Result<(), String> {
        if self.phase.is_transient() {
            return Err(format!("transient phase {:?} persisted", self.phase));
        }
        match &self.round {
            None => {
                if self.phase == Phase::AwaitingPick {
                    return Err("awaiting a pick without a round".into());
                }
            }
            Some(Round::Slots(round)) => {
                if round.stake == 0 {
                    return Err("slots round without stake".into());
                }
                if self.phase == Phase::AwaitingPick {
                    return Err("slots round awaiting a pick".into());
                }
                if let Some(grid) = &round.grid {
                    if grid.rows() == 0 || grid.cols() == 0 {
                        return Err("empty grid".into());
                    }
                }
            }
            Some(Round::Tower(round)) => validate_tower(self.phase, round)?,
        }
        if self.pending_credits.iter().any(|p| p.amount == 0) {
            return Err("pending credit of zero".into());
        }
        Ok(())
    }

    /// Checks a restored round against the config it will be played under.
    pub fn check_against(&self, config: &GameConfig) -> Result<(), String> {
        let stake = match &self.round {
            None => return Ok(()),
            Some(Round::Slots(round)) => round.stake,
            Some(Round::Tower(round)) => {
                if !config.tower.admits(round.shape) {
                    return Err(format!(
                        "tower {}x{} outside the configured limits",
                        round.shape.rows, round.shape.cols
                    ));
                }
                let expected = config
                    .tower
                    .multipliers
                    .potential_payout(round.stake, round.active_row);
                if round.is_running() && round.potential_payout != expected {
                    return Err(format!(
                        "potential payout {} (expected {expected})",
                        round.potential_payout
                    ));
                }
                round.stake
            }
        };
        config
            .stakes
            .check(stake)
            .map(|_| ())
            .map_err(|err| err.to_string())
    }
}

fn validate_tower(phase: Phase, round: &TowerRound) -> Result<(), String> {
    let TowerShape { rows, cols } = round.shape;
    if round.stake == 0 || rows == 0 || cols < 2 {
        return Err("tower round with invalid stake or shape".into());
    }
    if round.trap_columns.len() != rows || round.trap_columns.iter().any(|&c| c >= cols) {
        return Err("trap layout does not match the tower shape".into());
    }
    if round.active_row > rows || round.history.len() > rows {
        return Err("active row beyond the top".into());
    }
    let safe_picks = round
        .history
        .iter()
        .filter(|p| p.outcome == PickOutcome::Safe)
        .count();
    if safe_picks != round.active_row {
        return Err("history does not match the active row".into());
    }
    for (idx, record) in round.history.iter().enumerate() {
        if record.row != idx || record.pick >= cols {
            return Err(format!("history entry {idx} is out of order"));
        }
        if record.outcome != check_pick(round.trap_columns[idx], record.pick) {
            return Err(format!("history entry {idx} disagrees with the layout"));
        }
    }
    if let Some(pos) = round
        .history
        .iter()
        .position(|p| p.outcome == PickOutcome::Trap)
    {
        if pos + 1 != round.history.len() || round.outcome != Some(TowerOutcome::Trapped) {
            return Err("play continued past a trap".into());
        }
    }
    if round.is_running() != (phase == Phase::AwaitingPick) {
        return Err("tower phase does not match its outcome".into());
    }
    Ok(())
}
