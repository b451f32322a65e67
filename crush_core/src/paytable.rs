//! Payout calculation for both games.
//!
//! Every fractional factor is stored in basis points (1/10000) so that rounding
//! is exact integer arithmetic:
//! - slots: `round_half_up(sum(base payouts) * stake * bonus)`
//! - tower: `floor(stake * multiplier[cleared_rows - 1])`

use serde::{Deserialize, Serialize};

use crate::{
    config::ConfigError,
    grid::LineWin,
    symbols::SymbolTable,
};

/// 1.0x in basis points.
pub const BASIS_POINTS: u64 = 10_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BonusStep {
    pub lines: u32,
    pub factor_bps: u32,
}

/// Multi-line bonus: a step function of the number of simultaneously winning
/// lines. Counts below the first step pay 1.0x; counts past the last step keep
/// the last factor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct LineBonus(Vec<BonusStep>);

impl LineBonus {
    pub fn new(steps: Vec<BonusStep>) -> Result<Self, ConfigError> {
        let bonus = Self(steps);
        bonus.validate()?;
        Ok(bonus)
    }

    pub fn classic() -> Self {
        Self(
            (2..=8)
                .map(|lines| BonusStep {
                    lines,
                    factor_bps: 10_000 + 2_500 * (lines - 1),
                })
                .collect(),
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut prev = BonusStep {
            lines: 1,
            factor_bps: BASIS_POINTS as u32,
        };
        for step in &self.0 {
            if step.lines <= prev.lines || step.factor_bps <= prev.factor_bps {
                return Err(ConfigError::BonusNotIncreasing(step.lines));
            }
            prev = *step;
        }
        Ok(())
    }

    pub fn factor_bps(&self, winning_lines: usize) -> u32 {
        self.0
            .iter()
            .rev()
            .find(|step| step.lines as usize <= winning_lines)
            .map_or(BASIS_POINTS as u32, |step| step.factor_bps)
    }
}

impl Default for LineBonus {
    fn default() -> Self {
        Self::classic()
    }
}

/// Outcome of one committed slots grid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WinResult {
    pub lines: Vec<LineWin>,
    /// Sum of the base payouts of every winning line, in stakes.
    pub base_total: u64,
    pub bonus_bps: u32,
    pub reward: u64,
}

impl WinResult {
    pub fn is_win(&self) -> bool {
        self.reward > 0
    }
}

pub struct Paytable<'a> {
    pub symbols: &'a SymbolTable,
    pub bonus: &'a LineBonus,
}

impl<'a> Paytable<'a> {
    pub fn new(symbols: &'a SymbolTable, bonus: &'a LineBonus) -> Self {
        Self { symbols, bonus }
    }

    pub fn settle(&self, lines: Vec<LineWin>, stake: u64) -> WinResult {
        let base_total: u64 = lines
            .iter()
            .map(|w| self.symbols.get(w.symbol).map_or(0, |s| s.payout as u64))
            .sum();
        let bonus_bps = if lines.is_empty() {
            BASIS_POINTS as u32
        } else {
            self.bonus.factor_bps(lines.len())
        };
        let reward = round_half_up(base_total as u128 * stake as u128 * bonus_bps as u128);
        WinResult {
            lines,
            base_total,
            bonus_bps,
            reward,
        }
    }
}

fn round_half_up(scaled: u128) -> u64 {
    let whole = (scaled + (BASIS_POINTS / 2) as u128) / BASIS_POINTS as u128;
    u64::try_from(whole).unwrap_or(u64::MAX)
}

/// Tower multipliers by cleared row, in basis points.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct TowerMultipliers(Vec<u64>);

impl TowerMultipliers {
    pub fn new(multipliers: Vec<u64>) -> Result<Self, ConfigError> {
        let table = Self(multipliers);
        table.validate()?;
        Ok(table)
    }

    /// `first * growth^row`, each step floored.
    pub fn geometric(rows: usize, first_bps: u64, growth_bps: u64) -> Self {
        let mut out = Vec::with_capacity(rows);
        let mut current = first_bps;
        for _ in 0..rows {
            out.push(current);
            current = current.saturating_mul(growth_bps) / BASIS_POINTS;
        }
        Self(out)
    }

    pub fn classic() -> Self {
        Self::geometric(50, 12_700, 12_700)
    }

    /// Strictly increasing with non-decreasing increments.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.0.is_empty() {
            return Err(ConfigError::EmptyMultipliers);
        }
        if self.0[0] <= BASIS_POINTS {
            return Err(ConfigError::MultiplierNotIncreasing(0));
        }
        let mut prev_step = 0;
        for (row, pair) in self.0.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(ConfigError::MultiplierNotIncreasing(row + 1));
            }
            let step = pair[1] - pair[0];
            if step < prev_step {
                return Err(ConfigError::MultiplierNotConvex(row + 1));
            }
            prev_step = step;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, row: usize) -> Option<u64> {
        self.0.get(row).copied()
    }

    pub fn potential_payout(&self, stake: u64, cleared_rows: usize) -> u64 {
        if cleared_rows == 0 {
            return 0;
        }
        let bps = self.0.get(cleared_rows - 1).or(self.0.last()).copied().unwrap_or(0);
        let scaled = stake as u128 * bps as u128 / BASIS_POINTS as u128;
        u64::try_from(scaled).unwrap_or(u64::MAX)
    }
}

impl Default for TowerMultipliers {
    fn default() -> Self {
        Self::classic()
    }
}
