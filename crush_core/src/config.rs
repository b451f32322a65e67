use std::{borrow::Cow, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    error::GameError,
    grid::LineSet,
    paytable::{LineBonus, TowerMultipliers},
    symbols::{SymbolKey, SymbolTable},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("symbol table is empty")]
    EmptySymbolTable,
    #[error("symbol {0:?} has zero weight")]
    ZeroWeight(SymbolKey),
    #[error("symbol {0:?} appears twice")]
    DuplicateSymbol(SymbolKey),
    #[error("total symbol weight overflows")]
    WeightOverflow,
    #[error("no paylines configured")]
    NoLines,
    #[error("line {0} has fewer than two cells")]
    ShortLine(usize),
    #[error("line {line} references ({row}, {col}) outside the grid")]
    LineOutOfBounds { line: usize, row: usize, col: usize },
    #[error("bonus step for {0} lines does not increase")]
    BonusNotIncreasing(u32),
    #[error("tower multiplier table is empty")]
    EmptyMultipliers,
    #[error("tower multiplier at row {0} does not increase")]
    MultiplierNotIncreasing(usize),
    #[error("tower multiplier growth shrinks at row {0}")]
    MultiplierNotConvex(usize),
    #[error("invalid stake bounds {min}..={max}")]
    InvalidStakeBounds { min: u64, max: u64 },
    #[error("invalid slots grid {rows}x{cols}")]
    InvalidGrid { rows: usize, cols: usize },
    #[error("invalid tower limits")]
    InvalidTowerLimits,
    #[error("tower needs {rows} multipliers, table has {available}")]
    MultipliersTooShort { rows: usize, available: usize },
    #[error("could not read config: {0}")]
    Io(String),
    #[error("could not parse config: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StakeBounds {
    pub min: u64,
    pub max: u64,
}

impl StakeBounds {
    pub fn check(&self, stake: u64) -> Result<u64, GameError> {
        if stake < self.min || stake > self.max {
            return Err(GameError::InvalidStake {
                stake,
                min: self.min,
                max: self.max,
            });
        }
        Ok(stake)
    }
}

impl Default for StakeBounds {
    fn default() -> Self {
        Self { min: 5, max: 100 }
    }
}

/// Cosmetic reel frames shown before the committed grid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RevealPacing {
    pub frames: u32,
    pub base_delay_ms: u64,
    pub step_ms: u64,
}

impl RevealPacing {
    pub const INSTANT: Self = Self {
        frames: 0,
        base_delay_ms: 0,
        step_ms: 0,
    };

    pub fn delay(&self, frame: u32) -> Duration {
        let step = self.step_ms.saturating_mul(frame as u64);
        Duration::from_millis(self.base_delay_ms.saturating_add(step))
    }
}

impl Default for RevealPacing {
    fn default() -> Self {
        Self {
            frames: 10,
            base_delay_ms: 70,
            step_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SlotsConfig {
    pub rows: usize,
    pub cols: usize,
    pub symbols: SymbolTable,
    /// Defaults to every row, column and (square grids) both diagonals.
    pub lines: Option<LineSet>,
    pub bonus: LineBonus,
    pub reveal: RevealPacing,
}

impl SlotsConfig {
    pub fn line_set(&self) -> Cow<'_, LineSet> {
        match &self.lines {
            Some(lines) => Cow::Borrowed(lines),
            None => Cow::Owned(LineSet::standard(self.rows, self.cols)),
        }
    }
}

impl Default for SlotsConfig {
    fn default() -> Self {
        Self {
            rows: 3,
            cols: 3,
            symbols: SymbolTable::classic(),
            lines: None,
            bonus: LineBonus::classic(),
            reveal: RevealPacing::default(),
        }
    }
}

/// Tower shape chosen for one round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TowerShape {
    pub rows: usize,
    pub cols: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TowerConfig {
    pub default_shape: TowerShape,
    pub min_rows: usize,
    pub max_rows: usize,
    pub min_cols: usize,
    pub max_cols: usize,
    pub multipliers: TowerMultipliers,
}

impl TowerConfig {
    /// Clamp a requested shape into the configured limits.
    pub fn clamp(&self, requested: Option<TowerShape>) -> TowerShape {
        let shape = requested.unwrap_or(self.default_shape);
        TowerShape {
            rows: shape.rows.clamp(self.min_rows, self.max_rows),
            cols: shape.cols.clamp(self.min_cols, self.max_cols),
        }
    }

    /// Whether a shape lies inside the configured limits.
    pub fn admits(&self, shape: TowerShape) -> bool {
        (self.min_rows..=self.max_rows).contains(&shape.rows)
            && (self.min_cols..=self.max_cols).contains(&shape.cols)
    }
}

impl Default for TowerConfig {
    fn default() -> Self {
        Self {
            default_shape: TowerShape { rows: 10, cols: 3 },
            min_rows: 5,
            max_rows: 50,
            min_cols: 2,
            max_cols: 6,
            multipliers: TowerMultipliers::classic(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GameConfig {
    pub stakes: StakeBounds,
    pub slots: SlotsConfig,
    pub tower: TowerConfig,
}

impl GameConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_yaml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let StakeBounds { min, max } = self.stakes;
        if min == 0 || min > max {
            return Err(ConfigError::InvalidStakeBounds { min, max });
        }

        let slots = &self.slots;
        if slots.rows == 0 || slots.cols == 0 {
            return Err(ConfigError::InvalidGrid {
                rows: slots.rows,
                cols: slots.cols,
            });
        }
        slots.symbols.validate()?;
        slots.line_set().validate(slots.rows, slots.cols)?;
        slots.bonus.validate()?;

        let tower = &self.tower;
        if tower.min_rows == 0
            || tower.min_rows > tower.max_rows
            || tower.min_cols < 2
            || tower.min_cols > tower.max_cols
        {
            return Err(ConfigError::InvalidTowerLimits);
        }
        tower.multipliers.validate()?;
        if tower.multipliers.len() < tower.max_rows {
            return Err(ConfigError::MultipliersTooShort {
                rows: tower.max_rows,
                available: tower.multipliers.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(GameConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = GameConfig::from_yaml_str(
            "stakes:\n  min: 1\n  max: 500\nslots:\n  reveal:\n    frames: 0\n",
        )
        .unwrap();
        assert_eq!(config.stakes, StakeBounds { min: 1, max: 500 });
        assert_eq!(config.slots.reveal.frames, 0);
        assert_eq!(config.slots.reveal.base_delay_ms, 70);
        assert_eq!(config.slots.symbols, SymbolTable::classic());
        assert_eq!(config.tower, TowerConfig::default());
    }

    #[test]
    fn test_yaml_symbol_table() {
        let config = GameConfig::from_yaml_str(
            "slots:\n  symbols:\n    - { key: DICE, weight: 3, payout: 4 }\n    - { key: CARD, weight: 1, payout: 8 }\n",
        )
        .unwrap();
        assert_eq!(config.slots.symbols.total_weight(), 4);
        assert_eq!(config.slots.symbols.get(SymbolKey::Card).unwrap().payout, 8);
    }

    #[test]
    fn test_rejects_bad_config() {
        assert_eq!(
            GameConfig::from_yaml_str("stakes:\n  min: 10\n  max: 5\n"),
            Err(ConfigError::InvalidStakeBounds { min: 10, max: 5 })
        );
        assert!(matches!(
            GameConfig::from_yaml_str("slots:\n  symbols:\n    - { key: STAR, weight: 0, payout: 1 }\n"),
            Err(ConfigError::ZeroWeight(SymbolKey::Star))
        ));
        assert!(matches!(
            GameConfig::from_yaml_str("slots:\n  rows: 2\n  lines:\n    - { kind: horizontal, index: 2, cells: [{row: 2, col: 0}, {row: 2, col: 1}] }\n"),
            Err(ConfigError::LineOutOfBounds { line: 0, row: 2, col: 0 })
        ));
        assert!(matches!(
            GameConfig::from_yaml_str("tower: [1, 2]"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_multipliers_must_cover_max_rows() {
        let mut config = GameConfig::default();
        config.tower.multipliers = TowerMultipliers::geometric(10, 12_700, 12_700);
        assert_eq!(
            config.validate(),
            Err(ConfigError::MultipliersTooShort {
                rows: 50,
                available: 10
            })
        );
    }

    #[test]
    fn test_stake_bounds_and_tower_clamp() {
        let config = GameConfig::default();
        assert_eq!(config.stakes.check(10), Ok(10));
        assert!(config.stakes.check(4).is_err());
        assert!(config.stakes.check(101).is_err());
        let shape = config.tower.clamp(Some(TowerShape { rows: 99, cols: 1 }));
        assert_eq!(shape, TowerShape { rows: 50, cols: 2 });
        assert_eq!(config.tower.clamp(None), TowerShape { rows: 10, cols: 3 });
    }

    #[test]
    fn test_reveal_delay_steps() {
        let pacing = RevealPacing::default();
        assert_eq!(pacing.delay(0), Duration::from_millis(70));
        assert_eq!(pacing.delay(9), Duration::from_millis(160));
    }

    #[test]
    fn test_reveal_delay_saturates() {
        let config = GameConfig::from_yaml_str(
            "slots:\n  reveal:\n    frames: 3\n    base_delay_ms: 18446744073709551615\n    step_ms: 18446744073709551615\n",
        )
        .unwrap();
        let pacing = config.slots.reveal;
        assert_eq!(pacing.delay(0), Duration::from_millis(u64::MAX));
        assert_eq!(pacing.delay(2), Duration::from_millis(u64::MAX));
        assert_eq!(
            RevealPacing {
                frames: 1,
                base_delay_ms: 5,
                step_ms: u64::MAX / 2,
            }
            .delay(3),
            Duration::from_millis(u64::MAX)
        );
    }

    #[test]
    fn test_tower_admits_shape() {
        let tower = TowerConfig::default();
        assert!(tower.admits(TowerShape { rows: 10, cols: 3 }));
        assert!(!tower.admits(TowerShape { rows: 4, cols: 3 }));
        assert!(!tower.admits(TowerShape { rows: 10, cols: 7 }));
    }
}
