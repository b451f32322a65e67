use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::{config::ConfigError, rng::bounded};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SymbolKey {
    Cherry,
    Lemon,
    Grape,
    Star,
    Diamond,
    Seven,
    Dice,
    Chip,
    Card,
}

impl SymbolKey {
    /// Wire name, as serialized.
    pub fn name(self) -> &'static str {
        match self {
            SymbolKey::Cherry => "CHERRY",
            SymbolKey::Lemon => "LEMON",
            SymbolKey::Grape => "GRAPE",
            SymbolKey::Star => "STAR",
            SymbolKey::Diamond => "DIAMOND",
            SymbolKey::Seven => "SEVEN",
            SymbolKey::Dice => "DICE",
            SymbolKey::Chip => "CHIP",
            SymbolKey::Card => "CARD",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SymbolKey::Cherry => "🍒",
            SymbolKey::Lemon => "🍋",
            SymbolKey::Grape => "🍇",
            SymbolKey::Star => "⭐",
            SymbolKey::Diamond => "💎",
            SymbolKey::Seven => "7️⃣",
            SymbolKey::Dice => "🎲",
            SymbolKey::Chip => "🟦",
            SymbolKey::Card => "♠",
        }
    }
}

/// One reel symbol: how often it lands and what three of a kind pays, as a
/// whole multiple of the stake.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Symbol {
    pub key: SymbolKey,
    pub weight: u32,
    pub payout: u32,
}

impl Symbol {
    pub const fn new(key: SymbolKey, weight: u32, payout: u32) -> Self {
        Self {
            key,
            weight,
            payout,
        }
    }
}

/// Weighted draw table. Table order is significant: it breaks ties at the
/// cumulative boundaries and is what the fallback entry refers to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SymbolTable(Vec<Symbol>);

impl SymbolTable {
    pub fn new(symbols: Vec<Symbol>) -> Result<Self, ConfigError> {
        let table = Self(symbols);
        table.validate()?;
        Ok(table)
    }

    pub fn classic() -> Self {
        Self(vec![
            Symbol::new(SymbolKey::Cherry, 26, 10),
            Symbol::new(SymbolKey::Lemon, 24, 12),
            Symbol::new(SymbolKey::Grape, 20, 16),
            Symbol::new(SymbolKey::Star, 16, 25),
            Symbol::new(SymbolKey::Diamond, 10, 50),
            Symbol::new(SymbolKey::Seven, 4, 100),
        ])
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.0.is_empty() {
            return Err(ConfigError::EmptySymbolTable);
        }
        if let Some(sym) = self.0.iter().find(|s| s.weight == 0) {
            return Err(ConfigError::ZeroWeight(sym.key));
        }
        for (idx, sym) in self.0.iter().enumerate() {
            if self.0[..idx].iter().any(|other| other.key == sym.key) {
                return Err(ConfigError::DuplicateSymbol(sym.key));
            }
        }
        if self.0.iter().map(|s| s.weight as u64).sum::<u64>() > u32::MAX as u64 {
            return Err(ConfigError::WeightOverflow);
        }
        Ok(())
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.0
    }

    pub fn get(&self, key: SymbolKey) -> Option<&Symbol> {
        self.0.iter().find(|s| s.key == key)
    }

    pub fn total_weight(&self) -> u32 {
        self.0.iter().map(|s| s.weight).sum()
    }

    /// Exact selection probability of `key` (`weight / total`).
    pub fn probability(&self, key: SymbolKey) -> f64 {
        let total = self.total_weight();
        match self.get(key) {
            Some(sym) if total > 0 => sym.weight as f64 / total as f64,
            _ => 0.0,
        }
    }

    /// Draw one symbol: `r` uniform in `[0, total)`, first symbol whose
    /// cumulative weight exceeds `r`.
    pub fn draw<R: RngCore + ?Sized>(&self, rng: &mut R) -> Symbol {
        let roll = bounded(rng, self.total_weight());
        self.pick(roll)
    }

    fn pick(&self, roll: u32) -> Symbol {
        let mut acc = 0u32;
        for sym in &self.0 {
            acc += sym.weight;
            if roll < acc {
                return *sym;
            }
        }
        self.0[0]
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::classic()
    }
}
