pub mod arcade;
pub mod config;
pub mod error;
pub mod grid;
pub mod ledger;
pub mod paytable;
pub mod rng;
pub mod session;
pub mod snapshot;
pub mod symbols;

pub use crate::arcade::{Arcade, ArcadeEvent, CashoutReport, PickReport, SpinReport, TowerView};
pub use crate::config::{ConfigError, GameConfig, RevealPacing, StakeBounds, TowerShape};
pub use crate::error::GameError;
pub use crate::grid::{evaluate, winning_cells, Cell, Grid, LineSet, PickOutcome};
pub use crate::ledger::{AccountId, Ledger, LedgerError, MemoryLedger, TxKind, TxRef};
pub use crate::paytable::{LineBonus, Paytable, TowerMultipliers, WinResult};
pub use crate::rng::{derive_hash_hex, entropy, ProvablyFairRng, SharedRng};
pub use crate::session::{Phase, Session, Settlement, TowerOutcome};
pub use crate::snapshot::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use crate::symbols::{Symbol, SymbolKey, SymbolTable};
