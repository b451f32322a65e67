use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::info;

use crush_core::{AccountId, Arcade, ConfigError, FileSnapshotStore, GameConfig, GameError, Ledger};

use crate::{ledger::SqliteLedger, routes::Failure};

pub type PlayerArcade = Arcade<SqliteLedger, FileSnapshotStore>;

pub struct AppState {
    pub ledger: Arc<SqliteLedger>,
    pub game: GameConfig,
    pub snapshot_dir: PathBuf,
    pub initial_credits: u64,
    arcades: Mutex<HashMap<AccountId, PlayerArcade>>,
}

impl AppState {
    pub fn new(
        ledger: SqliteLedger,
        game: GameConfig,
        snapshot_dir: PathBuf,
        initial_credits: u64,
    ) -> Self {
        Self {
            ledger: Arc::new(ledger),
            game,
            snapshot_dir,
            initial_credits,
            arcades: Mutex::new(HashMap::new()),
        }
    }

    /// The arcade of an account the ledger knows about. Unknown accounts get
    /// `AccountNotInitialized` and nothing is cached for them.
    pub async fn arcade(&self, account: &AccountId) -> Result<PlayerArcade, Failure> {
        let cached = self.arcades().get(account).cloned();
        if let Some(arcade) = cached {
            return Ok(arcade);
        }
        self.ledger.balance(account).await.map_err(GameError::from)?;
        Ok(self.open(account)?)
    }

    /// The player's arcade, resumed from its snapshot on first use.
    pub fn open(&self, account: &AccountId) -> Result<PlayerArcade, ConfigError> {
        let mut arcades = self.arcades();
        if let Some(arcade) = arcades.get(account) {
            return Ok(arcade.clone());
        }
        let store = FileSnapshotStore::new(&self.snapshot_dir, account.as_str());
        let arcade = Arcade::new(self.game.clone(), self.ledger.clone(), store)?;
        arcade.sign_in(account.clone());
        info!(%account, phase = ?arcade.session().phase, open = arcades.len() + 1, "arcade opened");
        arcades.insert(account.clone(), arcade.clone());
        Ok(arcade)
    }

    #[cfg(test)]
    pub fn open_arcades(&self) -> usize {
        self.arcades().len()
    }

    fn arcades(&self) -> MutexGuard<'_, HashMap<AccountId, PlayerArcade>> {
        self.arcades
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
