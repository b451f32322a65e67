//! Local persistence of the session between reloads.
//!
//! Snapshots are JSON envelopes `{ "version": 1, "session": {...} }` stored under
//! a versioned, namespaced key. Anything unreadable loads as a fresh session.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::{error::GameError, session::Session};

pub const SNAPSHOT_KEY: &str = "casino_crush_session_v1";
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("could not encode session: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("could not write snapshot: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    session: T,
}

pub fn encode(session: &Session) -> Result<String, SnapshotError> {
    Ok(serde_json::to_string(&Envelope {
        version: SCHEMA_VERSION,
        session,
    })?)
}

/// Parse and validate a stored snapshot.
pub fn decode(raw: &str) -> Result<Session, GameError> {
    let envelope: Envelope<Session> = serde_json::from_str(raw)
        .map_err(|e| GameError::CorruptPersistedState(e.to_string()))?;
    if envelope.version != SCHEMA_VERSION {
        return Err(GameError::CorruptPersistedState(format!(
            "schema version {} (expected {SCHEMA_VERSION})",
            envelope.version
        )));
    }
    envelope
        .session
        .validate()
        .map_err(GameError::CorruptPersistedState)?;
    Ok(envelope.session)
}

fn decode_or_default(raw: Option<String>, key: &str) -> Session {
    let Some(raw) = raw else {
        return Session::default();
    };
    match decode(&raw) {
        Ok(session) => session,
        Err(err) => {
            warn!(key, ?err, "discarding stored session");
            Session::default()
        }
    }
}

pub trait SnapshotStore: Send + Sync {
    fn save(&self, session: &Session) -> Result<(), SnapshotError>;

    /// Stored session, or a fresh one when nothing usable is stored.
    fn load(&self) -> Session;
}

impl<T: SnapshotStore + ?Sized> SnapshotStore for std::sync::Arc<T> {
    fn save(&self, session: &Session) -> Result<(), SnapshotError> {
        (**self).save(session)
    }

    fn load(&self) -> Session {
        (**self).load()
    }
}

/// Key-value store in memory, shaped like browser local storage.
pub struct MemorySnapshotStore {
    key: String,
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::with_namespace("")
    }

    pub fn with_namespace(namespace: &str) -> Self {
        let key = if namespace.is_empty() {
            SNAPSHOT_KEY.to_string()
        } else {
            format!("{namespace}.{SNAPSHOT_KEY}")
        };
        Self {
            key,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn raw(&self) -> Option<String> {
        self.entries().get(&self.key).cloned()
    }

    pub fn put_raw(&self, raw: impl Into<String>) {
        let key = self.key.clone();
        self.entries().insert(key, raw.into());
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, session: &Session) -> Result<(), SnapshotError> {
        let raw = encode(session)?;
        self.put_raw(raw);
        Ok(())
    }

    fn load(&self) -> Session {
        decode_or_default(self.raw(), &self.key)
    }
}

/// One JSON file per namespace inside a directory.
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl AsRef<Path>, namespace: &str) -> Self {
        let file = format!("{}.{SNAPSHOT_KEY}.json", escape(namespace));
        Self {
            path: dir.as_ref().join(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Percent-encode everything but `[A-Za-z0-9_-]`, so distinct namespaces
/// never share a file.
fn escape(namespace: &str) -> String {
    let mut out = String::with_capacity(namespace.len());
    for byte in namespace.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, session: &Session) -> Result<(), SnapshotError> {
        let raw = encode(session)?;
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        // Write then rename so a crash never leaves half a snapshot behind.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn load(&self) -> Session {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => Some(raw),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(path = %self.path.display(), ?err, "could not read stored session");
                None
            }
        };
        decode_or_default(raw, SNAPSHOT_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::TowerShape,
        grid::PickOutcome,
        session::{Phase, PickRecord, Round, TowerRound},
    };

    fn running_tower() -> Session {
        Session {
            phase: Phase::AwaitingPick,
            turn_token: 4,
            balance_snapshot: Some(90),
            stake: 10,
            round: Some(Round::Tower(TowerRound {
                round_id: 77,
                stake: 10,
                shape: TowerShape { rows: 5, cols: 3 },
                trap_columns: vec![2, 1, 0, 0, 2],
                salt: "ab".into(),
                active_row: 1,
                history: vec![PickRecord {
                    row: 0,
                    pick: 0,
                    outcome: PickOutcome::Safe,
                }],
                potential_payout: 12,
                outcome: None,
            })),
            last_win: 0,
            pending_credits: Vec::new(),
            notice: None,
        }
    }

    #[test]
    fn test_memory_round_trip() {
        let store = MemorySnapshotStore::new();
        let session = running_tower();
        store.save(&session).unwrap();
        assert_eq!(store.load(), session);
        assert_eq!(store.key(), SNAPSHOT_KEY);
    }

    #[test]
    fn test_missing_snapshot_is_default() {
        assert_eq!(MemorySnapshotStore::new().load(), Session::default());
    }

    #[test]
    fn test_corrupt_snapshot_falls_back() {
        let store = MemorySnapshotStore::with_namespace("bob");
        store.put_raw("{not json");
        assert_eq!(store.load(), Session::default());

        store.put_raw(r#"{"version":1,"session":{"phase":"idle","turn_token":"seven"}}"#);
        assert_eq!(store.load(), Session::default());
    }

    #[test]
    fn test_schema_mismatch_falls_back() {
        let session = running_tower();
        let raw = encode(&session).unwrap().replace("\"version\":1", "\"version\":2");
        assert!(matches!(decode(&raw), Err(GameError::CorruptPersistedState(_))));
        let store = MemorySnapshotStore::new();
        store.put_raw(raw);
        assert_eq!(store.load(), Session::default());
    }

    #[test]
    fn test_semantically_invalid_snapshot_falls_back() {
        let mut session = running_tower();
        if let Some(round) = session.tower_mut() {
            round.active_row = 4;
        }
        let store = MemorySnapshotStore::new();
        store.save(&session).unwrap();
        assert_eq!(store.load(), Session::default());
    }

    #[test]
    fn test_file_round_trip_and_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path(), "player/1");
        assert!(store
            .path()
            .ends_with("player%2F1.casino_crush_session_v1.json"));
        assert_eq!(store.load(), Session::default());

        let session = running_tower();
        store.save(&session).unwrap();
        assert_eq!(store.load(), session);

        fs::write(store.path(), b"\x00\x01garbage").unwrap();
        assert_eq!(store.load(), Session::default());
    }

    #[test]
    fn test_file_names_are_distinct_per_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let dotted = FileSnapshotStore::new(dir.path(), "p.1");
        let underscored = FileSnapshotStore::new(dir.path(), "p_1");
        let escaped = FileSnapshotStore::new(dir.path(), "p%2E1");
        assert_ne!(dotted.path(), underscored.path());
        assert_ne!(dotted.path(), escaped.path());

        dotted.save(&running_tower()).unwrap();
        assert_eq!(underscored.load(), Session::default());
        assert_eq!(escaped.load(), Session::default());
        assert_eq!(dotted.load(), running_tower());
    }
}
