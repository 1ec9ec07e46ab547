//! Session snapshot persistence.
//!
//! The authoritative lists are saved as one JSON document with ephemeral
//! pointers stripped. Writes go through a temp file and rename so a crash
//! mid-write never corrupts the previous snapshot. Failures here degrade:
//! the server logs and keeps running.

use log::info;
use shared::RoomSnapshot;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad snapshot json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("session snapshot missing {0}")]
    MissingSection(&'static str),
}

/// Writes the snapshot atomically next to `path`.
pub fn save(path: &Path, snapshot: &RoomSnapshot) -> Result<(), SnapshotError> {
    let json = serde_json::to_string_pretty(snapshot)?;

    let mut tmp = path.to_path_buf();
    tmp.set_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;

    info!(
        "Saved session snapshot to {} ({} players, {} tokens)",
        path.display(),
        snapshot.players.len(),
        snapshot.tokens.len()
    );
    Ok(())
}

/// Loads a snapshot previously written by [`save`].
pub fn load(path: &Path) -> Result<RoomSnapshot, SnapshotError> {
    let json = fs::read_to_string(path)?;
    let snapshot = serde_json::from_str(&json)?;
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Player, Token};

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut snapshot = RoomSnapshot::default();
        snapshot.players.push(Player::new("u1", "Alice", 0));
        snapshot
            .tokens
            .push(Token::new("t1", "Goblin", Some("u1"), 3.0, 4.0));

        save(&path, &snapshot).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_save_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut first = RoomSnapshot::default();
        first.players.push(Player::new("u1", "Alice", 0));
        save(&path, &first).unwrap();

        let mut second = RoomSnapshot::default();
        second.players.push(Player::new("u2", "Bob", 0));
        save(&path, &second).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.players.len(), 1);
        assert_eq!(loaded.players[0].uid, "u2");
    }

    #[test]
    fn test_load_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("nope.json")).is_err());
    }

    #[test]
    fn test_room_snapshot_for_disk_has_no_pointers() {
        use crate::room::RoomState;

        let mut room = RoomState::new();
        room.upsert_pointer("u1", 1.0, 1.0, 0);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        save(&path, &room.snapshot(false)).unwrap();

        let loaded = load(&path).unwrap();
        assert!(loaded.pointers.is_empty());
    }
}
