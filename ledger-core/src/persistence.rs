use crate::ledger::Ledger;
use ledger_shared::{BlockchainError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Bumped whenever [`Snapshot`]'s encoding changes incompatibly.
const SNAPSHOT_VERSION: u32 = 1;

/// On-disk file name under the configured data directory.
const SNAPSHOT_FILE_NAME: &str = "chain.bin";

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    ledger: Ledger,
}

/// Path to the snapshot file inside `data_dir`.
#[must_use]
pub fn snapshot_path(data_dir: &str) -> PathBuf {
    Path::new(data_dir).join(SNAPSHOT_FILE_NAME)
}

/// Loads a ledger snapshot from `data_dir`, if one exists.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or decoded, or
/// carries a snapshot version this build doesn't understand.
pub fn load(data_dir: &str) -> Result<Option<Ledger>> {
    let path = snapshot_path(data_dir);
    if !path.exists() {
        return Ok(None);
    }

    let bytes = fs::read(&path)?;
    let snapshot: Snapshot = bincode::deserialize(&bytes)
        .map_err(|e| BlockchainError::SerializationError(e.to_string()))?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(BlockchainError::SerializationError(format!(
            "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
            snapshot.version
        )));
    }

    info!(path = %path.display(), height = snapshot.ledger.height(), "loaded chain snapshot");
    Ok(Some(snapshot.ledger))
}

/// Atomically writes `ledger` to `data_dir`: the snapshot is written to a
/// temporary file in the same directory, then renamed into place, so a crash
/// mid-write never leaves a truncated `chain.bin` behind.
///
/// # Errors
///
/// Returns an error if the directory can't be created, the temp file can't be
/// written, or the rename fails.
pub fn save(data_dir: &str, ledger: &Ledger) -> Result<()> {
    fs::create_dir_all(data_dir)?;

    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        ledger: ledger.clone(),
    };
    let bytes = bincode::serialize(&snapshot)
        .map_err(|e| BlockchainError::SerializationError(e.to_string()))?;

    let final_path = snapshot_path(data_dir);
    let tmp_path = final_path.with_extension("bin.tmp");
    fs::write(&tmp_path, &bytes)?;
    fs::rename(&tmp_path, &final_path)?;

    info!(path = %final_path.display(), height = ledger.height(), "saved chain snapshot");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_returns_none_when_no_snapshot_exists() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load(dir.path().to_str().unwrap()).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn save_then_load_round_trips_the_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();

        let ledger = Ledger::new("alice", 50, "00".to_string()).unwrap();
        save(data_dir, &ledger).unwrap();

        let loaded = load(data_dir).unwrap().unwrap();
        assert_eq!(loaded.height(), ledger.height());
        assert_eq!(loaded.get_balance("alice"), 50);
    }

    #[test]
    fn save_overwrites_a_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();

        let first = Ledger::new("alice", 50, String::new()).unwrap();
        save(data_dir, &first).unwrap();

        let second = Ledger::new("bob", 50, String::new()).unwrap();
        save(data_dir, &second).unwrap();

        let loaded = load(data_dir).unwrap().unwrap();
        assert_eq!(loaded.get_balance("bob"), 50);
        assert_eq!(loaded.get_balance("alice"), 0);
    }

    #[test]
    fn load_rejects_unknown_snapshot_version() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();
        fs::create_dir_all(data_dir).unwrap();

        let ledger = Ledger::new("alice", 50, String::new()).unwrap();
        let bad_snapshot = Snapshot {
            version: SNAPSHOT_VERSION + 1,
            ledger,
        };
        let bytes = bincode::serialize(&bad_snapshot).unwrap();
        fs::write(snapshot_path(data_dir), bytes).unwrap();

        assert!(load(data_dir).is_err());
    }
}
