pub mod explorer;

use alloy_primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::models::common::{Ledger, QueryId};
use crate::models::errors::{ChainError, StateError};
use crate::models::events::ReportEvent;

pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 60;

/// Resolves the block to start from when an account has never been scanned.
#[async_trait]
pub trait StartBlockLookup: Send + Sync {
    async fn day_start_block(&self) -> Result<u64, ChainError>;
}

/// Per-account entry of the state file. Query ids sit next to the bookkeeping keys:
/// `{"last_scanned_block": 1, "last_scanned_time": 2, "0x<query id>": [timestamps]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub last_scanned_block: u64,
    #[serde(default)]
    pub last_scanned_time: u64,
    #[serde(flatten)]
    pub reports: BTreeMap<String, BTreeSet<u64>>,
}

impl AccountState {
    fn starting_at(block: u64) -> Self {
        Self {
            last_scanned_block: block,
            ..Default::default()
        }
    }

    /// Report timestamps keyed by parsed query id. Keys that are not 32-byte hex are skipped.
    pub fn ledger(&self) -> Ledger {
        self.reports
            .iter()
            .filter_map(|(key, timestamps)| match key.parse::<QueryId>() {
                Ok(query_id) => Some((query_id, timestamps.iter().copied().collect())),
                Err(e) => {
                    warn!("Skipping malformed query id key '{}' in state file: {}", key, e);
                    None
                }
            })
            .collect()
    }
}

/// chain name -> checksummed account -> state
pub type StateDocument = BTreeMap<String, BTreeMap<String, AccountState>>;

/// Durable scan progress and report ledger for one (chain, account) pair.
///
/// The whole document is held in memory and rewritten as a unit. Entries for other
/// chains and accounts found in the file are carried through untouched. Only one
/// process may own a given (chain, account) at a time; nothing here locks the file.
pub struct ScanState {
    path: PathBuf,
    chain_name: String,
    account: String,
    document: StateDocument,
    last_save: u64,
    flush_interval: u64,
}

impl ScanState {
    pub fn new(path: impl Into<PathBuf>, chain_name: &str, account: Address) -> Self {
        Self {
            path: path.into(),
            chain_name: chain_name.to_string(),
            account: account.to_checksum(None),
            document: StateDocument::new(),
            last_save: 0,
            flush_interval: DEFAULT_FLUSH_INTERVAL_SECS,
        }
    }

    pub fn with_flush_interval(mut self, seconds: u64) -> Self {
        self.flush_interval = seconds;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }

    /// Loads the state file. A missing or unreadable file, or one without an entry for this
    /// (chain, account), falls back to a fresh entry starting at the day-start block.
    pub async fn restore(&mut self, lookup: &dyn StartBlockLookup) -> Result<(), StateError> {
        match read_document(&self.path) {
            Ok(Some(document)) => {
                self.document = document;
                match self.entry() {
                    Some(entry) => {
                        info!(
                            "Restored existing state, last block scan ended at {}",
                            entry.last_scanned_block
                        );
                        return Ok(());
                    }
                    None => info!(
                        "No state for {} on {}, starting fresh",
                        self.account, self.chain_name
                    ),
                }
            }
            Ok(None) => info!("State starting from scratch"),
            Err(e) => warn!("State file {} unusable ({}), starting from scratch", self.path.display(), e),
        }

        self.reset_from_lookup(lookup).await?;
        Ok(())
    }

    /// Loads the state file, keeping other entries, and restarts this account at `starting_block`.
    pub fn start_at(&mut self, starting_block: u64) {
        match read_document(&self.path) {
            Ok(Some(document)) => self.document = document,
            Ok(None) => {}
            Err(e) => warn!("State file {} unusable ({}), starting from scratch", self.path.display(), e),
        }
        self.reset(starting_block);
    }

    /// Replaces this account's entry with an empty one starting at `starting_block`.
    pub fn reset(&mut self, starting_block: u64) {
        info!("Scan starting from block: {}", starting_block);
        self.document
            .entry(self.chain_name.clone())
            .or_default()
            .insert(self.account.clone(), AccountState::starting_at(starting_block));
    }

    /// Resets to the first block of the current UTC day, as reported by the lookup.
    pub async fn reset_from_lookup(&mut self, lookup: &dyn StartBlockLookup) -> Result<u64, StateError> {
        let block = lookup.day_start_block().await?;
        info!("Starting block was not selected so starting from: {}", block);
        self.reset(block);
        Ok(block)
    }

    pub fn save(&mut self, now: u64) -> Result<(), StateError> {
        let contents = serde_json::to_string(&self.document)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, contents)?;
        fs::rename(&tmp_path, &self.path)?;
        self.last_save = now;
        debug!("Saved scan state to {}", self.path.display());
        Ok(())
    }

    pub fn last_scanned_block(&self) -> Option<u64> {
        self.entry().map(|entry| entry.last_scanned_block)
    }

    pub fn last_scanned_time(&self) -> Option<u64> {
        self.entry().map(|entry| entry.last_scanned_time)
    }

    /// Records the end of a scanned chunk. The checkpoint never moves backwards.
    /// Flushes to disk when the debounce interval has passed; returns whether it did.
    pub fn end_chunk(&mut self, block_number: u64, now: u64) -> Result<bool, StateError> {
        let entry = self.entry_mut();
        entry.last_scanned_block = entry.last_scanned_block.max(block_number);
        entry.last_scanned_time = now;

        if now.saturating_sub(self.last_save) > self.flush_interval {
            self.save(now)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Adds a report timestamp to the ledger; returns false if it was already there.
    pub fn record_timestamp(&mut self, query_id: QueryId, timestamp: u64) -> bool {
        self.entry_mut()
            .reports
            .entry(query_id.to_string())
            .or_default()
            .insert(timestamp)
    }

    /// Records a report event. Returns `false` when its timestamp was already in the ledger.
    pub fn process_event(&mut self, event: &ReportEvent) -> bool {
        let is_new = self.record_timestamp(event.query_id, event.timestamp);
        if !is_new {
            debug!(
                "Report {} at {} already in ledger",
                event.query_id, event.timestamp
            );
        }
        is_new
    }

    /// Read-only copy of this account's ledger, or `None` when the account has no state.
    pub fn serve(&self) -> Option<Ledger> {
        self.entry().map(AccountState::ledger)
    }

    pub fn entry(&self) -> Option<&AccountState> {
        self.document
            .get(&self.chain_name)
            .and_then(|accounts| accounts.get(&self.account))
    }

    fn entry_mut(&mut self) -> &mut AccountState {
        self.document
            .entry(self.chain_name.clone())
            .or_default()
            .entry(self.account.clone())
            .or_default()
    }
}

/// Reads a state document. `Ok(None)` when the file does not exist or holds JSON `null`.
pub fn read_document(path: &Path) -> Result<Option<StateDocument>, StateError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str::<Option<StateDocument>>(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{B256, address};

    struct FixedLookup(u64);

    #[async_trait]
    impl StartBlockLookup for FixedLookup {
        async fn day_start_block(&self) -> Result<u64, ChainError> {
            Ok(self.0)
        }
    }

    const ACCOUNT: Address = address!("d5f1Cc896542C111c7Aa7D7fae2C3D654f34b927");

    fn state_in(dir: &tempfile::TempDir) -> ScanState {
        ScanState::new(dir.path().join("reports.json"), "polygon", ACCOUNT)
    }

    #[tokio::test]
    async fn test_restore_missing_file_uses_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_in(&dir);
        state.restore(&FixedLookup(1_234)).await.unwrap();
        assert_eq!(state.last_scanned_block(), Some(1_234));
        assert_eq!(state.serve(), Some(Ledger::new()));
    }

    #[tokio::test]
    async fn test_restore_corrupt_file_uses_lookup() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("reports.json"), "{not json").unwrap();
        let mut state = state_in(&dir);
        state.restore(&FixedLookup(99)).await.unwrap();
        assert_eq!(state.last_scanned_block(), Some(99));
    }

    #[tokio::test]
    async fn test_save_and_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let query_id = B256::repeat_byte(0x11);

        let mut state = state_in(&dir);
        state.reset(500);
        state.record_timestamp(query_id, 1_000);
        state.record_timestamp(query_id, 900);
        state.end_chunk(800, 5_000).unwrap();
        state.save(5_000).unwrap();

        let mut restored = state_in(&dir);
        restored.restore(&FixedLookup(0)).await.unwrap();
        assert_eq!(restored.last_scanned_block(), Some(800));
        assert_eq!(restored.last_scanned_time(), Some(5_000));
        assert_eq!(restored.serve().unwrap()[&query_id], vec![900, 1_000]);
    }

    #[test]
    fn test_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let query_id = B256::repeat_byte(0x22);
        let mut state = state_in(&dir);
        state.reset(10);
        state.record_timestamp(query_id, 7);
        state.save(1).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(state.path()).unwrap()).unwrap();
        let entry = &raw["polygon"]["0xd5f1Cc896542C111c7Aa7D7fae2C3D654f34b927"];
        assert_eq!(entry["last_scanned_block"], 10);
        assert_eq!(entry[query_id.to_string()], serde_json::json!([7]));
    }

    #[test]
    fn test_other_entries_survive_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.json");
        fs::write(
            &path,
            r#"{"mainnet": {"0x0000000000000000000000000000000000000001": {"last_scanned_block": 3}}}"#,
        )
        .unwrap();

        let mut state = ScanState::new(&path, "polygon", ACCOUNT);
        state.document = read_document(&path).unwrap().unwrap();
        state.reset(10);
        state.save(1).unwrap();

        let document = read_document(&path).unwrap().unwrap();
        assert_eq!(
            document["mainnet"]["0x0000000000000000000000000000000000000001"].last_scanned_block,
            3
        );
        assert_eq!(document["polygon"][state.account()].last_scanned_block, 10);
    }

    #[test]
    fn test_start_at_keeps_other_chains() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.json");
        fs::write(
            &path,
            r#"{"mainnet": {"0x0000000000000000000000000000000000000001": {"last_scanned_block": 3}}}"#,
        )
        .unwrap();

        let mut state = ScanState::new(&path, "polygon", ACCOUNT);
        state.start_at(10);
        state.save(1).unwrap();

        let document = read_document(&path).unwrap().unwrap();
        assert!(document.contains_key("mainnet"));
        assert_eq!(state.last_scanned_block(), Some(10));
    }

    #[test]
    fn test_record_timestamp_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let query_id = B256::repeat_byte(0x33);
        let mut state = state_in(&dir);
        state.reset(1);
        assert!(state.record_timestamp(query_id, 1_000));
        assert!(!state.record_timestamp(query_id, 1_000));
        assert_eq!(state.serve().unwrap()[&query_id], vec![1_000]);
    }

    #[test]
    fn test_end_chunk_debounces_flush() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_in(&dir).with_flush_interval(60);
        state.reset(1);
        state.save(1_000).unwrap();

        assert!(!state.end_chunk(10, 1_030).unwrap());
        assert!(!state.end_chunk(20, 1_060).unwrap());
        assert!(state.end_chunk(30, 1_061).unwrap());
        assert!(!state.end_chunk(40, 1_100).unwrap());
    }

    #[test]
    fn test_end_chunk_never_moves_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_in(&dir);
        state.reset(100);
        state.end_chunk(90, 1).unwrap();
        assert_eq!(state.last_scanned_block(), Some(100));
        state.end_chunk(150, 2).unwrap();
        assert_eq!(state.last_scanned_block(), Some(150));
    }
}
