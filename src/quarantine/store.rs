//! Encrypted quarantine store.
//!
//! Layout under the store root:
//! - `master.key`: key-wrapping key (0600)
//! - `quarantine.db`: SQLite index
//! - `items/<uuid>.hxq`: sealed payloads
//!
//! Isolating a file writes and verifies its sealed payload before the
//! original is removed, so a failure at any step leaves the original in
//! place. Work on one path is serialized by a per-path lock; the index
//! mutex is held only for the index step itself.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::encryption::{generate_key, open_payload, seal_payload, EncryptionManager, EntryKey};
use super::index::{
    EntryState, InsertOutcome, NewEntry, QuarantineEntry, QuarantineIndex, QuarantineStats,
};
use super::operations::{ensure_private_dir, write_new, write_new_atomic, SecureOperations};
use super::{INDEX_FILE, ITEMS_DIR, MASTER_KEY_FILE, PAYLOAD_EXTENSION};
use crate::core::config::QuarantineConfig;
use crate::core::error::{Error, Result};
use crate::core::types::ScanResult;
use crate::utils::hash::sha256_bytes;

/// Outcome of [`QuarantineStore::try_isolate`].
#[derive(Debug, Clone)]
pub enum IsolateOutcome {
    /// A new Active entry; the original has been removed
    Created(QuarantineEntry),
    /// The path already had an Active entry; nothing changed
    Existing(QuarantineEntry),
}

impl IsolateOutcome {
    pub fn entry(&self) -> &QuarantineEntry {
        match self {
            IsolateOutcome::Created(entry) | IsolateOutcome::Existing(entry) => entry,
        }
    }

    pub fn into_entry(self) -> QuarantineEntry {
        match self {
            IsolateOutcome::Created(entry) | IsolateOutcome::Existing(entry) => entry,
        }
    }
}

/// What [`QuarantineStore::reconcile`] found.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Payload files with no Active row, now removed
    pub orphans_removed: Vec<PathBuf>,
    /// Active entries whose payload file is gone
    pub missing_payloads: Vec<u64>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.orphans_removed.is_empty() && self.missing_payloads.is_empty()
    }
}

pub struct QuarantineStore {
    root: PathBuf,
    items_dir: PathBuf,
    index: QuarantineIndex,
    master: EncryptionManager,
    ops: SecureOperations,
    path_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl QuarantineStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let items_dir = root.join(ITEMS_DIR);
        ensure_private_dir(&root)?;
        ensure_private_dir(&items_dir)?;

        let master = EncryptionManager::from_key_file(&root.join(MASTER_KEY_FILE))?;
        let index = QuarantineIndex::open(&root.join(INDEX_FILE))?;

        let store = Self {
            root,
            items_dir,
            index,
            master,
            ops: SecureOperations::new(),
            path_locks: Mutex::new(HashMap::new()),
        };

        let report = store.reconcile()?;
        if !report.is_clean() {
            log::warn!(
                "Quarantine store {}: removed {} orphan payloads, {} entries missing payloads",
                store.root.display(),
                report.orphans_removed.len(),
                report.missing_payloads.len()
            );
        }

        Ok(store)
    }

    /// Open the store configured in `config`.
    pub fn from_config(config: &QuarantineConfig) -> Result<Self> {
        Ok(Self::open(config.quarantine_dir())?
            .with_secure_delete_passes(config.secure_delete_passes))
    }

    pub fn with_secure_delete_passes(mut self, passes: u8) -> Self {
        self.ops = SecureOperations::with_passes(passes);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run `f` while holding the lock for `path`.
    ///
    /// The lock entry is dropped from the table once nobody else holds or
    /// waits on it.
    fn with_path_lock<T>(&self, path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = {
            let mut locks = self
                .path_locks
                .lock()
                .map_err(|_| Error::lock_poisoned("quarantine path locks"))?;
            Arc::clone(locks.entry(path.to_path_buf()).or_default())
        };

        let result = match lock.lock() {
            Ok(_guard) => f(),
            Err(_) => Err(Error::lock_poisoned("quarantine path lock")),
        };

        if let Ok(mut locks) = self.path_locks.lock() {
            // One reference in the table, one here.
            if Arc::strong_count(&lock) == 2 {
                locks.remove(path);
            }
        }
        result
    }

    fn payload_path(&self, entry: &QuarantineEntry) -> PathBuf {
        self.items_dir.join(&entry.payload_file)
    }

    /// Quarantine `path`, returning the Active entry for it.
    ///
    /// If the path is already quarantined the existing entry is returned.
    pub fn isolate(&self, path: &Path, result: &ScanResult) -> Result<QuarantineEntry> {
        self.try_isolate(path, result).map(IsolateOutcome::into_entry)
    }

    /// Quarantine `path`, reporting whether a new entry was created.
    pub fn try_isolate(&self, path: &Path, result: &ScanResult) -> Result<IsolateOutcome> {
        let canonical = index_path(path)?;
        self.with_path_lock(&canonical, || self.isolate_locked(&canonical, result))
    }

    fn isolate_locked(&self, canonical: &Path, result: &ScanResult) -> Result<IsolateOutcome> {
        if let Some(existing) = self.index.find_active(&canonical)? {
            log::info!(
                "{}",
                Error::QuarantineConflict {
                    path: canonical.to_path_buf(),
                    existing_id: existing.id,
                }
            );
            return Ok(IsolateOutcome::Existing(existing));
        }

        let content = fs::read(canonical).map_err(|e| Error::file_read(canonical, e))?;
        let sha256 = sha256_bytes(&content);

        let key = generate_key();
        let sealed = seal_payload(&key, &content)?;
        let uuid = Uuid::new_v4().to_string();
        let payload_file = format!("{}.{}", uuid, PAYLOAD_EXTENSION);
        let payload_path = self.items_dir.join(&payload_file);
        write_new(&payload_path, &sealed)?;

        if let Err(reason) = verify_payload(&payload_path, &key, &sha256) {
            self.discard_payload(&payload_path);
            return Err(Error::integrity(&uuid, reason));
        }

        let wrapped = match self.master.wrap_key(&key) {
            Ok(wrapped) => wrapped,
            Err(e) => {
                self.discard_payload(&payload_path);
                return Err(e);
            }
        };

        let threat_name = result.threat_name();
        let new = NewEntry {
            uuid: &uuid,
            original_path: canonical,
            payload_file: &payload_file,
            sha256: &sha256,
            size: content.len() as u64,
            threat_name: &threat_name,
            verdict: result.verdict,
            score: result.score,
            wrapped_key: &wrapped,
        };

        let entry = match self.index.insert_active(&new) {
            Ok(InsertOutcome::Inserted(entry)) => entry,
            Ok(InsertOutcome::Existing(existing)) => {
                self.discard_payload(&payload_path);
                return Ok(IsolateOutcome::Existing(existing));
            }
            Err(e) => {
                self.discard_payload(&payload_path);
                return Err(e);
            }
        };

        if let Err(e) = fs::remove_file(canonical) {
            if let Err(rollback) = self.index.remove(entry.id) {
                log::error!(
                    "Failed to roll back quarantine entry {}: {}",
                    entry.id,
                    rollback
                );
            }
            self.discard_payload(&payload_path);
            return Err(Error::file_delete(canonical, e));
        }

        log::info!(
            "Quarantined {} as entry {} ({})",
            canonical.display(),
            entry.id,
            entry.threat_name
        );
        Ok(IsolateOutcome::Created(entry))
    }

    fn discard_payload(&self, payload_path: &Path) {
        if let Err(e) = self.ops.simple_delete(payload_path) {
            log::warn!("Failed to remove payload {}: {}", payload_path.display(), e);
        }
    }

    fn require_active(&self, id: u64) -> Result<QuarantineEntry> {
        let entry = self.get(id)?;
        if entry.state != EntryState::Active {
            return Err(Error::QuarantineState {
                id,
                state: entry.state.to_string(),
            });
        }
        Ok(entry)
    }

    /// Decrypt and verify an entry's payload.
    fn open_entry(&self, entry: &QuarantineEntry) -> Result<Vec<u8>> {
        let payload_path = self.payload_path(entry);
        let sealed = fs::read(&payload_path)
            .map_err(|e| Error::integrity(entry.id, format!("payload unreadable: {}", e)))?;

        let wrapped = self
            .index
            .wrapped_key(entry.id)?
            .ok_or(Error::QuarantineItemNotFound(entry.id))?;
        let key = self
            .master
            .unwrap_key(&wrapped)
            .map_err(|e| Error::integrity(entry.id, e.to_string()))?;

        let content =
            open_payload(&key, &sealed).map_err(|e| Error::integrity(entry.id, e.to_string()))?;
        if sha256_bytes(&content) != entry.sha256 {
            return Err(Error::integrity(entry.id, "digest mismatch"));
        }
        Ok(content)
    }

    /// Restore an entry to its original path.
    pub fn restore(&self, id: u64) -> Result<PathBuf> {
        let entry = self.require_active(id)?;
        self.restore_to(id, &entry.original_path)?;
        Ok(entry.original_path)
    }

    /// Restore an entry to `target`. Never overwrites an existing file.
    ///
    /// On an integrity failure the entry stays Active and nothing is written.
    pub fn restore_to(&self, id: u64, target: &Path) -> Result<()> {
        let entry = self.require_active(id)?;
        self.with_path_lock(&entry.original_path, || self.restore_locked(id, target))
    }

    fn restore_locked(&self, id: u64, target: &Path) -> Result<()> {
        let entry = self.require_active(id)?;

        let content = self.open_entry(&entry)?;

        if target.symlink_metadata().is_ok() {
            return Err(Error::TargetExists(target.to_path_buf()));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::DirectoryAccess {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        write_new_atomic(target, &content)?;

        if !self
            .index
            .set_state(id, EntryState::Active, EntryState::Restored)?
        {
            return Err(Error::QuarantineState {
                id,
                state: "changed during restore".to_string(),
            });
        }
        self.discard_payload(&self.payload_path(&entry));

        log::info!("Restored quarantine entry {} to {}", id, target.display());
        Ok(())
    }

    /// Securely delete an entry's payload and mark it Deleted.
    pub fn delete(&self, id: u64) -> Result<()> {
        let entry = self.require_active(id)?;
        self.with_path_lock(&entry.original_path, || self.delete_locked(id))
    }

    fn delete_locked(&self, id: u64) -> Result<()> {
        let entry = self.require_active(id)?;

        self.ops.secure_delete(&self.payload_path(&entry))?;
        self.index
            .set_state(id, EntryState::Active, EntryState::Deleted)?;

        log::info!("Deleted quarantine entry {} ({})", id, entry.threat_name);
        Ok(())
    }

    /// Check that an Active entry still decrypts to its recorded digest.
    pub fn verify(&self, id: u64) -> Result<()> {
        let entry = self.require_active(id)?;
        self.open_entry(&entry).map(|_| ())
    }

    pub fn get(&self, id: u64) -> Result<QuarantineEntry> {
        self.index
            .get(id)?
            .ok_or(Error::QuarantineItemNotFound(id))
    }

    /// All entries, newest first.
    pub fn list(&self) -> Result<Vec<QuarantineEntry>> {
        self.index.list(None)
    }

    pub fn list_active(&self) -> Result<Vec<QuarantineEntry>> {
        self.index.list(Some(EntryState::Active))
    }

    pub fn stats(&self) -> Result<QuarantineStats> {
        self.index.stats()
    }

    /// Delete Active entries quarantined more than `retention_days` ago.
    ///
    /// Returns the entries that were deleted. Failures are logged and the
    /// entry is left Active.
    pub fn purge_expired(&self, retention_days: u32) -> Result<Vec<QuarantineEntry>> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let mut purged = Vec::new();

        for entry in self.index.active_before(cutoff)? {
            match self.delete(entry.id) {
                Ok(()) => purged.push(entry),
                Err(e) => log::warn!("Failed to purge quarantine entry {}: {}", entry.id, e),
            }
        }

        if !purged.is_empty() {
            log::info!(
                "Purged {} quarantine entries older than {} days",
                purged.len(),
                retention_days
            );
        }
        Ok(purged)
    }

    /// Bring the payload directory and the index back in line.
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let active = self.index.list(Some(EntryState::Active))?;
        let referenced: HashSet<&str> = active.iter().map(|e| e.payload_file.as_str()).collect();

        let entries = fs::read_dir(&self.items_dir).map_err(|e| Error::DirectoryAccess {
            path: self.items_dir.clone(),
            source: e,
        })?;

        for dir_entry in entries.flatten() {
            let path = dir_entry.path();
            let is_payload = path
                .extension()
                .map(|ext| ext == PAYLOAD_EXTENSION)
                .unwrap_or(false);
            let name = dir_entry.file_name();
            let name = name.to_string_lossy();

            if is_payload && !referenced.contains(name.as_ref()) {
                match self.ops.simple_delete(&path) {
                    Ok(()) => report.orphans_removed.push(path),
                    Err(e) => log::warn!("Failed to remove orphan payload: {}", e),
                }
            }
        }

        for entry in &active {
            if !self.payload_path(entry).exists() {
                log::warn!(
                    "Quarantine entry {} ({}) has no payload",
                    entry.id,
                    entry.original_path.display()
                );
                report.missing_payloads.push(entry.id);
            }
        }

        Ok(report)
    }
}

/// Absolute, symlink-free form of `path` used as the index key.
///
/// Falls back to the resolved parent when the file itself is gone, so a
/// path whose original was already quarantined still maps to its entry.
fn index_path(path: &Path) -> Result<PathBuf> {
    let missing = match path.canonicalize() {
        Ok(canonical) => return Ok(canonical),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => e,
        Err(e) => return Err(Error::file_read(path, e)),
    };

    let Some(name) = path.file_name() else {
        return Err(Error::file_read(path, missing));
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match parent.canonicalize() {
        Ok(parent) => Ok(parent.join(name)),
        Err(_) => Err(Error::file_read(path, missing)),
    }
}

fn verify_payload(
    payload_path: &Path,
    key: &EntryKey,
    sha256: &str,
) -> std::result::Result<(), String> {
    let written = fs::read(payload_path).map_err(|e| format!("payload read-back failed: {}", e))?;
    let content = open_payload(key, &written).map_err(|e| e.to_string())?;
    if sha256_bytes(&content) != sha256 {
        return Err("digest mismatch after write".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{
        DetectionSignal, FileRecord, RemediationAction, Severity, SignalSource, Verdict,
    };
    use crate::scanner::filetype::FileType;
    use crate::utils::hash::DigestSet;
    use tempfile::TempDir;

    const CONTENT: &[u8] = b"X5O!P%@AP[4\\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";

    fn result_for(path: &Path) -> ScanResult {
        ScanResult {
            record: FileRecord {
                path: path.to_path_buf(),
                size: CONTENT.len() as u64,
                digests: DigestSet::new(),
                entropy: 4.8,
                extension: None,
                content_type: FileType::Text,
            },
            signals: vec![DetectionSignal::new(
                SignalSource::Signature,
                "EICAR-Test-File",
                Severity::Low,
                100,
            )],
            score: 100,
            verdict: Verdict::Malicious,
            recommended_action: RemediationAction::Quarantine,
            quarantine: None,
        }
    }

    fn setup() -> (TempDir, QuarantineStore, PathBuf) {
        let dir = TempDir::new().unwrap();
        let store = QuarantineStore::open(dir.path().join("store")).unwrap();
        let file = dir.path().join("work").join("eicar.com");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, CONTENT).unwrap();
        let file = file.canonicalize().unwrap();
        (dir, store, file)
    }

    fn created(outcome: IsolateOutcome) -> QuarantineEntry {
        match outcome {
            IsolateOutcome::Created(entry) => entry,
            IsolateOutcome::Existing(entry) => panic!("entry {} already existed", entry.id),
        }
    }

    #[test]
    fn test_isolate_restore_round_trip() {
        let (_dir, store, file) = setup();

        let entry = store.isolate(&file, &result_for(&file)).unwrap();
        assert!(!file.exists());
        assert_eq!(entry.state, EntryState::Active);
        assert_eq!(entry.threat_name, "EICAR-Test-File");
        assert_eq!(entry.sha256, sha256_bytes(CONTENT));

        let payload = fs::read(store.payload_path(&entry)).unwrap();
        assert!(!payload.windows(CONTENT.len()).any(|w| w == CONTENT));

        store.verify(entry.id).unwrap();
        let restored = store.restore(entry.id).unwrap();
        assert_eq!(restored, file);
        assert_eq!(fs::read(&file).unwrap(), CONTENT);

        let entry = store.get(entry.id).unwrap();
        assert_eq!(entry.state, EntryState::Restored);
        assert!(!store.payload_path(&entry).exists());
        assert!(store.list_active().unwrap().is_empty());
    }

    #[test]
    fn test_isolate_twice_returns_existing() {
        let (_dir, store, file) = setup();
        let first = created(store.try_isolate(&file, &result_for(&file)).unwrap());

        // Same path reappears before the first entry is resolved.
        fs::write(&file, CONTENT).unwrap();
        match store.try_isolate(&file, &result_for(&file)).unwrap() {
            IsolateOutcome::Existing(existing) => assert_eq!(existing.id, first.id),
            IsolateOutcome::Created(_) => panic!("second entry created"),
        }
        assert!(file.exists());
        assert_eq!(store.list_active().unwrap().len(), 1);
    }

    #[test]
    fn test_isolate_after_original_removed_returns_existing() {
        let (_dir, store, file) = setup();
        let first = store.isolate(&file, &result_for(&file)).unwrap();
        assert!(!file.exists());

        match store.try_isolate(&file, &result_for(&file)).unwrap() {
            IsolateOutcome::Existing(existing) => assert_eq!(existing.id, first.id),
            IsolateOutcome::Created(_) => panic!("second entry created"),
        }
        assert_eq!(store.isolate(&file, &result_for(&file)).unwrap().id, first.id);
        assert_eq!(store.list_active().unwrap().len(), 1);
    }

    #[test]
    fn test_isolate_relative_path_after_removal() {
        let (_dir, store, file) = setup();
        let first = store.isolate(&file, &result_for(&file)).unwrap();

        // A non-canonical spelling of the same, now missing, path.
        let parent = file.parent().unwrap();
        let dotted = parent.join(".").join(file.file_name().unwrap());
        let second = store.isolate(&dotted, &result_for(&dotted)).unwrap();
        assert_eq!(second.id, first.id);
    }

    #[test]
    fn test_concurrent_isolate_single_entry() {
        let (_dir, store, file) = setup();
        let result = result_for(&file);
        let barrier = std::sync::Barrier::new(8);

        let mut outcomes: Vec<Result<IsolateOutcome>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        store.try_isolate(&file, &result)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        // A late caller arriving after the original is gone.
        assert!(!file.exists());
        outcomes.push(std::thread::scope(|s| {
            s.spawn(|| store.try_isolate(&file, &result)).join().unwrap()
        }));

        let winner = outcomes
            .iter()
            .filter_map(|o| match o {
                Ok(IsolateOutcome::Created(entry)) => Some(entry.id),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(winner.len(), 1);

        for outcome in &outcomes {
            match outcome {
                Ok(IsolateOutcome::Created(_)) => {}
                Ok(IsolateOutcome::Existing(entry)) => assert_eq!(entry.id, winner[0]),
                Err(e) => panic!("isolate failed: {}", e),
            }
        }
        assert_eq!(store.list_active().unwrap().len(), 1);
    }

    #[test]
    fn test_path_locks_released() {
        let (_dir, store, file) = setup();
        let entry = store.isolate(&file, &result_for(&file)).unwrap();
        store.isolate(&file, &result_for(&file)).unwrap();
        assert!(store.path_locks.lock().unwrap().is_empty());

        store.restore(entry.id).unwrap();
        assert!(store.path_locks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_tampered_payload_is_not_restored() {
        let (_dir, store, file) = setup();
        let entry = store.isolate(&file, &result_for(&file)).unwrap();

        let payload_path = store.payload_path(&entry);
        let mut payload = fs::read(&payload_path).unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0x55;
        fs::write(&payload_path, payload).unwrap();

        let err = store.restore(entry.id).unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
        assert!(!file.exists());
        assert_eq!(store.get(entry.id).unwrap().state, EntryState::Active);
        assert!(payload_path.exists());
        assert!(store.verify(entry.id).is_err());
    }

    #[test]
    fn test_restore_refuses_existing_target() {
        let (_dir, store, file) = setup();
        let entry = store.isolate(&file, &result_for(&file)).unwrap();

        fs::write(&file, b"new file in the way").unwrap();
        let err = store.restore(entry.id).unwrap_err();
        assert!(matches!(err, Error::TargetExists(_)));
        assert_eq!(fs::read(&file).unwrap(), b"new file in the way");
        assert_eq!(store.get(entry.id).unwrap().state, EntryState::Active);
    }

    #[test]
    fn test_restore_to_creates_parents() {
        let (dir, store, file) = setup();
        let entry = store.isolate(&file, &result_for(&file)).unwrap();

        let target = dir.path().join("restored").join("nested").join("copy.com");
        store.restore_to(entry.id, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), CONTENT);
        assert!(!file.exists());
    }

    #[test]
    fn test_delete() {
        let (_dir, store, file) = setup();
        let entry = store.isolate(&file, &result_for(&file)).unwrap();

        store.delete(entry.id).unwrap();
        let entry = store.get(entry.id).unwrap();
        assert_eq!(entry.state, EntryState::Deleted);
        assert!(!store.payload_path(&entry).exists());

        assert!(matches!(
            store.restore(entry.id),
            Err(Error::QuarantineState { .. })
        ));
        assert!(matches!(
            store.delete(entry.id),
            Err(Error::QuarantineState { .. })
        ));
    }

    #[test]
    fn test_unknown_entry() {
        let (_dir, store, _file) = setup();
        assert!(matches!(
            store.restore(42),
            Err(Error::QuarantineItemNotFound(42))
        ));
    }

    #[test]
    fn test_ids_monotonic_across_reopen() {
        let (dir, store, file) = setup();
        let first = store.isolate(&file, &result_for(&file)).unwrap();
        store.delete(first.id).unwrap();
        drop(store);

        let store = QuarantineStore::open(dir.path().join("store")).unwrap();
        fs::write(&file, CONTENT).unwrap();
        let second = store.isolate(&file, &result_for(&file)).unwrap();
        assert!(second.id > first.id);
        assert_eq!(store.stats().unwrap().deleted, 1);

        // The reopened store still unwraps keys made before.
        store.verify(second.id).unwrap();
    }

    #[test]
    fn test_reconcile_removes_orphans() {
        let (dir, store, file) = setup();
        let entry = store.isolate(&file, &result_for(&file)).unwrap();

        let orphan = dir
            .path()
            .join("store")
            .join(ITEMS_DIR)
            .join(format!("{}.{}", Uuid::new_v4(), PAYLOAD_EXTENSION));
        fs::write(&orphan, b"left behind").unwrap();

        let report = store.reconcile().unwrap();
        assert_eq!(report.orphans_removed, vec![orphan.clone()]);
        assert!(report.missing_payloads.is_empty());
        assert!(!orphan.exists());
        assert!(store.payload_path(&entry).exists());

        fs::remove_file(store.payload_path(&entry)).unwrap();
        assert_eq!(store.reconcile().unwrap().missing_payloads, vec![entry.id]);
    }

    #[test]
    fn test_purge_expired() {
        let (_dir, store, file) = setup();
        let entry = store.isolate(&file, &result_for(&file)).unwrap();

        assert!(store.purge_expired(30).unwrap().is_empty());

        store
            .index
            .backdate(entry.id, Utc::now() - chrono::Duration::days(31))
            .unwrap();
        let purged = store.purge_expired(30).unwrap();
        assert_eq!(purged.len(), 1);
        assert_eq!(store.get(entry.id).unwrap().state, EntryState::Deleted);
    }

    #[test]
    fn test_stats() {
        let (_dir, store, file) = setup();
        store.isolate(&file, &result_for(&file)).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.active, 1);
        assert_eq!(stats.active_bytes, CONTENT.len() as u64);
    }

    #[test]
    fn test_isolate_missing_file() {
        let (dir, store, _file) = setup();
        let missing = dir.path().join("missing.bin");
        let err = store.isolate(&missing, &result_for(&missing)).unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_store_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store, _file) = setup();
        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(store.root()), 0o700);
        assert_eq!(mode(&store.root().join(ITEMS_DIR)), 0o700);
        assert_eq!(mode(&store.root().join(MASTER_KEY_FILE)), 0o600);
    }
}
