//! Quarantine store.
//!
//! This module handles:
//! - Encrypted isolation of flagged files
//! - The SQLite index of entries and their lifecycle
//! - Verified restore and secure deletion

pub mod encryption;
pub mod index;
pub mod operations;
pub mod store;

pub use encryption::EncryptionManager;
pub use index::{EntryState, QuarantineEntry, QuarantineIndex, QuarantineStats};
pub use operations::SecureOperations;
pub use store::{IsolateOutcome, QuarantineStore, ReconcileReport};

/// Directory holding sealed payloads, relative to the store root
pub const ITEMS_DIR: &str = "items";
/// Extension of sealed payload files
pub const PAYLOAD_EXTENSION: &str = "hxq";
/// Index database filename
pub const INDEX_FILE: &str = "quarantine.db";
/// Master key filename
pub const MASTER_KEY_FILE: &str = "master.key";
