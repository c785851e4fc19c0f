//! AES-256-GCM encryption for the quarantine store.
//!
//! Every entry is sealed under its own random key. Entry keys are wrapped by
//! a master key kept next to the index in a 0600 key file.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use crate::core::error::{Error, Result};

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes
const NONCE_SIZE: usize = 12;
/// Magic bytes identifying a sealed payload
const PAYLOAD_MAGIC: &[u8] = b"HXQV";
/// Current payload format version
const PAYLOAD_VERSION: u8 = 1;
/// magic + version + original size
const HEADER_SIZE: usize = 4 + 1 + 8;

pub type EntryKey = [u8; KEY_SIZE];

/// Generate a fresh random key.
pub fn generate_key() -> EntryKey {
    let mut key = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    key
}

fn cipher(key: &EntryKey) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
}

/// Encrypt with a random nonce; output is nonce || ciphertext || tag.
fn encrypt_with(key: &EntryKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher(key)
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| Error::Encryption(format!("Encryption failed: {}", e)))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend(ciphertext);
    Ok(out)
}

fn decrypt_with(key: &EntryKey, data: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_SIZE {
        return Err(Error::Decryption("Data too short".to_string()));
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    cipher(key)
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| Error::Decryption("authentication failed".to_string()))
}

/// Seal file content under an entry key.
///
/// Payload format:
/// - 4 bytes: magic ("HXQV")
/// - 1 byte: version
/// - 8 bytes: original size (little endian)
/// - 12 bytes: nonce
/// - N bytes: ciphertext with GCM tag
///
/// The header is authenticated as associated data.
pub fn seal_payload(key: &EntryKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(HEADER_SIZE + NONCE_SIZE + plaintext.len() + 16);
    payload.extend_from_slice(PAYLOAD_MAGIC);
    payload.push(PAYLOAD_VERSION);
    payload.extend_from_slice(&(plaintext.len() as u64).to_le_bytes());

    let sealed = encrypt_with(key, plaintext, &payload[..HEADER_SIZE])?;
    payload.extend(sealed);
    Ok(payload)
}

/// Open a sealed payload, checking header, tag and recorded size.
pub fn open_payload(key: &EntryKey, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() < HEADER_SIZE + NONCE_SIZE {
        return Err(Error::Decryption("Invalid payload: too short".to_string()));
    }

    let (header, body) = payload.split_at(HEADER_SIZE);
    if &header[..PAYLOAD_MAGIC.len()] != PAYLOAD_MAGIC {
        return Err(Error::Decryption("Invalid payload: bad magic".to_string()));
    }

    let version = header[PAYLOAD_MAGIC.len()];
    if version != PAYLOAD_VERSION {
        return Err(Error::Decryption(format!(
            "Unsupported payload version: {}",
            version
        )));
    }

    let mut size_bytes = [0u8; 8];
    size_bytes.copy_from_slice(&header[PAYLOAD_MAGIC.len() + 1..]);
    let original_size = u64::from_le_bytes(size_bytes);

    let plaintext = decrypt_with(key, body, header)?;
    if plaintext.len() as u64 != original_size {
        return Err(Error::Decryption(format!(
            "size mismatch: header says {}, got {}",
            original_size,
            plaintext.len()
        )));
    }

    Ok(plaintext)
}

/// Master key used to wrap per-entry keys.
#[derive(Clone)]
pub struct EncryptionManager {
    key: EntryKey,
}

impl std::fmt::Debug for EncryptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionManager { .. }")
    }
}

impl EncryptionManager {
    /// Create a manager with a random master key.
    pub fn new() -> Self {
        Self {
            key: generate_key(),
        }
    }

    pub fn from_key(key: EntryKey) -> Self {
        Self { key }
    }

    /// Load the master key, creating it if the file does not exist.
    pub fn from_key_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let mut file = File::open(path).map_err(|e| Error::file_read(path, e))?;
            let mut key = [0u8; KEY_SIZE];
            file.read_exact(&mut key)
                .map_err(|e| Error::file_read(path, e))?;

            let mut rest = Vec::new();
            file.read_to_end(&mut rest)
                .map_err(|e| Error::file_read(path, e))?;
            if !rest.is_empty() {
                return Err(Error::Encryption(format!(
                    "master key file {} is not {} bytes",
                    path.display(),
                    KEY_SIZE
                )));
            }
            Ok(Self { key })
        } else {
            let manager = Self::new();
            manager.save_key(path)?;
            log::info!("Created quarantine master key at {}", path.display());
            Ok(manager)
        }
    }

    /// Write the master key to a new owner-only file.
    pub fn save_key(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::DirectoryAccess {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(path).map_err(|e| Error::file_write(path, e))?;
        file.write_all(&self.key)
            .map_err(|e| Error::file_write(path, e))?;
        file.sync_all().map_err(|e| Error::file_write(path, e))?;

        Self::set_key_file_permissions(path)
    }

    #[cfg(unix)]
    fn set_key_file_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::file_write(path, e))
    }

    #[cfg(not(unix))]
    fn set_key_file_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// Wrap an entry key for storage in the index.
    pub fn wrap_key(&self, entry_key: &EntryKey) -> Result<Vec<u8>> {
        encrypt_with(&self.key, entry_key, PAYLOAD_MAGIC)
    }

    /// Recover an entry key wrapped by [`wrap_key`](Self::wrap_key).
    pub fn unwrap_key(&self, wrapped: &[u8]) -> Result<EntryKey> {
        let bytes = decrypt_with(&self.key, wrapped, PAYLOAD_MAGIC)?;
        bytes
            .try_into()
            .map_err(|_| Error::Decryption("wrapped key has wrong length".to_string()))
    }
}

impl Default for EncryptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_seal_open() {
        let key = generate_key();
        let plaintext = b"Hello, World! This is a test message.";

        let sealed = seal_payload(&key, plaintext).unwrap();
        assert!(sealed.starts_with(PAYLOAD_MAGIC));
        assert!(!sealed.windows(plaintext.len()).any(|w| w == plaintext));

        assert_eq!(open_payload(&key, &sealed).unwrap(), plaintext);
    }

    #[test]
    fn test_seal_empty() {
        let key = generate_key();
        let sealed = seal_payload(&key, b"").unwrap();
        assert!(open_payload(&key, &sealed).unwrap().is_empty());
    }

    #[test]
    fn test_tampering_detected() {
        let key = generate_key();
        let mut sealed = seal_payload(&key, b"payload bytes").unwrap();

        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(open_payload(&key, &sealed), Err(Error::Decryption(_))));
    }

    #[test]
    fn test_header_is_authenticated() {
        let key = generate_key();
        let mut sealed = seal_payload(&key, b"payload bytes").unwrap();
        sealed[5] ^= 0xff;
        assert!(open_payload(&key, &sealed).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal_payload(&generate_key(), b"Secret message").unwrap();
        assert!(open_payload(&generate_key(), &sealed).is_err());
    }

    #[test]
    fn test_invalid_payload() {
        let key = generate_key();
        assert!(open_payload(&key, b"short").is_err());
        assert!(open_payload(&key, &[0u8; 64]).is_err());
    }

    #[test]
    fn test_wrap_unwrap() {
        let master = EncryptionManager::new();
        let entry = generate_key();

        let wrapped = master.wrap_key(&entry).unwrap();
        assert_eq!(master.unwrap_key(&wrapped).unwrap(), entry);
        assert!(EncryptionManager::new().unwrap_key(&wrapped).is_err());
    }

    #[test]
    fn test_key_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let key_path = temp_dir.path().join("master.key");

        let first = EncryptionManager::from_key_file(&key_path).unwrap();
        let second = EncryptionManager::from_key_file(&key_path).unwrap();

        let wrapped = first.wrap_key(&generate_key()).unwrap();
        assert!(second.unwrap_key(&wrapped).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let key_path = temp_dir.path().join("master.key");
        EncryptionManager::from_key_file(&key_path).unwrap();

        let mode = fs::metadata(&key_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_truncated_key_file_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let key_path = temp_dir.path().join("master.key");
        fs::write(&key_path, [0u8; 10]).unwrap();
        assert!(EncryptionManager::from_key_file(&key_path).is_err());
    }
}
