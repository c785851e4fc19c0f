//! File operations for the quarantine store.
//!
//! Provides:
//! - Secure payload deletion with overwrite
//! - No-clobber atomic writes for restore
//! - Owner-only directory creation

use rand::RngCore;
use std::fs::{self, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::core::error::{Error, Result};

/// Default number of overwrite passes for secure deletion.
const SECURE_DELETE_PASSES: u8 = 1;

/// Secure file operations manager.
#[derive(Debug, Clone)]
pub struct SecureOperations {
    /// Number of overwrite passes for secure deletion
    overwrite_passes: u8,
}

impl SecureOperations {
    pub fn new() -> Self {
        Self {
            overwrite_passes: SECURE_DELETE_PASSES,
        }
    }

    /// Create a secure operations manager with custom overwrite passes.
    pub fn with_passes(passes: u8) -> Self {
        Self {
            overwrite_passes: passes.max(1),
        }
    }

    pub fn passes(&self) -> u8 {
        self.overwrite_passes
    }

    /// Securely delete a file by overwriting with random data before deletion.
    ///
    /// This method:
    /// 1. Overwrites the content with random data (one or more passes)
    /// 2. Renames the file to a random name
    /// 3. Deletes the renamed file
    pub fn secure_delete(&self, path: &Path) -> Result<()> {
        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::file_read(path, e)),
        };

        let file_size = metadata.len();
        if file_size > 0 {
            for _ in 0..self.overwrite_passes {
                overwrite_with_random(path, file_size)?;
            }
        }

        let random_path = sibling_path(path, &random_name());
        fs::rename(path, &random_path).map_err(|e| Error::file_delete(path, e))?;
        fs::remove_file(&random_path).map_err(|e| Error::file_delete(path, e))?;

        Ok(())
    }

    /// Delete without overwrite. Missing files are not an error.
    pub fn simple_delete(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::file_delete(path, e)),
        }
    }
}

impl Default for SecureOperations {
    fn default() -> Self {
        Self::new()
    }
}

fn overwrite_with_random(path: &Path, size: u64) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| Error::file_write(path, e))?;

    const CHUNK_SIZE: u64 = 8192;
    let mut rng = rand::thread_rng();
    let mut buffer = vec![0u8; CHUNK_SIZE.min(size) as usize];
    let mut remaining = size;

    file.seek(SeekFrom::Start(0))
        .map_err(|e| Error::file_write(path, e))?;

    while remaining > 0 {
        let write_size = remaining.min(CHUNK_SIZE) as usize;
        rng.fill_bytes(&mut buffer[..write_size]);
        file.write_all(&buffer[..write_size])
            .map_err(|e| Error::file_write(path, e))?;
        remaining -= write_size as u64;
    }

    file.sync_all().map_err(|e| Error::file_write(path, e))
}

fn random_name() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn sibling_path(path: &Path, name: &str) -> PathBuf {
    path.parent().unwrap_or(Path::new(".")).join(name)
}

/// Write `data` to `target` without ever replacing an existing file.
///
/// Content goes to a temp file in the target directory first and is then
/// linked into place, so readers never observe a partial file. Returns
/// `Error::TargetExists` if something is already at `target`.
pub fn write_new_atomic(target: &Path, data: &[u8]) -> Result<()> {
    if target.symlink_metadata().is_ok() {
        return Err(Error::TargetExists(target.to_path_buf()));
    }

    let temp = sibling_path(target, &format!(".{}.tmp", random_name()));
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp)
            .map_err(|e| Error::file_write(&temp, e))?;
        let written = file.write_all(data).and_then(|_| file.sync_all());
        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(Error::file_write(target, e));
        }
    }

    let linked = match fs::hard_link(&temp, target) {
        Ok(()) => {
            let _ = fs::remove_file(&temp);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(Error::TargetExists(target.to_path_buf()))
        }
        // Filesystems without hard links: recheck and rename.
        Err(_) if target.symlink_metadata().is_err() => {
            fs::rename(&temp, target).map_err(|e| Error::file_write(target, e))
        }
        Err(_) => Err(Error::TargetExists(target.to_path_buf())),
    };

    if linked.is_err() {
        let _ = fs::remove_file(&temp);
    }
    linked
}

/// Write a brand new file (create_new) and fsync it.
pub fn write_new(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| Error::file_write(path, e))?;
    file.write_all(data)
        .map_err(|e| Error::file_write(path, e))?;
    file.sync_all().map_err(|e| Error::file_write(path, e))
}

/// Create a directory (and parents) and restrict it to the owner.
pub fn ensure_private_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| Error::DirectoryAccess {
        path: path.to_path_buf(),
        source: e,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700)).map_err(|e| {
            Error::DirectoryAccess {
                path: path.to_path_buf(),
                source: e,
            }
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_secure_delete() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test_delete.txt");

        fs::write(&file_path, b"This is test content to delete").unwrap();

        SecureOperations::with_passes(3)
            .secure_delete(&file_path)
            .unwrap();

        assert!(!file_path.exists());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_secure_delete_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("nonexistent.txt");

        SecureOperations::new().secure_delete(&file_path).unwrap();
        SecureOperations::new().simple_delete(&file_path).unwrap();
    }

    #[test]
    fn test_custom_passes() {
        assert_eq!(SecureOperations::with_passes(5).passes(), 5);
        assert_eq!(SecureOperations::with_passes(0).passes(), 1);
    }

    #[test]
    fn test_write_new_atomic() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("restored.bin");

        write_new_atomic(&target, b"restored content").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"restored content");

        // Only the target remains; the temp file is gone.
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_new_atomic_never_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("existing.txt");
        fs::write(&target, b"keep me").unwrap();

        let result = write_new_atomic(&target, b"replacement");
        assert!(matches!(result, Err(Error::TargetExists(_))));
        assert_eq!(fs::read(&target).unwrap(), b"keep me");
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_new_refuses_existing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("payload");
        write_new(&path, b"one").unwrap();
        assert!(write_new(&path, b"two").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_private_dir_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("store").join("items");
        ensure_private_dir(&dir).unwrap();

        let mode = fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
