//! Single instance lock using Unix socket.
//!
//! Prevents two controllers from driving the same fan pin.
//! Uses a Unix socket which is automatically cleaned up by the OS when the
//! process dies, avoiding stale lock files.

use std::io;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SOCKET_NAME: &str = "thermofan.sock";

/// Error types for instance lock operations.
#[derive(Debug, Error)]
pub enum InstanceLockError {
    /// Another instance is already running.
    #[error("another instance is already running")]
    AlreadyRunning,

    /// I/O error during lock acquisition.
    #[error("failed to acquire instance lock: {0}")]
    Io(#[from] io::Error),
}

/// Single instance lock using a Unix socket.
///
/// The lock is held as long as this struct exists. When dropped, the socket
/// file is removed. If the process crashes, the OS automatically removes
/// the socket, preventing stale locks.
pub struct InstanceLock {
    _listener: UnixListener,
    path: PathBuf,
}

impl InstanceLock {
    /// Attempt to acquire the instance lock.
    ///
    /// Returns `Ok(InstanceLock)` if this is the only instance running.
    /// Returns `Err(InstanceLockError::AlreadyRunning)` if another instance holds the lock.
    pub fn acquire() -> Result<Self, InstanceLockError> {
        Self::acquire_at(Self::socket_path())
    }

    /// Acquire the lock on an explicit socket path.
    pub fn acquire_at(path: impl Into<PathBuf>) -> Result<Self, InstanceLockError> {
        let path = path.into();

        // Remove stale socket if it exists but no process holds it
        // This handles the case where the process was SIGKILL'd and
        // the Drop handler never ran, but the OS released the socket
        if path.exists() {
            // Try to connect - if it fails, the socket is stale
            match std::os::unix::net::UnixStream::connect(&path) {
                Ok(_) => {
                    // Connection succeeded - another instance is running
                    return Err(InstanceLockError::AlreadyRunning);
                }
                Err(_) => {
                    // Connection failed - socket is stale, remove it
                    let _ = std::fs::remove_file(&path);
                }
            }
        }

        // Try to bind the socket
        match UnixListener::bind(&path) {
            Ok(listener) => Ok(Self {
                _listener: listener,
                path,
            }),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                // Race condition: another instance bound between our check and bind
                Err(InstanceLockError::AlreadyRunning)
            }
            Err(e) => Err(InstanceLockError::Io(e)),
        }
    }

    /// Get the path to the socket file.
    pub fn socket_path() -> PathBuf {
        // Runtime dir if available (auto-cleaned on logout), temp dir otherwise
        dirs::runtime_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(SOCKET_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // Clean up the socket file on normal exit
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path_name() {
        let path = InstanceLock::socket_path();
        assert!(path.ends_with("thermofan.sock"));
    }

    #[test]
    fn test_second_acquire_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock.sock");

        let lock = InstanceLock::acquire_at(&path).unwrap();
        assert_eq!(lock.path(), path.as_path());
        assert!(matches!(
            InstanceLock::acquire_at(&path),
            Err(InstanceLockError::AlreadyRunning)
        ));

        drop(lock);
        assert!(!path.exists());
        assert!(InstanceLock::acquire_at(&path).is_ok());
    }

    #[test]
    fn test_stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        // Bound and immediately closed: nobody listens any more.
        drop(UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        assert!(InstanceLock::acquire_at(&path).is_ok());
    }
}
