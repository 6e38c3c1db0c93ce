//! Active-process table.
//!
//! Maps each conversation to the process currently running on its behalf.
//! At most one process per key; a second registration fails until the first
//! is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use super::process::ProcessHandle;
use super::SessionKey;
use crate::error::{VpsError, VpsResult};

/// Table of live sessions.
///
/// Uses a blocking mutex: no lock is ever held across an await, and
/// [`ReleaseGuard`] must be able to release from `Drop`.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionKey, ProcessHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionKey, ProcessHandle>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert `process` under `key`, failing if the key is taken.
    pub fn register(&self, key: SessionKey, process: ProcessHandle) -> VpsResult<()> {
        let mut sessions = self.sessions();
        if sessions.contains_key(&key) {
            return Err(VpsError::AlreadyActive(key));
        }
        info!(key = %key, pid = ?process.pid(), command = %process.command(), "session registered");
        sessions.insert(key, process);
        Ok(())
    }

    /// The process running for `key`, if any.
    pub fn lookup(&self, key: SessionKey) -> Option<ProcessHandle> {
        self.sessions().get(&key).cloned()
    }

    /// Remove the entry for `key`. Safe to call when nothing is registered.
    pub fn release(&self, key: SessionKey) {
        if let Some(process) = self.sessions().remove(&key) {
            info!(key = %key, pid = ?process.pid(), uptime = ?process.uptime(), "session released");
        } else {
            debug!(key = %key, "release on empty slot");
        }
    }

    pub fn contains(&self, key: SessionKey) -> bool {
        self.sessions().contains_key(&key)
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions().len()
    }

    /// Keys of all live sessions, sorted.
    pub fn keys(&self) -> Vec<SessionKey> {
        let mut keys: Vec<SessionKey> = self.sessions().keys().copied().collect();
        keys.sort();
        keys
    }
}

/// Releases a key when dropped, so the slot is reclaimed on every exit path,
/// including when the owning future is dropped mid-stream.
pub struct ReleaseGuard {
    registry: Arc<SessionRegistry>,
    key: SessionKey,
    armed: bool,
}

impl ReleaseGuard {
    pub fn new(registry: Arc<SessionRegistry>, key: SessionKey) -> Self {
        Self {
            registry,
            key,
            armed: true,
        }
    }

    /// Release now and disarm, so a later registration under the same key
    /// is never removed by this guard.
    pub fn release(mut self) {
        self.armed = false;
        self.registry.release(self.key);
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if self.armed {
            self.registry.release(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(command: &str) -> ProcessHandle {
        ProcessHandle::detached(command)
    }

    #[test]
    fn register_then_lookup() {
        let registry = SessionRegistry::new();
        let key = SessionKey(1);
        registry.register(key, handle("sleep 1")).unwrap();
        let found = registry.lookup(key).unwrap();
        assert_eq!(found.command(), "sleep 1");
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn second_registration_is_rejected() {
        let registry = SessionRegistry::new();
        let key = SessionKey(1);
        registry.register(key, handle("first")).unwrap();
        let err = registry.register(key, handle("second")).unwrap_err();
        assert!(matches!(err, VpsError::AlreadyActive(k) if k == key));
        assert_eq!(registry.lookup(key).unwrap().command(), "first");
    }

    #[test]
    fn release_is_idempotent() {
        let registry = SessionRegistry::new();
        let key = SessionKey(9);
        registry.release(key);
        registry.register(key, handle("x")).unwrap();
        registry.release(key);
        registry.release(key);
        assert!(registry.lookup(key).is_none());
        registry.register(key, handle("y")).unwrap();
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn keys_are_independent() {
        let registry = SessionRegistry::new();
        registry.register(SessionKey(2), handle("a")).unwrap();
        registry.register(SessionKey(1), handle("b")).unwrap();
        assert_eq!(registry.keys(), vec![SessionKey(1), SessionKey(2)]);
        registry.release(SessionKey(1));
        assert!(registry.contains(SessionKey(2)));
    }

    #[test]
    fn guard_releases_on_drop() {
        let registry = Arc::new(SessionRegistry::new());
        let key = SessionKey(5);
        registry.register(key, handle("x")).unwrap();
        {
            let _guard = ReleaseGuard::new(registry.clone(), key);
        }
        assert!(!registry.contains(key));
    }

    #[test]
    fn explicit_release_disarms_guard() {
        let registry = Arc::new(SessionRegistry::new());
        let key = SessionKey(6);
        registry.register(key, handle("old")).unwrap();
        let guard = ReleaseGuard::new(registry.clone(), key);
        guard.release();
        registry.register(key, handle("new")).unwrap();
        assert_eq!(registry.lookup(key).unwrap().command(), "new");
    }

    #[test]
    fn concurrent_registration_admits_one() {
        let registry = Arc::new(SessionRegistry::new());
        let key = SessionKey(3);
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.register(key, handle(&format!("p{i}"))).is_ok())
            })
            .collect();
        let admitted = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }
}
