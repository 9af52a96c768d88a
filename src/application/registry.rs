//! In-process table of live sessions.
//!
//! The registry is the only owner of session state. Request handlers, the
//! conversion pipeline and the reaper all go through it, so a directory is
//! never deleted while an artifact read holds its lease.

use crate::domain::session::{SessionId, SessionState};
use crate::error::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};

#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
}

struct Entry {
    dir: PathBuf,
    created_at: DateTime<Utc>,
    state: SessionState,
    guard: Arc<RwLock<()>>,
}

impl Entry {
    fn snapshot(&self, id: SessionId) -> SessionSnapshot {
        SessionSnapshot {
            session_id: id,
            dir: self.dir.clone(),
            created_at: self.created_at,
            state: self.state.clone(),
        }
    }
}

/// Read access to a session directory. Deletion waits until it is dropped.
pub struct ReadLease {
    pub dir: PathBuf,
    _guard: OwnedRwLockReadGuard<()>,
}

#[derive(Clone)]
pub struct SessionRegistry {
    root: PathBuf,
    sessions: Arc<Mutex<HashMap<SessionId, Entry>>>,
}

impl SessionRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a fresh id, create its output directory and register it as
    /// pending.
    pub async fn create(&self) -> Result<SessionSnapshot> {
        tokio::fs::create_dir_all(&self.root).await?;

        let id = SessionId::new();
        let dir = self.root.join(id.dir_name());
        // create_dir (not create_dir_all) so an existing directory is never reused
        tokio::fs::create_dir(&dir).await?;

        let entry = Entry {
            dir,
            created_at: Utc::now(),
            state: SessionState::Pending,
            guard: Arc::new(RwLock::new(())),
        };
        let snapshot = entry.snapshot(id);
        self.sessions.lock().insert(id, entry);

        tracing::debug!(session_id = %id, dir = %snapshot.dir.display(), "session created");
        Ok(snapshot)
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionSnapshot> {
        self.sessions.lock().get(id).map(|entry| entry.snapshot(*id))
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Returns false if the session is no longer registered.
    pub fn set_state(&self, id: &SessionId, state: SessionState) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(id) {
            Some(entry) => {
                tracing::debug!(
                    session_id = %id,
                    from = entry.state.label(),
                    to = state.label(),
                    "session state changed"
                );
                entry.state = state;
                true
            }
            None => false,
        }
    }

    /// Take a read lease on a session directory.
    pub async fn lease(&self, id: &SessionId) -> Option<ReadLease> {
        let (dir, guard) = {
            let sessions = self.sessions.lock();
            let entry = sessions.get(id)?;
            (entry.dir.clone(), Arc::clone(&entry.guard))
        };
        Some(ReadLease {
            dir,
            _guard: guard.read_owned().await,
        })
    }

    /// Terminal sessions older than `retention` at `now`.
    pub fn expired(&self, now: DateTime<Utc>, retention: chrono::Duration) -> Vec<SessionId> {
        self.sessions
            .lock()
            .iter()
            .filter(|(_, entry)| entry.state.is_terminal() && now - entry.created_at > retention)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Unregister a session and delete its directory once outstanding leases
    /// are released. Returns false if it was not registered.
    pub async fn evict(&self, id: &SessionId) -> Result<bool> {
        let removed = self.sessions.lock().remove(id);
        let Some(entry) = removed else {
            return Ok(false);
        };
        let _write = entry.guard.write().await;
        remove_dir_if_present(&entry.dir).await?;
        Ok(true)
    }

    /// Mark a session failed and remove whatever it wrote. The entry stays so
    /// the failure can still be queried.
    pub async fn discard(&self, id: &SessionId, error: String) -> Result<()> {
        let guard = {
            let mut sessions = self.sessions.lock();
            let Some(entry) = sessions.get_mut(id) else {
                return Ok(());
            };
            entry.state = SessionState::Failed { error };
            Arc::clone(&entry.guard)
        };
        let _write = guard.write().await;
        let dir = self.root.join(id.dir_name());
        remove_dir_if_present(&dir).await?;
        Ok(())
    }
}

async fn remove_dir_if_present(dir: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_create_makes_distinct_directories() {
        let root = tempdir().unwrap();
        let registry = SessionRegistry::new(root.path());

        let a = registry.create().await.unwrap();
        let b = registry.create().await.unwrap();

        assert_ne!(a.session_id, b.session_id);
        assert_ne!(a.dir, b.dir);
        assert!(a.dir.is_dir());
        assert!(b.dir.is_dir());
        assert_eq!(a.state, SessionState::Pending);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let root = tempdir().unwrap();
        let registry = SessionRegistry::new(root.path());
        let session = registry.create().await.unwrap();

        assert!(registry.set_state(&session.session_id, SessionState::Running));
        assert_eq!(
            registry.get(&session.session_id).unwrap().state,
            SessionState::Running
        );
        assert!(!registry.set_state(&SessionId::new(), SessionState::Ready));
    }

    #[tokio::test]
    async fn test_expired_only_returns_old_terminal_sessions() {
        let root = tempdir().unwrap();
        let registry = SessionRegistry::new(root.path());
        let ready = registry.create().await.unwrap();
        let running = registry.create().await.unwrap();
        registry.set_state(&ready.session_id, SessionState::Ready);
        registry.set_state(&running.session_id, SessionState::Running);

        let retention = chrono::Duration::hours(1);
        assert!(registry.expired(Utc::now(), retention).is_empty());

        let later = Utc::now() + chrono::Duration::hours(2);
        assert_eq!(registry.expired(later, retention), vec![ready.session_id]);
    }

    #[tokio::test]
    async fn test_evict_waits_for_readers() {
        let root = tempdir().unwrap();
        let registry = SessionRegistry::new(root.path());
        let session = registry.create().await.unwrap();
        std::fs::write(session.dir.join("stream.m3u8"), "#EXTM3U\n").unwrap();

        let lease = registry.lease(&session.session_id).await.unwrap();

        let evicting = {
            let registry = registry.clone();
            let id = session.session_id;
            tokio::spawn(async move { registry.evict(&id).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Unregistered immediately, but the files survive while leased.
        assert!(!registry.contains(&session.session_id));
        assert!(lease.dir.join("stream.m3u8").exists());

        drop(lease);
        assert!(evicting.await.unwrap().unwrap());
        assert!(!session.dir.exists());
    }

    #[tokio::test]
    async fn test_discard_keeps_failure_visible() {
        let root = tempdir().unwrap();
        let registry = SessionRegistry::new(root.path());
        let session = registry.create().await.unwrap();

        registry
            .discard(&session.session_id, "ffmpeg exited with 1".to_string())
            .await
            .unwrap();

        assert!(!session.dir.exists());
        let snapshot = registry.get(&session.session_id).unwrap();
        assert_eq!(
            snapshot.state,
            SessionState::Failed {
                error: "ffmpeg exited with 1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_lease_unknown_session() {
        let root = tempdir().unwrap();
        let registry = SessionRegistry::new(root.path());
        assert!(registry.lease(&SessionId::new()).await.is_none());
    }
}
