//! Registry of live sessions.
//!
//! The registry is the only place sessions are created and destroyed. It is
//! shared between the gateway, the IPC handler and the reaper, so every
//! operation takes `&self` and works without external locking.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use protocol::SessionSummary;

use super::remote::{RemoteConnector, RemoteTarget};
use super::shell::{Session, SessionError, SessionId, SessionSettings};

/// Thread-safe map of session ID to session.
pub struct SessionRegistry<C: RemoteConnector> {
    connector: Arc<C>,
    settings: SessionSettings,
    sessions: DashMap<SessionId, Arc<Session<C>>>,
}

impl<C: RemoteConnector> SessionRegistry<C> {
    /// Creates an empty registry that opens shells with `connector`.
    pub fn new(connector: C, settings: SessionSettings) -> Self {
        Self {
            connector: Arc::new(connector),
            settings,
            sessions: DashMap::new(),
        }
    }

    /// Settings applied to new sessions.
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Opens a shell on `target` and registers it.
    ///
    /// Only sessions that reached `Connected` are stored; a failed attempt
    /// returns the error and leaves the registry untouched.
    pub async fn create(&self, target: RemoteTarget) -> Result<Arc<Session<C>>, SessionError> {
        let session = Arc::new(Session::new(target));
        tracing::info!(
            session_id = %session.id(),
            hostname = %session.target().hostname,
            address = %session.target().address,
            user = %session.target().user,
            "Opening remote shell"
        );

        if let Err(e) = session.connect(self.connector.as_ref(), &self.settings).await {
            tracing::warn!(
                session_id = %session.id(),
                hostname = %session.hostname(),
                error = %e,
                "Failed to open remote shell"
            );
            return Err(e);
        }

        self.sessions
            .insert(session.id().clone(), Arc::clone(&session));
        tracing::info!(
            session_id = %session.id(),
            total = self.sessions.len(),
            "Session registered"
        );
        Ok(session)
    }

    /// Looks up a session by ID.
    pub fn get(&self, session_id: &str) -> Option<Arc<Session<C>>> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Returns true if a session with this ID is registered.
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Removes and disconnects a session. Returns false if it was not present.
    pub async fn close(&self, session_id: &str) -> bool {
        let Some((id, session)) = self.sessions.remove(session_id) else {
            return false;
        };
        session.disconnect().await;
        tracing::debug!(session_id = %id, "Session removed");
        true
    }

    /// Closes every session that has ended or been idle longer than `max_idle`.
    pub async fn reap_expired(&self, max_idle: Duration) -> usize {
        self.reap_expired_at(SystemTime::now(), max_idle).await
    }

    /// Like [`reap_expired`](Self::reap_expired) with an explicit clock.
    pub async fn reap_expired_at(&self, now: SystemTime, max_idle: Duration) -> usize {
        let expired = |session: &Session<C>| {
            session.status().is_terminal() || session.idle_for(now) > max_idle
        };

        let candidates: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| expired(entry.value().as_ref()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut reaped = 0;
        for id in candidates {
            // re-checked under the shard lock in case it was used meanwhile
            let Some((id, session)) = self.sessions.remove_if(&id, |_, s| expired(s.as_ref())) else {
                continue;
            };
            let idle = session.idle_for(now);
            let status = session.status();
            session.disconnect().await;
            tracing::info!(
                session_id = %id,
                hostname = %session.hostname(),
                %status,
                idle_secs = idle.as_secs(),
                "Reaped session"
            );
            reaped += 1;
        }
        reaped
    }

    /// Summaries of all registered sessions keyed by ID.
    pub fn snapshot(&self) -> BTreeMap<SessionId, SessionSummary> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().summary()))
            .collect()
    }

    /// Returns the number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Closes every session. Returns how many were closed.
    pub async fn shutdown(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut closed = 0;
        for id in ids {
            if self.close(&id).await {
                closed += 1;
            }
        }
        if closed > 0 {
            tracing::info!(closed, "Closed all sessions");
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{test_settings, test_target, Behavior, MockConnector};
    use protocol::SessionStatus;

    fn registry(behavior: Behavior) -> (SessionRegistry<MockConnector>, Arc<crate::session::testing::MockRemote>) {
        let (connector, remote) = MockConnector::new(behavior);
        (SessionRegistry::new(connector, test_settings()), remote)
    }

    #[tokio::test]
    async fn test_create_registers_connected_session() {
        let (registry, _) = registry(Behavior::Accept);

        let session = registry.create(test_target()).await.unwrap();

        assert_eq!(session.status(), SessionStatus::Connected);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(session.id()));
        assert!(Arc::ptr_eq(&registry.get(session.id()).unwrap(), &session));
    }

    #[tokio::test]
    async fn test_failed_create_is_not_registered() {
        let (registry, remote) = registry(Behavior::Refuse);

        let err = registry.create(test_target()).await.unwrap_err();

        assert!(matches!(err, SessionError::Connection { .. }));
        assert!(registry.is_empty());
        assert_eq!(remote.connects(), 1);
    }

    #[tokio::test]
    async fn test_create_twice_gives_distinct_sessions() {
        let (registry, _) = registry(Behavior::Accept);

        let a = registry.create(test_target()).await.unwrap();
        let b = registry.create(test_target()).await.unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_get_unknown() {
        let (registry, _) = registry(Behavior::Accept);
        assert!(registry.get("no-such-session").is_none());
    }

    #[tokio::test]
    async fn test_close_removes_and_disconnects() {
        let (registry, remote) = registry(Behavior::Accept);
        let session = registry.create(test_target()).await.unwrap();

        assert!(registry.close(session.id()).await);
        assert!(registry.is_empty());
        assert_eq!(session.status(), SessionStatus::Closed);
        assert_eq!(remote.closes(), 1);

        assert!(!registry.close(session.id()).await);
    }

    #[tokio::test]
    async fn test_close_leaves_other_sessions_running() {
        let (registry, remote) = registry(Behavior::Accept);
        let closed = registry.create(test_target()).await.unwrap();
        let kept = registry.create(test_target()).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        kept.attach(tx).await.unwrap();
        kept.ensure_relay();

        assert!(registry.close(closed.id()).await);
        assert_eq!(kept.status(), SessionStatus::Connected);

        remote.push_output(b"still here");
        assert_eq!(rx.recv().await, Some(protocol::ServerMessage::output("still here")));
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_reap_idle_session() {
        let (registry, _) = registry(Behavior::Accept);
        let stale = registry.create(test_target()).await.unwrap();
        let fresh = registry.create(test_target()).await.unwrap();

        let now = SystemTime::now();
        stale.set_last_used(now - Duration::from_secs(3 * 3600));

        let reaped = registry.reap_expired_at(now, Duration::from_secs(7200)).await;

        assert_eq!(reaped, 1);
        assert!(registry.get(stale.id()).is_none());
        assert!(registry.get(fresh.id()).is_some());
        assert_eq!(stale.status(), SessionStatus::Closed);
    }

    #[tokio::test]
    async fn test_reap_keeps_session_at_threshold() {
        let (registry, _) = registry(Behavior::Accept);
        let session = registry.create(test_target()).await.unwrap();

        let now = SystemTime::now();
        session.set_last_used(now - Duration::from_secs(7200));

        assert_eq!(registry.reap_expired_at(now, Duration::from_secs(7200)).await, 0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_reap_terminal_session() {
        let (registry, remote) = registry(Behavior::Accept);
        let session = registry.create(test_target()).await.unwrap();
        session.ensure_relay();

        remote.end_output();
        let mut status = session.subscribe_status();
        status
            .wait_for(|s| *s == SessionStatus::Closed)
            .await
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.reap_expired(Duration::from_secs(7200)).await, 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_reap_with_clock_behind_last_use() {
        let (registry, _) = registry(Behavior::Accept);
        let session = registry.create(test_target()).await.unwrap();

        let now = SystemTime::now() - Duration::from_secs(60);
        assert_eq!(registry.reap_expired_at(now, Duration::from_secs(1)).await, 0);
        assert!(registry.contains(session.id()));
    }

    #[tokio::test]
    async fn test_snapshot() {
        let (registry, _) = registry(Behavior::Accept);
        let session = registry.create(test_target()).await.unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        let summary = &snapshot[session.id()];
        assert_eq!(summary.hostname, "rig-01");
        assert_eq!(summary.status, SessionStatus::Connected);
    }

    #[tokio::test]
    async fn test_shutdown_closes_all() {
        let (registry, remote) = registry(Behavior::Accept);
        for _ in 0..3 {
            registry.create(test_target()).await.unwrap();
        }

        assert_eq!(registry.shutdown().await, 3);
        assert!(registry.is_empty());
        assert_eq!(remote.closes(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_create_and_close() {
        let (registry, _) = registry(Behavior::Accept);
        let registry = Arc::new(registry);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let session = registry.create(test_target()).await.unwrap();
                let id = session.id().clone();
                assert!(registry.close(&id).await);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(registry.is_empty());
    }
}
