//! Registry of live sessions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::session::Session;

/// Process-wide set of live sessions, owned by the server's top-level state
/// and mutated only by the session lifecycle manager. Removal is
/// idempotent: a session leaves the registry at most once.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, session: Arc<Session>) {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
    }

    /// Remove a session by id. Returns whether this call removed it.
    pub async fn discard(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    /// Take every live session out, leaving the registry empty.
    pub async fn drain(&self) -> Vec<Arc<Session>> {
        self.sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::Recorder;
    use crate::session::session::new_peer_connection;

    async fn test_session(id: &str) -> Arc<Session> {
        let pc = new_peer_connection().await.unwrap();
        Session::new(id.to_string(), pc, Recorder::blackhole())
    }

    #[tokio::test]
    async fn discard_is_idempotent() {
        let registry = SessionRegistry::new();
        registry.add(test_session("a").await).await;

        assert!(registry.discard("a").await);
        assert!(!registry.discard("a").await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn concurrent_discards_remove_exactly_once() {
        let registry = Arc::new(SessionRegistry::new());
        registry.add(test_session("a").await).await;

        let (r1, r2) = {
            let (a, b) = (registry.clone(), registry.clone());
            tokio::join!(
                tokio::spawn(async move { a.discard("a").await }),
                tokio::spawn(async move { b.discard("a").await }),
            )
        };
        let removed = [r1.unwrap(), r2.unwrap()];
        assert_eq!(removed.iter().filter(|&&r| r).count(), 1);
    }

    #[tokio::test]
    async fn drain_empties_the_registry() {
        let registry = SessionRegistry::new();
        registry.add(test_session("a").await).await;
        registry.add(test_session("b").await).await;

        let drained = registry.drain().await;
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty().await);
    }
}
