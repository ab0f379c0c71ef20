//! Process-global session registry
//!
//! Maps session ids to actor handles so send actions can address any
//! live interpreter in the process by id. Registration happens on
//! `start()`, removal on `stop()`.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::actor::ActorRef;
use crate::error::RegistryError;

// Short process nonce so session ids from different processes never
// collide when they meet in logs.
static NONCE: Lazy<String> = Lazy::new(|| {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
});

static COUNTER: AtomicU64 = AtomicU64::new(0);

static REGISTRY: Lazy<SessionRegistry> = Lazy::new(SessionRegistry::new);

/// Process-unique session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Allocate the next session id: process nonce + monotonic counter
    pub fn next() -> Self {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}:{}", *NONCE, n))
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry of live sessions in this process
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, ActorRef>>,
}

impl SessionRegistry {
    fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Get the global registry instance
    pub fn global() -> &'static SessionRegistry {
        &REGISTRY
    }

    /// Bind a session id to an actor handle. Collisions are rejected;
    /// a freed id may be re-bound.
    pub fn bind(&self, id: &SessionId, actor: ActorRef) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(id.as_str()) {
            return Err(RegistryError::Collision(id.to_string()));
        }
        sessions.insert(id.to_string(), actor);
        Ok(())
    }

    /// Release a session id
    pub fn free(&self, id: &SessionId) {
        self.sessions.write().remove(id.as_str());
    }

    /// Look up an actor by session id string
    pub fn get(&self, id: &str) -> Option<ActorRef> {
        self.sessions.read().get(id).cloned()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// True when no sessions are registered
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert_ne!(a, b);
        assert!(a.as_str().contains(':'));
    }

    #[test]
    fn test_bind_lookup_free() {
        let registry = SessionRegistry::new();
        let id = SessionId::next();

        registry.bind(&id, ActorRef::null("svc")).unwrap();
        assert!(registry.get(id.as_str()).is_some());

        registry.free(&id);
        assert!(registry.get(id.as_str()).is_none());
    }

    #[test]
    fn test_bind_rejects_collision() {
        let registry = SessionRegistry::new();
        let id = SessionId::next();

        registry.bind(&id, ActorRef::null("a")).unwrap();
        let err = registry.bind(&id, ActorRef::null("b")).unwrap_err();
        assert!(matches!(err, RegistryError::Collision(_)));

        // freeing makes the id available again
        registry.free(&id);
        registry.bind(&id, ActorRef::null("c")).unwrap();
    }
}
