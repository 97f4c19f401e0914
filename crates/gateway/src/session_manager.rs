//! Session Manager: admits turns, serializes per-session access, and runs
//! the periodic idle-eviction sweep. The Conversation Orchestrator itself
//! holds no per-session state, so "at most one live orchestrator per
//! session" reduces to "at most one turn in flight per session" — enforced
//! here via the session lock map.

use std::sync::Arc;

use cce_domain::error::Result;
use cce_domain::trace::TraceEvent;
use cce_domain::turn::Session;
use cce_memory::EpisodicStore;
use cce_sessions::{SessionLockMap, SessionRegistry, TierStore};
use tokio::sync::OwnedSemaphorePermit;

pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    locks: Arc<SessionLockMap>,
    tier_store: Arc<TierStore>,
    episodic_store: Arc<EpisodicStore>,
}

impl SessionManager {
    pub fn new(
        registry: Arc<SessionRegistry>,
        locks: Arc<SessionLockMap>,
        tier_store: Arc<TierStore>,
        episodic_store: Arc<EpisodicStore>,
    ) -> Self {
        Self {
            registry,
            locks,
            tier_store,
            episodic_store,
        }
    }

    /// Resolves or creates the session and acquires its per-session lock.
    /// The returned permit must be held for the duration of the turn.
    pub async fn admit(
        &self,
        user_id: &str,
        session_id: Option<&str>,
    ) -> (Session, OwnedSemaphorePermit) {
        let (session, _is_new) = self.registry.resolve_or_create(user_id, session_id);
        let permit = self.locks.acquire(&lock_key(user_id, &session.session_id)).await;
        (session, permit)
    }

    pub fn list_sessions(&self, user_id: &str) -> Vec<Session> {
        self.registry.list(user_id)
    }

    pub fn delete_session(&self, user_id: &str, session_id: &str) -> Result<()> {
        self.tier_store.delete_session(session_id)?;
        self.episodic_store.delete_for_session(user_id, session_id)?;
        self.registry.delete(user_id, session_id)
    }

    /// Evicts sessions idle beyond `idle_ttl_secs`, cascading through the
    /// Tier Store and Episodic Store before dropping the registry entry.
    pub fn sweep_idle(&self, idle_ttl_secs: i64) {
        for (user_id, session_id) in self.registry.idle_sessions(idle_ttl_secs) {
            if let Err(e) = self.tier_store.delete_session(&session_id) {
                tracing::warn!(%user_id, %session_id, error = %e, "failed to delete tier store during idle sweep");
                continue;
            }
            if let Err(e) = self.episodic_store.delete_for_session(&user_id, &session_id) {
                tracing::warn!(%user_id, %session_id, error = %e, "failed to delete episodic entries during idle sweep");
                continue;
            }
            if let Err(e) = self.registry.delete(&user_id, &session_id) {
                tracing::warn!(%user_id, %session_id, error = %e, "failed to delete session registry entry during idle sweep");
                continue;
            }
            TraceEvent::SessionEvicted {
                session_id,
                idle_seconds: idle_ttl_secs,
            }
            .emit();
        }
        self.locks.prune_idle();
    }
}

fn lock_key(user_id: &str, session_id: &str) -> String {
    format!("{user_id}:{session_id}")
}
