//! Session metadata rows: the `(user_id, session_id)` → Session mapping
//! consumed by the Session Manager and the `ListSessions`/`GetHistory`/
//! `DeleteSession` HTTP surface. Backed by one JSON file per user, in the
//! same on-disk-cache-plus-in-memory-index shape as the Tier Store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use cce_domain::error::{Error, Result};
use cce_domain::trace::TraceEvent;
use cce_domain::turn::Session;
use chrono::Utc;
use parking_lot::RwLock;

pub struct SessionRegistry {
    dir: PathBuf,
    /// user_id -> (session_id -> Session)
    by_user: RwLock<HashMap<String, HashMap<String, Session>>>,
}

impl SessionRegistry {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(Error::Io)?;
        let mut by_user = HashMap::new();

        let entries = std::fs::read_dir(dir).map_err(Error::Io)?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(user_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(raw) = std::fs::read_to_string(&path) {
                if let Ok(sessions) = serde_json::from_str::<HashMap<String, Session>>(&raw) {
                    by_user.insert(user_id.to_owned(), sessions);
                }
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            by_user: RwLock::new(by_user),
        })
    }

    fn persist_user(&self, user_id: &str, sessions: &HashMap<String, Session>) -> Result<()> {
        let json = serde_json::to_string_pretty(sessions).map_err(Error::Json)?;
        std::fs::write(self.dir.join(format!("{user_id}.json")), json).map_err(Error::Io)
    }

    /// Resolve an existing session, or mint a fresh one if `session_id` is
    /// `None` ("new"). Returns `(session, is_new)`.
    pub fn resolve_or_create(&self, user_id: &str, session_id: Option<&str>) -> (Session, bool) {
        let mut by_user = self.by_user.write();
        let user_sessions = by_user.entry(user_id.to_owned()).or_default();

        if let Some(id) = session_id {
            if let Some(existing) = user_sessions.get(id) {
                return (existing.clone(), false);
            }
        }

        let new_id = session_id
            .map(|s| s.to_owned())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let session = Session::new(user_id, new_id.clone());
        user_sessions.insert(new_id, session.clone());
        let _ = self.persist_user(user_id, user_sessions);

        TraceEvent::SessionResolved {
            user_id: user_id.to_owned(),
            session_id: session.session_id.clone(),
            is_new: true,
        }
        .emit();

        (session, true)
    }

    pub fn get(&self, user_id: &str, session_id: &str) -> Option<Session> {
        self.by_user
            .read()
            .get(user_id)
            .and_then(|s| s.get(session_id))
            .cloned()
    }

    /// List sessions for a user, most-recently-active first.
    pub fn list(&self, user_id: &str) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .by_user
            .read()
            .get(user_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        sessions
    }

    pub fn touch(&self, user_id: &str, session_id: &str) {
        let mut by_user = self.by_user.write();
        if let Some(sessions) = by_user.get_mut(user_id) {
            if let Some(session) = sessions.get_mut(session_id) {
                session.last_activity_at = Utc::now();
                let snapshot = sessions.clone();
                let _ = self.persist_user(user_id, &snapshot);
            }
        }
    }

    pub fn set_title_if_absent(&self, user_id: &str, session_id: &str, first_user_text: &str) {
        let mut by_user = self.by_user.write();
        if let Some(sessions) = by_user.get_mut(user_id) {
            if let Some(session) = sessions.get_mut(session_id) {
                session.maybe_set_title_from(first_user_text);
                let snapshot = sessions.clone();
                let _ = self.persist_user(user_id, &snapshot);
            }
        }
    }

    /// Delete a session row. Idempotent: deleting a session that doesn't
    /// exist is not an error.
    pub fn delete(&self, user_id: &str, session_id: &str) -> Result<()> {
        let mut by_user = self.by_user.write();
        if let Some(sessions) = by_user.get_mut(user_id) {
            sessions.remove(session_id);
            self.persist_user(user_id, sessions)?;
        }
        TraceEvent::SessionDeleted {
            session_id: session_id.to_owned(),
        }
        .emit();
        Ok(())
    }

    /// Session ids idle beyond `ttl_secs`, across all users — candidates
    /// for the Session Manager's periodic eviction sweep.
    pub fn idle_sessions(&self, ttl_secs: i64) -> Vec<(String, String)> {
        let now = Utc::now();
        self.by_user
            .read()
            .iter()
            .flat_map(|(user_id, sessions)| {
                sessions.values().filter_map(move |s| {
                    let idle = now.signed_duration_since(s.last_activity_at).num_seconds();
                    if idle >= ttl_secs {
                        Some((user_id.clone(), s.session_id.clone()))
                    } else {
                        None
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_mints_fresh_id() {
        let dir = tempfile::tempdir().unwrap();
        let reg = SessionRegistry::open(dir.path()).unwrap();
        let (session, is_new) = reg.resolve_or_create("u1", None);
        assert!(is_new);
        assert!(!session.session_id.is_empty());
    }

    #[test]
    fn resolve_existing_returns_same_session() {
        let dir = tempfile::tempdir().unwrap();
        let reg = SessionRegistry::open(dir.path()).unwrap();
        let (s1, _) = reg.resolve_or_create("u1", None);
        let (s2, is_new) = reg.resolve_or_create("u1", Some(&s1.session_id));
        assert!(!is_new);
        assert_eq!(s1.session_id, s2.session_id);
    }

    #[test]
    fn delete_then_list_omits_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let reg = SessionRegistry::open(dir.path()).unwrap();
        let (s, _) = reg.resolve_or_create("u1", None);
        reg.delete("u1", &s.session_id).unwrap();
        assert!(reg.list("u1").is_empty());
        reg.delete("u1", &s.session_id).unwrap();
    }

    #[test]
    fn idle_sessions_finds_stale_entries() {
        let dir = tempfile::tempdir().unwrap();
        let reg = SessionRegistry::open(dir.path()).unwrap();
        let (s, _) = reg.resolve_or_create("u1", None);
        // Force last_activity_at into the past.
        {
            let mut by_user = reg.by_user.write();
            let sess = by_user.get_mut("u1").unwrap().get_mut(&s.session_id).unwrap();
            sess.last_activity_at = Utc::now() - chrono::Duration::hours(2);
        }
        let idle = reg.idle_sessions(3600);
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].1, s.session_id);
    }
}
