//! Per-user key/value store of durable facts extracted across sessions.
//!
//! One JSON file per user under `<state_dir>/facts/<user_id>.json`, guarded
//! by an `RwLock`-backed in-memory index in the same shape as the Tier
//! Store and Session Registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use cce_domain::error::{Error, Result};
use cce_domain::turn::UserFact;
use chrono::Utc;
use parking_lot::RwLock;

pub struct UserFactStore {
    dir: PathBuf,
    /// user_id -> (key -> UserFact)
    by_user: RwLock<HashMap<String, HashMap<String, UserFact>>>,
}

impl UserFactStore {
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
                if let Ok(facts) = serde_json::from_str::<HashMap<String, UserFact>>(&raw) {
                    by_user.insert(user_id.to_owned(), facts);
                }
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            by_user: RwLock::new(by_user),
        })
    }

    fn persist(&self, user_id: &str, facts: &HashMap<String, UserFact>) -> Result<()> {
        let json = serde_json::to_string_pretty(facts).map_err(Error::Json)?;
        std::fs::write(self.dir.join(format!("{user_id}.json")), json).map_err(Error::Io)
    }

    /// Insert or update a fact. `(user_id, key)` is unique by construction.
    pub fn upsert(&self, user_id: &str, key: &str, value: &str) -> Result<()> {
        let mut by_user = self.by_user.write();
        let facts = by_user.entry(user_id.to_owned()).or_default();
        let now = Utc::now();
        facts
            .entry(key.to_owned())
            .and_modify(|f| {
                f.value = value.to_owned();
                f.last_accessed_at = now;
            })
            .or_insert_with(|| UserFact {
                user_id: user_id.to_owned(),
                key: key.to_owned(),
                value: value.to_owned(),
                created_at: now,
                last_accessed_at: now,
            });
        self.persist(user_id, facts)
    }

    /// Delete facts whose key matches exactly, or whose key/value contains
    /// `key_or_query` as a case-insensitive substring (the `[FORGET:]`
    /// directive accepts either a precise key or a loose query).
    pub fn forget(&self, user_id: &str, key_or_query: &str) -> Result<usize> {
        let mut by_user = self.by_user.write();
        let Some(facts) = by_user.get_mut(user_id) else {
            return Ok(0);
        };
        let needle = key_or_query.to_lowercase();
        let before = facts.len();
        facts.retain(|k, f| {
            let matches = k.to_lowercase() == needle
                || k.to_lowercase().contains(&needle)
                || f.value.to_lowercase().contains(&needle);
            !matches
        });
        let removed = before - facts.len();
        if removed > 0 {
            self.persist(user_id, facts)?;
        }
        Ok(removed)
    }

    pub fn get(&self, user_id: &str, key: &str) -> Option<UserFact> {
        self.by_user.read().get(user_id)?.get(key).cloned()
    }

    /// Render the user-fact block for the Prompt Builder: `key=value`
    /// lines sorted by key.
    pub fn render_block(&self, user_id: &str) -> String {
        let by_user = self.by_user.read();
        let Some(facts) = by_user.get(user_id) else {
            return String::new();
        };
        let mut lines: Vec<String> = facts
            .values()
            .map(|f| format!("{}={}", f.key, f.value))
            .collect();
        lines.sort();
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_then_render_sorted_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = UserFactStore::open(dir.path()).unwrap();
        store.upsert("u1", "user_name", "Jordan").unwrap();
        store.upsert("u1", "dog_name", "Biscuit").unwrap();
        assert_eq!(store.render_block("u1"), "dog_name=Biscuit\nuser_name=Jordan");
    }

    #[test]
    fn upsert_same_key_overwrites_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = UserFactStore::open(dir.path()).unwrap();
        store.upsert("u1", "k", "v1").unwrap();
        store.upsert("u1", "k", "v2").unwrap();
        assert_eq!(store.get("u1", "k").unwrap().value, "v2");
    }

    #[test]
    fn forget_by_exact_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = UserFactStore::open(dir.path()).unwrap();
        store.upsert("u1", "dog_name", "Biscuit").unwrap();
        let removed = store.forget("u1", "dog_name").unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("u1", "dog_name").is_none());
    }

    #[test]
    fn forget_by_loose_query_matches_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = UserFactStore::open(dir.path()).unwrap();
        store.upsert("u1", "dog_name", "Biscuit").unwrap();
        let removed = store.forget("u1", "biscuit").unwrap();
        assert_eq!(removed, 1);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = UserFactStore::open(dir.path()).unwrap();
            store.upsert("u1", "k", "v").unwrap();
        }
        let store = UserFactStore::open(dir.path()).unwrap();
        assert_eq!(store.get("u1", "k").unwrap().value, "v");
    }
}
