//! Per-user append-only archive of pruned turns, with a reverse-index
//! summary search. The index structure (lowercase-token -> episode ->
//! match count, AND semantics across query tokens, most-recent-archived
//! tiebreak) mirrors the transcript search index used elsewhere in this
//! codebase, applied to episode summaries instead of transcript lines.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use cce_domain::error::{Error, Result};
use cce_domain::turn::EpisodicEntry;
use parking_lot::RwLock;

pub struct EpisodicStore {
    dir: PathBuf,
    /// user_id -> episode_id -> entry, insertion order preserved via a
    /// parallel id list so search ties break by archived_at, not hash order.
    by_user: RwLock<HashMap<String, HashMap<String, EpisodicEntry>>>,
}

impl EpisodicStore {
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
                if let Ok(episodes) = serde_json::from_str::<HashMap<String, EpisodicEntry>>(&raw)
                {
                    by_user.insert(user_id.to_owned(), episodes);
                }
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            by_user: RwLock::new(by_user),
        })
    }

    fn persist(&self, user_id: &str, episodes: &HashMap<String, EpisodicEntry>) -> Result<()> {
        let json = serde_json::to_string_pretty(episodes).map_err(Error::Json)?;
        std::fs::write(self.dir.join(format!("{user_id}.json")), json).map_err(Error::Io)
    }

    pub fn archive(&self, user_id: &str, entry: EpisodicEntry) -> Result<()> {
        let mut by_user = self.by_user.write();
        let episodes = by_user.entry(user_id.to_owned()).or_default();
        episodes.insert(entry.episode_id.clone(), entry);
        self.persist(user_id, episodes)
    }

    /// Up to `k` entries whose summary best matches `query`. AND semantics
    /// across whitespace/punctuation-tokenized query words; ranked by
    /// total token-overlap count, ties broken by most-recent `archived_at`.
    pub fn search(&self, user_id: &str, query: &str, k: usize) -> Vec<EpisodicEntry> {
        let by_user = self.by_user.read();
        let Some(episodes) = by_user.get(user_id) else {
            return vec![];
        };

        let query_words = tokenize(query);
        if query_words.is_empty() {
            return vec![];
        }

        let mut scored: Vec<(u32, &EpisodicEntry)> = episodes
            .values()
            .filter_map(|e| {
                let summary_words = tokenize(&e.summary);
                let score: u32 = query_words
                    .iter()
                    .map(|qw| summary_words.iter().filter(|sw| *sw == qw).count() as u32)
                    .sum();
                let all_present = query_words.iter().all(|qw| summary_words.contains(qw));
                (all_present && score > 0).then_some((score, e))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.archived_at.cmp(&a.1.archived_at)));
        scored.into_iter().take(k).map(|(_, e)| e.clone()).collect()
    }

    /// Cascading cleanup: remove every entry archived from `session_id`.
    pub fn delete_for_session(&self, user_id: &str, session_id: &str) -> Result<()> {
        let mut by_user = self.by_user.write();
        if let Some(episodes) = by_user.get_mut(user_id) {
            episodes.retain(|_, e| e.source_session_id != session_id);
            self.persist(user_id, episodes)?;
        }
        Ok(())
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 2)
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(id: &str, session: &str, summary: &str) -> EpisodicEntry {
        EpisodicEntry {
            episode_id: id.into(),
            user_id: "u1".into(),
            source_session_id: session.into(),
            turn_ids: vec!["t1".into(), "t2".into()],
            summary: summary.into(),
            payload: "full tier3 text".into(),
            archived_at: Utc::now(),
        }
    }

    #[test]
    fn search_and_semantics_across_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodicStore::open(dir.path()).unwrap();
        store
            .archive("u1", entry("e1", "s1", "User introduced their dog Rust"))
            .unwrap();
        store
            .archive("u1", entry("e2", "s1", "User introduced themselves"))
            .unwrap();

        let hits = store.search("u1", "dog rust", 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].episode_id, "e1");
    }

    #[test]
    fn search_respects_k_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodicStore::open(dir.path()).unwrap();
        for i in 0..5 {
            store
                .archive("u1", entry(&format!("e{i}"), "s1", "weather in paris today"))
                .unwrap();
        }
        let hits = store.search("u1", "weather paris", 2);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn payload_equals_concatenated_tier3s() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodicStore::open(dir.path()).unwrap();
        let mut e = entry("e1", "s1", "summary");
        e.payload = "turn one text\nturn two text".into();
        store.archive("u1", e.clone()).unwrap();
        let hits = store.search("u1", "summary", 1);
        assert_eq!(hits[0].payload, e.payload);
    }

    #[test]
    fn delete_for_session_cascades() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodicStore::open(dir.path()).unwrap();
        store.archive("u1", entry("e1", "s1", "alpha beta")).unwrap();
        store.archive("u1", entry("e2", "s2", "alpha beta")).unwrap();
        store.delete_for_session("u1", "s1").unwrap();
        let hits = store.search("u1", "alpha beta", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].episode_id, "e2");
    }

    #[test]
    fn no_match_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodicStore::open(dir.path()).unwrap();
        store.archive("u1", entry("e1", "s1", "alpha beta")).unwrap();
        assert!(store.search("u1", "nonexistent", 5).is_empty());
    }
}
