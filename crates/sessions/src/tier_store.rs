//! Per-session ordered log of turns at three tiers of fidelity.
//!
//! In-memory state is an `RwLock`-guarded index, rebuilt from disk at
//! startup; the store is the authoritative on-disk copy and every mutation
//! is written through before the call returns, so a reader can never
//! observe a partial append. One JSON file per session under
//! `<state_dir>/tiers/<session_id>.json` mirrors the append-only-file-per-
//! session layout used for session transcripts elsewhere in this codebase.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use cce_domain::error::{Error, Result};
use cce_domain::turn::Turn;
use parking_lot::RwLock;

/// Outcome of `append`.
#[derive(Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    Ok,
    Conflict,
}

/// Outcome of `set_required_tier` / `remove`.
#[derive(Debug, PartialEq, Eq)]
pub enum LookupOutcome {
    Ok,
    NotFound,
}

pub struct TierStore {
    dir: PathBuf,
    sessions: RwLock<HashMap<String, Vec<Turn>>>,
}

impl TierStore {
    /// Open (or create) the store rooted at `dir`, loading any existing
    /// per-session files.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(Error::Io)?;
        let mut sessions = HashMap::new();

        let entries = std::fs::read_dir(dir).map_err(Error::Io)?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(session_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match std::fs::read_to_string(&path) {
                Ok(raw) => match serde_json::from_str::<Vec<Turn>>(&raw) {
                    Ok(turns) => {
                        sessions.insert(session_id.to_owned(), turns);
                    }
                    Err(e) => {
                        tracing::warn!(session_id, error = %e, "skipping unreadable tier file");
                    }
                },
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "failed to read tier file");
                }
            }
        }

        tracing::info!(sessions = sessions.len(), "tier store loaded");
        Ok(Self {
            dir: dir.to_path_buf(),
            sessions: RwLock::new(sessions),
        })
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    fn persist(&self, session_id: &str, turns: &[Turn]) -> Result<()> {
        let json = serde_json::to_string_pretty(turns).map_err(Error::Json)?;
        std::fs::write(self.path_for(session_id), json).map_err(Error::Io)
    }

    /// Append a new turn. Fails with `Conflict` if `turn_id` already exists
    /// in the session.
    pub fn append(&self, session_id: &str, turn: Turn) -> Result<AppendOutcome> {
        let mut sessions = self.sessions.write();
        let turns = sessions.entry(session_id.to_owned()).or_default();
        if turns.iter().any(|t| t.turn_id == turn.turn_id) {
            return Ok(AppendOutcome::Conflict);
        }
        turns.push(turn);
        self.persist(session_id, turns)?;
        Ok(AppendOutcome::Ok)
    }

    /// Turns in insertion order.
    pub fn list(&self, session_id: &str) -> Vec<Turn> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Set required tier to `max(current, n)`. Idempotent, never decreases.
    pub fn set_required_tier(
        &self,
        session_id: &str,
        turn_id: &str,
        n: u8,
    ) -> Result<LookupOutcome> {
        let mut sessions = self.sessions.write();
        let Some(turns) = sessions.get_mut(session_id) else {
            return Ok(LookupOutcome::NotFound);
        };
        let Some(turn) = turns.iter_mut().find(|t| t.turn_id == turn_id) else {
            return Ok(LookupOutcome::NotFound);
        };
        turn.escalate_required_tier(n);
        let turns_snapshot = turns.clone();
        self.persist(session_id, &turns_snapshot)?;
        Ok(LookupOutcome::Ok)
    }

    /// Remove a turn. Used only by the Pruner.
    pub fn remove(&self, session_id: &str, turn_id: &str) -> Result<LookupOutcome> {
        let mut sessions = self.sessions.write();
        let Some(turns) = sessions.get_mut(session_id) else {
            return Ok(LookupOutcome::NotFound);
        };
        let before = turns.len();
        turns.retain(|t| t.turn_id != turn_id);
        if turns.len() == before {
            return Ok(LookupOutcome::NotFound);
        }
        let turns_snapshot = turns.clone();
        self.persist(session_id, &turns_snapshot)?;
        Ok(LookupOutcome::Ok)
    }

    /// Remove every turn for a session and delete its on-disk file.
    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        self.sessions.write().remove(session_id);
        let path = self.path_for(session_id);
        if path.exists() {
            std::fs::remove_file(path).map_err(Error::Io)?;
        }
        Ok(())
    }

    /// Sum of `tokens(turn at its required tier)` over the session, using
    /// the characters/4 heuristic shared with the Prompt Builder.
    pub fn working_tokens(&self, session_id: &str) -> u32 {
        self.sessions
            .read()
            .get(session_id)
            .map(|turns| {
                turns
                    .iter()
                    .map(|t| (t.rendered_at_required_tier().len() / 4) as u32)
                    .sum()
            })
            .unwrap_or(0)
    }
}
