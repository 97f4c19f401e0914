//! Archives the oldest turns of a session into the Episodic Store once the
//! session's working-token estimate exceeds the configured budget, never
//! dropping below the configured floor of turns kept live.

use std::sync::Arc;

use cce_domain::error::Result;
use cce_domain::trace::TraceEvent;
use cce_domain::turn::{EpisodicEntry, Turn};
use cce_memory::EpisodicStore;
use cce_sessions::TierStore;
use chrono::Utc;

pub struct Pruner {
    tier_store: Arc<TierStore>,
    episodic_store: Arc<EpisodicStore>,
    turn_keep_floor: usize,
    safety_margin_tokens: u32,
}

impl Pruner {
    pub fn new(
        tier_store: Arc<TierStore>,
        episodic_store: Arc<EpisodicStore>,
        turn_keep_floor: usize,
        safety_margin_tokens: u32,
    ) -> Self {
        Self {
            tier_store,
            episodic_store,
            turn_keep_floor,
            safety_margin_tokens,
        }
    }

    /// Runs once per ingested user turn. A no-op if the session is already
    /// within budget.
    pub fn prune(&self, user_id: &str, session_id: &str, budget: u32) -> Result<()> {
        let mut working = self.tier_store.working_tokens(session_id);
        if working <= budget {
            return Ok(());
        }

        let turns = self.tier_store.list(session_id);
        let target = budget.saturating_sub(self.safety_margin_tokens);

        let mut group: Vec<Turn> = Vec::new();
        let mut i = 0;
        while working > target && turns.len() - i > self.turn_keep_floor {
            let t = &turns[i];
            working = working.saturating_sub(turn_tokens(t));
            group.push(t.clone());
            i += 1;
        }

        if group.is_empty() {
            return Ok(());
        }

        let episode = EpisodicEntry {
            episode_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            source_session_id: session_id.to_string(),
            turn_ids: group.iter().map(|t| t.turn_id.clone()).collect(),
            summary: group.iter().map(|t| t.tier2.as_str()).collect::<Vec<_>>().join(" "),
            payload: group.iter().map(|t| t.tier3.as_str()).collect::<Vec<_>>().join("\n"),
            archived_at: Utc::now(),
        };
        self.episodic_store.archive(user_id, episode.clone())?;
        for t in &group {
            self.tier_store.remove(session_id, &t.turn_id)?;
        }

        TraceEvent::Pruned {
            session_id: session_id.to_string(),
            turns_removed: group.len(),
            episode_id: episode.episode_id,
        }
        .emit();

        Ok(())
    }
}

fn turn_tokens(t: &Turn) -> u32 {
    (t.rendered_at_required_tier().len() / 4) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use cce_domain::turn::{Role, TurnMetadata};

    fn turn(id: &str, text: &str) -> Turn {
        Turn {
            turn_id: id.into(),
            session_id: "s1".into(),
            user_id: "u1".into(),
            role: Role::User,
            tier1: "k=v".into(),
            tier2: "summary".into(),
            tier3: text.into(),
            required_tier: 3,
            created_at: Utc::now(),
            metadata: TurnMetadata::default(),
        }
    }

    fn setup(n_turns: usize, text_len: usize) -> (Arc<TierStore>, Arc<EpisodicStore>) {
        let dir = tempfile::tempdir().unwrap();
        let tier_store = Arc::new(TierStore::open(&dir.path().join("tiers")).unwrap());
        let episodic_store = Arc::new(EpisodicStore::open(&dir.path().join("episodes")).unwrap());
        for i in 0..n_turns {
            tier_store
                .append("s1", turn(&format!("t{i}"), &"x".repeat(text_len)))
                .unwrap();
        }
        std::mem::forget(dir);
        (tier_store, episodic_store)
    }

    #[test]
    fn under_budget_is_a_no_op() {
        let (tier_store, episodic_store) = setup(3, 10);
        let pruner = Pruner::new(tier_store.clone(), episodic_store, 5, 0);
        pruner.prune("u1", "s1", 10_000).unwrap();
        assert_eq!(tier_store.list("s1").len(), 3);
    }

    #[test]
    fn over_budget_archives_oldest_turns_first() {
        let (tier_store, episodic_store) = setup(10, 200);
        let pruner = Pruner::new(tier_store.clone(), episodic_store.clone(), 5, 0);
        pruner.prune("u1", "s1", 100).unwrap();

        let remaining = tier_store.list("s1");
        assert!(remaining.len() >= 5);
        assert!(remaining.iter().all(|t| t.turn_id != "t0"));

        let archived = episodic_store.search("u1", "summary", 10);
        assert!(!archived.is_empty());
        assert!(archived[0].turn_ids.contains(&"t0".to_string()));
    }

    #[test]
    fn never_prunes_below_keep_floor() {
        let (tier_store, episodic_store) = setup(6, 1000);
        let pruner = Pruner::new(tier_store.clone(), episodic_store, 5, 0);
        pruner.prune("u1", "s1", 1).unwrap();
        assert_eq!(tier_store.list("s1").len(), 5);
    }

    #[test]
    fn payload_is_concatenated_tier3_in_order() {
        let (tier_store, episodic_store) = setup(8, 200);
        let pruner = Pruner::new(tier_store.clone(), episodic_store.clone(), 5, 0);
        pruner.prune("u1", "s1", 100).unwrap();
        let archived = episodic_store.search("u1", "summary", 10);
        let entry = &archived[0];
        let expected_first = "x".repeat(200);
        assert!(entry.payload.starts_with(&expected_first));
    }
}
